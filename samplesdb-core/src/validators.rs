//! Field-level validation rules.
//!
//! Every form-facing field maps to one variant of [`FieldRule`], each backed
//! by a pure function `(raw) -> Result<(), Error>`. The same functions back
//! the `garde(custom)` annotations on the `New*` input structs, so the rules
//! applied at the form boundary and at the write boundary cannot drift.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::db::error::{Error, Result};
use crate::db::model::sample::MarkupLanguage;
use crate::db::model::user::Salutation;

pub const NAME_MAX: usize = 200;
pub const ORGANIZATION_MAX: usize = 200;
pub const PASSWORD_MAX: usize = 100;
pub const EMAIL_MAX: usize = 200;
pub const COLLECTION_NAME_MAX: usize = 200;
pub const SAMPLE_DESCRIPTION_MAX: usize = 200;
pub const SAMPLE_LOCATION_MAX: usize = 200;
pub const CODE_NAME_MAX: usize = 20;
pub const CODE_VALUE_MAX: usize = 200;
pub const TIMEZONE_MAX: usize = 64;
pub const ALIQUOTS_MIN: u32 = 2;
pub const ALIQUOTS_MAX: u32 = 1000;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

static TIMEZONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_+/\-]*$").unwrap());

fn bounded(field: &'static str, raw: &str, required: bool, max: usize) -> Result<()> {
    if required && raw.is_empty() {
        return Err(Error::invalid_field(field, "must not be empty"));
    }

    if raw.chars().count() > max {
        return Err(Error::invalid_field(
            field,
            format!("must be at most {max} characters"),
        ));
    }

    Ok(())
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn salutation(raw: &str) -> Result<()> {
    Salutation::from_str(raw)
        .map(|_| ())
        .map_err(|_| Error::invalid_field("salutation", format!("{raw} is not a salutation")))
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn given_name(raw: &str) -> Result<()> {
    bounded("given_name", raw, true, NAME_MAX)
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn surname(raw: &str) -> Result<()> {
    bounded("surname", raw, true, NAME_MAX)
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn organization(raw: &str) -> Result<()> {
    bounded("organization", raw, false, ORGANIZATION_MAX)
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn password(raw: &str) -> Result<()> {
    bounded("password", raw, true, PASSWORD_MAX)
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn email(raw: &str) -> Result<()> {
    bounded("email", raw, true, EMAIL_MAX)?;

    if !EMAIL_RE.is_match(raw) {
        return Err(Error::invalid_field(
            "email",
            "is not a valid e-mail address",
        ));
    }

    Ok(())
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn collection_name(raw: &str) -> Result<()> {
    bounded("name", raw, true, COLLECTION_NAME_MAX)
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn collection_owner(raw: &str) -> Result<()> {
    bounded("owner", raw, true, COLLECTION_NAME_MAX)
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn sample_description(raw: &str) -> Result<()> {
    bounded("description", raw, true, SAMPLE_DESCRIPTION_MAX)
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn sample_location(raw: &str) -> Result<()> {
    bounded("location", raw, false, SAMPLE_LOCATION_MAX)
}

/// Form-level bound on split fan-out. The lineage engine itself accepts any
/// count of at least 1.
///
/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn aliquots(count: u32) -> Result<()> {
    if !(ALIQUOTS_MIN..=ALIQUOTS_MAX).contains(&count) {
        return Err(Error::invalid_field(
            "aliquots",
            format!("must be between {ALIQUOTS_MIN} and {ALIQUOTS_MAX}"),
        ));
    }

    Ok(())
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn code_name(raw: &str) -> Result<()> {
    bounded("code_name", raw, true, CODE_NAME_MAX)
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn code_value(raw: &str) -> Result<()> {
    bounded("code_value", raw, true, CODE_VALUE_MAX)
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn log_message(raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Err(Error::invalid_field("message", "must not be empty"));
    }

    Ok(())
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn timezone(raw: &str) -> Result<()> {
    bounded("timezone", raw, true, TIMEZONE_MAX)?;

    if !TIMEZONE_RE.is_match(raw) {
        return Err(Error::invalid_field(
            "timezone",
            "is not a timezone name",
        ));
    }

    Ok(())
}

/// # Errors
/// [`Error::InvalidField`] naming the offending field.
pub fn markup_language(raw: &str) -> Result<()> {
    MarkupLanguage::from_str(raw)
        .map(|_| ())
        .map_err(|_| Error::invalid_field("notes_markup", format!("{raw} is not a markup language")))
}

/// The closed set of field rules. Form layers dispatch on the tag instead of
/// inheriting from validator classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    Salutation,
    GivenName,
    Surname,
    Organization,
    Password,
    Email,
    CollectionName,
    CollectionOwner,
    SampleDescription,
    SampleLocation,
    Aliquots,
    CodeName,
    CodeValue,
    LogMessage,
    Timezone,
    MarkupLanguage,
}

impl FieldRule {
    /// # Errors
    /// Returns [`Error::InvalidField`] naming the offending field.
    pub fn apply(self, raw: &str) -> Result<()> {
        match self {
            Self::Salutation => salutation(raw),
            Self::GivenName => given_name(raw),
            Self::Surname => surname(raw),
            Self::Organization => organization(raw),
            Self::Password => password(raw),
            Self::Email => email(raw),
            Self::CollectionName => collection_name(raw),
            Self::CollectionOwner => collection_owner(raw),
            Self::SampleDescription => sample_description(raw),
            Self::SampleLocation => sample_location(raw),
            Self::Aliquots => {
                let count: u32 = raw
                    .trim()
                    .parse()
                    .map_err(|_| Error::invalid_field("aliquots", "must be a whole number"))?;
                aliquots(count)
            }
            Self::CodeName => code_name(raw),
            Self::CodeValue => code_value(raw),
            Self::LogMessage => log_message(raw),
            Self::Timezone => timezone(raw),
            Self::MarkupLanguage => markup_language(raw),
        }
    }
}

// garde adapters for the New* input structs.

pub(crate) fn garde_given_name(value: &str, (): &()) -> garde::Result {
    as_garde(given_name(value))
}

pub(crate) fn garde_surname(value: &str, (): &()) -> garde::Result {
    as_garde(surname(value))
}

pub(crate) fn garde_organization(value: &str, (): &()) -> garde::Result {
    as_garde(organization(value))
}

pub(crate) fn garde_password(value: &str, (): &()) -> garde::Result {
    as_garde(password(value))
}

pub(crate) fn garde_email(value: &str, (): &()) -> garde::Result {
    as_garde(email(value))
}

pub(crate) fn garde_timezone(value: &str, (): &()) -> garde::Result {
    as_garde(timezone(value))
}

pub(crate) fn garde_collection_name(value: &str, (): &()) -> garde::Result {
    as_garde(collection_name(value))
}

pub(crate) fn garde_collection_owner(value: &str, (): &()) -> garde::Result {
    as_garde(collection_owner(value))
}

pub(crate) fn garde_opt_collection_name(value: &Option<String>, (): &()) -> garde::Result {
    match value {
        Some(value) => as_garde(collection_name(value)),
        None => Ok(()),
    }
}

pub(crate) fn garde_opt_collection_owner(value: &Option<String>, (): &()) -> garde::Result {
    match value {
        Some(value) => as_garde(collection_owner(value)),
        None => Ok(()),
    }
}

pub(crate) fn garde_sample_description(value: &str, (): &()) -> garde::Result {
    as_garde(sample_description(value))
}

pub(crate) fn garde_sample_location(value: &str, (): &()) -> garde::Result {
    as_garde(sample_location(value))
}

pub(crate) fn garde_codes(
    codes: &std::collections::BTreeMap<String, String>,
    (): &(),
) -> garde::Result {
    for (name, value) in codes {
        as_garde(code_name(name))?;
        as_garde(code_value(value))?;
    }

    Ok(())
}

fn as_garde(result: Result<()>) -> garde::Result {
    result.map_err(|err| garde::Error::new(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_reject_out_of_range_input() {
        assert!(FieldRule::GivenName.apply("").is_err());
        assert!(FieldRule::GivenName.apply(&"x".repeat(201)).is_err());
        assert!(FieldRule::GivenName.apply("Dave").is_ok());

        assert!(FieldRule::Organization.apply("").is_ok());

        assert!(FieldRule::Email.apply("not-an-address").is_err());
        assert!(FieldRule::Email.apply("dave@example.com").is_ok());

        assert!(FieldRule::CodeName.apply(&"x".repeat(21)).is_err());
        assert!(FieldRule::CodeName.apply("barcode").is_ok());
    }

    #[test]
    fn aliquot_count_is_bounded() {
        assert!(FieldRule::Aliquots.apply("1").is_err());
        assert!(FieldRule::Aliquots.apply("2").is_ok());
        assert!(FieldRule::Aliquots.apply("1000").is_ok());
        assert!(FieldRule::Aliquots.apply("1001").is_err());
        assert!(FieldRule::Aliquots.apply("several").is_err());
    }

    #[test]
    fn closed_vocabularies_parse() {
        assert!(FieldRule::Salutation.apply("Dr.").is_ok());
        assert!(FieldRule::Salutation.apply("Captain").is_err());

        assert!(FieldRule::MarkupLanguage.apply("md").is_ok());
        assert!(FieldRule::MarkupLanguage.apply("docx").is_err());

        assert!(FieldRule::Timezone.apply("Europe/London").is_ok());
        assert!(FieldRule::Timezone.apply("not a zone!").is_err());
    }

    #[test]
    fn errors_name_the_field() {
        let err = FieldRule::SampleDescription.apply("").unwrap_err();

        assert_eq!(
            err,
            Error::invalid_field("description", "must not be empty")
        );
    }
}
