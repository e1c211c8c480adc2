use argon2::{
    Argon2, PasswordHash, PasswordVerifier,
    password_hash::{PasswordHasher, SaltString},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use garde::Validate;
use rand::TryRngCore;
use rand::rngs::OsRng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::error::{Error, Result};
use crate::db::store::Transaction;
use crate::db::{FetchById, Write};
use crate::validators;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::VariantArray,
)]
pub enum Salutation {
    #[serde(rename = "Mr.")]
    #[strum(serialize = "Mr.")]
    Mr,
    #[serde(rename = "Mrs.")]
    #[strum(serialize = "Mrs.")]
    Mrs,
    Miss,
    #[serde(rename = "Ms.")]
    #[strum(serialize = "Ms.")]
    Ms,
    #[serde(rename = "Dr.")]
    #[strum(serialize = "Dr.")]
    Dr,
    #[serde(rename = "Prof.")]
    #[strum(serialize = "Prof.")]
    Prof,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub(crate) id: Uuid,
    pub(crate) salutation: Salutation,
    pub(crate) given_name: String,
    pub(crate) surname: String,
    pub(crate) organization: String,
    #[serde(skip)]
    pub(crate) password_hash: String,
    pub(crate) password_changed: DateTime<Utc>,
    pub(crate) created: DateTime<Utc>,
    pub(crate) timezone: String,
    pub(crate) limit_id: String,
}

impl User {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn salutation(&self) -> Salutation {
        self.salutation
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        let salutation: &str = self.salutation.into();

        [salutation, &self.given_name, &self.surname].join(" ")
    }

    #[must_use]
    pub fn organization(&self) -> &str {
        &self.organization
    }

    #[must_use]
    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    #[must_use]
    pub fn limit_id(&self) -> &str {
        &self.limit_id
    }

    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    #[must_use]
    pub fn password_changed(&self) -> DateTime<Utc> {
        self.password_changed
    }

    /// Checks `password` against the stored hash.
    #[must_use]
    pub fn verify_password(&self, password: &str) -> bool {
        let Ok(parsed_hash) = PasswordHash::new(&self.password_hash) else {
            return false;
        };

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }

    pub(crate) fn set_password(&mut self, password: &str, now: DateTime<Utc>) -> Result<()> {
        validators::password(password)?;

        self.password_hash = hash_password(password)?;
        self.password_changed = now;

        Ok(())
    }
}

fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(Error::from_other_error)?;

    let salt = SaltString::encode_b64(&salt).map_err(Error::from_other_error)?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(Error::from_other_error)?
        .to_string();

    Ok(hash)
}

#[derive(Clone, Deserialize, Validate)]
#[garde(allow_unvalidated)]
pub struct NewUser {
    pub salutation: Salutation,
    #[garde(custom(validators::garde_given_name))]
    pub given_name: String,
    #[garde(custom(validators::garde_surname))]
    pub surname: String,
    #[garde(custom(validators::garde_organization))]
    #[serde(default)]
    pub organization: String,
    #[garde(custom(validators::garde_password))]
    pub password: String,
    #[garde(custom(validators::garde_email))]
    pub email: String,
    #[garde(custom(validators::garde_timezone))]
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_limit")]
    pub limit_id: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_limit() -> String {
    "academic".to_string()
}

impl Write for NewUser {
    type Returns = User;

    fn write(self, txn: &mut Transaction) -> Result<Self::Returns> {
        self.validate()?;

        let Self {
            salutation,
            given_name,
            surname,
            organization,
            password,
            email,
            timezone,
            limit_id,
        } = self;

        let limit = txn
            .tables
            .user_limits
            .get(&limit_id)
            .ok_or_else(|| Error::reference_not_found("user", "user_limit", &limit_id))?;

        if !limit.matches_email(&email) {
            return Err(Error::invalid_field(
                "email",
                "is not valid for the selected account type",
            ));
        }

        if txn.tables.email_addresses.contains_key(&email) {
            return Err(Error::duplicate("email_address", "email", &email));
        }

        let now = txn.now();

        let user = User {
            id: Uuid::now_v7(),
            salutation,
            given_name,
            surname,
            organization,
            password_hash: hash_password(&password)?,
            password_changed: now,
            created: now,
            timezone,
            limit_id,
        };

        txn.tables.email_addresses.insert(
            email.clone(),
            EmailAddress {
                email,
                user_id: user.id,
                created: now,
                verified: None,
            },
        );
        txn.tables.users.insert(user.id, user.clone());

        tracing::info!(user = %user.id, "user created");

        Ok(user)
    }
}

impl FetchById for User {
    type Id = Uuid;

    fn fetch_by_id(id: &Self::Id, txn: &Transaction) -> Result<Self> {
        txn.tables.users.get(id).cloned().ok_or(Error::RecordNotFound)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailAddress {
    pub(crate) email: String,
    pub(crate) user_id: Uuid,
    pub(crate) created: DateTime<Utc>,
    pub(crate) verified: Option<DateTime<Utc>>,
}

impl EmailAddress {
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    #[must_use]
    pub fn verified(&self) -> Option<DateTime<Utc>> {
        self.verified
    }

    /// Verification is permanent; re-verifying keeps the original timestamp.
    pub(crate) fn mark_verified(&mut self, now: DateTime<Utc>) {
        if self.verified.is_none() {
            self.verified = Some(now);
        }
    }
}

/// Adds a further address to an existing account. The address starts
/// unverified.
#[derive(Clone, Deserialize, Validate)]
#[garde(allow_unvalidated)]
pub struct NewEmailAddress {
    pub user_id: Uuid,
    #[garde(custom(validators::garde_email))]
    pub email: String,
}

impl Write for NewEmailAddress {
    type Returns = EmailAddress;

    fn write(self, txn: &mut Transaction) -> Result<Self::Returns> {
        self.validate()?;

        let Self { user_id, email } = self;

        if !txn.tables.users.contains_key(&user_id) {
            return Err(Error::reference_not_found(
                "email_address",
                "user",
                user_id.to_string(),
            ));
        }

        if txn.tables.email_addresses.contains_key(&email) {
            return Err(Error::duplicate("email_address", "email", &email));
        }

        let address = EmailAddress {
            email: email.clone(),
            user_id,
            created: txn.now(),
            verified: None,
        };
        txn.tables.email_addresses.insert(email, address.clone());

        Ok(address)
    }
}

/// Looks a user up through any of their verified addresses. Unverified
/// addresses never authenticate.
#[must_use]
pub fn user_by_email(txn: &Transaction, email: &str) -> Option<User> {
    let address = txn.tables.email_addresses.get(email)?;
    address.verified?;

    txn.tables.users.get(&address.user_id).cloned()
}

/// Authenticates an email/password pair against the verified-address index.
#[must_use]
pub fn authenticate(txn: &Transaction, email: &str, password: &str) -> Option<User> {
    let user = user_by_email(txn, email)?;

    user.verify_password(password).then_some(user)
}

#[must_use]
pub fn verified_emails(txn: &Transaction, user_id: Uuid) -> Vec<EmailAddress> {
    txn.tables
        .email_addresses
        .values()
        .filter(|a| a.user_id == user_id && a.verified.is_some())
        .cloned()
        .collect()
}

/// Named account tier capping what a user may accumulate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLimit {
    pub id: String,
    pub collections_limit: u64,
    pub samples_limit: u64,
    pub templates_limit: u64,
    pub storage_limit: u64,
    /// Case-insensitive regex an address must match to sign up at this tier.
    pub email_pattern: String,
}

impl UserLimit {
    #[must_use]
    pub fn academic() -> Self {
        Self {
            id: "academic".to_string(),
            collections_limit: 10,
            samples_limit: 10_000,
            templates_limit: 10,
            storage_limit: 100 * 1_048_576,
            email_pattern: ".*".to_string(),
        }
    }

    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            id: "unlimited".to_string(),
            collections_limit: 1_000_000,
            samples_limit: 1_000_000,
            templates_limit: 1_000_000,
            storage_limit: 8192 * 1_048_576,
            email_pattern: ".*".to_string(),
        }
    }

    #[must_use]
    pub fn matches_email(&self, email: &str) -> bool {
        Regex::new(&format!("(?i){}", self.email_pattern))
            .map(|re| re.is_match(email))
            .unwrap_or(false)
    }
}

impl Write for UserLimit {
    type Returns = Self;

    fn write(self, txn: &mut Transaction) -> Result<Self::Returns> {
        if self.id.is_empty() || self.id.chars().count() > 20 {
            return Err(Error::invalid_field(
                "id",
                "must be between 1 and 20 characters",
            ));
        }

        if let Err(err) = Regex::new(&self.email_pattern) {
            return Err(Error::invalid_field("email_pattern", err.to_string()));
        }

        if txn.tables.user_limits.contains_key(&self.id) {
            return Err(Error::duplicate("user_limit", "id", &self.id));
        }

        txn.tables.user_limits.insert(self.id.clone(), self.clone());

        Ok(self)
    }
}

/// Global group; membership is independent of any collection.
#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub id: String,
    pub description: String,
    pub created: DateTime<Utc>,
}

impl Group {
    pub const ADMINS: &'static str = "admins";
}

#[derive(Clone, Deserialize)]
pub struct NewGroup {
    pub id: String,
    pub description: String,
}

impl Write for NewGroup {
    type Returns = Group;

    fn write(self, txn: &mut Transaction) -> Result<Self::Returns> {
        let Self { id, description } = self;

        if id.is_empty() || id.chars().count() > 20 {
            return Err(Error::invalid_field(
                "id",
                "must be between 1 and 20 characters",
            ));
        }

        if txn.tables.groups.contains_key(&id) {
            return Err(Error::duplicate("group", "id", &id));
        }

        let group = Group {
            id: id.clone(),
            description,
            created: txn.now(),
        };
        txn.tables.groups.insert(id, group.clone());

        Ok(group)
    }
}

impl Transaction {
    /// # Errors
    /// [`Error::ReferenceNotFound`] when the user or group does not exist.
    pub fn add_user_to_group(&mut self, user_id: Uuid, group_id: &str) -> Result<()> {
        if !self.tables.users.contains_key(&user_id) {
            return Err(Error::reference_not_found(
                "user_group",
                "user",
                user_id.to_string(),
            ));
        }

        if !self.tables.groups.contains_key(group_id) {
            return Err(Error::reference_not_found("user_group", "group", group_id));
        }

        self.tables.user_groups.insert((user_id, group_id.to_string()));

        Ok(())
    }

    /// # Errors
    /// [`Error::RecordNotFound`] when the user is not a member.
    pub fn remove_user_from_group(&mut self, user_id: Uuid, group_id: &str) -> Result<()> {
        if !self.tables.user_groups.remove(&(user_id, group_id.to_string())) {
            return Err(Error::RecordNotFound);
        }

        Ok(())
    }

    #[must_use]
    pub fn groups_of(&self, user_id: Uuid) -> Vec<String> {
        self.tables
            .user_groups
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, g)| g.clone())
            .collect()
    }
}

/// Printable label layout owned by a user. Template content itself is an
/// opaque SVG blob.
#[derive(Debug, Clone)]
pub struct LabelTemplate {
    pub id: String,
    pub creator_id: Uuid,
    pub public: bool,
    pub columns: u32,
    pub rows: u32,
    pub horizontal_spacing: f64,
    pub vertical_spacing: f64,
    pub content: Option<Bytes>,
    pub created: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NewLabelTemplate {
    pub id: String,
    pub creator_id: Uuid,
    pub public: bool,
    pub columns: u32,
    pub rows: u32,
    pub horizontal_spacing: f64,
    pub vertical_spacing: f64,
    pub content: Option<Bytes>,
}

impl Write for NewLabelTemplate {
    type Returns = LabelTemplate;

    fn write(self, txn: &mut Transaction) -> Result<Self::Returns> {
        let Self {
            id,
            creator_id,
            public,
            columns,
            rows,
            horizontal_spacing,
            vertical_spacing,
            content,
        } = self;

        if id.is_empty() || id.chars().count() > 50 {
            return Err(Error::invalid_field(
                "id",
                "must be between 1 and 50 characters",
            ));
        }

        if columns < 1 || rows < 1 {
            return Err(Error::invalid_field(
                "columns",
                "label sheets need at least one row and one column",
            ));
        }

        if !txn.tables.users.contains_key(&creator_id) {
            return Err(Error::reference_not_found(
                "label_template",
                "user",
                creator_id.to_string(),
            ));
        }

        let key = (creator_id, id.clone());
        if txn.tables.label_templates.contains_key(&key) {
            return Err(Error::duplicate("label_template", "id", &id));
        }

        let template = LabelTemplate {
            id,
            creator_id,
            public,
            columns,
            rows,
            horizontal_spacing,
            vertical_spacing,
            content,
            created: txn.now(),
        };
        txn.tables.label_templates.insert(key, template.clone());

        Ok(template)
    }
}
