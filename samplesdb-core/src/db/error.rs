use serde::Serialize;
use uuid::Uuid;
use valuable::Valuable;

#[derive(thiserror::Error, Debug, Serialize, Valuable, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Error {
    /// Malformed input rejected before anything is persisted.
    #[error("invalid {field}: {message}")]
    InvalidField { field: String, message: String },
    /// A code was requested for this subject too recently. Recoverable;
    /// the user retries after the given delay.
    #[error("a code was requested for this subject less than {retry_after_secs} seconds ago")]
    TooFast { retry_after_secs: i64 },
    /// Too many unexpired codes are outstanding for this subject.
    #[error("too many active codes ({limit}) currently exist for this subject")]
    TooMany { limit: usize },
    /// The code exists but its expiry has passed. The user must request a
    /// new one.
    #[error("code has expired")]
    TokenExpired,
    #[error("record not found")]
    RecordNotFound,
    /// Access-control denial, or resolution of a collection/sample the
    /// caller may not even learn exists.
    #[error("forbidden")]
    Forbidden,
    /// Destroying a destroyed sample is a logic or race bug in the caller,
    /// not a user error. Fatal to the request, never retried.
    #[error("sample {sample} is already destroyed")]
    AlreadyDestroyed {
        #[valuable(skip)]
        sample: Uuid,
    },
    /// A lineage edge would make a sample its own ancestor.
    #[error("sample {sample} cannot be its own ancestor")]
    LineageCycle {
        #[valuable(skip)]
        sample: Uuid,
    },
    #[error("{entity} with {} = {} already exists", field.clone().unwrap_or_default(), value.clone().unwrap_or_default())]
    DuplicateRecord {
        entity: String,
        field: Option<String>,
        value: Option<String>,
    },
    #[error("{entity} references a {referenced_entity} with value {} that does not exist", value.clone().unwrap_or_default())]
    ReferenceNotFound {
        entity: String,
        referenced_entity: String,
        value: Option<String>,
    },
    #[error("{message}")]
    Other { message: String },
}

impl Error {
    pub(crate) fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn duplicate(entity: &str, field: &str, value: impl Into<String>) -> Self {
        Self::DuplicateRecord {
            entity: entity.to_string(),
            field: Some(field.to_string()),
            value: Some(value.into()),
        }
    }

    pub(crate) fn reference_not_found(
        entity: &str,
        referenced_entity: &str,
        value: impl Into<String>,
    ) -> Self {
        Self::ReferenceNotFound {
            entity: entity.to_string(),
            referenced_entity: referenced_entity.to_string(),
            value: Some(value.into()),
        }
    }

    pub(crate) fn from_other_error(err: impl std::fmt::Debug) -> Self {
        Self::Other {
            message: format!("{err:?}"),
        }
    }
}

impl From<garde::Report> for Error {
    fn from(report: garde::Report) -> Self {
        let (field, message) = report
            .iter()
            .next()
            .map(|(path, error)| (path.to_string(), error.to_string()))
            .unwrap_or_default();

        Self::InvalidField { field, message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
