//! The verification/reset ledger: short-lived, single-use, rate-limited
//! codes proving control of an email address or account.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::IssuePolicy;
use crate::db::Write;
use crate::db::error::{Error, Result};
use crate::db::model::user::{EmailAddress, User};
use crate::db::store::Transaction;
use crate::mail::{Mailer, password_reset_message, verification_message};
use crate::util::random_token;

#[derive(Debug, Clone, Serialize)]
pub struct EmailVerification {
    pub(crate) token: String,
    pub(crate) created: DateTime<Utc>,
    pub(crate) expiry: DateTime<Utc>,
    pub(crate) email: String,
}

impl EmailVerification {
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    #[must_use]
    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordReset {
    pub(crate) token: String,
    pub(crate) created: DateTime<Utc>,
    pub(crate) expiry: DateTime<Utc>,
    pub(crate) user_id: Uuid,
}

impl PasswordReset {
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    #[must_use]
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }
}

/// The two issuance preconditions, checked inside the caller's transaction so
/// the check and the insert commit atomically.
fn check_issue(
    policy: IssuePolicy,
    outstanding: impl Iterator<Item = (DateTime<Utc>, DateTime<Utc>)>,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut newest: Option<DateTime<Utc>> = None;
    let mut unexpired = 0;

    for (created, expiry) in outstanding {
        if newest.is_none_or(|n| created > n) {
            newest = Some(created);
        }
        if expiry > now {
            unexpired += 1;
        }
    }

    if let Some(created) = newest {
        let age = (now - created).num_seconds();
        if age < policy.interval_secs {
            return Err(Error::TooFast {
                retry_after_secs: policy.interval_secs - age,
            });
        }
    }

    if unexpired >= policy.limit {
        return Err(Error::TooMany {
            limit: policy.limit,
        });
    }

    Ok(())
}

pub struct RequestEmailVerification {
    pub email: String,
}

impl Write for RequestEmailVerification {
    type Returns = EmailVerification;

    fn write(self, txn: &mut Transaction) -> Result<Self::Returns> {
        let Self { email } = self;

        if !txn.tables.email_addresses.contains_key(&email) {
            return Err(Error::reference_not_found(
                "email_verification",
                "email_address",
                &email,
            ));
        }

        let policy = txn.settings().verification;
        let now = txn.now();

        check_issue(
            policy,
            txn.tables
                .email_verifications
                .values()
                .filter(|v| v.email == email)
                .map(|v| (v.created, v.expiry)),
            now,
        )?;

        let record = EmailVerification {
            token: random_token(),
            created: now,
            expiry: now + Duration::seconds(policy.timeout_secs),
            email,
        };
        txn.tables
            .email_verifications
            .insert(record.token.clone(), record.clone());

        tracing::info!(email = record.email, "issued email verification code");

        Ok(record)
    }
}

pub struct RequestPasswordReset {
    pub user_id: Uuid,
}

impl Write for RequestPasswordReset {
    type Returns = PasswordReset;

    fn write(self, txn: &mut Transaction) -> Result<Self::Returns> {
        let Self { user_id } = self;

        if !txn.tables.users.contains_key(&user_id) {
            return Err(Error::reference_not_found(
                "password_reset",
                "user",
                user_id.to_string(),
            ));
        }

        let policy = txn.settings().password_reset;
        let now = txn.now();

        check_issue(
            policy,
            txn.tables
                .password_resets
                .values()
                .filter(|r| r.user_id == user_id)
                .map(|r| (r.created, r.expiry)),
            now,
        )?;

        let record = PasswordReset {
            token: random_token(),
            created: now,
            expiry: now + Duration::seconds(policy.timeout_secs),
            user_id,
        };
        txn.tables
            .password_resets
            .insert(record.token.clone(), record.clone());

        tracing::info!(user = %user_id, "issued password reset code");

        Ok(record)
    }
}

/// Marks the address verified and deletes every outstanding code for it, so
/// a stale sibling can never be replayed after a successful redemption.
///
/// # Errors
/// [`Error::RecordNotFound`] for an unknown or already-consumed token;
/// [`Error::TokenExpired`] for a known token past its expiry.
pub fn redeem_email_verification(txn: &mut Transaction, token: &str) -> Result<EmailAddress> {
    let record = txn
        .tables
        .email_verifications
        .get(token)
        .cloned()
        .ok_or(Error::RecordNotFound)?;

    let now = txn.now();
    if now > record.expiry {
        return Err(Error::TokenExpired);
    }

    let verified = {
        let address = txn
            .tables
            .email_addresses
            .get_mut(&record.email)
            .ok_or(Error::RecordNotFound)?;
        address.mark_verified(now);
        address.clone()
    };

    txn.tables
        .email_verifications
        .retain(|_, v| v.email != record.email);

    tracing::info!(email = record.email, "email address verified");

    Ok(verified)
}

/// Sets the user's new password and deletes every outstanding reset for
/// them.
///
/// # Errors
/// [`Error::RecordNotFound`] and [`Error::TokenExpired`] as for
/// [`redeem_email_verification`]; [`Error::InvalidField`] when the new
/// password fails the password rule.
pub fn redeem_password_reset(
    txn: &mut Transaction,
    token: &str,
    new_password: &str,
) -> Result<User> {
    let record = txn
        .tables
        .password_resets
        .get(token)
        .cloned()
        .ok_or(Error::RecordNotFound)?;

    let now = txn.now();
    if now > record.expiry {
        return Err(Error::TokenExpired);
    }

    let user = {
        let user = txn
            .tables
            .users
            .get_mut(&record.user_id)
            .ok_or(Error::RecordNotFound)?;
        user.set_password(new_password, now)?;
        user.clone()
    };

    txn.tables
        .password_resets
        .retain(|_, r| r.user_id != record.user_id);

    tracing::info!(user = %user.id(), "password reset");

    Ok(user)
}

/// Issues a verification code and hands the message to the mail
/// collaborator. The code appears in the body as a submittable string.
///
/// # Errors
/// Anything [`RequestEmailVerification`] returns, plus [`Error::Other`]
/// when the mailer refuses the message.
pub fn request_email_verification(
    txn: &mut Transaction,
    mailer: &mut dyn Mailer,
    email: &str,
) -> Result<EmailVerification> {
    let record = RequestEmailVerification {
        email: email.to_string(),
    }
    .write(txn)?;

    mailer
        .send(verification_message(email, &record.token, record.expiry))
        .map_err(Error::from_other_error)?;

    Ok(record)
}

/// # Errors
/// Anything [`RequestPasswordReset`] returns, plus [`Error::Other`] when
/// the mailer refuses the message.
pub fn request_password_reset(
    txn: &mut Transaction,
    mailer: &mut dyn Mailer,
    user_id: Uuid,
    email: &str,
) -> Result<PasswordReset> {
    let record = RequestPasswordReset { user_id }.write(txn)?;

    mailer
        .send(password_reset_message(email, &record.token, record.expiry))
        .map_err(Error::from_other_error)?;

    Ok(record)
}
