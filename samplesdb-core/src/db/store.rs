//! The storage handle every operation takes.
//!
//! The surrounding application treats persistence as a transactional
//! relational store; this module is that store's in-process image. A
//! [`Database`] owns the committed tables, and [`Database::transaction`]
//! hands callers a [`Transaction`] over a snapshot: returning `Ok` swaps the
//! snapshot in as the new committed state, returning `Err` discards it. Rate
//! limits, lineage mutations, and role assignments therefore commit entirely
//! or not at all.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use valuable::Valuable;

use crate::config::Settings;
use crate::db::error::Result;
use crate::db::model::attachment::SampleAttachment;
use crate::db::model::collection::Collection;
use crate::db::model::sample::Sample;
use crate::db::model::user::{EmailAddress, Group, LabelTemplate, User, UserLimit};
use crate::db::model::verification::{EmailVerification, PasswordReset};
use crate::security::Role;
use crate::util::{Clock, SystemClock};

/// The relational image. One field per table; key types mirror the unique
/// constraints of the schema.
#[derive(Debug, Default, Clone)]
pub(crate) struct Tables {
    pub users: BTreeMap<Uuid, User>,
    /// Keyed by address string; an address belongs to exactly one user.
    pub email_addresses: BTreeMap<String, EmailAddress>,
    /// Keyed by token.
    pub email_verifications: BTreeMap<String, EmailVerification>,
    /// Keyed by token.
    pub password_resets: BTreeMap<String, PasswordReset>,
    pub user_limits: BTreeMap<String, UserLimit>,
    pub groups: BTreeMap<String, Group>,
    pub user_groups: BTreeSet<(Uuid, String)>,
    pub label_templates: BTreeMap<(Uuid, String), LabelTemplate>,
    pub collections: BTreeMap<Uuid, Collection>,
    /// `(user, collection) -> role`; the map key is the unique constraint.
    pub memberships: BTreeMap<(Uuid, Uuid), Role>,
    pub samples: BTreeMap<Uuid, Sample>,
    /// Lineage edges `(sample, parent)`; an explicit adjacency list, not an
    /// object graph.
    pub sample_origins: BTreeSet<(Uuid, Uuid)>,
    /// Keyed by `(sample, name)`.
    pub attachments: BTreeMap<(Uuid, String), SampleAttachment>,
}

pub struct Database {
    tables: Tables,
    settings: Settings,
    clock: Arc<dyn Clock>,
}

impl Database {
    #[must_use]
    pub fn new(settings: Settings, clock: Arc<dyn Clock>) -> Self {
        let mut db = Self {
            tables: Tables::default(),
            settings,
            clock,
        };
        db.seed_reference_data();

        db
    }

    /// Reference data every deployment starts with: the two limit tiers and
    /// the administrators group.
    fn seed_reference_data(&mut self) {
        let now = self.clock.now();

        for limit in [UserLimit::academic(), UserLimit::unlimited()] {
            self.tables.user_limits.insert(limit.id.clone(), limit);
        }

        self.tables.groups.insert(
            Group::ADMINS.to_string(),
            Group {
                id: Group::ADMINS.to_string(),
                description: "Group of administrators".to_string(),
                created: now,
            },
        );
    }

    /// Runs `f` inside a transaction. All mutations made through the
    /// [`Transaction`] become visible only when `f` returns `Ok`; any error
    /// rolls the whole unit of work back.
    ///
    /// # Errors
    /// Propagates whatever `f` returns.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Transaction) -> Result<T>) -> Result<T> {
        let mut txn = Transaction {
            tables: self.tables.clone(),
            settings: self.settings,
            clock: Arc::clone(&self.clock),
        };

        match f(&mut txn) {
            Ok(value) => {
                self.tables = txn.tables;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(error = err.as_value(), "transaction rolled back");
                Err(err)
            }
        }
    }

    /// Runs `f` against a read snapshot. Mutations made through the handle
    /// are discarded.
    pub fn read<T>(&self, f: impl FnOnce(&Transaction) -> T) -> T {
        let txn = Transaction {
            tables: self.tables.clone(),
            settings: self.settings,
            clock: Arc::clone(&self.clock),
        };

        f(&txn)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new(Settings::default(), Arc::new(SystemClock))
    }
}

/// One unit of work. Operations take `&mut Transaction` the way a SQL-backed
/// implementation would take a connection with an open transaction.
pub struct Transaction {
    pub(crate) tables: Tables,
    settings: Settings,
    clock: Arc<dyn Clock>,
}

impl Transaction {
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::error::Error;

    #[test]
    fn commit_makes_writes_visible() {
        let mut db = Database::default();
        let id = Uuid::now_v7();

        db.transaction(|txn| {
            txn.tables.user_groups.insert((id, "admins".to_string()));
            Ok(())
        })
        .unwrap();

        assert!(db.read(|txn| txn.tables.user_groups.contains(&(id, "admins".to_string()))));
    }

    #[test]
    fn error_rolls_back_every_write() {
        let mut db = Database::default();
        let id = Uuid::now_v7();

        let result: Result<()> = db.transaction(|txn| {
            txn.tables.user_groups.insert((id, "admins".to_string()));
            Err(Error::RecordNotFound)
        });

        assert_eq!(result, Err(Error::RecordNotFound));
        assert!(!db.read(|txn| txn.tables.user_groups.contains(&(id, "admins".to_string()))));
    }

    #[test]
    fn reference_data_is_seeded() {
        let db = Database::default();

        db.read(|txn| {
            assert!(txn.tables.user_limits.contains_key("academic"));
            assert!(txn.tables.user_limits.contains_key("unlimited"));
            assert!(txn.tables.groups.contains_key("admins"));
        });
    }
}
