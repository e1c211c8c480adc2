//! Shared fixtures for the model tests.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rstest::fixture;

use crate::config::Settings;
use crate::db::Write;
use crate::db::model::collection::{Collection, License, NewCollection};
use crate::db::model::sample::{MarkupLanguage, NewSample};
use crate::db::model::user::{NewUser, Salutation, User};
use crate::db::store::Database;
use crate::security::Role;
use crate::util::{Clock, ManualClock};

const N_USERS: usize = 3;
const N_COLLECTIONS: usize = 2;

/// A seeded database on a manual clock:
/// - three users `user{i}@example.com` / `password{i}`, first address
///   verified;
/// - two collections created by user 0 (their owner), with user 1 as editor
///   and user 2 holding no role.
pub(crate) struct TestDb {
    pub db: Database,
    pub clock: Arc<ManualClock>,
    pub users: Vec<User>,
    pub user_emails: Vec<String>,
    pub collections: Vec<Collection>,
}

pub(crate) fn new_user(email: &str) -> NewUser {
    NewUser {
        salutation: Salutation::Dr,
        given_name: "given".to_string(),
        surname: "sur".to_string(),
        organization: String::new(),
        password: "letmein1".to_string(),
        email: email.to_string(),
        timezone: "UTC".to_string(),
        limit_id: "academic".to_string(),
    }
}

pub(crate) fn new_sample(db: &TestDb, description: &str) -> NewSample {
    NewSample {
        collection_id: db.collections[0].id(),
        created_by: db.users[0].id(),
        description: description.to_string(),
        location: String::new(),
        notes: String::new(),
        notes_markup: MarkupLanguage::Text,
        codes: std::collections::BTreeMap::new(),
    }
}

#[fixture]
pub(crate) fn db() -> TestDb {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ));
    let mut db = Database::new(Settings::default(), clock.clone() as Arc<dyn Clock>);

    let mut users = Vec::with_capacity(N_USERS);
    let mut user_emails = Vec::with_capacity(N_USERS);

    for i in 0..N_USERS {
        let email = format!("user{i}@example.com");

        let user = db
            .transaction(|txn| {
                let user = NewUser {
                    salutation: Salutation::Dr,
                    given_name: format!("given{i}"),
                    surname: format!("sur{i}"),
                    organization: String::new(),
                    password: format!("password{i}"),
                    email: email.clone(),
                    timezone: "UTC".to_string(),
                    limit_id: "academic".to_string(),
                }
                .write(txn)?;

                mark_verified(txn, &email);

                Ok(user)
            })
            .expect("seeding users cannot fail");

        users.push(user);
        user_emails.push(email);
    }

    let mut collections = Vec::with_capacity(N_COLLECTIONS);

    for i in 0..N_COLLECTIONS {
        let owner = users[0].id();
        let editor = users[1].id();

        let collection = db
            .transaction(|txn| {
                let collection = NewCollection {
                    name: format!("Collection {i}"),
                    owner: users[0].full_name(),
                    license: License::NotSpecified,
                    created_by: owner,
                }
                .write(txn)?;

                txn.set_role(editor, collection.id(), Role::Editor)?;

                Ok(collection)
            })
            .expect("seeding collections cannot fail");

        collections.push(collection);
    }

    TestDb {
        db,
        clock,
        users,
        user_emails,
        collections,
    }
}

fn mark_verified(txn: &mut crate::db::store::Transaction, email: &str) {
    let now = txn.now();

    if let Some(address) = txn.tables.email_addresses.get_mut(email) {
        address.mark_verified(now);
    }
}
