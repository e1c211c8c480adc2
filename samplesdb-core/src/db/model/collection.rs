use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::error::{Error, Result};
use crate::db::store::Transaction;
use crate::db::{FetchById, Write};
use crate::security::Role;
use crate::validators;

/// Dataset license, from the opendefinition.org catalog. `NotSpecified` is
/// the closed default.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum License {
    NotSpecified,
    CcBy,
    CcBySa,
    CcZero,
    OdcBy,
    OdcOdbl,
    OdcPddl,
    Gpl3,
    Mit,
    Apache2,
}

impl License {
    /// OKD- or OSI-compliant licenses make a collection's contents publicly
    /// viewable.
    #[must_use]
    pub fn is_open(self) -> bool {
        !matches!(self, Self::NotSpecified)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    /// Display name of the owning individual or institution, not a user
    /// reference.
    pub(crate) owner: String,
    pub(crate) license: License,
    pub(crate) created: DateTime<Utc>,
}

impl Collection {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn license(&self) -> License {
        self.license
    }

    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

impl FetchById for Collection {
    type Id = Uuid;

    fn fetch_by_id(id: &Self::Id, txn: &Transaction) -> Result<Self> {
        txn.tables
            .collections
            .get(id)
            .cloned()
            .ok_or(Error::RecordNotFound)
    }
}

#[derive(Clone, Deserialize, Validate)]
#[garde(allow_unvalidated)]
pub struct NewCollection {
    #[garde(custom(validators::garde_collection_name))]
    pub name: String,
    #[garde(custom(validators::garde_collection_owner))]
    pub owner: String,
    #[serde(default = "default_license")]
    pub license: License,
    /// The creating user, who becomes the collection's first `Owner`.
    pub created_by: Uuid,
}

fn default_license() -> License {
    License::NotSpecified
}

impl Write for NewCollection {
    type Returns = Collection;

    fn write(self, txn: &mut Transaction) -> Result<Self::Returns> {
        self.validate()?;

        let Self {
            name,
            owner,
            license,
            created_by,
        } = self;

        if !txn.tables.users.contains_key(&created_by) {
            return Err(Error::reference_not_found(
                "collection",
                "user",
                created_by.to_string(),
            ));
        }

        let collection = Collection {
            id: Uuid::now_v7(),
            name,
            owner,
            license,
            created: txn.now(),
        };
        txn.tables.collections.insert(collection.id, collection.clone());
        txn.tables
            .memberships
            .insert((created_by, collection.id), Role::Owner);

        tracing::info!(collection = %collection.id, "collection created");

        Ok(collection)
    }
}

#[derive(Clone, Deserialize, Validate)]
#[garde(allow_unvalidated)]
pub struct CollectionUpdate {
    pub id: Uuid,
    #[garde(custom(validators::garde_opt_collection_name))]
    pub name: Option<String>,
    #[garde(custom(validators::garde_opt_collection_owner))]
    pub owner: Option<String>,
    pub license: Option<License>,
}

impl Write for CollectionUpdate {
    type Returns = Collection;

    fn write(self, txn: &mut Transaction) -> Result<Self::Returns> {
        self.validate()?;

        let Self {
            id,
            name,
            owner,
            license,
        } = self;

        let collection = txn
            .tables
            .collections
            .get_mut(&id)
            .ok_or(Error::RecordNotFound)?;

        if let Some(name) = name {
            collection.name = name;
        }
        if let Some(owner) = owner {
            collection.owner = owner;
        }
        if let Some(license) = license {
            collection.license = license;
        }

        Ok(collection.clone())
    }
}

impl Transaction {
    /// Assigns `role` to the `(user, collection)` pair, overwriting any
    /// previous assignment. A user holds at most one role per collection.
    ///
    /// # Errors
    /// [`Error::ReferenceNotFound`] when the user or collection does not
    /// exist.
    pub fn set_role(&mut self, user_id: Uuid, collection_id: Uuid, role: Role) -> Result<()> {
        if !self.tables.users.contains_key(&user_id) {
            return Err(Error::reference_not_found(
                "membership",
                "user",
                user_id.to_string(),
            ));
        }

        if !self.tables.collections.contains_key(&collection_id) {
            return Err(Error::reference_not_found(
                "membership",
                "collection",
                collection_id.to_string(),
            ));
        }

        self.tables.memberships.insert((user_id, collection_id), role);

        tracing::info!(
            user = %user_id,
            collection = %collection_id,
            role = <&str>::from(role),
            "role assigned",
        );

        Ok(())
    }

    /// `None` means no membership at all. There is no implicit fallback role.
    #[must_use]
    pub fn role_of(&self, user_id: Uuid, collection_id: Uuid) -> Option<Role> {
        self.tables
            .memberships
            .get(&(user_id, collection_id))
            .copied()
    }

    /// # Errors
    /// [`Error::RecordNotFound`] when the pair has no assignment.
    pub fn remove_role(&mut self, user_id: Uuid, collection_id: Uuid) -> Result<()> {
        if self
            .tables
            .memberships
            .remove(&(user_id, collection_id))
            .is_none()
        {
            return Err(Error::RecordNotFound);
        }

        Ok(())
    }

    #[must_use]
    pub fn members_of(&self, collection_id: Uuid) -> Vec<(Uuid, Role)> {
        self.tables
            .memberships
            .iter()
            .filter(|((_, c), _)| *c == collection_id)
            .map(|((u, _), role)| (*u, *role))
            .collect()
    }

    #[must_use]
    pub fn collections_of(&self, user_id: Uuid) -> Vec<(Uuid, Role)> {
        self.tables
            .memberships
            .iter()
            .filter(|((u, _), _)| *u == user_id)
            .map(|((_, c), role)| (*c, *role))
            .collect()
    }
}
