//! Roles, permissions, and the access-context resolver.
//!
//! Authorization is additive: an access decision unions the permissions of
//! every principal the caller holds against an ordered allow-list. There are
//! no deny entries; absence of a grant is the denial.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::error::{Error, Result};
use crate::db::model::collection::Collection;
use crate::db::model::user::Group;
use crate::db::store::Transaction;
use crate::db::FetchById;

/// Per-collection role. The derived order is the permission chain:
/// every role's permissions strictly contain its predecessor's.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::VariantArray,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Viewer,
    Auditor,
    Editor,
    Owner,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::VariantArray,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Permission {
    CreateUser,
    DestroyUser,
    EditUser,
    CreateGroup,
    DestroyGroup,
    EditGroup,
    CreateLimit,
    DestroyLimit,
    EditLimit,
    CreateCollection,
    DestroyCollection,
    RenameCollection,
    EditMembers,
    EditCollection,
    AuditCollection,
    ViewCollection,
    ManageCollections,
    ManageAccount,
}

use Permission::{
    AuditCollection, CreateCollection, CreateGroup, CreateLimit, CreateUser, DestroyCollection,
    DestroyGroup, DestroyLimit, DestroyUser, EditCollection, EditGroup, EditLimit, EditMembers,
    EditUser, ManageAccount, ManageCollections, RenameCollection, ViewCollection,
};

// Each set extends the previous one; only the increments differ.
pub const AUTHENTICATED_PERMISSIONS: &[Permission] =
    &[ManageCollections, ManageAccount, CreateCollection];

pub const VIEWER_PERMISSIONS: &[Permission] =
    &[ManageCollections, ManageAccount, CreateCollection, ViewCollection];

pub const AUDITOR_PERMISSIONS: &[Permission] = &[
    ManageCollections,
    ManageAccount,
    CreateCollection,
    ViewCollection,
    AuditCollection,
];

pub const EDITOR_PERMISSIONS: &[Permission] = &[
    ManageCollections,
    ManageAccount,
    CreateCollection,
    ViewCollection,
    AuditCollection,
    EditCollection,
];

pub const OWNER_PERMISSIONS: &[Permission] = &[
    ManageCollections,
    ManageAccount,
    CreateCollection,
    ViewCollection,
    AuditCollection,
    EditCollection,
    DestroyCollection,
    RenameCollection,
    EditMembers,
];

pub const ADMIN_PERMISSIONS: &[Permission] = &[
    ManageCollections,
    ManageAccount,
    CreateCollection,
    ViewCollection,
    AuditCollection,
    EditCollection,
    DestroyCollection,
    RenameCollection,
    EditMembers,
    CreateUser,
    DestroyUser,
    EditUser,
    CreateGroup,
    DestroyGroup,
    EditGroup,
    CreateLimit,
    DestroyLimit,
    EditLimit,
];

/// Something a caller can act as. A single caller usually holds several.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Principal {
    Authenticated,
    Role(Role),
    Group(String),
}

/// Ordered allow-list mapping principals to permission sets.
pub struct Acl {
    entries: Vec<(Principal, &'static [Permission])>,
}

impl Acl {
    /// The single site-wide ACL every access decision consults.
    #[must_use]
    pub fn root() -> Self {
        Self {
            entries: vec![
                (Principal::Authenticated, AUTHENTICATED_PERMISSIONS),
                (Principal::Role(Role::Viewer), VIEWER_PERMISSIONS),
                (Principal::Role(Role::Auditor), AUDITOR_PERMISSIONS),
                (Principal::Role(Role::Editor), EDITOR_PERMISSIONS),
                (Principal::Role(Role::Owner), OWNER_PERMISSIONS),
                (
                    Principal::Group(Group::ADMINS.to_string()),
                    ADMIN_PERMISSIONS,
                ),
            ],
        }
    }

    #[must_use]
    pub fn allows(&self, principals: &[Principal], permission: Permission) -> bool {
        self.entries
            .iter()
            .any(|(principal, permissions)| {
                principals.contains(principal) && permissions.contains(&permission)
            })
    }

    /// Union of everything the given principals are granted.
    #[must_use]
    pub fn granted(&self, principals: &[Principal]) -> BTreeSet<Permission> {
        self.entries
            .iter()
            .filter(|(principal, _)| principals.contains(principal))
            .flat_map(|(_, permissions)| permissions.iter().copied())
            .collect()
    }
}

impl Default for Acl {
    fn default() -> Self {
        Self::root()
    }
}

/// What an operation is aimed at. Samples resolve to their owning
/// collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Root,
    Collection(Uuid),
    Sample(Uuid),
}

/// The resolved scope of one access decision.
#[derive(Debug)]
pub struct AccessContext {
    collection: Option<Collection>,
}

impl AccessContext {
    /// Resolves a target to its context. An unknown collection or sample id
    /// is reported as [`Error::Forbidden`], not as missing, so probing for
    /// ids reveals nothing.
    ///
    /// # Errors
    /// [`Error::Forbidden`] for an unknown collection or sample id.
    pub fn resolve(txn: &Transaction, target: Target) -> Result<Self> {
        let collection = match target {
            Target::Root => None,
            Target::Collection(id) => {
                Some(Collection::fetch_by_id(&id, txn).map_err(|_| Error::Forbidden)?)
            }
            Target::Sample(id) => {
                let sample = txn.tables.samples.get(&id).ok_or(Error::Forbidden)?;

                Some(
                    Collection::fetch_by_id(&sample.collection_id, txn)
                        .map_err(|_| Error::Forbidden)?,
                )
            }
        };

        Ok(Self { collection })
    }

    #[must_use]
    pub fn collection(&self) -> Option<&Collection> {
        self.collection.as_ref()
    }

    /// The principals `user` holds in this context: the authenticated
    /// baseline, their groups, and their role in the resolved collection.
    /// Anonymous callers hold none.
    #[must_use]
    pub fn principals(&self, txn: &Transaction, user: Option<Uuid>) -> Vec<Principal> {
        let Some(user) = user else {
            return Vec::new();
        };

        let mut principals = vec![Principal::Authenticated];
        principals.extend(txn.groups_of(user).into_iter().map(Principal::Group));

        if let Some(collection) = &self.collection
            && let Some(role) = txn.role_of(user, collection.id())
        {
            principals.push(Principal::Role(role));
        }

        principals
    }

    /// Everything the caller may do here. An open license adds
    /// `ViewCollection` on top of whatever the ACL grants, for any caller
    /// including anonymous ones.
    #[must_use]
    pub fn effective_permissions(
        &self,
        txn: &Transaction,
        user: Option<Uuid>,
    ) -> BTreeSet<Permission> {
        let mut permissions = Acl::root().granted(&self.principals(txn, user));

        if let Some(collection) = &self.collection
            && collection.license().is_open()
        {
            permissions.insert(ViewCollection);
        }

        permissions
    }
}

/// Resolves `target` and demands `permission`, returning the context for
/// further use.
///
/// # Errors
/// [`Error::Forbidden`] when the target is unknown or the permission is not
/// held.
pub fn authorize(
    txn: &Transaction,
    user: Option<Uuid>,
    target: Target,
    permission: Permission,
) -> Result<AccessContext> {
    let context = AccessContext::resolve(txn, target)?;

    if !context
        .effective_permissions(txn, user)
        .contains(&permission)
    {
        return Err(Error::Forbidden);
    }

    Ok(context)
}
