//! Sample attachments and the storage-quota accountant.
//!
//! Attachment content lives in the store as opaque bytes; rendering and
//! resizing belong to whatever implements [`Thumbnailer`]. Thumbnails are
//! only ever produced by the explicit [`ensure_thumbnail`] operation, so
//! reading an attachment never mutates anything.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use uuid::Uuid;

use crate::db::Write;
use crate::db::error::{Error, Result};
use crate::db::store::Transaction;
use crate::security::Role;

#[derive(Debug, Clone, Serialize)]
pub struct SampleAttachment {
    pub(crate) sample_id: Uuid,
    pub(crate) name: String,
    #[serde(skip)]
    pub(crate) content: Bytes,
    #[serde(skip)]
    pub(crate) thumbnail: Option<Bytes>,
    pub(crate) updated: DateTime<Utc>,
}

impl SampleAttachment {
    #[must_use]
    pub fn sample_id(&self) -> Uuid {
        self.sample_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    #[must_use]
    pub fn thumbnail(&self) -> Option<&Bytes> {
        self.thumbnail.as_ref()
    }

    #[must_use]
    pub fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    /// Content plus thumbnail, the figure the quota accountant charges.
    #[must_use]
    pub fn stored_bytes(&self) -> u64 {
        (self.content.len() + self.thumbnail.as_ref().map_or(0, Bytes::len)) as u64
    }
}

/// Thumbnail-production collaborator. Implementations decide per format
/// whether a thumbnail exists at all (`Ok(None)` for unrenderable content).
pub trait Thumbnailer {
    /// # Errors
    /// Whatever the implementation considers a rendering failure.
    fn thumbnail(&self, name: &str, content: &Bytes) -> anyhow::Result<Option<Bytes>>;
}

pub struct NewAttachment {
    pub sample_id: Uuid,
    pub name: String,
    pub content: Bytes,
}

impl Write for NewAttachment {
    type Returns = SampleAttachment;

    fn write(self, txn: &mut Transaction) -> Result<Self::Returns> {
        let Self {
            sample_id,
            name,
            content,
        } = self;

        if name.is_empty() || name.chars().count() > 200 {
            return Err(Error::invalid_field(
                "name",
                "must be between 1 and 200 characters",
            ));
        }

        if !txn.tables.samples.contains_key(&sample_id) {
            return Err(Error::reference_not_found(
                "attachment",
                "sample",
                sample_id.to_string(),
            ));
        }

        let key = (sample_id, name.clone());
        if txn.tables.attachments.contains_key(&key) {
            return Err(Error::duplicate("attachment", "name", &name));
        }

        let attachment = SampleAttachment {
            sample_id,
            name,
            content,
            thumbnail: None,
            updated: txn.now(),
        };
        txn.tables.attachments.insert(key, attachment.clone());

        tracing::info!(sample = %sample_id, name = attachment.name, "attachment added");

        Ok(attachment)
    }
}

/// Replaces the content of an existing attachment. The stale thumbnail is
/// dropped; the next [`ensure_thumbnail`] rebuilds it.
///
/// # Errors
/// [`Error::RecordNotFound`] for an unknown attachment.
pub fn replace_attachment(
    txn: &mut Transaction,
    sample_id: Uuid,
    name: &str,
    content: Bytes,
) -> Result<SampleAttachment> {
    let now = txn.now();

    let attachment = txn
        .tables
        .attachments
        .get_mut(&(sample_id, name.to_string()))
        .ok_or(Error::RecordNotFound)?;

    attachment.content = content;
    attachment.thumbnail = None;
    attachment.updated = now;

    Ok(attachment.clone())
}

/// Removes the attachment. If the owning sample's default attachment pointed
/// at it, the pointer is cleared too.
///
/// # Errors
/// [`Error::RecordNotFound`] for an unknown attachment.
pub fn remove_attachment(txn: &mut Transaction, sample_id: Uuid, name: &str) -> Result<()> {
    if txn
        .tables
        .attachments
        .remove(&(sample_id, name.to_string()))
        .is_none()
    {
        return Err(Error::RecordNotFound);
    }

    if let Some(sample) = txn.tables.samples.get_mut(&sample_id)
        && sample.default_attachment.as_deref() == Some(name)
    {
        sample.default_attachment = None;
    }

    Ok(())
}

/// Points the sample's display image at one of its attachments, or clears
/// the pointer with `None`.
///
/// # Errors
/// [`Error::RecordNotFound`] when the sample or the named attachment does
/// not exist.
pub fn set_default_attachment(
    txn: &mut Transaction,
    sample_id: Uuid,
    name: Option<&str>,
) -> Result<()> {
    if let Some(name) = name
        && !txn
            .tables
            .attachments
            .contains_key(&(sample_id, name.to_string()))
    {
        return Err(Error::RecordNotFound);
    }

    let sample = txn
        .tables
        .samples
        .get_mut(&sample_id)
        .ok_or(Error::RecordNotFound)?;
    sample.default_attachment = name.map(str::to_string);

    Ok(())
}

/// Produces the attachment's thumbnail through `thumbnailer` if one is not
/// already stored, and returns it. The only operation that writes
/// thumbnails.
///
/// # Errors
/// [`Error::RecordNotFound`] for an unknown attachment; [`Error::Other`]
/// when the collaborator fails.
pub fn ensure_thumbnail(
    txn: &mut Transaction,
    sample_id: Uuid,
    name: &str,
    thumbnailer: &dyn Thumbnailer,
) -> Result<Option<Bytes>> {
    let key = (sample_id, name.to_string());

    let content = {
        let attachment = txn.tables.attachments.get(&key).ok_or(Error::RecordNotFound)?;

        if attachment.thumbnail.is_some() {
            return Ok(attachment.thumbnail.clone());
        }

        attachment.content.clone()
    };

    let thumbnail = thumbnailer
        .thumbnail(name, &content)
        .map_err(Error::from_other_error)?;

    if let Some(attachment) = txn.tables.attachments.get_mut(&key) {
        attachment.thumbnail.clone_from(&thumbnail);
    }

    Ok(thumbnail)
}

#[must_use]
pub fn attachments_of(txn: &Transaction, sample_id: Uuid) -> Vec<SampleAttachment> {
    txn.tables
        .attachments
        .values()
        .filter(|a| a.sample_id == sample_id)
        .cloned()
        .collect()
}

/// What a user has stored versus what their tier allows. Enforcement is the
/// caller's decision; the accountant only reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub used: u64,
    pub limit: u64,
}

impl StorageUsage {
    #[must_use]
    pub fn over_quota(&self) -> bool {
        self.used > self.limit
    }
}

/// Recomputes the user's storage figure from scratch: the stored bytes of
/// every attachment of every sample in every collection where the user is
/// editor or above. No cached counters to drift.
///
/// # Errors
/// [`Error::RecordNotFound`] for an unknown user.
pub fn storage_usage(txn: &Transaction, user_id: Uuid) -> Result<StorageUsage> {
    let user = txn.tables.users.get(&user_id).ok_or(Error::RecordNotFound)?;

    let limit = txn
        .tables
        .user_limits
        .get(&user.limit_id)
        .ok_or_else(|| Error::reference_not_found("user", "user_limit", &user.limit_id))?;

    let charged_collections: Vec<Uuid> = txn
        .collections_of(user_id)
        .into_iter()
        .filter(|(_, role)| *role >= Role::Editor)
        .map(|(collection, _)| collection)
        .collect();

    let used = charged_collections
        .iter()
        .flat_map(|collection| {
            txn.tables
                .samples
                .values()
                .filter(|s| s.collection_id == *collection)
        })
        .flat_map(|sample| attachments_of(txn, sample.id))
        .map(|attachment| attachment.stored_bytes())
        .sum1()
        .unwrap_or(0);

    Ok(StorageUsage {
        used,
        limit: limit.storage_limit,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::db::test_util::{TestDb, db, new_sample};

    struct FixedThumbnailer(Option<Bytes>);

    impl Thumbnailer for FixedThumbnailer {
        fn thumbnail(&self, _name: &str, _content: &Bytes) -> anyhow::Result<Option<Bytes>> {
            Ok(self.0.clone())
        }
    }

    fn sample_with_attachment(db: &mut TestDb, name: &str, bytes: &[u8]) -> Uuid {
        let input = new_sample(db, "Attached sample");
        let sample = db.db.transaction(|txn| input.write(txn)).unwrap();

        db.db
            .transaction(|txn| {
                NewAttachment {
                    sample_id: sample.id(),
                    name: name.to_string(),
                    content: Bytes::copy_from_slice(bytes),
                }
                .write(txn)
            })
            .unwrap();

        sample.id()
    }

    #[rstest]
    fn duplicate_names_are_rejected_per_sample(mut db: TestDb) {
        let sample = sample_with_attachment(&mut db, "photo.jpg", b"abc");

        let err = db
            .db
            .transaction(|txn| {
                NewAttachment {
                    sample_id: sample,
                    name: "photo.jpg".to_string(),
                    content: Bytes::from_static(b"xyz"),
                }
                .write(txn)
            })
            .unwrap_err();

        assert_eq!(err, Error::duplicate("attachment", "name", "photo.jpg"));
    }

    #[rstest]
    fn removal_clears_a_matching_default_pointer(mut db: TestDb) {
        let sample = sample_with_attachment(&mut db, "photo.jpg", b"abc");

        db.db
            .transaction(|txn| set_default_attachment(txn, sample, Some("photo.jpg")))
            .unwrap();
        db.db
            .transaction(|txn| remove_attachment(txn, sample, "photo.jpg"))
            .unwrap();

        db.db.read(|txn| {
            assert_eq!(
                txn.tables.samples[&sample].default_attachment(),
                None
            );
        });
    }

    #[rstest]
    fn thumbnails_are_produced_once_and_cached(mut db: TestDb) {
        let sample = sample_with_attachment(&mut db, "photo.jpg", b"abc");
        let thumbnailer = FixedThumbnailer(Some(Bytes::from_static(b"tiny")));

        let first = db
            .db
            .transaction(|txn| ensure_thumbnail(txn, sample, "photo.jpg", &thumbnailer))
            .unwrap();
        assert_eq!(first, Some(Bytes::from_static(b"tiny")));

        // A second call returns the stored copy without consulting the
        // collaborator
        let never = FixedThumbnailer(None);
        let second = db
            .db
            .transaction(|txn| ensure_thumbnail(txn, sample, "photo.jpg", &never))
            .unwrap();
        assert_eq!(second, Some(Bytes::from_static(b"tiny")));
    }

    #[rstest]
    fn replacement_drops_the_stale_thumbnail(mut db: TestDb) {
        let sample = sample_with_attachment(&mut db, "photo.jpg", b"abc");
        let thumbnailer = FixedThumbnailer(Some(Bytes::from_static(b"tiny")));

        db.db
            .transaction(|txn| ensure_thumbnail(txn, sample, "photo.jpg", &thumbnailer))
            .unwrap();

        let replaced = db
            .db
            .transaction(|txn| {
                replace_attachment(txn, sample, "photo.jpg", Bytes::from_static(b"new content"))
            })
            .unwrap();

        assert_eq!(replaced.thumbnail(), None);
    }

    #[rstest]
    fn usage_charges_editor_collections_including_thumbnails(mut db: TestDb) {
        let owner = db.users[0].id();
        let sample = sample_with_attachment(&mut db, "photo.jpg", b"0123456789");
        let thumbnailer = FixedThumbnailer(Some(Bytes::from_static(b"tiny")));

        db.db
            .transaction(|txn| ensure_thumbnail(txn, sample, "photo.jpg", &thumbnailer))
            .unwrap();

        let usage = db.db.read(|txn| storage_usage(txn, owner)).unwrap();
        assert_eq!(usage.used, 14);
        assert_eq!(usage.limit, 100 * 1_048_576);
        assert!(!usage.over_quota());

        // A viewer of the same collection is charged nothing
        let viewer = db.users[2].id();
        let collection = db.collections[0].id();
        db.db
            .transaction(|txn| txn.set_role(viewer, collection, crate::security::Role::Viewer))
            .unwrap();

        let usage = db.db.read(|txn| storage_usage(txn, viewer)).unwrap();
        assert_eq!(usage.used, 0);
    }
}
