//! Samples and their lineage.
//!
//! Destruction is a terminal state transition, never a deletion: a destroyed
//! sample keeps its log, codes, and lineage edges forever. Lineage itself is
//! an explicit edge list `(sample, parent)` in [`Tables::sample_origins`];
//! combine and split are the only operations that produce edges in normal
//! use, but [`add_origin`] accepts hand-recorded provenance and refuses
//! anything that would make a sample its own ancestor.
//!
//! [`Tables::sample_origins`]: crate::db::store::Tables

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use garde::Validate;
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    /// Written once, by sample creation.
    Create,
    /// Written once, by destruction. The message is the reason.
    Destroy,
    /// An auditor's dated observation.
    Audit,
    /// Engine-recorded state change (splits, combinations).
    Change,
    /// Free-form user note.
    User,
}

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
pub enum MarkupLanguage {
    Text,
    Html,
    Md,
    Rst,
    Creole,
    Textile,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleLogEntry {
    pub(crate) created: DateTime<Utc>,
    /// `None` once the authoring account has been deleted.
    pub(crate) creator: Option<Uuid>,
    pub(crate) kind: EventKind,
    pub(crate) message: String,
}

impl SampleLogEntry {
    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    #[must_use]
    pub fn creator(&self) -> Option<Uuid> {
        self.creator
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    pub(crate) id: Uuid,
    pub(crate) collection_id: Uuid,
    pub(crate) description: String,
    pub(crate) created: DateTime<Utc>,
    pub(crate) destroyed: Option<DateTime<Utc>>,
    pub(crate) location: String,
    pub(crate) default_attachment: Option<String>,
    pub(crate) notes: String,
    pub(crate) notes_markup: MarkupLanguage,
    /// External identifiers (barcodes, freezer positions). Names are unique
    /// per sample by construction of the map.
    pub(crate) codes: BTreeMap<String, String>,
    /// Append-only, in creation order.
    pub(crate) log: Vec<SampleLogEntry>,
}

impl Sample {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn collection_id(&self) -> Uuid {
        self.collection_id
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    #[must_use]
    pub fn destroyed(&self) -> Option<DateTime<Utc>> {
        self.destroyed
    }

    #[must_use]
    pub fn is_existing(&self) -> bool {
        self.destroyed.is_none()
    }

    /// Human-readable form of the two-state lifecycle.
    #[must_use]
    pub fn status(&self) -> &'static str {
        if self.is_existing() { "Existing" } else { "Destroyed" }
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn default_attachment(&self) -> Option<&str> {
        self.default_attachment.as_deref()
    }

    #[must_use]
    pub fn notes(&self) -> &str {
        &self.notes
    }

    #[must_use]
    pub fn notes_markup(&self) -> MarkupLanguage {
        self.notes_markup
    }

    #[must_use]
    pub fn codes(&self) -> &BTreeMap<String, String> {
        &self.codes
    }

    #[must_use]
    pub fn log(&self) -> &[SampleLogEntry] {
        &self.log
    }
}

impl FetchById for Sample {
    type Id = Uuid;

    fn fetch_by_id(id: &Self::Id, txn: &Transaction) -> Result<Self> {
        txn.tables
            .samples
            .get(id)
            .cloned()
            .ok_or(Error::RecordNotFound)
    }
}

#[derive(Clone, Deserialize, Validate)]
#[garde(allow_unvalidated)]
pub struct NewSample {
    pub collection_id: Uuid,
    pub created_by: Uuid,
    #[garde(custom(validators::garde_sample_description))]
    pub description: String,
    #[garde(custom(validators::garde_sample_location))]
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "default_markup")]
    pub notes_markup: MarkupLanguage,
    #[garde(custom(validators::garde_codes))]
    #[serde(default)]
    pub codes: BTreeMap<String, String>,
}

fn default_markup() -> MarkupLanguage {
    MarkupLanguage::Text
}

impl Write for NewSample {
    type Returns = Sample;

    fn write(self, txn: &mut Transaction) -> Result<Self::Returns> {
        self.validate()?;

        let Self {
            collection_id,
            created_by,
            description,
            location,
            notes,
            notes_markup,
            codes,
        } = self;

        if !txn.tables.collections.contains_key(&collection_id) {
            return Err(Error::reference_not_found(
                "sample",
                "collection",
                collection_id.to_string(),
            ));
        }

        if !txn.tables.users.contains_key(&created_by) {
            return Err(Error::reference_not_found(
                "sample",
                "user",
                created_by.to_string(),
            ));
        }

        let now = txn.now();

        let sample = Sample {
            id: Uuid::now_v7(),
            collection_id,
            description,
            created: now,
            destroyed: None,
            location,
            default_attachment: None,
            notes,
            notes_markup,
            codes,
            log: vec![SampleLogEntry {
                created: now,
                creator: Some(created_by),
                kind: EventKind::Create,
                message: "Sample created".to_string(),
            }],
        };
        txn.tables.samples.insert(sample.id, sample.clone());

        tracing::info!(sample = %sample.id, collection = %collection_id, "sample created");

        Ok(sample)
    }
}

/// Moves the sample to its terminal state, recording the reason as a
/// `destroy` log entry. The sample's history remains queryable afterwards.
///
/// # Errors
/// [`Error::AlreadyDestroyed`] if the sample is not Existing.
pub fn destroy(
    txn: &mut Transaction,
    sample_id: Uuid,
    destroyer: Uuid,
    reason: &str,
) -> Result<Sample> {
    validators::log_message(reason)?;

    let now = txn.now();

    let sample = txn
        .tables
        .samples
        .get_mut(&sample_id)
        .ok_or(Error::RecordNotFound)?;

    if sample.destroyed.is_some() {
        return Err(Error::AlreadyDestroyed { sample: sample_id });
    }

    sample.log.push(SampleLogEntry {
        created: now,
        creator: Some(destroyer),
        kind: EventKind::Destroy,
        message: reason.to_string(),
    });
    sample.destroyed = Some(now);

    tracing::info!(sample = %sample_id, "sample destroyed");

    Ok(sample.clone())
}

/// Records that `sample` derives from `parent`. Edges are append-only and
/// acyclic; a sample can never be its own ancestor.
///
/// # Errors
/// [`Error::LineageCycle`] if the edge would close a loop;
/// [`Error::DuplicateRecord`] if the edge already exists.
pub fn add_origin(txn: &mut Transaction, sample_id: Uuid, parent_id: Uuid) -> Result<()> {
    for (entity, id) in [("sample", sample_id), ("parent sample", parent_id)] {
        if !txn.tables.samples.contains_key(&id) {
            return Err(Error::reference_not_found(
                "sample_origin",
                entity,
                id.to_string(),
            ));
        }
    }

    if sample_id == parent_id || ancestors_of(txn, parent_id).contains(&sample_id) {
        return Err(Error::LineageCycle { sample: sample_id });
    }

    if !txn.tables.sample_origins.insert((sample_id, parent_id)) {
        return Err(Error::duplicate(
            "sample_origin",
            "parent",
            parent_id.to_string(),
        ));
    }

    Ok(())
}

/// Creates one sample out of several existing aliquots, destroying each
/// aliquot and recording it as a parent of the result. All-or-nothing under
/// the enclosing transaction.
pub struct CombineSamples {
    pub sample: NewSample,
    pub aliquots: Vec<Uuid>,
}

impl Write for CombineSamples {
    type Returns = Sample;

    fn write(self, txn: &mut Transaction) -> Result<Self::Returns> {
        let Self { sample, aliquots } = self;

        if aliquots.is_empty() {
            return Err(Error::invalid_field(
                "aliquots",
                "combining requires at least one source sample",
            ));
        }

        let creator = sample.created_by;
        let result = sample.write(txn)?;
        let reason = format!("Sample combined into sample {}", result.id);

        for aliquot_id in aliquots {
            {
                let aliquot = txn
                    .tables
                    .samples
                    .get_mut(&aliquot_id)
                    .ok_or(Error::RecordNotFound)?;

                if aliquot.destroyed.is_some() {
                    return Err(Error::AlreadyDestroyed { sample: aliquot_id });
                }
            }

            append_engine_entry(txn, aliquot_id, creator, EventKind::Change, &reason);
            destroy(txn, aliquot_id, creator, &reason)?;
            add_origin(txn, result.id, aliquot_id)?;
        }

        tracing::info!(sample = %result.id, "samples combined");

        Ok(result)
    }
}

/// Splits one sample into `aliquots` children (plus an optional aliquant),
/// destroying the source. Children inherit the source's location unless the
/// caller supplies one. Returns the children, aliquots first.
pub struct SplitSample {
    pub sample_id: Uuid,
    pub created_by: Uuid,
    pub aliquots: u32,
    pub aliquant: bool,
    /// Overrides the generated per-child description when present.
    pub description: Option<String>,
    pub location: Option<String>,
}

impl Write for SplitSample {
    type Returns = Vec<Sample>;

    fn write(self, txn: &mut Transaction) -> Result<Self::Returns> {
        let Self {
            sample_id,
            created_by,
            aliquots,
            aliquant,
            description,
            location,
        } = self;

        // The 2..=1000 rule is a form concern; the engine only refuses a
        // fan-out of zero.
        if aliquots < 1 {
            return Err(Error::invalid_field(
                "aliquots",
                "cannot split a sample into less than 1 aliquot",
            ));
        }

        let source = Sample::fetch_by_id(&sample_id, txn)?;
        if source.destroyed.is_some() {
            return Err(Error::AlreadyDestroyed { sample: sample_id });
        }

        let child_location = location.unwrap_or_else(|| source.location.clone());
        let child = |description: String| NewSample {
            collection_id: source.collection_id,
            created_by,
            description,
            location: child_location.clone(),
            notes: String::new(),
            notes_markup: MarkupLanguage::Text,
            codes: BTreeMap::new(),
        };

        let mut children = Vec::with_capacity(aliquots as usize + usize::from(aliquant));

        for i in 1..=aliquots {
            let aliquot = child(
                description
                    .clone()
                    .unwrap_or_else(|| format!("Aliquot {i} of sample {sample_id}")),
            )
            .write(txn)?;

            add_origin(txn, aliquot.id, sample_id)?;
            append_engine_entry(
                txn,
                sample_id,
                created_by,
                EventKind::Change,
                &format!("Created aliquot {} from sample", aliquot.id),
            );
            children.push(aliquot);
        }

        if aliquant {
            let aliquant = child(
                description
                    .clone()
                    .unwrap_or_else(|| format!("Aliquant of sample {sample_id}")),
            )
            .write(txn)?;

            add_origin(txn, aliquant.id, sample_id)?;
            append_engine_entry(
                txn,
                sample_id,
                created_by,
                EventKind::Change,
                &format!("Created aliquant {} from sample", aliquant.id),
            );
            children.push(aliquant);
        }

        let reason = format!(
            "Sample destroyed to create {aliquots} aliquots{}",
            if aliquant { " and an aliquant" } else { "" },
        );
        destroy(txn, sample_id, created_by, &reason)?;

        tracing::info!(sample = %sample_id, children = children.len(), "sample split");

        Ok(children)
    }
}

/// Internal log writer for engine-authored entries. Assumes the sample
/// exists; callers have already fetched it.
fn append_engine_entry(
    txn: &mut Transaction,
    sample_id: Uuid,
    creator: Uuid,
    kind: EventKind,
    message: &str,
) {
    let now = txn.now();

    if let Some(sample) = txn.tables.samples.get_mut(&sample_id) {
        sample.log.push(SampleLogEntry {
            created: now,
            creator: Some(creator),
            kind,
            message: message.to_string(),
        });
    }
}

/// Appends an auditor observation or a user note. The engine-authored kinds
/// (`create`, `destroy`, `change`) cannot be written through here.
///
/// # Errors
/// [`Error::InvalidField`] for an engine-authored kind or an empty
/// message; [`Error::RecordNotFound`] for an unknown sample.
pub fn append_log(
    txn: &mut Transaction,
    sample_id: Uuid,
    creator: Uuid,
    kind: EventKind,
    message: &str,
) -> Result<SampleLogEntry> {
    if !matches!(kind, EventKind::Audit | EventKind::User) {
        return Err(Error::invalid_field(
            "kind",
            "only audit and user entries may be appended directly",
        ));
    }

    validators::log_message(message)?;

    let now = txn.now();

    let sample = txn
        .tables
        .samples
        .get_mut(&sample_id)
        .ok_or(Error::RecordNotFound)?;

    let entry = SampleLogEntry {
        created: now,
        creator: Some(creator),
        kind,
        message: message.to_string(),
    };
    sample.log.push(entry.clone());

    Ok(entry)
}

/// # Errors
/// [`Error::RecordNotFound`] for an unknown sample.
pub fn log_of(txn: &Transaction, sample_id: Uuid) -> Result<Vec<SampleLogEntry>> {
    Sample::fetch_by_id(&sample_id, txn).map(|sample| sample.log)
}

#[must_use]
pub fn parents_of(txn: &Transaction, sample_id: Uuid) -> Vec<Uuid> {
    txn.tables
        .sample_origins
        .iter()
        .filter(|(s, _)| *s == sample_id)
        .map(|(_, p)| *p)
        .collect()
}

#[must_use]
pub fn children_of(txn: &Transaction, sample_id: Uuid) -> Vec<Uuid> {
    txn.tables
        .sample_origins
        .iter()
        .filter(|(_, p)| *p == sample_id)
        .map(|(s, _)| *s)
        .collect()
}

/// Every transitive parent, breadth-first. The edge set is acyclic so this
/// terminates.
#[must_use]
pub fn ancestors_of(txn: &Transaction, sample_id: Uuid) -> BTreeSet<Uuid> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<Uuid> = parents_of(txn, sample_id).into();

    while let Some(parent) = queue.pop_front() {
        if seen.insert(parent) {
            queue.extend(parents_of(txn, parent));
        }
    }

    seen
}

#[must_use]
pub fn samples_in(txn: &Transaction, collection_id: Uuid) -> Vec<Sample> {
    txn.tables
        .samples
        .values()
        .filter(|s| s.collection_id == collection_id)
        .cloned()
        .collect()
}

#[must_use]
pub fn existing_samples_in(txn: &Transaction, collection_id: Uuid) -> Vec<Sample> {
    samples_in(txn, collection_id)
        .into_iter()
        .filter(Sample::is_existing)
        .collect()
}

#[must_use]
pub fn destroyed_samples_in(txn: &Transaction, collection_id: Uuid) -> Vec<Sample> {
    samples_in(txn, collection_id)
        .into_iter()
        .filter(|s| !s.is_existing())
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::db::test_util::{TestDb, db, new_sample};

    fn create(db: &mut TestDb, description: &str) -> Sample {
        let input = new_sample(db, description);
        db.db.transaction(|txn| input.write(txn)).unwrap()
    }

    #[rstest]
    fn creation_writes_the_first_log_entry(mut db: TestDb) {
        let sample = create(&mut db, "Blood draw 1");

        assert_eq!(sample.status(), "Existing");
        assert_eq!(sample.log().len(), 1);
        assert_eq!(sample.log()[0].kind(), EventKind::Create);
        assert_eq!(sample.log()[0].message(), "Sample created");
    }

    #[rstest]
    fn destruction_is_terminal(mut db: TestDb) {
        let sample = create(&mut db, "Blood draw 1");
        let destroyer = db.users[0].id();

        let destroyed = db
            .db
            .transaction(|txn| destroy(txn, sample.id(), destroyer, "Used up"))
            .unwrap();

        assert_eq!(destroyed.status(), "Destroyed");
        let last = destroyed.log().last().unwrap();
        assert_eq!(last.kind(), EventKind::Destroy);
        assert_eq!(last.message(), "Used up");

        let err = db
            .db
            .transaction(|txn| destroy(txn, sample.id(), destroyer, "Again"))
            .unwrap_err();
        assert_eq!(
            err,
            Error::AlreadyDestroyed {
                sample: sample.id()
            }
        );
    }

    #[rstest]
    fn combine_destroys_aliquots_and_links_them(mut db: TestDb) {
        let a = create(&mut db, "Aliquot A");
        let b = create(&mut db, "Aliquot B");

        let pooled_input = new_sample(&db, "Pooled sample");
        let pooled = db
            .db
            .transaction(|txn| {
                CombineSamples {
                    sample: pooled_input,
                    aliquots: vec![a.id(), b.id()],
                }
                .write(txn)
            })
            .unwrap();

        db.db.read(|txn| {
            let mut parents = parents_of(txn, pooled.id());
            parents.sort();
            let mut expected = vec![a.id(), b.id()];
            expected.sort();
            assert_eq!(parents, expected);

            for id in [a.id(), b.id()] {
                let aliquot = Sample::fetch_by_id(&id, txn).unwrap();
                assert_eq!(aliquot.status(), "Destroyed");

                let kinds: Vec<_> = aliquot.log().iter().map(SampleLogEntry::kind).collect();
                assert_eq!(
                    kinds,
                    vec![EventKind::Create, EventKind::Change, EventKind::Destroy]
                );
            }
        });
    }

    #[rstest]
    fn combine_with_a_destroyed_aliquot_rolls_back_entirely(mut db: TestDb) {
        let a = create(&mut db, "Aliquot A");
        let b = create(&mut db, "Aliquot B");
        let destroyer = db.users[0].id();

        db.db
            .transaction(|txn| destroy(txn, b.id(), destroyer, "Contaminated"))
            .unwrap();

        let before = db.db.read(|txn| txn.tables.samples.len());

        let pooled_input = new_sample(&db, "Pooled sample");
        let err = db
            .db
            .transaction(|txn| {
                CombineSamples {
                    sample: pooled_input,
                    aliquots: vec![a.id(), b.id()],
                }
                .write(txn)
            })
            .unwrap_err();
        assert_eq!(err, Error::AlreadyDestroyed { sample: b.id() });

        db.db.read(|txn| {
            // No result sample, no edges, and the healthy aliquot untouched
            assert_eq!(txn.tables.samples.len(), before);
            assert!(txn.tables.sample_origins.is_empty());
            assert!(
                Sample::fetch_by_id(&a.id(), txn)
                    .unwrap()
                    .is_existing()
            );
        });
    }

    #[rstest]
    fn split_creates_parented_children_and_destroys_the_source(mut db: TestDb) {
        let source = create(&mut db, "Whole blood");
        let creator = db.users[0].id();

        let children = db
            .db
            .transaction(|txn| {
                SplitSample {
                    sample_id: source.id(),
                    created_by: creator,
                    aliquots: 3,
                    aliquant: true,
                    description: None,
                    location: None,
                }
                .write(txn)
            })
            .unwrap();

        assert_eq!(children.len(), 4);
        assert_eq!(
            children[0].description(),
            format!("Aliquot 1 of sample {}", source.id())
        );
        assert_eq!(
            children[3].description(),
            format!("Aliquant of sample {}", source.id())
        );

        db.db.read(|txn| {
            for child in &children {
                assert_eq!(parents_of(txn, child.id()), vec![source.id()]);
                assert!(ancestors_of(txn, child.id()).contains(&source.id()));
            }

            let source = Sample::fetch_by_id(&source.id(), txn).unwrap();
            assert_eq!(source.status(), "Destroyed");
            assert_eq!(
                source.log().last().unwrap().message(),
                "Sample destroyed to create 3 aliquots and an aliquant"
            );
        });
    }

    #[rstest]
    fn split_children_inherit_location(mut db: TestDb) {
        let mut input = new_sample(&db, "Whole blood");
        input.location = "Freezer 3, shelf 2".to_string();
        let source = db.db.transaction(|txn| input.write(txn)).unwrap();
        let creator = db.users[0].id();

        let children = db
            .db
            .transaction(|txn| {
                SplitSample {
                    sample_id: source.id(),
                    created_by: creator,
                    aliquots: 2,
                    aliquant: false,
                    description: None,
                    location: None,
                }
                .write(txn)
            })
            .unwrap();

        for child in &children {
            assert_eq!(child.location(), "Freezer 3, shelf 2");
        }
    }

    #[rstest]
    fn lineage_refuses_cycles(mut db: TestDb) {
        let a = create(&mut db, "A");
        let b = create(&mut db, "B");
        let c = create(&mut db, "C");

        db.db
            .transaction(|txn| {
                add_origin(txn, b.id(), a.id())?;
                add_origin(txn, c.id(), b.id())
            })
            .unwrap();

        for (sample, parent) in [(a.id(), a.id()), (a.id(), c.id())] {
            let err = db
                .db
                .transaction(|txn| add_origin(txn, sample, parent))
                .unwrap_err();
            assert_eq!(err, Error::LineageCycle { sample });
        }

        assert_eq!(
            db.db.read(|txn| ancestors_of(txn, c.id())),
            BTreeSet::from([a.id(), b.id()])
        );
    }

    #[rstest]
    fn direct_log_appends_are_limited_to_audit_and_user(mut db: TestDb) {
        let sample = create(&mut db, "Blood draw 1");
        let auditor = db.users[1].id();

        db.db
            .transaction(|txn| {
                append_log(txn, sample.id(), auditor, EventKind::Audit, "Checked, intact")
            })
            .unwrap();

        let err = db
            .db
            .transaction(|txn| append_log(txn, sample.id(), auditor, EventKind::Destroy, "nope"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidField { .. }));

        let log = db
            .db
            .read(|txn| log_of(txn, sample.id()))
            .unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].kind(), EventKind::Audit);
    }

    #[rstest]
    fn collection_queries_partition_by_status(mut db: TestDb) {
        let collection = db.collections[0].id();
        let a = create(&mut db, "A");
        let _b = create(&mut db, "B");
        let destroyer = db.users[0].id();

        db.db
            .transaction(|txn| destroy(txn, a.id(), destroyer, "Spent"))
            .unwrap();

        db.db.read(|txn| {
            assert_eq!(samples_in(txn, collection).len(), 2);
            assert_eq!(existing_samples_in(txn, collection).len(), 1);
            assert_eq!(destroyed_samples_in(txn, collection).len(), 1);
        });
    }
}
