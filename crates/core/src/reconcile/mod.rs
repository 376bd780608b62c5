//! Reconciliation of deal mutations across the bridge.
//!
//! Inbound mutation envelopes are mapped onto the host's [`DealStore`] with
//! exactly one store call each, or discarded. Delivery may duplicate and
//! reorder envelopes, so the reconciler keeps a per-deal, per-field clock of
//! the newest timestamp written and discards anything that is not newer.
//! Conflicting edits to different fields of the same deal therefore both
//! survive; conflicting edits to the same field resolve last-write-wins.
//!
//! Deletions leave a tombstone so that a late, older create or update for
//! the same id is discarded instead of resurrecting the deal.

pub mod mapping;

use crate::store::{ContactLookup, Deal, DealPatch, DealStore, StoreError};
use pb_protocol::deal_models::DealChanges;
use pb_protocol::envelope::{Envelope, EnvelopeError, MessageType, Source};
use pb_protocol::messages::{DealRef, DealUpdate, Message, StageChange};
use std::collections::HashMap;
use thiserror::Error;

use mapping::{changes_to_patch, from_wire, to_wire};

/// A reconcilable deal field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DealField {
    Title,
    Value,
    Stage,
    Contact,
    Probability,
    ExpectedCloseDate,
    Notes,
}

impl DealField {
    pub const ALL: [DealField; 7] = [
        DealField::Title,
        DealField::Value,
        DealField::Stage,
        DealField::Contact,
        DealField::Probability,
        DealField::ExpectedCloseDate,
        DealField::Notes,
    ];

    fn is_set_in(self, patch: &DealPatch) -> bool {
        match self {
            DealField::Title => patch.title.is_some(),
            DealField::Value => patch.value.is_some(),
            DealField::Stage => patch.stage.is_some(),
            DealField::Contact => patch.contact_id.is_some(),
            DealField::Probability => patch.probability.is_some(),
            DealField::ExpectedCloseDate => patch.expected_close_date.is_some(),
            DealField::Notes => patch.notes.is_some(),
        }
    }
}

impl DealField {
    /// Whether wire `changes` touch this field. Contact decorations travel
    /// with the contact.
    pub(crate) fn is_changed_in(self, changes: &DealChanges) -> bool {
        match self {
            DealField::Title => changes.title.is_some(),
            DealField::Value => changes.value.is_some(),
            DealField::Stage => changes.stage.is_some(),
            DealField::Contact => {
                changes.contact_id.is_some()
                    || changes.contact_name.is_some()
                    || changes.company.is_some()
            }
            DealField::Probability => changes.probability.is_some(),
            DealField::ExpectedCloseDate => changes.expected_close_date.is_some(),
            DealField::Notes => changes.notes.is_some(),
        }
    }
}

/// Keep only `fields` of `patch`.
fn restrict(patch: DealPatch, fields: &[DealField]) -> DealPatch {
    let keep = |field: DealField| fields.contains(&field);
    DealPatch {
        title: patch.title.filter(|_| keep(DealField::Title)),
        value: patch.value.filter(|_| keep(DealField::Value)),
        stage: patch.stage.filter(|_| keep(DealField::Stage)),
        contact_id: patch.contact_id.filter(|_| keep(DealField::Contact)),
        probability: patch.probability.filter(|_| keep(DealField::Probability)),
        expected_close_date: patch
            .expected_close_date
            .filter(|_| keep(DealField::ExpectedCloseDate)),
        notes: patch.notes.filter(|_| keep(DealField::Notes)),
    }
}

fn full_patch(deal: &Deal) -> DealPatch {
    DealPatch {
        title: Some(deal.title.clone()),
        value: Some(deal.value),
        stage: Some(deal.stage.clone()),
        contact_id: deal.contact_id.clone(),
        probability: deal.probability,
        expected_close_date: deal.expected_close_date,
        notes: deal.notes.clone(),
    }
}

/// Newest write per field of one deal, plus its tombstone.
#[derive(Debug, Default, Clone)]
pub(crate) struct DealClock {
    fields: HashMap<DealField, i64>,
    deleted_at: Option<i64>,
}

impl DealClock {
    /// Fields for which `touched` holds and that `clock` has not seen at or
    /// after `timestamp`. A deal without a clock has seen nothing.
    pub(crate) fn newer_fields(
        clock: Option<&Self>,
        touched: impl Fn(DealField) -> bool,
        timestamp: i64,
    ) -> Vec<DealField> {
        DealField::ALL
            .into_iter()
            .filter(|field| touched(*field))
            .filter(|field| {
                clock
                    .and_then(|clock| clock.fields.get(field))
                    .is_none_or(|seen| *seen < timestamp)
            })
            .collect()
    }

    pub(crate) fn deleted_since(clock: Option<&Self>, timestamp: i64) -> bool {
        clock
            .and_then(|clock| clock.deleted_at)
            .is_some_and(|deleted| deleted >= timestamp)
    }

    /// Whether a delete at `timestamp` is older than the newest write.
    pub(crate) fn superseded(clock: Option<&Self>, timestamp: i64) -> bool {
        clock
            .and_then(DealClock::newest_write)
            .is_some_and(|newest| newest > timestamp)
    }

    pub(crate) fn mark_deleted(&mut self, timestamp: i64) {
        self.deleted_at = Some(timestamp);
    }

    pub(crate) fn clear_tombstone(&mut self) {
        self.deleted_at = None;
    }

    pub(crate) fn record(&mut self, fields: &[DealField], timestamp: i64) {
        for field in fields {
            let seen = self.fields.entry(*field).or_insert(timestamp);
            *seen = (*seen).max(timestamp);
        }
    }

    fn newest_write(&self) -> Option<i64> {
        self.fields.values().copied().max()
    }
}

/// What an inbound mutation did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `add_deal` was called.
    Created { deal_id: String },
    /// `update_deal` was called with exactly these fields.
    Updated {
        deal_id: String,
        fields: Vec<DealField>,
    },
    /// `delete_deal` was called.
    Deleted { deal_id: String },
    /// Nothing newer than what was already applied; no store call.
    Discarded { deal_id: String },
}

/// Kind of local change being published to the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    StageChanged { from: Option<String> },
    Deleted,
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("{0} is not a deal mutation")]
    NotAMutation(MessageType),

    #[error("deal {0} is unknown to the store")]
    UnknownDeal(String),

    #[error("store rejected change to deal {deal_id}: {source}")]
    Store {
        deal_id: String,
        source: StoreError,
    },

    #[error(transparent)]
    Encode(#[from] EnvelopeError),
}

/// Type alias for Result with ReconcileError.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

fn store_error(deal_id: &str, err: StoreError) -> ReconcileError {
    match err {
        StoreError::NotFound(_) => ReconcileError::UnknownDeal(deal_id.to_string()),
        source => ReconcileError::Store {
            deal_id: deal_id.to_string(),
            source,
        },
    }
}

/// Per-deal write clocks plus the inbound/outbound mapping.
#[derive(Debug, Default)]
pub struct Reconciler {
    clocks: HashMap<String, DealClock>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an inbound mutation to `store`.
    ///
    /// Makes at most one store call. Applying the same envelope twice is
    /// the same as applying it once.
    pub fn apply(
        &mut self,
        envelope: &Envelope,
        message: &Message,
        store: &dyn DealStore,
    ) -> ReconcileResult<Outcome> {
        let timestamp = envelope.timestamp;
        match message {
            Message::DealCreated(wire) => self.apply_create(&from_wire(wire), timestamp, store),
            Message::DealUpdated(DealUpdate { deal_id, changes }) => {
                self.apply_patch(deal_id, changes_to_patch(changes), timestamp, store)
            }
            Message::DealStageChanged(StageChange {
                deal_id, new_stage, ..
            }) => self.apply_patch(deal_id, DealPatch::stage(new_stage.clone()), timestamp, store),
            Message::DealDeleted(DealRef { deal_id }) => {
                self.apply_delete(deal_id, timestamp, store)
            }
            other => Err(ReconcileError::NotAMutation(other.kind())),
        }
    }

    fn apply_create(
        &mut self,
        deal: &Deal,
        timestamp: i64,
        store: &dyn DealStore,
    ) -> ReconcileResult<Outcome> {
        let deal_id = deal.id.clone();
        let clock = self.clocks.get(&deal_id);

        if DealClock::deleted_since(clock, timestamp) {
            return Ok(Outcome::Discarded { deal_id });
        }

        let existing = store.get_deal(&deal_id).map_err(|e| store_error(&deal_id, e))?;
        let patch = full_patch(deal);
        let fields = DealClock::newer_fields(clock, |field| field.is_set_in(&patch), timestamp);

        let outcome = if existing.is_some() {
            // Duplicate or echoed create: only newer fields are written.
            if fields.is_empty() {
                return Ok(Outcome::Discarded { deal_id });
            }
            store
                .update_deal(&deal_id, restrict(patch, &fields))
                .map_err(|e| store_error(&deal_id, e))?;
            Outcome::Updated {
                deal_id: deal_id.clone(),
                fields,
            }
        } else {
            store
                .add_deal(deal.clone())
                .map_err(|e| store_error(&deal_id, e))?;
            Outcome::Created {
                deal_id: deal_id.clone(),
            }
        };

        let clock = self.clocks.entry(deal_id).or_default();
        match &outcome {
            Outcome::Updated { fields, .. } => clock.record(fields, timestamp),
            _ => clock.record(&DealField::ALL, timestamp),
        }
        // Any tombstone left here is older than this create.
        clock.clear_tombstone();
        Ok(outcome)
    }

    fn apply_patch(
        &mut self,
        deal_id: &str,
        patch: DealPatch,
        timestamp: i64,
        store: &dyn DealStore,
    ) -> ReconcileResult<Outcome> {
        let clock = self.clocks.get(deal_id);

        if DealClock::deleted_since(clock, timestamp) {
            return Ok(Outcome::Discarded {
                deal_id: deal_id.to_string(),
            });
        }

        let fields = DealClock::newer_fields(clock, |field| field.is_set_in(&patch), timestamp);
        if fields.is_empty() {
            return Ok(Outcome::Discarded {
                deal_id: deal_id.to_string(),
            });
        }

        store
            .update_deal(deal_id, restrict(patch, &fields))
            .map_err(|e| store_error(deal_id, e))?;

        self.clocks
            .entry(deal_id.to_string())
            .or_default()
            .record(&fields, timestamp);
        Ok(Outcome::Updated {
            deal_id: deal_id.to_string(),
            fields,
        })
    }

    fn apply_delete(
        &mut self,
        deal_id: &str,
        timestamp: i64,
        store: &dyn DealStore,
    ) -> ReconcileResult<Outcome> {
        let clock = self.clocks.get(deal_id);

        if DealClock::deleted_since(clock, timestamp) || DealClock::superseded(clock, timestamp) {
            return Ok(Outcome::Discarded {
                deal_id: deal_id.to_string(),
            });
        }

        let deleted = store.delete_deal(deal_id);
        if matches!(deleted, Ok(()) | Err(StoreError::NotFound(_))) {
            // The tombstone is kept even when the store never knew the deal,
            // so an older create arriving later cannot bring it back.
            self.clocks
                .entry(deal_id.to_string())
                .or_default()
                .mark_deleted(timestamp);
        }
        deleted.map_err(|e| store_error(deal_id, e))?;

        Ok(Outcome::Deleted {
            deal_id: deal_id.to_string(),
        })
    }

    /// Build the outbound envelope for a local change and record it as the
    /// newest write for the affected fields.
    pub fn publish(
        &mut self,
        deal: &Deal,
        change: ChangeKind,
        contacts: Option<&dyn ContactLookup>,
    ) -> ReconcileResult<Envelope> {
        let wire = to_wire(deal, contacts);
        let (message, fields): (Message, &[DealField]) = match change {
            ChangeKind::Created => (Message::DealCreated(wire), &DealField::ALL),
            ChangeKind::Updated => (
                Message::DealUpdated(DealUpdate {
                    deal_id: deal.id.clone(),
                    changes: wire.as_changes(),
                }),
                &DealField::ALL,
            ),
            ChangeKind::StageChanged { from } => (
                Message::DealStageChanged(StageChange {
                    deal_id: deal.id.clone(),
                    new_stage: deal.stage.clone(),
                    old_stage: from,
                }),
                &[DealField::Stage],
            ),
            ChangeKind::Deleted => return self.publish_deletion(&deal.id),
        };

        let envelope = message.into_envelope(Source::Host)?;
        self.clocks
            .entry(deal.id.clone())
            .or_default()
            .record(fields, envelope.timestamp);
        Ok(envelope)
    }

    /// Build the outbound envelope for a local deletion.
    pub fn publish_deletion(&mut self, deal_id: &str) -> ReconcileResult<Envelope> {
        let envelope = Message::DealDeleted(DealRef {
            deal_id: deal_id.to_string(),
        })
        .into_envelope(Source::Host)?;
        self.clocks
            .entry(deal_id.to_string())
            .or_default()
            .mark_deleted(envelope.timestamp);
        Ok(envelope)
    }

    /// Newest timestamp written for `deal_id`, deletions included.
    pub fn last_applied(&self, deal_id: &str) -> Option<i64> {
        let clock = self.clocks.get(deal_id)?;
        clock.newest_write().max(clock.deleted_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryDealStore, StoreResult};
    use pb_protocol::deal_models::{DealChanges, PipelineDeal};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn envelope(message: &Message, timestamp: i64) -> Envelope {
        message.clone().into_envelope_at(Source::Remote, timestamp).unwrap()
    }

    fn apply(reconciler: &mut Reconciler, store: &MemoryDealStore, message: Message, ts: i64) -> Outcome {
        apply_to(reconciler, store, message, ts)
    }

    fn apply_to(reconciler: &mut Reconciler, store: &dyn DealStore, message: Message, ts: i64) -> Outcome {
        let env = envelope(&message, ts);
        reconciler.apply(&env, &message, store).unwrap()
    }

    fn seeded_store() -> MemoryDealStore {
        MemoryDealStore::with_deals([Deal::new("d1", "Renewal", 1000.0, "lead")])
    }

    fn update(deal_id: &str, changes: DealChanges) -> Message {
        Message::DealUpdated(DealUpdate {
            deal_id: deal_id.to_string(),
            changes,
        })
    }

    #[test]
    fn test_duplicate_update_is_idempotent() {
        let store = seeded_store();
        let mut reconciler = Reconciler::new();
        let message = update(
            "d1",
            DealChanges {
                value: Some(2500.0),
                ..DealChanges::default()
            },
        );

        let first = apply(&mut reconciler, &store, message.clone(), 10);
        let after_first = store.fetch_deals().unwrap();
        let second = apply(&mut reconciler, &store, message, 10);

        assert!(matches!(first, Outcome::Updated { .. }));
        assert!(matches!(second, Outcome::Discarded { .. }));
        let after_second = store.fetch_deals().unwrap();
        assert_eq!(after_first[0].value, after_second[0].value);
        assert_eq!(after_first[0].updated_at, after_second[0].updated_at);
    }

    #[test]
    fn test_older_update_is_discarded() {
        let store = seeded_store();
        let mut reconciler = Reconciler::new();

        apply(&mut reconciler, &store, update("d1", DealChanges { title: Some("New".into()), ..Default::default() }), 20);
        let outcome = apply(&mut reconciler, &store, update("d1", DealChanges { title: Some("Old".into()), ..Default::default() }), 15);

        assert!(matches!(outcome, Outcome::Discarded { .. }));
        assert_eq!(store.get_deal("d1").unwrap().unwrap().title, "New");
    }

    #[test]
    fn test_concurrent_edits_to_different_fields_both_survive() {
        let store = seeded_store();
        let mut reconciler = Reconciler::new();

        apply(&mut reconciler, &store, update("d1", DealChanges { value: Some(5.0), ..Default::default() }), 20);
        let outcome = apply(
            &mut reconciler,
            &store,
            Message::DealStageChanged(StageChange {
                deal_id: "d1".into(),
                new_stage: "won".into(),
                old_stage: None,
            }),
            19,
        );

        assert_eq!(
            outcome,
            Outcome::Updated {
                deal_id: "d1".into(),
                fields: vec![DealField::Stage]
            }
        );
        let deal = store.get_deal("d1").unwrap().unwrap();
        assert_eq!(deal.value, 5.0);
        assert_eq!(deal.stage, "won");
    }

    #[test]
    fn test_partial_overlap_only_writes_newer_fields() {
        let store = seeded_store();
        let mut reconciler = Reconciler::new();

        apply(&mut reconciler, &store, update("d1", DealChanges { value: Some(5.0), ..Default::default() }), 20);
        let outcome = apply(
            &mut reconciler,
            &store,
            update("d1", DealChanges { value: Some(1.0), notes: Some("late".into()), ..Default::default() }),
            18,
        );

        assert_eq!(
            outcome,
            Outcome::Updated {
                deal_id: "d1".into(),
                fields: vec![DealField::Notes]
            }
        );
        let deal = store.get_deal("d1").unwrap().unwrap();
        assert_eq!(deal.value, 5.0);
        assert_eq!(deal.notes.as_deref(), Some("late"));
    }

    #[test]
    fn test_create_then_duplicate_create() {
        let store = MemoryDealStore::new();
        let mut reconciler = Reconciler::new();
        let created = Message::DealCreated(PipelineDeal::new("d9", "Pilot", 300.0, "lead"));

        assert_eq!(
            apply(&mut reconciler, &store, created.clone(), 5),
            Outcome::Created { deal_id: "d9".into() }
        );
        assert_eq!(
            apply(&mut reconciler, &store, created, 5),
            Outcome::Discarded { deal_id: "d9".into() }
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_leaves_tombstone() {
        let store = seeded_store();
        let mut reconciler = Reconciler::new();
        let deleted = Message::DealDeleted(DealRef { deal_id: "d1".into() });

        assert_eq!(
            apply(&mut reconciler, &store, deleted.clone(), 30),
            Outcome::Deleted { deal_id: "d1".into() }
        );
        assert_eq!(
            apply(&mut reconciler, &store, deleted, 30),
            Outcome::Discarded { deal_id: "d1".into() }
        );

        let stale_create = Message::DealCreated(PipelineDeal::new("d1", "Renewal", 1.0, "lead"));
        assert_eq!(
            apply(&mut reconciler, &store, stale_create, 25),
            Outcome::Discarded { deal_id: "d1".into() }
        );
        assert!(store.is_empty());
        assert_eq!(reconciler.last_applied("d1"), Some(30));
    }

    #[test]
    fn test_newer_create_after_delete_restores_deal() {
        let store = seeded_store();
        let mut reconciler = Reconciler::new();

        apply(&mut reconciler, &store, Message::DealDeleted(DealRef { deal_id: "d1".into() }), 30);
        let outcome = apply(
            &mut reconciler,
            &store,
            Message::DealCreated(PipelineDeal::new("d1", "Renewal v2", 1.0, "lead")),
            40,
        );

        assert_eq!(outcome, Outcome::Created { deal_id: "d1".into() });
        assert_eq!(store.get_deal("d1").unwrap().unwrap().title, "Renewal v2");
    }

    #[test]
    fn test_delete_older_than_latest_write_is_discarded() {
        let store = seeded_store();
        let mut reconciler = Reconciler::new();

        apply(&mut reconciler, &store, update("d1", DealChanges { value: Some(9.0), ..Default::default() }), 50);
        let outcome = apply(&mut reconciler, &store, Message::DealDeleted(DealRef { deal_id: "d1".into() }), 40);

        assert!(matches!(outcome, Outcome::Discarded { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_for_unknown_deal_is_an_error() {
        let store = MemoryDealStore::new();
        let mut reconciler = Reconciler::new();
        let message = update("ghost", DealChanges { value: Some(1.0), ..Default::default() });
        let env = envelope(&message, 1);

        let err = reconciler.apply(&env, &message, &store).unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownDeal(id) if id == "ghost"));
        // The failed write did not advance the clock or start tracking the id.
        assert_eq!(reconciler.last_applied("ghost"), None);
        assert!(!reconciler.clocks.contains_key("ghost"));
    }

    #[test]
    fn test_stage_change_for_unknown_deals_tracks_nothing() {
        let store = MemoryDealStore::new();
        let mut reconciler = Reconciler::new();

        for id in ["ghost-1", "ghost-2", "ghost-3"] {
            let message = Message::DealStageChanged(StageChange {
                deal_id: id.into(),
                new_stage: "won".into(),
                old_stage: None,
            });
            let env = envelope(&message, 7);
            assert!(reconciler.apply(&env, &message, &store).is_err());
        }

        assert!(reconciler.clocks.is_empty());
    }

    /// Memory store whose deletes fail until `allow_deletes` is called.
    #[derive(Default)]
    struct LockedStore {
        inner: MemoryDealStore,
        unlocked: AtomicBool,
    }

    impl LockedStore {
        fn allow_deletes(&self) {
            self.unlocked.store(true, Ordering::SeqCst);
        }
    }

    impl DealStore for LockedStore {
        fn add_deal(&self, deal: Deal) -> StoreResult<Deal> {
            self.inner.add_deal(deal)
        }

        fn update_deal(&self, id: &str, patch: DealPatch) -> StoreResult<Deal> {
            self.inner.update_deal(id, patch)
        }

        fn delete_deal(&self, id: &str) -> StoreResult<()> {
            if self.unlocked.load(Ordering::SeqCst) {
                self.inner.delete_deal(id)
            } else {
                Err(StoreError::Rejected(format!("{id} is locked")))
            }
        }

        fn fetch_deals(&self) -> StoreResult<Vec<Deal>> {
            self.inner.fetch_deals()
        }
    }

    #[test]
    fn test_rejected_delete_leaves_no_tombstone() {
        let store = LockedStore::default();
        store.inner.add_deal(Deal::new("d1", "Renewal", 1000.0, "lead")).unwrap();
        let mut reconciler = Reconciler::new();
        let deleted = Message::DealDeleted(DealRef { deal_id: "d1".into() });

        let err = reconciler
            .apply(&envelope(&deleted, 30), &deleted, &store)
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Store { source: StoreError::Rejected(_), .. }
        ));
        assert_eq!(reconciler.last_applied("d1"), None);

        // The deal is still there, so an older update still lands.
        let outcome = apply_to(
            &mut reconciler,
            &store,
            update("d1", DealChanges { value: Some(42.0), ..Default::default() }),
            25,
        );
        assert!(matches!(outcome, Outcome::Updated { .. }));
        assert_eq!(store.get_deal("d1").unwrap().unwrap().value, 42.0);

        // Redelivery of the same delete is retried, not discarded.
        store.allow_deletes();
        assert_eq!(
            apply_to(&mut reconciler, &store, deleted, 30),
            Outcome::Deleted { deal_id: "d1".into() }
        );
        assert!(store.inner.is_empty());
        assert_eq!(reconciler.last_applied("d1"), Some(30));
    }

    #[test]
    fn test_delete_of_unknown_deal_still_blocks_older_create() {
        let store = MemoryDealStore::new();
        let mut reconciler = Reconciler::new();
        let deleted = Message::DealDeleted(DealRef { deal_id: "d7".into() });

        let err = reconciler
            .apply(&envelope(&deleted, 40), &deleted, &store)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownDeal(_)));

        let late = Message::DealCreated(PipelineDeal::new("d7", "Zombie", 1.0, "lead"));
        assert_eq!(
            apply(&mut reconciler, &store, late, 30),
            Outcome::Discarded { deal_id: "d7".into() }
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_non_mutation_is_rejected() {
        let store = MemoryDealStore::new();
        let mut reconciler = Reconciler::new();
        let env = envelope(&Message::RemoteReady, 1);

        let err = reconciler.apply(&env, &Message::RemoteReady, &store).unwrap_err();
        assert!(matches!(err, ReconcileError::NotAMutation(MessageType::RemoteReady)));
    }

    #[test]
    fn test_publish_records_local_write() {
        let mut reconciler = Reconciler::new();
        let store = seeded_store();
        let deal = store.get_deal("d1").unwrap().unwrap();

        let envelope = reconciler
            .publish(&deal, ChangeKind::StageChanged { from: Some("lead".into()) }, None)
            .unwrap();

        assert_eq!(envelope.kind, MessageType::DealStageChanged);
        assert_eq!(envelope.source, Source::Host);
        assert_eq!(envelope.data["dealId"], "d1");
        assert_eq!(envelope.data["oldStage"], "lead");

        // An echo of an older remote stage change is now stale.
        let echo = Message::DealStageChanged(StageChange {
            deal_id: "d1".into(),
            new_stage: "qualified".into(),
            old_stage: None,
        });
        let outcome = apply(&mut reconciler, &store, echo, envelope.timestamp - 1);
        assert!(matches!(outcome, Outcome::Discarded { .. }));
    }

    #[test]
    fn test_publish_deleted_uses_deletion_envelope() {
        let mut reconciler = Reconciler::new();
        let deal = Deal::new("d3", "Gone", 1.0, "lost");

        let envelope = reconciler.publish(&deal, ChangeKind::Deleted, None).unwrap();

        assert_eq!(envelope.kind, MessageType::DealDeleted);
        assert_eq!(envelope.data["dealId"], "d3");
        assert_eq!(reconciler.last_applied("d3"), Some(envelope.timestamp));
    }
}
