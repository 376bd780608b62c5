//! Host-side deal store and contact lookup interfaces.
//!
//! The bridge does not own deals. It talks to whatever store the host
//! application uses through [`DealStore`], and decorates outbound payloads
//! through [`ContactLookup`]. In-memory implementations are provided for
//! the simulator and for tests.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// The host's own deal entity.
///
/// Richer than the wire shape: it carries ownership and tagging fields the
/// remote board never sees.
#[derive(Debug, Clone, PartialEq)]
pub struct Deal {
    pub id: String,
    pub title: String,
    pub value: f64,
    pub stage: String,
    pub contact_id: Option<String>,
    pub probability: Option<f64>,
    pub expected_close_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub owner_id: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        value: f64,
        stage: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            value,
            stage: stage.into(),
            contact_id: None,
            probability: None,
            expected_close_date: None,
            notes: None,
            owner_id: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_contact(mut self, contact_id: impl Into<String>) -> Self {
        self.contact_id = Some(contact_id.into());
        self
    }

    /// Apply every field present in `patch` and bump `updated_at`.
    pub fn apply(&mut self, patch: &DealPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(value) = patch.value {
            self.value = value;
        }
        if let Some(stage) = &patch.stage {
            self.stage = stage.clone();
        }
        if let Some(contact_id) = &patch.contact_id {
            self.contact_id = Some(contact_id.clone());
        }
        if let Some(probability) = patch.probability {
            self.probability = Some(probability);
        }
        if let Some(date) = patch.expected_close_date {
            self.expected_close_date = Some(date);
        }
        if let Some(notes) = &patch.notes {
            self.notes = Some(notes.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update for a [`Deal`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DealPatch {
    pub title: Option<String>,
    pub value: Option<f64>,
    pub stage: Option<String>,
    pub contact_id: Option<String>,
    pub probability: Option<f64>,
    pub expected_close_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl DealPatch {
    pub fn stage(stage: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            ..Self::default()
        }
    }
}

/// A contact as far as the bridge cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub company: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("deal {0} not found")]
    NotFound(String),

    #[error("deal {0} already exists")]
    AlreadyExists(String),

    #[error("store rejected the operation: {0}")]
    Rejected(String),
}

/// Type alias for Result with StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// The host's local deal mutation API.
pub trait DealStore: Send + Sync {
    fn add_deal(&self, deal: Deal) -> StoreResult<Deal>;
    fn update_deal(&self, id: &str, patch: DealPatch) -> StoreResult<Deal>;
    fn delete_deal(&self, id: &str) -> StoreResult<()>;
    fn fetch_deals(&self) -> StoreResult<Vec<Deal>>;

    /// Look up a single deal. The default scans [`DealStore::fetch_deals`].
    fn get_deal(&self, id: &str) -> StoreResult<Option<Deal>> {
        Ok(self.fetch_deals()?.into_iter().find(|deal| deal.id == id))
    }
}

/// Contact decoration source for outbound deal payloads.
pub trait ContactLookup: Send + Sync {
    fn contact(&self, id: &str) -> Option<Contact>;
}

/// Deal store backed by an ordered in-memory map.
#[derive(Default)]
pub struct MemoryDealStore {
    deals: Mutex<BTreeMap<String, Deal>>,
}

impl MemoryDealStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deals(deals: impl IntoIterator<Item = Deal>) -> Self {
        Self {
            deals: Mutex::new(deals.into_iter().map(|d| (d.id.clone(), d)).collect()),
        }
    }

    fn deals(&self) -> MutexGuard<'_, BTreeMap<String, Deal>> {
        self.deals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.deals().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deals().is_empty()
    }
}

impl DealStore for MemoryDealStore {
    fn add_deal(&self, deal: Deal) -> StoreResult<Deal> {
        let mut deals = self.deals();
        if deals.contains_key(&deal.id) {
            return Err(StoreError::AlreadyExists(deal.id));
        }
        deals.insert(deal.id.clone(), deal.clone());
        Ok(deal)
    }

    fn update_deal(&self, id: &str, patch: DealPatch) -> StoreResult<Deal> {
        let mut deals = self.deals();
        let deal = deals
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        deal.apply(&patch);
        Ok(deal.clone())
    }

    fn delete_deal(&self, id: &str) -> StoreResult<()> {
        self.deals()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn fetch_deals(&self) -> StoreResult<Vec<Deal>> {
        Ok(self.deals().values().cloned().collect())
    }

    fn get_deal(&self, id: &str) -> StoreResult<Option<Deal>> {
        Ok(self.deals().get(id).cloned())
    }
}

/// Contact lookup backed by a map.
#[derive(Default)]
pub struct MemoryContacts {
    contacts: HashMap<String, Contact>,
}

impl MemoryContacts {
    pub fn new(contacts: impl IntoIterator<Item = Contact>) -> Self {
        Self {
            contacts: contacts.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }
}

impl ContactLookup for MemoryContacts {
    fn contact(&self, id: &str) -> Option<Contact> {
        self.contacts.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_crud() {
        let store = MemoryDealStore::new();
        store.add_deal(Deal::new("d1", "Renewal", 100.0, "lead")).unwrap();

        assert!(matches!(
            store.add_deal(Deal::new("d1", "Again", 1.0, "lead")),
            Err(StoreError::AlreadyExists(_))
        ));

        let updated = store.update_deal("d1", DealPatch::stage("won")).unwrap();
        assert_eq!(updated.stage, "won");
        assert_eq!(updated.title, "Renewal");

        store.delete_deal("d1").unwrap();
        assert!(store.is_empty());
        assert_eq!(
            store.delete_deal("d1"),
            Err(StoreError::NotFound("d1".to_string()))
        );
    }

    #[test]
    fn test_fetch_is_ordered_by_id() {
        let store = MemoryDealStore::with_deals([
            Deal::new("b", "B", 1.0, "lead"),
            Deal::new("a", "A", 1.0, "lead"),
        ]);
        let ids: Vec<_> = store.fetch_deals().unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
