//! Two-way mapping between the host's [`Deal`] and the wire [`PipelineDeal`].

use crate::store::{ContactLookup, Deal, DealPatch};
use chrono::Utc;
use pb_protocol::deal_models::{DealChanges, PipelineDeal};

/// Project a host deal onto the wire shape.
///
/// `contactName` and `company` are filled from `contacts` when the deal has
/// a contact and the lookup knows it.
pub fn to_wire(deal: &Deal, contacts: Option<&dyn ContactLookup>) -> PipelineDeal {
    let contact = deal
        .contact_id
        .as_deref()
        .and_then(|id| contacts.and_then(|lookup| lookup.contact(id)));

    PipelineDeal {
        id: deal.id.clone(),
        title: deal.title.clone(),
        value: deal.value,
        stage: deal.stage.clone(),
        contact_id: deal.contact_id.clone(),
        contact_name: contact.as_ref().map(|c| c.name.clone()),
        company: contact.and_then(|c| c.company),
        probability: deal.probability,
        expected_close_date: deal.expected_close_date,
        notes: deal.notes.clone(),
        created_at: Some(deal.created_at),
        updated_at: Some(deal.updated_at),
    }
}

/// Build a host deal from a wire deal announced by the remote side.
///
/// Display decorations are dropped; the host owns contact data.
pub fn from_wire(wire: &PipelineDeal) -> Deal {
    let now = Utc::now();
    Deal {
        id: wire.id.clone(),
        title: wire.title.clone(),
        value: wire.value,
        stage: wire.stage.clone(),
        contact_id: wire.contact_id.clone(),
        probability: wire.probability,
        expected_close_date: wire.expected_close_date,
        notes: wire.notes.clone(),
        owner_id: None,
        tags: Vec::new(),
        created_at: wire.created_at.unwrap_or(now),
        updated_at: wire.updated_at.unwrap_or(now),
    }
}

/// Translate wire changes into a store patch.
///
/// `contactName`, `company` and `updatedAt` have no host-side counterpart
/// and are ignored.
pub fn changes_to_patch(changes: &DealChanges) -> DealPatch {
    DealPatch {
        title: changes.title.clone(),
        value: changes.value,
        stage: changes.stage.clone(),
        contact_id: changes.contact_id.clone(),
        probability: changes.probability,
        expected_close_date: changes.expected_close_date,
        notes: changes.notes.clone(),
    }
}
