//! The bridge runtime living in the remote document.
//!
//! Host mutations may arrive duplicated or out of order, so the runtime
//! keeps the same per-field clock and tombstones as the host's reconciler
//! and only applies what is newer than the board already shows.

use super::{post_to_host, send_to_host, RuntimeError, RuntimeResult};
use crate::reconcile::{DealClock, DealField};
use crate::transport::MessageTarget;
use chrono::{DateTime, Utc};
use pb_protocol::deal_models::{DealChanges, PipelineDeal, PipelineStage};
use pb_protocol::envelope::{Envelope, Source};
use pb_protocol::messages::{
    ConnectionFailure, CrmInfo, CrmInit, DealRef, DealUpdate, InitAck, Message, NavigateRequest,
    StageChange, SyncDeals,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Notifications for the remote UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// The handshake snapshot arrived.
    Initialized {
        crm_info: CrmInfo,
        deals: Vec<PipelineDeal>,
        stages: Vec<PipelineStage>,
    },
    /// The host replaced the deal list.
    Synced { deals: Vec<PipelineDeal> },
    /// A host-side mutation was applied to the local board.
    DealChanged(Message),
    /// The host reported a failure.
    HostError(String),
}

/// Keep only `fields` of `changes`. `updatedAt` rides along with any kept
/// field.
fn retain_fields(changes: &DealChanges, fields: &[DealField]) -> DealChanges {
    let keep = |field: DealField| fields.contains(&field);
    DealChanges {
        title: changes.title.clone().filter(|_| keep(DealField::Title)),
        value: changes.value.filter(|_| keep(DealField::Value)),
        stage: changes.stage.clone().filter(|_| keep(DealField::Stage)),
        contact_id: changes.contact_id.clone().filter(|_| keep(DealField::Contact)),
        contact_name: changes.contact_name.clone().filter(|_| keep(DealField::Contact)),
        company: changes.company.clone().filter(|_| keep(DealField::Contact)),
        probability: changes.probability.filter(|_| keep(DealField::Probability)),
        expected_close_date: changes
            .expected_close_date
            .filter(|_| keep(DealField::ExpectedCloseDate)),
        notes: changes.notes.clone().filter(|_| keep(DealField::Notes)),
        updated_at: changes.updated_at.filter(|_| !fields.is_empty()),
    }
}

/// Remote copy of the board plus the outbound half of the protocol.
pub struct BridgeRuntime {
    parent: Arc<dyn MessageTarget>,
    host_origin: String,
    crm_info: Option<CrmInfo>,
    deals: Vec<PipelineDeal>,
    stages: Vec<PipelineStage>,
    clocks: HashMap<String, DealClock>,
    events: mpsc::UnboundedSender<RuntimeEvent>,
}

impl BridgeRuntime {
    pub fn new(
        parent: Arc<dyn MessageTarget>,
        host_origin: impl Into<String>,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Self {
        Self {
            parent,
            host_origin: host_origin.into(),
            crm_info: None,
            deals: Vec::new(),
            stages: Vec::new(),
            clocks: HashMap::new(),
            events,
        }
    }

    fn send(&self, message: Message) -> RuntimeResult<()> {
        debug!(kind = %message.kind(), "runtime sending");
        send_to_host(self.parent.as_ref(), &self.host_origin, message)
    }

    /// Send a local edit stamped with the time it was made on the board.
    fn send_at(&self, message: Message, at: DateTime<Utc>) -> RuntimeResult<()> {
        debug!(kind = %message.kind(), "runtime sending");
        let envelope = message.into_envelope_at(Source::Remote, at.timestamp_millis())?;
        post_to_host(self.parent.as_ref(), &self.host_origin, &envelope)
    }

    fn emit(&self, event: RuntimeEvent) {
        // A closed receiver means nobody renders the board; not an error.
        if self.events.send(event).is_err() {
            debug!("runtime event dropped, no subscriber");
        }
    }

    /// Send `BRIDGE_READY`.
    pub fn announce(&self) -> RuntimeResult<()> {
        self.send(Message::BridgeReady)
    }

    pub fn is_initialized(&self) -> bool {
        self.crm_info.is_some()
    }

    pub fn crm_info(&self) -> Option<&CrmInfo> {
        self.crm_info.as_ref()
    }

    pub fn deals(&self) -> &[PipelineDeal] {
        &self.deals
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    fn position(&self, deal_id: &str) -> RuntimeResult<usize> {
        self.deals
            .iter()
            .position(|deal| deal.id == deal_id)
            .ok_or_else(|| RuntimeError::UnknownDeal(deal_id.to_string()))
    }

    fn check_stage(&self, stage: &str) -> RuntimeResult<()> {
        if self.stages.is_empty() || self.stages.iter().any(|s| s.id == stage) {
            Ok(())
        } else {
            Err(RuntimeError::UnknownStage(stage.to_string()))
        }
    }

    fn record(&mut self, deal_id: &str, fields: &[DealField], timestamp: i64) {
        self.clocks
            .entry(deal_id.to_string())
            .or_default()
            .record(fields, timestamp);
    }

    /// Replace the board with a host snapshot.
    ///
    /// Clocks of deals in the snapshot start over; tombstones of deals that
    /// are not in it are kept.
    fn replace_deals(&mut self, deals: Vec<PipelineDeal>) {
        for deal in &deals {
            self.clocks.remove(&deal.id);
        }
        self.deals = deals;
    }

    /// Apply a host `DEAL_CREATED`. Returns whether the board changed.
    fn create_from_host(&mut self, deal: &PipelineDeal, timestamp: i64) -> bool {
        let clock = self.clocks.get(&deal.id);
        if DealClock::deleted_since(clock, timestamp) {
            debug!(deal_id = %deal.id, timestamp, "create is older than its deletion");
            return false;
        }

        let fields = match self.deals.iter().position(|existing| existing.id == deal.id) {
            Some(index) => {
                // Duplicate or echoed create: only newer fields are written.
                let changes = deal.as_changes();
                let fields =
                    DealClock::newer_fields(clock, |field| field.is_changed_in(&changes), timestamp);
                if fields.is_empty() {
                    return false;
                }
                self.deals[index].apply_changes(&retain_fields(&changes, &fields));
                fields
            }
            None => {
                self.deals.push(deal.clone());
                DealField::ALL.to_vec()
            }
        };

        let clock = self.clocks.entry(deal.id.clone()).or_default();
        clock.record(&fields, timestamp);
        clock.clear_tombstone();
        true
    }

    /// Apply host field changes. Returns whether the board changed.
    fn change_from_host(
        &mut self,
        deal_id: &str,
        changes: &DealChanges,
        timestamp: i64,
    ) -> RuntimeResult<bool> {
        let clock = self.clocks.get(deal_id);
        if DealClock::deleted_since(clock, timestamp) {
            debug!(deal_id, timestamp, "change is older than the deal's deletion");
            return Ok(false);
        }
        let fields = DealClock::newer_fields(clock, |field| field.is_changed_in(changes), timestamp);
        if fields.is_empty() {
            debug!(deal_id, timestamp, "change is not newer than the board");
            return Ok(false);
        }

        let index = self.position(deal_id)?;
        self.deals[index].apply_changes(&retain_fields(changes, &fields));
        self.record(deal_id, &fields, timestamp);
        Ok(true)
    }

    /// Apply a host `DEAL_DELETED`. Returns whether the board changed.
    fn delete_from_host(&mut self, deal_id: &str, timestamp: i64) -> RuntimeResult<bool> {
        let clock = self.clocks.get(deal_id);
        if DealClock::deleted_since(clock, timestamp) || DealClock::superseded(clock, timestamp) {
            debug!(deal_id, timestamp, "delete is not newer than the board");
            return Ok(false);
        }

        // Tombstoned even when the deal never reached this board.
        self.clocks
            .entry(deal_id.to_string())
            .or_default()
            .mark_deleted(timestamp);
        let index = self.position(deal_id)?;
        self.deals.remove(index);
        Ok(true)
    }

    /// Apply a message the document accepted from the host.
    ///
    /// Deal mutations that are not newer than what the board shows are
    /// dropped without an event.
    pub fn handle(&mut self, envelope: &Envelope, message: Message) -> RuntimeResult<()> {
        let timestamp = envelope.timestamp;
        let applied = match message {
            Message::CrmInit(CrmInit {
                crm_info,
                pipeline_data,
            }) => {
                let ack = InitAck {
                    deals_received: pipeline_data.deals.len(),
                    stages_received: pipeline_data.stages.len(),
                };
                info!(
                    deals = ack.deals_received,
                    stages = ack.stages_received,
                    crm = %crm_info.name,
                    "received CRM_INIT"
                );
                self.crm_info = Some(crm_info.clone());
                self.replace_deals(pipeline_data.deals);
                self.stages = pipeline_data.stages;
                self.emit(RuntimeEvent::Initialized {
                    crm_info,
                    deals: self.deals.clone(),
                    stages: self.stages.clone(),
                });
                return self.send(Message::CrmInitComplete(ack));
            }
            Message::SyncDeals(SyncDeals { deals }) => {
                debug!(deals = deals.len(), "received SYNC_DEALS");
                self.replace_deals(deals);
                self.emit(RuntimeEvent::Synced {
                    deals: self.deals.clone(),
                });
                return Ok(());
            }
            Message::ConnectionError(ConnectionFailure { error }) => {
                warn!(%error, "host reported an error");
                self.emit(RuntimeEvent::HostError(error));
                return Ok(());
            }
            Message::DealCreated(ref deal) => self.create_from_host(deal, timestamp),
            Message::DealUpdated(ref update) => {
                self.change_from_host(&update.deal_id, &update.changes, timestamp)?
            }
            Message::DealStageChanged(ref change) => {
                let changes = DealChanges {
                    stage: Some(change.new_stage.clone()),
                    ..DealChanges::default()
                };
                self.change_from_host(&change.deal_id, &changes, timestamp)?
            }
            Message::DealDeleted(ref deleted) => self.delete_from_host(&deleted.deal_id, timestamp)?,
            other => {
                debug!(kind = %other.kind(), timestamp, "runtime ignoring message");
                return Ok(());
            }
        };

        if applied {
            self.emit(RuntimeEvent::DealChanged(message));
        }
        Ok(())
    }

    /// Create a deal on the board and announce it.
    pub fn create_deal(
        &mut self,
        title: impl Into<String>,
        value: f64,
        stage: impl Into<String>,
    ) -> RuntimeResult<PipelineDeal> {
        let stage = stage.into();
        self.check_stage(&stage)?;

        let mut deal = PipelineDeal::new(Uuid::new_v4().to_string(), title, value, stage);
        let now = Utc::now();
        deal.created_at = Some(now);
        deal.updated_at = Some(now);

        self.deals.push(deal.clone());
        self.record(&deal.id, &DealField::ALL, now.timestamp_millis());
        self.send_at(Message::DealCreated(deal.clone()), now)?;
        Ok(deal)
    }

    /// Edit fields of a deal and announce the change.
    pub fn update_deal(&mut self, deal_id: &str, changes: DealChanges) -> RuntimeResult<()> {
        if let Some(stage) = &changes.stage {
            self.check_stage(stage)?;
        }
        let index = self.position(deal_id)?;
        let now = Utc::now();
        let deal = &mut self.deals[index];
        deal.apply_changes(&changes);
        deal.updated_at = Some(now);

        let fields: Vec<DealField> = DealField::ALL
            .into_iter()
            .filter(|field| field.is_changed_in(&changes))
            .collect();
        self.record(deal_id, &fields, now.timestamp_millis());

        let update = DealUpdate {
            deal_id: deal_id.to_string(),
            changes,
        };
        self.send_at(Message::DealUpdated(update), now)
    }

    /// Drag a deal to another column.
    pub fn move_deal(&mut self, deal_id: &str, new_stage: &str) -> RuntimeResult<()> {
        self.check_stage(new_stage)?;
        let index = self.position(deal_id)?;
        let now = Utc::now();
        let deal = &mut self.deals[index];
        let old_stage = std::mem::replace(&mut deal.stage, new_stage.to_string());
        deal.updated_at = Some(now);
        self.record(deal_id, &[DealField::Stage], now.timestamp_millis());

        let change = StageChange {
            deal_id: deal_id.to_string(),
            new_stage: new_stage.to_string(),
            old_stage: Some(old_stage),
        };
        self.send_at(Message::DealStageChanged(change), now)
    }

    pub fn delete_deal(&mut self, deal_id: &str) -> RuntimeResult<()> {
        let index = self.position(deal_id)?;
        let now = Utc::now();
        self.deals.remove(index);
        self.clocks
            .entry(deal_id.to_string())
            .or_default()
            .mark_deleted(now.timestamp_millis());

        let deleted = DealRef {
            deal_id: deal_id.to_string(),
        };
        self.send_at(Message::DealDeleted(deleted), now)
    }

    pub fn request_pipeline_data(&self) -> RuntimeResult<()> {
        self.send(Message::RequestPipelineData)
    }

    pub fn navigate(&self, route: impl Into<String>) -> RuntimeResult<()> {
        self.send(Message::Navigate(NavigateRequest {
            route: route.into(),
        }))
    }

    pub fn report_error(&self, error: impl Into<String>) -> RuntimeResult<()> {
        self.send(Message::ConnectionError(ConnectionFailure {
            error: error.into(),
        }))
    }
}
