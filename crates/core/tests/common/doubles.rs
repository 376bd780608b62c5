//! Recording doubles for the frame, the deal store and the status callback.

use pb_core::bridge::StatusCallback;
use pb_core::store::{Deal, DealPatch, DealStore, MemoryDealStore, StoreResult};
use pb_core::transport::{MessageTarget, RemoteFrame, TransportError, TransportResult};
use pb_protocol::envelope::{Envelope, MessageType};
use pb_protocol::status_models::ConnectionStatus;
use std::sync::{Arc, Mutex};

/// How the frame answers `install_runtime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum InstallBehavior {
    Accept,
    CrossOrigin,
}

/// Frame double that records every call.
pub struct RecordingFrame {
    install: InstallBehavior,
    posts: Mutex<Vec<(Envelope, String)>>,
    reloads: Mutex<usize>,
    installs: Mutex<usize>,
}

#[allow(dead_code)]
impl RecordingFrame {
    pub fn new(install: InstallBehavior) -> Arc<Self> {
        Arc::new(Self {
            install,
            posts: Mutex::new(Vec::new()),
            reloads: Mutex::new(0),
            installs: Mutex::new(0),
        })
    }

    pub fn posts(&self) -> Vec<(Envelope, String)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn posted(&self, kind: MessageType) -> Vec<Envelope> {
        self.posts()
            .into_iter()
            .filter(|(envelope, _)| envelope.kind == kind)
            .map(|(envelope, _)| envelope)
            .collect()
    }

    pub fn kinds(&self) -> Vec<MessageType> {
        self.posts().into_iter().map(|(e, _)| e.kind).collect()
    }

    pub fn reloads(&self) -> usize {
        *self.reloads.lock().unwrap()
    }

    pub fn installs(&self) -> usize {
        *self.installs.lock().unwrap()
    }
}

impl MessageTarget for RecordingFrame {
    fn post_message(&self, envelope: &Envelope, target_origin: &str) -> TransportResult<()> {
        self.posts
            .lock()
            .unwrap()
            .push((envelope.clone(), target_origin.to_string()));
        Ok(())
    }
}

impl RemoteFrame for RecordingFrame {
    fn reload(&self) -> TransportResult<()> {
        *self.reloads.lock().unwrap() += 1;
        Ok(())
    }

    fn install_runtime(&self) -> TransportResult<()> {
        *self.installs.lock().unwrap() += 1;
        match self.install {
            InstallBehavior::Accept => Ok(()),
            InstallBehavior::CrossOrigin => Err(TransportError::CrossOriginBlocked(
                "https://pipeline.example.com".to_string(),
            )),
        }
    }
}

/// One call made against the store.
#[derive(Debug, Clone, PartialEq)]
#[allow(dead_code)]
pub enum StoreCall {
    Add(String),
    Update(String, DealPatch),
    Delete(String),
}

/// Deal store that records mutating calls and delegates to memory.
pub struct RecordingStore {
    inner: MemoryDealStore,
    calls: Mutex<Vec<StoreCall>>,
}

#[allow(dead_code)]
impl RecordingStore {
    pub fn new(deals: Vec<Deal>) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryDealStore::with_deals(deals),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn deal(&self, id: &str) -> Option<Deal> {
        self.inner.get_deal(id).unwrap()
    }
}

impl DealStore for RecordingStore {
    fn add_deal(&self, deal: Deal) -> StoreResult<Deal> {
        self.calls.lock().unwrap().push(StoreCall::Add(deal.id.clone()));
        self.inner.add_deal(deal)
    }

    fn update_deal(&self, id: &str, patch: DealPatch) -> StoreResult<Deal> {
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::Update(id.to_string(), patch.clone()));
        self.inner.update_deal(id, patch)
    }

    fn delete_deal(&self, id: &str) -> StoreResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::Delete(id.to_string()));
        self.inner.delete_deal(id)
    }

    fn fetch_deals(&self) -> StoreResult<Vec<Deal>> {
        self.inner.fetch_deals()
    }

    fn get_deal(&self, id: &str) -> StoreResult<Option<Deal>> {
        self.inner.get_deal(id)
    }
}

/// Collects every status snapshot pushed by the controller.
#[derive(Clone, Default)]
pub struct StatusLog {
    seen: Arc<Mutex<Vec<ConnectionStatus>>>,
}

#[allow(dead_code)]
impl StatusLog {
    pub fn callback(&self) -> StatusCallback {
        let seen = Arc::clone(&self.seen);
        Arc::new(move |status: &ConnectionStatus| {
            seen.lock().unwrap().push(status.clone());
        })
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<ConnectionStatus> {
        self.seen.lock().unwrap().last().cloned()
    }

    pub fn all(&self) -> Vec<ConnectionStatus> {
        self.seen.lock().unwrap().clone()
    }
}
