//! Durable list of authorized dapp sessions.
//!
//! Persisted as one JSON array under a fixed key:
//! `[{ "clientId": "...", "sessionDetails": { "peerMeta": {..}, .. }, "uri": "wc:.." }]`.
//! The list holds at most one entry per distinct `PeerMeta`; insertion
//! order is preserved.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use wc_core::{DappSession, PeerMeta};

use crate::error::StoreError;
use crate::kv::KeyValueStore;

pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    // Every write is a read-modify-write of the whole list.
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// All sessions, in the order they were first stored.
    #[instrument(skip(self), fields(key = %self.key))]
    pub fn list(&self) -> Result<Vec<DappSession>, StoreError> {
        match self.kv.get(&self.key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn find(&self, peer_meta: &PeerMeta) -> Result<Option<DappSession>, StoreError> {
        Ok(self.list()?.into_iter().find(|s| s.is_for(peer_meta)))
    }

    /// Replace the entry for this session's dapp, or append a new one.
    #[instrument(skip(self, session), fields(dapp = %session.peer_meta().label(), client_id = %session.client_id))]
    pub fn upsert(&self, session: DappSession) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut sessions = self.list()?;

        match sessions.iter().position(|s| s.is_for(session.peer_meta())) {
            Some(index) => {
                debug!(index, "replacing stored dapp session");
                sessions[index] = session;
            }
            None => {
                debug!("appending dapp session");
                sessions.push(session);
            }
        }

        self.write(&sessions)
    }

    /// Drop every entry for this dapp. Absent dapps leave the list untouched.
    #[instrument(skip(self, peer_meta), fields(dapp = %peer_meta.label()))]
    pub fn remove(&self, peer_meta: &PeerMeta) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut sessions = self.list()?;
        let before = sessions.len();
        sessions.retain(|s| !s.is_for(peer_meta));

        if sessions.len() == before {
            debug!("no stored session for dapp");
            return Ok(());
        }
        self.write(&sessions)
    }

    fn write(&self, sessions: &[DappSession]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(sessions)?;
        self.kv.set(&self.key, &raw)
    }
}
