//! Call State Registry (C6): the single point of truth for active calls.
//!
//! Holds one `CallRecord` per live call plus two secondary indexes. There is
//! at most one active call per process, so a single registry-wide lock is
//! coarse but sufficient — see the shared-resource policy in the design
//! notes. Other components never hold a `CallRecord` mutably; they look it
//! up, read a snapshot, or ask the registry to mutate it by `callId`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

/// Who produced a line in a call's transcript log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Agent,
    User,
}

/// One active call. Cloned out of the registry as an immutable snapshot;
/// mutations always go back through `CallRegistry`.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub call_id: String,
    pub carrier_call_id: Option<String>,
    pub user_number: String,
    pub start_time: Instant,
    pub transcript: Vec<(Speaker, String)>,
    pub hung_up: bool,
    pub stream_sid: Option<String>,
    pub streaming_ready: bool,
}

impl CallRecord {
    fn new(call_id: String, user_number: String) -> Self {
        Self {
            call_id,
            carrier_call_id: None,
            user_number,
            start_time: Instant::now(),
            transcript: Vec::new(),
            hung_up: false,
            stream_sid: None,
            streaming_ready: false,
        }
    }
}

struct Inner {
    by_call_id: HashMap<String, CallRecord>,
    by_carrier_id: HashMap<String, String>,
    by_channel: HashMap<String, String>,
    next_id: u64,
}

/// In-memory registry of active calls. There is at most one entry at a
/// time (the single-active-call rule is enforced by the orchestrator, not
/// here — the registry itself would happily hold more than one record).
#[derive(Clone)]
pub struct CallRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                by_call_id: HashMap::new(),
                by_carrier_id: HashMap::new(),
                by_channel: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Number of currently active calls, for `/health`.
    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.by_call_id.len()
    }

    /// Create and register a new call record. Call-id format is
    /// `call-<counter>-<unix-seconds>`.
    pub async fn create(&self, user_number: String) -> CallRecord {
        let mut inner = self.inner.lock().await;
        let counter = inner.next_id;
        inner.next_id += 1;
        let seconds = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let call_id = format!("call-{counter}-{seconds}");
        let record = CallRecord::new(call_id.clone(), user_number);
        tracing::info!(call_id = %call_id, "call record created");
        inner.by_call_id.insert(call_id, record.clone());
        record
    }

    pub async fn get(&self, call_id: &str) -> Option<CallRecord> {
        self.inner.lock().await.by_call_id.get(call_id).cloned()
    }

    pub async fn get_by_carrier_id(&self, carrier_call_id: &str) -> Option<CallRecord> {
        let inner = self.inner.lock().await;
        let call_id = inner.by_carrier_id.get(carrier_call_id)?;
        inner.by_call_id.get(call_id).cloned()
    }

    pub async fn get_by_channel(&self, channel: &str) -> Option<CallRecord> {
        let inner = self.inner.lock().await;
        let call_id = inner.by_channel.get(channel)?;
        inner.by_call_id.get(call_id).cloned()
    }

    /// Associate the carrier-assigned call id with our call-id, once it's
    /// known (returned from `CarrierDriver::initiate`).
    pub async fn set_carrier_call_id(&self, call_id: &str, carrier_call_id: String) {
        let mut inner = self.inner.lock().await;
        inner
            .by_carrier_id
            .insert(carrier_call_id.clone(), call_id.to_string());
        if let Some(record) = inner.by_call_id.get_mut(call_id) {
            record.carrier_call_id = Some(carrier_call_id);
        }
    }

    /// Bind a newly opened media-WS channel (identified by its mint token)
    /// to a call. Token minting happens in the orchestrator at `initiate`.
    pub async fn bind_channel(&self, channel: String, call_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.by_channel.insert(channel, call_id.to_string());
    }

    pub async fn set_stream_sid(&self, call_id: &str, stream_sid: String) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.by_call_id.get_mut(call_id) {
            record.stream_sid = Some(stream_sid);
        }
    }

    pub async fn set_streaming_ready(&self, call_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.by_call_id.get_mut(call_id) {
            record.streaming_ready = true;
        }
    }

    /// Flip `hungUp`. Monotonic: once true, a second call is a no-op.
    pub async fn mark_hung_up(&self, call_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.by_call_id.get_mut(call_id) {
            if !record.hung_up {
                record.hung_up = true;
                tracing::info!(call_id = %call_id, "call marked hung up");
            }
        }
    }

    pub async fn append_transcript(&self, call_id: &str, speaker: Speaker, text: String) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.by_call_id.get_mut(call_id) {
            record.transcript.push((speaker, text));
        }
    }

    /// Remove a call record and its index entries. Called by `end` and by
    /// fatal-error cleanup during `initiate`.
    pub async fn remove(&self, call_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.by_call_id.remove(call_id) {
            if let Some(carrier_id) = record.carrier_call_id {
                inner.by_carrier_id.remove(&carrier_id);
            }
            inner.by_channel.retain(|_, v| v != call_id);
            tracing::info!(call_id = %call_id, "call record removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_assigns_sequential_ids() {
        let registry = CallRegistry::new();
        let a = registry.create("+15559876543".into()).await;
        let b = registry.create("+15551234567".into()).await;
        assert!(a.call_id.starts_with("call-0-"));
        assert!(b.call_id.starts_with("call-1-"));
    }

    #[tokio::test]
    async fn carrier_id_index_resolves_back_to_record() {
        let registry = CallRegistry::new();
        let record = registry.create("+15559876543".into()).await;
        registry
            .set_carrier_call_id(&record.call_id, "carrier-xyz".into())
            .await;
        let found = registry.get_by_carrier_id("carrier-xyz").await.unwrap();
        assert_eq!(found.call_id, record.call_id);
    }

    #[tokio::test]
    async fn hung_up_is_monotonic() {
        let registry = CallRegistry::new();
        let record = registry.create("+15559876543".into()).await;
        registry.mark_hung_up(&record.call_id).await;
        registry.mark_hung_up(&record.call_id).await;
        let found = registry.get(&record.call_id).await.unwrap();
        assert!(found.hung_up);
    }

    #[tokio::test]
    async fn remove_clears_all_indexes() {
        let registry = CallRegistry::new();
        let record = registry.create("+15559876543".into()).await;
        registry
            .set_carrier_call_id(&record.call_id, "carrier-xyz".into())
            .await;
        registry.bind_channel("token-1".into(), &record.call_id).await;
        registry.remove(&record.call_id).await;
        assert!(registry.get(&record.call_id).await.is_none());
        assert!(registry.get_by_carrier_id("carrier-xyz").await.is_none());
        assert!(registry.get_by_channel("token-1").await.is_none());
        assert_eq!(registry.active_count().await, 0);
    }
}
