//! Compression Channel
//!
//! Background compress/decompress bridge. Calls are request/response RPCs:
//! each call gets a random correlation id, registers a oneshot resolver in a
//! [`PendingTable`], posts `{action, data, id}` through a [`Transport`], and
//! is completed when a reply carrying the same id arrives. Concurrent calls
//! never wait on each other beyond the transport's own queue.
//!
//! ```text
//!  compress(v) ──▶ PendingTable.insert(id) ──▶ Transport.post({action,data,id})
//!                                                      │
//!        ◀── oneshot ◀── PendingTable.resolve(id) ◀────┘ worker thread / inline
//! ```
//!
//! Failures never reach the cache: a failed compress stores the value as-is,
//! and a transport that stops accepting requests degrades the channel to the
//! in-process identity path for the rest of its life.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::compression::{CompressionConfig, Encoded, PayloadCodec};
use crate::error::{Error, Result};

/// Requested operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Compress,
    Decompress,
}

/// Message posted to a transport: `{action, data, compression?, id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub action: Action,
    #[serde(flatten)]
    pub payload: Encoded,
    pub id: Uuid,
}

/// Reply matched back to its caller by `id`
#[derive(Debug)]
pub struct WorkerReply {
    pub id: Uuid,
    pub result: Result<Encoded>,
}

// =============================================================================
// Pending Table
// =============================================================================

/// Outstanding calls keyed by correlation id
#[derive(Default)]
pub struct PendingTable {
    waiting: Mutex<HashMap<Uuid, oneshot::Sender<Result<Encoded>>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and get its receiver
    pub fn register(&self, id: Uuid) -> oneshot::Receiver<Result<Encoded>> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().insert(id, tx);
        rx
    }

    /// Complete the call for `reply.id`; unknown ids are dropped
    pub fn resolve(&self, reply: WorkerReply) -> bool {
        let sender = self.waiting.lock().remove(&reply.id);
        match sender {
            Some(tx) => tx.send(reply.result).is_ok(),
            None => {
                debug!("Dropping reply for unknown correlation id {}", reply.id);
                false
            }
        }
    }

    /// Forget a call that will never be answered
    pub fn cancel(&self, id: &Uuid) {
        self.waiting.lock().remove(id);
    }

    /// Number of calls awaiting a reply
    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Transports
// =============================================================================

/// Delivers requests to whatever executes them
pub trait Transport: Send + Sync {
    /// Queue a request; its reply must eventually reach the pending table
    fn post(&self, request: WorkerRequest) -> Result<()>;
}

fn handle(codec: &PayloadCodec, request: WorkerRequest) -> WorkerReply {
    let WorkerRequest { action, payload, id } = request;
    let result = match action {
        Action::Compress if payload.is_compressed() => Ok(payload),
        Action::Compress => Ok(codec.encode(payload.data)),
        Action::Decompress => codec.decode(payload).map(Encoded::plain),
    };
    WorkerReply { id, result }
}

/// Answers on the caller's thread without compressing
///
/// Compress is an identity; decompress still unpacks payloads written by an
/// earlier, compressing channel.
pub struct InlineTransport {
    codec: PayloadCodec,
    pending: Arc<PendingTable>,
}

impl InlineTransport {
    pub fn new(pending: Arc<PendingTable>) -> Self {
        Self {
            codec: PayloadCodec::new(),
            pending,
        }
    }
}

impl Transport for InlineTransport {
    fn post(&self, request: WorkerRequest) -> Result<()> {
        let reply = match request.action {
            Action::Compress => WorkerReply {
                id: request.id,
                result: Ok(request.payload),
            },
            Action::Decompress => handle(&self.codec, request),
        };
        self.pending.resolve(reply);
        Ok(())
    }
}

/// Runs the codec on a dedicated thread fed by an unbounded queue
pub struct WorkerTransport {
    tx: mpsc::UnboundedSender<WorkerRequest>,
}

impl WorkerTransport {
    /// Start the worker thread; it exits once the transport is dropped
    pub fn spawn(config: CompressionConfig, pending: Arc<PendingTable>) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerRequest>();
        let codec = PayloadCodec::with_config(config);

        // Codec work stays off the async runtime
        thread::Builder::new()
            .name("haven-compression".into())
            .spawn(move || {
                while let Some(request) = rx.blocking_recv() {
                    let id = request.id;
                    let reply = catch_unwind(AssertUnwindSafe(|| handle(&codec, request)))
                        .unwrap_or_else(|_| WorkerReply {
                            id,
                            result: Err(Error::Internal("compression worker panicked".into())),
                        });
                    pending.resolve(reply);
                }
                debug!("Compression worker exiting");
            })?;

        Ok(Self { tx })
    }
}

impl Transport for WorkerTransport {
    fn post(&self, request: WorkerRequest) -> Result<()> {
        self.tx
            .send(request)
            .map_err(|_| Error::ChannelClosed("compression worker is gone".into()))
    }
}

/// Request/response client over a transport
pub struct RpcClient {
    transport: Box<dyn Transport>,
    pending: Arc<PendingTable>,
}

impl RpcClient {
    pub fn new(transport: Box<dyn Transport>, pending: Arc<PendingTable>) -> Self {
        Self { transport, pending }
    }

    /// Post `action` and wait for its correlated reply
    pub async fn call(&self, action: Action, payload: Encoded) -> Result<Encoded> {
        let id = Uuid::new_v4();
        let rx = self.pending.register(id);

        if let Err(e) = self.transport.post(WorkerRequest { action, payload, id }) {
            self.pending.cancel(&id);
            return Err(e);
        }

        rx.await
            .map_err(|_| Error::ChannelClosed(format!("reply for {} was dropped", id)))?
    }

    /// Calls awaiting replies
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

// =============================================================================
// Compression Channel
// =============================================================================

/// Compress/decompress bridge used by the engine
pub struct CompressionChannel {
    rpc: RpcClient,
    /// Identity path used once the primary transport has failed
    fallback: RpcClient,
    degraded: AtomicBool,
    background: bool,
}

impl CompressionChannel {
    /// Compressing channel on a background worker; degrades to identity if
    /// the worker cannot be started
    pub fn spawn(config: CompressionConfig) -> Self {
        let pending = Arc::new(PendingTable::new());
        match WorkerTransport::spawn(config, pending.clone()) {
            Ok(worker) => {
                info!("Compression worker started");
                Self {
                    rpc: RpcClient::new(Box::new(worker), pending),
                    fallback: Self::identity_client(),
                    degraded: AtomicBool::new(false),
                    background: true,
                }
            }
            Err(e) => {
                warn!("Compression worker unavailable, storing uncompressed: {}", e);
                let channel = Self::identity();
                channel.degraded.store(true, Ordering::Relaxed);
                channel
            }
        }
    }

    /// Pass-through channel used when compression is disabled
    pub fn identity() -> Self {
        Self {
            rpc: Self::identity_client(),
            fallback: Self::identity_client(),
            degraded: AtomicBool::new(false),
            background: false,
        }
    }

    /// Channel over a caller-supplied transport
    pub fn with_transport(transport: Box<dyn Transport>, pending: Arc<PendingTable>) -> Self {
        Self {
            rpc: RpcClient::new(transport, pending),
            fallback: Self::identity_client(),
            degraded: AtomicBool::new(false),
            background: true,
        }
    }

    fn identity_client() -> RpcClient {
        let pending = Arc::new(PendingTable::new());
        let transport = InlineTransport::new(pending.clone());
        RpcClient::new(Box::new(transport), pending)
    }

    /// True once the primary transport has failed
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// True when a worker thread does the encoding
    pub fn is_background(&self) -> bool {
        self.background && !self.is_degraded()
    }

    fn active(&self) -> &RpcClient {
        if self.is_degraded() {
            &self.fallback
        } else {
            &self.rpc
        }
    }

    fn degrade(&self, e: &Error) {
        if matches!(e, Error::ChannelClosed(_)) && !self.degraded.swap(true, Ordering::Relaxed) {
            warn!("Compression channel degraded to identity: {}", e);
        }
    }

    /// Compress a value; any failure keeps it plain
    pub async fn compress(&self, data: Value) -> Encoded {
        match self.active().call(Action::Compress, Encoded::plain(data.clone())).await {
            Ok(packed) => packed,
            Err(e) => {
                self.degrade(&e);
                warn!("Compression failed, storing uncompressed: {}", e);
                Encoded::plain(data)
            }
        }
    }

    /// Recover a stored value; plain payloads return without a round trip
    /// and undecodable ones come back as stored
    pub async fn decompress(&self, payload: Encoded) -> Value {
        if !payload.is_compressed() {
            return payload.data;
        }
        match self.active().call(Action::Decompress, payload.clone()).await {
            Ok(value) => value.data,
            Err(e) => {
                self.degrade(&e);
                if self.is_degraded() {
                    if let Ok(value) = self.fallback.call(Action::Decompress, payload.clone()).await {
                        return value.data;
                    }
                }
                warn!("Decompression failed, returning stored payload: {}", e);
                payload.data
            }
        }
    }
}

impl std::fmt::Debug for CompressionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionChannel")
            .field("background", &self.background)
            .field("degraded", &self.is_degraded())
            .field("in_flight", &self.rpc.in_flight())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn large_value(seed: usize) -> Value {
        json!({
            "seed": seed,
            "text": "I am safe. I am supported. I can ask for help. ".repeat(50),
        })
    }

    /// Transport that refuses every request
    struct ClosedTransport;

    impl Transport for ClosedTransport {
        fn post(&self, _request: WorkerRequest) -> Result<()> {
            Err(Error::ChannelClosed("closed".into()))
        }
    }

    /// Transport that accepts requests and never answers
    struct BlackHoleTransport;

    impl Transport for BlackHoleTransport {
        fn post(&self, _request: WorkerRequest) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let id = Uuid::nil();
        let request = WorkerRequest {
            action: Action::Compress,
            payload: Encoded::plain(json!(1)),
            id,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, json!({"action": "compress", "data": 1, "id": id.to_string()}));

        let parsed: WorkerRequest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.payload, Encoded::plain(json!(1)));
    }

    #[test]
    fn test_pending_table_resolve_by_id() {
        let table = PendingTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = table.register(a);
        let mut rx_b = table.register(b);
        assert_eq!(table.len(), 2);

        let reply = |id, value| WorkerReply {
            id,
            result: Ok(Encoded::plain(value)),
        };
        assert!(table.resolve(reply(b, json!("b"))));
        assert!(!table.resolve(reply(Uuid::new_v4(), json!("?"))));

        assert_eq!(rx_b.try_recv().unwrap().unwrap().data, json!("b"));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_worker_roundtrip() {
        let channel = CompressionChannel::spawn(CompressionConfig::default());
        assert!(channel.is_background());

        let value = large_value(1);
        let packed = channel.compress(value.clone()).await;
        assert!(packed.is_compressed());

        assert_eq!(channel.decompress(packed).await, value);
    }

    #[tokio::test]
    async fn test_worker_keeps_lookalike_values_plain() {
        let channel = CompressionChannel::spawn(CompressionConfig::default());
        let value = json!({"__compressed": "none", "payload": "MQ=="});

        let packed = channel.compress(value.clone()).await;
        assert!(!packed.is_compressed());
        assert_eq!(channel.decompress(packed).await, value);
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_correlated() {
        let channel = Arc::new(CompressionChannel::spawn(CompressionConfig::default()));

        let calls = (0..16).map(|seed| {
            let channel = channel.clone();
            async move {
                let value = large_value(seed);
                let packed = channel.compress(value.clone()).await;
                (value, channel.decompress(packed).await)
            }
        });

        for (sent, received) in futures::future::join_all(calls).await {
            assert_eq!(sent, received);
        }
        assert_eq!(channel.rpc.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_identity_channel() {
        let channel = CompressionChannel::identity();
        let value = large_value(2);
        let packed = channel.compress(value.clone()).await;
        assert_eq!(packed, Encoded::plain(value.clone()));
        assert_eq!(channel.decompress(packed).await, value);
    }

    #[tokio::test]
    async fn test_identity_still_unpacks_old_payloads() {
        let packed = PayloadCodec::new().encode(large_value(3));
        assert!(packed.is_compressed());
        let channel = CompressionChannel::identity();
        assert_eq!(channel.decompress(packed).await, large_value(3));
    }

    #[tokio::test]
    async fn test_closed_transport_degrades_to_identity() {
        let channel = CompressionChannel::with_transport(
            Box::new(ClosedTransport),
            Arc::new(PendingTable::new()),
        );
        let value = large_value(4);

        assert_eq!(channel.compress(value.clone()).await, Encoded::plain(value.clone()));
        assert!(channel.is_degraded());

        // Degraded channel still reads compressed payloads
        let packed = PayloadCodec::new().encode(value.clone());
        assert_eq!(channel.decompress(packed).await, value);
    }

    #[tokio::test]
    async fn test_dropped_reply_does_not_fail_the_call() {
        let pending = Arc::new(PendingTable::new());
        let channel = CompressionChannel::with_transport(Box::new(BlackHoleTransport), pending.clone());
        let value = json!({"k": "v"});

        let call = channel.compress(value.clone());
        tokio::pin!(call);

        // Let the call register, then drop its resolver as a dying worker would
        assert!(futures::poll!(call.as_mut()).is_pending());
        assert_eq!(pending.len(), 1);
        pending.waiting.lock().clear();

        assert_eq!(call.await, Encoded::plain(value));
        assert!(channel.is_degraded());
    }

    #[tokio::test]
    async fn test_rpc_call_over_worker_transport() {
        let pending = Arc::new(PendingTable::new());
        let worker = WorkerTransport::spawn(CompressionConfig::default(), pending.clone()).unwrap();
        let rpc = RpcClient::new(Box::new(worker), pending);

        let packed = rpc.call(Action::Compress, Encoded::plain(large_value(5))).await.unwrap();
        assert!(packed.is_compressed());
        assert_eq!(rpc.in_flight(), 0);
    }
}
