// Relay engine — send path, receive pipeline, flood control
//
// The only component application code talks to. Flooding is bounded by the
// triad: hop-count ttl, dedup by message id, and priority-weighted jittered
// retransmission. The peer graph is a full mesh, so cycles exist by
// construction; nothing here tracks topology.

use crate::identity::SessionIdentity;
use crate::message::{codec, MeshMessage, MessageType};
use crate::signaling::{SignalingClient, SignalingEvent};
use crate::store::MessageLedger;
use crate::transport::manager::{PeerEvent, PeerManager, PeerManagerConfig};
use crate::transport::Transport;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("Engine already running")]
    AlreadyRunning,
    #[error("Engine is not running")]
    NotRunning,
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Encoding failed: {0}")]
    Encoding(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Room announced through the signaling relay
    pub room_id: String,
    /// Ledger location; None runs without durable dedup
    pub store_path: Option<String>,
    /// Records older than this are swept, delivered or not
    pub retention: Duration,
    /// How often the expiry sweep runs
    pub sweep_interval: Duration,
    pub manager: PeerManagerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            room_id: "haven".to_string(),
            store_path: None,
            retention: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            manager: PeerManagerConfig::default(),
        }
    }
}

/// Notifications out of the engine. Dispatch is synchronous and in
/// registration order for every notification kind.
pub trait MeshDelegate: Send + Sync {
    /// The number of peers with an open channel changed
    fn on_peer_change(&self, count: usize);
    /// A new (never before seen) message arrived
    fn on_message(&self, message: &MeshMessage);
    /// That message was an SOS
    fn on_sos(&self, message: &MeshMessage);
    /// Some peer acknowledged a message with this id
    fn on_ack(&self, msg_id: &str);
}

/// The public engine contract. The scripted simulation engine satisfies the
/// same trait, so harnesses and demos can swap it in for the real thing.
#[async_trait]
pub trait MeshService: Send + Sync {
    async fn start(&self) -> Result<(), EngineError>;
    async fn stop(&self);
    fn send_sos(&self, lat: f64, lng: f64, floor: i32) -> Result<String, EngineError>;
    fn send_message(
        &self,
        kind: MessageType,
        payload: String,
        priority: u8,
        floor: i32,
    ) -> Result<String, EngineError>;
    fn active_peer_count(&self) -> usize;
    fn local_sender_id(&self) -> String;
    fn add_delegate(&self, delegate: Arc<dyn MeshDelegate>);
}

/// Jitter window in millis for a relay at the given priority. Urgent
/// messages draw from a short, tight window and propagate fast; low-priority
/// ones spread over a longer, wider window to thin out rebroadcast bursts.
pub fn relay_window(priority: u8) -> (u64, u64) {
    let factor = f64::from(11 - u32::from(priority.clamp(1, 10))) / 10.0;
    let min = 100.0 + factor * 100.0;
    let max = 150.0 + factor * 250.0;
    (min as u64, max as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub struct RelayEngine {
    this: Weak<RelayEngine>,
    config: EngineConfig,
    identity: SessionIdentity,
    manager: Arc<PeerManager>,
    ledger: Arc<MessageLedger>,
    delegates: RwLock<Vec<Arc<dyn MeshDelegate>>>,
    lifecycle: Mutex<Lifecycle>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    stop_rx: Mutex<Option<watch::Receiver<bool>>>,
    signal_rx: Mutex<Option<mpsc::UnboundedReceiver<SignalingEvent>>>,
    peer_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
}

impl RelayEngine {
    /// Build an engine over the given transport and signaling client.
    /// `signal_rx` is the event subscription the signaling constructor
    /// returned. A missing persistent store is tolerated: the engine runs
    /// with in-session dedup only.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        signaling: Arc<dyn SignalingClient>,
        signal_rx: mpsc::UnboundedReceiver<SignalingEvent>,
    ) -> Arc<Self> {
        let identity = SessionIdentity::generate();
        let ledger = match &config.store_path {
            Some(path) => MessageLedger::open(path).unwrap_or_else(|e| {
                warn!("durable dedup unavailable ({e}), continuing in memory");
                MessageLedger::in_memory()
            }),
            None => MessageLedger::in_memory(),
        };
        let (manager, peer_rx) = PeerManager::new(
            identity.id().to_string(),
            transport,
            signaling,
            config.manager.clone(),
        );
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            identity,
            manager,
            ledger: Arc::new(ledger),
            delegates: RwLock::new(Vec::new()),
            lifecycle: Mutex::new(Lifecycle::Idle),
            stop_tx: Mutex::new(None),
            stop_rx: Mutex::new(None),
            signal_rx: Mutex::new(Some(signal_rx)),
            peer_rx: Mutex::new(Some(peer_rx)),
        })
    }

    fn dispatch(&self, f: impl Fn(&dyn MeshDelegate)) {
        for delegate in self.delegates.read().iter() {
            f(delegate.as_ref());
        }
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        match *self.lifecycle.lock() {
            Lifecycle::Running => Ok(()),
            _ => Err(EngineError::NotRunning),
        }
    }

    /// Broadcast a freshly constructed message and record our own copy, so
    /// dedup and forward bookkeeping treat it like any relayed message.
    fn transmit(&self, message: MeshMessage) -> Result<String, EngineError> {
        let frame = codec::encode(&message).map_err(|e| EngineError::Encoding(e.to_string()))?;
        self.manager.broadcast(&frame, None);
        // acknowledgments are never ledgered, not even our own
        if message.kind != MessageType::Ack {
            if let Err(e) = self.ledger.insert(&message) {
                warn!("failed to record outbound {}: {e}", message.msg_id);
            }
        }
        debug!("sent {} ({:?}, priority {})", message.msg_id, message.kind, message.priority);
        Ok(message.msg_id)
    }

    /// The receive pipeline, run once per inbound frame
    async fn handle_inbound(&self, from_peer: String, raw: String) {
        // anything from the mesh is untrusted; unparseable frames vanish
        let Some(message) = codec::decode(&raw) else {
            debug!("dropping undecodable frame from {from_peer}");
            return;
        };

        // our own message looping back through the mesh
        if message.sender_id == self.identity.id() {
            return;
        }

        // well-formed but semantically invalid: never stored, emitted, or relayed
        if !message.is_valid() {
            debug!("dropping invalid message {} from {from_peer}", message.msg_id);
            return;
        }

        // acknowledgments update bookkeeping and stop here — never stored,
        // deduplicated against, or relayed
        if message.kind == MessageType::Ack {
            if let Some(ack_for) = message.ack_target() {
                if let Err(e) = self.ledger.mark_delivered(&ack_for) {
                    debug!("mark_delivered({ack_for}) failed: {e}");
                }
                self.dispatch(|d| d.on_ack(&ack_for));
            }
            return;
        }

        // dedup pre-check; cheap fast path
        match self.ledger.exists(&message.msg_id) {
            Ok(true) => {
                debug!("duplicate {} from {from_peer}", message.msg_id);
                return;
            }
            Ok(false) => {}
            Err(e) => {
                debug!("dedup lookup failed for {}: {e}", message.msg_id);
            }
        }

        // the insert is the authority: two channels delivering the same
        // message concurrently resolve here, and losing the race is the
        // same outcome as the pre-check
        match self.ledger.insert(&message) {
            Ok(true) => {}
            Ok(false) => {
                debug!("duplicate insert race for {}", message.msg_id);
                return;
            }
            Err(e) => {
                warn!("ledger insert failed for {}: {e}", message.msg_id);
                return;
            }
        }

        self.dispatch(|d| d.on_message(&message));
        if message.kind == MessageType::Sos {
            self.dispatch(|d| d.on_sos(&message));
        }

        // direct acknowledgment to the peer that delivered this copy
        let ack = MeshMessage::ack(self.identity.id(), &message.msg_id);
        match codec::encode(&ack) {
            Ok(frame) => self.manager.send_to(&from_peer, &frame),
            Err(e) => warn!("failed to encode ack for {}: {e}", message.msg_id),
        }

        // hop budget spent: processed fully, propagation stops here
        if message.ttl > 0 {
            self.schedule_relay(message, from_peer);
        }
    }

    /// Queue a jittered rebroadcast. Abandoned without side effect if the
    /// engine stops before the delay elapses.
    fn schedule_relay(&self, message: MeshMessage, from_peer: String) {
        let Some(mut stop) = self.stop_rx.lock().clone() else {
            return;
        };
        let (min, max) = relay_window(message.priority);
        let delay = rand::thread_rng().gen_range(min..max);
        let manager = self.manager.clone();
        let ledger = self.ledger.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.changed() => {
                    debug!("relay of {} abandoned", message.msg_id);
                }
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {
                    let relayed = message.decrement_ttl();
                    match codec::encode(&relayed) {
                        Ok(frame) => {
                            manager.broadcast(&frame, Some(&from_peer));
                            if let Err(e) = ledger.increment_forward_count(&message.msg_id) {
                                debug!("forward count update failed for {}: {e}", message.msg_id);
                            }
                            debug!(
                                "relayed {} after {delay}ms (ttl {} -> {})",
                                message.msg_id, message.ttl, relayed.ttl
                            );
                        }
                        Err(e) => warn!("failed to encode relay of {}: {e}", message.msg_id),
                    }
                }
            }
        });
    }

    async fn run_event_loop(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<PeerEvent>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                event = rx.recv() => match event {
                    Some(PeerEvent::Frame { from, data }) => self.handle_inbound(from, data).await,
                    Some(PeerEvent::PeerCountChanged { count }) => {
                        self.dispatch(|d| d.on_peer_change(count));
                    }
                    None => break,
                },
            }
        }
    }
}

#[async_trait]
impl MeshService for RelayEngine {
    async fn start(&self) -> Result<(), EngineError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Idle => *lifecycle = Lifecycle::Running,
                Lifecycle::Running => return Err(EngineError::AlreadyRunning),
                Lifecycle::Stopped => return Err(EngineError::NotRunning),
            }
        }
        info!(
            "relay engine starting as {} (durable dedup: {})",
            self.identity.id(),
            self.ledger.is_durable()
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock() = Some(stop_tx);
        *self.stop_rx.lock() = Some(stop_rx.clone());

        // signaling pump: one event at a time into the manager
        if let Some(mut rx) = self.signal_rx.lock().take() {
            let manager = self.manager.clone();
            let mut stop = stop_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = stop.changed() => break,
                        event = rx.recv() => match event {
                            Some(event) => manager.handle_signal(event).await,
                            None => break,
                        },
                    }
                }
            });
        }

        // engine event loop
        if let Some(rx) = self.peer_rx.lock().take() {
            if let Some(engine) = self.this.upgrade() {
                tokio::spawn(engine.run_event_loop(rx, stop_rx.clone()));
            }
        }

        // expiry sweep, independent of delivery or relay outcomes
        {
            let ledger = self.ledger.clone();
            let retention = self.config.retention;
            let mut interval = tokio::time::interval(self.config.sweep_interval);
            let mut stop = stop_rx;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = stop.changed() => break,
                        _ = interval.tick() => {
                            let cutoff = now_millis().saturating_sub(retention.as_millis() as u64);
                            match ledger.delete_expired(cutoff) {
                                Ok(removed) if removed > 0 => {
                                    info!("expiry sweep removed {removed} record(s)");
                                }
                                Ok(_) => {}
                                Err(e) => warn!("expiry sweep failed: {e}"),
                            }
                        }
                    }
                }
            });
        }

        if let Err(e) = self.manager.join_room(&self.config.room_id).await {
            warn!("failed to join room {}: {e}", self.config.room_id);
        }
        Ok(())
    }

    async fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != Lifecycle::Running {
                *lifecycle = Lifecycle::Stopped;
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }
        info!("relay engine stopping");
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(true);
        }
        *self.stop_rx.lock() = None;
        self.manager.destroy().await;
        self.ledger.close();
        info!("relay engine stopped");
    }

    fn send_sos(&self, lat: f64, lng: f64, floor: i32) -> Result<String, EngineError> {
        self.ensure_running()?;
        let message = MeshMessage::sos(self.identity.id(), lat, lng, floor);
        self.transmit(message)
    }

    fn send_message(
        &self,
        kind: MessageType,
        payload: String,
        priority: u8,
        floor: i32,
    ) -> Result<String, EngineError> {
        self.ensure_running()?;
        let message = MeshMessage::new(kind, self.identity.id(), payload)
            .with_priority(priority)
            .with_floor(floor);
        if !message.is_valid() {
            return Err(EngineError::InvalidMessage(format!(
                "priority {} / payload {} bytes",
                message.priority,
                message.payload.len()
            )));
        }
        self.transmit(message)
    }

    fn active_peer_count(&self) -> usize {
        self.manager.peer_count()
    }

    fn local_sender_id(&self) -> String {
        self.identity.id().to_string()
    }

    fn add_delegate(&self, delegate: Arc<dyn MeshDelegate>) {
        self.delegates.write().push(delegate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::memory::MemorySignalingHub;
    use crate::transport::memory::MemoryTransportHub;
    use std::sync::Mutex as StdMutex;
    use tokio::time::sleep;

    #[derive(Default)]
    struct Recorder {
        messages: StdMutex<Vec<MeshMessage>>,
        sos: StdMutex<Vec<MeshMessage>>,
        acks: StdMutex<Vec<String>>,
        peer_counts: StdMutex<Vec<usize>>,
    }

    impl MeshDelegate for Recorder {
        fn on_peer_change(&self, count: usize) {
            self.peer_counts.lock().unwrap().push(count);
        }
        fn on_message(&self, message: &MeshMessage) {
            self.messages.lock().unwrap().push(message.clone());
        }
        fn on_sos(&self, message: &MeshMessage) {
            self.sos.lock().unwrap().push(message.clone());
        }
        fn on_ack(&self, msg_id: &str) {
            self.acks.lock().unwrap().push(msg_id.to_string());
        }
    }

    struct Rig {
        transport_hub: Arc<MemoryTransportHub>,
        signaling_hub: Arc<MemorySignalingHub>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                transport_hub: MemoryTransportHub::new(),
                signaling_hub: MemorySignalingHub::new(),
            }
        }

        async fn engine(&self) -> (Arc<RelayEngine>, Arc<Recorder>) {
            let (signaling, signal_rx) = self.signaling_hub.client();
            let engine = RelayEngine::new(
                EngineConfig {
                    room_id: "test-room".to_string(),
                    ..Default::default()
                },
                self.transport_hub.transport(),
                signaling,
                signal_rx,
            );
            let recorder = Arc::new(Recorder::default());
            engine.add_delegate(recorder.clone());
            engine.start().await.unwrap();
            (engine, recorder)
        }
    }

    fn foreign_message(ttl: i32) -> MeshMessage {
        MeshMessage::sos("peer-someone-else", 48.85, 2.35, 1).with_ttl(ttl)
    }

    #[test]
    fn test_relay_window_formula() {
        // factor 0.1 for the most urgent, 1.0 for the least
        assert_eq!(relay_window(10), (110, 175));
        assert_eq!(relay_window(1), (200, 400));
        assert_eq!(relay_window(5), (160, 300));
        // out-of-range priorities clamp
        assert_eq!(relay_window(0), relay_window(1));
        assert_eq!(relay_window(255), relay_window(10));
    }

    #[test]
    fn test_relay_window_ordering() {
        // higher priority always means an earlier, tighter window
        for p in 2..=10u8 {
            let (lo_min, lo_max) = relay_window(p - 1);
            let (hi_min, hi_max) = relay_window(p);
            assert!(hi_min < lo_min);
            assert!(hi_max < lo_max);
        }
    }

    #[tokio::test]
    async fn test_duplicate_frame_processed_once() {
        let rig = Rig::new();
        let (engine, recorder) = rig.engine().await;

        let frame = codec::encode(&foreign_message(6)).unwrap();
        engine.handle_inbound("peer-x".to_string(), frame.clone()).await;
        engine.handle_inbound("peer-x".to_string(), frame).await;

        assert_eq!(recorder.messages.lock().unwrap().len(), 1);
        assert_eq!(recorder.sos.lock().unwrap().len(), 1);
        assert_eq!(engine.ledger.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_own_message_dropped() {
        let rig = Rig::new();
        let (engine, recorder) = rig.engine().await;

        let message = MeshMessage::sos(engine.local_sender_id(), 1.0, 2.0, 0);
        let frame = codec::encode(&message).unwrap();
        engine.handle_inbound("peer-x".to_string(), frame).await;

        assert!(recorder.messages.lock().unwrap().is_empty());
        assert_eq!(engine.ledger.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_frame_dropped_silently() {
        let rig = Rig::new();
        let (engine, recorder) = rig.engine().await;

        engine.handle_inbound("peer-x".to_string(), "{{not json".to_string()).await;
        engine.handle_inbound("peer-x".to_string(), "{}".to_string()).await;

        assert!(recorder.messages.lock().unwrap().is_empty());
        assert_eq!(engine.ledger.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_message_dropped() {
        let rig = Rig::new();
        let (engine, recorder) = rig.engine().await;

        let message = foreign_message(6).with_priority(11);
        let frame = codec::encode(&message).unwrap();
        engine.handle_inbound("peer-x".to_string(), frame).await;

        assert!(recorder.messages.lock().unwrap().is_empty());
        assert_eq!(engine.ledger.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ack_marks_delivered_and_is_never_stored() {
        let rig = Rig::new();
        let (engine, recorder) = rig.engine().await;

        let msg_id = engine.send_sos(1.0, 2.0, 0).unwrap();
        assert!(!engine.ledger.get(&msg_id).unwrap().unwrap().delivered);

        let ack = MeshMessage::ack("peer-someone-else", &msg_id);
        let frame = codec::encode(&ack).unwrap();
        engine.handle_inbound("peer-x".to_string(), frame).await;

        assert_eq!(recorder.acks.lock().unwrap().as_slice(), [msg_id.clone()]);
        assert!(engine.ledger.get(&msg_id).unwrap().unwrap().delivered);
        // the ack itself produced no record, no emission, no counter-ack
        assert_eq!(engine.ledger.len().unwrap(), 1);
        assert!(recorder.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ack_for_unknown_id_creates_nothing() {
        let rig = Rig::new();
        let (engine, recorder) = rig.engine().await;

        let ack = MeshMessage::ack("peer-someone-else", "never-seen");
        let frame = codec::encode(&ack).unwrap();
        engine.handle_inbound("peer-x".to_string(), frame).await;

        assert_eq!(recorder.acks.lock().unwrap().as_slice(), ["never-seen".to_string()]);
        assert_eq!(engine.ledger.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ttl_zero_is_emitted_but_never_relayed() {
        let rig = Rig::new();
        let (engine, recorder) = rig.engine().await;

        let message = foreign_message(0);
        let frame = codec::encode(&message).unwrap();
        engine.handle_inbound("peer-x".to_string(), frame).await;

        assert_eq!(recorder.messages.lock().unwrap().len(), 1);
        // past the widest jitter window: still no relay attempt recorded
        sleep(Duration::from_millis(500)).await;
        let record = engine.ledger.get(&message.msg_id).unwrap().unwrap();
        assert_eq!(record.forwarded_count, 0);
    }

    #[tokio::test]
    async fn test_relay_decrements_ttl_and_counts_forward() {
        let rig = Rig::new();
        let (a, _a_rec) = rig.engine().await;
        let (_b, b_rec) = rig.engine().await;
        sleep(Duration::from_millis(150)).await;
        assert_eq!(a.active_peer_count(), 1);

        // a copy arriving at A from a peer that is not B
        let message = foreign_message(6);
        let frame = codec::encode(&message).unwrap();
        a.handle_inbound("peer-ghost".to_string(), frame).await;

        // A's rebroadcast reaches B with one hop spent
        sleep(Duration::from_millis(600)).await;
        let received = b_rec.messages.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].ttl, 5);
        assert_eq!(received[0].msg_id, message.msg_id);

        let record = a.ledger.get(&message.msg_id).unwrap().unwrap();
        assert_eq!(record.forwarded_count, 1);
    }

    #[tokio::test]
    async fn test_stop_abandons_pending_relays() {
        let rig = Rig::new();
        let (engine, _recorder) = rig.engine().await;

        let message = foreign_message(6);
        let frame = codec::encode(&message).unwrap();
        engine.handle_inbound("peer-x".to_string(), frame).await;
        engine.stop().await;

        sleep(Duration::from_millis(500)).await;
        let record = engine.ledger.get(&message.msg_id).unwrap().unwrap();
        assert_eq!(record.forwarded_count, 0);
    }

    #[tokio::test]
    async fn test_send_message_rejects_invalid() {
        let rig = Rig::new();
        let (engine, _recorder) = rig.engine().await;

        let result = engine.send_message(MessageType::Location, "p".to_string(), 0, 0);
        assert!(matches!(result, Err(EngineError::InvalidMessage(_))));

        let oversized = "x".repeat(600);
        let result = engine.send_message(MessageType::Location, oversized, 5, 0);
        assert!(matches!(result, Err(EngineError::InvalidMessage(_))));
    }

    #[tokio::test]
    async fn test_lifecycle_guards() {
        let rig = Rig::new();
        let (engine, _recorder) = rig.engine().await;

        assert!(matches!(engine.start().await, Err(EngineError::AlreadyRunning)));

        engine.stop().await;
        engine.stop().await; // idempotent

        assert!(matches!(
            engine.send_sos(1.0, 2.0, 0),
            Err(EngineError::NotRunning)
        ));
        assert!(matches!(engine.start().await, Err(EngineError::NotRunning)));
    }

    #[tokio::test]
    async fn test_send_records_own_copy() {
        let rig = Rig::new();
        let (engine, _recorder) = rig.engine().await;

        let msg_id = engine.send_sos(10.0, 20.0, 3).unwrap();
        let record = engine.ledger.get(&msg_id).unwrap().unwrap();
        assert_eq!(record.kind, MessageType::Sos);
        assert_eq!(record.priority, 10);
        assert!(!record.delivered);
    }
}
