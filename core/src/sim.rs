// Scripted simulation engine — the mesh contract without a mesh
//
// Fabricates peers and traffic on a fixed timetable. Satisfies the same
// `MeshService` contract as the relay engine, so demos and harnesses run
// unchanged when no signaling service is reachable. The schedule is plain
// configuration; nothing here is part of the protocol.

use crate::engine::{EngineError, Lifecycle, MeshDelegate, MeshService};
use crate::identity::SessionIdentity;
use crate::message::{MeshMessage, MessageType};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Timetable for the simulation
#[derive(Debug, Clone)]
pub struct SimScript {
    /// When fabricated peers come online, relative to start
    pub peer_arrivals: Vec<Duration>,
    /// When fabricated peers drop off, relative to start
    pub peer_departures: Vec<Duration>,
    /// When a fabricated remote SOS arrives, if at all
    pub sos_at: Option<Duration>,
    /// Position and floor carried by the fabricated SOS
    pub sos_position: (f64, f64, i32),
    /// How long after a local send the fabricated acknowledgment arrives
    pub ack_delay: Duration,
}

impl Default for SimScript {
    fn default() -> Self {
        Self {
            peer_arrivals: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
            ],
            peer_departures: vec![],
            sos_at: Some(Duration::from_secs(5)),
            sos_position: (37.7793, -122.4193, 2),
            ack_delay: Duration::from_millis(400),
        }
    }
}

type Delegates = Arc<RwLock<Vec<Arc<dyn MeshDelegate>>>>;

fn dispatch(delegates: &Delegates, f: impl Fn(&dyn MeshDelegate)) {
    for delegate in delegates.read().iter() {
        f(delegate.as_ref());
    }
}

pub struct ScriptedEngine {
    script: SimScript,
    identity: SessionIdentity,
    delegates: Delegates,
    peer_count: Arc<AtomicUsize>,
    lifecycle: Mutex<Lifecycle>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    stop_rx: Mutex<Option<watch::Receiver<bool>>>,
}

impl ScriptedEngine {
    pub fn new(script: SimScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            identity: SessionIdentity::generate(),
            delegates: Arc::new(RwLock::new(Vec::new())),
            peer_count: Arc::new(AtomicUsize::new(0)),
            lifecycle: Mutex::new(Lifecycle::Idle),
            stop_tx: Mutex::new(None),
            stop_rx: Mutex::new(None),
        })
    }

    /// Run `action` after `delay` unless the engine stops first
    fn after(&self, delay: Duration, action: impl FnOnce() + Send + 'static) {
        let Some(mut stop) = self.stop_rx.lock().clone() else {
            return;
        };
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.changed() => {}
                _ = tokio::time::sleep(delay) => action(),
            }
        });
    }

    fn schedule_ack(&self, msg_id: &str) {
        let delegates = self.delegates.clone();
        let acked = msg_id.to_string();
        self.after(self.script.ack_delay, move || {
            dispatch(&delegates, |d| d.on_ack(&acked));
        });
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        match *self.lifecycle.lock() {
            Lifecycle::Running => Ok(()),
            _ => Err(EngineError::NotRunning),
        }
    }
}

#[async_trait]
impl MeshService for ScriptedEngine {
    async fn start(&self) -> Result<(), EngineError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Idle => *lifecycle = Lifecycle::Running,
                Lifecycle::Running => return Err(EngineError::AlreadyRunning),
                Lifecycle::Stopped => return Err(EngineError::NotRunning),
            }
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock() = Some(stop_tx);
        *self.stop_rx.lock() = Some(stop_rx);
        info!("scripted engine starting as {}", self.identity.id());

        for (index, at) in self.script.peer_arrivals.iter().enumerate() {
            let count = self.peer_count.clone();
            let delegates = self.delegates.clone();
            self.after(*at, move || {
                let now = count.fetch_add(1, Ordering::SeqCst) + 1;
                info!("fabricated peer {} online ({now} active)", index + 1);
                dispatch(&delegates, |d| d.on_peer_change(now));
            });
        }

        for at in self.script.peer_departures.iter() {
            let count = self.peer_count.clone();
            let delegates = self.delegates.clone();
            self.after(*at, move || {
                let previous = count
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                        Some(c.saturating_sub(1))
                    })
                    .unwrap_or(0);
                let now = previous.saturating_sub(1);
                info!("fabricated peer offline ({now} active)");
                dispatch(&delegates, |d| d.on_peer_change(now));
            });
        }

        if let Some(at) = self.script.sos_at {
            let (lat, lng, floor) = self.script.sos_position;
            let delegates = self.delegates.clone();
            self.after(at, move || {
                let message = MeshMessage::sos("sim-peer-1", lat, lng, floor);
                info!("fabricated SOS {} arriving", message.msg_id);
                dispatch(&delegates, |d| d.on_message(&message));
                dispatch(&delegates, |d| d.on_sos(&message));
            });
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
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(true);
        }
        *self.stop_rx.lock() = None;
        info!("scripted engine stopped");
    }

    fn send_sos(&self, lat: f64, lng: f64, floor: i32) -> Result<String, EngineError> {
        self.ensure_running()?;
        let message = MeshMessage::sos(self.identity.id(), lat, lng, floor);
        self.schedule_ack(&message.msg_id);
        Ok(message.msg_id)
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
        self.schedule_ack(&message.msg_id);
        Ok(message.msg_id)
    }

    fn active_peer_count(&self) -> usize {
        self.peer_count.load(Ordering::SeqCst)
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
    use std::sync::Mutex as StdMutex;
    use tokio::time::sleep;

    #[derive(Default)]
    struct Recorder {
        peer_counts: StdMutex<Vec<usize>>,
        messages: StdMutex<Vec<MeshMessage>>,
        sos: StdMutex<Vec<MeshMessage>>,
        acks: StdMutex<Vec<String>>,
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

    fn fast_script() -> SimScript {
        SimScript {
            peer_arrivals: vec![Duration::from_millis(20), Duration::from_millis(40)],
            peer_departures: vec![Duration::from_millis(80)],
            sos_at: Some(Duration::from_millis(60)),
            sos_position: (1.5, 2.5, 4),
            ack_delay: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_scripted_peers_and_sos() {
        let engine = ScriptedEngine::new(fast_script());
        let recorder = Arc::new(Recorder::default());
        engine.add_delegate(recorder.clone());
        engine.start().await.unwrap();

        sleep(Duration::from_millis(200)).await;

        assert_eq!(engine.active_peer_count(), 1); // 2 arrivals, 1 departure
        assert_eq!(
            recorder.peer_counts.lock().unwrap().as_slice(),
            [1, 2, 1]
        );

        let sos = recorder.sos.lock().unwrap();
        assert_eq!(sos.len(), 1);
        let position = sos[0].sos_position().unwrap();
        assert_eq!(position.lat, 1.5);
        assert_eq!(sos[0].floor, 4);
        assert_eq!(recorder.messages.lock().unwrap().len(), 1);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_send_is_acknowledged_on_schedule() {
        let engine = ScriptedEngine::new(fast_script());
        let recorder = Arc::new(Recorder::default());
        engine.add_delegate(recorder.clone());
        engine.start().await.unwrap();

        let msg_id = engine.send_sos(9.0, 8.0, 0).unwrap();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(recorder.acks.lock().unwrap().as_slice(), [msg_id]);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_future_events() {
        let engine = ScriptedEngine::new(fast_script());
        let recorder = Arc::new(Recorder::default());
        engine.add_delegate(recorder.clone());
        engine.start().await.unwrap();
        engine.stop().await;

        sleep(Duration::from_millis(150)).await;
        assert!(recorder.peer_counts.lock().unwrap().is_empty());
        assert!(recorder.sos.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_contract_guards_match_real_engine() {
        let engine = ScriptedEngine::new(SimScript::default());
        assert!(matches!(
            engine.send_sos(0.0, 0.0, 0),
            Err(EngineError::NotRunning)
        ));

        engine.start().await.unwrap();
        assert!(matches!(engine.start().await, Err(EngineError::AlreadyRunning)));

        let result = engine.send_message(MessageType::Location, "p".to_string(), 0, 0);
        assert!(matches!(result, Err(EngineError::InvalidMessage(_))));

        engine.stop().await;
        assert!(matches!(engine.start().await, Err(EngineError::NotRunning)));
    }
}
