// In-memory transport — paired links over process-local callbacks
//
// Used by tests and demos. Links from transports sharing one hub pair up:
// the offer/answer descriptions carry the link id, and the connection
// completes when the offerer applies the answer, mirroring a real
// offer/answer handshake without a network underneath.

use super::{
    CandidateHandler, ChannelConfig, ChannelHandler, DataChannel, EventHandler, IceCandidate,
    LinkState, MessageHandler, PeerLink, SdpKind, SessionDescription, StateHandler, Transport,
    TransportError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

type SharedCandidateHandler = Arc<dyn Fn(IceCandidate) + Send + Sync>;
type SharedChannelHandler = Arc<dyn Fn(Arc<dyn DataChannel>) + Send + Sync>;
type SharedStateHandler = Arc<dyn Fn(LinkState) + Send + Sync>;
type SharedMessageHandler = Arc<dyn Fn(String) + Send + Sync>;
type SharedEventHandler = Arc<dyn Fn() + Send + Sync>;

/// One end of a paired in-memory channel
pub struct MemoryChannel {
    label: String,
    open: AtomicBool,
    peer: Mutex<Option<Weak<MemoryChannel>>>,
    on_message: Mutex<Option<SharedMessageHandler>>,
    on_open: Mutex<Option<SharedEventHandler>>,
    on_close: Mutex<Option<SharedEventHandler>>,
}

impl MemoryChannel {
    fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            peer: Mutex::new(None),
            on_message: Mutex::new(None),
            on_open: Mutex::new(None),
            on_close: Mutex::new(None),
        })
    }

    fn wire(a: &Arc<Self>, b: &Arc<Self>) {
        *a.peer.lock() = Some(Arc::downgrade(b));
        *b.peer.lock() = Some(Arc::downgrade(a));
    }

    fn mark_open(&self) {
        if !self.open.swap(true, Ordering::SeqCst) {
            let handler = self.on_open.lock().clone();
            if let Some(h) = handler {
                h();
            }
        }
    }

    fn deliver(&self, data: String) {
        let handler = self.on_message.lock().clone();
        if let Some(h) = handler {
            h(data);
        }
    }

    fn close_internal(&self, notify_peer: bool) {
        if self.open.swap(false, Ordering::SeqCst) {
            let handler = self.on_close.lock().clone();
            if let Some(h) = handler {
                h();
            }
            if notify_peer {
                let peer = self.peer.lock().as_ref().and_then(Weak::upgrade);
                if let Some(peer) = peer {
                    peer.close_internal(false);
                }
            }
        }
        *self.on_message.lock() = None;
        *self.on_open.lock() = None;
        *self.on_close.lock() = None;
    }
}

impl DataChannel for MemoryChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, data: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        let peer = self
            .peer
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(TransportError::ChannelClosed)?;
        peer.deliver(data.to_string());
        Ok(())
    }

    fn set_on_message(&self, handler: MessageHandler) {
        *self.on_message.lock() = Some(Arc::from(handler));
    }

    fn set_on_open(&self, handler: EventHandler) {
        *self.on_open.lock() = Some(Arc::from(handler));
    }

    fn set_on_close(&self, handler: EventHandler) {
        *self.on_close.lock() = Some(Arc::from(handler));
    }

    fn close(&self) {
        self.close_internal(true);
    }
}

/// One in-memory connection attempt
pub struct MemoryLink {
    id: String,
    this: Weak<MemoryLink>,
    hub: Weak<MemoryTransportHub>,
    state: Mutex<LinkState>,
    remote: Mutex<Option<Weak<MemoryLink>>>,
    channels: Mutex<Vec<Arc<MemoryChannel>>>,
    on_candidate: Mutex<Option<SharedCandidateHandler>>,
    on_channel: Mutex<Option<SharedChannelHandler>>,
    on_state: Mutex<Option<SharedStateHandler>>,
}

impl MemoryLink {
    fn set_state(&self, next: LinkState) {
        {
            let mut state = self.state.lock();
            if *state == next {
                return;
            }
            *state = next;
        }
        let handler = self.on_state.lock().clone();
        if let Some(h) = handler {
            h(next);
        }
    }

    fn emit_candidate(&self) {
        let candidate = IceCandidate {
            candidate: format!("memory:{}", self.id),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        };
        let handler = self.on_candidate.lock().clone();
        if let Some(h) = handler {
            h(candidate);
        }
    }

    /// Finish the handshake: both ends connected, offerer-created channels
    /// surfaced and opened on the remote side
    fn establish_with(&self, remote: &Arc<MemoryLink>) {
        *self.remote.lock() = Some(Arc::downgrade(remote));
        *remote.remote.lock() = Some(self.this.clone());
        self.set_state(LinkState::Connected);
        remote.set_state(LinkState::Connected);

        let local_channels: Vec<_> = self.channels.lock().clone();
        for channel in local_channels {
            let far = MemoryChannel::new(&channel.label());
            MemoryChannel::wire(&channel, &far);
            remote.channels.lock().push(far.clone());
            let handler = remote.on_channel.lock().clone();
            if let Some(h) = handler {
                h(far.clone() as Arc<dyn DataChannel>);
            }
            channel.mark_open();
            far.mark_open();
        }
    }
}

#[async_trait]
impl PeerLink for MemoryLink {
    fn create_channel(
        &self,
        config: &ChannelConfig,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let channel = MemoryChannel::new(&config.label);
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.set_state(LinkState::Connecting);
        self.emit_candidate();
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: self.id.clone(),
        })
    }

    async fn accept_offer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        let hub = self
            .hub
            .upgrade()
            .ok_or_else(|| TransportError::Link("transport hub gone".to_string()))?;
        hub.find(&offer.sdp)
            .ok_or_else(|| TransportError::BadDescription(offer.sdp.clone()))?;
        self.set_state(LinkState::Connecting);
        self.emit_candidate();
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: self.id.clone(),
        })
    }

    async fn accept_answer(&self, answer: &SessionDescription) -> Result<(), TransportError> {
        let hub = self
            .hub
            .upgrade()
            .ok_or_else(|| TransportError::Link("transport hub gone".to_string()))?;
        let remote = hub
            .find(&answer.sdp)
            .ok_or_else(|| TransportError::BadDescription(answer.sdp.clone()))?;
        self.establish_with(&remote);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        // nothing to traverse in-process
        debug!("memory link {} accepted candidate {}", self.id, candidate.candidate);
        Ok(())
    }

    fn set_on_ice_candidate(&self, handler: CandidateHandler) {
        *self.on_candidate.lock() = Some(Arc::from(handler));
    }

    fn set_on_channel(&self, handler: ChannelHandler) {
        *self.on_channel.lock() = Some(Arc::from(handler));
    }

    fn set_on_state_change(&self, handler: StateHandler) {
        *self.on_state.lock() = Some(Arc::from(handler));
    }

    fn state(&self) -> LinkState {
        *self.state.lock()
    }

    fn close(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.set_state(LinkState::Closed);

        let channels: Vec<_> = std::mem::take(&mut *self.channels.lock());
        for channel in channels {
            channel.close_internal(true);
        }

        let remote = self.remote.lock().as_ref().and_then(Weak::upgrade);
        if let Some(remote) = remote {
            if !remote.state().is_terminal() {
                remote.set_state(LinkState::Disconnected);
            }
        }

        *self.on_candidate.lock() = None;
        *self.on_channel.lock() = None;
        *self.on_state.lock() = None;

        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(&self.id);
        }
    }
}

/// Shared registry pairing links by id
pub struct MemoryTransportHub {
    links: Mutex<HashMap<String, Weak<MemoryLink>>>,
}

impl MemoryTransportHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            links: Mutex::new(HashMap::new()),
        })
    }

    /// A transport handle minting links that pair through this hub
    pub fn transport(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::new(MemoryTransport { hub: self.clone() })
    }

    fn register(&self, link: &Arc<MemoryLink>) {
        self.links
            .lock()
            .insert(link.id.clone(), Arc::downgrade(link));
    }

    fn find(&self, id: &str) -> Option<Arc<MemoryLink>> {
        self.links.lock().get(id).and_then(Weak::upgrade)
    }

    fn unregister(&self, id: &str) {
        self.links.lock().remove(id);
    }
}

struct MemoryTransport {
    hub: Arc<MemoryTransportHub>,
}

impl Transport for MemoryTransport {
    fn new_link(&self) -> Result<Arc<dyn PeerLink>, TransportError> {
        let link = Arc::new_cyclic(|this| MemoryLink {
            id: uuid::Uuid::new_v4().to_string(),
            this: this.clone(),
            hub: Arc::downgrade(&self.hub),
            state: Mutex::new(LinkState::New),
            remote: Mutex::new(None),
            channels: Mutex::new(Vec::new()),
            on_candidate: Mutex::new(None),
            on_channel: Mutex::new(None),
            on_state: Mutex::new(None),
        });
        self.hub.register(&link);
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    async fn handshake(
        hub: &Arc<MemoryTransportHub>,
    ) -> (Arc<dyn PeerLink>, Arc<dyn PeerLink>, Arc<dyn DataChannel>) {
        let transport = hub.transport();
        let offerer = transport.new_link().unwrap();
        let answerer = transport.new_link().unwrap();

        let channel = offerer.create_channel(&ChannelConfig::default()).unwrap();
        let offer = offerer.create_offer().await.unwrap();
        let answer = answerer.accept_offer(&offer).await.unwrap();
        offerer.accept_answer(&answer).await.unwrap();

        (offerer, answerer, channel)
    }

    #[tokio::test]
    async fn test_handshake_connects_both_ends() {
        let hub = MemoryTransportHub::new();
        let (offerer, answerer, channel) = handshake(&hub).await;

        assert_eq!(offerer.state(), LinkState::Connected);
        assert_eq!(answerer.state(), LinkState::Connected);
        assert!(channel.is_open());
    }

    #[tokio::test]
    async fn test_inbound_channel_surfaces_at_answerer() {
        let hub = MemoryTransportHub::new();
        let transport = hub.transport();
        let offerer = transport.new_link().unwrap();
        let answerer = transport.new_link().unwrap();

        let seen: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        answerer.set_on_channel(Box::new(move |ch| {
            seen_clone.lock().unwrap().push(ch.label());
        }));

        let _channel = offerer.create_channel(&ChannelConfig::default()).unwrap();
        let offer = offerer.create_offer().await.unwrap();
        let answer = answerer.accept_offer(&offer).await.unwrap();
        offerer.accept_answer(&answer).await.unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), ["mesh".to_string()]);
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let hub = MemoryTransportHub::new();
        let transport = hub.transport();
        let offerer = transport.new_link().unwrap();
        let answerer = transport.new_link().unwrap();

        let far_end: Arc<StdMutex<Option<Arc<dyn DataChannel>>>> =
            Arc::new(StdMutex::new(None));
        let far_clone = far_end.clone();
        let received_far: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_far_clone = received_far.clone();
        answerer.set_on_channel(Box::new(move |ch| {
            let rx = received_far_clone.clone();
            ch.set_on_message(Box::new(move |data| rx.lock().unwrap().push(data)));
            *far_clone.lock().unwrap() = Some(ch);
        }));

        let near = offerer.create_channel(&ChannelConfig::default()).unwrap();
        let received_near: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_near_clone = received_near.clone();
        near.set_on_message(Box::new(move |data| {
            received_near_clone.lock().unwrap().push(data)
        }));

        let offer = offerer.create_offer().await.unwrap();
        let answer = answerer.accept_offer(&offer).await.unwrap();
        offerer.accept_answer(&answer).await.unwrap();

        near.send("ping").unwrap();
        let far = far_end.lock().unwrap().clone().unwrap();
        far.send("pong").unwrap();

        assert_eq!(received_far.lock().unwrap().as_slice(), ["ping".to_string()]);
        assert_eq!(received_near.lock().unwrap().as_slice(), ["pong".to_string()]);
    }

    #[tokio::test]
    async fn test_send_on_unopened_channel_fails() {
        let hub = MemoryTransportHub::new();
        let transport = hub.transport();
        let link = transport.new_link().unwrap();
        let channel = link.create_channel(&ChannelConfig::default()).unwrap();

        assert!(matches!(
            channel.send("too early"),
            Err(TransportError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_disconnects_remote() {
        let hub = MemoryTransportHub::new();
        let (offerer, answerer, channel) = handshake(&hub).await;

        offerer.close();
        assert_eq!(offerer.state(), LinkState::Closed);
        assert_eq!(answerer.state(), LinkState::Disconnected);
        assert!(!channel.is_open());
        assert!(channel.send("late").is_err());
    }

    #[tokio::test]
    async fn test_unknown_offer_is_rejected() {
        let hub = MemoryTransportHub::new();
        let transport = hub.transport();
        let answerer = transport.new_link().unwrap();

        let bogus = SessionDescription {
            kind: SdpKind::Offer,
            sdp: "no-such-link".to_string(),
        };
        assert!(matches!(
            answerer.accept_offer(&bogus).await,
            Err(TransportError::BadDescription(_))
        ));
    }

    #[tokio::test]
    async fn test_candidates_emitted_during_handshake() {
        let hub = MemoryTransportHub::new();
        let transport = hub.transport();
        let offerer = transport.new_link().unwrap();

        let candidates: Arc<StdMutex<Vec<IceCandidate>>> = Arc::new(StdMutex::new(Vec::new()));
        let candidates_clone = candidates.clone();
        offerer.set_on_ice_candidate(Box::new(move |c| {
            candidates_clone.lock().unwrap().push(c);
        }));

        let _ = offerer.create_offer().await.unwrap();
        assert_eq!(candidates.lock().unwrap().len(), 1);
    }
}
