// Peer connection manager — handshake state machine and channel fan-out
//
// Owns every per-peer connection. Signaling events drive the offer/answer
// handshake; transport callbacks drive state. The rest of the system sees
// only inbound frames, the live peer count, and the two send primitives.

use super::{ChannelConfig, DataChannel, PeerLink, Transport};
use crate::signaling::{SignalMessage, SignalingClient, SignalingError, SignalingEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PeerManagerConfig {
    pub channel: ChannelConfig,
    /// Failed sends are retried exactly once after this delay, then dropped
    pub send_retry_delay: Duration,
}

impl Default for PeerManagerConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            send_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Which side of the handshake this peer is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Offerer,
    Answerer,
}

/// Lifecycle of one tracked peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Connecting(PeerRole),
    Connected,
    Closed,
}

struct Peer {
    link: Arc<dyn PeerLink>,
    channel: Option<Arc<dyn DataChannel>>,
    state: PeerState,
}

/// What the manager reports upward to the engine
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A frame arrived from an immediate peer
    Frame { from: String, data: String },
    /// The set of open channels changed
    PeerCountChanged { count: usize },
}

pub struct PeerManager {
    this: Weak<PeerManager>,
    local_id: String,
    config: PeerManagerConfig,
    transport: Arc<dyn Transport>,
    signaling: Arc<dyn SignalingClient>,
    peers: RwLock<HashMap<String, Peer>>,
    events: mpsc::UnboundedSender<PeerEvent>,
    destroyed: AtomicBool,
}

impl PeerManager {
    pub fn new(
        local_id: String,
        transport: Arc<dyn Transport>,
        signaling: Arc<dyn SignalingClient>,
        config: PeerManagerConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            local_id,
            config,
            transport,
            signaling,
            peers: RwLock::new(HashMap::new()),
            events,
            destroyed: AtomicBool::new(false),
        });
        (manager, rx)
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Announce local presence through the signaling relay
    pub async fn join_room(&self, room_id: &str) -> Result<(), SignalingError> {
        self.signaling.join_room(room_id, &self.local_id).await
    }

    /// React to one signaling event
    pub async fn handle_signal(&self, event: SignalingEvent) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        match event {
            SignalingEvent::PeerJoined { peer_id } => {
                if peer_id == self.local_id || self.peers.read().contains_key(&peer_id) {
                    debug!("ignoring join for already-tracked peer {peer_id}");
                    return;
                }
                self.connect_to(peer_id).await;
            }
            SignalingEvent::PeerLeft { peer_id } => {
                self.close_peer(&peer_id);
            }
            SignalingEvent::Signal { from, message } => match message {
                SignalMessage::Offer { sdp } => {
                    if self.peers.read().contains_key(&from) {
                        debug!("ignoring duplicate offer from {from}");
                        return;
                    }
                    self.accept_remote_offer(from, sdp).await;
                }
                SignalMessage::Answer { sdp } => {
                    let link = self.peers.read().get(&from).map(|p| p.link.clone());
                    match link {
                        Some(link) => {
                            if let Err(e) = link.accept_answer(&sdp).await {
                                // the connection simply never progresses
                                warn!("failed to apply answer from {from}: {e}");
                            }
                        }
                        None => debug!("answer from unknown peer {from}"),
                    }
                }
                SignalMessage::IceCandidate { candidate } => {
                    let link = self.peers.read().get(&from).map(|p| p.link.clone());
                    match link {
                        Some(link) => {
                            if let Err(e) = link.add_ice_candidate(&candidate).await {
                                warn!("failed to apply candidate from {from}: {e}");
                            }
                        }
                        None => debug!("candidate from unknown peer {from}"),
                    }
                }
            },
        }
    }

    /// Local side becomes the offerer for a newly announced peer
    async fn connect_to(&self, peer_id: String) {
        let link = match self.transport.new_link() {
            Ok(link) => link,
            Err(e) => {
                warn!("cannot create link for {peer_id}: {e}");
                return;
            }
        };
        self.install_link_handlers(&peer_id, &link);

        let channel = match link.create_channel(&self.config.channel) {
            Ok(channel) => channel,
            Err(e) => {
                warn!("cannot create channel for {peer_id}: {e}");
                link.close();
                return;
            }
        };
        self.install_channel_handlers(&peer_id, &channel);

        {
            let mut peers = self.peers.write();
            if peers.contains_key(&peer_id) {
                // lost a race with an inbound offer; exactly one connection
                // per peer id ever exists
                link.close();
                return;
            }
            peers.insert(
                peer_id.clone(),
                Peer {
                    link: link.clone(),
                    channel: Some(channel),
                    state: PeerState::Connecting(PeerRole::Offerer),
                },
            );
        }

        match link.create_offer().await {
            Ok(offer) => {
                if let Err(e) = self
                    .signaling
                    .send_to(&peer_id, SignalMessage::Offer { sdp: offer })
                    .await
                {
                    warn!("failed to send offer to {peer_id}: {e}");
                }
            }
            Err(e) => warn!("offer creation failed for {peer_id}: {e}"),
        }
    }

    /// Local side answers an inbound offer from an unseen peer
    async fn accept_remote_offer(&self, from: String, sdp: super::SessionDescription) {
        let link = match self.transport.new_link() {
            Ok(link) => link,
            Err(e) => {
                warn!("cannot create link for {from}: {e}");
                return;
            }
        };
        self.install_link_handlers(&from, &link);

        self.peers.write().insert(
            from.clone(),
            Peer {
                link: link.clone(),
                channel: None,
                state: PeerState::Connecting(PeerRole::Answerer),
            },
        );

        match link.accept_offer(&sdp).await {
            Ok(answer) => {
                if let Err(e) = self
                    .signaling
                    .send_to(&from, SignalMessage::Answer { sdp: answer })
                    .await
                {
                    warn!("failed to send answer to {from}: {e}");
                }
            }
            Err(e) => warn!("failed to apply offer from {from}: {e}"),
        }
    }

    fn install_link_handlers(&self, peer_id: &str, link: &Arc<dyn PeerLink>) {
        let Some(this) = self.this.upgrade() else {
            return;
        };

        // candidates flow back through the relay for the life of the attempt
        let signaling = self.signaling.clone();
        let target = peer_id.to_string();
        link.set_on_ice_candidate(Box::new(move |candidate| {
            let signaling = signaling.clone();
            let target = target.clone();
            tokio::spawn(async move {
                if let Err(e) = signaling
                    .send_to(&target, SignalMessage::IceCandidate { candidate })
                    .await
                {
                    debug!("failed to send candidate to {target}: {e}");
                }
            });
        }));

        // inbound channel on the answerer side
        let manager = this.clone();
        let owner = peer_id.to_string();
        link.set_on_channel(Box::new(move |channel| {
            manager.install_channel_handlers(&owner, &channel);
            if let Some(peer) = manager.peers.write().get_mut(&owner) {
                peer.channel = Some(channel);
            }
        }));

        let manager = this;
        let owner = peer_id.to_string();
        link.set_on_state_change(Box::new(move |state| {
            debug!("link to {owner} is {state}");
            if state.is_terminal() {
                manager.close_peer(&owner);
            }
        }));
    }

    fn install_channel_handlers(&self, peer_id: &str, channel: &Arc<dyn DataChannel>) {
        let Some(this) = self.this.upgrade() else {
            return;
        };

        let manager = this.clone();
        let owner = peer_id.to_string();
        channel.set_on_open(Box::new(move || {
            manager.mark_connected(&owner);
        }));

        let events = self.events.clone();
        let owner = peer_id.to_string();
        channel.set_on_message(Box::new(move |data| {
            let _ = events.send(PeerEvent::Frame {
                from: owner.clone(),
                data,
            });
        }));

        let manager = this;
        let owner = peer_id.to_string();
        channel.set_on_close(Box::new(move || {
            manager.close_peer(&owner);
        }));
    }

    fn mark_connected(&self, peer_id: &str) {
        {
            let mut peers = self.peers.write();
            match peers.get_mut(peer_id) {
                Some(peer) => peer.state = PeerState::Connected,
                None => return,
            }
        }
        let count = self.peer_count();
        info!("peer {peer_id} connected ({count} active)");
        let _ = self.events.send(PeerEvent::PeerCountChanged { count });
    }

    /// Remove a peer and tear its connection down. Terminal: the entry is
    /// dropped, and a fresh announcement would build a fresh connection.
    fn close_peer(&self, peer_id: &str) {
        let removed = self.peers.write().remove(peer_id);
        if let Some(peer) = removed {
            if let Some(channel) = &peer.channel {
                channel.close();
            }
            peer.link.close();
            let count = self.peer_count();
            info!("peer {peer_id} closed ({count} active)");
            let _ = self.events.send(PeerEvent::PeerCountChanged { count });
        }
    }

    /// Send to every peer with an open channel, optionally skipping the one
    /// a message arrived from
    pub fn broadcast(&self, data: &str, exclude: Option<&str>) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let targets: Vec<(String, Arc<dyn DataChannel>)> = self
            .peers
            .read()
            .iter()
            .filter(|(id, _)| Some(id.as_str()) != exclude)
            .filter_map(|(id, peer)| {
                peer.channel
                    .as_ref()
                    .filter(|c| c.is_open())
                    .map(|c| (id.clone(), c.clone()))
            })
            .collect();
        for (peer_id, channel) in targets {
            self.send_frame(&peer_id, channel, data.to_string());
        }
    }

    /// Point-to-point send, used for acknowledgments
    pub fn send_to(&self, peer_id: &str, data: &str) {
        let channel = self
            .peers
            .read()
            .get(peer_id)
            .and_then(|p| p.channel.as_ref().filter(|c| c.is_open()).cloned());
        match channel {
            Some(channel) => self.send_frame(peer_id, channel, data.to_string()),
            None => debug!("no open channel to {peer_id}, dropping frame"),
        }
    }

    // One retry after a fixed delay, then the frame is gone. Loss is an
    // accepted outcome, not an error condition.
    fn send_frame(&self, peer_id: &str, channel: Arc<dyn DataChannel>, data: String) {
        if let Err(e) = channel.send(&data) {
            debug!("send to {peer_id} failed ({e}), retrying once");
            let delay = self.config.send_retry_delay;
            let peer_id = peer_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = channel.send(&data) {
                    debug!("retry to {peer_id} failed ({e}), dropping frame");
                }
            });
        }
    }

    /// Peers whose channel is currently open. Connecting peers do not count.
    pub fn peer_count(&self) -> usize {
        self.peers
            .read()
            .values()
            .filter(|p| {
                p.state == PeerState::Connected
                    && p.channel.as_ref().is_some_and(|c| c.is_open())
            })
            .count()
    }

    /// Tear everything down and detach from signaling. Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let peers: Vec<(String, Peer)> = self.peers.write().drain().collect();
        for (peer_id, peer) in peers {
            debug!("closing peer {peer_id}");
            if let Some(channel) = &peer.channel {
                channel.close();
            }
            peer.link.close();
        }
        self.signaling.leave().await;
        info!("peer manager destroyed");
    }
}
