//! libp2p Network Behaviour
//!
//! Peer transport for a shared AR session:
//! - mDNS for local network discovery (devices sit in the same room)
//! - TCP + QUIC transports
//! - gossipsub topic per session for broadcasting blobs to every peer

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, identity, mdns, noise, ping,
    swarm::{behaviour::toggle::Toggle, NetworkBehaviour, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::sync::DEFAULT_MAX_MESSAGE_BYTES;

/// Prefix of the gossipsub topic for a session
const TOPIC_PREFIX: &str = "workspace-ar";

/// Room for the gossipsub framing (signature, key, topic, seqno) around a blob
const GOSSIP_FRAME_OVERHEAD: usize = 1024;

/// Network configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Whether to enable mDNS for local network discovery
    pub enable_mdns: bool,
    /// Addresses to listen on
    pub listen_addresses: Vec<String>,
    /// Gossipsub heartbeat
    pub heartbeat_interval: Duration,
    /// How long an idle connection is kept open
    pub idle_connection_timeout: Duration,
    /// Largest blob that can be published; should match the sync layer limit
    pub max_message_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enable_mdns: true,
            listen_addresses: vec![
                "/ip4/0.0.0.0/tcp/0".to_string(),
                "/ip4/0.0.0.0/udp/0/quic-v1".to_string(),
            ],
            heartbeat_interval: Duration::from_millis(500),
            idle_connection_timeout: Duration::from_secs(120),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Network-related errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to create transport: {0}")]
    Transport(String),

    #[error("Already in a session")]
    AlreadyInSession,

    #[error("Not in a session")]
    NotInSession,

    #[error("libp2p error: {0}")]
    Libp2p(String),
}

/// Combined network behaviour
#[derive(NetworkBehaviour)]
pub struct WorkspaceBehaviour {
    /// Ping for connection keep-alive
    ping: ping::Behaviour,
    /// mDNS for local network discovery
    mdns: Toggle<mdns::tokio::Behaviour>,
    /// Peer identification
    identify: identify::Behaviour,
    /// Pub/sub for session messages
    gossipsub: gossipsub::Behaviour,
}

/// Events emitted by the network manager
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// Network is ready (listening)
    Ready { peer_id: String },
    /// Full current membership of the session topic
    PeersChanged { peers: Vec<String> },
    /// Opaque blob published by a peer
    Blob { from: String, data: Vec<u8> },
    /// Error occurred
    Error(String),
}

/// Commands sent to the network manager
#[derive(Debug)]
pub enum NetworkCommand {
    /// Subscribe to the topic for the given session code
    JoinSession { code: String },
    /// Leave the current session
    LeaveSession,
    /// Publish a blob to the session
    Broadcast { data: Vec<u8> },
    /// Shutdown the network
    Shutdown,
}

/// Handle to communicate with the running network
#[derive(Clone)]
pub struct NetworkHandle {
    command_tx: mpsc::UnboundedSender<NetworkCommand>,
    pub local_peer_id: String,
}

impl NetworkHandle {
    pub fn join_session(&self, code: &str) -> Result<(), NetworkError> {
        self.command_tx
            .send(NetworkCommand::JoinSession {
                code: code.to_string(),
            })
            .map_err(|_| NetworkError::Libp2p("Network task closed".to_string()))
    }

    pub fn leave_session(&self) -> Result<(), NetworkError> {
        self.command_tx
            .send(NetworkCommand::LeaveSession)
            .map_err(|_| NetworkError::Libp2p("Network task closed".to_string()))
    }

    pub fn broadcast(&self, data: Vec<u8>) -> Result<(), NetworkError> {
        self.command_tx
            .send(NetworkCommand::Broadcast { data })
            .map_err(|_| NetworkError::Libp2p("Network task closed".to_string()))
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(NetworkCommand::Shutdown);
    }

    /// False once the network task has exited
    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }
}

#[cfg(test)]
impl NetworkHandle {
    /// Handle whose commands land in the returned receiver
    pub(crate) fn detached(
        local_peer_id: &str,
    ) -> (Self, mpsc::UnboundedReceiver<NetworkCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        (
            Self {
                command_tx,
                local_peer_id: local_peer_id.to_string(),
            },
            command_rx,
        )
    }
}

/// Manages P2P networking - runs in a background task
pub struct NetworkManager {
    /// Our local peer ID
    local_peer_id: PeerId,
    /// Our keypair
    keypair: identity::Keypair,
    /// Network configuration
    config: NetworkConfig,
    /// Current session topic (if in a session)
    session_topic: Option<gossipsub::IdentTopic>,
    /// Peers subscribed to our session topic
    session_peers: HashSet<PeerId>,
}

impl NetworkManager {
    /// Create a new network manager with default config
    pub fn new() -> Result<Self, NetworkError> {
        Self::with_config(NetworkConfig::default())
    }

    /// Create a new network manager with custom config
    pub fn with_config(config: NetworkConfig) -> Result<Self, NetworkError> {
        let keypair = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(keypair.public());

        info!("Local peer ID: {}", local_peer_id);

        Ok(Self {
            local_peer_id,
            keypair,
            config,
            session_topic: None,
            session_peers: HashSet::new(),
        })
    }

    /// Start the network and return a handle for communication
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        self,
    ) -> Result<(NetworkHandle, mpsc::UnboundedReceiver<NetworkEvent>), NetworkError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = NetworkHandle {
            command_tx,
            local_peer_id: self.local_peer_id.to_string(),
        };

        tokio::spawn(async move {
            let error_tx = event_tx.clone();
            if let Err(e) = self.run(event_tx, command_rx).await {
                warn!("Network task error: {}", e);
                let _ = error_tx.send(NetworkEvent::Error(format!("Network stopped: {}", e)));
            }
        });

        Ok((handle, event_rx))
    }

    fn create_swarm(&self) -> Result<Swarm<WorkspaceBehaviour>, NetworkError> {
        let enable_mdns = self.config.enable_mdns;
        let gossipsub_config = gossipsub_config(&self.config)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;
        let idle_timeout = self.config.idle_connection_timeout;

        let swarm = libp2p::SwarmBuilder::with_existing_identity(self.keypair.clone())
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_quic()
            .with_behaviour(|keypair| {
                let ping = ping::Behaviour::new(
                    ping::Config::new()
                        .with_interval(Duration::from_secs(15))
                        .with_timeout(Duration::from_secs(20)),
                );

                let mdns = if enable_mdns {
                    Some(
                        mdns::tokio::Behaviour::new(
                            mdns::Config::default(),
                            keypair.public().to_peer_id(),
                        )
                        .map_err(|e| e.to_string())?,
                    )
                } else {
                    None
                };

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(keypair.clone()),
                    gossipsub_config,
                )
                .map_err(|e| e.to_string())?;

                let identify = identify::Behaviour::new(identify::Config::new(
                    "/workspace-ar/1.0.0".into(),
                    keypair.public(),
                ));

                Ok(WorkspaceBehaviour {
                    ping,
                    mdns: Toggle::from(mdns),
                    identify,
                    gossipsub,
                })
            })
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(idle_timeout))
            .build();

        Ok(swarm)
    }

    /// Run the network event loop
    async fn run(
        mut self,
        event_tx: mpsc::UnboundedSender<NetworkEvent>,
        mut command_rx: mpsc::UnboundedReceiver<NetworkCommand>,
    ) -> Result<(), NetworkError> {
        let mut swarm = self.create_swarm()?;

        for addr_str in &self.config.listen_addresses {
            match addr_str.parse::<Multiaddr>() {
                Ok(addr) => match swarm.listen_on(addr) {
                    Ok(id) => info!("Listener started on {}: {:?}", addr_str, id),
                    Err(e) => warn!("Failed to listen on {}: {:?}", addr_str, e),
                },
                Err(e) => warn!("Invalid listen address {}: {}", addr_str, e),
            }
        }

        let _ = event_tx.send(NetworkEvent::Ready {
            peer_id: self.local_peer_id.to_string(),
        });

        loop {
            tokio::select! {
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(&mut swarm, event, &event_tx);
                }
                Some(cmd) = command_rx.recv() => {
                    match cmd {
                        NetworkCommand::JoinSession { code } => {
                            if let Err(e) = self.join_session(&mut swarm, &code, &event_tx) {
                                let _ = event_tx.send(NetworkEvent::Error(e.to_string()));
                            }
                        }
                        NetworkCommand::LeaveSession => {
                            self.leave_session(&mut swarm, &event_tx);
                        }
                        NetworkCommand::Broadcast { data } => {
                            if let Err(e) = self.broadcast(&mut swarm, data) {
                                debug!("Broadcast error (may be no peers yet): {}", e);
                            }
                        }
                        NetworkCommand::Shutdown => {
                            info!("Network shutting down");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_swarm_event(
        &mut self,
        swarm: &mut Swarm<WorkspaceBehaviour>,
        event: SwarmEvent<WorkspaceBehaviourEvent>,
        event_tx: &mpsc::UnboundedSender<NetworkEvent>,
    ) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}/p2p/{}", address, self.local_peer_id);
            }

            // mDNS discovered peers (local network)
            SwarmEvent::Behaviour(WorkspaceBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                for (peer_id, addr) in peers {
                    if peer_id != self.local_peer_id {
                        info!("mDNS discovered peer: {} at {}", peer_id, addr);
                        swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                        if swarm.dial(addr.clone()).is_ok() {
                            debug!("Dialing discovered peer {}", peer_id);
                        }
                    }
                }
            }

            SwarmEvent::Behaviour(WorkspaceBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                for (peer_id, _) in peers {
                    debug!("mDNS peer expired: {}", peer_id);
                    swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
                }
            }

            SwarmEvent::Behaviour(WorkspaceBehaviourEvent::Gossipsub(
                gossipsub::Event::Message {
                    propagation_source,
                    message,
                    ..
                },
            )) => {
                let from = message.source.unwrap_or(propagation_source);
                debug!("Received {} bytes from {}", message.data.len(), from);
                let _ = event_tx.send(NetworkEvent::Blob {
                    from: from.to_string(),
                    data: message.data,
                });
            }

            SwarmEvent::Behaviour(WorkspaceBehaviourEvent::Gossipsub(
                gossipsub::Event::Subscribed { peer_id, topic },
            )) => {
                if let Some(our_topic) = &self.session_topic {
                    if topic == our_topic.hash() && self.session_peers.insert(peer_id) {
                        info!("Peer {} subscribed to session", peer_id);
                        self.send_peers_changed(event_tx);
                    }
                }
            }

            SwarmEvent::Behaviour(WorkspaceBehaviourEvent::Gossipsub(
                gossipsub::Event::Unsubscribed { peer_id, topic },
            )) => {
                if let Some(our_topic) = &self.session_topic {
                    if topic == our_topic.hash() && self.session_peers.remove(&peer_id) {
                        info!("Peer {} unsubscribed from session", peer_id);
                        self.send_peers_changed(event_tx);
                    }
                }
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 && self.session_peers.remove(&peer_id) {
                    info!("Lost connection to session peer {}", peer_id);
                    self.send_peers_changed(event_tx);
                }
            }

            SwarmEvent::Behaviour(WorkspaceBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!("Identified peer {} running {}", peer_id, info.protocol_version);
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                debug!("Outgoing connection to {:?} failed: {}", peer_id, error);
            }

            _ => {}
        }
    }

    /// Report the full membership, sorted for stable output
    fn send_peers_changed(&self, event_tx: &mpsc::UnboundedSender<NetworkEvent>) {
        let mut peers: Vec<String> = self.session_peers.iter().map(|p| p.to_string()).collect();
        peers.sort();
        let _ = event_tx.send(NetworkEvent::PeersChanged { peers });
    }

    /// Join a session by subscribing to its topic
    fn join_session(
        &mut self,
        swarm: &mut Swarm<WorkspaceBehaviour>,
        code: &str,
        event_tx: &mpsc::UnboundedSender<NetworkEvent>,
    ) -> Result<(), NetworkError> {
        if self.session_topic.is_some() {
            return Err(NetworkError::AlreadyInSession);
        }

        let topic = gossipsub::IdentTopic::new(format!("{}-{}", TOPIC_PREFIX, code));

        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;

        info!("Subscribed to session: {}", code);

        // Peers may have subscribed before we did
        let hash = topic.hash();
        self.session_peers = swarm
            .behaviour()
            .gossipsub
            .all_peers()
            .filter(|(_, topics)| topics.contains(&&hash))
            .map(|(peer_id, _)| *peer_id)
            .collect();
        self.session_topic = Some(topic);

        if !self.session_peers.is_empty() {
            self.send_peers_changed(event_tx);
        }

        Ok(())
    }

    /// Leave the current session
    fn leave_session(
        &mut self,
        swarm: &mut Swarm<WorkspaceBehaviour>,
        event_tx: &mpsc::UnboundedSender<NetworkEvent>,
    ) {
        if let Some(topic) = self.session_topic.take() {
            let _ = swarm.behaviour_mut().gossipsub.unsubscribe(&topic);
            info!("Left session");
        }
        if !self.session_peers.is_empty() {
            self.session_peers.clear();
            self.send_peers_changed(event_tx);
        }
    }

    /// Publish a blob to the session
    fn broadcast(
        &self,
        swarm: &mut Swarm<WorkspaceBehaviour>,
        data: Vec<u8>,
    ) -> Result<(), NetworkError> {
        let topic = self.session_topic.as_ref().ok_or(NetworkError::NotInSession)?;

        swarm
            .behaviour_mut()
            .gossipsub
            .publish(topic.clone(), data)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;

        Ok(())
    }
}

/// Small meshes: a session is a handful of devices in one room.
/// Must satisfy: mesh_outbound_min <= mesh_n_low <= mesh_n <= mesh_n_high
fn gossipsub_config(
    config: &NetworkConfig,
) -> Result<gossipsub::Config, gossipsub::ConfigBuilderError> {
    gossipsub::ConfigBuilder::default()
        .heartbeat_interval(config.heartbeat_interval)
        .validation_mode(gossipsub::ValidationMode::Strict)
        .max_transmit_size(config.max_message_bytes + GOSSIP_FRAME_OVERHEAD)
        .mesh_outbound_min(0)
        .mesh_n_low(1)
        .mesh_n(3)
        .mesh_n_high(6)
        .gossip_lazy(3)
        .build()
}
