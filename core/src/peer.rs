// Peer lifecycle tracking
//
// One record per remote device, keyed by PeerId, holding the whole lifecycle
// in a single phase value. All mutation goes through PeerRoster methods and
// the roster is owned by the node's event loop, so there is exactly one
// writer and no two collections to fall out of sync.

use std::collections::HashMap;

use libp2p::PeerId;
use serde::{Deserialize, Serialize};

/// Session state as the transport reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    NotConnected,
    Connecting,
    Connected,
}

/// Unified per-peer lifecycle phase
///
/// Discovery-layer visibility (Discovered, Lost) and session-layer progress
/// (Inviting through Disconnected) live in one machine. A connected session
/// outlives discovery visibility: PeerLost while Connected is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    Discovered,
    Inviting,
    Connecting,
    Connected,
    Disconnected,
    Lost,
}

/// What applying a transport session state did to a peer record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Peer entered Connected
    BecameConnected,
    /// Peer left Connected, or gave up mid-connect
    BecameDisconnected,
    /// Outgoing invitation was refused; peer is Discovered again
    InviteRejected,
    /// Peer moved to Connecting
    Progressing,
    /// Nothing changed
    NoChange,
}

/// What a discovery notification did to a peer record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// New peer added as Discovered
    Added,
    /// Previously disconnected peer is Discovered again
    Rediscovered,
    /// Peer already tracked; no change
    AlreadyKnown,
}

struct PeerRecord {
    phase: PeerPhase,
    display_name: Option<String>,
}

/// The set of known peers and their lifecycle phases
///
/// Connected peers keep their connection order so the published name list
/// reads in the order sessions were established.
#[derive(Default)]
pub struct PeerRoster {
    records: HashMap<PeerId, PeerRecord>,
    connected_order: Vec<PeerId>,
}

impl PeerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovery notification
    pub fn note_discovered(&mut self, peer: PeerId) -> DiscoveryOutcome {
        match self.records.get_mut(&peer) {
            None => {
                self.records.insert(
                    peer,
                    PeerRecord {
                        phase: PeerPhase::Discovered,
                        display_name: None,
                    },
                );
                DiscoveryOutcome::Added
            }
            Some(record) if record.phase == PeerPhase::Disconnected => {
                record.phase = PeerPhase::Discovered;
                DiscoveryOutcome::Rediscovered
            }
            Some(_) => DiscoveryOutcome::AlreadyKnown,
        }
    }

    /// Mark that an invitation was issued; only a Discovered peer can move
    pub fn note_inviting(&mut self, peer: PeerId) -> bool {
        match self.records.get_mut(&peer) {
            Some(record) if record.phase == PeerPhase::Discovered => {
                record.phase = PeerPhase::Inviting;
                true
            }
            _ => false,
        }
    }

    /// An outgoing invitation ran out of time or failed outright
    pub fn note_invite_failed(&mut self, peer: PeerId) -> bool {
        match self.records.get_mut(&peer) {
            Some(record) if record.phase == PeerPhase::Inviting => {
                record.phase = PeerPhase::Discovered;
                true
            }
            _ => false,
        }
    }

    /// Apply a transport-reported session state to the peer's record
    ///
    /// Unknown peers appear here when the remote side initiated the session;
    /// they are inserted with the phase the state maps to. A NotConnected
    /// report for an untracked peer is dropped.
    pub fn apply_session_state(&mut self, peer: PeerId, state: SessionState) -> SessionOutcome {
        let phase = match self.records.get(&peer) {
            Some(record) => record.phase,
            None => {
                return match state {
                    SessionState::NotConnected => SessionOutcome::NoChange,
                    SessionState::Connecting => {
                        self.records.insert(
                            peer,
                            PeerRecord {
                                phase: PeerPhase::Connecting,
                                display_name: None,
                            },
                        );
                        SessionOutcome::Progressing
                    }
                    SessionState::Connected => {
                        self.records.insert(
                            peer,
                            PeerRecord {
                                phase: PeerPhase::Connected,
                                display_name: None,
                            },
                        );
                        self.connected_order.push(peer);
                        SessionOutcome::BecameConnected
                    }
                };
            }
        };

        match (phase, state) {
            (PeerPhase::Connected, SessionState::Connected) => SessionOutcome::NoChange,
            (_, SessionState::Connected) => {
                self.set_phase(peer, PeerPhase::Connected);
                if !self.connected_order.contains(&peer) {
                    self.connected_order.push(peer);
                }
                SessionOutcome::BecameConnected
            }
            (PeerPhase::Connected, SessionState::NotConnected) => {
                self.set_phase(peer, PeerPhase::Disconnected);
                self.connected_order.retain(|p| *p != peer);
                SessionOutcome::BecameDisconnected
            }
            (PeerPhase::Connecting, SessionState::NotConnected) => {
                self.set_phase(peer, PeerPhase::Disconnected);
                SessionOutcome::BecameDisconnected
            }
            (PeerPhase::Inviting, SessionState::NotConnected) => {
                self.set_phase(peer, PeerPhase::Discovered);
                SessionOutcome::InviteRejected
            }
            (_, SessionState::NotConnected) => SessionOutcome::NoChange,
            (PeerPhase::Connected, SessionState::Connecting) => SessionOutcome::NoChange,
            (_, SessionState::Connecting) => {
                self.set_phase(peer, PeerPhase::Connecting);
                SessionOutcome::Progressing
            }
        }
    }

    /// The discovery layer stopped seeing the peer
    ///
    /// Lost is terminal: the record is removed and `Some(Lost)` returned.
    /// Connected peers are kept (`None`): the session outlives discovery
    /// visibility and the record goes away on its NotConnected instead.
    pub fn note_lost(&mut self, peer: PeerId) -> Option<PeerPhase> {
        match self.records.get(&peer) {
            Some(record) if record.phase == PeerPhase::Connected => None,
            Some(_) => {
                self.records.remove(&peer);
                self.connected_order.retain(|p| *p != peer);
                Some(PeerPhase::Lost)
            }
            None => None,
        }
    }

    /// Record the display name learned from the identify exchange
    ///
    /// Inserts a Connecting record for untracked peers: a name arriving
    /// means a session with them is already being negotiated.
    pub fn note_display_name(&mut self, peer: PeerId, name: String) {
        match self.records.get_mut(&peer) {
            Some(record) => record.display_name = Some(name),
            None => {
                self.records.insert(
                    peer,
                    PeerRecord {
                        phase: PeerPhase::Connecting,
                        display_name: Some(name),
                    },
                );
            }
        }
    }

    fn set_phase(&mut self, peer: PeerId, phase: PeerPhase) {
        if let Some(record) = self.records.get_mut(&peer) {
            record.phase = phase;
        }
    }

    /// Current phase of a peer, if tracked
    pub fn phase(&self, peer: &PeerId) -> Option<PeerPhase> {
        self.records.get(peer).map(|r| r.phase)
    }

    /// Display name of a peer, falling back to a shortened PeerId
    pub fn display_name(&self, peer: &PeerId) -> String {
        self.records
            .get(peer)
            .and_then(|r| r.display_name.clone())
            .unwrap_or_else(|| short_peer_id(peer))
    }

    /// Connected peers in the order their sessions were established
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.connected_order.clone()
    }

    /// Display names of connected peers, in connection order
    pub fn connected_names(&self) -> Vec<String> {
        self.connected_order
            .iter()
            .map(|p| self.display_name(p))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Shortened PeerId for labels and log lines
pub fn short_peer_id(peer: &PeerId) -> String {
    let full = peer.to_string();
    if full.len() > 12 {
        format!("…{}", &full[full.len() - 8..])
    } else {
        full
    }
}
