/// Conversation builder: turns the flat message list returned by the daemon
/// into per-peer conversation threads and pending call invitations.
///
/// Every call is a pure function of its input snapshot. Nothing is cached
/// here; the inbox layer decides when to rebuild.
use crate::message::{Identity, Message, NormalizedMessage, Payload, PayloadError};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Messages exchanged with one peer, oldest first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    #[serde(rename = "peerId")]
    pub peer_id: String,
    pub messages: Vec<NormalizedMessage>,
}

/// Outcome of reducing a recipient list to the conversation peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerExtraction {
    SinglePeer(String),
    NoPeer,
    /// Group message; resolved to the first entry
    MultiplePeers(Vec<String>),
}

impl PeerExtraction {
    pub fn peer(&self) -> Option<&str> {
        match self {
            PeerExtraction::SinglePeer(id) => Some(id),
            PeerExtraction::NoPeer => None,
            PeerExtraction::MultiplePeers(ids) => ids.first().map(|s| s.as_str()),
        }
    }
}

/// Drop the relay and ourselves from `recipients`; whatever is left is the peer.
/// Repeated entries count once.
pub fn extract_peer(recipients: &[String], self_id: &str, relay_did: &str) -> PeerExtraction {
    let mut remaining: Vec<String> = Vec::new();
    for r in recipients {
        if r != relay_did && r != self_id && !remaining.contains(r) {
            remaining.push(r.clone());
        }
    }

    match remaining.len() {
        0 => PeerExtraction::NoPeer,
        1 => PeerExtraction::SinglePeer(remaining.remove(0)),
        _ => PeerExtraction::MultiplePeers(remaining),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AnomalyKind {
    /// `data` could not be parsed; the message was left out
    MalformedPayload(PayloadError),
    /// No local identity; nothing was built
    UnresolvedSelf,
    /// More than one peer left after filtering; the first one was used
    AmbiguousPeer(Vec<String>),
    /// Only the relay and ourselves are listed; the message was left out
    NoPeer,
}

/// Per-message problem found during a build
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    /// Absent for build-wide anomalies
    pub message_id: Option<String>,
    pub kind: AnomalyKind,
}

impl Anomaly {
    fn message(message_id: &str, kind: AnomalyKind) -> Self {
        Self {
            message_id: Some(message_id.to_string()),
            kind,
        }
    }
}

/// Derived items plus everything that was skipped or resolved by policy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Build<T> {
    pub items: Vec<T>,
    pub anomalies: Vec<Anomaly>,
    /// False when the build short-circuited for lack of a local identity,
    /// as opposed to there genuinely being nothing to show
    pub self_resolved: bool,
}

impl<T> Build<T> {
    fn unresolved() -> Self {
        Self {
            items: Vec::new(),
            anomalies: vec![Anomaly {
                message_id: None,
                kind: AnomalyKind::UnresolvedSelf,
            }],
            self_resolved: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Conversations and notifications from one snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboxView {
    pub conversations: Vec<Conversation>,
    pub notifications: Vec<Conversation>,
    pub anomalies: Vec<Anomaly>,
    pub self_resolved: bool,
}

impl InboxView {
    pub fn unresolved() -> Self {
        Self::from_builds(Build::unresolved(), Build::unresolved())
    }

    fn from_builds(conversations: Build<Conversation>, notifications: Build<Conversation>) -> Self {
        let mut anomalies = conversations.anomalies;
        for a in notifications.anomalies {
            if !anomalies.contains(&a) {
                anomalies.push(a);
            }
        }
        Self {
            conversations: conversations.items,
            notifications: notifications.items,
            anomalies,
            self_resolved: conversations.self_resolved && notifications.self_resolved,
        }
    }
}

pub struct Builder {
    self_identity: Option<Identity>,
    relay_did: String,
}

impl Builder {
    pub fn new(self_identity: Option<Identity>, relay_did: impl Into<String>) -> Self {
        Self {
            self_identity,
            relay_did: relay_did.into(),
        }
    }

    fn self_id(&self) -> Option<&str> {
        self.self_identity
            .as_ref()
            .filter(|i| i.is_resolved())
            .map(|i| i.id.as_str())
    }

    /// Group every displayable message by peer
    pub fn build_conversations(&self, messages: &[Message]) -> Build<Conversation> {
        let Some(self_id) = self.self_id() else {
            debug!("No local identity; skipping conversation build");
            return Build::unresolved();
        };

        let mut anomalies = Vec::new();
        let sorted = normalize_sorted(
            messages,
            |m| !m.is_relay_registration(),
            |p| !p.is_answer(),
            &mut anomalies,
        );
        let items = self.group_by_peer(self_id, &sorted, &mut anomalies);

        debug!(
            "Built {} conversations from {} messages ({} anomalies)",
            items.len(),
            messages.len(),
            anomalies.len()
        );
        Build {
            items,
            anomalies,
            self_resolved: true,
        }
    }

    /// Group outstanding signaling offers by peer
    pub fn build_notifications(&self, messages: &[Message]) -> Build<Conversation> {
        let Some(self_id) = self.self_id() else {
            debug!("No local identity; skipping notification build");
            return Build::unresolved();
        };

        let mut anomalies = Vec::new();
        let sorted = normalize_sorted(messages, Message::is_signal, |p| !p.is_answer(), &mut anomalies);
        let items = self.group_by_peer(self_id, &sorted, &mut anomalies);

        debug!("Built {} notification threads", items.len());
        Build {
            items,
            anomalies,
            self_resolved: true,
        }
    }

    /// Both derived sets, anomalies merged
    pub fn build(&self, messages: &[Message]) -> InboxView {
        InboxView::from_builds(
            self.build_conversations(messages),
            self.build_notifications(messages),
        )
    }

    /// Every signaling message, oldest first, regardless of peer or answer
    /// state. Needs no local identity.
    pub fn invitation_timeline(&self, messages: &[Message]) -> Build<NormalizedMessage> {
        let mut anomalies = Vec::new();
        let items = normalize_sorted(messages, Message::is_signal, |_| true, &mut anomalies);
        Build {
            items,
            anomalies,
            self_resolved: self.self_id().is_some(),
        }
    }

    fn group_by_peer(
        &self,
        self_id: &str,
        messages: &[NormalizedMessage],
        anomalies: &mut Vec<Anomaly>,
    ) -> Vec<Conversation> {
        let mut seen = HashSet::new();
        let mut peers: Vec<String> = Vec::new();

        for m in messages {
            let extraction = extract_peer(&m.recipients, self_id, &self.relay_did);
            match &extraction {
                PeerExtraction::SinglePeer(_) => {}
                PeerExtraction::NoPeer => {
                    debug!("Message {} has no peer besides relay/self", m.id);
                    anomalies.push(Anomaly::message(&m.id, AnomalyKind::NoPeer));
                }
                PeerExtraction::MultiplePeers(ids) => {
                    anomalies.push(Anomaly::message(&m.id, AnomalyKind::AmbiguousPeer(ids.clone())));
                }
            }
            if let Some(peer) = extraction.peer() {
                if seen.insert(peer.to_string()) {
                    peers.push(peer.to_string());
                }
            }
        }

        // A group message lands in every thread whose peer it lists
        peers
            .into_iter()
            .map(|peer_id| Conversation {
                messages: messages
                    .iter()
                    .filter(|m| m.recipients.contains(&peer_id))
                    .cloned()
                    .collect(),
                peer_id,
            })
            .collect()
    }
}

/// Filter on the record, parse, filter on the payload, then stable-sort by
/// `created_time`. Unparsable records are reported and dropped.
fn normalize_sorted(
    messages: &[Message],
    keep_record: impl Fn(&Message) -> bool,
    keep_payload: impl Fn(&Payload) -> bool,
    anomalies: &mut Vec<Anomaly>,
) -> Vec<NormalizedMessage> {
    let mut out: Vec<NormalizedMessage> = messages
        .iter()
        .filter(|m| keep_record(*m))
        .filter_map(|m| match Payload::parse(m) {
            Ok(payload) => keep_payload(&payload).then(|| NormalizedMessage::new(m, payload)),
            Err(e) => {
                warn!("Skipping message {}: {}", m.id, e);
                anomalies.push(Anomaly::message(&m.id, AnomalyKind::MalformedPayload(e)));
                None
            }
        })
        .collect();

    out.sort_by_key(|m| m.data.created_time);
    out
}
