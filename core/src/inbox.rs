/// Inbox: owns the cached view of the "fetch-messages" query and rebuilds it
/// whenever a mutation or a mailbox poll invalidates the snapshot.
use crate::conversation::{Builder, InboxView};
use crate::error::Result;
use crate::message::{FetchResponse, Identity, Message};
use crate::message_store::MessageStore;
use tracing::{debug, error, info};

/// Message retrieval and mutation collaborator (the messaging daemon)
pub trait MessageSource {
    fn fetch_messages(&self) -> Result<FetchResponse>;

    fn send_message(&self, msg: &Message) -> Result<()>;

    fn save_message(&self, msg: &Message) -> Result<()>;

    /// Remove every message tied to a group; returns how many were removed
    fn delete_group_messages(&self, group_id: &str) -> Result<usize>;

    /// Ask the relay for messages waiting in its mailbox; returns how many
    /// were picked up
    fn relay_mailbox(&self, _relay_did: &str) -> Result<usize> {
        Ok(0)
    }
}

/// Local stand-in for the daemon: sent and saved messages both land in the store
impl MessageSource for MessageStore {
    fn fetch_messages(&self) -> Result<FetchResponse> {
        Ok(FetchResponse::from(self.list()?))
    }

    fn send_message(&self, msg: &Message) -> Result<()> {
        self.save(msg)
    }

    fn save_message(&self, msg: &Message) -> Result<()> {
        self.save(msg)
    }

    fn delete_group_messages(&self, group_id: &str) -> Result<usize> {
        self.delete_group(group_id)
    }
}

pub struct Inbox<S: MessageSource> {
    source: S,
    identity: Option<Identity>,
    relay_did: String,
    cached: Option<InboxView>,
    fetches: u64,
}

impl<S: MessageSource> Inbox<S> {
    pub fn new(source: S, identity: Option<Identity>, relay_did: impl Into<String>) -> Self {
        Self {
            source,
            identity,
            relay_did: relay_did.into(),
            cached: None,
            fetches: 0,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Number of fetches issued so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches
    }

    pub fn set_identity(&mut self, identity: Option<Identity>) {
        self.identity = identity;
        self.invalidate();
    }

    pub fn invalidate(&mut self) {
        if self.cached.take().is_some() {
            debug!("fetch-messages invalidated");
        }
    }

    fn builder(&self) -> Builder {
        Builder::new(self.identity.clone(), self.relay_did.clone())
    }

    /// Current conversations and notifications. Without a local identity the
    /// fetch stays disabled and an unresolved view comes back.
    pub fn view(&mut self) -> Result<&InboxView> {
        if !self.identity.as_ref().map_or(false, Identity::is_resolved) {
            return Ok(&*self.cached.insert(InboxView::unresolved()));
        }

        let view = match self.cached.take() {
            Some(view) => view,
            None => {
                let messages = self.fetch()?;
                let view = self.builder().build(&messages);
                if !view.anomalies.is_empty() {
                    debug!("{} message anomalies in latest fetch", view.anomalies.len());
                }
                view
            }
        };

        Ok(&*self.cached.insert(view))
    }

    /// Fresh, uncached list of messages from the source
    pub fn fetch(&mut self) -> Result<Vec<Message>> {
        self.fetches += 1;
        self.source
            .fetch_messages()
            .map(FetchResponse::into_messages)
            .map_err(|e| {
                error!("Unable to fetch messages: {}", e);
                e
            })
    }

    pub fn send_message(&mut self, msg: &Message) -> Result<()> {
        match self.source.send_message(msg) {
            Ok(()) => {
                self.invalidate();
                Ok(())
            }
            Err(e) => {
                error!("Error sending message: {}", e);
                Err(e)
            }
        }
    }

    pub fn save_message(&mut self, msg: &Message) -> Result<()> {
        match self.source.save_message(msg) {
            Ok(()) => {
                self.invalidate();
                Ok(())
            }
            Err(e) => {
                error!("Error saving message: {}", e);
                Err(e)
            }
        }
    }

    pub fn delete_group_messages(&mut self, group_id: &str) -> Result<usize> {
        match self.source.delete_group_messages(group_id) {
            Ok(removed) => {
                info!("Conversation {} deleted ({} messages)", group_id, removed);
                self.invalidate();
                Ok(removed)
            }
            Err(e) => {
                error!("Error deleting group messages: {}", e);
                Err(e)
            }
        }
    }

    /// Poll the relay mailbox; the view is only rebuilt if something arrived
    pub fn poll_mailbox(&mut self) -> Result<usize> {
        let fetched = self.source.relay_mailbox(&self.relay_did).map_err(|e| {
            error!("Unable to fetch mailbox: {}", e);
            e
        })?;
        debug!("Mailbox fetched, {} new messages", fetched);
        if fetched > 0 {
            self.invalidate();
        }
        Ok(fetched)
    }
}
