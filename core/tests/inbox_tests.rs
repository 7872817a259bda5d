/// Inbox integration tests
/// Cache invalidation around mutations, and the builder invariants over a
/// mixed snapshot

extern crate inbox_core;

use inbox_core::conversation::{AnomalyKind, Builder};
use inbox_core::message::{FetchResponse, RELAY_REGISTRATION_TYPE, SIGNAL_SDP_TYPE};
use inbox_core::message_store::MessageStore;
use inbox_core::{Identity, Inbox, InboxError, Message, MessageSource};
use serde_json::json;
use std::cell::{Cell, RefCell};
use tempfile::TempDir;

const RELAY: &str = "did:relay";
const ME: &str = "did:me";

fn msg(id: &str, kind: &str, from: &str, time: i64, signal: Option<&str>, recipients: &[&str]) -> Message {
    let body = match signal {
        Some(t) => json!({ "content": { "signal": { "type": t } } }),
        None => json!({ "content": { "text": id } }),
    };
    Message {
        id: id.to_string(),
        kind: kind.to_string(),
        data: json!(json!({ "from": from, "created_time": time, "body": body }).to_string()),
        recipients: recipients.iter().map(|s| s.to_string()).collect(),
        group_id: Some(format!("g-{}", recipients[0])),
    }
}

/// In-memory daemon that wraps its responses like the GraphQL endpoint does
#[derive(Default)]
struct FakeDaemon {
    messages: RefCell<Vec<Message>>,
    fail_next: Cell<bool>,
    mailbox: RefCell<Vec<Message>>,
}

impl FakeDaemon {
    fn check(&self) -> inbox_core::Result<()> {
        if self.fail_next.replace(false) {
            return Err(InboxError::Source("daemon unavailable".to_string()));
        }
        Ok(())
    }
}

impl MessageSource for FakeDaemon {
    fn fetch_messages(&self) -> inbox_core::Result<FetchResponse> {
        self.check()?;
        let messages = self.messages.borrow().clone();
        let body = json!({ "data": { "messages": messages } });
        Ok(serde_json::from_value(body)?)
    }

    fn send_message(&self, msg: &Message) -> inbox_core::Result<()> {
        self.check()?;
        self.messages.borrow_mut().push(msg.clone());
        Ok(())
    }

    fn save_message(&self, msg: &Message) -> inbox_core::Result<()> {
        self.send_message(msg)
    }

    fn delete_group_messages(&self, group_id: &str) -> inbox_core::Result<usize> {
        self.check()?;
        let mut messages = self.messages.borrow_mut();
        let before = messages.len();
        messages.retain(|m| m.group_id.as_deref() != Some(group_id));
        Ok(before - messages.len())
    }

    fn relay_mailbox(&self, relay_did: &str) -> inbox_core::Result<usize> {
        assert_eq!(relay_did, RELAY);
        let waiting: Vec<Message> = self.mailbox.borrow_mut().drain(..).collect();
        let n = waiting.len();
        self.messages.borrow_mut().extend(waiting);
        Ok(n)
    }
}

fn inbox() -> Inbox<FakeDaemon> {
    Inbox::new(FakeDaemon::default(), Some(Identity::new(ME)), RELAY)
}

#[test]
fn test_view_is_cached_until_invalidated() {
    let mut inbox = inbox();
    inbox
        .source()
        .messages
        .borrow_mut()
        .push(msg("1", "basic", "did:a", 1, None, &["did:a", ME]));

    assert_eq!(inbox.view().unwrap().conversations.len(), 1);
    assert_eq!(inbox.view().unwrap().conversations.len(), 1);
    assert_eq!(inbox.fetch_count(), 1);

    inbox
        .send_message(&msg("2", "basic", ME, 2, None, &["did:b", ME]))
        .unwrap();
    assert_eq!(inbox.view().unwrap().conversations.len(), 2);
    assert_eq!(inbox.fetch_count(), 2);
}

#[test]
fn test_failed_mutation_keeps_cache() {
    let mut inbox = inbox();
    inbox.view().unwrap();

    inbox.source().fail_next.set(true);
    let err = inbox
        .send_message(&msg("1", "basic", ME, 1, None, &["did:a", ME]))
        .unwrap_err();
    assert!(matches!(err, InboxError::Source(_)));

    assert!(inbox.view().unwrap().conversations.is_empty());
    assert_eq!(inbox.fetch_count(), 1);
}

#[test]
fn test_fetch_error_propagates_then_recovers() {
    let mut inbox = inbox();
    inbox.source().fail_next.set(true);
    assert!(inbox.view().is_err());

    inbox
        .source()
        .messages
        .borrow_mut()
        .push(msg("1", SIGNAL_SDP_TYPE, "did:a?r=1", 1, Some("offer"), &["did:a", ME]));
    let view = inbox.view().unwrap();
    assert_eq!(view.notifications.len(), 1);
    assert_eq!(view.conversations[0].messages[0].data.from, "did:a");
}

#[test]
fn test_delete_group_invalidates() {
    let mut inbox = inbox();
    {
        let mut messages = inbox.source().messages.borrow_mut();
        messages.push(msg("1", "basic", "did:a", 1, None, &["did:a", ME]));
        messages.push(msg("2", "basic", "did:b", 2, None, &["did:b", ME]));
    }
    assert_eq!(inbox.view().unwrap().conversations.len(), 2);

    assert_eq!(inbox.delete_group_messages("g-did:a").unwrap(), 1);
    let view = inbox.view().unwrap();
    assert_eq!(view.conversations.len(), 1);
    assert_eq!(view.conversations[0].peer_id, "did:b");
}

#[test]
fn test_mailbox_poll() {
    let mut inbox = inbox();
    inbox.view().unwrap();

    assert_eq!(inbox.poll_mailbox().unwrap(), 0);
    inbox.view().unwrap();
    assert_eq!(inbox.fetch_count(), 1);

    inbox
        .source()
        .mailbox
        .borrow_mut()
        .push(msg("1", SIGNAL_SDP_TYPE, "did:a", 1, Some("offer"), &[RELAY, "did:a", ME]));
    assert_eq!(inbox.poll_mailbox().unwrap(), 1);
    assert_eq!(inbox.view().unwrap().notifications.len(), 1);
    assert_eq!(inbox.fetch_count(), 2);
}

#[test]
fn test_no_identity_disables_fetch() {
    let mut inbox = Inbox::new(FakeDaemon::default(), None, RELAY);
    let view = inbox.view().unwrap();
    assert!(!view.self_resolved);
    assert_eq!(view.anomalies[0].kind, AnomalyKind::UnresolvedSelf);
    assert_eq!(inbox.fetch_count(), 0);

    inbox.set_identity(Some(Identity::new(ME)));
    assert!(inbox.view().unwrap().self_resolved);
    assert_eq!(inbox.fetch_count(), 1);
}

#[test]
fn test_empty_identity_disables_fetch() {
    let mut inbox = Inbox::new(FakeDaemon::default(), Some(Identity::new("")), RELAY);
    inbox
        .source()
        .messages
        .borrow_mut()
        .push(msg("1", "basic", "did:a", 1, None, &["did:a", ME]));

    let view = inbox.view().unwrap();
    assert!(!view.self_resolved);
    assert!(view.conversations.is_empty());
    assert_eq!(view.anomalies[0].kind, AnomalyKind::UnresolvedSelf);
    assert_eq!(inbox.fetch_count(), 0);
}

#[test]
fn test_inbox_over_message_store() {
    let temp_dir = TempDir::new().unwrap();
    let store = MessageStore::new(temp_dir.path()).unwrap();
    let mut inbox = Inbox::new(store, Some(Identity::new(ME)), RELAY);

    inbox
        .save_message(&msg("1", "basic", "did:a", 5, None, &["did:a", ME]))
        .unwrap();
    let sent = Message::compose(ME, "did:a", "hello", Some("g-did:a".to_string()));
    inbox.send_message(&sent).unwrap();

    let view = inbox.view().unwrap();
    assert_eq!(view.conversations.len(), 1);
    assert_eq!(view.conversations[0].messages.len(), 2);

    assert_eq!(inbox.delete_group_messages("g-did:a").unwrap(), 2);
    assert!(inbox.view().unwrap().conversations.is_empty());
}

#[test]
fn test_snapshot_invariants() {
    let messages = vec![
        msg("reg", RELAY_REGISTRATION_TYPE, "did:relay", 0, None, &[RELAY, ME]),
        msg("o1", SIGNAL_SDP_TYPE, "did:a", 4, Some("offer"), &["did:a", ME]),
        msg("a1", SIGNAL_SDP_TYPE, ME, 5, Some("answer"), &["did:a", ME]),
        msg("t1", "basic", "did:b", 3, None, &[RELAY, "did:b", ME]),
        msg("t2", "basic", "did:a", 3, None, &["did:a", ME]),
        msg("grp", "basic", "did:c", 2, None, &["did:c", "did:b", ME]),
        msg("t3", "basic", ME, 3, None, &["did:b", ME]),
    ];
    let builder = Builder::new(Some(Identity::new(ME)), RELAY);
    let view = builder.build(&messages);

    let mut peers: Vec<_> = view.conversations.iter().map(|c| c.peer_id.clone()).collect();
    let total = peers.len();
    peers.sort();
    peers.dedup();
    assert_eq!(peers.len(), total);

    for conv in view.conversations.iter().chain(view.notifications.iter()) {
        assert_ne!(conv.peer_id, ME);
        assert_ne!(conv.peer_id, RELAY);
        for pair in conv.messages.windows(2) {
            assert!(pair[0].data.created_time <= pair[1].data.created_time);
        }
        for m in &conv.messages {
            assert!(m.recipients.contains(&conv.peer_id));
            assert_ne!(m.id, "reg");
            assert_ne!(m.id, "a1");
        }
    }

    let b = view.conversations.iter().find(|c| c.peer_id == "did:b").unwrap();
    let order: Vec<_> = b.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(order, vec!["grp", "t1", "t3"]);

    assert_eq!(view.notifications.len(), 1);
    assert_eq!(view.notifications[0].peer_id, "did:a");

    assert_eq!(builder.build(&messages), view);
}
