use crate::config::Config;
use crate::conversation::{AnomalyKind, Builder, Conversation, InboxView};
use crate::inbox::Inbox;
use crate::message::{FetchResponse, Identity, Message};
use crate::message_store::MessageStore;
use colored::*;
use tracing::info;

/// Entry point for the `inbox` binary.
pub fn run(args: Vec<String>) -> anyhow::Result<()> {
    let bin = args
        .first()
        .map(|s| s.as_str())
        .unwrap_or("inbox")
        .to_string();

    let (config, rest) = Config::from_args(args.get(1..).unwrap_or_default())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let Some(command) = rest.first() else {
        print_usage(&bin);
        return Ok(());
    };

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let store = MessageStore::new(&data_dir)?;
    info!("Using message store at {} ({} messages)", data_dir.display(), store.count());
    info!("Daemon: {}", config.daemon_base_url());

    let identity = config.self_did.clone().map(Identity::new);
    let mut inbox = Inbox::new(store, identity, config.relay_did.clone());

    match command.as_str() {
        "import" => {
            let Some(path) = rest.get(1) else {
                eprintln!("{}", format!("Usage: {} import <messages.json>", bin).yellow());
                return Ok(());
            };
            let raw = std::fs::read_to_string(path)?;
            let response: FetchResponse = serde_json::from_str(&raw)?;
            let messages = response.into_messages();
            for msg in &messages {
                inbox.save_message(msg)?;
            }
            println!("{} Imported {} messages", "✓".green().bold(), messages.len());
        }
        "send" => {
            if rest.len() < 3 {
                eprintln!("{}", format!("Usage: {} --did <self> send <peer_did> <message>", bin).yellow());
                return Ok(());
            }
            let Some(self_did) = config.self_did.as_deref() else {
                eprintln!("{} No local DID; pass --did or set INBOX_SELF_DID", "✗".red().bold());
                return Ok(());
            };
            let peer = rest[1].as_str();
            let group_id = existing_group(inbox.view()?, peer)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let msg = Message::compose(self_did, peer, &rest[2..].join(" "), Some(group_id));
            inbox.send_message(&msg)?;
            println!("{} Sent {} to {}", "✓".green().bold(), msg.id.dimmed(), peer.cyan());
        }
        "conversations" => {
            let view = inbox.view()?;
            if report_unresolved(view) {
                return Ok(());
            }
            print_threads("Conversations", &view.conversations);
            print_anomalies(view);
        }
        "notifications" => {
            let view = inbox.view()?;
            if report_unresolved(view) {
                return Ok(());
            }
            print_threads("Invitations", &view.notifications);
        }
        "timeline" => {
            let messages = inbox.fetch()?;
            let timeline = Builder::new(None, config.relay_did.clone()).invitation_timeline(&messages);
            println!("{}", "Signaling timeline".bold());
            for m in &timeline.items {
                println!("  {} {} from {}", m.data.created_time, m.id.dimmed(), m.data.from.cyan());
            }
        }
        "delete-group" => {
            let Some(group_id) = rest.get(1) else {
                eprintln!("{}", format!("Usage: {} delete-group <group_id>", bin).yellow());
                return Ok(());
            };
            let removed = inbox.delete_group_messages(group_id)?;
            println!("{} Conversation deleted ({} messages)", "✓".green().bold(), removed);
        }
        _ => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), command.red());
            print_usage(&bin);
        }
    }

    Ok(())
}

fn existing_group(view: &InboxView, peer: &str) -> Option<String> {
    view.conversations
        .iter()
        .find(|c| c.peer_id == peer)
        .and_then(|c| c.messages.iter().rev().find_map(|m| m.group_id.clone()))
}

fn report_unresolved(view: &InboxView) -> bool {
    if !view.self_resolved {
        eprintln!("{} No local DID; pass --did or set INBOX_SELF_DID", "✗".red().bold());
    }
    !view.self_resolved
}

fn print_threads(title: &str, threads: &[Conversation]) {
    println!("{} ({})", title.bold(), threads.len());
    for c in threads {
        println!("  {} {} messages", c.peer_id.cyan(), c.messages.len());
        if let Some(last) = c.messages.last() {
            println!("    last: {} at {}", last.id.dimmed(), last.data.created_time);
        }
    }
}

fn print_anomalies(view: &InboxView) {
    for a in &view.anomalies {
        let id = a.message_id.as_deref().unwrap_or("-");
        let what = match &a.kind {
            AnomalyKind::MalformedPayload(e) => e.to_string(),
            AnomalyKind::UnresolvedSelf => "no local identity".to_string(),
            AnomalyKind::AmbiguousPeer(ids) => format!("several peers ({}), used first", ids.join(", ")),
            AnomalyKind::NoPeer => "no peer besides relay/self".to_string(),
        };
        eprintln!("  {} {}: {}", "!".yellow().bold(), id, what);
    }
}

fn print_usage(bin: &str) {
    println!("Inbox CLI");
    println!();
    println!("Usage: {} [--did <did>] [--relay <did>] [--data-dir <path>] [--daemon <addr>] <command> [args]", bin);
    println!();
    println!("Commands:");
    println!("  import <file.json>          Store messages from a fetch response");
    println!("  send <peer_did> <message>   Send a text message");
    println!("  conversations               List conversations by peer");
    println!("  notifications               List pending call invitations");
    println!("  timeline                    Show every signaling message in order");
    println!("  delete-group <group_id>     Delete all messages of a conversation");
}
