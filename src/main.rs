use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use alumchat::backend::{display_name, initials, Backend, Profile};
use alumchat::config::Config;
use alumchat::identity::{auth_channel, Identity};
use alumchat::session::ClientSession;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("alumchat")
        .version("0.1.0")
        .about("Real-time direct-messaging core for an alumni network")
        .arg(
            Arg::new("name")
                .long("name")
                .value_name("DISPLAY_NAME")
                .help("Display name for the demo sender"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Path to a config.toml (defaults to the platform config dir)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("FILTER")
                .help("Log filter, e.g. info or alumchat=debug"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Emit the peer's conversation list as JSON"),
        )
        .get_matches();

    let filter = matches
        .get_one::<String>("log-level")
        .cloned()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut config = Config::load(matches.get_one::<String>("config").map(Path::new))?;
    if let Some(name) = matches.get_one::<String>("name") {
        config.display_name = Some(name.clone());
    }

    run_demo(config, matches.get_flag("json")).await
}

/// Drive the messaging core end to end with two in-process sessions:
/// first contact, typing indicator, optimistic send, unread counts and
/// read-state propagation.
async fn run_demo(config: Config, json: bool) -> Result<()> {
    let backend = Backend::new(&config);

    let sender_name = config
        .display_name
        .clone()
        .unwrap_or_else(|| Identity::ephemeral().display_name);
    let sender = Identity::named(Uuid::new_v4(), sender_name);
    let peer = Identity::named(Uuid::new_v4(), "Priya Shah");

    backend
        .profiles()
        .upsert(Profile {
            user_id: sender.user_id,
            first_name: Some(sender.display_name.clone()),
            last_name: None,
            avatar_url: None,
        })
        .await;
    backend
        .profiles()
        .upsert(Profile {
            user_id: peer.user_id,
            first_name: Some("Priya".into()),
            last_name: Some("Shah".into()),
            avatar_url: None,
        })
        .await;

    let (_sender_auth_ctl, sender_auth) = auth_channel(Some(sender.clone()));
    let (_peer_auth_ctl, peer_auth) = auth_channel(Some(peer.clone()));
    let mut sender_session = ClientSession::new(backend.clone(), sender_auth, &config);
    let mut peer_session = ClientSession::new(backend.clone(), peer_auth, &config);

    // First contact creates the conversation lazily.
    let conversation = backend
        .directory()
        .find_or_create(sender.user_id, peer.user_id)
        .await?;
    tracing::info!(conversation_id = %conversation.id, "conversation ready");

    sender_session.open_conversation(conversation.id).await?;
    peer_session.open_conversation(conversation.id).await?;

    sender_session.notify_typing().await?;
    settle().await;
    peer_session.on_tick().await;
    for typist in peer_session.typing_users() {
        println!("{} is typing...", typist.display_name);
    }

    sender_session.set_compose("hello");
    sender_session.send_current().await?;
    settle().await;
    sender_session.on_tick().await;
    peer_session.on_tick().await;

    peer_session.refresh_conversations().await;
    let list = peer_session.conversation_list();
    if json {
        println!("{}", serde_json::to_string_pretty(&list.conversations)?);
    } else {
        for summary in &list.conversations {
            let counterpart = summary.conversation.other_participant(peer.user_id);
            let profile = list.profiles.get(&counterpart);
            println!(
                "[{}] {}: \"{}\" ({} unread)",
                initials(profile),
                display_name(profile),
                summary.preview().unwrap_or(""),
                summary.unread_count,
            );
        }
    }

    // The peer already has the conversation open, so re-opening marks the
    // new message read and the sender sees the transition.
    peer_session.open_conversation(conversation.id).await?;
    settle().await;
    sender_session.on_tick().await;
    for cached in sender_session.messages() {
        println!(
            "{} [{}]",
            cached.message.content,
            if cached.message.is_read { "read" } else { "unread" },
        );
    }

    sender_session.close_conversation().await;
    peer_session.close_conversation().await;
    Ok(())
}

/// Give spawned subscription tasks a moment to forward broadcasts.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
