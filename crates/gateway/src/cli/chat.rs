//! `session-bridge chat`: console transport.
//!
//! Reads lines from stdin on a dedicated [`ForeignLoop`], the way a bot
//! client library with its own event loop would, and relays each one
//! through the bridge to a local [`EchoAgent`].  Replies stream back chunk by
//! chunk.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use sb_domain::agent::InboundMessage;
use sb_domain::config::Config;
use sb_domain::stream::StreamToken;

use crate::bootstrap;
use crate::bridge::BridgeClient;
use crate::echo::EchoAgent;
use crate::runtime::ForeignLoop;

const CHANNEL: &str = "cli";
const CHAT_ID: &str = "console";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run the console transport until EOF, `/quit` or Ctrl+C.
pub async fn chat(config: Arc<Config>, user: String, chunk_delay_ms: u64) -> anyhow::Result<()> {
    // 1. Boot the bridge on this (owner) runtime.
    let core = Arc::new(EchoAgent::new(Duration::from_millis(chunk_delay_ms)));
    let bridge = bootstrap::build_bridge(&config, core)?;
    let reaper = bootstrap::spawn_background_tasks(&config, &bridge);

    // 2. Start the transport on its own loop.
    let foreign = ForeignLoop::spawn("console-transport", config.cross_loop.shutdown_grace())?;
    let client = BridgeClient::new(bridge.clone());
    let stop = CancellationToken::new();
    let transport = foreign.spawn_task(console_loop(client, user.clone(), stop.clone()));
    tracing::debug!(transport = %foreign.name(), user = %user, "console transport running");

    eprintln!("session-bridge console");
    eprintln!("User: {user}  |  Type /help for commands, Ctrl+D to exit");
    eprintln!();

    // 3. Wait for the transport to finish or for Ctrl+C.
    tokio::select! {
        joined = transport => match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "console transport failed"),
            Err(e) => tracing::error!(error = %e, "console transport task ended abnormally"),
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
            stop.cancel();
        }
    }

    // 4. Shut down in reverse order.
    if let Err(e) = foreign
        .shutdown_async(config.cross_loop.shutdown_timeout())
        .await
    {
        tracing::warn!(error = %e, "console transport did not stop cleanly");
    }
    if let Some(reaper) = reaper {
        reaper.stop().await;
    }
    for session in bridge.list_sessions() {
        if let Err(e) = bridge.registry().remove_key(&session.key, "shutdown") {
            tracing::warn!(session_key = %session.key, error = %e, "session teardown failed");
        }
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport loop (runs on the foreign loop)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Flow {
    Continue,
    Quit,
}

async fn console_loop(
    client: BridgeClient,
    user: String,
    stop: CancellationToken,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut seq: u64 = 0;
    let mut last: Option<(String, String)> = None;

    loop {
        prompt();
        let line = tokio::select! {
            _ = stop.cancelled() => break,
            line = lines.next_line() => line?,
        };
        // EOF (Ctrl+D)
        let Some(line) = line else {
            eprintln!();
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (message_id, text) = if let Some(cmd) = trimmed.strip_prefix('/') {
            match cmd {
                "resend" => match &last {
                    Some(previous) => previous.clone(),
                    None => {
                        eprintln!("Nothing to resend.");
                        continue;
                    }
                },
                _ => match handle_command(&client, &user, cmd).await {
                    Flow::Continue => continue,
                    Flow::Quit => break,
                },
            }
        } else {
            seq += 1;
            (format!("console-{seq}"), trimmed.to_string())
        };
        last = Some((message_id.clone(), text.clone()));

        if client.is_duplicate(&message_id, CHANNEL) {
            eprintln!("(duplicate of {message_id}, suppressed)");
            continue;
        }

        let session = match client
            .get_or_create_session(CHANNEL, &user, CHAT_ID, Some(&user))
            .await
        {
            Ok(session) => session,
            Err(e) => {
                eprintln!("Error: {e}");
                continue;
            }
        };

        let message = InboundMessage::new(text).with_message_id(message_id);
        relay_reply(&client, &session, message, &stop).await;
    }
    Ok(())
}

async fn relay_reply(
    client: &BridgeClient,
    session: &Arc<sb_sessions::SessionHandle>,
    message: InboundMessage,
    stop: &CancellationToken,
) {
    let mut stream = client.dispatch_streaming(session, message);
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "agent> ");

    loop {
        let token = tokio::select! {
            _ = stop.cancelled() => None,
            token = stream.next() => token,
        };
        match token {
            Some(StreamToken::Chunk { text }) => {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            }
            Some(StreamToken::End { .. }) => {
                let _ = writeln!(stdout);
            }
            Some(StreamToken::Error { kind, message }) => {
                let _ = writeln!(stdout);
                tracing::debug!(session_key = %stream.session_key(), kind = %kind, "turn ended with an error");
                eprintln!("Error ({kind}): {message}");
            }
            None => break,
        }
    }

    if !stream.is_finished() {
        stream.cancel().await;
    }
}

async fn handle_command(client: &BridgeClient, user: &str, cmd: &str) -> Flow {
    match cmd {
        "quit" | "exit" => Flow::Quit,
        "help" => {
            eprintln!("/sessions  List live sessions as JSON");
            eprintln!("/reset     Drop your session (the next message starts fresh)");
            eprintln!("/resend    Send the last message again with the same id");
            eprintln!("/quit      Exit");
            Flow::Continue
        }
        "sessions" => {
            match serde_json::to_string_pretty(&client.session_summaries()) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("Error: {e}"),
            }
            Flow::Continue
        }
        "reset" => {
            match client.remove_session(CHANNEL, user).await {
                Ok(true) => eprintln!("Session reset."),
                Ok(false) => eprintln!("No session to reset."),
                Err(e) => eprintln!("Error: {e}"),
            }
            Flow::Continue
        }
        other => {
            eprintln!("Unknown command /{other}. Type /help for commands.");
            Flow::Continue
        }
    }
}

fn prompt() {
    eprint!("you> ");
    let _ = std::io::stderr().flush();
}
