//! Command handlers for the BlueChat CLI

use std::future::Future;
use std::io::Write;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use bluechat_core::{
    ChatMessage, ConnectionState, CoreEvent, Direction, KnownPeer, PeerIdentity, Timestamp,
};

use crate::app::BluechatApp;
use crate::cli::Commands;
use crate::config::CliAppConfig;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command against the terminal
    pub async fn execute(command: Commands, app: &mut BluechatApp) -> Result<()> {
        let mut out = std::io::stdout();
        match command {
            Commands::Identity => show_identity(app, &mut out),
            Commands::Host => host(app, &mut out, shutdown_signal()).await,
            Commands::Scan { timeout } => {
                let timeout = timeout
                    .map(Duration::from_secs)
                    .unwrap_or(app.config().core.scan_timeout);
                scan(app, &mut out, timeout).await
            }
            Commands::Chat { peer } => {
                let peer = parse_peer(&peer)?;
                let input = BufReader::new(tokio::io::stdin());
                chat(app, peer, input, &mut out).await
            }
            Commands::Peers => list_peers(app, &mut out).await,
            Commands::History { peer } => show_history(app, parse_peer(&peer)?, &mut out).await,
            Commands::Forget { peer } => forget(app, parse_peer(&peer)?, &mut out).await,
            Commands::Clear => clear(app, &mut out).await,
            Commands::ExampleConfig => {
                write!(out, "{}", CliAppConfig::example_config())?;
                Ok(())
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

pub fn parse_peer(peer: &str) -> Result<PeerIdentity> {
    Ok(peer.parse::<PeerIdentity>()?)
}

// ----------------------------------------------------------------------------
// Identity and History
// ----------------------------------------------------------------------------

pub fn show_identity<W: Write>(app: &BluechatApp, out: &mut W) -> Result<()> {
    let advertisement = app.coordinator().advertisement();
    writeln!(out, "Identity:    {}", app.local_identity())?;
    writeln!(out, "Advertised:  {}", advertisement.advertised_identifier)?;
    if let Some(name) = advertisement.local_name {
        writeln!(out, "Local name:  {}", name)?;
    }
    Ok(())
}

pub async fn list_peers<W: Write>(app: &BluechatApp, out: &mut W) -> Result<()> {
    let peers = app.coordinator().known_peers().await?;
    if peers.is_empty() {
        writeln!(out, "No known peers yet")?;
        return Ok(());
    }
    for peer in peers {
        writeln!(out, "{}", describe_peer(&peer))?;
    }
    Ok(())
}

fn describe_peer(peer: &KnownPeer) -> String {
    let mut line = peer.identity.to_string();
    if let Some(name) = &peer.display_name {
        line.push_str(&format!("  {}", name));
    }
    match peer.last_message_at {
        Some(at) => line.push_str(&format!("  last message {}", format_time(at))),
        None => line.push_str("  no messages"),
    }
    line
}

pub async fn show_history<W: Write>(
    app: &BluechatApp,
    peer: PeerIdentity,
    out: &mut W,
) -> Result<()> {
    let history = app.coordinator().history(peer).await?;
    if history.is_empty() {
        writeln!(out, "No messages with {}", peer)?;
        return Ok(());
    }
    let limit = app.config().cli.history_limit;
    let skipped = history.len().saturating_sub(limit);
    if skipped > 0 {
        writeln!(out, "... {} older messages", skipped)?;
    }
    for message in &history[skipped..] {
        writeln!(out, "{}", format_message(message))?;
    }
    Ok(())
}

pub async fn forget<W: Write>(app: &BluechatApp, peer: PeerIdentity, out: &mut W) -> Result<()> {
    if app.coordinator().forget_peer(peer).await? {
        writeln!(out, "Forgot {}", peer)?;
    } else {
        writeln!(out, "{} is not a known peer", peer)?;
    }
    Ok(())
}

pub async fn clear<W: Write>(app: &BluechatApp, out: &mut W) -> Result<()> {
    let removed = app.coordinator().clear_history().await?;
    writeln!(out, "Deleted {} messages", removed)?;
    Ok(())
}

fn format_message(message: &ChatMessage) -> String {
    let arrow = match message.direction {
        Direction::Sent => "->",
        Direction::Received => "<-",
    };
    format!(
        "[{}] {} {}: {}",
        format_time(message.timestamp),
        arrow,
        message.peer_identity,
        message.content
    )
}

/// `HH:MM:SS` in UTC
fn format_time(at: Timestamp) -> String {
    let seconds = at.as_millis() / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        (seconds / 3600) % 24,
        (seconds / 60) % 60,
        seconds % 60
    )
}

// ----------------------------------------------------------------------------
// Radio Commands
// ----------------------------------------------------------------------------

/// Host until `stop` resolves, printing what arrives
pub async fn host<W: Write>(
    app: &mut BluechatApp,
    out: &mut W,
    stop: impl Future<Output = ()>,
) -> Result<()> {
    app.coordinator().host().await?;
    writeln!(out, "Hosting as {}; press Ctrl+C to stop", app.local_identity())?;

    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            event = app.next_event() => match event {
                Some(event) => print_event(out, &event)?,
                None => break,
            },
        }
    }

    app.stop().await
}

/// Scan for `timeout`, listing each peer the first time it is seen
pub async fn scan<W: Write>(app: &mut BluechatApp, out: &mut W, timeout: Duration) -> Result<()> {
    app.coordinator().start_discovery(Some(timeout)).await?;
    writeln!(out, "Scanning for {:?}...", timeout)?;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut found = 0usize;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = app.next_event() => match event {
                Some(CoreEvent::PeerDiscovered { identity, display_name }) => {
                    found += 1;
                    let name = display_name.unwrap_or_default();
                    writeln!(out, "{}  {}", identity, name)?;
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    writeln!(out, "{} peers found", found)?;
    app.stop().await
}

/// Scan until `peer` appears or the scan timeout passes
async fn find_peer(app: &mut BluechatApp, peer: PeerIdentity) -> Result<()> {
    let timeout = app.config().core.scan_timeout;
    app.coordinator().start_discovery(Some(timeout)).await?;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let found = loop {
        let event = tokio::select! {
            _ = &mut deadline => break false,
            event = app.next_event() => event,
        };
        match event {
            Some(CoreEvent::PeerDiscovered { identity, .. }) if identity == peer => break true,
            Some(_) => {}
            None => break false,
        }
    };

    app.coordinator().stop_discovery().await?;
    if found {
        Ok(())
    } else {
        Err(CliError::PeerNotSeen(peer.to_string()))
    }
}

enum Step {
    Line(Option<String>),
    Event(Option<CoreEvent>),
}

/// Connect to `peer` and chat, one line per message
///
/// Lines starting with `/` are commands: `/read` asks the peer for its last
/// message, `/quit` leaves. The node also hosts so the peer can write back.
pub async fn chat<R, W>(app: &mut BluechatApp, peer: PeerIdentity, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    if let Err(e) = app.coordinator().host().await {
        warn!("Cannot host, replies from {} will not arrive: {}", peer, e);
    }

    writeln!(out, "Looking for {}...", peer)?;
    find_peer(app, peer).await?;
    app.coordinator().connect(peer).await?;
    app.coordinator().wait_ready().await?;
    writeln!(out, "Connected to {}. /read fetches, /quit leaves", peer)?;

    let prompt = app.config().cli.prompt.clone();
    let mut lines = input.lines();
    loop {
        write!(out, "{}", prompt)?;
        out.flush()?;

        let step = tokio::select! {
            line = lines.next_line() => Step::Line(line?),
            event = app.next_event() => Step::Event(event),
        };

        match step {
            Step::Line(None) | Step::Event(None) => break,
            Step::Line(Some(line)) => match line.trim() {
                "" => {}
                "/quit" => break,
                "/read" => app.coordinator().read().await?,
                text => match app.coordinator().send(text).await {
                    Ok(message) => info!("Queued message {}", message.id),
                    Err(e) => writeln!(out, "! {}", e)?,
                },
            },
            Step::Event(Some(event)) => {
                print_event(out, &event)?;
                if let CoreEvent::ConnectionStateChanged { identity, state } = event {
                    if identity == peer && !state.is_active() {
                        break;
                    }
                }
            }
        }
    }

    app.stop().await
}

fn print_event<W: Write>(out: &mut W, event: &CoreEvent) -> Result<()> {
    match event {
        CoreEvent::PeerDiscovered {
            identity,
            display_name,
        } => writeln!(
            out,
            "* found {} {}",
            identity,
            display_name.as_deref().unwrap_or("")
        )?,
        CoreEvent::ConnectionStateChanged { identity, state } => match state {
            ConnectionState::Ready | ConnectionState::Disconnected | ConnectionState::Failed(_) => {
                writeln!(out, "* {} {}", identity, state)?
            }
            _ => {}
        },
        CoreEvent::MessageReceived(message) => writeln!(out, "{}", format_message(message))?,
        CoreEvent::MessageSendResult {
            message_id,
            success: false,
        } => writeln!(out, "! message {} was not delivered", message_id)?,
        CoreEvent::MessageSendResult { .. } => {}
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(Timestamp::new(0)), "00:00:00");
        assert_eq!(format_time(Timestamp::new(3_723_000)), "01:02:03");
        assert_eq!(format_time(Timestamp::new(86_400_000 + 61_000)), "00:01:01");
    }

    #[test]
    fn test_describe_peer() {
        let peer = KnownPeer::new(PeerIdentity::new(0x1a2b_3c4d))
            .with_display_name(Some("phone".to_string()));
        assert_eq!(describe_peer(&peer), "1a2b3c4d  phone  no messages");
    }

    #[test]
    fn test_parse_peer() {
        assert_eq!(parse_peer("1a2b3c4d").unwrap(), PeerIdentity::new(0x1a2b_3c4d));
        assert!(parse_peer("xyz").is_err());
    }
}
