//! Terminal chat client built on the session facade.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use agora_core::{MessageId, Participant, ParticipantId, Rating, Session, VerificationStatus};
use agora_settings::AgoraSettings;
use agora_sync::{
    Advisory, ConnectionRegistry, ConnectionState, ExportFormat, FacadeOptions, SessionFacade,
    SessionSnapshot, StaticEndpoint, SyncConfig, WsTransport,
};
use anyhow::{Context, Result, bail};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Arguments of `agora chat`.
#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Server base URL.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub server: String,

    /// Existing session to join.
    #[arg(long, conflicts_with = "topic")]
    pub session: Option<String>,

    /// Create a new session on this topic.
    #[arg(long)]
    pub topic: Option<String>,

    /// Expert for a new session, as `Name:tag,tag`. Repeatable.
    #[arg(long = "expert")]
    pub experts: Vec<String>,

    /// Participant id, also used as the connection token.
    #[arg(long, default_value = "me")]
    pub user: String,

    /// Display name for a new session.
    #[arg(long, default_value = "You")]
    pub name: String,

    /// Log at debug level to stderr.
    #[arg(long)]
    pub verbose: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Input
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum Input {
    Say(String),
    Export(ExportFormat),
    Toggle,
    Reconnect,
    Rate { index: usize, rating: Rating },
    Help,
    Quit,
    Invalid(String),
}

const HELP: &str = "commands: /export [json|markdown|text], /toggle, /reconnect, \
/rate <n> <helpful|neutral|unhelpful>, /quit";

fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Some(Input::Say(line.to_string()));
    };
    let mut words = command.split_whitespace();
    let input = match words.next().unwrap_or_default() {
        "export" => match words.next().map_or(Ok(ExportFormat::default()), ExportFormat::from_str) {
            Ok(format) => Input::Export(format),
            Err(e) => Input::Invalid(e),
        },
        "toggle" => Input::Toggle,
        "reconnect" => Input::Reconnect,
        "rate" => {
            let index = words.next().and_then(|n| n.parse::<usize>().ok()).filter(|n| *n > 0);
            let rating = words.next().map(Rating::from_str);
            match (index, rating) {
                (Some(index), Some(Ok(rating))) => Input::Rate { index, rating },
                (_, Some(Err(e))) => Input::Invalid(e),
                _ => Input::Invalid("usage: /rate <n> <helpful|neutral|unhelpful>".into()),
            }
        }
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => Input::Invalid(format!("unknown command: /{other}")),
    };
    Some(input)
}

fn parse_expert(spec: &str) -> Result<serde_json::Value> {
    let (name, tags) = spec.split_once(':').unwrap_or((spec, ""));
    let name = name.trim();
    if name.is_empty() {
        bail!("expert needs a name: {spec}");
    }
    let expertise: Vec<&str> = tags.split(',').map(str::trim).filter(|t| !t.is_empty()).collect();
    Ok(serde_json::json!({ "name": name, "expertise": expertise }))
}

/// `http(s)://host` to the `ws(s)://host/ws` upgrade endpoint.
fn ws_endpoint(server: &str) -> String {
    let base = server.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/ws")
}

// ─────────────────────────────────────────────────────────────────────────────
// Session bootstrap
// ─────────────────────────────────────────────────────────────────────────────

async fn fetch_session(args: &ChatArgs) -> Result<Session> {
    let client = reqwest::Client::new();
    let base = args.server.trim_end_matches('/');
    let response = match (&args.session, &args.topic) {
        (Some(id), _) => client.get(format!("{base}/api/sessions/{id}")).send().await,
        (None, Some(topic)) => {
            let experts = args.experts.iter().map(|e| parse_expert(e)).collect::<Result<Vec<_>>>()?;
            let body = serde_json::json!({
                "topic": topic,
                "participants": [{ "id": args.user, "name": args.name }],
                "experts": experts,
            });
            client.post(format!("{base}/api/sessions")).json(&body).send().await
        }
        (None, None) => bail!("pass --session <id> to join or --topic <text> to create"),
    };
    let response = response
        .with_context(|| format!("cannot reach {base}"))?
        .error_for_status()
        .context("server rejected the session request")?;
    response.json().await.context("malformed session")
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct View {
    seen: HashMap<MessageId, VerificationStatus>,
    connection: Option<ConnectionState>,
    typing: Vec<ParticipantId>,
    status: Option<String>,
}

fn name_of<'a>(participants: &'a [Participant], id: &'a ParticipantId) -> &'a str {
    participants.iter().find(|p| &p.id == id).map_or(id.as_str(), |p| p.name.as_str())
}

impl View {
    fn render(&mut self, snapshot: &SessionSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if self.connection != Some(snapshot.connection_state) {
            self.connection = Some(snapshot.connection_state);
            lines.push(format!("* connection {}", snapshot.connection_state));
        }
        let status = snapshot.session_status.to_string();
        if self.status.as_deref() != Some(status.as_str()) {
            lines.push(format!("* session is {status}"));
            self.status = Some(status);
        }

        for (index, message) in snapshot.messages.iter().enumerate() {
            let sender = name_of(&snapshot.participants, &message.sender_id);
            match self.seen.get(&message.id) {
                None => {
                    let unsent = if message.unsent { " (unsent)" } else { "" };
                    lines.push(format!(
                        "#{} [{}] {sender}: {}{unsent}",
                        index + 1,
                        message.created_at.format("%H:%M:%S"),
                        message.content
                    ));
                }
                Some(previous)
                    if *previous != message.verification && message.verification.is_terminal() =>
                {
                    let confidence = message
                        .confidence
                        .map(|c| format!(" ({c:.2})"))
                        .unwrap_or_default();
                    lines.push(format!(
                        "  #{} fact check: {}{confidence}",
                        index + 1,
                        message.verification
                    ));
                }
                Some(_) => {}
            }
            let _ = self.seen.insert(message.id.clone(), message.verification);
        }

        if self.typing != snapshot.typing_participants {
            self.typing.clone_from(&snapshot.typing_participants);
            if !self.typing.is_empty() {
                let names: Vec<&str> =
                    self.typing.iter().map(|id| name_of(&snapshot.participants, id)).collect();
                lines.push(format!("* {} typing...", names.join(", ")));
            }
        }
        lines
    }
}

fn describe(advisory: &Advisory) -> String {
    match advisory {
        Advisory::LowConfidence { confidence, .. } => {
            format!("! low confidence fact check ({confidence:.2})")
        }
        Advisory::VerificationFailed { reason, .. } => format!("! fact check failed: {reason}"),
        Advisory::Offline { attempts } => {
            format!("! offline after {attempts} reconnect attempts; /reconnect to retry")
        }
        Advisory::ServerError { message, .. } => format!("! server: {message}"),
    }
}

async fn render_loop(
    mut snapshots: watch::Receiver<SessionSnapshot>,
    mut advisories: broadcast::Receiver<Advisory>,
    cancel: CancellationToken,
) {
    let mut view = View::default();
    for line in view.render(&snapshots.borrow_and_update()) {
        println!("{line}");
    }
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                for line in view.render(&snapshot) {
                    println!("{line}");
                }
            }
            advisory = advisories.recv() => match advisory {
                Ok(advisory) => println!("{}", describe(&advisory)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "advisories lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────────────────

/// Join or create a session and chat until `/quit` or end of input.
pub async fn run(settings: AgoraSettings, args: ChatArgs) -> Result<()> {
    let session = fetch_session(&args).await?;
    println!("joined \"{}\" ({})", session.topic, session.id);
    println!("{HELP}");

    let registry = ConnectionRegistry::new(
        SyncConfig::from(&settings.sync),
        Arc::new(WsTransport::default()),
        Arc::new(StaticEndpoint::new(ws_endpoint(&args.server))),
    );
    let verifier = agora_providers::verifier_from_settings(&settings.providers);
    let options = FacadeOptions {
        local_participant: ParticipantId::from(args.user.as_str()),
        token: args.user.clone(),
    };
    let facade = SessionFacade::open(&registry, verifier, session, options);

    let cancel = CancellationToken::new();
    let renderer = tokio::spawn(render_loop(
        facade.subscribe(),
        facade.advisories(),
        cancel.clone(),
    ));

    if let Err(e) = facade.connect().await {
        println!("! could not connect: {e}; /reconnect to retry");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let Some(input) = parse_input(&line) else { continue };
        match input {
            Input::Say(text) => {
                if !facade.send_message(&text) {
                    println!("! kept locally as unsent");
                }
            }
            Input::Export(format) => match facade.export_session(format) {
                Ok(text) => println!("{text}"),
                Err(e) => println!("! export failed: {e}"),
            },
            Input::Toggle => {
                if !facade.toggle_status() {
                    println!("! status cannot be toggled right now");
                }
            }
            Input::Reconnect => {
                if let Err(e) = facade.reconnect().await {
                    println!("! reconnect failed: {e}");
                }
            }
            Input::Rate { index, rating } => {
                let target = facade.snapshot().messages.get(index - 1).map(|m| m.id.clone());
                match target {
                    Some(id) if facade.rate_message(&id, rating) => {}
                    Some(_) => println!("! rating not sent"),
                    None => println!("! no message #{index}"),
                }
            }
            Input::Help => println!("{HELP}"),
            Input::Invalid(reason) => println!("! {reason}"),
            Input::Quit => break,
        }
    }

    cancel.cancel();
    let _ = renderer.await;
    facade.close();
    Ok(())
}
