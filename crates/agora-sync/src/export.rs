//! Session transcript export.

use std::fmt::Write as _;
use std::str::FromStr;

use agora_core::ids::{ParticipantId, SessionId};
use agora_core::model::{Message, Participant, SessionStatus, VerificationStatus};
use serde::Serialize;

use crate::facade::SessionSnapshot;

/// Output format for [`export`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// Pretty-printed JSON document.
    #[default]
    Json,
    /// Markdown transcript.
    Markdown,
    /// Plain text, one line per message.
    Text,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "markdown" | "md" => Ok(Self::Markdown),
            "text" | "txt" => Ok(Self::Text),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportDocument<'a> {
    session_id: &'a SessionId,
    topic: &'a str,
    status: SessionStatus,
    participants: &'a [Participant],
    messages: &'a [Message],
}

/// Render `snapshot` in `format`.
pub fn export(
    snapshot: &SessionSnapshot,
    format: ExportFormat,
) -> Result<String, serde_json::Error> {
    match format {
        ExportFormat::Json => serde_json::to_string_pretty(&ExportDocument {
            session_id: &snapshot.session_id,
            topic: &snapshot.topic,
            status: snapshot.session_status,
            participants: &snapshot.participants,
            messages: &snapshot.messages,
        }),
        ExportFormat::Markdown => Ok(markdown(snapshot)),
        ExportFormat::Text => Ok(text(snapshot)),
    }
}

fn display_name<'a>(snapshot: &'a SessionSnapshot, id: &'a ParticipantId) -> &'a str {
    snapshot
        .participants
        .iter()
        .find(|p| &p.id == id)
        .map_or(id.as_str(), |p| p.name.as_str())
}

fn badge(message: &Message) -> Option<String> {
    match message.verification {
        VerificationStatus::Unchecked | VerificationStatus::Checking => None,
        status => Some(match message.confidence {
            Some(c) => format!("{status} ({c:.2})"),
            None => status.to_string(),
        }),
    }
}

fn markdown(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", snapshot.topic);
    let _ = writeln!(
        out,
        "_Status: {} | {} messages_\n",
        snapshot.session_status,
        snapshot.messages.len()
    );

    out.push_str("## Participants\n\n");
    for p in &snapshot.participants {
        if p.is_human || p.expertise.is_empty() {
            let _ = writeln!(out, "- **{}**", p.name);
        } else {
            let _ = writeln!(out, "- **{}** ({})", p.name, p.expertise.join(", "));
        }
    }

    out.push_str("\n## Transcript\n");
    for m in &snapshot.messages {
        let _ = writeln!(
            out,
            "\n**{}** · {}\n",
            display_name(snapshot, &m.sender_id),
            m.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        for line in m.content.lines() {
            let _ = writeln!(out, "> {line}");
        }
        if let Some(badge) = badge(m) {
            let _ = writeln!(out, "\n_Fact check: {badge}_");
        }
        for source in &m.sources {
            match &source.url {
                Some(url) => {
                    let _ = writeln!(out, "- [{}]({url})", source.title);
                }
                None => {
                    let _ = writeln!(out, "- {}", source.title);
                }
            }
        }
    }
    out
}

fn text(snapshot: &SessionSnapshot) -> String {
    let mut out = format!("{} [{}]\n", snapshot.topic, snapshot.session_status);
    for m in &snapshot.messages {
        let _ = write!(
            out,
            "[{}] {}: {}",
            m.created_at.format("%H:%M:%S"),
            display_name(snapshot, &m.sender_id),
            m.content
        );
        if let Some(badge) = badge(m) {
            let _ = write!(out, " [{badge}]");
        }
        if m.unsent {
            out.push_str(" (unsent)");
        }
        out.push('\n');
    }
    out
}
