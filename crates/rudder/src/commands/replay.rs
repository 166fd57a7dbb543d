use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use rudder_core::config::EngineConfig;
use rudder_core::session::{
    BackendEvent, Message, PartBody, SessionId, SessionInfo, SessionSnapshot, spawn_session_actor,
};
use tracing::{debug, info};

use super::Command;
use crate::error::Error;
use crate::offline::OfflineBackend;

pub struct ReplayCommand {
    pub file: PathBuf,
    pub session: Option<String>,
    pub json: bool,
    pub config: EngineConfig,
}

#[async_trait]
impl Command for ReplayCommand {
    async fn execute(&self) -> Result<()> {
        self.replay().await.map_err(Into::into)
    }
}

impl ReplayCommand {
    async fn replay(&self) -> std::result::Result<(), Error> {
        let content = tokio::fs::read_to_string(&self.file).await?;
        let events = parse_events(&content)?;

        let session_id = match (&self.session, events.first()) {
            (Some(session), _) => SessionId::from(session.as_str()),
            (None, Some(event)) => event.session_id().clone(),
            (None, None) => {
                return Err(Error::Config(format!(
                    "{} contains no events and no --session was given",
                    self.file.display()
                )));
            }
        };

        info!(
            target: "rudder::replay",
            session_id = %session_id,
            events = events.len(),
            "Replaying events"
        );
        let (handle, task) = spawn_session_actor(
            SessionInfo::new(session_id),
            Arc::new(self.config.clone()),
            Arc::new(OfflineBackend),
        );
        for event in events {
            handle.dispatch_event(event).await?;
        }
        handle.flush_user_parts().await?;
        let snapshot = handle.snapshot().await?;
        handle.shutdown().await?;
        if let Err(e) = task.await {
            debug!(target: "rudder::replay", error = %e, "Session actor ended abnormally");
        }

        let mut stdout = std::io::stdout();
        if self.json {
            writeln!(stdout, "{}", serde_json::to_string_pretty(&snapshot)?)?;
        } else {
            write!(stdout, "{}", render_transcript(&snapshot))?;
        }
        Ok(())
    }
}

/// Parses newline-delimited JSON events, skipping blank lines.
pub fn parse_events(content: &str) -> std::result::Result<Vec<BackendEvent>, Error> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| Error::InvalidEvent {
                line: index + 1,
                source,
            })
        })
        .collect()
}

pub fn render_transcript(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    let title = if snapshot.session.title.is_empty() {
        snapshot.session.id.as_str()
    } else {
        snapshot.session.title.as_str()
    };
    let _ = writeln!(out, "# {title}");
    if let Some(pointer) = snapshot.revert_pointer() {
        let _ = writeln!(out, "(reverted at {pointer})");
    }

    for message in &snapshot.messages {
        let _ = writeln!(out);
        render_message(&mut out, message);
    }

    let _ = writeln!(out);
    let status = match &snapshot.streaming_message_id {
        Some(id) => format!("streaming {id}"),
        None if snapshot.is_streaming => "busy".to_string(),
        None => "idle".to_string(),
    };
    let _ = writeln!(out, "-- {status}, phase {}", snapshot.activity);
    for permission in &snapshot.permissions {
        let _ = writeln!(
            out,
            "-- pending permission {}: {} {}",
            permission.id, permission.kind, permission.title
        );
    }
    for question in &snapshot.questions {
        let _ = writeln!(
            out,
            "-- pending question {} ({} prompts)",
            question.id,
            question.questions.len()
        );
    }
    out
}

fn render_message(out: &mut String, message: &Message) {
    let mut header = format!("[{}] {}", message.role(), message.id);
    if let Some(finish) = message.finish() {
        let _ = write!(header, " finish={finish}");
    }
    if message.aborted_at().is_some() {
        header.push_str(" aborted");
    }
    if message.streaming {
        header.push_str(" streaming");
    }
    let _ = writeln!(out, "{header}");

    for part in &message.parts {
        match &part.body {
            PartBody::Text { text, synthetic } if *synthetic != Some(true) => {
                let _ = writeln!(out, "{text}");
            }
            PartBody::Text { .. } | PartBody::StepStart | PartBody::StepFinish { .. } => {}
            PartBody::Reasoning { text, .. } => {
                let _ = writeln!(out, "  (thinking) {text}");
            }
            PartBody::Tool { tool, state, .. } => {
                let _ = writeln!(out, "  [{tool}: {}]", state.status);
            }
            PartBody::File { filename, url, .. } => {
                let _ = writeln!(out, "  [file {}]", filename.as_deref().unwrap_or(url));
            }
        }
    }
}
