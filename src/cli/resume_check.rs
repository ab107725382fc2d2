use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::config::Config;
use crate::core::message::{Message, MessageRole};
use crate::core::resume::{
    HttpResumeTransport, MergeOutcome, Reattached, ResumeCoordinator, ResumeState,
    ResumeTransport,
};
use crate::core::streams::{open_store, NotificationHub};

/// Used when no chat API base URL is known; every reattach fails.
struct NoBaseUrl;

#[async_trait]
impl ResumeTransport for NoBaseUrl {
    async fn reattach(
        &self,
        _conversation_id: &str,
        _stream_id: Option<&str>,
    ) -> Result<Reattached, String> {
        Err("No resume base URL configured (use --base-url or [resume] base_url)".to_string())
    }
}

pub async fn check_resume(
    config: &Config,
    conversation_id: &str,
    base_url: Option<String>,
    history: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let messages = match history {
        Some(path) => load_history(path)?,
        None => vec![Message::new("pending", MessageRole::User)],
    };

    let hub = Arc::new(NotificationHub::default());
    let transport: Arc<dyn ResumeTransport> =
        match base_url.or_else(|| config.resume.base_url.clone()) {
            Some(url) => Arc::new(HttpResumeTransport::new(&url, Arc::clone(&hub))?),
            None => Arc::new(NoBaseUrl),
        };
    let store = open_store(config)?;

    let mut coordinator =
        ResumeCoordinator::new(conversation_id, store, transport, hub, &config.resume);
    coordinator.load_history(messages).await;
    let state = coordinator.mount().await.clone();
    println!("{}", describe_state(&state));
    if let Some(err) = coordinator.last_error() {
        println!("Reattach failed: {err}");
    }

    while let Some(outcome) = coordinator.next_notification().await {
        let content = match &outcome {
            MergeOutcome::Appended(_) => coordinator.messages().last().and_then(Message::content),
            _ => None,
        };
        println!("{}", describe_merge(&outcome, content));
    }
    println!("{} message(s) in view", coordinator.messages().len());
    Ok(())
}

/// Reads a JSON array of messages.
pub(crate) fn load_history(path: &Path) -> Result<Vec<Message>, Box<dyn Error>> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read history {}: {err}", path.display()))?;
    let messages = serde_json::from_str(&contents)
        .map_err(|err| format!("Failed to parse history {}: {err}", path.display()))?;
    Ok(messages)
}

pub(crate) fn describe_state(state: &ResumeState) -> String {
    match state {
        ResumeState::Idle => "Idle: no stream attached".to_string(),
        ResumeState::Checking => "Checking".to_string(),
        ResumeState::Resuming { stream_id: Some(id) } => format!("Resuming stream {id}"),
        ResumeState::Resuming { stream_id: None } => "Resuming (stream unknown)".to_string(),
        ResumeState::Skipped(reason) => format!("Skipped: {}", reason.as_str()),
    }
}

pub(crate) fn describe_merge(outcome: &MergeOutcome, content: Option<&str>) -> String {
    match outcome {
        MergeOutcome::Appended(id) => match content.and_then(|text| text.lines().next()) {
            Some(first) if !first.trim().is_empty() => format!("+ {id}: {}", first.trim()),
            _ => format!("+ {id}"),
        },
        MergeOutcome::Duplicate(id) => format!("= {id} (already present)"),
        MergeOutcome::Malformed(reason) => format!("! dropped: {reason}"),
    }
}
