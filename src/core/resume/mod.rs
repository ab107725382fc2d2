//! Decides whether a conversation view must reattach to a running generation.
//!
//! A [`ResumeCoordinator`] lives as long as one mounted conversation view. It
//! moves `Idle -> Checking -> Resuming | Skipped`, and back to `Idle` once an
//! attached stream ends or a reattach fails:
//!
//! - a check needs loaded history whose last message is user-authored;
//! - no check runs while a stream subscription is live;
//! - an in-flight record, or a registry that cannot be read, leads to a
//!   reattach;
//! - a missing, completed or cancelled record is skipped.
//!
//! Once attached, `append-message` notifications for the stream are merged
//! into the local message list unless a message with the same id is already
//! there.

pub mod transport;

use crate::core::config::ResumeConfig;
use crate::core::message::Message;
use crate::core::streams::notify::NotificationSubscription;
use crate::core::streams::{AppendNotification, NotificationHub, StreamStatus, StreamStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

pub use transport::{conversation_topic, HttpResumeTransport, Reattached, ResumeTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No stream registry is configured.
    NotConfigured,
    NoRecord,
    Completed,
    Cancelled,
    /// The registry said in-flight but the server had nothing to attach to.
    NothingToResume,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::NotConfigured => "not-configured",
            SkipReason::NoRecord => "no-record",
            SkipReason::Completed => "completed",
            SkipReason::Cancelled => "cancelled",
            SkipReason::NothingToResume => "nothing-to-resume",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeState {
    Idle,
    Checking,
    /// `stream_id` is `None` when reattaching without a registry answer.
    Resuming { stream_id: Option<String> },
    Skipped(SkipReason),
}

/// What happened to one incoming notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Appended(String),
    Duplicate(String),
    Malformed(String),
}

pub struct ResumeCoordinator {
    conversation_id: String,
    store: Option<Arc<dyn StreamStore>>,
    transport: Arc<dyn ResumeTransport>,
    hub: Arc<NotificationHub>,
    debounce: Duration,
    state: ResumeState,
    messages: Vec<Message>,
    history_loaded: bool,
    mounted: bool,
    mount_check_pending: bool,
    last_checked_len: Option<usize>,
    recheck_at: Option<Instant>,
    subscription: Option<NotificationSubscription>,
    last_error: Option<String>,
    _forwarder: Option<DropGuard>,
}

impl ResumeCoordinator {
    /// `store` is `None` when the stream registry is not configured.
    pub fn new(
        conversation_id: impl Into<String>,
        store: Option<Arc<dyn StreamStore>>,
        transport: Arc<dyn ResumeTransport>,
        hub: Arc<NotificationHub>,
        config: &ResumeConfig,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            store,
            transport,
            hub,
            debounce: Duration::from_millis(config.debounce_millis()),
            state: ResumeState::Idle,
            messages: Vec::new(),
            history_loaded: false,
            mounted: false,
            mount_check_pending: false,
            last_checked_len: None,
            recheck_at: None,
            subscription: None,
            last_error: None,
            _forwarder: None,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn state(&self) -> &ResumeState {
        &self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Error from the most recent failed reattach, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Installs persisted history. A mount that was waiting for it checks now.
    pub async fn load_history(&mut self, messages: Vec<Message>) -> &ResumeState {
        self.messages = messages;
        self.history_loaded = true;
        if self.mount_check_pending {
            self.mount_check_pending = false;
            self.check().await;
        }
        &self.state
    }

    /// Runs the mount check once. Before history is loaded the check is
    /// deferred to [`Self::load_history`].
    pub async fn mount(&mut self) -> &ResumeState {
        if self.mounted {
            return &self.state;
        }
        self.mounted = true;
        if self.history_loaded {
            self.check().await;
        } else {
            debug!(
                conversation_id = %self.conversation_id,
                "Deferring resume check until history loads"
            );
            self.mount_check_pending = true;
        }
        &self.state
    }

    /// Appends a locally produced message and schedules a debounced re-check.
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        if self.mounted && self.history_loaded {
            self.recheck_at = Some(Instant::now() + self.debounce);
        }
    }

    /// Waits out a scheduled re-check and runs it if the message count moved
    /// since the last check.
    pub async fn settle(&mut self) -> &ResumeState {
        let Some(deadline) = self.recheck_at else {
            return &self.state;
        };
        tokio::time::sleep_until(deadline).await;
        self.recheck_at = None;
        if self.last_checked_len != Some(self.messages.len()) {
            self.check().await;
        }
        &self.state
    }

    async fn check(&mut self) {
        if !self.history_loaded {
            return;
        }
        if self.subscription.is_some() || matches!(self.state, ResumeState::Checking) {
            return;
        }
        match self.messages.last() {
            Some(message) if message.role.is_user() => {}
            _ => {
                debug!(
                    conversation_id = %self.conversation_id,
                    "Last message is not user-authored; not checking"
                );
                return;
            }
        }
        self.last_checked_len = Some(self.messages.len());

        let Some(store) = self.store.clone() else {
            self.skip(SkipReason::NotConfigured);
            return;
        };

        self.state = ResumeState::Checking;
        match store.lookup_latest(&self.conversation_id).await {
            Ok(None) => self.skip(SkipReason::NoRecord),
            Ok(Some(record)) => match record.status() {
                StreamStatus::Cancelled => self.skip(SkipReason::Cancelled),
                StreamStatus::Completed => self.skip(SkipReason::Completed),
                StreamStatus::InFlight => self.reattach(Some(record.stream_id)).await,
            },
            Err(err) => {
                warn!(
                    conversation_id = %self.conversation_id,
                    error = %err,
                    "Stream registry lookup failed; reattaching anyway"
                );
                self.reattach(None).await;
            }
        }
    }

    fn skip(&mut self, reason: SkipReason) {
        debug!(
            conversation_id = %self.conversation_id,
            reason = reason.as_str(),
            "Skipping stream resumption"
        );
        self.state = ResumeState::Skipped(reason);
    }

    async fn reattach(&mut self, stream_id: Option<String>) {
        self.state = ResumeState::Resuming {
            stream_id: stream_id.clone(),
        };
        let result = self
            .transport
            .reattach(&self.conversation_id, stream_id.as_deref())
            .await;

        match result {
            Ok(Reattached::NothingToResume) => self.skip(SkipReason::NothingToResume),
            Ok(Reattached::Attached {
                stream_id: attached,
                forward,
            }) => {
                let topic = attached.or(stream_id);
                if let Some(topic) = &topic {
                    self.subscription = Some(self.hub.subscribe(topic));
                }
                if let Some(forward) = forward {
                    let token = CancellationToken::new();
                    let cancelled = token.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancelled.cancelled() => {}
                            _ = forward => {}
                        }
                    });
                    self._forwarder = Some(token.drop_guard());
                }
                info!(
                    conversation_id = %self.conversation_id,
                    stream_id = topic.as_deref().unwrap_or("unknown"),
                    "Reattached to generation stream"
                );
                self.last_error = None;
                self.state = ResumeState::Resuming { stream_id: topic };
            }
            Err(err) => {
                warn!(
                    conversation_id = %self.conversation_id,
                    error = %err,
                    "Failed to reattach to generation stream"
                );
                self.last_error = Some(err);
                self.state = ResumeState::Idle;
            }
        }
    }

    /// Merges one raw notification into the local message list.
    pub fn merge_notification(&mut self, raw: &str) -> MergeOutcome {
        let parsed = AppendNotification::parse(raw).and_then(|notification| {
            let id = notification.message_id()?;
            Ok((notification, id))
        });
        let (notification, id) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(conversation_id = %self.conversation_id, error = %err, "Dropping notification");
                return MergeOutcome::Malformed(err.to_string());
            }
        };

        if self.messages.iter().any(|message| message.id == id) {
            debug!(conversation_id = %self.conversation_id, message_id = %id, "Duplicate notification");
            return MergeOutcome::Duplicate(id);
        }

        match notification.decode_message() {
            Ok(message) => {
                self.messages.push(message);
                MergeOutcome::Appended(id)
            }
            Err(err) => {
                warn!(conversation_id = %self.conversation_id, error = %err, "Dropping notification");
                MergeOutcome::Malformed(err.to_string())
            }
        }
    }

    /// Waits for and merges the next notification. Returns `None` when not
    /// attached or once the stream has ended.
    pub async fn next_notification(&mut self) -> Option<MergeOutcome> {
        let raw = self.subscription.as_mut()?.next().await;
        match raw {
            Some(raw) => Some(self.merge_notification(&raw)),
            None => {
                debug!(conversation_id = %self.conversation_id, "Generation stream ended");
                self.subscription = None;
                self._forwarder = None;
                self.state = ResumeState::Idle;
                None
            }
        }
    }

    /// Merges notifications until the stream ends, returning how many
    /// messages were appended.
    pub async fn drain_notifications(&mut self) -> usize {
        let mut appended = 0;
        while let Some(outcome) = self.next_notification().await {
            if matches!(outcome, MergeOutcome::Appended(_)) {
                appended += 1;
            }
        }
        appended
    }
}
