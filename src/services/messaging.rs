//! Outbound announcements to a chat channel.
//!
//! Announcements are best effort: callers log failures and carry on.

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::info;

use crate::state::models::{LeaderboardEntry, QualifierScore};

/// Rows rendered in a leaderboard summary.
pub const SUMMARY_ROWS: usize = 10;

/// Errors raised by a [`MessageSink`].
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Could not build the HTTP client.
    #[cfg(feature = "webhook-messaging")]
    #[error("failed to build webhook client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// The webhook request did not complete.
    #[cfg(feature = "webhook-messaging")]
    #[error("webhook request failed")]
    Request {
        #[source]
        source: reqwest::Error,
    },
    /// The webhook answered with an unexpected status.
    #[error("webhook answered with status {status}")]
    Status {
        /// HTTP status code returned.
        status: u16,
    },
    /// The webhook answer carried no message id.
    #[error("webhook response did not include a message id")]
    MissingMessageId,
}

/// Chat collaborator used by the scoring engine.
pub trait MessageSink: Send + Sync {
    /// Post a plain message.
    fn send_message(&self, channel_id: String, text: String) -> BoxFuture<'static, Result<(), MessagingError>>;

    /// One-line announcement of a new score.
    fn send_score_event(
        &self,
        channel_id: String,
        map_name: String,
        score: QualifierScore,
    ) -> BoxFuture<'static, Result<(), MessagingError>> {
        self.send_message(channel_id, score_line(&map_name, &score))
    }

    /// Create or edit the leaderboard summary of a map, returning the id of the message holding it.
    fn send_leaderboard_update(
        &self,
        channel_id: String,
        message_id: Option<String>,
        text: String,
    ) -> BoxFuture<'static, Result<String, MessagingError>>;
}

/// Text of a score announcement.
pub fn score_line(map_name: &str, score: &QualifierScore) -> String {
    format!(
        "{} has scored {}{} on {}!",
        score.username,
        score.modified_score,
        if score.full_combo { " (Full Combo!)" } else { "" },
        map_name
    )
}

/// Text of an edited-in-place leaderboard summary: a title and the top rows.
pub fn leaderboard_summary(tournament_name: &str, map_name: &str, entries: &[LeaderboardEntry]) -> String {
    let mut text = format!("**{tournament_name} Leaderboards**\n__{map_name}__");
    if entries.is_empty() {
        text.push_str("\nNo scores yet");
    }
    for (rank, entry) in entries.iter().take(SUMMARY_ROWS).enumerate() {
        text.push_str(&format!(
            "\n#{} {} {}{}",
            rank + 1,
            entry.score.username,
            entry.score.modified_score,
            if entry.score.full_combo { " (FC)" } else { "" }
        ));
    }
    text
}

/// Sink that only logs, used when no chat integration is configured.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl MessageSink for LogSink {
    fn send_message(&self, channel_id: String, text: String) -> BoxFuture<'static, Result<(), MessagingError>> {
        Box::pin(async move {
            info!(channel = %channel_id, %text, "announcement");
            Ok(())
        })
    }

    fn send_leaderboard_update(
        &self,
        channel_id: String,
        message_id: Option<String>,
        text: String,
    ) -> BoxFuture<'static, Result<String, MessagingError>> {
        Box::pin(async move {
            let message_id = message_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            info!(channel = %channel_id, message = %message_id, %text, "leaderboard summary");
            Ok(message_id)
        })
    }
}

#[cfg(feature = "webhook-messaging")]
pub use webhook::WebhookSink;

#[cfg(feature = "webhook-messaging")]
mod webhook {
    use std::sync::Arc;

    use futures::future::BoxFuture;
    use reqwest::{Client, StatusCode};
    use serde::{Deserialize, Serialize};
    use tracing::debug;

    use super::{MessageSink, MessagingError};

    #[derive(Serialize)]
    struct WebhookBody<'a> {
        content: &'a str,
    }

    #[derive(Deserialize)]
    struct WebhookMessage {
        id: Option<String>,
    }

    /// Posts announcements to a chat webhook.
    ///
    /// The webhook is bound to a single channel, so channel ids are only logged.
    #[derive(Clone)]
    pub struct WebhookSink {
        client: Client,
        url: Arc<str>,
    }

    impl WebhookSink {
        /// Sink posting to `url`.
        pub fn new(url: &str) -> Result<Self, MessagingError> {
            let client = Client::builder()
                .build()
                .map_err(|source| MessagingError::ClientBuilder { source })?;
            Ok(Self {
                client,
                url: Arc::from(url.trim_end_matches('/')),
            })
        }

        async fn post(&self, text: &str) -> Result<String, MessagingError> {
            let response = self
                .client
                .post(format!("{}?wait=true", self.url))
                .json(&WebhookBody { content: text })
                .send()
                .await
                .map_err(|source| MessagingError::Request { source })?;

            if !response.status().is_success() {
                return Err(MessagingError::Status {
                    status: response.status().as_u16(),
                });
            }
            let message: WebhookMessage = response
                .json()
                .await
                .map_err(|source| MessagingError::Request { source })?;
            message.id.ok_or(MessagingError::MissingMessageId)
        }

        /// Edit a message in place. `Ok(false)` when the message no longer exists.
        async fn patch(&self, message_id: &str, text: &str) -> Result<bool, MessagingError> {
            let response = self
                .client
                .patch(format!("{}/messages/{}", self.url, message_id))
                .json(&WebhookBody { content: text })
                .send()
                .await
                .map_err(|source| MessagingError::Request { source })?;

            match response.status() {
                status if status.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                status => Err(MessagingError::Status {
                    status: status.as_u16(),
                }),
            }
        }
    }

    impl MessageSink for WebhookSink {
        fn send_message(&self, channel_id: String, text: String) -> BoxFuture<'static, Result<(), MessagingError>> {
            let sink = self.clone();
            Box::pin(async move {
                debug!(channel = %channel_id, "posting announcement");
                sink.post(&text).await.map(|_| ())
            })
        }

        fn send_leaderboard_update(
            &self,
            channel_id: String,
            message_id: Option<String>,
            text: String,
        ) -> BoxFuture<'static, Result<String, MessagingError>> {
            let sink = self.clone();
            Box::pin(async move {
                if let Some(id) = message_id.filter(|id| !id.is_empty()) {
                    if sink.patch(&id, &text).await? {
                        return Ok(id);
                    }
                    debug!(channel = %channel_id, message = %id, "leaderboard message gone, posting a new one");
                }
                sink.post(&text).await
            })
        }
    }
}
