//! Notification delivery for the vigil alerting core.
//!
//! Channels implement [`NotificationChannel`]; the [`manager::NotificationManager`]
//! maps the channel names configured on a rule to registered channels and
//! plugs into the evaluation pipeline as its
//! [`vigil_alert::message::ChannelInvoker`].

pub mod manager;
pub mod webhook;


use anyhow::Result;
use async_trait::async_trait;

use vigil_alert::message::NotificationMessage;

/// Errors that can occur within the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or contains an
    /// invalid value.
    #[error("notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// No channel is registered under the requested name.
    #[error("notify: unknown channel '{0}'")]
    UnknownChannel(String),

    /// An HTTP request to an external notification endpoint failed.
    #[error("notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The external endpoint returned a non-success response.
    #[error("notify: API error: status={status}, body={body}")]
    Api { status: u16, body: String },
}

/// A delivery channel sending notification messages to an external service.
///
/// Delivery failures are isolated by the caller; a failing channel never
/// affects the other channels configured on the same rule.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers the message through this channel.
    async fn send(&self, message: &NotificationMessage) -> Result<()>;

    /// Returns the channel type name (e.g., `"webhook"`).
    fn channel_type(&self) -> &str;
}
