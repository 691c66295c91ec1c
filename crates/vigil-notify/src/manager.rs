use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use vigil_alert::message::{ChannelInvoker, NotificationMessage};

use crate::{NotifyError, NotificationChannel};

/// Maps configured channel names to registered channels and dispatches
/// notification messages to them.
///
/// One `notify` call covers exactly one named channel; the pipeline invokes
/// it once per channel configured on the rule and isolates failures.
#[derive(Default)]
pub struct NotificationManager {
    channels: HashMap<String, Box<dyn NotificationChannel>>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, channel: Box<dyn NotificationChannel>) {
        self.channels.insert(name.into(), channel);
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }
}

#[async_trait]
impl ChannelInvoker for NotificationManager {
    async fn notify(&self, channel: &str, message: &NotificationMessage) -> Result<()> {
        let ch = self
            .channels
            .get(channel)
            .ok_or_else(|| NotifyError::UnknownChannel(channel.to_string()))?;
        tracing::debug!(
            channel = %channel,
            channel_type = ch.channel_type(),
            status = %message.status,
            "dispatching notification"
        );
        ch.send(message).await
    }
}
