//! Websocket adapter for [`NotificationSource`].
//!
//! Connects, sends `room:join` for the event, waits for the join's `done`,
//! then yields every `event:<kind>` frame as a [`Notification`]. Other
//! frames are ignored.

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use uuid::Uuid;

use super::{ChannelError, NotificationSource, NotificationStream};
use crate::config::SyncConfig;
use crate::frame::{Frame, NOTIFY_PREFIX, Status};
use crate::notification::Notification;

pub struct WsSource {
    url: String,
    connect_timeout: Duration,
}

impl WsSource {
    #[must_use]
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self { url: url.into(), connect_timeout }
    }

    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.ws_url.clone(), config.connect_timeout)
    }
}

#[async_trait::async_trait]
impl NotificationSource for WsSource {
    async fn connect(&self, event_id: Uuid) -> Result<NotificationStream, ChannelError> {
        let (mut ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| ChannelError::Connect(format!("timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        let join = Frame::join(event_id);
        let text = join.to_json().map_err(|e| ChannelError::Decode(e.to_string()))?;
        ws.send(Message::Text(text.into()))
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        // Wait for the join's terminal reply; anything else before it is noise.
        loop {
            let frame = match ws.next().await {
                Some(Ok(Message::Text(text))) => match Frame::from_json(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(error = %e, "ignoring undecodable frame before join");
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Err(ChannelError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ChannelError::Connect(e.to_string())),
            };
            if frame.parent_id != Some(join.id) {
                continue;
            }
            match frame.status {
                Status::Done => break,
                Status::Error | Status::Cancel => {
                    let message = frame.message().unwrap_or("join failed").to_owned();
                    return Err(ChannelError::Rejected(message));
                }
                Status::Request | Status::Item => {}
            }
        }

        let stream = ws.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => decode(text.as_str()),
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::Connect(e.to_string()))),
            }
        });
        Ok(stream.boxed())
    }
}

/// Decode one text message. `None` for frames that are not notifications.
fn decode(text: &str) -> Option<Result<Notification, ChannelError>> {
    let frame = match Frame::from_json(text) {
        Ok(frame) => frame,
        Err(e) => return Some(Err(ChannelError::Decode(e.to_string()))),
    };
    if frame.prefix() != NOTIFY_PREFIX {
        return None;
    }
    Some(Notification::from_frame(&frame).map_err(|e| ChannelError::Decode(e.to_string())))
}
