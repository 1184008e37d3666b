use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};

use crate::config::tables;
use crate::error::Result;
use crate::fetcher::RowWriter;

/// A message addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub receiver_id: String,
    /// Category tag, e.g. `warning`.
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<()>;
}

/// Writes notifications as unread rows of the notifications table.
pub struct TableNotifier {
    writer: Arc<dyn RowWriter>,
}

impl TableNotifier {
    pub fn new(writer: Arc<dyn RowWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl NotificationSink for TableNotifier {
    async fn send(&self, n: Notification) -> Result<()> {
        let row = serde_json::json!({
            "receiver_id": n.receiver_id,
            "type": n.kind,
            "content": n.content,
            "is_read": false,
        });
        self.writer.insert(tables::NOTIFICATIONS, row).await
    }
}

/// Send without waiting; failures are logged and otherwise dropped.
pub fn notify_detached(sink: Arc<dyn NotificationSink>, notification: Notification) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let receiver = notification.receiver_id.clone();
        let kind = notification.kind.clone();
        match sink.send(notification).await {
            Ok(()) => debug!(receiver = %receiver, kind = %kind, "Notification sent"),
            Err(e) => error!(receiver = %receiver, kind = %kind, "Notification failed: {e}"),
        }
    })
}
