use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// One processed message, written after the reply is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub timestamp_ms: i64,
    pub channel: String,
    pub chat_id: String,
    pub message: String,
    /// "question" or "action".
    pub intent: String,
    pub provider: String,
    pub reply: String,
    /// `Outcome` label on success, error kind otherwise.
    pub outcome: String,
    #[serde(default)]
    pub attempts: u32,
}

impl ConversationRecord {
    pub fn new(channel: &str, chat_id: &str, message: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            message: message.to_string(),
            intent: String::new(),
            provider: String::new(),
            reply: String::new(),
            outcome: String::new(),
            attempts: 0,
        }
    }
}

/// Fire-and-forget sink. `record` never blocks the caller and never fails
/// the reply.
pub trait ConversationSink: Send + Sync {
    fn record(&self, record: ConversationRecord);
}

pub struct NullConversationLog;

impl ConversationSink for NullConversationLog {
    fn record(&self, record: ConversationRecord) {
        debug!(chat_id = %record.chat_id, outcome = %record.outcome, "conversation record dropped");
    }
}

/// Appends records as JSON lines from a background task.
pub struct JsonlConversationLog {
    tx: mpsc::UnboundedSender<ConversationRecord>,
}

impl JsonlConversationLog {
    /// Must be called inside a tokio runtime.
    pub fn spawn(path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ConversationRecord>();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = append_line(&path, &record) {
                    error!(error = %e, path = %path.display(), "Failed to write conversation log");
                }
            }
        });
        Self { tx }
    }
}

impl ConversationSink for JsonlConversationLog {
    fn record(&self, record: ConversationRecord) {
        if self.tx.send(record).is_err() {
            error!("Conversation log writer is gone");
        }
    }
}

fn append_line(path: &PathBuf, record: &ConversationRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(record)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_jsonl_log_appends_records() {
        let dir = std::env::temp_dir().join(format!("homebot-log-{}", uuid::Uuid::new_v4()));
        let path = dir.join("conversations.jsonl");
        let log = JsonlConversationLog::spawn(path.clone());

        let mut rec = ConversationRecord::new("telegram", "42", "Salon sıcaklığı kaç?");
        rec.intent = "question".to_string();
        rec.outcome = "ok".to_string();
        log.record(rec.clone());
        log.record(rec);

        let mut lines = 0;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            lines = std::fs::read_to_string(&path)
                .map(|s| s.lines().count())
                .unwrap_or(0);
            if lines == 2 {
                break;
            }
        }
        assert_eq!(lines, 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let first: ConversationRecord =
            serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first.chat_id, "42");
        assert_eq!(first.intent, "question");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
