use std::sync::Mutex;

use chrono::{DateTime, FixedOffset, Utc};

/// One inbound message as seen by the bot.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub at: DateTime<FixedOffset>,
    pub sender: i64,
    pub text: String,
}

/// Append-only log of inbound messages. Backs `/last_seen` and
/// `/export_log`; process-local by design.
pub struct ConversationLog {
    offset: FixedOffset,
    entries: Mutex<Vec<LogEntry>>,
}

impl ConversationLog {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            offset,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn append(&self, sender: i64, text: &str) {
        let entry = LogEntry {
            at: Utc::now().with_timezone(&self.offset),
            sender,
            text: text.to_string(),
        };
        self.entries.lock().expect("conversation log lock").push(entry);
    }

    /// Timestamp of the most recent inbound message from `sender`, if any.
    pub fn last_seen(&self, sender: i64) -> Option<DateTime<FixedOffset>> {
        self.entries
            .lock()
            .expect("conversation log lock")
            .iter()
            .rev()
            .find(|e| e.sender == sender)
            .map(|e| e.at)
    }

    /// Plain-text dump for `/export_log`.
    pub fn export(&self) -> Vec<u8> {
        let entries = self.entries.lock().expect("conversation log lock");
        let mut out = String::new();
        for e in entries.iter() {
            out.push_str(&format!(
                "[{}] {}: {}\n",
                e.at.format("%Y-%m-%d %H:%M:%S"),
                e.sender,
                e.text
            ));
        }
        out.into_bytes()
    }
}
