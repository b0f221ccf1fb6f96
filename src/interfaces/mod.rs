pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// Rows of inline buttons: each button is `(label, callback data)`.
pub type ButtonRows = Vec<Vec<(String, String)>>;

/// Narrow seam over the messaging transport. The router and the delivery
/// ticker only ever talk to chats through this trait, which keeps the whole
/// scheduling core runnable against a fake in tests.
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;
    async fn send_menu(&self, chat_id: i64, text: &str, buttons: ButtonRows) -> Result<()>;
    async fn send_document(&self, chat_id: i64, filename: &str, bytes: Vec<u8>) -> Result<()>;
}
