use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{BotCommand, InlineKeyboardButton, InlineKeyboardMarkup, InputFile};
use tracing::{error, info};

use crate::core::router::{BotEvent, CommandRouter, EventKind};
use crate::interfaces::{ButtonRows, MessagingTransport};

/// Telegram-backed transport.
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MessagingTransport for TelegramTransport {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(())
    }

    async fn send_menu(&self, chat_id: i64, text: &str, buttons: ButtonRows) -> Result<()> {
        let rows: Vec<Vec<InlineKeyboardButton>> = buttons
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(label, data)| InlineKeyboardButton::callback(label, data))
                    .collect()
            })
            .collect();
        self.bot
            .send_message(ChatId(chat_id), text)
            .reply_markup(InlineKeyboardMarkup::new(rows))
            .await?;
        Ok(())
    }

    async fn send_document(&self, chat_id: i64, filename: &str, bytes: Vec<u8>) -> Result<()> {
        let file = InputFile::memory(bytes).file_name(filename.to_string());
        self.bot.send_document(ChatId(chat_id), file).await?;
        Ok(())
    }
}

/// Long-polling loop: translates Telegram updates into `BotEvent`s and
/// feeds them to the router. Runs until ctrl-c.
pub async fn run_dispatcher(bot: Bot, router: Arc<CommandRouter>) {
    let commands = vec![
        BotCommand::new("help", "Show all available commands"),
        BotCommand::new("schedule", "Schedule a message: /schedule <time> <text>"),
        BotCommand::new("schedule_list", "Show all scheduled messages"),
        BotCommand::new("delete_all", "Cancel every pending schedule"),
        BotCommand::new("last_seen", "When she last wrote"),
        BotCommand::new("export_log", "Download the conversation log"),
        BotCommand::new("debug", "Toggle debug mode"),
    ];
    if let Err(e) = bot.set_my_commands(commands).await {
        error!("Failed to set telegram bot commands: {}", e);
    }

    info!("Telegram dispatcher starting…");
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![router])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn on_message(msg: Message, router: Arc<CommandRouter>) -> ResponseResult<()> {
    if let Some(text) = msg.text() {
        let kind = if text.trim_start().starts_with('/') {
            EventKind::Command(text.to_string())
        } else {
            EventKind::FreeText(text.to_string())
        };
        router
            .handle(BotEvent {
                sender: msg.chat.id.0,
                kind,
            })
            .await;
    }
    Ok(())
}

async fn on_callback(bot: Bot, q: CallbackQuery, router: Arc<CommandRouter>) -> ResponseResult<()> {
    // Acknowledge to remove the client-side "Loading…" state.
    bot.answer_callback_query(q.id.clone()).await?;

    if let Some(data) = q.data {
        router
            .handle(BotEvent {
                sender: q.from.id.0 as i64,
                kind: EventKind::ButtonPress(data),
            })
            .await;
    }
    Ok(())
}
