use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::convlog::ConversationLog;
use crate::core::error::{BotError, BotResult};
use crate::core::replies::ReplyGenerator;
use crate::core::session::{EditField, EditState, SessionTable};
use crate::core::store::{ScheduleStore, Status};
use crate::core::timeparse::TimeResolver;
use crate::interfaces::{ButtonRows, MessagingTransport};

#[derive(Debug, Clone)]
pub enum EventKind {
    Command(String),
    ButtonPress(String),
    FreeText(String),
}

/// One inbound interaction, already stripped of transport detail.
#[derive(Debug, Clone)]
pub struct BotEvent {
    pub sender: i64,
    pub kind: EventKind,
}

/// Dispatches operator interactions into store and session operations and
/// renders every outcome back through the transport. All errors stop here:
/// nothing an operator types may crash the process.
pub struct CommandRouter {
    store: Arc<ScheduleStore>,
    transport: Arc<dyn MessagingTransport>,
    sessions: Mutex<SessionTable>,
    convlog: Arc<ConversationLog>,
    replies: Arc<dyn ReplyGenerator>,
    resolver: TimeResolver,
    operator: i64,
    recipient: i64,
    debug_mode: AtomicBool,
}

impl CommandRouter {
    pub fn new(
        store: Arc<ScheduleStore>,
        transport: Arc<dyn MessagingTransport>,
        convlog: Arc<ConversationLog>,
        replies: Arc<dyn ReplyGenerator>,
        resolver: TimeResolver,
        operator: i64,
        recipient: i64,
    ) -> Self {
        Self {
            store,
            transport,
            sessions: Mutex::new(SessionTable::new()),
            convlog,
            replies,
            resolver,
            operator,
            recipient,
            debug_mode: AtomicBool::new(false),
        }
    }

    /// Router boundary: logs the inbound message, dispatches it, and turns
    /// any failure into a chat reply.
    pub async fn handle(&self, event: BotEvent) {
        let logged = match &event.kind {
            EventKind::Command(s) | EventKind::FreeText(s) => s.clone(),
            EventKind::ButtonPress(d) => format!("[button] {}", d),
        };
        self.convlog.append(event.sender, &logged);

        let sender = event.sender;
        if let Err(e) = self.dispatch(event).await {
            // Unknown or settled targets invalidate whatever the operator
            // was in the middle of.
            if matches!(e, BotError::NotFound(_) | BotError::InvalidState(_)) {
                self.sessions.lock().await.reset(sender);
            }
            warn!("Interaction from {} failed: {}", sender, e);
            let _ = self.transport.send_text(sender, &self.render_error(&e)).await;
        }
    }

    pub async fn session_of(&self, operator: i64) -> EditState {
        self.sessions.lock().await.get(operator)
    }

    async fn dispatch(&self, event: BotEvent) -> BotResult<()> {
        match event.kind {
            EventKind::Command(line) => self.on_command(event.sender, &line).await,
            EventKind::ButtonPress(data) => self.on_button(event.sender, &data).await,
            EventKind::FreeText(text) => self.on_free_text(event.sender, &text).await,
        }
    }

    async fn on_command(&self, sender: i64, line: &str) -> BotResult<()> {
        let line = line.trim();
        let (cmd, args) = match line.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };
        debug!("Command {} from {}", cmd, sender);

        // A fresh top-level command always preempts a dangling edit.
        self.sessions.lock().await.reset(sender);

        if cmd == "/start" {
            self.reply(sender, "Hehe hii 👋 I'm your lovenote bot! 💕").await;
            return Ok(());
        }
        if sender != self.operator {
            return Err(BotError::Unauthorized);
        }

        match cmd {
            "/help" => {
                let buttons: ButtonRows = vec![
                    vec![("🔄 Refresh".into(), "refresh".into())],
                    vec![("🗓 List Schedules".into(), "list".into())],
                ];
                self.transport
                    .send_menu(sender, HELP_TEXT, buttons)
                    .await
                    .map_err(|e| BotError::Dispatch(e.to_string()))
            }
            "/schedule" => self.create_schedule(sender, args).await,
            "/schedule_list" => self.show_list(sender).await,
            "/delete_all" => {
                let n = self.store.delete_all().await?;
                self.reply(sender, &format!("🗑 Cancelled {} pending schedule(s).", n))
                    .await;
                Ok(())
            }
            "/last_seen" => {
                let text = match self.convlog.last_seen(self.recipient) {
                    Some(at) => format!("👀 Last seen {} 💕", at.format("%Y-%m-%d %H:%M:%S")),
                    None => "👀 No messages from her yet!".to_string(),
                };
                self.reply(sender, &text).await;
                Ok(())
            }
            "/export_log" => self
                .transport
                .send_document(sender, "conversation-log.txt", self.convlog.export())
                .await
                .map_err(|e| BotError::Dispatch(e.to_string())),
            "/debug" => {
                let was = self.debug_mode.fetch_xor(true, Ordering::SeqCst);
                let text = if was {
                    "🐞 Debug mode OFF"
                } else {
                    "🐞 Debug mode ON — errors will include details"
                };
                self.reply(sender, text).await;
                Ok(())
            }
            other => Err(BotError::UnknownCommand(other.to_string())),
        }
    }

    async fn create_schedule(&self, sender: i64, args: &str) -> BotResult<()> {
        if args.is_empty() {
            return Err(BotError::Validation(
                "usage: /schedule <time> <message>, e.g. /schedule 18:30 dinner soon! 🍜".into(),
            ));
        }
        let now = self.now();

        // The time expression may span up to three tokens ("2026-09-01 6:30
        // pm"); try the longest prefix first so the meridiem is never
        // swallowed into the message body.
        let mut parsed = None;
        for k in (1..=3).rev() {
            if let Some((head, rest)) = split_after_tokens(args, k)
                && let Ok(at) = self.resolver.resolve(head, now)
            {
                parsed = Some((at, rest));
                break;
            }
        }
        let Some((fire_at, body)) = parsed else {
            // A bare, valid time with nothing after it is a missing body,
            // not a time problem.
            if self.resolver.resolve(args, now).is_ok() {
                return Err(BotError::Validation("the message text is missing".into()));
            }
            let head = split_after_tokens(args, 1).map_or(args, |(h, _)| h);
            return Err(BotError::Parse(head.to_string()));
        };

        let record = self.store.create(fire_at, body, now).await?;
        info!("Operator scheduled {} for {}", record.id, record.fire_at);
        self.reply(
            sender,
            &format!(
                "✅ Scheduled for {} 💌\n“{}”",
                record.fire_at.format("%Y-%m-%d %H:%M"),
                record.body
            ),
        )
        .await;
        Ok(())
    }

    async fn show_list(&self, sender: i64) -> BotResult<()> {
        let rows = self.store.list(Some(Status::Pending)).await;
        if rows.is_empty() {
            self.sessions.lock().await.set(sender, EditState::Listing);
            self.reply(sender, "🗓 No schedules right now! Use /schedule to add one 💌")
                .await;
            return Ok(());
        }

        let mut text = String::from("🗓 Upcoming messages:\n");
        let mut buttons: ButtonRows = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            text.push_str(&format!(
                "\n{}. {} — {}",
                i + 1,
                row.fire_at.format("%m-%d %H:%M"),
                row.preview
            ));
            buttons.push(vec![(
                format!("🔎 {}. {}", i + 1, row.fire_at.format("%H:%M")),
                format!("view:{}", row.id),
            )]);
        }

        self.sessions.lock().await.set(sender, EditState::Listing);
        self.transport
            .send_menu(sender, &text, buttons)
            .await
            .map_err(|e| BotError::Dispatch(e.to_string()))
    }

    async fn on_button(&self, sender: i64, data: &str) -> BotResult<()> {
        if sender != self.operator {
            return Err(BotError::Unauthorized);
        }
        debug!("Button {} from {}", data, sender);

        if data == "refresh" {
            self.reply(sender, "✅ Refreshed successfully!").await;
            return Ok(());
        }
        if data == "list" || data == "back" {
            return self.show_list(sender).await;
        }
        if let Some(id) = data.strip_prefix("view:") {
            return self.show_detail(sender, id).await;
        }
        if let Some(id) = data.strip_prefix("edit_time:") {
            return self.prompt_for_value(sender, id, EditField::Time).await;
        }
        if let Some(id) = data.strip_prefix("edit_msg:") {
            return self.prompt_for_value(sender, id, EditField::Message).await;
        }
        if let Some(id) = data.strip_prefix("del:") {
            let removed = self.store.delete_one(id).await?;
            self.sessions.lock().await.reset(sender);
            let text = if removed {
                "🗑 Deleted! That one won't be sent."
            } else {
                "🤷 That schedule was already gone."
            };
            self.reply(sender, text).await;
            return Ok(());
        }

        self.reply(sender, "🤔 Unknown action. Try again.").await;
        Ok(())
    }

    async fn show_detail(&self, sender: i64, id: &str) -> BotResult<()> {
        let record = self.store.get(id).await?;
        let status = match record.status {
            Status::Pending => "pending",
            Status::Delivered => "delivered",
            Status::Cancelled => "cancelled",
        };
        let text = format!(
            "📌 {} ({})\n\n“{}”\n\nWhat would you like to change?",
            record.fire_at.format("%Y-%m-%d %H:%M"),
            status,
            record.body
        );
        let buttons: ButtonRows = vec![
            vec![
                ("⏰ Edit time".into(), format!("edit_time:{}", record.id)),
                ("💬 Edit message".into(), format!("edit_msg:{}", record.id)),
            ],
            vec![
                ("🗑 Delete".into(), format!("del:{}", record.id)),
                ("⬅️ Back".into(), "back".into()),
            ],
        ];

        self.sessions
            .lock()
            .await
            .set(sender, EditState::AwaitingFieldChoice { id: record.id.clone() });
        self.transport
            .send_menu(sender, &text, buttons)
            .await
            .map_err(|e| BotError::Dispatch(e.to_string()))
    }

    async fn prompt_for_value(&self, sender: i64, id: &str, field: EditField) -> BotResult<()> {
        // Settled records are not editable; fail before prompting.
        let record = self.store.get(id).await?;
        if record.status != Status::Pending {
            return Err(BotError::InvalidState(id.to_string()));
        }

        let prompt = match field {
            EditField::Time => "⏰ Send me the new time (e.g. 18:30 or 6:30pm)",
            EditField::Message => "💬 Send me the new message text",
        };
        self.sessions.lock().await.set(
            sender,
            EditState::AwaitingNewValue {
                id: id.to_string(),
                field,
            },
        );
        self.reply(sender, prompt).await;
        Ok(())
    }

    async fn on_free_text(&self, sender: i64, text: &str) -> BotResult<()> {
        let state = self.sessions.lock().await.get(sender);

        if sender == self.operator
            && let EditState::AwaitingNewValue { id, field } = state
        {
            return self.apply_new_value(sender, &id, field, text).await;
        }

        if sender == self.recipient {
            let reply = match self.replies.generate(text).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("Reply generation failed, using canned reply: {}", e);
                    "Hehe 💕".to_string()
                }
            };
            self.reply(sender, &reply).await;
            return Ok(());
        }

        if sender == self.operator {
            self.reply(sender, "💡 Use /help to see what I can do!").await;
        }
        // Anyone else: silence.
        Ok(())
    }

    /// The next free-text input while `AwaitingNewValue` is the new value.
    /// A bad value re-prompts in the same state; only unknown/settled
    /// targets abort the session.
    async fn apply_new_value(
        &self,
        sender: i64,
        id: &str,
        field: EditField,
        text: &str,
    ) -> BotResult<()> {
        let now = self.now();
        let result = match field {
            EditField::Time => match self.resolver.resolve(text, now) {
                Ok(at) => self.store.update_time(id, at, now).await,
                Err(e) => Err(e),
            },
            EditField::Message => self.store.update_body(id, text).await,
        };

        match result {
            Ok(record) => {
                self.sessions.lock().await.reset(sender);
                self.reply(
                    sender,
                    &format!(
                        "✅ Saved! {} — “{}”",
                        record.fire_at.format("%Y-%m-%d %H:%M"),
                        record.body
                    ),
                )
                .await;
                Ok(())
            }
            Err(e @ (BotError::Parse(_) | BotError::Validation(_))) => {
                // Stay in AwaitingNewValue and ask again.
                self.reply(sender, &format!("{} Try again?", self.render_error(&e)))
                    .await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn reply(&self, chat: i64, text: &str) {
        if let Err(e) = self.transport.send_text(chat, text).await {
            warn!("Could not reply to {}: {}", chat, e);
        }
    }

    fn render_error(&self, e: &BotError) -> String {
        let base = match e {
            BotError::Validation(msg) => format!("🙈 {}.", msg),
            BotError::Parse(expr) => format!(
                "🤔 I couldn't understand the time “{}”. Try 18:30 or 6:30pm.",
                expr
            ),
            BotError::NotFound(_) => "😵 That schedule doesn't exist anymore.".to_string(),
            BotError::InvalidState(_) => {
                "⏳ That one already went out (or was cancelled), so it can't be changed.".to_string()
            }
            BotError::Unauthorized => "🚫 Sorry, only my admin can use this command!".to_string(),
            BotError::UnknownCommand(_) => {
                "Hehe I blur liao 😅 I don't quite get what you mean… maybe try /help? 💕".to_string()
            }
            BotError::Dispatch(_) => "⚠️ I couldn't send that message.".to_string(),
            BotError::Persistence(_) => "⚠️ I couldn't save that — please try again.".to_string(),
        };
        if self.debug_mode.load(Ordering::SeqCst) {
            format!("{}\n[debug] {}", base, e)
        } else {
            base
        }
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.resolver.offset())
    }
}

const HELP_TEXT: &str = "🛠 Available Commands:\n\
/schedule <time> <message> — Schedule a message (18:30, 6:30pm…)\n\
/schedule_list — Show all scheduled messages\n\
/delete_all — Cancel every pending schedule\n\
/last_seen — When she last wrote\n\
/export_log — Download the conversation log\n\
/debug — Toggle debug mode\n\
/help — Show this help menu";

/// Splits `s` after its first `k` whitespace-separated tokens, preserving
/// the remainder verbatim (message bodies keep their inner spacing).
fn split_after_tokens(s: &str, k: usize) -> Option<(&str, &str)> {
    let mut seen = 0;
    let mut in_token = false;
    for (i, c) in s.char_indices() {
        if c.is_whitespace() {
            if in_token {
                seen += 1;
                in_token = false;
                if seen == k {
                    return Some((&s[..i], s[i..].trim_start()));
                }
            }
        } else {
            in_token = true;
        }
    }
    None
}
