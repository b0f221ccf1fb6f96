use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use teloxide::Bot;
use tracing::info;

use lovenote::config::BotConfig;
use lovenote::core::convlog::ConversationLog;
use lovenote::core::persist::JsonBinStore;
use lovenote::core::replies::{CannedReplies, ChatCompletionGenerator, ReplyGenerator};
use lovenote::core::router::CommandRouter;
use lovenote::core::store::ScheduleStore;
use lovenote::core::ticker::{DeliveryTicker, TickerConfig};
use lovenote::core::timeparse::TimeResolver;
use lovenote::interfaces::MessagingTransport;
use lovenote::interfaces::telegram::{TelegramTransport, run_dispatcher};
use lovenote::logging;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    info!("🚀 Starting lovenote…");

    let config = BotConfig::load()?;
    let offset = config.offset()?;

    let backend = Arc::new(JsonBinStore::new(
        &config.jsonbin_base_url,
        &config.jsonbin_bin_id,
        &config.jsonbin_master_key,
    ));
    let store = Arc::new(ScheduleStore::load(backend).await?);

    let bot = Bot::new(&config.bot_token);
    let transport: Arc<dyn MessagingTransport> = Arc::new(TelegramTransport::new(bot.clone()));
    let convlog = Arc::new(ConversationLog::new(offset));

    let replies: Arc<dyn ReplyGenerator> = match &config.llm_api_key {
        Some(key) => Arc::new(ChatCompletionGenerator::new(
            &config.llm_base_url,
            key,
            &config.llm_model,
        )),
        None => Arc::new(CannedReplies),
    };

    let resolver = TimeResolver::new(offset, config.schedule_date);
    let router = Arc::new(CommandRouter::new(
        store.clone(),
        transport.clone(),
        convlog,
        replies,
        resolver,
        config.operator_chat_id,
        config.recipient_chat_id,
    ));

    let ticker = DeliveryTicker::new(
        store,
        transport,
        config.recipient_chat_id,
        config.operator_chat_id,
        offset,
        TickerConfig {
            tick_interval: Duration::from_secs(config.tick_interval_secs),
            ack_flush_interval: Duration::from_secs(1),
            ack_delay_secs: (config.ack_delay_min_secs, config.ack_delay_max_secs),
        },
    );
    ticker.spawn();

    run_dispatcher(bot, router).await;
    info!("lovenote stopped. Bye! 👋");
    Ok(())
}
