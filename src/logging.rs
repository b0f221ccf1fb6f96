use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize standard structured logging. `LOVENOTE_LOG=debug` bumps the
/// level; safe to call more than once.
pub fn init() {
    let level = match std::env::var("LOVENOTE_LOG").as_deref() {
        Ok("debug") => Level::DEBUG,
        Ok("warn") => Level::WARN,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
