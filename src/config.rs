use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{FixedOffset, NaiveDate};
use serde::Deserialize;
use tracing::info;

/// Runtime configuration. A `lovenote.toml` in the data dir (or at
/// `$LOVENOTE_CONFIG`) provides defaults; environment variables win for the
/// secrets so nothing sensitive has to live on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub bot_token: String,
    /// The single authorized operator chat.
    pub operator_chat_id: i64,
    /// The single fixed destination of every scheduled message.
    pub recipient_chat_id: i64,

    pub jsonbin_base_url: String,
    pub jsonbin_bin_id: String,
    pub jsonbin_master_key: String,

    /// Fixed timezone, minutes east of UTC. Default is SGT (+08:00).
    pub utc_offset_minutes: i32,
    /// Calendar date bare times resolve against; today when unset.
    pub schedule_date: Option<NaiveDate>,

    pub tick_interval_secs: u64,
    pub ack_delay_min_secs: u64,
    pub ack_delay_max_secs: u64,

    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            operator_chat_id: 0,
            recipient_chat_id: 0,
            jsonbin_base_url: "https://api.jsonbin.io/v3".into(),
            jsonbin_bin_id: String::new(),
            jsonbin_master_key: String::new(),
            utc_offset_minutes: 8 * 60,
            schedule_date: None,
            tick_interval_secs: 15,
            ack_delay_min_secs: 300,
            ack_delay_max_secs: 600,
            llm_api_key: None,
            llm_base_url: "https://api.openai.com/v1".into(),
            llm_model: "gpt-4o-mini".into(),
        }
    }
}

impl BotConfig {
    pub fn load() -> Result<Self> {
        let mut cfg = match config_path() {
            Some(path) if path.exists() => {
                info!("Loading config from {}", path.display());
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
            }
            _ => Self::default(),
        };

        if let Ok(token) = std::env::var("BOT_TOKEN").or_else(|_| std::env::var("TELEGRAM_TOKEN")) {
            cfg.bot_token = token;
        }
        if let Some(id) = env_i64("OPERATOR_CHAT_ID")? {
            cfg.operator_chat_id = id;
        }
        if let Some(id) = env_i64("RECIPIENT_CHAT_ID")? {
            cfg.recipient_chat_id = id;
        }
        if let Ok(bin) = std::env::var("JSONBIN_BIN_ID") {
            cfg.jsonbin_bin_id = bin;
        }
        if let Ok(key) = std::env::var("JSONBIN_MASTER_KEY") {
            cfg.jsonbin_master_key = key;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY")
            && !key.trim().is_empty()
        {
            cfg.llm_api_key = Some(key);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            return Err(anyhow!(
                "❌ BOT_TOKEN or TELEGRAM_TOKEN missing from environment variables"
            ));
        }
        if self.operator_chat_id == 0 || self.recipient_chat_id == 0 {
            return Err(anyhow!(
                "OPERATOR_CHAT_ID and RECIPIENT_CHAT_ID must both be set"
            ));
        }
        if self.jsonbin_bin_id.trim().is_empty() {
            return Err(anyhow!("JSONBIN_BIN_ID must be set"));
        }
        if self.ack_delay_min_secs == 0 || self.ack_delay_min_secs > self.ack_delay_max_secs {
            return Err(anyhow!("ack delay window must be non-empty and ordered"));
        }
        if self.tick_interval_secs == 0 {
            return Err(anyhow!("tick interval must be at least one second"));
        }
        self.offset()?;
        Ok(())
    }

    pub fn offset(&self) -> Result<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| anyhow!("invalid utc_offset_minutes {}", self.utc_offset_minutes))
    }
}

fn env_i64(name: &str) -> Result<Option<i64>> {
    match std::env::var(name) {
        Ok(raw) => {
            let parsed = raw
                .trim()
                .parse::<i64>()
                .with_context(|| format!("{} must be a chat id, got {:?}", name, raw))?;
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}

fn config_path() -> Option<PathBuf> {
    if let Ok(custom) = std::env::var("LOVENOTE_CONFIG") {
        return Some(PathBuf::from(custom));
    }
    dirs::data_dir().map(|d| d.join("lovenote").join("lovenote.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> BotConfig {
        BotConfig {
            bot_token: "123:abc".into(),
            operator_chat_id: 7,
            recipient_chat_id: 8,
            jsonbin_bin_id: "bin".into(),
            ..Default::default()
        }
    }

    #[test]
    fn default_config_is_incomplete() {
        assert!(BotConfig::default().validate().is_err());
    }

    #[test]
    fn filled_config_validates() {
        assert!(valid().validate().is_ok());
        assert_eq!(valid().offset().unwrap().local_minus_utc(), 8 * 3600);
    }

    #[test]
    fn rejects_inverted_ack_window() {
        let cfg = BotConfig {
            ack_delay_min_secs: 10,
            ack_delay_max_secs: 5,
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_extreme_offsets_without_panicking() {
        for minutes in [i32::MAX, i32::MIN, 24 * 60] {
            let cfg = BotConfig {
                utc_offset_minutes: minutes,
                ..valid()
            };
            assert!(cfg.offset().is_err());
            assert!(cfg.validate().is_err());
        }
    }

    #[test]
    fn load_reads_the_config_file_and_lets_env_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lovenote.toml");
        std::fs::write(
            &path,
            r#"
            bot_token = "tok-from-file"
            operator_chat_id = 1
            recipient_chat_id = 2
            jsonbin_bin_id = "bin-from-file"
            tick_interval_secs = 3
            "#,
        )
        .unwrap();

        // SAFETY: no other test in this crate touches process env.
        unsafe {
            std::env::set_var("LOVENOTE_CONFIG", &path);
            std::env::set_var("BOT_TOKEN", "tok-from-env");
            std::env::set_var("OPERATOR_CHAT_ID", "11");
            std::env::remove_var("TELEGRAM_TOKEN");
            std::env::remove_var("RECIPIENT_CHAT_ID");
            std::env::remove_var("JSONBIN_BIN_ID");
        }

        let cfg = BotConfig::load().unwrap();
        assert_eq!(cfg.bot_token, "tok-from-env");
        assert_eq!(cfg.operator_chat_id, 11);
        assert_eq!(cfg.recipient_chat_id, 2);
        assert_eq!(cfg.jsonbin_bin_id, "bin-from-file");
        assert_eq!(cfg.tick_interval_secs, 3);
    }

    #[test]
    fn parses_toml_overrides() {
        let cfg: BotConfig = toml::from_str(
            r#"
            bot_token = "tok"
            operator_chat_id = 1
            recipient_chat_id = 2
            jsonbin_bin_id = "bin"
            utc_offset_minutes = 0
            schedule_date = "2026-09-01"
            tick_interval_secs = 1
            "#,
        )
        .unwrap();
        assert_eq!(cfg.tick_interval_secs, 1);
        assert_eq!(
            cfg.schedule_date,
            NaiveDate::from_ymd_opt(2026, 9, 1)
        );
        assert!(cfg.validate().is_ok());
    }
}
