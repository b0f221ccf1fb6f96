use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};

use crate::core::error::{BotError, BotResult};

/// Resolves operator time expressions into absolute timestamps in the
/// bot's fixed timezone.
///
/// Accepted forms:
/// - `18:30` (24-hour, colon required)
/// - `6:30pm`, `6:30 PM`, `6pm` (12-hour with meridiem)
/// - `2026-09-01 18:30` (explicit date overriding the configured one)
///
/// Bare times resolve against `pinned_date` when configured, otherwise
/// against today's date in the configured offset.
#[derive(Debug, Clone, Copy)]
pub struct TimeResolver {
    offset: FixedOffset,
    pinned_date: Option<NaiveDate>,
}

impl TimeResolver {
    pub fn new(offset: FixedOffset, pinned_date: Option<NaiveDate>) -> Self {
        Self {
            offset,
            pinned_date,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn resolve(
        &self,
        expr: &str,
        now: DateTime<FixedOffset>,
    ) -> BotResult<DateTime<FixedOffset>> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(BotError::Parse(expr.to_string()));
        }

        // Explicit "YYYY-MM-DD <time>" takes precedence over the
        // configured date.
        let (date, time_part) = match expr.split_once(char::is_whitespace) {
            Some((head, rest)) if head.parse::<NaiveDate>().is_ok() => {
                (head.parse::<NaiveDate>().ok(), rest.trim())
            }
            _ => (None, expr),
        };
        let date = date
            .or(self.pinned_date)
            .unwrap_or_else(|| now.date_naive());

        let time = parse_time_of_day(time_part)
            .ok_or_else(|| BotError::Parse(expr.to_string()))?;

        date.and_time(time)
            .and_local_timezone(self.offset)
            .single()
            .ok_or_else(|| BotError::Parse(expr.to_string()))
    }
}

fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let lowered = raw.trim().to_ascii_lowercase();

    let (digits, meridiem) = if let Some(head) = lowered.strip_suffix("am") {
        (head.trim_end(), Some(false))
    } else if let Some(head) = lowered.strip_suffix("pm") {
        (head.trim_end(), Some(true))
    } else {
        (lowered.as_str(), None)
    };

    let (hour_str, minute_str) = match digits.split_once(':') {
        Some((h, m)) => (h, Some(m)),
        None => (digits, None),
    };

    let hour: u32 = hour_str.parse().ok()?;
    let minute: u32 = match minute_str {
        Some(m) if m.len() == 2 => m.parse().ok()?,
        Some(_) => return None,
        // A bare hour without a meridiem ("18") is ambiguous.
        None if meridiem.is_none() => return None,
        None => 0,
    };

    let hour = match meridiem {
        Some(pm) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            match (hour, pm) {
                (12, false) => 0,
                (12, true) => 12,
                (h, false) => h,
                (h, true) => h + 12,
            }
        }
        None => hour,
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
}
