use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::core::store::ScheduleStore;
use crate::interfaces::MessagingTransport;

/// Short affectionate follow-ups sent a little while after each delivery.
pub const ACK_PHRASES: &[&str] = &[
    "Love you! 💕",
    "Muah 😘",
    "Thinking of you 🥺",
    "Hope that made you smile 🥰",
    "Hehe 💖",
];

/// A delayed acknowledgement, process-local by design. Losing unsent acks
/// on restart is tolerable; double-delivering a schedule is not.
#[derive(Debug, Clone)]
pub struct AckJob {
    pub schedule_id: String,
    pub due_at: DateTime<FixedOffset>,
    pub sent: bool,
}

#[derive(Debug, Clone)]
pub struct TickerConfig {
    pub tick_interval: Duration,
    pub ack_flush_interval: Duration,
    /// Uniform window, in seconds, for the ack delay after a delivery.
    pub ack_delay_secs: (u64, u64),
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(15),
            ack_flush_interval: Duration::from_secs(1),
            ack_delay_secs: (300, 600),
        }
    }
}

/// The periodic delivery process. One loop claims and dispatches due
/// schedules, a finer-grained loop flushes the ack queue. Neither loop ever
/// exits on a per-record failure.
pub struct DeliveryTicker {
    store: Arc<ScheduleStore>,
    transport: Arc<dyn MessagingTransport>,
    recipient: i64,
    operator: i64,
    offset: FixedOffset,
    config: TickerConfig,
    acks: Mutex<Vec<AckJob>>,
}

impl DeliveryTicker {
    pub fn new(
        store: Arc<ScheduleStore>,
        transport: Arc<dyn MessagingTransport>,
        recipient: i64,
        operator: i64,
        offset: FixedOffset,
        config: TickerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            recipient,
            operator,
            offset,
            config,
            acks: Mutex::new(Vec::new()),
        })
    }

    /// Starts both loops. The first tick fires immediately, so pending
    /// records whose time passed while the bot was down go out right away.
    pub fn spawn(self: &Arc<Self>) {
        let ticker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ticker.config.tick_interval);
            loop {
                interval.tick().await;
                ticker.run_tick().await;
            }
        });

        let ticker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ticker.config.ack_flush_interval);
            loop {
                interval.tick().await;
                ticker.flush_acks().await;
            }
        });
        info!(
            "Delivery ticker running (tick every {:?}, ack window {}–{}s)",
            self.config.tick_interval, self.config.ack_delay_secs.0, self.config.ack_delay_secs.1
        );
    }

    /// One delivery scan. Claiming (the `Pending -> Delivered` transition)
    /// happens inside the store before anything touches the transport, so a
    /// record can never be dispatched twice.
    pub async fn run_tick(&self) {
        let now = self.now();
        let outcome = self.store.claim_due(now).await;
        if let Some(e) = outcome.persist_error {
            let _ = self
                .transport
                .send_text(
                    self.operator,
                    &format!(
                        "⚠️ Could not save delivery state ({}); due messages will still be sent.",
                        e
                    ),
                )
                .await;
        }

        for record in outcome.claimed {
            match self.transport.send_text(self.recipient, &record.body).await {
                Ok(()) => {
                    info!("Delivered schedule {} ({})", record.id, record.fire_at);
                    let delay = {
                        let (low, high) = self.config.ack_delay_secs;
                        rand::thread_rng().gen_range(low..=high)
                    };
                    self.acks.lock().await.push(AckJob {
                        schedule_id: record.id.clone(),
                        due_at: now + chrono::Duration::seconds(delay as i64),
                        sent: false,
                    });
                }
                Err(e) => {
                    // The record stays Delivered: no retry, or we would be
                    // back to double-delivery risk.
                    error!("Dispatch failed for schedule {}: {}", record.id, e);
                    let _ = self
                        .transport
                        .send_text(
                            self.operator,
                            &format!(
                                "⚠️ Schedule at {} was marked delivered but sending failed: {}",
                                record.fire_at.format("%H:%M"),
                                e
                            ),
                        )
                        .await;
                }
            }
        }
    }

    /// Sends every due, unsent ack. Jobs are marked sent before dispatch; a
    /// failed ack is logged and dropped, never retried.
    pub async fn flush_acks(&self) {
        let now = self.now();
        let due: Vec<AckJob> = {
            let mut acks = self.acks.lock().await;
            let mut due = Vec::new();
            for job in acks.iter_mut() {
                if !job.sent && job.due_at <= now {
                    job.sent = true;
                    due.push(job.clone());
                }
            }
            acks.retain(|j| !j.sent);
            due
        };

        for job in due {
            let phrase = ACK_PHRASES[rand::thread_rng().gen_range(0..ACK_PHRASES.len())];
            if let Err(e) = self.transport.send_text(self.recipient, phrase).await {
                warn!("Ack for schedule {} not sent: {}", job.schedule_id, e);
            }
        }
    }

    /// Snapshot of the queued (unsent) ack jobs.
    pub async fn queued_acks(&self) -> Vec<AckJob> {
        self.acks.lock().await.clone()
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}
