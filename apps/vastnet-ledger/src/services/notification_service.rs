use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Outbound messages to users. Delivery is best-effort: callers log failures
/// and never undo ledger writes because of them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, tg_id: i64, text: &str) -> Result<()>;
}

/// Sends through the Telegram Bot API.
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(token: &str) -> Self {
        Self { bot: Bot::new(token) }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, tg_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(tg_id), text)
            .parse_mode(teloxide::types::ParseMode::Html)
            .await
            .with_context(|| format!("Failed to send message to {}", tg_id))?;
        Ok(())
    }
}

/// Used when no bot token is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, tg_id: i64, text: &str) -> Result<()> {
        info!("Notification for {} (not delivered, no bot token): {}", tg_id, text);
        Ok(())
    }
}

/// Delivers notifications off the caller's path. Pending deliveries are kept
/// so a short-lived process can `flush` them before exiting.
#[derive(Clone)]
pub struct NotificationQueue {
    notifier: Arc<dyn Notifier>,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl NotificationQueue {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            pending: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Must be called from within the runtime.
    pub fn send(&self, tg_id: i64, text: String) {
        let notifier = self.notifier.clone();
        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while pending.try_join_next().is_some() {}
        pending.spawn(async move {
            if let Err(e) = notifier.notify(tg_id, &text).await {
                warn!("Failed to notify {}: {:#}", tg_id, e);
            }
        });
    }

    /// Waits for every delivery queued so far.
    pub async fn flush(&self) {
        let mut pending = {
            let mut guard = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!("Notification task failed: {}", e);
            }
        }
    }
}

pub fn referral_bonus_message(bonus: &str, is_first: bool) -> String {
    if is_first {
        format!("🎉 Ваш друг впервые пополнил баланс! Вам начислено <b>{}</b>", bonus)
    } else {
        format!("💸 Ваш друг пополнил баланс. Вам начислено <b>{}</b>", bonus)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records every message; optionally fails delivery.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(i64, String)>>,
        pub fail: bool,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self { sent: Mutex::new(Vec::new()), fail: true }
        }

        pub fn sent(&self) -> Vec<(i64, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, tg_id: i64, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push((tg_id, text.to_string()));
            if self.fail {
                anyhow::bail!("chat not found");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;

    #[tokio::test]
    async fn flush_waits_for_queued_deliveries() {
        let notifier = Arc::new(RecordingNotifier::default());
        let queue = NotificationQueue::new(notifier.clone());

        queue.send(1, "one".to_string());
        queue.send(2, "two".to_string());
        queue.flush().await;

        let mut sent = notifier.sent();
        sent.sort();
        assert_eq!(sent, vec![(1, "one".to_string()), (2, "two".to_string())]);
    }

    #[tokio::test]
    async fn failed_delivery_is_only_logged() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let queue = NotificationQueue::new(notifier.clone());

        queue.send(1, "lost".to_string());
        queue.flush().await;
        assert_eq!(notifier.sent().len(), 1);
    }
}
