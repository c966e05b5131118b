//! Bot loop: commands get a reply, everything else goes to the coordinator
//!
//! Messages are consumed one at a time from the poller's channel. The loop
//! ends once the channel is closed and drained.

use crate::domain::error::RelayError;
use crate::domain::types::{ChatId, InboundMessage};
use crate::infra::metrics::Metrics;
use crate::services::coordinator::{Coordinator, Outcome};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sends a plain text reply into a chat
#[async_trait]
pub trait Replier: Send + Sync {
    async fn reply(&self, chat_id: ChatId, text: &str) -> Result<(), RelayError>;
}

const USAGE: &str = "Hey! I'm your money tracker bot. Just send me messages like:\n\n\
\"Bought groceries 1500₽\"\n\
\"300₽ on coffee\"\n\
\"Salary 5000₪\"\n\
\"+200 freelance\"\n\n\
Each message becomes one row in your sheet. A 👍 means it was saved; \
no reaction means something went wrong, so just send it again.\n\n\
Commands:\n\
/start – This intro\n\
/help – Quick guide\n\
/table – Your Sheets link\n\
/stats – What's been saved";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Table,
    Stats,
    Unknown(String),
}

impl Command {
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "table" => Command::Table,
            "stats" => Command::Stats,
            _ => Command::Unknown(name.to_string()),
        }
    }
}

pub struct Bot {
    coordinator: Coordinator,
    replier: Arc<dyn Replier>,
    spreadsheet_url: String,
    metrics: Arc<Metrics>,
}

impl Bot {
    pub fn new(
        coordinator: Coordinator,
        replier: Arc<dyn Replier>,
        spreadsheet_url: String,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { coordinator, replier, spreadsheet_url, metrics }
    }

    /// Consume messages until the channel closes
    pub async fn run(&self, mut rx: mpsc::Receiver<InboundMessage>) {
        info!("bot_loop_started");
        while let Some(message) = rx.recv().await {
            self.dispatch(&message).await;
        }
        info!("bot_loop_drained");
    }

    pub async fn dispatch(&self, message: &InboundMessage) {
        match message.command() {
            Some(name) => self.answer(message.chat_id, Command::parse(name)).await,
            None => {
                // Failures are already logged by the coordinator
                if let Ok(Outcome::Duplicate) = self.coordinator.handle(message).await {
                    debug!(key = %message.key(), "duplicate_ignored");
                }
            }
        }
    }

    fn reply_text(&self, command: &Command) -> String {
        match command {
            Command::Start | Command::Help => USAGE.to_string(),
            Command::Table => format!("📊 Your sheet:\n{}", self.spreadsheet_url),
            Command::Stats => {
                let snapshot = self.metrics.snapshot();
                format!(
                    "📊 Since start:\nRecorded: {}\nFailed: {}\nDuplicates skipped: {}",
                    snapshot.rows_recorded,
                    self.metrics.failed_total(),
                    snapshot.duplicates_skipped
                )
            }
            Command::Unknown(name) => format!("Unknown command /{}. Try /help.", name),
        }
    }

    async fn answer(&self, chat_id: ChatId, command: Command) {
        self.metrics.record_command();
        let text = self.reply_text(&command);
        if let Err(e) = self.replier.reply(chat_id, &text).await {
            warn!(chat_id = %chat_id, command = ?command, error = %e, "command_reply_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::currency::ExchangeRates;
    use crate::services::coordinator::tests::{coffee, message, FakeClassifier, MemoryLedger, RecordingAcks};
    use chrono::FixedOffset;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingReplier {
        replies: Mutex<Vec<(ChatId, String)>>,
    }

    #[async_trait]
    impl Replier for RecordingReplier {
        async fn reply(&self, chat_id: ChatId, text: &str) -> Result<(), RelayError> {
            self.replies.lock().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    struct Harness {
        ledger: Arc<MemoryLedger>,
        replier: Arc<RecordingReplier>,
        bot: Bot,
    }

    fn harness() -> Harness {
        let ledger = Arc::new(MemoryLedger::default());
        let replier = Arc::new(RecordingReplier::default());
        let metrics = Arc::new(Metrics::new());
        let coordinator = Coordinator::new(
            Arc::new(FakeClassifier::answering(coffee())),
            ledger.clone(),
            Arc::new(RecordingAcks::default()),
            ExchangeRates::default(),
            FixedOffset::east_opt(0).unwrap(),
            100,
            metrics.clone(),
        );
        let bot = Bot::new(
            coordinator,
            replier.clone(),
            "https://docs.google.com/spreadsheets/d/sheet-1".to_string(),
            metrics,
        );
        Harness { ledger, replier, bot }
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("start"), Command::Start);
        assert_eq!(Command::parse("HELP"), Command::Help);
        assert_eq!(Command::parse("process"), Command::Unknown("process".to_string()));
    }

    #[tokio::test]
    async fn test_table_replies_with_sheet_url() {
        let h = harness();
        h.bot.dispatch(&message(1, "/table")).await;

        let replies = h.replier.replies.lock().clone();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].1.contains("https://docs.google.com/spreadsheets/d/sheet-1"));
        assert!(h.ledger.rows.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stats_counts_recorded_messages() {
        let h = harness();
        h.bot.dispatch(&message(1, "100₽ coffee")).await;
        h.bot.dispatch(&message(2, "/stats")).await;

        let replies = h.replier.replies.lock().clone();
        assert!(replies[0].1.contains("Recorded: 1"), "{}", replies[0].1);
        assert!(replies[0].1.contains("Failed: 0"));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let h = harness();
        h.bot.dispatch(&message(1, "/process")).await;
        assert_eq!(h.replier.replies.lock()[0].1, "Unknown command /process. Try /help.");
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let h = harness();
        let (tx, rx) = mpsc::channel(10);
        tx.send(message(1, "100₽ coffee")).await.unwrap();
        tx.send(message(2, "/start")).await.unwrap();
        tx.send(message(3, "100₽ coffee")).await.unwrap();
        drop(tx);

        h.bot.run(rx).await;

        assert_eq!(h.ledger.rows.lock().len(), 2);
        assert_eq!(h.replier.replies.lock().len(), 1);
    }
}
