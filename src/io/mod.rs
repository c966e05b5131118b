//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `telegram` - Bot API long-poll source, reactions and replies
//! - `openai` - chat-completions classifier
//! - `google_auth` - service-account token exchange
//! - `sheets` - Google Sheets ledger sink
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod google_auth;
pub mod openai;
pub mod prometheus;
pub mod sheets;
pub mod telegram;

// Re-export commonly used types
pub use google_auth::TokenProvider;
pub use openai::OpenAiClassifier;
pub use sheets::SheetsLedger;
pub use telegram::TelegramClient;
