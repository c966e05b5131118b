//! Domain models - expense lifecycle and message-source types
//!
//! This module contains the canonical data types used throughout the system:
//! - `expense` - Expense Event, Classification, Ledger Row
//! - `money` - integer minor-unit amounts
//! - `currency` - currency codes, symbols, exchange rates
//! - `types` - Telegram identifiers and inbound messages
//! - `error` - pipeline error taxonomy

pub mod currency;
pub mod error;
pub mod expense;
pub mod money;
pub mod types;

// Re-export commonly used types at module level
pub use currency::{Currency, ExchangeRates};
pub use error::RelayError;
pub use expense::{Classification, ClassifiedExpense, ExpenseEvent, LedgerRow, TransactionKind};
pub use money::Cents;
pub use types::{ChatId, DeliveryKey, InboundMessage, MessageId, UpdateId};
