//! Services - message handling logic
//!
//! - `classify` - prompt construction and interpretation of classifier replies
//! - `coordinator` - one message in, at most one ledger row out
//! - `dedup` - bounded log of already-recorded deliveries
//! - `bot` - command handling and the consuming loop

pub mod bot;
pub mod classify;
pub mod coordinator;
pub mod dedup;

pub use bot::{Bot, Command, Replier};
pub use classify::Classifier;
pub use coordinator::{Acknowledger, Coordinator, LedgerSink, Outcome};
pub use dedup::DeliveryLog;
