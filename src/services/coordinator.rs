//! Message coordinator: classify, build one row, append, acknowledge
//!
//! Each message is one sequential unit of work. Nothing is written unless the
//! classifier answered; nothing is acknowledged unless the append succeeded.
//! There is no retry: a failed message is recovered by the user resending it.
//!
//! An append that timed out may have landed anyway. Its key is kept as
//! recorded so a redelivery does not write it twice, but it is not
//! acknowledged. A manual resend of that message can still add a second row,
//! which is why the case is logged on its own for the operator to check.

use crate::domain::currency::ExchangeRates;
use crate::domain::error::RelayError;
use crate::domain::expense::{ExpenseEvent, LedgerRow};
use crate::domain::money::format_cents;
use crate::domain::types::{DeliveryKey, InboundMessage};
use crate::infra::metrics::Metrics;
use crate::services::classify::Classifier;
use crate::services::dedup::{DeliveryLog, Seen};
use async_trait::async_trait;
use chrono::FixedOffset;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Append-only destination for ledger rows
#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn append(&self, row: &LedgerRow) -> Result<(), RelayError>;
}

/// Visible confirmation that a message was recorded
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn acknowledge(&self, key: DeliveryKey) -> Result<(), RelayError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The row was appended (and acknowledged, unless the ack failed)
    Recorded(LedgerRow),
    /// This message was already recorded or is being processed
    Duplicate,
}

pub struct Coordinator {
    classifier: Arc<dyn Classifier>,
    ledger: Arc<dyn LedgerSink>,
    acknowledger: Arc<dyn Acknowledger>,
    deliveries: DeliveryLog,
    rates: ExchangeRates,
    utc_offset: FixedOffset,
    metrics: Arc<Metrics>,
}

impl Coordinator {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        ledger: Arc<dyn LedgerSink>,
        acknowledger: Arc<dyn Acknowledger>,
        rates: ExchangeRates,
        utc_offset: FixedOffset,
        dedup_capacity: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            classifier,
            ledger,
            acknowledger,
            deliveries: DeliveryLog::new(dedup_capacity),
            rates,
            utc_offset,
            metrics,
        }
    }

    /// Process one text message end to end
    pub async fn handle(&self, message: &InboundMessage) -> Result<Outcome, RelayError> {
        let start = Instant::now();
        self.metrics.record_received();
        let result = self.process(message).await;
        self.metrics.record_handle_latency(start.elapsed().as_millis() as u64);
        result
    }

    async fn process(&self, message: &InboundMessage) -> Result<Outcome, RelayError> {
        let key = message.key();
        if message.text.trim().is_empty() {
            self.metrics.record_empty();
            warn!(key = %key, "message_empty_rejected");
            return Err(RelayError::EmptyMessage);
        }

        let claim = match self.deliveries.begin(key) {
            Ok(claim) => claim,
            Err(seen) => {
                self.metrics.record_duplicate();
                info!(key = %key, in_flight = %(seen == Seen::InFlight), "message_duplicate_skipped");
                return Ok(Outcome::Duplicate);
            }
        };

        let event = ExpenseEvent::from_message(message);

        let classification = match self.classifier.classify(&event.text).await {
            Ok(c) => c,
            Err(e) => {
                self.metrics.record_classifier_failure();
                error!(event_id = %event.id, key = %key, error = %e, "classification_failed");
                return Err(e);
            }
        };

        let event_id = event.id.clone();
        let row = event.enrich(classification).to_row(&self.rates, self.utc_offset);

        match self.ledger.append(&row).await {
            Ok(()) => {}
            Err(e @ RelayError::LedgerOutcomeUnknown(_)) => {
                claim.commit();
                self.metrics.record_ledger_failure();
                error!(
                    event_id = %event_id,
                    key = %key,
                    input = %row.input,
                    error = %e,
                    "ledger_append_outcome_unknown"
                );
                return Err(e);
            }
            Err(e) => {
                self.metrics.record_ledger_failure();
                error!(event_id = %event_id, key = %key, error = %e, "ledger_append_failed");
                return Err(e);
            }
        }

        claim.commit();
        self.metrics.record_recorded();
        info!(
            event_id = %event_id,
            key = %key,
            kind = %row.kind,
            category = %row.category,
            amount = %format_cents(row.amount),
            currency = %row.currency,
            "message_recorded"
        );

        if let Err(e) = self.acknowledger.acknowledge(key).await {
            self.metrics.record_ack_failure();
            warn!(event_id = %event_id, key = %key, error = %e, "acknowledgment_failed");
        }

        Ok(Outcome::Recorded(row))
    }
}
