//! Expense Event lifecycle: raw message -> classified expense -> ledger row
//!
//! The types enforce the no-partial-rows rule: a `LedgerRow` can only be
//! built from a `ClassifiedExpense`, and that only exists once the classifier
//! has answered.

use crate::domain::currency::{Currency, ExchangeRates};
use crate::domain::money::{cents_to_f64, Cents};
use crate::domain::types::InboundMessage;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Maximum length of the brief description, in characters
pub const MAX_DESCRIPTION_CHARS: usize = 50;

/// Ledger date column format (dd-mm-yy)
pub const LEDGER_DATE_FORMAT: &str = "%d-%m-%y";

pub const EXPENSE_CATEGORIES: &[&str] = &[
    "Groceries",
    "Transport",
    "Housing",
    "Utilities",
    "Communication",
    "Health & Medical",
    "Clothing",
    "Entertainment",
    "Restaurants & Cafes",
    "Education",
    "Gifts",
    "Sports & Fitness",
    "Beauty",
    "Other",
];

pub const INCOME_CATEGORIES: &[&str] =
    &["Salary", "Freelance", "Side Job", "Investment", "Debt Return", "Gift", "Other"];

pub const FALLBACK_CATEGORY: &str = "Other";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionKind {
    #[default]
    Expense,
    Income,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Expense => "Expense",
            TransactionKind::Income => "Income",
        }
    }

    /// Case-insensitive parse; anything unrecognised is `None`
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "expense" | "expenses" | "spend" => Some(TransactionKind::Expense),
            "income" | "earning" => Some(TransactionKind::Income),
            _ => None,
        }
    }

    pub fn categories(&self) -> &'static [&'static str] {
        match self {
            TransactionKind::Expense => EXPENSE_CATEGORIES,
            TransactionKind::Income => INCOME_CATEGORIES,
        }
    }

    /// Map a free-form category onto this kind's closed set, case-insensitively.
    pub fn canonical_category(&self, category: &str) -> &'static str {
        let wanted = category.trim();
        self.categories()
            .iter()
            .find(|c| c.eq_ignore_ascii_case(wanted))
            .copied()
            .unwrap_or(FALLBACK_CATEGORY)
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of classifying one message
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: TransactionKind,
    pub amount: Cents,
    pub currency: Option<Currency>,
    pub category: String,
    pub description: String,
}

/// Truncate to at most `MAX_DESCRIPTION_CHARS` characters on a char boundary
pub fn bound_description(text: &str) -> String {
    text.trim().chars().take(MAX_DESCRIPTION_CHARS).collect::<String>().trim_end().to_string()
}

/// One received message, before classification
#[derive(Debug, Clone)]
pub struct ExpenseEvent {
    /// Correlation id for logs (UUIDv7, time-sortable)
    pub id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl ExpenseEvent {
    pub fn from_message(message: &InboundMessage) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            text: message.text.trim().to_string(),
            received_at: message.sent_at,
        }
    }

    pub fn enrich(self, classification: Classification) -> ClassifiedExpense {
        ClassifiedExpense { event: self, classification }
    }
}

/// An expense event with its classifier output attached
#[derive(Debug, Clone)]
pub struct ClassifiedExpense {
    pub event: ExpenseEvent,
    pub classification: Classification,
}

impl ClassifiedExpense {
    /// Build the ledger row. Missing currency resolves to the base currency.
    pub fn to_row(&self, rates: &ExchangeRates, offset: FixedOffset) -> LedgerRow {
        let c = &self.classification;
        let currency = c.currency.clone().unwrap_or_else(|| rates.base().clone());
        LedgerRow {
            date: self.event.received_at.with_timezone(&offset).format(LEDGER_DATE_FORMAT).to_string(),
            kind: c.kind,
            description: c.description.clone(),
            category: c.category.clone(),
            amount: c.amount,
            amount_base: rates.to_base(c.amount, &currency),
            currency,
            input: self.event.text.clone(),
        }
    }
}

/// One row of the ledger sheet
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    pub date: String,
    pub kind: TransactionKind,
    pub description: String,
    pub category: String,
    pub amount: Cents,
    pub currency: Currency,
    /// Amount converted into the base currency
    pub amount_base: Cents,
    /// Original message text
    pub input: String,
}

impl LedgerRow {
    pub const COLUMNS: usize = 8;

    pub fn headers(base: &Currency) -> Vec<String> {
        vec![
            "Date".to_string(),
            "Type".to_string(),
            "Description".to_string(),
            "Category".to_string(),
            "Amount".to_string(),
            "Currency".to_string(),
            format!("Amount in {}", base.code()),
            "Input".to_string(),
        ]
    }

    /// Cell values in column order
    pub fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::Text(self.date.clone()),
            Cell::Text(self.kind.as_str().to_string()),
            Cell::Text(self.description.clone()),
            Cell::Text(self.category.clone()),
            Cell::Amount(self.amount),
            Cell::Text(self.currency.display().to_string()),
            Cell::Amount(self.amount_base),
            Cell::Text(self.input.clone()),
        ]
    }
}

/// One ledger cell. Text is written verbatim, amounts as numbers.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Amount(Cents),
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Text(text) => serializer.serialize_str(text),
            Cell::Amount(cents) => serializer.serialize_f64(cents_to_f64(*cents)),
        }
    }
}
