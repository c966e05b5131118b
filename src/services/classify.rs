//! Turning free text into a `Classification`
//!
//! The language model is asked for a strict JSON object. Its answer is
//! cleaned up here: fences stripped, every field defaulted and bounded,
//! categories folded into the closed set for the transaction kind. When the
//! model answers with something that is not JSON at all, a keyword-based
//! parser reads the amount, kind and currency straight from the text.
//!
//! Transport failures never reach this module; they surface as
//! `RelayError::ClassifierUnavailable` from the client.

use crate::domain::currency::Currency;
use crate::domain::error::RelayError;
use crate::domain::expense::{
    bound_description, Classification, TransactionKind, EXPENSE_CATEGORIES, FALLBACK_CATEGORY,
    INCOME_CATEGORIES,
};
use crate::domain::money::{cents_from_f64, parse_cents, Cents};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

/// Anything that can classify one message's text
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, RelayError>;
}

pub const SYSTEM_PROMPT: &str =
    "You are a financial transaction analysis assistant. Respond only in JSON format.";

const INCOME_KEYWORDS: &[&str] =
    &["+", "salary", "income", "earned", "получил", "зарплата", "доход", "заработал"];

/// Build the user prompt for one message
pub fn build_prompt(text: &str) -> String {
    format!(
        r#"You are a financial tracking assistant. Analyze the following transaction message and extract information.

Message: "{text}"

Return result STRICTLY in JSON format with the following fields:
- type: "Expense" or "Income"
- amount: numeric value (number only, without currency symbol)
- currency: currency code (ILS, USD, EUR, RUB, GBP, etc.), determined from context
- category: one of the categories below
- description: BRIEF description in ENGLISH (2-3 words max, what was bought or earned, not the full message)

Expense categories: {expense}
Income categories: {income}

If the amount is not stated, set 0.
If the transaction type is not explicit, determine it from context (default Expense).
Detect currency from symbols (₪ $ € £ ₽) or words (shekel, dollar, euro, ruble, руб).

Examples:
- "Купил хлеб за 100 рублей" -> {{"type": "Expense", "amount": 100, "currency": "RUB", "category": "Groceries", "description": "Bread"}}
- "Spent 50$ on taxi" -> {{"type": "Expense", "amount": 50, "currency": "USD", "category": "Transport", "description": "Taxi"}}
- "Got salary 5000₪" -> {{"type": "Income", "amount": 5000, "currency": "ILS", "category": "Salary", "description": "Salary"}}
- "+200 freelance" -> {{"type": "Income", "amount": 200, "currency": "ILS", "category": "Freelance", "description": "Freelance"}}

Return ONLY JSON, no additional text."#,
        text = text,
        expense = EXPENSE_CATEGORIES.join(", "),
        income = INCOME_CATEGORIES.join(", "),
    )
}

/// Strip markdown fences and return the outermost `{...}` object, if any
pub fn extract_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&content[start..=end])
}

/// Classifier answer before validation. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct RawClassification {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn amount_from_value(value: &Value) -> Option<Cents> {
    match value {
        Value::Number(n) => n.as_f64().and_then(cents_from_f64),
        Value::String(s) => {
            let cleaned: String =
                s.chars().filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-')).collect();
            parse_cents(&cleaned).ok()
        }
        _ => None,
    }
}

/// Validate a raw answer into a `Classification`.
///
/// `text` is the original message, used when the description is missing.
pub fn normalize(raw: RawClassification, text: &str, base: &Currency) -> Classification {
    let kind = raw.kind.as_deref().and_then(TransactionKind::parse).unwrap_or_default();
    let amount = raw.amount.as_ref().and_then(amount_from_value).unwrap_or(0);
    let currency = raw.currency.as_deref().and_then(Currency::parse).unwrap_or_else(|| base.clone());
    let category = kind.canonical_category(raw.category.as_deref().unwrap_or(FALLBACK_CATEGORY));

    let description = raw
        .description
        .as_deref()
        .map(bound_description)
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| bound_description(text));

    Classification {
        kind,
        amount,
        currency: Some(currency),
        category: category.to_string(),
        description,
    }
}

/// First run of digits in `text`, with an optional `.` fraction
fn first_number(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];
    let bytes = rest.as_bytes();
    let mut end = 0;
    let mut seen_dot = false;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            i += 1;
            end = i;
        } else if bytes[i] == b'.' && !seen_dot && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
            seen_dot = true;
            i += 1;
        } else {
            break;
        }
    }
    Some(&rest[..end])
}

/// Read a classification directly from the message text
pub fn fallback_parse(text: &str, base: &Currency) -> Classification {
    let lower = text.to_lowercase();
    let amount = first_number(text).and_then(|n| parse_cents(n).ok()).unwrap_or(0);
    let kind = if INCOME_KEYWORDS.iter().any(|k| lower.contains(k)) {
        TransactionKind::Income
    } else {
        TransactionKind::Expense
    };

    Classification {
        kind,
        amount,
        currency: Some(Currency::detect(text).unwrap_or_else(|| base.clone())),
        category: FALLBACK_CATEGORY.to_string(),
        description: bound_description(text),
    }
}

/// How a classifier reply was interpreted
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Structured(Classification),
    /// The reply was not JSON; the message text was parsed instead
    Fallback(Classification),
}

/// Interpret the model's reply content for message `text`
pub fn parse_reply(content: &str, text: &str, base: &Currency) -> Parsed {
    let raw = extract_json(content).and_then(|json| serde_json::from_str::<RawClassification>(json).ok());
    match raw {
        Some(raw) => Parsed::Structured(normalize(raw, text, base)),
        None => Parsed::Fallback(fallback_parse(text, base)),
    }
}
