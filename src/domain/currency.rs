//! Currency codes, symbols and conversion to the ledger's base currency

use crate::domain::money::{self, Cents};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Currency {
    Ils,
    Usd,
    Eur,
    Rub,
    Gbp,
    /// Any other ISO-like code reported by the classifier, upper-cased
    Other(String),
}

impl Currency {
    /// Parse a currency code or symbol. Unknown non-empty codes are kept as `Other`.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        let upper = trimmed.to_uppercase();
        Some(match upper.as_str() {
            "ILS" | "NIS" | "₪" | "SHEKEL" => Currency::Ils,
            "USD" | "$" | "DOLLAR" => Currency::Usd,
            "EUR" | "€" | "EURO" => Currency::Eur,
            "RUB" | "RUR" | "₽" | "РУБ" => Currency::Rub,
            "GBP" | "£" | "POUND" => Currency::Gbp,
            _ => Currency::Other(upper),
        })
    }

    pub fn code(&self) -> &str {
        match self {
            Currency::Ils => "ILS",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Rub => "RUB",
            Currency::Gbp => "GBP",
            Currency::Other(code) => code,
        }
    }

    pub fn symbol(&self) -> Option<&'static str> {
        match self {
            Currency::Ils => Some("₪"),
            Currency::Usd => Some("$"),
            Currency::Eur => Some("€"),
            Currency::Rub => Some("₽"),
            Currency::Gbp => Some("£"),
            Currency::Other(_) => None,
        }
    }

    /// Symbol when known, code otherwise. This is what lands in the ledger.
    pub fn display(&self) -> &str {
        match self.symbol() {
            Some(symbol) => symbol,
            None => self.code(),
        }
    }

    /// Detect a currency from free text by symbol or keyword.
    ///
    /// Checked in a fixed order (USD, EUR, RUB, GBP, ILS) so a message
    /// mentioning several currencies resolves deterministically.
    pub fn detect(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        let has_word = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if text.contains('$') || has_word(&["usd", "dollar", "доллар"]) {
            Some(Currency::Usd)
        } else if text.contains('€') || has_word(&["eur", "euro", "евро"]) {
            Some(Currency::Eur)
        } else if text.contains('₽') || has_word(&["руб", "rub", "ruble"]) {
            Some(Currency::Rub)
        } else if text.contains('£') || has_word(&["gbp", "pound", "фунт"]) {
            Some(Currency::Gbp)
        } else if text.contains('₪') || has_word(&["ils", "shekel", "шекел"]) {
            Some(Currency::Ils)
        } else {
            None
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Currency::parse(&raw).ok_or_else(|| serde::de::Error::custom("empty currency code"))
    }
}

/// Fixed exchange rates into the base currency.
///
/// Rates are approximate and configured, not fetched. Codes without a rate
/// convert at 1.0.
#[derive(Debug, Clone)]
pub struct ExchangeRates {
    base: Currency,
    rates: HashMap<String, f64>,
}

impl Default for ExchangeRates {
    fn default() -> Self {
        let rates = HashMap::from([
            ("ILS".to_string(), 1.0),
            ("USD".to_string(), 3.7),
            ("EUR".to_string(), 4.0),
            ("RUB".to_string(), 0.04),
            ("GBP".to_string(), 4.7),
        ]);
        Self { base: Currency::Ils, rates }
    }
}

impl ExchangeRates {
    pub fn new(base: Currency, rates: HashMap<String, f64>) -> Self {
        let rates = rates.into_iter().map(|(code, rate)| (code.to_uppercase(), rate)).collect();
        Self { base, rates }
    }

    pub fn base(&self) -> &Currency {
        &self.base
    }

    pub fn rate(&self, currency: &Currency) -> f64 {
        if *currency == self.base {
            return 1.0;
        }
        self.rates.get(currency.code()).copied().unwrap_or(1.0)
    }

    pub fn to_base(&self, amount: Cents, currency: &Currency) -> Cents {
        money::convert(amount, self.rate(currency))
    }
}
