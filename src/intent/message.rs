// Payment intent messages
//
// Human-readable payload carried by the transport:
//   "<sender-label> wants to send ₹<amount>"

use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// Marker preceding the amount in a message
pub const CURRENCY_MARKER: char = '₹';

/// Phrase joining the sender label and the amount
pub const INTENT_PHRASE: &str = "wants to send";

/// Amount assumed when a message carries no parsable number
pub const FALLBACK_AMOUNT: Decimal = Decimal::ONE_HUNDRED;

/// A decoded request to move money from the sender to the receiver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentIntent {
    sender_label: String,
    amount: Decimal,
}

impl PaymentIntent {
    pub fn new(sender_label: &str, amount: Decimal) -> Self {
        Self {
            sender_label: sender_label.trim().to_string(),
            amount,
        }
    }

    pub fn sender_label(&self) -> &str {
        &self.sender_label
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Render the wire text
    pub fn to_message(&self) -> String {
        format!(
            "{} {} {}{}",
            self.sender_label,
            INTENT_PHRASE,
            CURRENCY_MARKER,
            self.amount.normalize()
        )
    }

    /// Decode a received message. Never fails: an unknown label becomes
    /// "unknown" and an unparsable amount becomes `FALLBACK_AMOUNT`.
    pub fn parse(message: &str) -> Self {
        let label = message
            .find(INTENT_PHRASE)
            .map(|idx| message[..idx].trim())
            .filter(|label| !label.is_empty())
            .unwrap_or("unknown");

        Self::new(label, parse_amount(message))
    }
}

impl fmt::Display for PaymentIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_message())
    }
}

/// Recover the amount from a message.
///
/// Takes the text after the last currency marker, or the last
/// whitespace-separated token when there is no marker. Anything that is not a
/// positive number yields `FALLBACK_AMOUNT`.
pub fn parse_amount(message: &str) -> Decimal {
    let candidate = match message.rfind(CURRENCY_MARKER) {
        Some(idx) => &message[idx + CURRENCY_MARKER.len_utf8()..],
        None => message.split_whitespace().last().unwrap_or(""),
    };

    Decimal::from_str(candidate.trim())
        .ok()
        .filter(|amount| *amount > Decimal::ZERO)
        .unwrap_or(FALLBACK_AMOUNT)
}
