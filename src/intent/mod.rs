// Intent module - what the bytes on the wire mean to the wallet

mod message;

pub use message::{
    parse_amount, PaymentIntent, CURRENCY_MARKER, FALLBACK_AMOUNT, INTENT_PHRASE,
};
