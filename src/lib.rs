// OffPay - offline two-party payments
//
// transport: one framed message per connection between two paired peers
// ledger:    settled balance, pending entries, exactly-once settlement
// storage:   sled-backed persistence for the ledger
// intent:    the human-readable payment message carried by the transport

pub mod intent;
pub mod ledger;
pub mod logging;
pub mod storage;
pub mod transport;
