mod client;
mod ledger;

pub use ledger::XrplLedger;
