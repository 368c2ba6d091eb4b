//! Exchange-side venue (Coinbase Exchange REST API)

pub mod coinbase;

pub use coinbase::{CoinbaseClient, OrderFill, Side};
