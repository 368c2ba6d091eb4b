//! Arbitrage Module
//!
//! Opportunity detection, book-walk sizing, balance-location checks, and
//! the cost model that gates every opportunity.

pub mod costs;
pub mod detector;

pub use costs::{CostModel, TradeCosts};
pub use detector::OpportunityDetector;
