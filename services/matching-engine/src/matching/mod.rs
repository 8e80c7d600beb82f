//! Matching logic module
//!
//! Implements price-time priority matching: crossing rules, trade
//! execution with fees, and the pre-match TIF/flag policy.

pub mod crossing;
pub mod executor;
pub mod policy;

pub use crossing::can_match;
pub use executor::{MatchError, MatchExecutor};
