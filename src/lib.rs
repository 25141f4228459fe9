//! Hop Ledger - score & rank backend for the Hop Bunny web game
//!
//! Tracks cumulative scores, per-game high scores, dense leaderboard ranks,
//! and two-sided referral settlements over a MongoDB document store.

pub mod auth;
pub mod config;
pub mod db;
pub mod ledger;
pub mod routes;
pub mod server;
pub mod types;

pub use types::{LedgerError, Result};
