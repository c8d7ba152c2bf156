//! Library modules for the betsync service.
//!
//! Shared by the server binary and the operator tools (`reset_db`,
//! `import_bets`) so they all go through the same store and ledger code.

pub mod api;
pub mod chain;
pub mod config;
pub mod events;
pub mod explorer;
pub mod ledger;
pub mod reconcile;
pub mod scheduler;
pub mod store;
