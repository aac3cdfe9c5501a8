//! swpics - resumable best-image acquisition for catalog listings.
//!
//! For every pending item in a CSV ledger, opens a browser session on the
//! item's listing page, collects candidate image URLs with several
//! independent heuristics, saves the first one that downloads, and records
//! the completion in the ledger before moving on.

pub mod browser;
pub mod config;
pub mod driver;
pub mod extract;
pub mod fetch;
pub mod ledger;
pub mod rotation;

mod cli;

pub use cli::{is_verbose, run};
