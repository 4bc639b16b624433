//! Settlement engine for invoice factoring.
//!
//! Businesses register unpaid invoices, escrow collateral against them and sell
//! them at a discount to investors. Debtor payment settles the investor and
//! releases the collateral; a default is covered from collateral first and the
//! insurance pool second. State lives in [`sled`] and every mutation appends to
//! a hash-chained event log.

pub mod access;
pub mod calculator;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod invoice;
pub mod ledger;
pub mod lifecycle;
pub mod pool;
pub mod registry;
pub mod state;
pub mod utils;

pub use config::{DefaultPolicy, PlatformConfig, Rate};
pub use engine::{FactoringEngine, Outcome};
pub use error::EngineError;
pub use events::{Event, EventKind};
pub use invoice::{Identity, Invoice, InvoiceDraft, InvoiceStatus, TimeStamp};
pub use state::PlatformStats;
