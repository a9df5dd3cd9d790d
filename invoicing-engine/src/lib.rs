//! Invoicing Engine - invoices, credit notes, numbering and FNE certification.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod startup;

pub use error::BillingError;
pub use startup::{init_telemetry, BillingEngine, EngineSettings};
