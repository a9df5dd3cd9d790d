//! Services module for invoicing-engine.

pub mod certification;
pub mod credit_notes;
pub mod database;
pub mod fne;
pub mod invoices;
pub mod locks;
pub mod memory;
pub mod metrics;
pub mod numbering;
pub mod pricing;
pub mod status;
pub mod store;

pub use certification::CertificationCoordinator;
pub use credit_notes::CreditNoteService;
pub use database::Database;
pub use fne::{CertificationProvider, FneHttpClient, MockFneProvider, MockOutcome};
pub use invoices::InvoiceService;
pub use locks::{DocumentGuard, DocumentLocks};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use numbering::{DocumentKind, NumberGenerator};
pub use pricing::{price_items, PricedItems, VatRule};
pub use status::{StatusMachine, StatusPolicy};
pub use store::DocumentStore;
