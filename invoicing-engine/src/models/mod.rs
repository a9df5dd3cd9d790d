//! Domain models for invoicing-engine.

mod credit_note;
mod customer;
mod invoice;
mod line_item;
mod product;
mod user;

pub use credit_note::{
    CreateCreditNote, CreditNote, CreditNoteDocument, CreditNoteStatus, ListCreditNotesFilter,
    UpdateCreditNote,
};
pub use customer::Customer;
pub use invoice::{
    Certification, CertificationRecord, CreateInvoice, FneStatus, Invoice, InvoiceDocument,
    InvoiceStatus, ListInvoicesFilter, UpdateInvoice,
};
pub use line_item::{LineItem, LineItemRequest, LineItemView, DEFAULT_ITEM_DESCRIPTION};
pub use product::Product;
pub use user::User;
