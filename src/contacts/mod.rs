//! Contacts: phone classification, the contact record, and list intake.

pub mod intake;
pub mod model;
pub mod phone;

pub use intake::{
    CleaningSummary, ContactSheet, IntakeMode, IntakeStats, IntakeValidator, ValidationResult,
    write_contacts_csv,
};
pub use model::ContactRecord;
pub use phone::{LineKind, PhoneClassification, classify};
