//! Core domain models shared by every stage of the validation pipeline

pub mod violations;

pub use violations::{
    SentryError, SentryResult, Severity, ValidationReport, ValidationSummary, Violation,
    ViolationCounts,
};
