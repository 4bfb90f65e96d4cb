//! Domain models for snapguard.
//!
//! Canonical definitions for the core entities:
//! - `Snapshot`: one captured UI hierarchy and its provenance
//! - `Script` / `Step`: recorded automation steps referencing snapshots
//! - `ValidationResult`: findings of the snapshot checks
//! - `RecoveryReport`: outcome of a recovery pass

pub mod digest;
pub mod error;
pub mod recovery;
pub mod script;
pub mod snapshot;
pub mod validation;

pub use digest::ContentHash;
pub use error::{Result, SnapguardError, XmlError};
pub use recovery::{FailureKind, RecoveryReport, RecoveryResult, StepOutcome, StrategyId};
pub use script::{ElementLocator, PoolEntry, Script, ScriptMetadata, Step};
pub use snapshot::{DeviceInfo, PageInfo, Rect, RepairProvenance, ScreenSize, Snapshot};
pub use validation::{
    IssueCategory, IssueCode, IssueSeverity, ScriptValidationResult, Severity, SnapshotCheck,
    StepValidation, ValidationIssue, ValidationResult,
};
