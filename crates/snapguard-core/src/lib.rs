//! Snapguard Core Library
//!
//! Storage, validation and recovery of UI-hierarchy snapshots attached to
//! recorded automation scripts.

pub mod cache;
pub mod config;
pub mod domain;
pub mod executor;
pub mod locator;
pub mod obs;
pub mod pool;
pub mod recovery;
pub mod telemetry;
pub mod validator;
pub mod xml;

pub use domain::{
    ContentHash, DeviceInfo, ElementLocator, FailureKind, IssueCategory, IssueCode, IssueSeverity,
    PageInfo, PoolEntry, Rect, RecoveryReport, RecoveryResult, RepairProvenance, Result,
    ScreenSize, Script, ScriptMetadata, ScriptValidationResult, Severity, SnapguardError, Snapshot,
    SnapshotCheck, Step, StepOutcome, StepValidation, StrategyId, ValidationIssue,
    ValidationResult, XmlError,
};

pub use cache::{CacheEntry, CacheStats, SnapshotCache, StepLink};
pub use config::{CacheConfig, RecoveryConfig, SnapguardConfig, ValidationLimits};
pub use executor::{
    prepare_execution, ExecutableStep, ExecutionBundle, RecoverySummary, StepExecutor,
};
pub use locator::{refresh_locator, resolve, resolve_in, MatchTier, ResolvedElement};
pub use pool::{
    export_script, import_script, optimize, pool_stats, read_script_file, restore,
    write_atomic, write_script_file, PoolStats,
};
pub use recovery::{
    confidence_score, read_recovery_artifact, render_recovery_report_md, render_validation_md,
    write_recovery_artifact, LookupKey, RecoveryEngine, RecoveryStrategy, ScriptSiblings,
    SnapshotSource, StrategyChain,
};
pub use telemetry::init_tracing;
pub use validator::{QuickCheck, Validator};
pub use xml::{UiElement, XmlDocument};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
