//! # Reconcile
//!
//! A quota-aware reconciliation engine for always-free cloud capacity.
//!
//! This crate provides the core abstractions for discovering what already
//! exists in a cloud account, computing how much free-tier headroom remains,
//! validating a desired configuration against it, and converging the account
//! to that configuration through an external apply tool.
//!
//! ## Core Concepts
//!
//! - **Inventory**: Normalized records of what currently exists, discovered
//!   through a [`ProviderQuery`]
//! - **QuotaSpec / Headroom**: Free-tier limits and what remains of them
//! - **DesiredConfig**: The target shape, resolved from explicit, persisted,
//!   inventory-derived, and default sources
//! - **ReconciliationDriver**: Imports existing resources, plans, surfaces
//!   drift, and applies with classified bounded retries
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`ProviderQuery`]: Lists and normalizes raw provider records
//! - [`ApplyTool`]: The infrastructure tool (init/plan/apply/import)
//! - [`DescriptorRenderer`]: Renders a desired config into a descriptor
//! - [`Clock`]: Cancellable sleeping for retry backoff
//! - [`ConfirmCallback`]: Handles operator confirmations
//!
//! This allows the engine to be exercised without a cloud account, a
//! terminal, or real time passing.

pub mod driver;
pub mod inventory;
pub mod ledger;
pub mod resolver;
pub mod retry;
pub mod types;
pub mod validator;

// Re-export main types at crate root
pub use driver::{
    ApplyTool, AutoConfirm, AutoDecline, Clock, ConfirmCallback, DescriptorRenderer, DriveState,
    ImportBinding, ReconcileReport, ReconciliationDriver, SystemClock,
};
pub use inventory::{discover, Inventory, ProviderQuery, DEFAULT_TERMINAL_STATES};
pub use ledger::compute_headroom;
pub use resolver::{derive_from_inventory, resolve, ResolveSources};
pub use retry::{ErrorClass, RetryPolicy, TIMEOUT_SIGNATURE};
pub use types::{
    DesiredConfig, Enforcement, EngineError, Headroom, InstanceGroup, PlanSummary, QuotaSpec,
    QuotaUnit, ResourceKind, ResourceRecord, ToolOutput, ValidationVerdict, VerdictStatus,
};
pub use validator::{has_rejection, rejection_summary, validate, SitePolicy};
