//! Voice pipeline handles and their live reconfiguration.
//!
//! - [`handles`]: the live components of one pipeline generation.
//! - [`diff`]: per-stage classification of a config change.
//! - [`factory`]: component construction with provider fallback.
//! - [`coordinator`]: applies a change by patching or rebuilding.

pub mod coordinator;
pub mod diff;
pub mod factory;
pub mod handles;
pub mod offline;

pub use coordinator::{ReconfigurationCoordinator, ReconfigurationOutcome};
pub use diff::{FieldClassification, PatchRequest, RebuildReason, Stage};
pub use factory::{ComponentFactory, StageBuilder};
pub use handles::PipelineHandles;
