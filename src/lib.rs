//! Restel - REST test orchestration.
//!
//! Execution groups bind a test definition to a suite of parameters.
//! Each run builds an isolated context, applies functions, checks
//! assertions that may reference payloads of ancestor executions,
//! and then delegates to the HTTP definition runner.

pub mod assertion;
pub mod capture;
pub mod config;
pub mod context;
pub mod error;
pub mod function;
pub mod graph;
pub mod matcher;
pub mod model;
pub mod orchestrator;
pub mod reference;
pub mod registry;
pub mod runner;
pub mod transport;

pub use capture::{CapturedPayloads, FieldExtractor};
pub use config::DefinitionLoader;
pub use context::TestContext;
pub use error::{ConfigFault, ReferenceFault, RestelError};
pub use model::*;
pub use orchestrator::{Engine, RunOutcome, RunState};
pub use reference::SelfReferencePolicy;
pub use registry::{DefinitionRegistry, DefinitionStore};
pub use runner::{DefinitionRunner, HttpDefinitionRunner};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
