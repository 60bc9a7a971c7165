//! Zarf Packager - lifecycle orchestration
//!
//! The five top-level verbs, each a pipeline over the same stages: load the
//! manifest, migrate the schema, resolve imports, initialize variables, plan
//! components, then execute per component. Components always run in
//! declaration order, sequentially, so variables captured by one component's
//! actions are visible to every later component.

pub mod charts;
pub mod create;
pub mod deploy;
pub mod error;
pub mod inspect;
pub mod layout;
pub mod mirror;
pub mod remove;

pub use create::{create, CreateOptions};
pub use deploy::{deploy, DeployOptions, DeploySummary, DEFAULT_TIMEOUT};
pub use error::{PackagerError, Result};
pub use inspect::{inspect, InspectReport};
pub use layout::{load_package, LoadOptions, LoadedPackage, Scratch};
pub use mirror::{mirror, MirrorOptions, MirrorSummary};
pub use remove::{remove, RemoveOptions};

pub const VERB_CREATE: &str = "create";
pub const VERB_DEPLOY: &str = "deploy";
pub const VERB_INSPECT: &str = "inspect";
pub const VERB_MIRROR: &str = "mirror";
pub const VERB_REMOVE: &str = "remove";
