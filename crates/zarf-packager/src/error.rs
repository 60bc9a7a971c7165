//! Packager error types
//!
//! Component failures always carry the verb, component name, and failing
//! operation so the user-visible message has the full chain.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackagerError {
    #[error("{verb} failed in component {component} during {operation}: {source}")]
    Component {
        verb: &'static str,
        component: String,
        operation: &'static str,
        #[source]
        source: Box<PackagerError>,
    },

    #[error("no zarf state and no --registry-url; cannot resolve the target registry")]
    NoRegistry,

    #[error("package {name} is not deployed in this cluster")]
    PackageNotDeployed { name: String },

    #[error(transparent)]
    Core(#[from] zarf_core::CoreError),

    #[error(transparent)]
    Fetch(#[from] zarf_fetch::FetchError),

    #[error(transparent)]
    Kube(#[from] zarf_kube::KubeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PackagerError {
    /// Wrap a failure with its verb/component/operation context
    pub fn in_component(
        self,
        verb: &'static str,
        component: &str,
        operation: &'static str,
    ) -> Self {
        PackagerError::Component {
            verb,
            component: component.to_string(),
            operation,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, PackagerError>;
