use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Lifecycle error: {0}")]
    LifecycleError(#[source] lifecycle::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    #[must_use]
    pub fn metric_label(&self) -> String {
        match self {
            Error::LifecycleError(e) => e.metric_label(),
            _ => format!("{self:?}").to_lowercase(),
        }
    }
}

impl From<lifecycle::Error> for Error {
    fn from(e: lifecycle::Error) -> Self {
        Error::LifecycleError(e)
    }
}

pub static OPERATOR: &str = "sample-operator.lifecycle.io";

/// Operator process settings
pub mod args;
pub use args::OperatorArgs;

/// The managed configuration custom resource and its adapter
pub mod sampleconfig;
pub use sampleconfig::{SampleConfig, SampleConfigAdapter};

/// State machinery for kube, as exposeable to actix
pub mod manager;
pub use manager::Manager;

/// Metrics
mod metrics;
pub use metrics::Metrics;
