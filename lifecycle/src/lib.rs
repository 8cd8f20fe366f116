use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("K8s error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Semver error {0}")]
    Semver(#[from] semver::Error),

    #[error("Downgrade from version {current} to {target} is not supported")]
    Downgrade { current: String, target: String },

    #[error("Adapter error: {0}")]
    Adapter(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Conflict while writing {0}")]
    Conflict(String),

    #[error("Missing apiVersion/kind on {0}")]
    MissingTypeMeta(String),

    #[error("Error: {0}")]
    Other(String),
}
impl Error {
    pub fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }

    /// Store errors the scheduler is expected to retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::KubeError(_) | Error::Conflict(_) | Error::NotFound(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod adapter;
pub mod callbacks;
pub mod client;
pub mod conditions;
pub mod diff;
pub mod events;
pub mod kubeclient;
pub mod memclient;
pub mod placement;
pub mod reconciler;
pub mod resources;
pub mod status;
pub mod version;

pub use adapter::ManagedObjectAdapter;
pub use callbacks::{CallbackArgs, CallbackDispatcher, ReconcileState};
pub use client::ObjectClient;
pub use conditions::{Condition, ConditionStatus, ConditionType};
pub use events::{EventSink, KubeEventSink, MemoryEventSink};
pub use kubeclient::KubeClient;
pub use memclient::MemoryClient;
pub use placement::NodePlacement;
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use resources::{ResourceBuilder, to_desired};
pub use status::{Phase, Status};
pub use version::{Semver, VersionChange};
