use crate::conditions::{Condition, conditions_content_changed};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Phase is the current phase of the deployment
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Debug, JsonSchema, Default)]
pub enum Phase {
    /// Uninitialized
    #[default]
    #[serde(rename = "")]
    Empty,
    Deploying,
    Deployed,
    Upgrading,
    Deleting,
    Deleted,
    Error,
}

impl Phase {
    pub fn is_empty(&self) -> bool {
        *self == Phase::Empty
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Phase::Empty => "",
            Phase::Deploying => "Deploying",
            Phase::Deployed => "Deployed",
            Phase::Upgrading => "Upgrading",
            Phase::Deleting => "Deleting",
            Phase::Deleted => "Deleted",
            Phase::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a managed configuration; to be flattened in the custom resource status
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default, skip_serializing_if = "Phase::is_empty")]
    pub phase: Phase,
    /// A list of current conditions of the resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// The version of the operator that last handled the resource
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator_version: String,
    /// The desired version of the resource
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_version: String,
    /// The observed version of the resource
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub observed_version: String,
}

impl Status {
    /// Whether persisting `self` over `other` would change anything meaningful
    pub fn differs_from(&self, other: &Status) -> bool {
        self.phase != other.phase
            || self.operator_version != other.operator_version
            || self.target_version != other.target_version
            || self.observed_version != other.observed_version
            || conditions_content_changed(&other.conditions, &self.conditions)
    }
}

/// Whether the status represents an upgrade in progress
pub fn is_upgrading(status: &Status) -> bool {
    let deploying = status.phase == Phase::Deploying;
    (!status.observed_version.is_empty() || !deploying) && status.observed_version != status.target_version
}
