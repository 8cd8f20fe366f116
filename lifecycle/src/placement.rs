use k8s_openapi::api::core::v1::{Affinity, PodSpec, Toleration};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rules on which nodes the pods of a workload are scheduled
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodePlacement {
    /// Labels a node must carry for the pods to run on it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
}

impl NodePlacement {
    pub fn is_empty(&self) -> bool {
        self.node_selector.is_none() && self.affinity.is_none() && self.tolerations.is_none()
    }

    /// Copy the placement rules into `pod`, leaving unset rules untouched
    pub fn apply_to(&self, pod: &mut PodSpec) {
        if let Some(selector) = &self.node_selector {
            pod.node_selector = Some(selector.clone());
        }
        if let Some(affinity) = &self.affinity {
            pod.affinity = Some(affinity.clone());
        }
        if let Some(tolerations) = &self.tolerations {
            pod.tolerations = Some(tolerations.clone());
        }
    }
}
