use crate::{Result, client::from_dynamic};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use kube::{Resource, api::DynamicObject};

/// Readiness of a workload, `None` for kinds without a readiness signal
pub fn workload_ready(obj: &DynamicObject) -> Result<Option<bool>> {
    let Some(types) = obj.types.as_ref() else {
        return Ok(None);
    };
    if types.api_version != "apps/v1" {
        return Ok(None);
    }
    Ok(match types.kind.as_str() {
        "Deployment" => Some(is_deployment_ready(&from_dynamic(obj)?)),
        "StatefulSet" => Some(is_statefulset_ready(&from_dynamic(obj)?)),
        "DaemonSet" => Some(is_daemonset_ready(&from_dynamic(obj)?)),
        _ => None,
    })
}

// The workload controller has seen the latest spec
fn observed(obj: &impl Resource, observed_generation: Option<i64>) -> bool {
    match obj.meta().generation {
        Some(generation) => observed_generation.is_some_and(|o| o >= generation),
        None => true,
    }
}

pub fn is_deployment_ready(deploy: &Deployment) -> bool {
    let desired = deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    deploy.status.as_ref().is_some_and(|s| {
        observed(deploy, s.observed_generation)
            && s.updated_replicas.unwrap_or(0) >= desired
            && s.replicas.unwrap_or(0) == desired
            && s.ready_replicas.unwrap_or(0) == desired
    })
}

pub fn is_statefulset_ready(sts: &StatefulSet) -> bool {
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    sts.status
        .as_ref()
        .is_some_and(|s| observed(sts, s.observed_generation) && s.ready_replicas.unwrap_or(0) == desired)
}

pub fn is_daemonset_ready(ds: &DaemonSet) -> bool {
    ds.status
        .as_ref()
        .is_some_and(|s| observed(ds, s.observed_generation) && s.number_ready == s.desired_number_scheduled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::to_dynamic;
    use k8s_openapi::{
        api::{
            apps::v1::{DaemonSetStatus, DeploymentSpec, DeploymentStatus, StatefulSetSpec, StatefulSetStatus},
            core::v1::ServiceAccount,
        },
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };

    fn at_generation(generation: i64) -> ObjectMeta {
        ObjectMeta {
            generation: Some(generation),
            ..Default::default()
        }
    }

    fn deployment(replicas: Option<i32>, status: Option<(i32, i32)>) -> Deployment {
        Deployment {
            metadata: at_generation(1),
            spec: Some(DeploymentSpec {
                replicas,
                ..Default::default()
            }),
            status: status.map(|(replicas, ready)| DeploymentStatus {
                observed_generation: Some(1),
                replicas: Some(replicas),
                updated_replicas: Some(replicas),
                ready_replicas: Some(ready),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_deployment_readiness() {
        assert!(!is_deployment_ready(&deployment(Some(2), None)));
        assert!(!is_deployment_ready(&deployment(Some(2), Some((2, 1)))));
        assert!(!is_deployment_ready(&deployment(Some(2), Some((3, 2)))));
        assert!(is_deployment_ready(&deployment(Some(2), Some((2, 2)))));
        assert!(is_deployment_ready(&deployment(None, Some((1, 1)))));
    }

    #[test]
    fn test_deployment_rollout_in_progress() {
        // spec changed, the controller did not catch up yet
        let mut deploy = deployment(Some(2), Some((2, 2)));
        deploy.metadata.generation = Some(2);
        assert!(!is_deployment_ready(&deploy));
        if let Some(status) = deploy.status.as_mut() {
            status.observed_generation = Some(2);
            status.updated_replicas = Some(1);
        }
        assert!(!is_deployment_ready(&deploy));
        if let Some(status) = deploy.status.as_mut() {
            status.updated_replicas = Some(2);
        }
        assert!(is_deployment_ready(&deploy));

        let mut unobserved = deployment(Some(1), Some((1, 1)));
        if let Some(status) = unobserved.status.as_mut() {
            status.observed_generation = None;
        }
        assert!(!is_deployment_ready(&unobserved));
    }

    #[test]
    fn test_statefulset_readiness() {
        let mut sts = StatefulSet {
            metadata: at_generation(3),
            spec: Some(StatefulSetSpec {
                replicas: Some(2),
                ..Default::default()
            }),
            status: Some(StatefulSetStatus {
                observed_generation: Some(2),
                ready_replicas: Some(2),
                ..Default::default()
            }),
        };
        assert!(!is_statefulset_ready(&sts));
        if let Some(status) = sts.status.as_mut() {
            status.observed_generation = Some(3);
        }
        assert!(is_statefulset_ready(&sts));
    }

    #[test]
    fn test_daemonset_readiness() {
        let mut ds = DaemonSet {
            metadata: at_generation(1),
            status: Some(DaemonSetStatus {
                desired_number_scheduled: 3,
                number_ready: 3,
                observed_generation: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(is_daemonset_ready(&ds));
        ds.metadata.generation = Some(2);
        assert!(!is_daemonset_ready(&ds));
        assert!(!is_daemonset_ready(&DaemonSet::default()));
    }

    #[test]
    fn test_workload_ready_by_kind() {
        let deploy = to_dynamic(&deployment(Some(1), Some((1, 1)))).unwrap();
        assert_eq!(workload_ready(&deploy).unwrap(), Some(true));
        let sa = to_dynamic(&ServiceAccount::default()).unwrap();
        assert_eq!(workload_ready(&sa).unwrap(), None);
    }
}
