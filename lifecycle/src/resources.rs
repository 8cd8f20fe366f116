use crate::{Result, client::to_dynamic, diff::strip_status};
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServiceAccount, ServiceSpec},
        rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject},
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
};
use kube::api::DynamicObject;
use serde::Serialize;
use std::collections::BTreeMap;

/// Builds the usual dependent resources with consistent labels
#[derive(Clone, Debug, Default)]
pub struct ResourceBuilder {
    common_labels: BTreeMap<String, String>,
    operator_labels: BTreeMap<String, String>,
}

impl ResourceBuilder {
    #[must_use]
    pub fn new(common_labels: BTreeMap<String, String>, operator_labels: BTreeMap<String, String>) -> Self {
        Self {
            common_labels,
            operator_labels,
        }
    }

    pub fn with_common_labels(&self, labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut res = self.common_labels.clone();
        res.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        res
    }

    pub fn with_operator_labels(&self, labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut res = self.with_common_labels(&self.operator_labels);
        res.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        res
    }

    fn metadata(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(self.common_labels.clone()),
            ..Default::default()
        }
    }

    pub fn service_account(&self, name: &str) -> ServiceAccount {
        ServiceAccount {
            metadata: self.metadata(name),
            ..Default::default()
        }
    }

    pub fn role(&self, name: &str, rules: Vec<PolicyRule>) -> Role {
        Role {
            metadata: self.metadata(name),
            rules: Some(rules),
        }
    }

    pub fn role_binding(&self, name: &str, role: &str, service_account: &str, namespace: &str) -> RoleBinding {
        RoleBinding {
            metadata: self.metadata(name),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: role.to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: service_account.to_string(),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            }]),
        }
    }

    /// A service selecting pods labelled `match_key=match_value`
    pub fn service(
        &self,
        name: &str,
        match_key: &str,
        match_value: &str,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Service {
        let mut metadata = self.metadata(name);
        if let Some(labels) = labels {
            metadata.labels = Some(self.with_common_labels(labels));
        }
        Service {
            metadata,
            spec: Some(ServiceSpec {
                selector: Some(BTreeMap::from([(match_key.to_string(), match_value.to_string())])),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn ports_container(&self, name: &str, image: &str, pull_policy: &str, ports: Vec<ContainerPort>) -> Container {
        Container {
            name: name.to_string(),
            image: Some(image.to_string()),
            image_pull_policy: Some(pull_policy.to_string()),
            ports: Some(ports),
            ..Default::default()
        }
    }

    /// A deployment running `pod_spec` under `service_account`, with operator labels
    #[allow(clippy::too_many_arguments)]
    pub fn operator_deployment(
        &self,
        name: &str,
        namespace: &str,
        match_key: &str,
        match_value: &str,
        service_account: &str,
        replicas: i32,
        pod_spec: PodSpec,
    ) -> Deployment {
        let selector = BTreeMap::from([(match_key.to_string(), match_value.to_string())]);
        let labels = self.with_operator_labels(&selector);
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(selector),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        service_account_name: Some(service_account.to_string()),
                        ..pod_spec
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Turn a typed resource into a desired state for the reconciler
pub fn to_desired<K>(obj: &K) -> Result<DynamicObject>
where
    K: kube::Resource<DynamicType = ()> + Serialize,
{
    Ok(strip_status(&to_dynamic(obj)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ResourceBuilder {
        ResourceBuilder::new(
            BTreeMap::from([("test.common".to_string(), String::new())]),
            BTreeMap::from([("test.operator".to_string(), String::new())]),
        )
    }

    #[test]
    fn test_operator_deployment_labels() {
        let container = builder().ports_container("web", "nginx:1", "Always", vec![]);
        let deploy = builder().operator_deployment("web", "ns", "app", "web", "web-sa", 2, PodSpec {
            containers: vec![container],
            ..Default::default()
        });
        let labels = deploy.metadata.labels.unwrap();
        assert!(labels.contains_key("test.common"));
        assert!(labels.contains_key("test.operator"));
        assert_eq!(labels["app"], "web");
        let spec = deploy.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(spec.selector.match_labels.unwrap()["app"], "web");
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("web-sa"));
        assert_eq!(pod.containers[0].image.as_deref(), Some("nginx:1"));
    }

    #[test]
    fn test_rbac_and_service() {
        let b = builder();
        let binding = b.role_binding("web", "web-role", "web-sa", "ns");
        assert_eq!(binding.role_ref.name, "web-role");
        assert_eq!(binding.subjects.unwrap()[0].namespace.as_deref(), Some("ns"));
        let svc = b.service("web", "app", "web", None);
        assert_eq!(svc.spec.unwrap().selector.unwrap()["app"], "web");
        assert!(!svc.metadata.labels.unwrap().contains_key("test.operator"));
        let sa = to_desired(&b.service_account("web-sa")).unwrap();
        assert_eq!(sa.types.unwrap().kind, "ServiceAccount");
    }
}
