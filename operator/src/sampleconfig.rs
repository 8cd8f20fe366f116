use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{ContainerPort, PodSpec, Service, ServiceAccount, ServicePort},
        rbac::v1::{Role, RoleBinding},
    },
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{CustomResource, api::DynamicObject, discovery::ApiResource};
use lifecycle::{ManagedObjectAdapter, NodePlacement, ResourceBuilder, Status, to_desired};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const HTTP_SERVER_NAME: &str = "http-server";
const DEPLOYMENT_MATCH_KEY: &str = "sample-operator.lifecycle.io";
const HTTP_SERVER_PORT: i32 = 8081;
const HTTP_SERVER_NODE_PORT: i32 = 30080;
const COMMON_LABEL: &str = "sample.lifecycle.io/common";
const OPERATOR_LABEL: &str = "sample.lifecycle.io/operator";

/// SampleConfig:
///
/// Request the deployment of the sample http server
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(kind = "SampleConfig", group = "sample.lifecycle.io", version = "v1alpha1")]
#[kube(status = "SampleConfigStatus", shortname = "sc", printcolumn = r#"
    {"name":"phase", "type":"string", "description":"Lifecycle phase", "jsonPath":".status.phase"},
    {"name":"version", "type":"string", "description":"Observed version", "jsonPath":".status.observedVersion"}"#)]
pub struct SampleConfigSpec {
    /// Rules on which nodes the server pods are scheduled
    #[serde(default, skip_serializing_if = "NodePlacement::is_empty")]
    pub infra: NodePlacement,
}

/// The status object of `SampleConfig`
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct SampleConfigStatus {
    #[serde(flatten)]
    pub status: Status,
}

/// Renders the http server resources of a `SampleConfig`
pub struct SampleConfigAdapter {
    namespace: String,
    server_image: String,
    builder: ResourceBuilder,
}

impl SampleConfigAdapter {
    #[must_use]
    pub fn new(namespace: &str, server_image: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            server_image: server_image.to_string(),
            builder: ResourceBuilder::new(
                BTreeMap::from([(COMMON_LABEL.to_string(), String::new())]),
                BTreeMap::from([(OPERATOR_LABEL.to_string(), String::new())]),
            ),
        }
    }

    fn service_account(&self) -> ServiceAccount {
        let mut sa = self.builder.service_account(HTTP_SERVER_NAME);
        sa.metadata.namespace = Some(self.namespace.clone());
        sa
    }

    fn role(&self) -> Role {
        let mut role = self.builder.role(HTTP_SERVER_NAME, vec![]);
        role.metadata.namespace = Some(self.namespace.clone());
        role
    }

    fn role_binding(&self) -> RoleBinding {
        let mut binding = self
            .builder
            .role_binding(HTTP_SERVER_NAME, HTTP_SERVER_NAME, HTTP_SERVER_NAME, &self.namespace);
        binding.metadata.namespace = Some(self.namespace.clone());
        binding
    }

    fn deployment(&self, infra: &NodePlacement) -> Deployment {
        let ports = vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: HTTP_SERVER_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }];
        let container = self
            .builder
            .ports_container("sample-http-server-container", &self.server_image, "Always", ports);
        let mut pod = PodSpec {
            containers: vec![container],
            ..Default::default()
        };
        infra.apply_to(&mut pod);
        self.builder.operator_deployment(
            HTTP_SERVER_NAME,
            &self.namespace,
            DEPLOYMENT_MATCH_KEY,
            HTTP_SERVER_NAME,
            HTTP_SERVER_NAME,
            1,
            pod,
        )
    }

    fn service(&self) -> Service {
        let mut svc = self
            .builder
            .service(HTTP_SERVER_NAME, DEPLOYMENT_MATCH_KEY, HTTP_SERVER_NAME, None);
        svc.metadata.namespace = Some(self.namespace.clone());
        if let Some(spec) = svc.spec.as_mut() {
            spec.type_ = Some("NodePort".to_string());
            spec.ports = Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: HTTP_SERVER_PORT,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(HTTP_SERVER_PORT)),
                node_port: Some(HTTP_SERVER_NODE_PORT),
                ..Default::default()
            }]);
        }
        svc
    }
}

impl ManagedObjectAdapter for SampleConfigAdapter {
    type Object = SampleConfig;

    fn is_creating(&self, obj: &SampleConfig) -> lifecycle::Result<bool> {
        Ok(self.status(obj).is_none_or(|s| s.conditions.is_empty()))
    }

    fn create(&self) -> SampleConfig {
        SampleConfig::new("", SampleConfigSpec::default())
    }

    fn status<'a>(&self, obj: &'a SampleConfig) -> Option<&'a Status> {
        obj.status.as_ref().map(|s| &s.status)
    }

    fn status_mut<'a>(&self, obj: &'a mut SampleConfig) -> &'a mut Status {
        &mut obj.status.get_or_insert_with(SampleConfigStatus::default).status
    }

    fn get_all_resources(&self, obj: &SampleConfig) -> lifecycle::Result<Vec<DynamicObject>> {
        Ok(vec![
            to_desired(&self.service_account())?,
            to_desired(&self.role())?,
            to_desired(&self.role_binding())?,
            to_desired(&self.deployment(&obj.spec.infra))?,
            to_desired(&self.service())?,
        ])
    }

    fn get_dependant_resources_list_objects(&self) -> Vec<ApiResource> {
        vec![
            ApiResource::erase::<Deployment>(&()),
            ApiResource::erase::<Service>(&()),
            ApiResource::erase::<ServiceAccount>(&()),
            ApiResource::erase::<RoleBinding>(&()),
            ApiResource::erase::<Role>(&()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Toleration;
    use kube::ResourceExt;
    use lifecycle::{
        MemoryClient, MemoryEventSink, ObjectClient, Phase, Reconciler, ReconcilerConfig,
        client::{from_dynamic, to_dynamic},
    };
    use std::sync::Arc;

    fn adapter() -> SampleConfigAdapter {
        SampleConfigAdapter::new("sample-ns", "quay.io/sample/http-server:latest")
    }

    #[test]
    fn test_resource_set() {
        let resources = adapter().get_all_resources(&adapter().create()).unwrap();
        let kinds: Vec<_> = resources
            .iter()
            .map(|r| r.types.as_ref().unwrap().kind.clone())
            .collect();
        assert_eq!(kinds, vec!["ServiceAccount", "Role", "RoleBinding", "Deployment", "Service"]);
        for r in &resources {
            assert_eq!(r.name_any(), HTTP_SERVER_NAME);
            assert_eq!(r.namespace().as_deref(), Some("sample-ns"));
            assert!(r.labels().contains_key(COMMON_LABEL));
        }
        let listed: Vec<_> = adapter()
            .get_dependant_resources_list_objects()
            .into_iter()
            .map(|ar| ar.kind)
            .collect();
        for kind in kinds {
            assert!(listed.iter().any(|k| *k == kind));
        }
    }

    #[test]
    fn test_deployment_and_service() {
        let deploy = adapter().deployment(&NodePlacement::default());
        assert!(deploy.labels().contains_key(OPERATOR_LABEL));
        let pod = deploy.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some(HTTP_SERVER_NAME));
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("quay.io/sample/http-server:latest"));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8081);

        let svc = adapter().service().spec.unwrap();
        assert_eq!(svc.type_.as_deref(), Some("NodePort"));
        assert_eq!(svc.selector.unwrap()[DEPLOYMENT_MATCH_KEY], HTTP_SERVER_NAME);
        assert_eq!(svc.ports.unwrap()[0].node_port, Some(30080));
    }

    #[test]
    fn test_infra_placement_reaches_pods() {
        let mut cr = adapter().create();
        cr.spec.infra.tolerations = Some(vec![Toleration {
            key: Some("infra".to_string()),
            operator: Some("Exists".to_string()),
            ..Default::default()
        }]);
        let pod = adapter().deployment(&cr.spec.infra).spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.tolerations.unwrap()[0].key.as_deref(), Some("infra"));
    }

    #[test]
    fn test_is_creating_follows_conditions() {
        let a = adapter();
        let mut cr = a.create();
        assert!(a.is_creating(&cr).unwrap());
        a.status_mut(&mut cr).phase = Phase::Deploying;
        assert!(a.is_creating(&cr).unwrap());
        lifecycle::conditions::mark_deploying(&mut a.status_mut(&mut cr).conditions, "DeployStarted", "Started");
        assert!(!a.is_creating(&cr).unwrap());
    }

    #[tokio::test]
    async fn test_sample_config_deploys() {
        let client = Arc::new(MemoryClient::new());
        let events = Arc::new(MemoryEventSink::default());
        let config = ReconcilerConfig {
            namespace: "sample-ns".to_string(),
            ..Default::default()
        };
        let reconciler = Reconciler::new(adapter(), client.clone(), events.clone(), config);
        client
            .insert(to_dynamic(&SampleConfig::new("config", SampleConfigSpec::default())).unwrap())
            .unwrap();

        reconciler.reconcile(None, "config", "1.0.0").await.unwrap();
        let deploy = client
            .get(&ApiResource::erase::<Deployment>(&()), Some("sample-ns"), HTTP_SERVER_NAME)
            .await
            .unwrap()
            .unwrap();
        assert!(deploy.labels().contains_key("lifecycle.operator/owner"));
        let cr = client
            .get(&ApiResource::erase::<SampleConfig>(&()), None, "config")
            .await
            .unwrap()
            .unwrap();
        let cr: SampleConfig = from_dynamic(&cr).unwrap();
        let status = cr.status.unwrap().status;
        assert_eq!(status.phase, Phase::Deploying);
        assert_eq!(status.target_version, "1.0.0");
        assert!(events.events().iter().any(|e| e == "Normal DeployStarted Started Deployment"));
    }
}
