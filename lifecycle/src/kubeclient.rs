use crate::{
    Error, Result,
    client::{ObjectClient, api_resource_of, describe},
};
use async_trait::async_trait;
use kube::{
    Client, ResourceExt,
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    core::TypeMeta,
    discovery::ApiResource,
};
use serde_json::json;

/// [`ObjectClient`] backed by the kubernetes API server
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    fn api_for(&self, obj: &DynamicObject) -> Result<Api<DynamicObject>> {
        let resource = api_resource_of(obj)?;
        Ok(self.api(&resource, obj.metadata.namespace.as_deref()))
    }
}

fn map_error(e: kube::Error, what: &DynamicObject) -> Error {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound(describe(what)),
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => Error::AlreadyExists(describe(what)),
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict(describe(what)),
        e => Error::KubeError(e),
    }
}

#[async_trait]
impl ObjectClient for KubeClient {
    async fn get(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>> {
        self.api(resource, namespace)
            .get_opt(name)
            .await
            .map_err(Error::KubeError)
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        tracing::debug!("Creating {}", describe(obj));
        self.api_for(obj)?
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_error(e, obj))
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        tracing::debug!("Updating {}", describe(obj));
        self.api_for(obj)?
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
            .map_err(|e| map_error(e, obj))
    }

    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let status = obj.data.get("status").cloned().unwrap_or_else(|| json!({}));
        let patch = Patch::Merge(json!({ "status": status }));
        self.api_for(obj)?
            .patch_status(&obj.name_any(), &PatchParams::default(), &patch)
            .await
            .map_err(|e| map_error(e, obj))
    }

    async fn delete(&self, obj: &DynamicObject) -> Result<()> {
        tracing::debug!("Deleting {}", describe(obj));
        self.api_for(obj)?
            .delete(&obj.name_any(), &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, obj))
    }

    async fn list(&self, resource: &ApiResource, selector: &str) -> Result<Vec<DynamicObject>> {
        let list = self
            .api(resource, None)
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(Error::KubeError)?;
        // list items come back without apiVersion and kind
        Ok(list
            .items
            .into_iter()
            .map(|mut item| {
                item.types.get_or_insert_with(|| TypeMeta {
                    api_version: resource.api_version.clone(),
                    kind: resource.kind.clone(),
                });
                item
            })
            .collect())
    }
}
