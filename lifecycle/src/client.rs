use crate::{Error, Result};
use async_trait::async_trait;
use kube::{
    ResourceExt,
    api::DynamicObject,
    core::{GroupVersionKind, TypeMeta},
    discovery::ApiResource,
};
use serde::{Serialize, de::DeserializeOwned};

/// Access to the object store the reconciler reads and writes.
///
/// Every call is a single request: no retries, no caching. Implementations map a missing
/// object to `Ok(None)` on `get` and to [`Error::NotFound`] on writes.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn get(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>>;

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace the object, the status is left untouched
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Write the status only
    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    async fn delete(&self, obj: &DynamicObject) -> Result<()>;

    /// List objects of a kind, in every namespace, matching an equality label selector
    async fn list(&self, resource: &ApiResource, selector: &str) -> Result<Vec<DynamicObject>>;
}

/// Resolve the API resource from an object's apiVersion and kind
pub fn api_resource_of(obj: &DynamicObject) -> Result<ApiResource> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| Error::MissingTypeMeta(obj.name_any()))?;
    Ok(api_resource_from_types(types))
}

pub fn api_resource_from_types(types: &TypeMeta) -> ApiResource {
    let (group, version) = match types.api_version.split_once('/') {
        Some((g, v)) => (g, v),
        None => ("", types.api_version.as_str()),
    };
    ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, &types.kind))
}

/// Identity used for diffing and orphan detection: kind + namespace + name
pub fn object_identity(obj: &DynamicObject) -> (String, Option<String>, String) {
    let kind = obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
    (kind, obj.namespace(), obj.name_any())
}

pub fn describe(obj: &DynamicObject) -> String {
    let (kind, ns, name) = object_identity(obj);
    match ns {
        Some(ns) => format!("{kind} {ns}/{name}"),
        None => format!("{kind} {name}"),
    }
}

/// Convert a typed resource into its dynamic form, keeping apiVersion and kind
pub fn to_dynamic<K>(obj: &K) -> Result<DynamicObject>
where
    K: kube::Resource<DynamicType = ()> + Serialize,
{
    let mut dynobj: DynamicObject = serde_json::from_value(serde_json::to_value(obj)?)?;
    dynobj.types = Some(TypeMeta {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
    });
    Ok(dynobj)
}

pub fn from_dynamic<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}
