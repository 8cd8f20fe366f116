use crate::Result;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde_json::Value;
use std::collections::BTreeMap;

// Metadata written by the store, never part of a desired state
const READ_ONLY_METADATA: [&str; 7] = [
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
    "managedFields",
];

fn merge_map(src: &Option<BTreeMap<String, String>>, dst: &mut Option<BTreeMap<String, String>>) {
    if let Some(src) = src {
        let dst = dst.get_or_insert_with(BTreeMap::new);
        for (k, v) in src {
            dst.insert(k.clone(), v.clone());
        }
    }
}

/// Copy every label and annotation of `src` onto `dst`, overwriting existing keys
pub fn merge_labels_and_annotations(src: &ObjectMeta, dst: &mut ObjectMeta) {
    merge_map(&src.labels, &mut dst.labels);
    merge_map(&src.annotations, &mut dst.annotations);
}

#[must_use]
pub fn strip_status(obj: &DynamicObject) -> DynamicObject {
    let mut res = obj.clone();
    if let Some(map) = res.data.as_object_mut() {
        map.remove("status");
    }
    res
}

/// Normalized form of an object used for diffing: no status, no store-managed metadata
/// and not the last-applied annotation itself.
pub fn normalized(obj: &DynamicObject, annotation: &str) -> Result<Value> {
    let mut value = serde_json::to_value(strip_status(obj))?;
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in READ_ONLY_METADATA {
            meta.remove(field);
        }
        let empty = match meta.get_mut("annotations").and_then(Value::as_object_mut) {
            Some(annotations) => {
                annotations.remove(annotation);
                annotations.is_empty()
            }
            None => false,
        };
        if empty {
            meta.remove("annotations");
        }
    }
    Ok(value)
}

/// Store the normalized serialization of the object in its `annotation`
pub fn set_last_applied_configuration(obj: &mut DynamicObject, annotation: &str) -> Result<()> {
    let serialized = serde_json::to_string(&normalized(obj, annotation)?)?;
    obj.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(annotation.to_string(), serialized);
    Ok(())
}

/// The last-applied state recorded on a live object, if any and if readable
pub fn last_applied(obj: &DynamicObject, annotation: &str) -> Option<Value> {
    obj.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotation))
        .and_then(|s| serde_json::from_str(s).ok())
}

// Fields present in the previous desired state but gone from the new one become explicit removals
fn add_removals(patch: &mut Value, previous: &Value) {
    if let (Some(patch), Some(previous)) = (patch.as_object_mut(), previous.as_object()) {
        for (k, prev) in previous {
            match patch.get_mut(k) {
                Some(next) => add_removals(next, prev),
                None => {
                    patch.insert(k.clone(), Value::Null);
                }
            }
        }
    }
}

/// Three-way merge of a desired state onto the live object.
///
/// Desired fields win, fields dropped since `previous` are removed, everything else on the
/// live object (store metadata, defaulted fields, status) is kept. Arrays are replaced whole.
pub fn merge_object(desired: &Value, live: &DynamicObject, previous: Option<&Value>) -> Result<DynamicObject> {
    let mut patch = desired.clone();
    if let Some(map) = patch.as_object_mut() {
        map.remove("status");
    }
    if let Some(previous) = previous {
        add_removals(&mut patch, previous);
    }
    let mut doc = serde_json::to_value(live)?;
    json_patch::merge(&mut doc, &patch);
    Ok(serde_json::from_value(doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::to_dynamic;
    use k8s_openapi::api::core::v1::{Pod, Service, ServicePort, ServiceSpec};
    use serde_json::json;

    const ANNOTATION: &str = "lastAppliedConfiguration";

    fn meta(labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> ObjectMeta {
        let to_map = |items: &[(&str, &str)]| {
            (!items.is_empty()).then(|| {
                items
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>()
            })
        };
        ObjectMeta {
            labels: to_map(labels),
            annotations: to_map(annotations),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_into_empty_destination() {
        let src = meta(&[("l1", "test")], &[("a1", "ann")]);
        let mut dst = meta(&[], &[]);
        merge_labels_and_annotations(&src, &mut dst);
        assert_eq!(dst.labels.unwrap()["l1"], "test");
        assert_eq!(dst.annotations.unwrap()["a1"], "ann");
    }

    #[test]
    fn test_merge_overwrites_and_keeps() {
        let src = meta(&[("l1", "test")], &[("a1", "ann")]);
        let mut dst = meta(&[("l1", "test2"), ("l2", "x")], &[("a1", "ann2"), ("a2", "ann2")]);
        merge_labels_and_annotations(&src, &mut dst);
        let labels = dst.labels.unwrap();
        let annotations = dst.annotations.unwrap();
        assert_eq!(labels["l1"], "test");
        assert_eq!(labels["l2"], "x");
        assert_eq!(annotations["a1"], "ann");
        assert_eq!(annotations["a2"], "ann2");
    }

    #[test]
    fn test_strip_status() {
        let mut pod = to_dynamic(&Pod::default()).unwrap();
        pod.data["status"] = json!({"podIP": "pod-ip"});
        let stripped = strip_status(&pod);
        assert!(stripped.data.get("status").is_none());
        assert!(pod.data.get("status").is_some());
        let untouched = strip_status(&stripped);
        assert_eq!(untouched.data, stripped.data);
    }

    #[test]
    fn test_last_applied_ignores_store_fields() {
        let mut svc = to_dynamic(&Service {
            metadata: ObjectMeta {
                name: Some("svc".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        set_last_applied_configuration(&mut svc, ANNOTATION).unwrap();
        let stored = last_applied(&svc, ANNOTATION).unwrap();
        assert!(stored["metadata"].get("annotations").is_none());

        let mut live = svc.clone();
        live.metadata.uid = Some("abc".to_string());
        live.metadata.resource_version = Some("12".to_string());
        live.data["status"] = json!({"loadBalancer": {}});
        assert_eq!(normalized(&live, ANNOTATION).unwrap(), stored);
    }

    #[test]
    fn test_merge_object_three_way() {
        let mut live = to_dynamic(&Service {
            metadata: ObjectMeta {
                name: Some("svc".to_string()),
                resource_version: Some("7".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some("10.0.0.1".to_string()),
                external_name: Some("old.example.com".to_string()),
                ports: Some(vec![ServicePort {
                    port: 80,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
        .unwrap();
        live.data["status"] = json!({"loadBalancer": {}});
        let previous = json!({"metadata": {"name": "svc"}, "spec": {"externalName": "old.example.com", "ports": [{"port": 80}]}});
        let desired = json!({"metadata": {"name": "svc"}, "spec": {"ports": [{"port": 8080}]}});

        let merged = merge_object(&desired, &live, Some(&previous)).unwrap();
        assert_eq!(merged.data["spec"]["clusterIP"], "10.0.0.1");
        assert!(merged.data["spec"].get("externalName").is_none());
        assert_eq!(merged.data["spec"]["ports"], json!([{"port": 8080}]));
        assert_eq!(merged.data["status"], json!({"loadBalancer": {}}));
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("7"));
    }
}
