use crate::{
    Error, Result,
    client::{ObjectClient, describe},
};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{ResourceExt, api::DynamicObject, discovery::ApiResource};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
};

type Key = (String, String, Option<String>, String);

#[derive(Default)]
struct Store {
    objects: BTreeMap<Key, DynamicObject>,
    next_uid: u64,
    removed: Vec<DynamicObject>,
}

/// In-process object store with the semantics the reconciler relies on from an API server:
/// identity assignment, optimistic concurrency, a status subresource and finalizer-aware deletion.
#[derive(Default)]
pub struct MemoryClient {
    store: Mutex<Store>,
    writes: AtomicUsize,
}

fn key_of(obj: &DynamicObject) -> Result<Key> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| Error::MissingTypeMeta(obj.name_any()))?;
    Ok((types.api_version.clone(), types.kind.clone(), obj.namespace(), obj.name_any()))
}

fn key(resource: &ApiResource, namespace: Option<&str>, name: &str) -> Key {
    (
        resource.api_version.clone(),
        resource.kind.clone(),
        namespace.map(str::to_string),
        name.to_string(),
    )
}

fn status_of(obj: &DynamicObject) -> Option<Value> {
    obj.data.get("status").cloned()
}

fn set_status(obj: &mut DynamicObject, status: Option<Value>) {
    if !obj.data.is_object() {
        obj.data = Value::Object(Default::default());
    }
    if let Some(map) = obj.data.as_object_mut() {
        match status {
            Some(s) => {
                map.insert("status".to_string(), s);
            }
            None => {
                map.remove("status");
            }
        }
    }
}

fn without_status(obj: &DynamicObject) -> Value {
    let mut data = obj.data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

fn bump_version(obj: &mut DynamicObject) {
    let next = obj
        .metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    obj.metadata.resource_version = Some(next.to_string());
}

fn matches_selector(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.labels();
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim_end_matches('=')).is_some_and(|l| l == v.trim_start_matches('=')),
            None => labels.contains_key(term),
        })
}

impl MemoryClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Store>> {
        self.store.lock().map_err(|e| Error::Other(e.to_string()))
    }

    fn count(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of writes (create, update, status update, delete) received so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Objects physically removed from the store, oldest first
    pub fn removed(&self) -> Vec<DynamicObject> {
        self.lock().map(|s| s.removed.clone()).unwrap_or_default()
    }

    /// Seed an object without counting a write
    pub fn insert(&self, obj: DynamicObject) -> Result<DynamicObject> {
        let mut store = self.lock()?;
        Self::insert_locked(&mut store, obj)
    }

    fn insert_locked(store: &mut Store, mut obj: DynamicObject) -> Result<DynamicObject> {
        let k = key_of(&obj)?;
        if store.objects.contains_key(&k) {
            return Err(Error::AlreadyExists(describe(&obj)));
        }
        if obj.metadata.uid.is_none() {
            store.next_uid += 1;
            obj.metadata.uid = Some(format!("uid-{}", store.next_uid));
        }
        obj.metadata.resource_version = Some("1".to_string());
        obj.metadata.generation = Some(1);
        obj.metadata.creation_timestamp = Some(Time(Utc::now()));
        obj.metadata.deletion_timestamp = None;
        store.objects.insert(k, obj.clone());
        Ok(obj)
    }

    /// Put a deletion marker on an object the way a user deletion would, without counting a write
    pub fn mark_deleted(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()> {
        let mut store = self.lock()?;
        let k = key(resource, namespace, name);
        let finalized = match store.objects.get_mut(&k) {
            Some(obj) => {
                obj.metadata.deletion_timestamp = Some(Time(Utc::now()));
                bump_version(obj);
                obj.finalizers().is_empty()
            }
            None => return Err(Error::NotFound(name.to_string())),
        };
        if finalized {
            if let Some(obj) = store.objects.remove(&k) {
                store.removed.push(obj);
            }
        }
        Ok(())
    }

    /// Overwrite the status of an object as its own controller would, without counting a write.
    ///
    /// Unless given, `observedGeneration` is the current generation of the object.
    pub fn set_status(&self, resource: &ApiResource, namespace: Option<&str>, name: &str, mut status: Value) -> Result<()> {
        let mut store = self.lock()?;
        let obj = store
            .objects
            .get_mut(&key(resource, namespace, name))
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if let (Some(map), Some(generation)) = (status.as_object_mut(), obj.metadata.generation) {
            map.entry("observedGeneration").or_insert(Value::from(generation));
        }
        set_status(obj, Some(status));
        bump_version(obj);
        Ok(())
    }
}

#[async_trait]
impl ObjectClient for MemoryClient {
    async fn get(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>> {
        Ok(self.lock()?.objects.get(&key(resource, namespace, name)).cloned())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let mut store = self.lock()?;
        let created = Self::insert_locked(&mut store, obj.clone())?;
        self.count();
        Ok(created)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let mut store = self.lock()?;
        let k = key_of(obj)?;
        let current = store
            .objects
            .get(&k)
            .cloned()
            .ok_or_else(|| Error::NotFound(describe(obj)))?;
        if obj
            .metadata
            .resource_version
            .as_ref()
            .is_some_and(|rv| Some(rv) != current.metadata.resource_version.as_ref())
        {
            return Err(Error::Conflict(describe(obj)));
        }
        let mut next = obj.clone();
        set_status(&mut next, status_of(&current));
        next.metadata.uid = current.metadata.uid.clone();
        next.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        next.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        next.metadata.resource_version = current.metadata.resource_version.clone();
        next.metadata.generation = current.metadata.generation;
        if without_status(&next) != without_status(&current) {
            next.metadata.generation = Some(current.metadata.generation.unwrap_or(0) + 1);
        }
        bump_version(&mut next);
        self.count();
        if next.metadata.deletion_timestamp.is_some() && next.finalizers().is_empty() {
            store.objects.remove(&k);
            store.removed.push(next.clone());
        } else {
            store.objects.insert(k, next.clone());
        }
        Ok(next)
    }

    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let mut store = self.lock()?;
        let current = store
            .objects
            .get_mut(&key_of(obj)?)
            .ok_or_else(|| Error::NotFound(describe(obj)))?;
        set_status(current, status_of(obj));
        bump_version(current);
        let updated = current.clone();
        self.count();
        Ok(updated)
    }

    async fn delete(&self, obj: &DynamicObject) -> Result<()> {
        let mut store = self.lock()?;
        let k = key_of(obj)?;
        let finalized = match store.objects.get_mut(&k) {
            Some(current) => {
                if current.metadata.deletion_timestamp.is_none() {
                    current.metadata.deletion_timestamp = Some(Time(Utc::now()));
                    bump_version(current);
                }
                current.finalizers().is_empty()
            }
            None => return Err(Error::NotFound(describe(obj))),
        };
        if finalized {
            if let Some(removed) = store.objects.remove(&k) {
                store.removed.push(removed);
            }
        }
        self.count();
        Ok(())
    }

    async fn list(&self, resource: &ApiResource, selector: &str) -> Result<Vec<DynamicObject>> {
        Ok(self
            .lock()?
            .objects
            .iter()
            .filter(|((api_version, kind, _, _), _)| *api_version == resource.api_version && *kind == resource.kind)
            .map(|(_, obj)| obj)
            .filter(|obj| matches_selector(obj, selector))
            .cloned()
            .collect())
    }
}
