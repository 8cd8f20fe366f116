use super::{Reconciler, owner_key};
use crate::{
    Result,
    adapter::ManagedObjectAdapter,
    callbacks::ReconcileState,
    client::{api_resource_of, describe, object_identity},
    diff::{last_applied, merge_labels_and_annotations, merge_object, normalized, set_last_applied_configuration},
    events,
};
use k8s_openapi::{
    api::core::v1::ObjectReference,
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference},
};
use kube::{ResourceExt, api::DynamicObject, runtime::events::EventType};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

impl<A: ManagedObjectAdapter> Reconciler<A> {
    /// Owner label, and an owner reference wherever the store accepts one
    pub(super) fn stamp_ownership(&self, owner: &DynamicObject, desired: &mut DynamicObject) {
        let labels = ObjectMeta {
            labels: Some(BTreeMap::from([(self.config.owner_label.clone(), owner_key(owner))])),
            ..Default::default()
        };
        merge_labels_and_annotations(&labels, &mut desired.metadata);

        // a namespaced owner can only own objects of its own namespace
        let valid = match owner.namespace() {
            None => true,
            Some(ns) => desired.namespace().is_some_and(|d| d == ns),
        };
        let Some(uid) = owner.uid() else {
            return;
        };
        let Some(types) = owner.types.as_ref() else {
            return;
        };
        if !valid {
            return;
        }
        let refs = desired.metadata.owner_references.get_or_insert_with(Vec::new);
        if !refs.iter().any(|r| r.uid == uid) {
            refs.push(OwnerReference {
                api_version: types.api_version.clone(),
                kind: types.kind.clone(),
                name: owner.name_any(),
                uid,
                controller: Some(true),
                block_owner_deletion: Some(true),
            });
        }
    }

    fn stamp_versions(&self, obj: &mut DynamicObject, created: &str, updated: &str) {
        let versions = ObjectMeta {
            labels: Some(BTreeMap::from([
                (self.config.create_version_label.clone(), created.to_string()),
                (self.config.update_version_label.clone(), updated.to_string()),
            ])),
            ..Default::default()
        };
        merge_labels_and_annotations(&versions, &mut obj.metadata);
    }

    /// Create the resource when missing, update it when its desired state changed.
    ///
    /// Returns the live object as known after this step.
    pub(super) async fn sync_resource(
        &self,
        owner: &DynamicObject,
        oref: &ObjectReference,
        mut desired: DynamicObject,
        version: &str,
    ) -> Result<DynamicObject> {
        let resource = api_resource_of(&desired)?;
        let (kind, _, name) = object_identity(&desired);
        self.stamp_ownership(owner, &mut desired);
        let annotation = &self.config.last_applied_annotation;
        let live = self
            .client
            .get(&resource, desired.namespace().as_deref(), &name)
            .await?;

        let Some(live) = live else {
            set_last_applied_configuration(&mut desired, annotation)?;
            self.stamp_versions(&mut desired, version, version);
            self.dispatch(ReconcileState::PreCreate, Some(desired.clone()), None, owner)
                .await?;
            let created = match self.client.create(&desired).await {
                Ok(created) => created,
                Err(e) => {
                    if let Err(event_err) = self
                        .record(
                            oref,
                            EventType::Warning,
                            events::CREATE_RESOURCE_FAILED,
                            &format!("Failed to create resource {kind} {name}"),
                        )
                        .await
                    {
                        warn!("Failed to record the creation failure of {kind} {name}: {event_err}");
                    }
                    return Err(e);
                }
            };
            self.dispatch(ReconcileState::PostCreate, Some(desired), Some(created.clone()), owner)
                .await?;
            self.record(
                oref,
                EventType::Normal,
                events::CREATE_RESOURCE_SUCCESS,
                &format!("Successfully created resource {kind} {name}"),
            )
            .await?;
            return Ok(created);
        };

        let previous = last_applied(&live, annotation);
        // every resource is applied again once per version
        let applied_version = live
            .labels()
            .get(&self.config.update_version_label)
            .is_some_and(|v| v == version);
        if applied_version && previous.as_ref() == Some(&normalized(&desired, annotation)?) {
            return Ok(live);
        }
        debug!("Applying {} at version {version}", describe(&desired));
        set_last_applied_configuration(&mut desired, annotation)?;
        let created_at = live
            .labels()
            .get(&self.config.create_version_label)
            .cloned()
            .unwrap_or_else(|| version.to_string());
        self.stamp_versions(&mut desired, &created_at, version);
        let merged = merge_object(&serde_json::to_value(&desired)?, &live, previous.as_ref())?;
        self.dispatch(ReconcileState::PreUpdate, Some(desired.clone()), Some(live), owner)
            .await?;
        let updated = match self.client.update(&merged).await {
            Ok(updated) => updated,
            Err(e) => {
                if let Err(event_err) = self
                    .record(
                        oref,
                        EventType::Warning,
                        events::UPDATE_RESOURCE_FAILED,
                        &format!("Failed to update resource {kind} {name}"),
                    )
                    .await
                {
                    warn!("Failed to record the update failure of {kind} {name}: {event_err}");
                }
                return Err(e);
            }
        };
        self.dispatch(ReconcileState::PostUpdate, Some(desired), Some(updated.clone()), owner)
            .await?;
        self.record(
            oref,
            EventType::Normal,
            events::UPDATE_RESOURCE_SUCCESS,
            &format!("Successfully updated resource {kind} {name}"),
        )
        .await?;
        Ok(updated)
    }

    /// Delete owned resources that are no longer desired and were created before `version`
    pub(super) async fn cleanup_orphans(
        &self,
        owner: &DynamicObject,
        oref: &ObjectReference,
        desired: &[DynamicObject],
        version: &str,
    ) -> Result<()> {
        let wanted: HashSet<_> = desired.iter().map(object_identity).collect();
        for obj in self.list_dependents(owner).await? {
            if wanted.contains(&object_identity(&obj)) {
                continue;
            }
            if obj
                .labels()
                .get(&self.config.create_version_label)
                .is_some_and(|v| v == version)
            {
                continue;
            }
            debug!("Removing orphan {}", describe(&obj));
            self.delete_dependent(owner, oref, obj).await?;
        }
        Ok(())
    }
}
