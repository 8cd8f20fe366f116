use crate::{
    Error, Result,
    adapter::ManagedObjectAdapter,
    callbacks::{CallbackArgs, CallbackDispatcher, ReconcileState},
    client::{ObjectClient, describe, from_dynamic, to_dynamic},
    conditions::{
        mark_deploying, mark_deploying_available, mark_failed_healing, mark_healthy, mark_upgrade_healing_degraded,
    },
    events::{self, EventSink},
    status::{Phase, Status},
    version::{VersionChange, compare, should_take_update_path},
};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    Resource, ResourceExt,
    api::DynamicObject,
    discovery::ApiResource,
    runtime::{controller::Action, events::EventType},
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

mod readiness;
mod sync;
pub use readiness::{is_daemonset_ready, is_deployment_ready, is_statefulset_ready, workload_ready};

/// Label keys, finalizer and timings used by a [`Reconciler`]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcilerConfig {
    /// Label holding the version a dependent resource was created at
    pub create_version_label: String,
    /// Label holding the version a dependent resource was last updated at
    pub update_version_label: String,
    /// Annotation holding the last applied desired state
    pub last_applied_annotation: String,
    /// Label holding the uid of the owning managed object
    pub owner_label: String,
    pub finalizer: String,
    /// Namespace the operator runs in, handed to callbacks
    pub namespace: String,
    /// Seconds between passes while dependents are not ready
    pub requeue_seconds: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            create_version_label: "lifecycle.operator/createVersion".to_string(),
            update_version_label: "lifecycle.operator/updateVersion".to_string(),
            last_applied_annotation: "lifecycle.operator/lastAppliedConfiguration".to_string(),
            owner_label: "lifecycle.operator/owner".to_string(),
            finalizer: "lifecycle.operator/finalizer".to_string(),
            namespace: "default".to_string(),
            requeue_seconds: 10,
        }
    }
}

impl ReconcilerConfig {
    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_seconds)
    }
}

/// Drives one kind of managed object through its deploy / upgrade / delete lifecycle
pub struct Reconciler<A: ManagedObjectAdapter> {
    adapter: A,
    client: Arc<dyn ObjectClient>,
    events: Arc<dyn EventSink>,
    callbacks: CallbackDispatcher,
    config: ReconcilerConfig,
}

// Condition reasons
const REASON_DEPLOYING: &str = "DeployStarted";
const REASON_COMPLETED: &str = events::DEPLOY_COMPLETED;
const REASON_NOT_READY: &str = "ResourcesNotReady";

/// Aggregated readiness of the workloads of one pass
#[derive(Clone, Copy, Debug, Default)]
struct Readiness {
    ready: usize,
    total: usize,
}

impl Readiness {
    fn add(&mut self, ready: Option<bool>) {
        if let Some(ready) = ready {
            self.total += 1;
            if ready {
                self.ready += 1;
            }
        }
    }

    fn all(&self) -> bool {
        self.ready == self.total
    }

    fn any(&self) -> bool {
        self.ready > 0
    }
}

impl<A: ManagedObjectAdapter> Reconciler<A> {
    pub fn new(adapter: A, client: Arc<dyn ObjectClient>, events: Arc<dyn EventSink>, config: ReconcilerConfig) -> Self {
        Self {
            adapter,
            client,
            events,
            callbacks: CallbackDispatcher::default(),
            config,
        }
    }

    #[must_use]
    pub fn with_callbacks(mut self, callbacks: CallbackDispatcher) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    fn managed_resource() -> ApiResource {
        ApiResource::erase::<A::Object>(&())
    }

    fn status_of(&self, cr: &A::Object) -> Status {
        self.adapter.status(cr).cloned().unwrap_or_default()
    }

    /// Mark the object as starting its first deployment at `version`
    pub fn cr_init(&self, cr: &mut A::Object, version: &str) {
        let status = self.adapter.status_mut(cr);
        status.phase = Phase::Deploying;
        status.target_version = version.to_string();
        status.operator_version = version.to_string();
        self.add_finalizer(cr);
    }

    /// Mark the object as fully deployed at `version`
    pub fn cr_set_version(&self, cr: &mut A::Object, version: &str) {
        let status = self.adapter.status_mut(cr);
        status.phase = Phase::Deployed;
        status.observed_version = version.to_string();
        status.operator_version = version.to_string();
        status.target_version = version.to_string();
    }

    pub fn cr_error(&self, cr: &mut A::Object) {
        self.adapter.status_mut(cr).phase = Phase::Error;
    }

    fn has_finalizer(&self, cr: &A::Object) -> bool {
        cr.finalizers().iter().any(|f| *f == self.config.finalizer)
    }

    fn add_finalizer(&self, cr: &mut A::Object) {
        if !self.has_finalizer(cr) {
            cr.finalizers_mut().push(self.config.finalizer.clone());
        }
    }

    async fn record(&self, reference: &ObjectReference, type_: EventType, reason: &str, message: &str) -> Result<()> {
        self.events.record(reference, type_, reason, message).await
    }

    /// Write the metadata of the managed object (finalizers)
    async fn persist_object(&self, cr: &mut A::Object) -> Result<()> {
        let updated = self.client.update(&to_dynamic(cr)?).await?;
        cr.meta_mut().resource_version = updated.metadata.resource_version;
        Ok(())
    }

    async fn persist_status(&self, cr: &mut A::Object) -> Result<()> {
        let updated = self.client.update_status(&to_dynamic(cr)?).await?;
        cr.meta_mut().resource_version = updated.metadata.resource_version;
        Ok(())
    }

    async fn fetch(&self, namespace: Option<&str>, name: &str) -> Result<Option<A::Object>> {
        match self.client.get(&Self::managed_resource(), namespace, name).await? {
            Some(obj) => Ok(Some(from_dynamic(&obj)?)),
            None => Ok(None),
        }
    }

    /// Run one reconciliation pass for the managed object `namespace/name` toward `requested_version`
    pub async fn reconcile(&self, namespace: Option<&str>, name: &str, requested_version: &str) -> Result<Action> {
        let Some(mut cr) = self.fetch(namespace, name).await? else {
            debug!("{name} is gone, nothing to reconcile");
            return Ok(Action::await_change());
        };
        if cr.meta().deletion_timestamp.is_some() {
            return self.reconcile_delete(cr).await;
        }
        let oref = cr.object_ref(&());
        let persisted = self.status_of(&cr);
        let mut written = persisted.clone();

        if persisted.phase.is_empty() {
            let creating = self.adapter.is_creating(&cr)?;
            info!("Deploying {name} at version {requested_version}");
            let had_finalizer = self.has_finalizer(&cr);
            self.cr_init(&mut cr, requested_version);
            if !had_finalizer {
                self.persist_object(&mut cr).await?;
            }
            self.persist_status(&mut cr).await?;
            written = self.status_of(&cr);
            if creating {
                self.record(&oref, EventType::Normal, events::DEPLOY_STARTED, "Started Deployment")
                    .await?;
            }
        } else {
            let deploying = persisted.phase == Phase::Deploying;
            if should_take_update_path(requested_version, &persisted.operator_version, deploying)? {
                info!(
                    "Upgrading {name} from {} to {requested_version}",
                    persisted.observed_version
                );
                let status = self.adapter.status_mut(&mut cr);
                status.phase = Phase::Upgrading;
                status.target_version = requested_version.to_string();
                status.operator_version = requested_version.to_string();
                self.persist_status(&mut cr).await?;
                written = self.status_of(&cr);
                self.record(
                    &oref,
                    EventType::Normal,
                    events::UPGRADE_STARTED,
                    &format!("Started upgrade to version {requested_version}"),
                )
                .await?;
            } else if deploying && compare(&persisted.operator_version, requested_version) == VersionChange::Upgrade {
                // nothing was observed yet, deploy the new version directly
                let status = self.adapter.status_mut(&mut cr);
                status.target_version = requested_version.to_string();
                status.operator_version = requested_version.to_string();
            }
            if !self.has_finalizer(&cr) {
                self.add_finalizer(&mut cr);
                self.persist_object(&mut cr).await?;
            }
        }
        let before = self.status_of(&cr);
        let target = before.target_version.clone();

        let owner = to_dynamic(&cr)?;
        let desired = self.adapter.get_all_resources(&cr)?;
        let mut readiness = Readiness::default();
        for resource in &desired {
            let live = self.sync_resource(&owner, &oref, resource.clone(), &target).await?;
            readiness.add(workload_ready(&live)?);
        }
        debug!("{name}: {}/{} workloads ready", readiness.ready, readiness.total);

        if readiness.all() && before.phase == Phase::Upgrading {
            self.cleanup_orphans(&owner, &oref, &desired, &target).await?;
        }

        let status = self.adapter.status_mut(&mut cr);
        let completed = project_status(status, readiness);
        if status.differs_from(&written) {
            self.persist_status(&mut cr).await?;
        }
        if completed {
            info!("{name} deployed at version {target}");
            self.record(&oref, EventType::Normal, events::DEPLOY_COMPLETED, "Deployment Completed")
                .await?;
        }
        if readiness.all() {
            Ok(Action::await_change())
        } else {
            Ok(Action::requeue(self.config.requeue_interval()))
        }
    }

    async fn reconcile_delete(&self, mut cr: A::Object) -> Result<Action> {
        if !self.has_finalizer(&cr) {
            return Ok(Action::await_change());
        }
        let name = cr.name_any();
        let oref = cr.object_ref(&());
        let owner = to_dynamic(&cr)?;
        if self.status_of(&cr).phase != Phase::Deleting {
            info!("Deleting resources of {name}");
            self.adapter.status_mut(&mut cr).phase = Phase::Deleting;
            self.persist_status(&mut cr).await?;
        }
        for obj in self.list_dependents(&owner).await? {
            if obj.metadata.deletion_timestamp.is_none() {
                self.delete_dependent(&owner, &oref, obj).await?;
            }
        }
        let remaining = self.list_dependents(&owner).await?;
        if !remaining.is_empty() {
            debug!("{name}: waiting for {} dependent resources to go away", remaining.len());
            return Ok(Action::requeue(self.config.requeue_interval()));
        }
        self.adapter.status_mut(&mut cr).phase = Phase::Deleted;
        self.persist_status(&mut cr).await?;
        cr.finalizers_mut().retain(|f| *f != self.config.finalizer);
        self.persist_object(&mut cr).await?;
        info!("{name} deleted");
        Ok(Action::await_change())
    }

    async fn list_dependents(&self, owner: &DynamicObject) -> Result<Vec<DynamicObject>> {
        let selector = format!("{}={}", self.config.owner_label, owner_key(owner));
        let mut res = Vec::new();
        for resource in self.adapter.get_dependant_resources_list_objects() {
            res.extend(self.client.list(&resource, &selector).await?);
        }
        Ok(res)
    }

    async fn delete_dependent(&self, owner: &DynamicObject, oref: &ObjectReference, obj: DynamicObject) -> Result<()> {
        let (kind, _, name) = crate::client::object_identity(&obj);
        self.dispatch(ReconcileState::PreDelete, None, Some(obj.clone()), owner)
            .await?;
        if let Err(e) = self.client.delete(&obj).await {
            if !matches!(e, Error::NotFound(_)) {
                if let Err(event_err) = self
                    .record(
                        oref,
                        EventType::Warning,
                        events::DELETE_RESOURCE_FAILED,
                        &format!("Failed to delete resource {kind} {name}"),
                    )
                    .await
                {
                    warn!("Failed to record the deletion failure of {kind} {name}: {event_err}");
                }
                return Err(e);
            }
        }
        self.dispatch(ReconcileState::PostDelete, None, Some(obj.clone()), owner)
            .await?;
        debug!("Deleted {}", describe(&obj));
        self.record(
            oref,
            EventType::Normal,
            events::DELETE_RESOURCE_SUCCESS,
            &format!("Successfully deleted resource {kind} {name}"),
        )
        .await
    }

    async fn dispatch(
        &self,
        state: ReconcileState,
        desired: Option<DynamicObject>,
        current: Option<DynamicObject>,
        owner: &DynamicObject,
    ) -> Result<()> {
        if self.callbacks.is_empty() {
            return Ok(());
        }
        self.callbacks
            .invoke(CallbackArgs {
                state,
                desired,
                current,
                resource: owner.clone(),
                namespace: self.config.namespace.clone(),
                client: self.client.clone(),
                events: self.events.clone(),
            })
            .await
    }
}

/// Value of the owner label on the dependents of `owner`
fn owner_key(owner: &DynamicObject) -> String {
    owner.uid().unwrap_or_else(|| owner.name_any())
}

/// Derive conditions and phase from the workloads readiness; returns whether a deployment just completed
fn project_status(status: &mut Status, readiness: Readiness) -> bool {
    if readiness.all() {
        mark_healthy(&mut status.conditions, REASON_COMPLETED, "");
        match status.phase {
            Phase::Deploying | Phase::Upgrading | Phase::Error => {
                status.observed_version = status.target_version.clone();
                status.phase = Phase::Deployed;
                return true;
            }
            _ => {}
        }
        return false;
    }
    let message = format!("{} of {} workloads ready", readiness.ready, readiness.total);
    match (status.phase, readiness.any()) {
        (Phase::Deploying, true) => mark_deploying_available(&mut status.conditions, REASON_DEPLOYING, &message),
        (Phase::Deploying, false) => mark_deploying(&mut status.conditions, REASON_DEPLOYING, &message),
        (_, true) => mark_upgrade_healing_degraded(&mut status.conditions, REASON_NOT_READY, &message),
        (_, false) => mark_failed_healing(&mut status.conditions, REASON_NOT_READY, &message),
    }
    false
}
