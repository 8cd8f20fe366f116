use crate::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    Client,
    runtime::events::{Event, EventType, Recorder, Reporter},
};
use std::sync::Mutex;

pub const DEPLOY_STARTED: &str = "DeployStarted";
pub const UPGRADE_STARTED: &str = "UpgradeStarted";
pub const DEPLOY_COMPLETED: &str = "DeployCompleted";
pub const CREATE_RESOURCE_SUCCESS: &str = "CreateResourceSuccess";
pub const CREATE_RESOURCE_FAILED: &str = "CreateResourceFailed";
pub const UPDATE_RESOURCE_SUCCESS: &str = "UpdateResourceSuccess";
pub const UPDATE_RESOURCE_FAILED: &str = "UpdateResourceFailed";
pub const DELETE_RESOURCE_SUCCESS: &str = "DeleteResourceSuccess";
pub const DELETE_RESOURCE_FAILED: &str = "DeleteResourceFailed";

/// Destination of the lifecycle events recorded against a managed object
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, reference: &ObjectReference, type_: EventType, reason: &str, message: &str) -> Result<()>;
}

fn action_of(reason: &str) -> &str {
    match reason {
        DEPLOY_STARTED | DEPLOY_COMPLETED => "Deploy",
        UPGRADE_STARTED => "Upgrade",
        CREATE_RESOURCE_SUCCESS | CREATE_RESOURCE_FAILED => "Create",
        UPDATE_RESOURCE_SUCCESS | UPDATE_RESOURCE_FAILED => "Update",
        DELETE_RESOURCE_SUCCESS | DELETE_RESOURCE_FAILED => "Delete",
        _ => "Reconcile",
    }
}

fn type_name(type_: EventType) -> &'static str {
    match type_ {
        EventType::Normal => "Normal",
        EventType::Warning => "Warning",
    }
}

/// Publishes events through the kubernetes events API
#[derive(Clone)]
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    #[must_use]
    pub fn new(client: Client, reporter: Reporter) -> Self {
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn record(&self, reference: &ObjectReference, type_: EventType, reason: &str, message: &str) -> Result<()> {
        let ev = Event {
            type_,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: action_of(reason).to_string(),
            secondary: None,
        };
        match self.recorder.publish(&ev, reference).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(src)) => {
                tracing::warn!("Ignoring {:?} while sending an event", src);
                Ok(())
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

/// Keeps recorded events in memory as `"<Type> <Reason> <message>"`
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<String>>,
}

impl MemoryEventSink {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut e) = self.events.lock() {
            e.clear();
        }
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn record(&self, _reference: &ObjectReference, type_: EventType, reason: &str, message: &str) -> Result<()> {
        self.events
            .lock()
            .map_err(|e| Error::Other(e.to_string()))?
            .push(format!("{} {} {}", type_name(type_), reason, message));
        Ok(())
    }
}
