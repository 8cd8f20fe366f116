use crate::{
    Result,
    client::{ObjectClient, api_resource_of},
    events::EventSink,
};
use futures::future::BoxFuture;
use kube::{ResourceExt, api::DynamicObject, discovery::ApiResource};
use std::{collections::HashMap, sync::Arc};

/// Point of the apply step a callback is invoked at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReconcileState {
    PreCreate,
    PostCreate,
    PreUpdate,
    PostUpdate,
    PreDelete,
    PostDelete,
}

/// What a callback gets to look at
#[derive(Clone)]
pub struct CallbackArgs {
    pub state: ReconcileState,
    /// The desired state, `None` for deletions of orphans
    pub desired: Option<DynamicObject>,
    /// The live object, `None` when it does not exist (always for `PreCreate`)
    pub current: Option<DynamicObject>,
    /// The managed object owning the dependent resource
    pub resource: DynamicObject,
    /// Namespace the operator works in
    pub namespace: String,
    pub client: Arc<dyn ObjectClient>,
    pub events: Arc<dyn EventSink>,
}

pub type Callback = Arc<dyn Fn(CallbackArgs) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Per dependent-resource-type hooks, invoked in registration order
#[derive(Clone, Default)]
pub struct CallbackDispatcher {
    callbacks: HashMap<(String, String), Vec<Callback>>,
}

fn type_key(obj: &DynamicObject) -> Option<(String, String)> {
    obj.types.as_ref().map(|t| (t.api_version.clone(), t.kind.clone()))
}

impl CallbackDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for a typed dependent resource
    pub fn add_callback<K, F>(&mut self, callback: F)
    where
        K: kube::Resource<DynamicType = ()>,
        F: Fn(CallbackArgs) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let key = (K::api_version(&()).to_string(), K::kind(&()).to_string());
        self.callbacks.entry(key).or_default().push(Arc::new(callback));
    }

    /// Register a callback for a resource only known at runtime
    pub fn add_dynamic_callback<F>(&mut self, resource: &ApiResource, callback: F)
    where
        F: Fn(CallbackArgs) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let key = (resource.api_version.clone(), resource.kind.clone());
        self.callbacks.entry(key).or_default().push(Arc::new(callback));
    }

    pub fn len(&self) -> usize {
        self.callbacks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the callbacks registered for the dependent resource in `args`.
    ///
    /// When no live object is given past `PreCreate`, it is looked up first. The first failing
    /// callback stops the dispatch and its error is returned as is.
    pub async fn invoke(&self, mut args: CallbackArgs) -> Result<()> {
        let Some(subject) = args.desired.clone().or_else(|| args.current.clone()) else {
            return Ok(());
        };
        let Some(callbacks) = type_key(&subject).and_then(|k| self.callbacks.get(&k)) else {
            return Ok(());
        };
        if args.current.is_none() && args.state != ReconcileState::PreCreate {
            let resource = api_resource_of(&subject)?;
            args.current = args
                .client
                .get(&resource, subject.namespace().as_deref(), &subject.name_any())
                .await?;
        }
        for callback in callbacks {
            tracing::debug!("Invoking {:?} callback for {}", args.state, subject.name_any());
            callback(args.clone()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, client::to_dynamic, events::MemoryEventSink, memclient::MemoryClient};
    use futures::FutureExt;
    use k8s_openapi::{
        api::{apps::v1::Deployment, core::v1::ServiceAccount},
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };
    use std::sync::Mutex;

    fn deployment(name: &str) -> DynamicObject {
        to_dynamic(&Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap()
    }

    fn args(state: ReconcileState, desired: DynamicObject, client: Arc<MemoryClient>) -> CallbackArgs {
        CallbackArgs {
            state,
            desired: Some(desired),
            current: None,
            resource: deployment("owner"),
            namespace: "ns".to_string(),
            client,
            events: Arc::new(MemoryEventSink::default()),
        }
    }

    #[tokio::test]
    async fn test_callbacks_run_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = CallbackDispatcher::new();
        for id in 0..3 {
            let calls = calls.clone();
            dispatcher.add_callback::<Deployment, _>(move |a| {
                calls.lock().unwrap().push((id, a.state));
                futures::future::ready(Ok(())).boxed()
            });
        }
        let client = Arc::new(MemoryClient::new());
        dispatcher
            .invoke(args(ReconcileState::PreCreate, deployment("web"), client))
            .await
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![
            (0, ReconcileState::PreCreate),
            (1, ReconcileState::PreCreate),
            (2, ReconcileState::PreCreate),
        ]);
        assert_eq!(dispatcher.len(), 3);
    }

    #[tokio::test]
    async fn test_other_kinds_are_not_dispatched() {
        let called = Arc::new(Mutex::new(false));
        let mut dispatcher = CallbackDispatcher::new();
        let flag = called.clone();
        dispatcher.add_callback::<ServiceAccount, _>(move |_| {
            *flag.lock().unwrap() = true;
            futures::future::ready(Ok(())).boxed()
        });
        let client = Arc::new(MemoryClient::new());
        dispatcher
            .invoke(args(ReconcileState::PostCreate, deployment("web"), client))
            .await
            .unwrap();
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn test_current_is_looked_up() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = CallbackDispatcher::new();
        let record = seen.clone();
        dispatcher.add_callback::<Deployment, _>(move |a| {
            record.lock().unwrap().push(a.current.as_ref().and_then(|c| c.metadata.uid.clone()));
            futures::future::ready(Ok(())).boxed()
        });
        let client = Arc::new(MemoryClient::new());
        dispatcher
            .invoke(args(ReconcileState::PreUpdate, deployment("web"), client.clone()))
            .await
            .unwrap();
        let created = client.insert(deployment("web")).unwrap();
        dispatcher
            .invoke(args(ReconcileState::PreCreate, deployment("web"), client.clone()))
            .await
            .unwrap();
        dispatcher
            .invoke(args(ReconcileState::PostCreate, deployment("web"), client))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![None, None, created.metadata.uid]);
    }

    #[tokio::test]
    async fn test_first_error_stops_dispatch() {
        let calls = Arc::new(Mutex::new(0));
        let mut dispatcher = CallbackDispatcher::new();
        dispatcher.add_callback::<Deployment, _>(|_| {
            futures::future::ready(Err(Error::Other("callback failed".to_string()))).boxed()
        });
        let counter = calls.clone();
        dispatcher.add_callback::<Deployment, _>(move |_| {
            *counter.lock().unwrap() += 1;
            futures::future::ready(Ok(())).boxed()
        });
        let client = Arc::new(MemoryClient::new());
        let err = dispatcher
            .invoke(args(ReconcileState::PreCreate, deployment("web"), client))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Other(m) if m == "callback failed"));
        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
