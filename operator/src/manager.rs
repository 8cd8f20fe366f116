use crate::{Error, Metrics, OPERATOR, OperatorArgs, Result, SampleConfig, SampleConfigAdapter};
use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt, future::BoxFuture};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    ResourceExt,
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::Reporter,
        watcher::Config,
    },
};
use lifecycle::{KubeClient, KubeEventSink, Reconciler};
use serde::Serialize;
use std::sync::Arc;
use tokio::{sync::RwLock, time::Duration};
use tracing::{info, instrument, warn};

// Context for our reconciler
pub struct Context {
    /// Lifecycle engine for SampleConfig objects
    pub reconciler: Reconciler<SampleConfigAdapter>,
    /// Version requested for every managed object
    pub operator_version: String,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    pub operator_version: String,
    pub namespace: String,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            operator_version: String::new(),
            namespace: String::new(),
            reporter: OPERATOR.into(),
        }
    }
}

#[instrument(skip(ctx, config), fields(name = %config.name_any()))]
pub async fn reconcile(config: Arc<SampleConfig>, ctx: Arc<Context>) -> Result<Action> {
    let _mes = ctx.metrics.sample_config.count_and_measure();
    ctx.diagnostics.write().await.last_event = Utc::now();
    info!("Reconciling SampleConfig \"{}\"", config.name_any());
    let action = ctx
        .reconciler
        .reconcile(config.namespace().as_deref(), &config.name_any(), &ctx.operator_version)
        .await?;
    Ok(action)
}

#[must_use]
pub fn error_policy(config: Arc<SampleConfig>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed for {:?}: {:?}", config.metadata.name, error);
    ctx.metrics.sample_config.reconcile_failure(&config, error);
    match error {
        // waits for a new operator version or an edited object
        Error::LifecycleError(lifecycle::Error::Downgrade { .. }) => Action::await_change(),
        Error::LifecycleError(e) if e.is_transient() => Action::requeue(ctx.reconciler.config().requeue_interval()),
        _ => Action::requeue(Duration::from_secs(5 * 60)),
    }
}

/// Data owned by the Manager
#[derive(Clone, Default)]
pub struct Manager {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics shared with the reconciler
    metrics: Metrics,
}

/// Manager that owns a Controller for SampleConfig
impl Manager {
    /// Lifecycle initialization interface for app
    ///
    /// This returns a `Manager` that drives a `Controller` + a future to be awaited
    /// It is up to `main` to wait for the controller stream.
    pub async fn new(args: &OperatorArgs) -> Result<(Self, BoxFuture<'static, ()>)> {
        let client = Client::try_default().await.map_err(Error::KubeError)?;
        let namespace = args
            .namespace
            .clone()
            .unwrap_or_else(|| client.default_namespace().to_string());
        let manager = Manager::default();
        {
            let mut diag = manager.diagnostics.write().await;
            diag.operator_version = args.operator_version.clone();
            diag.namespace = namespace.clone();
        }
        let reporter = manager.diagnostics.read().await.reporter.clone();
        let reconciler = Reconciler::new(
            SampleConfigAdapter::new(&namespace, &args.server_image),
            Arc::new(KubeClient::new(client.clone())),
            Arc::new(KubeEventSink::new(client.clone(), reporter)),
            args.reconciler_config(&namespace),
        );
        let context = Arc::new(Context {
            reconciler,
            operator_version: args.operator_version.clone(),
            diagnostics: manager.diagnostics.clone(),
            metrics: manager.metrics.clone(),
        });

        let configs = Api::<SampleConfig>::all(client.clone());
        // Ensure CRD is installed before loop-watching
        configs.list(&ListParams::default().limit(1)).await.map_err(|e| {
            Error::ConfigError(format!(
                "is the crd installed? please run: cargo run --bin crdgen | kubectl apply -f - ({e})"
            ))
        })?;
        info!("Managing SampleConfig resources at version {} in {namespace}", args.operator_version);

        // All good. Start controller and return its future.
        let controller = Controller::new(configs, Config::default().any_semantic())
            .owns(Api::<Deployment>::namespaced(client, &namespace), Config::default())
            .run(reconcile, error_policy, context)
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .boxed();

        Ok((manager, controller))
    }

    /// Metrics getter
    #[must_use]
    pub fn metrics(&self) -> String {
        self.metrics.render()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}
