use clap::Parser;
use lifecycle::ReconcilerConfig;

const LABEL_PREFIX: &str = "operator.sample.lifecycle.io";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct OperatorArgs {
    /// Version of the deployed components, compared against the managed objects on every pass
    #[arg(long, env = "OPERATOR_VERSION", value_name = "OPERATOR_VERSION")]
    pub operator_version: String,
    /// Image of the sample http server
    #[arg(long, env = "SERVER_IMAGE", value_name = "SERVER_IMAGE")]
    pub server_image: String,
    /// Namespace receiving the dependent resources, the client default namespace when unset
    #[arg(short, long, env = "NAMESPACE", value_name = "NAMESPACE")]
    pub namespace: Option<String>,
    /// Address of the health and metrics server
    #[arg(short, long, env = "LISTEN", value_name = "LISTEN", default_value = "0.0.0.0:9000")]
    pub listen: String,
    /// Seconds between passes while the dependent resources are not ready
    #[arg(long, env = "REQUEUE_SECONDS", value_name = "REQUEUE_SECONDS", default_value_t = 10)]
    pub requeue_seconds: u64,
}

impl OperatorArgs {
    /// Reconciler settings for the sample operator, deploying into `namespace`
    #[must_use]
    pub fn reconciler_config(&self, namespace: &str) -> ReconcilerConfig {
        ReconcilerConfig {
            create_version_label: format!("{LABEL_PREFIX}/createVersion"),
            update_version_label: format!("{LABEL_PREFIX}/updateVersion"),
            last_applied_annotation: format!("{LABEL_PREFIX}/lastAppliedConfiguration"),
            owner_label: format!("{LABEL_PREFIX}/owner"),
            finalizer: "sample-finalizer".to_string(),
            namespace: namespace.to_string(),
            requeue_seconds: self.requeue_seconds,
        }
    }
}
