//! Remote cluster pod adapter, backed by `kube`.
//!
//! Creation polls for `Running` the way a controller's reconcile loop would
//! (cf. the DiskPool operator in the retrieval pack), rather than watching;
//! a one-shot poll loop is enough since `PoolEngine` already bounds the
//! whole call with its own creation-timeout.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod as K8sPod;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Config as KubeClientConfig};

use crate::adapter::Adapter;
use crate::config::PodConfig;
use crate::error::{PoolError, PoolResult};
use crate::handle::{NativeHandle, ResourceHandle, UsageSample};

/// Pools pods in a remote cluster namespace, port-forwarding to each.
pub struct PodAdapter {
    client: Client,
}

impl PodAdapter {
    /// Build a client from the ambient kubeconfig (in-cluster config if
    /// running inside one, `~/.kube/config` otherwise).
    pub async fn connect() -> PoolResult<Self> {
        let config = KubeClientConfig::infer().await.map_err(|e| PoolError::CreationFailure {
            resource_type: <Self as Adapter>::TYPE_TAG,
            reason: format!("inferring cluster config: {e}"),
        })?;
        let client = Client::try_from(config).map_err(|e| PoolError::CreationFailure {
            resource_type: <Self as Adapter>::TYPE_TAG,
            reason: format!("building cluster client: {e}"),
        })?;
        Ok(Self { client })
    }

    fn api(&self, namespace: &str) -> Api<K8sPod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl Adapter for PodAdapter {
    type Config = PodConfig;
    const TYPE_TAG: &'static str = "pod";

    fn check_config(&self, config: &Self::Config) -> PoolResult<()> {
        config.scripts.check()?;
        if config.namespace.trim().is_empty() {
            return Err(PoolError::BadConfig("namespace must not be empty".to_string()));
        }
        Ok(())
    }

    async fn create(
        &self,
        port: u16,
        name: String,
        config: &Self::Config,
    ) -> PoolResult<NativeHandle> {
        let api = self.api(&config.namespace);
        let pod_name = format!("{}-{name}", config.default_pod_name);

        let mut labels = BTreeMap::new();
        labels.insert("app.kubernetes.io/managed-by".to_string(), "respool".to_string());
        labels.insert("respool/resource-name".to_string(), name.clone());

        let manifest: K8sPod = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": pod_name, "labels": labels },
            "spec": {
                "restartPolicy": "Never",
                "containers": [{
                    "name": "worker",
                    "image": config.default_image_name,
                    "ports": [{ "containerPort": config.default_pod_port }],
                    "env": [{ "name": "RESPOOL_RESOURCE_NAME", "value": name }],
                }],
            },
        }))
        .map_err(|e| PoolError::CreationFailure {
            resource_type: Self::TYPE_TAG,
            reason: format!("building pod manifest: {e}"),
        })?;

        api.create(&PostParams::default(), &manifest)
            .await
            .map_err(|e| PoolError::CreationFailure {
                resource_type: Self::TYPE_TAG,
                reason: format!("creating pod '{pod_name}': {e}"),
            })?;

        wait_for_running(&api, &pod_name).await?;

        let forwarder = spawn_port_forward(
            self.client.clone(),
            config.namespace.clone(),
            pod_name.clone(),
            config.default_pod_port,
            port,
        );

        Ok(NativeHandle::Pod {
            namespace: config.namespace.clone(),
            pod_name,
            forwarder: Some(forwarder),
        })
    }

    async fn terminate(&self, handle: &mut ResourceHandle) {
        let NativeHandle::Pod {
            namespace,
            pod_name,
            forwarder,
        } = &mut handle.native
        else {
            return;
        };
        if let Some(task) = forwarder.take() {
            task.abort();
        }
        let api = self.api(namespace);
        let graceful = tokio::time::timeout(
            self.shutdown_timeout(),
            api.delete(pod_name, &DeleteParams::default()),
        )
        .await;
        let needs_force = match graceful {
            Ok(Ok(_)) => false,
            Ok(Err(kube::Error::Api(e))) => e.code != 404,
            Ok(Err(_)) | Err(_) => true,
        };
        if needs_force {
            let force_params = DeleteParams {
                grace_period_seconds: Some(0),
                ..DeleteParams::default()
            };
            let _ = api.delete(pod_name, &force_params).await;
        }
    }

    async fn liveness(&self, handle: &ResourceHandle) -> bool {
        let NativeHandle::Pod {
            namespace,
            pod_name,
            ..
        } = &handle.native
        else {
            return false;
        };
        let api = self.api(namespace);
        match api.get(pod_name).await {
            Ok(pod) => pod
                .status
                .and_then(|s| s.phase)
                .is_some_and(|phase| phase == "Running"),
            Err(_) => false,
        }
    }

    fn creation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(60)
    }

    fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(15)
    }
}

/// Poll bound from SPEC_FULL §4.6 step 4: ~30 attempts × 500ms, independent
/// of (and tighter than) the engine's own 60s creation-timeout wrapper.
const READINESS_POLL_ATTEMPTS: u32 = 30;
const READINESS_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

async fn wait_for_running(api: &Api<K8sPod>, pod_name: &str) -> PoolResult<()> {
    for attempt in 0..READINESS_POLL_ATTEMPTS {
        let pod = api.get(pod_name).await.map_err(|e| PoolError::CreationFailure {
            resource_type: "pod",
            reason: format!("polling pod '{pod_name}': {e}"),
        })?;
        if pod.status.and_then(|s| s.phase).is_some_and(|p| p == "Running") {
            return Ok(());
        }
        if attempt + 1 < READINESS_POLL_ATTEMPTS {
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }
    Err(PoolError::CreationTimeout {
        resource_type: "pod",
        timeout_ms: (READINESS_POLL_ATTEMPTS as u64) * (READINESS_POLL_INTERVAL.as_millis() as u64),
    })
}

fn spawn_port_forward(
    client: Client,
    namespace: String,
    pod_name: String,
    pod_port: u16,
    local_port: u16,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let api: Api<K8sPod> = Api::namespaced(client, &namespace);
        let listener = match tokio::net::TcpListener::bind(("127.0.0.1", local_port)).await {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(pod = %pod_name, error = %e, "port-forward listener bind failed");
                return;
            }
        };
        loop {
            let Ok((mut local_stream, _)) = listener.accept().await else {
                continue;
            };
            let mut forward = match api.portforward(&pod_name, &[pod_port]).await {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(pod = %pod_name, error = %e, "portforward setup failed");
                    continue;
                }
            };
            let Some(mut upstream) = forward.take_stream(pod_port) else {
                continue;
            };
            tokio::spawn(async move {
                let _ = tokio::io::copy_bidirectional(&mut local_stream, &mut upstream).await;
            });
        }
    })
}
