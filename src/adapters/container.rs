//! Local container-daemon adapter, backed by `bollard`.
//!
//! Creation, teardown, and the inspect/stats calls below follow the shape of
//! the container-pool example in the retrieval pack (`create_container_internal`
//! / `terminate_container` there) — connect once, reuse the client, drive the
//! daemon's async HTTP API directly rather than shelling out to the `docker` CLI.

use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    Config as DockerContainerConfig, CreateContainerOptions, RemoveContainerOptions,
    StartContainerOptions, Stats, StatsOptions,
};
use futures::StreamExt;

use crate::adapter::Adapter;
use crate::config::ContainerConfig;
use crate::error::{PoolError, PoolResult};
use crate::handle::{NativeHandle, ResourceHandle, UsageSample};

/// Pools containers on the local Docker-compatible daemon.
pub struct ContainerAdapter {
    docker: Docker,
    config: ContainerConfig,
}

impl ContainerAdapter {
    /// Connect to the daemon using the platform-default socket/pipe.
    ///
    /// `config`'s `creation_timeout`/`shutdown_timeout` govern this adapter's
    /// own deadlines (see `Adapter::creation_timeout`/`shutdown_timeout`
    /// below) rather than the trait's generic defaults.
    pub fn connect(config: ContainerConfig) -> PoolResult<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            PoolError::CreationFailure {
                resource_type: <Self as Adapter>::TYPE_TAG,
                reason: format!("connecting to the container daemon: {e}"),
            }
        })?;
        Ok(Self { docker, config })
    }
}

impl Adapter for ContainerAdapter {
    type Config = ContainerConfig;
    const TYPE_TAG: &'static str = "container";

    fn creation_timeout(&self) -> Duration {
        self.config.creation_timeout
    }

    fn shutdown_timeout(&self) -> Duration {
        self.config.shutdown_timeout
    }

    fn check_config(&self, config: &Self::Config) -> PoolResult<()> {
        config.scripts.check()
    }

    async fn create(
        &self,
        port: u16,
        name: String,
        config: &Self::Config,
    ) -> PoolResult<NativeHandle> {
        let container_name = format!("{}-{name}", config.default_container_name);
        let mut pull_stream = self.docker.create_image(
            Some(bollard::image::CreateImageOptions {
                from_image: config.default_image_name.clone(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(chunk) = pull_stream.next().await {
            if let Err(e) = chunk {
                return Err(PoolError::CreationFailure {
                    resource_type: Self::TYPE_TAG,
                    reason: format!("pulling image '{}': {e}", config.default_image_name),
                });
            }
        }

        let host_config = bollard::service::HostConfig {
            binds: config.scripts.script_dir_path.as_ref().map(|dir| {
                vec![format!("{dir}:/respool/scripts:ro")]
            }),
            port_bindings: Some(
                [(
                    format!("{port}/tcp"),
                    Some(vec![bollard::service::PortBinding {
                        host_ip: Some("127.0.0.1".to_string()),
                        host_port: Some(port.to_string()),
                    }]),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        };

        let docker_config = DockerContainerConfig {
            image: Some(config.default_image_name.clone()),
            exposed_ports: Some([(format!("{port}/tcp"), std::collections::HashMap::new())].into_iter().collect()),
            host_config: Some(host_config),
            env: Some(vec![format!("RESPOOL_RESOURCE_NAME={name}")]),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.clone(),
                    platform: None,
                }),
                docker_config,
            )
            .await
            .map_err(|e| PoolError::CreationFailure {
                resource_type: Self::TYPE_TAG,
                reason: format!("creating container '{container_name}': {e}"),
            })?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| PoolError::CreationFailure {
                resource_type: Self::TYPE_TAG,
                reason: format!("starting container '{container_name}': {e}"),
            })?;

        Ok(NativeHandle::Container { id: created.id })
    }

    async fn terminate(&self, handle: &mut ResourceHandle) {
        let NativeHandle::Container { id } = &handle.native else {
            return;
        };
        let _ = self
            .docker
            .stop_container(id, Some(bollard::container::StopContainerOptions {
                t: self.shutdown_timeout().as_secs() as i64,
            }))
            .await;
        let _ = self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;
    }

    async fn liveness(&self, handle: &ResourceHandle) -> bool {
        let NativeHandle::Container { id } = &handle.native else {
            return false;
        };
        match self.docker.inspect_container(id, None).await {
            Ok(info) => info
                .state
                .and_then(|s| s.running)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn usage(&self, handle: &ResourceHandle) -> Option<UsageSample> {
        let NativeHandle::Container { id } = &handle.native else {
            return None;
        };
        let mut stream = self.docker.stats(
            id,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );
        let stats: Stats = stream.next().await?.ok()?;
        let cpu_percent = cpu_percent_from_deltas(
            stats.cpu_stats.cpu_usage.total_usage,
            stats.precpu_stats.cpu_usage.total_usage,
            stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            stats.cpu_stats.online_cpus.unwrap_or(1),
        );
        let memory_bytes = stats.memory_stats.usage.unwrap_or(0);
        Some(UsageSample {
            cpu_percent,
            memory_bytes,
            sampled_at: ResourceHandle::now_ms(),
        })
    }
}

/// Derive a CPU percentage from one non-streamed stats sample the way
/// `docker stats` does: delta of container usage over delta of system usage,
/// scaled by the number of online CPUs.
fn cpu_percent_from_deltas(
    cpu_now: u64,
    cpu_prev: u64,
    system_now: u64,
    system_prev: u64,
    online_cpus: u64,
) -> f64 {
    let system_delta = system_now.saturating_sub(system_prev);
    if system_delta == 0 {
        return 0.0;
    }
    let cpu_delta = cpu_now.saturating_sub(cpu_prev);
    let cpus = online_cpus.max(1) as f64;
    (cpu_delta as f64 / system_delta as f64) * cpus * 100.0
}
