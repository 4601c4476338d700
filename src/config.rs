//! Pool and adapter configuration, and its file-based loader.

use std::path::Path;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

/// Engine-level tuning knobs, common to every adapter kind.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Upper bound on pool size.
    pub max_pool_size: usize,
    /// Pre-warm target; clamped to `max_pool_size` if configured larger.
    pub min_pool_size: usize,
    /// Idle-eviction period and threshold.
    pub pool_check_interval: Duration,
    /// Period between resource-monitoring usage samples.
    pub monitor_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 3,
            min_pool_size: 0,
            pool_check_interval: Duration::from_secs(10),
            monitor_interval: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Clamp `min_pool_size` to `max_pool_size`, per the spec's boundary case.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.min_pool_size > self.max_pool_size {
            self.min_pool_size = self.max_pool_size;
        }
        self
    }
}

/// Script-bundle inputs shared by the Worker, Process, Container, and Pod adapters.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ScriptBundle {
    /// Directory the script files are resolved relative to.
    pub script_dir_path: Option<String>,
    /// Script file names within `script_dir_path`.
    pub script_files: Vec<String>,
}

impl ScriptBundle {
    /// Check the precondition every Worker/Process/Container/Pod creation
    /// requires: a script directory and at least one script file.
    pub fn check(&self) -> PoolResult<()> {
        let Some(dir) = &self.script_dir_path else {
            return Err(PoolError::BadConfig(
                "script_dir_path is required".to_string(),
            ));
        };
        if self.script_files.is_empty() {
            return Err(PoolError::BadConfig(
                "script_files must contain at least one entry".to_string(),
            ));
        }
        if !Path::new(dir).is_dir() {
            return Err(PoolError::BadConfig(format!(
                "script_dir_path '{dir}' is not a readable directory"
            )));
        }
        Ok(())
    }
}

/// Worker-adapter-specific configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WorkerConfig {
    /// Script bundle the worker task runs.
    pub scripts: ScriptBundle,
    /// Creation deadline.
    pub creation_timeout: Duration,
    /// Graceful-stop deadline before the task is aborted.
    pub shutdown_timeout: Duration,
    /// Advisory old-generation heap ceiling, in MB (not kernel-enforced; see Design Notes).
    pub old_gen_mb: u64,
    /// Advisory young-generation heap ceiling, in MB.
    pub young_gen_mb: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scripts: ScriptBundle::default(),
            creation_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            old_gen_mb: 100,
            young_gen_mb: 50,
        }
    }
}

/// Process-adapter-specific configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ProcessConfig {
    /// Script bundle the child process runs.
    pub scripts: ScriptBundle,
    /// Interpreter binary to spawn (e.g. `"node"`, `"python3"`).
    pub interpreter: String,
    /// Creation deadline.
    pub creation_timeout: Duration,
    /// Graceful-stop deadline before `SIGKILL`.
    pub shutdown_timeout: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            scripts: ScriptBundle::default(),
            interpreter: "node".to_string(),
            creation_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Container-adapter-specific configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ContainerConfig {
    /// Script bundle bind-mounted into the container.
    pub scripts: ScriptBundle,
    /// Image to create the container from.
    pub default_image_name: String,
    /// Name prefix for created containers.
    pub default_container_name: String,
    /// Creation deadline.
    pub creation_timeout: Duration,
    /// Graceful-stop deadline before force-remove.
    pub shutdown_timeout: Duration,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            scripts: ScriptBundle::default(),
            default_image_name: "node:20-alpine".to_string(),
            default_container_name: "serverless-worker".to_string(),
            creation_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Pod-adapter-specific configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PodConfig {
    /// Script bundle installed into the pod via a ConfigMap.
    pub scripts: ScriptBundle,
    /// Cluster namespace to target.
    pub namespace: String,
    /// Image the pod's single container runs.
    pub default_image_name: String,
    /// Name prefix for created pods.
    pub default_pod_name: String,
    /// In-pod port the entrypoint listens on.
    pub default_pod_port: u16,
    /// Creation deadline (pod scheduling + readiness poll budget).
    pub creation_timeout: Duration,
    /// Graceful-delete deadline before force-delete.
    pub shutdown_timeout: Duration,
}

impl Default for PodConfig {
    fn default() -> Self {
        Self {
            scripts: ScriptBundle::default(),
            namespace: "default".to_string(),
            default_image_name: "node:20-alpine".to_string(),
            default_pod_name: "serverless-worker".to_string(),
            default_pod_port: 9000,
            creation_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(15),
        }
    }
}

/// Parse a configuration file, dispatching on its extension.
///
/// `.json` files are parsed as a flat JSON object; `.yaml`/`.yml` files as an
/// indented YAML document. Both map into the same `T: Deserialize`. Any
/// other extension fails `BadConfig`.
#[cfg(feature = "serde")]
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> PoolResult<T> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| PoolError::BadConfig(format!("reading {}: {e}", path.display())))?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents)
            .map_err(|e| PoolError::BadConfig(format!("parsing {} as JSON: {e}", path.display()))),
        Some("yaml" | "yml") => serde_yaml::from_str(&contents)
            .map_err(|e| PoolError::BadConfig(format!("parsing {} as YAML: {e}", path.display()))),
        other => Err(PoolError::BadConfig(format!(
            "unrecognized config extension {other:?} for {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults_match_spec() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.max_pool_size, 3);
        assert_eq!(cfg.min_pool_size, 0);
        assert_eq!(cfg.pool_check_interval, Duration::from_secs(10));
    }

    #[test]
    fn min_pool_size_clamps_to_max() {
        let cfg = PoolConfig {
            max_pool_size: 2,
            min_pool_size: 10,
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.min_pool_size, 2);
    }

    #[test]
    fn script_bundle_requires_dir_and_files() {
        let bundle = ScriptBundle::default();
        assert!(bundle.check().is_err());

        let bundle = ScriptBundle {
            script_dir_path: Some(".".to_string()),
            script_files: vec![],
        };
        assert!(bundle.check().is_err());

        let bundle = ScriptBundle {
            script_dir_path: Some(".".to_string()),
            script_files: vec!["index.js".to_string()],
        };
        assert!(bundle.check().is_ok());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn load_config_rejects_unknown_extension() {
        let dir = std::env::temp_dir().join("respool-test-config.txt");
        std::fs::write(&dir, "max_pool_size: 3").unwrap();
        let result: PoolResult<PoolConfig> = load_config(&dir);
        let _ = std::fs::remove_file(&dir);
        assert!(matches!(result, Err(PoolError::BadConfig(_))));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn load_config_parses_json() {
        let dir = std::env::temp_dir().join("respool-test-config.json");
        std::fs::write(&dir, r#"{"max_pool_size": 7, "min_pool_size": 1}"#).unwrap();
        let cfg: PoolConfig = load_config(&dir).unwrap();
        let _ = std::fs::remove_file(&dir);
        assert_eq!(cfg.max_pool_size, 7);
        assert_eq!(cfg.min_pool_size, 1);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn load_config_parses_yaml() {
        let dir = std::env::temp_dir().join("respool-test-config.yaml");
        std::fs::write(&dir, "max_pool_size: 5\nmin_pool_size: 2\n").unwrap();
        let cfg: PoolConfig = load_config(&dir).unwrap();
        let _ = std::fs::remove_file(&dir);
        assert_eq!(cfg.max_pool_size, 5);
        assert_eq!(cfg.min_pool_size, 2);
    }
}
