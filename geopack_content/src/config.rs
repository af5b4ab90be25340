use std::{
    fs,
    path::{Component, Path, PathBuf},
    time::Duration,
};

use geopack_shared::log::info;
use serde::{Deserialize, Serialize};

use crate::{
    lod_replicator::DEFAULT_LOD_COPIES,
    process_runner::{ProcessRunner, UPDATE_CONTENT_FLAG},
    resource_monitor::Thresholds,
    Error, Result,
};

/// Name of the configuration file that is picked up from the base directory.
pub const CONFIG_FILE_NAME: &str = "geopack.yaml";

const PACKER_EXECUTABLE: &str = if cfg!(windows) { "geometrypack.exe" } else { "geometrypack" };

/// Settings of a pipeline run. Built once at startup and passed to every step.
///
/// All relative paths are resolved against the base directory. Every field can be overridden in
/// a YAML file; missing fields keep their defaults:
///
/// ```yaml
/// source_dir: Camoulages
/// lod_copies: 2
/// timeout_secs: 600
/// thresholds:
///   cpu_percent: 95
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(skip)]
    base_dir: PathBuf,
    /// Source tree. The visual files in it are modified in place.
    pub source_dir: PathBuf,
    /// Name of the directory inside the source tree that receives the LOD variants.
    pub lod_dir_name: String,
    /// Output of the old packer and input of the new one.
    pub temp_dir: PathBuf,
    /// Final output.
    pub output_dir: PathBuf,
    pub old_packer: PathBuf,
    pub new_packer: PathBuf,
    /// Flags for the new packer so that it updates the output of the old one.
    pub update_flags: Vec<String>,
    pub lod_copies: u32,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub sample_interval_ms: u64,
    pub thresholds: Thresholds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            source_dir: PathBuf::from("Camoulages"),
            lod_dir_name: "lods".to_owned(),
            temp_dir: PathBuf::from("Camoulages_GEO"),
            output_dir: PathBuf::from("Camoulages_Upgrade"),
            old_packer: Path::new("old_pri-to-geo").join(PACKER_EXECUTABLE),
            new_packer: Path::new("new_pri-to-geo").join(PACKER_EXECUTABLE),
            update_flags: vec![UPDATE_CONTENT_FLAG.to_owned()],
            lod_copies: DEFAULT_LOD_COPIES,
            timeout_secs: 300,
            poll_interval_ms: 500,
            sample_interval_ms: 1000,
            thresholds: Thresholds::default(),
        }
    }
}

impl PipelineConfig {
    /// Default configuration for the given base directory.
    pub fn for_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Loads the configuration for `base_dir`.
    ///
    /// The file `config_file` is used when given. Otherwise `geopack.yaml` in the base directory
    /// is used if it exists, and the defaults if it doesn't.
    pub fn load(base_dir: impl Into<PathBuf>, config_file: Option<&Path>) -> Result<Self> {
        let base_dir = base_dir.into();
        let config_file = match config_file {
            Some(config_file) => Some(config_file.to_owned()),
            None => Some(base_dir.join(CONFIG_FILE_NAME)).filter(|path| path.is_file()),
        };
        let Some(config_file) = config_file else {
            info!("No configuration file found in '{}', using defaults", base_dir.display());
            return Ok(Self::for_base_dir(base_dir));
        };

        info!("Reading configuration from '{}'", config_file.display());
        let content = fs::read_to_string(&config_file).map_err(|err| Error::InvalidConfiguration {
            path: config_file.clone(),
            message: err.to_string(),
        })?;
        Self::from_yaml(base_dir, &content).map_err(|err| match err {
            Error::InvalidConfiguration { message, .. } => Error::InvalidConfiguration {
                path: config_file.clone(),
                message,
            },
            other => other,
        })
    }

    /// Parses the configuration from YAML. Fields that are missing keep their defaults.
    pub fn from_yaml(base_dir: impl Into<PathBuf>, yaml: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(yaml).map_err(|err| Error::InvalidConfiguration {
            path: PathBuf::new(),
            message: err.to_string(),
        })?;
        config.base_dir = base_dir.into();
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        let mut components = Path::new(&self.lod_dir_name).components();
        let is_single_name = matches!((components.next(), components.next()), (Some(Component::Normal(_)), None));
        if !is_single_name {
            return Err(Error::InvalidConfiguration {
                path: PathBuf::new(),
                message: format!("lod_dir_name must be a plain directory name but is '{}'", self.lod_dir_name),
            });
        }
        if self.poll_interval_ms == 0 || self.sample_interval_ms == 0 {
            return Err(Error::InvalidConfiguration {
                path: PathBuf::new(),
                message: "poll_interval_ms and sample_interval_ms must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn source_path(&self) -> PathBuf {
        self.base_dir.join(&self.source_dir)
    }

    /// Directory of the LOD variants inside the source tree.
    pub fn lod_path(&self) -> PathBuf {
        self.source_path().join(&self.lod_dir_name)
    }

    pub fn temp_path(&self) -> PathBuf {
        self.base_dir.join(&self.temp_dir)
    }

    pub fn output_path(&self) -> PathBuf {
        self.base_dir.join(&self.output_dir)
    }

    pub fn old_packer_path(&self) -> PathBuf {
        self.base_dir.join(&self.old_packer)
    }

    pub fn new_packer_path(&self) -> PathBuf {
        self.base_dir.join(&self.new_packer)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// [`ProcessRunner`] with the timeouts and thresholds of this configuration.
    pub fn process_runner(&self) -> ProcessRunner {
        ProcessRunner::new(
            self.timeout(),
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_millis(self.sample_interval_ms),
            self.thresholds,
        )
    }
}
