use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{EngineSettings, SearchType};
use crate::errors::{SearchError, SearchResult};
use crate::search::{ExecutionMode, PoolOptions};

/// Configuration of a search run.
///
/// # Configuration Locations
///
/// Files are merged in order of increasing precedence:
/// 1. Global `$CONFIG_DIR/ccsearch/config.yaml`
/// 2. Local `.ccsearch.yaml` in the current directory
/// 3. Custom config file given with `--config`
///
/// Command-line flags override all of them through [`RunConfig::merge_with_cli`].
///
/// # Configuration Format
///
/// ```yaml
/// result_path: "results"
/// engine_home: "/data/catalog"
/// num_workers: 8
/// chunk_size: 10
/// mode: isolated          # or in_process
/// chunk_timeout_secs: 60
/// log_level: "info"
/// engine:
///   search_type: substructure
///   similarity_threshold: 0.95
///   max_r_factor_percent: 10.0
///   max_hits: 50
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Directory receiving per-job results, chunk work directories and `STOP`
    #[serde(default = "default_result_path")]
    pub result_path: PathBuf,

    /// Home directory of the search engine's reference data
    #[serde(default)]
    pub engine_home: PathBuf,

    /// Chunks run at the same time. Defaults to the number of CPU cores;
    /// in-process runs always use one.
    #[serde(default = "default_num_workers")]
    pub num_workers: NonZeroUsize,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: NonZeroUsize,

    #[serde(default)]
    pub mode: ExecutionMode,

    /// Wall-clock limit for one isolated chunk
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,

    /// Isolated search command. Defaults to this executable's `exec` subcommand.
    #[serde(default)]
    pub exec_program: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub engine: EngineSettings,

    /// Explicit config file this configuration was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

fn default_result_path() -> PathBuf {
    PathBuf::from("results")
}

fn default_num_workers() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

fn default_chunk_size() -> NonZeroUsize {
    NonZeroUsize::new(10).unwrap_or(NonZeroUsize::MIN)
}

fn default_chunk_timeout_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            result_path: default_result_path(),
            engine_home: PathBuf::new(),
            num_workers: default_num_workers(),
            chunk_size: default_chunk_size(),
            mode: ExecutionMode::default(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            exec_program: None,
            log_level: default_log_level(),
            engine: EngineSettings::default(),
            source: None,
        }
    }
}

/// Values given on the command line; `None` keeps the file value
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub result_path: Option<PathBuf>,
    pub search_type: Option<SearchType>,
    pub engine_home: Option<PathBuf>,
    pub num_workers: Option<NonZeroUsize>,
    pub chunk_size: Option<NonZeroUsize>,
    pub mode: Option<ExecutionMode>,
    pub chunk_timeout_secs: Option<u64>,
    pub exec_program: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl RunConfig {
    /// Loads configuration from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration, adding `config_path` as the highest-precedence
    /// file. Unlike the default locations it must exist.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let defaults = [
            dirs::config_dir().map(|p| p.join("ccsearch").join("config.yaml")),
            Some(PathBuf::from(".ccsearch.yaml")),
        ];
        for path in defaults.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.source = config_path.map(Path::to_path_buf);
        Ok(config)
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli: RunOverrides) -> Self {
        if let Some(result_path) = cli.result_path {
            self.result_path = result_path;
        }
        if let Some(search_type) = cli.search_type {
            self.engine.search_type = search_type;
        }
        if let Some(engine_home) = cli.engine_home {
            self.engine_home = engine_home;
        }
        if let Some(num_workers) = cli.num_workers {
            self.num_workers = num_workers;
        }
        if let Some(chunk_size) = cli.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(mode) = cli.mode {
            self.mode = mode;
        }
        if let Some(secs) = cli.chunk_timeout_secs {
            self.chunk_timeout_secs = secs;
        }
        if cli.exec_program.is_some() {
            self.exec_program = cli.exec_program;
        }
        if let Some(log_level) = cli.log_level {
            self.log_level = log_level;
        }
        self
    }

    /// Checks everything a run needs before any worker launches.
    pub fn validate(&self) -> SearchResult<()> {
        if self.engine_home.as_os_str().is_empty() {
            return Err(SearchError::config_error("engine_home is not set"));
        }
        if self.result_path.as_os_str().is_empty() {
            return Err(SearchError::config_error("result_path is not set"));
        }
        if self.chunk_timeout_secs == 0 {
            return Err(SearchError::config_error(
                "chunk_timeout_secs must be at least 1",
            ));
        }
        self.engine.validate()
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn pool_options(&self, show_progress: bool) -> PoolOptions {
        PoolOptions {
            num_workers: self.num_workers,
            chunk_size: self.chunk_size,
            show_progress,
        }
    }
}
