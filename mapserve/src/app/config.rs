//! Application configuration.
//!
//! `AppConfig` gathers every component config. It can be built in code or
//! loaded from an INI file:
//!
//! ```ini
//! [maps]
//! dir = /srv/maps
//! index_cache = /var/cache/mapserve/indexes.cache
//! update_dir = /srv/maps/staging
//! update_interval_secs = 900
//! routing_file = /srv/maps/World_routing.obf
//!
//! [pool]
//! max_readers_per_file = 15
//! acquire_timeout_ms = 1000
//!
//! [routing]
//! global_cap = 8
//! checkout_timeout_ms = 6000
//! memory_limit_mb = 6144
//!
//! [routing.profiles]
//! car = 2
//! truck = 1
//!
//! [routing.providers]
//! osrm = type=geometry,url=https://router.example.com/route/v1/driving,profile=car
//! ```
//!
//! Relative paths are resolved against the directory of the INI file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use crate::map_file::default_cache_path;
use crate::online::{ProviderError, ProviderRegistry};
use crate::pool::PoolConfig;
use crate::routing::{ContextCacheConfig, OrchestratorConfig};

/// Default interval of the map update monitor (15 minutes).
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 15 * 60;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("invalid value for [{section}] {key}: {value:?}")]
    Invalid {
        section: String,
        key: String,
        value: String,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Where map files live and how they are kept current.
#[derive(Debug, Clone)]
pub struct MapsConfig {
    /// Directory scanned for `*.obf` files (default: `./maps`).
    pub dir: PathBuf,
    /// Persistent index cache (default: user cache dir).
    pub index_cache: Option<PathBuf>,
    /// Staging directory for compressed updates (default: none).
    pub update_dir: Option<PathBuf>,
    /// Update monitor interval (default: 15 minutes).
    pub update_interval: Duration,
    /// Shared routing file backing cached contexts (default: none).
    pub routing_file: Option<PathBuf>,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("maps"),
            index_cache: default_cache_path(),
            update_dir: None,
            update_interval: Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS),
            routing_file: None,
        }
    }
}

impl MapsConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn with_index_cache(mut self, path: Option<PathBuf>) -> Self {
        self.index_cache = path;
        self
    }

    pub fn with_update_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.update_dir = Some(dir.into());
        self
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn with_routing_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.routing_file = Some(path.into());
        self
    }
}

/// Top-level configuration passed to [`MapServeApp::start`](super::MapServeApp::start).
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub maps: MapsConfig,
    pub pool: PoolConfig,
    pub contexts: ContextCacheConfig,
    pub orchestrator: OrchestratorConfig,
    pub providers: ProviderRegistry,
    /// Directory for rolling log files (default: console only).
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn new(maps: MapsConfig) -> Self {
        Self {
            maps,
            ..Default::default()
        }
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_contexts(mut self, contexts: ContextCacheConfig) -> Self {
        self.contexts = contexts;
        self
    }

    pub fn with_orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    /// Loads an INI file. Missing sections and keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_ini(&ini, base)
    }

    /// Builds a config from parsed INI data, resolving paths against `base`.
    pub fn from_ini(ini: &Ini, base: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let resolve = |p: &str| {
            let p = PathBuf::from(p);
            if p.is_absolute() {
                p
            } else {
                base.join(p)
            }
        };

        if let Some(maps) = ini.section(Some("maps")) {
            let s = Section::new("maps", maps);
            if let Some(dir) = s.str("dir") {
                config.maps.dir = resolve(dir);
            }
            if let Some(cache) = s.str("index_cache") {
                config.maps.index_cache = if cache.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(resolve(cache))
                };
            }
            config.maps.update_dir = s.str("update_dir").map(resolve);
            config.maps.routing_file = s.str("routing_file").map(resolve);
            if let Some(secs) = s.parse::<u64>("update_interval_secs")? {
                config.maps.update_interval = Duration::from_secs(secs);
            }
        }

        if let Some(pool) = ini.section(Some("pool")) {
            let s = Section::new("pool", pool);
            if let Some(max) = s.parse::<usize>("max_readers_per_file")? {
                config.pool.max_readers_per_file = max;
            }
            if let Some(ms) = s.parse::<u64>("acquire_timeout_ms")? {
                config.pool.acquire_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = s.parse::<u64>("poll_interval_ms")? {
                config.pool.poll_interval = Duration::from_millis(ms);
            }
            if let Some(secs) = s.parse::<u64>("idle_sweep_interval_secs")? {
                config.pool.idle_sweep_interval = Duration::from_secs(secs);
            }
        }

        if let Some(routing) = ini.section(Some("routing")) {
            let s = Section::new("routing", routing);
            let contexts = &mut config.contexts;
            if let Some(cap) = s.parse::<usize>("default_cap")? {
                contexts.default_cap = cap;
            }
            if let Some(cap) = s.parse::<usize>("global_cap")? {
                contexts.global_cap = cap;
            }
            if let Some(threshold) = s.parse::<usize>("hint_threshold")? {
                contexts.hint_threshold = threshold;
            }
            if let Some(secs) = s.parse::<u64>("max_lifetime_secs")? {
                contexts.max_lifetime = Duration::from_secs(secs);
            }
            if let Some(ms) = s.parse::<u64>("checkout_timeout_ms")? {
                contexts.checkout_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = s.parse::<u64>("retry_interval_ms")? {
                contexts.retry_interval = Duration::from_millis(ms);
            }
            if let Some(secs) = s.parse::<u64>("sweep_interval_secs")? {
                contexts.sweep_interval = Duration::from_secs(secs);
            }
            if let Some(mb) = s.parse::<u64>("memory_limit_mb")? {
                contexts.memory_limit_bytes = Some(mb * 1024 * 1024);
            }
            if let Some(ms) = s.parse::<u64>("lease_timeout_ms")? {
                config.orchestrator.lease_timeout = Duration::from_millis(ms);
            }
            if let Some(margin) = s.parse::<u32>("bbox_margin")? {
                config.orchestrator.bbox_margin = margin;
            }
            if let Some(enabled) = s.parse::<bool>("use_context_cache")? {
                config.orchestrator.use_context_cache = enabled;
            }
        }

        if let Some(profiles) = ini.section(Some("routing.profiles")) {
            let s = Section::new("routing.profiles", profiles);
            for (profile, _) in profiles.iter() {
                if let Some(cap) = s.parse::<usize>(profile)? {
                    config.contexts.profile_caps.insert(profile.to_string(), cap);
                }
            }
        }

        if let Some(providers) = ini.section(Some("routing.providers")) {
            config.providers = ProviderRegistry::parse_entries(providers.iter())?;
        }

        if let Some(logging) = ini.section(Some("logging")) {
            config.log_dir = Section::new("logging", logging).str("dir").map(resolve);
        }

        Ok(config)
    }
}

/// Typed access to one INI section.
struct Section<'a> {
    name: &'static str,
    props: &'a Properties,
}

impl<'a> Section<'a> {
    fn new(name: &'static str, props: &'a Properties) -> Self {
        Self { name, props }
    }

    /// Non-empty trimmed value.
    fn str(&self, key: &str) -> Option<&'a str> {
        self.props.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.str(key) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| ConfigError::Invalid {
                section: self.name.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }
}
