//! Logging configuration files
//!
//! A configuration is a YAML file such as
//!
//! ```yaml
//! level: "stpipe=debug,info"
//! ```
//!
//! At most one configuration is applied to the process at a time.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Configuration file looked for in the working directory
pub const DEFAULT_FILE: &str = "stpipe-log.yaml";

/// Filter used when no configuration file is found
pub const DEFAULT_LEVEL: &str = "info";

/// Filter used by `--verbose`
pub const MAXIMAL_LEVEL: &str = "debug";

#[derive(Debug, Error)]
pub enum LogConfigError {
    #[error("cannot read logging config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse logging config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid log filter '{directive}': {reason}")]
    Filter { directive: String, reason: String },

    #[error("logging configuration {0} is already applied")]
    AlreadyApplied(String),

    #[error("logging configuration {0} is not the applied one")]
    NotApplied(String),

    #[error("cannot install log subscriber: {0}")]
    Install(String),
}

#[derive(Debug, Deserialize)]
struct LogConfigFile {
    #[serde(default = "default_level")]
    level: String,
}

fn default_level() -> String {
    DEFAULT_LEVEL.to_string()
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of the applied configuration
static APPLIED: Mutex<Option<(u64, String)>> = Mutex::new(None);

type Reloader = Box<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

/// Filter reload hook and the directive to restore on undo
static RELOADER: OnceLock<(String, Reloader)> = OnceLock::new();

pub(crate) fn install_reloader(
    base: String,
    reload: impl Fn(&str) -> Result<(), String> + Send + Sync + 'static,
) {
    if RELOADER.set((base, Box::new(reload))).is_err() {
        debug!("Log filter reloader already installed");
    }
}

fn reload(directive: &str) {
    if let Some((_, reload)) = RELOADER.get() {
        if let Err(err) = reload(directive) {
            debug!("Cannot reload log filter: {}", err);
        }
    }
}

/// A loaded logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    id: u64,
    /// Filter directive in `EnvFilter` syntax
    pub level: String,
    /// Where it was loaded from, if anywhere
    pub source: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LEVEL)
    }
}

impl LogConfig {
    pub fn new(level: &str) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            level: level.to_string(),
            source: None,
        }
    }

    /// The configuration used by `--verbose`
    pub fn maximal() -> Self {
        Self::new(MAXIMAL_LEVEL)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LogConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| LogConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: LogConfigFile = serde_yaml::from_str(&content).map_err(|source| LogConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::new(&file.level);
        config.filter()?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// `stpipe-log.yaml` in the working directory, if present
    pub fn find() -> Option<PathBuf> {
        let candidate = PathBuf::from(DEFAULT_FILE);
        candidate.is_file().then_some(candidate)
    }

    /// The discovered configuration, else the default one
    pub fn discover() -> Result<Self, LogConfigError> {
        match Self::find() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn filter(&self) -> Result<EnvFilter, LogConfigError> {
        EnvFilter::try_new(&self.level).map_err(|e| LogConfigError::Filter {
            directive: self.level.clone(),
            reason: e.to_string(),
        })
    }

    fn describe(&self) -> String {
        match &self.source {
            Some(path) => path.display().to_string(),
            None => format!("'{}'", self.level),
        }
    }

    /// Whether any configuration is applied
    pub fn any_applied() -> bool {
        APPLIED.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn is_applied(&self) -> bool {
        APPLIED
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|(id, _)| *id == self.id)
    }

    /// Apply to the whole process. Fails if another configuration is applied.
    pub fn apply(&self) -> Result<(), LogConfigError> {
        let mut applied = APPLIED.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, other)) = applied.as_ref() {
            return Err(LogConfigError::AlreadyApplied(other.clone()));
        }
        *applied = Some((self.id, self.describe()));
        drop(applied);
        reload(&self.level);
        Ok(())
    }

    /// Restore the base filter. Fails unless this configuration is the applied one.
    pub fn undo(&self) -> Result<(), LogConfigError> {
        let mut applied = APPLIED.lock().unwrap_or_else(PoisonError::into_inner);
        match applied.as_ref() {
            Some((id, _)) if *id == self.id => {
                *applied = None;
                drop(applied);
                if let Some((base, _)) = RELOADER.get() {
                    reload(base);
                }
                Ok(())
            }
            _ => Err(LogConfigError::NotApplied(self.describe())),
        }
    }

    /// Undo whatever configuration is applied
    pub fn undo_applied() {
        let taken = APPLIED.lock().unwrap_or_else(PoisonError::into_inner).take();
        if taken.is_some() {
            if let Some((base, _)) = RELOADER.get() {
                reload(base);
            }
        }
    }

    /// Apply for the lifetime of the returned guard, unless something is already applied
    pub fn context(self) -> LogConfigGuard {
        let applied = self.apply().is_ok();
        LogConfigGuard {
            config: Some(self),
            applied,
        }
    }
}

/// Scope of an applied [`LogConfig`]
#[must_use]
pub struct LogConfigGuard {
    config: Option<LogConfig>,
    applied: bool,
}

impl LogConfigGuard {
    /// A guard that applied nothing
    pub fn none() -> Self {
        Self {
            config: None,
            applied: false,
        }
    }

    pub fn applied(&self) -> bool {
        self.applied
    }

    /// Swap in another configuration for the rest of the scope.
    /// A configuration applied outside this guard stays in place.
    pub fn replace(&mut self, config: LogConfig) -> Result<(), LogConfigError> {
        if let Some(current) = self.config.take() {
            if self.applied {
                current.undo()?;
            }
        }
        self.applied = match config.apply() {
            Ok(()) => true,
            Err(LogConfigError::AlreadyApplied(outer)) => {
                debug!("Keeping logging configuration {} instead of {}", outer, config.describe());
                false
            }
            Err(err) => return Err(err),
        };
        self.config = Some(config);
        Ok(())
    }
}

impl Drop for LogConfigGuard {
    fn drop(&mut self) {
        if let Some(config) = self.config.take() {
            if self.applied && config.is_applied() {
                let _ = config.undo();
            }
        }
    }
}
