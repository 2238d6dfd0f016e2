//! The explicit context object components depend on, replacing the
//! original agent's process-wide globals (`exe_directory`, the logger, the
//! restart-marker filename) with a value passed by reference.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::AgentConfig;

/// Shared, read-only state handed by reference to every component that
/// needs to resolve a module path, apply a timeout, or locate the restart
/// marker.
#[derive(Debug, Clone)]
pub struct AgentContext {
    root_dir: PathBuf,
    command_timeout: Duration,
}

impl AgentContext {
    /// Builds a context from an [`AgentConfig`].
    pub fn new(config: &AgentConfig) -> Self {
        AgentContext {
            root_dir: config.root_dir.clone(),
            command_timeout: config.command_timeout,
        }
    }

    /// The directory modules are resolved relative to, and where the
    /// restart marker file lives.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// The wall-clock deadline applied to each subprocess.
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }
}
