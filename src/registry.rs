//! The module registry: mapping a command alias to an executable and policy
//! flags.
//!
//! Statically lists the three core aliases (`restart`, `modulemng`,
//! `osinfo`) and returns an "invalid" (empty `full_path`) module for
//! anything else.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

/// Where a [`Module`]'s executable lives, relative to `root_dir`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// A built-in facility bundled with the agent itself (e.g. `restart`).
    Internals,
    /// An optional plugin shipped alongside the agent (e.g. `osinfo`).
    Plugins,
    /// A module installed by the user/operator, outside the agent's own
    /// directory tree.
    UserModules,
}

impl ModuleKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Internals => "Internals",
            Self::Plugins => "Plugins",
            Self::UserModules => "UserModules",
        }
    }
}

/// A resolved registry entry: an executable path plus the policy flags that
/// govern how the watcher invokes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    kind: ModuleKind,
    full_path: String,
    version: String,
    upgradeable: bool,
    blocking: bool,
    alias: String,
}

impl Module {
    /// Builds an "invalid" module: the placeholder returned for unknown
    /// aliases. `full_path` is empty, which is exactly what [`Module::is_valid`]
    /// checks.
    pub fn invalid(alias: impl Into<String>) -> Self {
        Module {
            kind: ModuleKind::Internals,
            full_path: String::new(),
            version: String::new(),
            upgradeable: false,
            blocking: false,
            alias: alias.into(),
        }
    }

    fn new(
        kind: ModuleKind,
        full_path: impl Into<String>,
        version: impl Into<String>,
        upgradeable: bool,
        blocking: bool,
        alias: impl Into<String>,
    ) -> Self {
        Module {
            kind,
            full_path: full_path.into(),
            version: version.into(),
            upgradeable,
            blocking,
            alias: alias.into(),
        }
    }

    /// A module is valid iff it resolved to a non-empty executable path.
    pub fn is_valid(&self) -> bool {
        !self.full_path.is_empty()
    }

    /// The absolute path to the module's executable.
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// The module's declared version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether the host may request a software update of this module.
    pub fn is_upgradeable(&self) -> bool {
        self.upgradeable
    }

    /// Whether this module's execution must serialize against every other
    /// pending command.
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// The alias this module was resolved from.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// The module's kind.
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Looks up `alias` against the static registry, resolving its path
    /// under `root_dir`. Unknown aliases return [`Module::invalid`].
    pub fn lookup(alias: &str, root_dir: &Path) -> Self {
        match REGISTRY.get(alias) {
            Some(entry) => entry.resolve(alias, root_dir),
            None => Module::invalid(alias),
        }
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] ({})",
            self.alias,
            self.kind.as_str(),
            if self.is_valid() {
                self.full_path.as_str()
            } else {
                "invalid"
            }
        )
    }
}

/// A registry entry before it has been resolved against a `root_dir`: the
/// path is stored as a suffix appended to `root_dir`, matching the
/// original's `tools::getRootDirectory() + "/" + suffix` construction.
struct RegistryEntry {
    kind: ModuleKind,
    path_suffix: &'static str,
    version: &'static str,
    upgradeable: bool,
    blocking: bool,
}

impl RegistryEntry {
    fn resolve(&self, alias: &str, root_dir: &Path) -> Module {
        let full_path = root_dir.join(self.path_suffix);
        Module::new(
            self.kind,
            full_path.to_string_lossy().into_owned(),
            self.version,
            self.upgradeable,
            self.blocking,
            alias,
        )
    }
}

static REGISTRY: Lazy<std::collections::HashMap<&'static str, RegistryEntry>> = Lazy::new(|| {
    let mut m = std::collections::HashMap::new();
    m.insert(
        "restart",
        RegistryEntry {
            kind: ModuleKind::Internals,
            path_suffix: "internals/restart",
            version: "1.0",
            upgradeable: false,
            blocking: true,
        },
    );
    m.insert(
        "modulemng",
        RegistryEntry {
            kind: ModuleKind::Internals,
            path_suffix: "internal/modulemng",
            version: "1.0",
            upgradeable: false,
            blocking: false,
        },
    );
    m.insert(
        "osinfo",
        RegistryEntry {
            kind: ModuleKind::Plugins,
            path_suffix: "plugins/osinfo",
            version: "1.0",
            upgradeable: true,
            blocking: false,
        },
    );
    m
});
