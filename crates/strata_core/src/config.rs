//! # Allocator Configuration
//!
//! Pool layout and backend selection, loadable from TOML and overridable
//! through the environment:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `STRATA_ALLOCATOR` | `slot` (alias `intrusive`, `new`) or `segment` (alias `original`, `block`) |
//! | `STRATA_ALLOCATOR_CONFIG` | Path of a TOML file loaded before the backend override |
//!
//! ```toml
//! backend = "slot"
//! default_block_size = 1048576
//!
//! [[pools]]
//! affinity = 1
//! name = "data"
//! block_size = 16777216
//! alignment = 16
//! backend = "segment"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::affinity::Affinity;
use crate::error::{AllocError, AllocResult};
use crate::memory::BackendKind;

/// Environment variable selecting the backend.
pub const ENV_BACKEND: &str = "STRATA_ALLOCATOR";

/// Environment variable naming a TOML configuration file.
pub const ENV_CONFIG: &str = "STRATA_ALLOCATOR_CONFIG";

/// Default size of new blocks (1 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Default payload alignment in bytes.
pub const DEFAULT_ALIGNMENT: usize = 4;

/// Settings of one pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Affinity served by the pool.
    pub affinity: Affinity,
    /// Name used in reports.
    #[serde(default)]
    pub name: String,
    /// Size of newly created blocks in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Payload alignment in bytes (power of two).
    #[serde(default = "default_alignment")]
    pub alignment: usize,
    /// Backend override; `None` uses the allocator's backend.
    #[serde(default)]
    pub backend: Option<BackendKind>,
}

impl PoolConfig {
    /// Creates a pool configuration with the default block size and alignment.
    #[must_use]
    pub fn new(affinity: Affinity) -> Self {
        Self {
            affinity,
            name: affinity.pool_name(),
            block_size: DEFAULT_BLOCK_SIZE,
            alignment: DEFAULT_ALIGNMENT,
            backend: None,
        }
    }

    /// Sets the block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the alignment.
    #[must_use]
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Sets the backend override.
    #[must_use]
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Checks block size and alignment.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> AllocResult<()> {
        validate_alignment(self.alignment)?;
        if self.block_size == 0 {
            return Err(AllocError::InvalidConfig(format!(
                "pool '{}' has a zero block size",
                self.display_name()
            )));
        }
        Ok(())
    }

    /// Name used in reports, falling back to the affinity's pool name.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.affinity.pool_name()
        } else {
            self.name.clone()
        }
    }
}

/// Settings of an allocator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Backend of pools without an override.
    pub backend: BackendKind,
    /// Block size of lazily created pools.
    pub default_block_size: usize,
    /// Alignment of lazily created pools.
    pub default_alignment: usize,
    /// Explicitly configured pools.
    pub pools: Vec<PoolConfig>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            default_block_size: DEFAULT_BLOCK_SIZE,
            default_alignment: DEFAULT_ALIGNMENT,
            pools: vec![
                PoolConfig::new(Affinity::OBJECTS),
                PoolConfig::new(Affinity::DATA).with_block_size(16 * DEFAULT_BLOCK_SIZE),
                PoolConfig::new(Affinity::NODES),
                PoolConfig::new(Affinity::PHYSICS).with_alignment(16),
            ],
        }
    }
}

impl AllocatorConfig {
    /// Default configuration with a different backend.
    #[must_use]
    pub fn with_backend(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// [`AllocError::Config`] on syntax errors, [`AllocError::InvalidConfig`]
    /// on invalid values.
    pub fn from_toml(text: &str) -> AllocResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| AllocError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// [`AllocError::Io`] if the file cannot be read, otherwise as
    /// [`AllocatorConfig::from_toml`].
    pub fn from_file(path: impl AsRef<Path>) -> AllocResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AllocError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Builds the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`AllocatorConfig::from_vars`].
    pub fn from_env() -> AllocResult<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from a variable lookup: the file named by
    /// [`ENV_CONFIG`] (or the defaults), then the [`ENV_BACKEND`] override.
    ///
    /// # Errors
    ///
    /// Configuration file errors, or an unknown backend name.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> AllocResult<Self> {
        let mut config = match lookup(ENV_CONFIG).filter(|path| !path.trim().is_empty()) {
            Some(path) => Self::from_file(path.trim())?,
            None => Self::default(),
        };
        if let Some(backend) = lookup(ENV_BACKEND).filter(|name| !name.trim().is_empty()) {
            config.backend = backend.parse()?;
        }
        Ok(config)
    }

    /// Checks every value.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidConfig`] for bad alignments, zero block sizes or
    /// an affinity configured twice.
    pub fn validate(&self) -> AllocResult<()> {
        validate_alignment(self.default_alignment)?;
        if self.default_block_size == 0 {
            return Err(AllocError::InvalidConfig("default block size is zero".into()));
        }
        for (i, pool) in self.pools.iter().enumerate() {
            pool.validate()?;
            if self.pools[..i].iter().any(|other| other.affinity == pool.affinity) {
                return Err(AllocError::InvalidConfig(format!(
                    "{} is configured more than once",
                    pool.affinity
                )));
            }
        }
        Ok(())
    }

    /// Settings for `affinity`: the configured pool, or the defaults.
    #[must_use]
    pub fn pool(&self, affinity: Affinity) -> PoolConfig {
        self.pools
            .iter()
            .find(|pool| pool.affinity == affinity)
            .cloned()
            .unwrap_or_else(|| {
                PoolConfig::new(affinity)
                    .with_block_size(self.default_block_size)
                    .with_alignment(self.default_alignment)
            })
    }
}

/// Checks that an alignment is a power of two.
///
/// # Errors
///
/// [`AllocError::InvalidConfig`] otherwise.
pub fn validate_alignment(alignment: usize) -> AllocResult<()> {
    if alignment.is_power_of_two() {
        Ok(())
    } else {
        Err(AllocError::InvalidConfig(format!(
            "alignment {alignment} is not a power of two"
        )))
    }
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_alignment() -> usize {
    DEFAULT_ALIGNMENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = AllocatorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.backend, BackendKind::Slot);
        assert_eq!(config.pool(Affinity::DATA).block_size, 16 * 1024 * 1024);
        assert_eq!(config.pool(Affinity::PHYSICS).alignment, 16);
        assert_eq!(config.pool(Affinity(7)).name, "affinity_7");
    }

    #[test]
    fn test_from_toml() {
        let config = AllocatorConfig::from_toml(
            r#"
            backend = "intrusive"
            default_alignment = 8

            [[pools]]
            affinity = 5
            name = "meshes"
            block_size = 65536
            backend = "segment"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Slot);
        assert_eq!(config.default_block_size, DEFAULT_BLOCK_SIZE);
        let pool = config.pool(Affinity(5));
        assert_eq!(pool.name, "meshes");
        assert_eq!(pool.alignment, DEFAULT_ALIGNMENT);
        assert_eq!(pool.backend, Some(BackendKind::Segment));
        assert_eq!(config.pool(Affinity(6)).alignment, 8);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            AllocatorConfig::from_toml("default_alignment = 12"),
            Err(AllocError::InvalidConfig(_))
        ));
        assert!(matches!(
            AllocatorConfig::from_toml("backend = \"buddy\""),
            Err(AllocError::Config(_))
        ));
        assert!(matches!(
            AllocatorConfig::from_toml("[[pools]]\naffinity = 1\n[[pools]]\naffinity = 1\n"),
            Err(AllocError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_environment_override() {
        let config = AllocatorConfig::from_vars(|key| (key == ENV_BACKEND).then(|| "original".to_string())).unwrap();
        assert_eq!(config.backend, BackendKind::Segment);

        let config = AllocatorConfig::from_vars(|_| None).unwrap();
        assert_eq!(config, AllocatorConfig::default());

        assert!(AllocatorConfig::from_vars(|key| (key == ENV_BACKEND).then(|| "buddy".to_string())).is_err());
        assert!(matches!(
            AllocatorConfig::from_vars(|key| (key == ENV_CONFIG).then(|| "/nonexistent/strata.toml".to_string())),
            Err(AllocError::Io(_))
        ));
    }
}
