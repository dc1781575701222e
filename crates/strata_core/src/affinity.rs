//! # Affinity
//!
//! Category tags that keep allocations of similar lifetime and access
//! pattern in the same pool.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Allocation category. The set is open: unknown affinities get a pool
/// with the default settings on first use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Affinity(pub u32);

impl Affinity {
    /// Scene-graph objects.
    pub const OBJECTS: Self = Self(0);
    /// Bulk data arrays.
    pub const DATA: Self = Self(1);
    /// Scene-graph nodes.
    pub const NODES: Self = Self(2);
    /// Physics state.
    pub const PHYSICS: Self = Self(3);

    /// Number of well-known affinities.
    pub const BUILTIN_COUNT: usize = 4;

    /// Returns the affinity as an index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Name of a well-known affinity, `None` for others.
    #[must_use]
    pub const fn builtin_name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("objects"),
            1 => Some("data"),
            2 => Some("nodes"),
            3 => Some("physics"),
            _ => None,
        }
    }

    /// Pool name: the well-known name, or `affinity_<n>`.
    #[must_use]
    pub fn pool_name(self) -> String {
        self.builtin_name()
            .map_or_else(|| format!("affinity_{}", self.0), str::to_owned)
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.builtin_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "affinity {}", self.0),
        }
    }
}

impl From<u32> for Affinity {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_names() {
        assert_eq!(Affinity::PHYSICS.pool_name(), "physics");
        assert_eq!(Affinity(9).pool_name(), "affinity_9");
        assert_eq!(Affinity::DATA.to_string(), "data");
    }
}
