//! Resource vectors: milli-CPU, memory bytes and named scalars.
//!
//! Scalars are held in milli-units as `f64`, matching how extended resources
//! are reported on nodes. Comparisons come in two flavours: the tolerant
//! [`Resource::less_equal`] absorbs up to [`MIN_MILLI_SCALAR`] of floating
//! noise per scalar, while the `_strict` variants compare exactly.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{Quantity, ResourceError};

/// Resource list as found on nodes and role requests.
pub type ResourceList = BTreeMap<String, Quantity>;

/// Resource name for CPU.
pub const CPU: &str = "cpu";

/// Resource name for memory.
pub const MEMORY: &str = "memory";

/// Scalar values at or below this many milli-units are treated as noise.
pub const MIN_MILLI_SCALAR: f64 = 10.0;

/// A resource vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub cpu_milli: i64,
    pub memory_bytes: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scalars: BTreeMap<String, f64>,
}

impl Resource {
    /// Empty resource.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new(cpu_milli: i64, memory_bytes: i64) -> Self {
        Self {
            cpu_milli,
            memory_bytes,
            scalars: BTreeMap::new(),
        }
    }

    /// Builder-style scalar setter.
    #[must_use]
    pub fn with_scalar(mut self, name: impl Into<String>, milli: f64) -> Self {
        self.scalars.insert(name.into(), milli);
        self
    }

    /// Builds a resource from a resource list.
    ///
    /// `cpu` maps to milli-CPU, `memory` to bytes, anything else to a
    /// milli-valued scalar.
    #[must_use]
    pub fn from_list(list: &ResourceList) -> Self {
        let mut r = Self::empty();
        for (name, quantity) in list {
            match name.as_str() {
                CPU => r.cpu_milli += quantity.millis(),
                MEMORY => r.memory_bytes += quantity.value(),
                _ => *r.scalars.entry(name.clone()).or_insert(0.0) += quantity.millis() as f64,
            }
        }
        r
    }

    /// Converts back into a resource list. Zero components are omitted.
    #[must_use]
    pub fn to_list(&self) -> ResourceList {
        let mut list = ResourceList::new();
        if self.cpu_milli != 0 {
            list.insert(CPU.to_string(), Quantity::from_millis(self.cpu_milli));
        }
        if self.memory_bytes != 0 {
            list.insert(MEMORY.to_string(), Quantity::from_value(self.memory_bytes));
        }
        for (name, milli) in &self.scalars {
            let milli = milli.round() as i64;
            if milli != 0 {
                list.insert(name.clone(), Quantity::from_millis(milli));
            }
        }
        list
    }

    /// Scalar value in milli-units; missing scalars read as zero.
    #[must_use]
    pub fn scalar(&self, name: &str) -> f64 {
        self.scalars.get(name).copied().unwrap_or(0.0)
    }

    /// Returns true if no component is above noise level.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cpu_milli == 0
            && self.memory_bytes == 0
            && self.scalars.values().all(|v| *v < MIN_MILLI_SCALAR)
    }

    /// Component-wise sum.
    #[must_use]
    pub fn add(&self, other: &Resource) -> Resource {
        let mut out = self.clone();
        out.cpu_milli += other.cpu_milli;
        out.memory_bytes += other.memory_bytes;
        for (name, value) in &other.scalars {
            *out.scalars.entry(name.clone()).or_insert(0.0) += value;
        }
        out
    }

    /// Component-wise difference.
    ///
    /// Subtracting more than is available is an accounting bug: it is logged,
    /// asserted in debug builds, and clamped to zero otherwise.
    #[must_use]
    pub fn sub(&self, other: &Resource) -> Resource {
        match self.checked_sub(other) {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "resource subtraction underflow");
                debug_assert!(false, "{e}");
                self.saturating_sub(other)
            }
        }
    }

    /// Component-wise difference, failing if `other` does not fit in `self`.
    pub fn checked_sub(&self, other: &Resource) -> Result<Resource, ResourceError> {
        if !other.less_equal(self) {
            return Err(ResourceError::Insufficient {
                available: self.to_string(),
                requested: other.to_string(),
            });
        }
        Ok(self.saturating_sub(other))
    }

    fn saturating_sub(&self, other: &Resource) -> Resource {
        let mut out = self.clone();
        out.cpu_milli = (out.cpu_milli - other.cpu_milli).max(0);
        out.memory_bytes = (out.memory_bytes - other.memory_bytes).max(0);
        for (name, value) in &other.scalars {
            if let Some(v) = out.scalars.get_mut(name) {
                *v = (*v - value).max(0.0);
            }
        }
        out
    }

    /// Component-wise maximum.
    #[must_use]
    pub fn max(&self, other: &Resource) -> Resource {
        let mut out = self.clone();
        out.cpu_milli = out.cpu_milli.max(other.cpu_milli);
        out.memory_bytes = out.memory_bytes.max(other.memory_bytes);
        for (name, value) in &other.scalars {
            let entry = out.scalars.entry(name.clone()).or_insert(0.0);
            *entry = entry.max(*value);
        }
        out
    }

    /// Component-wise minimum. A scalar missing on either side is dropped.
    #[must_use]
    pub fn min(&self, other: &Resource) -> Resource {
        let scalars = self
            .scalars
            .iter()
            .filter_map(|(name, value)| {
                other
                    .scalars
                    .get(name)
                    .map(|o| (name.clone(), value.min(*o)))
            })
            .collect();

        Resource {
            cpu_milli: self.cpu_milli.min(other.cpu_milli),
            memory_bytes: self.memory_bytes.min(other.memory_bytes),
            scalars,
        }
    }

    /// `self <= other` with tolerance on scalars.
    ///
    /// Scalars on `self` at noise level are ignored; others pass if they are
    /// smaller or within [`MIN_MILLI_SCALAR`] of `other`.
    #[must_use]
    pub fn less_equal(&self, other: &Resource) -> bool {
        if self.cpu_milli > other.cpu_milli || self.memory_bytes > other.memory_bytes {
            return false;
        }

        self.scalars.iter().all(|(name, value)| {
            if *value <= MIN_MILLI_SCALAR {
                return true;
            }
            let o = other.scalar(name);
            *value < o || (value - o).abs() < MIN_MILLI_SCALAR
        })
    }

    /// `self <= other` with no tolerance.
    #[must_use]
    pub fn less_equal_strict(&self, other: &Resource) -> bool {
        self.cpu_milli <= other.cpu_milli
            && self.memory_bytes <= other.memory_bytes
            && self
                .scalars
                .iter()
                .all(|(name, value)| *value <= other.scalar(name))
    }

    /// Exact equality, treating missing scalars as zero.
    #[must_use]
    pub fn equal_strict(&self, other: &Resource) -> bool {
        self.less_equal_strict(other) && other.less_equal_strict(self)
    }

    /// Signed component deltas `self - other`.
    #[must_use]
    pub fn diff(&self, other: &Resource) -> ResourceDelta {
        let mut scalars = BTreeMap::new();
        for name in self.scalars.keys().chain(other.scalars.keys()) {
            scalars
                .entry(name.clone())
                .or_insert_with(|| self.scalar(name) - other.scalar(name));
        }

        ResourceDelta {
            cpu_milli: self.cpu_milli - other.cpu_milli,
            memory_bytes: self.memory_bytes - other.memory_bytes,
            scalars,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu {}m, memory {}", self.cpu_milli, self.memory_bytes)?;
        for (name, value) in &self.scalars {
            write!(f, ", {name} {value:.2}")?;
        }
        Ok(())
    }
}

/// Signed per-component difference between two resources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceDelta {
    pub cpu_milli: i64,
    pub memory_bytes: i64,
    pub scalars: BTreeMap<String, f64>,
}

impl ResourceDelta {
    /// Positive components only.
    #[must_use]
    pub fn increased(&self) -> Resource {
        Resource {
            cpu_milli: self.cpu_milli.max(0),
            memory_bytes: self.memory_bytes.max(0),
            scalars: self
                .scalars
                .iter()
                .filter(|(_, v)| **v > 0.0)
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    /// Magnitudes of negative components.
    #[must_use]
    pub fn decreased(&self) -> Resource {
        Resource {
            cpu_milli: (-self.cpu_milli).max(0),
            memory_bytes: (-self.memory_bytes).max(0),
            scalars: self
                .scalars
                .iter()
                .filter(|(_, v)| **v < 0.0)
                .map(|(k, v)| (k.clone(), -*v))
                .collect(),
        }
    }
}
