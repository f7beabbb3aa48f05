//! Desired per-layer node counts as submitted by a caller.

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{LayerId, ValidationError};

/// Ordered mapping from layer id to a non-negative node count.
///
/// Submission order is preserved so the mapping persisted on a formation
/// reads back exactly as it was requested.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DesiredScale {
    entries: Vec<(LayerId, u32)>,
}

impl DesiredScale {
    /// Creates an empty mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Builds a mapping from raw `(layer, count)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when a count is negative or too large, or
    /// a layer appears twice.
    pub fn from_pairs<I, K>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<LayerId>,
    {
        let mut scale = Self::new();
        for (layer, count) in pairs {
            scale.push(layer.into(), count)?;
        }
        Ok(scale)
    }

    /// Decodes a JSON object such as `{"proxy": 2, "runtime": 4}`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Malformed`] for anything other than an
    /// object of integers, and the [`Self::from_pairs`] errors otherwise.
    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(raw).map_err(|err| ValidationError::Malformed {
            message: err.to_string(),
        })
    }

    fn push(&mut self, layer: LayerId, count: i64) -> Result<(), ValidationError> {
        if count < 0 {
            return Err(ValidationError::NegativeCount { layer, count });
        }
        let Ok(target) = u32::try_from(count) else {
            return Err(ValidationError::CountTooLarge { layer, count });
        };
        if self.get(&layer).is_some() {
            return Err(ValidationError::DuplicateLayer { layer });
        }
        self.entries.push((layer, target));
        Ok(())
    }

    /// Returns the requested count for `layer`.
    #[must_use]
    pub fn get(&self, layer: &LayerId) -> Option<u32> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == layer)
            .map(|(_, count)| *count)
    }

    /// Iterates entries in submission order.
    pub fn iter(&self) -> impl Iterator<Item = (&LayerId, u32)> {
        self.entries.iter().map(|(layer, count)| (layer, *count))
    }

    /// Number of layers named in the mapping.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no layer is named.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all requested counts.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, count)| u64::from(*count)).sum()
    }
}

impl Serialize for DesiredScale {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (layer, count) in &self.entries {
            map.serialize_entry(layer, count)?;
        }
        map.end()
    }
}

struct DesiredScaleVisitor;

impl<'de> Visitor<'de> for DesiredScaleVisitor {
    type Value = DesiredScale;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("an object mapping layer ids to node counts")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut scale = DesiredScale::new();
        while let Some((layer, count)) = access.next_entry::<LayerId, i64>()? {
            scale.push(layer, count).map_err(de::Error::custom)?;
        }
        Ok(scale)
    }
}

impl<'de> Deserialize<'de> for DesiredScale {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(DesiredScaleVisitor)
    }
}
