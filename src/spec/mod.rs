//! Language execution specs and the shared registry they are resolved from.
//!
//! A [`Spec`] describes how code of one language is executed: which image is
//! used, how the entrypoint and command look and which file the code is
//! written to. Specs may alias other specs via `use`, and may carry an
//! [`InlineSpec`] template for single-expression execution.

pub mod provider;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

pub use provider::{FileSpecProvider, HttpSpecProvider, SpecFormat, SpecProvider};

/// Marker replaced by the caller's code in an inline template.
pub const CODE_MARKER: &str = "$${CODE}";

/// Marker replaced by the extracted import lines in an inline template.
pub const IMPORTS_MARKER: &str = "$${IMPORTS}";

/// Map of language identifier to spec.
pub type SpecMap = BTreeMap<String, Spec>;

/// Declarative description of how to execute one language.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub entrypoint: String,
    #[serde(rename = "filename", default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cmd: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry: String,
    /// Key of another spec this entry is an alias for.
    #[serde(rename = "use", default, skip_serializing_if = "String::is_empty")]
    pub use_spec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<InlineSpec>,
}

/// Code template used to execute single expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineSpec {
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_regex: Option<ImportPattern>,
}

/// Compiled import extraction pattern. Serialized as its source string.
#[derive(Clone)]
pub struct ImportPattern(Regex);

impl Spec {
    /// Returns true if this entry only points to another spec.
    pub fn is_alias(&self) -> bool {
        !self.use_spec.is_empty()
    }

    /// Returns true if the spec declares an inline template containing
    /// the code marker.
    pub fn supports_templating(&self) -> bool {
        self.inline
            .as_ref()
            .map(|inline| inline.template.contains(CODE_MARKER))
            .unwrap_or(false)
    }

    /// Full image reference including the registry, if one is configured.
    pub fn image_reference(&self) -> String {
        let registry = self.registry.trim_end_matches('/');
        if registry.is_empty() || self.image.starts_with(registry) {
            self.image.clone()
        } else {
            format!("{}/{}", registry, self.image)
        }
    }
}

impl ImportPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self)
    }

    pub fn regex(&self) -> &Regex {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for ImportPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ImportPattern").field(&self.as_str()).finish()
    }
}

impl PartialEq for ImportPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for ImportPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ImportPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        ImportPattern::new(&pattern).map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur while loading specs.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("unsupported spec format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to parse spec: {0}")]
    Parse(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request failed with status {0}")]
    Status(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Concurrency-safe registry of specs.
///
/// Readers take a cheap snapshot of the current generation. [`replace`]
/// builds the next generation completely before swapping it in, so a reader
/// never observes an empty or partially replaced map.
///
/// [`replace`]: SpecRegistry::replace
#[derive(Debug, Default)]
pub struct SpecRegistry {
    entries: RwLock<Arc<SpecMap>>,
}

impl SpecRegistry {
    pub fn new(entries: SpecMap) -> Self {
        Self {
            entries: RwLock::new(Arc::new(entries)),
        }
    }

    /// Resolves a spec by key, following at most one alias hop.
    ///
    /// An alias pointing to another alias is treated as not found.
    pub fn get(&self, key: &str) -> Option<Spec> {
        resolve(&self.snapshot(), key)
    }

    /// Swaps in a new generation of entries.
    pub fn replace(&self, entries: SpecMap) {
        let next = Arc::new(entries);
        let mut current = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        *current = next;
    }

    /// Point-in-time view of all stored entries, aliases included.
    pub fn snapshot(&self) -> Arc<SpecMap> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Point-in-time view with every alias replaced by its target.
    /// Entries whose alias cannot be resolved are left out.
    pub fn resolved(&self) -> SpecMap {
        let snapshot = self.snapshot();
        snapshot
            .keys()
            .filter_map(|key| resolve(&snapshot, key).map(|spec| (key.clone(), spec)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

fn resolve(entries: &SpecMap, key: &str) -> Option<Spec> {
    let spec = entries.get(key)?;
    if !spec.is_alias() {
        return Some(spec.clone());
    }

    let target = entries.get(&spec.use_spec)?;
    if target.is_alias() {
        return None;
    }
    Some(target.clone())
}
