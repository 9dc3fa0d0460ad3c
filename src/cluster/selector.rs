//! Equality-based label selectors

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A set of `key=value` label requirements, all of which must match
///
/// Keys are kept sorted so the rendered selector is stable across calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSelector {
    labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Create an empty selector (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `key=value` requirement
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.labels {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut selector = Self::new();

        for requirement in s.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            let (key, value) = requirement
                .split_once('=')
                .ok_or_else(|| SelectorError::MissingValue(requirement.to_string()))?;

            // Tolerate the `==` spelling accepted by the API server
            let value = value.strip_prefix('=').unwrap_or(value);
            let key = key.trim();

            if key.is_empty() {
                return Err(SelectorError::EmptyKey(requirement.to_string()));
            }
            if key.ends_with('!') {
                return Err(SelectorError::Unsupported(requirement.to_string()));
            }

            selector.labels.insert(key.to_string(), value.trim().to_string());
        }

        Ok(selector)
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSelector
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            labels: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Label selector parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("label requirement '{0}' has no value")]
    MissingValue(String),

    #[error("label requirement '{0}' has an empty key")]
    EmptyKey(String),

    #[error("label requirement '{0}' is not an equality match")]
    Unsupported(String),
}
