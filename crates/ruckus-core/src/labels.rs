//! Typed labels and equality selectors
//!
//! Selectors render as `k=v,k2=v2`; an empty selector matches everything.

use crate::error::ChaosError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label set attached to targets and helpers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// Create an empty label set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label (builder)
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a label
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a label value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterate labels in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check if no labels are set
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (k, v) in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

/// Equality-based label selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    requirements: Vec<(String, String)>,
}

impl Selector {
    /// Selector matching everything
    #[inline]
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Require `key == value` (builder)
    #[must_use]
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.requirements.retain(|(k, _)| *k != key);
        self.requirements.push((key, value.into()));
        self
    }

    /// Parse `k=v,k2=v2`
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::InvalidConfiguration`] for terms without `=` or with an empty key.
    pub fn parse(raw: &str) -> Result<Self, ChaosError> {
        let mut selector = Self::all();
        for term in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once('=')
                .ok_or_else(|| ChaosError::invalid(format!("selector term {term:?} has no '='")))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ChaosError::invalid(format!(
                    "selector term {term:?} has an empty key"
                )));
            }
            selector = selector.eq(key, value.trim());
        }
        Ok(selector)
    }

    /// Check a label set against every requirement
    #[must_use]
    pub fn matches(&self, labels: &Labels) -> bool {
        self.requirements
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v.as_str()))
    }

    /// Check if the selector has no requirements
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

impl From<&Labels> for Selector {
    fn from(labels: &Labels) -> Self {
        labels
            .iter()
            .fold(Self::all(), |selector, (k, v)| selector.eq(k, v))
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self
            .requirements
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        f.write_str(&rendered.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parse_and_render() {
        let selector = Selector::parse("app=nginx, tier = web").unwrap();
        assert_eq!(selector.to_string(), "app=nginx,tier=web");

        let labels = Labels::new().with("app", "nginx").with("tier", "web");
        assert!(selector.matches(&labels));
        assert!(!selector.matches(&Labels::new().with("app", "nginx")));
    }

    #[test]
    fn empty_selector_matches_all() {
        let selector = Selector::parse("").unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(&Labels::new()));
    }

    #[test]
    fn malformed_terms_rejected() {
        assert!(Selector::parse("app").is_err());
        assert!(Selector::parse("=nginx").is_err());
    }

    #[test]
    fn later_requirement_replaces_earlier() {
        let selector = Selector::all().eq("app", "a").eq("app", "b");
        assert_eq!(selector.to_string(), "app=b");
    }
}
