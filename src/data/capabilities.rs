//! Capability blobs and stereotype matching
//!
//! A capability blob is an unordered string-keyed JSON mapping, used
//! both as a request ("what the caller wants") and as a slot stereotype
//! ("what a slot can serve"). Matching is subset-style: every key the
//! request carries must be satisfied by the stereotype.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Wildcard sentinel: a request value of `"ANY"` is trivially satisfied
pub const ANY: &str = "ANY";

const BROWSER_VERSION: &str = "browserVersion";
const PLATFORM_NAME: &str = "platformName";

/// An unordered mapping from capability names to JSON values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeMap<String, Value>);

impl Capabilities {
    /// Empty capability blob
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value, which must be an object.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `value` is not a JSON object.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            other => Err(Error::InvalidArgument(format!(
                "capabilities must be a JSON object, got {other}"
            ))),
        }
    }

    /// Look up a capability value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Insert a capability value
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Merge an always-match overlay into this alternative.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the same key appears in both blobs;
    /// the caller asked for two values at once and we never guess.
    pub fn merge_overlay(&self, overlay: &Capabilities) -> Result<Capabilities> {
        let mut merged = self.0.clone();
        for (key, value) in &overlay.0 {
            if merged.contains_key(key) {
                return Err(Error::InvalidArgument(format!(
                    "capability '{key}' appears in both alwaysMatch and firstMatch"
                )));
            }
            merged.insert(key.clone(), value.clone());
        }
        Ok(Capabilities(merged))
    }

    /// Whether this stereotype can serve `request`.
    ///
    /// For every key in the request, the stereotype must carry an equal
    /// value, with three carve-outs: a request value of [`ANY`] is
    /// trivially satisfied, `platformName` matches through the platform
    /// family tree, and `browserVersion` matches by version prefix (a
    /// missing stereotype version is "don't care"). Keys listed in
    /// `informational` are also "don't care" when the stereotype omits
    /// them.
    #[must_use]
    pub fn satisfies(&self, request: &Capabilities, informational: &HashSet<String>) -> bool {
        for (key, wanted) in &request.0 {
            if wanted.as_str() == Some(ANY) {
                continue;
            }
            match self.0.get(key) {
                Some(offered) => {
                    let ok = match key.as_str() {
                        PLATFORM_NAME => match (wanted.as_str(), offered.as_str()) {
                            (Some(w), Some(o)) => platform_matches(w, o),
                            _ => wanted == offered,
                        },
                        BROWSER_VERSION => match (wanted.as_str(), offered.as_str()) {
                            (Some(w), Some(o)) => version_prefix_matches(w, o),
                            _ => wanted == offered,
                        },
                        _ => wanted == offered,
                    };
                    if !ok {
                        return false;
                    }
                }
                None => {
                    if key != BROWSER_VERSION && !informational.contains(key) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

impl From<Capabilities> for Value {
    fn from(caps: Capabilities) -> Self {
        Value::Object(caps.0.into_iter().collect())
    }
}

/// Version prefix match: a request for `"121"` matches a stereotype of
/// `"121.0.6167.85"`, but `"12"` does not.
fn version_prefix_matches(wanted: &str, offered: &str) -> bool {
    wanted == offered
        || offered
            .strip_prefix(wanted)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Platform family match: the requested platform must equal the offered
/// one or be one of its ancestors (`WINDOWS` matches `WIN10`, `LINUX`
/// matches `UBUNTU`, `UNIX` matches both of those Linuxes). `ANY` on
/// either side matches everything.
fn platform_matches(wanted: &str, offered: &str) -> bool {
    let wanted = wanted.trim().to_uppercase();
    let offered = offered.trim().to_uppercase();

    if wanted == ANY || offered == ANY {
        return true;
    }
    let mut current = offered.as_str();
    loop {
        if current == wanted {
            return true;
        }
        match platform_parent(current) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

/// Immediate ancestor in the platform family tree
fn platform_parent(platform: &str) -> Option<&'static str> {
    match platform {
        "WIN10" | "WIN11" | "WIN8_1" | "WIN8" | "WIN7" | "XP" | "VISTA" => Some("WINDOWS"),
        "UBUNTU" => Some("LINUX"),
        "LINUX" => Some("UNIX"),
        "SIERRA" | "HIGH_SIERRA" | "MOJAVE" | "CATALINA" | "BIG_SUR" | "MONTEREY" => Some("MAC"),
        _ => None,
    }
}
