//! Snapshot types for profile export and import.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use taskgrid_placement::Profile;

use crate::error::{StateError, StateResult};

/// Profiles of one worker keyed by implementation signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceProfiles {
    #[serde(default)]
    pub implementations: BTreeMap<String, Profile>,
}

/// Every profile the runtime knows about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceProfiles>,
    /// Profiles of workers that are no longer in the pool.
    #[serde(default)]
    pub retired: BTreeMap<String, Profile>,
}

impl ProfileSnapshot {
    pub fn is_empty(&self) -> bool {
        self.resources.values().all(|r| r.implementations.is_empty()) && self.retired.is_empty()
    }

    pub fn to_json(&self) -> StateResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StateError::Encode(e.to_string()))
    }

    pub fn from_json(json: &str) -> StateResult<Self> {
        serde_json::from_str(json).map_err(|e| StateError::Decode(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> StateResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> StateResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_implementation_keyed_records() {
        let json = r#"{
            "resources": {
                "w1": {"implementations": {
                    "Matmul.cpu(OBJECT_T)": {"executions": 4, "minTime": 10, "avgTime": 20, "maxTime": 40}
                }}
            }
        }"#;
        let snapshot = ProfileSnapshot::from_json(json).unwrap();
        let p = snapshot.resources["w1"].implementations["Matmul.cpu(OBJECT_T)"];
        assert_eq!(p.executions(), 4);
        assert_eq!(p.average_time(), 20);
        assert!(snapshot.retired.is_empty());
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = ProfileSnapshot::from_json("{not json").unwrap_err();
        assert!(matches!(err, StateError::Decode(_)));
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        let mut snapshot = ProfileSnapshot::default();
        snapshot.retired.insert("A.run()".into(), Profile::single(12));
        snapshot.save(&path).unwrap();
        assert_eq!(ProfileSnapshot::load(&path).unwrap(), snapshot);
    }
}
