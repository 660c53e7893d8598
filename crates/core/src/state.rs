//! Durable state file
//!
//! The whole cache is stored as one JSON document. Writes go to
//! `<path>.tmp` first and are renamed over the previous file, so a crash
//! leaves either the old or the new state on disk.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::identity::{MetricIdentity, ServiceIdentity};
use crate::registration::{
    ContainerRegistration, MetricRegistration, ServiceRegistration, Threshold, ThresholdKey,
};

/// Serialized form of the identity cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub agent_id: Option<String>,
    pub password: Option<String>,
    pub metrics: Vec<MetricEntry>,
    pub services: Vec<ServiceEntry>,
    pub containers: BTreeMap<String, ContainerRegistration>,
    pub thresholds: Vec<ThresholdEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEntry {
    pub identity: MetricIdentity,
    pub registration: MetricRegistration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub identity: ServiceIdentity,
    pub registration: ServiceRegistration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdEntry {
    pub key: ThresholdKey,
    pub threshold: Threshold,
}

/// Location of the state file on disk
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, or an empty one when the file does not exist yet
    pub fn load(&self) -> Result<Snapshot> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
            Err(e) => return Err(CoreError::io(self.path.display().to_string(), e)),
        };

        if contents.trim().is_empty() {
            return Ok(Snapshot::default());
        }

        serde_json::from_str(&contents).map_err(|source| CoreError::Corrupted {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Write the snapshot and sync it to disk
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let data = serde_json::to_vec(snapshot)?;
        let tmp = self.tmp_path();
        let display = || self.path.display().to_string();

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| CoreError::io(display(), e))?;
        }

        let mut file = fs::File::create(&tmp).map_err(|e| CoreError::io(display(), e))?;
        file.write_all(&data)
            .map_err(|e| CoreError::io(display(), e))?;
        file.sync_all().map_err(|e| CoreError::io(display(), e))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| CoreError::io(display(), e))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        let snapshot = file.load().unwrap();
        assert!(snapshot.agent_id.is_none());
        assert!(snapshot.metrics.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("nested").join("state.json"));

        let snapshot = Snapshot {
            agent_id: Some("agent-1".into()),
            metrics: vec![MetricEntry {
                identity: MetricIdentity::new("cpu_used"),
                registration: MetricRegistration::Resolved("m-1".into()),
            }],
            ..Default::default()
        };
        file.save(&snapshot).unwrap();

        let loaded = file.load().unwrap();
        assert_eq!(loaded.agent_id.as_deref(), Some("agent-1"));
        assert_eq!(loaded.metrics.len(), 1);
        assert_eq!(
            loaded.metrics[0].registration,
            MetricRegistration::Resolved("m-1".into())
        );
        assert!(!file.tmp_path().exists());
    }

    #[test]
    fn test_corrupted_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let err = StateFile::new(&path).load().unwrap_err();
        assert!(matches!(err, CoreError::Corrupted { .. }));
    }

    #[test]
    fn test_empty_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "").unwrap();
        assert!(StateFile::new(&path).load().unwrap().services.is_empty());
    }
}
