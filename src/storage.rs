//! File-backed alert store.

use std::{fs, path::PathBuf};

use anyhow::Result;
use serde_json::to_writer;
use sha2::{Digest, Sha256};

use crate::alert::Alert;

/// Persistent store for alert records rooted at `root`. Addresses are hashed
/// into filenames so free-form discriminators stay filesystem-safe.
#[derive(Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Create a new store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.root.join("alerts"))?;
        Ok(())
    }

    /// Compute the canonical path for an alert address.
    fn alert_path(&self, address: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(address.as_bytes()));
        self.root.join("alerts").join(format!("{digest}.json"))
    }

    /// Insert or fully replace the record for `alert.address`. The write is
    /// atomic: a colliding address never exposes a partially written record.
    pub fn upsert(&self, alert: Alert) -> Result<Alert> {
        let path = self.alert_path(&alert.address);
        let parent_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent_dir)?;
        let tmp = tempfile::NamedTempFile::new_in(&parent_dir)?;
        to_writer(&tmp, &alert)?;
        tmp.persist(&path)?;
        Ok(alert)
    }

    pub fn get_by_address(&self, address: &str) -> Result<Option<Alert>> {
        let path = self.alert_path(address);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Alert>> {
        Ok(self.scan()?.into_iter().find(|a| a.id == id))
    }

    /// Remove the record for `address`; returns whether anything was removed.
    pub fn delete_by_address(&self, address: &str) -> Result<bool> {
        let path = self.alert_path(address);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    /// Remove the record whose latest event id is `id`, returning it.
    pub fn delete_by_id(&self, id: &str) -> Result<Option<Alert>> {
        match self.get_by_id(id)? {
            Some(alert) => {
                self.delete_by_address(&alert.address)?;
                Ok(Some(alert))
            }
            None => Ok(None),
        }
    }

    /// All alerts owned by `pubkey`, newest first.
    pub fn list_by_pubkey(&self, pubkey: &str) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self
            .scan()?
            .into_iter()
            .filter(|a| a.pubkey == pubkey)
            .collect();
        alerts.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        Ok(alerts)
    }

    /// Every persisted alert, newest first.
    pub fn list_all(&self) -> Result<Vec<Alert>> {
        let mut alerts = self.scan()?;
        alerts.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        Ok(alerts)
    }

    fn scan(&self) -> Result<Vec<Alert>> {
        let dir = self.root.join("alerts");
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut alerts = vec![];
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let data = fs::read_to_string(entry.path())?;
            if let Ok(alert) = serde_json::from_str(&data) {
                alerts.push(alert);
            }
        }
        Ok(alerts)
    }
}
