//! Magasin en mémoire (tests, exécutions sans base)

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;

use leve::Parcel;

use super::RecordStore;
use crate::conflicts::Verification;
use crate::pipeline::{ProcessingStatus, Upload};

#[derive(Default)]
struct Records {
    uploads: HashMap<String, Upload>,
    transitions: HashMap<String, Vec<ProcessingStatus>>,
    parcels: HashMap<String, Parcel>,
    verifications: HashMap<String, Verification>,
    replacements: HashMap<String, usize>,
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Records>> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory store lock poisoned"))
    }

    pub fn upload(&self, id: &str) -> Option<Upload> {
        self.lock().ok()?.uploads.get(id).cloned()
    }

    /// États successifs enregistrés pour un téléversement
    pub fn transitions(&self, id: &str) -> Vec<ProcessingStatus> {
        self.lock()
            .ok()
            .and_then(|r| r.transitions.get(id).cloned())
            .unwrap_or_default()
    }

    pub fn parcel(&self, upload_id: &str) -> Option<Parcel> {
        self.lock().ok()?.parcels.get(upload_id).cloned()
    }

    pub fn verification(&self, upload_id: &str) -> Option<Verification> {
        self.lock().ok()?.verifications.get(upload_id).cloned()
    }

    /// Nombre de remplacements de la vérification d'un téléversement
    pub fn replacements(&self, upload_id: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|r| r.replacements.get(upload_id).copied())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save_upload(&self, upload: &Upload) -> Result<()> {
        let mut records = self.lock()?;
        let history = records.transitions.entry(upload.id.clone()).or_default();
        if history.last() != Some(&upload.status) {
            history.push(upload.status);
        }
        records.uploads.insert(upload.id.clone(), upload.clone());
        Ok(())
    }

    async fn save_parcel(&self, upload_id: &str, parcel: &Parcel) -> Result<()> {
        self.lock()?
            .parcels
            .insert(upload_id.to_string(), parcel.clone());
        Ok(())
    }

    async fn replace_verification(
        &self,
        upload_id: &str,
        verification: &Verification,
    ) -> Result<()> {
        let mut records = self.lock()?;
        records
            .verifications
            .insert(upload_id.to_string(), verification.clone());
        *records.replacements.entry(upload_id.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_recorded_once() {
        let store = MemoryStore::new();
        let mut upload = Upload::with_id("u-1", "leve.txt");
        store.save_upload(&upload).await.unwrap();
        store.save_upload(&upload).await.unwrap();
        upload.status = ProcessingStatus::OcrProcessing;
        store.save_upload(&upload).await.unwrap();

        assert_eq!(
            store.transitions("u-1"),
            vec![ProcessingStatus::Uploaded, ProcessingStatus::OcrProcessing]
        );
        assert_eq!(store.upload("u-1").map(|u| u.status), Some(ProcessingStatus::OcrProcessing));
        assert!(store.upload("u-2").is_none());
    }
}
