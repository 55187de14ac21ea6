//! Persistance des téléversements, parcelles, vérifications et conflits

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;

use leve::Parcel;

use crate::conflicts::Verification;
use crate::pipeline::Upload;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Magasin d'enregistrements du pipeline
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Crée ou met à jour un téléversement (statut, journal, erreur)
    async fn save_upload(&self, upload: &Upload) -> Result<()>;

    async fn save_parcel(&self, upload_id: &str, parcel: &Parcel) -> Result<()>;

    /// Remplace la vérification et ses conflits; rien n'est fusionné
    async fn replace_verification(&self, upload_id: &str, verification: &Verification)
        -> Result<()>;
}
