//! Remplacement atomique de la vérification d'une parcelle
//!
//! L'ancienne vérification et ses conflits sont supprimés puis recréés dans
//! la même transaction: rien n'est fusionné, et une erreur annule tout.

use anyhow::{Context, Result};
use deadpool_postgres::{Object, Transaction};
use tracing::{error, info};

/// Issue d'un remplacement
#[derive(Debug, Clone, PartialEq)]
pub enum ReplaceStatus {
    Committed,
    RolledBack,
}

/// Rapport de remplacement
#[derive(Debug)]
pub struct ReplaceReport {
    pub upload_id: String,
    pub conflicts_written: usize,
    pub status: ReplaceStatus,
    pub error: Option<String>,
}

/// Transaction de remplacement pour un téléversement
pub struct VerificationReplace<'a> {
    transaction: Transaction<'a>,
    upload_id: String,
    conflicts_written: usize,
}

impl<'a> VerificationReplace<'a> {
    /// Démarre la transaction
    ///
    /// # Errors
    /// Retourne une erreur si la transaction ne peut pas être démarrée
    pub async fn begin(client: &'a mut Object, upload_id: &str) -> Result<Self> {
        let transaction = client
            .transaction()
            .await
            .context("Failed to begin transaction")?;

        info!(upload_id = %upload_id, "Replacing verification");

        Ok(Self {
            transaction,
            upload_id: upload_id.to_string(),
            conflicts_written: 0,
        })
    }

    /// Transaction sous-jacente
    pub fn transaction(&self) -> &Transaction<'a> {
        &self.transaction
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn record_conflict(&mut self) {
        self.conflicts_written += 1;
    }

    pub fn conflicts_written(&self) -> usize {
        self.conflicts_written
    }

    /// Valide la transaction
    ///
    /// # Errors
    /// Retourne une erreur si le commit échoue
    pub async fn commit(self) -> Result<ReplaceReport> {
        self.transaction
            .commit()
            .await
            .context("Failed to commit transaction")?;

        info!(
            upload_id = %self.upload_id,
            conflicts = self.conflicts_written,
            "Verification replaced"
        );

        Ok(ReplaceReport {
            upload_id: self.upload_id,
            conflicts_written: self.conflicts_written,
            status: ReplaceStatus::Committed,
            error: None,
        })
    }

    /// Annule la transaction
    pub async fn rollback(self, reason: &str) -> ReplaceReport {
        error!(
            upload_id = %self.upload_id,
            reason = %reason,
            "Rolling back verification replacement"
        );

        if let Err(e) = self.transaction.rollback().await {
            error!(error = %e, "Explicit rollback failed (will rollback on drop anyway)");
        }

        ReplaceReport {
            upload_id: self.upload_id,
            conflicts_written: 0,
            status: ReplaceStatus::RolledBack,
            error: Some(reason.to_string()),
        }
    }
}
