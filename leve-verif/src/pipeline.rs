//! Orchestration du traitement d'un levé
//!
//! Chaque document suit la chaîne:
//!
//! ```text
//! uploaded -> ocr_processing -> ocr_completed -> coordinates_extracted
//!          -> geometry_created -> spatial_verification
//!          -> verification_completed -> completed
//! ```
//!
//! Toute erreur fatale fait passer le téléversement à `error` et arrête la
//! chaîne; le journal des étapes est conservé. Les échecs d'un moteur de
//! reconnaissance ou d'une couche de référence sont journalisés sans arrêt.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use leve::{BoundaryPoint, Parcel, PolygonBuilder, SequenceReport};

use crate::config::Config;
use crate::conflicts::{ConflictAggregator, Verification};
use crate::error::PipelineError;
use crate::overlap::OverlapAnalyzer;
use crate::recognition::{Document, DocumentStore, RecognitionContext};
use crate::spatial::SpatialQuery;
use crate::store::RecordStore;

/// État de traitement d'un téléversement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Uploaded,
    OcrProcessing,
    OcrCompleted,
    CoordinatesExtracted,
    GeometryCreated,
    SpatialVerification,
    VerificationCompleted,
    /// Conservé pour les consommateurs externes, jamais atteint par la chaîne
    ComparisonCompleted,
    Completed,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Uploaded => "uploaded",
            ProcessingStatus::OcrProcessing => "ocr_processing",
            ProcessingStatus::OcrCompleted => "ocr_completed",
            ProcessingStatus::CoordinatesExtracted => "coordinates_extracted",
            ProcessingStatus::GeometryCreated => "geometry_created",
            ProcessingStatus::SpatialVerification => "spatial_verification",
            ProcessingStatus::VerificationCompleted => "verification_completed",
            ProcessingStatus::ComparisonCompleted => "comparison_completed",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Error)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entrée du journal de traitement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub step: String,
    pub message: String,
    pub data: Value,
}

/// Téléversement d'un plan de levé
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: String,
    /// Référence du document dans le magasin de documents
    pub document: String,
    pub checksum: Option<String>,
    pub status: ProcessingStatus,
    pub error: Option<String>,
    pub log: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Upload {
    pub fn new(document: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), document)
    }

    pub fn with_id(id: impl Into<String>, document: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            document: document.into(),
            checksum: None,
            status: ProcessingStatus::Uploaded,
            error: None,
            log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_log_entry(&mut self, step: &str, message: impl Into<String>, data: Value) {
        let now = Utc::now();
        self.log.push(LogEntry {
            timestamp: now,
            step: step.to_string(),
            message: message.into(),
            data,
        });
        self.updated_at = now;
    }

    pub fn transition(
        &mut self,
        status: ProcessingStatus,
        step: &str,
        message: impl Into<String>,
        data: Value,
    ) {
        self.status = status;
        self.add_log_entry(step, message, data);
    }

    /// Passe à l'état `error` en conservant le journal
    pub fn fail(&mut self, err: &PipelineError) {
        let message = err.to_string();
        self.transition(
            ProcessingStatus::Error,
            err.step(),
            message.clone(),
            json!({ "fatal": err.is_fatal() }),
        );
        self.error = Some(message);
    }
}

/// Synthèse de l'extraction des coordonnées
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionSummary {
    pub backends: Vec<String>,
    /// Correspondances brutes, rejets compris
    pub matched: usize,
    pub rejected: usize,
    pub points: Vec<BoundaryPoint>,
    pub disputed: Vec<String>,
    pub sequence: SequenceReport,
}

impl ExtractionSummary {
    /// Confiance moyenne des bornes retenues
    pub fn confidence_score(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points.iter().map(|p| p.confidence).sum::<f64>() / self.points.len() as f64
    }
}

/// Résultat d'une exécution, complète ou interrompue
#[derive(Debug, Clone)]
pub struct ProcessRun {
    pub upload: Upload,
    pub extraction: Option<ExtractionSummary>,
    /// Parcelle telle que construite, avant agrégation
    pub parcel: Option<Parcel>,
    pub verification: Option<Verification>,
    pub processing_time_seconds: f64,
}

impl ProcessRun {
    fn new(upload: Upload) -> Self {
        Self {
            upload,
            extraction: None,
            parcel: None,
            verification: None,
            processing_time_seconds: 0.0,
        }
    }

    pub fn status(&self) -> ProcessingStatus {
        self.upload.status
    }

    /// Parcelle avec son statut final si la vérification a abouti
    pub fn parcel(&self) -> Option<&Parcel> {
        self.verification
            .as_ref()
            .map(|v| &v.parcel)
            .or(self.parcel.as_ref())
    }
}

/// Pilote la chaîne de traitement d'un document
pub struct ProcessOrchestrator {
    documents: Arc<dyn DocumentStore>,
    recognition: RecognitionContext,
    analyzer: OverlapAnalyzer,
    aggregator: ConflictAggregator,
    builder: PolygonBuilder,
    store: Arc<dyn RecordStore>,
    cancel: Arc<AtomicBool>,
}

impl ProcessOrchestrator {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        recognition: RecognitionContext,
        analyzer: OverlapAnalyzer,
        aggregator: ConflictAggregator,
        builder: PolygonBuilder,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            documents,
            recognition,
            analyzer,
            aggregator,
            builder,
            store,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(
        config: &Config,
        documents: Arc<dyn DocumentStore>,
        spatial: Arc<dyn SpatialQuery>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self::new(
            documents,
            RecognitionContext::from_config(config),
            OverlapAnalyzer::new(
                spatial,
                config.layers.clone(),
                config.layer_timeout(),
                config.nearby_distance,
            ),
            ConflictAggregator::new(config.layers.clone()),
            PolygonBuilder::new(config.closure_tolerance, config.inference),
            store,
        )
    }

    /// Drapeau d'annulation, contrôlé entre deux étapes
    ///
    /// Levé par `cancel`, il vaut pour les exécutions en cours et celles
    /// lancées par `process_upload`; `process` et `process_batch` le
    /// remettent à zéro en démarrant.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn reset_cancel(&self) {
        if self.cancel.swap(false, Ordering::SeqCst) {
            debug!("Cancellation flag cleared for a new run");
        }
    }

    /// Traite un document sous un nouvel identifiant de téléversement
    pub async fn process(&self, reference: &str) -> ProcessRun {
        self.reset_cancel();
        self.process_upload(Upload::new(reference)).await
    }

    pub async fn process_upload(&self, upload: Upload) -> ProcessRun {
        let started = Instant::now();
        let mut run = ProcessRun::new(upload);
        info!(upload_id = %run.upload.id, document = %run.upload.document, "Processing started");

        if let Err(e) = self.run(&mut run).await {
            debug_assert!(e.is_fatal(), "non-fatal error stopped the run: {}", e);
            error!(upload_id = %run.upload.id, status = %run.upload.status, error = %e, "Processing failed");
            run.upload.fail(&e);
            if let Err(store_err) = self.store.save_upload(&run.upload).await {
                error!(upload_id = %run.upload.id, error = %store_err, "Failed to persist error state");
            }
        }

        run.processing_time_seconds = started.elapsed().as_secs_f64();
        info!(
            upload_id = %run.upload.id,
            status = %run.upload.status,
            elapsed_s = run.processing_time_seconds,
            "Processing finished"
        );
        run
    }

    /// Traite plusieurs documents, au plus `jobs` à la fois
    pub async fn process_batch(&self, references: Vec<String>, jobs: usize) -> Vec<ProcessRun> {
        self.reset_cancel();
        stream::iter(references)
            .map(|reference| async move { self.process_upload(Upload::new(reference)).await })
            .buffer_unordered(jobs.max(1))
            .collect()
            .await
    }

    fn checkpoint(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    async fn advance(
        &self,
        upload: &mut Upload,
        status: ProcessingStatus,
        step: &str,
        message: impl Into<String>,
        data: Value,
    ) -> Result<(), PipelineError> {
        upload.transition(status, step, message, data);
        self.store
            .save_upload(upload)
            .await
            .map_err(|e| PipelineError::storage(format!("{:#}", e)))
    }

    /// Journalise une erreur non fatale
    fn note(upload: &mut Upload, err: &PipelineError, data: Value) {
        upload.add_log_entry(err.step(), err.to_string(), data);
    }

    async fn run(&self, run: &mut ProcessRun) -> Result<(), PipelineError> {
        let upload = &mut run.upload;
        self.store
            .save_upload(upload)
            .await
            .map_err(|e| PipelineError::storage(format!("{:#}", e)))?;

        // Document et reconnaissance
        self.checkpoint()?;
        let document = self.fetch_document(&upload.document).await?;
        upload.checksum = Some(document.checksum.clone());
        self.advance(
            upload,
            ProcessingStatus::OcrProcessing,
            "ocr_started",
            format!("Recognizing {}", document.name()),
            json!({ "backends": self.recognition.backend_names(), "checksum": document.checksum }),
        )
        .await?;

        let recognition = self.recognition.recognize_all(Arc::new(document)).await;
        for failure in &recognition.failures {
            Self::note(upload, failure, Value::Null);
        }
        let backends: Vec<String> = recognition.texts.iter().map(|t| t.backend.clone()).collect();
        self.advance(
            upload,
            ProcessingStatus::OcrCompleted,
            "ocr_completed",
            format!("{} backend(s) produced text", backends.len()),
            json!({ "backends": backends, "failures": recognition.failures.len() }),
        )
        .await?;

        // Extraction et consensus
        self.checkpoint()?;
        let options = self.recognition.options().clone();
        let texts = recognition.texts;
        let outcome = tokio::task::spawn_blocking(move || leve::extract(&texts, &options))
            .await
            .map_err(|e| PipelineError::AggregationFailure(format!("extraction task failed: {}", e)))??;

        let disputed: Vec<String> = outcome
            .resolution
            .disputed()
            .iter()
            .map(ToString::to_string)
            .collect();
        if !disputed.is_empty() {
            warn!(upload_id = %upload.id, disputed = ?disputed, "Backends disagree on some boundary points");
        }
        let summary = ExtractionSummary {
            backends,
            matched: outcome.matched(),
            rejected: outcome.rejected(),
            points: outcome.resolution.points.points().cloned().collect(),
            disputed,
            sequence: outcome.sequence.clone(),
        };
        self.advance(
            upload,
            ProcessingStatus::CoordinatesExtracted,
            "coordinates_extracted",
            format!(
                "{} boundary points resolved ({})",
                summary.points.len(),
                summary.sequence.message
            ),
            json!({
                "matched": summary.matched,
                "rejected": summary.rejected,
                "resolved": summary.points.len(),
                "disputed": summary.disputed,
                "sequenceStatus": summary.sequence.status.as_str(),
            }),
        )
        .await?;
        run.extraction = Some(summary);

        // Géométrie
        self.checkpoint()?;
        let parcel = self.builder.build(&outcome.resolution.points)?;
        if !parcel.is_simple {
            let err = PipelineError::InvalidGeometry("parcel ring is not simple".to_string());
            Self::note(upload, &err, json!({ "area": parcel.area }));
        }
        self.store
            .save_parcel(&upload.id, &parcel)
            .await
            .map_err(|e| PipelineError::storage(format!("{:#}", e)))?;
        self.advance(
            upload,
            ProcessingStatus::GeometryCreated,
            "geometry_created",
            format!("Parcel of {:.2} m² built from {} points", parcel.area, parcel.points.len()),
            json!({
                "area": parcel.area,
                "perimeter": parcel.perimeter,
                "isSimple": parcel.is_simple,
                "closureAppended": parcel.closure_appended,
                "inferred": parcel.inferred_count,
            }),
        )
        .await?;

        // Analyse spatiale
        self.checkpoint()?;
        self.advance(
            upload,
            ProcessingStatus::SpatialVerification,
            "spatial_verification_started",
            format!("Checking {} reference layers", self.analyzer.layers().len()),
            Value::Null,
        )
        .await?;
        let overlaps = self.analyzer.analyze(&parcel).await;
        for skipped in &overlaps.skipped {
            let err = PipelineError::layer_failure(&skipped.layer, &skipped.reason);
            Self::note(upload, &err, json!({ "layer": skipped.layer }));
        }
        run.parcel = Some(parcel.clone());

        self.checkpoint()?;
        let verification = self.aggregator.aggregate(parcel, &overlaps)?;
        self.store
            .replace_verification(&upload.id, &verification)
            .await
            .map_err(|e| PipelineError::storage(format!("{:#}", e)))?;
        self.store
            .save_parcel(&upload.id, &verification.parcel)
            .await
            .map_err(|e| PipelineError::storage(format!("{:#}", e)))?;
        self.advance(
            upload,
            ProcessingStatus::VerificationCompleted,
            "spatial_analysis_completed",
            format!(
                "Spatial analysis completed in {:.2}s",
                verification.processing_time_seconds
            ),
            json!({
                "total": verification.conflict_count,
                "byType": verification.by_type,
                "bySeverity": verification.by_severity,
                "criticalIssues": verification.critical_issues,
                "layersChecked": verification.layers_checked,
                "layersSkipped": verification.layers_skipped,
            }),
        )
        .await?;

        let status = verification.parcel.status;
        run.verification = Some(verification);
        self.advance(
            upload,
            ProcessingStatus::Completed,
            "completed",
            format!("Parcel status: {}", status.as_str()),
            json!({ "parcelStatus": status }),
        )
        .await?;

        Ok(())
    }

    async fn fetch_document(&self, reference: &str) -> Result<Document, PipelineError> {
        let documents = Arc::clone(&self.documents);
        let reference = reference.to_string();
        tokio::task::spawn_blocking(move || documents.fetch(&reference))
            .await
            .map_err(|e| PipelineError::storage(format!("document task failed: {}", e)))?
            .map_err(|e| PipelineError::storage(format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_values() {
        let all = [
            ProcessingStatus::Uploaded,
            ProcessingStatus::OcrProcessing,
            ProcessingStatus::OcrCompleted,
            ProcessingStatus::CoordinatesExtracted,
            ProcessingStatus::GeometryCreated,
            ProcessingStatus::SpatialVerification,
            ProcessingStatus::VerificationCompleted,
            ProcessingStatus::ComparisonCompleted,
            ProcessingStatus::Completed,
            ProcessingStatus::Error,
        ];
        for status in all {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!(ProcessingStatus::Error.is_terminal());
        assert!(!ProcessingStatus::GeometryCreated.is_terminal());
    }

    #[test]
    fn test_upload_fail_keeps_log() {
        let mut upload = Upload::new("leve.txt");
        assert_eq!(upload.id.len(), 36);
        upload.transition(ProcessingStatus::OcrProcessing, "ocr_started", "start", Value::Null);
        upload.fail(&PipelineError::NoCandidatesFound { sources: 2 });

        assert_eq!(upload.status, ProcessingStatus::Error);
        assert_eq!(upload.log.len(), 2);
        assert_eq!(upload.log[1].step, "no_candidates");
        assert_eq!(upload.log[1].data["fatal"], true);
        assert!(upload.error.as_deref().unwrap_or_default().contains("No boundary point"));
    }

    #[test]
    fn test_cancelled_message() {
        let mut upload = Upload::with_id("u-1", "leve.txt");
        upload.fail(&PipelineError::Cancelled);
        assert_eq!(upload.error.as_deref(), Some("cancelled"));
    }
}
