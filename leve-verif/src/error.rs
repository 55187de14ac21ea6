//! Erreurs du pipeline de vérification

use thiserror::Error;

use leve::LeveError;

/// Erreur d'une étape du pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Recognition failed for backend {backend}: {reason}")]
    RecognitionFailure { backend: String, reason: String },

    #[error("No boundary point candidates found in {sources} recognized sources")]
    NoCandidatesFound { sources: usize },

    #[error("Insufficient boundary points: {found} (minimum 3)")]
    InsufficientPoints { found: usize },

    #[error("Too few recognized boundary points: {0}")]
    InsufficientRecognizedPoints(String),

    #[error("Invalid parcel geometry: {0}")]
    InvalidGeometry(String),

    #[error("Query failed on layer {layer}: {reason}")]
    LayerQueryFailure { layer: String, reason: String },

    #[error("Failed to build verification record: {0}")]
    AggregationFailure(String),

    #[error("cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl PipelineError {
    /// Vrai si l'erreur arrête le traitement
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::RecognitionFailure { .. }
                | PipelineError::InvalidGeometry(_)
                | PipelineError::LayerQueryFailure { .. }
        )
    }

    /// Nom de l'étape de journal associée
    pub fn step(&self) -> &'static str {
        match self {
            PipelineError::RecognitionFailure { .. } => "recognition_failure",
            PipelineError::NoCandidatesFound { .. } => "no_candidates",
            PipelineError::InsufficientPoints { .. } => "insufficient_points",
            PipelineError::InsufficientRecognizedPoints(_) => "insufficient_recognized_points",
            PipelineError::InvalidGeometry(_) => "invalid_geometry",
            PipelineError::LayerQueryFailure { .. } => "layer_skipped",
            PipelineError::AggregationFailure(_) => "aggregation_failure",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Storage(_) => "storage_failure",
        }
    }

    pub fn layer_failure(layer: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::LayerQueryFailure {
            layer: layer.into(),
            reason: reason.to_string(),
        }
    }

    pub fn storage(reason: impl ToString) -> Self {
        PipelineError::Storage(reason.to_string())
    }
}

impl From<LeveError> for PipelineError {
    fn from(err: LeveError) -> Self {
        match err {
            LeveError::NoCandidatesFound { sources } => PipelineError::NoCandidatesFound { sources },
            LeveError::InsufficientPoints { found } => PipelineError::InsufficientPoints { found },
            LeveError::InsufficientRecognizedPoints { .. } => {
                PipelineError::InsufficientRecognizedPoints(err.to_string())
            }
            LeveError::InvalidGeometry { .. } => PipelineError::InvalidGeometry(err.to_string()),
            other => PipelineError::AggregationFailure(other.to_string()),
        }
    }
}
