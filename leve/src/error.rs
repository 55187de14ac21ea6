//! Types d'erreurs pour le crate leve

use thiserror::Error;

/// Erreurs pouvant survenir lors de l'extraction des bornes et de la construction du polygone
#[derive(Debug, Error)]
pub enum LeveError {
    /// Aucune source n'a produit de borne exploitable
    #[error("No boundary candidates found in {sources} source(s)")]
    NoCandidatesFound { sources: usize },

    /// Moins de 3 bornes: impossible de fermer un polygone
    #[error("Insufficient points to build a polygon: {found} found, at least 3 required")]
    InsufficientPoints { found: usize },

    /// Trop de bornes déduites par rapport aux bornes lues
    #[error("Insufficient recognized points: {recognized}/{total} (minimum ratio {min_ratio})")]
    InsufficientRecognizedPoints {
        recognized: usize,
        total: usize,
        min_ratio: f64,
    },

    /// Géométrie invalide (anneau non simple, aire nulle)
    #[error("Invalid geometry for {parcel}: {reason}")]
    InvalidGeometry { parcel: String, reason: String },

    /// Identifiant de borne illisible
    #[error("Invalid boundary identifier: {0}")]
    InvalidBorneId(String),

    /// Erreur de lecture d'une coordonnée
    #[error("Parse error in {source_name}: {reason}")]
    ParseError { source_name: String, reason: String },
}

impl LeveError {
    /// Crée une erreur de parsing avec contexte
    pub fn parse_error(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParseError {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Crée une erreur de géométrie invalide
    pub fn invalid_geometry(parcel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            parcel: parcel.into(),
            reason: reason.into(),
        }
    }
}
