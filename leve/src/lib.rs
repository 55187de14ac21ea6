//! # leve
//!
//! Extraction des bornes d'un plan de levé topographique à partir du texte
//! reconnu (OCR), et construction du polygone de la parcelle.
//!
//! ## Features
//!
//! - Normalisation des confusions de reconnaissance (`O`/`0`, `Bl`/`B1`, ...)
//! - Extraction pilotée par une table de motifs (explicite, collé, implicite, repli)
//! - Consensus multi-moteurs avec départage par confiance, motif et historique
//! - Audit de séquence (bornes manquantes, doublons, ordre)
//! - Polygone fermé, aire, périmètre, centroïde et contrôle de simplicité
//!
//! ## Usage
//!
//! ```rust,ignore
//! use leve::{extract, ExtractionOptions, PolygonBuilder, RecognizedText};
//!
//! let sources = vec![RecognizedText::new("tesseract", text)];
//! let outcome = extract(&sources, &ExtractionOptions::default())?;
//! println!("{}", outcome.sequence.message);
//!
//! let parcel = PolygonBuilder::default().build(&outcome.resolution.points)?;
//! println!("Surface: {:.2} m²", parcel.area);
//! ```

pub mod consensus;
pub mod error;
pub mod geometry;
pub mod normalize;
pub mod parser;
pub mod sequence;
pub mod types;

pub use consensus::{ConsensusResolver, Resolution};
pub use error::LeveError;
pub use geometry::{InferencePolicy, Parcel, PolygonBuilder};
pub use parser::{CandidateExtractor, Extraction};
pub use sequence::{SequenceReport, SequenceStatus};
pub use types::{
    BorneId, BoundaryPoint, BoundarySet, CoordinateBounds, OriginPattern, ParcelStatus,
    RecognizedText,
};

use std::collections::HashMap;

/// Paramètres de l'extraction
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    pub bounds: CoordinateBounds,
    pub tolerance: f64,
    pub backend_confidence: HashMap<String, f64>,
    pub inference: InferencePolicy,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            bounds: CoordinateBounds::default(),
            tolerance: consensus::DEFAULT_TOLERANCE,
            backend_confidence: HashMap::new(),
            inference: InferencePolicy::default(),
        }
    }
}

/// Résultat complet de l'extraction
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub extractions: Vec<Extraction>,
    pub resolution: Resolution,
    pub sequence: SequenceReport,
}

impl ExtractionOutcome {
    /// Correspondances brutes sur toutes les sources, rejets compris
    pub fn matched(&self) -> usize {
        self.extractions.iter().map(|e| e.matched).sum()
    }

    pub fn rejected(&self) -> usize {
        self.extractions.iter().map(|e| e.rejected).sum()
    }
}

/// Extrait, résout et audite les bornes de plusieurs sources.
///
/// # Errors
///
/// Retourne `LeveError::NoCandidatesFound` si aucune source ne fournit de borne.
pub fn extract(
    sources: &[RecognizedText],
    options: &ExtractionOptions,
) -> Result<ExtractionOutcome, LeveError> {
    let extractor = CandidateExtractor::new(options.bounds)?;
    let extractions = extractor.extract_all(sources);

    let mut resolution = ConsensusResolver::new(options.tolerance)
        .with_backend_confidence(options.backend_confidence.clone())
        .resolve(&extractions)?;

    // L'audit porte sur les bornes lues, avant toute déduction
    let sequence = sequence::validate(&resolution.points);
    resolution.points = geometry::inference::apply(&resolution.points, &options.inference);

    Ok(ExtractionOutcome {
        extractions,
        resolution,
        sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_two_backends() {
        let sources = vec![
            RecognizedText::new("a", "B1 401374.38 712334.71 B2 401378.12 712287.17"),
            RecognizedText::new("b", "B2 401378.10 712287.20 B3 401353.24 712284.56"),
        ];
        let outcome = extract(&sources, &ExtractionOptions::default()).unwrap();
        assert_eq!(outcome.resolution.points.len(), 3);
        assert_eq!(outcome.matched(), 4);
        assert_eq!(outcome.sequence.status, SequenceStatus::Perfect);
    }

    #[test]
    fn test_extract_nothing() {
        let sources = vec![RecognizedText::new("a", "illisible")];
        let result = extract(&sources, &ExtractionOptions::default());
        assert!(matches!(
            result,
            Err(LeveError::NoCandidatesFound { sources: 1 })
        ));
    }
}
