//! Rapport de traitement d'un levé
//!
//! Le rapport contient toujours le journal des étapes, y compris en cas
//! d'échec, pour qu'un relecteur voie quelle étape a échoué et pourquoi.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use leve::{BoundaryPoint, ParcelStatus, SequenceReport};

use crate::export::geojson::geometry_value;
use crate::export::{conflict_features, feature_collection, parcel_feature};
use crate::overlap::Severity;
use crate::pipeline::{LogEntry, ProcessRun, ProcessingStatus};
use crate::reproject::Reprojector;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    /// Correspondances brutes sur toutes les sources
    pub coordinates_extracted: usize,
    /// Bornes retenues après consensus
    pub coordinates_valid: usize,
    pub confidence_score: f64,
    pub coordinates: Vec<BoundaryPoint>,
    pub backends: Vec<String>,
    pub disputed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelReport {
    pub area: f64,
    pub perimeter: f64,
    pub status: ParcelStatus,
    pub geometry: Value,
    pub centroid: (f64, f64),
    pub is_simple: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialAnalysis {
    pub total_conflicts: usize,
    pub critical_alerts: usize,
    /// Conflits de sévérité `high` ou `medium`
    pub warnings: usize,
    pub recommendations: Vec<String>,
    pub layers_checked: Vec<String>,
    pub layers_skipped: Vec<String>,
}

/// Rapport JSON d'une exécution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReport {
    pub upload_id: String,
    pub status: ProcessingStatus,
    pub processing_time_seconds: f64,
    pub document_checksum: Option<String>,
    pub ocr_result: Option<OcrResult>,
    pub sequence: Option<SequenceReport>,
    pub parcel: Option<ParcelReport>,
    pub spatial_analysis: Option<SpatialAnalysis>,
    pub conflicts: Value,
    pub processing_log: Vec<LogEntry>,
    pub error: Option<String>,
}

impl ProcessReport {
    /// Construit le rapport, géométries exprimées dans la projection cible
    pub fn from_run(run: &ProcessRun, reprojector: &Reprojector) -> Result<Self> {
        let epsg = reprojector.target_epsg();

        let ocr_result = run.extraction.as_ref().map(|e| OcrResult {
            coordinates_extracted: e.matched,
            coordinates_valid: e.points.len(),
            confidence_score: e.confidence_score(),
            coordinates: e.points.clone(),
            backends: e.backends.clone(),
            disputed: e.disputed.clone(),
        });

        let parcel = match run.parcel() {
            Some(parcel) => {
                let feature = parcel_feature(&run.upload.id, parcel).reprojected(reprojector)?;
                Some(ParcelReport {
                    area: parcel.area,
                    perimeter: parcel.perimeter,
                    status: parcel.status,
                    geometry: geometry_value(&feature.geometry)?,
                    centroid: parcel.centroid,
                    is_simple: parcel.is_simple,
                })
            }
            None => None,
        };

        let (spatial_analysis, conflicts) = match &run.verification {
            Some(v) => {
                let features: Vec<_> = conflict_features(v)
                    .iter()
                    .map(|f| f.reprojected(reprojector))
                    .collect::<Result<_>>()?;
                let analysis = SpatialAnalysis {
                    total_conflicts: v.conflict_count,
                    critical_alerts: v.count_severity(Severity::Critical),
                    warnings: v.count_severity(Severity::High) + v.count_severity(Severity::Medium),
                    recommendations: v.recommendations.clone(),
                    layers_checked: v.layers_checked.clone(),
                    layers_skipped: v.layers_skipped.clone(),
                };
                (Some(analysis), feature_collection(&features, epsg)?)
            }
            None => (None, feature_collection(&[], epsg)?),
        };

        Ok(Self {
            upload_id: run.upload.id.clone(),
            status: run.upload.status,
            processing_time_seconds: run.processing_time_seconds,
            document_checksum: run.upload.checksum.clone(),
            ocr_result,
            sequence: run.extraction.as_ref().map(|e| e.sequence.clone()),
            parcel,
            spatial_analysis,
            conflicts,
            processing_log: run.upload.log.clone(),
            error: run.upload.error.clone(),
        })
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("SURVEY VERIFICATION REPORT - {}", self.upload_id);
        println!("{}", "=".repeat(60));

        println!("\nStatus: {}", self.status);
        println!("Duration: {:.2}s", self.processing_time_seconds);
        if let Some(checksum) = &self.document_checksum {
            println!("Document: {}", checksum);
        }

        if let Some(ocr) = &self.ocr_result {
            println!("\n--- COORDINATES ---");
            println!(
                "{} matched, {} boundary points kept (confidence {:.2})",
                ocr.coordinates_extracted, ocr.coordinates_valid, ocr.confidence_score
            );
            for p in &ocr.coordinates {
                let flag = if p.inferred { " (inferred)" } else { "" };
                println!("  {}: {:.2} {:.2}{}", p.id, p.x, p.y, flag);
            }
            if !ocr.disputed.is_empty() {
                println!("  Disputed: {}", ocr.disputed.join(", "));
            }
        }
        if let Some(sequence) = &self.sequence {
            println!("Sequence: {}", sequence.message);
        }

        if let Some(parcel) = &self.parcel {
            println!("\n--- PARCEL ---");
            println!(
                "Area: {:.2} m², perimeter: {:.2} m, status: {}",
                parcel.area,
                parcel.perimeter,
                parcel.status.as_str()
            );
            if !parcel.is_simple {
                println!("  Ring is not simple, analysed on its convex hull");
            }
        }

        if let Some(analysis) = &self.spatial_analysis {
            println!("\n--- SPATIAL ANALYSIS ---");
            println!(
                "{} conflicts, {} critical, {} warnings",
                analysis.total_conflicts, analysis.critical_alerts, analysis.warnings
            );
            if !analysis.layers_skipped.is_empty() {
                println!("  Layers skipped: {}", analysis.layers_skipped.join(", "));
            }
            for r in &analysis.recommendations {
                println!("  - {}", r);
            }
        }

        if let Some(error) = &self.error {
            println!("\n--- ERROR ---");
            println!("  {}", error);
            println!("\n--- LOG ({}) ---", self.processing_log.len());
            for entry in &self.processing_log {
                println!("  [{}] {}: {}", entry.timestamp.format("%H:%M:%S"), entry.step, entry.message);
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(())
    }

    /// Affichage compact pour le résumé
    pub fn summary(&self) -> String {
        match (&self.error, &self.parcel, &self.spatial_analysis) {
            (Some(error), _, _) => format!("{}: {} ({})", self.upload_id, self.status, error),
            (None, Some(parcel), Some(analysis)) => format!(
                "{}: {}, {:.2} m², {} conflicts",
                self.upload_id,
                parcel.status.as_str(),
                parcel.area,
                analysis.total_conflicts
            ),
            _ => format!("{}: {}", self.upload_id, self.status),
        }
    }
}
