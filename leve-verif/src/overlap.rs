//! Analyse des chevauchements avec les couches de référence
//!
//! Deux régimes:
//! - proportionnel: la sévérité suit le pourcentage de chevauchement
//!   (`critical` ≥ 50, `high` ≥ 20, `medium` ≥ 5, `low` ≥ 1), sous le seuil de
//!   signalement de la couche le résultat est écarté;
//! - tolérance zéro: tout chevauchement au-delà d'un seuil quasi nul est
//!   signalé avec la sévérité de base de la couche.
//!
//! Chaque couche est interrogée sous un délai maximal; une couche en échec est
//! ignorée sans interrompre l'analyse.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use geo::Polygon;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use leve::Parcel;

use crate::config::{LayerConfig, LayerRole, OverlapRegime};
use crate::error::PipelineError;
use crate::spatial::{OverlapResult, ReferenceObject, SpatialQuery};

/// Sévérité d'un conflit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Seuils du régime proportionnel, du plus sévère au moins sévère
pub const PROPORTIONAL_THRESHOLDS: [(f64, Severity); 4] = [
    (50.0, Severity::Critical),
    (20.0, Severity::High),
    (5.0, Severity::Medium),
    (1.0, Severity::Low),
];

/// Sévérité d'un pourcentage selon la table proportionnelle
pub fn proportional_severity(percentage: f64) -> Option<Severity> {
    PROPORTIONAL_THRESHOLDS
        .iter()
        .find(|(threshold, _)| percentage >= *threshold)
        .map(|(_, severity)| *severity)
}

/// Classe un chevauchement pour une couche; `None` si non signalé
pub fn classify(layer: &LayerConfig, percentage: f64) -> Option<Severity> {
    match layer.regime {
        OverlapRegime::Proportional => {
            if percentage < layer.min_report {
                return None;
            }
            Some(proportional_severity(percentage).unwrap_or(Severity::Low))
        }
        OverlapRegime::ZeroTolerance => {
            if percentage <= layer.min_report {
                return None;
            }
            let escalated = layer
                .escalate_above
                .is_some_and(|threshold| percentage > threshold);
            if escalated {
                Some(Severity::Critical)
            } else {
                Some(layer.base_severity.unwrap_or(Severity::Critical))
            }
        }
    }
}

/// Chevauchement retenu et sa sévérité
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedOverlap {
    #[serde(flatten)]
    pub overlap: OverlapResult,
    pub severity: Severity,
}

/// Résultats retenus pour une couche
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerFindings {
    pub layer: String,
    pub role: LayerRole,
    pub regime: OverlapRegime,
    pub overlaps: Vec<ClassifiedOverlap>,
    /// Objets contenant entièrement la parcelle
    pub within: Vec<ReferenceObject>,
    /// Intersections sous le seuil de signalement
    pub discarded: usize,
}

/// Couche ignorée suite à une erreur ou un dépassement de délai
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedLayer {
    pub layer: String,
    pub reason: String,
}

/// Résultat de l'analyse de toutes les couches
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlapOutcome {
    pub findings: Vec<LayerFindings>,
    pub skipped: Vec<SkippedLayer>,
    /// Parcelles existantes proches (contrôle de cohérence cadastrale)
    pub nearby: Vec<ReferenceObject>,
    /// Vrai si l'analyse a porté sur l'enveloppe convexe
    pub convex_hull_used: bool,
    pub elapsed_seconds: f64,
}

impl OverlapOutcome {
    pub fn layers_checked(&self) -> Vec<String> {
        self.findings.iter().map(|f| f.layer.clone()).collect()
    }

    pub fn layers_skipped(&self) -> Vec<String> {
        self.skipped.iter().map(|s| s.layer.clone()).collect()
    }
}

/// Analyse des chevauchements sur les couches configurées
#[derive(Clone)]
pub struct OverlapAnalyzer {
    service: Arc<dyn SpatialQuery>,
    layers: Arc<Vec<LayerConfig>>,
    timeout: Duration,
    nearby_distance: f64,
}

impl OverlapAnalyzer {
    pub fn new(
        service: Arc<dyn SpatialQuery>,
        layers: Vec<LayerConfig>,
        timeout: Duration,
        nearby_distance: f64,
    ) -> Self {
        Self {
            service,
            layers: Arc::new(layers),
            timeout,
            nearby_distance,
        }
    }

    pub fn layers(&self) -> &[LayerConfig] {
        &self.layers
    }

    /// Interroge toutes les couches en parallèle
    pub async fn analyze(&self, parcel: &Parcel) -> OverlapOutcome {
        let started = Instant::now();
        let polygon = parcel.analysis_polygon();
        let convex_hull_used = !parcel.is_simple;
        if convex_hull_used {
            info!("Parcel ring is not simple, analysing its convex hull");
        }

        let queries = self
            .layers
            .iter()
            .map(|layer| self.query_layer(&polygon, layer));
        let results = join_all(queries).await;

        let mut outcome = OverlapOutcome {
            convex_hull_used,
            ..Default::default()
        };
        for (layer, result) in self.layers.iter().zip(results) {
            match result {
                Ok(findings) => outcome.findings.push(findings),
                Err(e) => {
                    warn!(layer = %layer.name, error = %e, "Layer skipped");
                    outcome.skipped.push(SkippedLayer {
                        layer: layer.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        outcome.nearby = self.nearby_parcels(&polygon).await;
        outcome.elapsed_seconds = started.elapsed().as_secs_f64();

        info!(
            checked = outcome.findings.len(),
            skipped = outcome.skipped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Overlap analysis complete"
        );
        outcome
    }

    /// Requêtes d'une couche sous le délai maximal
    async fn query_layer(
        &self,
        polygon: &Polygon,
        layer: &LayerConfig,
    ) -> Result<LayerFindings, PipelineError> {
        let queries = async {
            let hits = self.service.intersects(polygon, layer, layer.buffer).await?;
            let within = self.service.within(polygon, layer).await?;
            anyhow::Ok((hits, within))
        };

        let (hits, within) = match tokio::time::timeout(self.timeout, queries).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => return Err(PipelineError::layer_failure(&layer.name, format!("{:#}", e))),
            Err(_) => {
                return Err(PipelineError::layer_failure(
                    &layer.name,
                    format!("timed out after {:?}", self.timeout),
                ))
            }
        };

        let total = hits.len();
        let overlaps: Vec<ClassifiedOverlap> = hits
            .into_iter()
            .filter_map(|overlap| {
                classify(layer, overlap.overlap_percentage)
                    .map(|severity| ClassifiedOverlap { overlap, severity })
            })
            .collect();

        debug!(
            layer = %layer.name,
            intersections = total,
            reported = overlaps.len(),
            within = within.len(),
            "Layer analysed"
        );

        Ok(LayerFindings {
            layer: layer.name.clone(),
            role: layer.role,
            regime: layer.regime,
            discarded: total - overlaps.len(),
            overlaps,
            within,
        })
    }

    /// Voisinage sur la couche des parcelles existantes; vide en cas d'échec
    async fn nearby_parcels(&self, polygon: &Polygon) -> Vec<ReferenceObject> {
        let Some(layer) = self
            .layers
            .iter()
            .find(|l| l.role == LayerRole::ExistingParcels)
        else {
            return Vec::new();
        };

        let query = self.service.nearby(polygon, layer, self.nearby_distance);
        match tokio::time::timeout(self.timeout, query).await {
            Ok(Ok(objects)) => objects,
            Ok(Err(e)) => {
                warn!(layer = %layer.name, error = %e, "Nearby query failed, cadastral check skipped");
                Vec::new()
            }
            Err(_) => {
                warn!(layer = %layer.name, "Nearby query timed out, cadastral check skipped");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::LayerStatus;
    use async_trait::async_trait;
    use leve::{BorneId, BoundaryPoint, BoundarySet, OriginPattern, PolygonBuilder};

    /// Service qui ne répond jamais dans les délais
    struct StalledLayers;

    #[async_trait]
    impl SpatialQuery for StalledLayers {
        async fn intersects(
            &self,
            _polygon: &Polygon,
            _layer: &LayerConfig,
            _buffer: f64,
        ) -> anyhow::Result<Vec<OverlapResult>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }

        async fn within(
            &self,
            _polygon: &Polygon,
            _layer: &LayerConfig,
        ) -> anyhow::Result<Vec<ReferenceObject>> {
            Ok(Vec::new())
        }

        async fn nearby(
            &self,
            _polygon: &Polygon,
            _layer: &LayerConfig,
            _distance: f64,
        ) -> anyhow::Result<Vec<ReferenceObject>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }

        async fn layer_status(&self, layer: &LayerConfig) -> anyhow::Result<LayerStatus> {
            Ok(LayerStatus {
                name: layer.name.clone(),
                available: true,
                feature_count: None,
            })
        }
    }

    fn square_parcel() -> Parcel {
        let mut set = BoundarySet::new();
        for (n, (x, y)) in [(0.0, 0.0), (50.0, 0.0), (50.0, 50.0), (0.0, 50.0)]
            .into_iter()
            .enumerate()
        {
            set.insert(BoundaryPoint {
                id: BorneId(n as u32 + 1),
                x: 400_000.0 + x,
                y: 700_000.0 + y,
                confidence: 1.0,
                origin_pattern: OriginPattern::ExplicitNormal,
                source_backend: "text".to_string(),
                inferred: false,
            });
        }
        PolygonBuilder::default().build(&set).unwrap()
    }

    fn layer(regime: OverlapRegime, min_report: f64) -> LayerConfig {
        LayerConfig {
            name: "test".to_string(),
            table: "test".to_string(),
            file: None,
            role: LayerRole::ExistingParcels,
            regime,
            min_report,
            base_severity: None,
            escalate_above: None,
            buffer: 0.0,
            id_property: "nup".to_string(),
        }
    }

    #[test]
    fn test_proportional_thresholds() {
        let parcels = layer(OverlapRegime::Proportional, 1.0);
        assert_eq!(classify(&parcels, 0.9), None);
        assert_eq!(classify(&parcels, 1.0), Some(Severity::Low));
        assert_eq!(classify(&parcels, 4.99), Some(Severity::Low));
        assert_eq!(classify(&parcels, 5.0), Some(Severity::Medium));
        assert_eq!(classify(&parcels, 20.0), Some(Severity::High));
        assert_eq!(classify(&parcels, 50.0), Some(Severity::Critical));
        assert_eq!(classify(&parcels, 100.0), Some(Severity::Critical));
    }

    #[test]
    fn test_association_min_report() {
        let aif = layer(OverlapRegime::Proportional, 5.0);
        assert_eq!(classify(&aif, 4.0), None);
        assert_eq!(classify(&aif, 5.0), Some(Severity::Medium));
    }

    #[test]
    fn test_zero_tolerance_override() {
        let mut dpl = layer(OverlapRegime::ZeroTolerance, 0.1);
        dpl.base_severity = Some(Severity::Critical);
        assert_eq!(classify(&dpl, 0.1), None);
        assert_eq!(classify(&dpl, 0.2), Some(Severity::Critical));

        let mut protected = layer(OverlapRegime::ZeroTolerance, 0.1);
        protected.base_severity = Some(Severity::High);
        protected.escalate_above = Some(10.0);
        assert_eq!(classify(&protected, 0.2), Some(Severity::High));
        assert_eq!(classify(&protected, 10.0), Some(Severity::High));
        assert_eq!(classify(&protected, 10.5), Some(Severity::Critical));
    }

    #[tokio::test]
    async fn test_stalled_layers_are_skipped() {
        let mut parcels = layer(OverlapRegime::Proportional, 1.0);
        parcels.name = "parcelles".to_string();
        let mut dpl = layer(OverlapRegime::ZeroTolerance, 0.1);
        dpl.name = "dpl".to_string();
        dpl.role = LayerRole::PublicDomainLagoon;
        let analyzer = OverlapAnalyzer::new(
            Arc::new(StalledLayers),
            vec![parcels, dpl],
            Duration::from_millis(50),
            50.0,
        );

        let started = Instant::now();
        let outcome = analyzer.analyze(&square_parcel()).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(outcome.findings.is_empty());
        assert_eq!(outcome.layers_skipped(), vec!["parcelles", "dpl"]);
        assert!(outcome.skipped.iter().all(|s| s.reason.contains("timed out")));
        assert!(outcome.nearby.is_empty());
        assert!(!outcome.convex_hull_used);
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
    }
}
