//! Bornes déduites par interpolation (optionnel, toujours marqué `inferred`)
//!
//! Une borne manquante située entre deux bornes lues est placée par
//! interpolation linéaire selon son rang. Les bornes déduites n'entrent
//! dans le polygone que si la politique l'autorise.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{BorneId, BoundaryPoint, BoundarySet, OriginPattern};

/// Confiance attribuée à une borne déduite
pub const INFERRED_CONFIDENCE: f64 = 0.3;

/// Nom de source des bornes déduites
pub const INFERENCE_SOURCE: &str = "inference";

/// Politique de déduction des bornes manquantes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferencePolicy {
    /// Active la déduction
    #[serde(default)]
    pub enabled: bool,
    /// Autorise les bornes déduites dans le polygone
    #[serde(default)]
    pub allow_in_geometry: bool,
    /// Part minimale de bornes lues dans l'anneau
    #[serde(default = "default_min_ratio")]
    pub min_recognized_ratio: f64,
}

fn default_min_ratio() -> f64 {
    1.0
}

impl Default for InferencePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_in_geometry: false,
            min_recognized_ratio: default_min_ratio(),
        }
    }
}

/// Déduit les bornes manquantes entre deux bornes lues
pub fn infer_missing(set: &BoundarySet) -> Vec<BoundaryPoint> {
    let recognized: Vec<&BoundaryPoint> = set.points().filter(|p| !p.inferred).collect();
    let mut inferred = Vec::new();

    for pair in recognized.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let span = b.id.number() - a.id.number();
        if span < 2 {
            continue;
        }
        for k in (a.id.number() + 1)..b.id.number() {
            let t = (k - a.id.number()) as f64 / span as f64;
            let id = BorneId(k);
            if set.contains(id) {
                continue;
            }
            debug!(borne = %id, between = %a.id, and = %b.id, "Inferring missing boundary point");
            inferred.push(BoundaryPoint {
                id,
                x: a.x + t * (b.x - a.x),
                y: a.y + t * (b.y - a.y),
                confidence: INFERRED_CONFIDENCE,
                origin_pattern: OriginPattern::GeometricInference,
                source_backend: INFERENCE_SOURCE.to_string(),
                inferred: true,
            });
        }
    }

    inferred
}

/// Applique la politique: retourne l'ensemble complété si la déduction est active
pub fn apply(set: &BoundarySet, policy: &InferencePolicy) -> BoundarySet {
    if !policy.enabled {
        return set.clone();
    }
    let mut completed = set.clone();
    for point in infer_missing(set) {
        completed.insert(point);
    }
    completed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recognized(n: u32, x: f64, y: f64) -> BoundaryPoint {
        BoundaryPoint {
            id: BorneId(n),
            x,
            y,
            confidence: 1.0,
            origin_pattern: OriginPattern::ExplicitNormal,
            source_backend: "test".to_string(),
            inferred: false,
        }
    }

    #[test]
    fn test_midpoint_for_single_gap() {
        let set: BoundarySet = vec![
            recognized(1, 400_000.0, 700_000.0),
            recognized(3, 400_100.0, 700_200.0),
        ]
        .into_iter()
        .collect();

        let inferred = infer_missing(&set);
        assert_eq!(inferred.len(), 1);
        let p = &inferred[0];
        assert_eq!(p.id, BorneId(2));
        assert_eq!(p.x, 400_050.0);
        assert_eq!(p.y, 700_100.0);
        assert!(p.inferred);
        assert_eq!(p.origin_pattern, OriginPattern::GeometricInference);
        assert_eq!(p.confidence, INFERRED_CONFIDENCE);
    }

    #[test]
    fn test_leading_gap_not_inferred() {
        let set: BoundarySet = vec![
            recognized(2, 400_000.0, 700_000.0),
            recognized(3, 400_100.0, 700_200.0),
        ]
        .into_iter()
        .collect();
        assert!(infer_missing(&set).is_empty());
    }

    #[test]
    fn test_disabled_policy_is_identity() {
        let set: BoundarySet = vec![
            recognized(1, 400_000.0, 700_000.0),
            recognized(4, 400_300.0, 700_000.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(apply(&set, &InferencePolicy::default()).len(), 2);

        let policy = InferencePolicy {
            enabled: true,
            ..Default::default()
        };
        let completed = apply(&set, &policy);
        assert_eq!(completed.len(), 4);
        assert_eq!(completed.inferred_count(), 2);
    }
}
