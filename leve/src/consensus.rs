//! Résolution par consensus des bornes candidates issues de plusieurs moteurs

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::parser::Extraction;
use crate::types::{BorneId, BoundaryPoint, BoundarySet};
use crate::LeveError;

/// Tolérance d'accord par défaut (unités de la projection)
pub const DEFAULT_TOLERANCE: f64 = 5.0;

/// Accord des candidates pour une borne
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Support {
    pub candidates: usize,
    /// Candidates dans la tolérance de la retenue (elle exclue)
    pub agreeing: usize,
    /// Candidates au-delà de la tolérance
    pub dissenting: usize,
}

/// Résultat de la résolution
#[derive(Debug, Clone)]
pub struct Resolution {
    pub points: BoundarySet,
    pub support: BTreeMap<BorneId, Support>,
    pub candidate_count: usize,
}

impl Resolution {
    /// Bornes sur lesquelles les candidates divergent
    pub fn disputed(&self) -> Vec<BorneId> {
        self.support
            .iter()
            .filter(|(_, s)| s.dissenting > 0)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Fusionne les candidates en une borne par numéro
#[derive(Debug, Clone)]
pub struct ConsensusResolver {
    tolerance: f64,
    backend_confidence: HashMap<String, f64>,
}

impl Default for ConsensusResolver {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl ConsensusResolver {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            backend_confidence: HashMap::new(),
        }
    }

    /// Confiance historique moyenne par moteur (départage)
    pub fn with_backend_confidence(mut self, history: HashMap<String, f64>) -> Self {
        self.backend_confidence = history;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Résout les extractions de toutes les sources (ordre des sources conservé)
    pub fn resolve(&self, extractions: &[Extraction]) -> Result<Resolution, LeveError> {
        let candidates: Vec<BoundaryPoint> = extractions
            .iter()
            .flat_map(|e| e.candidates.iter().cloned())
            .collect();
        self.resolve_candidates(&candidates, extractions.len())
    }

    /// Résout une liste de candidates déjà à plat, dans l'ordre de lecture
    pub fn resolve_candidates(
        &self,
        candidates: &[BoundaryPoint],
        sources: usize,
    ) -> Result<Resolution, LeveError> {
        if candidates.is_empty() {
            return Err(LeveError::NoCandidatesFound { sources });
        }

        let scores = self.backend_scores(candidates);

        let mut groups: BTreeMap<BorneId, Vec<&BoundaryPoint>> = BTreeMap::new();
        let mut first_seen: Vec<BorneId> = Vec::new();
        for candidate in candidates {
            let group = groups.entry(candidate.id).or_default();
            if group.is_empty() {
                first_seen.push(candidate.id);
            }
            group.push(candidate);
        }

        let mut winners: HashMap<BorneId, BoundaryPoint> = HashMap::new();
        let mut support = BTreeMap::new();

        for (id, mut group) in groups {
            group.sort_by(|a, b| rank(a, b, &scores));
            let winner = group[0];

            let agreeing = group[1..]
                .iter()
                .filter(|c| c.distance(winner) <= self.tolerance)
                .count();
            let dissenting = group.len() - 1 - agreeing;

            if dissenting > 0 {
                warn!(
                    borne = %id,
                    candidates = group.len(),
                    dissenting,
                    kept_backend = %winner.source_backend,
                    kept_confidence = winner.confidence,
                    "Candidates disagree beyond tolerance"
                );
            } else {
                debug!(borne = %id, candidates = group.len(), "Candidates agree");
            }

            support.insert(
                id,
                Support {
                    candidates: group.len(),
                    agreeing,
                    dissenting,
                },
            );
            winners.insert(id, winner.clone());
        }

        let mut points = BoundarySet::new();
        for id in first_seen {
            if let Some(point) = winners.remove(&id) {
                points.insert(point);
            }
        }

        Ok(Resolution {
            points,
            support,
            candidate_count: candidates.len(),
        })
    }

    /// Score de chaque moteur: historique configuré, sinon moyenne du lot
    fn backend_scores(&self, candidates: &[BoundaryPoint]) -> HashMap<String, f64> {
        let mut sums: HashMap<&str, (f64, usize)> = HashMap::new();
        for c in candidates {
            let entry = sums.entry(c.source_backend.as_str()).or_insert((0.0, 0));
            entry.0 += c.confidence;
            entry.1 += 1;
        }

        sums.into_iter()
            .map(|(backend, (sum, count))| {
                let score = self
                    .backend_confidence
                    .get(backend)
                    .copied()
                    .unwrap_or(sum / count as f64);
                (backend.to_string(), score)
            })
            .collect()
    }
}

/// Ordre de préférence: confiance, motif, moteur, puis nom du moteur
fn rank(a: &BoundaryPoint, b: &BoundaryPoint, scores: &HashMap<String, f64>) -> Ordering {
    let score = |p: &BoundaryPoint| scores.get(&p.source_backend).copied().unwrap_or(0.0);

    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.origin_pattern.priority().cmp(&b.origin_pattern.priority()))
        .then_with(|| score(b).total_cmp(&score(a)))
        .then_with(|| a.source_backend.cmp(&b.source_backend))
}
