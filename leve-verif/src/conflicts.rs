//! Agrégation des chevauchements en conflits et statut de la parcelle

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use leve::{Parcel, ParcelStatus};

use crate::config::{LayerConfig, LayerRole};
use crate::error::PipelineError;
use crate::overlap::{ClassifiedOverlap, OverlapOutcome, Severity};
use crate::spatial::{property_string, OverlapResult, ReferenceObject};

/// Recommandation unique d'une parcelle sans conflit
pub const SECURE_RECOMMENDATION: &str = "No conflict detected - parcel secure";

/// Au-delà de ce nombre de conflits un audit complet est recommandé
const AUDIT_THRESHOLD: usize = 3;

/// Type de conflit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    DoubleSale,
    LandAssociation,
    OverlapDpl,
    OverlapDpm,
    ProtectedArea,
    LitigationZone,
    RestrictionZone,
    CadastreDifference,
}

impl ConflictType {
    pub fn from_role(role: LayerRole) -> Self {
        match role {
            LayerRole::ExistingParcels => ConflictType::DoubleSale,
            LayerRole::LandAssociation => ConflictType::LandAssociation,
            LayerRole::PublicDomainLagoon => ConflictType::OverlapDpl,
            LayerRole::PublicDomainMaritime => ConflictType::OverlapDpm,
            LayerRole::ProtectedArea => ConflictType::ProtectedArea,
            LayerRole::Litigation => ConflictType::LitigationZone,
            LayerRole::Restriction => ConflictType::RestrictionZone,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConflictType::DoubleSale => "double_sale",
            ConflictType::LandAssociation => "land_association",
            ConflictType::OverlapDpl => "overlap_dpl",
            ConflictType::OverlapDpm => "overlap_dpm",
            ConflictType::ProtectedArea => "protected_area",
            ConflictType::LitigationZone => "litigation_zone",
            ConflictType::RestrictionZone => "restriction_zone",
            ConflictType::CadastreDifference => "cadastre_difference",
        }
    }

    fn is_public_domain(self) -> bool {
        matches!(self, ConflictType::OverlapDpl | ConflictType::OverlapDpm)
    }
}

/// Conflit détecté entre la parcelle et une couche de référence
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub layer: String,
    /// Absent pour le contrôle cadastral, qui porte sur plusieurs objets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap: Option<OverlapResult>,
    pub description: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Flags {
    pub double_sale: bool,
    pub protected_overlap: bool,
    pub restriction_overlap: bool,
    pub cadastre_inconsistency: bool,
}

/// Vérification d'une parcelle, remplacée en bloc à chaque analyse
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub parcel: Parcel,
    pub conflicts: Vec<Conflict>,
    pub conflict_count: usize,
    pub has_conflicts: bool,
    pub flags: Flags,
    pub by_type: BTreeMap<ConflictType, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    /// Descriptions des conflits critiques
    pub critical_issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub issues: Vec<String>,
    pub layers_checked: Vec<String>,
    pub layers_skipped: Vec<String>,
    /// Analyse faite sur l'enveloppe convexe d'un anneau non simple
    pub convex_hull_used: bool,
    pub within: Vec<ReferenceObject>,
    pub processing_time_seconds: f64,
}

impl Verification {
    pub fn count_severity(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }
}

/// Construit la vérification à partir des résultats de l'analyse
#[derive(Debug, Clone)]
pub struct ConflictAggregator {
    layers: Arc<Vec<LayerConfig>>,
}

impl ConflictAggregator {
    pub fn new(layers: Vec<LayerConfig>) -> Self {
        Self {
            layers: Arc::new(layers),
        }
    }

    /// # Errors
    ///
    /// `AggregationFailure` si un pourcentage de chevauchement n'est pas fini.
    pub fn aggregate(
        &self,
        mut parcel: Parcel,
        outcome: &OverlapOutcome,
    ) -> Result<Verification, PipelineError> {
        let started = Instant::now();
        let mut conflicts = Vec::new();

        for findings in &outcome.findings {
            for classified in &findings.overlaps {
                conflicts.push(overlap_conflict(findings.role, classified)?);
            }
        }

        let inconsistencies = self.cadastral_inconsistencies(&outcome.nearby);
        if inconsistencies > 0 {
            let layer = outcome
                .nearby
                .first()
                .map(|o| o.layer.clone())
                .unwrap_or_default();
            conflicts.push(Conflict {
                conflict_type: ConflictType::CadastreDifference,
                severity: Severity::Medium,
                layer,
                overlap: None,
                description: format!(
                    "CADASTRAL INCONSISTENCY: {} inconsistencies detected in the neighbourhood",
                    inconsistencies
                ),
                recommendation: "Check the numbering and consistency with the existing cadastre"
                    .to_string(),
            });
        }

        let has = |t: ConflictType| conflicts.iter().any(|c| c.conflict_type == t);
        let flags = Flags {
            double_sale: has(ConflictType::DoubleSale),
            protected_overlap: has(ConflictType::ProtectedArea),
            restriction_overlap: has(ConflictType::RestrictionZone),
            cadastre_inconsistency: inconsistencies > 0,
        };

        let mut by_type = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        for conflict in &conflicts {
            *by_type.entry(conflict.conflict_type).or_insert(0) += 1;
            *by_severity.entry(conflict.severity).or_insert(0) += 1;
        }
        let critical_issues: Vec<String> = conflicts
            .iter()
            .filter(|c| c.severity == Severity::Critical)
            .map(|c| c.description.clone())
            .collect();

        let status = derive_status(&parcel, &conflicts);
        parcel.status = status;
        let issues = issues(&conflicts);
        let recommendations = recommendations(&conflicts, &flags);

        info!(
            conflicts = conflicts.len(),
            status = status.as_str(),
            double_sale = flags.double_sale,
            "Verification built"
        );

        let conflict_count = conflicts.len();
        Ok(Verification {
            parcel,
            conflict_count,
            has_conflicts: conflict_count > 0,
            conflicts,
            flags,
            by_type,
            by_severity,
            critical_issues,
            recommendations,
            issues,
            layers_checked: outcome.layers_checked(),
            layers_skipped: outcome.layers_skipped(),
            convex_hull_used: outcome.convex_hull_used,
            within: outcome
                .findings
                .iter()
                .flat_map(|f| f.within.iter().cloned())
                .collect(),
            processing_time_seconds: outcome.elapsed_seconds + started.elapsed().as_secs_f64(),
        })
    }

    /// Objets voisins dont l'identifiant est absent, vide ou partagé
    fn cadastral_inconsistencies(&self, nearby: &[ReferenceObject]) -> usize {
        let ids: Vec<Option<String>> = nearby
            .iter()
            .map(|object| {
                let id_property = self
                    .layers
                    .iter()
                    .find(|l| l.name == object.layer)
                    .map(|l| l.id_property.as_str())
                    .unwrap_or("nup");
                property_string(&object.properties, id_property)
            })
            .collect();

        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        for id in ids.iter().flatten() {
            *occurrences.entry(id.as_str()).or_insert(0) += 1;
        }

        let count = ids
            .iter()
            .filter(|id| match id {
                None => true,
                Some(id) => occurrences.get(id.as_str()).copied().unwrap_or(0) > 1,
            })
            .count();
        debug!(nearby = nearby.len(), inconsistencies = count, "Cadastral check");
        count
    }
}

fn overlap_conflict(
    role: LayerRole,
    classified: &ClassifiedOverlap,
) -> Result<Conflict, PipelineError> {
    let overlap = &classified.overlap;
    let pct = overlap.overlap_percentage;
    if !pct.is_finite() || !overlap.intersection_area.is_finite() {
        return Err(PipelineError::AggregationFailure(format!(
            "non-finite overlap with {} object {}",
            overlap.layer, overlap.object_id
        )));
    }

    let field = |key: &str| overlap.property(key).unwrap_or_else(|| "N/A".to_string());
    let (description, recommendation) = match role {
        LayerRole::ExistingParcels => {
            let (nup, tf) = (field("nup"), field("num_tf"));
            let recommendation = if pct > 50.0 {
                format!(
                    "URGENT - Major conflict with TF #{} (NUP: {}). Suspend any transaction and verify property rights.",
                    tf, nup
                )
            } else if pct > 20.0 {
                format!("CAUTION - Significant overlap with TF #{}. Legal verification recommended.", tf)
            } else {
                format!("Minor overlap with TF #{}. Check the cadastral boundaries.", tf)
            };
            (
                format!(
                    "DOUBLE SALE ALERT: {:.1}% overlap with parcel {} (TF #{})",
                    pct, nup, tf
                ),
                recommendation,
            )
        }
        LayerRole::LandAssociation => (
            format!(
                "LAND ASSOCIATION CONFLICT: {:.1}% overlap with land interest association TF #{}",
                pct,
                field("num_tf")
            ),
            "Check subdivision rights and the association's authorisation".to_string(),
        ),
        LayerRole::PublicDomainLagoon => (
            format!("ILLEGAL OCCUPATION: construction on the lagoon public domain ({:.1}%)", pct),
            "FORMAL PROHIBITION - Uninhabitable zone around water bodies".to_string(),
        ),
        LayerRole::PublicDomainMaritime => (
            format!("ILLEGAL OCCUPATION: construction on the maritime public domain ({:.1}%)", pct),
            "FORMAL PROHIBITION - Uninhabitable maritime zone".to_string(),
        ),
        LayerRole::ProtectedArea => (
            format!(
                "PROTECTED AREA: encroachment on {} ({:.1}%)",
                overlap
                    .property("designation")
                    .unwrap_or_else(|| "protected area".to_string()),
                pct
            ),
            "Environmental authorisation required - Consult the conservation services".to_string(),
        ),
        LayerRole::Litigation => (
            format!("LITIGATION ZONE: parcel inside a disputed zone ({:.1}%)", pct),
            "CAUTION - Zone under litigation. Check the legal status before any transaction"
                .to_string(),
        ),
        LayerRole::Restriction => (
            format!(
                "RESTRICTED ZONE: overlap with {} ({:.1}%)",
                overlap
                    .property("designation")
                    .unwrap_or_else(|| "a planning restriction".to_string()),
                pct
            ),
            "Check the planning constraints with the urban planning authority".to_string(),
        ),
    };

    Ok(Conflict {
        conflict_type: ConflictType::from_role(role),
        severity: classified.severity,
        layer: overlap.layer.clone(),
        overlap: Some(overlap.clone()),
        description,
        recommendation,
    })
}

/// Statut de la parcelle selon la gravité des conflits
pub fn derive_status(parcel: &Parcel, conflicts: &[Conflict]) -> ParcelStatus {
    if !parcel.is_simple {
        return ParcelStatus::Invalid;
    }
    if conflicts.is_empty() {
        ParcelStatus::Secure
    } else if conflicts.iter().any(|c| c.severity >= Severity::High) {
        ParcelStatus::Conflict
    } else {
        ParcelStatus::Warning
    }
}

fn issues(conflicts: &[Conflict]) -> Vec<String> {
    if conflicts.is_empty() {
        return Vec::new();
    }
    let count = |s: Severity| conflicts.iter().filter(|c| c.severity == s).count();
    let (critical, high) = (count(Severity::Critical), count(Severity::High));

    if critical > 0 {
        vec![
            format!("{} critical conflict(s) detected", critical),
            "Immediate intervention required".to_string(),
        ]
    } else if high > 0 {
        vec![
            format!("{} major conflict(s) detected", high),
            "Thorough checks required".to_string(),
        ]
    } else {
        vec![
            format!("{} minor conflict(s) detected", conflicts.len()),
            "Checks recommended".to_string(),
        ]
    }
}

/// Recommandations ordonnées à partir des indicateurs
fn recommendations(conflicts: &[Conflict], flags: &Flags) -> Vec<String> {
    if conflicts.is_empty() {
        return vec![SECURE_RECOMMENDATION.to_string()];
    }
    let has = |f: fn(ConflictType) -> bool| conflicts.iter().any(|c| f(c.conflict_type));

    let mut out = Vec::new();
    if flags.double_sale {
        out.push("HIGH PRIORITY: Verify property rights and the transaction history".to_string());
    }
    if flags.protected_overlap {
        out.push("Consult the environmental services for authorisation".to_string());
    }
    if has(ConflictType::is_public_domain) {
        out.push("PROHIBITION: Construction on public domain - Revise the layout".to_string());
    }
    if has(|t| t == ConflictType::LitigationZone) {
        out.push("Check the legal status - Zone under litigation".to_string());
    }
    if flags.restriction_overlap {
        out.push("Consult the planning authority - Restricted zone".to_string());
    }
    if conflicts.len() > AUDIT_THRESHOLD {
        out.push("Full audit recommended - Multiple conflicts detected".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverlapRegime;
    use crate::overlap::LayerFindings;
    use leve::{BorneId, BoundaryPoint, BoundarySet, OriginPattern, PolygonBuilder};
    use serde_json::{json, Map, Value};

    fn square_parcel() -> Parcel {
        let mut set = BoundarySet::new();
        for (n, (x, y)) in [(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]
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

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn findings(layer: &str, role: LayerRole, hits: &[(f64, Severity)]) -> LayerFindings {
        LayerFindings {
            layer: layer.to_string(),
            role,
            regime: OverlapRegime::Proportional,
            overlaps: hits
                .iter()
                .enumerate()
                .map(|(i, (pct, severity))| ClassifiedOverlap {
                    overlap: OverlapResult {
                        layer: layer.to_string(),
                        object_id: format!("obj-{}", i),
                        intersection_area: pct * 100.0,
                        overlap_percentage: *pct,
                        properties: props(json!({"nup": format!("BJ-{}", i), "num_tf": "5521"})),
                        geometry: None,
                    },
                    severity: *severity,
                })
                .collect(),
            within: Vec::new(),
            discarded: 0,
        }
    }

    fn aggregator() -> ConflictAggregator {
        ConflictAggregator::new(Vec::new())
    }

    #[test]
    fn test_secure_parcel() {
        let verification = aggregator()
            .aggregate(square_parcel(), &OverlapOutcome::default())
            .unwrap();
        assert_eq!(verification.parcel.status, ParcelStatus::Secure);
        assert!(!verification.has_conflicts);
        assert_eq!(verification.recommendations, vec![SECURE_RECOMMENDATION]);
        assert!(verification.issues.is_empty());
    }

    #[test]
    fn test_single_high_conflict() {
        let outcome = OverlapOutcome {
            findings: vec![findings("litige", LayerRole::Litigation, &[(3.0, Severity::High)])],
            ..Default::default()
        };
        let verification = aggregator().aggregate(square_parcel(), &outcome).unwrap();
        assert_eq!(verification.parcel.status, ParcelStatus::Conflict);
        assert_eq!(verification.by_type[&ConflictType::LitigationZone], 1);
        assert_eq!(
            verification.recommendations,
            vec!["Check the legal status - Zone under litigation"]
        );
    }

    #[test]
    fn test_minor_conflicts_warning() {
        let outcome = OverlapOutcome {
            findings: vec![findings(
                "parcelles",
                LayerRole::ExistingParcels,
                &[(2.0, Severity::Low), (6.0, Severity::Medium)],
            )],
            ..Default::default()
        };
        let verification = aggregator().aggregate(square_parcel(), &outcome).unwrap();
        assert_eq!(verification.parcel.status, ParcelStatus::Warning);
        assert!(verification.flags.double_sale);
        assert_eq!(verification.count_severity(Severity::Low), 1);
        assert!(verification.conflicts[0].description.contains("BJ-0"));
        assert!(verification.conflicts[0].recommendation.starts_with("Minor overlap with TF #5521"));
    }

    #[test]
    fn test_recommendation_order_and_audit() {
        let outcome = OverlapOutcome {
            findings: vec![
                findings("parcelles", LayerRole::ExistingParcels, &[(60.0, Severity::Critical)]),
                findings("air_proteges", LayerRole::ProtectedArea, &[(12.0, Severity::Critical)]),
                findings("dpl", LayerRole::PublicDomainLagoon, &[(0.5, Severity::Critical)]),
                findings("litige", LayerRole::Litigation, &[(1.0, Severity::High)]),
                findings("restrictions", LayerRole::Restriction, &[(1.0, Severity::High)]),
            ],
            ..Default::default()
        };
        let verification = aggregator().aggregate(square_parcel(), &outcome).unwrap();
        assert_eq!(verification.conflict_count, 5);
        assert_eq!(verification.critical_issues.len(), 3);
        assert!(verification.conflicts[0].recommendation.starts_with("URGENT"));
        assert_eq!(
            verification.recommendations,
            vec![
                "HIGH PRIORITY: Verify property rights and the transaction history",
                "Consult the environmental services for authorisation",
                "PROHIBITION: Construction on public domain - Revise the layout",
                "Check the legal status - Zone under litigation",
                "Consult the planning authority - Restricted zone",
                "Full audit recommended - Multiple conflicts detected",
            ]
        );
    }

    #[test]
    fn test_cadastral_inconsistency() {
        let nearby = |id: Value| ReferenceObject {
            layer: "parcelles".to_string(),
            object_id: "x".to_string(),
            properties: props(json!({ "nup": id })),
            geometry: None,
            distance: Some(10.0),
        };
        let outcome = OverlapOutcome {
            nearby: vec![
                nearby(json!("BJ-1")),
                nearby(json!("BJ-2")),
                nearby(json!("BJ-2")),
                nearby(json!("")),
            ],
            ..Default::default()
        };
        let verification = aggregator().aggregate(square_parcel(), &outcome).unwrap();
        assert!(verification.flags.cadastre_inconsistency);
        assert_eq!(verification.conflict_count, 1);
        assert_eq!(verification.conflicts[0].severity, Severity::Medium);
        assert!(verification.conflicts[0].description.contains("3 inconsistencies"));
        assert_eq!(verification.parcel.status, ParcelStatus::Warning);
    }

    #[test]
    fn test_non_finite_overlap() {
        let outcome = OverlapOutcome {
            findings: vec![findings("dpm", LayerRole::PublicDomainMaritime, &[(f64::NAN, Severity::Critical)])],
            ..Default::default()
        };
        let result = aggregator().aggregate(square_parcel(), &outcome);
        assert!(matches!(result, Err(PipelineError::AggregationFailure(_))));
    }

    #[test]
    fn test_non_simple_parcel_stays_invalid() {
        let mut parcel = square_parcel();
        parcel.is_simple = false;
        let verification = aggregator().aggregate(parcel, &OverlapOutcome::default()).unwrap();
        assert_eq!(verification.parcel.status, ParcelStatus::Invalid);
    }

    #[test]
    fn test_overlap_type_follows_layer_role() {
        let roles = [
            LayerRole::ExistingParcels,
            LayerRole::LandAssociation,
            LayerRole::PublicDomainLagoon,
            LayerRole::PublicDomainMaritime,
            LayerRole::ProtectedArea,
            LayerRole::Litigation,
            LayerRole::Restriction,
        ];
        for role in roles {
            let outcome = OverlapOutcome {
                findings: vec![findings("couche", role, &[(4.0, Severity::Medium)])],
                ..Default::default()
            };
            let verification = aggregator().aggregate(square_parcel(), &outcome).unwrap();
            assert_eq!(verification.conflicts.len(), 1);
            assert_eq!(verification.conflicts[0].conflict_type, ConflictType::from_role(role));
            assert_ne!(verification.conflicts[0].conflict_type, ConflictType::CadastreDifference);
        }
    }
}
