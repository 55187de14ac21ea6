//! Audit de la séquence des bornes (complétude, ordre, doublons)
//!
//! Le rapport est descriptif: il ne bloque pas la construction du polygone.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::types::{BorneId, BoundarySet};

/// Statut de la séquence, par ordre de priorité
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Perfect,
    MissingBornes,
    OutOfOrder,
    Duplicates,
    NoB1,
    Irregular,
    NoCoordinates,
}

impl SequenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SequenceStatus::Perfect => "perfect",
            SequenceStatus::MissingBornes => "missing_bornes",
            SequenceStatus::OutOfOrder => "out_of_order",
            SequenceStatus::Duplicates => "duplicates",
            SequenceStatus::NoB1 => "no_b1",
            SequenceStatus::Irregular => "irregular",
            SequenceStatus::NoCoordinates => "no_coordinates",
        }
    }
}

/// Rapport de séquence
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceReport {
    pub max_id: Option<BorneId>,
    pub missing_ids: BTreeSet<BorneId>,
    pub duplicate_ids: BTreeSet<BorneId>,
    pub starts_at_one: bool,
    pub status: SequenceStatus,
    pub point_count: usize,
    pub reading_order: Vec<BorneId>,
    pub message: String,
}

impl SequenceReport {
    /// Vrai si aucune borne ne manque entre B1 et la dernière
    pub fn is_complete(&self) -> bool {
        self.missing_ids.is_empty() && self.starts_at_one && self.point_count > 0
    }
}

/// Analyse la séquence d'un ensemble de bornes
pub fn validate(set: &BoundarySet) -> SequenceReport {
    let Some(max_id) = set.max_id() else {
        return SequenceReport {
            max_id: None,
            missing_ids: BTreeSet::new(),
            duplicate_ids: BTreeSet::new(),
            starts_at_one: false,
            status: SequenceStatus::NoCoordinates,
            point_count: 0,
            reading_order: Vec::new(),
            message: "No coordinates found".to_string(),
        };
    };

    let missing_ids: BTreeSet<BorneId> = (1..=max_id.number())
        .map(BorneId)
        .filter(|id| !set.contains(*id))
        .collect();

    let mut seen = HashSet::new();
    let duplicate_ids: BTreeSet<BorneId> = set
        .insertions()
        .iter()
        .copied()
        .filter(|id| !seen.insert(*id))
        .collect();

    let starts_at_one = set.contains(BorneId(1));

    let insertions = set.insertions();
    let in_order = insertions.windows(2).all(|w| w[0] <= w[1]);

    let min_id = set.ids().next().unwrap_or(max_id);
    let point_count = set.len();

    let (status, message) = if missing_ids.is_empty()
        && duplicate_ids.is_empty()
        && starts_at_one
        && in_order
    {
        (
            SequenceStatus::Perfect,
            format!("{point_count}/{} boundary points, complete sequence B1-{max_id}", max_id.number()),
        )
    } else if !missing_ids.is_empty() {
        (
            SequenceStatus::MissingBornes,
            format!(
                "{point_count}/{} boundary points, missing: {}",
                max_id.number(),
                join(missing_ids.iter())
            ),
        )
    } else if !in_order {
        (
            SequenceStatus::OutOfOrder,
            format!("Boundary points read out of order: {}", join_arrow(insertions)),
        )
    } else if !duplicate_ids.is_empty() {
        (
            SequenceStatus::Duplicates,
            format!("Duplicated boundary points: {}", join(duplicate_ids.iter())),
        )
    } else if !starts_at_one {
        (
            SequenceStatus::NoB1,
            format!("Sequence starts at {min_id} instead of B1"),
        )
    } else {
        (SequenceStatus::Irregular, "Irregular sequence".to_string())
    };

    SequenceReport {
        max_id: Some(max_id),
        missing_ids,
        duplicate_ids,
        starts_at_one,
        status,
        point_count,
        reading_order: set.reading_order(),
        message,
    }
}

fn join<'a>(ids: impl Iterator<Item = &'a BorneId>) -> String {
    ids.map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

fn join_arrow(ids: &[BorneId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundaryPoint, OriginPattern};

    fn set_of(ids: &[u32]) -> BoundarySet {
        ids.iter()
            .map(|&n| BoundaryPoint {
                id: BorneId(n),
                x: 400_000.0 + n as f64,
                y: 700_000.0,
                confidence: 1.0,
                origin_pattern: OriginPattern::ExplicitNormal,
                source_backend: "test".to_string(),
                inferred: false,
            })
            .collect()
    }

    #[test]
    fn test_missing_bornes() {
        let report = validate(&set_of(&[1, 2, 6, 7, 8]));
        assert_eq!(report.max_id, Some(BorneId(8)));
        assert_eq!(
            report.missing_ids,
            [BorneId(3), BorneId(4), BorneId(5)].into_iter().collect()
        );
        assert_eq!(report.status, SequenceStatus::MissingBornes);
        assert!(report.starts_at_one);
        assert_eq!(report.message, "5/8 boundary points, missing: B3, B4, B5");
    }

    #[test]
    fn test_perfect_sequence() {
        let report = validate(&set_of(&[1, 2, 3, 4]));
        assert_eq!(report.status, SequenceStatus::Perfect);
        assert!(report.is_complete());
        assert!(report.duplicate_ids.is_empty());
    }

    #[test]
    fn test_out_of_order_is_informational() {
        let set = set_of(&[2, 1, 3]);
        let report = validate(&set);
        assert_eq!(report.status, SequenceStatus::OutOfOrder);
        assert_eq!(report.reading_order, vec![BorneId(2), BorneId(1), BorneId(3)]);
        // l'ensemble reste trié par numéro
        let ids: Vec<_> = set.ids().collect();
        assert_eq!(ids, vec![BorneId(1), BorneId(2), BorneId(3)]);
    }

    #[test]
    fn test_duplicates_rechecked() {
        let report = validate(&set_of(&[1, 2, 2, 3]));
        assert_eq!(report.status, SequenceStatus::Duplicates);
        assert_eq!(report.duplicate_ids, [BorneId(2)].into_iter().collect());
    }

    #[test]
    fn test_missing_b1_reported_as_missing() {
        let report = validate(&set_of(&[2, 3, 4]));
        assert!(!report.starts_at_one);
        assert_eq!(report.status, SequenceStatus::MissingBornes);
        assert!(report.missing_ids.contains(&BorneId(1)));
    }

    #[test]
    fn test_empty_set() {
        let report = validate(&BoundarySet::new());
        assert_eq!(report.status, SequenceStatus::NoCoordinates);
        assert_eq!(report.point_count, 0);
        assert!(!report.is_complete());
    }
}
