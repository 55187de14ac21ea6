//! Types de données pour le crate leve

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use geo::Coord;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::LeveError;

/// Identifiant de borne (`B1`, `B2`, ...), ordonné par son numéro
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BorneId(pub u32);

impl BorneId {
    /// Numéro de la borne
    pub fn number(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BorneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl FromStr for BorneId {
    type Err = LeveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .trim()
            .strip_prefix(|c: char| c == 'B' || c == 'b')
            .ok_or_else(|| LeveError::InvalidBorneId(s.to_string()))?;
        match digits.parse::<u32>() {
            Ok(n) if n > 0 => Ok(BorneId(n)),
            _ => Err(LeveError::InvalidBorneId(s.to_string())),
        }
    }
}

impl Serialize for BorneId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BorneId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Famille de motif ayant produit une borne
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginPattern {
    /// `B1 401374.38 712334.71`
    ExplicitNormal,
    /// `B4 432839.05704141.19` (colonnes collées par la reconnaissance)
    ExplicitGlued,
    /// Couple sans étiquette juste avant l'étiquette suivante
    ImplicitBeforeNext,
    /// Quatre nombres consécutifs sans étiquette
    SequenceFallback,
    /// Borne interpolée, jamais lue
    GeometricInference,
}

impl OriginPattern {
    /// Rang de priorité pour le départage (0 = prioritaire)
    pub fn priority(self) -> u8 {
        match self {
            OriginPattern::ExplicitNormal => 0,
            OriginPattern::ExplicitGlued => 1,
            OriginPattern::ImplicitBeforeNext => 2,
            OriginPattern::SequenceFallback => 3,
            OriginPattern::GeometricInference => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OriginPattern::ExplicitNormal => "explicit_normal",
            OriginPattern::ExplicitGlued => "explicit_glued",
            OriginPattern::ImplicitBeforeNext => "implicit_before_next",
            OriginPattern::SequenceFallback => "sequence_fallback",
            OriginPattern::GeometricInference => "geometric_inference",
        }
    }

    /// Vrai pour les motifs portant une étiquette lue
    pub fn is_explicit(self) -> bool {
        matches!(
            self,
            OriginPattern::ExplicitNormal | OriginPattern::ExplicitGlued
        )
    }
}

/// Une borne du levé avec ses coordonnées projetées
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryPoint {
    pub id: BorneId,
    pub x: f64,
    pub y: f64,
    /// Confiance dans [0, 1]
    pub confidence: f64,
    pub origin_pattern: OriginPattern,
    /// Moteur de reconnaissance ayant fourni le texte
    pub source_backend: String,
    /// Vrai seulement pour une borne interpolée
    #[serde(default)]
    pub inferred: bool,
}

impl BoundaryPoint {
    pub fn coord(&self) -> Coord {
        Coord {
            x: self.x,
            y: self.y,
        }
    }

    /// Distance euclidienne entre deux bornes
    pub fn distance(&self, other: &BoundaryPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Rectangle de validité des coordonnées projetées
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Default for CoordinateBounds {
    /// UTM zone 31N sur le Bénin (EPSG:32631)
    fn default() -> Self {
        Self {
            min_x: 200_000.0,
            max_x: 500_000.0,
            min_y: 600_000.0,
            max_y: 1_400_000.0,
        }
    }
}

impl CoordinateBounds {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }
}

/// Texte brut produit par un moteur de reconnaissance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizedText {
    pub backend: String,
    pub text: String,
}

impl RecognizedText {
    pub fn new(backend: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            text: text.into(),
        }
    }
}

/// Ensemble de bornes indexé par numéro
///
/// L'ordre numérique est le seul ordre des sommets; l'ordre de lecture est
/// conservé à part, à titre informatif.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundarySet {
    points: BTreeMap<BorneId, BoundaryPoint>,
    insertions: Vec<BorneId>,
}

impl BoundarySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insère une borne; remplace et retourne l'éventuelle borne de même numéro
    pub fn insert(&mut self, point: BoundaryPoint) -> Option<BoundaryPoint> {
        self.insertions.push(point.id);
        self.points.insert(point.id, point)
    }

    pub fn get(&self, id: BorneId) -> Option<&BoundaryPoint> {
        self.points.get(&id)
    }

    pub fn contains(&self, id: BorneId) -> bool {
        self.points.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Bornes triées par numéro
    pub fn points(&self) -> impl Iterator<Item = &BoundaryPoint> {
        self.points.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = BorneId> + '_ {
        self.points.keys().copied()
    }

    pub fn max_id(&self) -> Option<BorneId> {
        self.points.keys().next_back().copied()
    }

    /// Numéros dans l'ordre des insertions, doublons compris
    pub fn insertions(&self) -> &[BorneId] {
        &self.insertions
    }

    /// Numéros dans l'ordre de première lecture
    pub fn reading_order(&self) -> Vec<BorneId> {
        let mut seen = std::collections::HashSet::new();
        self.insertions
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn recognized_count(&self) -> usize {
        self.points.values().filter(|p| !p.inferred).count()
    }

    pub fn inferred_count(&self) -> usize {
        self.points.values().filter(|p| p.inferred).count()
    }

    /// Copie de l'ensemble sans les bornes interpolées
    pub fn recognized_only(&self) -> BoundarySet {
        let mut set = BoundarySet::new();
        for id in self.reading_order() {
            if let Some(point) = self.points.get(&id).filter(|p| !p.inferred) {
                set.insert(point.clone());
            }
        }
        set
    }

    pub fn into_points(self) -> Vec<BoundaryPoint> {
        self.points.into_values().collect()
    }
}

impl FromIterator<BoundaryPoint> for BoundarySet {
    fn from_iter<I: IntoIterator<Item = BoundaryPoint>>(iter: I) -> Self {
        let mut set = BoundarySet::new();
        for point in iter {
            set.insert(point);
        }
        set
    }
}

/// Statut de la parcelle après vérification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParcelStatus {
    Secure,
    Warning,
    Conflict,
    Invalid,
}

impl ParcelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ParcelStatus::Secure => "secure",
            ParcelStatus::Warning => "warning",
            ParcelStatus::Conflict => "conflict",
            ParcelStatus::Invalid => "invalid",
        }
    }
}
