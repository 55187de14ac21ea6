//! Configuration de la vérification

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use leve::{CoordinateBounds, ExtractionOptions, InferencePolicy};

use crate::overlap::Severity;

/// Configuration principale
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Emprise valide des coordonnées (projection du levé)
    #[serde(default)]
    pub bounds: CoordinateBounds,

    /// Tolérance de consensus entre candidates (mètres)
    #[serde(default = "default_consensus_tolerance")]
    pub consensus_tolerance: f64,

    /// Tolérance de fermeture de l'anneau (mètres)
    #[serde(default = "default_closure_tolerance")]
    pub closure_tolerance: f64,

    /// Moteurs de reconnaissance, dans l'ordre d'exécution
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Couches de référence interrogées
    #[serde(default)]
    pub layers: Vec<LayerConfig>,

    /// Délai maximal d'une requête de couche (secondes)
    #[serde(default = "default_layer_timeout")]
    pub layer_timeout_secs: u64,

    /// Rayon de recherche du contrôle de cohérence cadastrale (mètres)
    #[serde(default = "default_nearby_distance")]
    pub nearby_distance: f64,

    #[serde(default)]
    pub inference: InferencePolicy,

    /// SRID de la projection du levé
    #[serde(default = "default_survey_srid")]
    pub survey_srid: u32,

    /// SRID des sorties GeoJSON
    #[serde(default = "default_output_srid")]
    pub output_srid: u32,
}

/// Moteur de reconnaissance
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub name: String,

    #[serde(flatten)]
    pub kind: BackendKind,

    /// Confiance historique du moteur, utilisée pour départager les candidates
    #[serde(default)]
    pub historical_confidence: Option<f64>,
}

/// Nature d'un moteur de reconnaissance
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendKind {
    /// Le document est déjà du texte reconnu
    Text,
    /// Texte produit à côté du document: `<document>.<suffix>.txt`
    Sidecar { suffix: String },
    /// Commande externe: le document est passé sur stdin, le texte lu sur stdout
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Rôle d'une couche de référence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerRole {
    ExistingParcels,
    LandAssociation,
    PublicDomainLagoon,
    PublicDomainMaritime,
    ProtectedArea,
    Litigation,
    Restriction,
}

impl LayerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            LayerRole::ExistingParcels => "existing_parcels",
            LayerRole::LandAssociation => "land_association",
            LayerRole::PublicDomainLagoon => "public_domain_lagoon",
            LayerRole::PublicDomainMaritime => "public_domain_maritime",
            LayerRole::ProtectedArea => "protected_area",
            LayerRole::Litigation => "litigation",
            LayerRole::Restriction => "restriction",
        }
    }
}

/// Régime de chevauchement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapRegime {
    /// Sévérité proportionnelle au pourcentage de chevauchement
    Proportional,
    /// Tout empiètement est interdit
    ZeroTolerance,
}

/// Configuration d'une couche de référence
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayerConfig {
    /// Nom logique de la couche
    pub name: String,

    /// Table PostGIS
    pub table: String,

    /// Fichier GeoJSON (relatif au dossier des couches)
    #[serde(default)]
    pub file: Option<String>,

    pub role: LayerRole,

    pub regime: OverlapRegime,

    /// Seuil minimal de signalement en % (inclusif, couches proportionnelles)
    #[serde(default = "default_min_report")]
    pub min_report: f64,

    /// Sévérité de base (couches à tolérance zéro)
    #[serde(default)]
    pub base_severity: Option<Severity>,

    /// Au-delà de ce pourcentage, la sévérité passe à `critical`
    #[serde(default)]
    pub escalate_above: Option<f64>,

    /// Tampon appliqué à la parcelle (mètres)
    #[serde(default)]
    pub buffer: f64,

    /// Propriété identifiant un objet de la couche
    #[serde(default = "default_id_property")]
    pub id_property: String,
}

fn default_consensus_tolerance() -> f64 {
    leve::consensus::DEFAULT_TOLERANCE
}

fn default_closure_tolerance() -> f64 {
    leve::geometry::ring::DEFAULT_CLOSURE_TOLERANCE
}

fn default_layer_timeout() -> u64 {
    10
}

fn default_nearby_distance() -> f64 {
    50.0
}

fn default_survey_srid() -> u32 {
    32631
}

fn default_output_srid() -> u32 {
    4326
}

fn default_min_report() -> f64 {
    1.0
}

fn default_id_property() -> String {
    "nup".to_string()
}

impl Config {
    /// Charge une configuration depuis un fichier
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse config JSON")
    }

    /// Charge une configuration depuis un preset embarqué
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "benin" => Self::load_embedded(include_str!("presets/benin.json")),
            _ => anyhow::bail!("Unknown preset: {}. Use: benin", preset),
        }
    }

    /// Preset embarqué ou chemin vers un fichier JSON
    pub fn resolve(name: &str) -> Result<Self> {
        match name {
            "benin" => Self::from_preset(name),
            _ => Self::load(Path::new(name)),
        }
    }

    fn load_embedded(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse embedded config")
    }

    /// Récupère la configuration d'une couche
    pub fn get_layer(&self, name: &str) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Première couche ayant ce rôle
    pub fn layer_with_role(&self, role: LayerRole) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.role == role)
    }

    pub fn layer_timeout(&self) -> Duration {
        Duration::from_secs(self.layer_timeout_secs)
    }

    /// Confiance historique déclarée par moteur
    pub fn backend_confidence(&self) -> HashMap<String, f64> {
        self.backends
            .iter()
            .filter_map(|b| b.historical_confidence.map(|c| (b.name.clone(), c)))
            .collect()
    }

    /// Paramètres d'extraction dérivés de la configuration
    pub fn extraction_options(&self) -> ExtractionOptions {
        ExtractionOptions {
            bounds: self.bounds,
            tolerance: self.consensus_tolerance,
            backend_confidence: self.backend_confidence(),
            inference: self.inference,
        }
    }
}
