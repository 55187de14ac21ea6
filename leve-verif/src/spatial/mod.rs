//! Service de requêtes spatiales sur les couches de référence
//!
//! Les couches sont partagées en lecture seule par toutes les exécutions.

pub mod memory;
pub mod postgis;

use anyhow::Result;
use async_trait::async_trait;
use geo::{Geometry, Polygon};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::LayerConfig;

pub use memory::MemoryLayers;
pub use postgis::PostgisLayers;

/// Objet d'une couche de référence
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceObject {
    pub layer: String,
    pub object_id: String,
    pub properties: Map<String, Value>,
    #[serde(skip)]
    pub geometry: Option<Geometry>,
    /// Distance à la parcelle (requête de voisinage)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

/// Chevauchement entre la parcelle et un objet de référence
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlapResult {
    pub layer: String,
    pub object_id: String,
    pub intersection_area: f64,
    pub overlap_percentage: f64,
    pub properties: Map<String, Value>,
    #[serde(skip)]
    pub geometry: Option<Geometry>,
}

impl OverlapResult {
    /// Valeur textuelle d'une propriété
    pub fn property(&self, key: &str) -> Option<String> {
        property_string(&self.properties, key)
    }
}

/// Disponibilité d'une couche
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStatus {
    pub name: String,
    pub available: bool,
    pub feature_count: Option<u64>,
}

/// Requêtes spatiales exposées par un service de couches
#[async_trait]
pub trait SpatialQuery: Send + Sync {
    /// Objets intersectant la parcelle (éventuellement tamponnée)
    async fn intersects(
        &self,
        polygon: &Polygon,
        layer: &LayerConfig,
        buffer: f64,
    ) -> Result<Vec<OverlapResult>>;

    /// Objets contenant entièrement la parcelle
    async fn within(&self, polygon: &Polygon, layer: &LayerConfig) -> Result<Vec<ReferenceObject>>;

    /// Objets à moins de `distance` mètres de la parcelle
    async fn nearby(
        &self,
        polygon: &Polygon,
        layer: &LayerConfig,
        distance: f64,
    ) -> Result<Vec<ReferenceObject>>;

    async fn layer_status(&self, layer: &LayerConfig) -> Result<LayerStatus>;
}

/// Pourcentage de la parcelle couvert par l'intersection, borné à [0, 100]
pub fn overlap_percentage(intersection_area: f64, parcel_area: f64) -> f64 {
    if parcel_area <= 0.0 || !intersection_area.is_finite() || intersection_area <= 0.0 {
        return 0.0;
    }
    (intersection_area / parcel_area * 100.0).min(100.0)
}

/// Valeur textuelle d'une propriété (chaîne ou nombre), vide = absente
pub fn property_string(properties: &Map<String, Value>, key: &str) -> Option<String> {
    match properties.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Identifiant d'un objet: propriété configurée, puis `id`, puis le rang
pub fn object_id(properties: &Map<String, Value>, id_property: &str, index: usize) -> String {
    property_string(properties, id_property)
        .or_else(|| property_string(properties, "id"))
        .unwrap_or_else(|| format!("#{}", index))
}
