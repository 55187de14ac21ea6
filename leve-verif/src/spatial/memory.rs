//! Couches de référence chargées en mémoire depuis des fichiers GeoJSON

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use geo::{Area, BooleanOps, Contains, EuclideanDistance, Geometry, Intersects, MultiPolygon, Polygon};
use geojson::{FeatureCollection, GeoJson};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{
    object_id, overlap_percentage, LayerStatus, OverlapResult, ReferenceObject, SpatialQuery,
};
use crate::config::LayerConfig;

/// Limite du nombre d'objets renvoyés par une requête de voisinage
const NEARBY_LIMIT: usize = 50;

struct MemoryObject {
    id: String,
    properties: Map<String, Value>,
    shape: MultiPolygon,
}

/// Couches GeoJSON en mémoire, indexées par nom de couche
#[derive(Default)]
pub struct MemoryLayers {
    layers: HashMap<String, Vec<MemoryObject>>,
}

impl MemoryLayers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Charge le fichier de chaque couche configurée depuis `dir`
    ///
    /// Une couche sans fichier reste absente: ses requêtes échoueront et elle
    /// sera ignorée par l'analyse.
    pub fn load_dir(dir: &Path, layers: &[LayerConfig]) -> Result<Self> {
        let mut loaded = Self::new();
        for layer in layers {
            let Some(file) = &layer.file else {
                debug!(layer = %layer.name, "No file configured for layer");
                continue;
            };
            let path = dir.join(file);
            if !path.exists() {
                warn!(layer = %layer.name, path = %path.display(), "Layer file not found");
                continue;
            }
            let count = loaded.load_file(layer, &path)?;
            info!(layer = %layer.name, features = count, "Layer loaded");
        }
        Ok(loaded)
    }

    pub fn load_file(&mut self, layer: &LayerConfig, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read layer file: {}", path.display()))?;
        self.insert_geojson(layer, &content)
            .with_context(|| format!("Failed to load layer {}", layer.name))
    }

    /// Ajoute les objets polygonaux d'une FeatureCollection
    pub fn insert_geojson(&mut self, layer: &LayerConfig, json: &str) -> Result<usize> {
        let geojson: GeoJson = json.parse().context("Invalid GeoJSON")?;
        let collection = FeatureCollection::try_from(geojson)
            .context("Layer GeoJSON must be a FeatureCollection")?;

        let mut count = 0;
        for (index, feature) in collection.features.into_iter().enumerate() {
            let Some(geometry) = feature.geometry else {
                continue;
            };
            let geometry: Geometry = match Geometry::try_from(geometry) {
                Ok(g) => g,
                Err(e) => {
                    warn!(layer = %layer.name, index, error = %e, "Unsupported feature geometry");
                    continue;
                }
            };
            let mut properties = feature.properties.unwrap_or_default();
            if let Some(id) = feature.id {
                let value = match id {
                    geojson::feature::Id::String(s) => Value::String(s),
                    geojson::feature::Id::Number(n) => Value::Number(n),
                };
                properties.entry("id".to_string()).or_insert(value);
            }
            if self.insert(layer, index, properties, geometry) {
                count += 1;
            }
        }
        // une couche chargée sans objet reste disponible
        self.layers.entry(layer.name.clone()).or_default();
        Ok(count)
    }

    /// Ajoute un objet; faux si la géométrie n'est pas polygonale
    pub fn insert(
        &mut self,
        layer: &LayerConfig,
        index: usize,
        properties: Map<String, Value>,
        geometry: Geometry,
    ) -> bool {
        let Some(shape) = to_multipolygon(geometry) else {
            return false;
        };
        let id = object_id(&properties, &layer.id_property, index);
        self.layers
            .entry(layer.name.clone())
            .or_default()
            .push(MemoryObject {
                id,
                properties,
                shape,
            });
        true
    }

    pub fn is_loaded(&self, layer: &LayerConfig) -> bool {
        self.layers.contains_key(&layer.name)
    }

    /// Propriétés et géométrie des objets d'une couche chargée
    pub fn features(
        &self,
        layer: &LayerConfig,
    ) -> Result<impl Iterator<Item = (&Map<String, Value>, &MultiPolygon)> + '_> {
        Ok(self.objects(layer)?.iter().map(|o| (&o.properties, &o.shape)))
    }

    fn objects(&self, layer: &LayerConfig) -> Result<&[MemoryObject]> {
        self.layers
            .get(&layer.name)
            .map(Vec::as_slice)
            .ok_or_else(|| anyhow::anyhow!("Layer {} is not loaded", layer.name))
    }

    fn reference(layer: &LayerConfig, object: &MemoryObject, distance: Option<f64>) -> ReferenceObject {
        ReferenceObject {
            layer: layer.name.clone(),
            object_id: object.id.clone(),
            properties: object.properties.clone(),
            geometry: Some(Geometry::MultiPolygon(object.shape.clone())),
            distance,
        }
    }
}

fn to_multipolygon(geometry: Geometry) -> Option<MultiPolygon> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
        Geometry::MultiPolygon(mp) => Some(mp),
        Geometry::GeometryCollection(gc) => {
            let polygons: Vec<Polygon> = gc
                .into_iter()
                .filter_map(to_multipolygon)
                .flat_map(|mp| mp.0)
                .collect();
            (!polygons.is_empty()).then(|| MultiPolygon::new(polygons))
        }
        _ => None,
    }
}

fn distance_to(polygon: &Polygon, shape: &MultiPolygon) -> f64 {
    shape
        .iter()
        .map(|part| polygon.euclidean_distance(part))
        .fold(f64::INFINITY, f64::min)
}

#[async_trait]
impl SpatialQuery for MemoryLayers {
    async fn intersects(
        &self,
        polygon: &Polygon,
        layer: &LayerConfig,
        buffer: f64,
    ) -> Result<Vec<OverlapResult>> {
        let parcel_area = polygon.unsigned_area();
        let mut results = Vec::new();

        for object in self.objects(layer)? {
            let hit = if buffer > 0.0 {
                distance_to(polygon, &object.shape) <= buffer
            } else {
                polygon.intersects(&object.shape)
            };
            if !hit {
                continue;
            }

            let intersection_area = MultiPolygon::new(vec![polygon.clone()])
                .intersection(&object.shape)
                .unsigned_area();
            results.push(OverlapResult {
                layer: layer.name.clone(),
                object_id: object.id.clone(),
                intersection_area,
                overlap_percentage: overlap_percentage(intersection_area, parcel_area),
                properties: object.properties.clone(),
                geometry: Some(Geometry::MultiPolygon(object.shape.clone())),
            });
        }

        Ok(results)
    }

    async fn within(&self, polygon: &Polygon, layer: &LayerConfig) -> Result<Vec<ReferenceObject>> {
        Ok(self
            .objects(layer)?
            .iter()
            .filter(|o| o.shape.iter().any(|part| part.contains(polygon)))
            .map(|o| Self::reference(layer, o, None))
            .collect())
    }

    async fn nearby(
        &self,
        polygon: &Polygon,
        layer: &LayerConfig,
        distance: f64,
    ) -> Result<Vec<ReferenceObject>> {
        let mut found: Vec<(f64, &MemoryObject)> = self
            .objects(layer)?
            .iter()
            .map(|o| (distance_to(polygon, &o.shape), o))
            .filter(|(d, _)| *d <= distance)
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(found
            .into_iter()
            .take(NEARBY_LIMIT)
            .map(|(d, o)| Self::reference(layer, o, Some(d)))
            .collect())
    }

    async fn layer_status(&self, layer: &LayerConfig) -> Result<LayerStatus> {
        let count = self.layers.get(&layer.name).map(|objects| objects.len() as u64);
        Ok(LayerStatus {
            name: layer.name.clone(),
            available: count.is_some(),
            feature_count: count,
        })
    }
}
