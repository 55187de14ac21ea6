//! Export GeoJSON de la parcelle et des conflits (geozero)

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use geo::Geometry;
use geozero::geojson::GeoJsonWriter;
use geozero::GeozeroGeometry;
use serde_json::{json, Map, Value};

use leve::Parcel;

use crate::conflicts::Verification;
use crate::reproject::Reprojector;

/// Objet géographique prêt à l'export
#[derive(Debug, Clone)]
pub struct GeoFeature {
    pub id: String,
    pub geometry: Geometry,
    pub properties: Map<String, Value>,
}

impl GeoFeature {
    /// Copie reprojetée
    pub fn reprojected(&self, reprojector: &Reprojector) -> Result<Self> {
        Ok(Self {
            id: self.id.clone(),
            geometry: reprojector.transform_geometry(&self.geometry)?,
            properties: self.properties.clone(),
        })
    }

    /// Feature GeoJSON en mémoire
    pub fn to_value(&self) -> Result<Value> {
        Ok(json!({
            "type": "Feature",
            "id": self.id,
            "geometry": geometry_value(&self.geometry)?,
            "properties": self.properties,
        }))
    }
}

/// Géométrie GeoJSON en mémoire
pub fn geometry_value(geometry: &Geometry) -> Result<Value> {
    let mut buf = Vec::new();
    let mut writer = GeoJsonWriter::new(&mut buf);
    geometry
        .process_geom(&mut writer)
        .context("Failed to write GeoJSON geometry")?;
    serde_json::from_slice(&buf).context("Invalid GeoJSON geometry output")
}

/// Feature de la parcelle, propriétés calquées sur la parcelle
pub fn parcel_feature(upload_id: &str, parcel: &Parcel) -> GeoFeature {
    let mut properties = Map::new();
    properties.insert("uploadId".into(), json!(upload_id));
    properties.insert("area".into(), json!(parcel.area));
    properties.insert("perimeter".into(), json!(parcel.perimeter));
    properties.insert("status".into(), json!(parcel.status));
    properties.insert("isSimple".into(), json!(parcel.is_simple));
    properties.insert(
        "bornes".into(),
        json!(parcel.points.iter().map(|p| p.id.to_string()).collect::<Vec<_>>()),
    );
    properties.insert("inferredCount".into(), json!(parcel.inferred_count));

    GeoFeature {
        id: upload_id.to_string(),
        geometry: Geometry::Polygon(parcel.polygon()),
        properties,
    }
}

/// Features des conflits
///
/// La géométrie est celle de l'objet de référence; le conflit cadastral, sans
/// objet unique, porte la géométrie de la parcelle.
pub fn conflict_features(verification: &Verification) -> Vec<GeoFeature> {
    verification
        .conflicts
        .iter()
        .enumerate()
        .map(|(i, conflict)| {
            let mut properties = Map::new();
            properties.insert("type".into(), json!(conflict.conflict_type));
            properties.insert("severity".into(), json!(conflict.severity));
            properties.insert("layer".into(), json!(conflict.layer));
            properties.insert("description".into(), json!(conflict.description));
            properties.insert("recommendation".into(), json!(conflict.recommendation));

            let geometry = match &conflict.overlap {
                Some(overlap) => {
                    properties.insert("objectId".into(), json!(overlap.object_id));
                    properties.insert("intersectionArea".into(), json!(overlap.intersection_area));
                    properties.insert("overlapPercentage".into(), json!(overlap.overlap_percentage));
                    properties.insert("reference".into(), Value::Object(overlap.properties.clone()));
                    overlap.geometry.clone()
                }
                None => None,
            };

            GeoFeature {
                id: format!("conflict-{}", i + 1),
                geometry: geometry
                    .unwrap_or_else(|| Geometry::Polygon(verification.parcel.polygon())),
                properties,
            }
        })
        .collect()
}

/// FeatureCollection en mémoire avec son CRS
pub fn feature_collection(features: &[GeoFeature], epsg: u32) -> Result<Value> {
    let features: Vec<Value> = features.iter().map(GeoFeature::to_value).collect::<Result<_>>()?;
    Ok(json!({
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": format!("urn:ogc:def:crs:EPSG::{}", epsg)}},
        "features": features,
    }))
}

/// Exporte des features en GeoJSON (écriture en flux)
pub fn export_to_geojson(features: &[GeoFeature], epsg: u32, output_path: &Path) -> Result<()> {
    let file = File::create(output_path)
        .context(format!("Failed to create file: {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);

    write!(
        writer,
        r#"{{"type":"FeatureCollection","crs":{{"type":"name","properties":{{"name":"urn:ogc:def:crs:EPSG::{}"}}}},"features":["#,
        epsg
    )?;
    for (i, feature) in features.iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write_feature(&mut writer, feature)?;
    }
    write!(writer, "]}}")?;
    writer.flush()?;

    Ok(())
}

fn write_feature<W: Write>(writer: &mut W, feature: &GeoFeature) -> Result<()> {
    write!(
        writer,
        r#"{{"type":"Feature","id":"{}","geometry":"#,
        escape_json(&feature.id)
    )?;
    let mut geom_buf = Vec::new();
    let mut geom_writer = GeoJsonWriter::new(&mut geom_buf);
    feature.geometry.process_geom(&mut geom_writer)?;
    writer.write_all(&geom_buf)?;

    write!(writer, r#","properties":"#)?;
    serde_json::to_writer(&mut *writer, &feature.properties)?;
    write!(writer, "}}")?;

    Ok(())
}

/// Échappe une chaîne pour JSON
fn escape_json(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c.is_control() => {
                result.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => result.push(c),
        }
    }
    result
}
