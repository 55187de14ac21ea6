//! Couches de référence interrogées dans PostGIS

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use geo::{Area, Geometry, Polygon};
use serde_json::{Map, Value};
use tokio_postgres::Row;
use tracing::debug;

use super::{
    object_id, overlap_percentage, LayerStatus, OverlapResult, ReferenceObject, SpatialQuery,
};
use crate::config::LayerConfig;
use crate::db::{geometry_to_wkt, layer_table, wkb_to_geometry};

/// Limite du nombre d'objets renvoyés par une requête de voisinage
const NEARBY_LIMIT: i64 = 50;

/// Service de couches adossé à une base PostGIS
#[derive(Clone)]
pub struct PostgisLayers {
    pool: Pool,
    srid: u32,
}

impl PostgisLayers {
    pub fn new(pool: Pool, srid: u32) -> Self {
        Self { pool, srid }
    }

    fn table(layer: &LayerConfig) -> Result<&str> {
        layer_table(layer)
    }

    fn parse_row(
        row: &Row,
        layer: &LayerConfig,
        index: usize,
    ) -> Result<(Map<String, Value>, Option<Geometry>, String)> {
        let props: String = row.try_get("props")?;
        let properties: Map<String, Value> =
            serde_json::from_str(&props).context("Invalid properties JSON")?;
        let wkb: Option<Vec<u8>> = row.try_get("wkb")?;
        let geometry = wkb.map(wkb_to_geometry).transpose()?;
        let id = object_id(&properties, &layer.id_property, index);
        Ok((properties, geometry, id))
    }
}

#[async_trait]
impl SpatialQuery for PostgisLayers {
    async fn intersects(
        &self,
        polygon: &Polygon,
        layer: &LayerConfig,
        buffer: f64,
    ) -> Result<Vec<OverlapResult>> {
        let table = Self::table(layer)?;
        let wkt = geometry_to_wkt(&Geometry::Polygon(polygon.clone()))?;
        let parcel_area = polygon.unsigned_area();

        let filter = if buffer > 0.0 {
            format!("ST_Buffer(ST_GeomFromText($1, {}), $2)", self.srid)
        } else {
            format!("ST_GeomFromText($1, {})", self.srid)
        };
        let sql = format!(
            r#"
            SELECT
                (to_jsonb(t) - 'geom')::text AS props,
                ST_AsBinary(t.geom) AS wkb,
                ST_Area(ST_Intersection(t.geom, ST_GeomFromText($1, {srid}))) AS intersection_area
            FROM {table} t
            WHERE ST_Intersects(t.geom, {filter})
            "#,
            srid = self.srid,
            table = table,
            filter = filter
        );

        let client = self.pool.get().await.context("Failed to get connection from pool")?;
        let result = if buffer > 0.0 {
            client.query(&sql, &[&wkt, &buffer]).await
        } else {
            client.query(&sql, &[&wkt]).await
        };
        let rows = result.with_context(|| format!("Intersects query failed on {}", table))?;

        debug!(layer = %layer.name, rows = rows.len(), "Intersects query");

        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                let (properties, geometry, object_id) = Self::parse_row(row, layer, index)?;
                let intersection_area: f64 =
                    row.try_get::<_, Option<f64>>("intersection_area")?.unwrap_or(0.0);
                Ok(OverlapResult {
                    layer: layer.name.clone(),
                    object_id,
                    intersection_area,
                    overlap_percentage: overlap_percentage(intersection_area, parcel_area),
                    properties,
                    geometry,
                })
            })
            .collect()
    }

    async fn within(&self, polygon: &Polygon, layer: &LayerConfig) -> Result<Vec<ReferenceObject>> {
        let table = Self::table(layer)?;
        let wkt = geometry_to_wkt(&Geometry::Polygon(polygon.clone()))?;
        let sql = format!(
            r#"
            SELECT (to_jsonb(t) - 'geom')::text AS props, ST_AsBinary(t.geom) AS wkb
            FROM {table} t
            WHERE ST_Within(ST_GeomFromText($1, {srid}), t.geom)
            "#,
            table = table,
            srid = self.srid
        );

        let client = self.pool.get().await.context("Failed to get connection from pool")?;
        let rows = client
            .query(&sql, &[&wkt])
            .await
            .with_context(|| format!("Within query failed on {}", table))?;

        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                let (properties, geometry, object_id) = Self::parse_row(row, layer, index)?;
                Ok(ReferenceObject {
                    layer: layer.name.clone(),
                    object_id,
                    properties,
                    geometry,
                    distance: None,
                })
            })
            .collect()
    }

    async fn nearby(
        &self,
        polygon: &Polygon,
        layer: &LayerConfig,
        distance: f64,
    ) -> Result<Vec<ReferenceObject>> {
        let table = Self::table(layer)?;
        let wkt = geometry_to_wkt(&Geometry::Polygon(polygon.clone()))?;
        let sql = format!(
            r#"
            SELECT
                (to_jsonb(t) - 'geom')::text AS props,
                ST_AsBinary(t.geom) AS wkb,
                ST_Distance(t.geom, ST_GeomFromText($1, {srid})) AS distance
            FROM {table} t
            WHERE ST_DWithin(t.geom, ST_GeomFromText($1, {srid}), $2)
            ORDER BY distance
            LIMIT {limit}
            "#,
            srid = self.srid,
            table = table,
            limit = NEARBY_LIMIT
        );

        let client = self.pool.get().await.context("Failed to get connection from pool")?;
        let rows = client
            .query(&sql, &[&wkt, &distance])
            .await
            .with_context(|| format!("Nearby query failed on {}", table))?;

        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                let (properties, geometry, object_id) = Self::parse_row(row, layer, index)?;
                Ok(ReferenceObject {
                    layer: layer.name.clone(),
                    object_id,
                    properties,
                    geometry,
                    distance: row.try_get::<_, Option<f64>>("distance")?,
                })
            })
            .collect()
    }

    async fn layer_status(&self, layer: &LayerConfig) -> Result<LayerStatus> {
        let table = Self::table(layer)?;
        let client = self.pool.get().await.context("Failed to get connection from pool")?;

        let name = table.rsplit('.').next().unwrap_or(table);
        let exists: bool = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
                &[&name],
            )
            .await
            .context("Failed to check layer table")?
            .try_get(0)?;
        if !exists {
            return Ok(LayerStatus {
                name: layer.name.clone(),
                available: false,
                feature_count: None,
            });
        }

        let count: i64 = client
            .query_one(&format!("SELECT COUNT(*) FROM {}", table), &[])
            .await
            .with_context(|| format!("Failed to count features in {}", table))?
            .try_get(0)?;

        Ok(LayerStatus {
            name: layer.name.clone(),
            available: true,
            feature_count: Some(count.max(0) as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LayerRole, OverlapRegime};

    fn layer(table: &str) -> LayerConfig {
        LayerConfig {
            name: "parcelles".to_string(),
            table: table.to_string(),
            file: None,
            role: LayerRole::ExistingParcels,
            regime: OverlapRegime::Proportional,
            min_report: 1.0,
            base_severity: None,
            escalate_above: None,
            buffer: 0.0,
            id_property: "nup".to_string(),
        }
    }

    #[test]
    fn test_table_name_validation() {
        assert_eq!(PostgisLayers::table(&layer("andf.parcelles")).unwrap(), "andf.parcelles");
        assert!(PostgisLayers::table(&layer("parcelles; DROP TABLE x")).is_err());
        assert!(PostgisLayers::table(&layer("")).is_err());
    }
}
