//! Accès PostgreSQL/PostGIS partagé par les couches et la persistance

pub mod layers;
pub mod pool;
pub mod transaction;

use anyhow::{Context, Result};
use geo::Geometry;
use geozero::wkb::Wkb;
use geozero::wkt::WktWriter;
use geozero::{GeozeroGeometry, ToGeo};
use wkb::geom_to_wkb;

pub use layers::{import_layers, LayerImport};
pub use pool::{create_pool, test_connection, DatabaseConfig, SslMode};

use crate::config::LayerConfig;

/// Flag SRID du type de géométrie EWKB
const EWKB_SRID_FLAG: u32 = 0x2000_0000;

/// Table d'une couche, refuse tout caractère hors identifiant SQL
pub fn layer_table(layer: &LayerConfig) -> Result<&str> {
    let valid = !layer.table.is_empty()
        && layer
            .table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !valid {
        anyhow::bail!("Invalid table name for layer {}: {}", layer.name, layer.table);
    }
    Ok(&layer.table)
}

/// Convertit une géométrie en EWKB (WKB + SRID) pour PostGIS
pub fn geometry_to_ewkb(geom: &Geometry, srid: u32) -> Result<Vec<u8>> {
    let wkb = geom_to_wkb(geom)
        .map_err(|e| anyhow::anyhow!("Failed to convert geometry to WKB: {:?}", e))?;

    if wkb.len() < 5 {
        anyhow::bail!("WKB too short: {} bytes", wkb.len());
    }

    let little_endian = wkb[0] == 1;
    let type_bytes = [wkb[1], wkb[2], wkb[3], wkb[4]];

    let mut ewkb = Vec::with_capacity(wkb.len() + 4);
    ewkb.push(wkb[0]);
    if little_endian {
        let geom_type = u32::from_le_bytes(type_bytes) | EWKB_SRID_FLAG;
        ewkb.extend_from_slice(&geom_type.to_le_bytes());
        ewkb.extend_from_slice(&srid.to_le_bytes());
    } else {
        let geom_type = u32::from_be_bytes(type_bytes) | EWKB_SRID_FLAG;
        ewkb.extend_from_slice(&geom_type.to_be_bytes());
        ewkb.extend_from_slice(&srid.to_be_bytes());
    }
    ewkb.extend_from_slice(&wkb[5..]);

    Ok(ewkb)
}

/// WKT d'une géométrie (paramètre de `ST_GeomFromText`)
pub fn geometry_to_wkt(geom: &Geometry) -> Result<String> {
    let mut wkt_buf = Vec::new();
    {
        let mut writer = WktWriter::new(&mut wkt_buf);
        geom.process_geom(&mut writer)
            .context("Failed to convert geometry to WKT")?;
    }
    String::from_utf8(wkt_buf).context("Invalid UTF-8 in WKT")
}

/// Décode un WKB renvoyé par `ST_AsBinary`
pub fn wkb_to_geometry(bytes: Vec<u8>) -> Result<Geometry> {
    Wkb(bytes).to_geo().context("Failed to decode WKB geometry")
}
