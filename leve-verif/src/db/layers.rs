//! Import des couches de référence GeoJSON dans PostGIS
//!
//! Chaque couche remplace sa table dans une transaction. Les géométries sont
//! promues en `MultiPolygon`, les propriétés deviennent des colonnes `TEXT`
//! (lues telles quelles par les requêtes de `PostgisLayers`), puis un index
//! GIST est créé sur `geom`.

use std::collections::HashSet;

use anyhow::{Context, Result};
use deadpool_postgres::Pool;
use geo::{Geometry, MultiPolygon};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_postgres::types::ToSql;
use tracing::{debug, info, warn};

use super::{geometry_to_ewkb, layer_table};
use crate::config::LayerConfig;
use crate::spatial::MemoryLayers;

/// Colonnes gérées par l'import, jamais reprises des propriétés
const RESERVED_COLUMNS: &[&str] = &["gid", "geom"];

/// Longueur maximale d'un identifiant PostgreSQL
const MAX_IDENTIFIER_LEN: usize = 63;

/// Bilan de l'import d'une couche
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerImport {
    pub layer: String,
    pub table: String,
    pub features: usize,
    pub columns: Vec<String>,
}

/// Propriété source et colonne cible
#[derive(Debug, Clone, PartialEq)]
struct PropertyColumn {
    key: String,
    column: String,
}

/// Importe toutes les couches chargées; les couches absentes sont ignorées
pub async fn import_layers(
    pool: &Pool,
    layers: &MemoryLayers,
    configs: &[LayerConfig],
    srid: u32,
) -> Result<Vec<LayerImport>> {
    let mut imports = Vec::new();
    for layer in configs {
        if !layers.is_loaded(layer) {
            warn!(layer = %layer.name, "Layer not loaded, import skipped");
            continue;
        }
        let features: Vec<_> = layers.features(layer)?.collect();
        let import = import_layer(pool, layer, &features, srid)
            .await
            .with_context(|| format!("Failed to import layer {}", layer.name))?;
        imports.push(import);
    }
    Ok(imports)
}

async fn import_layer(
    pool: &Pool,
    layer: &LayerConfig,
    features: &[(&Map<String, Value>, &MultiPolygon)],
    srid: u32,
) -> Result<LayerImport> {
    let table = layer_table(layer)?;
    let columns = property_columns(features.iter().map(|(props, _)| *props));

    let mut client = pool.get().await.context("Failed to get connection from pool")?;
    let transaction = client
        .transaction()
        .await
        .context("Failed to begin transaction")?;

    transaction
        .batch_execute(&create_table_sql(table, &columns, srid))
        .await
        .with_context(|| format!("Failed to create table {}", table))?;

    let statement = transaction
        .prepare(&insert_sql(table, &columns))
        .await
        .with_context(|| format!("Failed to prepare insert into {}", table))?;

    for (properties, shape) in features {
        let values: Vec<Option<String>> = columns
            .iter()
            .map(|c| properties.get(&c.key).and_then(property_text))
            .collect();
        let ewkb = geometry_to_ewkb(&Geometry::MultiPolygon((*shape).clone()), srid)?;

        let mut params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        params.push(&ewkb);
        transaction
            .execute(&statement, &params)
            .await
            .with_context(|| format!("Failed to insert feature into {}", table))?;
    }

    transaction
        .batch_execute(&index_sql(table))
        .await
        .with_context(|| format!("Failed to create spatial index on {}", table))?;
    transaction
        .commit()
        .await
        .context("Failed to commit transaction")?;

    info!(
        layer = %layer.name,
        table = %table,
        features = features.len(),
        columns = columns.len(),
        "Layer imported"
    );

    Ok(LayerImport {
        layer: layer.name.clone(),
        table: table.to_string(),
        features: features.len(),
        columns: columns.into_iter().map(|c| c.column).collect(),
    })
}

/// Colonnes issues des propriétés, dans l'ordre de première apparition
fn property_columns<'a>(properties: impl Iterator<Item = &'a Map<String, Value>>) -> Vec<PropertyColumn> {
    let mut seen_keys = HashSet::new();
    let mut seen_columns: HashSet<String> =
        RESERVED_COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut columns = Vec::new();

    for props in properties {
        for key in props.keys() {
            if !seen_keys.insert(key.clone()) {
                continue;
            }
            let Some(column) = column_name(key) else {
                warn!(property = %key, "Property has no usable column name, skipped");
                continue;
            };
            if !seen_columns.insert(column.clone()) {
                debug!(property = %key, column = %column, "Column already taken, property skipped");
                continue;
            }
            columns.push(PropertyColumn {
                key: key.clone(),
                column,
            });
        }
    }
    columns
}

/// Nom de colonne SQL: minuscules, `[a-z0-9_]`, sans chiffre initial
fn column_name(key: &str) -> Option<String> {
    let mut name: String = key
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if name.chars().all(|c| c == '_') {
        return None;
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name.truncate(MAX_IDENTIFIER_LEN);
    Some(name)
}

/// Valeur texte d'une propriété; `null` reste NULL
fn property_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn create_table_sql(table: &str, columns: &[PropertyColumn], srid: u32) -> String {
    let mut definitions = vec!["gid SERIAL PRIMARY KEY".to_string()];
    definitions.extend(columns.iter().map(|c| format!("{} TEXT", c.column)));
    definitions.push(format!("geom geometry(MultiPolygon, {})", srid));
    format!(
        "DROP TABLE IF EXISTS {table} CASCADE;\nCREATE TABLE {table} (\n    {}\n)",
        definitions.join(",\n    "),
        table = table
    )
}

fn insert_sql(table: &str, columns: &[PropertyColumn]) -> String {
    let mut names: Vec<&str> = columns.iter().map(|c| c.column.as_str()).collect();
    names.push("geom");
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}{}ST_GeomFromEWKB(${}))",
        table,
        names.join(", "),
        placeholders.join(", "),
        if placeholders.is_empty() { "" } else { ", " },
        columns.len() + 1
    )
}

fn index_sql(table: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {}_geom_idx ON {} USING GIST (geom)",
        table.replace('.', "_"),
        table
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_column_names() {
        assert_eq!(column_name("nup").as_deref(), Some("nup"));
        assert_eq!(column_name("Num TF").as_deref(), Some("num_tf"));
        assert_eq!(column_name("2024_zone").as_deref(), Some("_2024_zone"));
        assert_eq!(column_name("x\"; DROP").as_deref(), Some("x___drop"));
        assert_eq!(column_name(" - "), None);
        assert_eq!(column_name(&"a".repeat(80)).map(|c| c.len()), Some(63));
    }

    #[test]
    fn test_property_columns_first_seen_order() {
        let a = props(json!({"nup": "BJ-1", "gid": 4, "Num TF": "12"}));
        let b = props(json!({"num_tf": "13", "statut": null}));
        let columns = property_columns([&a, &b].into_iter());
        let names: Vec<&str> = columns.iter().map(|c| c.column.as_str()).collect();
        // gid est réservé, num_tf déjà pris par "Num TF"
        assert!(names.contains(&"nup"));
        assert!(names.contains(&"num_tf"));
        assert!(names.contains(&"statut"));
        assert!(!names.contains(&"gid"));
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_property_text() {
        assert_eq!(property_text(&json!("BJ-1")).as_deref(), Some("BJ-1"));
        assert_eq!(property_text(&json!(5521)).as_deref(), Some("5521"));
        assert_eq!(property_text(&Value::Null), None);
    }

    #[test]
    fn test_import_sql() {
        let columns = vec![
            PropertyColumn {
                key: "nup".to_string(),
                column: "nup".to_string(),
            },
            PropertyColumn {
                key: "Num TF".to_string(),
                column: "num_tf".to_string(),
            },
        ];
        let create = create_table_sql("andf.parcelles", &columns, 32631);
        assert!(create.starts_with("DROP TABLE IF EXISTS andf.parcelles CASCADE;"));
        assert!(create.contains("nup TEXT,"));
        assert!(create.contains("geom geometry(MultiPolygon, 32631)"));

        assert_eq!(
            insert_sql("andf.parcelles", &columns),
            "INSERT INTO andf.parcelles (nup, num_tf, geom) VALUES ($1, $2, ST_GeomFromEWKB($3))"
        );
        assert_eq!(
            insert_sql("dpl", &[]),
            "INSERT INTO dpl (geom) VALUES (ST_GeomFromEWKB($1))"
        );
        assert_eq!(
            index_sql("andf.parcelles"),
            "CREATE INDEX IF NOT EXISTS andf_parcelles_geom_idx ON andf.parcelles USING GIST (geom)"
        );
    }
}
