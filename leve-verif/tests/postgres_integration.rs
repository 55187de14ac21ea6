//! Tests d'intégration PostgreSQL/PostGIS
//!
//! Ces tests nécessitent une base PostGIS disponible.
//! Configuration via variables d'environnement:
//! - PGHOST, PGPORT, PGUSER, PGPASSWORD, PGDATABASE
//!
//! Exécution:
//! ```bash
//! docker run -d --name postgis-test -e POSTGRES_PASSWORD=test -p 5432:5432 postgis/postgis
//! PGPASSWORD=test PGDATABASE=postgres cargo test --test postgres_integration -- --ignored
//! ```

use std::sync::Arc;

use anyhow::Result;
use deadpool_postgres::Pool;
use geo::polygon;

use leve::ParcelStatus;
use leve_verif::config::Config;
use leve_verif::db::{create_pool, import_layers, test_connection, DatabaseConfig};
use leve_verif::recognition::FsDocumentStore;
use leve_verif::spatial::{MemoryLayers, PostgisLayers, SpatialQuery};
use leve_verif::store::PgStore;
use leve_verif::{ProcessOrchestrator, ProcessingStatus, Upload};

const REF_SCHEMA: &str = "leve_ref_test";
const STORE_SCHEMA: &str = "leve_test";

const SCENARIO: &str = "B1 401374.38 712334.71 B2 401378.12 712287.17 B3 401353.24 712284.56 B4 401349.45 712332.75";

async fn create_test_pool() -> Result<Pool> {
    let pool = create_pool(&DatabaseConfig::from_env()).await?;
    test_connection(&pool).await?;
    Ok(pool)
}

/// Couches de référence de test: toutes vides sauf une bande lagunaire
async fn setup_reference_layers(pool: &Pool, config: &mut Config) -> Result<()> {
    let client = pool.get().await?;
    client
        .batch_execute(&format!(
            "DROP SCHEMA IF EXISTS {REF_SCHEMA} CASCADE;
             DROP SCHEMA IF EXISTS {STORE_SCHEMA} CASCADE;
             CREATE SCHEMA {REF_SCHEMA};
             CREATE EXTENSION IF NOT EXISTS postgis;"
        ))
        .await?;

    for layer in &mut config.layers {
        layer.table = format!("{}.{}", REF_SCHEMA, layer.name);
        client
            .batch_execute(&format!(
                "CREATE TABLE {table} (
                    gid SERIAL PRIMARY KEY,
                    id TEXT,
                    nup TEXT,
                    num_tf TEXT,
                    geom geometry(MultiPolygon, 32631)
                )",
                table = layer.table
            ))
            .await?;
    }

    client
        .execute(
            &format!(
                "INSERT INTO {REF_SCHEMA}.dpl (id, geom) VALUES ('lagune-1',
                 ST_Multi(ST_MakeEnvelope(401340, 712280, 401356, 712340, 32631)))"
            ),
            &[],
        )
        .await?;
    Ok(())
}

fn orchestrator(pool: &Pool, config: &Config, root: &std::path::Path) -> Result<ProcessOrchestrator> {
    let store = PgStore::new(pool.clone(), STORE_SCHEMA, config.survey_srid)?;
    Ok(ProcessOrchestrator::from_config(
        config,
        Arc::new(FsDocumentStore::with_root(root)),
        Arc::new(PostgisLayers::new(pool.clone(), config.survey_srid)),
        Arc::new(store),
    ))
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_database_connection() {
    let pool = create_test_pool().await.expect("Failed to create pool");
    let client = pool.get().await.expect("Failed to get client");
    let row = client
        .query_one("SELECT PostGIS_Version() AS version", &[])
        .await
        .expect("PostGIS not available");
    let version: String = row.get("version");
    assert!(!version.is_empty());
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_layer_status() {
    let pool = create_test_pool().await.expect("Failed to create pool");
    let mut config = Config::from_preset("benin").unwrap();
    setup_reference_layers(&pool, &mut config).await.unwrap();

    let layers = PostgisLayers::new(pool.clone(), 32631);
    let dpl = config.get_layer("dpl").unwrap();
    let status = layers.layer_status(dpl).await.unwrap();
    assert!(status.available);
    assert_eq!(status.feature_count, Some(1));

    let mut missing = dpl.clone();
    missing.table = format!("{}.absente", REF_SCHEMA);
    assert!(!layers.layer_status(&missing).await.unwrap().available);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_verification_is_replaced_atomically() {
    let pool = create_test_pool().await.expect("Failed to create pool");
    let mut config = Config::from_preset("benin").unwrap();
    config.backends.retain(|b| b.name == "text");
    setup_reference_layers(&pool, &mut config).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("leve.txt"), SCENARIO).unwrap();
    let store = PgStore::new(pool.clone(), STORE_SCHEMA, 32631).unwrap();
    store.ensure_schema().await.unwrap();
    let orchestrator = orchestrator(&pool, &config, dir.path()).unwrap();

    // deux analyses du même téléversement: la seconde remplace la première
    for _ in 0..2 {
        let run = orchestrator
            .process_upload(Upload::with_id("leve-pg-1", "leve.txt"))
            .await;
        assert_eq!(run.status(), ProcessingStatus::Completed, "{:?}", run.upload.error);
        assert_eq!(run.parcel().map(|p| p.status), Some(ParcelStatus::Conflict));
    }

    let client = pool.get().await.unwrap();
    let row = client
        .query_one(
            &format!(
                "SELECT COUNT(*) AS n, MIN(conflict_type) AS kind, MIN(severity) AS severity
                 FROM {STORE_SCHEMA}.conflicts WHERE upload_id = $1"
            ),
            &[&"leve-pg-1"],
        )
        .await
        .unwrap();
    let count: i64 = row.get("n");
    let kind: String = row.get("kind");
    let severity: String = row.get("severity");
    assert_eq!(count, 1);
    assert_eq!(kind, "overlap_dpl");
    assert_eq!(severity, "critical");

    let row = client
        .query_one(
            &format!(
                "SELECT u.status, p.status AS parcel_status, ST_NPoints(p.geom) AS npoints
                 FROM {STORE_SCHEMA}.uploads u JOIN {STORE_SCHEMA}.parcels p ON p.upload_id = u.id
                 WHERE u.id = $1"
            ),
            &[&"leve-pg-1"],
        )
        .await
        .unwrap();
    let status: String = row.get("status");
    let parcel_status: String = row.get("parcel_status");
    let npoints: i32 = row.get("npoints");
    assert_eq!(status, "completed");
    assert_eq!(parcel_status, "conflict");
    assert_eq!(npoints, 5);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_import_layers_then_query() {
    let pool = create_test_pool().await.expect("Failed to create pool");
    let mut config = Config::from_preset("benin").unwrap();
    config.layers.retain(|l| l.name == "parcelles" || l.name == "dpl");
    {
        let client = pool.get().await.unwrap();
        client
            .batch_execute(&format!(
                "DROP SCHEMA IF EXISTS {REF_SCHEMA} CASCADE;
                 CREATE SCHEMA {REF_SCHEMA};
                 CREATE EXTENSION IF NOT EXISTS postgis;"
            ))
            .await
            .unwrap();
    }
    for layer in &mut config.layers {
        layer.table = format!("{}.{}", REF_SCHEMA, layer.name);
    }

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("parcelles.geojson"),
        r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"nup": "BJ-COT-0042", "num_tf": 5521},
             "geometry": {"type": "Polygon", "coordinates":
                [[[401340, 712280], [401390, 712280], [401390, 712340], [401340, 712340], [401340, 712280]]]}}
        ]}"#,
    )
    .unwrap();
    let layers = MemoryLayers::load_dir(dir.path(), &config.layers).unwrap();

    let imports = import_layers(&pool, &layers, &config.layers, 32631).await.unwrap();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].features, 1);
    assert_eq!(imports[0].columns, vec!["nup", "num_tf"]);

    // un second import remplace la table
    import_layers(&pool, &layers, &config.layers, 32631).await.unwrap();

    let postgis = PostgisLayers::new(pool.clone(), 32631);
    let parcelles = config.get_layer("parcelles").unwrap();
    let status = postgis.layer_status(parcelles).await.unwrap();
    assert_eq!(status.feature_count, Some(1));

    let parcel = polygon![
        (x: 401350.0, y: 712290.0),
        (x: 401380.0, y: 712290.0),
        (x: 401380.0, y: 712330.0),
        (x: 401350.0, y: 712330.0),
        (x: 401350.0, y: 712290.0),
    ];
    let hits = postgis.intersects(&parcel, parcelles, 0.0).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].object_id, "BJ-COT-0042");
    assert_eq!(hits[0].property("num_tf").as_deref(), Some("5521"));
    assert!((hits[0].overlap_percentage - 100.0).abs() < 1e-6);

    let client = pool.get().await.unwrap();
    let row = client
        .query_one(
            "SELECT COUNT(*) AS n FROM pg_indexes WHERE schemaname = $1 AND indexname = $2",
            &[&REF_SCHEMA, &format!("{}_parcelles_geom_idx", REF_SCHEMA)],
        )
        .await
        .unwrap();
    let indexes: i64 = row.get("n");
    assert_eq!(indexes, 1);
}
