//! Définition et implémentation des commandes CLI
//!
//! - `process`: un plan de levé → rapport de vérification
//! - `batch`: tous les plans d'un répertoire, en parallèle borné
//! - `layers`: disponibilité des couches de référence
//! - `import-layers`: chargement des couches GeoJSON dans PostGIS

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use deadpool_postgres::Pool;
use tracing::{info, warn};

use leve_verif::config::{BackendKind, Config};
use leve_verif::db::{create_pool, import_layers, test_connection, DatabaseConfig};
use leve_verif::export::{conflict_features, export_to_geojson, parcel_feature, GeoFeature};
use leve_verif::pipeline::{ProcessOrchestrator, ProcessRun, ProcessingStatus, Upload};
use leve_verif::recognition::FsDocumentStore;
use leve_verif::report::ProcessReport;
use leve_verif::reproject::Reprojector;
use leve_verif::spatial::{MemoryLayers, PostgisLayers, SpatialQuery};
use leve_verif::store::{MemoryStore, PgStore, RecordStore};

/// Extensions des documents traités par `batch`
const DOCUMENT_EXTENSIONS: &[&str] = &["txt", "png", "jpg", "jpeg", "tif", "tiff", "pdf"];

#[derive(Subcommand)]
pub enum Commands {
    /// Extract a survey sheet and verify the parcel against reference layers
    Process {
        /// Path to the survey document
        #[arg(short, long)]
        path: PathBuf,

        /// Upload identifier (default: random UUID)
        #[arg(long)]
        upload_id: Option<String>,

        /// Write the JSON report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write parcel and conflict GeoJSON files to this directory
        #[arg(long)]
        geojson: Option<PathBuf>,

        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Process every survey document of a directory
    Batch {
        /// Directory containing survey documents
        #[arg(short, long)]
        path: PathBuf,

        /// Output directory for JSON reports
        #[arg(short, long)]
        output: PathBuf,

        /// Maximum number of documents processed concurrently
        #[arg(long, alias = "threads")]
        jobs: Option<usize>,

        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// List configured reference layers and their availability
    Layers {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Load GeoJSON reference layers into PostGIS tables
    ImportLayers {
        /// Directory of GeoJSON reference layers
        #[arg(long)]
        layers_dir: PathBuf,

        /// Config preset name (benin) or path to a JSON config
        #[arg(long, default_value = "benin")]
        config: String,

        #[command(flatten)]
        database: DatabaseArgs,
    },
}

/// Configuration et origine des couches de référence
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Config preset name (benin) or path to a JSON config
    #[arg(long, default_value = "benin")]
    pub config: String,

    /// Directory of GeoJSON reference layers
    #[arg(long, conflicts_with = "postgis")]
    pub layers_dir: Option<PathBuf>,

    /// Query reference layers in PostGIS and store records there
    #[arg(long)]
    pub postgis: bool,

    /// PostgreSQL schema for upload/parcel/verification records
    #[arg(long, default_value = "leve")]
    pub schema: String,

    /// Output SRID for GeoJSON geometries (default: config output SRID)
    #[arg(long)]
    pub srid: Option<u32>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DatabaseArgs {
    /// PostgreSQL host (défaut : env PGHOST / localhost)
    #[arg(long)]
    pub host: Option<String>,

    /// PostgreSQL database name (défaut : env PGDATABASE / andf)
    #[arg(long)]
    pub database: Option<String>,

    /// PostgreSQL user (défaut : env PGUSER / postgres)
    #[arg(long)]
    pub user: Option<String>,

    /// PostgreSQL password (défaut : env PGPASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// PostgreSQL port (défaut : env PGPORT / 5432)
    #[arg(long)]
    pub port: Option<u16>,

    /// SSL mode: disable, prefer, require (défaut : env PGSSLMODE / disable)
    #[arg(long)]
    pub ssl: Option<String>,
}

/// Services partagés par toutes les exécutions
struct Services {
    config: Config,
    spatial: Arc<dyn SpatialQuery>,
    store: Arc<dyn RecordStore>,
    reprojector: Reprojector,
}

async fn build_services(source: &SourceArgs, database: DatabaseArgs) -> Result<Services> {
    let config = Config::resolve(&source.config)
        .with_context(|| format!("Failed to load config {}", source.config))?;
    let reprojector = Reprojector::new(config.survey_srid, source.srid.unwrap_or(config.output_srid))?;

    let (spatial, store): (Arc<dyn SpatialQuery>, Arc<dyn RecordStore>) = if source.postgis {
        let pool = connect(database).await?;
        let store = PgStore::new(pool.clone(), source.schema.clone(), config.survey_srid)?;
        store.ensure_schema().await?;
        println!("Records: schema {}", source.schema);

        let spatial: Arc<dyn SpatialQuery> =
            Arc::new(PostgisLayers::new(pool, config.survey_srid));
        let store: Arc<dyn RecordStore> = Arc::new(store);
        (spatial, store)
    } else {
        let layers = match &source.layers_dir {
            Some(dir) => MemoryLayers::load_dir(dir, &config.layers)?,
            None => {
                warn!("No reference layers directory given, every layer will be skipped");
                MemoryLayers::new()
            }
        };
        let spatial: Arc<dyn SpatialQuery> = Arc::new(layers);
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        (spatial, store)
    };

    Ok(Services {
        config,
        spatial,
        store,
        reprojector,
    })
}

async fn connect(database: DatabaseArgs) -> Result<Pool> {
    let mut db_config = DatabaseConfig::from_env();
    db_config.apply_overrides(
        database.host,
        database.database,
        database.user,
        database.password,
        database.port,
        database.ssl,
    );
    println!(
        "Database: {}@{}:{}/{} (SSL: {:?})",
        db_config.user, db_config.host, db_config.port, db_config.dbname, db_config.ssl_mode
    );

    let pool = create_pool(&db_config).await?;
    test_connection(&pool).await?;
    println!("Connected to PostgreSQL");
    Ok(pool)
}

fn orchestrator(services: &Services) -> ProcessOrchestrator {
    ProcessOrchestrator::from_config(
        &services.config,
        Arc::new(FsDocumentStore::new()),
        Arc::clone(&services.spatial),
        Arc::clone(&services.store),
    )
}

/// Annule les exécutions en cours sur Ctrl-C, à la prochaine étape
fn cancel_on_interrupt(orchestrator: &ProcessOrchestrator) {
    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling at the next stage boundary");
            cancel.store(true, Ordering::SeqCst);
        }
    });
}

/// Exécute la commande process
pub async fn cmd_process(
    path: &Path,
    upload_id: Option<String>,
    output: Option<&Path>,
    geojson: Option<&Path>,
    source: &SourceArgs,
    database: DatabaseArgs,
) -> Result<()> {
    let services = build_services(source, database).await?;
    println!("=== Process {} ===", path.display());
    println!("Config: {}", source.config);
    println!(
        "Projection: EPSG:{} -> EPSG:{}",
        services.reprojector.source_epsg(),
        services.reprojector.target_epsg()
    );

    let orchestrator = orchestrator(&services);
    cancel_on_interrupt(&orchestrator);

    let reference = path.to_string_lossy().to_string();
    let upload = match upload_id {
        Some(id) => Upload::with_id(id, reference),
        None => Upload::new(reference),
    };
    info!(upload_id = %upload.id, path = %path.display(), "Processing survey document");

    let run = orchestrator.process_upload(upload).await;
    let report = ProcessReport::from_run(&run, &services.reprojector)?;
    report.display();

    if let Some(output) = output {
        report.save_to_file(output)?;
        println!("Report saved to {}", output.display());
    }
    if let Some(dir) = geojson {
        write_geojson(&run, &services.reprojector, dir)?;
    }

    if let Some(error) = &run.upload.error {
        anyhow::bail!("Processing failed: {}", error);
    }
    Ok(())
}

/// Exécute la commande batch
pub async fn cmd_batch(
    path: &Path,
    output: &Path,
    jobs: Option<usize>,
    source: &SourceArgs,
    database: DatabaseArgs,
) -> Result<()> {
    let services = build_services(source, database).await?;
    let documents = collect_documents(path, &services.config)?;
    if documents.is_empty() {
        anyhow::bail!("No survey documents found in {}", path.display());
    }

    let jobs = jobs.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });
    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory: {}", output.display()))?;

    println!("=== Batch {} ===", path.display());
    println!("Documents: {}", documents.len());
    println!("Jobs: {}", jobs);
    println!("Config: {}", source.config);

    let orchestrator = orchestrator(&services);
    cancel_on_interrupt(&orchestrator);

    let started = Instant::now();
    let references: Vec<String> = documents
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    let runs = orchestrator.process_batch(references, jobs).await;

    let mut by_status: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut failed = 0;
    for run in &runs {
        let report = ProcessReport::from_run(run, &services.reprojector)?;
        let stem = Path::new(&run.upload.document)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        report.save_to_file(&output.join(format!("{}_{}.json", stem, run.upload.id)))?;
        println!("  {}", report.summary());

        if run.status() == ProcessingStatus::Error {
            failed += 1;
        } else if let Some(parcel) = run.parcel() {
            *by_status.entry(parcel.status.as_str()).or_insert(0) += 1;
        }
    }

    println!("\n=== Summary ===");
    println!("Processed: {} in {:.1}s", runs.len(), started.elapsed().as_secs_f64());
    for (status, count) in &by_status {
        println!("  {}: {}", status, count);
    }
    println!("  failed: {}", failed);
    println!("Reports: {}", output.display());

    Ok(())
}

/// Exécute la commande layers
pub async fn cmd_layers(source: &SourceArgs, database: DatabaseArgs) -> Result<()> {
    let services = build_services(source, database).await?;

    println!("=== Reference layers ({}) ===", services.config.layers.len());
    for layer in &services.config.layers {
        let status = match services.spatial.layer_status(layer).await {
            Ok(s) if s.available => match s.feature_count {
                Some(n) => format!("available ({} features)", n),
                None => "available".to_string(),
            },
            Ok(_) => "missing".to_string(),
            Err(e) => format!("error: {:#}", e),
        };
        println!(
            "  {:<14} {:<24} {:<15} {}",
            layer.name,
            layer.role.as_str(),
            format!("{:?}", layer.regime),
            status
        );
    }

    Ok(())
}

/// Exécute la commande import-layers
pub async fn cmd_import_layers(
    layers_dir: &Path,
    config: &str,
    database: DatabaseArgs,
) -> Result<()> {
    let config = Config::resolve(config)
        .with_context(|| format!("Failed to load config {}", config))?;
    let layers = MemoryLayers::load_dir(layers_dir, &config.layers)?;
    let pool = connect(database).await?;

    println!("=== Import layers from {} ===", layers_dir.display());
    let started = Instant::now();
    let imports = import_layers(&pool, &layers, &config.layers, config.survey_srid).await?;

    for import in &imports {
        println!(
            "  {:<14} -> {:<24} {} features, {} columns",
            import.layer,
            import.table,
            import.features,
            import.columns.len()
        );
    }
    let missing = config.layers.len() - imports.len();
    if missing > 0 {
        println!("  {} layer(s) without a GeoJSON file", missing);
    }
    println!(
        "Imported {} layer(s) in {:.1}s",
        imports.len(),
        started.elapsed().as_secs_f64()
    );

    Ok(())
}

/// Liste les documents d'un répertoire, fichiers de reconnaissance exclus
fn collect_documents(path: &Path, config: &Config) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let sidecar_suffixes: Vec<String> = config
        .backends
        .iter()
        .filter_map(|b| match &b.kind {
            BackendKind::Sidecar { suffix } => Some(format!(".{}.txt", suffix)),
            _ => None,
        })
        .collect();

    let mut documents = Vec::new();
    for entry in std::fs::read_dir(path)
        .with_context(|| format!("Failed to read directory: {}", path.display()))?
    {
        let entry_path = entry?.path();
        let Some(name) = entry_path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || sidecar_suffixes.iter().any(|s| name.ends_with(s.as_str())) {
            continue;
        }
        let extension = entry_path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        if extension.is_some_and(|e| DOCUMENT_EXTENSIONS.contains(&e.as_str())) {
            documents.push(entry_path);
        }
    }
    documents.sort();
    Ok(documents)
}

/// Écrit la parcelle et les conflits en GeoJSON
fn write_geojson(run: &ProcessRun, reprojector: &Reprojector, dir: &Path) -> Result<()> {
    let Some(parcel) = run.parcel() else {
        warn!(upload_id = %run.upload.id, "No parcel to export");
        return Ok(());
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let parcel_path = dir.join(format!("{}_parcelle.geojson", run.upload.id));
    let parcel = parcel_feature(&run.upload.id, parcel).reprojected(reprojector)?;
    export_to_geojson(&[parcel], reprojector.target_epsg(), &parcel_path)?;
    println!("Parcel GeoJSON: {}", parcel_path.display());

    if let Some(verification) = &run.verification {
        let conflicts: Vec<GeoFeature> = conflict_features(verification)
            .iter()
            .map(|f| f.reprojected(reprojector))
            .collect::<Result<_>>()?;
        let conflicts_path = dir.join(format!("{}_conflits.geojson", run.upload.id));
        export_to_geojson(&conflicts, reprojector.target_epsg(), &conflicts_path)?;
        println!("Conflicts GeoJSON: {} ({} features)", conflicts_path.display(), conflicts.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_documents_skips_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "leve_01.png",
            "leve_01.png.easyocr.txt",
            "leve_02.txt",
            ".hidden.txt",
            "notes.md",
        ] {
            std::fs::write(dir.path().join(name), b"B1").unwrap();
        }
        let config = Config::from_preset("benin").unwrap();
        let documents = collect_documents(dir.path(), &config).unwrap();
        let names: Vec<_> = documents
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["leve_01.png", "leve_02.txt"]);
    }
}
