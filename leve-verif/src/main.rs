//! Point d'entrée CLI pour leve-verif

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// Charger .env au démarrage
fn load_env() {
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

mod cli;

use cli::Commands;

/// Vérifier un plan de levé contre les couches foncières de référence
#[derive(Parser)]
#[command(name = "leve-verif")]
#[command(author, version)]
#[command(about = "Extraire les bornes d'un plan de levé et détecter les conflits fonciers")]
#[command(long_about = "Extrait les bornes d'un plan de levé à partir du texte reconnu (OCR), construit la parcelle puis la confronte aux couches de référence (parcelles existantes, domaine public, zones protégées, litiges, restrictions).")]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Process {
            path,
            upload_id,
            output,
            geojson,
            source,
            database,
        } => {
            info!(path = %path.display(), config = %source.config, "Process survey document");
            cli::cmd_process(
                &path,
                upload_id,
                output.as_deref(),
                geojson.as_deref(),
                &source,
                database,
            )
            .await?;
        }
        Commands::Batch {
            path,
            output,
            jobs,
            source,
            database,
        } => {
            info!(path = %path.display(), output = %output.display(), jobs = ?jobs, "Batch processing");
            cli::cmd_batch(&path, &output, jobs, &source, database).await?;
        }
        Commands::Layers { source, database } => {
            cli::cmd_layers(&source, database).await?;
        }
        Commands::ImportLayers {
            layers_dir,
            config,
            database,
        } => {
            info!(layers_dir = %layers_dir.display(), config = %config, "Import reference layers");
            cli::cmd_import_layers(&layers_dir, &config, database).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
