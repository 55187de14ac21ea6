//! # leve-verif
//!
//! Vérification d'un plan de levé: de la reconnaissance du document jusqu'au
//! rapport de conflits fonciers.
//!
//! ## Étapes
//!
//! 1. Reconnaissance du document par plusieurs moteurs (texte, fichiers
//!    compagnons, commandes externes)
//! 2. Extraction des bornes par consensus (crate `leve`)
//! 3. Construction de la parcelle (UTM 31N, EPSG:32631)
//! 4. Chevauchements avec les couches de référence, chacune bornée dans le temps
//! 5. Classement des conflits, recommandations et statut de la parcelle
//!
//! Les couches de référence sont lues en PostGIS ou chargées depuis des
//! fichiers GeoJSON (que `db::import_layers` peut verser dans PostGIS); les
//! enregistrements vont en PostgreSQL ou en mémoire.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use leve_verif::config::Config;
//! use leve_verif::pipeline::ProcessOrchestrator;
//!
//! let config = Config::from_preset("benin")?;
//! let orchestrator = ProcessOrchestrator::from_config(&config, documents, spatial, store);
//! let run = orchestrator.process("plans/leve_01.png").await;
//! println!("{}", run.status());
//! ```

pub mod config;
pub mod conflicts;
pub mod db;
pub mod error;
pub mod export;
pub mod overlap;
pub mod pipeline;
pub mod recognition;
pub mod report;
pub mod reproject;
pub mod spatial;
pub mod store;

pub use error::PipelineError;
pub use pipeline::{ProcessOrchestrator, ProcessRun, ProcessingStatus, Upload};
