//! Documents et moteurs de reconnaissance
//!
//! Un moteur transforme les octets d'un plan de levé en texte brut. Les
//! moteurs sont des fonctions pures de leur entrée: ils tournent en parallèle
//! sur des threads bloquants et le consensus attend la fin de tous.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use futures::future::join_all;
use tracing::{debug, warn};

use leve::{ExtractionOptions, RecognizedText};

use crate::config::{BackendConfig, BackendKind, Config};
use crate::error::PipelineError;

/// Document chargé en mémoire
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub bytes: Bytes,
    /// Empreinte blake3 (hex)
    pub checksum: String,
}

impl Document {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

/// Source des documents téléversés
pub trait DocumentStore: Send + Sync {
    fn fetch(&self, reference: &str) -> Result<Document>;
}

/// Documents lus sur le système de fichiers
#[derive(Debug, Clone, Default)]
pub struct FsDocumentStore {
    root: Option<PathBuf>,
}

impl FsDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Résout les références relatives depuis `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        match &self.root {
            Some(root) if Path::new(reference).is_relative() => root.join(reference),
            _ => PathBuf::from(reference),
        }
    }
}

impl DocumentStore for FsDocumentStore {
    fn fetch(&self, reference: &str) -> Result<Document> {
        let path = self.resolve(reference);
        let (bytes, checksum) = read_with_checksum(&path)?;
        debug!(path = %path.display(), size = bytes.len(), "Document loaded");
        Ok(Document {
            path,
            bytes,
            checksum,
        })
    }
}

/// Lit un fichier et calcule son empreinte blake3 en un seul passage
fn read_with_checksum(path: &Path) -> Result<(Bytes, String)> {
    let mut file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    let mut content = BytesMut::new();
    let mut buffer = [0u8; 65536]; // 64KB buffer

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        content.extend_from_slice(&buffer[..bytes_read]);
    }

    Ok((content.freeze(), hex::encode(hasher.finalize().as_bytes())))
}

/// Moteur de reconnaissance: `recognize(image) -> texte brut`
pub trait RecognitionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn recognize(&self, document: &Document) -> Result<String, PipelineError>;
}

/// Le document est déjà du texte reconnu
#[derive(Debug, Clone)]
pub struct TextBackend {
    name: String,
}

impl TextBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl RecognitionBackend for TextBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&self, document: &Document) -> Result<String, PipelineError> {
        if document.bytes.contains(&0) {
            return Err(PipelineError::RecognitionFailure {
                backend: self.name.clone(),
                reason: "document is not text".into(),
            });
        }
        Ok(decode_text(&document.bytes))
    }
}

/// Décode du texte UTF-8, ou Windows-1252 à défaut
pub fn decode_text(bytes: &[u8]) -> String {
    match simdutf8::basic::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}

/// Texte écrit à côté du document par un moteur externe:
/// `plan.jpg` → `plan.jpg.<suffix>.txt`
#[derive(Debug, Clone)]
pub struct SidecarBackend {
    name: String,
    suffix: String,
}

impl SidecarBackend {
    pub fn new(name: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            suffix: suffix.into(),
        }
    }

    pub fn sidecar_path(&self, document: &Path) -> PathBuf {
        let mut name = document.as_os_str().to_os_string();
        name.push(format!(".{}.txt", self.suffix));
        PathBuf::from(name)
    }
}

impl RecognitionBackend for SidecarBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&self, document: &Document) -> Result<String, PipelineError> {
        let path = self.sidecar_path(&document.path);
        let bytes = std::fs::read(&path).map_err(|e| PipelineError::RecognitionFailure {
            backend: self.name.clone(),
            reason: format!("{}: {}", path.display(), e),
        })?;
        Ok(decode_text(&bytes))
    }
}

/// Commande externe (ex: `tesseract stdin stdout --psm 6`)
///
/// Un argument `{input}` est remplacé par le chemin du document; sinon les
/// octets du document sont écrits sur l'entrée standard.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    name: String,
    program: String,
    args: Vec<String>,
}

const INPUT_PLACEHOLDER: &str = "{input}";

impl CommandBackend {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }

    fn failure(&self, reason: impl ToString) -> PipelineError {
        PipelineError::RecognitionFailure {
            backend: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

impl RecognitionBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&self, document: &Document) -> Result<String, PipelineError> {
        let path = document.path.to_string_lossy();
        let uses_path = self.args.iter().any(|a| a.contains(INPUT_PLACEHOLDER));
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(INPUT_PLACEHOLDER, &path))
            .collect();

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(if uses_path {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.failure(format!("cannot run {}: {}", self.program, e)))?;

        // Écriture sur un thread séparé pour ne pas bloquer sur stdout
        let writer = child.stdin.take().map(|mut stdin| {
            let input = document.bytes.clone();
            std::thread::spawn(move || stdin.write_all(&input))
        });

        let output = child
            .wait_with_output()
            .map_err(|e| self.failure(e))?;

        if let Some(handle) = writer {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(self.failure(format!("stdin write failed: {}", e))),
                Err(_) => return Err(self.failure("stdin writer panicked")),
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failure(format!("{}: {}", output.status, stderr.trim())));
        }
        Ok(decode_text(&output.stdout))
    }
}

/// Construit un moteur depuis sa configuration
pub fn backend_from_config(config: &BackendConfig) -> Arc<dyn RecognitionBackend> {
    match &config.kind {
        BackendKind::Text => Arc::new(TextBackend::new(&config.name)),
        BackendKind::Sidecar { suffix } => Arc::new(SidecarBackend::new(&config.name, suffix)),
        BackendKind::Command { program, args } => {
            Arc::new(CommandBackend::new(&config.name, program, args.clone()))
        }
    }
}

/// Textes reconnus et échecs par moteur
#[derive(Debug, Default)]
pub struct RecognitionOutcome {
    pub texts: Vec<RecognizedText>,
    pub failures: Vec<PipelineError>,
}

/// Contexte partagé en lecture seule par toutes les exécutions
#[derive(Clone)]
pub struct RecognitionContext {
    backends: Vec<Arc<dyn RecognitionBackend>>,
    options: Arc<ExtractionOptions>,
}

impl RecognitionContext {
    pub fn new(backends: Vec<Arc<dyn RecognitionBackend>>, options: ExtractionOptions) -> Self {
        Self {
            backends,
            options: Arc::new(options),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let backends = config.backends.iter().map(backend_from_config).collect();
        Self::new(backends, config.extraction_options())
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    /// Lance tous les moteurs sur le document et attend qu'ils aient tous terminé
    pub async fn recognize_all(&self, document: Arc<Document>) -> RecognitionOutcome {
        let tasks = self.backends.iter().map(|backend| {
            let backend = Arc::clone(backend);
            let document = Arc::clone(&document);
            async move {
                let name = backend.name().to_string();
                let joined =
                    tokio::task::spawn_blocking(move || backend.recognize(&document)).await;
                match joined {
                    Ok(Ok(text)) if text.trim().is_empty() => Err(PipelineError::RecognitionFailure {
                        backend: name,
                        reason: "empty text".into(),
                    }),
                    Ok(Ok(text)) => Ok(RecognizedText::new(name, text)),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(PipelineError::RecognitionFailure {
                        backend: name,
                        reason: format!("task failed: {}", e),
                    }),
                }
            }
        });

        let mut outcome = RecognitionOutcome::default();
        for result in join_all(tasks).await {
            match result {
                Ok(text) => outcome.texts.push(text),
                Err(e) => {
                    warn!(error = %e, "Recognition backend failed");
                    outcome.failures.push(e);
                }
            }
        }
        outcome
    }
}
