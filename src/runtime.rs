//! Embedder entry point: configuration, engine startup, and the background
//! tasks that keep a running engine healthy.

use std::path::PathBuf;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::info;
use ulid::Ulid;

use crate::autoclose::{run_autoclose, run_compactor};
use crate::directory::Directory;
use crate::engine::{Engine, EngineError};
use crate::model::{ResponseRecord, SubmissionPayload, UserId};
use crate::notify::NotifyHub;
use crate::observability;

const AUTOCLOSE_CHANNEL_CAPACITY: usize = 1024;

/// Install the default tracing subscriber with `RUST_LOG`-style filtering.
/// Optional; embedders with their own subscriber skip this.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Runtime knobs, usually read from the environment.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory the WAL lives in. Created if missing.
    pub data_dir: PathBuf,
    /// Prometheus exporter port; disabled when None.
    pub metrics_port: Option<u16>,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
        }
    }
}

impl RuntimeConfig {
    /// Read `AULA_DATA_DIR`, `AULA_METRICS_PORT`, and
    /// `AULA_COMPACT_THRESHOLD`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("AULA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: std::env::var("AULA_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            compact_threshold: std::env::var("AULA_COMPACT_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
        }
    }
}

/// A started engine with its background tasks spawned.
pub struct Runtime {
    engine: Arc<Engine>,
}

impl Runtime {
    /// Replay the WAL under `config.data_dir`, install metrics, and spawn
    /// the auto-close and compaction tasks.
    pub fn open(
        config: RuntimeConfig,
        directory: Arc<dyn Directory>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        std::fs::create_dir_all(&config.data_dir)?;
        observability::init(config.metrics_port)?;

        let wal_path = config.data_dir.join("aula.wal");
        let notify = Arc::new(NotifyHub::new());
        let (autoclose_tx, autoclose_rx) = mpsc::channel(AUTOCLOSE_CHANNEL_CAPACITY);
        let engine = Arc::new(Engine::new(wal_path, notify, directory, autoclose_tx)?);

        tokio::spawn(run_autoclose(engine.clone(), autoclose_rx));
        tokio::spawn(run_compactor(engine.clone(), config.compact_threshold));
        info!("engine started: data_dir={}", config.data_dir.display());

        Ok(Self { engine })
    }

    /// The engine, for direct operation calls.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Submit with a single retry on a version conflict. Any other error
    /// surfaces unchanged.
    pub async fn submit(
        &self,
        student_id: UserId,
        question_id: Ulid,
        payload: SubmissionPayload,
        now: OffsetDateTime,
    ) -> Result<ResponseRecord, EngineError> {
        match self
            .engine
            .submit(student_id, question_id, payload.clone(), now)
            .await
        {
            Err(EngineError::Conflict(_)) => {
                self.engine.submit(student_id, question_id, payload, now).await
            }
            other => other,
        }
    }
}
