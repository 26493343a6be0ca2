use std::{str::FromStr, sync::Arc};

use clap::Parser;
use essay_pipeline::{
    audit::SqliteAuditRepository,
    config::{Config, OcrEngineKind, Opts},
    llm::LlmCapability,
    object_store::FsObjectStore,
    ocr::{OcrCapability, engines},
    pipeline::PipelineRunner,
    prelude::*,
    queue::{sqlite_store::SqliteQueueStore, worker::Worker},
    repository::SqliteSubmissionRepository,
};
use rusqlite::Connection;
use std::sync::Mutex;
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt as _,
};

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing.
    let directive = Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder().with_default_directive(directive).from_env_lossy();
    let subscriber =
        tracing_subscriber::fmt::layer().with_span_events(FmtSpan::NEW | FmtSpan::CLOSE).with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main().await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main() -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    let config = Config::load(opts.config.as_deref()).await?;
    config.validate()?;

    if opts.config_check {
        println!("{}", serde_json::to_string_pretty(&config_as_json(&config)?)?);
        return Ok(());
    }

    let conn = Arc::new(Mutex::new(
        Connection::open(&opts.db_path).with_context(|| format!("failed to open database at {:?}", opts.db_path))?,
    ));

    let submissions = Arc::new(SqliteSubmissionRepository::new(conn.clone())?);
    let audit = Arc::new(SqliteAuditRepository::new(conn.clone())?);
    let queue: Arc<SqliteQueueStore> = Arc::new(SqliteQueueStore::new(conn.clone())?);

    let object_store = Arc::new(FsObjectStore::new(opts.storage_root.clone()));
    let ocr = OcrCapability::new(build_ocr_engine(opts.ocr_engine, &opts.llm_model).await?);
    let llm = LlmCapability::new(opts.llm_model.clone());

    let runner = Arc::new(PipelineRunner::new(object_store, ocr, llm, submissions.clone(), audit.clone(), config.clone()));
    let worker = Arc::new(Worker::new(queue, submissions, audit, runner, config.worker.clone(), opts.concurrency));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received, shutting down after the current job finishes");
        let _ = shutdown_tx.send(());
    });

    info!(db_path = ?opts.db_path, concurrency = opts.concurrency, "starting essay-worker");
    worker.run_until(shutdown_rx).await
}

async fn build_ocr_engine(kind: OcrEngineKind, llm_model: &str) -> Result<Arc<dyn engines::OcrEngine>> {
    match kind {
        OcrEngineKind::Stub => Ok(Arc::new(engines::stub::StubOcrEngine)),
        OcrEngineKind::Textract => Ok(Arc::new(engines::textract::TextractOcrEngine::new().await?)),
        OcrEngineKind::LlmVision => Ok(Arc::new(engines::llm_vision::LlmVisionOcrEngine::new(llm_model.to_string()))),
    }
}

fn config_as_json(config: &Config) -> Result<Value> {
    serde_json::to_value(ConfigView {
        worker: &config.worker,
        analyzer: &config.analyzer,
        ocr: &config.ocr,
        extractor: &config.extractor,
    })
    .context("failed to serialize effective configuration")
}

/// `Config`'s own fields don't derive `Serialize` (only `Deserialize`, since
/// it is load-only); this mirrors just the scalar knobs worth printing for
/// `--config-check`, the way the teacher's `cmd::schema` subcommand prints a
/// derived view rather than round-tripping an internal type.
#[derive(serde::Serialize)]
struct ConfigView<'a> {
    worker: &'a essay_pipeline::config::WorkerConfig,
    analyzer: &'a essay_pipeline::config::AnalyzerConfig,
    ocr: &'a essay_pipeline::config::OcrConfig,
    extractor: &'a essay_pipeline::config::ExtractorConfig,
}
