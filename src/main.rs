use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use signsphere_asset_server::assets::{
    AssetFilters, AssetLocks, AssetRepository, AssetStore, AssetUpdate, IntegrityScanner,
    Pagination, SqliteAssetStore, Variant, DEFAULT_PAGE_LIMIT,
};
use signsphere_asset_server::config::{AppConfig, CliConfig, FileConfig};
use signsphere_asset_server::ingestion::{
    FfmpegTranscoder, FfprobeProber, FileHandler, IngestOptions, IngestRequest, IngestionManager,
    MediaProber, StorageLayout, TranscodeQueue, TranscodeWorker, Transcoder,
};
use signsphere_asset_server::metrics;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_variant(s: &str) -> Result<Variant> {
    Variant::parse(s).with_context(|| format!("Unknown model type {:?}, expected male or female", s))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the asset database.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Root of the media tree. Defaults to `<db-dir>/media`.
    #[clap(long, value_parser = parse_path)]
    pub media_path: Option<PathBuf>,

    /// Path to a TOML config file. Its values override the CLI.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Number of clips transcoded at the same time.
    #[clap(long)]
    pub worker_pool_size: Option<usize>,

    /// Largest accepted upload, e.g. "500 MiB".
    #[clap(long)]
    pub max_upload_size: Option<String>,

    #[clap(long)]
    pub ffmpeg_path: Option<String>,

    #[clap(long)]
    pub ffprobe_path: Option<String>,

    /// Write Prometheus metrics to this file before exiting.
    #[clap(long, value_parser = parse_path)]
    pub metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingests a clip and waits for its transcode.
    Ingest {
        #[clap(value_parser = parse_path)]
        file: PathBuf,
        /// male or female.
        variant: String,
        #[clap(long)]
        display_name: Option<String>,
        #[clap(long)]
        description: Option<String>,
        #[clap(long)]
        tags: Option<String>,
        #[clap(long)]
        content_type: Option<String>,
        /// Refuse the upload if a likely duplicate exists.
        #[clap(long)]
        reject_duplicates: bool,
        /// Return right after the asset is registered.
        #[clap(long)]
        no_wait: bool,
    },

    /// Shows one asset.
    Get { id: i64 },

    /// Updates asset metadata. Only given fields change.
    Update {
        id: i64,
        #[clap(long)]
        display_name: Option<String>,
        #[clap(long)]
        description: Option<String>,
        #[clap(long)]
        tags: Option<String>,
        #[clap(long)]
        content_type: Option<String>,
        #[clap(long)]
        active: Option<bool>,
    },

    /// Searches the catalog.
    Search {
        #[clap(long, value_parser = parse_variant)]
        variant: Option<Variant>,
        #[clap(long)]
        content_type: Option<String>,
        /// Substring of description, tags, filename or display name.
        #[clap(long)]
        text: Option<String>,
        #[clap(long)]
        min_duration: Option<f64>,
        #[clap(long)]
        max_duration: Option<f64>,
        #[clap(long)]
        min_size: Option<i64>,
        #[clap(long)]
        max_size: Option<i64>,
        /// Include inactive assets too.
        #[clap(long)]
        all: bool,
        #[clap(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: usize,
        #[clap(long, default_value_t = 0)]
        offset: usize,
    },

    /// Lists assets an upload would likely duplicate.
    Duplicates {
        filename: String,
        #[clap(value_parser = parse_variant)]
        variant: Variant,
        #[clap(long)]
        size: Option<i64>,
    },

    /// Shows catalog statistics.
    Stats,

    /// Deletes an asset's files and deactivates it, or removes it with --hard.
    Delete {
        id: i64,
        #[clap(long)]
        hard: bool,
    },

    /// Re-queues assets left provisional by an interrupted run.
    Resume,

    /// Compares the catalog with the media tree.
    CheckStorage,
}

/// Everything the subcommands need, wired once.
struct App {
    store: Arc<dyn AssetStore>,
    repository: AssetRepository,
    manager: IngestionManager,
    queue: Arc<TranscodeQueue>,
    media_path: PathBuf,
}

impl App {
    fn build(config: &AppConfig) -> Result<Self> {
        info!("Opening asset database at {:?}...", config.asset_db_path());
        let store: Arc<dyn AssetStore> =
            Arc::new(SqliteAssetStore::open(&config.asset_db_path())?);
        let locks = Arc::new(AssetLocks::new());

        let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegTranscoder::new(
            &config.transcode.ffmpeg_path,
            config.transcode.profile.clone(),
        ));
        let prober: Arc<dyn MediaProber> =
            Arc::new(FfprobeProber::new(&config.transcode.ffprobe_path));
        let worker = Arc::new(TranscodeWorker::new(
            store.clone(),
            locks.clone(),
            transcoder,
            prober,
        ));
        let queue = Arc::new(TranscodeQueue::start(worker, config.worker_pool_size));

        let manager = IngestionManager::new(
            store.clone(),
            locks.clone(),
            StorageLayout::new(&config.media_path),
            FileHandler::new(config.max_upload_bytes),
            queue.clone(),
        );
        let repository = AssetRepository::new(store.clone(), locks);

        Ok(Self {
            store,
            repository,
            manager,
            queue,
            media_path: config.media_path.clone(),
        })
    }

    /// Wait for queued transcodes, showing progress.
    async fn wait_for_transcodes(&self) -> Result<()> {
        let total = self.queue.pending() as u64;
        if total == 0 {
            self.queue.drain().await;
            return Ok(());
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::with_template(
                "  {spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} transcoded {msg}",
            )?
            .progress_chars("=>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(120));

        let mut events = self.queue.subscribe();
        let progress = pb.clone();
        let listener = tokio::spawn(async move {
            while let Ok(outcome) = events.recv().await {
                progress.inc(1);
                progress.set_message(format!("(asset {} {})", outcome.asset_id(), outcome.label()));
            }
        });

        self.queue.drain().await;
        listener.abort();
        pb.finish_with_message("done");
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_metrics_file(store: &dyn AssetStore, path: &Path) -> Result<()> {
    metrics::update_catalog_metrics(&store.statistics()?);
    let text = metrics::gather_text()?;
    std::fs::write(path, text).with_context(|| format!("Failed to write metrics to {:?}", path))?;
    info!("Metrics written to {:?}", path);
    Ok(())
}

async fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Ingest {
            file,
            variant,
            display_name,
            description,
            tags,
            content_type,
            reject_duplicates,
            no_wait,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {:?}", file))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("{:?} has no file name", file))?;
            let request = IngestRequest {
                data,
                filename,
                variant,
                display_name,
                description,
                tags,
                content_type,
            };
            let receipt = app
                .manager
                .ingest(request, IngestOptions { reject_duplicates })
                .await?;
            if no_wait {
                print_json(&receipt)?;
                return Ok(());
            }
            app.wait_for_transcodes().await?;
            print_json(&app.repository.get(receipt.asset_id)?)
        }
        Command::Get { id } => print_json(&app.repository.get(id)?),
        Command::Update {
            id,
            display_name,
            description,
            tags,
            content_type,
            active,
        } => {
            let update = AssetUpdate {
                display_name,
                description,
                tags,
                content_type,
                is_active: active,
            };
            if update.is_empty() {
                bail!("Nothing to update");
            }
            print_json(&app.repository.update(id, &update).await?)
        }
        Command::Search {
            variant,
            content_type,
            text,
            min_duration,
            max_duration,
            min_size,
            max_size,
            all,
            limit,
            offset,
        } => {
            let filters = AssetFilters {
                variant,
                content_type,
                is_active: if all { None } else { Some(true) },
                min_duration,
                max_duration,
                min_size,
                max_size,
                search_text: text,
            };
            print_json(
                &app.repository
                    .search_page(&filters, Pagination { limit, offset })?,
            )
        }
        Command::Duplicates {
            filename,
            variant,
            size,
        } => print_json(&app.manager.find_duplicates(&filename, variant, size)?),
        Command::Stats => {
            let stats = app.repository.statistics()?;
            metrics::update_catalog_metrics(&stats);
            print_json(&stats)
        }
        Command::Delete { id, hard } => {
            let outcome = if hard {
                app.repository.hard_delete(id).await?
            } else {
                app.repository.soft_delete(id).await?
            };
            match outcome {
                Some(outcome) => print_json(&outcome),
                None => bail!("Asset {} not found", id),
            }
        }
        Command::Resume => {
            let report = app.manager.resume_pending().await?;
            app.wait_for_transcodes().await?;
            print_json(&report)
        }
        Command::CheckStorage => {
            let scanner = IntegrityScanner::new(app.store.clone(), app.media_path.clone());
            let report = tokio::task::spawn_blocking(move || scanner.scan()).await??;
            print_json(&report)?;
            if !report.is_clean() {
                bail!("Storage check found problems");
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        media_path: cli_args.media_path.clone(),
        worker_pool_size: cli_args.worker_pool_size,
        max_upload_size: cli_args.max_upload_size.clone(),
        ffmpeg_path: cli_args.ffmpeg_path.clone(),
        ffprobe_path: cli_args.ffprobe_path.clone(),
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;
    info!(
        "Media at {:?}, {} transcode workers, uploads up to {:#}",
        config.media_path,
        config.worker_pool_size,
        byte_unit::Byte::from(config.max_upload_bytes)
    );
    std::fs::create_dir_all(&config.media_path)
        .with_context(|| format!("Failed to create media directory {:?}", config.media_path))?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let app = App::build(&config)?;
    let result = run(&app, cli_args.command).await;

    // Anything still queued stays provisional for the next `resume`
    app.queue.shutdown().await;
    if let Some(path) = &cli_args.metrics_file {
        if let Err(e) = write_metrics_file(app.store.as_ref(), path) {
            warn!("{:#}", e);
        }
    }
    result
}
