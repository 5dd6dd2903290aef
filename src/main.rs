use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thumbnailer::catalog::FileKind;
use thumbnailer::config::AppConfig;
use thumbnailer::engine::{RenderEngine, ScriptEngine};
use thumbnailer::pipeline::{ProgressEvent, ThumbnailPipeline};
use thumbnailer::queue::Job;
use thumbnailer::store::ManifestStore;
use thumbnailer::utils::{format_duration, format_file_size, init_logging};
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "thumbnailer")]
#[command(about = "Thumbnail generation for a 3D-print catalog")]
#[command(version)]
struct Cli {
    /// Config file path (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Catalog manifest path (defaults to the user data directory)
    #[arg(short, long, global = true)]
    manifest: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register catalog files under a directory and render missing thumbnails
    Scan {
        /// Directory to walk
        dir: PathBuf,
        /// Only register files, do not render
        #[arg(long)]
        no_render: bool,
    },

    /// Render a single thumbnail
    Render {
        /// Mesh to render
        input: PathBuf,
        /// Thumbnail to write
        output: PathBuf,
        /// Thumbnail size in pixels (defaults to the configured size)
        #[arg(short, long)]
        size: Option<u32>,
    },

    /// Check that the rendering engine can be invoked
    Check,

    /// Show the configuration file path and current values
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::load(),
    };

    match cli.command {
        Commands::Scan { dir, no_render } => {
            let manifest = cli.manifest.unwrap_or_else(ManifestStore::default_path);
            scan(&config, &manifest, &dir, no_render).await
        }
        Commands::Render {
            input,
            output,
            size,
        } => render(&config, input, output, size).await,
        Commands::Check => check(&config).await,
        Commands::Config => {
            let path = cli.config.unwrap_or_else(AppConfig::config_path);
            println!("# {}", path.display());
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn scan(config: &AppConfig, manifest: &Path, dir: &Path, no_render: bool) -> anyhow::Result<()> {
    if !dir.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }

    let store = ManifestStore::open(manifest)
        .with_context(|| format!("Failed to open manifest {}", manifest.display()))?;

    let mut registered = 0usize;
    let mut registered_bytes = 0u64;
    for entry in WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if !FileKind::from_path(entry.path()).is_catalog_file() {
            continue;
        }
        if store.register(entry.path())?.is_some() {
            registered += 1;
            registered_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }

    println!(
        "Registered {} new files ({}) in {}",
        registered,
        format_file_size(registered_bytes),
        store.path().display()
    );
    if no_render {
        return Ok(());
    }

    let engine = ScriptEngine::new(config.engine.clone());
    let pipeline = ThumbnailPipeline::new(config, engine, store)?;
    pipeline.add_listener(|event: &ProgressEvent| {
        if event.success {
            println!("  ok    {}", event.item_name);
        } else {
            println!(
                "  fail  {}: {}",
                event.item_name,
                event.error.as_deref().unwrap_or("unknown error")
            );
        }
    });

    let queued = pipeline.enqueue_pending().await?;
    if queued == 0 {
        println!("All thumbnails are up to date");
        return Ok(());
    }

    let started = Instant::now();
    info!(queued, "Rendering thumbnails");
    let watchdog = pipeline.start_watchdog();

    pipeline.wait_idle().await;
    if pipeline.queue_len() > 0 {
        warn!(
            queued = pipeline.queue_len(),
            "Rendering stopped with items still queued"
        );
    }
    pipeline.stop();
    let _ = watchdog.await;

    let thumbnail_bytes: u64 = pipeline
        .store()
        .entries()
        .iter()
        .filter_map(|e| e.thumbnail.as_ref())
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();

    let stats = pipeline.stats();
    println!(
        "Generated {}, failed {}, skipped {} in {} ({} of thumbnails)",
        stats.generated,
        stats.failed,
        stats.skipped,
        format_duration(started.elapsed()),
        format_file_size(thumbnail_bytes)
    );
    Ok(())
}

async fn render(
    config: &AppConfig,
    input: PathBuf,
    output: PathBuf,
    size: Option<u32>,
) -> anyhow::Result<()> {
    if !input.exists() {
        bail!("Input not found: {}", input.display());
    }

    let engine = ScriptEngine::new(config.engine.clone());
    let job = Job {
        item_id: input.display().to_string(),
        input,
        output,
        size: size.unwrap_or(config.engine.thumbnail_size),
    };

    let result = engine.render_one(&job).await;
    if !result.success {
        bail!("Rendering failed: {}", result.error_message());
    }

    let written = result.output_path.unwrap_or(job.output);
    println!("Wrote {}", written.display());
    if let Some(meta) = result.metadata {
        if let Some(d) = meta.dimensions {
            println!("  dimensions  {:.1} x {:.1} x {:.1}", d.x, d.y, d.z);
        }
        if let Some(triangles) = meta.triangles {
            println!("  triangles   {}", triangles);
        }
    }
    Ok(())
}

async fn check(config: &AppConfig) -> anyhow::Result<()> {
    let engine = ScriptEngine::new(config.engine.clone());
    if engine.is_available().await {
        println!(
            "Engine available: {} {}",
            config.engine.interpreter,
            config.engine.script.display()
        );
        Ok(())
    } else {
        bail!(
            "Engine unavailable: {} {} (set [engine] in {})",
            config.engine.interpreter,
            config.engine.script.display(),
            AppConfig::config_path().display()
        )
    }
}
