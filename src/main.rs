use booklift::imaging::{AlphaPolicy, RustBackend};
use booklift::pipeline::{self, CancelFlag, PipelineError, PipelineSettings};
use booklift::transport::HttpObjectStore;
use booklift::{config, credentials, output, scan};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "booklift")]
#[command(about = "Optimize per-book image libraries and upload them to object storage")]
#[command(long_about = "\
Optimize per-book image libraries and upload them to object storage

Every book directory under the root holds an images/ directory. Each file is
either uploaded as-is (small web formats, SVG) or optimized to fit the upload
ceiling, then stored at {prefix}/{book}/images/{name}. A per-book index maps
original filenames to stored paths:

  books/
  ├── biology-101/
  │   └── images/
  │       ├── cover.png            → library/biology-101/images/cover.png
  │       └── fig-1.tif            → library/biology-101/images/fig-1.tif.jpg
  └── ...                          + library/biology-101/images-index.json

Progress is recorded per book in the resume state directory; rerunning skips
files that were already uploaded.

Credentials: SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY from the environment,
then from the configured env files.

Run 'booklift gen-config' to generate a documented booklift.toml.")]
#[command(version)]
struct Cli {
    /// Config file (default: booklift.toml in the working directory, if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Optimize and upload book images
    Upload(UploadArgs),
    /// Print a stock booklift.toml with all options documented
    GenConfig,
}

/// Flags for `upload`. Each one overrides the matching config value.
#[derive(clap::Args, Clone, Debug)]
struct UploadArgs {
    /// Local root folder containing book directories
    #[arg(long)]
    root: Option<PathBuf>,
    /// Storage bucket
    #[arg(long)]
    bucket: Option<String>,
    /// Storage prefix under the bucket
    #[arg(long)]
    prefix: Option<String>,
    /// Max pixel dimension for optimized images
    #[arg(long)]
    max_px: Option<u32>,
    /// JPEG quality for optimized images (1-100)
    #[arg(long, alias = "jpeg-quality")]
    quality: Option<u32>,
    /// Upload ceiling in MiB; larger files are optimized
    #[arg(long)]
    max_upload_mb: Option<u64>,
    /// Optimize every raster image, even small ones
    #[arg(long)]
    convert_all: bool,
    /// Images with transparency: png (keep alpha) or flatten-white-jpeg
    #[arg(long, value_parser = parse_alpha_mode)]
    alpha_mode: Option<AlphaPolicy>,
    /// Overwrite existing objects
    #[arg(long)]
    upsert: bool,
    /// HTTP timeout per upload request, in seconds
    #[arg(long, alias = "timeout-s")]
    timeout_secs: Option<u64>,
    /// Retries for failed uploads
    #[arg(long)]
    retries: Option<u32>,
    /// Local resume state directory
    #[arg(long)]
    state_dir: Option<PathBuf>,
    /// Ignore and do not write resume state
    #[arg(long)]
    no_resume: bool,
    /// Process only this book
    #[arg(long)]
    only_book: Option<String>,
    /// Max files per book (0 = no limit)
    #[arg(long)]
    limit: Option<usize>,
    /// Do everything except network writes; report what would happen
    #[arg(long)]
    dry_run: bool,
    /// Books uploaded concurrently (clamped to CPU cores)
    #[arg(long)]
    parallel_books: Option<usize>,
}

fn parse_alpha_mode(value: &str) -> Result<AlphaPolicy, String> {
    match value {
        "png" => Ok(AlphaPolicy::Preserve),
        "flatten-white-jpeg" => Ok(AlphaPolicy::FlattenWhite),
        other => Err(format!(
            "unknown alpha mode '{other}' (expected png or flatten-white-jpeg)"
        )),
    }
}

impl UploadArgs {
    /// Layer command-line overrides on top of the loaded config.
    fn apply(&self, config: &mut config::BookliftConfig) {
        if let Some(root) = &self.root {
            config.root = root.to_string_lossy().into_owned();
        }
        if let Some(bucket) = &self.bucket {
            config.storage.bucket = bucket.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.storage.prefix = prefix.clone();
        }
        if let Some(max_px) = self.max_px {
            config.images.max_px = max_px;
        }
        if let Some(quality) = self.quality {
            config.images.quality = quality;
        }
        if let Some(mb) = self.max_upload_mb {
            config.images.max_upload_mb = mb;
        }
        if self.convert_all {
            config.images.convert_all = true;
        }
        if let Some(alpha) = self.alpha_mode {
            config.images.alpha_mode = alpha;
        }
        if self.upsert {
            config.storage.upsert = true;
        }
        if let Some(secs) = self.timeout_secs {
            config.storage.timeout_secs = secs;
        }
        if let Some(retries) = self.retries {
            config.storage.retries = retries;
        }
        if let Some(dir) = &self.state_dir {
            config.resume.state_dir = dir.to_string_lossy().into_owned();
        }
        if self.no_resume {
            config.resume.enabled = false;
        }
        if let Some(n) = self.parallel_books {
            config.processing.max_parallel_books = Some(n);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Upload(args) => upload(cli.config.as_deref(), &args)?,
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Diagnostics go to stderr; `RUST_LOG` overrides the default `info` level.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn upload(config_path: Option<&Path>, args: &UploadArgs) -> Result<(), Box<dyn std::error::Error>> {
    let working_dir = std::env::current_dir()?;
    let mut config = config::load_config(config_path, &working_dir)?;
    args.apply(&mut config);
    config.validate()?;

    // Configuration errors surface before any file is touched
    let creds = credentials::resolve_credentials(&config.credentials.env_file_paths())?;
    let store = HttpObjectStore::new(
        creds,
        &config.storage.bucket,
        Duration::from_secs(config.storage.timeout_secs),
    )?;
    let limit = args.limit.filter(|&n| n > 0);
    let books = scan::discover_books(Path::new(&config.root), args.only_book.as_deref(), limit)?;

    let settings = PipelineSettings::from_config(&config, args.dry_run);
    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, stopping after the current file");
        handler_flag.cancel();
    })?;

    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            output::print_pipeline_event(&event);
        }
    });

    let started = Instant::now();
    let backend = RustBackend::new();
    let result = pipeline::upload_books(&backend, &store, &books, &settings, &cancel, Some(tx));
    if printer.join().is_err() {
        tracing::warn!("progress printer stopped early");
    }

    let report = match result {
        Ok(report) => report,
        Err(PipelineError::File {
            book,
            original,
            source,
        }) => {
            output::print_failure(&book, &original, &source.to_string());
            std::process::exit(1);
        }
        Err(err) => return Err(err.into()),
    };

    println!();
    println!(
        "{}",
        output::format_run_summary(&report, started.elapsed(), settings.dry_run)
    );

    let blocked = output::format_blocked_files(&report);
    if !blocked.is_empty() {
        for line in blocked {
            eprintln!("{}", line);
        }
        std::process::exit(1);
    }
    Ok(())
}
