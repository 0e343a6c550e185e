//! plate-reader - watch a video source and report license plates
//!
//! Reads plates from an RTSP stream, a video file or a directory of images
//! and reports whether they match a target plate typed on stdin.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use plate_reader::config::{self, AppConfig};
use plate_reader::dashboard::{ConsoleDashboard, DashboardOptions};
use plate_reader::vision::ModelManager;
use plate_reader::{Collaborators, PlatePipeline};

/// plate-reader - real-time license plate reader
#[derive(Parser, Debug)]
#[command(name = "plate-reader")]
#[command(about = "Reads license plates from a live video source and matches them against a target")]
struct Args {
    /// Config file (default: platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Video source: rtsp://…, a video file, dir://path or an image directory
    #[arg(short, long)]
    source: Option<String>,

    /// Plate to look for
    #[arg(short, long)]
    target: Option<String>,

    /// Number of recognition workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Plate detector ONNX model
    #[arg(long)]
    detector_model: Option<PathBuf>,

    /// Text recognizer ONNX model
    #[arg(long)]
    recognizer_model: Option<PathBuf>,

    /// Recognizer character dictionary
    #[arg(long)]
    dictionary: Option<PathBuf>,

    /// Print JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Keep the latest annotated frame in this PNG file
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. "debug", "plate_reader=trace")
    #[arg(long)]
    log_level: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Show which model files are installed and exit
    #[arg(long)]
    list_models: bool,
}

impl Args {
    /// Command line values win over the config file
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(source) = &self.source {
            config.stream.uri = source.clone();
        }
        if let Some(workers) = self.workers {
            config.recognition.workers = workers;
        }
        if let Some(path) = &self.detector_model {
            config.detection.model_path = Some(path.clone());
        }
        if let Some(path) = &self.recognizer_model {
            config.recognition.model_path = Some(path.clone());
        }
        if let Some(path) = &self.dictionary {
            config.recognition.dictionary_path = Some(path.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = config::load_or_default(args.config.as_deref())?;
    args.apply_to(&mut config);

    if args.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    // Initialize logging; stdout belongs to the dashboard
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .with_context(|| format!("invalid log filter {:?}", config.logging.level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.list_models {
        let models = ModelManager::new()?;
        println!("Models directory: {}", models.models_dir().display());
        for (model_type, available) in models.get_model_status() {
            println!(
                "  {:<22} {:<24} {}",
                model_type.display_name(),
                model_type.filename(),
                if available { "installed" } else { "missing" }
            );
        }
        return Ok(());
    }

    if config.stream.uri.trim().is_empty() {
        bail!("no video source: pass --source or set stream.uri in the config file");
    }
    config.validate()?;

    info!("plate-reader starting...");
    let collaborators = Collaborators::from_config(&config)?;
    let mut pipeline = PlatePipeline::start(&config, collaborators)?;

    if let Some(target) = &args.target {
        let stored = pipeline.aggregator().set_target(target);
        info!(target = %stored, "target plate set");
    }

    let lines = spawn_stdin_reader()?;
    let mut options = DashboardOptions::from_settings(&config.display);
    options.json = args.json;
    options.snapshot = args.snapshot.clone();
    let mut dashboard = ConsoleDashboard::new(
        pipeline.aggregator(),
        pipeline.display(),
        options,
        std::io::stdout(),
    );

    let result = dashboard.run(&pipeline, lines);
    let summary = pipeline.shutdown();
    if !summary.source_stopped || !summary.detection_stopped || summary.workers.detached > 0 {
        warn!(?summary, "some pipeline threads were detached");
    }
    info!("plate-reader shutdown complete");

    result
}

/// Forward stdin lines to the dashboard. The thread is never joined; it ends
/// with stdin or with the process.
fn spawn_stdin_reader() -> Result<crossbeam_channel::Receiver<String>> {
    let (sender, receiver) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if sender.send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(receiver)
}
