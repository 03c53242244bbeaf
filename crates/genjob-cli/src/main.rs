mod commands;
mod media;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "genjob", about = "Run generative media jobs on remote APIs")]
struct Cli {
    /// Debug logging and extra job details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extend a Kling video
    KlingExtend {
        /// Video ID from a previous generation
        video_id: String,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Prompt for the extended content
        #[arg(short, long)]
        prompt: Option<String>,

        /// Extension duration in seconds
        #[arg(short, long, default_value = "5", value_parser = ["5", "10"])]
        duration: String,

        /// Kling API key (ACCESS_KEY:SECRET_KEY)
        #[arg(short = 'k', long)]
        api_key: Option<String>,
    },
    /// Check a Kling task without waiting
    KlingStatus {
        task_id: String,

        /// Task type the job was created with
        #[arg(short, long = "type", default_value = "text2video",
              value_parser = ["text2video", "image2video", "video-extend"])]
        task_type: String,

        /// Print the job as JSON
        #[arg(long)]
        json: bool,

        #[arg(short = 'k', long)]
        api_key: Option<String>,
    },
    /// Separate audio stems with Demucs
    Demucs {
        /// Local audio file
        audio: Option<PathBuf>,

        /// Audio URL
        #[arg(short, long)]
        url: Option<String>,

        /// Output file, or directory with --all
        #[arg(short, long)]
        output: PathBuf,

        /// Stem to extract
        #[arg(long, value_parser = ["vocals", "drums", "bass", "other"])]
        stem: Option<String>,

        /// Save every stem into the output directory
        #[arg(long, conflicts_with = "stem")]
        all: bool,

        /// Fail instead of falling back when the stem is missing
        #[arg(long)]
        strict: bool,

        /// Replicate API token
        #[arg(short = 'k', long)]
        api_key: Option<String>,
    },
    /// Upscale a video with Real-ESRGAN
    Upscale {
        /// Video URL
        #[arg(short, long)]
        url: String,

        #[arg(short, long)]
        output: PathBuf,

        /// Scale factor
        #[arg(short, long, default_value_t = 4, value_parser = one_of(&[2, 4]))]
        scale: u8,

        /// Enable face enhancement (GFPGAN)
        #[arg(long)]
        face_enhance: bool,

        #[arg(short = 'k', long)]
        api_key: Option<String>,
    },
    /// Raise a video's frame rate
    Interpolate {
        /// Video URL
        #[arg(short, long)]
        url: String,

        #[arg(short, long)]
        output: PathBuf,

        /// Frame rate multiplier
        #[arg(short, long, default_value_t = 2, value_parser = one_of(&[2, 4, 8]))]
        multiplier: u8,

        #[arg(short = 'k', long)]
        api_key: Option<String>,
    },
    /// Apply the style of one image to another
    StyleTransfer {
        /// Content image file
        content: Option<PathBuf>,

        /// Style image file
        style: Option<PathBuf>,

        #[arg(long)]
        content_url: Option<String>,

        #[arg(long)]
        style_url: Option<String>,

        #[arg(short, long)]
        output: PathBuf,

        /// Style strength between 0 and 1
        #[arg(short, long, default_value_t = 0.5)]
        strength: f64,

        #[arg(short = 'k', long)]
        api_key: Option<String>,
    },
    /// Check a Replicate prediction without waiting
    ReplicateStatus {
        prediction_id: String,

        #[arg(long)]
        json: bool,

        #[arg(short = 'k', long)]
        api_key: Option<String>,
    },
    /// Wait for an already-submitted job and download its result
    Resume {
        #[arg(long, value_enum)]
        vendor: VendorArg,

        job_id: String,

        #[arg(short, long)]
        output: PathBuf,

        /// Task type the job was created with [default: video-extend for Kling]
        #[arg(short, long = "type")]
        task_type: Option<String>,

        /// Polling class of the job
        #[arg(long, value_enum, default_value = "generation")]
        class: ClassArg,

        /// Named output to save
        #[arg(long)]
        stem: Option<String>,

        /// Save every output into the output directory
        #[arg(long, conflicts_with = "stem")]
        all: bool,

        #[arg(short = 'k', long)]
        api_key: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum VendorArg {
    Kling,
    Replicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ClassArg {
    Quick,
    Generation,
    VideoUpscale,
}

/// Integer argument restricted to a fixed set of values.
fn one_of(allowed: &'static [u8]) -> impl Fn(&str) -> Result<u8, String> + Clone + Send + Sync {
    move |raw: &str| {
        let value: u8 = raw.parse().map_err(|_| format!("'{raw}' is not a number"))?;
        if allowed.contains(&value) {
            Ok(value)
        } else {
            Err(format!("must be one of {allowed:?}"))
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(commands::run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            if let Some(job_id) = e
                .downcast_ref::<genjob_core::JobFailure>()
                .and_then(|f| f.job_id.as_deref())
            {
                eprintln!("Job ID: {job_id}");
            }
            ExitCode::FAILURE
        }
    }
}
