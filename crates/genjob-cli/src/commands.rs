use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use genjob_config::{GenJobConfig, KLING_API_KEY_ENV, REPLICATE_API_TOKEN_ENV};
use genjob_core::vendor::{kling, replicate};
use genjob_core::{
    ApiClient, Credential, JobError, JobFailure, JobHandle, JobOutcome, JobRequest, JwtSigner,
    KlingVendor, Orchestrator, ReplicateVendor, ResultFetcher, Stage, Vendor,
};
use genjob_types::{Job, JobClass, PollAttempt, ResultSelection};

use crate::media::{self, MediaKind};
use crate::{ClassArg, Cli, Commands, VendorArg};

// Replicate model versions.
const DEMUCS_VERSION: &str = "25a173108cff36ef9f80f854c162d01df9e6528be175794b81158fa03836d953";
const UPSCALE_VERSION: &str = "42fed1c4974146d4d2414e2be2c5277c7fcf05fcc3a73abf41610695738c1d7b";
const INTERPOLATE_VERSION: &str =
    "0b8a6b27f9a04b788d7f0c85d7f59fbfda8f1a8ba6ff75a1c5c7a6d7e5fd2a4d";
const STYLE_TRANSFER_VERSION: &str =
    "7f178b5b60c5a22097f1f3c5ba7ee4e71b5e3c6d8c5f5d9f1f2f3f4f5f6f7f8f9";

const DEFAULT_STEM: &str = "vocals";

impl From<ClassArg> for JobClass {
    fn from(arg: ClassArg) -> Self {
        match arg {
            ClassArg::Quick => JobClass::Quick,
            ClassArg::Generation => JobClass::Generation,
            ClassArg::VideoUpscale => JobClass::VideoUpscale,
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = genjob_config::load_config().context("Failed to load configuration")?;
    let verbose = cli.verbose;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });

    match cli.command {
        Commands::KlingExtend {
            video_id,
            output,
            prompt,
            duration,
            api_key,
        } => {
            let orchestrator = kling_orchestrator(&config, api_key)?;
            let request = JobRequest::json(
                kling::TASK_VIDEO_EXTEND,
                JobClass::Generation,
                kling_extend_body(&video_id, &duration, prompt.as_deref()),
            );
            let outcome = orchestrator
                .run(request, &ResultSelection::First, &output, &cancel)
                .await?;
            report(&outcome, verbose);
        }
        Commands::KlingStatus {
            task_id,
            task_type,
            json,
            api_key,
        } => {
            let orchestrator = kling_orchestrator(&config, api_key)?;
            let job = orchestrator.status(&task_type, &task_id).await?;
            print_job(&job, json)?;
        }
        Commands::Demucs {
            audio,
            url,
            output,
            stem,
            all,
            strict,
            api_key,
        } => {
            let orchestrator = replicate_orchestrator(&config, api_key)?;
            let source = media::resolve_source(audio.as_deref(), url.as_deref(), MediaKind::Audio)?;
            let request = JobRequest::json(
                replicate::TASK_PREDICTION,
                JobClass::Generation,
                ReplicateVendor::prediction_body(
                    DEMUCS_VERSION,
                    demucs_input(&source, stem.as_deref(), all),
                ),
            );
            let selection = demucs_selection(stem.as_deref(), all, strict);
            let outcome = orchestrator
                .run(request, &selection, &output, &cancel)
                .await?;
            report(&outcome, verbose);
        }
        Commands::Upscale {
            url,
            output,
            scale,
            face_enhance,
            api_key,
        } => {
            let orchestrator = replicate_orchestrator(&config, api_key)?;
            let request = JobRequest::json(
                replicate::TASK_PREDICTION,
                JobClass::VideoUpscale,
                ReplicateVendor::prediction_body(
                    UPSCALE_VERSION,
                    json!({"video": url, "scale": scale, "face_enhance": face_enhance}),
                ),
            );
            let outcome = orchestrator
                .run(request, &ResultSelection::First, &output, &cancel)
                .await?;
            report(&outcome, verbose);
        }
        Commands::Interpolate {
            url,
            output,
            multiplier,
            api_key,
        } => {
            let orchestrator = replicate_orchestrator(&config, api_key)?;
            let request = JobRequest::json(
                replicate::TASK_PREDICTION,
                JobClass::Generation,
                ReplicateVendor::prediction_body(
                    INTERPOLATE_VERSION,
                    json!({"video": url, "multiplier": multiplier}),
                ),
            );
            let outcome = orchestrator
                .run(request, &ResultSelection::First, &output, &cancel)
                .await?;
            report(&outcome, verbose);
        }
        Commands::StyleTransfer {
            content,
            style,
            content_url,
            style_url,
            output,
            strength,
            api_key,
        } => {
            if !(0.0..=1.0).contains(&strength) {
                bail!("Style strength must be between 0 and 1, got {strength}");
            }
            let orchestrator = replicate_orchestrator(&config, api_key)?;
            let content = media::resolve_source(
                content.as_deref(),
                content_url.as_deref(),
                MediaKind::Image,
            )
            .context("Content image")?;
            let style =
                media::resolve_source(style.as_deref(), style_url.as_deref(), MediaKind::Image)
                    .context("Style image")?;
            let request = JobRequest::json(
                replicate::TASK_PREDICTION,
                JobClass::Quick,
                ReplicateVendor::prediction_body(
                    STYLE_TRANSFER_VERSION,
                    json!({"content": content, "style": style, "style_weight": strength}),
                ),
            );
            let outcome = orchestrator
                .run(request, &ResultSelection::First, &output, &cancel)
                .await?;
            report(&outcome, verbose);
        }
        Commands::ReplicateStatus {
            prediction_id,
            json,
            api_key,
        } => {
            let orchestrator = replicate_orchestrator(&config, api_key)?;
            let job = orchestrator
                .status(replicate::TASK_PREDICTION, &prediction_id)
                .await?;
            print_job(&job, json)?;
        }
        Commands::Resume {
            vendor,
            job_id,
            output,
            task_type,
            class,
            stem,
            all,
            api_key,
        } => {
            let orchestrator = match vendor {
                VendorArg::Kling => kling_orchestrator(&config, api_key)?,
                VendorArg::Replicate => replicate_orchestrator(&config, api_key)?,
            };
            let handle = JobHandle::new(job_id, resume_task_type(vendor, task_type), class.into());
            let selection = if all {
                ResultSelection::All
            } else if let Some(stem) = stem {
                ResultSelection::preferred(stem)
            } else {
                ResultSelection::First
            };
            let outcome = orchestrator
                .resume(handle, &selection, &output, &cancel)
                .await?;
            report(&outcome, verbose);
        }
    }

    Ok(())
}

fn configuration(message: String) -> JobFailure {
    JobFailure::new(Stage::Configuration, None, JobError::Configuration(message))
}

fn kling_credential(config: &GenJobConfig, api_key: Option<String>) -> Result<Credential, JobFailure> {
    let key = api_key
        .or_else(|| config.kling.api_key.clone())
        .ok_or_else(|| configuration(format!("{KLING_API_KEY_ENV} environment variable not set")))?;
    JwtSigner::from_compound(&key)
        .and_then(Credential::signed)
        .map_err(|e| JobFailure::new(Stage::Configuration, None, e))
}

fn replicate_credential(
    config: &GenJobConfig,
    api_key: Option<String>,
) -> Result<Credential, JobFailure> {
    let token = api_key
        .or_else(|| config.replicate.api_token.clone())
        .ok_or_else(|| {
            configuration(format!("{REPLICATE_API_TOKEN_ENV} environment variable not set"))
        })?;
    Credential::bearer(token).map_err(|e| JobFailure::new(Stage::Configuration, None, e))
}

fn kling_orchestrator(config: &GenJobConfig, api_key: Option<String>) -> Result<Orchestrator, JobFailure> {
    let credential = kling_credential(config, api_key)?;
    let vendor = KlingVendor::new().with_base_url(&config.kling.base_url);
    orchestrator(config, Arc::new(vendor), credential)
}

fn replicate_orchestrator(
    config: &GenJobConfig,
    api_key: Option<String>,
) -> Result<Orchestrator, JobFailure> {
    let credential = replicate_credential(config, api_key)?;
    let vendor = ReplicateVendor::new().with_base_url(&config.replicate.base_url);
    orchestrator(config, Arc::new(vendor), credential)
}

fn orchestrator(
    config: &GenJobConfig,
    vendor: Arc<dyn Vendor>,
    credential: Credential,
) -> Result<Orchestrator, JobFailure> {
    let setup = |e: JobError| JobFailure::new(Stage::Configuration, None, e);
    let api = ApiClient::new(config.http.request_timeout()).map_err(setup)?;
    let fetcher = ResultFetcher::new(config.http.download_timeout())
        .map_err(setup)?
        .with_max_bytes(config.http.max_download_bytes);

    let mut orchestrator =
        Orchestrator::new(vendor, credential, api, fetcher).with_observer(Arc::new(print_attempt));
    for class in [JobClass::Quick, JobClass::Generation, JobClass::VideoUpscale] {
        orchestrator = orchestrator.with_policy(class, config.polling.policy(class));
    }
    Ok(orchestrator)
}

fn print_attempt(attempt: &PollAttempt) {
    println!("Status: {}", attempt.raw_status);
}

fn kling_extend_body(video_id: &str, duration: &str, prompt: Option<&str>) -> Value {
    let mut body = json!({"video_id": video_id, "duration": duration});
    if let Some(prompt) = prompt {
        body["prompt"] = json!(prompt);
    }
    body
}

/// Task type for `resume`; Kling defaults to the only job type created here.
fn resume_task_type(vendor: VendorArg, task_type: Option<String>) -> String {
    task_type.unwrap_or_else(|| {
        match vendor {
            VendorArg::Kling => kling::TASK_VIDEO_EXTEND,
            VendorArg::Replicate => replicate::TASK_PREDICTION,
        }
        .to_string()
    })
}

fn demucs_input(source: &str, stem: Option<&str>, all: bool) -> Value {
    let mut input = json!({"audio": source});
    if let (Some(stem), false) = (stem, all) {
        input["stem"] = json!(stem);
    }
    input
}

/// A requested stem falls back to the first returned one unless `strict`.
fn demucs_selection(stem: Option<&str>, all: bool, strict: bool) -> ResultSelection {
    if all {
        return ResultSelection::All;
    }
    let name = stem.unwrap_or(DEFAULT_STEM);
    if strict {
        ResultSelection::named(name)
    } else {
        ResultSelection::preferred(name)
    }
}

fn report(outcome: &JobOutcome, verbose: bool) {
    match outcome.artifacts.as_slice() {
        [single] => println!("Saved: {}", single.path.display()),
        many => {
            println!("Saved:");
            for artifact in many {
                println!("  - {}", artifact.path.display());
            }
        }
    }
    if verbose {
        println!("Job ID: {}", outcome.job.job_id);
        for artifact in &outcome.artifacts {
            if let Some(duration) = artifact.duration {
                println!("Duration: {duration}s");
            }
        }
    }
}

fn print_job(job: &Job, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(job)?);
        return Ok(());
    }

    println!("Job ID: {}", job.job_id);
    println!("Status: {}", job.status);
    println!("Type: {}", job.task_type);
    if let Some(reason) = &job.failure_reason {
        println!("Reason: {reason}");
    }
    let refs = job.output.refs();
    if !refs.is_empty() {
        println!("Outputs:");
    }
    for r in refs {
        let mut line = match &r.label {
            Some(label) => format!("  - {label}: {}", r.url),
            None => format!("  - {}", r.url),
        };
        if let Some(id) = &r.id {
            line.push_str(&format!(" (id {id})"));
        }
        if let Some(duration) = r.duration {
            line.push_str(&format!(" [{duration}s]"));
        }
        println!("{line}");
    }
    Ok(())
}
