//! Upscaling pipeline CLI.
//!
//! Submits a single job to the controller and relays its progress events to
//! the terminal. Any other front end (a GUI, a service) drives the pipeline
//! the same way: submit, subscribe, optionally cancel.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vup_media::{FfmpegTranscoder, RealesrganUpscaler};
use vup_models::{LogSeverity, ProgressEvent, ScaleFactor, UpscaleJob, UpscaleModel};
use vup_pipeline::{JobController, PipelineConfig};

const USAGE: &str = "Usage: vup <input> <output-dir> \
[--model NAME] [--scale 2|3|4] [--batch-size N] [--concurrency N]

<input> is a video file, or a directory of videos (bulk mode).
Models: realesr-animevideov3, realesrgan-x4plus, realesrgan-x4plus-anime, realesrnet-x4plus";

struct CliArgs {
    input: String,
    output_dir: String,
    model: Option<UpscaleModel>,
    scale: Option<ScaleFactor>,
    batch_size: Option<usize>,
    concurrency: Option<usize>,
}

fn parse_args() -> Result<CliArgs, String> {
    let mut args = std::env::args().skip(1);
    let mut positional = Vec::new();
    let mut model = None;
    let mut scale = None;
    let mut batch_size = None;
    let mut concurrency = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--model" => {
                let value = args.next().ok_or("--model requires a value")?;
                model = Some(value.parse().map_err(|e| format!("{e}"))?);
            }
            "--scale" => {
                let value = args.next().ok_or("--scale requires a value")?;
                let n: u32 = value
                    .parse()
                    .map_err(|_| format!("invalid scale: {value}"))?;
                scale = Some(ScaleFactor::try_from(n).map_err(|e| format!("{e}"))?);
            }
            "--batch-size" => {
                let value = args.next().ok_or("--batch-size requires a value")?;
                batch_size = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid batch size: {value}"))?,
                );
            }
            "--concurrency" => {
                let value = args.next().ok_or("--concurrency requires a value")?;
                concurrency = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid concurrency: {value}"))?,
                );
            }
            "-h" | "--help" => return Err(String::new()),
            other if other.starts_with('-') => {
                return Err(format!("unknown option: {other}"));
            }
            other => positional.push(other.to_string()),
        }
    }

    if positional.len() != 2 {
        return Err("expected <input> and <output-dir>".to_string());
    }
    let mut positional = positional.into_iter();

    Ok(CliArgs {
        input: positional.next().unwrap(),
        output_dir: positional.next().unwrap(),
        model,
        scale,
        batch_size,
        concurrency,
    })
}

fn print_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::StageStarted { stage } => println!("==> {stage} started"),
        ProgressEvent::StageProgress {
            stage,
            current,
            total,
            percent,
        } => println!("    {stage}: {current}/{total} ({percent:.0}%)"),
        ProgressEvent::StageCompleted { stage, duration_ms } => {
            println!("==> {stage} completed in {:.1}s", *duration_ms as f64 / 1000.0)
        }
        ProgressEvent::Log {
            severity, message, ..
        } => match severity {
            LogSeverity::Info => println!("    {message}"),
            LogSeverity::Warning => eprintln!("    warning: {message}"),
            LogSeverity::Error => eprintln!("    error: {message}"),
        },
        ProgressEvent::JobFailed { kind, message } => {
            eprintln!("Job failed ({kind}): {message}")
        }
        ProgressEvent::JobCancelled {} => println!("Job cancelled"),
        ProgressEvent::JobSucceeded {
            output_path,
            duration_ms,
        } => println!(
            "Done in {:.1}s: {}",
            *duration_ms as f64 / 1000.0,
            output_path.display()
        ),
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vup=info".parse().expect("static directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("vup: {message}\n");
            }
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    let config = PipelineConfig::from_env();

    let transcoder = match FfmpegTranscoder::new() {
        Ok(t) => Arc::new(t),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let upscaler = match RealesrganUpscaler::new() {
        Ok(u) => Arc::new(u),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let controller = JobController::new(config, transcoder, upscaler);

    let mut job = UpscaleJob::new(&args.input, &args.output_dir);
    if let Some(model) = args.model {
        job = job.with_model(model);
    }
    if let Some(scale) = args.scale {
        job = job.with_scale(scale);
    }
    if let Some(batch_size) = args.batch_size {
        job = job.with_batch_size(batch_size);
    }
    if let Some(concurrency) = args.concurrency {
        job = job.with_concurrency(concurrency);
    }

    info!(job_id = %job.job_id, "Submitting job");
    let mut handle = controller.submit(job);
    let mut events = handle.take_events().expect("events taken once");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelling...");
                handle.cancel();
            }
            event = events.recv() => match event {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    print_event(&event);
                    if terminal {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    match handle.wait().await {
        Ok(_) => {}
        Err(e) if e.is_cancelled() => std::process::exit(130),
        Err(_) => std::process::exit(1),
    }
}
