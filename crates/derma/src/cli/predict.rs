//! The `derma predict` command: classify images and emit one record each.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, ValueEnum};
use derma_core::{
    Config, HybridEngine, OutputFormat as CoreOutputFormat, PredictionRecord, RecordWriter,
};
use futures_util::StreamExt;

use super::decode;

/// Supported output formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Single JSON object, or an array for several images
    Json,
    /// One JSON object per line (newline-delimited)
    Jsonl,
}

impl From<OutputFormat> for CoreOutputFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => CoreOutputFormat::Json,
            OutputFormat::Jsonl => CoreOutputFormat::JsonLines,
        }
    }
}

/// Arguments for the `predict` command.
#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Image files or directories to classify
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Include calibrated probabilities, open-set ranking and temperature
    #[arg(long)]
    pub detailed: bool,

    /// Images classified concurrently
    #[arg(short, long, default_value = "4")]
    pub parallel: usize,
}

/// Execute the predict command.
pub async fn execute(args: PredictArgs, config: Config) -> anyhow::Result<()> {
    for input in &args.inputs {
        if !input.exists() {
            anyhow::bail!(
                "Input path does not exist: {:?}\n\n  Hint: Check the file path and try again.",
                input
            );
        }
    }

    let files = decode::discover(&args.inputs, &config.input.supported_formats);
    if files.is_empty() {
        tracing::warn!("No supported image files found in {:?}", args.inputs);
        return Ok(());
    }
    tracing::info!("Found {} image(s) to classify", files.len());

    let engine_config = config.clone();
    let engine = tokio::task::spawn_blocking(move || HybridEngine::from_config(&engine_config))
        .await?
        .map_err(|e| {
            anyhow::anyhow!(
                "{e}\n\n  Hint: run `derma models download` and check the artifact paths \
                 with `derma config show`."
            )
        })?;
    let engine = Arc::new(engine);

    let sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    let mut writer = RecordWriter::new(sink, args.format.into(), args.pretty);

    let total = files.len();
    let single = total == 1 && args.inputs.len() == 1 && args.inputs[0].is_file();
    let progress = (!single).then(|| create_progress_bar(total as u64));
    let size = config.input.image_size;
    let detailed = args.detailed;
    let start_time = Instant::now();

    let mut records = futures_util::stream::iter(files)
        .map(|path| {
            let engine = Arc::clone(&engine);
            async move { predict_one(&engine, &path, size, detailed).await }
        })
        .buffered(args.parallel.max(1));

    let mut collected = Vec::new();
    while let Some(record) = records.next().await {
        match args.format {
            OutputFormat::Jsonl => writer.write(&record)?,
            OutputFormat::Json => collected.push(record),
        }
        if let Some(pb) = &progress {
            pb.inc(1);
            let elapsed = start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                pb.set_message(format!("{:.1} img/sec", pb.position() as f64 / elapsed));
            }
        }
    }

    if args.format == OutputFormat::Json {
        if single {
            for record in &collected {
                writer.write(record)?;
            }
        } else {
            writer.write_all(&collected)?;
        }
    }
    writer.flush()?;
    if let Some(path) = &args.output {
        tracing::info!("Output written to {:?}", path);
    }

    let (succeeded, failed) = (writer.succeeded(), writer.failed());
    if let Some(pb) = progress {
        pb.finish_and_clear();
        print_summary(succeeded, failed, start_time.elapsed());
    }

    if succeeded == 0 {
        anyhow::bail!("No image could be classified ({failed} failed); see the log for details");
    }
    Ok(())
}

/// Decode and assess one image. Failures become an "unavailable" record and
/// the cause goes to the log only.
async fn predict_one(
    engine: &Arc<HybridEngine>,
    path: &Path,
    size: u32,
    detailed: bool,
) -> PredictionRecord {
    let image_label = path.display().to_string();

    let decode_path = path.to_path_buf();
    let decoded = tokio::task::spawn_blocking(move || decode::load(&decode_path, size))
        .await
        .map_err(anyhow::Error::from)
        .and_then(|result| result);
    let tensor = match decoded {
        Ok(tensor) => tensor,
        Err(e) => {
            tracing::error!(image = %image_label, "Failed to load image: {e:#}");
            return PredictionRecord::unavailable(image_label);
        }
    };

    match engine.assess(Arc::new(tensor)).await {
        Ok(assessment) => {
            tracing::debug!(
                image = %image_label,
                label = %assessment.verdict.final_label,
                reason = %assessment.verdict.reason,
                "Classified"
            );
            PredictionRecord::from_assessment(image_label, assessment, detailed)
        }
        Err(e) => {
            tracing::error!(image = %image_label, kind = ?e.kind(), "Prediction failed: {e}");
            PredictionRecord::unavailable(image_label)
        }
    }
}

/// Create a progress bar for batch classification.
fn create_progress_bar(total: u64) -> indicatif::ProgressBar {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    pb.set_style(style);
    pb.set_message("starting...");
    pb
}

/// Print a summary table after batch classification.
fn print_summary(succeeded: usize, failed: usize, elapsed: std::time::Duration) {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        (succeeded + failed) as f64 / secs
    } else {
        0.0
    };

    eprintln!();
    eprintln!("  ====================================");
    eprintln!("               Summary");
    eprintln!("  ====================================");
    eprintln!("    Classified:   {:>8}", succeeded);
    if failed > 0 {
        eprintln!("    Unavailable:  {:>8}", failed);
    }
    eprintln!("  ------------------------------------");
    eprintln!("    Total:        {:>8}", succeeded + failed);
    eprintln!("    Duration:     {:>7.1}s", secs);
    eprintln!("    Rate:         {:>7.1} img/sec", rate);
    eprintln!("  ====================================");
}
