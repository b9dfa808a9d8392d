//! The `derma models` command for the open-set encoder files.
//!
//! Closed-set classifiers ship with their label map and temperature as
//! training artifacts; only the public CLIP-style encoders are fetched here.

use std::io::Read;
use std::path::Path;

use clap::{Args, Subcommand};
use derma_core::open_set::{OnnxImageEncoder, OnnxTextEncoder};
use derma_core::Config;

/// Arguments for the `models` command.
#[derive(Args, Debug)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommand,
}

/// Subcommands for model management.
#[derive(Subcommand, Debug)]
pub enum ModelsCommand {
    /// Download the open-set vision encoder, text encoder and tokenizer
    Download {
        /// Re-download files that already exist
        #[arg(long)]
        force: bool,
    },

    /// List installed model files
    List,

    /// Show the open-set model directory path
    Path,
}

/// One downloadable file: remote path in the repository, local file name.
struct ModelFile<'a> {
    label: &'static str,
    remote: &'a str,
    local: &'static str,
}

fn model_files(config: &Config) -> [ModelFile<'_>; 3] {
    let download = &config.open_set.download;
    [
        ModelFile {
            label: "Vision encoder",
            remote: &download.vision_remote,
            local: OnnxImageEncoder::FILE_NAME,
        },
        ModelFile {
            label: "Text encoder",
            remote: &download.text_remote,
            local: OnnxTextEncoder::FILE_NAME,
        },
        ModelFile {
            label: "Tokenizer",
            remote: &download.tokenizer_remote,
            local: OnnxTextEncoder::TOKENIZER_FILE,
        },
    ]
}

/// Execute the models command.
pub async fn execute(args: ModelsArgs, config: Config) -> anyhow::Result<()> {
    let model_dir = config.open_set_model_dir();

    match args.command {
        ModelsCommand::Download { force } => {
            std::fs::create_dir_all(&model_dir)?;
            let client = reqwest::Client::new();
            let repo = &config.open_set.download.repo;

            for file in model_files(&config) {
                let dest = model_dir.join(file.local);
                if dest.exists() && !force {
                    tracing::info!("{} already exists at {:?}", file.label, dest);
                    continue;
                }

                let url = format!("https://huggingface.co/{}/resolve/main/{}", repo, file.remote);
                tracing::info!("Downloading {}...", file.label.to_lowercase());
                tracing::info!("  Source: {}", url);
                tracing::info!("  Destination: {:?}", dest);

                let expected = config.open_set.download.blake3.get(file.local);
                if expected.is_none() {
                    tracing::warn!("  No checksum configured for {}; skipping verification", file.local);
                }
                download_file(&client, &url, &dest, expected.map(String::as_str)).await?;

                let file_size = std::fs::metadata(&dest)?.len();
                tracing::info!(
                    "  {} complete ({:.1} MB)",
                    file.label,
                    file_size as f64 / (1024.0 * 1024.0)
                );
            }

            tracing::info!("All downloads complete.");
        }

        ModelsCommand::List => {
            println!("Open-set encoder: {}", config.open_set.model);
            println!("  Directory: {}\n", model_dir.display());
            for file in model_files(&config) {
                let status = if model_dir.join(file.local).exists() {
                    "ready"
                } else {
                    "not installed"
                };
                println!("    - {:30} {}", file.local, status);
            }

            println!("\n  Closed-set sources:");
            for source in &config.classifier.sources {
                let status = if config.source_model_path(source).exists() {
                    "ready"
                } else {
                    "not installed"
                };
                println!("    - {:30} {}", source.model, status);
            }
        }

        ModelsCommand::Path => {
            println!("{}", model_dir.display());
        }
    }

    Ok(())
}

/// Download a file from a URL to a local path, streaming to disk.
///
/// If `expected_blake3` is provided, the file is verified after download.
/// On checksum mismatch the corrupt file is removed and an error is returned.
async fn download_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    expected_blake3: Option<&str>,
) -> anyhow::Result<()> {
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    let response = client
        .get(url)
        .send()
        .await?
        .error_for_status()
        .map_err(|e| anyhow::anyhow!("Download failed: {e}"))?;

    let total_size = response.content_length();
    if let Some(size) = total_size {
        tracing::info!("  Size: {:.1} MB", size as f64 / (1024.0 * 1024.0));
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        if let Some(total) = total_size {
            if downloaded % (50 * 1024 * 1024) < chunk.len() as u64 {
                tracing::info!(
                    "  Progress: {:.0}%",
                    downloaded as f64 / total as f64 * 100.0
                );
            }
        }
    }

    file.flush().await?;

    if let Some(expected) = expected_blake3 {
        verify_blake3(dest, expected)?;
    }

    Ok(())
}

/// BLAKE3 of a file's contents, hex-encoded.
fn file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Verify a downloaded file's BLAKE3 checksum.
///
/// On mismatch, removes the corrupt file so the next run re-downloads.
fn verify_blake3(path: &Path, expected: &str) -> anyhow::Result<()> {
    let actual = file_hash(path)
        .map_err(|e| anyhow::anyhow!("Checksum computation failed for {}: {e}", path.display()))?;

    if !actual.eq_ignore_ascii_case(expected) {
        let _ = std::fs::remove_file(path);
        anyhow::bail!(
            "Checksum mismatch for {}:\n  expected: {}\n  actual:   {}\n\
             Corrupt file removed; try downloading again.",
            path.display(),
            expected,
            actual
        );
    }

    tracing::debug!("  Checksum verified: {}…", &actual[..16]);
    Ok(())
}
