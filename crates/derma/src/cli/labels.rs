//! The `derma labels` command: inspect both vocabularies.

use clap::{Args, Subcommand};
use derma_core::open_set::OpenSetVocabulary;
use derma_core::{ArbitrationPolicy, Config, LabelSet};
use serde::Serialize;

/// Arguments for the `labels` command.
#[derive(Args, Debug)]
pub struct LabelsArgs {
    #[command(subcommand)]
    pub command: LabelsCommand,

    /// Print as JSON instead of a table
    #[arg(long, global = true)]
    pub json: bool,
}

/// Subcommands for label inspection.
#[derive(Subcommand, Debug)]
pub enum LabelsCommand {
    /// Closed-set labels from the label map, with severity markers
    Closed,

    /// Open-set labels and the prompts they expand to
    Open,
}

#[derive(Debug, Serialize)]
struct ClosedLabel<'a> {
    index: usize,
    label: &'a str,
    severe: bool,
}

#[derive(Debug, Serialize)]
struct OpenLabel<'a> {
    label: &'a str,
    prompt: String,
}

/// Execute the labels command.
pub async fn execute(args: LabelsArgs, config: Config) -> anyhow::Result<()> {
    match args.command {
        LabelsCommand::Closed => {
            let path = config.label_map_path();
            let labels = LabelSet::load(&path)?;
            // Also rejects severity labels missing from the map.
            let policy = ArbitrationPolicy::new(&config.arbitration, &labels)?;
            let rows = closed_rows(&labels, &policy);

            if args.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("Closed-set labels ({}):", path.display());
                for row in &rows {
                    let marker = if row.severe { "  (severe)" } else { "" };
                    println!("  {:>3}  {}{}", row.index, row.label, marker);
                }
            }
        }

        LabelsCommand::Open => {
            let vocabulary_file = config.vocabulary_file();
            let vocabulary =
                OpenSetVocabulary::from_config(&config.open_set, vocabulary_file.as_deref())?;
            let prompts = vocabulary.prompts(&config.open_set.prompt_template);
            let rows: Vec<OpenLabel<'_>> = vocabulary
                .labels()
                .iter()
                .zip(prompts)
                .map(|(label, prompt)| OpenLabel { label, prompt })
                .collect();

            if args.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("Open-set labels ({}):", rows.len());
                for row in &rows {
                    println!("  - {:36} \"{}\"", row.label, row.prompt);
                }
            }
        }
    }

    Ok(())
}

fn closed_rows<'a>(labels: &'a LabelSet, policy: &ArbitrationPolicy) -> Vec<ClosedLabel<'a>> {
    labels
        .names()
        .iter()
        .enumerate()
        .map(|(index, label)| ClosedLabel {
            index,
            label,
            severe: policy.is_severe(label),
        })
        .collect()
}
