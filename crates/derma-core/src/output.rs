//! Per-image prediction records and their JSON / JSONL writer.
//!
//! A failed image is still a record: it carries the public
//! "prediction unavailable" text and nothing about the root cause.

use serde::Serialize;
use std::io::{self, Write};

use crate::error::PREDICTION_UNAVAILABLE;
use crate::types::{Assessment, Verdict};

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Single JSON object or array
    Json,
    /// One JSON object per line (newline-delimited JSON)
    JsonLines,
}

impl OutputFormat {
    /// Parse format from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "jsonl" | "jsonlines" | "ndjson" => Some(Self::JsonLines),
            _ => None,
        }
    }
}

/// What happened for one input image.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    /// The verdict only.
    Verdict(Verdict),
    /// The verdict with intermediate results.
    Assessment(Box<Assessment>),
    /// The engine failed; details went to the log.
    Unavailable {
        /// Always [`PREDICTION_UNAVAILABLE`].
        error: &'static str,
    },
}

/// One output line: the input image and its outcome.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionRecord {
    /// Image path as given
    pub image: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl PredictionRecord {
    /// Record from a full assessment; `detailed` keeps the intermediates.
    pub fn from_assessment(image: impl Into<String>, assessment: Assessment, detailed: bool) -> Self {
        let outcome = if detailed {
            Outcome::Assessment(Box::new(assessment))
        } else {
            Outcome::Verdict(assessment.verdict)
        };
        Self {
            image: image.into(),
            outcome,
        }
    }

    /// Record for an image the engine could not handle.
    pub fn unavailable(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            outcome: Outcome::Unavailable {
                error: PREDICTION_UNAVAILABLE,
            },
        }
    }

    /// Whether this record carries a verdict.
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, Outcome::Unavailable { .. })
    }
}

/// Writes prediction records as JSON or JSONL and counts outcomes.
pub struct RecordWriter<W: Write> {
    writer: W,
    format: OutputFormat,
    pretty: bool,
    succeeded: usize,
    failed: usize,
}

impl<W: Write> RecordWriter<W> {
    /// Create a new writer. `pretty` only affects the JSON format.
    pub fn new(writer: W, format: OutputFormat, pretty: bool) -> Self {
        Self {
            writer,
            format,
            pretty,
            succeeded: 0,
            failed: 0,
        }
    }

    /// Write a single record.
    ///
    /// In JSONL format this is one line; in JSON format one object.
    pub fn write(&mut self, record: &PredictionRecord) -> io::Result<()> {
        self.emit(record)?;
        self.count(record);
        Ok(())
    }

    /// Write a batch. JSON format emits a single array.
    pub fn write_all(&mut self, records: &[PredictionRecord]) -> io::Result<()> {
        match self.format {
            OutputFormat::Json => {
                self.emit(&records)?;
                records.iter().for_each(|r| self.count(r));
            }
            OutputFormat::JsonLines => {
                for record in records {
                    self.write(record)?;
                }
            }
        }
        Ok(())
    }

    fn emit<T: Serialize + ?Sized>(&mut self, value: &T) -> io::Result<()> {
        if self.pretty && self.format == OutputFormat::Json {
            serde_json::to_writer_pretty(&mut self.writer, value).map_err(io::Error::other)?;
        } else {
            serde_json::to_writer(&mut self.writer, value).map_err(io::Error::other)?;
        }
        writeln!(self.writer)
    }

    fn count(&mut self, record: &PredictionRecord) {
        if record.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Records that carried a verdict.
    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    /// Records reported as unavailable.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Consume the writer and return the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ReasonCode, VerdictSource};

    fn verdict_record(image: &str) -> PredictionRecord {
        PredictionRecord {
            image: image.to_string(),
            outcome: Outcome::Verdict(Verdict {
                final_label: "Acne".to_string(),
                final_confidence: 0.9,
                source: VerdictSource::ClosedSet,
                reason: ReasonCode::ConfidentAndValidated,
            }),
        }
    }

    #[test]
    fn test_verdict_record_is_flat() {
        let json = serde_json::to_value(verdict_record("a.jpg")).unwrap();
        assert_eq!(json["image"], "a.jpg");
        assert_eq!(json["final_label"], "Acne");
        assert_eq!(json["source"], "closed-set");
        assert_eq!(json["reason"], "confident_and_validated");
    }

    #[test]
    fn test_unavailable_record_hides_details() {
        let json = serde_json::to_string(&PredictionRecord::unavailable("b.jpg")).unwrap();
        assert_eq!(json, r#"{"image":"b.jpg","error":"prediction unavailable"}"#);
    }

    #[test]
    fn test_write_jsonl_counts_outcomes() {
        let mut buffer = Vec::new();
        let mut writer = RecordWriter::new(&mut buffer, OutputFormat::JsonLines, true);
        writer.write(&verdict_record("a.jpg")).unwrap();
        writer.write(&PredictionRecord::unavailable("b.jpg")).unwrap();
        assert_eq!((writer.succeeded(), writer.failed()), (1, 1));

        let output = String::from_utf8(buffer).unwrap();
        // JSONL is never pretty-printed.
        assert_eq!(output.lines().count(), 2);
    }

    #[test]
    fn test_write_all_json_array() {
        let mut buffer = Vec::new();
        let mut writer = RecordWriter::new(&mut buffer, OutputFormat::Json, false);
        writer
            .write_all(&[verdict_record("a.jpg"), verdict_record("c.jpg")])
            .unwrap();
        assert_eq!(writer.succeeded(), 2);

        let output = String::from_utf8(buffer).unwrap();
        assert!(output.starts_with('['));
        assert!(output.trim().ends_with(']'));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(OutputFormat::parse("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("JSONL"), Some(OutputFormat::JsonLines));
        assert_eq!(OutputFormat::parse("csv"), None);
    }
}
