//! Batch intake: turn an uploaded text file into a bounded list of URLs.

use crate::url_policy::{self, CandidateUrl};
use crate::ValidationError;
use serde::Deserialize;

/// Default ceiling on the uploaded file size (128 KiB).
pub const DEFAULT_MAX_BATCH_BYTES: usize = 128 * 1024;

/// Default ceiling on the number of URLs in one batch.
pub const DEFAULT_MAX_BATCH_URLS: usize = 100;

const TEXT_PLAIN: &str = "text/plain";
const TEXT_EXTENSION: &str = ".txt";

/// An uploaded artifact, held in memory for the duration of one submission.
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl BatchFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes,
        }
    }

    /// Declared size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Size and cardinality limits for batch intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BatchLimits {
    pub max_bytes: usize,
    pub max_urls: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BATCH_BYTES,
            max_urls: DEFAULT_MAX_BATCH_URLS,
        }
    }
}

/// Parses batch files under a fixed set of [`BatchLimits`].
#[derive(Debug, Clone, Default)]
pub struct BatchUrlParser {
    limits: BatchLimits,
}

impl BatchUrlParser {
    pub fn new(limits: BatchLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Parse an uploaded file into candidate URLs.
    ///
    /// Checks run in this order: file type, size, UTF-8, URL count, and
    /// finally per-line validation. Per-line failures are aggregated into a
    /// single [`ValidationError::InvalidBatch`] with one message per kind of
    /// failure, naming how many lines failed that way and the first of them.
    pub fn parse(&self, file: &BatchFile) -> Result<Vec<CandidateUrl>, ValidationError> {
        check_file_type(file)?;

        if file.size() > self.limits.max_bytes {
            return Err(ValidationError::FileTooLarge {
                size: file.size(),
                max: self.limits.max_bytes,
            });
        }

        let text = std::str::from_utf8(&file.bytes).map_err(|e| {
            ValidationError::UnsupportedFileType {
                reason: format!("content is not valid UTF-8 text ({})", e),
            }
        })?;

        let lines = split_lines(text);
        self.validate_lines(&lines)
    }

    /// Validate an already-split list of URL strings (the `fileUrls` form).
    pub fn parse_lines<S: AsRef<str>>(
        &self,
        lines: &[S],
    ) -> Result<Vec<CandidateUrl>, ValidationError> {
        let lines: Vec<&str> = lines.iter().map(AsRef::as_ref).collect();
        self.validate_lines(&lines)
    }

    fn validate_lines(&self, lines: &[&str]) -> Result<Vec<CandidateUrl>, ValidationError> {
        if lines.len() > self.limits.max_urls {
            return Err(ValidationError::TooManyUrls {
                count: lines.len(),
                max: self.limits.max_urls,
            });
        }

        let mut urls = Vec::with_capacity(lines.len());
        let mut failures: Vec<LineFailures> = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            match url_policy::validate(line) {
                Ok(url) => urls.push(url),
                Err(e) => {
                    let category = e.batch_category();
                    match failures.iter_mut().find(|f| f.category == category) {
                        Some(seen) => seen.count += 1,
                        None => failures.push(LineFailures {
                            category,
                            count: 1,
                            first_line: idx + 1,
                            first: e.to_string(),
                        }),
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(urls)
        } else {
            Err(ValidationError::InvalidBatch {
                messages: failures.iter().map(LineFailures::message).collect(),
            })
        }
    }
}

/// Lines that failed validation the same way.
struct LineFailures {
    category: &'static str,
    count: usize,
    /// 1-based.
    first_line: usize,
    first: String,
}

impl LineFailures {
    fn message(&self) -> String {
        let lines = if self.count == 1 { "line" } else { "lines" };
        format!(
            "{} ({} {}, first on line {}: {})",
            self.category, self.count, lines, self.first_line, self.first
        )
    }
}

fn check_file_type(file: &BatchFile) -> Result<(), ValidationError> {
    let essence = file
        .media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if essence != TEXT_PLAIN {
        return Err(ValidationError::UnsupportedFileType {
            reason: format!("media type '{}' is not {}", file.media_type, TEXT_PLAIN),
        });
    }
    if !file.name.to_ascii_lowercase().contains(TEXT_EXTENSION) {
        return Err(ValidationError::UnsupportedFileType {
            reason: format!("file name '{}' is not a {} file", file.name, TEXT_EXTENSION),
        });
    }
    Ok(())
}

/// Split on `\n`, dropping only the single empty line a final newline leaves.
///
/// Interior blank lines stay in the list and later fail validation. An empty
/// buffer yields one empty entry.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.len() > 1 && lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    lines
}
