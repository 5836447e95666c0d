pub mod ass;
pub mod fallback;
pub mod sbv;
pub mod srt;
pub mod sub;
pub mod timestamp;
pub mod ttml;
pub mod vtt;

use crate::error::{Result, SubsearchError};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::warn;

/// One timed subtitle line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub start: Duration,
    pub end: Duration,
    pub text: String,
    /// Position in the source file, used to break ties between equal starts.
    pub sequence_index: usize,
}

impl Cue {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// The closed set of timed-text grammars the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubtitleFormat {
    Srt,
    Vtt,
    Ass,
    Sub,
    Sbv,
    Ttml,
}

impl std::fmt::Display for SubtitleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubtitleFormat::Srt => write!(f, "srt"),
            SubtitleFormat::Vtt => write!(f, "vtt"),
            SubtitleFormat::Ass => write!(f, "ass"),
            SubtitleFormat::Sub => write!(f, "sub"),
            SubtitleFormat::Sbv => write!(f, "sbv"),
            SubtitleFormat::Ttml => write!(f, "ttml"),
        }
    }
}

impl SubtitleFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "srt" => Some(SubtitleFormat::Srt),
            "vtt" | "webvtt" => Some(SubtitleFormat::Vtt),
            "ass" | "ssa" => Some(SubtitleFormat::Ass),
            "sub" => Some(SubtitleFormat::Sub),
            "sbv" => Some(SubtitleFormat::Sbv),
            "ttml" | "dfxp" | "xml" => Some(SubtitleFormat::Ttml),
            _ => None,
        }
    }

    /// Guess the format from the decoded text alone.
    pub fn sniff(text: &str) -> Option<Self> {
        let head: String = text.trim_start_matches('\u{feff}').chars().take(4096).collect();
        let trimmed = head.trim_start();

        if trimmed.starts_with("WEBVTT") {
            return Some(SubtitleFormat::Vtt);
        }
        if trimmed.starts_with("[Script Info]") || head.contains("\n[Events]") {
            return Some(SubtitleFormat::Ass);
        }
        if (trimmed.starts_with("<?xml") || trimmed.starts_with("<tt")) && head.contains("<tt") {
            return Some(SubtitleFormat::Ttml);
        }
        if trimmed.starts_with("[INFORMATION]") || sub::is_microdvd(trimmed) {
            return Some(SubtitleFormat::Sub);
        }
        if head.lines().any(|l| timestamp::parse_arrow(l.trim()).is_some()) {
            return Some(SubtitleFormat::Srt);
        }
        if head.lines().any(|l| timestamp::parse_comma_pair(l).is_some()) {
            return Some(SubtitleFormat::Sbv);
        }
        None
    }

    /// Extension first, content sniffing as the fallback.
    pub fn detect(path: &Path, text: &str) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .or_else(|| Self::sniff(text))
    }

    pub fn decode(self, text: &str, options: &DecodeOptions) -> Decoded {
        match self {
            SubtitleFormat::Srt => srt::decode(text),
            SubtitleFormat::Vtt => vtt::decode(text),
            SubtitleFormat::Ass => ass::decode(text),
            SubtitleFormat::Sub => sub::decode(text, options.microdvd_fps),
            SubtitleFormat::Sbv => sbv::decode(text),
            SubtitleFormat::Ttml => ttml::decode(text),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub microdvd_fps: f64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { microdvd_fps: 23.976 }
    }
}

/// Output of one decoder run.
#[derive(Debug, Clone, Default)]
pub struct Decoded {
    pub cues: Vec<Cue>,
    /// Blocks that looked like cues but could not be parsed.
    pub skipped: usize,
}

/// Run a structured decoder, failing with `Decode` when non-trivial
/// content yields no cues at all.
pub fn decode_text(
    format: SubtitleFormat,
    text: &str,
    path: &Path,
    options: &DecodeOptions,
) -> Result<Decoded> {
    let decoded = format.decode(text, options);
    if decoded.cues.is_empty() && is_non_trivial(text) {
        return Err(SubsearchError::Decode {
            path: path.to_path_buf(),
            format: format.to_string(),
        });
    }
    Ok(decoded)
}

pub fn is_non_trivial(text: &str) -> bool {
    text.chars().any(|c| c.is_alphanumeric())
}

/// Collects cues in source order and hands them back sorted by start.
#[derive(Debug, Default)]
pub(crate) struct CueSink {
    cues: Vec<Cue>,
    skipped: usize,
}

impl CueSink {
    pub(crate) fn push(&mut self, start: Duration, end: Duration, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let end = if end < start {
            warn!(
                "Cue at {} ends before it starts; clamping end",
                timestamp::format_precise(start)
            );
            start
        } else {
            end
        };
        let sequence_index = self.cues.len();
        self.cues.push(Cue {
            start,
            end,
            text: text.to_string(),
            sequence_index,
        });
    }

    pub(crate) fn skip(&mut self) {
        self.skipped += 1;
    }

    pub(crate) fn finish(mut self) -> Decoded {
        // Stable sort keeps source order for equal starts.
        self.cues.sort_by_key(|c| c.start);
        Decoded {
            cues: self.cues,
            skipped: self.skipped,
        }
    }
}

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("Invalid tag regex"));
static OVERRIDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^}]*\}").expect("Invalid override regex"));

/// Remove `<...>` markup, keeping the text between tags.
pub(crate) fn strip_tags(text: &str) -> String {
    TAG.replace_all(text, "").into_owned()
}

/// Remove `{...}` override and control blocks.
pub(crate) fn strip_overrides(text: &str) -> String {
    OVERRIDE.replace_all(text, "").into_owned()
}

/// Trim every line and drop empty ones.
pub(crate) fn join_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> String {
    lines
        .into_iter()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split text into blank-line-delimited blocks of lines.
pub(crate) fn blocks(text: &str) -> Vec<Vec<&str>> {
    let mut result = Vec::new();
    let mut current = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                result.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        result.push(current);
    }
    result
}
