use std::path::PathBuf;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

// ── Backlog selection ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RequestKind {
    Movies,
    Episodes,
}

impl RequestKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Movies => "movies",
            Self::Episodes => "episodes",
        }
    }
}

// ── Commands ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MetadataField {
    Year,
    Director,
    Category,
}

impl MetadataField {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Director => "director",
            Self::Category => "category",
        }
    }
}

/// Command type of a backlog entry, resolved at parse time.
///
/// A `!req` row becomes a minute request when every token carries a time
/// pattern and a quote request otherwise; mixed rows resolve per token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandType {
    QuoteRequest,
    MinuteRequest,
    ParallelRequest,
    Metadata(MetadataField),
}

impl CommandType {
    pub(crate) fn parse(raw: &str, tokens: &[ContentToken]) -> Option<Self> {
        match raw.trim().trim_start_matches('!') {
            "req" => {
                if !tokens.is_empty() && tokens.iter().all(|t| matches!(t, ContentToken::Minute(_)))
                {
                    Some(Self::MinuteRequest)
                } else {
                    Some(Self::QuoteRequest)
                }
            }
            "parallel" => Some(Self::ParallelRequest),
            "year" => Some(Self::Metadata(MetadataField::Year)),
            "director" => Some(Self::Metadata(MetadataField::Director)),
            "category" | "country" => Some(Self::Metadata(MetadataField::Category)),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::QuoteRequest | Self::MinuteRequest => "!req",
            Self::ParallelRequest => "!parallel",
            Self::Metadata(MetadataField::Year) => "!year",
            Self::Metadata(MetadataField::Director) => "!director",
            Self::Metadata(MetadataField::Category) => "!category",
        }
    }

    pub(crate) fn is_metadata(&self) -> bool {
        matches!(self, Self::Metadata(_))
    }
}

// ── Content tokens ───────────────────────────────────────────────────────

/// One unit inside a request's content list: a timestamp or a quote.
/// The stored text decides nothing; the format does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ContentToken {
    /// Seconds into the item.
    Minute(u32),
    Quote(String),
}

impl ContentToken {
    pub(crate) fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match parse_timestamp(trimmed) {
            Some(seconds) => Self::Minute(seconds),
            None => Self::Quote(strip_markup(trimmed)),
        }
    }

    pub(crate) fn is_minute(&self) -> bool {
        matches!(self, Self::Minute(_))
    }

    /// Human-readable discriminator: the quote itself, or "Minute MM:SS".
    pub(crate) fn discriminator(&self) -> String {
        match self {
            Self::Quote(text) => text.clone(),
            Self::Minute(seconds) => {
                let hours = seconds / 3600;
                let minutes = (seconds % 3600) / 60;
                let secs = seconds % 60;
                if hours > 0 {
                    format!("Minute {hours}:{minutes:02}:{secs:02}")
                } else {
                    format!("Minute {minutes:02}:{secs:02}")
                }
            }
        }
    }

    /// Length of the raw content, for the per-token length cap.
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Quote(text) => text.chars().count(),
            Self::Minute(_) => 0,
        }
    }
}

/// Accepts `MM:SS` and `H:MM:SS` forms. Anything else is a quote.
fn parse_timestamp(raw: &str) -> Option<u32> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let mut fields = Vec::with_capacity(parts.len());
    for part in &parts {
        if part.is_empty() || part.len() > 3 || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        fields.push(part.parse::<u32>().ok()?);
    }
    match fields.as_slice() {
        [minutes, seconds] if *seconds < 60 => Some(minutes * 60 + seconds),
        [hours, minutes, seconds] if *minutes < 60 && *seconds < 60 => {
            Some(hours * 3600 + minutes * 60 + seconds)
        }
        _ => None,
    }
}

/// Drop `<i>`-style subtitle markup from a quote.
pub(crate) fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.trim().to_string()
}

// ── Backlog entries ──────────────────────────────────────────────────────

/// One backlog row. Created externally when a user submits a comment;
/// consumed and closed by the publishing loop. `used` flips to true exactly
/// once and never resets.
#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub(crate) id: String,
    pub(crate) user: String,
    pub(crate) comment: String,
    pub(crate) command: CommandType,
    pub(crate) content: Vec<ContentToken>,
    /// Free-text query naming the target catalog item.
    pub(crate) movie: String,
    pub(crate) is_episode: bool,
    /// Sibling comment texts of a parallel request, in declaration order.
    pub(crate) parallel: Vec<String>,
    pub(crate) verified: bool,
    pub(crate) used: bool,
    pub(crate) priority: bool,
}

impl Request {
    pub(crate) fn is_parallel(&self) -> bool {
        self.command == CommandType::ParallelRequest && !self.parallel.is_empty()
    }
}

// ── Catalog ──────────────────────────────────────────────────────────────

/// Movie or episode metadata. Read-only to this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CatalogItem {
    pub(crate) id: i64,
    pub(crate) title: String,
    pub(crate) og_title: Option<String>,
    pub(crate) year: Option<i32>,
    pub(crate) director: Option<String>,
    pub(crate) category: Option<String>,
    pub(crate) path: PathBuf,
    pub(crate) subtitle: Option<PathBuf>,
    pub(crate) season: Option<i32>,
    pub(crate) episode: Option<i32>,
}

impl CatalogItem {
    pub(crate) fn is_episode(&self) -> bool {
        self.season.is_some() && self.episode.is_some()
    }

    /// "Original Title [Title]" when the translation differs and fits;
    /// "Title - S01E02" for episodes.
    pub(crate) fn pretty_title(&self) -> String {
        if let (Some(season), Some(episode)) = (self.season, self.episode) {
            return format!("{} - S{season:02}E{episode:02}", self.title);
        }
        if let Some(og) = &self.og_title {
            if !og.eq_ignore_ascii_case(&self.title) && og.chars().count() < 45 {
                return format!("{og} [{}]", self.title);
            }
        }
        self.title.clone()
    }

    /// Short "Title (Year)" form used in parallel comparison titles.
    pub(crate) fn short_title(&self) -> String {
        match self.year {
            Some(year) if !self.is_episode() => format!("{} ({year})", self.title),
            _ => self.pretty_title(),
        }
    }
}

// ── Frames & artifacts ───────────────────────────────────────────────────

/// Resolution of one content token against one catalog item. Immutable once
/// produced; ownership moves to the assembler.
#[derive(Debug)]
pub(crate) struct Frame {
    /// One raw image, or several for a chain.
    pub(crate) images: Vec<DynamicImage>,
    pub(crate) discriminator: String,
    pub(crate) item: CatalogItem,
    pub(crate) is_minute: bool,
}

/// The finished, saved output of one request: image paths in display order
/// plus the description to publish. Consumed once by the publish step.
#[derive(Debug)]
pub(crate) struct AssembledArtifact {
    pub(crate) paths: Vec<PathBuf>,
    pub(crate) description: String,
    /// Synthesized comparison title, parallel requests only.
    pub(crate) alt_title: Option<String>,
}

// ── Outcomes ─────────────────────────────────────────────────────────────

/// Terminal classification of one request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    RestingMovie,
    BlockedUser,
    NsfwRejected,
    TooLong,
    TransientIo,
    GenericFailure,
}

impl Outcome {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RestingMovie => "resting_movie",
            Self::BlockedUser => "blocked_user",
            Self::NsfwRejected => "nsfw_rejected",
            Self::TooLong => "too_long",
            Self::TransientIo => "transient_io",
            Self::GenericFailure => "generic_failure",
        }
    }
}
