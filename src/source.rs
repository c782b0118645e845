//! Frame extraction seam.
//!
//! [`FrameSource`] is the boundary to the subtitle/frame decoder. The
//! production implementation matches quotes against the item's `.srt`
//! sidecar and hands the actual decoding to an external `ffmpeg` process;
//! tests swap in an in-memory fake.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{CatalogItem, ContentToken, Frame, strip_markup};

/// Quotes scoring below this never match.
const MIN_MATCH_SCORE: f32 = 0.5;
/// A merged multi-line span must beat the single line by this much.
const CHAIN_MARGIN: f32 = 0.05;
/// Maximum silence between two subtitle entries of one exchange.
const CHAIN_GAP_SECS: f32 = 1.5;
/// Longest run a chain expands into.
const CHAIN_MAX_FRAMES: usize = 4;

const PROCESS_POLL_MS: u64 = 25;

/// Outcome of resolving one token.
///
/// With `chain_mode` off the source never returns `Chain`; a detected
/// multi-line exchange surfaces as the distinct `ChainDetected` signal so
/// the composer can branch and re-invoke in chain mode.
#[derive(Debug)]
pub(crate) enum Resolution {
    Single(Frame),
    ChainDetected,
    Chain(Vec<Frame>),
}

pub(crate) trait FrameSource {
    fn resolve(
        &self,
        item: &CatalogItem,
        token: &ContentToken,
        chain_mode: bool,
    ) -> Result<Resolution>;

    /// A representative subtitle line, used by the metadata discovery
    /// commands to turn a bare catalog item into a quote request.
    fn random_quote(&self, item: &CatalogItem) -> Result<String>;
}

// ── Subtitle matching ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct SubEntry {
    pub(crate) start: f32,
    pub(crate) end: f32,
    pub(crate) text: String,
}

impl SubEntry {
    fn midpoint(&self) -> f32 {
        (self.start + self.end) / 2.0
    }
}

/// Parse an SRT file body. Tolerates CRLF and a BOM; entries that fail to
/// parse are dropped.
pub(crate) fn parse_srt(body: &str) -> Vec<SubEntry> {
    let body = body.trim_start_matches('\u{feff}').replace('\r', "");
    let mut entries = Vec::new();
    for block in body.split("\n\n") {
        let mut lines = block.lines().filter(|l| !l.trim().is_empty());
        let Some(first) = lines.next() else { continue };
        // The numeric index line is optional in the wild.
        let timing = if first.contains("-->") {
            first
        } else {
            match lines.next() {
                Some(line) if line.contains("-->") => line,
                _ => continue,
            }
        };
        let Some((start, end)) = parse_timing(timing) else {
            continue;
        };
        let text = strip_markup(&lines.collect::<Vec<_>>().join(" "));
        if text.is_empty() {
            continue;
        }
        entries.push(SubEntry { start, end, text });
    }
    entries
}

fn parse_timing(line: &str) -> Option<(f32, f32)> {
    let (start, end) = line.split_once("-->")?;
    Some((parse_srt_timestamp(start)?, parse_srt_timestamp(end)?))
}

fn parse_srt_timestamp(raw: &str) -> Option<f32> {
    let raw = raw.trim();
    let (hms, millis) = raw.split_once(',').unwrap_or((raw, "0"));
    let parts: Vec<&str> = hms.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f32 = parts[0].parse().ok()?;
    let minutes: f32 = parts[1].parse().ok()?;
    let seconds: f32 = parts[2].parse().ok()?;
    let millis: f32 = millis.trim().parse().unwrap_or(0.0);
    Some(hours * 3600.0 + minutes * 60.0 + seconds + millis / 1000.0)
}

fn normalize_text(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Dice coefficient over word sets. Good enough for short quotes; the
/// catalog side is trusted text, not OCR noise.
pub(crate) fn similarity(a: &str, b: &str) -> f32 {
    let ta = normalize_text(a);
    let tb = normalize_text(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let common = ta.iter().filter(|t| tb.contains(t)).count();
    (2.0 * common as f32) / (ta.len() + tb.len()) as f32
}

/// Index of the best-matching entry, with its score.
pub(crate) fn best_match(entries: &[SubEntry], quote: &str) -> Option<(usize, f32)> {
    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| (idx, similarity(quote, &entry.text)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// The contiguous window around `idx` that matches the quote best, bounded
/// by [`CHAIN_MAX_FRAMES`] and broken at gaps longer than an exchange pause.
/// Returns `None` when no window beats the single entry by [`CHAIN_MARGIN`].
pub(crate) fn chain_span(
    entries: &[SubEntry],
    idx: usize,
    quote: &str,
) -> Option<std::ops::RangeInclusive<usize>> {
    let single = similarity(quote, &entries[idx].text);
    let mut best: Option<(std::ops::RangeInclusive<usize>, f32)> = None;

    for size in 2..=CHAIN_MAX_FRAMES.min(entries.len()) {
        for start in idx.saturating_sub(size - 1)..=idx {
            let end = start + size - 1;
            if end >= entries.len() || !(start..=end).contains(&idx) {
                continue;
            }
            if (start..end)
                .any(|i| entries[i + 1].start - entries[i].end > CHAIN_GAP_SECS)
            {
                continue;
            }
            let joined = entries[start..=end]
                .iter()
                .map(|e| e.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let score = similarity(quote, &joined);
            if best.as_ref().is_none_or(|(_, s)| score > *s) {
                best = Some((start..=end, score));
            }
        }
    }

    match best {
        Some((span, score)) if score > single + CHAIN_MARGIN => Some(span),
        _ => None,
    }
}

// ── Production source ────────────────────────────────────────────────────

pub(crate) struct SubtitleSource<'a> {
    config: &'a Config,
}

impl<'a> SubtitleSource<'a> {
    pub(crate) fn new(config: &'a Config) -> Self {
        Self { config }
    }

    fn load_entries(&self, item: &CatalogItem) -> Result<Vec<SubEntry>> {
        let path = item
            .subtitle
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("no subtitles for {}", item.title)))?;
        let body = std::fs::read_to_string(path)?;
        let entries = parse_srt(&body);
        if entries.is_empty() {
            return Err(Error::NotFound(format!(
                "empty subtitle file for {}",
                item.title
            )));
        }
        Ok(entries)
    }

    /// Decode one still by invoking the external ffmpeg decoder, bounded by
    /// the configured deadline.
    fn extract_frame(&self, media: &Path, seconds: f32) -> Result<image::DynamicImage> {
        if !media.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("media file missing: {}", media.display()),
            )));
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let out = std::env::temp_dir().join(format!(
            "kinobot_frame_{}_{nanos}.png",
            std::process::id()
        ));

        let mut child = Command::new(&self.config.ffmpeg_path)
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-ss")
            .arg(format!("{seconds:.3}"))
            .arg("-i")
            .arg(media)
            .arg("-frames:v")
            .arg("1")
            .arg(&out)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let deadline = Duration::from_millis(self.config.ffmpeg_timeout_ms);
        let started = Instant::now();
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if started.elapsed() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = std::fs::remove_file(&out);
                    return Err(Error::Timeout(self.config.ffmpeg_timeout_ms));
                }
                None => std::thread::sleep(Duration::from_millis(PROCESS_POLL_MS)),
            }
        };
        if !status.success() {
            let _ = std::fs::remove_file(&out);
            return Err(Error::Io(std::io::Error::other(format!(
                "ffmpeg failed on {}",
                media.display()
            ))));
        }

        let frame = image::open(&out)?;
        let _ = std::fs::remove_file(&out);
        Ok(frame)
    }

    fn frame_at(&self, item: &CatalogItem, seconds: f32, discriminator: String, is_minute: bool) -> Result<Frame> {
        let img = self.extract_frame(&item.path, seconds)?;
        Ok(Frame {
            images: vec![img],
            discriminator,
            item: item.clone(),
            is_minute,
        })
    }
}

impl FrameSource for SubtitleSource<'_> {
    fn resolve(
        &self,
        item: &CatalogItem,
        token: &ContentToken,
        chain_mode: bool,
    ) -> Result<Resolution> {
        match token {
            ContentToken::Minute(seconds) => {
                let frame =
                    self.frame_at(item, *seconds as f32, token.discriminator(), true)?;
                Ok(Resolution::Single(frame))
            }
            ContentToken::Quote(quote) => {
                let entries = self.load_entries(item)?;
                let (idx, score) = best_match(&entries, quote)
                    .ok_or_else(|| Error::NotFound(quote.clone()))?;
                if score < MIN_MATCH_SCORE {
                    return Err(Error::NotFound(quote.clone()));
                }

                let span = chain_span(&entries, idx, quote);
                if !chain_mode {
                    if span.is_some() {
                        return Ok(Resolution::ChainDetected);
                    }
                    let entry = &entries[idx];
                    let frame =
                        self.frame_at(item, entry.midpoint(), entry.text.clone(), false)?;
                    return Ok(Resolution::Single(frame));
                }

                let span = span.unwrap_or(idx..=idx);
                let mut frames = Vec::new();
                for entry in &entries[*span.start()..=*span.end()] {
                    frames.push(self.frame_at(item, entry.midpoint(), entry.text.clone(), false)?);
                }
                Ok(Resolution::Chain(frames))
            }
        }
    }

    fn random_quote(&self, item: &CatalogItem) -> Result<String> {
        let entries = self.load_entries(item)?;
        let candidates: Vec<&SubEntry> = entries
            .iter()
            .filter(|e| (8..=80).contains(&e.text.chars().count()))
            .collect();
        let pool = if candidates.is_empty() {
            entries.iter().collect()
        } else {
            candidates
        };
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as usize)
            .unwrap_or(0);
        Ok(pool[nanos % pool.len()].text.clone())
    }
}
