use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Runtime configuration, deserialized once at startup and passed by
/// reference everywhere. Policy numbers are product tuning, not invariants,
/// so they all live here with the shipped defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Config {
    /// SQLite database holding the catalog, the backlog and the usage log.
    pub(crate) db_path: PathBuf,
    /// Mount point of the media collection. The run aborts when absent.
    pub(crate) collection_root: PathBuf,
    #[serde(default = "default_scratch_dir")]
    pub(crate) scratch_dir: PathBuf,
    /// TTF used to burn captions. Without it captions are skipped.
    #[serde(default)]
    pub(crate) font_path: Option<PathBuf>,

    #[serde(default)]
    pub(crate) facebook_token: String,
    #[serde(default = "default_graph_url")]
    pub(crate) graph_url: String,
    /// Safety-classifier scoring endpoint. Unset disables the gate.
    #[serde(default)]
    pub(crate) classifier_url: Option<String>,
    /// Operator alert webhook. Unset drops alerts on the floor.
    #[serde(default)]
    pub(crate) discord_webhook: Option<String>,

    #[serde(default = "default_website")]
    pub(crate) website: String,
    #[serde(default = "default_repo_url")]
    pub(crate) repo_url: String,
    /// Promo text commented under every published post. Empty disables it.
    #[serde(default)]
    pub(crate) promo_comment: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub(crate) max_tokens: usize,
    #[serde(default = "default_max_token_len")]
    pub(crate) max_token_len: usize,
    /// Flat image counts strictly below this collapse into one collage.
    #[serde(default = "default_collage_threshold")]
    pub(crate) collage_threshold: usize,
    #[serde(default = "default_nsfw_threshold")]
    pub(crate) nsfw_threshold: f32,
    /// Counted failures beyond this abort the remaining backlog.
    #[serde(default = "default_circuit_breaker")]
    pub(crate) circuit_breaker: usize,
    /// Items served within this window are skipped as resting.
    #[serde(default = "default_resting_hours")]
    pub(crate) resting_hours: i64,
    #[serde(default)]
    pub(crate) banned_terms: Vec<String>,

    #[serde(default = "default_ffmpeg_path")]
    pub(crate) ffmpeg_path: PathBuf,
    /// Hard deadline on a single frame extraction.
    #[serde(default = "default_ffmpeg_timeout_ms")]
    pub(crate) ffmpeg_timeout_ms: u64,
}

fn default_scratch_dir() -> PathBuf {
    env::temp_dir().join("kinobot")
}

fn default_graph_url() -> String {
    "https://graph.facebook.com/v19.0".to_string()
}

fn default_website() -> String {
    "https://kino.caretas.club".to_string()
}

fn default_repo_url() -> String {
    "https://github.com/vitiko98/kinobot".to_string()
}

fn default_max_tokens() -> usize {
    20
}

fn default_max_token_len() -> usize {
    130
}

fn default_collage_threshold() -> usize {
    4
}

fn default_nsfw_threshold() -> f32 {
    0.2
}

fn default_circuit_breaker() -> usize {
    20
}

fn default_resting_hours() -> i64 {
    72
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffmpeg_timeout_ms() -> u64 {
    60_000
}

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    /// Load from a JSON file, then let the environment override secrets so
    /// credentials can stay out of the config on shared hosts.
    pub(crate) fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read config {}: {e}", path.display()))?;
        let mut config: Config = serde_json::from_str(&data)?;
        if let Some(token) = env_optional("KINOBOT_FACEBOOK_TOKEN") {
            config.facebook_token = token;
        }
        if let Some(webhook) = env_optional("KINOBOT_DISCORD_WEBHOOK") {
            config.discord_webhook = Some(webhook);
        }
        Ok(config)
    }
}

#[cfg(test)]
impl Default for Config {
    /// Test fixture: everything local, external services disabled.
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(":memory:"),
            collection_root: env::temp_dir(),
            scratch_dir: env::temp_dir().join("kinobot_test"),
            font_path: None,
            facebook_token: String::new(),
            graph_url: default_graph_url(),
            classifier_url: None,
            discord_webhook: None,
            website: default_website(),
            repo_url: default_repo_url(),
            promo_comment: None,
            max_tokens: default_max_tokens(),
            max_token_len: default_max_token_len(),
            collage_threshold: default_collage_threshold(),
            nsfw_threshold: default_nsfw_threshold(),
            circuit_breaker: default_circuit_breaker(),
            resting_hours: default_resting_hours(),
            banned_terms: Vec::new(),
            ffmpeg_path: default_ffmpeg_path(),
            ffmpeg_timeout_ms: default_ffmpeg_timeout_ms(),
        }
    }
}
