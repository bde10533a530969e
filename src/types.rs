use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ── Constants ──────────────────────────────────────────────────────────

pub const PUBLISH_MAX_ATTEMPTS: u32 = 5;
pub const PUBLISH_BACKOFF_MS: u64 = 3 * 60 * 1000;
pub const PUBLISH_RATE_LIMIT_BACKOFF_MS: u64 = 30 * 60 * 1000;
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

// ── Snapshot entities ──────────────────────────────────────────────────

/// One competing image. Created once at seeding, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    pub id: String,
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Generated,
    Posted,
    Over,
}

impl MatchStatus {
    /// The only legal successor, if any. Statuses never regress.
    pub fn next(self) -> Option<MatchStatus> {
        match self {
            MatchStatus::Generated => Some(MatchStatus::Posted),
            MatchStatus::Posted => Some(MatchStatus::Over),
            MatchStatus::Over => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Created,
    Generated,
    Posted,
    Over,
}

impl PhaseStatus {
    pub fn next(self) -> Option<PhaseStatus> {
        match self {
            PhaseStatus::Created => Some(PhaseStatus::Generated),
            PhaseStatus::Generated => Some(PhaseStatus::Posted),
            PhaseStatus::Posted => Some(PhaseStatus::Over),
            PhaseStatus::Over => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchParticipant {
    pub image_id: String,
    pub reaction: String,
    #[serde(default)]
    pub votes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchData {
    pub match_number: u32,
    pub status: MatchStatus,
    pub participants: Vec<MatchParticipant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at_ms: Option<u64>,
}

impl MatchData {
    pub fn new(match_number: u32, participants: Vec<MatchParticipant>) -> Self {
        MatchData {
            match_number,
            status: MatchStatus::Generated,
            participants,
            post_id: None,
            posted_at_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseData {
    pub phase_number: u32,
    pub status: PhaseStatus,
    /// Image ids of the entrants, resolved through `PollSnapshot::images`.
    pub participants: Vec<String>,
    #[serde(default)]
    pub matches: Vec<MatchData>,
}

impl PhaseData {
    pub fn new(phase_number: u32, participants: Vec<String>) -> Self {
        PhaseData {
            phase_number,
            status: PhaseStatus::Created,
            participants,
            matches: Vec::new(),
        }
    }
}

/// Root persisted object. `phases` is append-only; the current phase is
/// always the last one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    pub images: HashMap<String, ImageData>,
    pub phases: Vec<PhaseData>,
}

impl PollSnapshot {
    pub fn current_phase(&self) -> Result<&PhaseData, String> {
        self.phases
            .last()
            .ok_or_else(|| "Poll snapshot has no phases.".to_string())
    }

    pub fn current_phase_mut(&mut self) -> Result<&mut PhaseData, String> {
        self.phases
            .last_mut()
            .ok_or_else(|| "Poll snapshot has no phases.".to_string())
    }

    pub fn image(&self, id: &str) -> Result<&ImageData, String> {
        self.images
            .get(id)
            .ok_or_else(|| format!("Image {id} missing from snapshot."))
    }
}

// ── Reaction record ────────────────────────────────────────────────────

/// A named voting option: pure data, consumed by the compositor and the
/// caption builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionOption {
    pub name: String,
    pub emoji: String,
    pub badge_path: String,
}

// ── Config types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub poll_name: String,
    pub access_token: String,
    pub api_base: String,
    pub page_id: String,
    /// Target album for match posts; falls back to the page timeline.
    pub album_id: String,
    /// Winner announcement target; empty disables the announcement.
    pub winner_album_id: String,
    pub images_dir: String,
    /// Remote albums to collect source images from; empty skips collection.
    pub source_album_ids: Vec<String>,
    /// Grid layout, "<cols>x<rows>". cols*rows = participants per match.
    pub layout: String,
    pub reactions: Vec<ReactionOption>,
    /// Duration strings with a unit suffix: "30s", "15m", "6h", "1d", "1w".
    pub voting_duration: String,
    pub post_interval: String,
    pub max_posts_per_batch: u32,
    pub post_message: String,
    pub winner_message: String,
    pub interactive_mode: bool,
    pub original_urls_enabled: bool,
    pub state_file: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_name: String::new(),
            access_token: String::new(),
            api_base: "https://graph.facebook.com/v19.0".to_string(),
            page_id: String::new(),
            album_id: String::new(),
            winner_album_id: String::new(),
            images_dir: "pics".to_string(),
            source_album_ids: Vec::new(),
            layout: "2x2".to_string(),
            reactions: Vec::new(),
            voting_duration: "6h".to_string(),
            post_interval: "15m".to_string(),
            max_posts_per_batch: 4,
            post_message: "{poll_name} — Phase {phase_number}, Match {match_number} of {total_matches}. Vote with the reactions below!".to_string(),
            winner_message: "{poll_name} is over — the winner is {winner_id}!".to_string(),
            interactive_mode: false,
            original_urls_enabled: false,
            state_file: "poll_data.json".to_string(),
        }
    }
}

/// Validated runtime settings derived from `AppConfig`.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub poll_name: String,
    pub album_id: String,
    pub winner_album_id: Option<String>,
    pub images_dir: PathBuf,
    pub source_album_ids: Vec<String>,
    pub layout: (u32, u32),
    pub participants_per_match: usize,
    pub reactions: Vec<ReactionOption>,
    pub voting_duration_ms: u64,
    pub post_interval_ms: u64,
    pub max_posts_per_batch: u32,
    pub post_message: String,
    pub winner_message: String,
    pub interactive_mode: bool,
    pub original_urls_enabled: bool,
    pub state_file: PathBuf,
}
