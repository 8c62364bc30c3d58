//! Persona profile loaded from `persona.toml`.
//!
//! The profile carries everything that shapes one executive persona: the prompt
//! template (kept in its own file next to the TOML), relevance keywords, model
//! settings, throttling knobs and the operating window.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Weekday;
use chrono_tz::Tz;
use serde::Deserialize;

const DEFAULT_MODEL: &str = "gpt-4.1";
const DEFAULT_MAX_TOKENS: u32 = 600;
const DEFAULT_MAX_TURNS: u32 = 5;
const DEFAULT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_STAGGER_BASE_MS: u64 = 2_000;
const DEFAULT_STAGGER_JITTER_MS: u64 = 4_000;
const DEFAULT_TIMEZONE: &str = "America/New_York";
const DEFAULT_PRIORITY_CLAUSE: &str =
    "This message is from the Founder. Treat it as top priority.";

#[derive(Debug, thiserror::Error)]
pub enum PersonaError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse persona config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),
    #[error("unknown weekday: {0}")]
    InvalidWeekday(String),
    #[error("invalid working hours {start}..{end}")]
    InvalidHours { start: u32, end: u32 },
    #[error("persona prompt {0} is empty")]
    EmptyPrompt(PathBuf),
}

#[derive(Debug, Deserialize)]
struct PersonaFile {
    id: String,
    display_name: String,
    prompt_path: PathBuf,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_priority_clause")]
    priority_clause: String,
    #[serde(default = "default_max_turns")]
    max_turns: u32,
    #[serde(default = "default_cooldown_secs")]
    cooldown_secs: u64,
    #[serde(default = "default_stagger_base_ms")]
    stagger_base_ms: u64,
    #[serde(default = "default_stagger_jitter_ms")]
    stagger_jitter_ms: u64,
    #[serde(default)]
    working_hours: WorkingHoursFile,
}

#[derive(Debug, Deserialize)]
struct WorkingHoursFile {
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default = "default_start_hour")]
    start_hour: u32,
    #[serde(default = "default_end_hour")]
    end_hour: u32,
    #[serde(default = "default_days")]
    days: Vec<String>,
}

impl Default for WorkingHoursFile {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            days: default_days(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_priority_clause() -> String {
    DEFAULT_PRIORITY_CLAUSE.to_string()
}

fn default_max_turns() -> u32 {
    DEFAULT_MAX_TURNS
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

fn default_stagger_base_ms() -> u64 {
    DEFAULT_STAGGER_BASE_MS
}

fn default_stagger_jitter_ms() -> u64 {
    DEFAULT_STAGGER_JITTER_MS
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_start_hour() -> u32 {
    9
}

fn default_end_hour() -> u32 {
    17
}

fn default_days() -> Vec<String> {
    ["Mon", "Tue", "Wed", "Thu", "Fri"]
        .iter()
        .map(|day| day.to_string())
        .collect()
}

/// Operating window: `[start_hour, end_hour)` local time on `days`.
#[derive(Debug, Clone)]
pub struct WorkingHours {
    pub timezone: Tz,
    pub start_hour: u32,
    pub end_hour: u32,
    pub days: Vec<Weekday>,
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
        }
    }
}

impl TryFrom<WorkingHoursFile> for WorkingHours {
    type Error = PersonaError;

    fn try_from(file: WorkingHoursFile) -> Result<Self, Self::Error> {
        let timezone: Tz = file
            .timezone
            .parse()
            .map_err(|_| PersonaError::InvalidTimezone(file.timezone.clone()))?;
        if file.start_hour >= file.end_hour || file.end_hour > 24 {
            return Err(PersonaError::InvalidHours {
                start: file.start_hour,
                end: file.end_hour,
            });
        }
        let days = file
            .days
            .iter()
            .map(|day| {
                day.trim()
                    .parse::<Weekday>()
                    .map_err(|_| PersonaError::InvalidWeekday(day.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            timezone,
            start_hour: file.start_hour,
            end_hour: file.end_hour,
            days,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PersonaProfile {
    pub id: String,
    pub display_name: String,
    /// System instruction, read from `prompt_path`.
    pub prompt: String,
    /// Lowercased relevance keywords.
    pub keywords: Vec<String>,
    pub model: String,
    pub max_tokens: u32,
    pub priority_clause: String,
    pub max_turns: u32,
    pub cooldown: Duration,
    pub stagger_base: Duration,
    pub stagger_jitter: Duration,
    pub working_hours: WorkingHours,
}

impl PersonaProfile {
    /// Parse a persona TOML document. `prompt_path` resolves against `base_dir`.
    pub fn from_toml_str(content: &str, base_dir: &Path) -> Result<Self, PersonaError> {
        let file: PersonaFile = toml::from_str(content)?;
        let prompt_path = if file.prompt_path.is_absolute() {
            file.prompt_path.clone()
        } else {
            base_dir.join(&file.prompt_path)
        };
        let prompt = std::fs::read_to_string(&prompt_path).map_err(|source| PersonaError::Io {
            path: prompt_path.clone(),
            source,
        })?;
        let prompt = prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(PersonaError::EmptyPrompt(prompt_path));
        }

        Ok(Self {
            id: file.id,
            display_name: file.display_name,
            prompt,
            keywords: file
                .keywords
                .iter()
                .map(|keyword| keyword.trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
            model: file.model,
            max_tokens: file.max_tokens,
            priority_clause: file.priority_clause,
            max_turns: file.max_turns,
            cooldown: Duration::from_secs(file.cooldown_secs),
            stagger_base: Duration::from_millis(file.stagger_base_ms),
            stagger_jitter: Duration::from_millis(file.stagger_jitter_ms),
            working_hours: WorkingHours::try_from(file.working_hours)?,
        })
    }

    /// Short liveness line served from `/health`.
    pub fn liveness_message(&self) -> String {
        let first_name = self
            .display_name
            .split_whitespace()
            .next()
            .unwrap_or(self.id.as_str());
        format!("{} bot is running.", first_name)
    }
}

pub fn load_persona_profile(path: &Path) -> Result<PersonaProfile, PersonaError> {
    let content = std::fs::read_to_string(path).map_err(|source| PersonaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    PersonaProfile::from_toml_str(&content, base_dir)
}
