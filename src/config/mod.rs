// src/config/mod.rs
//! Pipeline configuration loaded from `config/brief.toml`.
//!
//! Lookup order:
//! 1) `$BRIEF_CONFIG_PATH` (must exist)
//! 2) `config/brief.toml`
//! 3) built-in defaults
//!
//! Every field has a default, so a partial file only overrides what it names. The one
//! exception is `dispatch.unsubscribe_secret`: it must be set, either in the file or, when
//! the file says `"ENV"` or leaves it out, through `$BRIEF_UNSUBSCRIBE_SECRET`.

pub mod ai;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer};

pub const DEFAULT_BRIEF_CONFIG_PATH: &str = "config/brief.toml";
pub const ENV_BRIEF_CONFIG_PATH: &str = "BRIEF_CONFIG_PATH";
pub const ENV_UNSUBSCRIBE_SECRET: &str = "BRIEF_UNSUBSCRIBE_SECRET";

/// Sample value shipped in docs; never accepted as a real secret.
const PLACEHOLDER_SECRET: &str = "change-me";

/// Local hours a subscriber may pick for delivery.
pub const ALLOWED_SEND_HOURS: [u32; 3] = [6, 8, 18];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BriefConfig {
    pub schedule: ScheduleConfig,
    pub selection: SelectionConfig,
    pub generation: GenerationConfig,
    pub dispatch: DispatchConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Timezone the trigger times and the brief date are evaluated in.
    pub timezone: Tz,
    #[serde(deserialize_with = "de_hhmm")]
    pub generate_at: NaiveTime,
    #[serde(deserialize_with = "de_hhmm")]
    pub auto_publish_at: NaiveTime,
    pub tick_secs: u64,
    /// A `Running` job older than this is considered crashed and may be re-acquired.
    pub stale_lock_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            generate_at: NaiveTime::from_hms_opt(5, 0, 0).unwrap_or_default(),
            auto_publish_at: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
            tick_secs: 60,
            stale_lock_secs: 30 * 60,
        }
    }
}

impl ScheduleConfig {
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_lock_secs as i64)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SelectionWeights {
    pub civic: f64,
    pub quality: f64,
    pub sources: f64,
    pub balance: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            civic: 0.4,
            quality: 0.3,
            sources: 0.2,
            balance: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub min_topics: usize,
    pub max_topics: usize,
    pub exclusion_days: i64,
    pub weights: SelectionWeights,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_topics: 3,
            max_topics: 5,
            exclusion_days: 30,
            weights: SelectionWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub timeout_secs: u64,
    pub max_links: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            max_links: 5,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub rate_per_sec: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub send_timeout_secs: u64,
    pub from: String,
    pub base_url: String,
    /// Keys the unsubscribe link tokens. `"ENV"` reads `$BRIEF_UNSUBSCRIBE_SECRET`.
    pub unsubscribe_secret: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 14,
            max_attempts: 3,
            backoff_base_ms: 500,
            send_timeout_secs: 10,
            from: "Daily Brief <brief@societyspeaks.io>".to_string(),
            base_url: "https://societyspeaks.io".to_string(),
            unsubscribe_secret: String::new(),
        }
    }
}

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Backoff before attempt `next_attempt` (2-based): base * 2^(n-2).
    pub fn backoff_before(&self, next_attempt: u32) -> Duration {
        let shift = next_attempt.saturating_sub(2).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << shift))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// When set, admin routes require a matching `x-admin-token` header.
    pub token: Option<String>,
}

impl BriefConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: BriefConfig = toml::from_str(s).context("parsing brief config")?;
        cfg.resolve_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fill env-backed settings (`"ENV"` or empty) from the process environment.
    pub fn resolve_env(&mut self) {
        let secret = &mut self.dispatch.unsubscribe_secret;
        if secret.is_empty() || secret == "ENV" {
            *secret = std::env::var(ENV_UNSUBSCRIBE_SECRET).unwrap_or_default();
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading brief config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks (see module docs).
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_BRIEF_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("BRIEF_CONFIG_PATH points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let default = PathBuf::from(DEFAULT_BRIEF_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        let mut cfg = Self::default();
        cfg.resolve_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let sel = &self.selection;
        if sel.min_topics == 0 || sel.min_topics > sel.max_topics {
            bail!(
                "selection bounds invalid: min_topics={} max_topics={}",
                sel.min_topics,
                sel.max_topics
            );
        }
        if sel.exclusion_days < 0 {
            bail!("selection.exclusion_days must be >= 0");
        }
        let w = sel.weights;
        if [w.civic, w.quality, w.sources, w.balance]
            .iter()
            .any(|x| !x.is_finite() || *x < 0.0)
        {
            bail!("selection weights must be finite and non-negative");
        }
        if self.dispatch.rate_per_sec == 0 {
            bail!("dispatch.rate_per_sec must be > 0");
        }
        if self.dispatch.max_attempts == 0 {
            bail!("dispatch.max_attempts must be > 0");
        }
        if self.schedule.tick_secs == 0 {
            bail!("schedule.tick_secs must be > 0");
        }
        if self.schedule.auto_publish_at <= self.schedule.generate_at {
            bail!("schedule.auto_publish_at must be later than schedule.generate_at");
        }
        let secret = self.dispatch.unsubscribe_secret.trim();
        if secret.is_empty() || secret == "ENV" {
            bail!("dispatch.unsubscribe_secret is not set (or set {ENV_UNSUBSCRIBE_SECRET})");
        }
        if secret == PLACEHOLDER_SECRET {
            bail!("dispatch.unsubscribe_secret still holds the sample value");
        }
        Ok(())
    }
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let t = s.trim();
    NaiveTime::parse_from_str(t, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M:%S"))
        .ok()
}

fn de_hhmm<'de, D>(d: D) -> std::result::Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(d)?;
    parse_hhmm(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {s}")))
}
