// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod coverage;
pub mod dispatch;
pub mod error;
pub mod generate;
pub mod lifecycle;
pub mod metrics;
pub mod model;
pub mod scheduler;
pub mod selector;
pub mod sources;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::error::{BriefError, Result};
pub use crate::scheduler::Scheduler;

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ai::{AiConfig, DEFAULT_AI_CONFIG_PATH};
use crate::config::BriefConfig;
use crate::dispatch::{Dispatcher, DynTransport, LogTransport, SmtpTransport};
use crate::generate::{build_generator, BriefGenerator};
use crate::sources::SourceRegistry;
use crate::store::{DynStore, LocalStore};

pub const DEFAULT_SOURCES_PATH: &str = "config/sources.json";
pub const DEFAULT_STATE_PATH: &str = "state/brief.json";
pub const ENV_STATE_PATH: &str = "BRIEF_STATE_PATH";

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter;
/// `LOG_FORMAT=json` switches to JSON lines. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("daily_brief=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// SMTP when `SMTP_HOST` is set, otherwise log-only delivery.
pub fn transport_from_env(default_from: &str) -> DynTransport {
    if std::env::var("SMTP_HOST").is_err() {
        tracing::warn!("SMTP_HOST not set, emails will only be logged");
        return Arc::new(LogTransport::default());
    }
    match SmtpTransport::from_env(default_from) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            tracing::warn!(error = %e, "SMTP transport init failed, emails will only be logged");
            Arc::new(LogTransport::default())
        }
    }
}

/// Wire the full service from files and environment.
pub fn build_scheduler_from_env() -> anyhow::Result<Arc<Scheduler>> {
    let cfg = BriefConfig::load_default()?;
    let ai = AiConfig::load_or_disabled(DEFAULT_AI_CONFIG_PATH);
    let registry = SourceRegistry::load_from_file(DEFAULT_SOURCES_PATH);

    let state_path =
        std::env::var(ENV_STATE_PATH).unwrap_or_else(|_| DEFAULT_STATE_PATH.to_string());
    let store: DynStore = Arc::new(LocalStore::open(&state_path)?);

    let transport = transport_from_env(&cfg.dispatch.from);
    tracing::info!(
        state = %state_path,
        sources = registry.len(),
        provider = ai.provider.as_str(),
        ai_enabled = ai.enabled,
        transport = transport.name(),
        "daily brief configured"
    );

    let generator = BriefGenerator::new(build_generator(&ai), &cfg.generation);
    let dispatcher = Dispatcher::new(store.clone(), transport, cfg.dispatch.clone());
    Ok(Arc::new(Scheduler::new(
        store, registry, generator, dispatcher, cfg,
    )))
}
