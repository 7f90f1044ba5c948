// tests/common/mod.rs
// Fixtures shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;

use daily_brief::config::BriefConfig;
use daily_brief::dispatch::{DeliveryResult, Dispatcher, EmailTransport, OutgoingEmail};
use daily_brief::generate::{BriefGenerator, MockGenerator};
use daily_brief::model::{SourceArticle, Subscriber, SubscriberStatus, Tier, TopicCandidate};
use daily_brief::sources::SourceRegistry;
use daily_brief::store::{DynStore, LocalStore};
use daily_brief::Scheduler;

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 10).unwrap()
}

pub fn at(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(hour, minute, 0).unwrap())
}

const OUTLETS: [&str; 6] = [
    "reuters.com",
    "nytimes.com",
    "foxnews.com",
    "npr.org",
    "wsj.com",
    "apnews.com",
];

/// Candidate with `n_sources` articles from well-known outlets.
pub fn topic(
    id: u64,
    category: &str,
    geography: &str,
    civic: f64,
    n_sources: usize,
) -> TopicCandidate {
    TopicCandidate {
        id,
        title: format!("Topic number {id} in {category}"),
        summary: format!("Summary for topic {id}."),
        civic_score: civic,
        quality_score: 0.5,
        source_count: n_sources as u32,
        category: category.to_string(),
        geography: geography.to_string(),
        first_seen_at: at(day(), 0, 0) - Duration::hours(3),
        articles: OUTLETS
            .iter()
            .take(n_sources)
            .map(|d| SourceArticle {
                source_domain: d.to_string(),
                url: format!("https://{d}/news/{id}"),
                snippet: format!("Outlet {d} reports on topic {id}."),
            })
            .collect(),
    }
}

pub fn pool(n: u64) -> Vec<TopicCandidate> {
    let cats = ["Politics", "Environment", "Economy", "Health"];
    (1..=n)
        .map(|id| topic(id, cats[(id as usize) % cats.len()], "US", 0.5 + (id as f64) / 100.0, 3))
        .collect()
}

pub fn subscriber(id: u64, tz: &str, send_hour: u32) -> Subscriber {
    Subscriber {
        id,
        email: format!("reader{id}@example.com"),
        tier: Tier::Individual,
        timezone: tz.to_string(),
        send_hour,
        status: SubscriberStatus::Active,
        last_sent_at: None,
        last_sent_brief: None,
    }
}

/// Records every send; per-address scripted verdicts, `Accepted` otherwise.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
    script: Mutex<HashMap<String, VecDeque<DeliveryResult>>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, to: &str, results: Vec<DeliveryResult>) {
        self.script.lock().insert(to.to_string(), results.into());
    }

    pub fn attempts_to(&self, to: &str) -> usize {
        self.sent.lock().iter().filter(|e| e.to == to).count()
    }

    pub fn total(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn last(&self) -> Option<OutgoingEmail> {
        self.sent.lock().last().cloned()
    }
}

#[async_trait::async_trait]
impl EmailTransport for RecordingTransport {
    async fn send(&self, email: &OutgoingEmail) -> DeliveryResult {
        self.sent.lock().push(email.clone());
        self.script
            .lock()
            .get_mut(&email.to)
            .and_then(|q| q.pop_front())
            .unwrap_or(DeliveryResult::Accepted)
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub struct Harness {
    pub local: Arc<LocalStore>,
    pub store: DynStore,
    pub transport: Arc<RecordingTransport>,
    pub scheduler: Arc<Scheduler>,
}

pub fn harness(cfg: BriefConfig, generator: MockGenerator) -> Harness {
    let local = Arc::new(LocalStore::in_memory());
    let store: DynStore = local.clone();
    let transport = RecordingTransport::new();
    let dispatcher = Dispatcher::new(store.clone(), transport.clone(), cfg.dispatch.clone());
    let generator = BriefGenerator::new(Arc::new(generator), &cfg.generation);
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        SourceRegistry::default_seed(),
        generator,
        dispatcher,
        cfg,
    ));
    Harness {
        local,
        store,
        transport,
        scheduler,
    }
}
