//! Text-generation providers: trait, OpenAI client, disabled/mock clients, daily limit wrapper.
//!
//! Providers only talk to the remote service and parse its answer. Validation, retry and
//! fallback live in `generate::BriefGenerator`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{GeneratedContent, GenerationError, GenerationRequest, PromptFraming};
use crate::config::ai::AiConfig;

pub type GenerationResult = Result<GeneratedContent, GenerationError>;

/// Trait object used by the generator and the admin API.
pub trait TextGenerator: Send + Sync {
    fn generate<'a>(
        &'a self,
        req: &'a GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = GenerationResult> + Send + 'a>>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynTextGenerator = Arc<dyn TextGenerator>;

/// Factory: build a client according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns a deterministic mock client.
/// * Else if `config.enabled==false`, returns a disabled client (every item falls back).
/// * Else builds the real provider wrapped with the daily call limit.
pub fn build_generator(config: &AiConfig) -> DynTextGenerator {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockGenerator::echo());
    }

    if !config.enabled {
        return Arc::new(DisabledGenerator);
    }

    match config.provider.as_str() {
        "openai" => match OpenAiGenerator::new(config) {
            Ok(p) => Arc::new(DailyLimited::new(p, config.daily_limit)),
            Err(e) => {
                tracing::warn!(error = %e, "OpenAI client init failed, generation disabled");
                Arc::new(DisabledGenerator)
            }
        },
        other => {
            tracing::warn!(provider = other, "unsupported AI provider, generation disabled");
            Arc::new(DisabledGenerator)
        }
    }
}

// ------------------------------------------------------------
// Prompting
// ------------------------------------------------------------

const SYSTEM_STANDARD: &str = "You write a neutral, factual civic news brief. \
Return JSON {\"headline\": string, \"bullets\": [string]}. \
The headline has 8 to 12 words. Give 2 or 3 short factual bullets. \
No opinions, no first person, no emojis.";

const SYSTEM_STRICT: &str = "You are a wire-service editor. Output ONLY a JSON object \
{\"headline\": string, \"bullets\": [string, string]} and nothing else. \
Headline: EXACTLY 8 to 12 words, plain declarative sentence, no adjectives of judgement. \
Bullets: exactly 2 or 3 verifiable facts taken from the provided sources. \
Never use I, we, our, my, or any opinion or sensational wording.";

pub fn system_prompt(framing: PromptFraming) -> &'static str {
    match framing {
        PromptFraming::Standard => SYSTEM_STANDARD,
        PromptFraming::Strict => SYSTEM_STRICT,
    }
}

/// User message: topic, summary, raw snippets and the coverage note.
pub fn user_prompt(req: &GenerationRequest) -> String {
    let mut out = format!("Topic: {}\n", req.title);
    if !req.summary.is_empty() {
        out.push_str(&format!("Summary: {}\n", req.summary));
    }
    if !req.snippets.is_empty() {
        out.push_str("Source excerpts:\n");
        for s in req.snippets.iter().take(6) {
            out.push_str("- ");
            out.push_str(s);
            out.push('\n');
        }
    }
    if !req.coverage_note.is_empty() {
        out.push_str(&format!("Coverage context: {}\n", req.coverage_note));
    }
    out
}

// ------------------------------------------------------------
// OpenAI
// ------------------------------------------------------------

/// OpenAI Chat Completions in JSON mode.
pub struct OpenAiGenerator {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiGenerator {
    pub fn new(config: &AiConfig) -> anyhow::Result<Self> {
        let api_key = if config.api_key.is_empty() {
            std::env::var("OPENAI_API_KEY").unwrap_or_default()
        } else {
            config.api_key.clone()
        };
        let http = reqwest::Client::builder()
            .user_agent("daily-brief/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    async fn call(&self, req: &GenerationRequest) -> GenerationResult {
        if self.api_key.is_empty() {
            return Err(GenerationError::Provider("missing API key".to_string()));
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let user = user_prompt(req);
        let body = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system_prompt(req.framing),
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: self.temperature,
            max_tokens: 300,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout
                } else {
                    GenerationError::Provider(format!("request failed: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GenerationError::Provider(format!("HTTP {status}")));
        }
        let parsed: Resp = resp
            .json()
            .await
            .map_err(|e| GenerationError::Provider(format!("bad response body: {e}")))?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        parse_content(content)
    }
}

/// Parse the model's JSON answer. Tolerates a fenced code block around it.
pub fn parse_content(raw: &str) -> GenerationResult {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str::<GeneratedContent>(trimmed)
        .map_err(|e| GenerationError::Provider(format!("malformed generation JSON: {e}")))
}

impl TextGenerator for OpenAiGenerator {
    fn generate<'a>(
        &'a self,
        req: &'a GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = GenerationResult> + Send + 'a>> {
        Box::pin(self.call(req))
    }
    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Disabled / mock
// ------------------------------------------------------------

/// Always fails; every item ends up on the deterministic fallback.
pub struct DisabledGenerator;

impl TextGenerator for DisabledGenerator {
    fn generate<'a>(
        &'a self,
        _req: &'a GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = GenerationResult> + Send + 'a>> {
        Box::pin(async { Err(GenerationError::Provider("generation disabled".to_string())) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

#[derive(Debug, Clone)]
enum MockMode {
    /// Derive valid content from the request.
    Echo,
    /// Return these results in order; the last one repeats.
    Scripted(Vec<GenerationResult>),
    /// Never answer (exercises the timeout path).
    Hang,
}

/// Deterministic generator for tests, demos and `AI_TEST_MODE=mock`.
#[derive(Clone)]
pub struct MockGenerator {
    mode: MockMode,
    latency: Option<Duration>,
    calls: Arc<AtomicUsize>,
    framings: Arc<Mutex<Vec<PromptFraming>>>,
}

impl MockGenerator {
    fn with_mode(mode: MockMode) -> Self {
        Self {
            mode,
            latency: None,
            calls: Arc::new(AtomicUsize::new(0)),
            framings: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn echo() -> Self {
        Self::with_mode(MockMode::Echo)
    }

    pub fn scripted(results: Vec<GenerationResult>) -> Self {
        Self::with_mode(MockMode::Scripted(results))
    }

    pub fn always(result: GenerationResult) -> Self {
        Self::scripted(vec![result])
    }

    pub fn hanging() -> Self {
        Self::with_mode(MockMode::Hang)
    }

    /// Answer only after `latency`, like a slow provider.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Framings seen so far, in call order.
    pub fn framings(&self) -> Vec<PromptFraming> {
        self.framings.lock().map(|g| g.clone()).unwrap_or_default()
    }

    fn answer(&self, n: usize, req: &GenerationRequest) -> Option<GenerationResult> {
        match &self.mode {
            MockMode::Echo => Some(Ok(echo_content(req))),
            MockMode::Scripted(list) => list.get(n).or_else(|| list.last()).cloned(),
            MockMode::Hang => None,
        }
    }
}

fn echo_content(req: &GenerationRequest) -> GeneratedContent {
    let headline = format!("Key developments and context on {} for readers today", req.title)
        .split_whitespace()
        .take(12)
        .collect::<Vec<_>>()
        .join(" ");
    let mut bullets: Vec<String> = req.snippets.iter().take(2).cloned().collect();
    while bullets.len() < 2 {
        bullets.push(format!("Coverage of {} continues across outlets.", req.title));
    }
    GeneratedContent { headline, bullets }
}

impl TextGenerator for MockGenerator {
    fn generate<'a>(
        &'a self,
        req: &'a GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = GenerationResult> + Send + 'a>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut g) = self.framings.lock() {
            g.push(req.framing);
        }
        let answer = self.answer(n, req);
        let latency = self.latency;
        Box::pin(async move {
            if let Some(d) = latency {
                tokio::time::sleep(d).await;
            }
            match answer {
                Some(r) => r,
                None => std::future::pending().await,
            }
        })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Daily limit wrapper
// ------------------------------------------------------------

#[derive(Debug)]
struct DailyCounter {
    date: NaiveDate,
    count: u32,
}

/// Caps real provider calls per UTC day. Over the cap the call fails fast, which the
/// generator treats like any provider error (retry, then fallback).
pub struct DailyLimited<P: TextGenerator> {
    inner: P,
    limit: u32,
    counter: Mutex<DailyCounter>,
}

impl<P: TextGenerator> DailyLimited<P> {
    pub fn new(inner: P, limit: u32) -> Self {
        Self {
            inner,
            limit,
            counter: Mutex::new(DailyCounter {
                date: Utc::now().date_naive(),
                count: 0,
            }),
        }
    }

    fn take_slot(&self) -> bool {
        let today = Utc::now().date_naive();
        let Ok(mut g) = self.counter.lock() else {
            return false;
        };
        if g.date != today {
            g.date = today;
            g.count = 0;
        }
        if g.count >= self.limit {
            return false;
        }
        g.count += 1;
        true
    }
}

impl<P: TextGenerator> TextGenerator for DailyLimited<P> {
    fn generate<'a>(
        &'a self,
        req: &'a GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = GenerationResult> + Send + 'a>> {
        if !self.take_slot() {
            return Box::pin(async {
                Err(GenerationError::Provider("daily generation limit reached".to_string()))
            });
        }
        self.inner.generate(req)
    }
    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}
