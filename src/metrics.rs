use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process and describe the pipeline series.
    /// Later calls reuse the first handle.
    pub fn init() -> anyhow::Result<Self> {
        let handle = HANDLE.get_or_try_init(|| {
            let handle = PrometheusBuilder::new().install_recorder()?;
            describe_all();
            Ok::<_, anyhow::Error>(handle)
        })?;
        Ok(Self {
            handle: handle.clone(),
        })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe_all() {
    describe_counter!("brief_generated_total", "Briefs that reached ready.");
    describe_counter!("brief_skipped_total", "Briefs moved to skipped.");
    describe_counter!(
        "brief_published_total",
        "Briefs published, labelled by path (manual|auto)."
    );
    describe_counter!(
        "generation_retry_total",
        "Items whose first generation attempt was rejected."
    );
    describe_counter!(
        "generation_fallback_total",
        "Items built from source excerpts after two failed attempts."
    );
    describe_counter!("email_sent_total", "Brief emails accepted by the provider.");
    describe_counter!(
        "email_failed_total",
        "Brief emails given up on, labelled by kind (permanent|exhausted)."
    );
    describe_counter!("email_retry_total", "Send retries after a transient failure.");
    describe_gauge!(
        "selection_eligible_candidates",
        "Candidates left after the exclusion window at the last selection."
    );
}
