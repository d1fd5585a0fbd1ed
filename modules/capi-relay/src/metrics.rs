use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Counters
    pub capi_events_total: IntCounterVec,
    pub capi_upstream_requests_total: IntCounterVec,

    // Histograms
    pub capi_upstream_request_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let capi_events_total = IntCounterVec::new(
            Opts::new("capi_events_total", "Inbound events by final result"),
            &["result"], // forwarded|invalid|rejected|error
        )?;

        let capi_upstream_requests_total = IntCounterVec::new(
            Opts::new("capi_upstream_requests_total", "Upstream attempts"),
            &["mode", "outcome"], // sandbox|production, acked|<error category>
        )?;

        let capi_upstream_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "capi_upstream_request_duration_seconds",
                "Upstream request duration seconds",
            ),
            &["mode"],
        )?;

        registry.register(Box::new(capi_events_total.clone()))?;
        registry.register(Box::new(capi_upstream_requests_total.clone()))?;
        registry.register(Box::new(capi_upstream_request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            capi_events_total,
            capi_upstream_requests_total,
            capi_upstream_request_duration_seconds,
        })
    }

    pub fn record_event(&self, result: &str) {
        self.capi_events_total.with_label_values(&[result]).inc();
    }

    pub fn observe_upstream(&self, mode: &str, outcome: &str, elapsed: Duration) {
        self.capi_upstream_requests_total
            .with_label_values(&[mode, outcome])
            .inc();
        self.capi_upstream_request_duration_seconds
            .with_label_values(&[mode])
            .observe(elapsed.as_secs_f64());
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&mf, &mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}
