use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Failed to build prometheus exporter: {0}")]
    Exporter(String),
}

pub struct Metrics {
    request_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    frames_scored: Counter<u64>,
    alerts_sent: Counter<u64>,
    alert_failures: Counter<u64>,
    // Held so the readers stay alive when the global provider is replaced.
    _provider: SdkMeterProvider,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| MetricsError::Exporter(e.to_string()))?;

        let provider = SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("incident_watch");
        global::set_meter_provider(provider.clone());

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of prediction requests")
            .build();

        // Video requests score every frame, so the tail reaches into minutes.
        let boundaries = generate_boundaries((10, 100, 200, 1000, 60_000));

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of prediction requests in milliseconds")
            .build();

        let frames_scored = meter
            .u64_counter("frames_scored_total")
            .with_description("Frames passed through the label scorer")
            .build();

        let alerts_sent = meter
            .u64_counter("alerts_sent_total")
            .with_description("Notifier messages delivered")
            .build();

        let alert_failures = meter
            .u64_counter("alert_failures_total")
            .with_description("Notifier messages that failed to deliver")
            .build();

        Ok(Metrics {
            request_counter,
            prediction_duration,
            frames_scored,
            alerts_sent,
            alert_failures,
            _provider: provider,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.prediction_duration.record(duration_ms, &attributes);
    }

    pub fn record_frames_scored(&self, frames: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.frames_scored.add(frames, &attributes);
    }

    pub fn record_alert_sent(&self, kind: &str) {
        let attributes = vec![KeyValue::new("kind", kind.to_string())];
        self.alerts_sent.add(1, &attributes);
    }

    pub fn record_alert_failure(&self, kind: &str) {
        let attributes = vec![KeyValue::new("kind", kind.to_string())];
        self.alert_failures.add(1, &attributes);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 20;
    let end_step: usize = 100;
    let tail_step: usize = 5000;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
