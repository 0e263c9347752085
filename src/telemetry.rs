use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    invocation_counter: Counter<u64>,
    fetch_duration: Histogram<u64>,
    inference_duration: Histogram<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("yolo_oaas_handler");
        global::set_meter_provider(provider);

        let invocation_counter = meter
            .u64_counter("invocations_total")
            .with_description("Total number of task invocations")
            .build();

        let fetch_duration = meter
            .u64_histogram("artifact_fetch_duration_ms")
            .with_boundaries(generate_boundaries(
                (10, 100, 500, 2000, 10000),
                (10, 50, 250, 1000),
            ))
            .with_description("Duration of artifact downloads in milliseconds")
            .build();

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(generate_boundaries(
                (15, 30, 60, 500, 1000),
                (10, 2, 20, 100),
            ))
            .with_description("Duration of detection and normalisation in milliseconds")
            .build();

        Ok(Metrics {
            invocation_counter,
            fetch_duration,
            inference_duration,
            registry,
        })
    }

    pub fn record_invocation(&self, outcome: &str) {
        let attributes = vec![KeyValue::new("outcome", outcome.to_string())];
        self.invocation_counter.add(1, &attributes);
    }

    pub fn record_fetch_duration(&self, duration_ms: u64) {
        self.fetch_duration.record(duration_ms, &[]);
    }

    pub fn record_inference_duration(&self, duration_ms: u64, backend: &str) {
        let attributes = vec![KeyValue::new("backend", backend.to_string())];
        self.inference_duration.record(duration_ms, &attributes);
    }
}

/// Histogram boundaries stepping through four ranges at four resolutions.
fn generate_boundaries(
    parts: (i32, i32, i32, i32, i32),
    steps: (usize, usize, usize, usize),
) -> Vec<f64> {
    let first_part = (parts.0..=parts.1).step_by(steps.0);
    let middle_part = (parts.1..=parts.2).step_by(steps.1);
    let end_part = (parts.2..=parts.3).step_by(steps.2);
    let tail_part = (parts.3..=parts.4).step_by(steps.3);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundaries() {
        let get = generate_boundaries((2, 22, 26, 46, 146), (10, 2, 20, 100));
        let expected = vec![2.0, 12.0, 22.0, 24.0, 26.0, 46.0, 146.0];

        assert_eq!(get, expected);
    }
}
