use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    fabricated_predictions: Counter<u64>,
    _provider: SdkMeterProvider,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        let meter = provider.meter("lymphoma_web");
        global::set_meter_provider(provider.clone());

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of classification requests")
            .build();

        let boundaries = generate_boundaries((50, 250, 400, 1000, 5000));

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of classification in milliseconds")
            .build();

        let fabricated_predictions = meter
            .u64_counter("fabricated_predictions_total")
            .with_description("Predictions answered by the fallback or dummy model")
            .build();

        Ok(Metrics {
            request_counter,
            prediction_duration,
            fabricated_predictions,
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

    pub fn record_fabricated_prediction(&self, source: &str, route: &str) {
        let attributes = vec![
            KeyValue::new("route", route.to_string()),
            KeyValue::new("source", source.to_string()),
        ];
        self.fabricated_predictions.add(1, &attributes);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 50;
    let middle_step: usize = 25;
    let end_step: usize = 100;
    let tail_step: usize = 1000;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundaries() {
        let parts = (0, 100, 150, 350, 2350);
        let get = generate_boundaries(parts);
        let expected = vec![
            0.0, 50.0, 100.0, 125.0, 150.0, 250.0, 350.0, 1350.0, 2350.0,
        ];

        assert_eq!(get, expected);
    }
}
