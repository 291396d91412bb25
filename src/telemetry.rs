//! Telemetry events

use tracing::info;

/// Sink of named telemetry events
pub trait Telemetry: Send + Sync {
    fn log_event(&self, name: &str, properties: &[(&str, String)]);
}

/// Emits telemetry events as tracing records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn log_event(&self, name: &str, properties: &[(&str, String)]) {
        info!(target: "payreq::telemetry", event = name, ?properties, "telemetry event");
    }
}

#[cfg(test)]
pub mod test {
    use std::sync::Mutex;

    use super::Telemetry;

    /// Telemetry which keeps the logged events for inspection
    #[derive(Debug, Default)]
    pub struct RecordingTelemetry {
        events: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl RecordingTelemetry {
        pub fn events(&self) -> Vec<(String, Vec<(String, String)>)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Telemetry for RecordingTelemetry {
        fn log_event(&self, name: &str, properties: &[(&str, String)]) {
            let properties = properties
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect();
            self.events
                .lock()
                .unwrap()
                .push((name.to_owned(), properties));
        }
    }
}
