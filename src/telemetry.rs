use std::time::Duration;

/// Timing callback, reported once per sanitization pass.
pub trait Telemetry {
    fn record(&self, name: &str, duration: Duration, description: &str);
}

/// Discards every measurement.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record(&self, _name: &str, _duration: Duration, _description: &str) {}
}

/// Forwards measurements to the `log` facade at debug level.
#[derive(Debug, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn record(&self, name: &str, duration: Duration, description: &str) {
        log::debug!("{name}: {:.4}s ({description})", duration.as_secs_f64());
    }
}
