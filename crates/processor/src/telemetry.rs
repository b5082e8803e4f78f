//! Tracing setup and metric names.
//!
//! The library only records through the `metrics` facade; installing an
//! exporter is up to the host.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

use crate::config::{LogFormat, ProcessorConfig};

/// Counter of dispatched messages, by message type.
pub const MESSAGES_DISPATCHED: &str = "processor_messages_dispatched_total";
/// Counter of failed dispatches, by message type and error kind.
pub const DISPATCH_FAILURES: &str = "processor_dispatch_failures_total";
/// Histogram of dispatch duration in seconds.
pub const DISPATCH_DURATION: &str = "processor_dispatch_duration_seconds";
/// Histogram of cascade rounds per committed scope.
pub const CASCADE_ROUNDS: &str = "processor_cascade_rounds";
/// Counter of aggregates written, by aggregate type.
pub const AGGREGATES_FLUSHED: &str = "processor_aggregates_flushed_total";
/// Counter of events stored, by event type.
pub const EVENTS_PUBLISHED: &str = "processor_events_published_total";
/// Counter of snapshot writes that failed after an append.
pub const SNAPSHOT_FAILURES: &str = "processor_snapshot_failures_total";

/// Installs the global tracing subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_tracing(config: &ProcessorConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_reported() {
        let config = ProcessorConfig::default();
        let _ = init_tracing(&config);

        assert!(init_tracing(&config).is_err());
    }
}
