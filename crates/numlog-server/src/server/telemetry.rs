//! # Telemetry
//!
//! Console logging through `tracing_subscriber` is always on. OpenTelemetry
//! export of spans and metrics is opt-in through cargo features.
//!
//! ## Feature matrix
//!
//! - `otel-tracing`: Exports spans through OpenTelemetry.
//! - `metrics`: Exports ingestion counters through OpenTelemetry.
//! - `stdout`: Uses the stdout exporter for whichever of the above is enabled.
//!
//! ## Log filtering
//!
//! The console filter is read from `RUST_LOG` and defaults to `info`, which
//! shows startup, shutdown and the periodic statistics reports. Use
//! `RUST_LOG=debug` to see per-connection lifecycle events.
//!
//! ## Metrics
//!
//! | Name                   | Kind          | Meaning                              |
//! |------------------------|---------------|--------------------------------------|
//! | `records_unique`       | counter       | Records seen for the first time      |
//! | `records_duplicate`    | counter       | Records seen before                  |
//! | `records_malformed`    | counter       | Lines that were neither record nor terminate |
//! | `connections_accepted` | counter       | Connections admitted under the cap   |
//! | `connections_rejected` | counter       | Connections closed for being over the cap |
//! | `connections_active`   | up/down       | Connections currently serviced       |
//! | `write_errors`         | counter       | Failed record log writes or flushes  |
//!
//! The `increment_*`/`decrement_*` helpers compile to no-ops without the
//! `metrics` feature.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --features otel-tracing,metrics,stdout
//! ```

// Disallow using `stdout` without `otel-tracing` or `metrics`
#[cfg(all(
    feature = "stdout",
    not(any(feature = "otel-tracing", feature = "metrics"))
))]
compile_error!(
    "The 'stdout' feature requires at least one of 'otel-tracing' or 'metrics' to be enabled."
);

// Core imports - always needed
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// Metrics-specific imports
#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

// Either
#[cfg(any(feature = "metrics", feature = "otel-tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "otel-tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "otel-tracing"))]
use opentelemetry_semantic_conventions as semvcns;

// Tracing-specific imports
#[cfg(feature = "otel-tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel-tracing")]
use opentelemetry_sdk::trace as sdktrace;

/// Exporter providers that must be flushed before the process exits.
pub struct TelemetryProviders {
    #[cfg(feature = "otel-tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every enabled provider. Failures are printed to
    /// stderr since the subscriber may already be unusable.
    pub fn shutdown(self) {
        #[cfg(feature = "otel-tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel-tracing")]
    let tracer_provider = init_tracer();

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics();

    #[cfg(any(feature = "metrics", feature = "otel-tracing"))]
    let scope = InstrumentationScope::builder("numlog")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339()),
        );

    #[cfg(feature = "otel-tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(&meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "otel-tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "otel-tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("numlog")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(10))
            .build();

        builder.with_reader(reader)
    };

    builder.build()
}

#[cfg(feature = "otel-tracing")]
fn init_tracer() -> sdktrace::SdkTracerProvider {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let batch = sdktrace::BatchSpanProcessor::builder(SpanExporter::default())
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    builder.build()
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static RECORDS_UNIQUE: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RECORDS_DUPLICATE: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RECORDS_MALFORMED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CONNECTIONS_ACCEPTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CONNECTIONS_REJECTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CONNECTIONS_ACTIVE: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static WRITE_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: &Meter) {
    let _ = RECORDS_UNIQUE.set(
        meter
            .u64_counter("records_unique")
            .with_description("Records seen for the first time")
            .build(),
    );

    let _ = RECORDS_DUPLICATE.set(
        meter
            .u64_counter("records_duplicate")
            .with_description("Records seen before")
            .build(),
    );

    let _ = RECORDS_MALFORMED.set(
        meter
            .u64_counter("records_malformed")
            .with_description("Discarded lines")
            .build(),
    );

    let _ = CONNECTIONS_ACCEPTED.set(
        meter
            .u64_counter("connections_accepted")
            .with_description("Connections admitted under the cap")
            .build(),
    );

    let _ = CONNECTIONS_REJECTED.set(
        meter
            .u64_counter("connections_rejected")
            .with_description("Connections closed for being over the cap")
            .build(),
    );

    let _ = CONNECTIONS_ACTIVE.set(
        meter
            .i64_up_down_counter("connections_active")
            .with_description("Connections currently serviced")
            .build(),
    );

    let _ = WRITE_ERRORS.set(
        meter
            .u64_counter("write_errors")
            .with_description("Failed record log writes or flushes")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_records_unique() {
    if let Some(counter) = RECORDS_UNIQUE.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_records_unique() {}

#[cfg(feature = "metrics")]
pub fn increment_records_duplicate() {
    if let Some(counter) = RECORDS_DUPLICATE.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_records_duplicate() {}

#[cfg(feature = "metrics")]
pub fn increment_records_malformed() {
    if let Some(counter) = RECORDS_MALFORMED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_records_malformed() {}

#[cfg(feature = "metrics")]
pub fn increment_connections_accepted() {
    if let Some(counter) = CONNECTIONS_ACCEPTED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_connections_accepted() {}

#[cfg(feature = "metrics")]
pub fn increment_connections_rejected() {
    if let Some(counter) = CONNECTIONS_REJECTED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_connections_rejected() {}

#[cfg(feature = "metrics")]
pub fn increment_connections_active() {
    if let Some(counter) = CONNECTIONS_ACTIVE.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_connections_active() {}

#[cfg(feature = "metrics")]
pub fn decrement_connections_active() {
    if let Some(counter) = CONNECTIONS_ACTIVE.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_connections_active() {}

#[cfg(feature = "metrics")]
pub fn increment_write_errors() {
    if let Some(counter) = WRITE_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_write_errors() {}
