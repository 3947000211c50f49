//! Tracing and log output for the operator.
//!
//! Logs always go to stderr. Spans are additionally exported over OTLP when an
//! exporter endpoint is configured through the standard `OTEL_*` variables.

use std::io::IsTerminal;

use anyhow::Result;
use clap::ValueEnum;
use kube::Resource as _;
use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::{Level, Subscriber};
use tracing_subscriber::{
	layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::{crd::CertManager, k8s::apply::FIELD_MANAGER};

const SERVICE_NAME: &str = "certmanager-operator";

/// Environment variable for service name (not exported by opentelemetry_sdk).
const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

/// Shape of the log lines written to stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
	/// Pretty on a terminal, JSON otherwise (the usual case inside a pod)
	#[default]
	Auto,
	Json,
	Pretty,
}

impl LogFormat {
	fn is_json(self, stderr_is_terminal: bool) -> bool {
		match self {
			Self::Auto => !stderr_is_terminal,
			Self::Json => true,
			Self::Pretty => false,
		}
	}
}

/// Flushes exported spans when dropped; keep it alive for the whole process.
pub struct TelemetryGuard {
	tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		if let Some(provider) = self.tracer_provider.take() {
			if let Err(e) = provider.shutdown() {
				eprintln!("Failed to shutdown tracer provider: {e}");
			}
		}
	}
}

/// Install the global subscriber.
///
/// The filter is `log_level` when given, else `RUST_LOG`, else `info`.
pub fn init(log_level: Option<Level>, log_format: LogFormat) -> Result<TelemetryGuard> {
	let filter = match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	};
	let json = log_format.is_json(std::io::stderr().is_terminal());

	let registry = tracing_subscriber::registry()
		.with(filter)
		.with(fmt_layer(json));

	if !otel_export_enabled() {
		registry.init();
		return Ok(TelemetryGuard {
			tracer_provider: None,
		});
	}

	let tracer_provider = tracer_provider()?;
	let otel_layer = tracing_opentelemetry::layer()
		.with_error_records_to_exceptions(true)
		.with_tracer(tracer_provider.tracer(SERVICE_NAME));
	opentelemetry::global::set_tracer_provider(tracer_provider.clone());
	registry.with(otel_layer).init();

	Ok(TelemetryGuard {
		tracer_provider: Some(tracer_provider),
	})
}

fn fmt_layer<S>(json: bool) -> Box<dyn Layer<S> + Send + Sync>
where
	S: Subscriber + for<'span> LookupSpan<'span>,
{
	let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
	if json {
		layer.json().boxed()
	} else {
		layer.pretty().boxed()
	}
}

fn otel_export_enabled() -> bool {
	std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_ENDPOINT).is_ok()
		|| std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_TRACES_ENDPOINT).is_ok()
}

/// Resource describing this operator on exported spans.
///
/// `OTEL_SERVICE_NAME` and `OTEL_RESOURCE_ATTRIBUTES` are honoured by the builder;
/// the service name falls back to the binary name.
fn resource() -> Resource {
	let mut builder = Resource::builder().with_attributes([
		KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
		KeyValue::new("k8s.operator.field_manager", FIELD_MANAGER),
		KeyValue::new(
			"k8s.operator.resource",
			format!(
				"{}.{}",
				CertManager::plural(&()),
				CertManager::group(&())
			),
		),
	]);
	if std::env::var(OTEL_SERVICE_NAME).is_err() {
		builder = builder.with_service_name(SERVICE_NAME);
	}
	builder.build()
}

fn tracer_provider() -> Result<SdkTracerProvider> {
	let exporter = match std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL)
		.as_deref()
		.unwrap_or(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT)
	{
		"grpc" => opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.build()?,
		_ => opentelemetry_otlp::SpanExporter::builder()
			.with_http()
			.build()?,
	};

	Ok(SdkTracerProvider::builder()
		.with_resource(resource())
		.with_batch_exporter(exporter)
		.build())
}

#[cfg(test)]
mod tests {
	use opentelemetry::Key;
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case(LogFormat::Auto, true, false)]
	#[case(LogFormat::Auto, false, true)]
	#[case(LogFormat::Json, true, true)]
	#[case(LogFormat::Pretty, false, false)]
	fn test_log_format(#[case] format: LogFormat, #[case] terminal: bool, #[case] json: bool) {
		assert_eq!(format.is_json(terminal), json);
	}

	#[test]
	fn test_resource_attributes() {
		let resource = resource();
		let attribute = |key: &'static str| {
			resource
				.get(&Key::from_static_str(key))
				.map(|v| v.to_string())
		};
		assert_eq!(
			attribute("k8s.operator.field_manager").as_deref(),
			Some("certmanager-controller")
		);
		assert_eq!(
			attribute("k8s.operator.resource").as_deref(),
			Some("certmanagers.addons.x-force.netapp.io")
		);
		assert_eq!(
			attribute("service.version").as_deref(),
			Some(env!("CARGO_PKG_VERSION"))
		);
	}
}
