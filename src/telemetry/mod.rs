//! # Módulo de Telemetria
//!
//! Inicializa o logging estruturado (tracing) e, quando configurado, a
//! exportação de traces via OTLP. Cada step executado vira um span de
//! cliente HTTP com método, URL, status e duração.
//!
//! O subscriber global é montado em uma cadeia só: filtro de nível,
//! layer OTLP opcional e layer de console opcional. Camadas ausentes
//! entram como `None`, que o tracing-subscriber trata como layer nula.
//!
//! ## Configuração via variáveis de ambiente:
//!
//! - `OTEL_SERVICE_NAME`: nome do serviço nos traces
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: endpoint gRPC do coletor
//! - `OTEL_TRACES_SAMPLER_ARG`: taxa de sampling (0.0 a 1.0)
//! - `RUST_LOG`: filtro de nível por módulo, como de costume
//!
//! `shutdown_telemetry` precisa rodar antes do processo encerrar, senão
//! os spans em lote ainda não exportados são perdidos.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing::Level;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVICE_NAME: &str = "conductor";

/// Configuração da telemetria do motor.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// Endpoint OTLP (gRPC). `None` desliga a exportação.
    pub otlp_endpoint: Option<String>,
    /// Fração de traces coletados, de 0.0 a 1.0.
    pub sampling_ratio: f64,
    pub enable_console_logging: bool,
    pub log_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
        }
    }
}

impl TelemetryConfig {
    /// Carrega a configuração das variáveis de ambiente padrão OTEL.
    pub fn from_env() -> Self {
        Self {
            service_name: env_string("OTEL_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            otlp_endpoint: env_string("OTEL_EXPORTER_OTLP_ENDPOINT"),
            sampling_ratio: env_string("OTEL_TRACES_SAMPLER_ARG")
                .and_then(|raw| raw.parse::<f64>().ok())
                .map_or(1.0, |ratio| ratio.clamp(0.0, 1.0)),
            ..Self::default()
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Sobe o subscriber global a partir da configuração.
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<()> {
    let otlp_layer = match &config.otlp_endpoint {
        Some(endpoint) => Some(OpenTelemetryLayer::new(build_tracer(&config, endpoint)?)),
        None => None,
    };
    let console_layer = config
        .enable_console_logging
        .then(|| tracing_subscriber::fmt::layer().compact());

    tracing_subscriber::registry()
        .with(level_filter(&config))
        .with(otlp_layer)
        .with(console_layer)
        .init();

    if let Some(endpoint) = &config.otlp_endpoint {
        tracing::info!(
            service_name = %config.service_name,
            endpoint = %endpoint,
            sampling_ratio = config.sampling_ratio,
            "Telemetry initialized with OTLP export"
        );
    }
    Ok(())
}

/// `RUST_LOG` manda; sem ela, vale o nível da configuração.
fn level_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()))
}

/// Traduz a taxa de sampling em um sampler OTEL.
fn sampler_for(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

/// Monta o tracer OTLP e registra o provider globalmente.
///
/// O exporter é gRPC em lote; o resource leva o nome do serviço para os
/// traces saírem identificados no coletor.
fn build_tracer(config: &TelemetryConfig, endpoint: &str) -> anyhow::Result<Tracer> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()?;

    let trace_config = sdktrace::Config::default()
        .with_sampler(sampler_for(config.sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]));

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(trace_config)
        .build();

    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider);
    Ok(tracer)
}

/// Flush e encerramento do provider global.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
