//! # Módulo de Verificação - Efeitos Colaterais em Backends Externos
//!
//! Uma verificação confere que a chamada HTTP de um step produziu o
//! efeito esperado em outro sistema: uma linha no banco, uma chave no
//! Redis, uma mensagem no Kafka.
//!
//! ## Dois modos de operação:
//!
//! 1. **Consulta simples**: depois da chamada HTTP (e de um atraso
//!    opcional de `timeout_seconds`), executa a query no conector e roda
//!    as assertions sobre o resultado bruto.
//! 2. **Pre-listen**: para fontes assíncronas, o conector começa a
//!    consumir ANTES da chamada HTTP, em uma task própria, por até
//!    `timeout_seconds`. Assim ele enxerga mensagens produzidas pela
//!    própria chamada. O resultado é aguardado na hora de avaliar.
//!
//! ## Pausa de acomodação:
//!
//! Depois de disparar os pre-listeners o executor dorme um instante para
//! o consumidor chegar ao fim do stream antes de a requisição produtora
//! ser emitida. O padrão é 500 ms, ajustável pela variável de ambiente
//! `CONDUCTOR_PRELISTEN_SETTLE_MS`.
//!
//! ## Regra especial do Kafka:
//!
//! Se a query de um pre-listener Kafka ainda contém `{{...}}` depois da
//! resolução (referência à resposta do próprio step, que ainda não
//! existe), a linha `key=...` é removida e fica só o filtro de tópico.
//! As assertions de conteúdo pegam qualquer divergência depois.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::connectors::{ConnectorGateway, ConnectorType};
use crate::jsonpath;
use crate::model::{
    AssertionResult, Environment, Verification, VerificationResult, VerificationStatus,
};
use crate::validation;

/// Pausa padrão entre disparar os pre-listeners e emitir a chamada HTTP.
pub const DEFAULT_PRELISTEN_SETTLE_MS: u64 = 500;

/// Pausa de acomodação efetiva, com override por variável de ambiente.
pub fn prelisten_settle() -> Duration {
    let ms = std::env::var("CONDUCTOR_PRELISTEN_SETTLE_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_PRELISTEN_SETTLE_MS);
    Duration::from_millis(ms)
}

/// Remove as linhas `key=...` de uma query de tópico Kafka.
pub fn strip_kafka_key_filter(query: &str) -> String {
    query
        .lines()
        .filter(|line| !line.trim_start().starts_with("key="))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ajusta a query de um pre-listener antes do spawn.
///
/// Só mexe em Kafka, e só quando sobrou referência `{{...}}` sem
/// resolução na query.
pub fn prepare_pre_listen_query(connector_type: ConnectorType, resolved_query: &str) -> String {
    if connector_type == ConnectorType::Kafka && resolved_query.contains("{{") {
        strip_kafka_key_filter(resolved_query)
    } else {
        resolved_query.to_string()
    }
}

/// Handle de um pre-listener em voo: a query efetiva e a task que vai
/// devolver o resultado bruto (ou a mensagem de erro).
pub struct PreListener {
    pub query: String,
    pub handle: JoinHandle<Result<String, String>>,
}

/// Dispara o pre-listener de uma verificação.
///
/// A task abre o conector e bloqueia no recebimento até
/// `timeout_seconds`. Ela nunca escreve em estado da execução; o
/// resultado só é lido quando o executor avalia a verificação.
pub fn spawn_pre_listener(
    gateway: Arc<ConnectorGateway>,
    environment: Arc<Environment>,
    verification: &Verification,
    resolved_query: String,
) -> PreListener {
    let connector_name = verification.connector_name.clone();
    let listen_seconds = verification.timeout_seconds.max(1);
    let query = resolved_query.clone();

    let handle = tokio::spawn(async move {
        let connector = environment
            .connector(&connector_name)
            .ok_or_else(|| format!("connector '{}' not found in environment", connector_name))?;
        gateway
            .execute(connector.connector_type, &connector.config, &query, listen_seconds)
            .await
            .map_err(|e| e.to_string())
    });

    PreListener {
        query: resolved_query,
        handle,
    }
}

/// Executa uma verificação sem pre-listen: atraso pós-chamada opcional e
/// depois a query com o timeout de query.
pub async fn execute(
    gateway: &ConnectorGateway,
    environment: &Environment,
    verification: &Verification,
    resolved_query: &str,
) -> VerificationResult {
    if verification.timeout_seconds > 0 {
        tokio::time::sleep(Duration::from_secs(verification.timeout_seconds)).await;
    }

    let connector = match environment.connector(&verification.connector_name) {
        Some(c) => c,
        None => {
            return error_result(
                verification,
                resolved_query,
                format!(
                    "connector '{}' not found in environment",
                    verification.connector_name
                ),
            );
        }
    };

    match gateway
        .execute(
            connector.connector_type,
            &connector.config,
            resolved_query,
            verification.query_timeout_seconds,
        )
        .await
    {
        Ok(raw) => evaluate(verification, resolved_query, &raw),
        Err(e) => error_result(verification, resolved_query, e.to_string()),
    }
}

/// Conclui uma verificação pre-listened a partir do retorno da task.
pub async fn conclude_pre_listener(
    verification: &Verification,
    listener: PreListener,
) -> VerificationResult {
    match listener.handle.await {
        Ok(Ok(raw)) => evaluate(verification, &listener.query, &raw),
        Ok(Err(message)) => error_result(verification, &listener.query, message),
        Err(join_error) => error_result(
            verification,
            &listener.query,
            format!("pre-listener task failed: {}", join_error),
        ),
    }
}

/// Roda as assertions sobre o resultado bruto do conector.
///
/// O resultado é interpretado como JSON pela camada de caminhos; quando
/// não parseia, toda extração devolve vazio e os operadores EXISTS /
/// NOT_EXISTS continuam fazendo sentido.
pub fn evaluate(verification: &Verification, query: &str, raw: &str) -> VerificationResult {
    let mut assertion_results = Vec::with_capacity(verification.assertions.len());
    let mut all_passed = true;

    for assertion in &verification.assertions {
        let actual = jsonpath::extract(raw, &assertion.json_path);
        let passed = validation::compare(&actual, assertion.operator, &assertion.expected_value);
        all_passed &= passed;
        assertion_results.push(AssertionResult {
            json_path: assertion.json_path.clone(),
            operator: assertion.operator,
            expected_value: assertion.expected_value.clone(),
            actual_value: actual,
            passed,
        });
    }

    VerificationResult {
        connector_name: verification.connector_name.clone(),
        query: query.to_string(),
        status: if all_passed {
            VerificationStatus::Passed
        } else {
            VerificationStatus::Failed
        },
        message: None,
        assertion_results,
    }
}

fn error_result(verification: &Verification, query: &str, message: String) -> VerificationResult {
    VerificationResult {
        connector_name: verification.connector_name.clone(),
        query: query.to_string(),
        status: VerificationStatus::Error,
        message: Some(message),
        assertion_results: Vec::new(),
    }
}

// ============================================================================
// TESTES
// ============================================================================
