//! # Executor de Step - Uma Chamada HTTP com Fluxo de Controle
//!
//! Este é o coração do motor. Dado um step e o estado da execução, ele
//! monta a requisição, dispara com retry dirigido pelos handlers de
//! resposta, extrai variáveis e roda as validações de resposta.
//!
//! ## Pipeline de um step:
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ 1. Portão   │   │ 2-4. Monta  │   │ 5. Dispara   │
//! │ de depen-   │ → │ URL, headers│ → │ com retry    │
//! │ dências     │   │ e corpo     │   │ por handler  │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!        ┌───────────────────────────────────┘
//!        ▼
//! ┌──────────────┐   ┌──────────────────┐
//! │ 6. Extração  │ → │ 7. Validações de │ → StepExecutionResult
//! │ de variáveis │   │ resposta         │
//! └──────────────┘   └──────────────────┘
//! ```
//!
//! ## Regras importantes:
//!
//! - Dependência com status ERROR ou SKIPPED (ou ausente) curto-circuita
//!   o step inteiro como SKIPPED.
//! - Falha de transporte finaliza como ERROR com `response_code = 0`,
//!   sem retry.
//! - Sem handler definido, 2xx é sucesso e o resto é erro.
//! - Falha de extração gera string vazia e uma linha de log, nunca
//!   derruba o step.
//! - O corpo multipart NUNCA recebe content-type manual: a camada HTTP
//!   emite o header com o parâmetro boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{multipart, Client, Method};

use crate::dag::PreparedExecution;
use crate::handlers;
use crate::jsonpath;
use crate::model::{
    BodyType, Environment, ExtractionSource, FormFieldType, HandlerAction, HeaderValueType,
    HttpMethod, StepExecutionResult, StepStatus, TestStep,
};
use crate::placeholder;
use crate::validation;

use super::{RunState, StepRunner};

/// Timeout padrão de uma chamada HTTP.
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Referência a arquivo do ambiente em um campo form-data.
static FILE_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{FILE:([A-Za-z0-9_.\-]+)\}$").expect("valid file ref regex"));

// ============================================================================
// EXECUTOR HTTP
// ============================================================================

/// Executor de steps baseado em reqwest.
///
/// O cliente é criado uma vez e compartilhado, mantendo o pool de
/// conexões entre steps e entre execuções.
#[derive(Clone)]
pub struct HttpStepExecutor {
    client: Client,
}

impl Default for HttpStepExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpStepExecutor {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

// ============================================================================
// REQUISIÇÃO PREPARADA
// ============================================================================

/// Parte de um corpo multipart, já resolvida.
enum PreparedPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        content_type: String,
        content: Vec<u8>,
    },
}

/// Corpo pronto para envio. Multipart é reconstruído a cada tentativa
/// porque `Form` não é clonável.
enum PreparedBody {
    Empty,
    Text(String),
    Form(Vec<PreparedPart>),
}

/// Tudo que a fase de montagem produz antes do laço de tentativas.
struct PreparedRequest {
    url: String,
    headers: Vec<(String, String)>,
    query_params: HashMap<String, String>,
    body: PreparedBody,
    warnings: Vec<String>,
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Patch => Method::PATCH,
    }
}

/// Extrai a chave de arquivo de um valor `${FILE:chave}`.
fn file_reference(value: &str) -> Option<String> {
    FILE_REF_RE
        .captures(value.trim())
        .map(|caps| caps[1].to_string())
}

#[async_trait]
impl StepRunner for HttpStepExecutor {
    #[tracing::instrument(
        name = "step_request",
        skip_all,
        fields(
            step.id = step.id,
            step.name = %step.name,
            http.method = step.method.as_str(),
            http.url = tracing::field::Empty,
            http.status_code = tracing::field::Empty,
            http.duration_ms = tracing::field::Empty,
            otel.kind = "client"
        )
    )]
    async fn execute(
        &self,
        step: &TestStep,
        prepared_execution: &PreparedExecution,
        state: &mut RunState,
    ) -> StepExecutionResult {
        let span = tracing::Span::current();
        let start = Instant::now();
        let env = prepared_execution.environment.as_ref();

        // ====================================================================
        // PASSO 1: PORTÃO DE DEPENDÊNCIAS
        // ====================================================================
        for dependency in &step.dependencies {
            let usable = state
                .result_cache
                .get(&dependency.depends_on_step_id)
                .map(|r| !matches!(r.status, StepStatus::Error | StepStatus::Skipped))
                .unwrap_or(false);
            if !usable {
                let dep_name = prepared_execution
                    .step_map
                    .get(&dependency.depends_on_step_id)
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| dependency.depends_on_step_id.to_string());
                tracing::info!(dependency = %dep_name, "Skipping step, dependency did not succeed");
                let mut result =
                    StepExecutionResult::placeholder(step.id, &step.name, StepStatus::Skipped);
                result.error_message = Some(format!(
                    "Skipped because dependency '{}' did not succeed",
                    dep_name
                ));
                result.duration_ms = start.elapsed().as_millis() as u64;
                return result;
            }
        }

        // ====================================================================
        // PASSOS 2-4: MONTAGEM DA REQUISIÇÃO
        // ====================================================================
        let request = match assemble_request(step, env, state) {
            Ok(request) => request,
            Err(message) => {
                let mut result =
                    StepExecutionResult::placeholder(step.id, &step.name, StepStatus::Error);
                result.error_message = Some(message);
                result.duration_ms = start.elapsed().as_millis() as u64;
                return result;
            }
        };
        span.record("http.url", request.url.as_str());

        let mut result = StepExecutionResult::placeholder(step.id, &step.name, StepStatus::Error);
        result.request_url = request.url.clone();
        result.request_headers = request.headers.iter().cloned().collect();
        result.request_query_params = request.query_params.clone();
        result.warnings = request.warnings.clone();
        if let PreparedBody::Text(text) = &request.body {
            result.request_body = Some(text.clone());
        }

        // ====================================================================
        // PASSO 5: DISPARO COM RETRY DIRIGIDO PELOS HANDLERS
        // ====================================================================
        let policy = handlers::retry_policy(&step.response_handlers);
        let method = to_reqwest_method(step.method);
        let mut attempts: u32 = 0;

        let (status, response_body, response_headers) = loop {
            attempts += 1;

            let mut builder = self.client.request(method.clone(), &request.url);
            for (key, value) in &request.headers {
                builder = builder.header(key, value);
            }
            builder = match &request.body {
                PreparedBody::Empty => builder,
                PreparedBody::Text(text) => builder.body(text.clone()),
                PreparedBody::Form(parts) => builder.multipart(build_form(parts)),
            };

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    // Falha de transporte: sem resposta, sem retry.
                    tracing::error!(error = %e, "HTTP request failed");
                    result.status = StepStatus::Error;
                    result.response_code = 0;
                    result.attempts = attempts;
                    result.error_message = Some(format!("HTTP request failed: {}", e));
                    result.duration_ms = start.elapsed().as_millis() as u64;
                    return result;
                }
            };

            let status = response.status().as_u16();
            let response_headers = flatten_headers(response.headers());
            let response_body = response.text().await.unwrap_or_default();

            match handlers::select(&step.response_handlers, status) {
                Some(handler) => match handler.action {
                    HandlerAction::Success => {
                        result.status = success_status(attempts);
                        break (status, response_body, response_headers);
                    }
                    HandlerAction::Error => {
                        result.status = StepStatus::Error;
                        result.error_message = Some(format!(
                            "Handler matched code {} with ERROR action",
                            status
                        ));
                        break (status, response_body, response_headers);
                    }
                    HandlerAction::Retry => {
                        if attempts <= policy.retry_count {
                            tracing::info!(
                                status,
                                attempt = attempts,
                                delay_seconds = policy.retry_delay_seconds,
                                "Retrying after handler match"
                            );
                            if policy.retry_delay_seconds > 0 {
                                tokio::time::sleep(Duration::from_secs(policy.retry_delay_seconds))
                                    .await;
                            }
                            continue;
                        }
                        result.status = StepStatus::Error;
                        result.error_message = Some(format!(
                            "Retry attempts exhausted after {} attempts (last status {})",
                            attempts, status
                        ));
                        break (status, response_body, response_headers);
                    }
                    HandlerAction::FireSideEffect => {
                        self.fire_side_effect(handler.side_effect_step_id, prepared_execution, state);
                        result.status = success_status(attempts);
                        break (status, response_body, response_headers);
                    }
                },
                None => {
                    // Regra padrão: 2xx é sucesso, o resto é erro.
                    if (200..300).contains(&status) {
                        result.status = success_status(attempts);
                    } else {
                        result.status = StepStatus::Error;
                        result.error_message =
                            Some(format!("Unexpected response code {}", status));
                    }
                    break (status, response_body, response_headers);
                }
            }
        };

        result.attempts = attempts;
        result.response_code = status;
        result.response_body = response_body;
        result.response_headers = response_headers;
        result.duration_ms = start.elapsed().as_millis() as u64;
        span.record("http.status_code", i64::from(status));
        span.record("http.duration_ms", result.duration_ms as i64);

        tracing::info!(
            status,
            duration_ms = result.duration_ms,
            attempts,
            outcome = ?result.status,
            "Step request finished"
        );

        if result.status == StepStatus::Error {
            return result;
        }

        // ====================================================================
        // PASSO 6: EXTRAÇÃO DE VARIÁVEIS
        // ====================================================================
        result.extracted_variables = extract_variables(step, &result);

        // ====================================================================
        // PASSO 7: VALIDAÇÕES DE RESPOSTA
        // ====================================================================
        for item in &step.response_validations {
            let outcome = validation::run_validation(
                item,
                result.response_code,
                &result.response_body,
                &result.response_headers,
            );
            if !outcome.passed {
                tracing::warn!(
                    validation = ?outcome.validation_type,
                    message = outcome.message.as_deref().unwrap_or(""),
                    "Response validation failed"
                );
            }
            result.validation_results.push(outcome);
        }
        if result.status.is_http_success()
            && result.validation_results.iter().any(|v| !v.passed)
        {
            result.status = StepStatus::VerificationFailed;
        }

        result
    }
}

impl HttpStepExecutor {
    /// Dispara o step de efeito colateral em uma task fire-and-forget.
    ///
    /// A task recebe CÓPIAS do cache de resultados e das variáveis, trata
    /// tudo como leitura e descarta o próprio resultado. Ela não participa
    /// do status da execução externa.
    fn fire_side_effect(
        &self,
        side_effect_step_id: Option<i64>,
        prepared_execution: &PreparedExecution,
        state: &RunState,
    ) {
        let Some(step_id) = side_effect_step_id else {
            tracing::warn!("FIRE_SIDE_EFFECT handler without a side-effect step id");
            return;
        };
        let Some(side_step) = prepared_execution.step_map.get(&step_id).cloned() else {
            tracing::warn!(step_id, "Side-effect step not found");
            return;
        };

        let executor = self.clone();
        let detached_execution = PreparedExecution {
            suite_id: prepared_execution.suite_id,
            suite_name: prepared_execution.suite_name.clone(),
            environment: Arc::clone(&prepared_execution.environment),
            execution_order: Vec::new(),
            step_map: Arc::clone(&prepared_execution.step_map),
        };
        let mut detached_state = RunState {
            result_cache: state.result_cache.clone(),
            extracted: state.extracted.clone(),
            manual_inputs: state.manual_inputs.clone(),
            ..RunState::new()
        };

        tokio::spawn(async move {
            let result = executor
                .execute(&side_step, &detached_execution, &mut detached_state)
                .await;
            tracing::info!(
                step = %side_step.name,
                status = ?result.status,
                "Side-effect step finished"
            );
        });
    }
}

// ============================================================================
// MONTAGEM
// ============================================================================

fn assemble_request(
    step: &TestStep,
    env: &Environment,
    state: &RunState,
) -> Result<PreparedRequest, String> {
    let mut warnings = Vec::new();

    // URL: placeholders resolvidos e base do ambiente prefixada em
    // caminhos relativos.
    let mut url = placeholder::resolve(
        &step.url,
        env,
        &state.extracted,
        &state.manual_inputs,
        &mut warnings,
    );
    if url.starts_with('/') {
        if let Some(base) = env.base_url.as_deref().filter(|b| !b.is_empty()) {
            url = format!("{}{}", base.trim_end_matches('/'), url);
        }
    }

    // Query params resolvidos e URL-encodados, na ordem declarada.
    let mut query_params = HashMap::new();
    let mut encoded_pairs = Vec::new();
    for param in &step.query_params {
        let value = placeholder::resolve(
            &param.value,
            env,
            &state.extracted,
            &state.manual_inputs,
            &mut warnings,
        );
        encoded_pairs.push(format!(
            "{}={}",
            urlencoding::encode(&param.key),
            urlencoding::encode(&value)
        ));
        query_params.insert(param.key.clone(), value);
    }
    if !encoded_pairs.is_empty() {
        let separator = if url.contains('?') { '&' } else { '?' };
        url.push(separator);
        url.push_str(&encoded_pairs.join("&"));
    }

    // Headers: padrão do ambiente (menos os desabilitados) e depois os
    // do step, que vencem em colisão de chave (sensível a maiúsculas).
    let mut headers: Vec<(String, String)> = Vec::new();
    for default_header in &env.default_headers {
        if step
            .disabled_default_headers
            .iter()
            .any(|key| key == &default_header.key)
        {
            continue;
        }
        let value = match default_header.value_type {
            HeaderValueType::Static => placeholder::resolve(
                &default_header.value,
                env,
                &state.extracted,
                &state.manual_inputs,
                &mut warnings,
            ),
            HeaderValueType::Variable => env
                .variable(&default_header.value)
                .map(|v| placeholder::expand_value_type(v.value_type, &v.value))
                .or_else(|| state.extracted.get(&default_header.value).cloned())
                .unwrap_or_else(|| default_header.value.clone()),
            HeaderValueType::Uuid => uuid::Uuid::new_v4().to_string(),
            HeaderValueType::IsoTimestamp => placeholder::now_utc_iso(),
        };
        headers.push((default_header.key.clone(), value));
    }
    for header in &step.headers {
        let value = placeholder::resolve(
            &header.value,
            env,
            &state.extracted,
            &state.manual_inputs,
            &mut warnings,
        );
        match headers.iter_mut().find(|(key, _)| key == &header.key) {
            Some(existing) => existing.1 = value,
            None => headers.push((header.key.clone(), value)),
        }
    }

    // Corpo.
    let body = match step.body_type {
        BodyType::None => PreparedBody::Empty,
        BodyType::Json => PreparedBody::Text(placeholder::resolve(
            step.body.as_deref().unwrap_or_default(),
            env,
            &state.extracted,
            &state.manual_inputs,
            &mut warnings,
        )),
        BodyType::FormData => {
            let mut parts = Vec::with_capacity(step.form_fields.len());
            for field in &step.form_fields {
                let file_key = file_reference(&field.value).or_else(|| {
                    (field.field_type == FormFieldType::File).then(|| field.value.clone())
                });
                match file_key {
                    Some(key) => {
                        let file = env.file(&key).ok_or_else(|| {
                            format!("Environment file '{}' not found", key)
                        })?;
                        parts.push(PreparedPart::File {
                            name: field.name.clone(),
                            file_name: file.file_name.clone(),
                            content_type: file.content_type.clone(),
                            content: file.content.clone(),
                        });
                    }
                    None => {
                        let value = placeholder::resolve(
                            &field.value,
                            env,
                            &state.extracted,
                            &state.manual_inputs,
                            &mut warnings,
                        );
                        parts.push(PreparedPart::Text {
                            name: field.name.clone(),
                            value,
                        });
                    }
                }
            }
            PreparedBody::Form(parts)
        }
    };

    Ok(PreparedRequest {
        url,
        headers,
        query_params,
        body,
        warnings,
    })
}

fn build_form(parts: &[PreparedPart]) -> multipart::Form {
    let mut form = multipart::Form::new();
    for part in parts {
        match part {
            PreparedPart::Text { name, value } => {
                form = form.text(name.clone(), value.clone());
            }
            PreparedPart::File {
                name,
                file_name,
                content_type,
                content,
            } => {
                let file_part = multipart::Part::bytes(content.clone())
                    .file_name(file_name.clone());
                let file_part = file_part.mime_str(content_type).unwrap_or_else(|_| {
                    multipart::Part::bytes(content.clone()).file_name(file_name.clone())
                });
                form = form.part(name.clone(), file_part);
            }
        }
    }
    form
}

fn success_status(attempts: u32) -> StepStatus {
    if attempts > 1 {
        StepStatus::Retried
    } else {
        StepStatus::Success
    }
}

/// Achata os headers da resposta: chaves duplicadas viram `v1, v2`.
fn flatten_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut flat: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let text = value.to_str().unwrap_or_default();
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(text);
            })
            .or_insert_with(|| text.to_string());
    }
    flat
}

// ============================================================================
// EXTRAÇÃO
// ============================================================================

/// Computa as extrações do step e devolve o mapa já com as chaves no
/// formato `"<nomeDoStep>.<variableName>"`.
fn extract_variables(step: &TestStep, result: &StepExecutionResult) -> HashMap<String, String> {
    let mut extracted = HashMap::new();
    for rule in &step.extract_variables {
        let value = match rule.source {
            ExtractionSource::ResponseBody => {
                jsonpath::extract(&result.response_body, &rule.json_path)
            }
            ExtractionSource::ResponseHeader => result
                .response_headers
                .get(&rule.json_path)
                .cloned()
                .unwrap_or_default(),
            ExtractionSource::StatusCode => result.response_code.to_string(),
            ExtractionSource::RequestBody => jsonpath::extract(
                result.request_body.as_deref().unwrap_or_default(),
                &rule.json_path,
            ),
            ExtractionSource::RequestHeader => result
                .request_headers
                .get(&rule.json_path)
                .cloned()
                .unwrap_or_default(),
            ExtractionSource::QueryParam => result
                .request_query_params
                .get(&rule.json_path)
                .cloned()
                .unwrap_or_default(),
            ExtractionSource::RequestUrl => result.request_url.clone(),
        };
        if value.is_empty() {
            tracing::debug!(
                variable = %rule.variable_name,
                source = ?rule.source,
                path = %rule.json_path,
                "Extraction produced an empty value"
            );
        }
        extracted.insert(format!("{}.{}", step.name, rule.variable_name), value);
    }
    extracted
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Dependency, DefaultHeader, EnvironmentVariable, ExtractVariable, HeaderTemplate,
        QueryParamTemplate, ResponseHandler, ResponseValidation, TestSuite, ValidationType,
        ValueType,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    /// Sobe um servidor HTTP de loopback que responde o script na ordem,
    /// repetindo a última resposta. Devolve a base e o contador de
    /// requisições atendidas.
    fn spawn_server(script: Vec<(u16, &'static str)>) -> (String, StdArc<AtomicUsize>) {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind loopback server");
        let port = server
            .server_addr()
            .to_ip()
            .expect("ip listener")
            .port();
        let counter = StdArc::new(AtomicUsize::new(0));
        let hits = StdArc::clone(&counter);
        std::thread::spawn(move || {
            for request in server.incoming_requests() {
                let index = hits.fetch_add(1, Ordering::SeqCst).min(script.len() - 1);
                let (code, body) = script[index];
                let response = tiny_http::Response::from_string(body)
                    .with_status_code(code)
                    .with_header(
                        tiny_http::Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"application/json"[..],
                        )
                        .expect("static header"),
                    );
                let _ = request.respond(response);
            }
        });
        (format!("http://127.0.0.1:{}", port), counter)
    }

    fn environment(base_url: &str) -> Environment {
        Environment {
            id: 1,
            name: "test".to_string(),
            base_url: Some(base_url.to_string()),
            variables: vec![],
            default_headers: vec![],
            connectors: vec![],
            files: vec![],
        }
    }

    fn step(id: i64, url: &str) -> TestStep {
        TestStep {
            id,
            suite_id: 1,
            name: format!("step-{}", id),
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: vec![],
            query_params: vec![],
            body_type: BodyType::None,
            body: None,
            form_fields: vec![],
            cacheable: false,
            cache_ttl_seconds: 0,
            dependency_only: false,
            disabled_default_headers: vec![],
            sort_order: 0,
            group_name: None,
            dependencies: vec![],
            response_handlers: vec![],
            extract_variables: vec![],
            verifications: vec![],
            response_validations: vec![],
        }
    }

    fn prepared(env: Environment, steps: Vec<TestStep>) -> PreparedExecution {
        let suite = TestSuite {
            id: 1,
            name: "suite".to_string(),
            default_environment_id: None,
            steps,
        };
        crate::dag::prepare(&suite, env).expect("valid suite")
    }

    fn handler(match_code: &str, action: HandlerAction, priority: i32) -> ResponseHandler {
        ResponseHandler {
            match_code: match_code.to_string(),
            action,
            side_effect_step_id: None,
            retry_count: 0,
            retry_delay_seconds: 0,
            priority,
        }
    }

    #[tokio::test]
    async fn test_simple_get_success() {
        let (base, _) = spawn_server(vec![(200, r#"{"ok":true}"#)]);
        let prepared = prepared(environment(&base), vec![step(1, "/ping")]);
        let executor = HttpStepExecutor::new();
        let mut state = RunState::new();

        let the_step = StdArc::clone(prepared.step_map.get(&1).unwrap());
        let result = executor.execute(&the_step, &prepared, &mut state).await;

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.response_code, 200);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.response_body, r#"{"ok":true}"#);
        assert!(result.request_url.ends_with("/ping"));
    }

    #[tokio::test]
    async fn test_default_rule_treats_non_2xx_as_error() {
        let (base, _) = spawn_server(vec![(404, r#"{"error":"nope"}"#)]);
        let prepared = prepared(environment(&base), vec![step(1, "/missing")]);
        let executor = HttpStepExecutor::new();
        let mut state = RunState::new();

        let the_step = StdArc::clone(prepared.step_map.get(&1).unwrap());
        let result = executor.execute(&the_step, &prepared, &mut state).await;

        assert_eq!(result.status, StepStatus::Error);
        assert_eq!(result.response_code, 404);
        assert!(result.error_message.unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_lower_priority_handler_wins_over_exact_match() {
        let (base, _) = spawn_server(vec![(200, "{}")]);
        let mut s = step(1, "/resource");
        s.response_handlers = vec![
            handler("200", HandlerAction::Success, 10),
            handler("2xx", HandlerAction::Error, 1),
        ];
        let prepared = prepared(environment(&base), vec![s]);
        let executor = HttpStepExecutor::new();
        let mut state = RunState::new();

        let the_step = StdArc::clone(prepared.step_map.get(&1).unwrap());
        let result = executor.execute(&the_step, &prepared, &mut state).await;

        assert_eq!(result.status, StepStatus::Error);
        assert_eq!(
            result.error_message.unwrap(),
            "Handler matched code 200 with ERROR action"
        );
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let (base, counter) = spawn_server(vec![(503, "{}"), (503, "{}"), (200, r#"{"up":true}"#)]);
        let mut s = step(1, "/flaky");
        let mut retry = handler("5xx", HandlerAction::Retry, 0);
        retry.retry_count = 2;
        s.response_handlers = vec![retry, handler("200", HandlerAction::Success, 0)];
        let prepared = prepared(environment(&base), vec![s]);
        let executor = HttpStepExecutor::new();
        let mut state = RunState::new();

        let the_step = StdArc::clone(prepared.step_map.get(&1).unwrap());
        let result = executor.execute(&the_step, &prepared, &mut state).await;

        assert_eq!(result.status, StepStatus::Retried);
        assert_eq!(result.response_code, 200);
        assert_eq!(result.attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_is_error() {
        let (base, counter) = spawn_server(vec![(503, "{}")]);
        let mut s = step(1, "/down");
        let mut retry = handler("5xx", HandlerAction::Retry, 0);
        retry.retry_count = 1;
        s.response_handlers = vec![retry];
        let prepared = prepared(environment(&base), vec![s]);
        let executor = HttpStepExecutor::new();
        let mut state = RunState::new();

        let the_step = StdArc::clone(prepared.step_map.get(&1).unwrap());
        let result = executor.execute(&the_step, &prepared, &mut state).await;

        assert_eq!(result.status, StepStatus::Error);
        assert_eq!(result.attempts, 2);
        assert!(result.error_message.unwrap().contains("exhausted"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_finalizes_with_code_zero() {
        // Porta 9 (discard) sem listener local: conexão recusada.
        let prepared = prepared(environment("http://127.0.0.1:9"), vec![step(1, "/x")]);
        let executor = HttpStepExecutor::new();
        let mut state = RunState::new();

        let the_step = StdArc::clone(prepared.step_map.get(&1).unwrap());
        let result = executor.execute(&the_step, &prepared, &mut state).await;

        assert_eq!(result.status, StepStatus::Error);
        assert_eq!(result.response_code, 0);
        assert_eq!(result.attempts, 1);
        assert!(result.error_message.unwrap().contains("HTTP request failed"));
    }

    #[tokio::test]
    async fn test_dependency_gate_skips_step() {
        let (base, counter) = spawn_server(vec![(200, "{}")]);
        let producer = step(1, "/a");
        let mut consumer = step(2, "/b");
        consumer.dependencies = vec![Dependency {
            depends_on_step_id: 1,
            use_cache: true,
            reuse_manual_input: false,
        }];
        let prepared = prepared(environment(&base), vec![producer, consumer]);
        let executor = HttpStepExecutor::new();
        let mut state = RunState::new();
        state.result_cache.insert(
            1,
            StepExecutionResult::placeholder(1, "step-1", StepStatus::Error),
        );

        let the_step = StdArc::clone(prepared.step_map.get(&2).unwrap());
        let result = executor.execute(&the_step, &prepared, &mut state).await;

        assert_eq!(result.status, StepStatus::Skipped);
        assert_eq!(
            result.error_message.unwrap(),
            "Skipped because dependency 'step-1' did not succeed"
        );
        // Nenhuma requisição saiu.
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_extraction_sources() {
        let (base, _) = spawn_server(vec![(201, r#"{"data":{"id":"abc-1"}}"#)]);
        let mut s = step(1, "/users");
        s.name = "Create user".to_string();
        s.query_params = vec![QueryParamTemplate {
            key: "tenant".to_string(),
            value: "acme".to_string(),
        }];
        s.extract_variables = vec![
            ExtractVariable {
                variable_name: "id".to_string(),
                json_path: "$.data.id".to_string(),
                source: ExtractionSource::ResponseBody,
            },
            ExtractVariable {
                variable_name: "status".to_string(),
                json_path: String::new(),
                source: ExtractionSource::StatusCode,
            },
            ExtractVariable {
                variable_name: "tenant".to_string(),
                json_path: "tenant".to_string(),
                source: ExtractionSource::QueryParam,
            },
            ExtractVariable {
                variable_name: "url".to_string(),
                json_path: String::new(),
                source: ExtractionSource::RequestUrl,
            },
            ExtractVariable {
                variable_name: "missing".to_string(),
                json_path: "$.data.nope".to_string(),
                source: ExtractionSource::ResponseBody,
            },
        ];
        let prepared = prepared(environment(&base), vec![s]);
        let executor = HttpStepExecutor::new();
        let mut state = RunState::new();

        let the_step = StdArc::clone(prepared.step_map.get(&1).unwrap());
        let result = executor.execute(&the_step, &prepared, &mut state).await;

        assert_eq!(result.status, StepStatus::Success);
        let vars = &result.extracted_variables;
        assert_eq!(vars.get("Create user.id").map(String::as_str), Some("abc-1"));
        assert_eq!(vars.get("Create user.status").map(String::as_str), Some("201"));
        assert_eq!(vars.get("Create user.tenant").map(String::as_str), Some("acme"));
        assert!(vars.get("Create user.url").unwrap().contains("tenant=acme"));
        // Falha de extração vira string vazia, nunca erro.
        assert_eq!(vars.get("Create user.missing").map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn test_header_assembly_overlay_and_disable() {
        let (base, _) = spawn_server(vec![(200, "{}")]);
        let mut env = environment(&base);
        env.variables = vec![EnvironmentVariable {
            key: "token".to_string(),
            value: "tok-1".to_string(),
            value_type: ValueType::Static,
            secret: false,
        }];
        env.default_headers = vec![
            DefaultHeader {
                key: "Authorization".to_string(),
                value_type: HeaderValueType::Variable,
                value: "token".to_string(),
            },
            DefaultHeader {
                key: "X-Env".to_string(),
                value_type: HeaderValueType::Static,
                value: "staging".to_string(),
            },
            DefaultHeader {
                key: "X-Disabled".to_string(),
                value_type: HeaderValueType::Static,
                value: "never".to_string(),
            },
            DefaultHeader {
                key: "X-Trace".to_string(),
                value_type: HeaderValueType::Uuid,
                value: String::new(),
            },
        ];
        let mut s = step(1, "/ping");
        s.disabled_default_headers = vec!["X-Disabled".to_string()];
        s.headers = vec![HeaderTemplate {
            key: "X-Env".to_string(),
            value: "override".to_string(),
        }];
        let prepared = prepared(env, vec![s]);
        let executor = HttpStepExecutor::new();
        let mut state = RunState::new();

        let the_step = StdArc::clone(prepared.step_map.get(&1).unwrap());
        let result = executor.execute(&the_step, &prepared, &mut state).await;

        let headers = &result.request_headers;
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("tok-1"));
        assert_eq!(headers.get("X-Env").map(String::as_str), Some("override"));
        assert!(!headers.contains_key("X-Disabled"));
        assert_eq!(headers.get("X-Trace").map(String::len), Some(36));
    }

    #[tokio::test]
    async fn test_failed_validation_flips_status() {
        let (base, _) = spawn_server(vec![(200, r#"{"status":"PENDING"}"#)]);
        let mut s = step(1, "/order");
        s.response_validations = vec![ResponseValidation {
            validation_type: ValidationType::BodyField,
            header_name: None,
            json_path: Some("$.status".to_string()),
            operator: Some(crate::model::AssertionOperator::Equals),
            expected_value: Some("PAID".to_string()),
            match_mode: None,
        }];
        let prepared = prepared(environment(&base), vec![s]);
        let executor = HttpStepExecutor::new();
        let mut state = RunState::new();

        let the_step = StdArc::clone(prepared.step_map.get(&1).unwrap());
        let result = executor.execute(&the_step, &prepared, &mut state).await;

        assert_eq!(result.status, StepStatus::VerificationFailed);
        assert_eq!(result.response_code, 200);
        assert!(!result.validation_results[0].passed);
    }

    #[tokio::test]
    async fn test_url_join_and_query_encoding() {
        let (base, _) = spawn_server(vec![(200, "{}")]);
        let env = environment(&format!("{}/", base));
        let mut s = step(1, "/search");
        s.query_params = vec![QueryParamTemplate {
            key: "q".to_string(),
            value: "hello world".to_string(),
        }];
        let prepared = prepared(env, vec![s]);
        let executor = HttpStepExecutor::new();
        let mut state = RunState::new();

        let the_step = StdArc::clone(prepared.step_map.get(&1).unwrap());
        let result = executor.execute(&the_step, &prepared, &mut state).await;

        assert_eq!(result.status, StepStatus::Success);
        assert!(result.request_url.ends_with("/search?q=hello%20world"));
        // A barra final da base não duplica.
        assert!(!result.request_url.contains("//search"));
    }

    #[test]
    fn test_file_reference_parsing() {
        assert_eq!(file_reference("${FILE:avatar}"), Some("avatar".to_string()));
        assert_eq!(file_reference(" ${FILE:report.pdf} "), Some("report.pdf".to_string()));
        assert_eq!(file_reference("${FILE:}"), None);
        assert_eq!(file_reference("plain text"), None);
        assert_eq!(file_reference("prefix ${FILE:x}"), None);
    }

    #[tokio::test]
    async fn test_unresolved_step_variable_surfaces_warning() {
        let (base, _) = spawn_server(vec![(200, "{}")]);
        let mut s = step(1, "/me");
        s.headers = vec![HeaderTemplate {
            key: "Authorization".to_string(),
            value: "Bearer {{Login.token}}".to_string(),
        }];
        let prepared = prepared(environment(&base), vec![s]);
        let executor = HttpStepExecutor::new();
        let mut state = RunState::new();

        let the_step = StdArc::clone(prepared.step_map.get(&1).unwrap());
        let result = executor.execute(&the_step, &prepared, &mut state).await;

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("Login.token"));
        assert_eq!(
            result.request_headers.get("Authorization").map(String::as_str),
            Some("Bearer {{Login.token}}")
        );
    }
}
