//! # Executor de Suíte - O Laço de Execução
//!
//! Dirige a ordem de execução preparada: materializa dependências sob
//! demanda, refresca cache expirado, dispara pre-listeners, pede inputs
//! manuais, executa cada step e consolida o status final.
//!
//! ## Ciclo de um step na ordem de execução:
//!
//! 1. Materializa dependências ausentes do cache (steps
//!    somente-dependência nunca estão na ordem externa).
//! 2. Refresca dependências expiradas: `use_cache=false` sempre
//!    re-executa; produtor cacheável com TTL vencido re-executa, depois
//!    de refrescar as dependências expiradas dele.
//! 3. Dispara os pre-listeners das verificações e dá a pausa de
//!    acomodação.
//! 4. Pede inputs manuais que ainda não estão no cache da execução.
//! 5. Executa o step.
//! 6. Publica as variáveis extraídas ANTES das verificações, para uma
//!    query poder referenciar a saída do próprio step.
//! 7. Avalia as verificações (aguardando os pre-listeners).
//! 8. Marca steps cacheáveis para reutilização.
//! 9. Registra o resultado e emite o evento de conclusão.
//!
//! ## Cancelamento:
//!
//! Cooperativo. O cancelamento completa o rendezvous de input
//! excepcionalmente; qualquer prompt bloqueado desbloqueia, o step
//! corrente vira ERROR e o resto da ordem não executa. Chamadas HTTP e
//! pre-listeners em voo terminam sozinhos e o resultado é descartado.
//!
//! ## Modo não-interativo:
//!
//! Usado pelo scheduler. Antes de rodar, uma varredura coleta todos os
//! `#{...}` da suíte: nomes com default viram o mapa de valores, steps
//! com nome sem default são pré-marcados SKIPPED e os dependentes caem
//! pelo portão de dependências.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::connectors::ConnectorGateway;
use crate::dag::PreparedExecution;
use crate::model::{
    InputField, RunEvent, RunStatus, StepExecutionResult, StepStatus, SuiteExecutionResult,
    SuiteSummary, TestStep, VerificationStatus,
};
use crate::placeholder;
use crate::registry::RunRegistry;
use crate::verification::{self, PreListener};

use super::step::HttpStepExecutor;
use super::{RunState, StepRunner};

/// Mensagem dos steps pulados pela varredura não-interativa.
const SCHEDULED_SKIP_MESSAGE: &str =
    "Manual input required but no default provided (scheduled run)";

// ============================================================================
// OPÇÕES E MODOS
// ============================================================================

/// Opções de uma execução.
#[derive(Clone)]
pub struct RunOptions {
    pub run_id: String,
    /// Registro de execuções: sink de eventos e rendezvous de input.
    /// Sem ele a execução roda muda e sem prompts.
    pub registry: Option<Arc<RunRegistry>>,
    /// true para execuções agendadas: nenhum prompt, defaults resolvidos
    /// na varredura prévia.
    pub non_interactive: bool,
}

/// Papel do step dentro do laço.
#[derive(Debug, Clone, Copy)]
enum StepMode {
    /// Step da ordem de execução externa.
    TopLevel,
    /// Dependência ausente materializada sob demanda.
    Materialize,
    /// Dependência re-executada por cache expirado ou `use_cache=false`.
    Refresh { reuse_manual_input: bool },
}

/// Quais campos entram em um prompt de input manual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptFields {
    /// Só nomes ainda fora do cache da execução.
    MissingOnly,
    /// Todos os nomes, com `cached_value` preenchido, para o chamador
    /// oferecer o reaproveitamento.
    AllWithCached,
}

// ============================================================================
// SUITE RUNNER
// ============================================================================

/// Executor de suítes. Compartilhável entre execuções concorrentes; todo
/// estado mutável vive no `RunState` de cada execução.
pub struct SuiteRunner {
    executor: HttpStepExecutor,
    gateway: Arc<ConnectorGateway>,
}

impl SuiteRunner {
    pub fn new(gateway: Arc<ConnectorGateway>) -> Self {
        Self {
            executor: HttpStepExecutor::new(),
            gateway,
        }
    }

    /// Executa a ordem preparada e devolve o resultado consolidado.
    pub async fn run(
        &self,
        prepared: &PreparedExecution,
        options: &RunOptions,
    ) -> SuiteExecutionResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut state = RunState::new();

        if options.non_interactive {
            let (defaults, skipped) = prescan_manual_inputs(prepared);
            state.manual_inputs.extend(defaults);
            state.pre_skipped = skipped;
        }

        tracing::info!(
            run_id = %options.run_id,
            suite = %prepared.suite_name,
            steps = prepared.execution_order.len(),
            non_interactive = options.non_interactive,
            "Run starting"
        );
        self.emit(
            options,
            RunEvent::RunStarted {
                run_id: options.run_id.clone(),
            },
        );

        let mut recorded_order: Vec<i64> = Vec::new();
        let mut cancel_reason: Option<String> = None;

        'order: for step_id in &prepared.execution_order {
            let Some(step) = prepared.step_map.get(step_id) else {
                continue;
            };

            if let Some(reason) = self.cancellation(options) {
                record_cancelled_step(step, &mut state, &mut recorded_order, &reason);
                cancel_reason = Some(reason);
                break 'order;
            }

            // 1. Materializa dependências ausentes, em ordem de dependência.
            let materialized = collect_missing(step, prepared, &state);
            for dep_id in &materialized {
                if let Some(dep_step) = prepared.step_map.get(dep_id) {
                    if let Err(reason) = self
                        .run_step(dep_step, prepared, &mut state, options, StepMode::Materialize)
                        .await
                    {
                        record_cancelled_step(step, &mut state, &mut recorded_order, &reason);
                        cancel_reason = Some(reason);
                        break 'order;
                    }
                }
            }

            // 2. Refresca dependências expiradas (fora as recém-materializadas).
            let materialized: HashSet<i64> = materialized.into_iter().collect();
            for (dep_id, reuse_manual_input) in
                collect_refresh(step, prepared, &state, &materialized)
            {
                if let Some(dep_step) = prepared.step_map.get(&dep_id) {
                    match self
                        .run_step(
                            dep_step,
                            prepared,
                            &mut state,
                            options,
                            StepMode::Refresh { reuse_manual_input },
                        )
                        .await
                    {
                        Ok(()) => {
                            state.refreshed.insert(dep_id);
                        }
                        Err(reason) => {
                            record_cancelled_step(step, &mut state, &mut recorded_order, &reason);
                            cancel_reason = Some(reason);
                            break 'order;
                        }
                    }
                }
            }

            // 3-9. O step em si.
            match self
                .run_step(step, prepared, &mut state, options, StepMode::TopLevel)
                .await
            {
                Ok(()) => {
                    if !recorded_order.contains(step_id) {
                        recorded_order.push(*step_id);
                    }
                }
                Err(reason) => {
                    record_cancelled_step(step, &mut state, &mut recorded_order, &reason);
                    cancel_reason = Some(reason);
                    break 'order;
                }
            }
        }

        let steps: Vec<StepExecutionResult> = recorded_order
            .iter()
            .filter_map(|id| state.result_cache.get(id).cloned())
            .collect();

        let status = if cancel_reason.is_some() {
            RunStatus::Failure
        } else {
            RunStatus::from_steps(&steps)
        };

        let result = SuiteExecutionResult {
            run_id: options.run_id.clone(),
            suite_id: prepared.suite_id,
            suite_name: prepared.suite_name.clone(),
            environment_id: prepared.environment.id,
            status,
            started_at,
            completed_at: Utc::now(),
            total_duration_ms: start.elapsed().as_millis() as u64,
            summary: SuiteSummary::from_steps(&steps),
            steps,
        };

        tracing::info!(
            run_id = %options.run_id,
            status = ?result.status,
            duration_ms = result.total_duration_ms,
            "Run finished"
        );
        if let Some(reason) = &cancel_reason {
            self.emit(
                options,
                RunEvent::RunError {
                    message: format!("Run cancelled: {}", reason),
                },
            );
        }
        self.emit(
            options,
            RunEvent::RunComplete {
                result: Box::new(result.clone()),
            },
        );
        result
    }

    /// Roda um step (em qualquer papel) e registra o resultado no cache.
    ///
    /// Devolve `Err(motivo)` apenas em cancelamento; qualquer outra falha
    /// é capturada dentro do resultado do step.
    async fn run_step(
        &self,
        step: &TestStep,
        prepared: &PreparedExecution,
        state: &mut RunState,
        options: &RunOptions,
        mode: StepMode,
    ) -> Result<(), String> {
        // Step pré-marcado pela varredura não-interativa.
        if state.pre_skipped.contains(&step.id) {
            let mut result =
                StepExecutionResult::placeholder(step.id, &step.name, StepStatus::Skipped);
            result.error_message = Some(SCHEDULED_SKIP_MESSAGE.to_string());
            self.record(step, result, state, options, mode);
            return Ok(());
        }

        // Pre-listeners abrem o conector antes da chamada HTTP para
        // enxergar os efeitos dela.
        let mut listeners: HashMap<usize, PreListener> = HashMap::new();
        for (index, item) in step.verifications.iter().enumerate() {
            if !item.pre_listen {
                continue;
            }
            let mut warnings = Vec::new();
            let resolved = placeholder::resolve(
                &item.query,
                &prepared.environment,
                &state.extracted,
                &state.manual_inputs,
                &mut warnings,
            );
            let query = match prepared.environment.connector(&item.connector_name) {
                Some(connector) => {
                    verification::prepare_pre_listen_query(connector.connector_type, &resolved)
                }
                None => resolved,
            };
            listeners.insert(
                index,
                verification::spawn_pre_listener(
                    Arc::clone(&self.gateway),
                    Arc::clone(&prepared.environment),
                    item,
                    query,
                ),
            );
        }
        if !listeners.is_empty() {
            tokio::time::sleep(verification::prelisten_settle()).await;
        }

        // Prompt de inputs manuais. Em cancelamento, os pre-listeners em
        // voo terminam ou estouram timeout sozinhos; o resultado deles é
        // descartado junto com o handle.
        if let Err(reason) = self.prompt_if_needed(step, prepared, state, options, mode).await {
            return Err(reason);
        }

        // A chamada HTTP em si.
        let mut result = self.executor.execute(step, prepared, state).await;

        // Variáveis extraídas ficam visíveis antes das verificações.
        for (key, value) in &result.extracted_variables {
            state.extracted.insert(key.clone(), value.clone());
        }

        // Verificações: pre-listeners são aguardados, as demais executam
        // agora com a query resolvida contra o namespace já atualizado.
        for (index, item) in step.verifications.iter().enumerate() {
            let verification_result = match listeners.remove(&index) {
                Some(listener) => verification::conclude_pre_listener(item, listener).await,
                None => {
                    let resolved = placeholder::resolve(
                        &item.query,
                        &prepared.environment,
                        &state.extracted,
                        &state.manual_inputs,
                        &mut result.warnings,
                    );
                    verification::execute(&self.gateway, &prepared.environment, item, &resolved)
                        .await
                }
            };
            result.verification_results.push(verification_result);
        }
        if result.status.is_http_success()
            && result
                .verification_results
                .iter()
                .any(|v| v.status != VerificationStatus::Passed)
        {
            result.status = StepStatus::VerificationFailed;
        }

        self.record(step, result, state, options, mode);
        Ok(())
    }

    /// Registro comum: marca de cache, carimbo de execução, cache e
    /// evento de conclusão para steps da ordem externa.
    fn record(
        &self,
        step: &TestStep,
        mut result: StepExecutionResult,
        state: &mut RunState,
        options: &RunOptions,
        mode: StepMode,
    ) {
        match mode {
            // Resultado fresco substitui o cache com fromCache=false.
            StepMode::Refresh { .. } => result.from_cache = false,
            _ => {
                if step.cacheable {
                    result.from_cache = true;
                }
            }
        }

        state.executed_at.insert(step.id, Instant::now());
        state.result_cache.insert(step.id, result.clone());

        if matches!(mode, StepMode::TopLevel) {
            self.emit(
                options,
                RunEvent::StepComplete {
                    result: Box::new(result),
                },
            );
        }
    }

    /// Emite o evento `input-required` e bloqueia no rendezvous quando o
    /// step ainda precisa de valores manuais.
    async fn prompt_if_needed(
        &self,
        step: &TestStep,
        prepared: &PreparedExecution,
        state: &mut RunState,
        options: &RunOptions,
        mode: StepMode,
    ) -> Result<(), String> {
        if options.non_interactive {
            return Ok(());
        }
        let Some(registry) = &options.registry else {
            return Ok(());
        };

        let prompt_fields = match mode {
            StepMode::Refresh {
                reuse_manual_input: true,
            } => return Ok(()),
            StepMode::Refresh {
                reuse_manual_input: false,
            } => PromptFields::AllWithCached,
            _ => PromptFields::MissingOnly,
        };

        let fields = manual_fields(step, prepared, state, prompt_fields);
        if fields.is_empty() {
            return Ok(());
        }

        // O rendezvous abre ANTES do evento: um chamador rápido pode
        // responder assim que o evento chega.
        let receiver = registry
            .request_input(&options.run_id)
            .map_err(|e| e.to_string())?;
        self.emit(
            options,
            RunEvent::InputRequired {
                run_id: options.run_id.clone(),
                step_id: step.id,
                step_name: step.name.clone(),
                fields,
            },
        );
        match receiver.await {
            Ok(Ok(values)) => {
                state.manual_inputs.extend(values);
                Ok(())
            }
            Ok(Err(reason)) => Err(reason),
            // Sender dropado: a execução foi desregistrada no meio.
            Err(_) => Err("cancelled by caller".to_string()),
        }
    }

    /// Motivo do cancelamento registrado para esta execução, se houver.
    fn cancellation(&self, options: &RunOptions) -> Option<String> {
        options
            .registry
            .as_ref()
            .and_then(|registry| registry.cancel_reason(&options.run_id))
    }

    fn emit(&self, options: &RunOptions, event: RunEvent) {
        if let Some(registry) = &options.registry {
            registry.emit(&options.run_id, event);
        }
    }
}

// ============================================================================
// APOIO AO LAÇO
// ============================================================================

fn record_cancelled_step(
    step: &TestStep,
    state: &mut RunState,
    recorded_order: &mut Vec<i64>,
    reason: &str,
) {
    let mut result = StepExecutionResult::placeholder(step.id, &step.name, StepStatus::Error);
    result.error_message = Some(format!("Run cancelled: {}", reason));
    state.result_cache.insert(step.id, result);
    if !recorded_order.contains(&step.id) {
        recorded_order.push(step.id);
    }
}

/// Fecho de dependências ausentes do cache, em pós-ordem (produtores
/// antes de consumidores).
fn collect_missing(step: &TestStep, prepared: &PreparedExecution, state: &RunState) -> Vec<i64> {
    fn visit(
        step: &TestStep,
        prepared: &PreparedExecution,
        state: &RunState,
        order: &mut Vec<i64>,
        visiting: &mut HashSet<i64>,
    ) {
        for dependency in &step.dependencies {
            let id = dependency.depends_on_step_id;
            if state.result_cache.contains_key(&id) || !visiting.insert(id) {
                continue;
            }
            if let Some(dep_step) = prepared.step_map.get(&id) {
                visit(dep_step, prepared, state, order, visiting);
                order.push(id);
            }
        }
    }

    let mut order = Vec::new();
    let mut visiting = HashSet::new();
    visit(step, prepared, state, &mut order, &mut visiting);
    order
}

/// Dependências que precisam de re-execução, com o `reuse_manual_input`
/// da aresta que disparou o refresh. Pós-ordem: as dependências expiradas
/// do produtor vêm antes dele.
fn collect_refresh(
    step: &TestStep,
    prepared: &PreparedExecution,
    state: &RunState,
    exclude: &HashSet<i64>,
) -> Vec<(i64, bool)> {
    fn visit(
        step: &TestStep,
        prepared: &PreparedExecution,
        state: &RunState,
        exclude: &HashSet<i64>,
        chain: &mut Vec<(i64, bool)>,
        visited: &mut HashSet<i64>,
    ) {
        for dependency in &step.dependencies {
            let id = dependency.depends_on_step_id;
            if exclude.contains(&id) || !visited.insert(id) {
                continue;
            }
            let Some(producer) = prepared.step_map.get(&id) else {
                continue;
            };
            let expired = if !dependency.use_cache {
                true
            } else if producer.cacheable && producer.cache_ttl_seconds > 0 {
                state
                    .executed_at
                    .get(&id)
                    .map_or(false, |at| {
                        at.elapsed() >= Duration::from_secs(producer.cache_ttl_seconds)
                    })
            } else {
                false
            };
            if expired {
                visit(producer, prepared, state, exclude, chain, visited);
                chain.push((id, dependency.reuse_manual_input));
            }
        }
    }

    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    visit(step, prepared, state, exclude, &mut chain, &mut visited);
    chain
}

/// Campos manuais que um step ainda precisa, na ordem em que aparecem.
fn manual_fields(
    step: &TestStep,
    prepared: &PreparedExecution,
    state: &RunState,
    prompt_fields: PromptFields,
) -> Vec<InputField> {
    let mut texts: Vec<&str> = vec![step.url.as_str()];
    if let Some(body) = &step.body {
        texts.push(body);
    }
    texts.extend(step.headers.iter().map(|h| h.value.as_str()));
    texts.extend(step.query_params.iter().map(|q| q.value.as_str()));
    texts.extend(step.form_fields.iter().map(|f| f.value.as_str()));

    let mut warnings = Vec::new();
    let mut fields: Vec<InputField> = Vec::new();
    for text in texts {
        let resolved = placeholder::resolve_except_manual(
            text,
            &prepared.environment,
            &state.extracted,
            &mut warnings,
        );
        for reference in placeholder::scan_manual_inputs(&resolved) {
            if fields.iter().any(|f| f.name == reference.name) {
                continue;
            }
            let cached_value = state.manual_inputs.get(&reference.name).cloned();
            if prompt_fields == PromptFields::MissingOnly && cached_value.is_some() {
                continue;
            }
            fields.push(InputField {
                name: reference.name,
                default_value: reference.default_value,
                cached_value,
            });
        }
    }
    fields
}

/// Varredura não-interativa: defaults de toda a suíte e steps com nome
/// sem default em nenhuma ocorrência.
fn prescan_manual_inputs(
    prepared: &PreparedExecution,
) -> (HashMap<String, String>, HashSet<i64>) {
    let mut defaults: HashMap<String, String> = HashMap::new();
    let mut references: Vec<(i64, String)> = Vec::new();

    for (id, step) in prepared.step_map.iter() {
        let mut texts: Vec<&str> = vec![step.url.as_str()];
        if let Some(body) = &step.body {
            texts.push(body);
        }
        texts.extend(step.headers.iter().map(|h| h.value.as_str()));
        texts.extend(step.query_params.iter().map(|q| q.value.as_str()));
        texts.extend(step.form_fields.iter().map(|f| f.value.as_str()));

        for text in texts {
            for reference in placeholder::scan_manual_inputs(text) {
                if let Some(default) = &reference.default_value {
                    defaults
                        .entry(reference.name.clone())
                        .or_insert_with(|| default.clone());
                }
                references.push((*id, reference.name));
            }
        }
    }

    let skipped: HashSet<i64> = references
        .iter()
        .filter(|(_, name)| !defaults.contains_key(name))
        .map(|(id, _)| *id)
        .collect();

    (defaults, skipped)
}

// ============================================================================
// TESTES
// ============================================================================
