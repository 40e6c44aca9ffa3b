//! # Módulo de Agendamento - Disparo Cron de Suítes
//!
//! Registra um gatilho cron por agendamento ativo e invoca o executor de
//! suítes em modo não-interativo a cada disparo.
//!
//! ## Formato de expressão:
//!
//! Aceita 5 campos (Unix: `min hora dia mês dow`) ou 6 campos (com
//! segundos na frente). Expressões de 5 campos são normalizadas
//! prefixando `0 ` (segundo zero).
//!
//! ## Ciclo de vida:
//!
//! - `register` parseia a expressão e sobe uma task com o laço de
//!   disparo; o handle de cancelamento fica em um mapa por id.
//! - `update` é cancela-o-antigo e registra-o-novo, nunca os dois em
//!   paralelo para o mesmo id.
//! - `remove` cancela e esquece.
//! - Depois de cada disparo o `last_run_at` é gravado e o `next_run_at`
//!   recalculado. Se o agendamento foi desativado ou removido entre o
//!   agendamento do disparo e o início dele, a task encerra sem rodar.
//!
//! Exceções do lado do disparo são logadas e o laço continua: um disparo
//! com erro não mata o agendamento.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::errors::EngineError;
use crate::model::RunSchedule;

// ============================================================================
// EXPRESSÕES CRON
// ============================================================================

/// Normaliza uma expressão de 5 campos prefixando o campo de segundos.
pub fn normalize_cron_expression(expression: &str) -> String {
    let field_count = expression.split_whitespace().count();
    if field_count == 5 {
        format!("0 {}", expression.trim())
    } else {
        expression.trim().to_string()
    }
}

/// Parseia uma expressão cron de 5 ou 6 campos.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule, EngineError> {
    let normalized = normalize_cron_expression(expression);
    cron::Schedule::from_str(&normalized).map_err(|e| EngineError::CronParse {
        expression: expression.to_string(),
        detail: e.to_string(),
    })
}

/// Próximos `count` disparos de uma expressão, em UTC.
pub fn preview(expression: &str, count: usize) -> Result<Vec<DateTime<Utc>>, EngineError> {
    let schedule = parse_cron(expression)?;
    Ok(schedule.upcoming(Utc).take(count).collect())
}

// ============================================================================
// COLABORADORES
// ============================================================================

/// Quem de fato executa a suíte de um agendamento. O binário implementa
/// isso carregando a suíte e o ambiente e invocando o executor em modo
/// não-interativo.
#[async_trait]
pub trait SuiteLauncher: Send + Sync {
    async fn launch(&self, schedule: &RunSchedule) -> anyhow::Result<()>;
}

/// Contabilidade de disparos. A persistência durável é um colaborador
/// externo; o motor só precisa gravar os tempos e consultar se o
/// agendamento segue ativo.
pub trait ScheduleStore: Send + Sync {
    fn is_active(&self, schedule_id: i64) -> bool;
    fn update_times(
        &self,
        schedule_id: i64,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: Option<DateTime<Utc>>,
    );
}

/// Implementação em memória do `ScheduleStore`.
#[derive(Default)]
pub struct InMemoryScheduleStore {
    times: Mutex<HashMap<i64, (Option<DateTime<Utc>>, Option<DateTime<Utc>>)>>,
    deactivated: Mutex<Vec<i64>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deactivate(&self, schedule_id: i64) {
        let mut deactivated = self.deactivated.lock().expect("store lock poisoned");
        if !deactivated.contains(&schedule_id) {
            deactivated.push(schedule_id);
        }
    }

    /// (last_run_at, next_run_at) registrados para um agendamento.
    pub fn times(&self, schedule_id: i64) -> Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        self.times
            .lock()
            .expect("store lock poisoned")
            .get(&schedule_id)
            .copied()
    }
}

impl ScheduleStore for InMemoryScheduleStore {
    fn is_active(&self, schedule_id: i64) -> bool {
        !self
            .deactivated
            .lock()
            .expect("store lock poisoned")
            .contains(&schedule_id)
    }

    fn update_times(
        &self,
        schedule_id: i64,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: Option<DateTime<Utc>>,
    ) {
        let mut times = self.times.lock().expect("store lock poisoned");
        let entry = times.entry(schedule_id).or_insert((None, None));
        if last_run_at.is_some() {
            entry.0 = last_run_at;
        }
        if next_run_at.is_some() {
            entry.1 = next_run_at;
        }
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Registro de gatilhos cron, um por agendamento ativo.
pub struct Scheduler {
    launcher: Arc<dyn SuiteLauncher>,
    store: Arc<dyn ScheduleStore>,
    tasks: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(launcher: Arc<dyn SuiteLauncher>, store: Arc<dyn ScheduleStore>) -> Self {
        Self {
            launcher,
            store,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Registra um agendamento ativo. A expressão é validada antes de
    /// qualquer task subir; agendamentos inativos são ignorados.
    pub fn register(&self, schedule: RunSchedule) -> Result<(), EngineError> {
        if !schedule.active {
            tracing::debug!(schedule_id = schedule.id, "Ignoring inactive schedule");
            return Ok(());
        }
        let parsed = parse_cron(&schedule.cron_expression)?;

        let schedule_id = schedule.id;
        let launcher = Arc::clone(&self.launcher);
        let store = Arc::clone(&self.store);

        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = parsed.upcoming(Utc).next() else {
                    tracing::info!(schedule_id, "Schedule has no future fire times, stopping");
                    break;
                };
                store.update_times(schedule_id, None, Some(next));

                let wait = next - Utc::now();
                if let Ok(wait) = wait.to_std() {
                    tokio::time::sleep(wait).await;
                }

                // Desativado ou removido entre o agendamento do disparo e
                // o início: a task encerra sem rodar.
                if !store.is_active(schedule_id) {
                    tracing::info!(schedule_id, "Schedule deactivated, stopping trigger");
                    break;
                }

                let fired_at = Utc::now();
                tracing::info!(schedule_id, suite_id = schedule.suite_id, "Schedule firing");
                if let Err(e) = launcher.launch(&schedule).await {
                    tracing::error!(schedule_id, error = %e, "Scheduled run failed");
                }
                store.update_times(schedule_id, Some(fired_at), None);
            }
        });

        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        if let Some(previous) = tasks.insert(schedule_id, handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Atualiza um agendamento: cancela o gatilho antigo antes de
    /// registrar o novo.
    pub fn update(&self, schedule: RunSchedule) -> Result<(), EngineError> {
        self.remove(schedule.id);
        self.register(schedule)
    }

    /// Cancela e esquece o gatilho de um agendamento.
    pub fn remove(&self, schedule_id: i64) {
        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        if let Some(handle) = tasks.remove(&schedule_id) {
            handle.abort();
        }
    }

    /// Quantidade de gatilhos registrados.
    pub fn registered_count(&self) -> usize {
        self.tasks.lock().expect("scheduler lock poisoned").len()
    }

    /// Cancela todos os gatilhos.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }
}

// ============================================================================
// TESTES
// ============================================================================
