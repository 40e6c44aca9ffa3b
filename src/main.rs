//! # Conductor - Motor de Orquestração de Testes de API
//!
//! Ponto de entrada do binário. O Conductor executa suítes de steps HTTP
//! que formam um DAG de dependências de dados, propaga valores extraídos
//! entre steps, valida respostas, confere efeitos colaterais em backends
//! externos e re-executa suítes em agendamentos cron.
//!
//! ## O que este arquivo faz?
//!
//! 1. **Processa a linha de comando** com a biblioteca `clap`
//! 2. **Carrega** os arquivos de suíte, ambiente e agendamentos
//! 3. **Inicializa a telemetria** (tracing e, opcionalmente, OTLP)
//! 4. **Dirige a execução**: interativa (com prompts no terminal),
//!    não-interativa ou agendada
//! 5. **Serializa o resultado** e define o código de saída
//!
//! ## Exemplos de uso:
//!
//! ```bash
//! # Executa uma suíte interativamente
//! conductor run --suite smoke.json --environment staging.json
//!
//! # Só o prefixo mínimo para executar o step 7
//! conductor run --suite smoke.json --environment staging.json --target 7
//!
//! # Sobe o daemon de agendamentos
//! conductor schedule --schedules schedules.json \
//!     --suite smoke.json --environment staging.json
//!
//! # Próximos disparos de uma expressão cron
//! conductor preview-cron "*/5 * * * *"
//! ```

// ============================================================================
// DECLARAÇÃO DE MÓDULOS
// ============================================================================

/// Gateway de conectores: a única porta para backends de infraestrutura.
mod connectors;

/// Resolução de dependências e ordenação topológica.
mod dag;

/// Taxonomia de erros do motor.
mod errors;

/// Executores de step e de suíte.
mod executor;

/// Handlers de resposta: casamento de códigos e política de retry.
mod handlers;

/// Caminhamento de documentos JSON.
mod jsonpath;

/// Carregamento de arquivos de suíte, ambiente e agendamento.
mod loader;

/// Estruturas de dados: ambientes, suítes, steps, resultados.
mod model;

/// Resolvedor de placeholders (${env}, {{step.var}}, #{manual}).
mod placeholder;

/// Registro de execuções em andamento e rendezvous de input manual.
mod registry;

/// Agendador cron.
mod scheduler;

/// Inicialização de logging e OTLP.
mod telemetry;

/// Validações de resposta e operadores de comparação.
mod validation;

/// Verificações em backends externos e pre-listeners.
mod verification;

// ============================================================================
// IMPORTS
// ============================================================================

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use uuid::Uuid;

use connectors::ConnectorGateway;
use dag::PreparedExecution;
use executor::suite::{RunOptions, SuiteRunner};
use model::{
    Environment, InputField, RunEvent, RunSchedule, RunStatus, SuiteExecutionResult, TestRun,
    TestSuite, TriggerType,
};
use registry::RunRegistry;
use scheduler::{InMemoryScheduleStore, Scheduler, SuiteLauncher};
use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Conductor - motor de orquestração de testes de API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Executa uma suíte contra um ambiente.
    Run {
        /// Arquivo JSON da suíte.
        #[arg(short, long)]
        suite: PathBuf,

        /// Arquivo JSON do ambiente.
        #[arg(short, long)]
        environment: PathBuf,

        /// Arquivo para salvar o resultado serializado (senão, stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Executa só o step alvo e seus pré-requisitos.
        #[arg(long)]
        target: Option<i64>,

        /// Sem prompts: inputs manuais resolvem pelos defaults e steps
        /// sem default são pulados.
        #[arg(long, default_value = "false")]
        non_interactive: bool,

        /// Id da execução (UUID gerado quando omitido).
        #[arg(long)]
        run_id: Option<String>,

        /// Exporta traces via OTLP.
        #[arg(long, default_value = "false")]
        otel: bool,

        /// Endpoint do coletor OTLP.
        #[arg(long)]
        otel_endpoint: Option<String>,

        /// Só erros críticos no stderr.
        #[arg(long, short = 'q', default_value = "false")]
        silent: bool,

        /// Logs detalhados de debug.
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,
    },

    /// Sobe o daemon de agendamentos e roda até Ctrl-C.
    Schedule {
        /// Arquivo JSON com a lista de agendamentos.
        #[arg(long)]
        schedules: PathBuf,

        /// Arquivos de suíte referenciados pelos agendamentos.
        #[arg(short, long)]
        suite: Vec<PathBuf>,

        /// Arquivos de ambiente referenciados pelos agendamentos.
        #[arg(short, long)]
        environment: Vec<PathBuf>,

        /// Exporta traces via OTLP.
        #[arg(long, default_value = "false")]
        otel: bool,

        /// Endpoint do coletor OTLP.
        #[arg(long)]
        otel_endpoint: Option<String>,
    },

    /// Mostra os próximos cinco disparos de uma expressão cron.
    PreviewCron {
        /// Expressão de 5 campos (Unix) ou 6 campos (com segundos).
        expression: String,
    },
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            suite,
            environment,
            output,
            target,
            non_interactive,
            run_id,
            otel,
            otel_endpoint,
            silent,
            verbose,
        } => {
            setup_telemetry(otel, otel_endpoint, silent, verbose);
            let exit_code =
                run_command(suite, environment, output, target, non_interactive, run_id).await;
            shutdown_telemetry();
            std::process::exit(exit_code);
        }
        Commands::Schedule {
            schedules,
            suite,
            environment,
            otel,
            otel_endpoint,
        } => {
            setup_telemetry(otel, otel_endpoint, false, false);
            let exit_code = schedule_command(schedules, suite, environment).await;
            shutdown_telemetry();
            std::process::exit(exit_code);
        }
        Commands::PreviewCron { expression } => match scheduler::preview(&expression, 5) {
            Ok(times) => {
                for time in times {
                    println!("{}", time.to_rfc3339());
                }
            }
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
    }
}

fn setup_telemetry(otel: bool, otel_endpoint: Option<String>, silent: bool, verbose: bool) {
    let mut config = TelemetryConfig::from_env();
    config.log_level = if silent {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    if otel {
        if let Some(endpoint) = otel_endpoint {
            config.otlp_endpoint = Some(endpoint);
        } else if config.otlp_endpoint.is_none() {
            config.otlp_endpoint = Some("http://localhost:4317".to_string());
        }
    } else {
        config.otlp_endpoint = None;
    }

    if let Err(e) = init_telemetry(config) {
        eprintln!("Warning: failed to initialize telemetry: {}", e);
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

// ============================================================================
// COMANDO RUN
// ============================================================================

async fn run_command(
    suite_path: PathBuf,
    environment_path: PathBuf,
    output: Option<PathBuf>,
    target: Option<i64>,
    non_interactive: bool,
    run_id: Option<String>,
) -> i32 {
    let suite = match loader::load_suite(&suite_path) {
        Ok(suite) => suite,
        Err(e) => {
            error!(error = %e, "Failed to load suite");
            return 1;
        }
    };
    let environment = match loader::load_environment(&environment_path) {
        Ok(environment) => environment,
        Err(e) => {
            error!(error = %e, "Failed to load environment");
            return 1;
        }
    };

    let prepared = match target {
        Some(step_id) => dag::prepare_subgraph(&suite, environment, step_id),
        None => dag::prepare(&suite, environment),
    };
    let prepared = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            error!(error = %e, "Suite preparation failed");
            return 1;
        }
    };

    let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(run_id = %run_id, suite = %prepared.suite_name, "Starting run");

    let gateway = Arc::new(ConnectorGateway::new());
    let runner = Arc::new(SuiteRunner::new(gateway));

    let result = if non_interactive {
        let options = RunOptions {
            run_id: run_id.clone(),
            registry: None,
            non_interactive: true,
        };
        runner.run(&prepared, &options).await
    } else {
        interactive_run(runner, Arc::new(prepared), run_id.clone()).await
    };

    // Registro da execução, como a camada de persistência o gravaria.
    let test_run = TestRun {
        id: run_id,
        suite_id: result.suite_id,
        environment_id: result.environment_id,
        trigger_type: TriggerType::Manual,
        schedule_id: None,
        status: result.status,
        started_at: result.started_at,
        completed_at: Some(result.completed_at),
        total_duration_ms: result.total_duration_ms,
        result_data: serde_json::to_string(&result).ok(),
    };
    info!(
        run_id = %test_run.id,
        status = ?test_run.status,
        duration_ms = test_run.total_duration_ms,
        "Run recorded"
    );

    emit_report(&result, output.as_deref());

    if result.status == RunStatus::Success {
        0
    } else {
        1
    }
}

/// Dirige uma execução interativa: consome o stream de eventos e
/// responde aos prompts de input manual pelo terminal.
async fn interactive_run(
    runner: Arc<SuiteRunner>,
    prepared: Arc<PreparedExecution>,
    run_id: String,
) -> SuiteExecutionResult {
    let registry = Arc::new(RunRegistry::new());
    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    registry.register(&run_id, Some(events_tx));

    let options = RunOptions {
        run_id: run_id.clone(),
        registry: Some(Arc::clone(&registry)),
        non_interactive: false,
    };

    let run_task = tokio::spawn({
        let runner = Arc::clone(&runner);
        let prepared = Arc::clone(&prepared);
        async move { runner.run(&prepared, &options).await }
    });

    while let Some(event) = events_rx.recv().await {
        match event {
            RunEvent::InputRequired { fields, step_name, .. } => {
                eprintln!("Step '{}' needs manual input:", step_name);
                let values = prompt_for_fields(&fields);
                if let Err(e) = registry.submit_input(&run_id, values) {
                    error!(error = %e, "Failed to submit manual input");
                }
            }
            RunEvent::StepComplete { result } => {
                info!(
                    step = %result.step_name,
                    status = ?result.status,
                    code = result.response_code,
                    duration_ms = result.duration_ms,
                    "Step finished"
                );
            }
            RunEvent::RunError { message } => {
                error!(message = %message, "Run error");
            }
            RunEvent::RunComplete { .. } => break,
            RunEvent::RunStarted { .. } => {}
        }
    }

    let result = match run_task.await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Run task failed");
            std::process::exit(1);
        }
    };
    registry.unregister(&run_id);
    result
}

/// Lê os valores pedidos no terminal. Linha vazia aceita o valor já
/// coletado nesta execução ou o default do placeholder.
fn prompt_for_fields(fields: &[InputField]) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for field in fields {
        let hint = field.cached_value.as_ref().or(field.default_value.as_ref());
        match hint {
            Some(hint) => eprint!("  {} [{}]: ", field.name, hint),
            None => eprint!("  {}: ", field.name),
        }
        let _ = std::io::stderr().flush();

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            line.clear();
        }
        let typed = line.trim();
        let value = if typed.is_empty() {
            hint.cloned().unwrap_or_default()
        } else {
            typed.to_string()
        };
        values.insert(field.name.clone(), value);
    }
    values
}

fn emit_report(result: &SuiteExecutionResult, output: Option<&std::path::Path>) {
    let json = match serde_json::to_string_pretty(result) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "Failed to serialize run result");
            return;
        }
    };
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &json) {
                error!(error = %e, path = %path.display(), "Failed to write run result");
            } else {
                info!(path = %path.display(), "Run result saved");
            }
        }
        None => println!("{}", json),
    }
}

// ============================================================================
// COMANDO SCHEDULE
// ============================================================================

/// Launcher que resolve suíte e ambiente nos arquivos carregados e
/// invoca o executor em modo não-interativo.
struct FileSuiteLauncher {
    suites: HashMap<i64, TestSuite>,
    environments: HashMap<i64, Environment>,
    runner: SuiteRunner,
}

#[async_trait]
impl SuiteLauncher for FileSuiteLauncher {
    async fn launch(&self, schedule: &RunSchedule) -> anyhow::Result<()> {
        let suite = self
            .suites
            .get(&schedule.suite_id)
            .ok_or_else(|| anyhow!("suite {} is not loaded", schedule.suite_id))?;
        let environment = self
            .environments
            .get(&schedule.environment_id)
            .cloned()
            .ok_or_else(|| anyhow!("environment {} is not loaded", schedule.environment_id))?;

        let prepared = dag::prepare(suite, environment)?;
        let run_id = Uuid::new_v4().to_string();
        let options = RunOptions {
            run_id: run_id.clone(),
            registry: None,
            non_interactive: true,
        };
        let result = self.runner.run(&prepared, &options).await;

        let test_run = TestRun {
            id: run_id,
            suite_id: result.suite_id,
            environment_id: result.environment_id,
            trigger_type: TriggerType::Scheduled,
            schedule_id: Some(schedule.id),
            status: result.status,
            started_at: result.started_at,
            completed_at: Some(result.completed_at),
            total_duration_ms: result.total_duration_ms,
            result_data: serde_json::to_string(&result).ok(),
        };
        info!(
            run_id = %test_run.id,
            schedule_id = schedule.id,
            status = ?test_run.status,
            succeeded = result.summary.succeeded,
            failed = result.summary.failed,
            "Scheduled run recorded"
        );
        Ok(())
    }
}

async fn schedule_command(
    schedules_path: PathBuf,
    suite_paths: Vec<PathBuf>,
    environment_paths: Vec<PathBuf>,
) -> i32 {
    let schedules = match loader::load_schedules(&schedules_path) {
        Ok(schedules) => schedules,
        Err(e) => {
            error!(error = %e, "Failed to load schedules");
            return 1;
        }
    };

    let mut suites = HashMap::new();
    for path in &suite_paths {
        match loader::load_suite(path) {
            Ok(suite) => {
                suites.insert(suite.id, suite);
            }
            Err(e) => {
                error!(error = %e, "Failed to load suite");
                return 1;
            }
        }
    }
    let mut environments = HashMap::new();
    for path in &environment_paths {
        match loader::load_environment(path) {
            Ok(environment) => {
                environments.insert(environment.id, environment);
            }
            Err(e) => {
                error!(error = %e, "Failed to load environment");
                return 1;
            }
        }
    }

    let launcher = Arc::new(FileSuiteLauncher {
        suites,
        environments,
        runner: SuiteRunner::new(Arc::new(ConnectorGateway::new())),
    });
    let store = Arc::new(InMemoryScheduleStore::new());
    let scheduler = Scheduler::new(launcher, store);

    let mut registered = 0usize;
    for schedule in schedules {
        let schedule_id = schedule.id;
        match scheduler.register(schedule) {
            Ok(()) => registered += 1,
            Err(e) => error!(schedule_id, error = %e, "Failed to register schedule"),
        }
    }
    info!(registered, "Scheduler started, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to wait for shutdown signal");
    }
    scheduler.shutdown();
    info!("Scheduler stopped");
    0
}
