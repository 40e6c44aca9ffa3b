//! # Módulo de Modelo - Estruturas de Dados do Motor
//!
//! Este módulo define todas as **estruturas de dados** que o motor de
//! orquestração consome e produz: ambientes, suítes, steps com suas
//! coleções filhas, schedules e os resultados de execução.
//!
//! ## Hierarquia de Tipos:
//!
//! ```text
//! Environment
//! ├── EnvironmentVariable[] (variáveis com tipo de valor)
//! ├── DefaultHeader[]       (headers aplicados a todo step)
//! ├── Connector[]           (backends de verificação)
//! └── EnvironmentFile[]     (arquivos para form-data)
//!
//! TestSuite
//! └── TestStep[]
//!     ├── Dependency[]         (arestas do DAG)
//!     ├── ResponseHandler[]    (fluxo de controle por status HTTP)
//!     ├── ExtractVariable[]    (captura de dados da requisição/resposta)
//!     ├── Verification[]       (checagens em backends externos)
//!     │   └── Assertion[]
//!     └── ResponseValidation[] (checagens na própria resposta)
//! ```
//!
//! ## Formato de serialização:
//!
//! O formato de arquivo e de persistência é JSON em camelCase. Os enums
//! serializam em SCREAMING_SNAKE_CASE ("FORM_DATA", "ISO_TIMESTAMP"),
//! que é o vocabulário que a superfície administrativa fala.
//!
//! As coleções filhas de um step são listas independentes unidas em
//! memória pelo id do step. Filhos nunca guardam ponteiros de volta para
//! o pai, então a serialização é trivial.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// AMBIENTE
// ============================================================================

/// Tipo do valor de uma variável de ambiente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    /// Valor literal, usado como está.
    #[default]
    Static,
    /// Cada expansão gera um UUID v4 novo.
    Uuid,
    /// Cada expansão gera o instante atual em ISO-8601 com offset, em UTC.
    IsoTimestamp,
}

/// Tipo do valor de um header padrão do ambiente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeaderValueType {
    /// Literal com placeholders resolvidos.
    #[default]
    Static,
    /// O valor é o NOME de uma variável de ambiente a resolver.
    Variable,
    /// UUID v4 gerado na hora.
    Uuid,
    /// Instante atual em ISO-8601 UTC.
    IsoTimestamp,
}

/// Variável de ambiente.
///
/// A chave é única dentro do ambiente (invariante checada ao salvar).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentVariable {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub value_type: ValueType,
    /// Valores secretos não devem aparecer em logs.
    #[serde(default)]
    pub secret: bool,
}

/// Header aplicado por padrão a todos os steps do ambiente.
///
/// Steps podem desabilitar headers individuais via
/// `TestStep::disabled_default_headers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultHeader {
    pub key: String,
    #[serde(default)]
    pub value_type: HeaderValueType,
    #[serde(default)]
    pub value: String,
}

/// Backend de infraestrutura usado pelas verificações.
///
/// O `config` é um blob opaco para o motor: só o driver do tipo
/// correspondente sabe interpretá-lo (host, credenciais, tópico, etc.).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    /// Nome único dentro do ambiente.
    pub name: String,
    #[serde(rename = "type")]
    pub connector_type: crate::connectors::ConnectorType,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// Arquivo armazenado no ambiente, referenciável em campos form-data
/// via `${FILE:fileKey}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentFile {
    /// Chave única dentro do ambiente.
    pub file_key: String,
    pub file_name: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Bytes do arquivo, serializados como base64 no JSON.
    #[serde(
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64",
        default
    )]
    pub content: Vec<u8>,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(bytes))
}

fn deserialize_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    BASE64.decode(encoded).map_err(serde::de::Error::custom)
}

/// Ambiente de execução: URL base, variáveis, headers padrão, conectores
/// e arquivos.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: i64,
    pub name: String,
    /// URL prefixada a URLs de step que começam com `/`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub variables: Vec<EnvironmentVariable>,
    #[serde(default)]
    pub default_headers: Vec<DefaultHeader>,
    #[serde(default)]
    pub connectors: Vec<Connector>,
    #[serde(default)]
    pub files: Vec<EnvironmentFile>,
}

impl Environment {
    /// Busca uma variável pela chave.
    pub fn variable(&self, key: &str) -> Option<&EnvironmentVariable> {
        self.variables.iter().find(|v| v.key == key)
    }

    /// Invariantes de unicidade do ambiente: chave de variável, nome de
    /// conector e chave de arquivo não podem repetir.
    pub fn validate(&self) -> Result<(), crate::errors::EngineError> {
        let mut seen = std::collections::HashSet::new();
        for variable in &self.variables {
            if !seen.insert(&variable.key) {
                return Err(crate::errors::EngineError::validation(format!(
                    "Duplicate variable key '{}' in environment '{}'",
                    variable.key, self.name
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for connector in &self.connectors {
            if !seen.insert(&connector.name) {
                return Err(crate::errors::EngineError::validation(format!(
                    "Duplicate connector name '{}' in environment '{}'",
                    connector.name, self.name
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for file in &self.files {
            if !seen.insert(&file.file_key) {
                return Err(crate::errors::EngineError::validation(format!(
                    "Duplicate file key '{}' in environment '{}'",
                    file.file_key, self.name
                )));
            }
        }
        Ok(())
    }

    /// Busca um conector pelo nome.
    pub fn connector(&self, name: &str) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.name == name)
    }

    /// Busca um arquivo pela chave.
    pub fn file(&self, file_key: &str) -> Option<&EnvironmentFile> {
        self.files.iter().find(|f| f.file_key == file_key)
    }
}

// ============================================================================
// SUÍTE E STEP
// ============================================================================

/// Método HTTP suportado pelo motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }
}

/// Tipo do corpo da requisição.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BodyType {
    #[default]
    None,
    Json,
    FormData,
}

/// Template de header do step. O valor passa pelo resolvedor de
/// placeholders antes do envio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderTemplate {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Template de parâmetro de query string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParamTemplate {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Tipo de um campo de formulário multipart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormFieldType {
    #[default]
    Text,
    File,
}

/// Campo de um corpo FORM_DATA.
///
/// Campos `file` (ou cujo valor é exatamente `${FILE:chave}`) viram
/// partes de arquivo usando o arquivo do ambiente; os demais viram
/// partes de texto com placeholders resolvidos.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "type", default)]
    pub field_type: FormFieldType,
}

/// Dependência entre steps: uma aresta produtor → consumidor do DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub depends_on_step_id: i64,
    /// false força re-execução do produtor mesmo com cache válido.
    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// true reaproveita silenciosamente os inputs manuais já coletados
    /// quando o produtor precisa ser re-executado.
    #[serde(default)]
    pub reuse_manual_input: bool,
}

fn default_true() -> bool {
    true
}

/// Ação tomada quando um handler de resposta casa com o status HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandlerAction {
    Success,
    Error,
    Retry,
    FireSideEffect,
}

/// Handler de resposta: mapeia um código de status (exato ou curinga)
/// para uma ação de fluxo de controle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseHandler {
    /// "200", "2xx", "50x". Dígito `x` casa com qualquer dígito.
    pub match_code: String,
    pub action: HandlerAction,
    /// Step disparado fire-and-forget quando a ação é FIRE_SIDE_EFFECT.
    #[serde(default)]
    pub side_effect_step_id: Option<i64>,
    /// Número de re-tentativas quando a ação é RETRY.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub retry_delay_seconds: u64,
    /// Menor prioridade vence quando mais de um handler casa.
    #[serde(default)]
    pub priority: i32,
}

/// Fonte de uma extração de variável.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractionSource {
    ResponseBody,
    ResponseHeader,
    StatusCode,
    RequestBody,
    RequestHeader,
    QueryParam,
    RequestUrl,
}

/// Regra de extração: captura um valor da requisição ou da resposta e o
/// publica como `"<nomeDoStep>.<variableName>"` no namespace da execução.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractVariable {
    pub variable_name: String,
    /// Caminho JSON para fontes de corpo; nome da chave para header,
    /// query param e afins.
    #[serde(default)]
    pub json_path: String,
    pub source: ExtractionSource,
}

/// Operador de comparação compartilhado por assertions de verificação e
/// validações de resposta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssertionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    Regex,
    Gt,
    Lt,
    Gte,
    Lte,
    Exists,
    NotExists,
}

/// Assertion de uma verificação: caminho JSON sobre o resultado bruto do
/// conector, operador e valor esperado.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    #[serde(default)]
    pub json_path: String,
    pub operator: AssertionOperator,
    #[serde(default)]
    pub expected_value: String,
}

/// Verificação de efeito colateral em um backend externo.
///
/// Com `pre_listen=true` o conector começa a consumir ANTES da chamada
/// HTTP do step, para enxergar mensagens produzidas por ela.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub connector_name: String,
    #[serde(default)]
    pub query: String,
    /// Janela de escuta do pre-listener, ou atraso pós-chamada quando
    /// não há pre-listen.
    #[serde(default)]
    pub timeout_seconds: u64,
    /// Timeout da query em si contra o backend.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,
    #[serde(default)]
    pub pre_listen: bool,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

fn default_query_timeout() -> u64 {
    10
}

/// Tipo de validação aplicada à resposta HTTP do próprio step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationType {
    Header,
    BodyExactMatch,
    BodyField,
    BodyDataType,
}

/// Modo de comparação do BODY_EXACT_MATCH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchMode {
    /// Igualdade estrutural completa.
    #[default]
    Strict,
    /// Todo nó do esperado deve existir e casar no obtido; o obtido pode
    /// ser um superconjunto. Arrays comparam sem ordem, com tamanho igual.
    Flexible,
    /// Exige apenas a forma: chaves de objeto e posições de array do
    /// esperado existem no obtido, valores primitivos são ignorados.
    Structure,
}

/// Validação de resposta. Os campos usados dependem do tipo:
///
/// - HEADER: `header_name` + `operator` + `expected_value`
/// - BODY_FIELD: `json_path` + `operator` + `expected_value`
/// - BODY_EXACT_MATCH: `expected_value` (JSON) + `match_mode`
/// - BODY_DATA_TYPE: `json_path` + `expected_value` (nome do tipo)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseValidation {
    pub validation_type: ValidationType,
    #[serde(default)]
    pub header_name: Option<String>,
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default)]
    pub operator: Option<AssertionOperator>,
    #[serde(default)]
    pub expected_value: Option<String>,
    #[serde(default)]
    pub match_mode: Option<MatchMode>,
}

/// Um step de teste: uma chamada HTTP mais os metadados de extração,
/// validação, verificação e fluxo de controle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    pub id: i64,
    pub suite_id: i64,
    pub name: String,
    pub method: HttpMethod,
    /// Template de URL. Caminhos começando com `/` são prefixados pela
    /// base do ambiente.
    pub url: String,
    #[serde(default)]
    pub headers: Vec<HeaderTemplate>,
    #[serde(default)]
    pub query_params: Vec<QueryParamTemplate>,
    #[serde(default)]
    pub body_type: BodyType,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub form_fields: Vec<FormField>,
    /// Resultado reutilizável por dependentes dentro da mesma execução.
    #[serde(default)]
    pub cacheable: bool,
    /// TTL do cache em segundos. 0 = nunca expira dentro da execução.
    #[serde(default)]
    pub cache_ttl_seconds: u64,
    /// Steps somente-dependência ficam fora da ordem de execução e são
    /// materializados sob demanda.
    #[serde(default)]
    pub dependency_only: bool,
    /// Chaves de headers padrão do ambiente que este step não usa.
    #[serde(default)]
    pub disabled_default_headers: Vec<String>,
    /// Desempate da ordenação topológica. Menor roda antes.
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub response_handlers: Vec<ResponseHandler>,
    #[serde(default)]
    pub extract_variables: Vec<ExtractVariable>,
    #[serde(default)]
    pub verifications: Vec<Verification>,
    #[serde(default)]
    pub response_validations: Vec<ResponseValidation>,
}

/// Suíte de testes: coleção ordenada de steps compartilhando um DAG de
/// dependências.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuite {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub default_environment_id: Option<i64>,
    #[serde(default)]
    pub steps: Vec<TestStep>,
}

// ============================================================================
// EXECUÇÃO: RUN E SCHEDULE
// ============================================================================

/// Origem de uma execução.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Manual,
    Scheduled,
}

/// Status de uma execução de suíte.
///
/// RUNNING é um sentinela de execução em andamento, nunca um status
/// terminal de resultado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Success,
    PartialFailure,
    Failure,
    Cancelled,
}

/// Registro persistível de uma execução.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    pub id: String,
    pub suite_id: i64,
    pub environment_id: i64,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub schedule_id: Option<i64>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_duration_ms: u64,
    /// `SuiteExecutionResult` serializado como JSON.
    #[serde(default)]
    pub result_data: Option<String>,
}

/// Agendamento cron de uma (suíte, ambiente).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSchedule {
    pub id: i64,
    pub suite_id: i64,
    pub environment_id: i64,
    /// Expressão de 5 campos (Unix) ou 6 campos (com segundos).
    pub cron_expression: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

// ============================================================================
// RESULTADOS
// ============================================================================

/// Status final de um step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Success,
    /// Sucesso alcançado depois de pelo menos uma re-tentativa.
    Retried,
    Error,
    /// Pulado porque uma dependência não teve sucesso, ou porque uma
    /// execução agendada não tinha valor para um input manual.
    Skipped,
    /// HTTP ok, mas alguma validação ou verificação falhou.
    VerificationFailed,
}

impl StepStatus {
    /// Indica que a chamada HTTP em si foi bem sucedida.
    pub fn is_http_success(&self) -> bool {
        matches!(self, Self::Success | Self::Retried)
    }
}

/// Status de uma verificação individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Passed,
    Failed,
    /// Conector inalcançável, query estourou timeout ou driver ausente.
    Error,
}

/// Resultado de uma assertion individual de verificação.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub json_path: String,
    pub operator: AssertionOperator,
    pub expected_value: String,
    pub actual_value: String,
    pub passed: bool,
}

/// Resultado de uma verificação.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub connector_name: String,
    pub query: String,
    pub status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub assertion_results: Vec<AssertionResult>,
}

/// Resultado de uma validação de resposta.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub validation_type: ValidationType,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Resultado da execução de um step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionResult {
    pub step_id: i64,
    pub step_name: String,
    pub status: StepStatus,
    /// 0 quando a falha foi de transporte (sem resposta).
    pub response_code: u16,
    #[serde(default)]
    pub response_body: String,
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    pub duration_ms: u64,
    /// Quantidade de tentativas HTTP feitas (1 sem retry).
    #[serde(default)]
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default)]
    pub extracted_variables: HashMap<String, String>,
    #[serde(default)]
    pub validation_results: Vec<ValidationOutcome>,
    #[serde(default)]
    pub verification_results: Vec<VerificationResult>,
    /// Referências `{{step.var}}` que não resolveram. Nunca fatais.
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub request_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(default)]
    pub request_headers: HashMap<String, String>,
    #[serde(default)]
    pub request_query_params: HashMap<String, String>,
}

impl StepExecutionResult {
    /// Resultado mínimo para steps que nem chegaram a executar.
    pub fn placeholder(step_id: i64, step_name: &str, status: StepStatus) -> Self {
        Self {
            step_id,
            step_name: step_name.to_string(),
            status,
            response_code: 0,
            response_body: String::new(),
            response_headers: HashMap::new(),
            duration_ms: 0,
            attempts: 0,
            error_message: None,
            from_cache: false,
            extracted_variables: HashMap::new(),
            validation_results: Vec::new(),
            verification_results: Vec::new(),
            warnings: Vec::new(),
            request_url: String::new(),
            request_body: None,
            request_headers: HashMap::new(),
            request_query_params: HashMap::new(),
        }
    }
}

/// Resumo estatístico de uma execução de suíte.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteSummary {
    pub total_steps: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub verification_failed: usize,
}

impl SuiteSummary {
    pub fn from_steps(steps: &[StepExecutionResult]) -> Self {
        Self {
            total_steps: steps.len(),
            succeeded: steps.iter().filter(|s| s.status.is_http_success()).count(),
            failed: steps
                .iter()
                .filter(|s| s.status == StepStatus::Error)
                .count(),
            skipped: steps
                .iter()
                .filter(|s| s.status == StepStatus::Skipped)
                .count(),
            verification_failed: steps
                .iter()
                .filter(|s| s.status == StepStatus::VerificationFailed)
                .count(),
        }
    }
}

/// Resultado completo da execução de uma suíte. É esta árvore,
/// serializada como JSON, que vira `TestRun::result_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteExecutionResult {
    pub run_id: String,
    pub suite_id: i64,
    pub suite_name: String,
    pub environment_id: i64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub summary: SuiteSummary,
    pub steps: Vec<StepExecutionResult>,
}

impl RunStatus {
    /// Consolida o status da execução a partir dos steps.
    ///
    /// FAILURE quando nenhum step teve sucesso HTTP (inclusive quando a
    /// lista está vazia); SUCCESS quando houve sucesso e nenhuma falha;
    /// PARTIAL_FAILURE quando os dois convivem.
    pub fn from_steps(steps: &[StepExecutionResult]) -> Self {
        let any_success = steps.iter().any(|s| s.status.is_http_success());
        let any_failure = steps.iter().any(|s| {
            matches!(s.status, StepStatus::Error | StepStatus::VerificationFailed)
        });

        if !any_success {
            Self::Failure
        } else if any_failure {
            Self::PartialFailure
        } else {
            Self::Success
        }
    }
}

// ============================================================================
// EVENTOS DE EXECUÇÃO
// ============================================================================

/// Campo pedido em um evento `input-required`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputField {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Valor já coletado nesta execução, oferecido para reaproveitamento.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_value: Option<String>,
}

/// Eventos emitidos para o chamador durante uma execução interativa.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum RunEvent {
    RunStarted {
        #[serde(rename = "runId")]
        run_id: String,
    },
    StepComplete {
        #[serde(rename = "stepExecutionResult")]
        result: Box<StepExecutionResult>,
    },
    InputRequired {
        #[serde(rename = "runId")]
        run_id: String,
        #[serde(rename = "stepId")]
        step_id: i64,
        #[serde(rename = "stepName")]
        step_name: String,
        fields: Vec<InputField>,
    },
    RunComplete {
        #[serde(rename = "suiteExecutionResult")]
        result: Box<SuiteExecutionResult>,
    },
    RunError {
        message: String,
    },
}

// ============================================================================
// TESTES
// ============================================================================
