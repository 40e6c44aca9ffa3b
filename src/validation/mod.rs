//! # Módulo de Validação de Resposta
//!
//! Implementa as quatro classes de validação aplicadas à resposta HTTP de
//! um step e os operadores de comparação compartilhados com as assertions
//! de verificação.
//!
//! ## Classes de validação:
//!
//! | Tipo              | O que compara                                   |
//! |-------------------|-------------------------------------------------|
//! | HEADER            | Valor de um header (busca case-insensitive)     |
//! | BODY_FIELD        | Valor em um caminho JSON do corpo               |
//! | BODY_EXACT_MATCH  | Corpo inteiro sob um modo de comparação         |
//! | BODY_DATA_TYPE    | Tipo do nó em um caminho JSON                   |
//!
//! ## Modos do BODY_EXACT_MATCH:
//!
//! - **STRICT**: igualdade estrutural completa dos dois JSONs.
//! - **FLEXIBLE**: todo nó presente no esperado precisa existir e casar
//!   no obtido; o obtido pode ter campos a mais. Arrays comparam sem
//!   ordem, mas com o mesmo tamanho.
//! - **STRUCTURE**: só exige a forma. Chaves de objeto e posições de
//!   array do esperado precisam existir no obtido; valores primitivos
//!   são ignorados.
//!
//! ## Operadores numéricos:
//!
//! GT/LT/GTE/LTE tentam parsear os dois lados como double. Se algum lado
//! não parseia, a comparação cai para ordem lexical.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use crate::jsonpath;
use crate::model::{AssertionOperator, MatchMode, ResponseValidation, ValidationOutcome, ValidationType};

// ============================================================================
// OPERADORES COMPARTILHADOS
// ============================================================================

/// Compara dois valores em forma de string sob um operador.
///
/// É o mesmo motor usado pelas assertions de verificação: os dois mundos
/// falam a mesma língua de operadores.
pub fn compare(actual: &str, operator: AssertionOperator, expected: &str) -> bool {
    match operator {
        AssertionOperator::Equals => actual == expected,
        AssertionOperator::NotEquals => actual != expected,
        AssertionOperator::Contains => actual.contains(expected),
        AssertionOperator::NotContains => !actual.contains(expected),
        AssertionOperator::Regex => match Regex::new(expected) {
            Ok(re) => re.is_match(actual),
            Err(_) => {
                tracing::warn!(pattern = %expected, "Invalid regex pattern in assertion");
                false
            }
        },
        AssertionOperator::Gt => numeric_cmp(actual, expected, |o| o == std::cmp::Ordering::Greater),
        AssertionOperator::Lt => numeric_cmp(actual, expected, |o| o == std::cmp::Ordering::Less),
        AssertionOperator::Gte => numeric_cmp(actual, expected, |o| o != std::cmp::Ordering::Less),
        AssertionOperator::Lte => numeric_cmp(actual, expected, |o| o != std::cmp::Ordering::Greater),
        AssertionOperator::Exists => !actual.is_empty(),
        AssertionOperator::NotExists => actual.is_empty(),
    }
}

/// Comparação numérica com queda para ordem lexical quando algum lado
/// não parseia como double.
fn numeric_cmp<F>(actual: &str, expected: &str, check: F) -> bool
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
        (Ok(a), Ok(e)) => a.partial_cmp(&e).map(&check).unwrap_or(false),
        _ => check(actual.cmp(expected)),
    }
}

// ============================================================================
// CLASSIFICAÇÃO DE TIPO
// ============================================================================

/// Classifica um nó JSON para o BODY_DATA_TYPE.
pub fn classify(value: Option<&Value>) -> &'static str {
    match value {
        None => "MISSING",
        Some(Value::String(_)) => "STRING",
        Some(Value::Number(_)) => "NUMBER",
        Some(Value::Bool(_)) => "BOOLEAN",
        Some(Value::Array(_)) => "ARRAY",
        Some(Value::Object(_)) => "OBJECT",
        Some(Value::Null) => "NULL",
    }
}

// ============================================================================
// COMPARAÇÃO ESTRUTURAL DE CORPOS
// ============================================================================

/// FLEXIBLE: o esperado é um subconjunto estrutural do obtido.
pub fn flexible_matches(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(exp), Value::Object(act)) => exp
            .iter()
            .all(|(key, value)| act.get(key).is_some_and(|av| flexible_matches(value, av))),
        (Value::Array(exp), Value::Array(act)) => {
            if exp.len() != act.len() {
                return false;
            }
            // Sem ordem: cada elemento esperado consome um elemento ainda
            // não usado do obtido.
            let mut used = vec![false; act.len()];
            exp.iter().all(|item| {
                act.iter().enumerate().any(|(i, candidate)| {
                    if used[i] || !flexible_matches(item, candidate) {
                        return false;
                    }
                    used[i] = true;
                    true
                })
            })
        }
        _ => expected == actual,
    }
}

/// STRUCTURE: a forma do esperado existe no obtido, valores primitivos
/// ignorados.
pub fn structure_matches(expected: &Value, actual: &Value) -> bool {
    match expected {
        Value::Object(exp) => match actual {
            Value::Object(act) => exp
                .iter()
                .all(|(key, value)| act.get(key).is_some_and(|av| structure_matches(value, av))),
            _ => false,
        },
        Value::Array(exp) => match actual {
            Value::Array(act) => exp
                .iter()
                .enumerate()
                .all(|(i, value)| act.get(i).is_some_and(|av| structure_matches(value, av))),
            _ => false,
        },
        _ => true,
    }
}

// ============================================================================
// EXECUÇÃO DAS VALIDAÇÕES
// ============================================================================

/// Roda uma validação contra a resposta do step.
pub fn run_validation(
    validation: &ResponseValidation,
    _status: u16,
    body: &str,
    headers: &HashMap<String, String>,
) -> ValidationOutcome {
    match validation.validation_type {
        ValidationType::Header => validate_header(validation, headers),
        ValidationType::BodyField => validate_body_field(validation, body),
        ValidationType::BodyExactMatch => validate_exact_match(validation, body),
        ValidationType::BodyDataType => validate_data_type(validation, body),
    }
}

fn outcome(validation_type: ValidationType, passed: bool, message: Option<String>) -> ValidationOutcome {
    ValidationOutcome {
        validation_type,
        passed,
        message,
    }
}

/// HEADER: busca case-insensitive do nome, comparação pelo operador.
fn validate_header(
    validation: &ResponseValidation,
    headers: &HashMap<String, String>,
) -> ValidationOutcome {
    let name = validation.header_name.as_deref().unwrap_or_default();
    let operator = validation.operator.unwrap_or(AssertionOperator::Equals);
    let expected = validation.expected_value.as_deref().unwrap_or_default();

    let actual = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
        .unwrap_or_default();

    let passed = compare(actual, operator, expected);
    let message = if passed {
        None
    } else {
        Some(format!(
            "Header '{}' {:?} '{}' failed (got '{}')",
            name, operator, expected, actual
        ))
    };
    outcome(ValidationType::Header, passed, message)
}

/// BODY_FIELD: extrai pelo caminho JSON e compara pelo operador.
fn validate_body_field(validation: &ResponseValidation, body: &str) -> ValidationOutcome {
    let path = validation.json_path.as_deref().unwrap_or_default();
    let operator = validation.operator.unwrap_or(AssertionOperator::Equals);
    let expected = validation.expected_value.as_deref().unwrap_or_default();

    let actual = jsonpath::extract(body, path);
    let passed = compare(&actual, operator, expected);
    let message = if passed {
        None
    } else {
        Some(format!(
            "Body field '{}' {:?} '{}' failed (got '{}')",
            path, operator, expected, actual
        ))
    };
    outcome(ValidationType::BodyField, passed, message)
}

/// BODY_EXACT_MATCH: compara o corpo inteiro sob o modo configurado.
fn validate_exact_match(validation: &ResponseValidation, body: &str) -> ValidationOutcome {
    let mode = validation.match_mode.unwrap_or_default();
    let expected_text = validation.expected_value.as_deref().unwrap_or_default();

    let expected_json: Result<Value, _> = serde_json::from_str(expected_text);
    let actual_json: Result<Value, _> = serde_json::from_str(body);

    let (passed, detail) = match (expected_json, actual_json) {
        (Ok(expected), Ok(actual)) => {
            let matched = match mode {
                MatchMode::Strict => expected == actual,
                MatchMode::Flexible => flexible_matches(&expected, &actual),
                MatchMode::Structure => structure_matches(&expected, &actual),
            };
            (matched, format!("body does not match under {:?} mode", mode))
        }
        // Corpos que não são JSON só podem casar no modo estrito, como
        // texto puro.
        _ if mode == MatchMode::Strict => (
            expected_text.trim() == body.trim(),
            "non-JSON body differs from expected text".to_string(),
        ),
        _ => (
            false,
            format!("{:?} mode requires both bodies to be valid JSON", mode),
        ),
    };

    let message = if passed { None } else { Some(detail) };
    outcome(ValidationType::BodyExactMatch, passed, message)
}

/// BODY_DATA_TYPE: caminha até o nó e compara a classificação.
fn validate_data_type(validation: &ResponseValidation, body: &str) -> ValidationOutcome {
    let path = validation.json_path.as_deref().unwrap_or_default();
    let expected = validation
        .expected_value
        .as_deref()
        .unwrap_or_default()
        .to_uppercase();

    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let actual = match &parsed {
        Some(root) => classify(jsonpath::node(root, path)),
        None => "MISSING",
    };

    let passed = actual == expected;
    let message = if passed {
        None
    } else {
        Some(format!(
            "Node at '{}' has type {} (expected {})",
            path, actual, expected
        ))
    };
    outcome(ValidationType::BodyDataType, passed, message)
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equals_and_contains() {
        assert!(compare("abc", AssertionOperator::Equals, "abc"));
        assert!(!compare("abc", AssertionOperator::Equals, "abd"));
        assert!(compare("hello world", AssertionOperator::Contains, "lo wo"));
        assert!(compare("hello", AssertionOperator::NotContains, "xyz"));
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(compare("10", AssertionOperator::Gt, "9.5"));
        assert!(compare("10", AssertionOperator::Gte, "10"));
        assert!(compare("2", AssertionOperator::Lt, "10"));
        assert!(!compare("2", AssertionOperator::Gt, "10"));
    }

    #[test]
    fn test_numeric_falls_back_to_lexical() {
        // "2" > "10" lexicalmente quando um lado não é número.
        assert!(compare("2", AssertionOperator::Gt, "10a"));
        assert!(compare("abc", AssertionOperator::Lt, "abd"));
    }

    #[test]
    fn test_exists_operators() {
        assert!(compare("x", AssertionOperator::Exists, ""));
        assert!(!compare("", AssertionOperator::Exists, ""));
        assert!(compare("", AssertionOperator::NotExists, ""));
    }

    #[test]
    fn test_regex_operator() {
        assert!(compare("AB1234", AssertionOperator::Regex, r"^[A-Z]{2}\d{4}$"));
        assert!(!compare("ab1234", AssertionOperator::Regex, r"^[A-Z]{2}\d{4}$"));
        // Padrão inválido nunca casa.
        assert!(!compare("x", AssertionOperator::Regex, "(["));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(Some(&json!("a"))), "STRING");
        assert_eq!(classify(Some(&json!(1))), "NUMBER");
        assert_eq!(classify(Some(&json!(true))), "BOOLEAN");
        assert_eq!(classify(Some(&json!([1]))), "ARRAY");
        assert_eq!(classify(Some(&json!({}))), "OBJECT");
        assert_eq!(classify(Some(&Value::Null)), "NULL");
        assert_eq!(classify(None), "MISSING");
    }

    #[test]
    fn test_flexible_superset_passes() {
        let expected = json!({"a": 1, "b": {"c": 2}});
        let actual = json!({"a": 1, "b": {"c": 2, "d": 3}, "extra": true});
        assert!(flexible_matches(&expected, &actual));
    }

    #[test]
    fn test_flexible_arrays_order_independent_same_size() {
        let expected = json!([1, 2, 3]);
        assert!(flexible_matches(&expected, &json!([3, 1, 2])));
        assert!(!flexible_matches(&expected, &json!([1, 2])));
        assert!(!flexible_matches(&expected, &json!([1, 2, 3, 4])));
    }

    #[test]
    fn test_flexible_missing_key_fails() {
        let expected = json!({"a": 1});
        assert!(!flexible_matches(&expected, &json!({"b": 1})));
    }

    #[test]
    fn test_structure_ignores_primitive_values() {
        let expected = json!({"id": 0, "user": {"name": ""}});
        let actual = json!({"id": 999, "user": {"name": "Ana", "age": 30}});
        assert!(structure_matches(&expected, &actual));
    }

    #[test]
    fn test_structure_requires_array_positions() {
        let expected = json!({"items": [0, 0]});
        assert!(structure_matches(&expected, &json!({"items": [5, 6, 7]})));
        assert!(!structure_matches(&expected, &json!({"items": [5]})));
    }

    #[test]
    fn test_structure_requires_shape() {
        let expected = json!({"user": {"id": 0}});
        assert!(!structure_matches(&expected, &json!({"user": 42})));
    }

    fn validation(validation_type: ValidationType) -> ResponseValidation {
        ResponseValidation {
            validation_type,
            header_name: None,
            json_path: None,
            operator: None,
            expected_value: None,
            match_mode: None,
        }
    }

    #[test]
    fn test_header_validation_case_insensitive() {
        let mut v = validation(ValidationType::Header);
        v.header_name = Some("Content-Type".to_string());
        v.operator = Some(AssertionOperator::Contains);
        v.expected_value = Some("json".to_string());

        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());

        let out = run_validation(&v, 200, "", &headers);
        assert!(out.passed);
    }

    #[test]
    fn test_body_field_validation() {
        let mut v = validation(ValidationType::BodyField);
        v.json_path = Some("$.data.id".to_string());
        v.operator = Some(AssertionOperator::Equals);
        v.expected_value = Some("7".to_string());

        let out = run_validation(&v, 200, r#"{"data":{"id":7}}"#, &HashMap::new());
        assert!(out.passed);

        v.expected_value = Some("8".to_string());
        let out = run_validation(&v, 200, r#"{"data":{"id":7}}"#, &HashMap::new());
        assert!(!out.passed);
        assert!(out.message.unwrap().contains("got '7'"));
    }

    #[test]
    fn test_exact_match_strict_vs_flexible() {
        let mut v = validation(ValidationType::BodyExactMatch);
        v.expected_value = Some(r#"{"a":1}"#.to_string());

        let superset = r#"{"a":1,"b":2}"#;
        v.match_mode = Some(MatchMode::Strict);
        assert!(!run_validation(&v, 200, superset, &HashMap::new()).passed);

        v.match_mode = Some(MatchMode::Flexible);
        assert!(run_validation(&v, 200, superset, &HashMap::new()).passed);
    }

    #[test]
    fn test_exact_match_structure_mode() {
        let mut v = validation(ValidationType::BodyExactMatch);
        v.expected_value = Some(r#"{"user":{"id":0}}"#.to_string());
        v.match_mode = Some(MatchMode::Structure);
        let out = run_validation(&v, 200, r#"{"user":{"id":123,"x":1}}"#, &HashMap::new());
        assert!(out.passed);
    }

    #[test]
    fn test_data_type_validation() {
        let mut v = validation(ValidationType::BodyDataType);
        v.json_path = Some("$.items".to_string());
        v.expected_value = Some("array".to_string());
        assert!(run_validation(&v, 200, r#"{"items":[]}"#, &HashMap::new()).passed);

        v.json_path = Some("$.missing".to_string());
        v.expected_value = Some("MISSING".to_string());
        assert!(run_validation(&v, 200, r#"{"items":[]}"#, &HashMap::new()).passed);

        v.json_path = Some("$.items".to_string());
        v.expected_value = Some("OBJECT".to_string());
        let out = run_validation(&v, 200, r#"{"items":[]}"#, &HashMap::new());
        assert!(!out.passed);
        assert!(out.message.unwrap().contains("ARRAY"));
    }
}
