//! # Módulo JSON-Path - Navegação em Documentos JSON
//!
//! Implementa o caminhamento de árvores JSON usado pelas extrações de
//! variáveis, pelas validações de corpo e pelas assertions de verificação.
//!
//! ## Gramática aceita:
//!
//! - Prefixo `$` ou `$.` opcional
//! - Segmentos separados por `.`
//! - Cada segmento é um nome de campo ou `nome[indice]`
//! - Os pseudo-segmentos `length()` e `size()` devolvem o tamanho de um
//!   array/objeto ou a quantidade de caracteres de uma string
//!
//! ## Exemplos:
//!
//! ```text
//! $.data.accessToken      → campo aninhado
//! users[0].name           → índice de array
//! $.items.length()        → tamanho do array items
//! ```
//!
//! ## Tolerância a falhas:
//!
//! Este módulo NUNCA propaga erro para o chamador. Nó ausente, tipo
//! errado, índice fora do alcance ou documento que nem é JSON devolvem
//! a string vazia. Extração é melhor-esforço por contrato.

use serde_json::Value;

// ============================================================================
// API PÚBLICA
// ============================================================================

/// Extrai um valor de um documento JSON em forma de string.
///
/// Documento que não parseia como JSON devolve string vazia.
pub fn extract(document: &str, path: &str) -> String {
    match serde_json::from_str::<Value>(document) {
        Ok(root) => extract_value(&root, path),
        Err(_) => String::new(),
    }
}

/// Extrai um valor de uma árvore JSON já parseada.
pub fn extract_value(root: &Value, path: &str) -> String {
    match walk(root, path) {
        Some(Resolved::Node(value)) => stringify(value),
        Some(Resolved::Size(n)) => n.to_string(),
        None => String::new(),
    }
}

/// Navega até um nó e devolve a referência, sem stringificar.
///
/// Pseudo-segmentos (`length()`/`size()`) não apontam para um nó real e
/// devolvem `None` aqui.
pub fn node<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    match walk(root, path) {
        Some(Resolved::Node(value)) => Some(value),
        _ => None,
    }
}

/// Converte um nó terminal em string.
///
/// - String devolve o conteúdo sem aspas
/// - Número e booleano devolvem a forma textual
/// - null devolve vazio
/// - Objetos e arrays devolvem o JSON compacto
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

// ============================================================================
// CAMINHAMENTO
// ============================================================================

/// Resultado interno do caminhamento: um nó real ou um tamanho calculado
/// por pseudo-segmento.
enum Resolved<'a> {
    Node(&'a Value),
    Size(usize),
}

fn walk<'a>(root: &'a Value, path: &str) -> Option<Resolved<'a>> {
    let trimmed = path.trim();
    let without_prefix = trimmed
        .strip_prefix("$.")
        .or_else(|| trimmed.strip_prefix('$'))
        .unwrap_or(trimmed);

    if without_prefix.is_empty() {
        return Some(Resolved::Node(root));
    }

    let segments: Vec<&str> = without_prefix.split('.').collect();
    let mut current = root;

    for (position, segment) in segments.iter().enumerate() {
        // Pseudo-segmento de tamanho. Só faz sentido como último segmento.
        if *segment == "length()" || *segment == "size()" {
            if position + 1 != segments.len() {
                return None;
            }
            return measure(current).map(Resolved::Size);
        }

        current = descend(current, segment)?;
    }

    Some(Resolved::Node(current))
}

/// Desce um segmento: nome de campo seguido de zero ou mais `[indice]`.
fn descend<'a>(current: &'a Value, segment: &str) -> Option<&'a Value> {
    let (name, brackets) = match segment.find('[') {
        Some(idx) => (&segment[..idx], &segment[idx..]),
        None => (segment, ""),
    };

    let mut value = current;

    if !name.is_empty() {
        value = value.as_object()?.get(name)?;
    }

    let mut rest = brackets;
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return None;
        }
        let close = rest.find(']')?;
        let index: usize = rest[1..close].trim().parse().ok()?;
        value = value.as_array()?.get(index)?;
        rest = &rest[close + 1..];
    }

    Some(value)
}

/// Tamanho de um nó: elementos de array, chaves de objeto ou caracteres
/// de string. Outros tipos não têm tamanho.
fn measure(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        Value::String(s) => Some(s.chars().count()),
        _ => None,
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_field() {
        let doc = r#"{"data":{"accessToken":"xyz"}}"#;
        assert_eq!(extract(doc, "$.data.accessToken"), "xyz");
        assert_eq!(extract(doc, "data.accessToken"), "xyz");
    }

    #[test]
    fn test_array_index() {
        let doc = r#"{"users":[{"name":"Ana"},{"name":"Bruno"}]}"#;
        assert_eq!(extract(doc, "users[1].name"), "Bruno");
        assert_eq!(extract(doc, "$.users[0].name"), "Ana");
    }

    #[test]
    fn test_chained_indexes() {
        let doc = r#"{"matrix":[[1,2],[3,4]]}"#;
        assert_eq!(extract(doc, "matrix[1][0]"), "3");
    }

    #[test]
    fn test_length_of_array_and_object() {
        let doc = r#"{"items":[1,2,3],"meta":{"a":1,"b":2}}"#;
        assert_eq!(extract(doc, "items.length()"), "3");
        assert_eq!(extract(doc, "meta.size()"), "2");
    }

    #[test]
    fn test_length_of_string_counts_chars() {
        let doc = r#"{"name":"maçã"}"#;
        assert_eq!(extract(doc, "name.length()"), "4");
    }

    #[test]
    fn test_length_of_number_is_empty() {
        let doc = r#"{"count":42}"#;
        assert_eq!(extract(doc, "count.length()"), "");
    }

    #[test]
    fn test_length_must_be_last_segment() {
        let doc = r#"{"items":[1,2,3]}"#;
        assert_eq!(extract(doc, "items.length().x"), "");
    }

    #[test]
    fn test_missing_node_is_empty() {
        let doc = r#"{"a":{"b":1}}"#;
        assert_eq!(extract(doc, "a.c"), "");
        assert_eq!(extract(doc, "a.b.c"), "");
    }

    #[test]
    fn test_out_of_range_index_is_empty() {
        let doc = r#"{"items":[1]}"#;
        assert_eq!(extract(doc, "items[5]"), "");
    }

    #[test]
    fn test_invalid_document_is_empty() {
        assert_eq!(extract("not json at all", "a.b"), "");
        assert_eq!(extract("", "a"), "");
    }

    #[test]
    fn test_terminal_stringification() {
        let doc = r#"{"n":12.5,"b":true,"z":null,"o":{"k":1},"a":[1,"x"]}"#;
        assert_eq!(extract(doc, "n"), "12.5");
        assert_eq!(extract(doc, "b"), "true");
        assert_eq!(extract(doc, "z"), "");
        assert_eq!(extract(doc, "o"), r#"{"k":1}"#);
        assert_eq!(extract(doc, "a"), r#"[1,"x"]"#);
    }

    #[test]
    fn test_root_path_returns_whole_document() {
        let doc = r#"{"a":1}"#;
        assert_eq!(extract(doc, "$"), r#"{"a":1}"#);
    }

    #[test]
    fn test_node_returns_reference() {
        let root = json!({"data": {"id": 7}});
        assert_eq!(node(&root, "data.id"), Some(&json!(7)));
        assert_eq!(node(&root, "data.missing"), None);
        // Pseudo-segmento não é um nó.
        assert_eq!(node(&root, "data.length()"), None);
    }
}
