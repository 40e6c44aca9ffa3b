//! # Módulo de Handlers de Resposta
//!
//! Mapeia o código de status HTTP de uma resposta para a ação de fluxo
//! de controle configurada no step.
//!
//! ## Casamento de códigos:
//!
//! O `match_code` de um handler é um padrão de três dígitos onde `x`
//! casa com qualquer dígito:
//!
//! | Padrão | Casa com          |
//! |--------|-------------------|
//! | `200`  | exatamente 200    |
//! | `2xx`  | 200 a 299         |
//! | `50x`  | 500 a 509         |
//!
//! ## Prioridade:
//!
//! Quando mais de um handler casa com o status, vence o de MENOR
//! `priority`. O empate mantém a ordem de declaração.
//!
//! ## Política de retry:
//!
//! A política é derivada ANTES da primeira tentativa: entre os handlers
//! com ação RETRY, o maior `retry_count` define o limite do laço externo
//! junto com o seu `retry_delay_seconds`.

use crate::model::{HandlerAction, ResponseHandler};

/// Política de retry derivada dos handlers de um step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Quantidade de re-tentativas além da primeira chamada.
    pub retry_count: u32,
    pub retry_delay_seconds: u64,
}

/// Verifica se um padrão de código casa com um status HTTP.
///
/// O padrão precisa ter exatamente três caracteres depois de aparado;
/// cada posição compara dígito a dígito, com `x`/`X` servindo de curinga.
pub fn code_matches(pattern: &str, status: u16) -> bool {
    let pattern = pattern.trim();
    if pattern.len() != 3 {
        return false;
    }
    let status_digits = format!("{:03}", status);
    pattern
        .chars()
        .zip(status_digits.chars())
        .all(|(p, s)| p == 'x' || p == 'X' || p == s)
}

/// Seleciona o handler vencedor para um status: menor prioridade entre
/// os que casam, empate pela ordem de declaração.
pub fn select<'a>(handlers: &'a [ResponseHandler], status: u16) -> Option<&'a ResponseHandler> {
    let mut winner: Option<&ResponseHandler> = None;
    for handler in handlers {
        if !code_matches(&handler.match_code, status) {
            continue;
        }
        match winner {
            Some(current) if current.priority <= handler.priority => {}
            _ => winner = Some(handler),
        }
    }
    winner
}

/// Deriva a política de retry dos handlers: o RETRY de maior
/// `retry_count` manda.
pub fn retry_policy(handlers: &[ResponseHandler]) -> RetryPolicy {
    handlers
        .iter()
        .filter(|h| h.action == HandlerAction::Retry)
        .max_by_key(|h| h.retry_count)
        .map(|h| RetryPolicy {
            retry_count: h.retry_count,
            retry_delay_seconds: h.retry_delay_seconds,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_exact_code_match() {
        assert!(code_matches("200", 200));
        assert!(!code_matches("200", 201));
    }

    #[test]
    fn test_wildcard_class_match() {
        assert!(code_matches("2xx", 200));
        assert!(code_matches("2xx", 299));
        assert!(!code_matches("2xx", 301));
        assert!(code_matches("50x", 503));
        assert!(!code_matches("50x", 510));
        assert!(code_matches("5XX", 500));
    }

    #[test]
    fn test_malformed_pattern_never_matches() {
        assert!(!code_matches("20", 200));
        assert!(!code_matches("", 200));
        assert!(!code_matches("2xxx", 200));
    }

    #[test]
    fn test_lower_priority_wins() {
        // Mesmo cenário do curinga mais agressivo: o handler de prioridade
        // 1 vence o handler exato de prioridade 10.
        let handlers = vec![
            handler("200", HandlerAction::Success, 10),
            handler("2xx", HandlerAction::Error, 1),
        ];
        let selected = select(&handlers, 200).unwrap();
        assert_eq!(selected.action, HandlerAction::Error);
    }

    #[test]
    fn test_declaration_order_breaks_priority_ties() {
        let handlers = vec![
            handler("2xx", HandlerAction::Success, 5),
            handler("200", HandlerAction::Error, 5),
        ];
        let selected = select(&handlers, 200).unwrap();
        assert_eq!(selected.action, HandlerAction::Success);
    }

    #[test]
    fn test_no_handler_matches() {
        let handlers = vec![handler("5xx", HandlerAction::Retry, 0)];
        assert!(select(&handlers, 200).is_none());
    }

    #[test]
    fn test_retry_policy_takes_largest_count() {
        let mut a = handler("5xx", HandlerAction::Retry, 0);
        a.retry_count = 2;
        a.retry_delay_seconds = 1;
        let mut b = handler("503", HandlerAction::Retry, 0);
        b.retry_count = 5;
        b.retry_delay_seconds = 3;
        let policy = retry_policy(&[a, b, handler("200", HandlerAction::Success, 0)]);
        assert_eq!(policy.retry_count, 5);
        assert_eq!(policy.retry_delay_seconds, 3);
    }

    #[test]
    fn test_retry_policy_without_retry_handlers_is_zero() {
        let policy = retry_policy(&[handler("200", HandlerAction::Success, 0)]);
        assert_eq!(policy.retry_count, 0);
    }
}
