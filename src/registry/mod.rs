// Module: Registry
// Tracks in-flight runs: their event sinks, the single pending
// manual-input rendezvous, and the per-run manual-input cache.
//
// Concurrency model: one std mutex around the whole map. Nothing is held
// across an await; the rendezvous itself is a oneshot channel, so the
// waiting side blocks on the receiver, never on the lock.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};

use crate::errors::EngineError;
use crate::model::RunEvent;

/// Values delivered through the rendezvous: submitted inputs, or the
/// cancellation reason.
pub type InputOutcome = Result<HashMap<String, String>, String>;

#[derive(Default)]
struct RunHandle {
    events: Option<mpsc::UnboundedSender<RunEvent>>,
    pending_input: Option<oneshot::Sender<InputOutcome>>,
    manual_cache: HashMap<String, String>,
    /// Motivo do cancelamento. `Some` marca a execução como cancelada,
    /// mesmo sem nenhum prompt aberto na hora do cancel.
    cancel_reason: Option<String>,
}

/// Single-process registry of in-flight runs.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, RunHandle>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a run with an optional streaming sink.
    pub fn register(&self, run_id: &str, events: Option<mpsc::UnboundedSender<RunEvent>>) {
        let mut runs = self.runs.lock().expect("registry lock poisoned");
        runs.insert(
            run_id.to_string(),
            RunHandle {
                events,
                ..Default::default()
            },
        );
    }

    /// Sends an event to the run's sink, if one is attached. A closed
    /// sink is ignored; the run keeps executing.
    pub fn emit(&self, run_id: &str, event: RunEvent) {
        let runs = self.runs.lock().expect("registry lock poisoned");
        if let Some(sender) = runs.get(run_id).and_then(|h| h.events.as_ref()) {
            let _ = sender.send(event);
        }
    }

    /// Opens the input rendezvous for a run and returns the receive side.
    ///
    /// At most one pending input exists per run; opening a new one drops
    /// any stale sender (which unblocks a forgotten waiter with an error).
    pub fn request_input(&self, run_id: &str) -> Result<oneshot::Receiver<InputOutcome>, EngineError> {
        let mut runs = self.runs.lock().expect("registry lock poisoned");
        let handle = runs.get_mut(run_id).ok_or_else(|| EngineError::NotFound {
            kind: "run",
            name: run_id.to_string(),
        })?;
        if let Some(reason) = &handle.cancel_reason {
            return Err(EngineError::Cancelled(reason.clone()));
        }
        let (tx, rx) = oneshot::channel();
        handle.pending_input = Some(tx);
        Ok(rx)
    }

    /// Merges submitted values into the run's manual-input cache and
    /// completes the pending rendezvous, if any.
    pub fn submit_input(
        &self,
        run_id: &str,
        values: HashMap<String, String>,
    ) -> Result<(), EngineError> {
        let mut runs = self.runs.lock().expect("registry lock poisoned");
        let handle = runs.get_mut(run_id).ok_or_else(|| EngineError::NotFound {
            kind: "run",
            name: run_id.to_string(),
        })?;
        handle.manual_cache.extend(values.clone());
        if let Some(sender) = handle.pending_input.take() {
            let _ = sender.send(Ok(values));
        }
        Ok(())
    }

    /// Cancels a run: records the reason, completes any pending
    /// rendezvous exceptionally and makes later prompts fail fast.
    pub fn cancel_run(&self, run_id: &str, reason: &str) -> Result<(), EngineError> {
        let mut runs = self.runs.lock().expect("registry lock poisoned");
        let handle = runs.get_mut(run_id).ok_or_else(|| EngineError::NotFound {
            kind: "run",
            name: run_id.to_string(),
        })?;
        handle.cancel_reason = Some(reason.to_string());
        if let Some(sender) = handle.pending_input.take() {
            let _ = sender.send(Err(reason.to_string()));
        }
        Ok(())
    }

    pub fn is_cancelled(&self, run_id: &str) -> bool {
        self.cancel_reason(run_id).is_some()
    }

    /// Reason recorded by `cancel_run`, `None` while the run is alive.
    pub fn cancel_reason(&self, run_id: &str) -> Option<String> {
        let runs = self.runs.lock().expect("registry lock poisoned");
        runs.get(run_id).and_then(|h| h.cancel_reason.clone())
    }

    /// Snapshot of the run's manual-input cache.
    pub fn manual_cache(&self, run_id: &str) -> HashMap<String, String> {
        let runs = self.runs.lock().expect("registry lock poisoned");
        runs.get(run_id)
            .map(|h| h.manual_cache.clone())
            .unwrap_or_default()
    }

    /// Removes all state for a run. Dropping the pending sender, if any,
    /// unblocks the waiter with a closed-channel error.
    pub fn unregister(&self, run_id: &str) {
        let mut runs = self.runs.lock().expect("registry lock poisoned");
        runs.remove(run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_submit_completes_pending_input() {
        let registry = RunRegistry::new();
        registry.register("r1", None);

        let rx = registry.request_input("r1").unwrap();
        registry
            .submit_input("r1", values(&[("userId", "7")]))
            .unwrap();

        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome.get("userId").map(String::as_str), Some("7"));
        assert_eq!(
            registry.manual_cache("r1").get("userId").map(String::as_str),
            Some("7")
        );
    }

    #[tokio::test]
    async fn test_cache_accumulates_across_submissions() {
        let registry = RunRegistry::new();
        registry.register("r1", None);
        registry.submit_input("r1", values(&[("a", "1")])).unwrap();
        registry.submit_input("r1", values(&[("b", "2")])).unwrap();
        let cache = registry.manual_cache("r1");
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_completes_exceptionally() {
        let registry = RunRegistry::new();
        registry.register("r1", None);

        let rx = registry.request_input("r1").unwrap();
        registry.cancel_run("r1", "cancelled by caller").unwrap();

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap_err(), "cancelled by caller");
        assert!(registry.is_cancelled("r1"));

        // Depois do cancelamento, novos pedidos falham na hora.
        assert!(registry.request_input("r1").is_err());
    }

    #[tokio::test]
    async fn test_cancel_reason_survives_without_pending_prompt() {
        let registry = RunRegistry::new();
        registry.register("r1", None);

        // Nenhum rendezvous aberto: o motivo fica registrado mesmo assim.
        registry.cancel_run("r1", "deployment window closed").unwrap();
        assert_eq!(
            registry.cancel_reason("r1").as_deref(),
            Some("deployment window closed")
        );

        // E o próximo pedido de input devolve esse mesmo motivo.
        let err = registry.request_input("r1").unwrap_err();
        assert!(err.to_string().contains("deployment window closed"));
    }

    #[tokio::test]
    async fn test_unregister_drops_pending_input() {
        let registry = RunRegistry::new();
        registry.register("r1", None);
        let rx = registry.request_input("r1").unwrap();
        registry.unregister("r1");
        // Sender dropado encerra o canal.
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_emit_reaches_sink() {
        let registry = RunRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("r1", Some(tx));
        registry.emit(
            "r1",
            RunEvent::RunStarted {
                run_id: "r1".to_string(),
            },
        );
        assert!(matches!(rx.recv().await, Some(RunEvent::RunStarted { .. })));
    }

    #[test]
    fn test_unknown_run_is_not_found() {
        let registry = RunRegistry::new();
        assert!(matches!(
            registry.submit_input("ghost", HashMap::new()),
            Err(EngineError::NotFound { .. })
        ));
    }
}
