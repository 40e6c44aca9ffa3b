// Module: Connectors
// Single synchronous call site over pluggable verification backends.
//
// The engine's only dependency on infrastructure is the uniform contract
// execute(type, config, query, timeoutSeconds) -> String. The returned
// string is interpreted as JSON by the assertion layer; drivers that
// produce non-JSON data must wrap it. Concrete drivers live outside the
// engine and are registered per type on the gateway.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Backend types the gateway recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorType {
    Mysql,
    Postgres,
    Oracle,
    Sqlserver,
    Redis,
    Elasticsearch,
    Kafka,
    Rabbitmq,
    Mongodb,
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mysql => "MYSQL",
            Self::Postgres => "POSTGRES",
            Self::Oracle => "ORACLE",
            Self::Sqlserver => "SQLSERVER",
            Self::Redis => "REDIS",
            Self::Elasticsearch => "ELASTICSEARCH",
            Self::Kafka => "KAFKA",
            Self::Rabbitmq => "RABBITMQ",
            Self::Mongodb => "MONGODB",
        };
        write!(f, "{}", name)
    }
}

/// Connection probe issued by `test_connection`. Empty means the driver
/// pings at its own protocol level.
pub fn test_query(connector_type: ConnectorType) -> &'static str {
    match connector_type {
        ConnectorType::Mysql | ConnectorType::Postgres | ConnectorType::Sqlserver => "SELECT 1",
        ConnectorType::Oracle => "SELECT 1 FROM DUAL",
        ConnectorType::Redis => "PING",
        ConnectorType::Elasticsearch => "GET /",
        ConnectorType::Kafka | ConnectorType::Rabbitmq | ConnectorType::Mongodb => "",
    }
}

/// Contract every backend driver implements.
///
/// Drivers are stateless from the engine's point of view: every call
/// opens what it needs from `config` and releases it before returning.
#[async_trait]
pub trait ConnectorDriver: Send + Sync {
    async fn execute(
        &self,
        config: &HashMap<String, String>,
        query: &str,
        timeout_seconds: u64,
    ) -> anyhow::Result<String>;
}

const TEST_CONNECTION_TIMEOUT_SECS: u64 = 10;

/// Registry of drivers keyed by connector type.
///
/// Shared across concurrent runs; calls never hold gateway state beyond
/// the driver lookup.
#[derive(Default)]
pub struct ConnectorGateway {
    drivers: HashMap<ConnectorType, Arc<dyn ConnectorDriver>>,
}

impl ConnectorGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector_type: ConnectorType, driver: Arc<dyn ConnectorDriver>) {
        self.drivers.insert(connector_type, driver);
    }

    /// Runs a query against a backend, bounding the whole call with the
    /// given timeout. Timeout surfaces as a connector error, never as a
    /// panic or a hung run.
    pub async fn execute(
        &self,
        connector_type: ConnectorType,
        config: &HashMap<String, String>,
        query: &str,
        timeout_seconds: u64,
    ) -> Result<String, EngineError> {
        let driver = self.drivers.get(&connector_type).ok_or_else(|| {
            EngineError::connector(
                connector_type.to_string(),
                "no driver registered for this connector type",
            )
        })?;
        let driver = Arc::clone(driver);

        let bound = Duration::from_secs(timeout_seconds.max(1));
        match tokio::time::timeout(bound, driver.execute(config, query, timeout_seconds)).await {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(e)) => Err(EngineError::connector(connector_type.to_string(), e.to_string())),
            Err(_) => Err(EngineError::connector(
                connector_type.to_string(),
                format!("query timed out after {}s", timeout_seconds.max(1)),
            )),
        }
    }

    /// Issues the per-type connection probe.
    pub async fn test_connection(
        &self,
        connector_type: ConnectorType,
        config: &HashMap<String, String>,
    ) -> Result<String, EngineError> {
        self.execute(
            connector_type,
            config,
            test_query(connector_type),
            TEST_CONNECTION_TIMEOUT_SECS,
        )
        .await
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted drivers for unit tests.

    use super::*;
    use std::sync::Mutex;

    /// Driver that pops pre-loaded responses in order, repeating the last
    /// one when the script runs out.
    pub struct ScriptedDriver {
        responses: Mutex<Vec<String>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedDriver {
        pub fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ConnectorDriver for ScriptedDriver {
        async fn execute(
            &self,
            _config: &HashMap<String, String>,
            query: &str,
            _timeout_seconds: u64,
        ) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push(query.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                Ok(responses.remove(0))
            } else {
                responses
                    .first()
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no scripted response"))
            }
        }
    }

    /// Driver that never answers inside the timeout window.
    pub struct HangingDriver;

    #[async_trait]
    impl ConnectorDriver for HangingDriver {
        async fn execute(
            &self,
            _config: &HashMap<String, String>,
            _query: &str,
            _timeout_seconds: u64,
        ) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{HangingDriver, ScriptedDriver};
    use super::*;

    #[test]
    fn test_probe_queries_per_type() {
        assert_eq!(test_query(ConnectorType::Mysql), "SELECT 1");
        assert_eq!(test_query(ConnectorType::Postgres), "SELECT 1");
        assert_eq!(test_query(ConnectorType::Sqlserver), "SELECT 1");
        assert_eq!(test_query(ConnectorType::Oracle), "SELECT 1 FROM DUAL");
        assert_eq!(test_query(ConnectorType::Redis), "PING");
        assert_eq!(test_query(ConnectorType::Elasticsearch), "GET /");
        assert_eq!(test_query(ConnectorType::Kafka), "");
        assert_eq!(test_query(ConnectorType::Rabbitmq), "");
        assert_eq!(test_query(ConnectorType::Mongodb), "");
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(
            serde_json::to_string(&ConnectorType::Elasticsearch).unwrap(),
            "\"ELASTICSEARCH\""
        );
        let parsed: ConnectorType = serde_json::from_str("\"KAFKA\"").unwrap();
        assert_eq!(parsed, ConnectorType::Kafka);
    }

    #[tokio::test]
    async fn test_missing_driver_is_connector_error() {
        let gateway = ConnectorGateway::new();
        let err = gateway
            .execute(ConnectorType::Redis, &HashMap::new(), "PING", 5)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no driver registered"));
    }

    #[tokio::test]
    async fn test_scripted_driver_round_trip() {
        let mut gateway = ConnectorGateway::new();
        gateway.register(
            ConnectorType::Postgres,
            Arc::new(ScriptedDriver::new(vec![r#"{"count":1}"#])),
        );
        let raw = gateway
            .execute(
                ConnectorType::Postgres,
                &HashMap::new(),
                "SELECT count(*) FROM users",
                5,
            )
            .await
            .unwrap();
        assert_eq!(raw, r#"{"count":1}"#);
    }

    #[tokio::test]
    async fn test_connection_probe_uses_type_query() {
        let driver = Arc::new(ScriptedDriver::new(vec![r#"{"ok":1}"#]));
        let mut gateway = ConnectorGateway::new();
        gateway.register(ConnectorType::Oracle, Arc::clone(&driver) as _);

        let raw = gateway
            .test_connection(ConnectorType::Oracle, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(raw, r#"{"ok":1}"#);
        assert_eq!(driver.calls.lock().unwrap()[0], "SELECT 1 FROM DUAL");
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_error() {
        let mut gateway = ConnectorGateway::new();
        gateway.register(ConnectorType::Kafka, Arc::new(HangingDriver));
        let err = gateway
            .execute(ConnectorType::Kafka, &HashMap::new(), "topic=orders", 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
