//! Integration tests for the query API

#[cfg(feature = "server")]
mod server_tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use hidsense_agent::decode::ParsedReading;
    use hidsense_agent::monitor::{
        AlertType, ConnectionAlert, HealthRecord, HealthStatus, SensorReading, Severity,
    };
    use hidsense_agent::server::{run, ServerConfig};
    use hidsense_agent::store::{MemoryStore, TelemetryStore};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        for (offset, temperature) in [(30, 20.0), (20, 22.0), (10, 24.0)] {
            let parsed = ParsedReading {
                temperature,
                humidity: 40.0,
                interval_seconds: 1,
            };
            store
                .append_reading(&SensorReading::new(
                    "rack-a",
                    &parsed,
                    "raw",
                    now - ChronoDuration::minutes(offset),
                ))
                .unwrap();
        }
        store
            .append_health(&[HealthRecord {
                sensor_id: "rack-a".into(),
                status: HealthStatus::Online,
                data_freshness_seconds: 4.0,
                error_count: 0,
                timestamp: now,
            }])
            .unwrap();
        for (alert_type, severity) in [
            (AlertType::DataStale, Severity::Warning),
            (AlertType::ConnectionLost, Severity::Critical),
        ] {
            store
                .append_alert(&ConnectionAlert {
                    id: Uuid::new_v4(),
                    sensor_id: "rack-a".into(),
                    alert_type,
                    message: "test".into(),
                    severity,
                    timestamp: now,
                })
                .unwrap();
        }
        store
    }

    async fn start() -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let config = ServerConfig::new(0, seeded_store());
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        (addr, shutdown_tx)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx) = start().await;

        let response = reqwest::get(format!("http://{}/health", addr))
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_sensors_endpoint() {
        let (addr, shutdown_tx) = start().await;

        let body: serde_json::Value = reqwest::get(format!("http://{}/sensors", addr))
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");

        let sensors = body.as_array().unwrap();
        assert_eq!(sensors.len(), 1);
        assert_eq!(sensors[0]["sensor_id"], "rack-a");
        assert_eq!(sensors[0]["status"], "online");
        assert_eq!(sensors[0]["latest"]["temperature"], 24.0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_readings_and_summary() {
        let (addr, shutdown_tx) = start().await;

        let readings: serde_json::Value =
            reqwest::get(format!("http://{}/sensors/rack-a/readings?hours=1", addr))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert_eq!(readings.as_array().unwrap().len(), 3);

        let summary: serde_json::Value =
            reqwest::get(format!("http://{}/sensors/rack-a/summary", addr))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert_eq!(summary["count"], 3);
        assert_eq!(summary["temperature"]["mean"], 22.0);
        assert_eq!(summary["temperature"]["min"], 20.0);

        let missing = reqwest::get(format!("http://{}/sensors/rack-z/summary", addr))
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_alerts_filtering() {
        let (addr, shutdown_tx) = start().await;

        let all: serde_json::Value = reqwest::get(format!("http://{}/alerts", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(all.as_array().unwrap().len(), 2);

        let critical: serde_json::Value =
            reqwest::get(format!("http://{}/alerts?hours=1&severity=critical", addr))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        let critical = critical.as_array().unwrap();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0]["alert_type"], "connection_lost");

        let invalid = reqwest::get(format!("http://{}/alerts?severity=loud", addr))
            .await
            .unwrap();
        assert_eq!(invalid.status(), reqwest::StatusCode::BAD_REQUEST);

        for hours in ["0", "-1", "9223372036854775"] {
            let response = reqwest::get(format!("http://{}/alerts?hours={}", addr, hours))
                .await
                .unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
            let body: serde_json::Value = response.json().await.unwrap();
            assert_eq!(body["code"], "INVALID_WINDOW");
        }
        let huge = reqwest::get(format!(
            "http://{}/sensors/rack-a/readings?hours=9223372036854775",
            addr
        ))
        .await
        .unwrap();
        assert_eq!(huge.status(), reqwest::StatusCode::BAD_REQUEST);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let (addr, shutdown_tx) = start().await;

        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/sensors", addr))
            .header("Origin", "http://localhost")
            .header("Access-Control-Request-Method", "GET")
            .send()
            .await
            .expect("Failed to send request");

        assert!(
            response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT,
            "CORS preflight failed: {}",
            response.status()
        );

        let _ = shutdown_tx.send(());
    }
}
