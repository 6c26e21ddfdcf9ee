//! Integration tests for the bridge HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use nuki_activity_bridge::api::{LockCommand, LockMode, LockState, MemoryLockApi};
    use nuki_activity_bridge::server::{run, ServerConfig, ServerState};
    use nuki_activity_bridge::{BridgeStats, LockRegistry};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    async fn start(api: Arc<MemoryLockApi>) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let registry = LockRegistry::shared(10);
        let mut state = LockState::unknown(1, "Front Door");
        state.available = true;
        state.settings.firmware_version = Some("3.28.455".to_string());
        state.settings.mode = Some(LockMode::Door);
        state.settings.auto_lock_timeout = Some(300);
        registry.update_state(state).await;

        let server_state = Arc::new(ServerState::new(
            api,
            registry,
            Arc::new(BridgeStats::new()),
        ));
        let result = run(ServerConfig::new(0), server_state)
            .await
            .expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        result
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let api = Arc::new(MemoryLockApi::new().with_lock(1, "Front Door"));
        let (addr, shutdown_tx) = start(api).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert_eq!(body["locks"], 1);
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_lock_state_endpoints() {
        let api = Arc::new(MemoryLockApi::new().with_lock(1, "Front Door"));
        let (addr, shutdown_tx) = start(api).await;
        let client = reqwest::Client::new();

        let locks: serde_json::Value = client
            .get(format!("http://{}/locks", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(locks[0]["smartlock_id"], 1);
        assert_eq!(locks[0]["available"], true);
        assert_eq!(locks[0]["settings"]["firmware_version"], "3.28.455");
        assert_eq!(locks[0]["settings"]["mode"], "door");
        assert_eq!(locks[0]["settings"]["auto_lock_timeout"], 300);

        let missing = client
            .get(format!("http://{}/locks/42", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let events: serde_json::Value = client
            .get(format!("http://{}/events?limit=5", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(events.as_array().map(Vec::len), Some(0));

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_command_endpoints() {
        let api = Arc::new(MemoryLockApi::new().with_lock(1, "Front Door"));
        let (addr, shutdown_tx) = start(Arc::clone(&api)).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/locks/1/unlatch", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["action"], "unlatch");

        let response = client
            .post(format!("http://{}/locks/1/lock-n-go?unlatch=true", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let response = client
            .post(format!("http://{}/locks/1/lock-n-go", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        assert_eq!(
            api.sent_actions(),
            vec![
                (1, LockCommand::Unlatch),
                (1, LockCommand::LockNGoWithUnlatch),
                (1, LockCommand::LockNGo),
            ]
        );

        let unknown = client
            .post(format!("http://{}/locks/9/unlatch", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);
        let body: serde_json::Value = unknown.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "LOCK_NOT_FOUND");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let api = Arc::new(MemoryLockApi::new().with_lock(1, "Front Door"));
        let (addr, shutdown_tx) = start(api).await;

        // Send OPTIONS request to check CORS
        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/locks/1/unlatch", addr))
            .header("Origin", "http://localhost")
            .header("Access-Control-Request-Method", "POST")
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
