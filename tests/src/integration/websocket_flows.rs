//! # WebSocket Flows
//!
//! Signals, heartbeats and remote calls between a `SignalBus` and a live
//! WebSocket server.
//!
//! ## Flows Tested
//!
//! 1. **Connect**: endpoint and token reach the server as path and query
//! 2. **Outbound buffering**: frames fired before the connection opens arrive in order
//! 3. **Heartbeat**: the sentinel is echoed and never dispatched
//! 4. **Remote calls**: results and exceptions settle the caller's future
//! 5. **Inbound signals**: deduplicated by `signal_id`, never echoed back

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::{json, Value};
    use signal_bus::{BusConfig, CallError, ConnectionState, Payload, SignalBus, BOOTSTRAP_SIGNAL};
    use tokio::time::timeout;

    use crate::support::{TestServer, WAIT};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    type Calls = Arc<Mutex<Vec<(Payload, Option<String>)>>>;

    /// Records handler invocations.
    #[derive(Clone, Default)]
    struct Recorder {
        calls: Calls,
    }

    impl Recorder {
        fn calls(&self) -> Vec<(Payload, Option<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn bus_for(server: &TestServer) -> SignalBus {
        SignalBus::new(BusConfig::for_endpoint(server.url())).unwrap()
    }

    fn record(bus: &SignalBus, name: &str) -> Recorder {
        let recorder = Recorder::default();
        let calls = Arc::clone(&recorder.calls);
        bus.connect(name, move |opts, id| {
            calls
                .lock()
                .unwrap()
                .push((opts.clone(), id.map(str::to_string)));
            Ok(())
        });
        recorder
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        timeout(WAIT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    // =============================================================================
    // CONNECT
    // =============================================================================

    #[tokio::test]
    async fn test_token_sent_as_query_parameter() {
        let mut server = TestServer::bind().await.unwrap();
        let mut config = BusConfig::for_endpoint(server.url());
        config.token = Some("window-42".into());
        let bus = SignalBus::new(config).unwrap();

        bus.start().await.unwrap();
        let conn = server.accept().await.unwrap();

        assert_eq!(conn.path, "/ws/?token=window-42");
        wait_for(|| bus.connection_state() == ConnectionState::Open).await;
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_bootstrap_fires_before_connection() {
        let server = TestServer::bind().await.unwrap();
        let bus = bus_for(&server);
        let loaded = record(&bus, BOOTSTRAP_SIGNAL);

        bus.start().await.unwrap();
        timeout(WAIT, bus.loaded()).await.unwrap();

        assert_eq!(loaded.calls().len(), 1);
        bus.shutdown().await;
    }

    // =============================================================================
    // OUTBOUND BUFFERING
    // =============================================================================

    #[tokio::test]
    async fn test_buffered_frames_flush_in_order() {
        let mut server = TestServer::bind().await.unwrap();
        let bus = bus_for(&server);
        bus.bind_remote("chat.send");

        bus.fire("chat.send", payload(json!({"seq": "A"})));
        bus.fire("chat.send", payload(json!({"seq": "B"})));
        assert_eq!(bus.buffered_frames(), 2);

        bus.start().await.unwrap();
        let mut conn = server.accept().await.unwrap();

        assert_eq!(
            conn.recv_json().await.unwrap(),
            json!({"signal": "chat.send", "opts": {"seq": "A"}})
        );
        assert_eq!(
            conn.recv_json().await.unwrap(),
            json!({"signal": "chat.send", "opts": {"seq": "B"}})
        );
        assert_eq!(bus.buffered_frames(), 0);
        bus.shutdown().await;
    }

    // =============================================================================
    // HEARTBEAT
    // =============================================================================

    #[tokio::test]
    async fn test_heartbeat_is_echoed_verbatim() {
        let mut server = TestServer::bind().await.unwrap();
        let bus = bus_for(&server);
        bus.start().await.unwrap();
        let mut conn = server.accept().await.unwrap();

        conn.send("--HEARTBEAT--").unwrap();
        assert_eq!(conn.recv().await.unwrap(), "--HEARTBEAT--");

        assert_eq!(bus.stats().heartbeats, 1);
        assert_eq!(bus.stats().malformed_frames, 0);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_custom_heartbeat_sentinel() {
        let mut server = TestServer::bind().await.unwrap();
        let mut config = BusConfig::for_endpoint(server.url());
        config.heartbeat = "ping!".into();
        let bus = SignalBus::new(config).unwrap();
        bus.start().await.unwrap();
        let mut conn = server.accept().await.unwrap();

        conn.send("--HEARTBEAT--").unwrap();
        conn.send("ping!").unwrap();
        assert_eq!(conn.recv().await.unwrap(), "ping!");

        // The default sentinel is just a malformed frame here
        wait_for(|| bus.stats().malformed_frames == 1).await;
        bus.shutdown().await;
    }

    // =============================================================================
    // REMOTE CALLS
    // =============================================================================

    #[tokio::test]
    async fn test_invoke_round_trip() {
        let mut server = TestServer::bind().await.unwrap();
        let bus = bus_for(&server);
        bus.start().await.unwrap();
        let mut conn = server.accept().await.unwrap();

        let result = bus.invoke("demo.add", payload(json!({"a": 40, "b": 2})));

        let frame = conn.recv_json().await.unwrap();
        assert_eq!(frame["func"], "demo.add");
        assert_eq!(frame["opts"], json!({"a": 40, "b": 2}));
        let result_id = frame["result_id"].as_str().unwrap().to_string();
        assert_eq!(result_id, "f1");

        conn.send(json!({"result_id": result_id, "result": 42}).to_string())
            .unwrap();
        assert_eq!(timeout(WAIT, result).await.unwrap(), Ok(json!(42)));
        assert_eq!(bus.pending_calls(), 0);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_remote_exception_rejects() {
        let mut server = TestServer::bind().await.unwrap();
        let bus = bus_for(&server);
        bus.start().await.unwrap();
        let mut conn = server.accept().await.unwrap();

        let result = bus.invoke("demo.fail", Payload::new());
        let frame = conn.recv_json().await.unwrap();

        conn.send(
            json!({"result_id": frame["result_id"], "exception": "division by zero"}).to_string(),
        )
        .unwrap();
        assert_eq!(
            timeout(WAIT, result).await.unwrap(),
            Err(CallError::Remote(json!("division by zero")))
        );
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_responses_settle_out_of_order() {
        let mut server = TestServer::bind().await.unwrap();
        let bus = bus_for(&server);
        bus.start().await.unwrap();
        let mut conn = server.accept().await.unwrap();

        let first = bus.invoke("slow", Payload::new());
        let second = bus.invoke("fast", Payload::new());
        conn.recv_json().await.unwrap();
        conn.recv_json().await.unwrap();

        conn.send(r#"{"result_id": "f2", "result": "fast"}"#).unwrap();
        conn.send(r#"{"result_id": "f9", "result": "stray"}"#).unwrap();
        conn.send(r#"{"result_id": "f1", "result": "slow"}"#).unwrap();

        assert_eq!(timeout(WAIT, second).await.unwrap(), Ok(json!("fast")));
        assert_eq!(timeout(WAIT, first).await.unwrap(), Ok(json!("slow")));
        bus.shutdown().await;
    }

    // =============================================================================
    // INBOUND SIGNALS
    // =============================================================================

    #[tokio::test]
    async fn test_server_signal_deduplicated_and_not_echoed() {
        let mut server = TestServer::bind().await.unwrap();
        let bus = bus_for(&server);
        bus.bind_remote("chat.msg");
        let received = record(&bus, "chat.msg");

        bus.start().await.unwrap();
        let mut conn = server.accept().await.unwrap();

        let frame = json!({"signal": "chat.msg", "opts": {"t": "hi"}, "signal_id": "s-1"});
        conn.send(frame.to_string()).unwrap();
        conn.send(frame.to_string()).unwrap();
        conn.send(
            json!({"signal": "chat.msg", "opts": {"t": "again"}, "signal_id": "s-2"}).to_string(),
        )
        .unwrap();

        wait_for(|| received.calls().len() == 2).await;
        assert_eq!(bus.stats().duplicates_suppressed, 1);
        assert!(conn.is_silent_for(Duration::from_millis(100)).await);

        // A local firing of the same name goes out exactly once
        bus.fire("chat.msg", payload(json!({"t": "local"})));
        assert_eq!(
            conn.recv_json().await.unwrap(),
            json!({"signal": "chat.msg", "opts": {"t": "local"}})
        );
        assert!(conn.is_silent_for(Duration::from_millis(100)).await);

        let calls = received.calls();
        assert_eq!(calls[0].1.as_deref(), Some("s-1"));
        assert_eq!(calls[1].1.as_deref(), Some("s-2"));
        assert_eq!(calls[2].1, None);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_signal_without_id_ignored() {
        let mut server = TestServer::bind().await.unwrap();
        let bus = bus_for(&server);
        let received = record(&bus, "notify.show");
        let marker = record(&bus, "marker");

        bus.start().await.unwrap();
        let conn = server.accept().await.unwrap();

        conn.send(r#"{"signal": "notify.show", "opts": {"text": "x"}}"#)
            .unwrap();
        conn.send(r#"{"signal": "marker", "opts": {}, "signal_id": "m-1"}"#)
            .unwrap();

        wait_for(|| marker.calls().len() == 1).await;
        assert!(received.calls().is_empty());
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_manifest_binds_signals() {
        let mut server = TestServer::bind().await.unwrap();
        let bus = bus_for(&server);
        bus.apply_manifest(
            &serde_json::from_value(json!({
                "signals": ["chat.send", "form.submit"],
                "functions": ["demo.math.add"]
            }))
            .unwrap(),
        );

        bus.start().await.unwrap();
        let mut conn = server.accept().await.unwrap();

        bus.fire("form.submit", payload(json!({"id": 7})));
        bus.fire("local.only", Payload::new());
        assert_eq!(
            conn.recv_json().await.unwrap(),
            json!({"signal": "form.submit", "opts": {"id": 7}})
        );
        assert!(conn.is_silent_for(Duration::from_millis(100)).await);
        assert_eq!(
            bus.functions().namespaces().into_iter().collect::<Vec<_>>(),
            vec!["demo", "demo.math"]
        );
        bus.shutdown().await;
    }
}
