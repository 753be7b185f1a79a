//! # Connection Resilience
//!
//! Behavior of a `SignalBus` when the server drops the connection.
//!
//! ## Scenarios
//!
//! - Frames fired while disconnected are replayed on the next connection
//! - Pending calls survive a reconnect by default
//! - `RejectPending` settles pending calls when the connection drops
//! - Shutdown settles pending calls and closes the socket

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use signal_bus::{
        BackoffPolicy, BusConfig, CallError, ConnectionState, DisconnectPolicy, Payload, SignalBus,
    };
    use tokio::time::timeout;

    use crate::support::{TestServer, WAIT};

    fn config_for(server: &TestServer) -> BusConfig {
        let mut config = BusConfig::for_endpoint(server.url());
        config.reconnect = BackoffPolicy::constant(200);
        config
    }

    async fn wait_for_state(bus: &SignalBus, state: ConnectionState) {
        timeout(WAIT, async {
            while bus.connection_state() != state {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("state not reached in time");
    }

    async fn wait_until_not_open(bus: &SignalBus) {
        timeout(WAIT, async {
            while bus.connection_state() == ConnectionState::Open {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection still open");
    }

    #[tokio::test]
    async fn test_reconnect_replays_buffered_frames() {
        let mut server = TestServer::bind().await.unwrap();
        let bus = SignalBus::new(config_for(&server)).unwrap();
        bus.bind_remote("chat.send");
        bus.start().await.unwrap();

        let first = server.accept().await.unwrap();
        wait_for_state(&bus, ConnectionState::Open).await;
        drop(first);
        wait_until_not_open(&bus).await;

        let mut opts = Payload::new();
        opts.insert("text".into(), json!("while offline"));
        bus.fire("chat.send", opts);

        let mut second = server.accept().await.unwrap();
        assert_eq!(
            second.recv_json().await.unwrap(),
            json!({"signal": "chat.send", "opts": {"text": "while offline"}})
        );
        wait_for_state(&bus, ConnectionState::Open).await;
        assert_eq!(bus.buffered_frames(), 0);
        assert_eq!(bus.stats().reconnects, 1);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_pending_call_retained_across_reconnect() {
        let mut server = TestServer::bind().await.unwrap();
        let bus = SignalBus::new(config_for(&server)).unwrap();
        bus.start().await.unwrap();

        let mut first = server.accept().await.unwrap();
        let result = bus.invoke("demo.slow", Payload::new());
        let frame = first.recv_json().await.unwrap();
        drop(first);
        wait_until_not_open(&bus).await;
        assert_eq!(bus.pending_calls(), 1);

        // The answer arrives on the new connection
        let second = server.accept().await.unwrap();
        wait_for_state(&bus, ConnectionState::Open).await;
        second
            .send(json!({"result_id": frame["result_id"], "result": "late"}).to_string())
            .unwrap();

        assert_eq!(timeout(WAIT, result).await.unwrap(), Ok(json!("late")));
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_reject_pending_on_disconnect() {
        let mut server = TestServer::bind().await.unwrap();
        let mut config = config_for(&server);
        config.disconnect_policy = DisconnectPolicy::RejectPending;
        let bus = SignalBus::new(config).unwrap();
        bus.start().await.unwrap();

        let mut conn = server.accept().await.unwrap();
        let result = bus.invoke("demo.slow", Payload::new());
        conn.recv_json().await.unwrap();
        drop(conn);

        assert_eq!(
            timeout(WAIT, result).await.unwrap(),
            Err(CallError::ConnectionReset)
        );
        assert_eq!(bus.pending_calls(), 0);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drops_pending_calls() {
        let mut server = TestServer::bind().await.unwrap();
        let bus = SignalBus::new(config_for(&server)).unwrap();
        bus.start().await.unwrap();

        let mut conn = server.accept().await.unwrap();
        let result = bus.invoke("demo.never", Payload::new());
        conn.recv_json().await.unwrap();

        bus.shutdown().await;
        assert_eq!(timeout(WAIT, result).await.unwrap(), Err(CallError::Dropped));
        assert_eq!(bus.connection_state(), ConnectionState::Disconnected);

        // The client closed its end
        assert!(conn.recv().await.is_err());
    }
}
