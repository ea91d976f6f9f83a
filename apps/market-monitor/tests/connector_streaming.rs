//! Connector Streaming Integration Tests
//!
//! Drives `CoinbaseConnector` against a local WebSocket server and checks
//! the subscribe frame, frame forwarding and the connection lifecycle.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use market_monitor::{
    ApiCredentials, CoinbaseConfig, CoinbaseConnector, ConnectionState, EventForwarder,
    ExchangeConnectorPort, InMemoryEventPublisher, ReconnectPolicy, StreamingOrchestrator,
    SymbolSet,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

/// What the fake exchange does after reading the subscribe frame.
#[derive(Clone, Copy)]
enum Script {
    /// Send the frames, then keep the socket open until the client closes.
    SendAndHold,
    /// Send the frames, then close from the server side.
    SendAndClose,
}

/// Fake exchange: reports every subscribe frame it receives.
async fn spawn_exchange(
    frames: Vec<String>,
    script: Script,
) -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (sub_tx, sub_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let frames = frames.clone();
            let sub_tx = sub_tx.clone();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    let _ = sub_tx.send(serde_json::from_str::<Value>(text.as_str()).unwrap());
                }

                for frame in frames {
                    ws.send(Message::Text(frame.into())).await.unwrap();
                }

                match script {
                    Script::SendAndHold => {
                        while let Some(Ok(msg)) = ws.next().await {
                            if msg.is_close() {
                                break;
                            }
                        }
                    }
                    Script::SendAndClose => {
                        let _ = ws.close(None).await;
                    }
                }
            });
        }
    });

    (format!("ws://{addr}"), sub_rx)
}

async fn wait_for_state(connector: &CoinbaseConnector, expected: ConnectionState) {
    timeout(WAIT, async {
        while connector.state() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("connector never reached {expected}"));
}

#[tokio::test]
async fn subscribes_and_forwards_raw_frames() {
    let ticker = r#"{"type":"ticker","product_id":"BTC-USD","price":"65000.12345678"}"#;
    let (url, mut subscriptions) =
        spawn_exchange(vec![ticker.to_string()], Script::SendAndHold).await;

    let (tx, mut rx) = mpsc::channel(16);
    let connector = CoinbaseConnector::new(CoinbaseConfig::public(url), tx, CancellationToken::new());

    connector
        .connect(&SymbolSet::new(["BTC-USD", "ETH-USD"]))
        .await
        .unwrap();
    assert_eq!(connector.state(), ConnectionState::Subscribed);
    assert!(connector.is_connected());
    assert!(!connector.is_authenticated());

    let frame = timeout(WAIT, subscriptions.recv()).await.unwrap().unwrap();
    assert_eq!(frame["type"], "subscribe");
    assert_eq!(frame["channels"][0]["name"], "ticker");
    assert_eq!(
        frame["channels"][0]["product_ids"],
        serde_json::json!(["BTC-USD", "ETH-USD"])
    );
    assert!(frame.get("signature").is_none());

    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.message, ticker);
    assert_eq!(event.source, "coinbase");

    connector.disconnect().await.unwrap();
    assert_eq!(connector.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn signed_subscribe_frame_verifies() {
    let (url, mut subscriptions) = spawn_exchange(Vec::new(), Script::SendAndHold).await;

    let credentials = ApiCredentials::from_parts("k", "c2VjcmV0", "p").unwrap();
    let config = CoinbaseConfig {
        public_url: "ws://127.0.0.1:9".to_string(),
        private_url: url,
        credentials: Some(credentials.clone()),
        ..CoinbaseConfig::default()
    };
    let (tx, _rx) = mpsc::channel(16);
    let connector = CoinbaseConnector::new(config, tx, CancellationToken::new());

    connector.connect(&SymbolSet::new(["BTC-USD"])).await.unwrap();
    assert!(connector.is_authenticated());

    let frame = timeout(WAIT, subscriptions.recv()).await.unwrap().unwrap();
    let timestamp = frame["timestamp"].as_str().unwrap();
    assert_eq!(frame["key"], "k");
    assert_eq!(frame["passphrase"], "p");
    assert_eq!(frame["signature"], credentials.sign(timestamp).unwrap());

    connector.disconnect().await.unwrap();
}

#[tokio::test]
async fn remote_close_without_reconnect_stays_down() {
    let (url, mut subscriptions) =
        spawn_exchange(vec![r#"{"type":"heartbeat"}"#.to_string()], Script::SendAndClose).await;

    let (tx, mut rx) = mpsc::channel(16);
    let connector = CoinbaseConnector::new(CoinbaseConfig::public(url), tx, CancellationToken::new());
    connector.connect(&SymbolSet::new(["BTC-USD"])).await.unwrap();

    timeout(WAIT, subscriptions.recv()).await.unwrap().unwrap();
    timeout(WAIT, rx.recv()).await.unwrap().unwrap();

    wait_for_state(&connector, ConnectionState::Disconnected).await;
    assert!(!connector.is_connected());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(subscriptions.try_recv().is_err(), "reconnected while disabled");
}

#[tokio::test]
async fn reconnect_resubscribes_same_symbols() {
    let (url, mut subscriptions) = spawn_exchange(Vec::new(), Script::SendAndClose).await;

    let config = CoinbaseConfig {
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(20),
            max_attempts: 3,
            jitter: 0.0,
            ..ReconnectPolicy::enabled()
        },
        ..CoinbaseConfig::public(url)
    };
    let (tx, _rx) = mpsc::channel(16);
    let shutdown = CancellationToken::new();
    let connector = CoinbaseConnector::new(config, tx, shutdown.clone());
    connector.connect(&SymbolSet::new(["SOL-USD"])).await.unwrap();

    let first = timeout(WAIT, subscriptions.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, subscriptions.recv()).await.unwrap().unwrap();
    assert_eq!(first["channels"], second["channels"]);
    assert_eq!(connector.symbols().to_vec(), vec!["SOL-USD"]);

    shutdown.cancel();
}

#[tokio::test]
async fn stop_during_backoff_cancels_reconnect() {
    let (url, mut subscriptions) = spawn_exchange(Vec::new(), Script::SendAndClose).await;

    let config = CoinbaseConfig {
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(300),
            multiplier: 1.0,
            max_attempts: 0,
            jitter: 0.0,
            ..ReconnectPolicy::enabled()
        },
        ..CoinbaseConfig::public(url)
    };
    let (tx, _rx) = mpsc::channel(16);
    let connector = Arc::new(CoinbaseConnector::new(config, tx, CancellationToken::new()));
    let orchestrator =
        StreamingOrchestrator::new(SymbolSet::new(["BTC-USD"])).with_connector(connector.clone());

    orchestrator.start_streaming().await.unwrap().unwrap();
    timeout(WAIT, subscriptions.recv()).await.unwrap().unwrap();
    wait_for_state(&connector, ConnectionState::Disconnected).await;

    orchestrator.stop_streaming().await;
    assert_eq!(connector.state(), ConnectionState::Disconnected);
    while subscriptions.try_recv().is_ok() {}

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let mut late = 0;
    while subscriptions.try_recv().is_ok() {
        late += 1;
    }
    assert_eq!(late, 0, "resubscribed after stop_streaming");
    assert_eq!(connector.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn stop_closes_live_connector() {
    let (url, _subscriptions) = spawn_exchange(Vec::new(), Script::SendAndHold).await;
    let (tx, _rx) = mpsc::channel(16);
    let connector = CoinbaseConnector::new(CoinbaseConfig::public(url), tx, CancellationToken::new());

    connector.connect(&SymbolSet::new(["BTC-USD"])).await.unwrap();
    connector.stop().await.unwrap();
    assert_eq!(connector.state(), ConnectionState::Disconnected);

    connector.connect(&SymbolSet::new(["BTC-USD"])).await.unwrap();
    assert!(connector.is_connected());
    connector.stop().await.unwrap();
}

#[tokio::test]
async fn second_connect_while_live_is_rejected() {
    let (url, _subscriptions) = spawn_exchange(Vec::new(), Script::SendAndHold).await;
    let (tx, _rx) = mpsc::channel(16);
    let connector = CoinbaseConnector::new(CoinbaseConfig::public(url), tx, CancellationToken::new());

    connector.connect(&SymbolSet::new(["BTC-USD"])).await.unwrap();
    let err = connector
        .connect(&SymbolSet::new(["ETH-USD"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid connection state"));

    connector.disconnect().await.unwrap();
}

#[tokio::test]
async fn frames_reach_publisher_through_forwarder() {
    let frames: Vec<String> = (0..5)
        .map(|i| format!(r#"{{"type":"ticker","product_id":"BTC-USD","sequence":{i}}}"#))
        .collect();
    let (url, _subscriptions) = spawn_exchange(frames.clone(), Script::SendAndHold).await;

    let publisher = Arc::new(InMemoryEventPublisher::new());
    let (tx, rx) = mpsc::channel(16);
    let forwarder = tokio::spawn(EventForwarder::new(rx, publisher.clone()).run());

    let connector = CoinbaseConnector::new(CoinbaseConfig::public(url), tx, CancellationToken::new());
    connector.connect(&SymbolSet::new(["BTC-USD"])).await.unwrap();

    timeout(WAIT, async {
        while publisher.len() < frames.len() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    connector.disconnect().await.unwrap();
    drop(connector);

    let forwarded = timeout(WAIT, forwarder).await.unwrap().unwrap();
    assert_eq!(forwarded, 5);
    let messages: Vec<String> = publisher.events().into_iter().map(|e| e.message).collect();
    assert_eq!(messages, frames);
}
