//! End-to-end tests driving the gateway router over real sockets.

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use tradewire_gateway::{
    GatewayConfig, GatewayState, JwtManager, OutboundEvent, SubjectId, create_router,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_gateway(config: GatewayConfig) -> (SocketAddr, Arc<GatewayState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(GatewayState::with_defaults(config));
    let router = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, state)
}

fn token_for(config: &GatewayConfig, subject: &str) -> String {
    JwtManager::new(&config.jwt)
        .generate_token(&SubjectId::from(subject), None)
        .unwrap()
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let (client, _response) = connect_async(format!("ws://{addr}/ws{query}")).await.unwrap();
    client
}

async fn next_event(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(150), client.next()).await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_welcome_then_in_band_authentication() {
    let config = GatewayConfig::default();
    let token = token_for(&config, "42");
    let (addr, state) = spawn_gateway(config).await;
    let mut client = connect(addr, "").await;

    let welcome = next_event(&mut client).await;
    assert_eq!(
        welcome,
        json!({ "type": "welcome", "payload": "Connected to Trading Platform WebSocket" })
    );

    send_json(&mut client, json!({ "type": "authenticate", "token": token })).await;

    let success = next_event(&mut client).await;
    assert_eq!(success, json!({ "type": "auth_success", "payload": { "userId": "42" } }));
    let initial = next_event(&mut client).await;
    assert_eq!(initial["type"], "initial_state");
    assert_eq!(initial["payload"]["accounts"], json!([]));

    assert_eq!(state.registry().by_subject(&SubjectId::from("42")).len(), 1);
}

#[tokio::test]
async fn test_failed_authentication_keeps_connection_usable() {
    let config = GatewayConfig::default();
    let token = token_for(&config, "7");
    let (addr, state) = spawn_gateway(config).await;
    let mut client = connect(addr, "").await;
    next_event(&mut client).await;

    send_json(&mut client, json!({ "type": "authenticate", "token": "forged" })).await;
    let error = next_event(&mut client).await;
    assert_eq!(
        error,
        json!({ "type": "auth_error", "payload": { "message": "Invalid authentication token" } })
    );
    assert_eq!(state.registry().authenticated_count(), 0);

    client.send(Message::Text("{not json".into())).await.unwrap();
    send_json(&mut client, json!({ "type": "subscribe", "symbol": "BTC" })).await;
    let echo = next_event(&mut client).await;
    assert_eq!(echo["type"], OutboundEvent::ECHO);
    assert_eq!(echo["payload"]["symbol"], "BTC");

    send_json(&mut client, json!({ "type": "authenticate", "token": token })).await;
    assert_eq!(next_event(&mut client).await["type"], "auth_success");
    assert_eq!(next_event(&mut client).await["type"], "initial_state");
}

#[tokio::test]
async fn test_subject_broadcast_reaches_only_that_subject() {
    let config = GatewayConfig::default();
    let token = token_for(&config, "u1");
    let (addr, state) = spawn_gateway(config).await;

    let mut first = connect(addr, &format!("?token={token}")).await;
    let mut second = connect(addr, &format!("?token={token}")).await;
    let mut anonymous = connect(addr, "").await;
    for client in [&mut first, &mut second, &mut anonymous] {
        assert_eq!(next_event(client).await["type"], "welcome");
    }
    wait_until(|| state.registry().by_subject(&SubjectId::from("u1")).len() == 2).await;

    let report = state
        .broadcaster()
        .to_subject(
            &SubjectId::from("u1"),
            OutboundEvent::new("notification", json!({ "text": "order filled" })),
        )
        .await;

    assert_eq!(report.delivered, 2);
    for client in [&mut first, &mut second] {
        let event = next_event(client).await;
        assert_eq!(event["type"], "notification");
        assert_eq!(event["payload"]["text"], "order filled");
    }
    assert_silent(&mut anonymous).await;
}

#[tokio::test]
async fn test_close_removes_connection() {
    let (addr, state) = spawn_gateway(GatewayConfig::default()).await;
    let mut client = connect(addr, "").await;
    next_event(&mut client).await;
    assert_eq!(state.registry().connection_count(), 1);

    client.close(None).await.unwrap();
    drop(client);

    wait_until(|| state.registry().connection_count() == 0).await;
}

#[tokio::test]
async fn test_shutdown_closes_client_sockets() {
    let (addr, state) = spawn_gateway(GatewayConfig::default()).await;
    let mut client = connect(addr, "").await;
    next_event(&mut client).await;

    assert_eq!(state.shutdown(), 1);

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(frame) = client.next().await {
            if matches!(frame, Ok(Message::Close(_)) | Err(_)) {
                return;
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
