// tests/ws_live.rs
// End-to-end checks of the real-time channel over a real socket.

use std::{net::SocketAddr, sync::Arc};

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message;

use esp32telem::*;

struct NoClock;

impl Clock for NoClock {
    fn now(&self) -> Option<DateTime<Utc>> {
        None
    }
}

struct Fixture {
    state: Arc<Pin<Box<MyState>>>,
    pipeline: TelemetryPipeline,
    addr: SocketAddr,
    _dir: tempfile::TempDir,
}

async fn serve(temp_c: f32) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DeviceConfig::default();
    config.log_path = dir
        .path()
        .join("readings.jsonl")
        .to_string_lossy()
        .into_owned();

    let state = Arc::new(Box::pin(MyState::new(
        config,
        Box::new(MemSettings::default()),
    )));

    let pipeline = TelemetryPipeline::new(
        Box::new(move || temp_c),
        Arc::new(NoClock),
        state.hub.clone(),
        state.datalog.clone(),
    );
    *state.pipeline.write().await = Some(pipeline.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    Fixture {
        state,
        pipeline,
        addr,
        _dir: dir,
    }
}

async fn recv_text(
    ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> String {
    let msg = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("socket error");
    msg.into_text().unwrap().to_string()
}

#[tokio::test]
async fn tick_is_broadcast_to_connected_subscribers() {
    let fx = serve(21.5).await;
    let url = format!("ws://{}/ws", fx.addr);

    let (mut ws_a, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut ws_b, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    // give the server time to register both subscribers
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.state.hub.read().await.len(), 2);

    fx.pipeline.tick().await;

    for ws in [&mut ws_a, &mut ws_b] {
        let line = recv_text(ws).await;
        let v: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(v["temp"], "21.50");
        assert_eq!(v["time"], "N/A");
    }

    // the same run also appended exactly one log line
    let logged = String::from_utf8(fx.state.datalog.read_all()).unwrap();
    assert_eq!(logged.lines().count(), 1);
}

#[tokio::test]
async fn get_readings_answers_only_the_requester() {
    let fx = serve(19.0).await;
    let url = format!("ws://{}/ws", fx.addr);

    let (mut requester, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut bystander, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    requester
        .send(Message::Text("getReadings".into()))
        .await
        .unwrap();

    let line = recv_text(&mut requester).await;
    let v: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
    assert_eq!(v["temp"], "19.00");

    // the bystander sees nothing, and nothing was logged
    let quiet = timeout(Duration::from_millis(200), bystander.next()).await;
    assert!(quiet.is_err(), "bystander unexpectedly received a frame");
    assert!(fx.state.datalog.read_all().is_empty());
}

#[tokio::test]
async fn other_inbound_text_is_ignored() {
    let fx = serve(19.0).await;
    let url = format!("ws://{}/ws", fx.addr);

    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    ws.send(Message::Text("bogus command".into())).await.unwrap();

    let quiet = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(quiet.is_err(), "unexpected reply to an unknown command");
}

#[tokio::test]
async fn closed_sockets_are_pruned() {
    let fx = serve(19.0).await;
    let url = format!("ws://{}/ws", fx.addr);

    let (ws_a, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (_ws_b, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.state.hub.read().await.len(), 2);

    drop(ws_a);
    tokio::time::sleep(Duration::from_millis(100)).await;

    fx.state.hub.write().await.prune();
    assert_eq!(fx.state.hub.read().await.len(), 1);
}

// EOF
