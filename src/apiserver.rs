// apiserver.rs

use askama::Template;
use axum::{
    Json, Router,
    body::Body,
    extract::{
        Form, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{Response, StatusCode, header},
    response::{Html, IntoResponse},
    routing::*,
};
pub use axum_macros::debug_handler;
use futures::{SinkExt, StreamExt};
use log::*;
use tokio::sync::mpsc;

use crate::*;

pub async fn run_api_server(state: Arc<Pin<Box<MyState>>>) -> anyhow::Result<()> {
    loop {
        if *state.wifi_up.read().await {
            break;
        }
        sleep(Duration::from_secs(1)).await;
    }

    let listen = format!("0.0.0.0:{}", state.config.read().await.port);
    let addr = listen.parse::<net::SocketAddr>()?;

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening to {listen}");
    Ok(axum::serve(listener, app.into_make_service()).await?)
}

pub fn router(state: Arc<Pin<Box<MyState>>>) -> Router {
    Router::new()
        .route("/", get(get_index))
        .route("/ws", get(get_ws))
        .route("/log", get(get_log))
        .route("/clear_log", get(clear_log))
        .route("/uptime", get(get_uptime))
        .route(
            "/config",
            get(get_config).post(post_config).options(options),
        )
        .route("/reset_config", get(reset_config))
        .route("/credentials", post(post_credentials).options(options))
        .with_state(state)
}

pub async fn options(State(state): State<Arc<Pin<Box<MyState>>>>) -> Response<Body> {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} options()");

    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "get,post"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "content-type"),
        ],
    )
        .into_response()
}

pub async fn get_index(State(state): State<Arc<Pin<Box<MyState>>>>) -> Response<Body> {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} get_index()");

    let index = match state.config.read().await.render() {
        Err(e) => {
            let err_msg = format!("Index template error: {e:?}\n");
            error!("{err_msg}");
            return (StatusCode::INTERNAL_SERVER_ERROR, err_msg).into_response();
        }
        Ok(s) => s,
    };
    (StatusCode::OK, Html(index)).into_response()
}

/// The real-time channel. Each accepted socket becomes one hub
/// subscriber for as long as the connection lives.
pub async fn get_ws(
    State(state): State<Arc<Pin<Box<MyState>>>>,
    ws: WebSocketUpgrade,
) -> Response<Body> {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} get_ws()");

    ws.on_upgrade(move |socket| handle_subscriber(state, socket))
}

async fn handle_subscriber(state: Arc<Pin<Box<MyState>>>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let id = match state
        .hub
        .write()
        .await
        .dispatch(SubscriberEvent::Connect { tx })
    {
        HubAction::Registered(id) => id,
        _ => return,
    };

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(line) => {
                    if sink.send(Message::Text(line.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },

            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let action = state.hub.write().await.dispatch(SubscriberEvent::Message {
                        id,
                        text: text.to_string(),
                    });
                    if let HubAction::ReadingRequested(req) = action {
                        // pipeline is absent in provisioning mode
                        let pipeline = state.pipeline.read().await.clone();
                        if let Some(pipeline) = pipeline {
                            pipeline.on_demand(req).await;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Subscriber {id} socket error: {e:?}");
                    break;
                }
            },
        }
    }

    state
        .hub
        .write()
        .await
        .dispatch(SubscriberEvent::Disconnect { id });
}

/// Raw log download; transport framing is the client's problem.
pub async fn get_log(State(state): State<Arc<Pin<Box<MyState>>>>) -> Response<Body> {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} get_log()");

    let bytes = state.datalog.read_all();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"readings.jsonl\"",
            ),
        ],
        bytes,
    )
        .into_response()
}

pub async fn clear_log(State(state): State<Arc<Pin<Box<MyState>>>>) -> (StatusCode, String) {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} clear_log()");

    state.datalog.clear();
    (StatusCode::OK, "OK".to_string())
}

pub async fn get_uptime(State(state): State<Arc<Pin<Box<MyState>>>>) -> (StatusCode, Json<Uptime>) {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} get_uptime()");

    let uptime = *state.uptime.read().await;
    (
        StatusCode::OK,
        Json(Uptime {
            uptime,
            uptime_s: format!("{uptime}s"),
        }),
    )
}

pub async fn get_config(
    State(state): State<Arc<Pin<Box<MyState>>>>,
) -> (StatusCode, Json<DeviceConfig>) {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} get_config()");
    (StatusCode::OK, Json(state.config.read().await.clone()))
}

pub async fn post_config(
    State(state): State<Arc<Pin<Box<MyState>>>>,
    Json(mut config): Json<DeviceConfig>,
) -> (StatusCode, String) {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} post_config()");

    if config.v4mask > 30 {
        let msg = "IPv4 mask error: bits must be between 0..30";
        error!("{}", msg);
        return (StatusCode::INTERNAL_SERVER_ERROR, msg.to_string());
    }

    if config.v4dhcp {
        // clear out these if we are using DHCP
        config.v4addr = net::Ipv4Addr::new(0, 0, 0, 0);
        config.v4mask = 0;
        config.v4gw = net::Ipv4Addr::new(0, 0, 0, 0);
        config.dns1 = net::Ipv4Addr::new(0, 0, 0, 0);
        config.dns2 = net::Ipv4Addr::new(0, 0, 0, 0);
    }

    info!("Saving new config...");
    Box::pin(save_conf(state, config)).await
}

pub async fn reset_config(State(state): State<Arc<Pin<Box<MyState>>>>) -> (StatusCode, String) {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} reset_config()");

    info!("Saving default config...");
    Box::pin(save_conf(state, DeviceConfig::default())).await
}

async fn save_conf(state: Arc<Pin<Box<MyState>>>, config: DeviceConfig) -> (StatusCode, String) {
    let saved = state.settings.write().await.save_config(&config);
    match saved {
        Ok(_) => {
            *state.config.write().await = config;
            info!("Config saved. Resetting soon...");
            *state.reset.write().await = true;
            (StatusCode::OK, "OK".to_string())
        }
        Err(e) => {
            let msg = format!("Settings write error: {e:?}");
            error!("{}", msg);
            (StatusCode::INTERNAL_SERVER_ERROR, msg)
        }
    }
}

/// Provisioning endpoint: persists the two credential values and asks
/// for a restart, which re-enters bootstrap from Idle.
pub async fn post_credentials(
    State(state): State<Arc<Pin<Box<MyState>>>>,
    Form(creds): Form<Credentials>,
) -> (StatusCode, String) {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!("#{cnt} post_credentials()");

    if !creds.is_provisioned() {
        let msg = "Both network name and secret are required";
        error!("{}", msg);
        return (StatusCode::BAD_REQUEST, msg.to_string());
    }

    let saved = state.settings.write().await.save_credentials(&creds);
    match saved {
        Ok(_) => {
            info!("Credentials saved. Resetting soon...");
            *state.reset.write().await = true;
            (StatusCode::OK, "OK".to_string())
        }
        Err(e) => {
            let msg = format!("Credential write error: {e:?}");
            error!("{}", msg);
            (StatusCode::INTERNAL_SERVER_ERROR, msg)
        }
    }
}

// EOF
