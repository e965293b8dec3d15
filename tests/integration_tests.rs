// End-to-end: fake backend (axum WebSocket feed + control API) driving the full console worker

mod common;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use common::*;
use fleetwatch::connection::ws::{CLOSE_UNAUTHORIZED, WsTransport, stats_url};
use fleetwatch::connection::{BackoffPolicy, ConnectionManager, ConnectionState, LivenessPolicy};
use fleetwatch::console::{Console, Notification, Presentation};
use fleetwatch::gateway::{ControlCommand, HttpControlGateway, Signal};
use fleetwatch::operator::OperatorCommand;
use fleetwatch::pending::PendingKey;
use fleetwatch::worker::{self, WorkerConfig, WorkerDeps};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const TOKEN: &str = "tok";
const CLOSE_SENTINEL: &str = "__close__";
const PING_SENTINEL: &str = "__ping__";
const INVALID_UTF8_SENTINEL: &str = "__invalid_utf8__";
/// Feed entries with this prefix go out as a binary frame carrying the rest.
const BINARY_PREFIX: &str = "__binary__:";
const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct Backend {
    feed: broadcast::Sender<String>,
}

async fn stats_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(backend): State<Backend>,
) -> impl IntoResponse {
    let authorized = query.get("token").map(String::as_str) == Some(TOKEN);
    let rx = backend.feed.subscribe();
    ws.on_upgrade(move |socket| serve_feed(socket, rx, authorized))
}

async fn serve_feed(mut socket: WebSocket, mut rx: broadcast::Receiver<String>, authorized: bool) {
    if !authorized {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_UNAUTHORIZED,
                reason: "unauthorized".into(),
            })))
            .await;
        return;
    }
    while let Ok(msg) = rx.recv().await {
        let frame = match msg.as_str() {
            CLOSE_SENTINEL => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            PING_SENTINEL => Message::Ping(b"hb".to_vec().into()),
            INVALID_UTF8_SENTINEL => Message::Binary(vec![0xff, 0xfe, 0xfd].into()),
            other => match other.strip_prefix(BINARY_PREFIX) {
                Some(rest) => Message::Binary(rest.as_bytes().to_vec().into()),
                None => Message::Text(other.to_owned().into()),
            },
        };
        if socket.send(frame).await.is_err() {
            return;
        }
    }
}

async fn kill_job(Form(form): Form<HashMap<String, String>>) -> impl IntoResponse {
    if form.get("pid").map(String::as_str) == Some("999") {
        return (
            StatusCode::NOT_FOUND,
            axum::Json(serde_json::json!({ "detail": "Process not found or not shell-managed" })),
        );
    }
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "message": "scheduled" })),
    )
}

async fn fake_backend() -> (String, broadcast::Sender<String>) {
    let (feed, _) = broadcast::channel(16);
    let app = Router::new()
        .route("/admin/ws/stats", get(stats_ws))
        .route("/admin/kill-job", post(kill_job))
        .with_state(Backend { feed: feed.clone() });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), feed)
}

struct Running {
    view_rx: watch::Receiver<Presentation>,
    notify_rx: broadcast::Receiver<Notification>,
    operator_tx: mpsc::Sender<OperatorCommand>,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

fn start_console(base: &str, token: &str) -> Running {
    let transport = WsTransport::from_base_url(base, token).unwrap();
    let (connection, channel_rx) =
        ConnectionManager::spawn(
            transport,
            BackoffPolicy::from_millis(20, 100),
            LivenessPolicy::default(),
            16,
        );
    let console = Console::default();
    let (notify_tx, notify_rx) = broadcast::channel(16);
    let (view_tx, view_rx) = watch::channel(console.presentation());
    let (operator_tx, operator_rx) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = worker::spawn(
        WorkerDeps {
            console,
            gateway: Arc::new(HttpControlGateway::new(base, token).unwrap()),
            connection,
            channel_rx,
            operator_rx,
            notify_tx,
            view_tx,
            shutdown_rx,
        },
        WorkerConfig {
            stats_log_interval_secs: 3600,
        },
    );
    Running {
        view_rx,
        notify_rx,
        operator_tx,
        shutdown_tx,
        handle,
    }
}

async fn wait_until(rx: &mut watch::Receiver<Presentation>, pred: impl FnMut(&Presentation) -> bool) {
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for presentation")
        .expect("worker gone");
}

async fn next_notice(rx: &mut broadcast::Receiver<Notification>) -> Notification {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("notification channel closed")
}

#[test]
fn stats_url_is_derived_from_base_url() {
    assert_eq!(
        stats_url("http://localhost:8000", "a b").unwrap(),
        "ws://localhost:8000/admin/ws/stats?token=a+b"
    );
    assert_eq!(
        stats_url("https://fleet.example.org/api/", "t").unwrap(),
        "wss://fleet.example.org/api/admin/ws/stats?token=t"
    );
    assert!(stats_url("ftp://x", "t").is_err());
}

#[tokio::test]
async fn kill_is_pending_until_snapshot_drops_pid() {
    let (base, feed) = fake_backend().await;
    let mut c = start_console(&base, TOKEN);
    wait_until(&mut c.view_rx, |p| p.status.is_open()).await;

    feed.send(snapshot_json(vec![user_json("bob", &[42])])).unwrap();
    wait_until(&mut c.view_rx, |p| p.rows.len() == 1).await;

    c.operator_tx
        .send(OperatorCommand::Control(ControlCommand::KillProcess {
            username: "bob".into(),
            pid: 42,
            signal: Signal::Term,
        }))
        .await
        .unwrap();
    wait_until(&mut c.view_rx, |p| p.pending == vec![PendingKey::new("bob", 42)]).await;
    assert!(matches!(
        next_notice(&mut c.notify_rx).await,
        Notification::CommandSucceeded { .. }
    ));

    feed.send(snapshot_json(vec![user_json("bob", &[42])])).unwrap();
    wait_until(&mut c.view_rx, |p| p.stats.snapshots_applied == 2).await;
    assert_eq!(c.view_rx.borrow().pending.len(), 1, "pid still listed");

    feed.send(snapshot_json(vec![user_json("bob", &[])])).unwrap();
    wait_until(&mut c.view_rx, |p| p.pending.is_empty()).await;
    assert_eq!(
        next_notice(&mut c.notify_rx).await,
        Notification::KillConfirmed(PendingKey::new("bob", 42))
    );

    c.shutdown_tx.send(()).unwrap();
    c.handle.await.unwrap();
    assert_eq!(c.view_rx.borrow().status, ConnectionState::Disconnected);
}

#[tokio::test]
async fn rejected_kill_rolls_back_before_any_snapshot() {
    let (base, feed) = fake_backend().await;
    let mut c = start_console(&base, TOKEN);
    wait_until(&mut c.view_rx, |p| p.status.is_open()).await;
    feed.send(snapshot_json(vec![user_json("bob", &[999])])).unwrap();
    wait_until(&mut c.view_rx, |p| p.rows.len() == 1).await;

    c.operator_tx
        .send(OperatorCommand::Control(ControlCommand::KillProcess {
            username: "bob".into(),
            pid: 999,
            signal: Signal::Term,
        }))
        .await
        .unwrap();

    match next_notice(&mut c.notify_rx).await {
        Notification::CommandFailed { error, .. } => assert!(error.contains("not shell-managed")),
        other => panic!("unexpected notification {other:?}"),
    }
    wait_until(&mut c.view_rx, |p| p.pending.is_empty()).await;
    assert_eq!(c.view_rx.borrow().stats.snapshots_applied, 1);

    c.shutdown_tx.send(()).unwrap();
    c.handle.await.unwrap();
}

#[tokio::test]
async fn reconnects_after_backend_closes_and_keeps_view() {
    let (base, feed) = fake_backend().await;
    let mut c = start_console(&base, TOKEN);
    wait_until(&mut c.view_rx, |p| p.status.is_open()).await;

    feed.send(snapshot_json(vec![user_json("bob", &[]), user_json("amy", &[])]))
        .unwrap();
    wait_until(&mut c.view_rx, |p| p.rows.len() == 2).await;

    feed.send(CLOSE_SENTINEL.to_string()).unwrap();
    wait_until(&mut c.view_rx, |p| p.stats.reconnects >= 1 && p.status.is_open()).await;
    assert_eq!(c.view_rx.borrow().rows.len(), 2, "view survives reconnect");

    feed.send(snapshot_json(vec![user_json("amy", &[])])).unwrap();
    wait_until(&mut c.view_rx, |p| p.rows.len() == 1).await;
    assert_eq!(c.view_rx.borrow().rows[0].username, "amy");

    feed.send("garbage".to_string()).unwrap();
    wait_until(&mut c.view_rx, |p| p.stats.decode_failures == 1).await;
    assert_eq!(c.view_rx.borrow().rows.len(), 1);

    c.shutdown_tx.send(()).unwrap();
    c.handle.await.unwrap();
}

#[tokio::test]
async fn binary_frames_are_forwarded_or_dropped_without_reconnect() {
    let (base, feed) = fake_backend().await;
    let mut c = start_console(&base, TOKEN);
    wait_until(&mut c.view_rx, |p| p.status.is_open()).await;

    feed.send(PING_SENTINEL.to_string()).unwrap();
    feed.send(INVALID_UTF8_SENTINEL.to_string()).unwrap();
    feed.send(format!(
        "{BINARY_PREFIX}{}",
        snapshot_json(vec![user_json("bob", &[7])])
    ))
    .unwrap();
    wait_until(&mut c.view_rx, |p| p.rows.len() == 1).await;

    {
        let p = c.view_rx.borrow();
        assert_eq!(p.rows[0].username, "bob");
        assert_eq!(p.stats.snapshots_applied, 1);
        assert_eq!(p.stats.decode_failures, 0, "undecodable binary never reaches the console");
        assert_eq!(p.stats.reconnects, 0);
        assert!(p.status.is_open());
    }

    feed.send(snapshot_json(vec![user_json("bob", &[]), user_json("amy", &[])]))
        .unwrap();
    wait_until(&mut c.view_rx, |p| p.rows.len() == 2).await;
    assert_eq!(c.view_rx.borrow().stats.reconnects, 0);

    c.shutdown_tx.send(()).unwrap();
    c.handle.await.unwrap();
}

#[tokio::test]
async fn unauthorized_token_keeps_retrying() {
    let (base, _feed) = fake_backend().await;
    let mut c = start_console(&base, "wrong");
    wait_until(&mut c.view_rx, |p| p.stats.reconnects >= 2).await;
    assert!(c.view_rx.borrow().aggregate.is_none());

    c.shutdown_tx.send(()).unwrap();
    c.handle.await.unwrap();
    assert_eq!(c.view_rx.borrow().status, ConnectionState::Disconnected);
}
