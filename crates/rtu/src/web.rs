//! Live dashboard server: serves the embedded single-page UI, a JSON status
//! endpoint, and a WebSocket that pushes the current snapshot at ~1 Hz and
//! accepts scenario commands back from the page.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::inject::Command;
use crate::registers::RegisterMap;
use crate::state::SharedState;

const INDEX_HTML: &str = include_str!("ui/index.html");

/// Snapshot push period for connected dashboards.
const PUSH_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Composite app state shared across all handlers
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub registers: Arc<Mutex<RegisterMap>>,
    pub inject_tx: mpsc::Sender<Command>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        INDEX_HTML,
    )
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.shared.read().await;
    Json(st.to_status())
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ---------------------------------------------------------------------------
// WebSocket push loop + command handling
// ---------------------------------------------------------------------------

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut ticker = tokio::time::interval(PUSH_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = state.shared.read().await.snapshot();
                let Ok(json) = serde_json::to_string(&snapshot) else {
                    continue;
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_command(text.as_str(), &state).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Process one command frame from the dashboard. Bad frames are logged and
/// dropped; they never mutate state.
async fn handle_command(text: &str, state: &AppState) {
    let command: Command = match serde_json::from_str(text) {
        Ok(c) => c,
        Err(e) => {
            warn!("bad dashboard command: {e}");
            return;
        }
    };
    if let Err(e) = command.validate() {
        warn!("dashboard command rejected: {e}");
        return;
    }

    match command {
        Command::SetCoil { coil, value } => {
            // Coil toggles go through the same register-serialization
            // discipline as fieldbus writes.
            let outcome = {
                let Ok(mut regs) = state.registers.lock() else {
                    warn!("register map lock poisoned — dropping coil write");
                    return;
                };
                regs.set_coil(coil, value != 0)
            };
            match outcome {
                Ok(()) => {
                    let mut st = state.shared.write().await;
                    st.record_command(format!("dashboard: coil {coil} set {value}"));
                }
                Err(e) => warn!("dashboard coil write rejected: {e}"),
            }
        }
        command => {
            // The scan loop applies it between scans and records the event.
            if state.inject_tx.send(command).await.is_err() {
                warn!("injection channel closed — dropping command");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("dashboard listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("web server terminated")?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plant::ScanResult;
    use crate::process::{SensorVector, SimSummary};
    use crate::state::{RtuState, Snapshot};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tokio::sync::RwLock;
    use tower::ServiceExt; // for `oneshot`

    fn test_state() -> (AppState, mpsc::Receiver<Command>) {
        let snapshot = Snapshot {
            sensors: SensorVector::default(),
            derived: ScanResult::default(),
            sim: SimSummary {
                sim_time: 0.0,
                sim_hour: 6.0,
                sim_day: 0,
                speed: 1.0,
                active_rain_events: 0,
                dosing_active: true,
                faults: Vec::new(),
            },
        };
        let (inject_tx, inject_rx) = mpsc::channel(8);
        let state = AppState {
            shared: Arc::new(RwLock::new(RtuState::new(snapshot))),
            registers: Arc::new(Mutex::new(RegisterMap::new())),
            inject_tx,
        };
        (state, inject_rx)
    }

    #[tokio::test]
    async fn index_returns_html() {
        let (state, _rx) = test_state();
        let app = router(state);
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let ct = resp
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(ct.contains("text/html"));
    }

    #[tokio::test]
    async fn api_status_returns_json_with_expected_fields() {
        let (state, _rx) = test_state();
        let app = router(state);
        let req = Request::builder()
            .uri("/api/status")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert!(json["uptime_secs"].is_u64());
        assert!(json["sensors"].is_object());
        assert!(json["derived"].is_object());
        assert!(json["sim"].is_object());
        assert!(json["events"].is_array());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (state, _rx) = test_state();
        let app = router(state);
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    // -- Command handling ---------------------------------------------------

    #[tokio::test]
    async fn injection_command_goes_down_the_channel() {
        let (state, mut rx) = test_state();
        handle_command(r#"{"action":"rain","peak":700}"#, &state).await;

        let cmd = rx.try_recv().unwrap();
        assert_eq!(
            cmd,
            Command::Rain {
                peak: 700.0,
                duration_hours: 6.0
            }
        );
    }

    #[tokio::test]
    async fn set_coil_writes_the_register_map() {
        let (state, mut rx) = test_state();
        handle_command(r#"{"action":"set_coil","coil":4,"value":1}"#, &state).await;

        // Nothing on the injection channel,
        assert!(rx.try_recv().is_err());
        // but the coil bank changed.
        let snap = state.registers.lock().unwrap().coil_snapshot();
        assert!(snap.auto_mode);
    }

    #[tokio::test]
    async fn out_of_range_coil_is_rejected() {
        let (state, _rx) = test_state();
        handle_command(r#"{"action":"set_coil","coil":99,"value":1}"#, &state).await;
        // No mutation, no event.
        let status = state.shared.read().await.to_status();
        assert!(status.events.is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_dropped() {
        let (state, mut rx) = test_state();
        handle_command("{not json", &state).await;
        handle_command(r#"{"action":"launch"}"#, &state).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_rain_parameters_are_rejected() {
        let (state, mut rx) = test_state();
        handle_command(r#"{"action":"rain","peak":-40}"#, &state).await;
        assert!(rx.try_recv().is_err());
    }
}
