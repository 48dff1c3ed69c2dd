//! Websocket session streaming execution output.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::models::{DataLog, DataRunId, DataStop, Event, EventCode, OpCode, Operation, WsError};
use super::AppState;
use crate::models::ExecutionRequest;
use crate::sandbox::output::stream_channel;
use crate::sandbox::OutputReceiver;

type EventSender = mpsc::Sender<Event>;

const EVENT_BUFFER: usize = 64;

/// WebSocket connection handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (events, mut outgoing) = mpsc::channel::<Event>(EVENT_BUFFER);
    debug!("new websocket connection");

    let writer = tokio::spawn(async move {
        while let Some(event) = outgoing.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "failed encoding event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let state = state.clone();
                let events = events.clone();
                tokio::spawn(async move { handle_operation(&state, &text, &events).await });
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(Message::Binary(_)) => {
                send_error(&events, 0, WsError::invalid_message_type()).await;
            }
            Ok(_) => {}
        }
    }

    drop(events);
    // in-flight executions keep their own senders and finish on their own
    let _ = writer.await;
    debug!("websocket connection closed");
}

/// Handles one text frame. Every failure is answered with an error event.
pub async fn handle_operation(state: &AppState, text: &str, events: &EventSender) {
    let operation: Operation = match serde_json::from_str(text) {
        Ok(operation) => operation,
        Err(e) => {
            send_error(events, 0, WsError::new(400, e.to_string())).await;
            return;
        }
    };
    let nonce = operation.nonce;

    let result = match OpCode::try_from(operation.op) {
        Ok(OpCode::Ping) => {
            send(events, Event::new(EventCode::Pong, nonce, "Pong!")).await;
            Ok(())
        }
        Ok(OpCode::Exec) => match parse_args::<ExecutionRequest>(operation.args) {
            Ok(request) => handle_exec(state, nonce, request, events).await,
            Err(e) => Err(e),
        },
        Ok(OpCode::Kill) => match parse_args::<DataRunId>(operation.args) {
            Ok(args) => handle_kill(state, &args.run_id).await,
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        send_error(events, nonce, e).await;
    }
}

async fn handle_exec(
    state: &AppState,
    nonce: i64,
    request: ExecutionRequest,
    events: &EventSender,
) -> Result<(), WsError> {
    if request.code.is_empty() {
        return Err(WsError::empty_code());
    }

    let (spawn_tx, spawn_rx) = oneshot::channel();
    let (out_tx, out_rx) = stream_channel();
    let (err_tx, err_rx) = stream_channel();

    let forwarder = tokio::spawn(forward_output(
        nonce,
        spawn_rx,
        out_rx,
        err_rx,
        events.clone(),
    ));

    let result = state
        .manager
        .run_in_sandbox(&state.shutdown, request, Some(spawn_tx), out_tx, err_tx)
        .await;
    let run_id = forwarder.await.unwrap_or_default();

    let elapsed = result.map_err(|e| WsError::from(&e))?;
    send(
        events,
        Event::new(
            EventCode::Stop,
            nonce,
            DataStop {
                run_id,
                exec_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            },
        ),
    )
    .await;

    Ok(())
}

/// Emits the spawn event and then one log event per output chunk until both
/// streams close. Returns the run ID.
async fn forward_output(
    nonce: i64,
    spawn: oneshot::Receiver<String>,
    mut stdout: OutputReceiver,
    mut stderr: OutputReceiver,
    events: EventSender,
) -> String {
    let run_id = match spawn.await {
        Ok(run_id) => run_id,
        // no sandbox was created
        Err(_) => return String::new(),
    };
    send(
        &events,
        Event::new(
            EventCode::Spawn,
            nonce,
            DataRunId {
                run_id: run_id.clone(),
            },
        ),
    )
    .await;

    let mut out_open = true;
    let mut err_open = true;
    while out_open || err_open {
        let log = tokio::select! {
            chunk = stdout.recv(), if out_open => match chunk {
                Some(chunk) => DataLog {
                    run_id: run_id.clone(),
                    stdout: String::from_utf8_lossy(&chunk).into_owned(),
                    ..Default::default()
                },
                None => {
                    out_open = false;
                    continue;
                }
            },
            chunk = stderr.recv(), if err_open => match chunk {
                Some(chunk) => DataLog {
                    run_id: run_id.clone(),
                    stderr: String::from_utf8_lossy(&chunk).into_owned(),
                    ..Default::default()
                },
                None => {
                    err_open = false;
                    continue;
                }
            },
        };
        send(&events, Event::new(EventCode::Log, nonce, log)).await;
    }

    run_id
}

async fn handle_kill(state: &AppState, run_id: &str) -> Result<(), WsError> {
    match state.manager.kill_and_clean_up(&state.shutdown, run_id).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(WsError::sandbox_not_running()),
        Err(e) => Err(WsError::from(&e)),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(
    args: Option<serde_json::Value>,
) -> Result<T, WsError> {
    serde_json::from_value(args.unwrap_or_default()).map_err(|e| WsError::new(400, e.to_string()))
}

async fn send(events: &EventSender, event: Event) {
    if events.send(event).await.is_err() {
        debug!("websocket closed before event could be sent");
    }
}

async fn send_error(events: &EventSender, nonce: i64, error: WsError) {
    send(events, Event::new(EventCode::Error, nonce, error)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::mocks::MockBehavior;
    use crate::testing::TestHarness;
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn state(harness: &TestHarness) -> AppState {
        AppState::new(
            harness.manager.clone(),
            &Config::default(),
            CancellationToken::new(),
        )
        .unwrap()
    }

    async fn collect(mut rx: mpsc::Receiver<Event>) -> Vec<Event> {
        let mut all = Vec::new();
        while let Some(event) = rx.recv().await {
            all.push(event);
        }
        all
    }

    #[tokio::test]
    async fn test_ping() {
        let harness = TestHarness::new(MockBehavior::default());
        let (tx, rx) = mpsc::channel(16);

        handle_operation(&state(&harness), r#"{"op": 0, "nonce": 5}"#, &tx).await;
        drop(tx);

        let events = collect(rx).await;
        assert_eq!(events, vec![Event::new(EventCode::Pong, 5, "Pong!")]);
    }

    #[tokio::test]
    async fn test_invalid_op_code() {
        let harness = TestHarness::new(MockBehavior::default());
        let (tx, rx) = mpsc::channel(16);

        handle_operation(&state(&harness), r#"{"op": 7, "nonce": 2}"#, &tx).await;
        drop(tx);

        let events = collect(rx).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, EventCode::Error);
        assert_eq!(events[0].nonce, 2);
        assert_eq!(
            events[0].data,
            Some(json!({"code": 400, "message": "invalid operation code"}))
        );
    }

    #[tokio::test]
    async fn test_exec_streams_spawn_log_stop() {
        let harness = TestHarness::new(MockBehavior::default().with_stdout("hi\n"));
        let (tx, rx) = mpsc::channel(16);

        handle_operation(
            &state(&harness),
            r#"{"op": 1, "nonce": 1, "args": {"language": "python3", "code": "print('hi')"}}"#,
            &tx,
        )
        .await;
        drop(tx);

        let events = collect(rx).await;
        let codes: Vec<EventCode> = events.iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![EventCode::Spawn, EventCode::Log, EventCode::Stop]);
        assert_eq!(events[0].data, Some(json!({"runid": "mock-0"})));
        assert_eq!(
            events[1].data,
            Some(json!({"runid": "mock-0", "stdout": "hi\n"}))
        );
        assert!(events.iter().all(|e| e.nonce == 1));
    }

    #[tokio::test]
    async fn test_exec_rejections() {
        let harness = TestHarness::new(MockBehavior::default());
        let (tx, rx) = mpsc::channel(16);
        let state = state(&harness);

        handle_operation(
            &state,
            r#"{"op": 1, "nonce": 1, "args": {"language": "python3", "code": ""}}"#,
            &tx,
        )
        .await;
        handle_operation(
            &state,
            r#"{"op": 1, "nonce": 2, "args": {"language": "cobol", "code": "x"}}"#,
            &tx,
        )
        .await;
        drop(tx);

        let events = collect(rx).await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].data,
            Some(json!({"code": 400, "message": "code is empty"}))
        );
        assert_eq!(
            events[1].data,
            Some(json!({"code": 400, "message": "unsupported language spec: cobol"}))
        );
    }

    #[tokio::test]
    async fn test_kill_unknown_run() {
        let harness = TestHarness::new(MockBehavior::default());
        let (tx, rx) = mpsc::channel(16);

        handle_operation(
            &state(&harness),
            r#"{"op": 2, "nonce": 9, "args": {"runid": "nope"}}"#,
            &tx,
        )
        .await;
        drop(tx);

        let events = collect(rx).await;
        assert_eq!(
            events[0].data,
            Some(json!({"code": 400, "message": "sandbox is not running"}))
        );
    }

    #[tokio::test]
    async fn test_kill_running_exec() {
        let harness = TestHarness::new(
            MockBehavior::default().running_for(Duration::from_secs(30)),
        );
        let state = state(&harness);
        let (tx, rx) = mpsc::channel(16);

        let exec = {
            let state = state.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                handle_operation(
                    &state,
                    r#"{"op": 1, "nonce": 1, "args": {"language": "python3", "code": "sleep()"}}"#,
                    &tx,
                )
                .await
            })
        };

        while harness.manager.running_ids().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle_operation(&state, r#"{"op": 2, "nonce": 2, "args": {"runid": "mock-0"}}"#, &tx).await;
        exec.await.unwrap();
        drop(tx);

        let events = collect(rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.code, EventCode::Stop);
        assert_eq!(last.nonce, 1);
        assert!(!events.iter().any(|e| e.code == EventCode::Error));
    }
}
