use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use market_data::StreamFilter;
use tracing::{debug, warn};

/// Stream engine events, optionally narrowed by `?market_id=` and `?user_address=`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    params: Result<Query<StreamFilter>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(filter) = params?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, filter)))
}

async fn handle_socket(socket: WebSocket, state: AppState, filter: StreamFilter) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.publisher.subscribe();
    debug!(?filter, "Stream client connected");

    loop {
        tokio::select! {
            event = subscription.next() => {
                let Some(event) = event else {
                    break;
                };
                if !filter.matches(&event) {
                    continue;
                }
                let text = match serde_json::to_string(event.as_ref()) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(sequence = event.sequence, error = %e, "Failed to encode stream event");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Clients only listen; anything else they send is ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!("Stream client disconnected");
}
