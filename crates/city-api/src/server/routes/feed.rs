async fn group_feed(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| feed_socket(socket, state, group_id))
}

/// Push the settled group immediately, then again on every inbound frame or
/// every `FEED_REFRESH_INTERVAL`, whichever comes first. Each push re-runs the
/// resolution gate, so a feed left open across a period boundary delivers the
/// resolved state without any client action.
async fn feed_socket(mut socket: WebSocket, state: AppState, group_id: String) {
    loop {
        let settled = {
            let mut service = state.service.lock().await;
            service.get_group(&group_id)
        };

        match settled {
            Ok(group) => {
                if send_group(&mut socket, &group).await.is_err() {
                    return;
                }
            }
            Err(ServiceError::GroupNotFound) => {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: FEED_CLOSE_GROUP_GONE,
                        reason: "Group not found".into(),
                    })))
                    .await;
                return;
            }
            Err(err) => {
                debug!(group_id = %group_id, error = %err, "feed refresh failed");
                return;
            }
        }

        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    // Any other inbound frame nudges an immediate refresh.
                    Some(Ok(_)) => {}
                }
            }
            () = tokio::time::sleep(FEED_REFRESH_INTERVAL) => {}
        }
    }
}

async fn send_group(socket: &mut WebSocket, group: &Group) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(group).map_err(axum::Error::new)?;
    socket.send(Message::Text(payload.into())).await
}
