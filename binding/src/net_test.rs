use frames::protocol::{FIELD_CHANGED, PING, PONG};
use tokio::net::TcpListener;

use super::*;
use crate::transport::Transport;

type ServerWs = WebSocketStream<TcpStream>;

fn binary(frame: &Frame) -> Message {
    Message::Binary(frames::encode_frame(frame).into())
}

async fn next(ws: &mut ServerWs) -> Frame {
    loop {
        let msg = ws.next().await.unwrap().unwrap();
        if let Message::Binary(bytes) = msg {
            return frames::decode_frame(&bytes).unwrap();
        }
    }
}

fn reply_to(request: &Frame, status: Status, data: serde_json::Value) -> Frame {
    let mut reply = request_frame(&request.syscall, request.room_id.as_deref(), data);
    reply.parent_id = Some(request.id.clone());
    reply.status = status;
    reply
}

/// Accept one client, greet it and hand the socket to `script`.
async fn fake_server<F, Fut>(script: F) -> String
where
    F: FnOnce(ServerWs) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(binary(&request_frame(CONNECTED, None, json!({"session_id": "s1"}))))
            .await
            .unwrap();
        script(ws).await;
    });
    format!("ws://{addr}/api/ws")
}

#[tokio::test]
async fn connect_joins_and_streams_frames() {
    let url = fake_server(|mut ws| async move {
        let join = next(&mut ws).await;
        assert_eq!(join.syscall, JOIN_ROOM);
        assert_eq!(join.data["room_id"], json!("R"));

        // A notification that overtakes the join reply.
        let early = request_frame(
            FIELD_CHANGED,
            Some("R"),
            json!({"field": {"id": "hp", "type": "number", "value": 3, "owner": "s9", "version": 2}}),
        );
        ws.send(binary(&early)).await.unwrap();
        let snapshot = json!({"room_id": "R", "session_id": "s1", "fields": [], "entities": {"player": []}});
        ws.send(binary(&reply_to(&join, Status::Done, snapshot)))
            .await
            .unwrap();

        let ping = next(&mut ws).await;
        let mut pong = reply_to(&ping, Status::Done, ping.data.clone());
        pong.syscall = PONG.to_owned();
        ws.send(binary(&pong)).await.unwrap();
        // Hold the socket open until the client is done.
        let _ = ws.next().await;
    })
    .await;

    let conn = Connection::connect(&url, "R").await.unwrap();
    assert_eq!(conn.session_id, "s1");
    assert_eq!(conn.snapshot.room_id, "R");

    conn.transport
        .send(request_frame(PING, Some("R"), json!({"n": 1})))
        .unwrap();
    let (mut ctx, mut inbound) = conn.into_context();
    assert_eq!(ctx.room_id(), Some("R"));

    let early = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    ctx.apply_frame(&early);
    assert_eq!(ctx.owner_of("hp"), Some("s9"));

    let pong = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pong.syscall, PONG);
    assert_eq!(pong.data["n"], json!(1));
}

#[tokio::test]
async fn join_error_is_reported() {
    let url = fake_server(|mut ws| async move {
        let join = next(&mut ws).await;
        let error = reply_to(&join, Status::Error, json!({"code": "E_ROOM_FULL", "message": "room R is full (1 clients)"}));
        ws.send(binary(&error)).await.unwrap();
        let _ = ws.next().await;
    })
    .await;

    let err = Connection::connect(&url, "R").await.err().unwrap();
    match err {
        BindingError::ServerError { syscall, message } => {
            assert_eq!(syscall, JOIN_ROOM);
            assert!(message.contains("full"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unreachable_server_fails_to_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = Connection::connect(&format!("ws://{addr}/api/ws"), "R").await.err().unwrap();
    assert!(matches!(err, BindingError::WsConnect(_)));
}
