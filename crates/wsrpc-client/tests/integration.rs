//! Client behaviour against a scripted WebSocket peer.

use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use wsrpc_client::{Client, ClientError, ErrorKind};
use wsrpc_protocol::{codec, ReplyFrame, RpcError};

/// Accept one connection and hand the raw WebSocket to `script`.
async fn fake_server<F, Fut>(script: F) -> String
where
    F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        script(ws).await;
    });
    format!("ws://{}", addr)
}

fn frame_bytes(message: Message) -> Vec<u8> {
    match message {
        Message::Text(text) => text.as_str().as_bytes().to_vec(),
        Message::Binary(data) => data.to_vec(),
        other => panic!("unexpected message {:?}", other),
    }
}

#[tokio::test]
async fn test_out_of_order_replies_reach_their_callers() {
    let url = fake_server(|mut ws| async move {
        let first = codec::decode_call(&frame_bytes(ws.next().await.unwrap().unwrap())).unwrap();
        let second = codec::decode_call(&frame_bytes(ws.next().await.unwrap().unwrap())).unwrap();

        // Answer the later call first.
        for call in [second, first] {
            let reply = ReplyFrame::success(call.id, json!(format!("{}:{}", call.method, call.args[0])));
            ws.send(Message::binary(codec::encode_reply(&reply).unwrap()))
                .await
                .unwrap();
        }
        // Keep the socket open until the client hangs up.
        while ws.next().await.is_some() {}
    })
    .await;

    let client = Client::connect(&url).await.unwrap();
    let (a, b) = tokio::join!(
        client.call("echo", "A", vec![json!(1)]),
        client.call("echo", "B", vec![json!(2)]),
    );

    assert_eq!(a.unwrap(), json!("A:1"));
    assert_eq!(b.unwrap(), json!("B:2"));
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_error_reply_becomes_rpc_error() {
    let url = fake_server(|mut ws| async move {
        let call = codec::decode_call(&frame_bytes(ws.next().await.unwrap().unwrap())).unwrap();
        let reply = ReplyFrame::failure(
            Some(call.id),
            RpcError::new(ErrorKind::MethodNotFound, "no such method"),
        );
        ws.send(Message::binary(codec::encode_reply(&reply).unwrap()))
            .await
            .unwrap();
        while ws.next().await.is_some() {}
    })
    .await;

    let client = Client::connect(&url).await.unwrap();
    let err = client.call("user", "Goodbye", vec![]).await.unwrap_err();
    assert_eq!(err.rpc().unwrap().kind, ErrorKind::MethodNotFound);
}

#[tokio::test]
async fn test_call_times_out_without_reply() {
    let url = fake_server(|mut ws| async move { while ws.next().await.is_some() {} }).await;

    let mut client = Client::connect(&url).await.unwrap();
    client.set_timeout(Duration::from_millis(50));

    let err = client.call("slow", "Never", vec![]).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)));
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_server_hangup_fails_pending_calls() {
    let url = fake_server(|mut ws| async move {
        let _ = ws.next().await;
        let _ = ws.close(None).await;
    })
    .await;

    let client = Client::connect(&url).await.unwrap();
    let err = client.call("user", "SayHello", vec![json!("Ann")]).await.unwrap_err();
    assert!(matches!(err, ClientError::Closed));

    // Later calls fail fast.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(client.is_closed());
    assert!(matches!(
        client.call("user", "SayHello", vec![]).await,
        Err(ClientError::Closed)
    ));
}

#[tokio::test]
async fn test_connect_with_retry_reports_last_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = Client::connect_with_retry(&format!("ws://{}", addr), 1).await;
    assert!(matches!(result, Err(ClientError::WebSocket(_))));
}
