//! Integration tests driving both transports against in-process mock servers.

use crate::client::{ClientConfig, ClientError, connect_with_config};
use crate::pipeline::ResultCallback;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

fn test_config() -> ClientConfig {
    ClientConfig::new()
        .with_connection_timeout(Duration::from_secs(5))
        .with_inference_timeout(Duration::from_secs(5))
}

fn recording_callback() -> (ResultCallback, Arc<Mutex<Vec<(String, Value)>>>) {
    let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let callback: ResultCallback = Arc::new(move |doc, tag| {
        recorder.lock().unwrap().push((tag.to_string(), doc));
    });
    (callback, seen)
}

// ---- mock server plumbing -------------------------------------------------

async fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.ok()?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.ok()?;
    Some(payload)
}

async fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(payload).await.unwrap();
}

async fn write_json_frame(stream: &mut TcpStream, doc: &Value) {
    write_frame(stream, &serde_json::to_vec(doc).unwrap()).await;
}

async fn write_msgpack_frame(stream: &mut TcpStream, doc: &Value) {
    write_frame(stream, &rmp_serde::to_vec_named(doc).unwrap()).await;
}

fn stream_ack() -> Value {
    json!({"VERSION": 4, "success": true})
}

/// Accept the command connection the client opens at construction and the
/// stream connection it opens at `open_stream`, answering the stream-open
/// handshake. Returns the stream socket, ready for frame exchange.
async fn accept_stream(listener: &TcpListener, expected_model: &str) -> (TcpStream, TcpStream) {
    let (control, _) = listener.accept().await.unwrap();
    let (mut stream, _) = listener.accept().await.unwrap();

    let open = read_frame(&mut stream).await.unwrap();
    let record: Value = serde_json::from_slice(&open).unwrap();
    assert_eq!(record["op"], json!("stream"));
    assert_eq!(record["name"], json!(expected_model));
    write_json_frame(&mut stream, &stream_ack()).await;
    (control, stream)
}

// ---- TCP transport scenarios ----------------------------------------------

#[tokio::test]
async fn tcp_single_shot_happy_path() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (_control, mut stream) = accept_stream(&listener, "m").await;
        let frame = read_frame(&mut stream).await.unwrap();
        assert_eq!(frame, b"frame");
        write_msgpack_frame(
            &mut stream,
            &json!({"success": true, "result": [{"label": "cat", "score": 0.9}]}),
        )
        .await;
        // Close marker from close_stream.
        assert_eq!(read_frame(&mut stream).await.unwrap(), Vec::<u8>::new());
    });

    let mut client = connect_with_config(&addr.to_string(), test_config())
        .await
        .unwrap();
    client.open_stream("m", 4, None).await.unwrap();
    assert_eq!(client.outstanding_count(), 0);

    let result = client.predict(&[Bytes::from_static(b"frame")]).await.unwrap();
    assert_eq!(result["result"][0]["label"], json!("cat"));
    assert_eq!(client.outstanding_count(), 0);
    assert!(client.last_error().is_none());

    client.close_stream().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn tcp_streaming_backpressure_preserves_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (_control, mut stream) = accept_stream(&listener, "m").await;
        for _ in 0..5 {
            let _frame = read_frame(&mut stream).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            write_msgpack_frame(&mut stream, &json!({"success": true})).await;
        }
    });

    let mut client = connect_with_config(&addr.to_string(), test_config())
        .await
        .unwrap();
    client.open_stream("m", 2, None).await.unwrap();
    let (callback, seen) = recording_callback();
    client.install_callback(Some(callback)).unwrap();

    let started = std::time::Instant::now();
    for i in 0..5u32 {
        client
            .submit(&[Bytes::from(i.to_be_bytes().to_vec())], &i.to_string())
            .await
            .unwrap();
        assert!(client.outstanding_count() <= 2);
    }
    // With a window of 2, the later submits had to wait for replies.
    assert!(started.elapsed() >= Duration::from_millis(100));

    client.finish().await.unwrap();
    assert!(client.last_error().is_none());
    let tags: Vec<String> = seen.lock().unwrap().iter().map(|(t, _)| t.clone()).collect();
    assert_eq!(tags, vec!["0", "1", "2", "3", "4"]);

    client.close_stream().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn tcp_server_error_mid_stream_is_sticky() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (_control, mut stream) = accept_stream(&listener, "m").await;
        let mut replied = 0usize;
        // Keep draining frames; only the first five get replies.
        while let Some(_frame) = read_frame(&mut stream).await {
            match replied {
                0..=3 => write_msgpack_frame(&mut stream, &json!({"success": true})).await,
                4 => {
                    write_msgpack_frame(&mut stream, &json!({"success": false, "msg": "boom"}))
                        .await
                }
                _ => {}
            }
            replied += 1;
        }
    });

    let mut client = connect_with_config(&addr.to_string(), test_config())
        .await
        .unwrap();
    client.open_stream("m", 4, None).await.unwrap();
    let (callback, seen) = recording_callback();
    client.install_callback(Some(callback)).unwrap();

    for i in 0..10u32 {
        // After the error lands, later submits become silent no-ops.
        client
            .submit(&[Bytes::from_static(b"x")], &i.to_string())
            .await
            .unwrap();
    }
    client.finish().await.unwrap();

    assert_eq!(client.last_error().as_deref(), Some("boom"));
    let dispatched = seen.lock().unwrap().clone();
    let tags: Vec<&str> = dispatched.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(tags, vec!["0", "1", "2", "3", "4"]);
    // Exactly one error callback, for frame #4, carrying the message.
    assert_eq!(dispatched[4].1["msg"], json!("boom"));
    assert!(dispatched[..4].iter().all(|(_, doc)| doc["success"] == json!(true)));

    // Finishing again changes nothing.
    client.finish().await.unwrap();
    assert_eq!(client.outstanding_count(), 0);

    client.close_stream().await.unwrap();
    // The sticky error survives the close until the next open_stream.
    assert_eq!(client.last_error().as_deref(), Some("boom"));
    server.await.unwrap();
}

#[tokio::test]
async fn tcp_inference_timeout_sets_the_sticky_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (_control, mut stream) = accept_stream(&listener, "m").await;
        // Swallow the frame and never reply.
        let _frame = read_frame(&mut stream).await.unwrap();
        let _ = read_frame(&mut stream).await;
    });

    let config = test_config().with_inference_timeout(Duration::from_millis(200));
    let mut client = connect_with_config(&addr.to_string(), config).await.unwrap();
    client.open_stream("m", 1, None).await.unwrap();
    let (callback, seen) = recording_callback();
    client.install_callback(Some(callback)).unwrap();

    client.submit(&[Bytes::from_static(b"x")], "0").await.unwrap();
    client.finish().await.unwrap();

    let err = client.last_error().expect("timeout should be sticky");
    assert!(err.contains("timed out"), "unexpected error: {err}");
    // A timeout has no result document, so no callback fires.
    assert!(seen.lock().unwrap().is_empty());

    client.close_stream().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn tcp_control_commands_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut control, _) = listener.accept().await.unwrap();
        while let Some(payload) = read_frame(&mut control).await {
            let request: Value = serde_json::from_slice(&payload).unwrap();
            let response = match request["op"].as_str().unwrap() {
                "modelzoo" => json!({
                    "VERSION": 4,
                    "success": true,
                    "modelzoo": [
                        {"name": "det", "extended_params": {"DEVICE": {"DeviceType": "NPU"}}}
                    ]
                }),
                "sleep" => {
                    assert_eq!(request["sleep_time_ms"], json!(10));
                    json!({"VERSION": 4, "success": true})
                }
                "label_dictionary" => {
                    assert_eq!(request["name"], json!("det"));
                    json!({"VERSION": 4, "success": true, "label_dictionary": {"0": "person"}})
                }
                "system_info" => json!({"VERSION": 4, "success": true, "Devices": ["CPU"]}),
                "zoo_manage" => {
                    json!({"VERSION": 4, "success": false, "msg": "zoo is read-only"})
                }
                other => panic!("unexpected op {other}"),
            };
            write_json_frame(&mut control, &response).await;
        }
    });

    let mut client = connect_with_config(&addr.to_string(), test_config())
        .await
        .unwrap();

    let models = client.modelzoo_list().await.unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, "det");
    assert_eq!(models[0].extended_params.device_type(), "NPU");

    assert!(client.ping(10, false).await.unwrap());

    let labels = client.label_dictionary("det").await.unwrap();
    assert_eq!(labels["0"], json!("person"));

    let info = client.system_info().await.unwrap();
    assert_eq!(info["Devices"], json!(["CPU"]));

    match client.zoo_manage(json!({"action": "rescan"})).await {
        Err(ClientError::OperationFailed(msg)) => assert_eq!(msg, "zoo is read-only"),
        other => panic!("unexpected: {other:?}"),
    }

    drop(client);
    server.await.unwrap();
}

#[tokio::test]
async fn tcp_missing_version_tag_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut control, _) = listener.accept().await.unwrap();
        let _request = read_frame(&mut control).await.unwrap();
        write_json_frame(&mut control, &json!({"success": true, "modelzoo": []})).await;
    });

    let mut client = connect_with_config(&addr.to_string(), test_config())
        .await
        .unwrap();
    match client.modelzoo_list().await {
        Err(ClientError::NotSupportedVersion(_)) => {}
        other => panic!("unexpected: {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn tcp_ping_swallows_errors_on_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // Accept the command connection, then slam it shut on first use.
        let (mut control, _) = listener.accept().await.unwrap();
        let _request = read_frame(&mut control).await;
        drop(control);
    });

    let mut client = connect_with_config(&addr.to_string(), test_config())
        .await
        .unwrap();
    assert!(!client.ping(5, true).await.unwrap());
    server.await.unwrap();
}

#[tokio::test]
async fn tcp_shutdown_sends_the_wakeup_epilogue() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut control, _) = listener.accept().await.unwrap();
        let payload = read_frame(&mut control).await.unwrap();
        let request: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(request["op"], json!("shutdown"));
        write_json_frame(&mut control, &json!({"VERSION": 4, "success": true})).await;

        // The epilogue connection carries a single zero-byte frame.
        let (mut epilogue, _) = listener.accept().await.unwrap();
        assert_eq!(read_frame(&mut epilogue).await.unwrap(), Vec::<u8>::new());
    });

    let mut client = connect_with_config(&addr.to_string(), test_config())
        .await
        .unwrap();
    client.shutdown().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn tcp_submit_requires_stream_and_callback() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (_control, mut stream) = accept_stream(&listener, "m").await;
        let _ = read_frame(&mut stream).await;
    });

    let mut client = connect_with_config(&addr.to_string(), test_config())
        .await
        .unwrap();

    // No stream yet.
    match client.submit(&[Bytes::from_static(b"x")], "0").await {
        Err(ClientError::IncorrectApiUse(_)) => {}
        other => panic!("unexpected: {other:?}"),
    }

    client.open_stream("m", 2, None).await.unwrap();
    // Stream open, but no callback installed.
    match client.submit(&[Bytes::from_static(b"x")], "0").await {
        Err(ClientError::IncorrectApiUse(_)) => {}
        other => panic!("unexpected: {other:?}"),
    }

    // predict with a streaming callback installed is also misuse.
    let (callback, _seen) = recording_callback();
    client.install_callback(Some(callback)).unwrap();
    match client.predict(&[Bytes::from_static(b"x")]).await {
        Err(ClientError::IncorrectApiUse(_)) => {}
        other => panic!("unexpected: {other:?}"),
    }

    client.close_stream().await.unwrap();
    server.await.unwrap();
}

// ---- HTTP/WebSocket transport ---------------------------------------------

async fn respond_http(stream: &mut TcpStream, status: &str, body: &Value) {
    let body = serde_json::to_vec(body).unwrap();
    let head = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(&body).await.unwrap();
}

/// Read an HTTP request head and return its request line.
async fn read_http_head(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        buf.push(byte[0]);
    }
    let head = String::from_utf8(buf).unwrap();
    head.lines().next().unwrap_or_default().to_string()
}

#[tokio::test]
async fn http_control_surface_maps_ops_to_paths() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // One connection per request: the mock closes after each response.
        let (mut conn, _) = listener.accept().await.unwrap();
        let line = read_http_head(&mut conn).await;
        assert_eq!(line, "GET /v1/modelzoo HTTP/1.1");
        respond_http(
            &mut conn,
            "200 OK",
            &json!({"VERSION": 4, "success": true, "modelzoo": [{"name": "seg"}]}),
        )
        .await;

        let (mut conn, _) = listener.accept().await.unwrap();
        let line = read_http_head(&mut conn).await;
        assert_eq!(line, "POST /v1/sleep/25 HTTP/1.1");
        respond_http(&mut conn, "200 OK", &json!({"VERSION": 4, "success": true})).await;

        let (mut conn, _) = listener.accept().await.unwrap();
        let line = read_http_head(&mut conn).await;
        assert_eq!(line, "GET /v1/system_info HTTP/1.1");
        respond_http(&mut conn, "503 Service Unavailable", &json!({})).await;
    });

    let mut client = connect_with_config(&format!("http://{addr}"), test_config())
        .await
        .unwrap();

    let models = client.modelzoo_list().await.unwrap();
    assert_eq!(models[0].name, "seg");

    assert!(client.ping(25, false).await.unwrap());

    match client.system_info().await {
        Err(ClientError::OperationFailed(msg)) => assert!(msg.contains("503")),
        other => panic!("unexpected: {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn websocket_stream_predicts_and_streams_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();

        // Stream-open handshake: text record in, text ACK out.
        let record: Value = match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text open record, got {other:?}"),
        };
        assert_eq!(record["name"], json!("m"));
        ws.send(Message::Text(stream_ack().to_string().into()))
            .await
            .unwrap();

        // Echo a result per binary frame, tagged by arrival order.
        let mut index = 0;
        while let Some(message) = ws.next().await {
            match message {
                Ok(Message::Binary(_)) => {
                    let doc = json!({"success": true, "index": index});
                    index += 1;
                    let packed = rmp_serde::to_vec_named(&doc).unwrap();
                    ws.send(Message::Binary(packed.into())).await.unwrap();
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    let mut client = connect_with_config(&format!("http://{addr}"), test_config())
        .await
        .unwrap();
    client.open_stream("m", 2, None).await.unwrap();

    // Single-shot first.
    let result = client.predict(&[Bytes::from_static(b"frame")]).await.unwrap();
    assert_eq!(result["index"], json!(0));

    // Then streaming on the same stream.
    let (callback, seen) = recording_callback();
    client.install_callback(Some(callback)).unwrap();
    for i in 0..3u32 {
        client
            .submit(&[Bytes::from_static(b"frame")], &i.to_string())
            .await
            .unwrap();
    }
    client.finish().await.unwrap();
    assert!(client.last_error().is_none());

    let tags: Vec<String> = seen.lock().unwrap().iter().map(|(t, _)| t.clone()).collect();
    assert_eq!(tags, vec!["0", "1", "2"]);

    client.close_stream().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn websocket_stream_open_rejected_by_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        let _record = ws.next().await.unwrap().unwrap();
        let nack = json!({"VERSION": 4, "success": false, "msg": "no such model"});
        ws.send(Message::Text(nack.to_string().into())).await.unwrap();
    });

    let mut client = connect_with_config(&format!("http://{addr}"), test_config())
        .await
        .unwrap();
    match client.open_stream("missing", 2, None).await {
        Err(ClientError::OperationFailed(msg)) => assert_eq!(msg, "no such model"),
        other => panic!("unexpected: {other:?}"),
    }
    server.await.unwrap();
}
