//! End-to-end coverage driving a real `SseClient` against a mock HTTP server
use ag_ui_sse::{Callbacks, ConnectionState, SseClient, SseClientConfig};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn receives_events_from_a_real_http_response() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/events")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body("event: greeting\ndata: hello\nid: 1\n\n")
        .create_async()
        .await;

    let config = SseClientConfig::new(format!("{}/events", server.url()));
    let client = Arc::new(SseClient::new(config).unwrap());
    client.connect().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed before an event arrived");

    assert_eq!(event.name, "greeting");
    assert_eq!(event.data, "hello");
    assert_eq!(event.id, "1");

    client.close().unwrap();
}

#[tokio::test]
async fn wrong_content_type_is_rejected_and_the_client_eventually_gives_up() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/events")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{}")
        .expect(2)
        .create_async()
        .await;

    let config = SseClientConfig::new(format!("{}/events", server.url()))
        .with_initial_backoff(Duration::from_millis(5))
        .with_max_reconnect_attempts(1);
    let client = Arc::new(SseClient::new(config).unwrap());
    // The first attempt fails (bad content-type); connect() surfaces that
    // error synchronously, while the control loop keeps running in the
    // background to make its one permitted reconnect attempt.
    assert!(client.connect().await.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn last_event_id_is_carried_into_the_reconnect_request() {
    let mut server = mockito::Server::new_async().await;
    let _first = server
        .mock("GET", "/events")
        .match_header("last-event-id", mockito::Matcher::Missing)
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body("id: 7\ndata: first\n\n")
        .create_async()
        .await;
    let _second = server
        .mock("GET", "/events")
        .match_header("last-event-id", "7")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body("data: second\n\n")
        .create_async()
        .await;

    let config = SseClientConfig::new(format!("{}/events", server.url()))
        .with_initial_backoff(Duration::from_millis(5));
    let client = Arc::new(SseClient::new(config).unwrap());
    client.connect().await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), client.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.data, "first");
    assert_eq!(client.last_event_id(), "7");

    let second = tokio::time::timeout(Duration::from_secs(2), client.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.data, "second");

    client.close().unwrap();
}

#[tokio::test]
async fn close_causes_recv_to_resolve_to_none_promptly() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/events")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(":keep-alive\n")
        .create_async()
        .await;

    let config = SseClientConfig::new(format!("{}/events", server.url()));
    let client = Arc::new(SseClient::new(config).unwrap());
    client.connect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close().unwrap();

    let next = tokio::time::timeout(Duration::from_secs(1), client.recv()).await;
    assert_eq!(next.expect("recv should resolve, not hang"), None);
}

#[tokio::test]
async fn close_during_backoff_sleep_stops_the_control_loop() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/events")
        .with_status(503)
        .create_async()
        .await;

    let config = SseClientConfig::new(format!("{}/events", server.url()))
        .with_initial_backoff(Duration::from_secs(30));
    let client = Arc::new(SseClient::new(config).unwrap());
    // First attempt fails fast (503); connect() surfaces that error
    // synchronously while the 30s backoff sleep runs in the background.
    assert!(client.connect().await.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.state(), ConnectionState::Reconnecting);

    client.close().unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn multi_line_data_is_joined_with_newlines() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/events")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body("data: line1\ndata: line2\ndata: line3\n\n")
        .create_async()
        .await;

    let config = SseClientConfig::new(format!("{}/events", server.url()));
    let client = Arc::new(SseClient::new(config).unwrap());
    client.connect().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed before an event arrived");

    assert_eq!(event.data, "line1\nline2\nline3");

    client.close().unwrap();
}

#[tokio::test]
async fn server_retry_hint_is_adopted_for_the_next_reconnect() {
    let mut server = mockito::Server::new_async().await;
    let _first = server
        .mock("GET", "/events")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body("retry: 200\ndata: y\n\n")
        .create_async()
        .await;
    let _second = server
        .mock("GET", "/events")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body("data: z\n\n")
        .create_async()
        .await;

    // A much larger default backoff than the server's hint makes the
    // hint's effect unambiguous: if it were ignored, the second connect
    // would not land for seconds, not ~200ms.
    let config = SseClientConfig::new(format!("{}/events", server.url()))
        .with_initial_backoff(Duration::from_secs(10));
    let client = Arc::new(SseClient::new(config).unwrap());
    client.connect().await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), client.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.data, "y");

    let started = tokio::time::Instant::now();
    let second = tokio::time::timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("server retry hint was not honored within a reasonable window")
        .unwrap();
    assert_eq!(second.data, "z");
    assert!(started.elapsed() < Duration::from_secs(2));

    client.close().unwrap();
}

#[tokio::test]
async fn lifetime_cap_forces_a_disconnect_and_reports_on_error() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/events")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_chunked_body(|w| {
            w.write_all(b":keep-alive\n")?;
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .create_async()
        .await;

    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let errors_cb = Arc::clone(&errors);
    let callbacks = Callbacks {
        on_error: Some(Arc::new(move |e| errors_cb.lock().push(e.to_string()))),
        ..Default::default()
    };

    let config = SseClientConfig::new(format!("{}/events", server.url()))
        .with_max_stream_lifetime(Duration::from_millis(50))
        .with_max_reconnect_attempts(1)
        .with_callbacks(callbacks);
    let client = Arc::new(SseClient::new(config).unwrap());
    client.connect().await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if errors.lock().iter().any(|e| e.contains("stream lifetime exceeded")) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("lifetime cap never fired on_error");

    client.close().unwrap();
}

#[tokio::test]
async fn backpressure_activates_under_a_slow_consumer_and_clears_once_drained() {
    let mut server = mockito::Server::new_async().await;
    let body: String = (0..100).map(|i| format!("data: {i}\n\n")).collect();
    let _m = server
        .mock("GET", "/events")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let config = SseClientConfig::new(format!("{}/events", server.url()))
        .with_flow_control(true)
        .with_event_buffer_size(10)
        .with_flow_control_threshold(0.8);
    let client = Arc::new(SseClient::new(config).unwrap());
    client.connect().await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while !client.is_backpressure_active() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("backpressure never activated");

    assert!(client.buffer_length() <= 10);

    while tokio::time::timeout(Duration::from_millis(200), client.recv())
        .await
        .ok()
        .flatten()
        .is_some()
    {}

    tokio::time::timeout(Duration::from_secs(2), async {
        while client.is_backpressure_active() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("backpressure never cleared after draining");

    client.close().unwrap();
}
