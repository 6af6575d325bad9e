//! End-to-end tests over real sockets and the long-poll router.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use futures_util::future::join_all;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;
use websignals::{Call, Client, Error, Mode, Reply, Server};

// ============================================================================
// Helpers
// ============================================================================

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("websignals=debug")
        .with_test_writer()
        .try_init();
}

fn server() -> anyhow::Result<Server> {
    let server = Server::builder()
        .path("/wsi")
        .modes([Mode::Socket, Mode::Http])
        .build()?;

    server.define(|root| -> websignals::Result<()> {
        root.child("tests")
            .child("echo")
            .define_terminal(|args, _, _| {
                Reply::ready(args.get("echo").cloned().unwrap_or(Value::Null))
            })?;

        root.child("tests").child("sleep").define_terminal(|args, _, _| {
            let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
            Reply::deferred(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                json!(ms)
            })
        })?;
        root.child("tests")
            .child("sleep")
            .define_positional_args(["ms"])?;

        root.child("product")
            .define_positional_args(["id"])?
            .child("sub")
            .define_positional_args([".Id", ".Prod"])?
            .child("get")
            .define_terminal(|args, _, _| {
                Reply::ready(json!({
                    "id": args.get("id").cloned().unwrap_or(Value::Null),
                    "subId": args.get("subId").cloned().unwrap_or(Value::Null),
                    "subProd": args.get("subProd").cloned().unwrap_or(Value::Null),
                }))
            })?;

        root.child("guarded")
            .define_passthrough(|_, _| Reply::stop(json!({"error": "Forbidden"})))?
            .child("secret")
            .define_terminal(|_, _, _| Reply::ready("leaked"))?;

        Ok(())
    })?;

    Ok(server)
}

async fn start(server: &Server) -> anyhow::Result<String> {
    let addr = server.start(TcpListener::bind("127.0.0.1:0").await?).await?;
    Ok(format!("ws://{addr}/wsi"))
}

async fn wait_for_clients(server: &Server, count: usize) {
    while server.connection_count() != count {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn poll(server: &Server, request: Request<Body>) -> anyhow::Result<(StatusCode, Option<String>, String)> {
    let response = server.router().oneshot(request).await?;
    let status = response.status();
    let id = response
        .headers()
        .get("id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, id, String::from_utf8(bytes.to_vec())?))
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_nested_arguments_over_socket() -> anyhow::Result<()> {
    init_logging();
    let server = server()?;
    let url = start(&server).await?;
    let client = Client::connect(&url, [("user", "10")]).await?;

    let call = Call::new()
        .at("product")
        .arg(1)
        .at("sub")
        .arg(7)
        .arg("x")
        .at("get");
    let answer = assert_ok!(client.call(call).await);
    assert_eq!(answer, json!({"id": 1, "subId": 7, "subProd": "x"}));

    let stopped = client.call(Call::to("guarded.secret")).await?;
    assert_eq!(stopped, json!({"error": "Forbidden"}));

    client.disconnect().await;
    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_calls_correlate() -> anyhow::Result<()> {
    init_logging();
    let server = server()?;
    let url = start(&server).await?;
    let client = Client::connect(&url, [("user", "10")]).await?;

    // Later calls finish first.
    let calls = (0..20u64).map(|i| client.call(Call::to("tests.sleep").arg(100 - i * 5)));
    let answers = join_all(calls).await;

    for (i, answer) in answers.into_iter().enumerate() {
        let expected = 100 - (i as u64) * 5;
        assert_eq!(assert_ok!(answer), json!(expected));
    }

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_socket_and_poll_clients_share_server() -> anyhow::Result<()> {
    init_logging();
    let server = Arc::new(server()?);
    let url = start(&server).await?;

    let socket_client = Client::connect(&url, [("user", "1")]).await?;
    socket_client.define(|root| {
        root.child("client")
            .child("kind")
            .define_terminal(|_, _, _| Reply::ready("socket"))
            .map(|_| ())
    })?;

    let (status, _, session) = poll(
        &server,
        Request::builder().method("POST").uri("/wsi?user=2").body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    wait_for_clients(&server, 2).await;

    let poll_id = websignals::ConnectionId::from(session.as_str());
    let socket_id = server
        .connection_ids()
        .into_iter()
        .find(|id| *id != poll_id)
        .expect("socket client registered");

    let socket_answer = server
        .call_with_timeout(&socket_id, Call::to("client.kind"), Duration::from_secs(5))
        .await?;
    assert_eq!(socket_answer, json!("socket"));

    // Server call to the long-poll client: pushed on GET, answered by PUT.
    let pending = {
        let server = Arc::clone(&server);
        let poll_id = poll_id.clone();
        tokio::spawn(async move {
            server
                .call_with_timeout(&poll_id, Call::to("client.kind"), Duration::from_secs(5))
                .await
        })
    };

    let (status, id, body) = poll(
        &server,
        Request::builder()
            .method("GET")
            .uri("/wsi")
            .header("session", &session)
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let envelope: Value = serde_json::from_str(&body)?;
    assert_eq!(envelope["func"], json!("client.kind"));
    let id = id.expect("push carries an id");

    let (status, _, _) = poll(
        &server,
        Request::builder()
            .method("PUT")
            .uri("/wsi")
            .header("session", &session)
            .header("id", &id)
            .body(Body::from("\"poll\""))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending.await??, json!("poll"));

    assert!(server.disconnect(&poll_id));
    let err = assert_err!(
        server
            .call_with_timeout(&poll_id, Call::to("client.kind"), Duration::from_secs(1))
            .await
    );
    assert!(matches!(err, Error::ConnectionNotFound { .. }));

    server.stop().await;
    socket_client.closed().await;
    Ok(())
}

#[tokio::test]
async fn test_poll_client_matches_socket_client() -> anyhow::Result<()> {
    init_logging();
    let server = server()?;
    let url = start(&server).await?.replacen("ws://", "http://", 1);
    let client = Client::connect_http(&url, [("user", "10")]).await?;

    let call = Call::new()
        .at("product")
        .arg(1)
        .at("sub")
        .arg(7)
        .arg("x")
        .at("get");
    let answer = assert_ok!(client.call(call).await);
    assert_eq!(answer, json!({"id": 1, "subId": 7, "subProd": "x"}));

    let calls = (0..10u64).map(|i| client.call(Call::to("tests.sleep").arg(50 - i * 5)));
    for (i, answer) in join_all(calls).await.into_iter().enumerate() {
        assert_eq!(assert_ok!(answer), json!(50 - (i as u64) * 5));
    }

    let err = assert_err!(
        client
            .call_with_timeout(Call::to("tests.sleep").arg(500), Duration::from_millis(20))
            .await
    );
    assert!(err.is_timeout());

    client.disconnect().await;
    server.stop().await;
    Ok(())
}
