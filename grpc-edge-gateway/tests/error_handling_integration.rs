//! Failure reporting: every forwarded call ends with an explicit status

mod common;

use bytes::Bytes;
use common::{connect, spawn_fake_origin, spawn_gateway, Pki};
use grpc_edge_gateway::body::GatewayBody;
use grpc_edge_gateway::rpc::catalog::Method;
use grpc_edge_gateway::rpc::codec::encode_message;
use grpc_edge_gateway::rpc::messages::{HelloReply, HelloRequest};
use grpc_edge_gateway::rpc::{Code, Status};
use grpc_edge_gateway::GatewayError;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::time::Duration;
use tokio::sync::mpsc;

/// Fake origin that sends one message and then never finishes the call
async fn stalling_origin(pki: &Pki) -> common::Running {
    spawn_fake_origin(pki, |_request: Request<Incoming>, _peer| async move {
        let (data_tx, data_rx) = mpsc::channel::<Bytes>(4);
        let (trailers_tx, trailers_rx) = tokio::sync::oneshot::channel();
        let first = encode_message(&HelloReply {
            message: "first".to_string(),
        });
        tokio::spawn(async move {
            let _ = data_tx.send(first).await;
            let _keep_open = trailers_tx;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let mut response = Response::new(GatewayBody::channel(data_rx, Some(trailers_rx)));
        response
            .headers_mut()
            .insert("content-type", http::HeaderValue::from_static("application/grpc"));
        response
    })
    .await
}

#[tokio::test]
async fn test_unreachable_origin_is_unavailable() {
    let pki = Pki::generate();
    let gateway = spawn_gateway(pki.gateway_config(common::closed_port().await)).await;
    let client = connect(gateway.addr, &pki.client_identity()).await;

    let status = client.say_hello("x").await.unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);

    // Local handlers keep working while the origin is down
    assert_eq!(client.status().await.unwrap().code, 200);
}

#[tokio::test]
async fn test_silent_origin_hits_deadline() {
    let pki = Pki::generate();
    let origin = spawn_fake_origin(&pki, |_request: Request<Incoming>, _peer| async move {
        futures::future::pending::<Response<GatewayBody>>().await
    })
    .await;
    let mut config = pki.gateway_config(origin.addr);
    config.origin.timeout = Duration::from_millis(300);
    let gateway = spawn_gateway(config).await;
    let client = connect(gateway.addr, &pki.client_identity()).await;

    let status = client.say_hello("x").await.unwrap_err();
    assert_eq!(status.code(), Code::DeadlineExceeded);
}

#[tokio::test]
async fn test_caller_deadline_is_forwarded() {
    let pki = Pki::generate();
    let origin = spawn_fake_origin(&pki, |_request: Request<Incoming>, _peer| async move {
        futures::future::pending::<Response<GatewayBody>>().await
    })
    .await;
    let gateway = spawn_gateway(pki.gateway_config(origin.addr)).await;
    let client = connect(gateway.addr, &pki.client_identity())
        .await
        .with_timeout(Duration::from_millis(200));

    let status = client.say_hello("x").await.unwrap_err();
    assert_eq!(status.code(), Code::DeadlineExceeded);
}

#[tokio::test]
async fn test_deadline_while_relaying_ends_stream() {
    let pki = Pki::generate();
    let origin = stalling_origin(&pki).await;
    let gateway = spawn_gateway(pki.gateway_config(origin.addr)).await;
    let client = connect(gateway.addr, &pki.client_identity()).await;

    let (mut writer, pending) = client
        .channel()
        .open(Method::LotsOfReplies, Some(Duration::from_millis(500)))
        .await
        .unwrap();
    writer.send_message(&HelloRequest { name: "x".to_string() }).await.unwrap();
    writer.close();
    let mut stream = pending.response().await.unwrap();

    let first: HelloReply = stream.next().await.unwrap().unwrap();
    assert_eq!(first.message, "first");
    let status = stream.next::<HelloReply>().await.unwrap_err();
    assert_eq!(status.code(), Code::DeadlineExceeded);
}

/// Fake origin that answers slowly but completes the call with OK
async fn slow_origin(pki: &Pki, pause: Duration) -> common::Running {
    spawn_fake_origin(pki, move |_request: Request<Incoming>, _peer| async move {
        let (data_tx, data_rx) = mpsc::channel::<Bytes>(4);
        let (trailers_tx, trailers_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = data_tx.send(encode_message(&HelloReply { message: "one".to_string() })).await;
            tokio::time::sleep(pause).await;
            let _ = data_tx.send(encode_message(&HelloReply { message: "two".to_string() })).await;
            drop(data_tx);
            let _ = trailers_tx.send(Status::ok().to_header_map());
        });
        let mut response = Response::new(GatewayBody::channel(data_rx, Some(trailers_rx)));
        response
            .headers_mut()
            .insert("content-type", http::HeaderValue::from_static("application/grpc"));
        response
    })
    .await
}

#[tokio::test]
async fn test_slow_stream_without_caller_deadline_completes() {
    let pki = Pki::generate();
    let origin = slow_origin(&pki, Duration::from_millis(800)).await;
    let mut config = pki.gateway_config(origin.addr);
    config.origin.timeout = Duration::from_millis(300);
    let gateway = spawn_gateway(config).await;
    let client = connect(gateway.addr, &pki.client_identity()).await;

    let (mut writer, pending) = client.channel().open(Method::LotsOfReplies, None).await.unwrap();
    writer.send_message(&HelloRequest { name: "x".to_string() }).await.unwrap();
    writer.close();
    let mut stream = pending.response().await.unwrap();

    let replies: Vec<HelloReply> = stream.collect().await.unwrap();
    let messages: Vec<_> = replies.into_iter().map(|r| r.message).collect();
    assert_eq!(messages, vec!["one", "two"]);
    assert_eq!(stream.status().code(), Code::Ok);
}

#[tokio::test]
async fn test_origin_failure_mid_stream_is_aborted() {
    let pki = Pki::generate();
    let origin = stalling_origin(&pki).await;
    let gateway = spawn_gateway(pki.gateway_config(origin.addr)).await;
    let client = connect(gateway.addr, &pki.client_identity()).await;

    let (mut writer, pending) = client.channel().open(Method::LotsOfReplies, None).await.unwrap();
    writer.send_message(&HelloRequest { name: "x".to_string() }).await.unwrap();
    writer.close();
    let mut stream = pending.response().await.unwrap();
    let first: HelloReply = stream.next().await.unwrap().unwrap();
    assert_eq!(first.message, "first");

    // Drop every origin connection while the response is still open
    origin.stop();

    let status = stream.next::<HelloReply>().await.unwrap_err();
    assert_eq!(status.code(), Code::Aborted);
}

#[tokio::test]
async fn test_malformed_frame_is_internal() {
    let pki = Pki::generate();
    let (_origin, gateway) = common::spawn_stack(&pki).await;
    let client = connect(gateway.addr, &pki.client_identity()).await;
    let channel = client.channel();

    // A valid message followed by one with the compression flag set
    let mut body = encode_message(&HelloRequest { name: "ok".to_string() }).to_vec();
    body.extend_from_slice(&[1, 0, 0, 0, 1, 0]);
    let request = Request::post(format!("https://{}{}", channel.authority(), Method::ManyHellos.path()))
        .header("content-type", "application/grpc")
        .header("te", "trailers")
        .body(GatewayBody::full(body))
        .unwrap();

    let response = channel.send(request).await.unwrap();
    let collected = response.into_body().collect().await.unwrap();
    let status = Status::from_header_map(collected.trailers().unwrap()).unwrap();
    assert_eq!(status.code(), Code::Internal);
}

#[test]
fn test_error_taxonomy_statuses() {
    let cases = [
        (GatewayError::config("bad"), Code::Internal),
        (GatewayError::no_route("/x"), Code::NotFound),
        (GatewayError::transport("refused"), Code::Unavailable),
        (GatewayError::protocol("bad frame"), Code::Internal),
        (GatewayError::deadline(Duration::from_millis(5)), Code::DeadlineExceeded),
    ];
    for (error, code) in cases {
        assert_eq!(error.to_status().code(), code, "{}", error);
    }
    assert!(GatewayError::config("bad").is_fatal());
    assert!(!GatewayError::transport("refused").is_fatal());
}
