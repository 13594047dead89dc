//! End-to-end test over a real socket: text and binary bodies in, binary
//! responses out, JSON errors.

use godless::{http, Client, Node, Options, Payload, ReflectionType, Request};
use godless_query::Query;
use godless_store::{KeyStore, MemStore};
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn query_over_http() {
    let node = Node::new(MemStore::new(), KeyStore::new(), Options::default())
        .await
        .expect("node");

    let cancel = CancellationToken::new();
    let (addr, serve) = http::bind("127.0.0.1:0".parse().unwrap(), node.api(), cancel.clone())
        .expect("bind");
    let server = tokio::spawn(serve);

    let client = Client::new(&format!("http://{addr}"));

    // Text body, compiled server-side.
    client
        .send_query_text(r#"join factory rows (@key=f1, foreman="Foreman 1")"#)
        .await
        .expect("join over http");

    // Binary body.
    let response = client
        .send(&Request::Query(
            Query::parse(r#"select factory where str_eq(foreman, "Foreman 1")"#).unwrap(),
        ))
        .await
        .expect("select over http");
    let Payload::Namespace(ns) = response.payload else {
        panic!("expected a namespace payload")
    };
    assert!(ns
        .table(&"factory".into())
        .and_then(|t| t.row(&"f1".into()))
        .is_some());

    // Reflection through the same endpoint.
    let response = client
        .send_reflection(ReflectionType::HeadPath)
        .await
        .expect("reflect over http");
    assert!(matches!(response.payload, Payload::Path(_)));

    // Parse errors come back as JSON with a client-error status.
    let err = client
        .send_query_text("definitely not a query")
        .await
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("400"), "{text}");
    assert!(text.contains("parse error"), "{text}");

    cancel.cancel();
    server.await.expect("join server").expect("server result");
    node.shutdown().await;
}
