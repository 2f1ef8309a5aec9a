use std::time::Duration;

use serde_json::json;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, ClientOptions};
use crate::contract::{ClientMethod, ParamKind, ParameterEntry};
use crate::server::ServerOptions;

use super::*;

#[tokio::test]
async fn calls_correlate_through_the_full_stack() {
    let server = demo_server(ServerOptions::new());
    let (client, _session) = client_server_pair(&server, ClientOptions::new());

    let sum = within(client.call("add", Some(json!([73, 27]))))
        .await
        .expect("call succeeds");
    assert_eq!(sum, json!(100));

    let concat = within(client.call("add", Some(json!(["ab", "cdef"]))))
        .await
        .expect("call succeeds");
    assert_eq!(concat, json!("abcdef"));
}

#[tokio::test]
async fn remote_errors_surface_with_their_error_object() {
    let server = demo_server(ServerOptions::new());
    let (client, _session) = client_server_pair(&server, ClientOptions::new());

    let outcome = within(client.call("nope", None)).await;
    match outcome {
        Err(ClientError::Remote(error)) => assert_eq!(error.code, -32601),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn generated_ids_are_prefixed_strings_and_unique() {
    let (client, mut peer) = client_with_raw_peer(ClientOptions::new().id_prefix("cli"));

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.call("m", None).await }
    });
    let request = peer.recv_json().await;
    assert_eq!(request["id"], json!("cli-1"));

    peer.send_line(r#"{"jsonrpc":"2.0","id":"cli-1","result":"ok"}"#)
        .await;
    let value = within(first).await.expect("join").expect("call");
    assert_eq!(value, json!("ok"));

    let second = tokio::spawn({
        let client = client.clone();
        async move { client.call("m", None).await }
    });
    assert_eq!(peer.recv_json().await["id"], json!("cli-2"));
    drop(second);
}

#[tokio::test]
async fn responses_route_by_id_not_by_order() {
    let (client, mut peer) = client_with_raw_peer(ClientOptions::new());

    let slow = tokio::spawn({
        let client = client.clone();
        async move { client.call("slow", None).await }
    });
    let fast = tokio::spawn({
        let client = client.clone();
        async move { client.call("fast", None).await }
    });

    let first_request = peer.recv_json().await;
    let second_request = peer.recv_json().await;

    // Answer in reverse arrival order.
    peer.send_line(&format!(
        r#"{{"jsonrpc":"2.0","id":{},"result":"second"}}"#,
        second_request["id"]
    ))
    .await;
    peer.send_line(&format!(
        r#"{{"jsonrpc":"2.0","id":{},"result":"first"}}"#,
        first_request["id"]
    ))
    .await;

    assert_eq!(
        within(slow).await.expect("join").expect("call"),
        json!("first")
    );
    assert_eq!(
        within(fast).await.expect("join").expect("call"),
        json!("second")
    );
}

#[tokio::test]
async fn cancellation_completes_locally_and_notifies_the_wire() {
    let (client, mut peer) = client_with_raw_peer(ClientOptions::new());

    let token = CancellationToken::new();
    let call = tokio::spawn({
        let client = client.clone();
        let token = token.clone();
        async move {
            client
                .call_with_cancellation("hold", None, &token)
                .await
        }
    });

    let request = peer.recv_json().await;
    let id = request["id"].clone();

    token.cancel();
    let outcome = within(call).await.expect("join");
    assert!(matches!(outcome, Err(ClientError::Cancelled)));

    // The cancellation notification conveys the abandoned id.
    let notification = peer.recv_json().await;
    assert_eq!(notification["method"], json!("cancelRequest"));
    assert_eq!(notification["params"]["id"], id);
    assert!(notification.get("id").is_none());
}

#[tokio::test]
async fn cancellation_propagates_end_to_end() {
    let contract = demo_contract().cancel_request_method("cancelRequest").build();
    let server = crate::server::RpcServer::with_options(
        contract,
        ServerOptions::new().track_cancellation(true),
    );
    let (client, _session) = client_server_pair(
        &server,
        ClientOptions::new().preserve_foreign_responses(true),
    );

    let token = CancellationToken::new();
    let call = tokio::spawn({
        let client = client.clone();
        let token = token.clone();
        async move {
            client
                .call_with_cancellation("hold", None, &token)
                .await
        }
    });

    // Give the request time to reach the server, then fire the trigger.
    time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let outcome = within(call).await.expect("join");
    assert!(matches!(outcome, Err(ClientError::Cancelled)));

    // The server's handler observed its trigger and still answered; the late
    // response lands in the retained side table.
    let retained = within(async {
        loop {
            let responses = client.take_foreign_responses();
            if !responses.is_empty() {
                return responses;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert_eq!(
        retained[0].clone().into_result().expect("graceful return"),
        json!("cancelled")
    );
}

#[tokio::test]
async fn foreign_responses_are_dropped_unless_retention_is_enabled() {
    let (client, mut peer) = client_with_raw_peer(ClientOptions::new());
    peer.send_line(r#"{"jsonrpc":"2.0","id":"stranger","result":1}"#).await;
    time::sleep(Duration::from_millis(50)).await;
    assert!(client.take_foreign_responses().is_empty());

    let (client, mut peer) =
        client_with_raw_peer(ClientOptions::new().preserve_foreign_responses(true));
    peer.send_line(r#"{"jsonrpc":"2.0","id":"stranger","result":1}"#).await;
    let retained = within(async {
        loop {
            let responses = client.take_foreign_responses();
            if !responses.is_empty() {
                return responses;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert_eq!(retained[0].id, "stranger".into());
}

#[tokio::test]
async fn notifications_broadcast_to_subscribers() {
    let (client, mut peer) = client_with_raw_peer(ClientOptions::new());
    let mut events = client.subscribe_notifications();

    peer.send_line(r#"{"jsonrpc":"2.0","method":"progress","params":{"pct":40}}"#)
        .await;

    let notification = within(events.recv()).await.expect("notification");
    assert_eq!(notification.method, "progress");
    assert_eq!(notification.params, Some(json!({"pct": 40})));
}

#[tokio::test]
async fn peer_eof_fails_outstanding_calls() {
    let (client, peer) = client_with_raw_peer(ClientOptions::new());

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call("m", None).await }
    });
    // Let the request leave before closing the pipe.
    time::sleep(Duration::from_millis(20)).await;
    peer.shutdown().await;

    let outcome = within(call).await.expect("join");
    assert!(matches!(outcome, Err(ClientError::ConnectionClosed)));
}

#[tokio::test]
async fn typed_invoke_marshals_and_deserializes() {
    let server = demo_server(ServerOptions::new());
    let (client, _session) = client_server_pair(&server, ClientOptions::new());

    let add = ClientMethod::new("add")
        .param(ParameterEntry::required("a", ParamKind::Integer))
        .param(ParameterEntry::required("b", ParamKind::Integer))
        .returns(ParamKind::Integer);

    let sum: i64 = within(client.invoke(&add, vec![json!(40), json!(2)]))
        .await
        .expect("typed call");
    assert_eq!(sum, 42);

    let by_name = ClientMethod::new("one")
        .by_name()
        .param(ParameterEntry::optional("negative", ParamKind::Boolean))
        .returns(ParamKind::Integer);
    let value: i64 = within(client.invoke(&by_name, vec![json!(true)]))
        .await
        .expect("typed call");
    assert_eq!(value, -1);
}

#[tokio::test]
async fn client_contracts_resolve_descriptors_with_naming_applied() {
    let contract = crate::contract::ClientContract::builder()
        .naming(crate::contract::NamingConvention::CamelCase)
        .method(
            "AddNumbers",
            ClientMethod::new("add")
                .param(ParameterEntry::required("a", ParamKind::Integer))
                .param(ParameterEntry::required("b", ParamKind::Integer))
                .returns(ParamKind::Integer),
        )
        .build()
        .expect("client contract");

    let method = contract.method("AddNumbers").expect("descriptor");
    assert_eq!(method.rpc_name, "add");

    let server = demo_server(ServerOptions::new());
    let (client, _session) = client_server_pair(&server, ClientOptions::new());
    let sum: i64 = within(client.invoke(method, vec![json!(2), json!(3)]))
        .await
        .expect("typed call");
    assert_eq!(sum, 5);
}

#[tokio::test]
async fn typed_invoke_flags_contract_violations() {
    let server = demo_server(ServerOptions::new());
    let (client, _session) = client_server_pair(&server, ClientOptions::new());

    let add = ClientMethod::new("add")
        .param(ParameterEntry::required("a", ParamKind::Integer))
        .param(ParameterEntry::required("b", ParamKind::Integer))
        .returns(ParamKind::Integer);

    // Arity is checked before anything reaches the wire.
    let outcome: Result<i64, _> = within(client.invoke(&add, vec![json!(1)])).await;
    assert!(matches!(outcome, Err(ClientError::ContractViolation(_))));

    // A result that cannot assume the declared type is a violation, not a
    // remote error.
    let outcome: Result<bool, _> =
        within(client.invoke(&add, vec![json!(1), json!(2)])).await;
    assert!(matches!(outcome, Err(ClientError::ContractViolation(_))));
}
