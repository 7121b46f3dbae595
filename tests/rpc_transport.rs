//! RPC Transport Tests
//!
//! Drives the HTTP provider and the typed RenVM client against a local
//! wiremock server standing in for a RenVM node.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use renvm_rs::pack::{typed_to_transport, PackValue, TypedValue};
use renvm_rs::rpc::{JsonRpcProvider, Provider, RenVmProvider};
use renvm_rs::tx::{mint_output_type, MintOutput};
use renvm_rs::{RenVmError, TxStatus};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn result(value: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"id": 1, "jsonrpc": "2.0", "result": value}))
}

fn rpc_error(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": 1,
        "jsonrpc": "2.0",
        "error": {"code": code, "message": message}
    }))
}

fn provider(server: &MockServer) -> JsonRpcProvider {
    JsonRpcProvider::new(&server.uri())
        .unwrap()
        .with_retry_delay(Duration::from_millis(1))
}

fn client(server: &MockServer) -> RenVmProvider {
    RenVmProvider::new(Arc::new(provider(server)))
}

#[tokio::test]
async fn test_request_envelope_and_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "id": 1,
            "jsonrpc": "2.0",
            "method": "ren_queryConfig",
            "params": {}
        })))
        .respond_with(result(json!({
            "confirmations": {"Bitcoin": "6", "Ethereum": "30"},
            "maxConfirmations": {"Bitcoin": "6", "Ethereum": "30"},
            "network": "mainnet",
            "registries": {},
            "whitelist": ["BTC/toEthereum"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = client(&server).query_config().await.unwrap();
    assert_eq!(config.network, "mainnet");
    assert_eq!(config.confirmations["Ethereum"], 30);
}

#[tokio::test]
async fn test_http_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(result(json!({"ok": true})))
        .mount(&server)
        .await;

    let value = provider(&server)
        .send_message("ren_queryBlock", json!({}), 2, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(value, json!({"ok": true}));
}

#[tokio::test]
async fn test_transport_error_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = provider(&server)
        .send_message("ren_queryBlock", json!({}), 2, Duration::from_secs(5))
        .await
        .unwrap_err();
    match err {
        RenVmError::Transport { attempts, method, .. } => {
            assert_eq!(attempts, 3);
            assert_eq!(method, "ren_queryBlock");
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rpc_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(rpc_error(-32000, "invalid selector"))
        .expect(1)
        .mount(&server)
        .await;

    let err = provider(&server)
        .send_message("ren_submitTx", json!({}), 2, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, RenVmError::Rpc { code: -32000, .. }));
}

#[tokio::test]
async fn test_wait_for_tx_polls_until_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "ren_queryTx"})))
        .respond_with(rpc_error(-32603, "result not available"))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    let out = TypedValue::new(
        mint_output_type(),
        PackValue::structure(vec![
            ("amount", PackValue::U256(U256::from(99_000u64))),
            ("hash", PackValue::Bytes32([1; 32])),
            ("sighash", PackValue::Bytes32([2; 32])),
            ("sig", PackValue::Bytes65([3; 65])),
            ("txid", PackValue::Bytes(vec![4; 32])),
            ("txindex", PackValue::U32(1)),
            ("revert", PackValue::Str(String::new())),
        ]),
    )
    .unwrap();
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "ren_queryTx", "params": {"txHash": "abc"}})))
        .respond_with(result(json!({
            "tx": {
                "version": "1",
                "hash": "abc",
                "selector": "BTC/toEthereum",
                "in": {"t": {"struct": []}, "v": {}},
                "out": typed_to_transport(&out)
            },
            "txStatus": "done"
        })))
        .mount(&server)
        .await;

    let mut statuses = Vec::new();
    let done = client(&server)
        .wait_for_tx("abc", |s| statuses.push(s), || false, Duration::from_millis(1))
        .await
        .unwrap();
    assert_eq!(statuses, vec![TxStatus::Done]);

    let output = MintOutput::from_pack(&done.tx.output.unwrap().v).unwrap();
    assert_eq!(output.amount, U256::from(99_000u64));
    assert_eq!(output.txindex, 1);
    assert!(output.revert.is_none());
}

#[tokio::test]
async fn test_unknown_tx_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(rpc_error(-32603, "tx abc not found"))
        .mount(&server)
        .await;

    let err = client(&server).query_tx("abc").await.unwrap_err();
    assert!(matches!(err, RenVmError::TransactionNotFound { ref hash } if hash == "abc"));
    assert!(err.is_pending_query());
}

#[tokio::test]
async fn test_wait_for_tx_stops_on_fatal_rpc_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "ren_queryTx"})))
        .respond_with(rpc_error(-32602, "invalid selector"))
        .expect(1)
        .mount(&server)
        .await;

    let mut statuses = Vec::new();
    let err = client(&server)
        .wait_for_tx("abc", |s| statuses.push(s), || false, Duration::from_millis(1))
        .await
        .unwrap_err();
    match err {
        RenVmError::Rpc { code, message, .. } => {
            assert_eq!(code, -32602);
            assert_eq!(message, "invalid selector");
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
    assert!(statuses.is_empty());
}

#[tokio::test]
async fn test_confirmation_target_from_node_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "ren_queryConfig"})))
        .respond_with(result(json!({
            "confirmations": {"Bitcoin": "6", "Ethereum": "30"},
            "network": "mainnet"
        })))
        .mount(&server)
        .await;

    let renvm = client(&server);
    assert_eq!(renvm.get_confirmation_target("Bitcoin").await.unwrap(), 6);
    let err = renvm.get_confirmation_target("Solana").await.unwrap_err();
    assert!(matches!(err, RenVmError::Decode { .. }));
}

#[tokio::test]
async fn test_query_txs_sends_paging_and_decodes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "ren_queryTxs",
            "params": {"tags": ["gateway"], "page": "2", "pageSize": "10", "txStatus": "done"}
        })))
        .respond_with(result(json!({
            "txs": [{
                "version": "1",
                "hash": "abc",
                "selector": "BTC/toEthereum",
                "in": {"t": {"struct": [{"n": "u8"}]}, "v": {"n": "1"}}
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let txs = client(&server)
        .query_txs(vec!["gateway".into()], 2, 10, Some(TxStatus::Done))
        .await
        .unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].hash, "abc");
    assert_eq!(txs[0].selector, "BTC/toEthereum");
    assert!(txs[0].output.is_none());
}

#[tokio::test]
async fn test_query_blocks_passes_height_and_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "ren_queryBlocks",
            "params": {"blockHeight": 100, "n": 2}
        })))
        .respond_with(result(json!({"blocks": [{"height": "100"}, {"height": "101"}]})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "ren_queryBlock",
            "params": {"blockHeight": 100}
        })))
        .respond_with(result(json!({"block": {"height": "100"}})))
        .expect(1)
        .mount(&server)
        .await;

    let renvm = client(&server);
    let blocks = renvm.query_blocks(100, 2).await.unwrap();
    assert_eq!(blocks.as_array().map(Vec::len), Some(2));
    let block = renvm.query_block(100).await.unwrap();
    assert_eq!(block["height"], "100");
}

#[tokio::test]
async fn test_bad_request_status_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid request"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(result(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let value = provider(&server)
        .send_message("ren_queryBlock", json!({}), 2, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(value, json!({"ok": true}));
}
