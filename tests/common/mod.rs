#![allow(dead_code)]

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{B256, U256};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use evm_etl::abi::signature_hash;
use evm_etl::models::common::{Config, MetricsConfig, RateLimitConfig, RpcConfig};

pub const POOL: &str = "0x1111111111111111111111111111111111111111";
pub const TOKEN0: &str = "0x2222222222222222222222222222222222222222";
pub const TOKEN1: &str = "0x3333333333333333333333333333333333333333";
pub const SENDER: &str = "0x4444444444444444444444444444444444444444";
pub const RECIPIENT: &str = "0x5555555555555555555555555555555555555555";
pub const MINER: &str = "0x6666666666666666666666666666666666666666";

pub const SWAP_AMOUNT0_IN: u64 = 1_000;
pub const SWAP_AMOUNT1_OUT: u64 = 2_000;

/// In-process JSON-RPC node serving synthetic blocks with one Uniswap V2 swap each.
///
/// Batch responses are returned in reverse order, and the first `fail_first` HTTP
/// requests are answered with 503.
pub struct MockNode {
    pub url: String,
    state: Arc<NodeState>,
}

struct NodeState {
    fail_first: usize,
    requests: AtomicUsize,
    methods: Mutex<Vec<String>>,
}

impl MockNode {
    pub async fn start(fail_first: usize) -> Self {
        let state = Arc::new(NodeState {
            fail_first,
            requests: AtomicUsize::new(0),
            methods: Mutex::new(Vec::new()),
        });

        let app = Router::new().route("/", post(handle)).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}/"),
            state,
        }
    }

    /// HTTP requests received, failed ones included.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Number of calls to `method` that were answered.
    pub fn calls(&self, method: &str) -> usize {
        self.state
            .methods
            .lock()
            .unwrap()
            .iter()
            .filter(|m| *m == method)
            .count()
    }

    pub fn config(&self, entities: &str, start_block: u64, end_block: u64, process_batch_size: u64) -> Config {
        Config {
            rpc_url: self.url.clone(),
            start_block,
            end_block,
            process_batch_size,
            request_batch_size: 3,
            entities: entities.to_string(),
            sinks: "memory".to_string(),
            rate_limit: RateLimitConfig {
                max_calls: 1_000,
                period_ms: 1_000,
            },
            rpc: RpcConfig {
                max_retries: 3,
                backoff_ms: 10,
                request_timeout_ms: 5_000,
                retry_protocol_errors: false,
            },
            postgres: None,
            bigquery: None,
            metadata_api: None,
            metrics: MetricsConfig::default(),
        }
    }
}

async fn handle(State(state): State<Arc<NodeState>>, Json(body): Json<Value>) -> Response {
    let request = state.requests.fetch_add(1, Ordering::SeqCst);
    if request < state.fail_first {
        return (StatusCode::SERVICE_UNAVAILABLE, "node is syncing").into_response();
    }

    let calls = body.as_array().cloned().unwrap_or_default();
    let mut responses: Vec<Value> = calls.iter().map(|call| state.respond(call)).collect();
    responses.reverse();
    Json(Value::Array(responses)).into_response()
}

impl NodeState {
    fn respond(&self, call: &Value) -> Value {
        let id = call["id"].clone();
        let method = call["method"].as_str().unwrap_or_default().to_string();
        let params = &call["params"];
        self.methods.lock().unwrap().push(method.clone());

        let result = match method.as_str() {
            "eth_getBlockByNumber" => Ok(block(quantity(&params[0]))),
            "eth_getBlockReceipts" => Ok(receipts(quantity(&params[0]))),
            "trace_block" => Ok(Value::Null),
            "eth_call" => eth_call(
                params[0]["to"].as_str().unwrap_or_default(),
                params[0]["data"].as_str().unwrap_or_default(),
            ),
            _ => Err(json!({ "code": -32601, "message": "Method not found" })),
        };

        match result {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(error) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
        }
    }
}

fn quantity(value: &Value) -> u64 {
    let hex = value.as_str().unwrap_or("0x0");
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).unwrap()
}

fn word(value: u64) -> String {
    format!("0x{value:064x}")
}

pub fn tx_hash(block_number: u64) -> String {
    format!("0x{:0>64}", format!("aa{block_number:x}"))
}

fn address_topic(address: &str) -> String {
    format!("0x{:0>64}", address.trim_start_matches("0x"))
}

pub fn topic(name: &str, args: &[&str]) -> String {
    signature_hash(name, args).unwrap().1
}

fn block(number: u64) -> Value {
    json!({
        "number": format!("0x{number:x}"),
        "hash": word(0xb000 + number),
        "parentHash": word(0xb000 + number - 1),
        "miner": MINER,
        "gasLimit": "0x1c9c380",
        "gasUsed": "0x5208",
        "timestamp": format!("0x{:x}", 1_700_000_000 + number * 12),
        "baseFeePerGas": "0x3b9aca00",
        "transactions": [{
            "hash": tx_hash(number),
            "nonce": format!("0x{number:x}"),
            "blockNumber": format!("0x{number:x}"),
            "transactionIndex": "0x0",
            "from": SENDER,
            "to": POOL,
            "value": "0x0",
            "gas": "0x30d40",
            "input": "0x022c0d9f",
            "type": "0x2",
            "maxFeePerGas": "0x77359400",
            "maxPriorityFeePerGas": "0x3b9aca00",
            "chainId": "0x1"
        }],
        "withdrawals": []
    })
}

fn receipts(number: u64) -> Value {
    let swap_data = format!(
        "0x{:064x}{:064x}{:064x}{:064x}",
        SWAP_AMOUNT0_IN, 0, 0, SWAP_AMOUNT1_OUT
    );
    // The pool is deployed in block 1 and only emits afterwards
    let created = if number == 1 { Value::from(POOL) } else { Value::Null };
    json!([{
        "transactionHash": tx_hash(number),
        "transactionIndex": "0x0",
        "blockNumber": format!("0x{number:x}"),
        "from": SENDER,
        "to": POOL,
        "contractAddress": created,
        "cumulativeGasUsed": "0x5208",
        "gasUsed": "0x5208",
        "status": "0x1",
        "type": "0x2",
        "effectiveGasPrice": "0x3b9aca00",
        "logs": [
            {
                "address": TOKEN0,
                "topics": [
                    topic("Transfer", &["address", "address", "uint256"]),
                    address_topic(SENDER),
                    address_topic(POOL)
                ],
                "data": word(SWAP_AMOUNT0_IN),
                "logIndex": "0x0",
                "transactionHash": tx_hash(number)
            },
            {
                "address": POOL,
                "topics": [
                    topic("Swap", &["address", "uint256", "uint256", "uint256", "uint256", "address"]),
                    address_topic(SENDER),
                    address_topic(RECIPIENT)
                ],
                "data": swap_data,
                "logIndex": "0x1",
                "transactionHash": tx_hash(number)
            }
        ]
    }])
}

fn selector(name: &str) -> String {
    topic(name, &[])[..10].to_string()
}

fn encode(value: DynSolValue) -> String {
    alloy_primitives::hex::encode_prefixed(DynSolValue::Tuple(vec![value]).abi_encode_params())
}

fn bytes32(text: &str) -> DynSolValue {
    let mut word = [0u8; 32];
    word[..text.len()].copy_from_slice(text.as_bytes());
    DynSolValue::FixedBytes(B256::from(word), 32)
}

fn eth_call(to: &str, data: &str) -> Result<Value, Value> {
    let to = to.to_ascii_lowercase();
    let revert = json!({ "code": 3, "message": "execution reverted" });
    let function = [
        "token0", "token1", "name", "symbol", "decimals", "totalSupply",
    ]
    .into_iter()
    .find(|function| data.starts_with(&selector(function)))
    .ok_or(revert.clone())?;

    let encoded = match (to.as_str(), function) {
        (POOL, "token0") => encode(DynSolValue::Address(TOKEN0.parse().unwrap())),
        (POOL, "token1") => encode(DynSolValue::Address(TOKEN1.parse().unwrap())),
        (TOKEN0, "name") => encode(DynSolValue::String("Wrapped Ether".to_string())),
        (TOKEN0, "symbol") => encode(DynSolValue::String("WETH".to_string())),
        // An older token answering with bytes32
        (TOKEN1, "name") => encode(bytes32("Maker")),
        (TOKEN1, "symbol") => encode(bytes32("MKR")),
        (TOKEN0 | TOKEN1, "decimals") => encode(DynSolValue::Uint(U256::from(18), 8)),
        (TOKEN0 | TOKEN1, "totalSupply") => {
            encode(DynSolValue::Uint(U256::from(10).pow(U256::from(24)), 256))
        }
        _ => return Err(revert),
    };
    Ok(json!(encoded))
}
