use alloy_primitives::{Address, B64, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

/// `eth_getBlockByNumber` payload with full transaction objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    #[serde(with = "alloy_serde::quantity")]
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    #[serde(default)]
    pub nonce: Option<B64>,
    #[serde(default)]
    pub sha3_uncles: Option<B256>,
    #[serde(default)]
    pub logs_bloom: Option<Bytes>,
    #[serde(default)]
    pub transactions_root: Option<B256>,
    #[serde(default)]
    pub state_root: Option<B256>,
    #[serde(default)]
    pub receipts_root: Option<B256>,
    pub miner: Address,
    #[serde(default)]
    pub difficulty: Option<U256>,
    #[serde(default)]
    pub total_difficulty: Option<U256>,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub size: Option<u64>,
    #[serde(default)]
    pub extra_data: Bytes,
    #[serde(with = "alloy_serde::quantity")]
    pub gas_limit: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
    #[serde(default)]
    pub base_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub withdrawals_root: Option<B256>,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub blob_gas_used: Option<u64>,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub excess_blob_gas: Option<u64>,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
    #[serde(default)]
    pub withdrawals: Option<Vec<RpcWithdrawal>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: B256,
    #[serde(with = "alloy_serde::quantity")]
    pub nonce: u64,
    #[serde(default)]
    pub block_hash: Option<B256>,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub block_number: Option<u64>,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub transaction_index: Option<u64>,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    pub value: U256,
    #[serde(default)]
    pub gas_price: Option<U256>,
    #[serde(with = "alloy_serde::quantity")]
    pub gas: u64,
    #[serde(default)]
    pub input: Bytes,
    #[serde(default, rename = "type", with = "alloy_serde::quantity::opt")]
    pub transaction_type: Option<u64>,
    #[serde(default)]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub max_fee_per_blob_gas: Option<U256>,
    #[serde(default)]
    pub blob_versioned_hashes: Option<Vec<B256>>,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub chain_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcWithdrawal {
    #[serde(with = "alloy_serde::quantity")]
    pub index: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub validator_index: u64,
    pub address: Address,
    /// Amount in gwei.
    #[serde(with = "alloy_serde::quantity")]
    pub amount: u64,
}
