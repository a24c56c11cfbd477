use alloy_primitives::{Address, B256, Bytes};
use anyhow::Result;
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::abi::protocols::Dex;
use crate::abi::{AbiCodec, ProtocolId};
use crate::indexer::api::MetadataApi;
use crate::indexer::rpc::RpcClient;
use crate::indexer::rpc::calls::{ContractCall, eth_call_batch};
use crate::models::datasets::accounts::{Account, Contract};
use crate::models::datasets::events::{Event, Pool, Token};
use crate::models::errors::ApiError;
use crate::utils::normalize_address;

/// Metadata discovered so far in the run: pools, tokens, and where each account
/// and contract was first seen. Windows upsert whole rows, so anything that spans
/// windows is merged here before export.
#[derive(Default)]
pub struct MetadataCache {
    pools: RwLock<HashMap<String, Pool>>,
    tokens: RwLock<HashMap<String, Token>>,
    accounts: RwLock<HashMap<String, u64>>,
    contracts: RwLock<HashMap<String, Contract>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pool(&self, address: &str) -> Option<Pool> {
        self.pools.read().await.get(address).cloned()
    }

    pub async fn token(&self, address: &str) -> Option<Token> {
        self.tokens.read().await.get(address).cloned()
    }

    /// Pull `first_seen_block` back to the earliest block seen in any window.
    pub async fn merge_accounts(&self, accounts: Vec<Account>) -> Vec<Account> {
        let mut seen = self.accounts.write().await;
        accounts
            .into_iter()
            .map(|mut account| {
                let first = seen
                    .entry(account.address.clone())
                    .or_insert(account.first_seen_block);
                *first = (*first).min(account.first_seen_block);
                account.first_seen_block = *first;
                account
            })
            .collect()
    }

    /// Keep the earliest `first_seen_block`, the creation tx and the name across windows.
    pub async fn merge_contracts(&self, contracts: Vec<Contract>) -> Vec<Contract> {
        let mut seen = self.contracts.write().await;
        contracts
            .into_iter()
            .map(|contract| {
                let merged = match seen.get(&contract.address) {
                    Some(known) => merge_contract(known, contract),
                    None => contract,
                };
                seen.insert(merged.address.clone(), merged.clone());
                merged
            })
            .collect()
    }

    /// Fill token addresses, symbols and decimals on `events` from cached metadata.
    pub async fn enrich_events(&self, events: &[Event]) -> Vec<Event> {
        let pools = self.pools.read().await;
        let tokens = self.tokens.read().await;
        enrich_events(events, &pools, &tokens)
    }
}

pub fn enrich_events(
    events: &[Event],
    pools: &HashMap<String, Pool>,
    tokens: &HashMap<String, Token>,
) -> Vec<Event> {
    events
        .iter()
        .map(|event| {
            let mut event = event.clone();
            if let Some(pool) = pools.get(&event.pool_address) {
                event.token0_address = event.token0_address.or_else(|| pool.token0_address.clone());
                event.token1_address = event.token1_address.or_else(|| pool.token1_address.clone());
                event.fee = event.fee.or(pool.fee);
            }
            if let Some(token) = event.token0_address.as_ref().and_then(|a| tokens.get(a)) {
                event.token0_symbol = token.symbol.clone();
                event.token0_decimals = token.decimals;
            }
            if let Some(token) = event.token1_address.as_ref().and_then(|a| tokens.get(a)) {
                event.token1_symbol = token.symbol.clone();
                event.token1_decimals = token.decimals;
            }
            event
        })
        .collect()
}

/// On-chain lookups for pool and token metadata, batched through `eth_call`.
pub struct Enricher<'a> {
    pub client: &'a RpcClient,
    pub codec: &'a AbiCodec,
    pub cache: &'a MetadataCache,
    pub request_batch_size: usize,
}

impl Enricher<'_> {
    /// Resolve every candidate pool, looking up `token0`/`token1` (and `fee` for V3)
    /// for pools that neither a creation event nor the cache describes.
    pub async fn discover_pools(&self, candidates: BTreeMap<String, Pool>) -> Result<Vec<Pool>> {
        let mut resolved = Vec::with_capacity(candidates.len());
        let mut lookups = Vec::new();

        for (address, candidate) in candidates {
            match self.cache.pool(&address).await {
                Some(mut cached) => {
                    if cached.created_block.is_none() && candidate.created_block.is_some() {
                        cached.created_block = candidate.created_block;
                        cached.created_tx = candidate.created_tx;
                    }
                    resolved.push(cached);
                }
                None if is_complete(&candidate) => resolved.push(candidate),
                None => lookups.push(candidate),
            }
        }

        if !lookups.is_empty() {
            debug!("Looking up tokens for {} pool(s)", lookups.len());
            resolved.extend(self.lookup_pools(lookups).await?);
        }

        let mut pools = self.cache.pools.write().await;
        for pool in &resolved {
            pools.insert(pool.pool_address.clone(), pool.clone());
        }
        drop(pools);

        resolved.sort_by(|a, b| a.pool_address.cmp(&b.pool_address));
        Ok(resolved)
    }

    async fn lookup_pools(&self, mut pools: Vec<Pool>) -> Result<Vec<Pool>> {
        let mut calls = Vec::new();
        let mut slots = Vec::new();

        for (index, pool) in pools.iter().enumerate() {
            let Some(to) = parse_address(&pool.pool_address) else {
                continue;
            };
            let mut functions = vec!["token0", "token1"];
            if pool.dex == Dex::UniswapV3 {
                functions.push("fee");
            }
            for function in functions {
                calls.push(ContractCall {
                    to,
                    data: self.codec.call_data(pool.dex.protocol(), function, vec![])?,
                });
                slots.push((index, function));
            }
        }

        let results = eth_call_batch(self.client, &calls, self.request_batch_size).await?;

        for ((index, function), result) in slots.into_iter().zip(results) {
            let pool = &mut pools[index];
            let Some(bytes) = result else {
                continue;
            };
            let protocol = pool.dex.protocol();
            match function {
                "token0" => {
                    pool.token0_address = pool
                        .token0_address
                        .take()
                        .or_else(|| self.decode_address(protocol, function, &bytes));
                }
                "token1" => {
                    pool.token1_address = pool
                        .token1_address
                        .take()
                        .or_else(|| self.decode_address(protocol, function, &bytes));
                }
                _ => {
                    pool.fee = self
                        .codec
                        .decode_call_result(protocol, function, &bytes)
                        .and_then(|fields| fields.uint("output"))
                        .ok()
                        .and_then(|fee| u32::try_from(fee).ok());
                }
            }
        }

        for pool in pools.iter().filter(|pool| !is_complete(pool)) {
            warn!("Pool {} did not report its tokens", pool.pool_address);
        }
        Ok(pools)
    }

    /// Resolve ERC-20 metadata for `addresses`. Tokens that revert or return
    /// garbage keep `None` fields rather than failing the window.
    pub async fn discover_tokens(&self, addresses: BTreeSet<String>) -> Result<Vec<Token>> {
        let mut resolved = Vec::with_capacity(addresses.len());
        let mut missing = Vec::new();

        for address in addresses {
            match self.cache.token(&address).await {
                Some(token) => resolved.push(token),
                None => missing.push(address),
            }
        }

        if !missing.is_empty() {
            let tokens = self.lookup_tokens(missing).await?;
            let mut cache = self.cache.tokens.write().await;
            for token in &tokens {
                cache.insert(token.token_address.clone(), token.clone());
            }
            info!("Discovered {} new token(s)", tokens.len());
            resolved.extend(tokens);
        }

        resolved.sort_by(|a, b| a.token_address.cmp(&b.token_address));
        Ok(resolved)
    }

    async fn lookup_tokens(&self, addresses: Vec<String>) -> Result<Vec<Token>> {
        const FUNCTIONS: [&str; 4] = ["name", "symbol", "decimals", "totalSupply"];

        let mut tokens: Vec<Token> = addresses
            .into_iter()
            .map(|token_address| Token {
                token_address,
                name: None,
                symbol: None,
                decimals: None,
                total_supply: None,
            })
            .collect();

        let mut calls = Vec::new();
        let mut slots = Vec::new();
        for (index, token) in tokens.iter().enumerate() {
            let Some(to) = parse_address(&token.token_address) else {
                continue;
            };
            for function in FUNCTIONS {
                calls.push(ContractCall {
                    to,
                    data: self.codec.call_data(ProtocolId::Erc20, function, vec![])?,
                });
                slots.push((index, function));
            }
        }

        let results = eth_call_batch(self.client, &calls, self.request_batch_size).await?;

        for ((index, function), result) in slots.into_iter().zip(results) {
            let Some(bytes) = result else {
                continue;
            };
            let token = &mut tokens[index];
            match function {
                "name" => token.name = self.decode_text(function, &bytes),
                "symbol" => token.symbol = self.decode_text(function, &bytes),
                "decimals" => {
                    token.decimals = self
                        .codec
                        .decode_call_result(ProtocolId::Erc20, function, &bytes)
                        .and_then(|fields| fields.uint("output"))
                        .ok()
                        .and_then(|decimals| u8::try_from(decimals).ok());
                }
                _ => {
                    token.total_supply = self
                        .codec
                        .decode_call_result(ProtocolId::Erc20, function, &bytes)
                        .and_then(|fields| fields.uint("output"))
                        .ok()
                        .map(|supply| supply.to_string());
                }
            }
        }

        Ok(tokens)
    }

    fn decode_address(&self, protocol: ProtocolId, function: &str, bytes: &Bytes) -> Option<String> {
        self.codec
            .decode_call_result(protocol, function, bytes)
            .and_then(|fields| fields.address("output"))
            .map(|address| normalize_address(&address))
            .ok()
    }

    // name()/symbol() return a string, or bytes32 on older tokens
    fn decode_text(&self, function: &str, bytes: &Bytes) -> Option<String> {
        let text = match self.codec.decode_call_result(ProtocolId::Erc20, function, bytes) {
            Ok(fields) => fields.string("output").ok(),
            Err(_) => self
                .codec
                .decode_call_result(ProtocolId::Erc20Bytes32, function, bytes)
                .and_then(|fields| fields.fixed_bytes("output"))
                .ok()
                .map(|word| bytes32_to_string(&word)),
        };
        text.and_then(|text| clean_text(&text))
    }
}

fn merge_contract(known: &Contract, current: Contract) -> Contract {
    let (earlier, later) = if known.first_seen_block <= current.first_seen_block {
        (known.clone(), current)
    } else {
        (current, known.clone())
    };
    Contract {
        address: earlier.address,
        first_seen_block: earlier.first_seen_block,
        creation_tx_hash: earlier.creation_tx_hash.or(later.creation_tx_hash),
        name: earlier.name.or(later.name),
    }
}

fn is_complete(pool: &Pool) -> bool {
    pool.token0_address.is_some()
        && pool.token1_address.is_some()
        && (pool.dex != Dex::UniswapV3 || pool.fee.is_some())
}

fn parse_address(address: &str) -> Option<Address> {
    match address.parse() {
        Ok(address) => Some(address),
        Err(e) => {
            warn!("Skipping invalid address '{}': {}", address, e);
            None
        }
    }
}

// Postgres rejects NUL in text and JSONB, and some tokens pad or embed them
fn clean_text(text: &str) -> Option<String> {
    let text: String = text.chars().filter(|c| *c != '\0').collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn bytes32_to_string(word: &B256) -> String {
    let end = word.iter().position(|byte| *byte == 0).unwrap_or(word.len());
    String::from_utf8_lossy(&word[..end]).into_owned()
}

/// Attach verified contract names from the metadata API. Lookups run concurrently
/// and are paced by the API's rate limiter. Unknown or unverified contracts keep
/// `None`; exhausted retries fail the window.
pub async fn name_contracts(api: &MetadataApi, contracts: Vec<Contract>) -> Result<Vec<Contract>> {
    let lookups = contracts.into_iter().map(|mut contract| async move {
        match api.contract_name(&contract.address).await {
            Ok(name) => contract.name = name,
            Err(e @ (ApiError::RetriesExhausted { .. } | ApiError::Transport(_))) => {
                return Err(anyhow::Error::from(e));
            }
            Err(e) => debug!("No name for contract {}: {}", contract.address, e),
        }
        Ok::<_, anyhow::Error>(contract)
    });
    try_join_all(lookups).await
}
