use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

use crate::abi::AbiCodec;
use crate::abi::protocols::{DexEvent, SignatureTable};
use crate::metrics::Metrics;
use crate::models::common::EntityKind;
use crate::models::datasets::blocks::Block;
use crate::models::datasets::events::{Event, Pool};
use crate::models::datasets::logs::Log;
use crate::utils::normalize_address;

pub trait EventTransformer {
    fn transform_events(
        logs: &[Log],
        blocks: &[Block],
        codec: &AbiCodec,
        signatures: &SignatureTable,
    ) -> Vec<Event>;
}

impl EventTransformer for Log {
    fn transform_events(
        logs: &[Log],
        blocks: &[Block],
        codec: &AbiCodec,
        signatures: &SignatureTable,
    ) -> Vec<Event> {
        let block_times: HashMap<u64, _> = blocks
            .iter()
            .map(|block| (block.block_number, block.block_time))
            .collect();

        logs.iter()
            .filter_map(|log| {
                let (dex, tag) = signatures.lookup(log.topics.first()?)?;

                let decoded = match DexEvent::decode(codec, dex, tag, &log.topics, &log.data) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        warn!(
                            "Skipping {:?} {:?} log {} #{}: {}",
                            dex, tag, log.tx_hash, log.log_index, e
                        );
                        if let Some(metrics) = Metrics::global() {
                            metrics.record_decode_failure(EntityKind::Event);
                        }
                        return None;
                    }
                };

                let created = decoded.created_pool();
                let flows = decoded.flows();

                Some(Event {
                    block_number: log.block_number,
                    block_time: block_times.get(&log.block_number).copied(),
                    tx_hash: log.tx_hash.clone(),
                    log_index: log.log_index,
                    pool_address: created
                        .as_ref()
                        .map(|created| normalize_address(&created.pool))
                        .unwrap_or_else(|| log.address.clone()),
                    dex,
                    event_type: tag,
                    sender: decoded.sender().as_ref().map(normalize_address),
                    recipient: decoded.recipient().as_ref().map(normalize_address),
                    amount0_in: flows.amount0_in,
                    amount1_in: flows.amount1_in,
                    amount0_out: flows.amount0_out,
                    amount1_out: flows.amount1_out,
                    token0_address: created
                        .as_ref()
                        .and_then(|created| created.token0.as_ref().map(normalize_address)),
                    token1_address: created
                        .as_ref()
                        .and_then(|created| created.token1.as_ref().map(normalize_address)),
                    fee: created.as_ref().and_then(|created| created.fee),
                    token0_symbol: None,
                    token1_symbol: None,
                    token0_decimals: None,
                    token1_decimals: None,
                })
            })
            .collect()
    }
}

/// Pools referenced by `events`, keyed by address. Creation events carry their token
/// pair; pools only seen trading have no tokens until they are looked up on-chain.
pub fn pool_candidates(events: &[Event]) -> BTreeMap<String, Pool> {
    let mut pools: BTreeMap<String, Pool> = BTreeMap::new();

    for event in events {
        let from_creation = event.token0_address.is_some() || event.token1_address.is_some();
        let candidate = Pool {
            pool_address: event.pool_address.clone(),
            dex: event.dex,
            token0_address: event.token0_address.clone(),
            token1_address: event.token1_address.clone(),
            fee: event.fee,
            created_block: from_creation.then_some(event.block_number),
            created_tx: from_creation.then(|| event.tx_hash.clone()),
        };

        match pools.get_mut(&event.pool_address) {
            Some(existing) if existing.created_block.is_none() && from_creation => {
                *existing = candidate;
            }
            Some(_) => {}
            None => {
                pools.insert(event.pool_address.clone(), candidate);
            }
        }
    }

    pools
}

/// Every token address referenced by `pools`.
pub fn token_candidates<'a>(pools: impl IntoIterator<Item = &'a Pool>) -> BTreeSet<String> {
    pools
        .into_iter()
        .flat_map(|pool| [pool.token0_address.clone(), pool.token1_address.clone()])
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ProtocolId;
    use crate::abi::protocols::{Dex, DexEventTag};
    use crate::indexer::transformations::blocks::BlockTransformer;
    use crate::indexer::transformations::blocks::tests::sample_block;
    use crate::models::rpc::blocks::RpcBlock;
    use alloy_primitives::{Bytes, U256, address};

    fn word(value: u64) -> [u8; 32] {
        U256::from(value).to_be_bytes::<32>()
    }

    fn log(block_number: u64, log_index: u64, address: &str, topics: Vec<alloy_primitives::B256>, data: Vec<u8>) -> Log {
        Log {
            block_number,
            block_hash: None,
            tx_hash: format!("0x{:064x}", log_index),
            tx_index: Some(0),
            log_index,
            address: address.to_string(),
            topics,
            data: Bytes::from(data),
            removed: false,
        }
    }

    #[test]
    fn test_transform_swap_and_creation_events() {
        let codec = AbiCodec::new().unwrap();
        let signatures = SignatureTable::new(&codec).unwrap();
        let blocks = RpcBlock::transform_blocks(&[sample_block()]).unwrap();
        let block_number = blocks[0].block_number;

        let pair = address!("0xB4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc");
        let token0 = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
        let token1 = address!("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
        let router = address!("0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D");

        let created = log(
            block_number,
            1,
            "0x5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f",
            vec![
                codec.topic(ProtocolId::UniswapV2, "PairCreated").unwrap(),
                token0.into_word(),
                token1.into_word(),
            ],
            [pair.into_word().0, word(1)].concat(),
        );
        let swap = log(
            block_number,
            2,
            "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc",
            vec![
                codec.topic(ProtocolId::UniswapV2, "Swap").unwrap(),
                router.into_word(),
                router.into_word(),
            ],
            [word(0), word(500), word(42), word(0)].concat(),
        );
        let malformed = log(
            block_number,
            3,
            "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc",
            vec![codec.topic(ProtocolId::UniswapV2, "Swap").unwrap()],
            vec![1, 2, 3],
        );
        let unrelated = log(block_number, 4, "0x0000000000000000000000000000000000000001", vec![], vec![]);

        let events = Log::transform_events(&[created, swap, malformed, unrelated], &blocks, &codec, &signatures);
        assert_eq!(events.len(), 2);

        let creation = &events[0];
        assert_eq!(creation.event_type, DexEventTag::PoolCreated);
        assert_eq!(creation.pool_address, "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc");
        assert_eq!(creation.token0_address.as_deref(), Some("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"));
        assert_eq!(creation.amount0_in, "0");

        let trade = &events[1];
        assert_eq!(trade.dex, Dex::UniswapV2);
        assert_eq!(trade.event_type, DexEventTag::Swap);
        assert_eq!(trade.amount1_in, "500");
        assert_eq!(trade.amount0_out, "42");
        assert_eq!(trade.block_time, Some(blocks[0].block_time));
        assert_eq!(trade.sender.as_deref(), Some("0x7a250d5630b4cf539739df2c5dacb4c659f2488d"));

        let pools = pool_candidates(&events);
        assert_eq!(pools.len(), 1);
        let pool = &pools["0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc"];
        assert_eq!(pool.created_block, Some(block_number));
        assert_eq!(token_candidates(pools.values()).len(), 2);
    }

    #[test]
    fn test_v3_pool_creation_carries_fee() {
        let codec = AbiCodec::new().unwrap();
        let signatures = SignatureTable::new(&codec).unwrap();

        let token0 = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
        let token1 = address!("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
        let pool = address!("0x88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640");

        let created = log(
            12_376_729,
            0,
            "0x1f98431c8ad98523631ae4a59f267346ea31f984",
            vec![
                codec.topic(ProtocolId::UniswapV3, "PoolCreated").unwrap(),
                token0.into_word(),
                token1.into_word(),
                alloy_primitives::B256::from(word(500)),
            ],
            [word(10), pool.into_word().0].concat(),
        );

        let events = Log::transform_events(&[created], &[], &codec, &signatures);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].dex, Dex::UniswapV3);
        assert_eq!(events[0].fee, Some(500));

        let pools = pool_candidates(&events);
        let candidate = &pools["0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640"];
        assert_eq!(candidate.fee, Some(500));
        assert_eq!(candidate.token1_address.as_deref(), Some("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"));
    }
}
