use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::indexer::Pipeline;
use crate::indexer::enrichment::{Enricher, name_contracts};
use crate::indexer::rpc::blocks::get_blocks;
use crate::indexer::rpc::receipts::get_block_receipts;
use crate::indexer::rpc::traces::get_block_traces;
use crate::indexer::transformations::{
    accounts::AccountTransformer,
    blocks::BlockTransformer,
    events::{EventTransformer, pool_candidates, token_candidates},
    logs::TransferTransformer,
    receipts::ReceiptTransformer,
    traces::TraceTransformer,
    transactions::TransactionTransformer,
};
use crate::models::common::EntityKind;
use crate::models::datasets::blocks::Block;
use crate::models::datasets::events::{Event, Pool};
use crate::models::datasets::logs::Log;
use crate::models::datasets::receipts::Receipt;
use crate::models::rpc::blocks::RpcBlock;
use crate::models::rpc::receipts::RawReceipts;
use crate::models::rpc::traces::RawTraces;
use crate::scheduler::accumulator::Accumulator;
use crate::scheduler::{Stages, Window};

// Parsing is CPU-bound; keep it off the runtime threads that drive RPC batches
async fn offload<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await?)
}

#[async_trait]
impl Stages for Pipeline {
    async fn extract(&self, kind: EntityKind, window: Window, acc: &Accumulator) -> Result<usize> {
        let block_numbers: Vec<u64> = window.blocks().collect();
        let batch_size = self.request_batch_size;

        let count = match kind {
            EntityKind::RawBlock => {
                acc.put(get_blocks(&self.client, &block_numbers, batch_size).await?)
                    .await
            }
            EntityKind::RawReceipt => {
                acc.put(get_block_receipts(&self.client, &block_numbers, batch_size).await?)
                    .await
            }
            EntityKind::RawTrace => {
                acc.put(get_block_traces(&self.client, &block_numbers, batch_size).await?)
                    .await
            }
            EntityKind::Block => {
                let raw = acc.get::<RpcBlock>().await;
                acc.put(offload(move || RpcBlock::transform_blocks(&raw)).await??)
                    .await
            }
            EntityKind::Transaction => {
                let raw = acc.get::<RpcBlock>().await;
                acc.put(offload(move || RpcBlock::transform_transactions(&raw)).await??)
                    .await
            }
            EntityKind::Withdrawal => {
                let raw = acc.get::<RpcBlock>().await;
                acc.put(offload(move || RpcBlock::transform_withdrawals(&raw)).await?)
                    .await
            }
            EntityKind::Receipt => {
                let raw = acc.get::<RawReceipts>().await;
                acc.put(offload(move || RawReceipts::transform_receipts(&raw)).await?)
                    .await
            }
            EntityKind::Log => {
                let raw = acc.get::<RawReceipts>().await;
                acc.put(offload(move || RawReceipts::transform_logs(&raw)).await??)
                    .await
            }
            EntityKind::Transfer => {
                let logs = acc.get::<Log>().await;
                let codec = self.codec.clone();
                let signatures = self.signatures.clone();
                acc.put(offload(move || Log::transform_transfers(&logs, &codec, &signatures)).await?)
                    .await
            }
            EntityKind::Event => {
                let logs = acc.get::<Log>().await;
                let blocks = acc.get::<Block>().await;
                let codec = self.codec.clone();
                let signatures = self.signatures.clone();
                acc.put(
                    offload(move || Log::transform_events(&logs, &blocks, &codec, &signatures))
                        .await?,
                )
                .await
            }
            EntityKind::Pool => {
                let events = acc.get::<Event>().await;
                let pools = self.enricher().discover_pools(pool_candidates(&events)).await?;
                acc.put(pools).await
            }
            EntityKind::Token => {
                let pools = acc.get::<Pool>().await;
                let tokens = self
                    .enricher()
                    .discover_tokens(token_candidates(pools.iter()))
                    .await?;
                acc.put(tokens).await
            }
            EntityKind::Account => {
                let receipts = acc.get::<Receipt>().await;
                let accounts = offload(move || Receipt::transform_accounts(&receipts)).await?;
                acc.put(self.cache.merge_accounts(accounts).await).await
            }
            EntityKind::Contract => {
                let receipts = acc.get::<Receipt>().await;
                let logs = acc.get::<Log>().await;
                let contracts = offload(move || Receipt::transform_contracts(&receipts, &logs)).await?;
                let contracts = match &self.metadata_api {
                    Some(api) => name_contracts(api, contracts).await?,
                    None => contracts,
                };
                acc.put(self.cache.merge_contracts(contracts).await).await
            }
            EntityKind::Trace => {
                let raw = acc.get::<RawTraces>().await;
                acc.put(offload(move || RawTraces::transform_traces(&raw)).await?)
                    .await
            }
        };

        Ok(count)
    }

    async fn enrich(&self, window: Window, acc: &Accumulator) -> Result<()> {
        let events = acc.get::<Event>().await;
        let enriched = self.cache.enrich_events(&events).await;
        let with_tokens = enriched
            .iter()
            .filter(|event| event.token0_symbol.is_some() || event.token1_symbol.is_some())
            .count();
        debug!(
            "Enriched {}/{} events for blocks {}",
            with_tokens,
            enriched.len(),
            window
        );
        acc.put(enriched).await;
        Ok(())
    }
}

impl Pipeline {
    fn enricher(&self) -> Enricher<'_> {
        Enricher {
            client: &self.client,
            codec: &self.codec,
            cache: &self.cache,
            request_batch_size: self.request_batch_size,
        }
    }
}
