use std::collections::BTreeMap;

use crate::models::datasets::accounts::{Account, Contract};
use crate::models::datasets::logs::Log;
use crate::models::datasets::receipts::Receipt;

pub trait AccountTransformer {
    fn transform_accounts(receipts: &[Receipt]) -> Vec<Account>;
    fn transform_contracts(receipts: &[Receipt], logs: &[Log]) -> Vec<Contract>;
}

impl AccountTransformer for Receipt {
    /// Senders and recipients, each once, at the first block they appear in.
    fn transform_accounts(receipts: &[Receipt]) -> Vec<Account> {
        let mut accounts: BTreeMap<&str, u64> = BTreeMap::new();

        for receipt in receipts {
            let addresses = std::iter::once(receipt.from_address.as_str())
                .chain(receipt.to_address.as_deref());
            for address in addresses {
                accounts
                    .entry(address)
                    .and_modify(|block| *block = (*block).min(receipt.block_number))
                    .or_insert(receipt.block_number);
            }
        }

        accounts
            .into_iter()
            .map(|(address, first_seen_block)| Account {
                address: address.to_string(),
                first_seen_block,
            })
            .collect()
    }

    /// Contracts created in the window plus every log emitter.
    fn transform_contracts(receipts: &[Receipt], logs: &[Log]) -> Vec<Contract> {
        let mut contracts: BTreeMap<String, Contract> = BTreeMap::new();

        for receipt in receipts {
            if let Some(address) = &receipt.contract_address {
                contracts.insert(
                    address.clone(),
                    Contract {
                        address: address.clone(),
                        first_seen_block: receipt.block_number,
                        creation_tx_hash: Some(receipt.tx_hash.clone()),
                        name: None,
                    },
                );
            }
        }

        for log in logs {
            contracts
                .entry(log.address.clone())
                .and_modify(|contract| {
                    contract.first_seen_block = contract.first_seen_block.min(log.block_number)
                })
                .or_insert_with(|| Contract {
                    address: log.address.clone(),
                    first_seen_block: log.block_number,
                    creation_tx_hash: None,
                    name: None,
                });
        }

        contracts.into_values().collect()
    }
}
