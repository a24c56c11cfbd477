use alloy_rpc_types_trace::parity::{Action, TraceOutput};

use crate::models::datasets::traces::Trace;
use crate::models::rpc::traces::RawTraces;
use crate::utils::{hash_to_string, normalize_address};

pub trait TraceTransformer {
    fn transform_traces(raw: &[RawTraces]) -> Vec<Trace>;
}

impl TraceTransformer for RawTraces {
    fn transform_traces(raw: &[RawTraces]) -> Vec<Trace> {
        raw.iter()
            .flat_map(|block| {
                block.traces.iter().map(|localized| {
                    let trace = &localized.trace;

                    let mut row = Trace {
                        block_number: localized.block_number.unwrap_or(block.block_number),
                        block_hash: localized.block_hash.as_ref().map(hash_to_string),
                        tx_hash: localized.transaction_hash.as_ref().map(hash_to_string),
                        tx_position: localized.transaction_position,
                        trace_address: trace.trace_address.clone(),
                        subtraces: trace.subtraces,
                        trace_type: String::new(),
                        call_type: None,
                        reward_type: None,
                        from_address: None,
                        to_address: None,
                        value: None,
                        gas: None,
                        gas_used: None,
                        input: None,
                        output: None,
                        error: trace.error.clone(),
                    };

                    match &trace.action {
                        Action::Call(call) => {
                            row.trace_type = "call".to_string();
                            row.call_type = Some(format!("{:?}", call.call_type).to_lowercase());
                            row.from_address = Some(normalize_address(&call.from));
                            row.to_address = Some(normalize_address(&call.to));
                            row.value = Some(call.value.to_string());
                            row.gas = Some(call.gas);
                            row.input = Some(call.input.to_string());
                        }
                        Action::Create(create) => {
                            row.trace_type = "create".to_string();
                            row.from_address = Some(normalize_address(&create.from));
                            row.value = Some(create.value.to_string());
                            row.gas = Some(create.gas);
                            row.input = Some(create.init.to_string());
                        }
                        Action::Selfdestruct(destruct) => {
                            row.trace_type = "suicide".to_string();
                            row.from_address = Some(normalize_address(&destruct.address));
                            row.to_address = Some(normalize_address(&destruct.refund_address));
                            row.value = Some(destruct.balance.to_string());
                        }
                        Action::Reward(reward) => {
                            row.trace_type = "reward".to_string();
                            row.reward_type = Some(format!("{:?}", reward.reward_type).to_lowercase());
                            row.to_address = Some(normalize_address(&reward.author));
                            row.value = Some(reward.value.to_string());
                        }
                    }

                    match &trace.result {
                        Some(TraceOutput::Call(output)) => {
                            row.gas_used = Some(output.gas_used);
                            row.output = Some(output.output.to_string());
                        }
                        Some(TraceOutput::Create(output)) => {
                            row.gas_used = Some(output.gas_used);
                            row.output = Some(output.code.to_string());
                            // The created address is only known from the result
                            row.to_address = Some(normalize_address(&output.address));
                        }
                        None => {}
                    }

                    row
                })
            })
            .collect()
    }
}
