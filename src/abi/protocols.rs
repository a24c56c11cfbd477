use alloy_primitives::{Address, B256, I256, U256};
use serde::Serialize;
use std::collections::HashMap;

use crate::abi::{AbiCodec, DecodedFields, ProtocolId};
use crate::models::errors::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dex {
    UniswapV2,
    UniswapV3,
}

impl Dex {
    pub fn protocol(&self) -> ProtocolId {
        match self {
            Dex::UniswapV2 => ProtocolId::UniswapV2,
            Dex::UniswapV3 => ProtocolId::UniswapV3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DexEventTag {
    /// `PairCreated` on v2 factories, `PoolCreated` on v3 factories.
    PoolCreated,
    Mint,
    Burn,
    Swap,
}

impl DexEventTag {
    pub const ALL: [DexEventTag; 4] = [
        DexEventTag::PoolCreated,
        DexEventTag::Mint,
        DexEventTag::Burn,
        DexEventTag::Swap,
    ];

    pub fn event_name(&self, dex: Dex) -> &'static str {
        match (self, dex) {
            (DexEventTag::PoolCreated, Dex::UniswapV2) => "PairCreated",
            (DexEventTag::PoolCreated, Dex::UniswapV3) => "PoolCreated",
            (DexEventTag::Mint, _) => "Mint",
            (DexEventTag::Burn, _) => "Burn",
            (DexEventTag::Swap, _) => "Swap",
        }
    }
}

/// topic0 → (dex, event) lookup, built once from the codec's signatures.
pub struct SignatureTable {
    by_topic: HashMap<B256, (Dex, DexEventTag)>,
    transfer: B256,
}

impl SignatureTable {
    pub fn new(codec: &AbiCodec) -> Result<Self, DecodeError> {
        let mut by_topic = HashMap::new();
        for dex in [Dex::UniswapV2, Dex::UniswapV3] {
            for tag in DexEventTag::ALL {
                let topic = codec.topic(dex.protocol(), tag.event_name(dex))?;
                by_topic.insert(topic, (dex, tag));
            }
        }

        Ok(Self {
            by_topic,
            transfer: codec.topic(ProtocolId::Erc20, "Transfer")?,
        })
    }

    pub fn lookup(&self, topic0: &B256) -> Option<(Dex, DexEventTag)> {
        self.by_topic.get(topic0).copied()
    }

    pub fn transfer_topic(&self) -> B256 {
        self.transfer
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum V2Event {
    PairCreated {
        token0: Option<Address>,
        token1: Option<Address>,
        pair: Address,
    },
    Mint {
        sender: Option<Address>,
        amount0: U256,
        amount1: U256,
    },
    Burn {
        sender: Option<Address>,
        to: Option<Address>,
        amount0: U256,
        amount1: U256,
    },
    Swap {
        sender: Option<Address>,
        to: Option<Address>,
        amount0_in: U256,
        amount1_in: U256,
        amount0_out: U256,
        amount1_out: U256,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum V3Event {
    PoolCreated {
        token0: Option<Address>,
        token1: Option<Address>,
        fee: Option<u32>,
        pool: Address,
    },
    Mint {
        sender: Address,
        owner: Option<Address>,
        amount0: U256,
        amount1: U256,
    },
    Burn {
        owner: Option<Address>,
        amount0: U256,
        amount1: U256,
    },
    Swap {
        sender: Option<Address>,
        recipient: Option<Address>,
        amount0: I256,
        amount1: I256,
    },
}

/// A DEX log decoded into its protocol-specific shape.
#[derive(Debug, Clone, PartialEq)]
pub enum DexEvent {
    V2(V2Event),
    V3(V3Event),
}

/// Token movements of one event, as decimal strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFlows {
    pub amount0_in: String,
    pub amount1_in: String,
    pub amount0_out: String,
    pub amount1_out: String,
}

impl TokenFlows {
    fn zero() -> Self {
        Self {
            amount0_in: "0".to_string(),
            amount1_in: "0".to_string(),
            amount0_out: "0".to_string(),
            amount1_out: "0".to_string(),
        }
    }

    fn inflow(amount0: impl ToString, amount1: impl ToString) -> Self {
        Self {
            amount0_in: amount0.to_string(),
            amount1_in: amount1.to_string(),
            ..Self::zero()
        }
    }

    fn outflow(amount0: impl ToString, amount1: impl ToString) -> Self {
        Self {
            amount0_out: amount0.to_string(),
            amount1_out: amount1.to_string(),
            ..Self::zero()
        }
    }
}

/// A newly created pool announced by a factory.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedPool {
    pub pool: Address,
    pub token0: Option<Address>,
    pub token1: Option<Address>,
    pub fee: Option<u32>,
}

impl DexEvent {
    /// Decode a log whose topic0 matched `tag` in the signature table.
    pub fn decode(
        codec: &AbiCodec,
        dex: Dex,
        tag: DexEventTag,
        topics: &[B256],
        data: &[u8],
    ) -> Result<Self, DecodeError> {
        let fields = codec.decode_log(dex.protocol(), tag.event_name(dex), topics, data)?;

        Ok(match dex {
            Dex::UniswapV2 => DexEvent::V2(decode_v2(tag, &fields)?),
            Dex::UniswapV3 => DexEvent::V3(decode_v3(tag, &fields)?),
        })
    }

    pub fn dex(&self) -> Dex {
        match self {
            DexEvent::V2(_) => Dex::UniswapV2,
            DexEvent::V3(_) => Dex::UniswapV3,
        }
    }

    pub fn tag(&self) -> DexEventTag {
        match self {
            DexEvent::V2(V2Event::PairCreated { .. }) | DexEvent::V3(V3Event::PoolCreated { .. }) => {
                DexEventTag::PoolCreated
            }
            DexEvent::V2(V2Event::Mint { .. }) | DexEvent::V3(V3Event::Mint { .. }) => {
                DexEventTag::Mint
            }
            DexEvent::V2(V2Event::Burn { .. }) | DexEvent::V3(V3Event::Burn { .. }) => {
                DexEventTag::Burn
            }
            DexEvent::V2(V2Event::Swap { .. }) | DexEvent::V3(V3Event::Swap { .. }) => {
                DexEventTag::Swap
            }
        }
    }

    pub fn created_pool(&self) -> Option<CreatedPool> {
        match self {
            DexEvent::V2(V2Event::PairCreated {
                token0,
                token1,
                pair,
            }) => Some(CreatedPool {
                pool: *pair,
                token0: *token0,
                token1: *token1,
                fee: None,
            }),
            DexEvent::V3(V3Event::PoolCreated {
                token0,
                token1,
                fee,
                pool,
            }) => Some(CreatedPool {
                pool: *pool,
                token0: *token0,
                token1: *token1,
                fee: *fee,
            }),
            _ => None,
        }
    }

    pub fn sender(&self) -> Option<Address> {
        match self {
            DexEvent::V2(V2Event::Mint { sender, .. })
            | DexEvent::V2(V2Event::Burn { sender, .. })
            | DexEvent::V2(V2Event::Swap { sender, .. })
            | DexEvent::V3(V3Event::Swap { sender, .. }) => *sender,
            DexEvent::V3(V3Event::Mint { sender, .. }) => Some(*sender),
            DexEvent::V3(V3Event::Burn { owner, .. }) => *owner,
            DexEvent::V2(V2Event::PairCreated { .. }) | DexEvent::V3(V3Event::PoolCreated { .. }) => {
                None
            }
        }
    }

    pub fn recipient(&self) -> Option<Address> {
        match self {
            DexEvent::V2(V2Event::Burn { to, .. }) | DexEvent::V2(V2Event::Swap { to, .. }) => *to,
            DexEvent::V3(V3Event::Swap { recipient, .. }) => *recipient,
            DexEvent::V3(V3Event::Mint { owner, .. }) => *owner,
            _ => None,
        }
    }

    pub fn flows(&self) -> TokenFlows {
        match self {
            DexEvent::V2(V2Event::PairCreated { .. }) | DexEvent::V3(V3Event::PoolCreated { .. }) => {
                TokenFlows::zero()
            }
            DexEvent::V2(V2Event::Mint {
                amount0, amount1, ..
            })
            | DexEvent::V3(V3Event::Mint {
                amount0, amount1, ..
            }) => TokenFlows::inflow(amount0, amount1),
            DexEvent::V2(V2Event::Burn {
                amount0, amount1, ..
            })
            | DexEvent::V3(V3Event::Burn {
                amount0, amount1, ..
            }) => TokenFlows::outflow(amount0, amount1),
            DexEvent::V2(V2Event::Swap {
                amount0_in,
                amount1_in,
                amount0_out,
                amount1_out,
                ..
            }) => TokenFlows {
                amount0_in: amount0_in.to_string(),
                amount1_in: amount1_in.to_string(),
                amount0_out: amount0_out.to_string(),
                amount1_out: amount1_out.to_string(),
            },
            DexEvent::V3(V3Event::Swap {
                amount0, amount1, ..
            }) => v3_swap_flows(*amount0, *amount1),
        }
    }
}

/// Signed v3 swap deltas to directional flows. A negative `amount0` means token0 left
/// the pool (a buy); otherwise token0 entered it (a sell).
pub fn v3_swap_flows(amount0: I256, amount1: I256) -> TokenFlows {
    if amount0.is_negative() {
        TokenFlows {
            amount0_in: "0".to_string(),
            amount1_in: amount1.to_string(),
            amount0_out: negated(amount0),
            amount1_out: "0".to_string(),
        }
    } else {
        TokenFlows {
            amount0_in: amount0.to_string(),
            amount1_in: "0".to_string(),
            amount0_out: "0".to_string(),
            amount1_out: negated(amount1),
        }
    }
}

// Works on the magnitude so I256::MIN does not overflow
fn negated(value: I256) -> String {
    if value.is_negative() {
        value.unsigned_abs().to_string()
    } else if value.is_zero() {
        "0".to_string()
    } else {
        format!("-{value}")
    }
}

fn decode_v2(tag: DexEventTag, fields: &DecodedFields) -> Result<V2Event, DecodeError> {
    Ok(match tag {
        DexEventTag::PoolCreated => V2Event::PairCreated {
            token0: fields.address("token0").ok(),
            token1: fields.address("token1").ok(),
            pair: fields.address("pair")?,
        },
        DexEventTag::Mint => V2Event::Mint {
            sender: fields.address("sender").ok(),
            amount0: fields.uint("amount0")?,
            amount1: fields.uint("amount1")?,
        },
        DexEventTag::Burn => V2Event::Burn {
            sender: fields.address("sender").ok(),
            to: fields.address("to").ok(),
            amount0: fields.uint("amount0")?,
            amount1: fields.uint("amount1")?,
        },
        DexEventTag::Swap => V2Event::Swap {
            sender: fields.address("sender").ok(),
            to: fields.address("to").ok(),
            amount0_in: fields.uint("amount0In")?,
            amount1_in: fields.uint("amount1In")?,
            amount0_out: fields.uint("amount0Out")?,
            amount1_out: fields.uint("amount1Out")?,
        },
    })
}

fn decode_v3(tag: DexEventTag, fields: &DecodedFields) -> Result<V3Event, DecodeError> {
    Ok(match tag {
        DexEventTag::PoolCreated => V3Event::PoolCreated {
            token0: fields.address("token0").ok(),
            token1: fields.address("token1").ok(),
            fee: fields
                .uint("fee")
                .ok()
                .and_then(|fee| u32::try_from(fee).ok()),
            pool: fields.address("pool")?,
        },
        DexEventTag::Mint => V3Event::Mint {
            sender: fields.address("sender")?,
            owner: fields.address("owner").ok(),
            amount0: fields.uint("amount0")?,
            amount1: fields.uint("amount1")?,
        },
        DexEventTag::Burn => V3Event::Burn {
            owner: fields.address("owner").ok(),
            amount0: fields.uint("amount0")?,
            amount1: fields.uint("amount1")?,
        },
        DexEventTag::Swap => V3Event::Swap {
            sender: fields.address("sender").ok(),
            recipient: fields.address("recipient").ok(),
            amount0: fields.int("amount0")?,
            amount1: fields.int("amount1")?,
        },
    })
}
