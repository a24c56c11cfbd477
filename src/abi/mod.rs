pub mod protocols;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_json_abi::{Event, Function};
use alloy_primitives::{Address, B256, Bytes, I256, U256, hex, keccak256};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::models::errors::DecodeError;

/// Contract families the codec knows signatures for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolId {
    Erc20,
    /// ERC-20 tokens that return `bytes32` from `name()`/`symbol()`.
    Erc20Bytes32,
    UniswapV2,
    UniswapV3,
}

impl ProtocolId {
    pub const ALL: [ProtocolId; 4] = [
        ProtocolId::Erc20,
        ProtocolId::Erc20Bytes32,
        ProtocolId::UniswapV2,
        ProtocolId::UniswapV3,
    ];

    fn events(&self) -> &'static [&'static str] {
        match self {
            ProtocolId::Erc20 => &[
                "event Transfer(address indexed from, address indexed to, uint256 value)",
                "event Approval(address indexed owner, address indexed spender, uint256 value)",
            ],
            ProtocolId::Erc20Bytes32 => &[],
            ProtocolId::UniswapV2 => &[
                "event PairCreated(address indexed token0, address indexed token1, address pair, uint256 allPairsLength)",
                "event Mint(address indexed sender, uint256 amount0, uint256 amount1)",
                "event Burn(address indexed sender, uint256 amount0, uint256 amount1, address indexed to)",
                "event Swap(address indexed sender, uint256 amount0In, uint256 amount1In, uint256 amount0Out, uint256 amount1Out, address indexed to)",
                "event Sync(uint112 reserve0, uint112 reserve1)",
            ],
            ProtocolId::UniswapV3 => &[
                "event PoolCreated(address indexed token0, address indexed token1, uint24 indexed fee, int24 tickSpacing, address pool)",
                "event Mint(address sender, address indexed owner, int24 indexed tickLower, int24 indexed tickUpper, uint128 amount, uint256 amount0, uint256 amount1)",
                "event Burn(address indexed owner, int24 indexed tickLower, int24 indexed tickUpper, uint128 amount, uint256 amount0, uint256 amount1)",
                "event Swap(address indexed sender, address indexed recipient, int256 amount0, int256 amount1, uint160 sqrtPriceX96, uint128 liquidity, int24 tick)",
            ],
        }
    }

    fn functions(&self) -> &'static [&'static str] {
        match self {
            ProtocolId::Erc20 => &[
                "function name() view returns (string)",
                "function symbol() view returns (string)",
                "function decimals() view returns (uint8)",
                "function totalSupply() view returns (uint256)",
            ],
            ProtocolId::Erc20Bytes32 => &[
                "function name() view returns (bytes32)",
                "function symbol() view returns (bytes32)",
            ],
            ProtocolId::UniswapV2 => &[
                "function token0() view returns (address)",
                "function token1() view returns (address)",
            ],
            ProtocolId::UniswapV3 => &[
                "function token0() view returns (address)",
                "function token1() view returns (address)",
                "function fee() view returns (uint24)",
            ],
        }
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolId::Erc20 => "erc20",
            ProtocolId::Erc20Bytes32 => "erc20_bytes32",
            ProtocolId::UniswapV2 => "uniswap_v2",
            ProtocolId::UniswapV3 => "uniswap_v3",
        })
    }
}

/// Decoded values in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFields(Vec<(String, DynSolValue)>);

impl DecodedFields {
    pub fn get(&self, field: &str) -> Option<&DynSolValue> {
        self.0
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    fn require(&self, field: &str) -> Result<&DynSolValue, DecodeError> {
        self.get(field).ok_or_else(|| DecodeError::MissingField {
            field: field.to_string(),
        })
    }

    pub fn address(&self, field: &str) -> Result<Address, DecodeError> {
        self.require(field)?
            .as_address()
            .ok_or_else(|| type_error(field, "address"))
    }

    pub fn uint(&self, field: &str) -> Result<U256, DecodeError> {
        self.require(field)?
            .as_uint()
            .map(|(value, _)| value)
            .ok_or_else(|| type_error(field, "uint"))
    }

    pub fn int(&self, field: &str) -> Result<I256, DecodeError> {
        self.require(field)?
            .as_int()
            .map(|(value, _)| value)
            .ok_or_else(|| type_error(field, "int"))
    }

    pub fn string(&self, field: &str) -> Result<String, DecodeError> {
        self.require(field)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| type_error(field, "string"))
    }

    pub fn fixed_bytes(&self, field: &str) -> Result<B256, DecodeError> {
        self.require(field)?
            .as_fixed_bytes()
            .map(|(bytes, _)| B256::right_padding_from(bytes))
            .ok_or_else(|| type_error(field, "fixed bytes"))
    }
}

fn type_error(field: &str, expected: &'static str) -> DecodeError {
    DecodeError::FieldType {
        field: field.to_string(),
        expected,
    }
}

/// Canonical text signature and its keccak hash (`0x`-prefixed hex).
///
/// The first four bytes of the hash are the function selector; the full hash is the
/// event topic. Argument types are canonicalized, so `uint` hashes as `uint256`.
pub fn signature_hash(name: &str, arg_types: &[&str]) -> Result<(String, String), DecodeError> {
    let canonical = arg_types
        .iter()
        .map(|ty| {
            DynSolType::parse(ty.trim())
                .map(|parsed| parsed.sol_type_name().into_owned())
                .map_err(|e| DecodeError::Signature {
                    signature: format!("{name}({})", arg_types.join(",")),
                    reason: e.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let text = format!("{}({})", name.trim(), canonical.join(","));
    let hash = keccak256(text.as_bytes());
    Ok((text, hex::encode_prefixed(hash)))
}

struct ProtocolAbi {
    events: HashMap<String, Event>,
    functions: HashMap<String, Function>,
}

/// Signature-driven ABI codec for the supported protocols, built once at startup.
pub struct AbiCodec {
    protocols: HashMap<ProtocolId, ProtocolAbi>,
}

impl AbiCodec {
    pub fn new() -> Result<Self, DecodeError> {
        let mut protocols = HashMap::new();

        for protocol in ProtocolId::ALL {
            let mut events = HashMap::new();
            for signature in protocol.events() {
                let event = Event::parse(signature).map_err(|e| DecodeError::Signature {
                    signature: signature.to_string(),
                    reason: e.to_string(),
                })?;
                events.insert(event.name.clone(), event);
            }

            let mut functions = HashMap::new();
            for signature in protocol.functions() {
                let function =
                    Function::parse(signature).map_err(|e| DecodeError::Signature {
                        signature: signature.to_string(),
                        reason: e.to_string(),
                    })?;
                functions.insert(function.name.clone(), function);
            }

            protocols.insert(protocol, ProtocolAbi { events, functions });
        }

        Ok(Self { protocols })
    }

    pub fn event(&self, protocol: ProtocolId, name: &str) -> Result<&Event, DecodeError> {
        self.protocols
            .get(&protocol)
            .and_then(|abi| abi.events.get(name))
            .ok_or_else(|| DecodeError::Unknown {
                protocol: protocol.to_string(),
                what: "event",
                name: name.to_string(),
            })
    }

    pub fn function(&self, protocol: ProtocolId, name: &str) -> Result<&Function, DecodeError> {
        self.protocols
            .get(&protocol)
            .and_then(|abi| abi.functions.get(name))
            .ok_or_else(|| DecodeError::Unknown {
                protocol: protocol.to_string(),
                what: "function",
                name: name.to_string(),
            })
    }

    /// Topic0 of a known event.
    pub fn topic(&self, protocol: ProtocolId, event: &str) -> Result<B256, DecodeError> {
        Ok(self.event(protocol, event)?.selector())
    }

    /// Decode a log against the named event.
    ///
    /// Indexed inputs consume topics in order (topic0 is the event hash and is skipped
    /// for non-anonymous events). When a log carries fewer topics than the event declares
    /// indexed inputs, the remaining indexed inputs are left out of the result. Indexed
    /// dynamic types (`string`, `bytes`, arrays, tuples) only exist as their keccak hash
    /// and decode to `bytes32`.
    pub fn decode_log(
        &self,
        protocol: ProtocolId,
        event: &str,
        topics: &[B256],
        data: &[u8],
    ) -> Result<DecodedFields, DecodeError> {
        let event = self.event(protocol, event)?;

        let mut indexed_topics = topics.iter().skip(usize::from(!event.anonymous));
        let mut indexed = Vec::new();
        let mut body_names = Vec::new();
        let mut body_types = Vec::new();
        let mut topics_exhausted = false;

        for (position, input) in event.inputs.iter().enumerate() {
            let name = field_name(&input.name, position);
            let ty = DynSolType::parse(&input.selector_type())?;

            if input.indexed {
                if topics_exhausted {
                    continue;
                }
                match indexed_topics.next() {
                    Some(topic) => indexed.push((position, name, decode_topic(&ty, topic))),
                    None => {
                        debug!(
                            "Log for {}::{} has {} topic(s); skipping indexed '{}' and later indexed inputs",
                            protocol,
                            event.name,
                            topics.len(),
                            name
                        );
                        topics_exhausted = true;
                    }
                }
            } else {
                body_names.push((position, name));
                body_types.push(ty);
            }
        }

        let body_values = if body_types.is_empty() {
            Vec::new()
        } else {
            match DynSolType::Tuple(body_types).abi_decode_sequence(data)? {
                DynSolValue::Tuple(values) => values,
                other => {
                    return Err(DecodeError::UnexpectedShape(format!(
                        "expected a tuple for {} data, got {:?}",
                        event.name, other
                    )));
                }
            }
        };

        let mut fields: Vec<(usize, String, DynSolValue)> = indexed;
        fields.extend(
            body_names
                .into_iter()
                .zip(body_values)
                .map(|((position, name), value)| (position, name, value)),
        );
        fields.sort_by_key(|(position, _, _)| *position);

        Ok(DecodedFields(
            fields
                .into_iter()
                .map(|(_, name, value)| (name, value))
                .collect(),
        ))
    }

    /// Decode ABI-encoded return data against the named function's outputs.
    pub fn decode_call_result(
        &self,
        protocol: ProtocolId,
        function: &str,
        data: &[u8],
    ) -> Result<DecodedFields, DecodeError> {
        let function = self.function(protocol, function)?;

        let types = function
            .outputs
            .iter()
            .map(|output| DynSolType::parse(&output.selector_type()))
            .collect::<Result<Vec<_>, _>>()?;

        let values = match DynSolType::Tuple(types).abi_decode_sequence(data)? {
            DynSolValue::Tuple(values) => values,
            other => {
                return Err(DecodeError::UnexpectedShape(format!(
                    "expected a tuple for {} output, got {:?}",
                    function.name, other
                )));
            }
        };

        Ok(DecodedFields(
            function
                .outputs
                .iter()
                .enumerate()
                .zip(values)
                .map(|((position, output), value)| (output_name(&output.name, position), value))
                .collect(),
        ))
    }

    /// Selector followed by the ABI-encoded arguments.
    pub fn call_data(
        &self,
        protocol: ProtocolId,
        function: &str,
        args: Vec<DynSolValue>,
    ) -> Result<Bytes, DecodeError> {
        let function = self.function(protocol, function)?;
        if args.len() != function.inputs.len() {
            return Err(DecodeError::UnexpectedShape(format!(
                "{} takes {} argument(s), got {}",
                function.name,
                function.inputs.len(),
                args.len()
            )));
        }

        let mut data = function.selector().to_vec();
        if !args.is_empty() {
            data.extend(DynSolValue::Tuple(args).abi_encode_params());
        }
        Ok(Bytes::from(data))
    }
}

fn field_name(name: &str, position: usize) -> String {
    if name.is_empty() {
        format!("arg{position}")
    } else {
        name.to_string()
    }
}

// Unnamed single outputs are addressed as "output", later ones as "output{n}"
fn output_name(name: &str, position: usize) -> String {
    match (name.is_empty(), position) {
        (false, _) => name.to_string(),
        (true, 0) => "output".to_string(),
        (true, n) => format!("output{n}"),
    }
}

fn decode_topic(ty: &DynSolType, topic: &B256) -> DynSolValue {
    match ty {
        DynSolType::Address => DynSolValue::Address(Address::from_word(*topic)),
        DynSolType::Uint(bits) => DynSolValue::Uint(U256::from_be_bytes(topic.0), *bits),
        // Indexed signed integers are sign-extended to 32 bytes
        DynSolType::Int(bits) => {
            DynSolValue::Int(I256::from_raw(U256::from_be_bytes(topic.0)), *bits)
        }
        DynSolType::Bool => DynSolValue::Bool(!topic.is_zero()),
        DynSolType::FixedBytes(size) => DynSolValue::FixedBytes(*topic, *size),
        _ => DynSolValue::FixedBytes(*topic, 32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256};

    fn word(value: u128) -> [u8; 32] {
        U256::from(value).to_be_bytes::<32>()
    }

    fn codec() -> AbiCodec {
        AbiCodec::new().unwrap()
    }

    #[test]
    fn test_signature_hash_transfer() {
        let (text, hash) = signature_hash("Transfer", &["address", "address", "uint"]).unwrap();
        assert_eq!(text, "Transfer(address,address,uint256)");
        assert_eq!(
            hash,
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_signature_hash_selectors() {
        let (_, decimals) = signature_hash("decimals", &[]).unwrap();
        assert!(decimals.starts_with("0x313ce567"));
        let (_, token0) = signature_hash("token0", &[]).unwrap();
        assert!(token0.starts_with("0x0dfe1681"));
        assert!(signature_hash("broken", &["uint257x"]).is_err());
    }

    #[test]
    fn test_known_topics() {
        let codec = codec();
        assert_eq!(
            codec.topic(ProtocolId::UniswapV2, "Swap").unwrap(),
            b256!("0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822")
        );
        assert_eq!(
            codec.topic(ProtocolId::UniswapV3, "Swap").unwrap(),
            b256!("0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67")
        );
        assert_eq!(
            codec.topic(ProtocolId::UniswapV2, "PairCreated").unwrap(),
            b256!("0x0d3648bd0f6ba80134a33ba9275ac585d9d315f0ad8355cddefde31afa28d0e9")
        );
    }

    #[test]
    fn test_decode_v2_swap_fixture() {
        let codec = codec();
        let sender = address!("0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D");
        let to = address!("0x28C6c06298d514Db089934071355E5743bf21d60");

        let topics = vec![
            codec.topic(ProtocolId::UniswapV2, "Swap").unwrap(),
            sender.into_word(),
            to.into_word(),
        ];
        let mut data = Vec::new();
        data.extend(word(0));
        data.extend(word(1_000_000_000_000_000_000));
        data.extend(word(2_500_000_000));
        data.extend(word(0));

        let fields = codec
            .decode_log(ProtocolId::UniswapV2, "Swap", &topics, &data)
            .unwrap();

        assert_eq!(
            fields.names().collect::<Vec<_>>(),
            vec!["sender", "amount0In", "amount1In", "amount0Out", "amount1Out", "to"]
        );
        assert_eq!(fields.address("sender").unwrap(), sender);
        assert_eq!(fields.address("to").unwrap(), to);
        assert_eq!(fields.uint("amount0In").unwrap(), U256::ZERO);
        assert_eq!(
            fields.uint("amount1In").unwrap(),
            U256::from(1_000_000_000_000_000_000u128)
        );
        assert_eq!(fields.uint("amount0Out").unwrap(), U256::from(2_500_000_000u64));
        assert_eq!(fields.uint("amount1Out").unwrap(), U256::ZERO);
    }

    #[test]
    fn test_decode_log_with_missing_topics() {
        let codec = codec();
        let sender = address!("0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D");
        let topics = vec![codec.topic(ProtocolId::UniswapV2, "Swap").unwrap(), sender.into_word()];
        let data: Vec<u8> = [word(1), word(2), word(3), word(4)].concat();

        let fields = codec
            .decode_log(ProtocolId::UniswapV2, "Swap", &topics, &data)
            .unwrap();

        assert_eq!(fields.len(), 5);
        assert!(!fields.contains("to"));
        assert_eq!(fields.uint("amount1Out").unwrap(), U256::from(4));
        assert!(matches!(
            fields.address("to"),
            Err(DecodeError::MissingField { .. })
        ));
    }

    #[test]
    fn test_decode_log_short_data_fails() {
        let codec = codec();
        let topics = vec![codec.topic(ProtocolId::UniswapV2, "Mint").unwrap(), B256::ZERO];
        let data = word(1).to_vec();
        assert!(matches!(
            codec.decode_log(ProtocolId::UniswapV2, "Mint", &topics, &data),
            Err(DecodeError::Abi(_))
        ));
    }

    #[test]
    fn test_decode_signed_indexed_topic() {
        let codec = codec();
        let owner = address!("0xC36442b4a4522E871399CD717aBDD847Ab11FE88");
        let tick_lower = I256::try_from(-887_220).unwrap();
        let tick_upper = I256::try_from(887_220).unwrap();
        let topics = vec![
            codec.topic(ProtocolId::UniswapV3, "Burn").unwrap(),
            owner.into_word(),
            B256::from(tick_lower.into_raw().to_be_bytes::<32>()),
            B256::from(tick_upper.into_raw().to_be_bytes::<32>()),
        ];
        let data: Vec<u8> = [word(500), word(10), word(20)].concat();

        let fields = codec
            .decode_log(ProtocolId::UniswapV3, "Burn", &topics, &data)
            .unwrap();
        assert_eq!(fields.int("tickLower").unwrap(), tick_lower);
        assert_eq!(fields.int("tickUpper").unwrap(), tick_upper);
        assert_eq!(fields.uint("amount1").unwrap(), U256::from(20));
    }

    #[test]
    fn test_decode_call_results() {
        let codec = codec();

        let decimals = codec
            .decode_call_result(ProtocolId::Erc20, "decimals", &word(18))
            .unwrap();
        assert_eq!(decimals.uint("output").unwrap(), U256::from(18));

        // string "WETH": offset, length, padded bytes
        let mut symbol = Vec::new();
        symbol.extend(word(32));
        symbol.extend(word(4));
        let mut text = [0u8; 32];
        text[..4].copy_from_slice(b"WETH");
        symbol.extend(text);
        let decoded = codec
            .decode_call_result(ProtocolId::Erc20, "symbol", &symbol)
            .unwrap();
        assert_eq!(decoded.string("output").unwrap(), "WETH");

        let mut raw = [0u8; 32];
        raw[..3].copy_from_slice(b"MKR");
        let bytes32 = codec
            .decode_call_result(ProtocolId::Erc20Bytes32, "symbol", &raw)
            .unwrap();
        assert_eq!(&bytes32.fixed_bytes("output").unwrap()[..3], b"MKR");
    }

    #[test]
    fn test_call_data() {
        let codec = codec();
        let data = codec.call_data(ProtocolId::UniswapV2, "token1", Vec::new()).unwrap();
        assert_eq!(data.as_ref(), &[0xd2, 0x12, 0x20, 0xa7]);
        assert!(codec
            .call_data(ProtocolId::Erc20, "decimals", vec![DynSolValue::Bool(true)])
            .is_err());
        assert!(matches!(
            codec.function(ProtocolId::Erc20, "balanceOf"),
            Err(DecodeError::Unknown { .. })
        ));
    }
}
