//! Event decoding and view-call encoding for the handful of contracts we watch.

use ethabi::{ParamType, Token};
use num_bigint::BigUint;
use tiny_keccak::keccak256;

use crate::constants::{Event, ViewFunction};
use crate::rpc::Log;
use crate::utils::{self, FetchError};

/// Returns the `0x` prefixed keccak256 topic of an event signature.
pub fn event_topic(event: Event) -> String {
  format!("0x{}", hex::encode(keccak256(event.to_string().as_bytes())))
}

pub fn selector(function: ViewFunction) -> [u8; 4] {
  let hash = keccak256(function.to_string().as_bytes());
  [hash[0], hash[1], hash[2], hash[3]]
}

/// `Blesed` event: a creator spun up a new token.
#[derive(Debug, Clone, PartialEq)]
pub struct CreationEvent {
  pub creator: String,
  pub token: String,
  pub stream_id: i64,
  pub referral: Option<String>,
  pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
  pub token: String,
  pub from: String,
  pub to: String,
  pub value: BigUint,
  pub block_number: u64,
  pub transaction_hash: String,
}

/// CreateX `ContractCreation` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractCreationEvent {
  pub contract: String,
  pub salt: String,
  pub block_number: u64,
  pub transaction_hash: String,
}

fn decode_hex(data: &str) -> Result<Vec<u8>, FetchError> {
  hex::decode(data.trim_start_matches("0x"))
    .map_err(|e| FetchError::Abi(format!("bad hex payload: {}", e)))
}

fn topic_at<'a>(log: &'a Log, index: usize) -> Result<&'a str, FetchError> {
  log.topics.get(index)
    .map(|t| t.as_str())
    .ok_or_else(|| FetchError::MissingData(format!("log missing topic {} at {}", index, log.address)))
}

fn address_topic(log: &Log, index: usize) -> Result<String, FetchError> {
  let bytes = decode_hex(topic_at(log, index)?)?;
  match ethabi::decode(&[ParamType::Address], &bytes)?.pop() {
    Some(token) => address_from_token(token),
    None => Err(FetchError::MissingData(format!("empty address topic at {}", log.address))),
  }
}

fn address_from_token(token: Token) -> Result<String, FetchError> {
  match token {
    Token::Address(address) => Ok(format!("0x{}", hex::encode(address.0))),
    other => Err(FetchError::Abi(format!("expected address, got {:?}", other))),
  }
}

fn uint_from_token(token: Token) -> Result<BigUint, FetchError> {
  match token {
    Token::Uint(value) => {
      let mut buf = [0u8; 32];
      value.to_big_endian(&mut buf);
      Ok(BigUint::from_bytes_be(&buf))
    },
    other => Err(FetchError::Abi(format!("expected uint, got {:?}", other))),
  }
}

fn block_of(log: &Log) -> Result<u64, FetchError> {
  log.block_number
    .ok_or_else(|| FetchError::MissingData(format!("pending log at {}", log.address)))
}

fn tx_hash_of(log: &Log) -> Result<String, FetchError> {
  log.transaction_hash.clone()
    .ok_or_else(|| FetchError::MissingData(format!("log without transaction hash at {}", log.address)))
}

fn absent(address: &str) -> bool {
  utils::is_zero_address(address)
}

pub fn decode_creation(log: &Log) -> Result<CreationEvent, FetchError> {
  let creator = address_topic(log, 1)?;
  let token = address_topic(log, 2)?;
  let data = decode_hex(&log.data)?;
  let mut words = ethabi::decode(&[
    ParamType::Uint(256), // blesAmount
    ParamType::Uint(256), // torchAmount
    ParamType::Uint(256), // liquidity
    ParamType::Uint(256), // streamId
    ParamType::Address,   // referral
    ParamType::Uint(256), // referralAmount
  ], &data)?;
  words.truncate(5);
  let referral = match words.pop() {
    Some(token) => address_from_token(token)?,
    None => return Err(FetchError::MissingData("creation event without referral word".into())),
  };
  let stream_id = match words.pop() {
    Some(token) => uint_from_token(token)?,
    None => return Err(FetchError::MissingData("creation event without stream id".into())),
  };

  if absent(&creator) || absent(&token) || stream_id == BigUint::from(0u32) {
    return Err(FetchError::MissingData(format!(
      "creation event missing creator, token or stream id in block {:?}", log.block_number
    )))
  }
  // stored as BIGINT
  let stream_id = stream_id.to_str_radix(10).parse::<i64>()
    .map_err(|_| FetchError::MissingData(format!("stream id {} out of range in block {:?}", stream_id, log.block_number)))?;

  Ok(CreationEvent {
    creator,
    token,
    stream_id,
    referral: if absent(&referral) { None } else { Some(referral) },
    block_number: block_of(log)?,
  })
}

pub fn decode_transfer(log: &Log) -> Result<TransferEvent, FetchError> {
  let from = address_topic(log, 1)?;
  let to = address_topic(log, 2)?;
  let data = decode_hex(&log.data)?;
  let value = match ethabi::decode(&[ParamType::Uint(256)], &data)?.pop() {
    Some(token) => uint_from_token(token)?,
    None => return Err(FetchError::MissingData("transfer without value".into())),
  };

  Ok(TransferEvent {
    token: utils::normalize_address(&log.address)?,
    from,
    to,
    value,
    block_number: block_of(log)?,
    transaction_hash: tx_hash_of(log)?,
  })
}

pub fn decode_contract_creation(log: &Log) -> Result<ContractCreationEvent, FetchError> {
  let contract = address_topic(log, 1)?;
  let salt = topic_at(log, 2)?.to_lowercase();
  if decode_hex(&salt)?.len() != 32 {
    return Err(FetchError::MissingData(format!("salt is not 32 bytes: {}", salt)))
  }
  Ok(ContractCreationEvent {
    contract,
    salt,
    block_number: block_of(log)?,
    transaction_hash: tx_hash_of(log)?,
  })
}

fn address_param(address: &str) -> Result<Token, FetchError> {
  let normalized = utils::normalize_address(address)?;
  let bytes = decode_hex(&normalized)?;
  Ok(Token::Address(ethabi::Address::from_slice(&bytes)))
}

pub fn encode_call(function: ViewFunction, args: &[&str]) -> Result<Vec<u8>, FetchError> {
  let tokens = args.iter()
    .map(|a| address_param(a))
    .collect::<Result<Vec<_>, _>>()?;
  let mut calldata = selector(function).to_vec();
  calldata.extend(ethabi::encode(&tokens));
  Ok(calldata)
}

/// Decodes a single `address` return value. Empty return data means the
/// callee has no such function (or no code at all).
pub fn decode_address_return(data: &[u8]) -> Result<String, FetchError> {
  if data.is_empty() {
    return Err(FetchError::MissingData("empty return data".into()))
  }
  match ethabi::decode(&[ParamType::Address], data)?.pop() {
    Some(token) => address_from_token(token),
    None => Err(FetchError::MissingData("no address returned".into())),
  }
}

pub fn decode_reserves(data: &[u8]) -> Result<(BigUint, BigUint), FetchError> {
  let mut tokens = ethabi::decode(&[ParamType::Uint(112), ParamType::Uint(112), ParamType::Uint(32)], data)?;
  tokens.truncate(2);
  let reserve1 = tokens.pop().map(uint_from_token);
  let reserve0 = tokens.pop().map(uint_from_token);
  match (reserve0, reserve1) {
    (Some(r0), Some(r1)) => Ok((r0?, r1?)),
    _ => Err(FetchError::MissingData("getReserves returned too few words".into())),
  }
}
