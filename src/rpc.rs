use reqwest::blocking::Client;
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use strum_macros::Display;

use crate::utils::{self, FetchError};

#[derive(Display, Clone)]
pub enum RPCMethod {
  #[strum(serialize = "eth_blockNumber")]
  BlockNumber,
  #[strum(serialize = "eth_getBlockByNumber")]
  GetBlockByNumber,
  #[strum(serialize = "eth_getLogs")]
  GetLogs,
  #[strum(serialize = "eth_getTransactionByHash")]
  GetTransactionByHash,
  #[strum(serialize = "eth_call")]
  Call,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RPCRequest {
  id: i32,
  jsonrpc: String,
  method: String,
  params: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RPCErrorObject {
  pub code: i64,
  pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RPCResponse {
  pub id: Option<Value>,
  pub jsonrpc: String,
  pub result: Option<Value>,
  pub error: Option<RPCErrorObject>,
}

fn de_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
  D: Deserializer<'de>,
{
  let quantity = String::deserialize(deserializer)?;
  utils::parse_hex_u64(&quantity).map_err(serde::de::Error::custom)
}

fn de_opt_hex_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
  D: Deserializer<'de>,
{
  match Option::<String>::deserialize(deserializer)? {
    Some(quantity) => utils::parse_hex_u64(&quantity).map(Some).map_err(serde::de::Error::custom),
    None => Ok(None),
  }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Log {
  pub address: String,
  pub topics: Vec<String>,
  pub data: String,
  #[serde(default, deserialize_with = "de_opt_hex_u64")]
  pub block_number: Option<u64>,
  pub transaction_hash: Option<String>,
  #[serde(default, deserialize_with = "de_opt_hex_u64")]
  pub transaction_index: Option<u64>,
  #[serde(default, deserialize_with = "de_opt_hex_u64")]
  pub log_index: Option<u64>,
  #[serde(default)]
  pub removed: bool,
}

impl Log {
  /// Canonical chain order: (block number, transaction index, log index).
  pub fn chain_order(&self) -> (u64, u64, u64) {
    (
      self.block_number.unwrap_or(0),
      self.transaction_index.unwrap_or(0),
      self.log_index.unwrap_or(0),
    )
  }
}

pub fn sort_logs(logs: &mut Vec<Log>) {
  logs.sort_by_key(|log| log.chain_order());
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Block {
  #[serde(deserialize_with = "de_hex_u64")]
  pub number: u64,
  pub hash: String,
  #[serde(deserialize_with = "de_hex_u64")]
  pub timestamp: u64,
  #[serde(default)]
  pub transactions: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
  pub hash: String,
  pub from: String,
  pub to: Option<String>,
  #[serde(default, deserialize_with = "de_opt_hex_u64")]
  pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogFilter {
  pub addresses: Vec<String>,
  pub topic0: String,
  pub from_block: u64,
  pub to_block: u64,
}

impl LogFilter {
  pub fn new(addresses: Vec<String>, topic0: String, from_block: u64, to_block: u64) -> Self {
    Self { addresses, topic0, from_block, to_block }
  }

  fn to_param(&self) -> Value {
    json!({
      "address": self.addresses,
      "topics": [self.topic0],
      "fromBlock": utils::to_hex_quantity(self.from_block),
      "toBlock": utils::to_hex_quantity(self.to_block),
    })
  }
}

/// Read-only view of one chain's node. Every call carries its own bounded wait.
pub trait ChainClient {
  fn chain_id(&self) -> u64;
  fn block_number(&self, timeout: Duration) -> Result<u64, FetchError>;
  fn get_block(&self, number: u64, timeout: Duration) -> Result<Option<Block>, FetchError>;
  fn get_logs(&self, filter: &LogFilter, timeout: Duration) -> Result<Vec<Log>, FetchError>;
  fn get_transaction(&self, hash: &str, timeout: Duration) -> Result<Option<Transaction>, FetchError>;
  fn call(&self, to: &str, data: &[u8], timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

#[derive(Clone)]
pub struct EthClient {
  chain_id: u64,
  rpc_url: String,
  http_client: Client,
}

impl EthClient {
  pub fn new(chain_id: u64, rpc_url: &str) -> EthClient {
    Self {
      chain_id,
      rpc_url: rpc_url.to_string(),
      http_client: Client::new(),
    }
  }

  pub fn rpc_call(&self, rpc_method: RPCMethod, params: Vec<Value>, timeout: Duration) -> Result<Value, FetchError> {
    let method = rpc_method.to_string();
    trace!("call {} {} (chain {})", method, self.rpc_url, self.chain_id);
    let url = Url::parse(self.rpc_url.as_str())
      .map_err(|e| FetchError::Config(format!("rpc url {}: {}", self.rpc_url, e)))?;

    let request = RPCRequest {
      id: 1,
      jsonrpc: "2.0".to_string(),
      method: method.clone(),
      params,
    };
    let payload = serde_json::to_string(&request)?;
    trace!("payload {}", payload);

    let resp = self.http_client.post(url)
      .header("Content-Type", "application/json")
      .body(payload)
      .timeout(timeout)
      .send()?;
    let body = resp.text()?;
    trace!("response {}", body);

    let rpc_response: RPCResponse = serde_json::from_str(body.as_str())?;
    if let Some(err) = rpc_response.error {
      return Err(FetchError::Rpc { code: err.code, message: err.message })
    }
    Ok(rpc_response.result.unwrap_or(Value::Null))
  }
}

impl ChainClient for EthClient {
  fn chain_id(&self) -> u64 {
    self.chain_id
  }

  fn block_number(&self, timeout: Duration) -> Result<u64, FetchError> {
    let result = self.rpc_call(RPCMethod::BlockNumber, vec![], timeout)?;
    let quantity: String = serde_json::from_value(result)?;
    utils::parse_hex_u64(&quantity)
  }

  fn get_block(&self, number: u64, timeout: Duration) -> Result<Option<Block>, FetchError> {
    let params = vec![json!(utils::to_hex_quantity(number)), json!(false)];
    let result = self.rpc_call(RPCMethod::GetBlockByNumber, params, timeout)?;
    Ok(serde_json::from_value(result)?)
  }

  fn get_logs(&self, filter: &LogFilter, timeout: Duration) -> Result<Vec<Log>, FetchError> {
    let result = self.rpc_call(RPCMethod::GetLogs, vec![filter.to_param()], timeout)?;
    let logs: Vec<Log> = serde_json::from_value(result)?;
    Ok(logs.into_iter().filter(|log| !log.removed).collect())
  }

  fn get_transaction(&self, hash: &str, timeout: Duration) -> Result<Option<Transaction>, FetchError> {
    let result = self.rpc_call(RPCMethod::GetTransactionByHash, vec![json!(hash)], timeout)?;
    Ok(serde_json::from_value(result)?)
  }

  fn call(&self, to: &str, data: &[u8], timeout: Duration) -> Result<Vec<u8>, FetchError> {
    let params = vec![
      json!({ "to": to, "data": format!("0x{}", hex::encode(data)) }),
      json!("latest"),
    ];
    let result = self.rpc_call(RPCMethod::Call, params, timeout)?;
    let encoded: String = serde_json::from_value(result)?;
    hex::decode(encoded.trim_start_matches("0x"))
      .map_err(|e| FetchError::Abi(format!("eth_call returned bad hex: {}", e)))
  }
}
