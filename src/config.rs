use std::env;

use crate::constants::Network;
use crate::utils::{self, FetchError};

#[derive(Debug, Clone, PartialEq)]
pub struct RollupChainConfig {
  pub chain_id: u64,
  pub rpc_url: String,
}

/// Everything the worker and the server need, resolved from the environment
/// with per-network defaults.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
  pub database_url: String,
  pub network: Network,
  pub l1_rpc_url: String,
  pub protocol_address: String,
  pub reward_token: Option<String>,
  pub weth_address: Option<String>,
  pub pair_factory: Option<String>,
  pub deployment_factory: String,
  pub start_block: u64,
  pub rollups: Vec<RollupChainConfig>,
  pub run_worker: bool,
  pub bind: String,
  pub check_block: Option<u64>,
}

fn is_truthy(value: &str) -> bool {
  value == "true" || value == "t" || value == "1"
}

fn parse_number(name: &str, value: &str) -> Result<u64, FetchError> {
  value.trim().parse::<u64>()
    .map_err(|_| FetchError::Config(format!("{} must be a block number, got {}", name, value)))
}

fn address(name: &str, value: &str) -> Result<String, FetchError> {
  utils::normalize_address(value)
    .map_err(|_| FetchError::Config(format!("{} is not an address: {}", name, value)))
}

/// Parses `84532=https://sepolia.base.org,11155420=https://sepolia.optimism.io`.
pub fn parse_rollups(value: &str) -> Result<Vec<RollupChainConfig>, FetchError> {
  value.split(',')
    .map(|entry| entry.trim())
    .filter(|entry| !entry.is_empty())
    .map(|entry| {
      let mut parts = entry.splitn(2, '=');
      match (parts.next(), parts.next()) {
        (Some(chain_id), Some(rpc_url)) if !rpc_url.trim().is_empty() => Ok(RollupChainConfig {
          chain_id: parse_number("L2_RPC_URLS chain id", chain_id)?,
          rpc_url: rpc_url.trim().to_string(),
        }),
        _ => Err(FetchError::Config(format!("L2_RPC_URLS entry must be chainid=url, got {}", entry))),
      }
    })
    .collect()
}

impl IndexerConfig {
  pub fn from_env() -> Result<IndexerConfig, FetchError> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  pub fn from_lookup<F>(lookup: F) -> Result<IndexerConfig, FetchError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let database_url = var("DATABASE_URL")
      .ok_or_else(|| FetchError::Config("DATABASE_URL env var missing".into()))?;

    let network_str = var("NETWORK").unwrap_or_else(|| String::from("sepolia"));
    let network = Network::from_name(&network_str)
      .ok_or_else(|| FetchError::Config(format!("invalid network {}", network_str)))?;

    let l1_rpc_url = var("L1_RPC_URL")
      .or_else(|| network.l1_rpc_url().map(String::from))
      .ok_or_else(|| FetchError::Config("L1_RPC_URL is required for this network".into()))?;

    let protocol_address = match var("ALTAR_ADDRESS") {
      Some(value) => address("ALTAR_ADDRESS", &value)?,
      None => match network.altar_address() {
        Some(value) => address("ALTAR_ADDRESS", value)?,
        None => return Err(FetchError::Config("ALTAR_ADDRESS is required for this network".into())),
      },
    };

    let optional_address = |name: &str, default: Option<&str>| -> Result<Option<String>, FetchError> {
      match var(name).as_deref().or(default) {
        Some(value) => Ok(Some(address(name, value)?)),
        None => Ok(None),
      }
    };
    let reward_token = optional_address("REWARD_TOKEN_ADDRESS", network.torch_address())?;
    let weth_address = optional_address("WETH_ADDRESS", network.weth_address())?;
    let pair_factory = optional_address("PAIR_FACTORY_ADDRESS", network.pair_factory_address())?;
    let deployment_factory = address(
      "DEPLOYMENT_FACTORY_ADDRESS",
      &var("DEPLOYMENT_FACTORY_ADDRESS").unwrap_or_else(|| network.deployment_factory_address().to_string()),
    )?;

    let start_block = match var("START_BLOCK") {
      Some(value) => parse_number("START_BLOCK", &value)?,
      None => network.start_block(),
    };

    let rollups = match var("L2_RPC_URLS") {
      Some(value) => parse_rollups(&value)?,
      None => network.rollups().into_iter()
        .map(|(chain_id, rpc_url)| RollupChainConfig { chain_id, rpc_url })
        .collect(),
    };

    let check_block = match var("CHECK_BLOCK") {
      Some(value) => Some(parse_number("CHECK_BLOCK", &value)?),
      None => None,
    };

    Ok(IndexerConfig {
      database_url,
      network,
      l1_rpc_url,
      protocol_address,
      reward_token,
      weth_address,
      pair_factory,
      deployment_factory,
      start_block,
      rollups,
      run_worker: var("RUN_WORKER").map(|v| is_truthy(&v)).unwrap_or(false),
      bind: var("BIND").unwrap_or_else(|| String::from("127.0.0.1:3000")),
      check_block,
    })
  }
}
