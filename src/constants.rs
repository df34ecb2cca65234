use std::fmt;
use std::time::Duration;

pub mod l1 {
  pub static BATCH_SIZE: u64 = 1000;
  pub static IDLE_WAIT_SECS: u64 = 3;
  pub static ERROR_BACKOFF_SECS: u64 = 5;
  // max addresses per eth_getLogs filter
  pub static ADDRESS_CHUNK: usize = 100;
}

pub mod rollup {
  pub static TRACKING_INTERVAL_SECS: u64 = 60;
  pub static PASS_TIMEOUT_SECS: u64 = 60;
  pub static MAX_BACKTRACK_BLOCKS: u64 = 10_000;
  pub static MAX_BLOCKS_PER_PASS: u64 = 5_000;
  pub static SUB_BATCH_BLOCKS: u64 = 100;
}

pub mod pairs {
  pub static REFRESH_INTERVAL_SECS: u64 = 300;
  pub static PRICE_SCALE: i64 = 18;
}

pub static HOLDERS_PER_RECORD: i64 = 100;
pub static RECENT_DEPLOYMENTS: i64 = 100;

/// Bounded waits, one per call site.
pub mod timeouts {
  use super::Duration;

  pub const CONNECTIVITY: Duration = Duration::from_secs(5);
  pub const HEAD: Duration = Duration::from_secs(10);
  pub const BLOCK: Duration = Duration::from_secs(10);
  pub const PROBE: Duration = Duration::from_secs(10);
  pub const TRANSACTION: Duration = Duration::from_secs(10);
  pub const TRANSFER_LOGS: Duration = Duration::from_secs(15);
  pub const CREATION_LOGS: Duration = Duration::from_secs(30);
  pub const L1_LOGS: Duration = Duration::from_secs(30);
  pub const PAIR_CALL: Duration = Duration::from_secs(10);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
  Blesed,
  Transfer,
  ContractCreation,
}

impl fmt::Display for Event {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      Event::Blesed => write!(f, "Blesed(address,address,uint256,uint256,uint256,uint256,address,uint256)"),
      Event::Transfer => write!(f, "Transfer(address,address,uint256)"),
      Event::ContractCreation => write!(f, "ContractCreation(address,bytes32)"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewFunction {
  L1Token,
  GetPair,
  Token0,
  GetReserves,
}

impl fmt::Display for ViewFunction {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      ViewFunction::L1Token => write!(f, "l1Token()"),
      ViewFunction::GetPair => write!(f, "getPair(address,address)"),
      ViewFunction::Token0 => write!(f, "token0()"),
      ViewFunction::GetReserves => write!(f, "getReserves()"),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Network {
  Sepolia,
  Custom,
}

impl Network {
  pub fn from_name(name: &str) -> Option<Network> {
    match name {
      "sepolia" | "testnet" => Some(Network::Sepolia),
      "custom" => Some(Network::Custom),
      _ => None,
    }
  }

  /// Base chain id, only used to label log lines. Unknown for custom networks.
  pub fn chain_id(&self) -> u64 {
    match *self {
      Network::Sepolia => 11155111,
      Network::Custom => 0,
    }
  }

  pub fn l1_rpc_url(&self) -> Option<&str> {
    match *self {
      Network::Sepolia => Some("https://rpc.sepolia.org"),
      Network::Custom => None,
    }
  }

  pub fn altar_address(&self) -> Option<&str> {
    match *self {
      Network::Sepolia => Some("0x648a383965e25dee13ff93fdd86535038ee0ba96"),
      Network::Custom => None,
    }
  }

  /// Reward token whose transfers are indexed alongside created tokens.
  pub fn torch_address(&self) -> Option<&str> {
    match *self {
      Network::Sepolia => Some("0x05208B8beEc0A684c16412fa5b65134A5Aba09bD"),
      Network::Custom => None,
    }
  }

  pub fn weth_address(&self) -> Option<&str> {
    match *self {
      Network::Sepolia => Some("0x7b79995e5f793A07Bc00c21412e50Ecae098E7f9"),
      Network::Custom => None,
    }
  }

  pub fn pair_factory_address(&self) -> Option<&str> {
    match *self {
      Network::Sepolia => Some("0x7E0987E5b3a30e3f2828572Bb659A548460a3003"),
      Network::Custom => None,
    }
  }

  /// CreateX is deployed at the same address on every chain.
  pub fn deployment_factory_address(&self) -> &str {
    "0xba5Ed099633D3B313e4D5F7bdc1305d3c28ba5Ed"
  }

  pub fn start_block(&self) -> u64 {
    match *self {
      Network::Sepolia => 8430431,
      Network::Custom => 0,
    }
  }

  pub fn rollups(&self) -> Vec<(u64, String)> {
    match *self {
      Network::Sepolia => vec![
        (11155420, String::from("https://sepolia.optimism.io")), // OP Sepolia
        (84532, String::from("https://sepolia.base.org")), // Base Sepolia
      ],
      Network::Custom => vec![],
    }
  }
}

impl fmt::Display for Network {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      Network::Sepolia => write!(f, "sepolia"),
      Network::Custom => write!(f, "custom"),
    }
  }
}
