use bigdecimal::BigDecimal;
use num_bigint::BigUint;
use std::str::FromStr;

use crate::abi;
use crate::constants::{pairs, timeouts, ViewFunction};
use crate::ledger::Ledger;
use crate::models;
use crate::rpc::ChainClient;
use crate::utils::{self, FetchError};

/// WETH paid per token, at a fixed scale. An empty token reserve prices at zero.
pub fn compute_price(weth_reserve: &BigUint, token_reserve: &BigUint) -> Result<String, FetchError> {
  if *token_reserve == BigUint::from(0u32) {
    return Ok(String::from("0"))
  }
  let parse = |value: &BigUint| BigDecimal::from_str(&value.to_string())
    .map_err(|e| FetchError::MissingData(format!("reserve {} is not a decimal: {}", value, e)));
  let price = parse(weth_reserve)? / parse(token_reserve)?;
  Ok(price.with_scale(pairs::PRICE_SCALE).to_string())
}

/// Snapshots the token/WETH pool of every tracked token.
pub struct PairPoller<C: ChainClient> {
  client: C,
  factory: String,
  weth: String,
}

impl<C: ChainClient> PairPoller<C> {
  pub fn new(client: C, factory: &str, weth: &str) -> Self {
    Self {
      client,
      factory: factory.to_lowercase(),
      weth: weth.to_lowercase(),
    }
  }

  /// Refreshes every token's pair; a token that fails is logged and skipped.
  pub fn refresh<L: Ledger>(&self, ledger: &L, tokens: &[String]) -> usize {
    let mut updated = 0;
    for token in tokens {
      match self.snapshot(token) {
        Ok(Some(pair)) => match ledger.upsert_pair(&pair) {
          Ok(()) => updated += 1,
          Err(e) => warn!("Failed to store pair {} of {}: {}", pair.pair_address, token, e),
        },
        Ok(None) => trace!("No WETH pair for {}", token),
        Err(e) => warn!("Failed to read pair of {}: {}", token, e),
      }
    }
    info!("Refreshed {} of {} pairs.", updated, tokens.len());
    updated
  }

  pub fn snapshot(&self, token: &str) -> Result<Option<models::Pair>, FetchError> {
    let token = utils::normalize_address(token)?;
    let calldata = abi::encode_call(ViewFunction::GetPair, &[token.as_str(), self.weth.as_str()])?;
    let pair_address = abi::decode_address_return(&self.client.call(&self.factory, &calldata, timeouts::PAIR_CALL)?)?;
    if utils::is_zero_address(&pair_address) {
      return Ok(None)
    }

    let token0_call = abi::selector(ViewFunction::Token0);
    let token0 = abi::decode_address_return(&self.client.call(&pair_address, &token0_call, timeouts::PAIR_CALL)?)?;
    let reserves_call = abi::selector(ViewFunction::GetReserves);
    let (reserve0, reserve1) = abi::decode_reserves(&self.client.call(&pair_address, &reserves_call, timeouts::PAIR_CALL)?)?;

    let (token1, weth_reserve, token_reserve) = if token0 == self.weth {
      (token.clone(), &reserve0, &reserve1)
    } else {
      (self.weth.clone(), &reserve1, &reserve0)
    };
    let price = compute_price(weth_reserve, token_reserve)?;

    Ok(Some(models::Pair {
      pair_address,
      token0,
      token1,
      reserve0: reserve0.to_string(),
      reserve1: reserve1.to_string(),
      price,
      updated_at: utils::unix_now(),
    }))
  }
}
