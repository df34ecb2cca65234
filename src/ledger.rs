//! The derived ledger: creations, balances, watermarks and deployment mappings.
//!
//! Engines talk to the `Ledger` trait so they can run against Postgres in
//! production and an in-memory map in tests.

use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use num_bigint::BigUint;

use crate::abi::CreationEvent;
use crate::db;
use crate::models;
use crate::utils::FetchError;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// Which chain a watermark belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Chain {
  Base,
  Rollup(u64),
}

/// Which balance table a holder row lives in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BalanceScope<'a> {
  Base { token: &'a str },
  Rollup { chain_id: u64, token: &'a str },
}

impl<'a> BalanceScope<'a> {
  pub fn token(&self) -> &'a str {
    match *self {
      BalanceScope::Base { token } => token,
      BalanceScope::Rollup { token, .. } => token,
    }
  }
}

pub trait Ledger {
  /// Runs `f` so that either all of its writes land or none do.
  fn transaction<T, F>(&self, f: F) -> Result<T, FetchError>
  where
    F: FnOnce() -> Result<T, FetchError>;

  fn upsert_creation(&self, creation: &CreationEvent, timestamp: i64) -> Result<(), FetchError>;
  fn get_creation(&self, creator: &str) -> Result<Option<models::Creation>, FetchError>;
  fn increment_transfer_count(&self, token: &str, timestamp: i64) -> Result<usize, FetchError>;

  fn track_token(&self, token: &str, creator: &str, block: u64) -> Result<(), FetchError>;
  fn tracked_tokens(&self) -> Result<Vec<String>, FetchError>;
  fn seed_tracked_tokens(&self) -> Result<usize, FetchError>;

  fn balance(&self, scope: BalanceScope, holder: &str) -> Result<Option<BigUint>, FetchError>;
  fn put_balance(&self, scope: BalanceScope, holder: &str, balance: &BigUint, timestamp: i64) -> Result<(), FetchError>;
  fn delete_balance(&self, scope: BalanceScope, holder: &str) -> Result<(), FetchError>;

  fn mark_processed(&self, chain: Chain, block: u64, timestamp: i64) -> Result<(), FetchError>;
  fn last_processed(&self, chain: Chain) -> Result<Option<u64>, FetchError>;
  fn is_processed(&self, chain: Chain, block: u64) -> Result<bool, FetchError>;

  fn upsert_deployment(&self, deployment: &models::Deployment) -> Result<(), FetchError>;
  fn rollup_tokens(&self, chain_id: u64) -> Result<Vec<String>, FetchError>;
  fn record_rollup_transfer(&self, transfer: &models::RollupTransfer) -> Result<(), FetchError>;

  fn upsert_pair(&self, pair: &models::Pair) -> Result<(), FetchError>;
}

pub fn parse_balance(raw: &str) -> Result<BigUint, FetchError> {
  BigUint::parse_bytes(raw.as_bytes(), 10)
    .ok_or_else(|| FetchError::MissingData(format!("stored balance is not an integer: {}", raw)))
}

/// Postgres ledger holding one pooled connection for the lifetime of a job.
pub struct PgLedger {
  conn: PooledConnection<ConnectionManager<PgConnection>>,
}

impl PgLedger {
  pub fn connect(pool: &DbPool) -> Result<PgLedger, FetchError> {
    Ok(PgLedger { conn: pool.get()? })
  }
}

impl Ledger for PgLedger {
  fn transaction<T, F>(&self, f: F) -> Result<T, FetchError>
  where
    F: FnOnce() -> Result<T, FetchError>,
  {
    self.conn.build_transaction()
      .read_write()
      .run::<T, FetchError, _>(f)
  }

  fn upsert_creation(&self, creation: &CreationEvent, timestamp: i64) -> Result<(), FetchError> {
    let new_creation = models::NewCreation {
      creator_address: &creation.creator,
      created_token: &creation.token,
      stream_id: creation.stream_id,
      referral: creation.referral.as_ref().map(|r| r.as_str()),
      created_at: timestamp,
      updated_at: timestamp,
      total_transfers: 0,
    };
    Ok(db::upsert_creation(&self.conn, new_creation)?)
  }

  fn get_creation(&self, creator: &str) -> Result<Option<models::Creation>, FetchError> {
    Ok(db::get_creation(&self.conn, creator)?)
  }

  fn increment_transfer_count(&self, token: &str, timestamp: i64) -> Result<usize, FetchError> {
    Ok(db::increment_transfer_count(&self.conn, token, timestamp)?)
  }

  fn track_token(&self, token: &str, creator: &str, block: u64) -> Result<(), FetchError> {
    let tracked = models::TrackedToken {
      token_address: token.to_string(),
      creator_address: creator.to_string(),
      first_seen_block: block as i64,
    };
    Ok(db::track_token(&self.conn, tracked)?)
  }

  fn tracked_tokens(&self) -> Result<Vec<String>, FetchError> {
    Ok(db::tracked_tokens(&self.conn)?)
  }

  fn seed_tracked_tokens(&self) -> Result<usize, FetchError> {
    Ok(db::seed_tracked_tokens(&self.conn)?)
  }

  fn balance(&self, scope: BalanceScope, holder: &str) -> Result<Option<BigUint>, FetchError> {
    let raw = match scope {
      BalanceScope::Base { token } => db::get_balance(&self.conn, token, holder)?,
      BalanceScope::Rollup { chain_id, token } => db::get_rollup_balance(&self.conn, chain_id as i64, token, holder)?,
    };
    raw.map(|r| parse_balance(&r)).transpose()
  }

  fn put_balance(&self, scope: BalanceScope, holder: &str, balance: &BigUint, timestamp: i64) -> Result<(), FetchError> {
    match scope {
      BalanceScope::Base { token } => db::upsert_balance(&self.conn, models::NewHolder {
        holder_address: holder,
        token_address: token,
        balance: balance.to_string(),
        updated_at: timestamp,
      })?,
      BalanceScope::Rollup { chain_id, token } => db::upsert_rollup_balance(&self.conn, models::NewRollupHolder {
        chain_id: chain_id as i64,
        l2_token: token,
        holder_address: holder,
        balance: balance.to_string(),
        updated_at: timestamp,
      })?,
    };
    Ok(())
  }

  fn delete_balance(&self, scope: BalanceScope, holder: &str) -> Result<(), FetchError> {
    match scope {
      BalanceScope::Base { token } => db::delete_balance(&self.conn, token, holder)?,
      BalanceScope::Rollup { chain_id, token } => db::delete_rollup_balance(&self.conn, chain_id as i64, token, holder)?,
    };
    Ok(())
  }

  fn mark_processed(&self, chain: Chain, block: u64, timestamp: i64) -> Result<(), FetchError> {
    match chain {
      Chain::Base => db::mark_block_processed(&self.conn, models::NewProcessedBlock {
        block_number: block as i64,
        processed_at: timestamp,
      })?,
      Chain::Rollup(chain_id) => db::mark_rollup_block_processed(&self.conn, models::NewRollupProcessedBlock {
        chain_id: chain_id as i64,
        block_number: block as i64,
        processed_at: timestamp,
      })?,
    };
    Ok(())
  }

  fn last_processed(&self, chain: Chain) -> Result<Option<u64>, FetchError> {
    let last = match chain {
      Chain::Base => db::last_processed_block(&self.conn)?,
      Chain::Rollup(chain_id) => db::last_rollup_block(&self.conn, chain_id as i64)?,
    };
    Ok(last.map(|b| b as u64))
  }

  fn is_processed(&self, chain: Chain, block: u64) -> Result<bool, FetchError> {
    let processed = match chain {
      Chain::Base => db::block_processed(&self.conn, block as i64)?,
      Chain::Rollup(chain_id) => db::rollup_block_processed(&self.conn, chain_id as i64, block as i64)?,
    };
    Ok(processed)
  }

  fn upsert_deployment(&self, deployment: &models::Deployment) -> Result<(), FetchError> {
    Ok(db::upsert_deployment(&self.conn, deployment)?)
  }

  fn rollup_tokens(&self, chain_id: u64) -> Result<Vec<String>, FetchError> {
    Ok(db::rollup_tokens(&self.conn, chain_id as i64)?)
  }

  fn record_rollup_transfer(&self, transfer: &models::RollupTransfer) -> Result<(), FetchError> {
    Ok(db::record_rollup_transfer(&self.conn, transfer)?)
  }

  fn upsert_pair(&self, pair: &models::Pair) -> Result<(), FetchError> {
    Ok(db::upsert_pair(&self.conn, pair)?)
  }
}

#[cfg(test)]
pub mod memory {
  use std::cell::RefCell;
  use std::collections::BTreeMap;

  use num_bigint::BigUint;

  use super::{parse_balance, BalanceScope, Chain, Ledger};
  use crate::abi::CreationEvent;
  use crate::models;
  use crate::utils::FetchError;

  #[derive(Clone, Default, Debug)]
  pub struct State {
    pub creations: BTreeMap<String, models::Creation>,
    pub tracked: BTreeMap<String, models::TrackedToken>,
    // (token, holder) -> balance
    pub holders: BTreeMap<(String, String), String>,
    // (chain id, token, holder) -> balance
    pub rollup_holders: BTreeMap<(u64, String, String), String>,
    pub processed: BTreeMap<Chain, BTreeMap<u64, i64>>,
    pub deployments: BTreeMap<(String, i64), models::Deployment>,
    pub rollup_transfers: BTreeMap<(i64, String, String, String), models::RollupTransfer>,
    pub pairs: BTreeMap<String, models::Pair>,
  }

  /// Ledger over plain maps. A failed transaction restores the state it started from.
  #[derive(Default)]
  pub struct MemoryLedger {
    pub state: RefCell<State>,
  }

  impl MemoryLedger {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn balance_of(&self, token: &str, holder: &str) -> Option<String> {
      self.state.borrow().holders.get(&(token.to_string(), holder.to_string())).cloned()
    }

    pub fn rollup_balance_of(&self, chain_id: u64, token: &str, holder: &str) -> Option<String> {
      self.state.borrow().rollup_holders.get(&(chain_id, token.to_string(), holder.to_string())).cloned()
    }

    pub fn watermarks(&self, chain: Chain) -> Vec<u64> {
      self.state.borrow().processed.get(&chain)
        .map(|blocks| blocks.keys().cloned().collect())
        .unwrap_or_default()
    }

    pub fn snapshot(&self) -> State {
      self.state.borrow().clone()
    }
  }

  impl Ledger for MemoryLedger {
    fn transaction<T, F>(&self, f: F) -> Result<T, FetchError>
    where
      F: FnOnce() -> Result<T, FetchError>,
    {
      let before = self.snapshot();
      let result = f();
      if result.is_err() {
        *self.state.borrow_mut() = before;
      }
      result
    }

    fn upsert_creation(&self, creation: &CreationEvent, timestamp: i64) -> Result<(), FetchError> {
      let mut state = self.state.borrow_mut();
      let record = state.creations.entry(creation.creator.clone()).or_insert_with(|| models::Creation {
        creator_address: creation.creator.clone(),
        created_token: creation.token.clone(),
        stream_id: creation.stream_id,
        referral: None,
        created_at: timestamp,
        updated_at: timestamp,
        total_transfers: 0,
      });
      record.created_token = creation.token.clone();
      record.stream_id = creation.stream_id;
      record.referral = creation.referral.clone();
      record.updated_at = timestamp;
      Ok(())
    }

    fn get_creation(&self, creator: &str) -> Result<Option<models::Creation>, FetchError> {
      Ok(self.state.borrow().creations.get(creator).cloned())
    }

    fn increment_transfer_count(&self, token: &str, timestamp: i64) -> Result<usize, FetchError> {
      let mut updated = 0;
      for record in self.state.borrow_mut().creations.values_mut() {
        if record.created_token == token {
          record.total_transfers += 1;
          record.updated_at = timestamp;
          updated += 1;
        }
      }
      Ok(updated)
    }

    fn track_token(&self, token: &str, creator: &str, block: u64) -> Result<(), FetchError> {
      self.state.borrow_mut().tracked.entry(token.to_string()).or_insert_with(|| models::TrackedToken {
        token_address: token.to_string(),
        creator_address: creator.to_string(),
        first_seen_block: block as i64,
      });
      Ok(())
    }

    fn tracked_tokens(&self) -> Result<Vec<String>, FetchError> {
      Ok(self.state.borrow().tracked.keys().cloned().collect())
    }

    fn seed_tracked_tokens(&self) -> Result<usize, FetchError> {
      let mut state = self.state.borrow_mut();
      let creations: Vec<(String, String)> = state.creations.values()
        .map(|c| (c.created_token.clone(), c.creator_address.clone()))
        .collect();
      let mut inserted = 0;
      for (token, creator) in creations {
        if !state.tracked.contains_key(&token) {
          state.tracked.insert(token.clone(), models::TrackedToken {
            token_address: token,
            creator_address: creator,
            first_seen_block: 0,
          });
          inserted += 1;
        }
      }
      Ok(inserted)
    }

    fn balance(&self, scope: BalanceScope, holder: &str) -> Result<Option<BigUint>, FetchError> {
      let raw = match scope {
        BalanceScope::Base { token } => self.balance_of(token, holder),
        BalanceScope::Rollup { chain_id, token } => self.rollup_balance_of(chain_id, token, holder),
      };
      raw.map(|r| parse_balance(&r)).transpose()
    }

    fn put_balance(&self, scope: BalanceScope, holder: &str, balance: &BigUint, _timestamp: i64) -> Result<(), FetchError> {
      let mut state = self.state.borrow_mut();
      match scope {
        BalanceScope::Base { token } => {
          state.holders.insert((token.to_string(), holder.to_string()), balance.to_string());
        },
        BalanceScope::Rollup { chain_id, token } => {
          state.rollup_holders.insert((chain_id, token.to_string(), holder.to_string()), balance.to_string());
        },
      }
      Ok(())
    }

    fn delete_balance(&self, scope: BalanceScope, holder: &str) -> Result<(), FetchError> {
      let mut state = self.state.borrow_mut();
      match scope {
        BalanceScope::Base { token } => {
          state.holders.remove(&(token.to_string(), holder.to_string()));
        },
        BalanceScope::Rollup { chain_id, token } => {
          state.rollup_holders.remove(&(chain_id, token.to_string(), holder.to_string()));
        },
      }
      Ok(())
    }

    fn mark_processed(&self, chain: Chain, block: u64, timestamp: i64) -> Result<(), FetchError> {
      self.state.borrow_mut().processed.entry(chain).or_default().insert(block, timestamp);
      Ok(())
    }

    fn last_processed(&self, chain: Chain) -> Result<Option<u64>, FetchError> {
      Ok(self.state.borrow().processed.get(&chain).and_then(|blocks| blocks.keys().next_back().cloned()))
    }

    fn is_processed(&self, chain: Chain, block: u64) -> Result<bool, FetchError> {
      Ok(self.state.borrow().processed.get(&chain).map(|blocks| blocks.contains_key(&block)).unwrap_or(false))
    }

    fn upsert_deployment(&self, deployment: &models::Deployment) -> Result<(), FetchError> {
      let key = (deployment.l1_token.clone(), deployment.chain_id);
      self.state.borrow_mut().deployments.insert(key, deployment.clone());
      Ok(())
    }

    fn rollup_tokens(&self, chain_id: u64) -> Result<Vec<String>, FetchError> {
      let mut tokens: Vec<String> = self.state.borrow().deployments.values()
        .filter(|d| d.chain_id == chain_id as i64)
        .map(|d| d.l2_token.clone())
        .collect();
      tokens.sort();
      tokens.dedup();
      Ok(tokens)
    }

    fn record_rollup_transfer(&self, transfer: &models::RollupTransfer) -> Result<(), FetchError> {
      let key = (
        transfer.chain_id,
        transfer.tx_hash.clone(),
        transfer.from_address.clone(),
        transfer.to_address.clone(),
      );
      self.state.borrow_mut().rollup_transfers.insert(key, transfer.clone());
      Ok(())
    }

    fn upsert_pair(&self, pair: &models::Pair) -> Result<(), FetchError> {
      self.state.borrow_mut().pairs.insert(pair.pair_address.clone(), pair.clone());
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::memory::MemoryLedger;
  use super::*;

  const CREATOR: &str = "0x1111111111111111111111111111111111111111";
  const TOKEN: &str = "0x2222222222222222222222222222222222222222";

  fn creation(stream_id: u32, referral: Option<&str>) -> CreationEvent {
    CreationEvent {
      creator: CREATOR.to_string(),
      token: TOKEN.to_string(),
      stream_id: stream_id as i64,
      referral: referral.map(|r| r.to_string()),
      block_number: 100,
    }
  }

  #[test]
  fn creation_upsert_keeps_counters() {
    let ledger = MemoryLedger::new();
    ledger.upsert_creation(&creation(7, None), 1_000).unwrap();
    ledger.increment_transfer_count(TOKEN, 1_001).unwrap();
    ledger.upsert_creation(&creation(8, Some(TOKEN)), 2_000).unwrap();

    let record = ledger.get_creation(CREATOR).unwrap().unwrap();
    assert_eq!(record.stream_id, 8);
    assert_eq!(record.created_at, 1_000);
    assert_eq!(record.updated_at, 2_000);
    assert_eq!(record.total_transfers, 1);
    assert_eq!(record.referral.as_deref(), Some(TOKEN));
  }

  #[test]
  fn failed_transactions_roll_back() {
    let ledger = MemoryLedger::new();
    let result: Result<(), FetchError> = ledger.transaction(|| {
      ledger.put_balance(BalanceScope::Base { token: TOKEN }, CREATOR, &BigUint::from(5u32), 0)?;
      ledger.mark_processed(Chain::Base, 10, 0)?;
      Err(FetchError::Timeout("eth_getLogs".into()))
    });
    assert!(result.is_err());
    assert_eq!(ledger.balance_of(TOKEN, CREATOR), None);
    assert_eq!(ledger.last_processed(Chain::Base).unwrap(), None);
  }

  #[test]
  fn watermarks_are_scoped_per_chain() {
    let ledger = MemoryLedger::new();
    ledger.mark_processed(Chain::Base, 12, 0).unwrap();
    ledger.mark_processed(Chain::Rollup(84532), 99, 0).unwrap();
    ledger.mark_processed(Chain::Rollup(84532), 40, 0).unwrap();

    assert_eq!(ledger.last_processed(Chain::Base).unwrap(), Some(12));
    assert_eq!(ledger.last_processed(Chain::Rollup(84532)).unwrap(), Some(99));
    assert_eq!(ledger.last_processed(Chain::Rollup(11155420)).unwrap(), None);
    assert!(ledger.is_processed(Chain::Rollup(84532), 40).unwrap());
    assert!(!ledger.is_processed(Chain::Base, 40).unwrap());
  }

  #[test]
  fn seeds_tracked_tokens_from_creations() {
    let ledger = MemoryLedger::new();
    ledger.upsert_creation(&creation(7, None), 1_000).unwrap();
    assert_eq!(ledger.seed_tracked_tokens().unwrap(), 1);
    assert_eq!(ledger.seed_tracked_tokens().unwrap(), 0);
    assert_eq!(ledger.tracked_tokens().unwrap(), vec![TOKEN.to_string()]);
  }

  #[test]
  fn rejects_corrupt_balances() {
    assert!(parse_balance("12a").is_err());
    assert_eq!(parse_balance("340282366920938463463374607431768211456").unwrap(), BigUint::from(1u32) << 128usize);
  }
}
