//! Rollup chain tracking.
//!
//! Each pass scans a bounded window of a rollup chain in fixed-size sub-batches.
//! A sub-batch first discovers bridged tokens deployed through the deterministic
//! deployment factory, then replays the transfers of every known rollup token,
//! and finally commits deployments, transfers, balances and the sub-batch
//! watermark together. Balances only move in chain order: once a sub-batch
//! fails, the rest of the pass only discovers deployments, and the next pass
//! resumes transfer sync at the failed sub-batch.

use std::cmp::min;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use num_bigint::BigUint;

use crate::abi::{self, ContractCreationEvent, TransferEvent};
use crate::balances;
use crate::constants::{l1, rollup, timeouts, Event, ViewFunction};
use crate::ledger::{BalanceScope, Chain, Ledger};
use crate::models;
use crate::rpc::{self, ChainClient, LogFilter};
use crate::utils::{self, FetchError};

/// Outcome of asking a contract for its base-chain token.
#[derive(Debug)]
pub enum ProbeResult {
  Supported(String),
  NotSupported,
  Transient(FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
  pub start: u64,
  pub end: u64,
}

impl Window {
  /// Blocks to scan this pass, or `None` when there is nothing new.
  pub fn next(last_processed: Option<u64>, latest: u64) -> Option<Window> {
    let start = match last_processed {
      Some(last) => last + 1,
      None => latest.saturating_sub(rollup::MAX_BACKTRACK_BLOCKS),
    };
    if start >= latest {
      return None
    }
    let end = min(start + rollup::MAX_BLOCKS_PER_PASS, latest);
    Some(Window { start, end })
  }

  pub fn sub_batches(&self) -> Vec<(u64, u64)> {
    let mut batches = vec![];
    let mut from = self.start;
    while from <= self.end {
      let to = min(from + rollup::SUB_BATCH_BLOCKS - 1, self.end);
      batches.push((from, to));
      from = to + 1;
    }
    batches
  }
}

#[derive(Debug, Default, PartialEq)]
pub struct TrackSummary {
  pub window: Option<(u64, u64)>,
  pub deployments: usize,
  pub transfers: usize,
  /// Sub-batches that failed. The first one is where the next pass resumes.
  pub failed: Vec<(u64, u64)>,
}

struct SubBatch {
  deployments: Vec<models::Deployment>,
  // each transfer with its block timestamp
  transfers: Vec<(TransferEvent, i64)>,
}

pub struct RollupTracker<C: ChainClient> {
  client: C,
  factory: String,
  timestamps: HashMap<u64, i64>,
}

impl<C: ChainClient> RollupTracker<C> {
  pub fn new(client: C, factory: &str) -> Self {
    Self {
      client,
      factory: factory.to_lowercase(),
      timestamps: HashMap::new(),
    }
  }

  pub fn chain_id(&self) -> u64 {
    self.client.chain_id()
  }

  pub fn check_connectivity(&self) -> Result<u64, FetchError> {
    self.client.block_number(timeouts::CONNECTIVITY)
  }

  /// Calls `l1Token()` on `contract`. Reverts, empty return data and undecodable
  /// answers all mean the contract is not a bridged token.
  pub fn probe(&self, contract: &str) -> ProbeResult {
    let calldata = abi::selector(ViewFunction::L1Token).to_vec();
    match self.client.call(contract, &calldata, timeouts::PROBE) {
      Ok(data) => match abi::decode_address_return(&data) {
        Ok(address) if utils::is_zero_address(&address) => ProbeResult::NotSupported,
        Ok(address) => ProbeResult::Supported(address),
        Err(e) => {
          debug!("{} on chain {} has no l1Token: {}", contract, self.chain_id(), e);
          ProbeResult::NotSupported
        },
      },
      Err(e) if e.is_revert() => {
        debug!("{} on chain {} reverted on l1Token: {}", contract, self.chain_id(), e);
        ProbeResult::NotSupported
      },
      Err(e) if e.is_transient() => ProbeResult::Transient(e),
      Err(e) => {
        debug!("{} on chain {} rejected l1Token: {}", contract, self.chain_id(), e);
        ProbeResult::NotSupported
      },
    }
  }

  /// Runs one pass over the next window. After a failing sub-batch the
  /// watermark stays just below it, and later sub-batches only record
  /// deployments. No sub-batch is started after `deadline`.
  pub fn track<L: Ledger>(&mut self, ledger: &L, deadline: Instant) -> Result<TrackSummary, FetchError> {
    let chain_id = self.chain_id();
    let latest = self.client.block_number(timeouts::HEAD)?;
    let mut known: BTreeSet<String> = ledger.rollup_tokens(chain_id)?.into_iter().collect();
    let mut summary = TrackSummary::default();
    self.timestamps.clear();

    let last = ledger.last_processed(Chain::Rollup(chain_id))?;
    let window = match Window::next(last, latest) {
      Some(window) => window,
      None => {
        debug!("Chain {} up to date at {}", chain_id, latest);
        return Ok(summary)
      },
    };
    debug!("Chain {} scanning {}-{} (latest {})", chain_id, window.start, window.end, latest);
    summary.window = Some((window.start, window.end));

    for (from, to) in window.sub_batches() {
      self.check_deadline(deadline, from)?;

      if !summary.failed.is_empty() {
        match self.discover_only(ledger, &mut known, from, to) {
          Ok(deployments) => summary.deployments += deployments,
          Err(e) => {
            warn!("Chain {} discovery in {}-{} failed: {}", chain_id, from, to, e);
            summary.failed.push((from, to));
          },
        }
        continue
      }

      match self.run_sub_batch(ledger, &mut known, from, to) {
        Ok((deployments, transfers)) => {
          summary.deployments += deployments;
          summary.transfers += transfers;
        },
        Err(e) => {
          warn!("Chain {} sub-batch {}-{} failed, transfers resume there next pass: {}", chain_id, from, to, e);
          if from > 0 {
            ledger.mark_processed(Chain::Rollup(chain_id), from - 1, utils::unix_now())?;
          }
          summary.failed.push((from, to));
        },
      }
    }

    Ok(summary)
  }

  fn check_deadline(&self, deadline: Instant, from: u64) -> Result<(), FetchError> {
    if Instant::now() >= deadline {
      return Err(FetchError::Timeout(format!("chain {} pass deadline reached before block {}", self.chain_id(), from)))
    }
    Ok(())
  }

  /// Fetches and commits one sub-batch, returning its deployment and transfer counts.
  fn run_sub_batch<L: Ledger>(
    &mut self,
    ledger: &L,
    known: &mut BTreeSet<String>,
    from: u64,
    to: u64,
  ) -> Result<(usize, usize), FetchError> {
    let batch = self.fetch_sub_batch(known, from, to)?;
    self.commit_sub_batch(ledger, &batch, to)?;
    self.remember(known, &batch.deployments);
    Ok((batch.deployments.len(), batch.transfers.len()))
  }

  /// Records the deployments of a sub-batch without touching transfers or the watermark.
  fn discover_only<L: Ledger>(
    &mut self,
    ledger: &L,
    known: &mut BTreeSet<String>,
    from: u64,
    to: u64,
  ) -> Result<usize, FetchError> {
    let deployments = self.discover(from, to)?;
    ledger.transaction(|| {
      for deployment in &deployments {
        ledger.upsert_deployment(deployment)?;
      }
      Ok(())
    })?;
    self.remember(known, &deployments);
    Ok(deployments.len())
  }

  fn remember(&self, known: &mut BTreeSet<String>, deployments: &[models::Deployment]) {
    for deployment in deployments {
      if known.insert(deployment.l2_token.clone()) {
        info!(
          "Chain {}: {} is the rollup token of {} (deployer {}).",
          self.chain_id(), deployment.l2_token, deployment.l1_token, deployment.deployer,
        );
      }
    }
  }

  fn fetch_sub_batch(&mut self, known: &BTreeSet<String>, from: u64, to: u64) -> Result<SubBatch, FetchError> {
    let deployments = self.discover(from, to)?;

    let mut tokens = known.clone();
    tokens.extend(deployments.iter().map(|d| d.l2_token.clone()));
    let transfers = self.fetch_transfers(&tokens, from, to)?;

    Ok(SubBatch { deployments, transfers })
  }

  fn discover(&mut self, from: u64, to: u64) -> Result<Vec<models::Deployment>, FetchError> {
    let chain_id = self.chain_id();
    let filter = LogFilter::new(vec![self.factory.clone()], abi::event_topic(Event::ContractCreation), from, to);
    let mut logs = self.client.get_logs(&filter, timeouts::CREATION_LOGS)?;
    rpc::sort_logs(&mut logs);

    let mut deployments = vec![];
    for log in logs {
      let event = match abi::decode_contract_creation(&log) {
        Ok(event) => event,
        Err(e) => {
          warn!("Chain {}: skipping contract creation in {:?}: {}", chain_id, log.transaction_hash, e);
          continue
        },
      };
      match self.probe(&event.contract) {
        ProbeResult::Supported(l1_token) => {
          let deployer = self.deployer_of(&event);
          let created_at = self.block_timestamp(event.block_number);
          deployments.push(models::Deployment {
            l1_token,
            chain_id: chain_id as i64,
            l2_token: event.contract,
            deployer,
            salt: event.salt,
            created_at,
          });
        },
        ProbeResult::NotSupported => (),
        ProbeResult::Transient(e) => return Err(e),
      }
    }
    Ok(deployments)
  }

  fn deployer_of(&self, event: &ContractCreationEvent) -> String {
    let sender = self.client.get_transaction(&event.transaction_hash, timeouts::TRANSACTION)
      .and_then(|tx| match tx {
        Some(tx) => utils::normalize_address(&tx.from),
        None => Err(FetchError::MissingData(format!("transaction {} not found", event.transaction_hash))),
      });
    match sender {
      Ok(sender) => sender,
      Err(e) => {
        warn!("Chain {}: no deployer for {}: {}", self.chain_id(), event.contract, e);
        utils::ZERO_ADDRESS.to_string()
      },
    }
  }

  fn fetch_transfers(&mut self, tokens: &BTreeSet<String>, from: u64, to: u64) -> Result<Vec<(TransferEvent, i64)>, FetchError> {
    if tokens.is_empty() {
      return Ok(vec![])
    }
    let tokens: Vec<String> = tokens.iter().cloned().collect();
    let topic = abi::event_topic(Event::Transfer);

    let mut logs = vec![];
    for chunk in tokens.chunks(l1::ADDRESS_CHUNK) {
      let filter = LogFilter::new(chunk.to_vec(), topic.clone(), from, to);
      logs.extend(self.client.get_logs(&filter, timeouts::TRANSFER_LOGS)?);
    }
    rpc::sort_logs(&mut logs);

    let zero = BigUint::from(0u32);
    let mut transfers = vec![];
    for log in logs {
      match abi::decode_transfer(&log) {
        Ok(transfer) if transfer.value == zero => (),
        Ok(transfer) => {
          let timestamp = self.block_timestamp(transfer.block_number);
          transfers.push((transfer, timestamp))
        },
        Err(e) => warn!("Chain {}: skipping transfer of {}: {}", self.chain_id(), log.address, e),
      }
    }
    Ok(transfers)
  }

  /// Block timestamp, cached per pass. Falls back to the wall clock.
  fn block_timestamp(&mut self, number: u64) -> i64 {
    if let Some(timestamp) = self.timestamps.get(&number) {
      return *timestamp
    }
    let timestamp = match self.client.get_block(number, timeouts::BLOCK) {
      Ok(Some(block)) => block.timestamp as i64,
      Ok(None) => {
        warn!("Chain {}: block {} not found, using current time", self.chain_id(), number);
        utils::unix_now()
      },
      Err(e) => {
        warn!("Chain {}: block {} timestamp unavailable ({}), using current time", self.chain_id(), number, e);
        utils::unix_now()
      },
    };
    self.timestamps.insert(number, timestamp);
    timestamp
  }

  fn commit_sub_batch<L: Ledger>(&self, ledger: &L, batch: &SubBatch, to: u64) -> Result<(), FetchError> {
    let chain_id = self.chain_id();
    let now = utils::unix_now();
    ledger.transaction(|| {
      for deployment in &batch.deployments {
        ledger.upsert_deployment(deployment)?;
      }
      for (transfer, block_timestamp) in &batch.transfers {
        ledger.record_rollup_transfer(&models::RollupTransfer {
          chain_id: chain_id as i64,
          l2_token: transfer.token.clone(),
          from_address: transfer.from.clone(),
          to_address: transfer.to.clone(),
          amount: transfer.value.to_string(),
          tx_hash: transfer.transaction_hash.clone(),
          block_number: transfer.block_number as i64,
          block_timestamp: *block_timestamp,
          created_at: now,
        })?;
        let scope = BalanceScope::Rollup { chain_id, token: &transfer.token };
        balances::apply_transfer(ledger, scope, transfer, *block_timestamp)?;
      }
      ledger.mark_processed(Chain::Rollup(chain_id), to, now)
    })
  }
}

/// Tracks every rollup chain once. A chain that is unreachable or fails is
/// reported and the remaining chains still run.
pub fn track_rollups<C: ChainClient, L: Ledger>(
  trackers: &mut [RollupTracker<C>],
  ledger: &L,
  deadline: Instant,
) -> Vec<(u64, Result<TrackSummary, FetchError>)> {
  let mut results = vec![];
  for tracker in trackers.iter_mut() {
    let chain_id = tracker.chain_id();
    match tracker.check_connectivity() {
      Ok(head) => debug!("Chain {} reachable, head {}", chain_id, head),
      Err(e) => {
        warn!("Chain {} unreachable: {}", chain_id, e);
        results.push((chain_id, Err(e)));
        continue
      },
    }

    let result = tracker.track(ledger, deadline);
    match &result {
      Ok(summary) => {
        match summary.window {
          Some((start, end)) => info!(
            "Chain {} tracked {}-{}: {} deployments, {} transfers.",
            chain_id, start, end, summary.deployments, summary.transfers,
          ),
          None => trace!("Chain {} has no new blocks", chain_id),
        }
        if !summary.failed.is_empty() {
          warn!("Chain {} had {} failing sub-batches: {:?}", chain_id, summary.failed.len(), summary.failed);
        }
      },
      Err(e) => error!("Chain {} tracking failed: {}", chain_id, e),
    }
    results.push((chain_id, result));
  }
  results
}
