//! Base chain indexing: creation events and transfers of every tracked token,
//! one block at a time.

use std::cmp::{max, min};
use std::collections::BTreeSet;

use num_bigint::BigUint;

use crate::abi::{self, CreationEvent, TransferEvent};
use crate::balances;
use crate::constants::{l1, timeouts, Event};
use crate::ledger::{BalanceScope, Chain, Ledger};
use crate::rpc::{self, ChainClient, LogFilter};
use crate::utils::FetchError;

#[derive(Debug, PartialEq)]
pub enum BlockOutcome {
  /// The block already carries a watermark.
  Skipped,
  Processed { creations: usize, transfers: usize },
}

#[derive(Debug)]
pub enum Progress {
  /// A full batch went through and the head is still ahead.
  Advanced { next: u64 },
  CaughtUp { next: u64 },
  Failed { retry_from: Option<u64>, error: FetchError },
}

pub struct L1Processor<C: ChainClient> {
  client: C,
  protocol_address: String,
  reward_token: Option<String>,
  start_block: u64,
  tracked: BTreeSet<String>,
}

impl<C: ChainClient> L1Processor<C> {
  pub fn new(client: C, protocol_address: &str, reward_token: Option<&str>, start_block: u64) -> Self {
    Self {
      client,
      protocol_address: protocol_address.to_lowercase(),
      reward_token: reward_token.map(|t| t.to_lowercase()),
      start_block,
      tracked: BTreeSet::new(),
    }
  }

  pub fn tracked(&self) -> &BTreeSet<String> {
    &self.tracked
  }

  /// Loads the durable tracked set, backfilling it from creation records first.
  pub fn load_tracked<L: Ledger>(&mut self, ledger: &L) -> Result<usize, FetchError> {
    let seeded = ledger.seed_tracked_tokens()?;
    if seeded > 0 {
      info!("Backfilled {} tracked tokens from creations.", seeded);
    }
    self.tracked = ledger.tracked_tokens()?.into_iter().collect();
    Ok(self.tracked.len())
  }

  /// First block to index: one past the watermark, never before the start block.
  pub fn resume_from<L: Ledger>(&self, ledger: &L) -> Result<u64, FetchError> {
    let next = match ledger.last_processed(Chain::Base)? {
      Some(last) => max(last + 1, self.start_block),
      None => self.start_block,
    };
    Ok(next)
  }

  /// Indexes up to one batch of blocks starting at `cursor` (or the resume point).
  pub fn catch_up<L: Ledger>(&mut self, ledger: &L, cursor: Option<u64>) -> Progress {
    let next = match cursor {
      Some(next) => next,
      None => match self.resume_from(ledger) {
        Ok(next) => next,
        Err(error) => return Progress::Failed { retry_from: None, error },
      },
    };

    let head = match self.client.block_number(timeouts::HEAD) {
      Ok(head) => head,
      Err(error) => return Progress::Failed { retry_from: Some(next), error },
    };
    if next > head {
      trace!("L1 at head {}", head);
      return Progress::CaughtUp { next }
    }

    let last = min(head, next + l1::BATCH_SIZE - 1);
    debug!("L1 sync {}-{} (head {})", next, last, head);
    let mut processed = 0;
    for number in next..=last {
      match self.process_block(ledger, number) {
        Ok(BlockOutcome::Skipped) => trace!("L1 block {} already processed", number),
        Ok(BlockOutcome::Processed { creations, transfers }) => {
          processed += 1;
          if creations > 0 || transfers > 0 {
            debug!("L1 block {}: {} creations, {} transfers", number, creations, transfers);
          }
        },
        Err(error) => return Progress::Failed { retry_from: Some(number), error },
      }
    }
    info!("L1 indexed blocks {}-{} ({} new, head {}).", next, last, processed, head);

    if last >= head {
      Progress::CaughtUp { next: last + 1 }
    } else {
      Progress::Advanced { next: last + 1 }
    }
  }

  /// Extracts and applies every event of block `number`. All chain reads happen
  /// before the first write, and the writes land together with the watermark.
  pub fn process_block<L: Ledger>(&mut self, ledger: &L, number: u64) -> Result<BlockOutcome, FetchError> {
    if ledger.is_processed(Chain::Base, number)? {
      return Ok(BlockOutcome::Skipped)
    }

    let block = self.client.get_block(number, timeouts::BLOCK)?
      .ok_or_else(|| FetchError::MissingData(format!("block {} not available", number)))?;
    let timestamp = block.timestamp as i64;

    let creations = self.fetch_creations(number)?;

    let mut tokens = self.tracked.clone();
    tokens.extend(creations.iter().map(|c| c.token.clone()));
    if let Some(reward) = &self.reward_token {
      tokens.insert(reward.clone());
    }
    let transfers = self.fetch_transfers(&tokens, number)?;

    let reward_token = self.reward_token.as_ref();
    ledger.transaction(|| {
      for creation in &creations {
        ledger.upsert_creation(creation, timestamp)?;
        ledger.track_token(&creation.token, &creation.creator, number)?;
      }
      for transfer in &transfers {
        balances::apply_transfer(ledger, BalanceScope::Base { token: &transfer.token }, transfer, timestamp)?;
        if reward_token != Some(&transfer.token) {
          ledger.increment_transfer_count(&transfer.token, timestamp)?;
        }
      }
      ledger.mark_processed(Chain::Base, number, timestamp)
    })?;

    for creation in &creations {
      if self.tracked.insert(creation.token.clone()) {
        info!("Tracking new token {} created by {} at block {}.", creation.token, creation.creator, number);
      }
    }

    Ok(BlockOutcome::Processed { creations: creations.len(), transfers: transfers.len() })
  }

  fn fetch_creations(&self, number: u64) -> Result<Vec<CreationEvent>, FetchError> {
    let filter = LogFilter::new(vec![self.protocol_address.clone()], abi::event_topic(Event::Blesed), number, number);
    let mut logs = self.client.get_logs(&filter, timeouts::L1_LOGS)?;
    rpc::sort_logs(&mut logs);

    let mut creations = vec![];
    for log in logs {
      match abi::decode_creation(&log) {
        Ok(creation) => creations.push(creation),
        Err(e) => warn!("Skipping creation event in block {} ({:?}): {}", number, log.transaction_hash, e),
      }
    }
    Ok(creations)
  }

  fn fetch_transfers(&self, tokens: &BTreeSet<String>, number: u64) -> Result<Vec<TransferEvent>, FetchError> {
    let tokens: Vec<String> = tokens.iter().cloned().collect();
    let topic = abi::event_topic(Event::Transfer);

    let mut logs = vec![];
    for chunk in tokens.chunks(l1::ADDRESS_CHUNK) {
      let filter = LogFilter::new(chunk.to_vec(), topic.clone(), number, number);
      logs.extend(self.client.get_logs(&filter, timeouts::L1_LOGS)?);
    }
    rpc::sort_logs(&mut logs);

    let mut transfers = vec![];
    for log in logs {
      match abi::decode_transfer(&log) {
        Ok(transfer) if transfer.value == BigUint::from(0u32) => {
          trace!("Ignoring zero value transfer of {} in {}", transfer.token, transfer.transaction_hash);
        },
        Ok(transfer) => transfers.push(transfer),
        Err(e) => warn!("Skipping transfer of {} in block {}: {}", log.address, number, e),
      }
    }
    Ok(transfers)
  }

  /// Logs what the indexer would extract from block `number` without writing anything.
  pub fn check_block(&self, number: u64) -> Result<usize, FetchError> {
    let block = self.client.get_block(number, timeouts::BLOCK)?
      .ok_or_else(|| FetchError::MissingData(format!("block {} not available", number)))?;
    info!("Block {} hash {} timestamp {} with {} transactions.", block.number, block.hash, block.timestamp, block.transactions.len());

    let creations = self.fetch_creations(number)?;
    for creation in &creations {
      info!(
        "  creation: creator {} token {} stream {} referral {:?}",
        creation.creator, creation.token, creation.stream_id, creation.referral,
      );
    }
    if creations.is_empty() {
      info!("  no creation events at {}", self.protocol_address);
    }
    Ok(creations.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ledger::memory::MemoryLedger;
  use crate::rpc::mock::{creation_log, transfer_log, MockChain};
  use crate::utils::ZERO_ADDRESS;

  const ALTAR: &str = "0x648a383965e25dee13ff93fdd86535038ee0ba96";
  const TORCH: &str = "0x05208b8beec0a684c16412fa5b65134a5aba09bd";
  const CREATOR: &str = "0x1111111111111111111111111111111111111111";
  const TOKEN: &str = "0x2222222222222222222222222222222222222222";
  const DAVE: &str = "0xdddddddddddddddddddddddddddddddddddddddd";
  const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
  const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
  const CAROL: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

  fn chain(head: u64) -> MockChain {
    let chain = MockChain::new(11155111, head);
    for number in 90..=head {
      chain.add_block(number, 1_700_000_000 + number);
    }
    chain
  }

  fn processor(chain: MockChain) -> L1Processor<MockChain> {
    L1Processor::new(chain, ALTAR, Some(TORCH), 100)
  }

  fn end_to_end_chain() -> MockChain {
    let chain = chain(102);
    chain.add_log(creation_log(ALTAR, CREATOR, TOKEN, 7, ZERO_ADDRESS, 100, 0));
    chain.add_log(transfer_log(TOKEN, ZERO_ADDRESS, CREATOR, 1000, 101, 0, 0));
    chain.add_log(transfer_log(TOKEN, CREATOR, DAVE, 300, 102, 0, 0));
    chain
  }

  #[test]
  fn indexes_creation_and_transfers_end_to_end() {
    let ledger = MemoryLedger::new();
    let mut processor = processor(end_to_end_chain());
    for number in 100..=102 {
      processor.process_block(&ledger, number).unwrap();
    }

    assert_eq!(ledger.balance_of(TOKEN, CREATOR).as_deref(), Some("700"));
    assert_eq!(ledger.balance_of(TOKEN, DAVE).as_deref(), Some("300"));
    let record = ledger.get_creation(CREATOR).unwrap().unwrap();
    assert_eq!(record.created_token, TOKEN);
    assert_eq!(record.stream_id, 7);
    assert_eq!(record.total_transfers, 2);
    assert_eq!(ledger.last_processed(Chain::Base).unwrap(), Some(102));
    assert!(processor.tracked().contains(TOKEN));
  }

  #[test]
  fn reprocessing_a_block_changes_nothing() {
    let ledger = MemoryLedger::new();
    let mut processor = processor(end_to_end_chain());
    for number in 100..=101 {
      processor.process_block(&ledger, number).unwrap();
    }
    let before = ledger.snapshot();

    assert_eq!(processor.process_block(&ledger, 101).unwrap(), BlockOutcome::Skipped);
    let after = ledger.snapshot();
    assert_eq!(before.holders, after.holders);
    assert_eq!(before.creations, after.creations);
  }

  #[test]
  fn applies_transfers_in_chain_order() {
    let chain = chain(200);
    chain.add_log(creation_log(ALTAR, CREATOR, TOKEN, 1, ZERO_ADDRESS, 100, 0));
    chain.add_log(transfer_log(TOKEN, ZERO_ADDRESS, ALICE, 100, 199, 0, 0));
    chain.add_log(transfer_log(TOKEN, ALICE, BOB, 100, 200, 0, 1));
    chain.add_log(transfer_log(TOKEN, BOB, CAROL, 100, 200, 1, 0));

    let ledger = MemoryLedger::new();
    let mut processor = processor(chain);
    for number in &[100, 199, 200] {
      processor.process_block(&ledger, *number).unwrap();
    }

    assert_eq!(ledger.balance_of(TOKEN, ALICE), None);
    assert_eq!(ledger.balance_of(TOKEN, BOB), None);
    assert_eq!(ledger.balance_of(TOKEN, CAROL).as_deref(), Some("100"));
  }

  #[test]
  fn failed_block_leaves_no_watermark_and_retries_cleanly() {
    let ledger = MemoryLedger::new();
    let mut processor = processor(end_to_end_chain());
    processor.process_block(&ledger, 100).unwrap();

    processor.client.fail_logs_for(TOKEN);
    assert!(processor.process_block(&ledger, 101).is_err());
    assert_eq!(ledger.last_processed(Chain::Base).unwrap(), Some(100));
    assert_eq!(ledger.balance_of(TOKEN, CREATOR), None);

    processor.client.clear_failures();
    processor.process_block(&ledger, 101).unwrap();
    assert_eq!(ledger.balance_of(TOKEN, CREATOR).as_deref(), Some("1000"));
    assert_eq!(ledger.get_creation(CREATOR).unwrap().unwrap().total_transfers, 1);
  }

  #[test]
  fn missing_block_is_an_error() {
    let ledger = MemoryLedger::new();
    let mut processor = processor(chain(102));
    assert!(processor.process_block(&ledger, 500).is_err());
    assert!(!ledger.is_processed(Chain::Base, 500).unwrap());
  }

  #[test]
  fn reward_token_transfers_do_not_count() {
    let chain = end_to_end_chain();
    chain.add_log(transfer_log(TORCH, ZERO_ADDRESS, DAVE, 5, 101, 1, 0));
    let ledger = MemoryLedger::new();
    let mut processor = processor(chain);
    for number in 100..=101 {
      processor.process_block(&ledger, number).unwrap();
    }

    assert_eq!(ledger.balance_of(TORCH, DAVE).as_deref(), Some("5"));
    assert_eq!(ledger.get_creation(CREATOR).unwrap().unwrap().total_transfers, 1);
  }

  #[test]
  fn skips_malformed_creations() {
    let chain = chain(100);
    chain.add_log(creation_log(ALTAR, CREATOR, TOKEN, 0, ZERO_ADDRESS, 100, 0));
    let ledger = MemoryLedger::new();
    let mut processor = processor(chain);

    let outcome = processor.process_block(&ledger, 100).unwrap();
    assert_eq!(outcome, BlockOutcome::Processed { creations: 0, transfers: 0 });
    assert_eq!(ledger.get_creation(CREATOR).unwrap(), None);
    assert!(ledger.is_processed(Chain::Base, 100).unwrap());
  }

  #[test]
  fn oversized_stream_id_does_not_stall_catch_up() {
    let chain = chain(101);
    chain.add_log(creation_log(ALTAR, CREATOR, TOKEN, u64::MAX, ZERO_ADDRESS, 100, 0));
    chain.add_log(creation_log(ALTAR, DAVE, TOKEN, 9, ZERO_ADDRESS, 100, 1));
    let ledger = MemoryLedger::new();
    let mut processor = processor(chain);

    match processor.catch_up(&ledger, None) {
      Progress::CaughtUp { next } => assert_eq!(next, 102),
      other => panic!("unexpected progress {:?}", other),
    }
    assert_eq!(ledger.watermarks(Chain::Base), vec![100, 101]);
    assert_eq!(ledger.get_creation(CREATOR).unwrap(), None);
    assert_eq!(ledger.get_creation(DAVE).unwrap().unwrap().stream_id, 9);
  }

  #[test]
  fn ignores_zero_value_transfers() {
    let chain = end_to_end_chain();
    chain.add_log(transfer_log(TOKEN, ZERO_ADDRESS, ALICE, 0, 101, 2, 0));
    let ledger = MemoryLedger::new();
    let mut processor = processor(chain);
    for number in 100..=101 {
      processor.process_block(&ledger, number).unwrap();
    }

    assert_eq!(ledger.balance_of(TOKEN, ALICE), None);
    assert_eq!(ledger.get_creation(CREATOR).unwrap().unwrap().total_transfers, 1);
  }

  #[test]
  fn catches_up_from_the_start_block() {
    let ledger = MemoryLedger::new();
    let mut processor = processor(end_to_end_chain());

    match processor.catch_up(&ledger, None) {
      Progress::CaughtUp { next } => assert_eq!(next, 103),
      other => panic!("unexpected progress {:?}", other),
    }
    assert_eq!(ledger.watermarks(Chain::Base), vec![100, 101, 102]);
    assert_eq!(ledger.balance_of(TOKEN, DAVE).as_deref(), Some("300"));

    match processor.catch_up(&ledger, Some(103)) {
      Progress::CaughtUp { next } => assert_eq!(next, 103),
      other => panic!("unexpected progress {:?}", other),
    }
  }

  #[test]
  fn catch_up_reports_the_failing_block() {
    let ledger = MemoryLedger::new();
    let mut processor = processor(end_to_end_chain());
    processor.process_block(&ledger, 100).unwrap();
    processor.client.fail_logs_for(TOKEN);

    match processor.catch_up(&ledger, None) {
      Progress::Failed { retry_from, .. } => assert_eq!(retry_from, Some(101)),
      other => panic!("unexpected progress {:?}", other),
    }
    assert_eq!(ledger.last_processed(Chain::Base).unwrap(), Some(100));
  }

  #[test]
  fn resumes_after_the_watermark() {
    let ledger = MemoryLedger::new();
    let processor = processor(chain(100));
    assert_eq!(processor.resume_from(&ledger).unwrap(), 100);

    ledger.mark_processed(Chain::Base, 150, 0).unwrap();
    assert_eq!(processor.resume_from(&ledger).unwrap(), 151);
  }

  #[test]
  fn reloads_tracked_tokens_after_restart() {
    let ledger = MemoryLedger::new();
    let mut first = processor(end_to_end_chain());
    first.process_block(&ledger, 100).unwrap();

    let mut restarted = processor(end_to_end_chain());
    assert_eq!(restarted.load_tracked(&ledger).unwrap(), 1);
    restarted.process_block(&ledger, 101).unwrap();
    assert_eq!(ledger.balance_of(TOKEN, CREATOR).as_deref(), Some("1000"));
  }

  #[test]
  fn checks_blocks_without_writing() {
    let processor = processor(end_to_end_chain());
    assert_eq!(processor.check_block(100).unwrap(), 1);
    assert_eq!(processor.check_block(101).unwrap(), 0);
  }
}
