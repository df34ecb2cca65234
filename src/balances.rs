use num_bigint::BigUint;

use crate::abi::TransferEvent;
use crate::ledger::{BalanceScope, Ledger};
use crate::utils::{self, FetchError};

/// Applies one transfer to the holder table of `scope`.
///
/// The receiver is credited first. The sender is debited unless it is the mint
/// address; a sender without a row is left alone, and a debit that reaches zero
/// (or would go below it) removes the row.
pub fn apply_transfer<L: Ledger>(
  ledger: &L,
  scope: BalanceScope,
  transfer: &TransferEvent,
  timestamp: i64,
) -> Result<(), FetchError> {
  let received = match ledger.balance(scope, &transfer.to)? {
    Some(old) => old + &transfer.value,
    None => transfer.value.clone(),
  };
  if received > BigUint::from(0u32) {
    ledger.put_balance(scope, &transfer.to, &received, timestamp)?;
  }

  if utils::is_zero_address(&transfer.from) {
    return Ok(())
  }

  match ledger.balance(scope, &transfer.from)? {
    None => {
      trace!("no balance for sender {} of {}, skipping debit", transfer.from, scope.token());
      Ok(())
    },
    Some(old) if old > transfer.value => {
      ledger.put_balance(scope, &transfer.from, &(old - &transfer.value), timestamp)
    },
    Some(old) => {
      if old < transfer.value {
        debug!(
          "debit of {} exceeds balance {} for {} on {} (tx {}), removing holder",
          transfer.value, old, transfer.from, scope.token(), transfer.transaction_hash,
        );
      }
      ledger.delete_balance(scope, &transfer.from)
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ledger::memory::MemoryLedger;

  const TOKEN: &str = "0x2222222222222222222222222222222222222222";
  const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
  const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

  fn transfer(from: &str, to: &str, value: u64) -> TransferEvent {
    TransferEvent {
      token: TOKEN.to_string(),
      from: from.to_string(),
      to: to.to_string(),
      value: BigUint::from(value),
      block_number: 1,
      transaction_hash: "0x01".to_string(),
    }
  }

  fn base() -> BalanceScope<'static> {
    BalanceScope::Base { token: TOKEN }
  }

  #[test]
  fn mints_and_moves_balances() {
    let ledger = MemoryLedger::new();
    apply_transfer(&ledger, base(), &transfer(utils::ZERO_ADDRESS, ALICE, 1000), 0).unwrap();
    apply_transfer(&ledger, base(), &transfer(ALICE, BOB, 300), 0).unwrap();

    assert_eq!(ledger.balance_of(TOKEN, ALICE).as_deref(), Some("700"));
    assert_eq!(ledger.balance_of(TOKEN, BOB).as_deref(), Some("300"));
    assert_eq!(ledger.balance_of(TOKEN, utils::ZERO_ADDRESS), None);
  }

  #[test]
  fn removes_holders_that_reach_zero() {
    let ledger = MemoryLedger::new();
    apply_transfer(&ledger, base(), &transfer(utils::ZERO_ADDRESS, ALICE, 50), 0).unwrap();
    apply_transfer(&ledger, base(), &transfer(ALICE, BOB, 50), 0).unwrap();

    assert_eq!(ledger.balance_of(TOKEN, ALICE), None);
    assert_eq!(ledger.balance_of(TOKEN, BOB).as_deref(), Some("50"));
  }

  #[test]
  fn overdrawn_senders_are_removed_not_negative() {
    let ledger = MemoryLedger::new();
    apply_transfer(&ledger, base(), &transfer(utils::ZERO_ADDRESS, ALICE, 10), 0).unwrap();
    apply_transfer(&ledger, base(), &transfer(ALICE, BOB, 25), 0).unwrap();

    assert_eq!(ledger.balance_of(TOKEN, ALICE), None);
    assert_eq!(ledger.balance_of(TOKEN, BOB).as_deref(), Some("25"));
  }

  #[test]
  fn unknown_senders_are_not_debited() {
    let ledger = MemoryLedger::new();
    apply_transfer(&ledger, base(), &transfer(ALICE, BOB, 25), 0).unwrap();

    assert_eq!(ledger.balance_of(TOKEN, ALICE), None);
    assert_eq!(ledger.balance_of(TOKEN, BOB).as_deref(), Some("25"));
  }

  #[test]
  fn rollup_scope_is_separate() {
    let ledger = MemoryLedger::new();
    let scope = BalanceScope::Rollup { chain_id: 84532, token: TOKEN };
    apply_transfer(&ledger, scope, &transfer(utils::ZERO_ADDRESS, ALICE, 9), 0).unwrap();

    assert_eq!(ledger.rollup_balance_of(84532, TOKEN, ALICE).as_deref(), Some("9"));
    assert_eq!(ledger.balance_of(TOKEN, ALICE), None);
  }
}
