use actix::prelude::*;
use std::time::{Duration, Instant};

use crate::config::IndexerConfig;
use crate::constants::{l1, pairs, rollup};
use crate::l1::{L1Processor, Progress};
use crate::ledger::{DbPool, PgLedger};
use crate::pairs::PairPoller;
use crate::rollup::{track_rollups, RollupTracker};
use crate::rpc::EthClient;
use crate::utils::FetchError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
  CatchUp,
  Idle,
}

/// Next L1 job: which phase we are in, where to resume and how long to wait.
#[derive(Debug, PartialEq)]
pub struct Step {
  pub phase: Phase,
  pub cursor: Option<u64>,
  pub delay: Duration,
}

/// Maps a worker report to the next L1 step. Rollup reports do not move the cursor.
pub fn schedule(report: &Report) -> Option<Step> {
  match *report {
    Report::L1Advanced { next } => Some(Step {
      phase: Phase::CatchUp,
      cursor: Some(next),
      delay: Duration::from_secs(0),
    }),
    Report::L1CaughtUp { next } => Some(Step {
      phase: Phase::Idle,
      cursor: Some(next),
      delay: Duration::from_secs(l1::IDLE_WAIT_SECS),
    }),
    Report::L1Failed { retry_from } => Some(Step {
      phase: Phase::CatchUp,
      cursor: retry_from,
      delay: Duration::from_secs(l1::ERROR_BACKOFF_SECS),
    }),
    Report::RollupPassFinished { .. } => None,
  }
}

pub struct Coordinator {
  config: IndexerConfig,
  db_pool: DbPool,
  phase: Phase,
  l1_worker: Option<Addr<L1Worker>>,
  rollup_worker: Option<Addr<RollupWorker>>,
  rollup_in_flight: bool,
}

impl Coordinator {
  pub fn new(config: IndexerConfig, db_pool: DbPool) -> Self {
    Coordinator {
      config,
      db_pool,
      phase: Phase::CatchUp,
      l1_worker: None,
      rollup_worker: None,
      rollup_in_flight: false,
    }
  }

  /// Starts a rollup pass unless the previous one is still running.
  fn dispatch_rollup_pass(&mut self) {
    if self.rollup_in_flight {
      debug!("Rollup pass still running, skipping this tick.");
      return
    }
    if let Some(worker) = &self.rollup_worker {
      self.rollup_in_flight = true;
      let deadline = Instant::now() + Duration::from_secs(rollup::PASS_TIMEOUT_SECS);
      worker.do_send(TrackRollups { deadline });
    }
  }

  fn dispatch_pairs_refresh(&self) {
    if let Some(worker) = &self.l1_worker {
      worker.do_send(Fetch::refresh_pairs());
    }
  }
}

impl Actor for Coordinator {
  type Context = Context<Self>;

  fn started(&mut self, ctx: &mut Self::Context) {
    info!("Coordinator started up.");
    let config = self.config.clone();
    let db_pool = self.db_pool.clone();
    let address = ctx.address();
    info!("Coordinator starting sync with {} ({}).", config.l1_rpc_url, config.network);

    let l1_config = config.clone();
    let l1_pool = db_pool.clone();
    let l1_address = address.clone();
    let l1_worker = SyncArbiter::start(1, move || L1Worker::new(&l1_config, l1_pool.clone(), l1_address.clone()));
    l1_worker.do_send(Fetch::catch_up(None));
    self.l1_worker = Some(l1_worker);

    if config.rollups.is_empty() {
      info!("No rollup chains configured.");
    } else {
      let rollup_worker = SyncArbiter::start(1, move || RollupWorker::new(&config, db_pool.clone(), address.clone()));
      self.rollup_worker = Some(rollup_worker);
      self.dispatch_rollup_pass();
      ctx.run_interval(Duration::from_secs(rollup::TRACKING_INTERVAL_SECS), |act, _| act.dispatch_rollup_pass());
    }

    if self.config.weth_address.is_some() && self.config.pair_factory.is_some() {
      self.dispatch_pairs_refresh();
      ctx.run_interval(Duration::from_secs(pairs::REFRESH_INTERVAL_SECS), |act, _| act.dispatch_pairs_refresh());
    }
  }

  fn stopped(&mut self, _: &mut Self::Context) {
    warn!("Coordinator died!");
  }
}

/// Workers report here after every job; the coordinator decides what runs next.
impl Handler<Report> for Coordinator {
  type Result = ();

  fn handle(&mut self, report: Report, ctx: &mut Context<Self>) -> Self::Result {
    if let Report::RollupPassFinished { failed_chains } = &report {
      if !failed_chains.is_empty() {
        warn!("Rollup pass finished with failures on chains {:?}, retrying next tick.", failed_chains);
      }
      self.rollup_in_flight = false;
    }

    if let Some(step) = schedule(&report) {
      if step.phase != self.phase {
        info!("L1 indexer {:?} -> {:?}.", self.phase, step.phase);
        self.phase = step.phase;
      }
      let msg = Fetch::catch_up(step.cursor);
      ctx.run_later(step.delay, move |act, _| {
        if let Some(worker) = &act.l1_worker {
          worker.do_send(msg);
        }
      });
    }
  }
}

#[derive(Clone, Debug)]
enum FetchJob {
  CatchUp { cursor: Option<u64> },
  RefreshPairs,
}

// Sent by workers to the coordinator.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub enum Report {
  L1Advanced { next: u64 },
  L1CaughtUp { next: u64 },
  L1Failed { retry_from: Option<u64> },
  RollupPassFinished { failed_chains: Vec<u64> },
}

// Sent by the coordinator to workers. Failures are handled inside the worker.
#[derive(Message, Clone, Debug)]
#[rtype(result = "()")]
struct Fetch {
  job: FetchJob,
}

impl Fetch {
  fn catch_up(cursor: Option<u64>) -> Fetch {
    Self { job: FetchJob::CatchUp { cursor } }
  }
  fn refresh_pairs() -> Fetch {
    Self { job: FetchJob::RefreshPairs }
  }
}

#[derive(Message)]
#[rtype(result = "()")]
struct TrackRollups {
  deadline: Instant,
}

type FetchResult = Result<Report, FetchError>;

/// Base chain worker: block catch-up and pair snapshots.
struct L1Worker {
  coordinator: Addr<Coordinator>,
  db_pool: DbPool,
  processor: L1Processor<EthClient>,
  pair_poller: Option<PairPoller<EthClient>>,
  tracked_loaded: bool,
}

impl L1Worker {
  fn new(config: &IndexerConfig, db_pool: DbPool, coordinator: Addr<Coordinator>) -> Self {
    let client = EthClient::new(config.network.chain_id(), &config.l1_rpc_url);
    let pair_poller = match (&config.pair_factory, &config.weth_address) {
      (Some(factory), Some(weth)) => Some(PairPoller::new(client.clone(), factory, weth)),
      _ => None,
    };
    let processor = L1Processor::new(
      client,
      &config.protocol_address,
      config.reward_token.as_ref().map(|t| t.as_str()),
      config.start_block,
    );
    Self {
      coordinator,
      db_pool,
      processor,
      pair_poller,
      tracked_loaded: false,
    }
  }

  /// index the next batch of blocks from `cursor`
  //  if cursor is None, it is inferred from the processed_blocks watermark
  //  or the configured start block.
  fn catch_up(&mut self, cursor: Option<u64>) -> FetchResult {
    let ledger = PgLedger::connect(&self.db_pool)?;
    if !self.tracked_loaded {
      let count = self.processor.load_tracked(&ledger)?;
      info!("Loaded {} tracked tokens.", count);
      self.tracked_loaded = true;
    }

    let report = match self.processor.catch_up(&ledger, cursor) {
      Progress::Advanced { next } => Report::L1Advanced { next },
      Progress::CaughtUp { next } => Report::L1CaughtUp { next },
      Progress::Failed { retry_from, error } => {
        error!("L1 sync failed at block {:?}: {}", retry_from, error);
        Report::L1Failed { retry_from }
      },
    };
    Ok(report)
  }

  fn refresh_pairs(&self) -> Result<(), FetchError> {
    let poller = match &self.pair_poller {
      Some(poller) => poller,
      None => return Ok(()),
    };
    let tokens: Vec<String> = self.processor.tracked().iter().cloned().collect();
    if tokens.is_empty() {
      return Ok(())
    }
    let ledger = PgLedger::connect(&self.db_pool)?;
    poller.refresh(&ledger, &tokens);
    Ok(())
  }
}

impl Actor for L1Worker {
  type Context = SyncContext<Self>;

  fn started(&mut self, _: &mut SyncContext<Self>) {
    info!("L1 worker started up.")
  }
}

impl Handler<Fetch> for L1Worker {
  type Result = ();

  fn handle(&mut self, msg: Fetch, _ctx: &mut SyncContext<Self>) -> () {
    match msg.job {
      FetchJob::CatchUp { cursor } => match self.catch_up(cursor) {
        Ok(report) => self.coordinator.do_send(report),
        Err(e) => {
          error!("{}", e);
          error!("Unhandled error while indexing, retrying in {} seconds..", l1::ERROR_BACKOFF_SECS);
          self.coordinator.do_send(Report::L1Failed { retry_from: cursor });
        },
      },
      FetchJob::RefreshPairs => {
        if let Err(e) = self.refresh_pairs() {
          error!("Pair refresh failed: {}", e);
        }
      },
    }
  }
}

/// Rollup worker: one tracker per configured rollup chain.
struct RollupWorker {
  coordinator: Addr<Coordinator>,
  db_pool: DbPool,
  trackers: Vec<RollupTracker<EthClient>>,
}

impl RollupWorker {
  fn new(config: &IndexerConfig, db_pool: DbPool, coordinator: Addr<Coordinator>) -> Self {
    let trackers = config.rollups.iter()
      .map(|chain| RollupTracker::new(EthClient::new(chain.chain_id, &chain.rpc_url), &config.deployment_factory))
      .collect();
    Self { coordinator, db_pool, trackers }
  }

  fn track(&mut self, deadline: Instant) -> Result<Vec<u64>, FetchError> {
    let ledger = PgLedger::connect(&self.db_pool)?;
    let failed = track_rollups(&mut self.trackers, &ledger, deadline)
      .into_iter()
      .filter(|(_, result)| match result {
        Ok(summary) => !summary.failed.is_empty(),
        Err(_) => true,
      })
      .map(|(chain_id, _)| chain_id)
      .collect();
    Ok(failed)
  }
}

impl Actor for RollupWorker {
  type Context = SyncContext<Self>;

  fn started(&mut self, _: &mut SyncContext<Self>) {
    info!("Rollup worker started up with {} chains.", self.trackers.len())
  }
}

impl Handler<TrackRollups> for RollupWorker {
  type Result = ();

  fn handle(&mut self, msg: TrackRollups, _ctx: &mut SyncContext<Self>) -> () {
    let failed_chains = match self.track(msg.deadline) {
      Ok(failed) => failed,
      Err(e) => {
        error!("Rollup pass could not start: {}", e);
        self.trackers.iter().map(|t| t.chain_id()).collect()
      },
    };
    self.coordinator.do_send(Report::RollupPassFinished { failed_chains });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keeps_catching_up_while_behind() {
    let step = schedule(&Report::L1Advanced { next: 2_000 }).unwrap();
    assert_eq!(step, Step { phase: Phase::CatchUp, cursor: Some(2_000), delay: Duration::from_secs(0) });
  }

  #[test]
  fn idles_at_the_head() {
    let step = schedule(&Report::L1CaughtUp { next: 2_001 }).unwrap();
    assert_eq!(step.phase, Phase::Idle);
    assert_eq!(step.cursor, Some(2_001));
    assert_eq!(step.delay, Duration::from_secs(3));
  }

  #[test]
  fn backs_off_and_retries_the_failed_block() {
    let step = schedule(&Report::L1Failed { retry_from: Some(1_500) }).unwrap();
    assert_eq!(step.phase, Phase::CatchUp);
    assert_eq!(step.cursor, Some(1_500));
    assert_eq!(step.delay, Duration::from_secs(5));

    let step = schedule(&Report::L1Failed { retry_from: None }).unwrap();
    assert_eq!(step.cursor, None);
  }

  #[test]
  fn rollup_reports_leave_the_cursor_alone() {
    assert_eq!(schedule(&Report::RollupPassFinished { failed_chains: vec![84532] }), None);
  }
}
