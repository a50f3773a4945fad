//! Workload harness: spawns worker threads that run synthetic transactions
//! against a shared lock manager and reports throughput.
//!
//! Each transaction takes three shared locks on consecutive RIDs (mod the
//! table size), then either upgrades or takes a fresh exclusive lock on a
//! random RID, then commits.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use rand::Rng;

use rowlock::config::{LogVerbosity, WorkloadConfig};
use rowlock::{LockManager, TransactionManager, TransactionState, TransactionTable};

#[derive(Parser, Debug)]
#[command(name = "lockbench", about = "Synthetic wound-wait 2PL workload harness")]
struct Args {
    /// Number of concurrent worker threads.
    #[arg(long, default_value_t = WorkloadConfig::default().workers)]
    workers: usize,

    /// Number of transactions each worker runs.
    #[arg(long, default_value_t = WorkloadConfig::default().txns_per_worker)]
    txns_per_worker: usize,

    /// Size of the RID space transactions draw from.
    #[arg(long, default_value_t = WorkloadConfig::default().table_size)]
    table_size: u64,

    /// Diagnostic log verbosity: error, warn, info, debug, or trace.
    #[arg(long, default_value = "info")]
    log_level: LogVerbosity,
}

fn main() {
    let args = Args::parse();
    let config = WorkloadConfig {
        workers: args.workers,
        txns_per_worker: args.txns_per_worker,
        table_size: args.table_size,
        log_level: args.log_level,
    };
    env_logger::Builder::new().filter_level(config.log_level.as_level_filter()).init();

    let txn_table = TransactionTable::new();
    let lock_manager = Arc::new(LockManager::new(txn_table.clone()));
    let txn_manager = Arc::new(TransactionManager::new(lock_manager, txn_table));

    let start = Instant::now();
    let handles: Vec<_> = (0..config.workers)
        .map(|_| {
            let txn_manager = txn_manager.clone();
            std::thread::spawn(move || run_worker(&txn_manager, config.table_size, config.txns_per_worker))
        })
        .collect();

    let mut committed: u64 = 0;
    let mut aborted: u64 = 0;
    for handle in handles {
        let (c, a) = handle.join().expect("worker thread panicked");
        committed += c;
        aborted += a;
    }

    let elapsed_ms = (start.elapsed().as_millis() as u64).max(1);
    println!("Committed: {}", committed);
    println!("Aborted: {}", aborted);
    println!("total time: {} ms", elapsed_ms);
    println!("{} op/ms", committed / elapsed_ms);
}

/// Runs one worker's share of transactions against the shared lock/txn
/// managers, returning `(committed, aborted)`.
///
/// The accumulator below stands in for the source workload's per-transaction
/// read total; unlike that source, it is explicitly initialized rather than
/// read uninitialized (see `DESIGN.md`'s open questions).
fn run_worker(txn_manager: &TransactionManager, table_size: u64, txns: usize) -> (u64, u64) {
    let mut rng = rand::thread_rng();
    let mut committed: u64 = 0;
    let mut aborted: u64 = 0;

    for _ in 0..txns {
        let txn = txn_manager.begin();
        let lock_manager = txn_manager.lock_manager();

        let i = rng.gen_range(0..table_size);
        let j = rng.gen_range(0..table_size);

        let mut acc: u64 = 0;
        for off in 0..3 {
            let rid = (i + off) % table_size;
            lock_manager.lock_shared(&txn, rid);
            acc = acc.wrapping_add(rid);
        }

        if txn.holds_shared(j) {
            lock_manager.lock_upgrade(&txn, j);
        } else {
            lock_manager.lock_exclusive(&txn, j);
        }

        if txn.state() == TransactionState::Aborted {
            aborted += 1;
        } else {
            committed += 1;
            let _ = acc;
        }
        txn_manager.commit(&txn);
    }

    (committed, aborted)
}
