pub mod executor;

use crate::config::{Config, MixPercentages};
use crate::generator::{KeyGen, ValueGen};
use crate::stats::RunStats;
use crate::table::Table;
use crate::workload::executor::{
    FailureHook, MixExecutor, ThreadContext, exit_on_failure, prefill,
};
use anyhow::{Result, anyhow, ensure};
use hdrhistogram::Histogram;
use log::debug;
use rand::Rng;
use rand::seq::SliceRandom;
use std::fmt::{Display, Formatter};
use std::thread::ScopedJoinHandle;
use std::time::Instant;

/// Number of slots in one cycle of the operation mix.
pub const MIX_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Insert,
    Erase,
    Update,
    Upsert,
}

impl OperationKind {
    fn letter(self) -> char {
        match self {
            OperationKind::Read => 'R',
            OperationKind::Insert => 'I',
            OperationKind::Erase => 'E',
            OperationKind::Update => 'U',
            OperationKind::Upsert => 'P',
        }
    }
}

/// The 100-slot schedule every worker replays.
///
/// It is shuffled once while it is still owned by the main thread and never
/// mutated afterwards; workers only ever see `&OperationMix`, so reading it
/// from all of them at once needs no lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationMix {
    ops: [OperationKind; MIX_LEN],
}

impl OperationMix {
    pub fn new(percentages: &MixPercentages) -> Result<Self> {
        Self::with_rng(percentages, &mut rand::rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(percentages: &MixPercentages, rng: &mut R) -> Result<Self> {
        ensure!(
            percentages.total() == MIX_LEN as u64,
            "Operation mix percentages must sum to 100 (got {})",
            percentages.total()
        );
        let mut ops = [OperationKind::Read; MIX_LEN];
        let layout = [
            (OperationKind::Read, percentages.reads),
            (OperationKind::Insert, percentages.inserts),
            (OperationKind::Erase, percentages.erases),
            (OperationKind::Update, percentages.updates),
            (OperationKind::Upsert, percentages.upserts),
        ];
        let mut slot = 0;
        for (kind, count) in layout {
            for _ in 0..count {
                ops[slot] = kind;
                slot += 1;
            }
        }
        ops.shuffle(rng);
        Ok(OperationMix { ops })
    }

    pub fn ops(&self) -> &[OperationKind; MIX_LEN] {
        &self.ops
    }

    pub fn count(&self, kind: OperationKind) -> usize {
        self.ops.iter().filter(|&&k| k == kind).count()
    }
}

impl Display for OperationMix {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for kind in self.ops {
            write!(f, "{}", kind.letter())?;
        }
        Ok(())
    }
}

/// Share of `n` items assigned to `thread_id`. Every thread gets `n / threads`;
/// the last one also takes the remainder.
pub fn partition(n: u64, threads: u64, thread_id: u64) -> u64 {
    let share = n / threads;
    if thread_id == threads - 1 {
        share + n % threads
    } else {
        share
    }
}

/// Per-run knobs that do not affect the expected results.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub key_size: usize,
    pub value_size: usize,
    pub record_latency: bool,
    /// Called by the worker that sees the first mismatch; exits the process
    /// by default so no other worker keeps running.
    pub on_check_failure: FailureHook,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            key_size: 8,
            value_size: 8,
            record_latency: false,
            on_check_failure: exit_on_failure,
        }
    }
}

/// Prefills `table`, then runs the timed mix on `config.threads` workers.
pub fn run(
    config: &Config,
    mix: &OperationMix,
    table: &dyn Table,
    opts: &RunOptions,
) -> Result<RunStats> {
    let keys = KeyGen::new(config.threads, opts.key_size)?;
    let threads = config.threads;

    let prefill_start = Instant::now();
    std::thread::scope(|s| {
        let handles = (0..threads)
            .map(|id| {
                let count = partition(config.prefill_elems, threads, id);
                s.spawn(move || -> Result<()> {
                    let mut values = ValueGen::new(opts.value_size, id);
                    prefill(table, &keys, &mut values, id, count, opts.on_check_failure)
                })
            })
            .collect();
        join_all(handles)
    })?;
    let prefill_time = prefill_start.elapsed();

    let (latencies, elapsed) = std::thread::scope(|s| {
        let start = Instant::now();
        let handles = (0..threads)
            .map(|id| {
                let prefilled = partition(config.prefill_elems, threads, id);
                let num_ops = partition(config.total_ops, threads, id);
                debug!("thread {id}: {prefilled} prefilled, {num_ops} ops");
                s.spawn(move || -> Result<Option<Histogram<u64>>> {
                    let ctx = ThreadContext::new(id, prefilled);
                    // distinct seed from the prefill value stream of the same thread
                    let values = ValueGen::new(opts.value_size, id + threads);
                    let mut exec = MixExecutor::new(
                        ctx,
                        table,
                        keys,
                        values,
                        opts.record_latency,
                        opts.on_check_failure,
                    )?;
                    exec.run(num_ops, mix)?;
                    let ctx = exec.context();
                    debug!(
                        "thread {id}: done, erase_seq {}, insert_seq {}",
                        ctx.erase_seq(),
                        ctx.insert_seq()
                    );
                    Ok(exec.into_latency())
                })
            })
            .collect();
        let latencies = join_all(handles);
        (latencies, start.elapsed())
    });

    let latency = merge_latencies(latencies?)?;
    Ok(RunStats {
        total_ops: config.total_ops,
        elapsed,
        prefill_elems: config.prefill_elems,
        prefill_time,
        latency,
    })
}

/// Joins every worker, then reports the first failure if any.
fn join_all<T>(handles: Vec<ScopedJoinHandle<'_, Result<T>>>) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(handles.len());
    let mut first_err = None;
    for h in handles {
        let res = h
            .join()
            .unwrap_or_else(|_| Err(anyhow!("worker thread panicked")));
        match res {
            Ok(v) => out.push(v),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

fn merge_latencies(hists: Vec<Option<Histogram<u64>>>) -> Result<Option<Histogram<u64>>> {
    let mut merged: Option<Histogram<u64>> = None;
    for h in hists.into_iter().flatten() {
        match merged.as_mut() {
            None => merged = Some(h),
            Some(m) => m
                .add(&h)
                .map_err(|e| anyhow!("merging latency histograms: {e:?}"))?,
        }
    }
    Ok(merged)
}
