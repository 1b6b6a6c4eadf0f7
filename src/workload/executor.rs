use crate::generator::{KeyGen, ValueGen};
use crate::table::Table;
use crate::workload::{OperationKind, OperationMix};
use anyhow::{Error, Result, anyhow};
use hdrhistogram::Histogram;
use log::error;
use std::time::Instant;

/// Mixes the global op index `i` and its slot `j` in the current cycle into
/// a large number. Uses the MurmurHash multipliers; must stay a pure function
/// of its inputs so every run issues the same calls.
pub fn mix_value(i: u64, j: u64) -> u64 {
    i.wrapping_mul(0x5bd1e995)
        .wrapping_add(j.wrapping_mul(0xc6a4a7935bd1e995))
}

/// Invoked on the first table result that disagrees with the bookkeeping,
/// before the worker returns the error. Table I/O errors do not go through it.
pub type FailureHook = fn(&Error);

/// Ends the process with a non-zero status.
pub fn exit_on_failure(_: &Error) {
    std::process::exit(1);
}

/// Inserts sequence numbers `0..count` of `thread_id`'s key space.
pub fn prefill(
    table: &dyn Table,
    keys: &KeyGen,
    values: &mut ValueGen,
    thread_id: u64,
    count: u64,
    on_failure: FailureHook,
) -> Result<()> {
    for seq in 0..count {
        if !table.insert(&keys.key(seq, thread_id), &values.value())? {
            let err = anyhow!("thread {thread_id}: prefill insert of seq {seq} failed");
            error!("{err}");
            on_failure(&err);
            return Err(err);
        }
    }
    Ok(())
}

/// Sequence bookkeeping of one worker.
///
/// Keys with sequence numbers in `[erase_seq, insert_seq)` are in the table,
/// everything else in this thread's key space is not. `erase_seq <= insert_seq`
/// holds between any two operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadContext {
    thread_id: u64,
    erase_seq: u64,
    insert_seq: u64,
}

impl ThreadContext {
    pub fn new(thread_id: u64, prefilled: u64) -> Self {
        ThreadContext {
            thread_id,
            erase_seq: 0,
            insert_seq: prefilled,
        }
    }

    pub fn erase_seq(&self) -> u64 {
        self.erase_seq
    }

    pub fn insert_seq(&self) -> u64 {
        self.insert_seq
    }

    fn contains(&self, seq: u64) -> bool {
        self.erase_seq <= seq && seq < self.insert_seq
    }
}

pub struct MixExecutor<'a> {
    ctx: ThreadContext,
    table: &'a dyn Table,
    keys: KeyGen,
    values: ValueGen,
    latency: Option<Histogram<u64>>,
    on_failure: FailureHook,
}

impl<'a> MixExecutor<'a> {
    pub fn new(
        ctx: ThreadContext,
        table: &'a dyn Table,
        keys: KeyGen,
        values: ValueGen,
        record_latency: bool,
        on_failure: FailureHook,
    ) -> Result<Self> {
        let latency = if record_latency {
            Some(Histogram::new_with_bounds(1, 10_000_000, 3)?)
        } else {
            None
        };
        Ok(MixExecutor {
            ctx,
            table,
            keys,
            values,
            latency,
            on_failure,
        })
    }

    pub fn context(&self) -> &ThreadContext {
        &self.ctx
    }

    pub fn into_latency(self) -> Option<Histogram<u64>> {
        self.latency
    }

    /// Replays `mix` in cycles of 100 until `num_ops` operations were issued.
    /// Stops at the first result that disagrees with the bookkeeping.
    pub fn run(&mut self, num_ops: u64, mix: &OperationMix) -> Result<()> {
        let mut i = 0;
        while i < num_ops {
            for (j, &kind) in mix.ops().iter().enumerate() {
                if i == num_ops {
                    break;
                }
                self.step(i, j as u64, kind, num_ops)?;
                i += 1;
            }
        }
        Ok(())
    }

    fn step(&mut self, i: u64, j: u64, kind: OperationKind, num_ops: u64) -> Result<()> {
        let x = mix_value(i, j);
        match kind {
            OperationKind::Read => {
                // x is large and unrelated to num_ops, so this spreads reads
                // over roughly the whole table
                let seq = x % num_ops;
                let key = self.keys.key(seq, self.ctx.thread_id);
                let found = self.timed(|t| t.read(&key))?.is_some();
                self.check(i, kind, seq, self.ctx.contains(seq), found)?;
            }
            OperationKind::Insert => self.insert_next(i, kind)?,
            OperationKind::Erase => {
                // keeps hitting the same erased key until something new is inserted
                let seq = self.ctx.erase_seq;
                let expected = seq < self.ctx.insert_seq;
                let key = self.keys.key(seq, self.ctx.thread_id);
                let erased = self.timed(|t| t.erase(&key))?;
                self.check(i, kind, seq, expected, erased)?;
                if expected {
                    self.ctx.erase_seq += 1;
                }
            }
            OperationKind::Update => {
                let seq = x % num_ops;
                let key = self.keys.key(seq, self.ctx.thread_id);
                let value = self.values.value();
                let updated = self.timed(|t| t.update(&key, &value))?;
                self.check(i, kind, seq, self.ctx.contains(seq), updated)?;
            }
            OperationKind::Upsert => {
                if self.ctx.insert_seq == 0 || x & 1 == 0 {
                    self.insert_next(i, kind)?;
                } else {
                    let seq = self.ctx.insert_seq - 1;
                    let key = self.keys.key(seq, self.ctx.thread_id);
                    let value = self.values.value();
                    let updated = self.timed(|t| t.update(&key, &value))?;
                    self.check(i, kind, seq, true, updated)?;
                }
            }
        }
        // any new kind has to keep this ordering
        debug_assert!(self.ctx.erase_seq <= self.ctx.insert_seq);
        Ok(())
    }

    fn insert_next(&mut self, i: u64, kind: OperationKind) -> Result<()> {
        let seq = self.ctx.insert_seq;
        let key = self.keys.key(seq, self.ctx.thread_id);
        let value = self.values.value();
        let inserted = self.timed(|t| t.insert(&key, &value))?;
        self.check(i, kind, seq, true, inserted)?;
        self.ctx.insert_seq += 1;
        Ok(())
    }

    fn timed<T>(&mut self, op: impl FnOnce(&dyn Table) -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let res = op(self.table)?;
        if let Some(h) = self.latency.as_mut() {
            h.saturating_record(start.elapsed().as_micros() as u64);
        }
        Ok(res)
    }

    fn check(
        &self,
        i: u64,
        kind: OperationKind,
        seq: u64,
        expected: bool,
        got: bool,
    ) -> Result<()> {
        if expected != got {
            let ctx = &self.ctx;
            error!(
                "thread {}: {:?} of seq {} at op {} returned {}, expected {} (erase_seq {}, insert_seq {})",
                ctx.thread_id, kind, seq, i, got, expected, ctx.erase_seq, ctx.insert_seq
            );
            let err = anyhow!(
                "thread {}: {:?} of seq {} at op {} returned {}, expected {}",
                ctx.thread_id,
                kind,
                seq,
                i,
                got,
                expected
            );
            (self.on_failure)(&err);
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixPercentages;
    use crate::table::get_table;
    use crate::TableType;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Insert,
        Read,
        Update,
        Erase,
    }

    /// Correct in-memory table that remembers every call and its result.
    #[derive(Default)]
    struct RecordingTable {
        data: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
        calls: Mutex<Vec<(Call, Vec<u8>, bool)>>,
    }

    impl RecordingTable {
        fn log(&self, call: Call, key: &[u8], ok: bool) -> bool {
            self.calls.lock().unwrap().push((call, key.to_vec(), ok));
            ok
        }

        fn calls(&self) -> Vec<(Call, Vec<u8>, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Table for RecordingTable {
        fn init(&self) -> Result<()> {
            Ok(())
        }

        fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
            let mut data = self.data.lock().unwrap();
            let ok = !data.contains_key(key);
            if ok {
                data.insert(key.to_vec(), value.to_vec());
            }
            Ok(self.log(Call::Insert, key, ok))
        }

        fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            let v = self.data.lock().unwrap().get(key).cloned();
            self.log(Call::Read, key, v.is_some());
            Ok(v)
        }

        fn update(&self, key: &[u8], value: &[u8]) -> Result<bool> {
            let ok = match self.data.lock().unwrap().get_mut(key) {
                Some(v) => {
                    *v = value.to_vec();
                    true
                }
                None => false,
            };
            Ok(self.log(Call::Update, key, ok))
        }

        fn erase(&self, key: &[u8]) -> Result<bool> {
            let ok = self.data.lock().unwrap().remove(key).is_some();
            Ok(self.log(Call::Erase, key, ok))
        }
    }

    /// Loses every insert after the first `keep`, while still reporting success.
    struct LossyTable {
        inner: RecordingTable,
        keep: Mutex<u64>,
    }

    impl Table for LossyTable {
        fn init(&self) -> Result<()> {
            Ok(())
        }

        fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
            let mut keep = self.keep.lock().unwrap();
            if *keep == 0 {
                return Ok(true);
            }
            *keep -= 1;
            self.inner.insert(key, value)
        }

        fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            self.inner.read(key)
        }

        fn update(&self, key: &[u8], value: &[u8]) -> Result<bool> {
            self.inner.update(key, value)
        }

        fn erase(&self, key: &[u8]) -> Result<bool> {
            self.inner.erase(key)
        }
    }

    fn mix(reads: u64, inserts: u64, erases: u64, updates: u64, upserts: u64) -> OperationMix {
        let p = MixPercentages {
            reads,
            inserts,
            erases,
            updates,
            upserts,
        };
        OperationMix::with_rng(&p, &mut SmallRng::seed_from_u64(11)).unwrap()
    }

    fn executor<'a>(
        table: &'a dyn Table,
        thread_id: u64,
        threads: u64,
        prefilled: u64,
    ) -> MixExecutor<'a> {
        let keys = KeyGen::new(threads, 8).unwrap();
        let mut values = ValueGen::new(8, thread_id);
        prefill(table, &keys, &mut values, thread_id, prefilled, keep_going).unwrap();
        let ctx = ThreadContext::new(thread_id, prefilled);
        MixExecutor::new(ctx, table, keys, values, false, keep_going).unwrap()
    }

    fn keep_going(_: &Error) {}

    #[test]
    fn mix_value_is_pure() {
        assert_eq!(mix_value(0, 0), 0);
        assert_eq!(mix_value(1, 0), 0x5bd1e995);
        assert_eq!(mix_value(0, 1), 0xc6a4a7935bd1e995);
        assert_eq!(mix_value(12345, 45), mix_value(12345, 45));
        assert_eq!(
            mix_value(u64::MAX, 2),
            0u64.wrapping_sub(0x5bd1e995)
                .wrapping_add(0xc6a4a7935bd1e995u64.wrapping_mul(2))
        );
    }

    #[test]
    fn reads_before_first_insert_are_absent() {
        // reads=50, inserts=50, capacity 2^10, no prefill, 1024 ops, 1 thread
        let table = RecordingTable::default();
        let m = mix(50, 50, 0, 0, 0);
        let mut exec = executor(&table, 0, 1, 0);
        exec.run(1024, &m).unwrap();

        let calls = table.calls();
        assert_eq!(calls.len(), 1024);
        let first_insert = calls.iter().position(|c| c.0 == Call::Insert).unwrap();
        assert!(calls[..first_insert].iter().all(|c| c.0 == Call::Read && !c.2));
        let inserts = calls.iter().filter(|c| c.0 == Call::Insert).count() as u64;
        assert_eq!(exec.context().insert_seq(), inserts);
        assert_eq!(exec.context().erase_seq(), 0);
    }

    #[test]
    fn erases_stop_succeeding_once_prefill_is_drained() {
        // erases=100, prefill 50% of 2^10, 90% of 2^10 ops
        let table = RecordingTable::default();
        let m = mix(0, 0, 100, 0, 0);
        let mut exec = executor(&table, 0, 1, 512);
        exec.run(921, &m).unwrap();

        let erases: Vec<bool> = table
            .calls()
            .into_iter()
            .filter(|c| c.0 == Call::Erase)
            .map(|c| c.2)
            .collect();
        assert_eq!(erases.len(), 921);
        assert!(erases[..512].iter().all(|&ok| ok));
        assert!(erases[512..].iter().all(|&ok| !ok));
        assert_eq!(exec.context().erase_seq(), 512);
        assert_eq!(exec.context().insert_seq(), 512);
    }

    #[test]
    fn upserts_follow_low_bit_of_mix_value() {
        let table = RecordingTable::default();
        let m = mix(0, 0, 0, 0, 100);
        let mut exec = executor(&table, 0, 1, 0);
        exec.run(10, &m).unwrap();

        let calls = table.calls();
        assert_eq!(calls.len(), 10);
        assert_eq!(calls[0].0, Call::Insert);
        let mut insert_seq = 0;
        for (i, call) in calls.iter().enumerate() {
            let x = mix_value(i as u64, i as u64);
            let expect = if insert_seq == 0 || x & 1 == 0 {
                insert_seq += 1;
                Call::Insert
            } else {
                Call::Update
            };
            assert_eq!(call.0, expect, "op {i}");
            assert!(call.2);
        }
        assert_eq!(exec.context().insert_seq(), insert_seq);
    }

    #[test]
    fn invariant_holds_after_every_op() {
        let table = RecordingTable::default();
        let m = mix(20, 15, 35, 15, 15);
        let mut exec = executor(&table, 2, 3, 40);
        let num_ops = 2_000;
        let mut i = 0;
        while i < num_ops {
            for (j, &kind) in m.ops().iter().enumerate() {
                if i == num_ops {
                    break;
                }
                exec.step(i, j as u64, kind, num_ops).unwrap();
                let ctx = exec.context();
                assert!(ctx.erase_seq() <= ctx.insert_seq(), "op {i}: {ctx:?}");
                i += 1;
            }
        }
    }

    #[test]
    fn calls_are_reproducible() {
        let m = mix(30, 20, 20, 20, 10);
        let record = || {
            let table = RecordingTable::default();
            let mut exec = executor(&table, 1, 4, 25);
            exec.run(777, &m).unwrap();
            (table.calls(), *exec.context())
        };
        let (a, ctx_a) = record();
        let (b, ctx_b) = record();
        assert_eq!(a, b);
        assert_eq!(ctx_a, ctx_b);
        assert_eq!(a.len(), 25 + 777);
    }

    #[test]
    fn reads_see_inserts_until_erased() {
        // with a single op every read and update targets seq 0
        let table = RecordingTable::default();
        let mut exec = executor(&table, 0, 1, 0);
        let key = KeyGen::new(1, 8).unwrap().key(0, 0);
        exec.step(0, 0, OperationKind::Read, 1).unwrap();
        exec.step(1, 1, OperationKind::Insert, 1).unwrap();
        exec.step(2, 2, OperationKind::Read, 1).unwrap();
        exec.step(3, 3, OperationKind::Update, 1).unwrap();
        exec.step(4, 4, OperationKind::Erase, 1).unwrap();
        exec.step(5, 5, OperationKind::Read, 1).unwrap();
        exec.step(6, 6, OperationKind::Update, 1).unwrap();

        let expected = vec![
            (Call::Read, key.clone(), false),
            (Call::Insert, key.clone(), true),
            (Call::Read, key.clone(), true),
            (Call::Update, key.clone(), true),
            (Call::Erase, key.clone(), true),
            (Call::Read, key.clone(), false),
            (Call::Update, key, false),
        ];
        assert_eq!(table.calls(), expected);
        assert_eq!(exec.context().erase_seq(), 1);
        assert_eq!(exec.context().insert_seq(), 1);
    }

    #[test]
    fn upsert_with_odd_mix_value_updates_latest_key() {
        assert_eq!(mix_value(1, 0) & 1, 1);
        let table = RecordingTable::default();
        let mut exec = executor(&table, 0, 1, 3);
        exec.step(1, 0, OperationKind::Upsert, 10).unwrap();

        let key = KeyGen::new(1, 8).unwrap().key(2, 0);
        assert_eq!(table.calls().last(), Some(&(Call::Update, key, true)));
        assert_eq!(table.calls().len(), 4);
        assert_eq!(exec.context().insert_seq(), 3);
        assert_eq!(exec.context().erase_seq(), 0);
    }

    #[test]
    fn upsert_update_of_missing_key_is_reported() {
        let table = RecordingTable::default();
        let mut exec = executor(&table, 0, 1, 3);
        let key = KeyGen::new(1, 8).unwrap().key(2, 0);
        assert!(table.erase(&key).unwrap());

        let err = exec.step(1, 0, OperationKind::Upsert, 10).unwrap_err();
        assert!(err.to_string().contains("Upsert of seq 2"), "{err}");
        assert!(err.to_string().contains("expected true"), "{err}");
        assert_eq!(exec.context().insert_seq(), 3);
    }

    static HOOK_CALLS: AtomicU64 = AtomicU64::new(0);

    fn count_failure(_: &Error) {
        HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn failure_hook_runs_once_at_first_mismatch() {
        let table = LossyTable {
            inner: RecordingTable::default(),
            keep: Mutex::new(0),
        };
        let keys = KeyGen::new(1, 8).unwrap();
        let ctx = ThreadContext::new(0, 0);
        let values = ValueGen::new(8, 0);
        let mut exec = MixExecutor::new(ctx, &table, keys, values, false, count_failure).unwrap();
        // inserts are lost, so the first read of an inserted seq fails
        assert!(exec.run(1_000, &mix(50, 50, 0, 0, 0)).is_err());
        assert_eq!(HOOK_CALLS.load(Ordering::SeqCst), 1);
        let last = table.inner.calls().pop().unwrap();
        assert_eq!(last.0, Call::Read);
        assert!(!last.2);
    }

    #[test]
    fn zero_ops_issue_no_calls() {
        let table = RecordingTable::default();
        let mut exec = executor(&table, 0, 1, 0);
        exec.run(0, &mix(100, 0, 0, 0, 0)).unwrap();
        assert!(table.calls().is_empty());
    }

    #[test]
    fn lost_insert_is_reported() {
        let table = LossyTable {
            inner: RecordingTable::default(),
            keep: Mutex::new(10),
        };
        let mut exec = executor(&table, 0, 1, 10);
        let err = exec.run(1_000, &mix(50, 50, 0, 0, 0)).unwrap_err();
        assert!(err.to_string().contains("Read"), "{err}");
        assert!(err.to_string().contains("expected true"), "{err}");
    }

    #[test]
    fn runs_against_real_backend() {
        let table = get_table(TableType::Redb, 1 << 6).unwrap();
        table.init().unwrap();
        let mut exec = executor(table.as_ref(), 0, 1, 16);
        exec.run(200, &mix(30, 20, 20, 20, 10)).unwrap();
        assert!(exec.context().erase_seq() <= exec.context().insert_seq());
    }
}
