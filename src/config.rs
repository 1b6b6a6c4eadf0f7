use anyhow::{Result, bail, ensure};
use std::fmt::{Display, Formatter};

/// Percentages of the operation mix, one per operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixPercentages {
    pub reads: u64,
    pub inserts: u64,
    pub erases: u64,
    pub updates: u64,
    pub upserts: u64,
}

impl MixPercentages {
    pub fn total(&self) -> u64 {
        self.reads + self.inserts + self.erases + self.updates + self.upserts
    }
}

/// Raw run parameters as they come off the command line.
#[derive(Debug, Clone, Copy)]
pub struct RawConfig {
    pub mix: MixPercentages,
    /// Initial capacity of the table, as a power of 2
    pub initial_capacity: u32,
    /// Percentage of the initial capacity to fill before the timed run
    pub prefill: u64,
    /// Number of operations, as a percentage of the initial capacity. Can exceed 100
    pub total_ops: u64,
    pub threads: u64,
}

/// Validated, immutable configuration of one benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub mix: MixPercentages,
    pub initial_capacity: u64,
    pub total_ops: u64,
    pub prefill_elems: u64,
    pub threads: u64,
}

fn check_percentage(value: u64, name: &str) -> Result<()> {
    if value > 100 {
        bail!("Percentage for `{name}` cannot exceed 100");
    }
    Ok(())
}

impl Config {
    pub fn new(raw: RawConfig) -> Result<Self> {
        check_percentage(raw.mix.reads, "reads")?;
        check_percentage(raw.mix.inserts, "inserts")?;
        check_percentage(raw.mix.erases, "erases")?;
        check_percentage(raw.mix.updates, "updates")?;
        check_percentage(raw.mix.upserts, "upserts")?;
        check_percentage(raw.prefill, "prefill")?;
        ensure!(
            raw.mix.total() == 100,
            "Operation mix percentages must sum to 100 (got {})",
            raw.mix.total()
        );
        ensure!(raw.threads > 0, "Number of threads must be at least 1");
        ensure!(
            raw.initial_capacity < 64,
            "Initial capacity exponent must be less than 64 (got {})",
            raw.initial_capacity
        );

        let initial_capacity = 1u64 << raw.initial_capacity;
        let total_ops = initial_capacity
            .checked_mul(raw.total_ops)
            .map(|n| n / 100);
        let Some(total_ops) = total_ops else {
            bail!(
                "Total ops percentage {} overflows with initial capacity 2^{}",
                raw.total_ops,
                raw.initial_capacity
            );
        };
        // prefill <= 100, so this cannot overflow once the exponent is below 64
        let prefill_elems = (initial_capacity as u128 * raw.prefill as u128 / 100) as u64;

        Ok(Config {
            mix: raw.mix,
            initial_capacity,
            total_ops,
            prefill_elems,
            threads: raw.threads,
        })
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mix r/i/e/u/ups = {}/{}/{}/{}/{} | capacity: {} | prefill: {} | ops: {} | threads: {}",
            self.mix.reads,
            self.mix.inserts,
            self.mix.erases,
            self.mix.updates,
            self.mix.upserts,
            self.initial_capacity,
            self.prefill_elems,
            self.total_ops,
            self.threads
        )
    }
}
