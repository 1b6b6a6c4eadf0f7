mod config;
mod generator;
mod stats;
mod table;
mod workload;

use crate::config::{Config, MixPercentages, RawConfig};
use crate::table::get_table;
use crate::workload::executor::exit_on_failure;
use crate::workload::{OperationKind, OperationMix, RunOptions};
use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::SmallRng;

/// A benchmark that can run an arbitrary mixture of table operations.
/// The sum of read, insert, erase, update, and upsert percentages must be 100.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Percentage of mix that is reads
    #[arg(long, default_value_t = 0)]
    reads: u64,

    /// Percentage of mix that is inserts
    #[arg(long, default_value_t = 0)]
    inserts: u64,

    /// Percentage of mix that is erases
    #[arg(long, default_value_t = 0)]
    erases: u64,

    /// Percentage of mix that is updates
    #[arg(long, default_value_t = 0)]
    updates: u64,

    /// Percentage of mix that is upserts
    #[arg(long, default_value_t = 0)]
    upserts: u64,

    /// Initial capacity of table, as a power of 2
    #[arg(long, default_value_t = 25)]
    initial_capacity: u32,

    /// Percentage of final size to pre-fill table
    #[arg(long, default_value_t = 0)]
    prefill: u64,

    /// Number of operations, as a percentage of the initial capacity. This can exceed 100
    #[arg(long, default_value_t = 90)]
    total_ops: u64,

    /// Number of threads [default: available parallelism]
    #[arg(long)]
    num_threads: Option<u64>,

    #[arg(long, value_enum, default_value_t = TableType::DashMap)]
    table: TableType,

    /// Key size in bytes, at least 8
    #[arg(long, default_value_t = 8)]
    key_size: usize,

    #[arg(long, default_value_t = 8)]
    value_size: usize,

    /// Seed for shuffling the operation mix
    #[arg(long)]
    seed: Option<u64>,

    /// Record per-operation latency and print percentiles
    #[arg(long)]
    latency: bool,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
// Update table::get_table when adding new variation
enum TableType {
    DashMap,
    MemBtree,
    Redb,
    Sled,
}

impl Cli {
    fn raw_config(&self) -> RawConfig {
        let threads = self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, |n| n.get() as u64)
        });
        RawConfig {
            mix: MixPercentages {
                reads: self.reads,
                inserts: self.inserts,
                erases: self.erases,
                updates: self.updates,
                upserts: self.upserts,
            },
            initial_capacity: self.initial_capacity,
            prefill: self.prefill,
            total_ops: self.total_ops,
            threads,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let config = Config::new(cli.raw_config())?;
    info!("{config} | table: {:?}", cli.table);

    let mix = match cli.seed {
        Some(seed) => OperationMix::with_rng(&config.mix, &mut SmallRng::seed_from_u64(seed))?,
        None => OperationMix::new(&config.mix)?,
    };
    debug!(
        "operation mix ({} reads, {} inserts, {} erases, {} updates, {} upserts): {mix}",
        mix.count(OperationKind::Read),
        mix.count(OperationKind::Insert),
        mix.count(OperationKind::Erase),
        mix.count(OperationKind::Update),
        mix.count(OperationKind::Upsert)
    );

    let table = get_table(cli.table, config.initial_capacity)?;
    table.init()?;

    let opts = RunOptions {
        key_size: cli.key_size,
        value_size: cli.value_size,
        record_latency: cli.latency,
        on_check_failure: exit_on_failure,
    };
    let stats = workload::run(&config, &mix, table.as_ref(), &opts)?;
    info!(
        "prefilled {} elements in {:.1?}",
        stats.prefill_elems, stats.prefill_time
    );
    println!("{}", stats);
    Ok(())
}
