use hdrhistogram::Histogram;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use thousands::Separable;

/// Outcome of a fully successful run. Only the mix phase counts towards
/// throughput.
#[derive(Debug)]
pub struct RunStats {
    pub total_ops: u64,
    pub elapsed: Duration,
    pub prefill_elems: u64,
    pub prefill_time: Duration,
    /// Per-operation latency in microseconds, merged over all threads
    pub latency: Option<Histogram<u64>>,
}

impl RunStats {
    pub fn throughput(&self) -> f64 {
        if self.total_ops == 0 || self.elapsed.is_zero() {
            0.0
        } else {
            self.total_ops as f64 / self.elapsed.as_secs_f64()
        }
    }
}

impl Display for RunStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "total ops: {}", self.total_ops)?;
        writeln!(f, "time elapsed (sec): {:.6}", self.elapsed.as_secs_f64())?;
        write!(f, "throughput (ops/sec): {:.6}", self.throughput())?;

        if let Some(h) = &self.latency {
            let percentile = |q: f64| -> String {
                if h.is_empty() {
                    "-".into()
                } else {
                    h.value_at_quantile(q).separate_with_underscores()
                }
            };
            writeln!(f)?;
            write!(
                f,
                "latency | p50: {} µs | p95: {} µs | p99: {} µs | p99.9: {} µs | max: {} µs",
                percentile(0.50),
                percentile(0.95),
                percentile(0.99),
                percentile(0.999),
                h.max().separate_with_underscores()
            )?;
        }
        Ok(())
    }
}
