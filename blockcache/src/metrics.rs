use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Metrics collector, if active, it provides Counters and Timers
#[derive(Clone)]
pub struct Metrics {
    metrics: Option<Arc<ActiveMetrics>>,
}

/// Metrics that can be collected during execution
#[derive(PartialEq, Eq, Hash, Debug)]
pub enum Metric {
    /// Counter of total block requests made to the manager
    BlockRequests,
    /// Counter of block requests which were not resident in the cache
    BlockCacheMisses,
    /// Counter of blocks loaded from the store
    BlockReads,
    /// Counter of physical block writes issued to the store
    BlockWrites,
    /// Counter of dirty blocks handed to the background writer
    DirtyWriteBacks,
    /// Counter of blocks evicted from the cache
    Evictions,
    /// Timer used to record average block read time
    BlockReadTime,
    /// Timer used to record average block write time
    BlockWriteTime,
}

struct ActiveMetrics {
    block_requests: AtomicU64,
    block_cache_misses: AtomicU64,
    block_reads: AtomicU64,
    block_writes: AtomicU64,
    dirty_write_backs: AtomicU64,
    evictions: AtomicU64,
    block_read_time: Timer,
    block_write_time: Timer,
}

impl Metrics {
    /// Returns the Metrics object, active or not based on the specified input
    pub fn new(active: bool) -> Self {
        Self {
            metrics: if active {
                Some(Arc::new(ActiveMetrics {
                    block_requests: AtomicU64::new(0),
                    block_cache_misses: AtomicU64::new(0),
                    block_reads: AtomicU64::new(0),
                    block_writes: AtomicU64::new(0),
                    dirty_write_backs: AtomicU64::new(0),
                    evictions: AtomicU64::new(0),
                    block_read_time: Timer::new(),
                    block_write_time: Timer::new(),
                }))
            } else {
                None
            },
        }
    }

    fn counter<'a>(metrics: &'a ActiveMetrics, metric: &Metric) -> &'a AtomicU64 {
        match metric {
            Metric::BlockRequests => &metrics.block_requests,
            Metric::BlockCacheMisses => &metrics.block_cache_misses,
            Metric::BlockReads => &metrics.block_reads,
            Metric::BlockWrites => &metrics.block_writes,
            Metric::DirtyWriteBacks => &metrics.dirty_write_backs,
            Metric::Evictions => &metrics.evictions,
            _ => panic!("Specified metric is not a Counter"),
        }
    }

    /// Increase the Counter specified by the input
    ///
    /// panics if the specified [`Metric`] is not a Counter
    pub fn count(&self, metric: Metric) {
        if let Some(ref metrics) = self.metrics {
            Self::counter(metrics, &metric).fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read the current value of a Counter. Always `0` when collection is inactive.
    ///
    /// panics if the specified [`Metric`] is not a Counter
    pub fn get(&self, metric: Metric) -> u64 {
        self.metrics
            .as_ref()
            .map_or(0, |metrics| Self::counter(metrics, &metric).load(Ordering::Relaxed))
    }

    /// Returns a guard that, when dropped, will record the time passed since creation
    ///
    /// panics if the specified [`Metric`] is not a Timer
    pub fn record<'a>(&'a self, metric: Metric) -> Option<impl Drop + 'a> {
        self.metrics.as_ref().map(|metrics| {
            let timer = match metric {
                Metric::BlockReadTime => &metrics.block_read_time,
                Metric::BlockWriteTime => &metrics.block_write_time,
                _ => panic!("Specified metric is not a Timer"),
            };

            timer.record()
        })
    }

    /// Print collected metrics to stdout
    pub fn print(&self) {
        if let Some(ref metrics) = self.metrics {
            println!("metrics");

            let tot_block_requests = metrics.block_requests.load(Ordering::Relaxed);
            println!("  block requests        {}", tot_block_requests);

            if tot_block_requests != 0 {
                let cache_misses = metrics.block_cache_misses.load(Ordering::Relaxed);
                let percentage_cache_misses =
                    (cache_misses as f64 / tot_block_requests as f64) * 100.0;

                println!(
                    "  block cache misses    {} - {:.2}% of block requests",
                    cache_misses, percentage_cache_misses
                );
            }

            let evictions = metrics.evictions.load(Ordering::Relaxed);
            println!("  evictions             {}", evictions);

            let block_reads = metrics.block_reads.load(Ordering::Relaxed);
            println!("  block reads           {}", block_reads);

            let block_writes = metrics.block_writes.load(Ordering::Relaxed);
            println!("  block writes          {}", block_writes);

            let dirty_write_backs = metrics.dirty_write_backs.load(Ordering::Relaxed);
            println!("  dirty write-backs     {}", dirty_write_backs);

            if let Some(mean) = metrics.block_read_time.mean() {
                println!("  block read mean       {}", pretty_display_ns(mean));
            }

            if let Some(mean) = metrics.block_write_time.mean() {
                println!("  block write mean      {}", pretty_display_ns(mean));
            }
        } else {
            println!("Metrics collection was not activated")
        }
    }
}

fn pretty_display_ns(ns: u64) -> String {
    // preserve 3 sig figs at minimum.
    let (val, unit) = if ns > 100 * 1_000_000_000 {
        (ns / 1_000_000_000, "s")
    } else if ns > 100 * 1_000_000 {
        (ns / 1_000_000, "ms")
    } else if ns > 100 * 1_000 {
        (ns / 1_000, "us")
    } else {
        (ns, "ns")
    };

    format!("{val} {unit}")
}

struct Timer {
    number_of_records: AtomicU64,
    sum: AtomicU64,
}

impl Timer {
    fn new() -> Self {
        Timer {
            number_of_records: AtomicU64::new(0),
            sum: AtomicU64::new(0),
        }
    }

    fn mean(&self) -> Option<u64> {
        let n = self.number_of_records.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        sum.checked_div(n)
    }

    fn record<'a>(&'a self) -> impl Drop + 'a {
        struct TimerGuard<'a> {
            start: std::time::Instant,
            n: &'a AtomicU64,
            sum: &'a AtomicU64,
        }

        impl Drop for TimerGuard<'_> {
            fn drop(&mut self) {
                let elapsed = self.start.elapsed().as_nanos() as u64;
                self.n.fetch_add(1, Ordering::Relaxed);
                self.sum.fetch_add(elapsed, Ordering::Relaxed);
            }
        }

        TimerGuard {
            start: std::time::Instant::now(),
            n: &self.number_of_records,
            sum: &self.sum,
        }
    }
}
