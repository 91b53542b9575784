use anyhow::{Result, anyhow};
use rayon::prelude::*;
use std::ops::Range;

/// Split `0..total` into at most `parts` contiguous ranges of near-equal length.
pub fn split_ranges(total: usize, parts: usize) -> Vec<Range<usize>> {
    if total == 0 {
        return Vec::new();
    }
    let parts = parts.clamp(1, total);
    let base = total / parts;
    let extra = total % parts;

    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for part in 0..parts {
        let len = base + usize::from(part < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// Fixed-size pool executing data-parallel chunk work.
///
/// Every chunk is computed by a pure function of its index range; results are reassembled in
/// range order, so the output never depends on the worker count or on scheduling.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    /// Chunks per worker, keeps uneven pair costs balanced.
    const CHUNKS_PER_WORKER: usize = 4;

    pub fn new(workers: Option<usize>) -> Result<Self> {
        let workers = match workers {
            Some(0) => return Err(anyhow!("Worker count must be at least 1")),
            Some(n) => n,
            None => rayon::current_num_threads(),
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("diffcorr-worker-{}", i))
            .build()
            .map_err(|e| anyhow!("Failed to start {} workers: {}", workers, e))?;
        Ok(WorkerPool { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn ranges(&self, total: usize) -> Vec<Range<usize>> {
        split_ranges(total, self.workers * Self::CHUNKS_PER_WORKER)
    }

    /// Compute `f` on every chunk of `0..total` and concatenate in index order.
    ///
    /// A failing chunk fails the whole call.
    pub fn map_ranges<R, F>(&self, total: usize, f: F) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(Range<usize>) -> Result<Vec<R>> + Sync,
    {
        let ranges = self.ranges(total);
        let parts: Vec<Vec<R>> = self.pool.install(|| {
            ranges
                .into_par_iter()
                .map(|range| {
                    let expected = range.len();
                    let part = f(range.clone())?;
                    if part.len() != expected {
                        return Err(anyhow!(
                            "Chunk {:?} produced {} results, expected {}",
                            range,
                            part.len(),
                            expected
                        ));
                    }
                    Ok(part)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut out = Vec::with_capacity(total);
        for part in parts {
            out.extend(part);
        }
        Ok(out)
    }

    /// Hand each chunk its own disjoint window of `out`; `f` receives the window's index range.
    pub fn fill_ranges<T, F>(&self, out: &mut [T], f: F) -> Result<()>
    where
        T: Send,
        F: Fn(Range<usize>, &mut [T]) -> Result<()> + Sync,
    {
        let total = out.len();
        if total == 0 {
            return Ok(());
        }
        let ranges = self.ranges(total);
        let chunk_len = ranges[0].len();
        self.pool.install(|| {
            out.par_chunks_mut(chunk_len)
                .enumerate()
                .try_for_each(|(k, window)| {
                    let start = k * chunk_len;
                    f(start..start + window.len(), window)
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_covers_everything_once() {
        let ranges = split_ranges(10, 3);
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);
        assert_eq!(split_ranges(2, 8), vec![0..1, 1..2]);
        assert!(split_ranges(0, 4).is_empty());
    }

    #[test]
    fn test_map_ranges_is_order_stable_across_worker_counts() {
        let square = |range: Range<usize>| Ok(range.map(|i| i * i).collect::<Vec<_>>());
        let single = WorkerPool::new(Some(1)).unwrap().map_ranges(1000, square).unwrap();
        let many = WorkerPool::new(Some(7)).unwrap().map_ranges(1000, square).unwrap();
        assert_eq!(single, many);
        assert_eq!(many[999], 999 * 999);
    }

    #[test]
    fn test_map_ranges_propagates_chunk_failure() {
        let pool = WorkerPool::new(Some(3)).unwrap();
        let result: Result<Vec<usize>> = pool.map_ranges(100, |range| {
            if range.contains(&50) {
                Err(anyhow!("boom"))
            } else {
                Ok(range.collect())
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_fill_ranges_writes_disjoint_windows() {
        let pool = WorkerPool::new(Some(4)).unwrap();
        let mut out = vec![0usize; 103];
        pool.fill_ranges(&mut out, |range, window| {
            for (i, slot) in range.zip(window.iter_mut()) {
                *slot = i + 1;
            }
            Ok(())
        })
        .unwrap();
        assert!(out.iter().enumerate().all(|(i, &v)| v == i + 1));
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(WorkerPool::new(Some(0)).is_err());
    }
}
