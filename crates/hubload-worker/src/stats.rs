//! Throughput and latency statistics
//!
//! Pure functions over a [`SampleSnapshot`].

use std::time::Duration;
use tracing::{debug, info};

use crate::job::{JobResults, LatencyReport};
use crate::samples::SampleSnapshot;

/// Interpolated percentile of an ascending list, `p` in (0, 100].
///
/// `rank = p * n / 100 + 0.5`; the result interpolates between the order
/// statistics at `floor(rank)` and `ceil(rank)`, counted from 1. Positions
/// outside `1..=n` clamp to the first or last element. Empty input yields 0.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }

    let rank = p * n as f64 / 100.0 + 0.5;
    let lower = rank.floor();
    let frac = rank - lower;

    let at = |position: f64| sorted[(position as usize).clamp(1, n) - 1];
    let (lo, hi) = (at(lower), at(rank.ceil()));
    // (1 - frac) * lo + frac * hi, exact when lo == hi
    lo + frac * (hi - lo)
}

/// Requests per second over the measured interval; zero elapsed yields 0
pub fn requests_per_second(total: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        total as f64 / secs
    } else {
        0.0
    }
}

/// Smallest and largest per-connection count, `(0, 0)` without connections
pub fn count_range(counts: &[usize]) -> (usize, usize) {
    let min = counts.iter().copied().min().unwrap_or(0);
    let max = counts.iter().copied().max().unwrap_or(0);
    (min, max)
}

/// Mean of a list, `None` when empty
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Mean of the per-connection averages, skipping connections without samples
pub fn average_latency(per_connection: &[Vec<f64>]) -> f64 {
    let averages: Vec<f64> = per_connection
        .iter()
        .filter_map(|latencies| mean(latencies))
        .collect();
    mean(&averages).unwrap_or(0.0)
}

/// Reduce a snapshot into the results of a run
pub fn compute(snapshot: &SampleSnapshot, elapsed: Duration) -> JobResults {
    let total = snapshot.total();
    let merged = snapshot.merged();
    let (min, max) = count_range(&snapshot.counts);

    for (index, latencies) in snapshot.latencies.iter().enumerate() {
        if let Some(avg) = mean(latencies) {
            debug!("Connection {} average latency {:.3} ms", index, avg);
        }
    }

    let results = JobResults {
        requests_per_second: requests_per_second(total, elapsed),
        total_requests: total,
        elapsed_seconds: elapsed.as_secs_f64(),
        latency: LatencyReport {
            average: average_latency(&snapshot.latencies),
            p50: percentile(&merged, 50.0),
            p75: percentile(&merged, 75.0),
            p90: percentile(&merged, 90.0),
            p99: percentile(&merged, 99.0),
        },
        connection_requests: snapshot.counts.clone(),
        min_connection_requests: min,
        max_connection_requests: max,
    };

    info!(
        "Requests per connection: min {} max {}",
        results.min_connection_requests, results.max_connection_requests
    );

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 50.0), 25.0);
        assert_eq!(percentile(&values, 75.0), 35.0);
        // rank 4.1 clamps its upper neighbour to the last element
        assert_eq!(percentile(&values, 90.0), 40.0);
        assert_eq!(percentile(&values, 99.0), 40.0);
    }

    #[test]
    fn test_percentile_single_element() {
        for p in 1..=99 {
            assert_eq!(percentile(&[42.0], p as f64), 42.0, "p{}", p);
        }
    }

    #[test]
    fn test_percentile_empty() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[], 99.0), 0.0);
    }

    #[test]
    fn test_percentile_clamps_low_ranks() {
        // rank 0.6 sits below the first element
        let values = [5.0, 7.0, 9.0, 11.0, 13.0, 15.0, 17.0, 19.0, 21.0, 23.0];
        assert_eq!(percentile(&values, 1.0), 5.0);
    }

    #[test]
    fn test_percentiles_monotonic() {
        let mut values: Vec<f64> = (0..997).map(|i| ((i * 7919) % 1000) as f64 / 10.0).collect();
        values.sort_unstable_by(f64::total_cmp);

        let p50 = percentile(&values, 50.0);
        let p75 = percentile(&values, 75.0);
        let p90 = percentile(&values, 90.0);
        let p99 = percentile(&values, 99.0);
        assert!(p50 <= p75 && p75 <= p90 && p90 <= p99);
    }

    #[test]
    fn test_requests_per_second() {
        assert_eq!(requests_per_second(1000, Duration::from_secs(2)), 500.0);
        assert_eq!(requests_per_second(1000, Duration::ZERO), 0.0);
        assert_eq!(requests_per_second(0, Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn test_count_range() {
        assert_eq!(count_range(&[3, 0, 9, 4]), (0, 9));
        assert_eq!(count_range(&[]), (0, 0));
    }

    #[test]
    fn test_average_skips_empty_connections() {
        let per_connection = vec![vec![1.0, 3.0], vec![], vec![10.0]];
        // (2 + 10) / 2, not divided by three connections
        assert_eq!(average_latency(&per_connection), 6.0);
        assert_eq!(average_latency(&[vec![], vec![]]), 0.0);
    }

    #[test]
    fn test_compute_uneven_connections() {
        let snapshot = SampleSnapshot {
            counts: vec![4, 0, 1],
            latencies: vec![vec![10.0, 20.0, 30.0, 40.0], vec![], vec![25.0]],
        };

        let results = compute(&snapshot, Duration::from_millis(2500));
        assert_eq!(results.total_requests, 5);
        assert_eq!(results.requests_per_second, 2.0);
        assert_eq!(results.connection_requests, vec![4, 0, 1]);
        assert_eq!(results.min_connection_requests, 0);
        assert_eq!(results.max_connection_requests, 4);
        // merged [10, 20, 25, 30, 40]: rank 3.0
        assert_eq!(results.latency.p50, 25.0);
        assert_eq!(results.latency.average, 25.0);
    }
}
