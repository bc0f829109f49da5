use agentlens_types::{ActivityBinsMode, ActivityStatus, ScanConfig, ACTIVITY_BIN_COUNT};

/// Result of binning a trace's event distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityProfile {
    pub bins: Vec<f64>,
    pub mode: ActivityBinsMode,
    pub window_minutes: f64,
    pub bin_minutes: f64,
}

/// Bin event timestamps into the fixed-width activity profile.
///
/// Each bin is the event count in that slice of [first, last], normalized
/// by the busiest bin. Missing or degenerate timestamps fall back to
/// splitting by event rank, which flattens to a uniform profile.
pub fn activity_bins(timestamps: &[i64], event_count: u64) -> ActivityProfile {
    let n = ACTIVITY_BIN_COUNT;

    let first = timestamps.iter().min().copied().unwrap_or(0);
    let last = timestamps.iter().max().copied().unwrap_or(0);

    if timestamps.is_empty() || first == last {
        // event_index mode: rank-based split
        let mut bins = vec![0.0f64; n];
        if event_count > 0 {
            let mut counts = vec![0u64; n];
            for rank in 0..event_count {
                let bin = ((rank as u128 * n as u128) / event_count as u128) as usize;
                counts[bin.min(n - 1)] += 1;
            }
            let max = counts.iter().copied().max().unwrap_or(1).max(1);
            for (i, c) in counts.iter().enumerate() {
                bins[i] = *c as f64 / max as f64;
            }
        }
        return ActivityProfile {
            bins,
            mode: ActivityBinsMode::EventIndex,
            window_minutes: 0.0,
            bin_minutes: 0.0,
        };
    }

    let span = (last - first) as u128;
    let mut counts = vec![0u64; n];
    for ts in timestamps {
        let rel = (*ts - first) as u128;
        let bin = ((rel * n as u128) / (span + 1)) as usize;
        counts[bin.min(n - 1)] += 1;
    }
    let max = counts.iter().copied().max().unwrap_or(1).max(1);
    let bins = counts.iter().map(|c| *c as f64 / max as f64).collect();

    let window_minutes = span as f64 / 60_000.0;
    ActivityProfile {
        bins,
        mode: ActivityBinsMode::Time,
        window_minutes,
        bin_minutes: window_minutes / n as f64,
    }
}

/// Liveness from the age of the last observed activity.
///
/// A manual stop override forces idle until some newer file event
/// outruns the recorded stop time.
pub fn activity_status(
    updated_ms: i64,
    now_ms: i64,
    scan: &ScanConfig,
    manual_stop_at_ms: Option<i64>,
) -> (ActivityStatus, String) {
    if let Some(stop_at) = manual_stop_at_ms {
        if updated_ms <= stop_at {
            return (ActivityStatus::Idle, "manually_stopped".to_string());
        }
    }

    let age_ms = now_ms.saturating_sub(updated_ms);
    if age_ms < scan.status_running_ttl_ms {
        (ActivityStatus::Running, "recent_activity".to_string())
    } else if age_ms < scan.status_waiting_ttl_ms {
        (ActivityStatus::WaitingInput, "awaiting_user".to_string())
    } else {
        (ActivityStatus::Idle, "inactive".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan() -> ScanConfig {
        ScanConfig {
            status_running_ttl_ms: 20_000,
            status_waiting_ttl_ms: 1_800_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_status_thresholds() {
        let scan = scan();
        let now = 2_000_000;
        assert_eq!(
            activity_status(1_995_000, now, &scan, None).0,
            ActivityStatus::Running
        );
        assert_eq!(
            activity_status(1_955_000, now, &scan, None).0,
            ActivityStatus::WaitingInput
        );
        assert_eq!(
            activity_status(1_700_000, now, &scan, None).0,
            ActivityStatus::Idle
        );
    }

    #[test]
    fn test_manual_stop_override() {
        let scan = scan();
        let now = 2_000_000;
        // Fresh activity, but stopped by hand after it
        let (status, reason) = activity_status(1_995_000, now, &scan, Some(1_996_000));
        assert_eq!(status, ActivityStatus::Idle);
        assert_eq!(reason, "manually_stopped");

        // Newer activity than the stop mark lifts the override
        let (status, _) = activity_status(1_997_000, now, &scan, Some(1_996_000));
        assert_eq!(status, ActivityStatus::Running);
    }

    #[test]
    fn test_bins_shape_and_bounds() {
        let timestamps: Vec<i64> = (0..100).map(|i| 1_000_000 + i * 1_000).collect();
        let profile = activity_bins(&timestamps, 100);
        assert_eq!(profile.bins.len(), ACTIVITY_BIN_COUNT);
        assert_eq!(profile.mode, ActivityBinsMode::Time);
        assert!(profile.bins.iter().all(|b| (0.0..=1.0).contains(b)));
        assert!(profile.bins.iter().any(|b| *b == 1.0));
    }

    #[test]
    fn test_burst_dominates_normalization() {
        // 10 events at the start, 1 at the end
        let mut timestamps: Vec<i64> = vec![0; 10].iter().map(|_| 1_000).collect();
        timestamps.push(1_000_000);
        let profile = activity_bins(&timestamps, 11);
        assert_eq!(profile.bins[0], 1.0);
        let last = *profile.bins.last().unwrap();
        assert!(last > 0.0 && last < 1.0);
    }

    #[test]
    fn test_degenerate_timestamps_fall_back_to_rank() {
        let timestamps = vec![5_000; 4];
        let profile = activity_bins(&timestamps, 4);
        assert_eq!(profile.mode, ActivityBinsMode::EventIndex);
        assert!(profile.bins.iter().any(|b| *b == 1.0));
    }

    #[test]
    fn test_empty_trace_is_all_zero() {
        let profile = activity_bins(&[], 0);
        assert_eq!(profile.bins.len(), ACTIVITY_BIN_COUNT);
        assert!(profile.bins.iter().all(|b| *b == 0.0));
        assert!(!profile.bins.iter().any(|b| *b == 1.0));
    }
}
