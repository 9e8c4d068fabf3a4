use std::time::Duration;

/// Observed throughput of the recognition service, used to project a
/// completion time before any real progress exists.
const SECONDS_PER_MEGABYTE: f64 = 90.0;
const MIN_PROCESSING_SECONDS: u64 = 30;
const MAX_PROCESSING_SECONDS: u64 = 1800;

/// Fallback when the upload size is unknown or zero.
const DEFAULT_PROCESSING_SECONDS: u64 = 300;

/// Projects how long recognition of an upload should take from its size
/// alone, clamped to keep pathological sizes from producing absurd ETAs.
pub fn processing_estimate(file_size_bytes: u64) -> Duration {
    if file_size_bytes == 0 {
        return Duration::from_secs(DEFAULT_PROCESSING_SECONDS);
    }
    let megabytes = file_size_bytes as f64 / (1024.0 * 1024.0);
    let seconds = (megabytes * SECONDS_PER_MEGABYTE).round() as u64;
    Duration::from_secs(seconds.clamp(MIN_PROCESSING_SECONDS, MAX_PROCESSING_SECONDS))
}

/// Projects how long a queued job will wait before a worker picks it up.
/// Position 1 is next in line; jobs drain in waves of `workers`.
pub fn queue_wait_estimate(position: u32, workers: usize) -> Duration {
    if position == 0 || workers == 0 {
        return Duration::ZERO;
    }
    let waves = (u64::from(position)).div_ceil(workers as u64);
    Duration::from_secs(waves * DEFAULT_PROCESSING_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_files_clamp_to_floor() {
        // 100 KiB would project under nine seconds.
        assert_eq!(processing_estimate(100 * 1024), Duration::from_secs(30));
    }

    #[test]
    fn midsize_files_scale_linearly() {
        // 4 MiB at 90 s/MiB.
        assert_eq!(
            processing_estimate(4 * 1024 * 1024),
            Duration::from_secs(360)
        );
    }

    #[test]
    fn huge_files_clamp_to_ceiling() {
        assert_eq!(
            processing_estimate(512 * 1024 * 1024),
            Duration::from_secs(1800)
        );
    }

    #[test]
    fn unknown_size_uses_fallback() {
        assert_eq!(processing_estimate(0), Duration::from_secs(300));
    }

    #[test]
    fn queue_wait_scales_in_waves() {
        // Five workers drain five jobs per wave.
        assert_eq!(queue_wait_estimate(1, 5), Duration::from_secs(300));
        assert_eq!(queue_wait_estimate(5, 5), Duration::from_secs(300));
        assert_eq!(queue_wait_estimate(6, 5), Duration::from_secs(600));
    }

    #[test]
    fn queue_wait_zero_for_active_jobs() {
        assert_eq!(queue_wait_estimate(0, 5), Duration::ZERO);
    }
}
