// ADAPT CLOCK
// MONOTONIC TIMESTAMPS FOR SAMPLE TIMES AND LATENCY MEASUREMENT.
// CLOCK_MONOTONIC NEVER STEPS BACKWARD, SO DECAY EXPONENTS STAY <= 0.

pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

pub fn ns_to_secs(ns: u64) -> f64 {
    ns as f64 / 1_000_000_000.0
}

// SECONDS SINCE AN ARBITRARY FIXED POINT. SAMPLE TIMES ARE ONLY EVER DIFFERENCED.
pub fn now_secs() -> f64 {
    ns_to_secs(now_ns())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
        assert!(a > 0);
    }

    #[test]
    fn converts_to_seconds() {
        assert_eq!(ns_to_secs(1_500_000_000), 1.5);
        assert_eq!(ns_to_secs(0), 0.0);
    }

    #[test]
    fn seconds_track_nanoseconds() {
        let ns = now_ns();
        let s = now_secs();
        assert!(s >= ns_to_secs(ns));
    }
}
