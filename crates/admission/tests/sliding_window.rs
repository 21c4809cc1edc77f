//! Randomized admission sequences must never exceed the limit inside any
//! window-length interval.

use std::time::{Duration, Instant};

use proptest::prelude::*;

use harvest_admission::AdmissionControl;
use harvest_core::config::AdmissionConfig;
use harvest_core::RateLimit;

const WINDOW_MS: u64 = 1_000;

fn control(max: u32) -> AdmissionControl {
    let mut config = AdmissionConfig::default();
    config.source_limits.insert(
        "board".into(),
        RateLimit::new(max, Duration::from_millis(WINDOW_MS)).unwrap(),
    );
    AdmissionControl::new(config).unwrap()
}

proptest! {
    #[test]
    fn never_exceeds_max_in_any_window(
        max in 1u32..8,
        steps in prop::collection::vec((0u64..400, 1u32..4), 1..200),
    ) {
        let control = control(max);
        let base = Instant::now();
        let mut offset_ms = 0u64;
        let mut admitted: Vec<(u64, u32)> = Vec::new();

        for (delta_ms, tokens) in steps {
            offset_ms += delta_ms;
            let now = base + Duration::from_millis(offset_ms);
            if control.allow_at("board", tokens, now) {
                admitted.push((offset_ms, tokens));
            }
        }

        // A token admitted at t counts for the interval (t - window, t].
        for &(t, _) in &admitted {
            let in_window: u32 = admitted
                .iter()
                .filter(|(other, _)| *other <= t && *other + WINDOW_MS > t)
                .map(|(_, tokens)| tokens)
                .sum();
            prop_assert!(in_window <= max, "{} tokens within window ending at {}ms", in_window, t);
        }
    }

    #[test]
    fn single_tokens_fill_bucket_exactly(max in 1u32..20) {
        let control = control(max);
        let now = Instant::now();
        let granted = (0..max + 5).filter(|_| control.allow_at("board", 1, now)).count();
        prop_assert_eq!(granted, max as usize);
    }
}
