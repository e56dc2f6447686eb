//! Property-based tests for the pattern engine and the jitter recorder.

use proptest::prelude::*;
use pulse_common::config::PatternMode;
use pulse_common::time::TickInstant;
use pulse_runtime::{JitterRecorder, PulsePatternEngine, TickAction};

fn any_mode() -> impl Strategy<Value = PatternMode> {
    prop_oneof![
        Just(PatternMode::Plain),
        (0u64..64, 0u64..24).prop_map(|(modulus, length)| PatternMode::Skip { modulus, length }),
        (0u64..64).prop_map(|modulus| PatternMode::Insert { modulus }),
    ]
}

fn run(mode: PatternMode, ticks: usize) -> Vec<TickAction> {
    let mut engine = PulsePatternEngine::new(mode);
    (0..ticks).map(|_| engine.on_tick()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Plain mode: the level after tick N is N mod 2.
    #[test]
    fn prop_plain_parity(ticks in 1usize..4096) {
        for (i, action) in run(PatternMode::Plain, ticks).into_iter().enumerate() {
            let n = i as u64 + 1;
            prop_assert_eq!(action, TickAction::Drive(n % 2 == 1), "tick {}", n);
        }
    }

    /// Same mode and same tick count give the same actions.
    #[test]
    fn prop_deterministic(mode in any_mode(), ticks in 0usize..2048) {
        prop_assert_eq!(run(mode, ticks), run(mode, ticks));
    }

    /// A skip episode shorter than the modulus holds exactly `length` ticks.
    #[test]
    fn prop_skip_episode_length(half in 1u64..20, pulses in 1u64..10) {
        let modulus = 2 * half + 1;
        let length = (2 * pulses).min(modulus - 1);
        let actions = run(PatternMode::Skip { modulus, length }, (3 * modulus) as usize);

        let start = (modulus - 1) as usize;
        prop_assert!(actions[..start].iter().all(|a| *a != TickAction::Hold));
        prop_assert!(actions[start..start + length as usize]
            .iter()
            .all(|a| *a == TickAction::Hold));
        prop_assert_ne!(actions[start + length as usize], TickAction::Hold);
    }

    /// Insert mode never holds; outside windows it follows bit 1 of the tick count.
    #[test]
    fn prop_insert_outside_window(modulus in 5u64..64, ticks in 1usize..1024) {
        let mut engine = PulsePatternEngine::new(PatternMode::Insert { modulus });
        for n in 1..=ticks as u64 {
            let action = engine.on_tick();
            prop_assert!(action != TickAction::Hold);
            let in_window = n >= modulus && (n % modulus) < 4;
            if !in_window {
                prop_assert_eq!(action, TickAction::Drive((n >> 1) % 2 == 1), "tick {}", n);
            }
        }
    }

    /// The recorder never holds more than its capacity.
    #[test]
    fn prop_recorder_bounded(capacity in 0usize..512, samples in 0u64..2048) {
        let mut recorder = JitterRecorder::new(capacity);
        for i in 0..samples {
            recorder.record(TickInstant::from_nanos(i * 1_000));
        }
        let kept = capacity.min(samples as usize);
        prop_assert_eq!(recorder.len(), kept);
        prop_assert_eq!(recorder.discarded(), samples - kept as u64);
        prop_assert!(recorder.intervals().all(|d| !d.is_zero()));
    }
}
