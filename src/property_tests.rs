//! Property-based tests over the coordination primitives.

use crate::event_factory::DefaultEventFactory;
use crate::ring_buffer::RingBuffer;
use crate::sequence::Sequence;
use crate::sequence_group::SequenceGroup;
use crate::sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
use crate::wait_strategy::BusySpinWaitStrategy;
use proptest::prelude::*;
use std::sync::Arc;

mod sequence_properties {
    use super::*;

    proptest! {
        #[test]
        fn set_then_get_round_trips(value in any::<i64>()) {
            let sequence = Sequence::new(0);
            sequence.set(value);
            prop_assert_eq!(sequence.get(), value);
        }

        #[test]
        fn add_and_get_is_consistent(initial in -1_000_000i64..1_000_000, delta in 1i64..1000) {
            let sequence = Sequence::new(initial);
            prop_assert_eq!(sequence.add_and_get(delta), initial + delta);
            prop_assert_eq!(sequence.get(), initial + delta);
        }

        #[test]
        fn compare_and_set_only_succeeds_on_match(
            initial in any::<i64>(),
            expected in any::<i64>(),
            new in any::<i64>()
        ) {
            let sequence = Sequence::new(initial);
            let swapped = sequence.compare_and_set(expected, new);
            if expected == initial {
                prop_assert!(swapped);
                prop_assert_eq!(sequence.get(), new);
            } else {
                prop_assert!(!swapped);
                prop_assert_eq!(sequence.get(), initial);
            }
        }
    }
}

mod ring_buffer_properties {
    use super::*;

    proptest! {
        #[test]
        fn any_sequence_maps_into_bounds(size_power in 0u32..12, sequence in 0i64..i64::MAX / 2) {
            let size = 1usize << size_power;
            let buffer = RingBuffer::new(size, DefaultEventFactory::<i64>::new()).unwrap();
            // a read at any non-negative sequence lands on some slot
            let _ = buffer.get(sequence);
            prop_assert_eq!(buffer.size(), size as i64);
        }

        #[test]
        fn same_slot_every_lap(size_power in 0u32..10, slot in any::<u16>(), laps in 1i64..8) {
            let size = 1usize << size_power;
            let buffer = RingBuffer::new(size, DefaultEventFactory::<i64>::new()).unwrap();
            let sequence = i64::from(slot) % size as i64;

            // SAFETY: single-threaded test
            unsafe { *buffer.get_mut_unchecked(sequence) = 77; }
            prop_assert_eq!(*buffer.get(sequence + laps * size as i64), 77);
        }
    }
}

mod single_producer_properties {
    use super::*;

    proptest! {
        #[test]
        fn claims_are_monotonic(
            size_power in 1u32..10,
            requests in prop::collection::vec(1i64..10, 1..20)
        ) {
            let buffer_size = 1usize << size_power;
            let sequencer =
                SingleProducerSequencer::new(buffer_size, Arc::new(BusySpinWaitStrategy::new()));

            let mut last_sequence = crate::INITIAL_CURSOR_VALUE;
            for request in requests {
                let request = request.min(buffer_size as i64);
                if let Ok(sequence) = sequencer.try_next_n(request) {
                    prop_assert!(sequence > last_sequence);
                    sequencer.publish(sequence);
                    last_sequence = sequence;
                }
            }
        }

        #[test]
        fn publication_window_tracks_the_cursor(
            size_power in 1u32..8,
            publishes in 1usize..32
        ) {
            let buffer_size = 1usize << size_power;
            let sequencer =
                SingleProducerSequencer::new(buffer_size, Arc::new(BusySpinWaitStrategy::new()));

            let mut cursor = crate::INITIAL_CURSOR_VALUE;
            for _ in 0..publishes {
                if let Ok(sequence) = sequencer.try_next() {
                    prop_assert!(!sequencer.is_available(sequence));
                    sequencer.publish(sequence);
                    cursor = sequence;
                }
            }

            // is_available(s) iff s <= cursor && s > cursor - N
            for sequence in 0..=(cursor + buffer_size as i64) {
                let expected =
                    sequence <= cursor && sequence > cursor - buffer_size as i64;
                prop_assert_eq!(sequencer.is_available(sequence), expected);
            }
        }
    }
}

mod multi_producer_properties {
    use super::*;

    proptest! {
        #[test]
        fn claims_are_unique(
            size_power in 1u32..8,
            requests in prop::collection::vec(1i64..4, 1..10)
        ) {
            let buffer_size = 1usize << size_power;
            let sequencer =
                MultiProducerSequencer::new(buffer_size, Arc::new(BusySpinWaitStrategy::new()));

            let mut seen = std::collections::HashSet::new();
            for request in requests {
                let request = request.min(buffer_size as i64);
                if let Ok(sequence) = sequencer.try_next_n(request) {
                    prop_assert!(seen.insert(sequence));
                    sequencer.publish_range(sequence - request + 1, sequence);
                }
            }
        }

        #[test]
        fn availability_flag_encodes_the_lap(
            size_power in 1u32..8,
            sequence in 0i64..1_000_000
        ) {
            let buffer_size = 1i64 << size_power;
            let sequencer = MultiProducerSequencer::new(
                buffer_size as usize,
                Arc::new(BusySpinWaitStrategy::new()),
            );

            sequencer.claim(sequence - 1);
            let claimed = sequencer.try_next().unwrap();
            prop_assert_eq!(claimed, sequence);
            sequencer.publish(sequence);

            // published iff the stored lap number matches s >> log2(N)
            prop_assert!(sequencer.is_available(sequence));
            prop_assert!(!sequencer.is_available(sequence + buffer_size));
            if sequence >= buffer_size {
                prop_assert!(!sequencer.is_available(sequence - buffer_size));
            }
        }

        #[test]
        fn highest_published_stops_at_the_first_gap(
            size_power in 2u32..8,
            gap_offset in 0i64..4
        ) {
            let buffer_size = 1usize << size_power;
            let sequencer =
                MultiProducerSequencer::new(buffer_size, Arc::new(BusySpinWaitStrategy::new()));

            let top = sequencer.try_next_n(4).unwrap();
            for sequence in 0..=top {
                if sequence != gap_offset {
                    sequencer.publish(sequence);
                }
            }

            prop_assert_eq!(
                sequencer.get_highest_published_sequence(0, top),
                gap_offset - 1
            );
        }
    }
}

mod gating_properties {
    use super::*;

    proptest! {
        #[test]
        fn membership_survives_add_remove_cycles(extras in 0usize..8) {
            let group = SequenceGroup::new();
            let cursor = Sequence::new(0);

            let resident = Arc::new(Sequence::default());
            group.add(&cursor, &[Arc::clone(&resident)]);

            let transients: Vec<_> =
                (0..extras).map(|_| Arc::new(Sequence::default())).collect();
            for transient in &transients {
                group.add(&cursor, &[Arc::clone(transient)]);
            }
            for transient in &transients {
                prop_assert!(group.remove(transient));
            }

            prop_assert_eq!(group.len(), 1);
        }

        #[test]
        fn producer_never_outruns_gating_by_more_than_capacity(
            size_power in 1u32..6,
            moves in prop::collection::vec(0i64..3, 1..30)
        ) {
            let buffer_size = 1i64 << size_power;
            let sequencer = SingleProducerSequencer::new(
                buffer_size as usize,
                Arc::new(BusySpinWaitStrategy::new()),
            );
            let consumer = Arc::new(Sequence::default());
            sequencer.add_gating_sequences(&[Arc::clone(&consumer)]);

            let mut consumed = crate::INITIAL_CURSOR_VALUE;
            for advance in moves {
                while let Ok(sequence) = sequencer.try_next() {
                    sequencer.publish(sequence);
                }
                let cursor = sequencer.get_cursor().get();
                // invariant: 0 <= cursor - min(gating) <= N
                prop_assert!(cursor - consumed >= 0);
                prop_assert!(cursor - consumed <= buffer_size);

                consumed = (consumed + advance).min(cursor);
                consumer.set(consumed);
            }
        }
    }
}
