//! Rotary encoder counting
//!
//! The encoder interrupt only ever increments or decrements [`EncoderCounter`];
//! the main loop only ever reads it. No compound read-modify-write crosses the
//! two contexts.

use std::sync::atomic::{AtomicI32, Ordering};

/// Raw encoder position shared between the encoder interrupt and the main loop
#[derive(Debug, Default)]
pub struct EncoderCounter {
    raw: AtomicI32,
}

impl EncoderCounter {
    pub const fn new() -> Self {
        Self {
            raw: AtomicI32::new(0),
        }
    }

    /// One step clockwise (interrupt context)
    #[inline]
    pub fn increment(&self) {
        self.raw.fetch_add(1, Ordering::Relaxed);
    }

    /// One step counter-clockwise (interrupt context)
    #[inline]
    pub fn decrement(&self) {
        self.raw.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current raw position (main loop)
    #[inline]
    pub fn load(&self) -> i32 {
        self.raw.load(Ordering::Relaxed)
    }
}

/// Map an unbounded raw count onto `[0, count)` as `abs(raw) mod count`.
///
/// Returns `None` only when there is nothing to select.
pub fn selection_index(raw: i64, count: usize) -> Option<usize> {
    if count == 0 {
        return None;
    }
    Some((raw.unsigned_abs() % count as u64) as usize)
}

// Indexed by (previous AB << 2) | current AB. A leading B counts as +1.
const QUADRATURE_STEPS: [i8; 16] = [0, -1, 1, 0, 1, 0, 0, -1, -1, 0, 0, 1, 0, 1, -1, 0];

/// Decodes the two encoder lines into single steps.
///
/// Allocation-free and constant time so it can run from the pin-change
/// interrupt of either line.
#[derive(Debug, Clone, Copy)]
pub struct QuadratureDecoder {
    last: u8,
}

impl QuadratureDecoder {
    pub const fn new(a: bool, b: bool) -> Self {
        Self {
            last: Self::encode(a, b),
        }
    }

    #[inline]
    const fn encode(a: bool, b: bool) -> u8 {
        ((a as u8) << 1) | (b as u8)
    }

    /// Feed the current pin levels; returns +1, -1 or 0 (no move / invalid jump)
    #[inline]
    pub fn update(&mut self, a: bool, b: bool) -> i8 {
        let current = Self::encode(a, b);
        let transition = ((self.last << 2) | current) as usize;
        self.last = current;
        QUADRATURE_STEPS[transition & 0x0F]
    }

    /// Decode and apply the step to the shared counter
    #[inline]
    pub fn apply(&mut self, a: bool, b: bool, counter: &EncoderCounter) {
        match self.update(a, b) {
            1 => counter.increment(),
            -1 => counter.decrement(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_always_in_range() {
        for count in 1..=7usize {
            for raw in -50i64..=50 {
                let index = selection_index(raw, count).unwrap();
                assert!(index < count);
                assert_eq!(index as i64, raw.abs() % count as i64);
            }
        }
    }

    #[test]
    fn test_index_extremes_do_not_overflow() {
        assert!(selection_index(i64::MIN, 3).unwrap() < 3);
        assert!(selection_index(i64::from(i32::MIN), 3).unwrap() < 3);
        assert!(selection_index(i64::MAX, 3).unwrap() < 3);
    }

    #[test]
    fn test_negative_wrap_example() {
        // Rubble=0, Skye=1, Marshall=2
        let shown: Vec<usize> = [0i64, -1, -4]
            .iter()
            .map(|&raw| selection_index(raw, 3).unwrap())
            .collect();
        assert_eq!(shown, vec![0, 1, 1]);
    }

    #[test]
    fn test_empty_roster_has_no_index() {
        assert_eq!(selection_index(5, 0), None);
    }

    #[test]
    fn test_counter_increment_decrement() {
        let counter = EncoderCounter::new();
        counter.increment();
        counter.increment();
        counter.decrement();
        assert_eq!(counter.load(), 1);
        for _ in 0..5 {
            counter.decrement();
        }
        assert_eq!(counter.load(), -4);
    }

    #[test]
    fn test_quadrature_directions() {
        let counter = EncoderCounter::new();
        let mut decoder = QuadratureDecoder::new(false, false);

        // A leads B: 00 -> 10 -> 11 -> 01 -> 00
        for (a, b) in [(true, false), (true, true), (false, true), (false, false)] {
            decoder.apply(a, b, &counter);
        }
        assert_eq!(counter.load(), 4);

        // B leads A: 00 -> 01 -> 11 -> 10 -> 00
        for (a, b) in [(false, true), (true, true), (true, false), (false, false)] {
            decoder.apply(a, b, &counter);
        }
        assert_eq!(counter.load(), 0);
    }

    #[test]
    fn test_quadrature_ignores_bounce_and_jumps() {
        let mut decoder = QuadratureDecoder::new(false, false);
        assert_eq!(decoder.update(false, false), 0);
        // Both lines changing at once is an invalid jump
        assert_eq!(decoder.update(true, true), 0);
    }

    #[test]
    fn test_counter_shared_across_threads() {
        use std::sync::Arc;

        let counter = Arc::new(EncoderCounter::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if i % 2 == 0 {
                            counter.increment();
                        } else {
                            counter.decrement();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(), 0);
    }
}
