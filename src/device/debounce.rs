//! Button debouncing

/// Window a raw level must stay unchanged before it is believed
pub const DEFAULT_DEBOUNCE_MS: u64 = 50;

/// A debounced button transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEdge {
    Pressed,
    Released,
}

/// Debounces an active-low button sampled from the main loop.
///
/// Any change of the raw level restarts the window. The stable level only
/// flips after the raw level has held for at least `window_ms`, so one
/// physical press yields exactly one [`ButtonEdge::Pressed`] no matter how
/// much the contacts bounce.
#[derive(Debug, Clone)]
pub struct ButtonDebouncer {
    window_ms: u64,
    stable_level: bool,
    last_raw: bool,
    last_change_ms: u64,
}

impl ButtonDebouncer {
    /// `idle_level` is the level read with the button released (high for a
    /// pull-up wiring)
    pub fn new(window_ms: u64, idle_level: bool) -> Self {
        Self {
            window_ms,
            stable_level: idle_level,
            last_raw: idle_level,
            last_change_ms: 0,
        }
    }

    /// Sample the raw level at `now_ms`
    pub fn update(&mut self, level: bool, now_ms: u64) -> Option<ButtonEdge> {
        if level != self.last_raw {
            self.last_raw = level;
            self.last_change_ms = now_ms;
            return None;
        }

        if level == self.stable_level {
            return None;
        }

        if now_ms.saturating_sub(self.last_change_ms) < self.window_ms {
            return None;
        }

        self.stable_level = level;
        // Active-low: falling edge is a press
        if level {
            Some(ButtonEdge::Released)
        } else {
            Some(ButtonEdge::Pressed)
        }
    }

    pub fn is_pressed(&self) -> bool {
        !self.stable_level
    }

    /// Last sampled level, before debouncing
    pub fn raw_level(&self) -> bool {
        self.last_raw
    }

    pub fn last_change_ms(&self) -> u64 {
        self.last_change_ms
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }
}

impl Default for ButtonDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed (time, level) samples and collect the edges
    fn run(debouncer: &mut ButtonDebouncer, samples: &[(u64, bool)]) -> Vec<ButtonEdge> {
        samples
            .iter()
            .filter_map(|&(t, level)| debouncer.update(level, t))
            .collect()
    }

    #[test]
    fn test_clean_press_and_release() {
        let mut debouncer = ButtonDebouncer::default();
        let edges = run(
            &mut debouncer,
            &[(0, true), (100, false), (120, false), (150, false), (300, true), (360, true)],
        );
        assert_eq!(edges, vec![ButtonEdge::Pressed, ButtonEdge::Released]);
        assert!(!debouncer.is_pressed());
    }

    #[test]
    fn test_bouncing_contacts_yield_one_press() {
        let mut debouncer = ButtonDebouncer::default();
        let mut samples = Vec::new();
        // 30ms of chatter
        for t in (100..130).step_by(2) {
            samples.push((t, (t / 2) % 2 == 0));
        }
        // Then held down for 200ms
        for t in (130..330).step_by(10) {
            samples.push((t, false));
        }
        let edges = run(&mut debouncer, &samples);
        assert_eq!(edges, vec![ButtonEdge::Pressed]);
    }

    #[test]
    fn test_short_glitch_ignored() {
        let mut debouncer = ButtonDebouncer::default();
        let edges = run(
            &mut debouncer,
            &[(0, true), (10, false), (30, false), (40, true), (100, true), (200, true)],
        );
        assert!(edges.is_empty());
    }

    #[test]
    fn test_press_reported_only_once_while_held() {
        let mut debouncer = ButtonDebouncer::default();
        let samples: Vec<_> = (0..100).map(|i| (i * 10, false)).collect();
        let edges = run(&mut debouncer, &samples);
        assert_eq!(edges, vec![ButtonEdge::Pressed]);
        assert!(debouncer.is_pressed());
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let mut debouncer = ButtonDebouncer::new(50, true);
        assert_eq!(debouncer.update(false, 1000), None);
        assert_eq!(debouncer.update(false, 1049), None);
        assert_eq!(debouncer.update(false, 1050), Some(ButtonEdge::Pressed));
    }
}
