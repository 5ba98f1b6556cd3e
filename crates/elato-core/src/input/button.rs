use super::InputEvent;

#[derive(Debug, Clone, Copy)]
pub struct ButtonConfig {
    active_low: bool,
    debounce_polls: u8,
    long_press_ms: u64,
    double_click_ms: u64,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            active_low: true,
            debounce_polls: 3,
            long_press_ms: 800,
            double_click_ms: 400,
        }
    }
}

impl ButtonConfig {
    pub const fn with_active_low(mut self, active_low: bool) -> Self {
        self.active_low = active_low;
        self
    }

    pub const fn with_debounce_polls(mut self, debounce_polls: u8) -> Self {
        self.debounce_polls = debounce_polls;
        self
    }

    pub const fn with_long_press_ms(mut self, long_press_ms: u64) -> Self {
        self.long_press_ms = long_press_ms;
        self
    }

    pub const fn with_double_click_ms(mut self, double_click_ms: u64) -> Self {
        self.double_click_ms = double_click_ms;
        self
    }

    pub const fn active_low(&self) -> bool {
        self.active_low
    }
}

/// Debounced click / double-click / long-press recognizer fed with raw pin
/// levels.
#[derive(Debug, Clone)]
pub struct ButtonGestureDetector {
    config: ButtonConfig,
    raw: bool,
    stable: bool,
    stable_count: u8,
    pressed_at_ms: Option<u64>,
    // Release time of a click that may still become a double click.
    clicked_at_ms: Option<u64>,
}

impl ButtonGestureDetector {
    /// A button already held at construction is ignored until released.
    pub fn new(config: ButtonConfig, level_high: bool) -> Self {
        let pressed = pressed_from_level(level_high, config.active_low);
        Self {
            config,
            raw: pressed,
            stable: pressed,
            stable_count: 0,
            pressed_at_ms: None,
            clicked_at_ms: None,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.stable
    }

    pub fn sample(&mut self, level_high: bool, now_ms: u64) -> Option<InputEvent> {
        let pressed = pressed_from_level(level_high, self.config.active_low);
        if pressed == self.raw {
            self.stable_count = self.stable_count.saturating_add(1);
        } else {
            self.raw = pressed;
            self.stable_count = 0;
        }

        let debounce_threshold = self.config.debounce_polls.max(1);
        if self.stable_count >= debounce_threshold && self.stable != self.raw {
            self.stable = self.raw;
            return self.on_edge(now_ms);
        }

        if !self.stable
            && let Some(clicked_at) = self.clicked_at_ms
            && now_ms.saturating_sub(clicked_at) > self.config.double_click_ms
        {
            self.clicked_at_ms = None;
            return Some(InputEvent::SingleClick);
        }

        None
    }

    fn on_edge(&mut self, now_ms: u64) -> Option<InputEvent> {
        if self.stable {
            self.pressed_at_ms = Some(now_ms);
            return None;
        }

        let pressed_at = self.pressed_at_ms.take()?;
        if now_ms.saturating_sub(pressed_at) >= self.config.long_press_ms {
            self.clicked_at_ms = None;
            return Some(InputEvent::LongPressUp);
        }

        if let Some(first) = self.clicked_at_ms.take()
            && now_ms.saturating_sub(first) <= self.config.double_click_ms
        {
            return Some(InputEvent::DoubleClick);
        }

        self.clicked_at_ms = Some(now_ms);
        None
    }
}

#[inline]
fn pressed_from_level(level_high: bool, active_low: bool) -> bool {
    if active_low { !level_high } else { level_high }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLL_MS: u64 = 10;

    struct Bench {
        detector: ButtonGestureDetector,
        now_ms: u64,
        events: std::vec::Vec<InputEvent>,
    }

    impl Bench {
        fn new() -> Self {
            let config = ButtonConfig::default().with_debounce_polls(2);
            Self {
                detector: ButtonGestureDetector::new(config, true),
                now_ms: 0,
                events: std::vec::Vec::new(),
            }
        }

        /// Holds the pin at `level_high` for `ms`, sampling every poll.
        fn hold(&mut self, level_high: bool, ms: u64) -> &mut Self {
            let end = self.now_ms + ms;
            while self.now_ms < end {
                self.now_ms += POLL_MS;
                if let Some(event) = self.detector.sample(level_high, self.now_ms) {
                    self.events.push(event);
                }
            }
            self
        }

        fn press(&mut self, ms: u64) -> &mut Self {
            self.hold(false, ms)
        }

        fn release(&mut self, ms: u64) -> &mut Self {
            self.hold(true, ms)
        }
    }

    #[test]
    fn long_press_fires_on_release() {
        let mut bench = Bench::new();
        bench.press(1_000);
        assert!(bench.events.is_empty());
        assert!(bench.detector.is_pressed());

        bench.release(100);
        assert_eq!(bench.events, [InputEvent::LongPressUp]);
    }

    #[test]
    fn two_quick_clicks_make_a_double_click() {
        let mut bench = Bench::new();
        bench.press(100).release(150).press(100).release(600);
        assert_eq!(bench.events, [InputEvent::DoubleClick]);
    }

    #[test]
    fn lone_click_resolves_after_the_gap() {
        let mut bench = Bench::new();
        bench.press(100).release(300);
        assert!(bench.events.is_empty());

        bench.release(200);
        assert_eq!(bench.events, [InputEvent::SingleClick]);
    }

    #[test]
    fn bounces_shorter_than_debounce_are_ignored() {
        let mut bench = Bench::new();
        bench.press(10).release(50).press(10).release(1_000);
        assert!(bench.events.is_empty());
    }

    #[test]
    fn button_held_at_boot_is_not_a_gesture() {
        let config = ButtonConfig::default().with_debounce_polls(1);
        let mut detector = ButtonGestureDetector::new(config, false);
        assert!(detector.is_pressed());

        let mut events = std::vec::Vec::new();
        for step in 1..=200u64 {
            let level_high = step > 100;
            events.extend(detector.sample(level_high, step * POLL_MS));
        }
        assert!(events.is_empty());
    }
}
