//! Single push-button input.

/// Actions produced by the front button.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputEvent {
    ShortPress,
    LongPress,
}

/// Polled input provider.
pub trait InputProvider {
    type Error;

    fn poll_event(&mut self, now_ms: u64) -> Result<Option<InputEvent>, Self::Error>;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ButtonConfig {
    pub active_low: bool,
    pub debounce_ms: u64,
    pub short_max_ms: u64,
    pub long_min_ms: u64,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            active_low: true,
            debounce_ms: 50,
            short_max_ms: 1_000,
            long_min_ms: 3_000,
        }
    }
}

impl ButtonConfig {
    pub const fn with_active_low(mut self, active_low: bool) -> Self {
        self.active_low = active_low;
        self
    }

    pub const fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    pub const fn with_short_max_ms(mut self, short_max_ms: u64) -> Self {
        self.short_max_ms = short_max_ms;
        self
    }

    pub const fn with_long_min_ms(mut self, long_min_ms: u64) -> Self {
        self.long_min_ms = long_min_ms;
        self
    }
}

/// Debounces raw samples and classifies each press on release.
///
/// Presses between the short and long limits produce nothing.
#[derive(Debug, Clone, Copy)]
pub struct PressClassifier {
    config: ButtonConfig,
    raw: bool,
    raw_since_ms: u64,
    stable: bool,
    pressed_at_ms: Option<u64>,
}

impl PressClassifier {
    pub const fn new(config: ButtonConfig, initially_pressed: bool) -> Self {
        Self {
            config,
            raw: initially_pressed,
            raw_since_ms: 0,
            stable: initially_pressed,
            pressed_at_ms: None,
        }
    }

    pub const fn config(&self) -> &ButtonConfig {
        &self.config
    }

    /// Maps a pin level to "pressed" according to the wiring.
    pub const fn is_pressed_level(&self, level_high: bool) -> bool {
        level_high != self.config.active_low
    }

    pub fn update(&mut self, pressed: bool, now_ms: u64) -> Option<InputEvent> {
        if pressed != self.raw {
            self.raw = pressed;
            self.raw_since_ms = now_ms;
            return None;
        }

        if self.raw == self.stable
            || now_ms.saturating_sub(self.raw_since_ms) < self.config.debounce_ms
        {
            return None;
        }

        self.stable = self.raw;
        if self.stable {
            self.pressed_at_ms = Some(now_ms);
            return None;
        }

        let held_ms = now_ms.saturating_sub(self.pressed_at_ms.take()?);
        if held_ms >= self.config.long_min_ms {
            Some(InputEvent::LongPress)
        } else if held_ms <= self.config.short_max_ms {
            Some(InputEvent::ShortPress)
        } else {
            None
        }
    }
}
