use embedded_hal::digital::InputPin;
use smartclock_core::button::{ButtonConfig, InputEvent, InputProvider, PressClassifier};

#[derive(Debug)]
pub enum ButtonInputError<E> {
    Pin(E),
}

/// Front push button, sampled from the main loop.
#[derive(Debug)]
pub struct ButtonInput<P> {
    pin: P,
    classifier: PressClassifier,
}

impl<P: InputPin> ButtonInput<P> {
    pub fn new(mut pin: P, config: ButtonConfig) -> Result<Self, ButtonInputError<P::Error>> {
        let level_high = pin.is_high().map_err(ButtonInputError::Pin)?;
        let pressed = PressClassifier::new(config, false).is_pressed_level(level_high);
        // A button held through reset must be released before it counts.
        let classifier = PressClassifier::new(config, pressed);
        Ok(Self { pin, classifier })
    }
}

impl<P: InputPin> InputProvider for ButtonInput<P> {
    type Error = ButtonInputError<P::Error>;

    fn poll_event(&mut self, now_ms: u64) -> Result<Option<InputEvent>, Self::Error> {
        let level_high = self.pin.is_high().map_err(ButtonInputError::Pin)?;
        let pressed = self.classifier.is_pressed_level(level_high);
        Ok(self.classifier.update(pressed, now_ms))
    }
}
