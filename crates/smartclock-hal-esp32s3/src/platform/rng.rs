use esp_hal::rng::Rng;
use smartclock_core::connectivity::RandomSource;

/// Hardware RNG; only truly random while the radio is running.
pub struct HardwareRng(Rng);

impl HardwareRng {
    pub fn new(rng: Rng) -> Self {
        Self(rng)
    }
}

impl RandomSource for HardwareRng {
    fn next_u32(&mut self) -> u32 {
        self.0.random()
    }
}
