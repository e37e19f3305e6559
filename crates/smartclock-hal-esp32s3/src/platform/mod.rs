pub mod display;
pub mod rng;
