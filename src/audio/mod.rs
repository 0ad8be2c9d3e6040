pub mod decoder;
pub mod dsp;
pub mod engine;
pub mod resample;
pub mod ring;
pub mod sink;
