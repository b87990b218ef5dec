//! fmdrive - a real-time YM2612 (OPN2) FM synthesis driver
//!
//! Emulates up to sixteen YM2612 chips, mixes their stereo output through a
//! per-chip resampler into 16-bit PCM, and streams the result to an audio
//! device from a dedicated output thread. Register writes, mute masks and
//! DAC sample submissions arrive asynchronously from the application.

pub mod chip;
pub mod dac;
pub mod driver;
pub mod engine;
pub mod resampler;
pub mod stream;
pub mod wav_writer;

pub use chip::{Ym2612, YM2612_CLOCK};
pub use driver::{ChipRateMode, DriverError, DriverOptions, OpnDriver};
pub use engine::{Engine, MAX_CHIPS};
pub use resampler::ResampleMode;
pub use stream::{DeviceSink, NullDevice, OutputDevice};
