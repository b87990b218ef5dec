//! Driver facade: the only surface an application talks to.
//!
//! Owns the engine behind its single mutex plus the output stream, and maps
//! the historical byte-status API onto a constructor returning a handle.
//! Only one driver may be open per process; registers, mute masks and DAC
//! submissions address chips by index and silently ignore out-of-range ids.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::info;
use thiserror::Error;

use crate::engine::{Engine, MAX_CHIPS};
use crate::resampler::ResampleMode;
use crate::stream::{OutputDevice, OutputStream};
use crate::wav_writer::WavWriter;

/// How the emulated chips' internal sample rate is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChipRateMode {
    /// the chip's own clock / 144
    #[default]
    Native,
    /// the higher of native and the custom rate
    Highest,
    /// always the custom rate
    Custom,
}

/// Configuration fixed at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    /// output device rate in Hz
    pub sample_rate: u32,
    pub resample_mode: ResampleMode,
    pub chip_rate_mode: ChipRateMode,
    /// custom chip rate for [`ChipRateMode::Highest`] / [`ChipRateMode::Custom`]
    pub chip_rate: u32,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            resample_mode: ResampleMode::default(),
            chip_rate_mode: ChipRateMode::default(),
            chip_rate: 44100,
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver is already open")]
    AlreadyOpen,
    #[error("requested {0} chips, at most 16 are supported")]
    TooManyChips(u8),
    #[error("sound device failed to open: {0}")]
    SoundDevice(#[from] io::Error),
}

/// One driver per process, like the hardware it pretends to be
static DRIVER_ACTIVE: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
pub struct OpnDriver {
    engine: Arc<Mutex<Engine>>,
    stream: OutputStream,
    options: DriverOptions,
}

impl OpnDriver {
    /// Open with the default output device: cpal when the `cpal-device`
    /// feature is enabled, otherwise a pacing null sink.
    pub fn open(options: DriverOptions, chips: u8) -> Result<OpnDriver, DriverError> {
        #[cfg(feature = "cpal-device")]
        let device: Box<dyn OutputDevice> = Box::new(crate::stream::CpalDevice);
        #[cfg(not(feature = "cpal-device"))]
        let device: Box<dyn OutputDevice> = Box::new(crate::stream::NullDevice);

        Self::open_with_device(options, chips, device)
    }

    /// Open against a caller-supplied device. The driver comes up paused;
    /// the first key-on or DAC sample starts the stream.
    pub fn open_with_device(
        options: DriverOptions,
        chips: u8,
        device: Box<dyn OutputDevice>,
    ) -> Result<OpnDriver, DriverError> {
        if DRIVER_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(DriverError::AlreadyOpen);
        }
        if chips as usize > MAX_CHIPS {
            DRIVER_ACTIVE.store(false, Ordering::SeqCst);
            return Err(DriverError::TooManyChips(chips));
        }

        let engine = Arc::new(Mutex::new(Engine::new(&options, chips)));
        let stream = match OutputStream::start(engine.clone(), device, options.sample_rate) {
            Ok(stream) => stream,
            Err(err) => {
                DRIVER_ACTIVE.store(false, Ordering::SeqCst);
                return Err(DriverError::SoundDevice(err));
            }
        };

        info!("driver open: {} chip(s), {} Hz output", chips, options.sample_rate);
        Ok(OpnDriver { engine, stream, options })
    }

    pub fn options(&self) -> DriverOptions {
        self.options
    }

    pub fn is_paused(&self) -> bool {
        self.stream.is_paused()
    }

    /// Stop the stream, drain the device, tear down chip state
    pub fn close(self) {
        /* Drop does the work */
    }

    /// Close without draining the device; for host teardown paths where a
    /// blocking drain would hang the process
    pub fn close_unload(mut self) {
        self.stream.stop(true);
    }

    /// Write `data` to a chip register. The high byte of `reg` selects the
    /// port, the low byte is the register address.
    pub fn write(&self, chip: u8, reg: u16, data: u8) {
        let resume = match self.engine.lock() {
            Ok(mut engine) => engine.write(chip, reg, data),
            Err(_) => false,
        };
        if resume {
            self.stream.set_paused(false);
        }
    }

    /// Mute channels (bits 0..5) and/or the DAC (bit 6) of one chip
    pub fn mute(&self, chip: u8, mask: u8) {
        if let Ok(mut engine) = self.engine.lock() {
            engine.set_mute(chip, mask);
        }
    }

    /// Stream an unsigned 8-bit PCM buffer into the chip's DAC.
    /// `frequency == 0` reuses the previously configured rate.
    pub fn play_dac_sample(&self, chip: u8, data: Arc<[u8]>, frequency: u32) {
        let resume = match self.engine.lock() {
            Ok(mut engine) => engine.play_dac_sample(chip, data, frequency),
            Err(_) => false,
        };
        if resume {
            self.stream.set_paused(false);
        }
    }

    pub fn set_dac_frequency(&self, chip: u8, frequency: u32) {
        if let Ok(mut engine) = self.engine.lock() {
            engine.set_dac_frequency(chip, frequency);
        }
    }

    /// Q8 DAC volume, 0x100 = unity
    pub fn set_dac_volume(&self, chip: u8, volume: u16) {
        if let Ok(mut engine) = self.engine.lock() {
            engine.set_dac_volume(chip, volume);
        }
    }

    /// Start capturing the mixed output into a WAV file
    pub fn enable_capture<P: AsRef<std::path::Path>>(&self, path: P) -> io::Result<()> {
        let writer = WavWriter::create(path, self.options.sample_rate)?;
        if let Ok(mut engine) = self.engine.lock() {
            engine.enable_capture(writer);
        }
        Ok(())
    }

    pub fn disable_capture(&self) {
        if let Ok(mut engine) = self.engine.lock() {
            engine.disable_capture();
        }
    }

    /// Copy of a chip's register shadow, for state inspection
    pub fn register_shadow(&self, chip: u8) -> Option<[u8; 512]> {
        self.engine
            .lock()
            .ok()
            .and_then(|engine| engine.chip(chip).map(|c| *c.register_shadow()))
    }
}

impl Drop for OpnDriver {
    fn drop(&mut self) {
        self.stream.stop(false);
        DRIVER_ACTIVE.store(false, Ordering::SeqCst);
        info!("driver closed");
    }
}
