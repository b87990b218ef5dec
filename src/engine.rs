//! Mixer pipeline: owns the chips, their resamplers and DAC streamers, and
//! renders device buffers under the driver's single lock.
//!
//! One output frame is produced by advancing every DAC streamer, resampling
//! every chip into a 32-bit stereo accumulator, dropping 7 bits of headroom
//! and clipping to i16. A full second of strictly-zero frames parks the
//! pipeline behind a pause sentinel until a key-on write or a DAC submission
//! wakes it.

use std::sync::Arc;

use log::debug;

use crate::chip::{Ym2612, CLOCK_DIVIDER, YM2612_CLOCK};
use crate::dac::DacStreamer;
use crate::driver::{ChipRateMode, DriverOptions};
use crate::resampler::{ChipResampler, Scratch, Stereo32};
use crate::wav_writer::WavWriter;

/// Hard limit on emulated chips per driver
pub const MAX_CHIPS: usize = 16;

/// `null_samples` value marking a paused pipeline
pub const PAUSED_SENTINEL: u32 = u32::MAX;

#[derive(Debug)]
struct ChipSlot {
    chip: Ym2612,
    resampler: ChipResampler,
    dac: DacStreamer,
}

#[derive(Debug)]
pub struct Engine {
    sample_rate: u32,
    chips: Vec<ChipSlot>,
    scratch: Scratch,
    /// consecutive all-zero output frames; [`PAUSED_SENTINEL`] while parked
    null_samples: u32,
    capture: Option<WavWriter>,
}

fn clamp16(value: i32) -> i16 {
    value.clamp(-0x8000, 0x7fff) as i16
}

impl Engine {
    /// Build `n_chips` chips with their resamplers primed. The pipeline
    /// starts parked; the first key-on or DAC submission activates it.
    pub fn new(opts: &DriverOptions, n_chips: u8) -> Self {
        let native = YM2612_CLOCK / CLOCK_DIVIDER;
        let chip_rate = match opts.chip_rate_mode {
            ChipRateMode::Native => native,
            ChipRateMode::Highest => native.max(opts.chip_rate),
            ChipRateMode::Custom => opts.chip_rate,
        };

        let mut engine = Self {
            sample_rate: opts.sample_rate,
            chips: (0..n_chips)
                .map(|_| ChipSlot {
                    chip: Ym2612::new(YM2612_CLOCK, chip_rate),
                    resampler: ChipResampler::new(chip_rate, opts.sample_rate, opts.resample_mode),
                    dac: DacStreamer::new(),
                })
                .collect(),
            scratch: Scratch::new(),
            null_samples: PAUSED_SENTINEL,
            capture: None,
        };

        let scratch = &mut engine.scratch;
        for slot in engine.chips.iter_mut() {
            slot.resampler.prime(&mut slot.chip, scratch);
        }

        engine
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn chip_count(&self) -> usize {
        self.chips.len()
    }

    /// Read-only view of one chip, e.g. for register-shadow inspection
    pub fn chip(&self, chip_id: u8) -> Option<&Ym2612> {
        self.chips.get(chip_id as usize).map(|slot| &slot.chip)
    }

    pub fn is_parked(&self) -> bool {
        self.null_samples == PAUSED_SENTINEL
    }

    /// Render interleaved stereo frames into `out`. Returns true when the
    /// silence threshold was crossed and the caller should pause the stream.
    pub fn fill_buffer(&mut self, out: &mut [i16]) -> bool {
        let frames = out.len() / 2;

        for f in 0..frames {
            let mut acc = Stereo32::default();

            for slot in self.chips.iter_mut() {
                if slot.dac.advance(&mut slot.chip) {
                    /* an audible DAC keeps the pipeline running */
                    self.null_samples = 0;
                }
            }

            let scratch = &mut self.scratch;
            for slot in self.chips.iter_mut() {
                slot.resampler.resample_frame(&mut slot.chip, scratch, &mut acc);
            }

            /* drop the volume scale and mixing headroom */
            let left = clamp16(acc.left >> 7);
            let right = clamp16(acc.right >> 7);
            if left == 0 && right == 0 {
                self.null_samples = self.null_samples.saturating_add(1);
            } else {
                self.null_samples = 0;
            }

            out[f * 2] = left;
            out[f * 2 + 1] = right;
        }

        if let Some(writer) = self.capture.as_mut() {
            let _ = writer.write_frames(&out[..frames * 2]);
        }

        if self.null_samples != PAUSED_SENTINEL && self.null_samples >= self.sample_rate {
            self.null_samples = PAUSED_SENTINEL;
            debug!("pipeline silent for a second, parking");
            return true;
        }
        false
    }

    /// Apply a register write. `reg`'s high byte selects the port. Returns
    /// true when the write should resume a paused stream.
    pub fn write(&mut self, chip_id: u8, reg: u16, data: u8) -> bool {
        if chip_id as usize >= self.chips.len() {
            return false;
        }

        let mut resume = false;
        if reg == 0x28 && data & 0xf0 != 0 {
            /* key-on: wake the pipeline */
            self.null_samples = 0;
            resume = true;
        }

        if self.null_samples == PAUSED_SENTINEL {
            /* flush one sample so envelope and phase state settle against
               the old registers before the write lands */
            self.chips[chip_id as usize]
                .chip
                .update(&mut self.scratch.left[..1], &mut self.scratch.right[..1]);
        }

        let port = ((reg >> 8) & 1) as u8;
        let slot = &mut self.chips[chip_id as usize];
        slot.chip.write(port << 1, reg as u8);
        slot.chip.write((port << 1) | 1, data);

        resume
    }

    pub fn set_mute(&mut self, chip_id: u8, mask: u8) {
        if let Some(slot) = self.chips.get_mut(chip_id as usize) {
            slot.chip.set_mute_mask(mask);
        }
    }

    /// Install a DAC sample. Returns true when the stream should resume.
    pub fn play_dac_sample(&mut self, chip_id: u8, data: Arc<[u8]>, frequency: u32) -> bool {
        let out_rate = self.sample_rate;
        let Some(slot) = self.chips.get_mut(chip_id as usize) else {
            return false;
        };

        debug!("chip {}: DAC sample, {} bytes", chip_id, data.len());
        slot.dac.play(data, frequency, out_rate);
        self.null_samples = 0;
        true
    }

    pub fn set_dac_frequency(&mut self, chip_id: u8, frequency: u32) {
        let out_rate = self.sample_rate;
        if let Some(slot) = self.chips.get_mut(chip_id as usize) {
            slot.dac.set_frequency(frequency, out_rate);
        }
    }

    pub fn set_dac_volume(&mut self, chip_id: u8, volume: u16) {
        if let Some(slot) = self.chips.get_mut(chip_id as usize) {
            slot.dac.set_volume(volume);
        }
    }

    pub fn enable_capture(&mut self, writer: WavWriter) {
        self.capture = Some(writer);
    }

    pub fn disable_capture(&mut self) {
        self.capture = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(rate: u32) -> DriverOptions {
        DriverOptions { sample_rate: rate, ..DriverOptions::default() }
    }

    fn custom_rate_opts(rate: u32) -> DriverOptions {
        DriverOptions {
            sample_rate: rate,
            chip_rate_mode: ChipRateMode::Custom,
            chip_rate: rate,
            ..DriverOptions::default()
        }
    }

    #[test]
    fn test_clamp16_boundaries() {
        assert_eq!(clamp16(0x7fff), 0x7fff);
        assert_eq!(clamp16(-0x8000), -0x8000);
        assert_eq!(clamp16(0x10000), 0x7fff);
        assert_eq!(clamp16(-0x10000), -0x8000);
        assert_eq!(clamp16(123), 123);
    }

    #[test]
    fn test_silence_parks_after_one_second() {
        let mut engine = Engine::new(&opts(1000), 1);
        engine.null_samples = 0; /* activate */

        let mut buf = vec![0i16; 2 * 999];
        assert!(!engine.fill_buffer(&mut buf), "below the threshold");
        assert!(!engine.is_parked());

        let mut one = [0i16; 2];
        assert!(engine.fill_buffer(&mut one), "exactly one second of silence");
        assert!(engine.is_parked());
        assert!(buf.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_keyon_write_resumes() {
        let mut engine = Engine::new(&opts(1000), 1);
        assert!(engine.is_parked());

        assert!(!engine.write(0, 0x28, 0x00), "key-off mask must not resume");
        assert!(engine.is_parked());

        assert!(engine.write(0, 0x28, 0xF0), "key-on mask resumes");
        assert!(!engine.is_parked());
    }

    #[test]
    fn test_out_of_range_chip_is_noop() {
        let mut engine = Engine::new(&opts(1000), 2);

        assert!(!engine.write(2, 0x28, 0xF0));
        assert!(engine.is_parked(), "out-of-range write must not touch state");
        engine.set_mute(2, 0x7f);
        assert!(!engine.play_dac_sample(2, Arc::from(vec![0x80u8].into_boxed_slice()), 8000));

        /* the last valid id works */
        assert!(engine.write(1, 0x28, 0xF0));
    }

    #[test]
    fn test_dac_keeps_pipeline_active() {
        let mut engine = Engine::new(&opts(16000), 1);

        engine.write(0, 0x2B, 0x80);
        let data: Arc<[u8]> = Arc::from(vec![0xFF; 64].into_boxed_slice());
        assert!(engine.play_dac_sample(0, data, 16000));

        let mut buf = vec![0i16; 2 * 32];
        engine.fill_buffer(&mut buf);
        assert!(!engine.is_parked());
        assert!(buf.iter().any(|&s| s != 0), "DAC bytes must reach the output");
    }

    #[test]
    fn test_dac_output_level_after_headroom_shift() {
        /* matched rates so the mix is exact: full-positive DAC byte is
           8128 in the chip, times the Q8 unity volume, over the 7-bit
           headroom shift */
        let mut engine = Engine::new(&custom_rate_opts(44100), 1);

        engine.write(0, 0x2B, 0x80);
        engine.write(0, 0x2A, 0xFF);
        engine.null_samples = 0;

        let mut buf = [0i16; 2];
        engine.fill_buffer(&mut buf);
        assert_eq!(buf[0] as i32, (8128 * 0x100) >> 7);
        assert_eq!(buf[1] as i32, (8128 * 0x100) >> 7);
    }

    #[test]
    fn test_write_while_parked_flushes_safely() {
        let mut engine = Engine::new(&opts(44100), 1);
        assert!(engine.is_parked());

        /* non-key writes keep the pipeline parked but must not corrupt it */
        engine.write(0, 0x30, 0x71);
        engine.write(0, 0x40, 0x10);
        assert!(engine.is_parked());

        assert!(engine.write(0, 0x28, 0x10));
        let mut buf = vec![0i16; 2 * 64];
        engine.fill_buffer(&mut buf);
    }

    #[test]
    fn test_mute_mask_silences_channels() {
        let mut engine = Engine::new(&custom_rate_opts(44100), 1);
        engine.write(0, 0x2B, 0x80);
        engine.write(0, 0x2A, 0xFF);
        engine.null_samples = 0;

        engine.set_mute(0, 0x40);
        let mut buf = [0i16; 2];
        engine.fill_buffer(&mut buf);
        assert_eq!(buf, [0, 0]);
    }
}
