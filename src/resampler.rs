//! Per-chip rate conversion between the chip's native rate and the output
//! device rate.
//!
//! Four strategies are available and one is chosen per chip when the driver
//! opens: nearest/averaging (fast, low quality), linear upsampling, plain
//! copying for matched rates, and an energy-preserving weighted-integral
//! downsampler. All arithmetic is 11-bit fixed point.

use crate::chip::Ym2612;

/// Fixed-point precision of the resampling position
pub const FIXPNT_BITS: u32 = 11;
pub const FIXPNT_FACT: u32 = 1 << FIXPNT_BITS;
pub const FIXPNT_MASK: u32 = FIXPNT_FACT - 1;

/// Capacity of the shared render buffers, in samples
pub const SCRATCH_LEN: usize = 0x100;

/// One stereo sample in the 32-bit mixing domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stereo32 {
    pub left: i32,
    pub right: i32,
}

/// Scratch buffers the resampler renders chip output into; owned by the
/// engine and shared by all chips under its lock.
#[derive(Debug)]
pub struct Scratch {
    pub left: [i32; SCRATCH_LEN],
    pub right: [i32; SCRATCH_LEN],
}

impl Scratch {
    pub fn new() -> Self {
        Self { left: [0; SCRATCH_LEN], right: [0; SCRATCH_LEN] }
    }
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything that can produce native-rate stereo samples on demand
pub trait SampleSource {
    fn render(&mut self, out_l: &mut [i32], out_r: &mut [i32]);
}

impl SampleSource for Ym2612 {
    fn render(&mut self, out_l: &mut [i32], out_r: &mut [i32]) {
        self.update(out_l, out_r);
    }
}

/// User preference for the rate-conversion quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleMode {
    /// precise up- and downsampling
    #[default]
    High,
    /// averaging downsampler, precise upsampler
    LqDown,
    /// averaging in both directions
    Low,
}

/// Strategy picked for one chip from its rate ratio and the quality mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplerKind {
    Average,
    Upsample,
    Copy,
    Downsample,
    /// chip produced no rate; never mixed
    Skip,
}

#[derive(Debug)]
pub struct ChipResampler {
    kind: ResamplerKind,
    /// chip (input) rate in Hz
    smp_rate: u32,
    /// device (output) rate in Hz
    out_rate: u32,
    /// Q8 volume, 0x100 = unity
    volume: u16,

    /// current output sample number
    smp_p: u32,
    /// input cursors bracketing the current output position
    smp_last: u32,
    smp_next: u32,
    /// one-sample history for interpolation
    last: Stereo32,
    next: Stereo32,
}

impl ChipResampler {
    pub fn new(smp_rate: u32, out_rate: u32, mode: ResampleMode) -> Self {
        let mut kind = if smp_rate == 0 {
            ResamplerKind::Skip
        } else if smp_rate < out_rate {
            ResamplerKind::Upsample
        } else if smp_rate == out_rate {
            ResamplerKind::Copy
        } else {
            ResamplerKind::Downsample
        };

        if kind != ResamplerKind::Skip
            && ((mode == ResampleMode::LqDown && kind == ResamplerKind::Downsample)
                || mode == ResampleMode::Low)
        {
            kind = ResamplerKind::Average;
        }

        Self {
            kind,
            smp_rate,
            out_rate,
            volume: 0x100,
            smp_p: 0,
            smp_last: 0,
            smp_next: 0,
            last: Stereo32::default(),
            next: Stereo32::default(),
        }
    }

    pub fn kind(&self) -> ResamplerKind {
        self.kind
    }

    pub fn set_volume(&mut self, volume: u16) {
        self.volume = volume;
    }

    /// The upsampler interpolates toward a sample it has not emitted yet, so
    /// it starts one sample ahead.
    pub fn prime<S: SampleSource>(&mut self, src: &mut S, scratch: &mut Scratch) {
        if self.kind == ResamplerKind::Upsample {
            src.render(&mut scratch.left[..1], &mut scratch.right[..1]);
            self.next = Stereo32 { left: scratch.left[0], right: scratch.right[0] };
        }
    }

    /// Resample one output frame worth of chip output and accumulate it,
    /// scaled by the chip volume, into `out`.
    pub fn resample_frame<S: SampleSource>(
        &mut self,
        src: &mut S,
        scratch: &mut Scratch,
        out: &mut Stereo32,
    ) {
        let fi = self.smp_rate as u64;
        let fo = self.out_rate as u64;
        let volume = self.volume as i64;

        match self.kind {
            ResamplerKind::Average => {
                self.smp_last = self.smp_next;
                self.smp_p += 1;
                self.smp_next = (self.smp_p as u64 * fi / fo) as u32;

                if self.smp_last >= self.smp_next {
                    out.left += self.last.left * self.volume as i32;
                    out.right += self.last.right * self.volume as i32;
                } else {
                    let n = ((self.smp_next - self.smp_last) as usize).min(SCRATCH_LEN);
                    src.render(&mut scratch.left[..n], &mut scratch.right[..n]);

                    match n {
                        1 => {
                            out.left += scratch.left[0] * self.volume as i32;
                            out.right += scratch.right[0] * self.volume as i32;
                        }
                        2 => {
                            out.left +=
                                ((scratch.left[0] + scratch.left[1]) * self.volume as i32) >> 1;
                            out.right +=
                                ((scratch.right[0] + scratch.right[1]) * self.volume as i32) >> 1;
                        }
                        _ => {
                            let sum_l: i64 = scratch.left[..n].iter().map(|&s| s as i64).sum();
                            let sum_r: i64 = scratch.right[..n].iter().map(|&s| s as i64).sum();
                            out.left += (sum_l * volume / n as i64) as i32;
                            out.right += (sum_r * volume / n as i64) as i32;
                        }
                    }
                    self.last = Stereo32 { left: scratch.left[n - 1], right: scratch.right[n - 1] };
                }
            }

            ResamplerKind::Upsample => {
                let in_pos_l = FIXPNT_FACT as u64 * self.smp_p as u64 * fi / fo;
                let in_pre = (in_pos_l >> FIXPNT_BITS) as u32;
                let in_now = ((in_pos_l + FIXPNT_MASK as u64) >> FIXPNT_BITS) as u32;

                scratch.left[0] = self.last.left;
                scratch.right[0] = self.last.right;
                scratch.left[1] = self.next.left;
                scratch.right[1] = self.next.right;

                let req = ((in_now - self.smp_next) as usize).min(SCRATCH_LEN - 2);
                src.render(&mut scratch.left[2..2 + req], &mut scratch.right[2..2 + req]);

                /* base offset by 1.0 so the history samples sit below it;
                   the cursor can trail the pregenerated sample, so this is
                   a wrapping difference in (-1.0, 1.0) around the offset */
                let in_base = FIXPNT_FACT.wrapping_add(
                    in_pos_l.wrapping_sub(self.smp_next as u64 * FIXPNT_FACT as u64) as u32,
                );
                self.smp_last = in_pre;
                self.smp_next = in_now;

                let in_pos = in_base;
                let ipre = (in_pos >> FIXPNT_BITS) as usize;
                let inow = ((in_pos + FIXPNT_MASK) >> FIXPNT_BITS) as usize;
                let frc = (in_pos & FIXPNT_MASK) as i64;

                let t_l = scratch.left[ipre] as i64 * (FIXPNT_FACT as i64 - frc)
                    + scratch.left[inow] as i64 * frc;
                let t_r = scratch.right[ipre] as i64 * (FIXPNT_FACT as i64 - frc)
                    + scratch.right[inow] as i64 * frc;
                out.left += (t_l * volume / FIXPNT_FACT as i64) as i32;
                out.right += (t_r * volume / FIXPNT_FACT as i64) as i32;

                self.last = Stereo32 { left: scratch.left[ipre], right: scratch.right[ipre] };
                self.next = Stereo32 { left: scratch.left[inow], right: scratch.right[inow] };
                self.smp_p += 1;
            }

            ResamplerKind::Copy => {
                self.smp_next = (self.smp_p as u64 * fi / fo) as u32;
                src.render(&mut scratch.left[..1], &mut scratch.right[..1]);
                out.left += scratch.left[0] * self.volume as i32;
                out.right += scratch.right[0] * self.volume as i32;
                self.smp_p += 1;
                self.smp_last = self.smp_next;
            }

            ResamplerKind::Downsample => {
                let in_pos_next_l = FIXPNT_FACT as u64 * (self.smp_p as u64 + 1) * fi / fo;
                self.smp_next = ((in_pos_next_l + FIXPNT_MASK as u64) >> FIXPNT_BITS) as u32;

                scratch.left[0] = self.last.left;
                scratch.right[0] = self.last.right;
                let req = ((self.smp_next - self.smp_last) as usize).min(SCRATCH_LEN - 1);
                src.render(&mut scratch.left[1..1 + req], &mut scratch.right[1..1 + req]);

                let in_pos_l = FIXPNT_FACT as u64 * self.smp_p as u64 * fi / fo;
                /* offset by 1.0: the exact position sits at or below the
                   ceiling cursor, so the raw difference is non-positive */
                let in_base = FIXPNT_FACT.wrapping_add(
                    in_pos_l.wrapping_sub(self.smp_last as u64 * FIXPNT_FACT as u64) as u32,
                );

                let in_pos = in_base;
                let in_pos_next = in_base + (FIXPNT_FACT as u64 * fi / fo) as u32;

                let mut sum_l: i64 = 0;
                let mut sum_r: i64 = 0;

                /* fractional head */
                let frc_head = (FIXPNT_FACT - (in_pos & FIXPNT_MASK)) & FIXPNT_MASK;
                if frc_head != 0 {
                    let ipre = (in_pos >> FIXPNT_BITS) as usize;
                    sum_l += scratch.left[ipre] as i64 * frc_head as i64;
                    sum_r += scratch.right[ipre] as i64 * frc_head as i64;
                }
                let mut weight = frc_head as i64;

                /* fractional tail */
                let frc_tail = in_pos_next & FIXPNT_MASK;
                let ipre_t = (in_pos_next >> FIXPNT_BITS) as usize;
                if frc_tail != 0 {
                    sum_l += scratch.left[ipre_t] as i64 * frc_tail as i64;
                    sum_r += scratch.right[ipre_t] as i64 * frc_tail as i64;
                    weight += frc_tail as i64;
                }

                /* whole samples in between */
                let inow = ((in_pos + FIXPNT_MASK) >> FIXPNT_BITS) as usize;
                weight += (ipre_t - inow) as i64 * FIXPNT_FACT as i64;
                for k in inow..ipre_t {
                    sum_l += scratch.left[k] as i64 * FIXPNT_FACT as i64;
                    sum_r += scratch.right[k] as i64 * FIXPNT_FACT as i64;
                }

                out.left += (sum_l * volume / weight) as i32;
                out.right += (sum_r * volume / weight) as i32;

                /* on an exact sample boundary the floor lands one past the
                   generated span; the value is never mixed, only kept as
                   history, so clamp the index into the buffer */
                let hist = ipre_t.min(SCRATCH_LEN - 1);
                self.last = Stereo32 { left: scratch.left[hist], right: scratch.right[hist] };
                self.smp_p += 1;
                self.smp_last = self.smp_next;
            }

            ResamplerKind::Skip => return,
        }

        /* keep the input phase inside one second of chip time */
        if self.smp_last >= self.smp_rate {
            self.smp_last -= self.smp_rate;
            self.smp_next = self.smp_next.wrapping_sub(self.smp_rate);
            self.smp_p = self.smp_p.wrapping_sub(self.out_rate);
        }
    }
}
