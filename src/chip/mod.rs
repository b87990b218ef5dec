//! Yamaha YM2612 (OPN2) FM Synthesizer
//!
//! Six 4-operator FM channels with a 5-state envelope generator, SSG-EG
//! envelope shapes, LFO (AM + PM), 3-slot/CSM mode for channel 3, the
//! channel-6 DAC substitute, and the 8 operator routings.
//!
//! All DSP is exact integer arithmetic over the precomputed tables in
//! [`tables`]; samples are produced at the chip's native rate (clock / 144).

pub mod tables;

#[cfg(test)]
mod tests_envelope;
#[cfg(test)]
mod tests_register;

use serde::{Deserialize, Serialize};

use tables::*;

/// Master clock of the YM2612 as used on the Mega Drive
pub const YM2612_CLOCK: u32 = 7_670_454;

/// Clock divider between master clock and sample output
pub const CLOCK_DIVIDER: u32 = 144;

/* ========================================================================= */
/*  Serde helper for the 512-byte register shadow                            */
/* ========================================================================= */

mod register_file {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(data: &[u8; 512], serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        data.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 512], D::Error>
    where D: Deserializer<'de> {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("register shadow must be 512 bytes"))
    }
}

/* ========================================================================= */
/*  Envelope generator state                                                 */
/* ========================================================================= */

/// Envelope phases, ordered so that `state > Release` means "key is sounding"
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EgState {
    Off,
    Release,
    Sustain,
    Decay,
    Attack,
}

/* ========================================================================= */
/*  FM Operator (SLOT)                                                       */
/* ========================================================================= */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    /* register-derived parameters */
    dt: u8,        // detune row (0..7) in the per-chip detune table
    ksr_shift: u8, // 3 - KS
    ar: u32,       // attack rate (0 or 32 + 2*AR)
    d1r: u32,      // decay rate
    d2r: u32,      // sustain rate
    rr: u32,       // release rate (34 + 4*RR)
    mul: u32,      // multiple * 2, or 1 for MUL=0

    /* phase generator */
    phase: u32,
    incr: i32,

    /* envelope generator */
    state: EgState,
    tl: u32,      // total level << 3
    volume: i32,  // attenuation counter, 0..1023
    sl: u32,      // sustain level from SL_TAB
    vol_out: u32, // EG output (attenuation + TL, SSG inversion applied)
    ksr: u8,      // kcode >> ksr_shift

    /* per-state rate lookups, refreshed when KSR output changes */
    eg_sh_ar: u8,
    eg_sel_ar: u8,
    eg_sh_d1r: u8,
    eg_sel_d1r: u8,
    eg_sh_d2r: u8,
    eg_sel_d2r: u8,
    eg_sh_rr: u8,
    eg_sel_rr: u8,

    /* SSG-EG */
    ssg: u8,  // waveform select (4 bits)
    ssgn: u8, // inversion flag (0 or 4)

    key: bool,
    am_mask: u32, // all-ones when LFO AM reaches this operator
}

impl Operator {
    fn new() -> Self {
        Self {
            dt: 0,
            ksr_shift: 3,
            ar: 0,
            d1r: 0,
            d2r: 0,
            rr: 34,
            mul: 1,
            phase: 0,
            incr: 0,
            state: EgState::Off,
            tl: 0,
            volume: MAX_ATT_INDEX,
            sl: 0,
            vol_out: MAX_ATT_INDEX as u32,
            ksr: 0,
            eg_sh_ar: 0,
            eg_sel_ar: 0,
            eg_sh_d1r: 0,
            eg_sel_d1r: 0,
            eg_sh_d2r: 0,
            eg_sel_d2r: 0,
            eg_sh_rr: 0,
            eg_sel_rr: 0,
            ssg: 0,
            ssgn: 0,
            key: false,
            am_mask: 0,
        }
    }

    /// EG output with SSG-EG inversion applied
    fn recalc_vol_out(&mut self) {
        if self.ssg & 0x08 != 0 && (self.ssgn ^ (self.ssg & 0x04)) != 0 {
            self.vol_out = ((0x200 - self.volume) & MAX_ATT_INDEX) as u32 + self.tl;
        } else {
            self.vol_out = self.volume as u32 + self.tl;
        }
    }

    fn key_on(&mut self, csm_active: bool) {
        if !self.key && !csm_active {
            /* restart phase generator, reset SSG-EG inversion */
            self.phase = 0;
            self.ssgn = 0;

            if self.ar + (self.ksr as u32) < 94 {
                self.state = if self.volume <= MIN_ATT_INDEX {
                    if self.sl == 0 { EgState::Sustain } else { EgState::Decay }
                } else {
                    EgState::Attack
                };
            } else {
                /* maximal attack rate: skip the attack phase entirely */
                self.volume = MIN_ATT_INDEX;
                self.state = if self.sl == 0 { EgState::Sustain } else { EgState::Decay };
            }

            self.recalc_vol_out();
        }
        self.key = true;
    }

    fn key_off(&mut self, csm_active: bool) {
        if self.key && !csm_active {
            self.release();
        }
        self.key = false;
    }

    /// Key-off issued when the CSM window closes; only slots the application
    /// never keyed itself are released.
    fn key_off_csm(&mut self) {
        if !self.key {
            self.release();
        }
    }

    fn release(&mut self) {
        if self.state > EgState::Release {
            self.state = EgState::Release;

            if self.ssg & 0x08 != 0 {
                /* fold the SSG-EG inversion into the attenuation level */
                if (self.ssgn ^ (self.ssg & 0x04)) != 0 {
                    self.volume = 0x200 - self.volume;
                }
                if self.volume >= 0x200 {
                    self.volume = MAX_ATT_INDEX;
                    self.state = EgState::Off;
                }
                self.vol_out = self.volume as u32 + self.tl;
            }
        }
    }

    fn set_det_mul(&mut self, v: u8) {
        self.mul = if v & 0x0f != 0 { (v as u32 & 0x0f) * 2 } else { 1 };
        self.dt = (v >> 4) & 7;
    }

    fn set_tl(&mut self, v: u8) {
        self.tl = ((v & 0x7f) as u32) << (ENV_BITS - 7);

        if self.ssg & 0x08 != 0
            && (self.ssgn ^ (self.ssg & 0x04)) != 0
            && self.state > EgState::Release
        {
            self.vol_out = ((0x200 - self.volume) & MAX_ATT_INDEX) as u32 + self.tl;
        } else {
            self.vol_out = self.volume as u32 + self.tl;
        }
    }

    /// Returns true when the KSR output changed, which dirties the channel
    fn set_ar_ksr(&mut self, v: u8) -> bool {
        let old_shift = self.ksr_shift;

        self.ar = if v & 0x1f != 0 { 32 + ((v as u32 & 0x1f) << 1) } else { 0 };
        self.ksr_shift = 3 - (v >> 6);

        /* AR rates must be refreshed even when KSR did not change; the
           keycode may be stale otherwise */
        if self.ar + (self.ksr as u32) < 94 {
            self.eg_sh_ar = EG_RATE_SHIFT[(self.ar + self.ksr as u32) as usize];
            self.eg_sel_ar = EG_RATE_SELECT[(self.ar + self.ksr as u32) as usize];
        } else {
            self.eg_sh_ar = 0;
            self.eg_sel_ar = (18 * RATE_STEPS) as u8;
        }

        self.ksr_shift != old_shift
    }

    fn set_dr(&mut self, v: u8) {
        self.d1r = if v & 0x1f != 0 { 32 + ((v as u32 & 0x1f) << 1) } else { 0 };
        self.eg_sh_d1r = EG_RATE_SHIFT[(self.d1r + self.ksr as u32) as usize];
        self.eg_sel_d1r = EG_RATE_SELECT[(self.d1r + self.ksr as u32) as usize];
    }

    fn set_sr(&mut self, v: u8) {
        self.d2r = if v & 0x1f != 0 { 32 + ((v as u32 & 0x1f) << 1) } else { 0 };
        self.eg_sh_d2r = EG_RATE_SHIFT[(self.d2r + self.ksr as u32) as usize];
        self.eg_sel_d2r = EG_RATE_SELECT[(self.d2r + self.ksr as u32) as usize];
    }

    fn set_sl_rr(&mut self, v: u8) {
        self.sl = SL_TAB[(v >> 4) as usize];

        if self.state == EgState::Decay && self.volume >= self.sl as i32 {
            self.state = EgState::Sustain;
        }

        self.rr = 34 + ((v as u32 & 0x0f) << 2);
        self.eg_sh_rr = EG_RATE_SHIFT[(self.rr + self.ksr as u32) as usize];
        self.eg_sel_rr = EG_RATE_SELECT[(self.rr + self.ksr as u32) as usize];
    }
}

/* ========================================================================= */
/*  Operator output routing                                                  */
/* ========================================================================= */

/// Destination of an operator's output within one sample
#[derive(Debug, Clone, Copy)]
enum Route {
    /// modulation input of SLOT3
    M2,
    /// modulation input of SLOT2
    C1,
    /// modulation input of SLOT4
    C2,
    /// one-sample delay register
    Mem,
    /// channel accumulator
    Out,
}

/// Per-algorithm routing: where SLOT1/2/3 send their output and where the
/// delayed MEM sample is restored. SLOT4 always feeds the accumulator.
/// `s1_splits` marks algorithm 5, where SLOT1 modulates all three carriers.
#[derive(Debug, Clone, Copy)]
struct AlgoRouting {
    s1: Route,
    s2: Route,
    s3: Route,
    mem: Route,
    s1_splits: bool,
}

const ALGO_ROUTING: [AlgoRouting; 8] = [
    /* 0: M1->C1->MEM->M2->C2->OUT */
    AlgoRouting { s1: Route::C1, s2: Route::Mem, s3: Route::C2, mem: Route::M2, s1_splits: false },
    /* 1: (M1+C1)->MEM->M2->C2->OUT */
    AlgoRouting { s1: Route::Mem, s2: Route::Mem, s3: Route::C2, mem: Route::M2, s1_splits: false },
    /* 2: (C1->MEM->M2 + M1)->C2->OUT */
    AlgoRouting { s1: Route::C2, s2: Route::Mem, s3: Route::C2, mem: Route::M2, s1_splits: false },
    /* 3: (M1->C1->MEM + M2)->C2->OUT */
    AlgoRouting { s1: Route::C1, s2: Route::Mem, s3: Route::C2, mem: Route::C2, s1_splits: false },
    /* 4: (M1->C1) + (M2->C2)->OUT; MEM parked */
    AlgoRouting { s1: Route::C1, s2: Route::Out, s3: Route::C2, mem: Route::Mem, s1_splits: false },
    /* 5: M1->(C1, M2, C2)->OUT */
    AlgoRouting { s1: Route::C1, s2: Route::Out, s3: Route::Out, mem: Route::M2, s1_splits: true },
    /* 6: M1->C1 + M2 + C2->OUT; MEM parked */
    AlgoRouting { s1: Route::C1, s2: Route::Out, s3: Route::Out, mem: Route::Mem, s1_splits: false },
    /* 7: M1 + C1 + M2 + C2->OUT; MEM parked */
    AlgoRouting { s1: Route::Out, s2: Route::Out, s3: Route::Out, mem: Route::Mem, s1_splits: false },
];

/// Intermediate sums one channel works with during a sample
#[derive(Default)]
struct OpSums {
    m2: i32,
    c1: i32,
    c2: i32,
    mem: i32,
    out: i32,
}

impl OpSums {
    fn add(&mut self, route: Route, value: i32) {
        match route {
            Route::M2 => self.m2 += value,
            Route::C1 => self.c1 += value,
            Route::C2 => self.c2 += value,
            Route::Mem => self.mem += value,
            Route::Out => self.out += value,
        }
    }
}

/* ========================================================================= */
/*  FM Channel                                                               */
/* ========================================================================= */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    slots: [Operator; 4],

    algo: u8,
    fb_shift: u8,      // 0 when feedback is off, else FB + 6
    op1_out: [i32; 2], // SLOT1 output history for feedback
    mem_value: i32,    // one-sample delay latch

    pms: i32, // PM depth * 32 (offset into the PM table)
    ams: u8,  // AM depth shift

    fc: u32,        // fnum.blk adjusted to the sample rate
    kcode: u8,      // 5-bit key code
    block_fnum: u32, // raw blk/fnum for LFO PM
    muted: bool,

    /// Raised by any write that invalidates the phase increments; consumed
    /// at the start of the next update batch.
    freq_dirty: bool,
}

impl Channel {
    fn new() -> Self {
        Self {
            slots: [Operator::new(), Operator::new(), Operator::new(), Operator::new()],
            algo: 0,
            fb_shift: 0,
            op1_out: [0; 2],
            mem_value: 0,
            pms: 0,
            ams: 0,
            fc: 0,
            kcode: 0,
            block_fnum: 0,
            muted: false,
            freq_dirty: true,
        }
    }

    /// SSG-EG transition pass, executed before each sample. Inversion and
    /// attack re-entry only happen while the envelope sits in the upper half
    /// of its range with the key still sounding.
    fn update_ssg_eg(&mut self) {
        for slot in self.slots.iter_mut() {
            if slot.ssg & 0x08 == 0 || slot.volume < 0x200 || slot.state <= EgState::Release {
                continue;
            }

            if slot.ssg & 0x01 != 0 {
                /* hold shapes */
                if slot.ssg & 0x02 != 0 {
                    slot.ssgn = 4;
                }
                if slot.state != EgState::Attack && (slot.ssgn ^ (slot.ssg & 0x04)) == 0 {
                    slot.volume = MAX_ATT_INDEX;
                }
            } else {
                /* loop shapes: toggle inversion or restart the phase */
                if slot.ssg & 0x02 != 0 {
                    slot.ssgn ^= 4;
                } else {
                    slot.phase = 0;
                }

                /* retrigger, same rules as key-on */
                if slot.state != EgState::Attack {
                    if slot.ar + (slot.ksr as u32) < 94 {
                        slot.state = if slot.volume <= MIN_ATT_INDEX {
                            if slot.sl == 0 { EgState::Sustain } else { EgState::Decay }
                        } else {
                            EgState::Attack
                        };
                    } else {
                        slot.volume = MIN_ATT_INDEX;
                        slot.state = if slot.sl == 0 { EgState::Sustain } else { EgState::Decay };
                    }
                }
            }

            slot.recalc_vol_out();
        }
    }
}

/* ========================================================================= */
/*  3-slot mode state                                                        */
/* ========================================================================= */

/// Per-operator frequency control for channel 3 when 3-slot mode is active
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreeSlot {
    fc: [u32; 3],
    fn_h: u8,
    kcode: [u8; 3],
    block_fnum: [u32; 3],
    /// CSM key-on flag, shifted once per sample; bit 1 triggers the key-off
    key_csm: u8,
}

/* ========================================================================= */
/*  Free helpers over operators                                              */
/* ========================================================================= */

/// Operator output for SLOT2/3/4: modulation enters pre-scaled by 15 bits
fn op_calc(phase: u32, env: u32, pm: i32) -> i32 {
    let idx = ((phase & !FREQ_MASK).wrapping_add((pm as u32).wrapping_shl(15)) as i32
        >> FREQ_SH) as usize
        & SIN_MASK;
    let p = (env << 3) + SIN_TAB[idx];
    if p as usize >= TL_TAB_LEN { 0 } else { TL_TAB[p as usize] }
}

/// SLOT1 variant: the feedback path arrives already shifted
fn op_calc_fb(phase: u32, env: u32, pm: i32) -> i32 {
    let idx =
        ((phase & !FREQ_MASK).wrapping_add(pm as u32) as i32 >> FREQ_SH) as usize & SIN_MASK;
    let p = (env << 3) + SIN_TAB[idx];
    if p as usize >= TL_TAB_LEN { 0 } else { TL_TAB[p as usize] }
}

/// Advance the envelope of all four operators of one channel.
/// Runs once per EG tick (every 3 samples).
fn advance_eg(eg_cnt: u32, slots: &mut [Operator; 4]) {
    for slot in slots.iter_mut() {
        match slot.state {
            EgState::Attack => {
                if eg_cnt & ((1 << slot.eg_sh_ar) - 1) == 0 {
                    let inc = EG_INC
                        [slot.eg_sel_ar as usize + ((eg_cnt >> slot.eg_sh_ar) & 7) as usize]
                        as i32;
                    slot.volume += (!slot.volume * inc) >> 4;

                    if slot.volume <= MIN_ATT_INDEX {
                        slot.volume = MIN_ATT_INDEX;
                        slot.state =
                            if slot.sl == 0 { EgState::Sustain } else { EgState::Decay };
                    }

                    slot.recalc_vol_out();
                }
            }

            EgState::Decay => {
                if eg_cnt & ((1 << slot.eg_sh_d1r) - 1) == 0 {
                    let inc = EG_INC
                        [slot.eg_sel_d1r as usize + ((eg_cnt >> slot.eg_sh_d1r) & 7) as usize]
                        as i32;

                    if slot.ssg & 0x08 != 0 {
                        /* SSG-EG runs decay with 4x steps, frozen past 0x200 */
                        if slot.volume < 0x200 {
                            slot.volume += 4 * inc;
                            slot.recalc_vol_out();
                        }
                    } else {
                        slot.volume += inc;
                        slot.vol_out = slot.volume as u32 + slot.tl;
                    }

                    if slot.volume >= slot.sl as i32 {
                        slot.state = EgState::Sustain;
                    }
                }
            }

            EgState::Sustain => {
                if eg_cnt & ((1 << slot.eg_sh_d2r) - 1) == 0 {
                    let inc = EG_INC
                        [slot.eg_sel_d2r as usize + ((eg_cnt >> slot.eg_sh_d2r) & 7) as usize]
                        as i32;

                    if slot.ssg & 0x08 != 0 {
                        if slot.volume < 0x200 {
                            slot.volume += 4 * inc;
                            slot.recalc_vol_out();
                        }
                    } else {
                        slot.volume += inc;
                        if slot.volume >= MAX_ATT_INDEX {
                            slot.volume = MAX_ATT_INDEX;
                            /* state stays Sustain */
                        }
                        slot.vol_out = slot.volume as u32 + slot.tl;
                    }
                }
            }

            EgState::Release => {
                if eg_cnt & ((1 << slot.eg_sh_rr) - 1) == 0 {
                    let inc = EG_INC
                        [slot.eg_sel_rr as usize + ((eg_cnt >> slot.eg_sh_rr) & 7) as usize]
                        as i32;

                    if slot.ssg & 0x08 != 0 {
                        if slot.volume < 0x200 {
                            slot.volume += 4 * inc;
                        }
                        if slot.volume >= 0x200 {
                            slot.volume = MAX_ATT_INDEX;
                            slot.state = EgState::Off;
                        }
                    } else {
                        slot.volume += inc;
                        if slot.volume >= MAX_ATT_INDEX {
                            slot.volume = MAX_ATT_INDEX;
                            slot.state = EgState::Off;
                        }
                    }

                    slot.vol_out = slot.volume as u32 + slot.tl;
                }
            }

            EgState::Off => {}
        }
    }
}

/// Rebuild one operator's phase increment and, if the key scaling output
/// moved, its envelope rate lookups.
fn refresh_slot(
    dt_tab: &[[i32; 32]; 8],
    fn_max: u32,
    slot: &mut Operator,
    fc: u32,
    kc: u8,
) {
    let ksr = kc >> slot.ksr_shift;

    let mut fc = fc as i32 + dt_tab[slot.dt as usize][kc as usize];

    /* detune underflow wraps through the chip's 17-bit register */
    if fc < 0 {
        fc += fn_max as i32;
    }

    slot.incr = (fc * slot.mul as i32) >> 1;

    if slot.ksr != ksr {
        slot.ksr = ksr;

        if slot.ar + (ksr as u32) < 94 {
            slot.eg_sh_ar = EG_RATE_SHIFT[(slot.ar + ksr as u32) as usize];
            slot.eg_sel_ar = EG_RATE_SELECT[(slot.ar + ksr as u32) as usize];
        } else {
            /* attack phase is blocked at these rates */
            slot.eg_sh_ar = 0;
            slot.eg_sel_ar = (18 * RATE_STEPS) as u8;
        }

        slot.eg_sh_d1r = EG_RATE_SHIFT[(slot.d1r + ksr as u32) as usize];
        slot.eg_sh_d2r = EG_RATE_SHIFT[(slot.d2r + ksr as u32) as usize];
        slot.eg_sh_rr = EG_RATE_SHIFT[(slot.rr + ksr as u32) as usize];

        slot.eg_sel_d1r = EG_RATE_SELECT[(slot.d1r + ksr as u32) as usize];
        slot.eg_sel_d2r = EG_RATE_SELECT[(slot.d2r + ksr as u32) as usize];
        slot.eg_sel_rr = EG_RATE_SELECT[(slot.rr + ksr as u32) as usize];
    }
}

/// Per-sample phase step with LFO vibrato: the increment is rederived from
/// the perturbed block/fnum instead of the cached one.
fn update_phase_lfo_slot(
    fn_table: &[u32],
    dt_tab: &[[i32; 32]; 8],
    fn_max: u32,
    lfo_pm: u32,
    slot: &mut Operator,
    pms: i32,
    block_fnum: u32,
) {
    let fnum_lfo = (((block_fnum & 0x7f0) >> 4) * 32 * 8) as usize;
    let offset = LFO_PM_TABLE[fnum_lfo + pms as usize + lfo_pm as usize];

    if offset != 0 {
        let bf = (block_fnum * 2).wrapping_add(offset as u32);
        let blk = (bf & 0x7000) >> 12;
        let fnum = bf & 0xfff;

        let kc = ((blk << 2) | FKTABLE[(fnum >> 8) as usize] as u32) as usize;

        let mut fc = (fn_table[fnum as usize] >> (7 - blk)) as i32 + dt_tab[slot.dt as usize][kc];
        if fc < 0 {
            fc += fn_max as i32;
        }

        slot.phase = slot.phase.wrapping_add(((fc * slot.mul as i32) >> 1) as u32);
    } else {
        slot.phase = slot.phase.wrapping_add(slot.incr as u32);
    }
}

/* ========================================================================= */
/*  Main YM2612 struct                                                       */
/* ========================================================================= */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ym2612 {
    /// Register shadow, both ports (0x000-0x0FF and 0x100-0x1FF)
    #[serde(with = "register_file")]
    regs: [u8; 512],

    /// Address latch and which port it belongs to
    address: u8,
    addr_a1: u8,

    channels: [Channel; 6],
    sl3: ThreeSlot,

    /// CSM / 3-slot mode byte (register 0x27)
    mode: u8,
    /// Frequency high-byte latch for registers 0xA4-0xA6
    fn_h: u8,

    /* timer registers; loading/stopping is modeled, counting is not */
    ta: u16,
    tac: i32,
    tb: u8,
    tbc: i32,

    /* rate adaptation */
    clock: u32,
    rate: u32,
    freqbase: f64,
    fn_table: Vec<u32>,
    fn_max: u32,
    dt_tab: [[i32; 32]; 8],

    /* envelope generator timing: one EG tick per 3 samples */
    eg_cnt: u32,
    eg_timer: u32,
    eg_timer_add: u32,
    eg_timer_overflow: u32,

    /* LFO */
    lfo_cnt: u32,
    lfo_timer: u32,
    lfo_timer_add: u32,
    lfo_timer_overflow: u32,
    lfo_am: u32,
    lfo_pm: u32,

    /// Stereo output masks, all-ones or zero, [L0, R0, L1, R1, ...]
    pan: [i32; 12],

    /* channel-6 DAC substitute */
    dac_enable: bool,
    dac_out: i32,
    mute_dac: bool,
}

impl Ym2612 {
    /// Create a chip producing samples at `rate` Hz from `clock` Hz.
    /// Native operation is `rate == clock / 144`.
    pub fn new(clock: u32, rate: u32) -> Self {
        let mut chip = Self {
            regs: [0; 512],
            address: 0,
            addr_a1: 0,
            channels: std::array::from_fn(|_| Channel::new()),
            sl3: ThreeSlot::default(),
            mode: 0,
            fn_h: 0,
            ta: 0,
            tac: 0,
            tb: 0,
            tbc: 0,
            clock,
            rate,
            freqbase: 0.0,
            fn_table: vec![0; 4096],
            fn_max: 0,
            dt_tab: [[0; 32]; 8],
            eg_cnt: 0,
            eg_timer: 0,
            eg_timer_add: 0,
            eg_timer_overflow: 0,
            lfo_cnt: 0,
            lfo_timer: 0,
            lfo_timer_add: 0,
            lfo_timer_overflow: 0,
            lfo_am: 126,
            lfo_pm: 0,
            pan: [0; 12],
            dac_enable: false,
            dac_out: 0,
            mute_dac: false,
        };
        chip.reset();
        chip
    }

    /// Native sample rate for the fixed master clock
    pub fn native_rate(clock: u32) -> u32 {
        clock / CLOCK_DIVIDER
    }

    pub fn sample_rate(&self) -> u32 {
        self.rate
    }

    /// Full register shadow, as last written through the data ports
    pub fn register_shadow(&self) -> &[u8; 512] {
        &self.regs
    }

    /// Block and f-number currently latched for a channel
    pub fn frequency(&self, channel: usize) -> (u8, u16) {
        match self.channels.get(channel) {
            Some(ch) => (((ch.block_fnum >> 11) & 7) as u8, (ch.block_fnum & 0x7ff) as u16),
            None => (0, 0),
        }
    }

    /// True while any write since the last update batch invalidated the
    /// channel's phase increments
    pub fn is_freq_dirty(&self, channel: usize) -> bool {
        self.channels[channel].freq_dirty
    }

    pub fn reset(&mut self) {
        self.set_prescaler();

        self.eg_timer = 0;
        self.eg_cnt = 0;

        self.lfo_timer = 0;
        self.lfo_cnt = 0;
        self.lfo_am = 126;
        self.lfo_pm = 0;

        self.tac = 0;
        self.tbc = 0;

        self.sl3.key_csm = 0;
        self.mode = 0;

        self.regs = [0; 512];

        self.write_mode(0x22, 0x00);
        self.write_mode(0x27, 0x30);
        self.write_mode(0x26, 0x00);
        self.write_mode(0x25, 0x00);
        self.write_mode(0x24, 0x00);

        self.reset_channels();

        for reg in (0xb4..=0xb6u16).rev() {
            self.write_reg(reg, 0xc0);
            self.write_reg(reg | 0x100, 0xc0);
        }
        for reg in (0x30..=0xb2u16).rev() {
            self.write_reg(reg, 0);
            self.write_reg(reg | 0x100, 0);
        }

        self.dac_enable = false;
        self.dac_out = 0;
    }

    fn reset_channels(&mut self) {
        for ch in self.channels.iter_mut() {
            ch.mem_value = 0;
            ch.op1_out = [0; 2];
            ch.fc = 0;
            ch.freq_dirty = true;
            for slot in ch.slots.iter_mut() {
                slot.incr = 0;
                slot.key = false;
                slot.phase = 0;
                slot.ssg = 0;
                slot.ssgn = 0;
                slot.state = EgState::Off;
                slot.volume = MAX_ATT_INDEX;
                slot.vol_out = MAX_ATT_INDEX as u32;
            }
        }
    }

    /// Derive the rate-adaptation tables from clock and output rate
    fn set_prescaler(&mut self) {
        self.freqbase = if self.rate != 0 {
            (self.clock as f64 / self.rate as f64) / CLOCK_DIVIDER as f64
        } else {
            0.0
        };

        self.eg_timer_add = ((1u64 << EG_SH) as f64 * self.freqbase) as u32;
        self.eg_timer_overflow = 3 << EG_SH;

        self.lfo_timer_add = ((1u64 << LFO_SH) as f64 * self.freqbase) as u32;

        /* detune table, scaled from the chip's 10.10 to our 16.16 */
        for d in 0..4 {
            for i in 0..32 {
                let rate =
                    DT_BASE[d * 32 + i] as f64 * self.freqbase * (1 << (FREQ_SH - 10)) as f64;
                self.dt_tab[d][i] = rate as i32;
                self.dt_tab[d + 4][i] = -self.dt_tab[d][i];
            }
        }

        /* 2048 programmable FNUMs, doubled for the LFO's extra bit */
        for (i, entry) in self.fn_table.iter_mut().enumerate() {
            *entry = (i as f64 * 32.0 * self.freqbase * (1 << (FREQ_SH - 10)) as f64) as u32;
        }

        /* phase overflow bound: the register is 17 bits wide */
        self.fn_max = (0x20000 as f64 * self.freqbase * (1 << (FREQ_SH - 10)) as f64) as u32;
    }

    /// Write one of the four bus offsets: 0/2 = address ports, 1/3 = data
    /// ports. Data writes to the port whose address latch is stale are
    /// dropped, as on the real chip.
    pub fn write(&mut self, offset: u8, data: u8) {
        match offset & 3 {
            0 => {
                self.address = data;
                self.addr_a1 = 0;
            }
            1 => {
                if self.addr_a1 != 0 {
                    return;
                }
                let addr = self.address as u16;
                self.regs[addr as usize] = data;
                match addr & 0xf0 {
                    0x20 => match addr {
                        0x2a => {
                            /* DAC data: flush pending state, then latch */
                            self.update_request();
                            self.dac_out = ((data as i32) - 0x80) << 6;
                        }
                        0x2b => {
                            self.dac_enable = data & 0x80 != 0;
                        }
                        _ => {
                            self.update_request();
                            self.write_mode(addr, data);
                        }
                    },
                    _ => {
                        self.update_request();
                        self.write_reg(addr, data);
                    }
                }
            }
            2 => {
                self.address = data;
                self.addr_a1 = 1;
            }
            3 => {
                if self.addr_a1 != 1 {
                    return;
                }
                let addr = self.address as u16;
                self.regs[(addr | 0x100) as usize] = data;
                self.update_request();
                self.write_reg(addr | 0x100, data);
            }
            _ => unreachable!(),
        }
    }

    /// Mute channels 0..5 (bits 0..5) and the DAC (bit 6)
    pub fn set_mute_mask(&mut self, mask: u8) {
        for (i, ch) in self.channels.iter_mut().enumerate() {
            ch.muted = (mask >> i) & 1 != 0;
        }
        self.mute_dac = (mask >> 6) & 1 != 0;
    }

    /// Zero-length update: settle dirty increments and SSG-EG state against
    /// the pre-write register values.
    fn update_request(&mut self) {
        self.refresh_dirty();
        for ch in self.channels.iter_mut() {
            ch.update_ssg_eg();
        }
    }

    /* ------------------------------------------------------------------ */
    /*  Mode registers (0x20-0x2F)                                        */
    /* ------------------------------------------------------------------ */

    fn write_mode(&mut self, reg: u16, v: u8) {
        match reg {
            0x21 => { /* test register */ }
            0x22 => {
                if v & 0x08 != 0 {
                    self.lfo_timer_overflow =
                        LFO_SAMPLES_PER_STEP[(v & 7) as usize] << LFO_SH;
                } else {
                    /* hold the LFO waveform in reset state */
                    self.lfo_timer_overflow = 0;
                    self.lfo_timer = 0;
                    self.lfo_cnt = 0;
                    self.lfo_pm = 0;
                    self.lfo_am = 126;
                }
            }
            0x24 => {
                self.ta = (self.ta & 0x03) | ((v as u16) << 2);
            }
            0x25 => {
                self.ta = (self.ta & 0x3fc) | (v as u16 & 3);
            }
            0x26 => {
                self.tb = v;
            }
            0x27 => {
                self.set_timers(v);
            }
            0x28 => {
                let c = (v & 0x03) as usize;
                if c == 3 {
                    return; /* reserved encoding */
                }
                let c = if v & 0x04 != 0 { c + 3 } else { c };

                let csm = self.sl3.key_csm != 0;
                let ch = &mut self.channels[c];
                for (slot_idx, bit) in [0x10u8, 0x20, 0x40, 0x80].iter().enumerate() {
                    if v & bit != 0 {
                        ch.slots[slot_idx].key_on(csm);
                    } else {
                        ch.slots[slot_idx].key_off(csm);
                    }
                }
            }
            _ => {}
        }
    }

    fn set_timers(&mut self, v: u8) {
        if (self.mode ^ v) & 0xc0 != 0 {
            /* phase increments depend on the 3-slot mode bits */
            self.channels[2].freq_dirty = true;

            /* leaving CSM mode with the CSM key active releases channel 3 */
            if (v & 0xc0) != 0x80 && self.sl3.key_csm != 0 {
                for slot in self.channels[2].slots.iter_mut() {
                    slot.key_off_csm();
                }
                self.sl3.key_csm = 0;
            }
        }

        /* load/stop timer B */
        if v & 0x02 != 0 {
            if self.tbc == 0 {
                self.tbc = (256 - self.tb as i32) << 4;
            }
        } else if self.tbc != 0 {
            self.tbc = 0;
        }

        /* load/stop timer A */
        if v & 0x01 != 0 {
            if self.tac == 0 {
                self.tac = 1024 - self.ta as i32;
            }
        } else if self.tac != 0 {
            self.tac = 0;
        }

        self.mode = v;
    }

    /* ------------------------------------------------------------------ */
    /*  OPN registers (0x30-0xFF, 0x130-0x1FF)                            */
    /* ------------------------------------------------------------------ */

    fn write_reg(&mut self, reg: u16, v: u8) {
        let c = (reg & 3) as usize;
        if c == 3 {
            return; /* 0xX3, 0xX7, 0xXB, 0xXF */
        }
        let c = if reg >= 0x100 { c + 3 } else { c };
        let s = ((reg >> 2) & 3) as usize;

        match reg & 0xf0 {
            0x30 => {
                let ch = &mut self.channels[c];
                ch.slots[s].set_det_mul(v);
                ch.freq_dirty = true;
            }
            0x40 => {
                self.channels[c].slots[s].set_tl(v);
            }
            0x50 => {
                let ch = &mut self.channels[c];
                if ch.slots[s].set_ar_ksr(v) {
                    ch.freq_dirty = true;
                }
            }
            0x60 => {
                let slot = &mut self.channels[c].slots[s];
                slot.set_dr(v);
                slot.am_mask = if v & 0x80 != 0 { !0 } else { 0 };
            }
            0x70 => {
                self.channels[c].slots[s].set_sr(v);
            }
            0x80 => {
                self.channels[c].slots[s].set_sl_rr(v);
            }
            0x90 => {
                let slot = &mut self.channels[c].slots[s];
                slot.ssg = v & 0x0f;
                if slot.state > EgState::Release {
                    slot.recalc_vol_out();
                }
            }
            0xa0 => match s {
                0 => {
                    /* 0xa0-0xa2: FNUM low commits the latched high byte */
                    let fnum = (((self.fn_h & 7) as u32) << 8) + v as u32;
                    let blk = self.fn_h >> 3;
                    let fc = self.fn_table[fnum as usize * 2] >> (7 - blk);

                    let ch = &mut self.channels[c];
                    ch.kcode = (blk << 2) | FKTABLE[(fnum >> 7) as usize];
                    ch.fc = fc;
                    ch.block_fnum = ((blk as u32) << 11) | fnum;
                    ch.freq_dirty = true;
                }
                1 => {
                    /* 0xa4-0xa6: FNUM high / block latch */
                    self.fn_h = v & 0x3f;
                }
                2 => {
                    /* 0xa8-0xaa: 3-slot FNUM low (port 0 only) */
                    if reg < 0x100 {
                        let fnum = (((self.sl3.fn_h & 7) as u32) << 8) + v as u32;
                        let blk = self.sl3.fn_h >> 3;
                        self.sl3.kcode[c] = (blk << 2) | FKTABLE[(fnum >> 7) as usize];
                        self.sl3.fc[c] = self.fn_table[fnum as usize * 2] >> (7 - blk);
                        self.sl3.block_fnum[c] = ((blk as u32) << 11) | fnum;
                        self.channels[2].freq_dirty = true;
                    }
                }
                3 => {
                    /* 0xac-0xae: 3-slot FNUM high / block latch */
                    if reg < 0x100 {
                        self.sl3.fn_h = v & 0x3f;
                    }
                }
                _ => unreachable!(),
            },
            0xb0 => match s {
                0 => {
                    /* 0xb0-0xb2: feedback / algorithm */
                    let feedback = (v >> 3) & 7;
                    let ch = &mut self.channels[c];
                    ch.algo = v & 7;
                    ch.fb_shift = if feedback != 0 { feedback + 6 } else { 0 };
                }
                1 => {
                    /* 0xb4-0xb6: L/R, AMS, PMS */
                    let ch = &mut self.channels[c];
                    ch.pms = (v as i32 & 7) * 32;
                    ch.ams = LFO_AMS_DEPTH_SHIFT[((v >> 4) & 3) as usize];
                    self.pan[c * 2] = if v & 0x80 != 0 { !0 } else { 0 };
                    self.pan[c * 2 + 1] = if v & 0x40 != 0 { !0 } else { 0 };
                }
                _ => {}
            },
            _ => {}
        }
    }

    /* ------------------------------------------------------------------ */
    /*  Sample generation                                                 */
    /* ------------------------------------------------------------------ */

    fn refresh_dirty(&mut self) {
        let three_slot = self.mode & 0xc0 != 0;
        for c in 0..6 {
            if !self.channels[c].freq_dirty {
                continue;
            }

            let dt_tab = &self.dt_tab;
            let fn_max = self.fn_max;

            if c == 2 && three_slot {
                let sl3 = &self.sl3;
                let (fc3, kc3) = (sl3.fc, sl3.kcode);
                let ch = &mut self.channels[2];
                let (own_fc, own_kc) = (ch.fc, ch.kcode);
                refresh_slot(dt_tab, fn_max, &mut ch.slots[0], fc3[1], kc3[1]);
                refresh_slot(dt_tab, fn_max, &mut ch.slots[1], fc3[2], kc3[2]);
                refresh_slot(dt_tab, fn_max, &mut ch.slots[2], fc3[0], kc3[0]);
                refresh_slot(dt_tab, fn_max, &mut ch.slots[3], own_fc, own_kc);
            } else {
                let ch = &mut self.channels[c];
                let (fc, kc) = (ch.fc, ch.kcode);
                for slot in ch.slots.iter_mut() {
                    refresh_slot(dt_tab, fn_max, slot, fc, kc);
                }
            }

            self.channels[c].freq_dirty = false;
        }
    }

    fn advance_lfo(&mut self) {
        if self.lfo_timer_overflow == 0 {
            return;
        }

        self.lfo_timer = self.lfo_timer.wrapping_add(self.lfo_timer_add);
        while self.lfo_timer >= self.lfo_timer_overflow {
            self.lfo_timer -= self.lfo_timer_overflow;

            self.lfo_cnt = (self.lfo_cnt + 1) & 127;

            /* AM: inverted triangle, 126 down to 0 and back */
            self.lfo_am = if self.lfo_cnt < 64 {
                (self.lfo_cnt ^ 63) << 1
            } else {
                (self.lfo_cnt & 63) << 1
            };

            /* PM runs at a quarter of the AM clock */
            self.lfo_pm = self.lfo_cnt >> 2;
        }
    }

    /// Synthesize one channel into the per-sample accumulators
    fn chan_calc(&mut self, c: usize, out_fm: &mut [i32; 6]) {
        let lfo_am = self.lfo_am;
        let lfo_pm = self.lfo_pm;
        let three_slot = self.mode & 0xc0 != 0;
        let sl3_block_fnum = self.sl3.block_fnum;

        let fn_table = &self.fn_table;
        let dt_tab = &self.dt_tab;
        let fn_max = self.fn_max;
        let ch = &mut self.channels[c];

        if ch.muted {
            return;
        }

        let routing = ALGO_ROUTING[ch.algo as usize];
        let mut sums = OpSums::default();

        /* restore the delayed MEM sample */
        sums.add(routing.mem, ch.mem_value);

        let am = lfo_am >> ch.ams;

        /* SLOT1: self-feedback from the averaged two-sample history */
        let eg1 = ch.slots[0].vol_out + (am & ch.slots[0].am_mask);
        let mut fb_in = ch.op1_out[0] + ch.op1_out[1];
        ch.op1_out[0] = ch.op1_out[1];

        if routing.s1_splits {
            sums.mem += ch.op1_out[0];
            sums.c1 += ch.op1_out[0];
            sums.c2 += ch.op1_out[0];
        } else {
            sums.add(routing.s1, ch.op1_out[0]);
        }

        ch.op1_out[1] = 0;
        if eg1 < ENV_QUIET {
            if ch.fb_shift == 0 {
                fb_in = 0;
            }
            ch.op1_out[1] = op_calc_fb(ch.slots[0].phase, eg1, fb_in << ch.fb_shift);
        }

        /* SLOT3 */
        let eg3 = ch.slots[2].vol_out + (am & ch.slots[2].am_mask);
        if eg3 < ENV_QUIET {
            let v = op_calc(ch.slots[2].phase, eg3, sums.m2);
            sums.add(routing.s3, v);
        }

        /* SLOT2 */
        let eg2 = ch.slots[1].vol_out + (am & ch.slots[1].am_mask);
        if eg2 < ENV_QUIET {
            let v = op_calc(ch.slots[1].phase, eg2, sums.c1);
            sums.add(routing.s2, v);
        }

        /* SLOT4 always feeds the accumulator */
        let eg4 = ch.slots[3].vol_out + (am & ch.slots[3].am_mask);
        if eg4 < ENV_QUIET {
            sums.out += op_calc(ch.slots[3].phase, eg4, sums.c2);
        }

        ch.mem_value = sums.mem;
        out_fm[c] += sums.out;

        /* phase update happens after output */
        if ch.pms != 0 {
            if three_slot && c == 2 {
                /* 3-slot mode: each operator modulates from its own fnum */
                update_phase_lfo_slot(
                    fn_table, dt_tab, fn_max, lfo_pm, &mut ch.slots[0], ch.pms, sl3_block_fnum[1],
                );
                update_phase_lfo_slot(
                    fn_table, dt_tab, fn_max, lfo_pm, &mut ch.slots[1], ch.pms, sl3_block_fnum[2],
                );
                update_phase_lfo_slot(
                    fn_table, dt_tab, fn_max, lfo_pm, &mut ch.slots[2], ch.pms, sl3_block_fnum[0],
                );
                let block_fnum = ch.block_fnum;
                update_phase_lfo_slot(
                    fn_table, dt_tab, fn_max, lfo_pm, &mut ch.slots[3], ch.pms, block_fnum,
                );
            } else {
                update_phase_lfo_channel(fn_table, dt_tab, fn_max, lfo_pm, ch);
            }
        } else {
            for slot in ch.slots.iter_mut() {
                slot.phase = slot.phase.wrapping_add(slot.incr as u32);
            }
        }
    }

    /// Generate `out_l.len()` samples of the mixed six channels at the chip's
    /// configured rate. Output is 32-bit with each channel clamped to ±8192.
    pub fn update(&mut self, out_l: &mut [i32], out_r: &mut [i32]) {
        debug_assert_eq!(out_l.len(), out_r.len());
        let length = out_l.len();

        /* DAC level is latched for the whole batch */
        let dac_out = if self.mute_dac { 0 } else { self.dac_out };

        self.refresh_dirty();

        if length == 0 {
            for ch in self.channels.iter_mut() {
                ch.update_ssg_eg();
            }
            return;
        }

        for i in 0..length {
            let mut out_fm = [0i32; 6];

            for ch in self.channels.iter_mut() {
                ch.update_ssg_eg();
            }

            for c in 0..5 {
                self.chan_calc(c, &mut out_fm);
            }
            if self.dac_enable {
                out_fm[5] += dac_out;
            } else {
                self.chan_calc(5, &mut out_fm);
            }

            self.advance_lfo();

            self.eg_timer = self.eg_timer.wrapping_add(self.eg_timer_add);
            while self.eg_timer >= self.eg_timer_overflow {
                self.eg_timer -= self.eg_timer_overflow;
                self.eg_cnt += 1;

                let eg_cnt = self.eg_cnt;
                for ch in self.channels.iter_mut() {
                    advance_eg(eg_cnt, &mut ch.slots);
                }
            }

            let mut lt = 0i32;
            let mut rt = 0i32;
            for c in 0..6 {
                let v = out_fm[c].clamp(-8192, 8192);
                lt += v & self.pan[c * 2];
                rt += v & self.pan[c * 2 + 1];
            }

            out_l[i] = lt;
            out_r[i] = rt;

            /* CSM key-off follows one sample after the key-on unless Timer A
               retriggered it */
            self.sl3.key_csm <<= 1;
            if self.sl3.key_csm & 2 != 0 {
                for slot in self.channels[2].slots.iter_mut() {
                    slot.key_off_csm();
                }
                self.sl3.key_csm = 0;
            }
        }
    }
}

fn update_phase_lfo_channel(
    fn_table: &[u32],
    dt_tab: &[[i32; 32]; 8],
    fn_max: u32,
    lfo_pm: u32,
    ch: &mut Channel,
) {
    let block_fnum = ch.block_fnum;
    let fnum_lfo = (((block_fnum & 0x7f0) >> 4) * 32 * 8) as usize;
    let offset = LFO_PM_TABLE[fnum_lfo + ch.pms as usize + lfo_pm as usize];

    if offset != 0 {
        let bf = (block_fnum * 2).wrapping_add(offset as u32);
        let blk = (bf & 0x7000) >> 12;
        let fnum = bf & 0xfff;

        let kc = ((blk << 2) | FKTABLE[(fnum >> 8) as usize] as u32) as usize;
        let fc = (fn_table[fnum as usize] >> (7 - blk)) as i32;

        for slot in ch.slots.iter_mut() {
            let mut finc = fc + dt_tab[slot.dt as usize][kc];
            if finc < 0 {
                finc += fn_max as i32;
            }
            slot.phase = slot.phase.wrapping_add(((finc * slot.mul as i32) >> 1) as u32);
        }
    } else {
        for slot in ch.slots.iter_mut() {
            slot.phase = slot.phase.wrapping_add(slot.incr as u32);
        }
    }
}

impl Default for Ym2612 {
    fn default() -> Self {
        Self::new(YM2612_CLOCK, YM2612_CLOCK / CLOCK_DIVIDER)
    }
}
