//! Precomputed lookup tables for the OPN2 core.
//!
//! Everything here is a pure function of chip constants and is shared by all
//! emulated chips. The sine table lives in a logarithmic "decibel" domain so
//! that modulation and attenuation become additions, resolved back to linear
//! through the TL power table.

use std::sync::LazyLock;

/* ========================================================================= */
/*  Fixed-point layout and envelope constants                                */
/* ========================================================================= */

/// 16.16 fixed point for phase/frequency calculations
pub const FREQ_SH: u32 = 16;
/// 16.16 fixed point for envelope generator timing
pub const EG_SH: u32 = 16;
/// 8.24 fixed point for LFO timing
pub const LFO_SH: u32 = 24;

pub const FREQ_MASK: u32 = (1 << FREQ_SH) - 1;

pub const ENV_BITS: u32 = 10;
pub const ENV_LEN: usize = 1 << ENV_BITS;
pub const ENV_STEP: f64 = 128.0 / ENV_LEN as f64;

/// Deepest attenuation the envelope counter can reach (silence)
pub const MAX_ATT_INDEX: i32 = ENV_LEN as i32 - 1;
/// Minimum attenuation (full volume)
pub const MIN_ATT_INDEX: i32 = 0;

pub const SIN_BITS: u32 = 10;
pub const SIN_LEN: usize = 1 << SIN_BITS;
pub const SIN_MASK: usize = SIN_LEN - 1;

/// 8-bit X-axis resolution of the power table (as on the real chip)
pub const TL_RES_LEN: usize = 256;

/// 13 amplitude bits x sign x 256 steps
pub const TL_TAB_LEN: usize = 13 * 2 * TL_RES_LEN;

/// Attenuation threshold above which an operator's TL lookup is always zero,
/// so the operator can be skipped entirely.
pub const ENV_QUIET: u32 = (TL_TAB_LEN >> 3) as u32;

pub const RATE_STEPS: usize = 8;

/* ========================================================================= */
/*  TL power table and log-sine table                                        */
/* ========================================================================= */

/// Linear power table: maps a 13-bit attenuation (with sign in the low index
/// bit) back to a signed 14-bit amplitude. Entry pairs hold value and its
/// negation; each successive 512-entry block halves the base block.
pub static TL_TAB: LazyLock<[i32; TL_TAB_LEN]> = LazyLock::new(|| {
    let mut tab = [0i32; TL_TAB_LEN];
    for x in 0..TL_RES_LEN {
        let m = ((1u32 << 16) as f64) / 2f64.powf((x as f64 + 1.0) * (ENV_STEP / 4.0) / 8.0);

        /* 16 bits (never reaches 1<<16 due to x+1) -> 12 bits -> rounded 11
           bits -> shifted to the chip's 13-bit output */
        let mut n = m.floor() as i32;
        n >>= 4;
        n = if n & 1 != 0 { (n >> 1) + 1 } else { n >> 1 };
        n <<= 2;

        tab[x * 2] = n;
        tab[x * 2 + 1] = -n;
        for i in 1..13 {
            tab[x * 2 + i * 2 * TL_RES_LEN] = n >> i;
            tab[x * 2 + 1 + i * 2 * TL_RES_LEN] = -(n >> i);
        }
    }
    tab
});

/// Log-domain sine table. Each entry is an index into [`TL_TAB`], with the
/// waveform sign carried in bit 0. Phases are offset by half a step so the
/// sine never hits exactly zero.
pub static SIN_TAB: LazyLock<[u32; SIN_LEN]> = LazyLock::new(|| {
    let mut tab = [0u32; SIN_LEN];
    for i in 0..SIN_LEN {
        let m = (((i * 2 + 1) as f64) * std::f64::consts::PI / SIN_LEN as f64).sin();

        /* convert amplitude to 'decibels' over the envelope step */
        let o = 8.0 * (1.0 / m.abs()).log2() / (ENV_STEP / 4.0);

        let n = (2.0 * o) as i32;
        let n = if n & 1 != 0 { (n >> 1) + 1 } else { n >> 1 };

        tab[i] = (n * 2) as u32 + if m >= 0.0 { 0 } else { 1 };
    }
    tab
});

/* ========================================================================= */
/*  Envelope generator tables                                                */
/* ========================================================================= */

/// Sustain levels, 3 dB per step, SL=15 jumping to 93 dB
/// (attenuation units: db * 4 / ENV_STEP = db * 32)
pub const SL_TAB: [u32; 16] = [
    0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, 992,
];

/// Envelope increment patterns, 19 rows of 8 sub-cycle steps.
/// Row 17 is the doubled attack row for rates 15 2/3, row 18 never increments.
#[rustfmt::skip]
pub const EG_INC: [u8; 19 * RATE_STEPS] = [
    /* cycle: 0  1  2  3  4  5  6  7 */
    /*  0 */  0, 1, 0, 1, 0, 1, 0, 1, /* rates 00..11 0 (increment by 0 or 1) */
    /*  1 */  0, 1, 0, 1, 1, 1, 0, 1, /* rates 00..11 1 */
    /*  2 */  0, 1, 1, 1, 0, 1, 1, 1, /* rates 00..11 2 */
    /*  3 */  0, 1, 1, 1, 1, 1, 1, 1, /* rates 00..11 3 */

    /*  4 */  1, 1, 1, 1, 1, 1, 1, 1, /* rate 12 0 (increment by 1) */
    /*  5 */  1, 1, 1, 2, 1, 1, 1, 2, /* rate 12 1 */
    /*  6 */  1, 2, 1, 2, 1, 2, 1, 2, /* rate 12 2 */
    /*  7 */  1, 2, 2, 2, 1, 2, 2, 2, /* rate 12 3 */

    /*  8 */  2, 2, 2, 2, 2, 2, 2, 2, /* rate 13 0 (increment by 2) */
    /*  9 */  2, 2, 2, 4, 2, 2, 2, 4, /* rate 13 1 */
    /* 10 */  2, 4, 2, 4, 2, 4, 2, 4, /* rate 13 2 */
    /* 11 */  2, 4, 4, 4, 2, 4, 4, 4, /* rate 13 3 */

    /* 12 */  4, 4, 4, 4, 4, 4, 4, 4, /* rate 14 0 (increment by 4) */
    /* 13 */  4, 4, 4, 8, 4, 4, 4, 8, /* rate 14 1 */
    /* 14 */  4, 8, 4, 8, 4, 8, 4, 8, /* rate 14 2 */
    /* 15 */  4, 8, 8, 8, 4, 8, 8, 8, /* rate 14 3 */

    /* 16 */  8, 8, 8, 8, 8, 8, 8, 8, /* rates 15 0..3 (increment by 8) */
    /* 17 */ 16,16,16,16,16,16,16,16, /* rates 15 2..3 for attack */
    /* 18 */  0, 0, 0, 0, 0, 0, 0, 0, /* infinite rates */
];

const fn row(r: u8) -> u8 {
    r * RATE_STEPS as u8
}

/// Rate+KSR (0..127) -> base row of [`EG_INC`].
/// Entries 32..39 carry the YM2612-specific low-rate mapping verified on
/// hardware: rate 0 is infinite and the upper half of rate 1 borrows row 2.
#[rustfmt::skip]
pub static EG_RATE_SELECT: [u8; 32 + 64 + 32] = {
    let mut t = [0u8; 128];
    let mut i = 0;
    /* 32 infinite time rates */
    while i < 32 {
        t[i] = row(18);
        i += 1;
    }
    /* rates 00..01: infinite; 02..05: row base 0; 06..07: row base 2 */
    let low: [u8; 8] = [row(18), row(18), row(0), row(0), row(0), row(0), row(2), row(2)];
    let mut j = 0;
    while j < 8 {
        t[32 + j] = low[j];
        j += 1;
    }
    /* rates 02..11 proper */
    let mut g = 0;
    while g < 10 {
        let mut k = 0;
        while k < 4 {
            t[40 + g * 4 + k] = row(k as u8);
            k += 1;
        }
        g += 1;
    }
    /* rates 12..14 */
    let mut r12 = 0;
    while r12 < 12 {
        t[80 + r12] = row(4 + r12 as u8);
        r12 += 1;
    }
    /* rate 15 + 32 dummy rates */
    let mut d = 92;
    while d < 128 {
        t[d] = row(16);
        d += 1;
    }
    t
};

/// Rate+KSR (0..127) -> EG counter shift.
#[rustfmt::skip]
pub static EG_RATE_SHIFT: [u8; 32 + 64 + 32] = {
    let mut t = [0u8; 128];
    /* 32 infinite time rates keep the slowest shift */
    let mut i = 0;
    while i < 32 {
        t[i] = 11;
        i += 1;
    }
    /* rates 00..11: shift 11 down to 0 */
    let mut r = 0;
    while r < 12 {
        let mut k = 0;
        while k < 4 {
            t[32 + r * 4 + k] = 11 - r as u8;
            k += 1;
        }
        r += 1;
    }
    /* rates 12..15 and the 32 dummy rates stay at shift 0 */
    t
};

/* ========================================================================= */
/*  Detune, keycode and LFO tables                                           */
/* ========================================================================= */

/// Raw detune deltas in the chip's 10.10 fixed point, [depth 0..3][keycode].
/// Depths 4..7 are the negations, produced when the per-chip table is scaled.
#[rustfmt::skip]
pub const DT_BASE: [u8; 4 * 32] = [
    /* FD=0 */
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    /* FD=1 */
    0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2,
    2, 3, 3, 3, 4, 4, 4, 5, 5, 6, 6, 7, 8, 8, 8, 8,
    /* FD=2 */
    1, 1, 1, 1, 2, 2, 2, 2, 2, 3, 3, 3, 4, 4, 4, 5,
    5, 6, 6, 7, 8, 8, 9, 10, 11, 12, 13, 14, 16, 16, 16, 16,
    /* FD=3 */
    2, 2, 2, 2, 2, 3, 3, 3, 4, 4, 4, 5, 5, 6, 6, 7,
    8, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 20, 22, 22, 22, 22,
];

/// Upper 4 fnum bits -> lower 2 keycode bits
pub const FKTABLE: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 3, 3, 3, 3, 3, 3];

/// Samples per LFO step for each of the 8 LFO speeds
pub const LFO_SAMPLES_PER_STEP: [u32; 8] = [108, 77, 71, 67, 62, 44, 8, 5];

/// AM depth -> right shift of the 0..126 triangle
/// (0 dB, 1.4 dB, 5.9 dB, 11.8 dB)
pub const LFO_AMS_DEPTH_SHIFT: [u8; 4] = [8, 3, 1, 0];

/// First quarter of the PM waveform: one row per (fnum bit 4..10, depth),
/// 8 steps each. The full 32-step pseudo-triangle is mirrored and negated
/// from this quarter when the table is built.
#[rustfmt::skip]
const LFO_PM_OUTPUT: [[u8; 8]; 7 * 8] = [
    /* FNUM bit 4, depths 0..7 */
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 1, 1, 1],
    /* FNUM bit 5 */
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 1, 1, 1],
    [0, 0, 1, 1, 2, 2, 2, 3],
    /* FNUM bit 6 */
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 1],
    [0, 0, 0, 0, 1, 1, 1, 1],
    [0, 0, 1, 1, 2, 2, 2, 3],
    [0, 0, 2, 3, 4, 4, 5, 6],
    /* FNUM bit 7 */
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 1, 1],
    [0, 0, 0, 0, 1, 1, 1, 1],
    [0, 0, 0, 1, 1, 1, 1, 2],
    [0, 0, 1, 1, 2, 2, 2, 3],
    [0, 0, 2, 3, 4, 4, 5, 6],
    [0, 0, 4, 6, 8, 8, 0xa, 0xc],
    /* FNUM bit 8 */
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 1, 1, 1],
    [0, 0, 0, 1, 1, 1, 2, 2],
    [0, 0, 1, 1, 2, 2, 3, 3],
    [0, 0, 1, 2, 2, 2, 3, 4],
    [0, 0, 2, 3, 4, 4, 5, 6],
    [0, 0, 4, 6, 8, 8, 0xa, 0xc],
    [0, 0, 8, 0xc, 0x10, 0x10, 0x14, 0x18],
    /* FNUM bit 9 */
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 2, 2, 2, 2],
    [0, 0, 0, 2, 2, 2, 4, 4],
    [0, 0, 2, 2, 4, 4, 6, 6],
    [0, 0, 2, 4, 4, 4, 6, 8],
    [0, 0, 4, 6, 8, 8, 0xa, 0xc],
    [0, 0, 8, 0xc, 0x10, 0x10, 0x14, 0x18],
    [0, 0, 0x10, 0x18, 0x20, 0x20, 0x28, 0x30],
    /* FNUM bit 10 */
    [0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 4, 4, 4, 4],
    [0, 0, 0, 4, 4, 4, 8, 8],
    [0, 0, 4, 4, 8, 8, 0xc, 0xc],
    [0, 0, 4, 8, 8, 8, 0xc, 0x10],
    [0, 0, 8, 0xc, 0x10, 0x10, 0x14, 0x18],
    [0, 0, 0x10, 0x18, 0x20, 0x20, 0x28, 0x30],
    [0, 0, 0x20, 0x30, 0x40, 0x40, 0x50, 0x60],
];

/// All 128 PM waveforms: indexed by
/// `fnum(7 bits) * 256 + depth * 32 + lfo_pm_step(0..31)`.
pub static LFO_PM_TABLE: LazyLock<Vec<i32>> = LazyLock::new(|| {
    let mut tab = vec![0i32; 128 * 8 * 32];
    for depth in 0..8usize {
        for fnum in 0..128usize {
            for step in 0..8usize {
                let mut value = 0i32;
                for bit in 0..7usize {
                    if fnum & (1 << bit) != 0 {
                        value += LFO_PM_OUTPUT[bit * 8 + depth][step] as i32;
                    }
                }
                let base = fnum * 32 * 8 + depth * 32;
                tab[base + step] = value;
                tab[base + (step ^ 7) + 8] = value;
                tab[base + step + 16] = -value;
                tab[base + (step ^ 7) + 24] = -value;
            }
        }
    }
    tab
});
