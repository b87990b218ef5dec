//! Register interface tests: mode registers, 3-slot mode, LFO control,
//! timers, pan and the frequency-dirty bookkeeping.

use super::Ym2612;

fn write_pair(ym: &mut Ym2612, port: u8, reg: u8, data: u8) {
    ym.write(port * 2, reg);
    ym.write(port * 2 + 1, data);
}

#[test]
fn test_reset_defaults() {
    let ym = Ym2612::default();

    /* both ports pan fully open after reset */
    for c in 0..6 {
        assert_eq!(ym.pan[c * 2], !0);
        assert_eq!(ym.pan[c * 2 + 1], !0);
    }
    assert!(!ym.dac_enable);
    assert_eq!(ym.lfo_am, 126);
    assert_eq!(ym.lfo_pm, 0);
}

#[test]
fn test_keycode_from_block_fnum() {
    let mut ym = Ym2612::default();

    write_pair(&mut ym, 0, 0xA4, 0x22); /* block 4, fnum high 2 */
    write_pair(&mut ym, 0, 0xA0, 0x55);

    /* fnum 0x255 -> upper bits 0x4 -> keycode low bits 0 */
    assert_eq!(ym.channels[0].kcode, 4 << 2);

    write_pair(&mut ym, 0, 0xA4, 0x27); /* block 4, fnum high 7 */
    write_pair(&mut ym, 0, 0xA0, 0xFF);

    /* fnum 0x7FF -> upper bits 0xF -> keycode low bits 3 */
    assert_eq!(ym.channels[0].kcode, (4 << 2) | 3);
}

#[test]
fn test_algorithm_and_feedback() {
    let mut ym = Ym2612::default();

    write_pair(&mut ym, 0, 0xB0, 0x3C);
    assert_eq!(ym.channels[0].algo, 4);
    assert_eq!(ym.channels[0].fb_shift, 7 + 6);

    write_pair(&mut ym, 0, 0xB0, 0x05);
    assert_eq!(ym.channels[0].algo, 5);
    assert_eq!(ym.channels[0].fb_shift, 0, "FB=0 disables feedback");
}

#[test]
fn test_pan_ams_pms() {
    let mut ym = Ym2612::default();

    write_pair(&mut ym, 0, 0xB4, 0b1011_0101);
    assert_eq!(ym.pan[0], !0);
    assert_eq!(ym.pan[1], 0);
    assert_eq!(ym.channels[0].ams, 0, "AMS=3 selects the deepest tremolo");
    assert_eq!(ym.channels[0].pms, 5 * 32);
}

#[test]
fn test_am_enable_mask() {
    let mut ym = Ym2612::default();

    write_pair(&mut ym, 0, 0x60, 0x8A);
    assert_eq!(ym.channels[0].slots[0].am_mask, !0);

    write_pair(&mut ym, 0, 0x60, 0x0A);
    assert_eq!(ym.channels[0].slots[0].am_mask, 0);
}

#[test]
fn test_lfo_disable_resets_waveform() {
    let mut ym = Ym2612::default();

    write_pair(&mut ym, 0, 0x22, 0x0F); /* enable, fastest */
    let mut l = [0i32; 512];
    let mut r = [0i32; 512];
    ym.update(&mut l, &mut r);
    assert!(ym.lfo_cnt != 0 || ym.lfo_am != 126, "LFO should have advanced");

    write_pair(&mut ym, 0, 0x22, 0x00);
    assert_eq!(ym.lfo_cnt, 0);
    assert_eq!(ym.lfo_am, 126);
    assert_eq!(ym.lfo_pm, 0);

    /* and it stays put while disabled */
    ym.update(&mut l, &mut r);
    assert_eq!(ym.lfo_cnt, 0);
}

#[test]
fn test_timer_load_and_stop() {
    let mut ym = Ym2612::default();

    write_pair(&mut ym, 0, 0x24, 0xFA); /* TA high 8 */
    write_pair(&mut ym, 0, 0x25, 0x02); /* TA low 2 */
    write_pair(&mut ym, 0, 0x26, 0xC8); /* TB */

    write_pair(&mut ym, 0, 0x27, 0x03); /* load both */
    assert_eq!(ym.ta, 0x3EA);
    assert_eq!(ym.tac, 1024 - 0x3EA);
    assert_eq!(ym.tbc, (256 - 0xC8) << 4);

    /* reloading while running must not restart */
    let tac = ym.tac;
    write_pair(&mut ym, 0, 0x27, 0x03);
    assert_eq!(ym.tac, tac);

    write_pair(&mut ym, 0, 0x27, 0x00); /* stop both */
    assert_eq!(ym.tac, 0);
    assert_eq!(ym.tbc, 0);
}

#[test]
fn test_mode_bits_dirty_channel3() {
    let mut ym = Ym2612::default();
    let mut l = [0i32; 1];
    let mut r = [0i32; 1];
    ym.update(&mut l, &mut r);
    assert!(!ym.channels[2].freq_dirty);

    write_pair(&mut ym, 0, 0x27, 0x40); /* enter 3-slot mode */
    assert!(ym.channels[2].freq_dirty, "mode change must dirty channel 3");
}

#[test]
fn test_three_slot_registers() {
    let mut ym = Ym2612::default();

    write_pair(&mut ym, 0, 0x27, 0x40);

    /* operator 1 of channel 3 via 0xAC/0xA8 */
    write_pair(&mut ym, 0, 0xAC, 0x1A); /* block 3, fnum high 2 */
    write_pair(&mut ym, 0, 0xA8, 0x21);

    assert_eq!(ym.sl3.block_fnum[0], (3 << 11) | 0x221);
    assert_eq!(ym.sl3.kcode[0], (3 << 2) | FK(0x221));
    assert!(ym.channels[2].freq_dirty);

    /* the 3-slot registers only exist on port 0 */
    write_pair(&mut ym, 1, 0xA8, 0x55);
    assert_eq!(ym.sl3.block_fnum[0], (3 << 11) | 0x221);
}

#[allow(non_snake_case)]
fn FK(fnum: u32) -> u8 {
    super::tables::FKTABLE[(fnum >> 7) as usize]
}

#[test]
fn test_three_slot_mode_changes_slot_frequencies() {
    let mut ym = Ym2612::default();

    /* channel 3 normal frequency */
    write_pair(&mut ym, 0, 0xA6, 0x22);
    write_pair(&mut ym, 0, 0xA2, 0x69);

    /* per-operator frequencies, far apart */
    for (hi, lo, h, l) in [(0xACu8, 0xA8u8, 0x3Au8, 0x00u8), (0xAD, 0xA9, 0x12, 0x80), (0xAE, 0xAA, 0x26, 0x40)] {
        write_pair(&mut ym, 0, hi, h);
        write_pair(&mut ym, 0, lo, l);
    }

    write_pair(&mut ym, 0, 0x27, 0x40);
    let mut l = [0i32; 4];
    let mut r = [0i32; 4];
    ym.update(&mut l, &mut r);

    let incrs: Vec<i32> = ym.channels[2].slots.iter().map(|s| s.incr).collect();
    assert_ne!(incrs[0], incrs[3], "slot 1 must follow its own frequency");
    assert_ne!(incrs[1], incrs[2]);
}

#[test]
fn test_mute_mask() {
    let mut ym = Ym2612::default();

    ym.set_mute_mask(0b0100_0101);
    assert!(ym.channels[0].muted);
    assert!(!ym.channels[1].muted);
    assert!(ym.channels[2].muted);
    assert!(ym.mute_dac);

    ym.set_mute_mask(0);
    assert!(!ym.channels[0].muted);
    assert!(!ym.mute_dac);
}

#[test]
fn test_detune_and_multiple_dirty_channel() {
    let mut ym = Ym2612::default();
    let mut l = [0i32; 1];
    let mut r = [0i32; 1];
    ym.update(&mut l, &mut r);

    write_pair(&mut ym, 0, 0x30, 0x71);
    assert!(ym.channels[0].freq_dirty);
    assert_eq!(ym.channels[0].slots[0].mul, 2);
    assert_eq!(ym.channels[0].slots[0].dt, 7);

    ym.update(&mut l, &mut r);
    write_pair(&mut ym, 0, 0x34, 0x00);
    assert_eq!(ym.channels[0].slots[1].mul, 1, "MUL=0 halves the frequency");
}

#[test]
fn test_ksr_change_dirties_channel() {
    let mut ym = Ym2612::default();
    let mut l = [0i32; 1];
    let mut r = [0i32; 1];

    write_pair(&mut ym, 0, 0x50, 0x1F); /* KS=0 */
    ym.update(&mut l, &mut r);

    write_pair(&mut ym, 0, 0x50, 0x5F); /* KS=1: keycode shift changes */
    assert!(ym.channels[0].freq_dirty);

    ym.update(&mut l, &mut r);
    write_pair(&mut ym, 0, 0x50, 0x5A); /* same KS, new AR */
    assert!(!ym.channels[0].freq_dirty, "AR-only change must not dirty");
}
