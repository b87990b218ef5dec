//! Envelope generator and SSG-EG behavior tests.

use super::tables::{MAX_ATT_INDEX, MIN_ATT_INDEX};
use super::{EgState, Ym2612};

fn write_pair(ym: &mut Ym2612, port: u8, reg: u8, data: u8) {
    ym.write(port * 2, reg);
    ym.write(port * 2 + 1, data);
}

fn run(ym: &mut Ym2612, samples: usize) {
    let mut l = vec![0i32; samples];
    let mut r = vec![0i32; samples];
    ym.update(&mut l, &mut r);
}

/// Program channel 0 with a basic patch: algorithm 7, TL 0 on all slots
fn program_basic(ym: &mut Ym2612, ar: u8, dr: u8, sl_rr: u8) {
    write_pair(ym, 0, 0xA4, 0x22);
    write_pair(ym, 0, 0xA0, 0x69);
    write_pair(ym, 0, 0xB0, 0x07);
    for (i, base) in [0x40u8, 0x50, 0x60, 0x80].iter().enumerate() {
        let data = match i {
            0 => 0x00,  /* TL */
            1 => ar,    /* KS=0, AR */
            2 => dr,    /* AM off, DR */
            _ => sl_rr, /* SL, RR */
        };
        for off in [0u8, 4, 8, 12] {
            write_pair(ym, 0, base + off, data);
        }
    }
}

#[test]
fn test_maximal_attack_skips_attack_phase() {
    let mut ym = Ym2612::default();
    program_basic(&mut ym, 0x1F, 0x00, 0x00);

    write_pair(&mut ym, 0, 0x28, 0x10); /* key on slot 1 only */

    let slot = &ym.channels[0].slots[0];
    assert_eq!(slot.volume, MIN_ATT_INDEX, "AR=31 must jump to minimum attenuation");
    assert_eq!(slot.state, EgState::Sustain, "SL=0 lands directly in Sustain");
}

#[test]
fn test_keyon_keyoff_at_max_rate_releases_from_zero() {
    let mut ym = Ym2612::default();
    program_basic(&mut ym, 0x1F, 0x00, 0x00);

    write_pair(&mut ym, 0, 0x28, 0xF0);
    write_pair(&mut ym, 0, 0x28, 0x00);

    let slot = &ym.channels[0].slots[0];
    assert_eq!(slot.state, EgState::Release);
    assert_eq!(slot.volume, 0, "release starts from full volume");

    /* the release rate then walks the attenuation up */
    run(&mut ym, 1 << 16);
    assert!(ym.channels[0].slots[0].volume > 0);
}

#[test]
fn test_attack_converges_to_zero() {
    let mut ym = Ym2612::default();
    program_basic(&mut ym, 0x10, 0x00, 0x00);

    write_pair(&mut ym, 0, 0x28, 0xF0);
    let start = ym.channels[0].slots[0].volume;
    assert_eq!(start, MAX_ATT_INDEX, "attack starts from silence");

    run(&mut ym, 4096);
    let mid = ym.channels[0].slots[0].volume;
    assert!(mid < start, "attack must lower attenuation, got {}", mid);

    run(&mut ym, 1 << 17);
    assert_eq!(ym.channels[0].slots[0].volume, 0, "attack converges to 0");
    assert_eq!(ym.channels[0].slots[0].state, EgState::Sustain);
}

#[test]
fn test_rate_zero_sustain_holds_forever() {
    let mut ym = Ym2612::default();
    /* AR max, DR=0, SR=0: after the instant attack nothing may move */
    program_basic(&mut ym, 0x1F, 0x00, 0x00);
    for off in [0x70u8, 0x74, 0x78, 0x7C] {
        write_pair(&mut ym, 0, off, 0x00);
    }
    write_pair(&mut ym, 0, 0x28, 0xF0);

    run(&mut ym, 1 << 16);
    assert_eq!(ym.channels[0].slots[0].volume, 0, "rate 0 must hold the level");
    assert_eq!(ym.channels[0].slots[0].state, EgState::Sustain);
}

#[test]
fn test_decay_stops_at_sustain_level() {
    let mut ym = Ym2612::default();
    /* SL=4 (128 units), fast decay */
    program_basic(&mut ym, 0x1F, 0x1F, 0x40);
    write_pair(&mut ym, 0, 0x28, 0x10);

    assert_eq!(ym.channels[0].slots[0].state, EgState::Decay);

    run(&mut ym, 1 << 15);
    let slot = &ym.channels[0].slots[0];
    assert_eq!(slot.state, EgState::Sustain);
    assert!(slot.volume >= 128, "decay must pass SL, got {}", slot.volume);
}

#[test]
fn test_release_ends_in_off() {
    let mut ym = Ym2612::default();
    /* RR=15: fastest release */
    program_basic(&mut ym, 0x1F, 0x00, 0x0F);
    write_pair(&mut ym, 0, 0x28, 0xF0);
    run(&mut ym, 16);
    write_pair(&mut ym, 0, 0x28, 0x00);

    run(&mut ym, 1 << 14);
    let slot = &ym.channels[0].slots[0];
    assert_eq!(slot.state, EgState::Off);
    assert_eq!(slot.volume, MAX_ATT_INDEX);
}

#[test]
fn test_envelope_counter_stays_in_range() {
    let mut ym = Ym2612::default();
    program_basic(&mut ym, 0x15, 0x0A, 0x27);
    write_pair(&mut ym, 0, 0x28, 0xF0);

    for _ in 0..64 {
        run(&mut ym, 512);
        for ch in ym.channels.iter() {
            for slot in ch.slots.iter() {
                assert!(
                    (MIN_ATT_INDEX..=MAX_ATT_INDEX).contains(&slot.volume),
                    "volume out of range: {}",
                    slot.volume
                );
                if slot.ssg & 0x08 == 0 {
                    assert_eq!(slot.vol_out, slot.volume as u32 + slot.tl);
                }
            }
        }
    }

    write_pair(&mut ym, 0, 0x28, 0x00);
    run(&mut ym, 1 << 15);
    for slot in ym.channels[0].slots.iter() {
        assert!((MIN_ATT_INDEX..=MAX_ATT_INDEX).contains(&slot.volume));
    }
}

/* ===== SSG-EG shapes ===== */

#[test]
fn test_ssg_loop_shape_keeps_retriggering() {
    let mut ym = Ym2612::default();
    /* repeating sawtooth: enable SSG-EG, fast decay, instant attack */
    program_basic(&mut ym, 0x1F, 0x1F, 0xF0);
    for off in [0x90u8, 0x94, 0x98, 0x9C] {
        write_pair(&mut ym, 0, off, 0x08);
    }
    write_pair(&mut ym, 0, 0x28, 0xF0);

    run(&mut ym, 1 << 15);
    let slot = &ym.channels[0].slots[0];
    assert!(slot.state > EgState::Release, "loop shape must keep the key sounding");
    /* the retrigger lands within one EG step of the 0x200 crossing */
    assert!(slot.volume < 0x200 + 32, "loop shape retriggers at the upper half");
}

#[test]
fn test_ssg_hold_shape_parks_at_max_attenuation() {
    let mut ym = Ym2612::default();
    /* one-shot decay then hold silent */
    program_basic(&mut ym, 0x1F, 0x1F, 0xF0);
    for off in [0x90u8, 0x94, 0x98, 0x9C] {
        write_pair(&mut ym, 0, off, 0x09);
    }
    write_pair(&mut ym, 0, 0x28, 0xF0);

    run(&mut ym, 1 << 15);
    let slot = &ym.channels[0].slots[0];
    assert_eq!(slot.volume, MAX_ATT_INDEX);
    assert!(slot.state > EgState::Release, "hold keeps the envelope engaged");
}

#[test]
fn test_ssg_alternate_shape_toggles_inversion() {
    let mut ym = Ym2612::default();
    /* triangle: alternate inversion on each pass */
    program_basic(&mut ym, 0x1F, 0x1F, 0xF0);
    write_pair(&mut ym, 0, 0x90, 0x0A);
    write_pair(&mut ym, 0, 0x28, 0x10);

    let mut seen_inverted = false;
    let mut seen_normal = false;
    for _ in 0..256 {
        run(&mut ym, 256);
        match ym.channels[0].slots[0].ssgn {
            0 => seen_normal = true,
            4 => seen_inverted = true,
            other => panic!("unexpected inversion flag {}", other),
        }
    }
    assert!(seen_normal && seen_inverted, "triangle shape must toggle inversion");
}

#[test]
fn test_ssg_keyoff_folds_inverted_level() {
    let mut ym = Ym2612::default();
    program_basic(&mut ym, 0x1F, 0x10, 0xF0);
    write_pair(&mut ym, 0, 0x90, 0x0C); /* inverted attack shape */
    write_pair(&mut ym, 0, 0x28, 0x10);
    run(&mut ym, 64);

    let before = ym.channels[0].slots[0].volume;
    write_pair(&mut ym, 0, 0x28, 0x00);
    let slot = &ym.channels[0].slots[0];

    /* key-off converts the inverted level back to a plain attenuation; a
       fold landing in the upper half snaps to silence */
    if before > 0 && before < 0x200 {
        assert_eq!(slot.volume, 0x200 - before);
        assert_eq!(slot.state, EgState::Release);
    } else {
        assert_eq!(slot.volume, MAX_ATT_INDEX);
        assert_eq!(slot.state, EgState::Off);
    }
}

/* ===== Key dispatch ===== */

#[test]
fn test_key_register_reserved_channel_is_noop() {
    let mut ym = Ym2612::default();
    program_basic(&mut ym, 0x1F, 0x00, 0x00);

    write_pair(&mut ym, 0, 0x28, 0xF3); /* c == 3 is reserved */
    for ch in ym.channels.iter() {
        for slot in ch.slots.iter() {
            assert!(!slot.key, "reserved channel encoding must not key anything");
        }
    }
}

#[test]
fn test_key_bit7_drives_slot4() {
    /* some emulation cores mistakenly send bit 7 to SLOT3 a second time;
       on hardware bit 7 belongs to SLOT4 */
    let mut ym = Ym2612::default();
    program_basic(&mut ym, 0x1F, 0x00, 0x00);

    write_pair(&mut ym, 0, 0x28, 0x80);
    assert!(ym.channels[0].slots[3].key, "bit 7 must key SLOT4 on");
    assert!(!ym.channels[0].slots[2].key, "SLOT3 must stay off");

    write_pair(&mut ym, 0, 0x28, 0x40);
    assert!(!ym.channels[0].slots[3].key, "bit 7 clear must key SLOT4 off");
    assert!(ym.channels[0].slots[2].key, "bit 6 keys SLOT3");
}

#[test]
fn test_key_channel_encoding_port1() {
    let mut ym = Ym2612::default();

    write_pair(&mut ym, 0, 0x28, 0xF6); /* c=2 + bit2 -> channel 5 */
    assert!(ym.channels[5].slots.iter().all(|s| s.key));
    assert!(ym.channels[2].slots.iter().all(|s| !s.key));
}
