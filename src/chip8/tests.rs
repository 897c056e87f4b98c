use super::*;
use crate::core::{EmulationCore, EmulatorHost};
use crate::cpu::GenericCpu;

/// A host with scriptable key state for the interpreter tests.
struct TestHost {
    keys: u16,
    pressed: Option<u8>,
    vblanks: usize,
}

impl TestHost {
    fn new() -> Self {
        TestHost { keys: 0, pressed: None, vblanks: 0 }
    }
}

impl EmulatorHost for TestHost {
    fn key_down(&self, key: u8) -> bool {
        self.keys & (1 << (key & 0xF)) != 0
    }
    fn key_states(&self) -> u16 {
        self.keys
    }
    fn key_pressed(&mut self) -> Option<u8> {
        self.pressed.take()
    }
    fn vblank(&mut self) {
        self.vblanks += 1;
    }
}

fn setup_core_with<F: FnOnce(&mut Chip8Options)>(
    preset: Chip8Preset,
    code: &[u8],
    tweak: F,
) -> (Chip8GenericCore, TestHost) {
    let mut registry = PropertyRegistry::new();
    let mut options = Chip8Options::for_preset(preset);
    tweak(&mut options);
    let mut core = Chip8GenericCore::with_options(&mut registry, options);
    let mut host = TestHost::new();
    core.load_binary(&mut host, "test", code, None).unwrap();
    (core, host)
}

fn setup_core(preset: Chip8Preset, code: &[u8]) -> (Chip8GenericCore, TestHost) {
    setup_core_with(preset, code, |_| {})
}

fn lit_pixels(core: &Chip8GenericCore) -> usize {
    let (width, height) = (core.screen_width, core.screen_height);
    let mut count = 0;
    for y in 0..height {
        for x in 0..width {
            if core.screen.pixel(x, y) != 0 {
                count += 1;
            }
        }
    }
    count
}

#[test]
fn test_basic_arithmetic_sequence() {
    // V0 := 5; V1 := 10; V0 += V1; self-jump.
    let (mut core, mut host) =
        setup_core(Chip8Preset::Chip8, &[0x60, 0x05, 0x61, 0x0A, 0x80, 0x14, 0x12, 0x06]);
    core.step_instructions(&mut host, 4);
    assert_eq!(core.v(0), 0x0F);
    assert_eq!(core.v(0xF), 0x00);
    assert_eq!(GenericCpu::pc(&core), 0x206);
    assert_eq!(GenericCpu::cycles(&core), 4);
}

#[test]
fn test_add_with_carry_sets_vf() {
    let (mut core, mut host) =
        setup_core(Chip8Preset::Chip8, &[0x60, 0xFF, 0x61, 0x02, 0x80, 0x14]);
    core.step_instructions(&mut host, 3);
    assert_eq!(core.v(0), 0x01);
    assert_eq!(core.v(0xF), 0x01);
}

#[test]
fn test_fx55_classic_increments_i_past_x() {
    // I := 0x300; V0..V3 := x; save v3
    let (mut core, mut host) = setup_core(
        Chip8Preset::Chip8,
        &[0xA3, 0x00, 0x60, 0x11, 0x61, 0x22, 0x62, 0x33, 0x63, 0x44, 0xF3, 0x55],
    );
    core.step_instructions(&mut host, 6);
    assert_eq!(core.i_register(), 0x304);
    assert_eq!(core.memory()[0x300..0x304], [0x11, 0x22, 0x33, 0x44]);
}

#[test]
fn test_fx55_chip48_increments_i_by_x() {
    let (mut core, mut host) = setup_core(Chip8Preset::Chip48, &[0xA3, 0x00, 0xF3, 0x55]);
    core.step_instructions(&mut host, 2);
    assert_eq!(core.i_register(), 0x303);
}

#[test]
fn test_fx55_schip_leaves_i_unchanged() {
    let (mut core, mut host) = setup_core(Chip8Preset::SChip11, &[0xA3, 0x00, 0xF3, 0x55]);
    core.step_instructions(&mut host, 2);
    assert_eq!(core.i_register(), 0x300);
}

#[test]
fn test_shift_quirk_selects_source_register() {
    // Classic: 8xy6 shifts Vy into Vx.
    let (mut core, mut host) =
        setup_core(Chip8Preset::Chip8, &[0x60, 0x00, 0x61, 0x05, 0x80, 0x16]);
    core.step_instructions(&mut host, 3);
    assert_eq!(core.v(0), 0x02);
    assert_eq!(core.v(0xF), 1);
    // CHIP-48: 8xy6 shifts Vx in place.
    let (mut core, mut host) =
        setup_core(Chip8Preset::Chip48, &[0x60, 0x08, 0x61, 0x05, 0x80, 0x16]);
    core.step_instructions(&mut host, 3);
    assert_eq!(core.v(0), 0x04);
    assert_eq!(core.v(0xF), 0);
}

#[test]
fn test_vf_reset_quirk() {
    // Classic CHIP-8 clears VF on AND.
    let (mut core, mut host) =
        setup_core(Chip8Preset::Chip8, &[0x6F, 0x01, 0x60, 0x0F, 0x61, 0x03, 0x80, 0x12]);
    core.step_instructions(&mut host, 4);
    assert_eq!(core.v(0), 0x03);
    assert_eq!(core.v(0xF), 0);
    // SCHIP leaves VF alone.
    let (mut core, mut host) =
        setup_core(Chip8Preset::SChip11, &[0x6F, 0x01, 0x60, 0x0F, 0x61, 0x03, 0x80, 0x12]);
    core.step_instructions(&mut host, 4);
    assert_eq!(core.v(0xF), 1);
}

#[test]
fn test_jump0_quirk() {
    // Classic: Bnnn jumps to nnn + V0.
    let (mut core, mut host) = setup_core(Chip8Preset::Chip8, &[0x60, 0x04, 0xB3, 0x00]);
    core.step_instructions(&mut host, 2);
    assert_eq!(GenericCpu::pc(&core), 0x304);
    // CHIP-48: Bxnn jumps to xnn + Vx.
    let (mut core, mut host) = setup_core(Chip8Preset::Chip48, &[0x63, 0x04, 0xB3, 0x10]);
    core.step_instructions(&mut host, 2);
    assert_eq!(GenericCpu::pc(&core), 0x314);
}

#[test]
fn test_sprite_clipped_at_edge_without_wrap() {
    // One-pixel sprite at (63, 31) lands; at (64, 0) everything clips.
    let program = [0xA2, 0x08, 0x60, 0x3F, 0x61, 0x1F, 0xD0, 0x11, 0x80, 0x00];
    let (mut core, mut host) =
        setup_core_with(Chip8Preset::Chip8, &program, |o| o.instant_dxyn = true);
    core.step_instructions(&mut host, 4);
    assert_eq!(core.screen.pixel(63, 31), 1);
    assert_eq!(core.v(0xF), 0);
    assert_eq!(lit_pixels(&core), 1);

    let program = [0xA2, 0x08, 0x60, 0x40, 0x61, 0x00, 0xD0, 0x11, 0x80, 0x00];
    let (mut core, mut host) =
        setup_core_with(Chip8Preset::Chip8, &program, |o| o.instant_dxyn = true);
    core.step_instructions(&mut host, 4);
    assert_eq!(lit_pixels(&core), 0);
    assert_eq!(core.v(0xF), 0);
}

#[test]
fn test_sprite_wraps_with_quirk() {
    let program = [0xA2, 0x08, 0x60, 0x40, 0x61, 0x00, 0xD0, 0x11, 0x80, 0x00];
    let (mut core, mut host) = setup_core_with(Chip8Preset::Chip8, &program, |o| {
        o.instant_dxyn = true;
        o.wrap_sprites = true;
    });
    core.step_instructions(&mut host, 4);
    assert_eq!(core.screen.pixel(0, 0), 1);
    assert_eq!(lit_pixels(&core), 1);
}

#[test]
fn test_sprite_collision_reported_and_pixel_cleared() {
    // Draw the same single pixel twice at (62, 0) with wrapping on.
    let program = [0xA2, 0x0A, 0x60, 0x3E, 0x61, 0x00, 0xD0, 0x11, 0xD0, 0x11, 0x80, 0x00];
    let (mut core, mut host) = setup_core_with(Chip8Preset::Chip8, &program, |o| {
        o.instant_dxyn = true;
        o.wrap_sprites = true;
    });
    core.step_instructions(&mut host, 4);
    assert_eq!(core.screen.pixel(62, 0), 1);
    assert_eq!(core.v(0xF), 0);
    core.step_instruction(&mut host);
    assert_eq!(core.screen.pixel(62, 0), 0);
    assert_eq!(core.v(0xF), 1);
}

#[test]
fn test_schip11_hires_collision_counts_rows() {
    // In hires, a 15-row sprite drawn at y=60 keeps 4 rows on screen and
    // clips 11 off the bottom; the clipped rows count as collisions.
    let mut program = vec![
        0x00, 0xFF, // hires
        0xA2, 0x0C, // i := data
        0x60, 0x00, // v0 := 0
        0x61, 0x3C, // v1 := 60
        0xD0, 0x1F, // sprite 15 rows
        0x12, 0x0A, // self-jump
    ];
    program.extend_from_slice(&[0xFF; 15]);
    let (mut core, mut host) = setup_core(Chip8Preset::SChip11, &program);
    core.step_instructions(&mut host, 5);
    assert!(core.is_hires());
    assert_eq!(core.v(0xF), 11);
}

#[test]
fn test_display_wait_defers_second_draw_to_next_frame() {
    let program = [0xA2, 0x08, 0xD0, 0x11, 0xD0, 0x11, 0x12, 0x06, 0x80, 0x00];
    let (mut core, mut host) = setup_core(Chip8Preset::Chip8, &program);
    core.execute_frame(&mut host);
    // First frame: exactly one draw.
    assert_eq!(core.screen.pixel(0, 0), 1);
    assert_eq!(core.v(0xF), 0);
    core.execute_frame(&mut host);
    // Second frame: the deferred draw XORs the pixel away.
    assert_eq!(core.screen.pixel(0, 0), 0);
    assert_eq!(core.v(0xF), 1);
}

#[test]
fn test_self_jump_pauses_at_frame_boundary() {
    let (mut core, mut host) = setup_core(Chip8Preset::Chip8, &[0x12, 0x00]);
    core.execute_frame(&mut host);
    assert_eq!(EmulationCore::exec_mode(&core), ExecMode::Paused);
    assert_eq!(GenericCpu::pc(&core), 0x200);
    assert!(GenericCpu::cycles(&core) >= core.options().instructions_per_frame as i64);
}

#[test]
fn test_xochip_long_i_fetch() {
    let (mut core, mut host) =
        setup_core(Chip8Preset::XoChip, &[0xA2, 0x10, 0xF0, 0x00, 0x02, 0x00, 0x12, 0x06]);
    core.step_instruction(&mut host);
    assert_eq!(core.i_register(), 0x210);
    core.step_instruction(&mut host);
    assert_eq!(core.i_register(), 0x200);
    assert_eq!(GenericCpu::pc(&core), 0x206);
    assert_eq!(GenericCpu::cycles(&core), 2);
}

#[test]
fn test_xochip_skip_hops_over_long_i() {
    // v0 == 0 so 3x00 skips; the skipped instruction is the 4-byte F000 form.
    let (mut core, mut host) = setup_core(
        Chip8Preset::XoChip,
        &[0x30, 0x00, 0xF0, 0x00, 0x02, 0x00, 0x60, 0x55],
    );
    core.step_instruction(&mut host);
    assert_eq!(GenericCpu::pc(&core), 0x206);
    core.step_instruction(&mut host);
    assert_eq!(core.v(0), 0x55);
}

#[test]
fn test_xochip_save_load_register_range() {
    let (mut core, mut host) = setup_core(
        Chip8Preset::XoChip,
        &[0xA3, 0x00, 0x62, 0x11, 0x63, 0x22, 0x52, 0x32, 0x65, 0x00, 0x53, 0x52],
    );
    core.step_instructions(&mut host, 4);
    // save v2 - v3 wrote both without touching I.
    assert_eq!(core.memory()[0x300..0x302], [0x11, 0x22]);
    assert_eq!(core.i_register(), 0x300);
    core.step_instructions(&mut host, 2);
    // load v3 - v2 reads in reverse order.
    assert_eq!(core.v(3), 0x11);
    assert_eq!(core.v(2), 0x22);
}

#[test]
fn test_stack_overflow_halts_without_cyclic_quirk() {
    let (mut core, mut host) = setup_core(Chip8Preset::Chip8, &[0x22, 0x02, 0x22, 0x02]);
    core.step_instructions(&mut host, 20);
    assert_eq!(GenericCpu::cpu_state(&core), CpuState::Error);
    assert!(GenericCpu::error_message(&core).unwrap().contains("overflow"));
}

#[test]
fn test_cyclic_stack_wraps_and_continues() {
    let (mut core, mut host) =
        setup_core_with(Chip8Preset::Chip8, &[0x22, 0x02, 0x22, 0x02], |o| o.cyclic_stack = true);
    core.step_instructions(&mut host, 40);
    assert_eq!(GenericCpu::cpu_state(&core), CpuState::Normal);
    assert!(GenericCpu::sp(&core) < 16);
}

#[test]
fn test_breakpoint_fires_exactly_once() {
    let (mut core, mut host) =
        setup_core(Chip8Preset::Chip8, &[0x60, 0x01, 0x61, 0x02, 0x12, 0x04]);
    core.breakpoints_mut().set(
        0x202,
        crate::cpu::Breakpoint {
            label: "test".into(),
            kind: crate::cpu::BreakpointKind::User,
            enabled: true,
        },
    );
    core.execute_frame(&mut host);
    assert_eq!(EmulationCore::exec_mode(&core), ExecMode::Paused);
    assert_eq!(GenericCpu::pc(&core), 0x202);
    assert!(core.breakpoint_triggered());
    assert_eq!(GenericCpu::cycles(&core), 1);
    // Clear and resume: no second fire, the core runs into the self-jump.
    core.clear_breakpoint_triggered();
    core.breakpoints_mut().remove(0x202);
    EmulationCore::set_exec_mode(&mut core, ExecMode::Running);
    core.execute_frame(&mut host);
    assert!(!core.breakpoint_triggered());
    assert_eq!(GenericCpu::pc(&core), 0x204);
}

#[test]
fn test_wait_key_blocks_until_host_delivers() {
    let (mut core, mut host) = setup_core(Chip8Preset::Chip8, &[0xF4, 0x0A, 0x12, 0x02]);
    core.step_instructions(&mut host, 3);
    // Still busy-waiting on the same instruction.
    assert_eq!(GenericCpu::pc(&core), 0x200);
    assert_eq!(GenericCpu::cpu_state(&core), CpuState::Wait);
    host.pressed = Some(0xB);
    core.step_instruction(&mut host);
    assert_eq!(core.v(4), 0xB);
    assert_eq!(GenericCpu::pc(&core), 0x202);
    assert_eq!(GenericCpu::cpu_state(&core), CpuState::Normal);
}

#[test]
fn test_skip_if_key_pressed() {
    let (mut core, mut host) =
        setup_core(Chip8Preset::Chip8, &[0x60, 0x07, 0xE0, 0x9E, 0x61, 0x01, 0x62, 0x01]);
    host.keys = 1 << 7;
    core.step_instructions(&mut host, 3);
    // The skip jumped over `v1 := 1`.
    assert_eq!(core.v(1), 0);
    assert_eq!(core.v(2), 1);
}

#[test]
fn test_timers_tick_at_frame_rate() {
    let (mut core, mut host) = setup_core(Chip8Preset::Chip8, &[0x60, 0x05, 0xF0, 0x15, 0x12, 0x04]);
    core.step_instructions(&mut host, 2);
    assert_eq!(core.delay_timer(), 5);
    let before = core.delay_timer();
    core.execute_frame(&mut host);
    core.execute_frame(&mut host);
    assert!(core.delay_timer() < before);
}

#[test]
fn test_illegal_opcode_rewinds_pc_and_halts() {
    let (mut core, mut host) = setup_core(Chip8Preset::Chip8, &[0x00, 0x00]);
    core.step_instruction(&mut host);
    assert_eq!(GenericCpu::cpu_state(&core), CpuState::Error);
    assert_eq!(GenericCpu::pc(&core), 0x200);
    assert!(GenericCpu::error_message(&core).unwrap().contains("illegal opcode"));
    // Error state is terminal until reset.
    core.step_instruction(&mut host);
    assert_eq!(GenericCpu::cycles(&core), 1);
    core.reset(&mut host);
    assert_eq!(GenericCpu::cpu_state(&core), CpuState::Normal);
}

#[test]
fn test_rom_too_large_leaves_core_untouched() {
    let mut registry = PropertyRegistry::new();
    let mut core =
        Chip8GenericCore::with_options(&mut registry, Chip8Options::for_preset(Chip8Preset::Chip8));
    let mut host = TestHost::new();
    let oversized = vec![0u8; 8192];
    assert!(matches!(
        core.load_binary(&mut host, "big", &oversized, None),
        Err(CadmiumError::RomTooLarge { .. })
    ));
}

#[test]
fn test_schip_scroll_right_moves_pixels() {
    let program = [0x00, 0xFF, 0xA2, 0x08, 0xD0, 0x11, 0x00, 0xFB, 0x80, 0x00];
    let (mut core, mut host) = setup_core(Chip8Preset::SChip11, &program);
    core.step_instructions(&mut host, 3);
    assert_eq!(core.screen.pixel(0, 0), 1);
    core.step_instruction(&mut host);
    assert_eq!(core.screen.pixel(0, 0), 0);
    assert_eq!(core.screen.pixel(4, 0), 1);
}

#[test]
fn test_megachip_indexed_sprite_and_collision() {
    let program = [
        0x00, 0x11, // megaon
        0x01, 0x00, 0x02, 0x10, // ldhi 0x000210
        0x03, 0x02, // sprw 2
        0x04, 0x02, // sprh 2
        0xD0, 0x01, // sprite
        0xD0, 0x01, // sprite again -> collision
        0x12, 0x0E, // self-jump
        0x01, 0x01, 0x01, 0x01, // 2x2 of palette index 1
    ];
    let (mut core, mut host) = setup_core(Chip8Preset::MegaChip, &program);
    core.step_instructions(&mut host, 5);
    assert!(core.is_megachip);
    assert_eq!(core.screen.pixel(0, 0), 1);
    assert_eq!(core.screen.pixel(1, 1), 1);
    assert_eq!(core.v(0xF), 0);
    core.step_instruction(&mut host);
    assert_eq!(core.v(0xF), 1);
}

#[test]
fn test_audio_silent_when_sound_timer_zero() {
    let (mut core, _host) = setup_core(Chip8Preset::Chip8, &[0x12, 0x00]);
    let mut samples = [1i16; 64];
    core.render_audio(&mut samples, 44_100);
    assert!(samples.iter().all(|s| *s == 0));
}

#[test]
fn test_classic_buzzer_produces_square_wave() {
    let (mut core, mut host) = setup_core(Chip8Preset::Chip8, &[0x60, 0x3C, 0xF0, 0x18]);
    core.step_instructions(&mut host, 2);
    let mut samples = [0i16; 256];
    core.render_audio(&mut samples, 44_100);
    assert!(samples.iter().any(|s| *s > 0));
    assert!(samples.iter().any(|s| *s < 0));
}

#[test]
fn test_xochip_pattern_audio() {
    // pitch defaults to 64; load an alternating pattern and a sound timer.
    let mut program = vec![
        0xA2, 0x0A, // i := pattern
        0xF0, 0x02, // audio
        0x60, 0x3C, // v0 := 60
        0xF0, 0x18, // buzzer := v0
        0x12, 0x08, // self-jump
    ];
    program.extend_from_slice(&[0xAA; 16]);
    let (mut core, mut host) = setup_core(Chip8Preset::XoChip, &program);
    core.step_instructions(&mut host, 4);
    assert_eq!(core.xo_audio_pattern(), &[0xAA; 16]);
    let mut samples = [0i16; 256];
    core.render_audio(&mut samples, 44_100);
    assert!(samples.iter().any(|s| *s > 0));
    assert!(samples.iter().any(|s| *s < 0));
}

#[test]
fn test_options_survive_properties_round_trip() {
    let mut registry = PropertyRegistry::new();
    for preset in Chip8Preset::ALL {
        let options = Chip8Options::for_preset(preset);
        let props = options.as_properties(&mut registry);
        let back = Chip8Options::from_properties(&props).unwrap();
        let props_again = back.as_properties(&mut registry);
        assert_eq!(props, props_again, "preset {:?}", preset);
    }
}

#[test]
fn test_sha1_recorded_on_load() {
    let (core, _host) = setup_core(Chip8Preset::Chip8, &[0x12, 0x00]);
    let sha1 = core.rom_sha1().unwrap();
    assert_eq!(sha1.len(), 40);
    assert!(sha1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn test_stack_descriptor_shape() {
    let (mut core, mut host) = setup_core(Chip8Preset::Chip8, &[0x22, 0x04, 0x00, 0x00, 0x12, 0x04]);
    core.step_instruction(&mut host);
    let stack = GenericCpu::stack(&core);
    assert_eq!(stack.entry_size, 2);
    assert_eq!(GenericCpu::sp(&core), 1);
    // The pushed return address (0x202) sits in the first big-endian entry.
    assert_eq!(&stack.content[0..2], &[0x02, 0x02]);
}
