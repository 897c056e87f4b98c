//! End-to-end scenarios spanning registry, cores, librarian and debugger.

use cadmium::chip8::{Chip8Options, Chip8Preset};
use cadmium::cpu::GenericCpu;
use cadmium::{
    Chip8Variant, Classification, CoreRegistry, Database, Debugger, EmulationCore, EmulatorHost,
    ExecMode, HeadlessHost, Librarian, PropertyRegistry,
};

struct RecordingHost {
    vblanks: usize,
    keys: u16,
}

impl RecordingHost {
    fn new() -> Self {
        RecordingHost { vblanks: 0, keys: 0 }
    }
}

impl EmulatorHost for RecordingHost {
    fn key_down(&self, key: u8) -> bool {
        self.keys & (1 << (key & 0xF)) != 0
    }
    fn key_states(&self) -> u16 {
        self.keys
    }
    fn key_pressed(&mut self) -> Option<u8> {
        None
    }
    fn vblank(&mut self) {
        self.vblanks += 1;
    }
}

fn create_core(preset: Chip8Preset) -> (PropertyRegistry, Box<dyn EmulationCore>) {
    let registry = CoreRegistry::new();
    let mut props_reg = PropertyRegistry::new();
    let props = Chip8Options::for_preset(preset).as_properties(&mut props_reg);
    let (_, core) = registry.create(&mut props_reg, &props).unwrap();
    (props_reg, core)
}

#[test]
fn infinite_self_jump_pauses_after_one_frame() {
    let (_reg, mut core) = create_core(Chip8Preset::Chip8);
    let mut host = RecordingHost::new();
    core.load_binary(&mut host, "loop", &[0x12, 0x00], None).unwrap();
    core.execute_frame(&mut host);
    assert_eq!(core.exec_mode(), ExecMode::Paused);
    let unit = core.execution_unit(0).unwrap();
    assert_eq!(unit.pc(), 0x200);
    assert!(unit.cycles() >= 15);
    assert_eq!(host.vblanks, 1);
}

#[test]
fn arithmetic_program_through_the_registry() {
    let (_reg, mut core) = create_core(Chip8Preset::Chip8);
    let mut host = RecordingHost::new();
    core.load_binary(&mut host, "add", &[0x60, 0x05, 0x61, 0x0A, 0x80, 0x14, 0x12, 0x06], None)
        .unwrap();
    for _ in 0..4 {
        core.execute_instruction(&mut host);
    }
    let unit = core.execution_unit(0).unwrap();
    assert_eq!(unit.register(0).value, 0x0F);
    assert_eq!(unit.register(0xF).value, 0x00);
    assert_eq!(unit.pc(), 0x206);
    assert_eq!(unit.cycles(), 4);
}

#[test]
fn sha1_and_state_are_deterministic_across_loads() {
    let rom = [0x60, 0x2A, 0x12, 0x02];
    let (_reg, mut core) = create_core(Chip8Preset::Chip8);
    let mut host = HeadlessHost;
    core.load_binary(&mut host, "a", &rom, None).unwrap();
    let first_sha1 = core.rom_sha1().unwrap().to_string();
    let first_regs: Vec<u32> = {
        let unit = core.execution_unit(0).unwrap();
        (0..21).map(|reg| unit.register(reg).value).collect()
    };
    core.load_binary(&mut host, "b", &rom, None).unwrap();
    assert_eq!(core.rom_sha1().unwrap(), first_sha1);
    let unit = core.execution_unit(0).unwrap();
    let second_regs: Vec<u32> = (0..21).map(|reg| unit.register(reg).value).collect();
    assert_eq!(first_regs, second_regs);
}

#[test]
fn known_rom_digest_resolves_to_chip8_preset() {
    let database = Database::embedded();
    let librarian = Librarian::new(&database);
    // The historical CHIP-8 reference ROM digest maps to the CHIP-8 preset
    // with its 15 instructions per frame.
    let classification = librarian
        .classify_digest("eb412becb086d3cbccce4e3e370b9149b969cff9")
        .expect("digest must be known");
    assert_eq!(
        classification,
        Classification::Known { preset: "CHIP-8".into(), tickrate: Some(15) }
    );
    assert!(librarian
        .classify_digest("0000000000000000000000000000000000000000")
        .is_none());
}

#[test]
fn librarian_guesses_variants_for_unknown_roms() {
    let database = Database::embedded();
    let librarian = Librarian::new(&database);
    let classic = [0x60, 0x01, 0xA2, 0x06, 0xD0, 0x11, 0x12, 0x04, 0x80, 0x00];
    match librarian.classify("mystery.ch8", &classic) {
        Classification::Guessed { variants } => {
            assert!(variants.contains(Chip8Variant::CHIP_8));
        }
        other => panic!("expected a variant guess, got {:?}", other),
    }
    let long_i = [0xF0, 0x00, 0x02, 0x08, 0x12, 0x04];
    match librarian.classify("mystery2.ch8", &long_i) {
        Classification::Guessed { variants } => {
            assert!(!variants.contains(Chip8Variant::CHIP_8));
            assert!(variants
                .intersects(Chip8Variant::XO_CHIP | Chip8Variant::MEGA_CHIP));
        }
        other => panic!("expected a variant guess, got {:?}", other),
    }
}

#[test]
fn properties_diff_round_trip_through_prototypes() {
    let mut props_reg = PropertyRegistry::new();
    let p = Chip8Options::for_preset(Chip8Preset::Chip8).as_properties(&mut props_reg);
    let mut q = p.clone();
    q.at_mut("instructionsPerFrame").unwrap().set_int(200);
    q.at_mut("wrapSprites").unwrap().set_bool(true);
    let diff = p.create_diff(&q);
    let mut applied = p.clone();
    applied.apply_diff(&diff).unwrap();
    assert_eq!(applied, q);
    // Identical prototypes are equal and serialise identically.
    let p2 = Chip8Options::for_preset(Chip8Preset::Chip8).as_properties(&mut props_reg);
    assert_eq!(p, p2);
    assert_eq!(p.to_json(), p2.to_json());
}

#[test]
fn debugger_breakpoint_cycle_on_a_registry_core() {
    let (_reg, mut core) = create_core(Chip8Preset::Chip8);
    let mut host = RecordingHost::new();
    core.load_binary(&mut host, "bp", &[0x60, 0x01, 0x61, 0x02, 0x12, 0x04], None).unwrap();
    let mut debugger = Debugger::new();
    debugger.set_breakpoint(core.as_mut(), 0x202, "after first");
    debugger.run(core.as_mut());
    core.execute_frame(&mut host);
    assert_eq!(core.exec_mode(), ExecMode::Paused);
    assert_eq!(core.execution_unit(0).unwrap().pc(), 0x202);
    assert!(core.execution_unit(0).unwrap().breakpoint_triggered());
    core.execution_unit(0).unwrap().clear_breakpoint_triggered();
    debugger.remove_breakpoint(core.as_mut(), 0x202);
    debugger.run(core.as_mut());
    core.execute_frame(&mut host);
    assert!(!core.execution_unit(0).unwrap().breakpoint_triggered());
}

#[test]
fn vip_core_lifts_chip8_pc_at_fetch_entry() {
    let registry = CoreRegistry::new();
    let mut props_reg = PropertyRegistry::new();
    let props = registry
        .factory("COSMAC-VIP")
        .unwrap()
        .presets(&mut props_reg)
        .into_iter()
        .find(|p| p.name == "CHIP-8")
        .unwrap()
        .properties;
    let (_, mut core) = registry.create(&mut props_reg, &props).unwrap();
    let mut host = HeadlessHost;
    // A two-byte program: the monitor runs its start-up and stops at the first
    // fetch with the shadowed CHIP-8 PC at the load address, however many 1802
    // instructions that took.
    core.load_binary(&mut host, "tiny", &[0x60, 0x07], None).unwrap();
    let unit = core.execution_unit(0).unwrap();
    assert_eq!(unit.pc(), 0x200, "lifted CHIP-8 PC must sit at the start address");
    assert_eq!(unit.cpu_state(), cadmium::CpuState::Normal);
    // The backend is a real 1802 with its own register file.
    let backend = core.execution_unit(1).unwrap();
    assert_eq!(backend.name(), "CDP1802");
    assert!(backend.cycles() > 0);
}

#[test]
fn vip_core_executes_a_chip8_instruction_through_the_monitor() {
    let registry = CoreRegistry::new();
    let mut props_reg = PropertyRegistry::new();
    let props = registry
        .factory("COSMAC-VIP")
        .unwrap()
        .presets(&mut props_reg)
        .into_iter()
        .find(|p| p.name == "CHIP-8")
        .unwrap()
        .properties;
    let (_, mut core) = registry.create(&mut props_reg, &props).unwrap();
    let mut host = HeadlessHost;
    // v7 := 0x42 then a self-jump.
    core.load_binary(&mut host, "set", &[0x67, 0x42, 0x12, 0x02], None).unwrap();
    core.execute_instruction(&mut host);
    let unit = core.execution_unit(0).unwrap();
    assert_eq!(unit.register(7).value, 0x42);
    assert_eq!(unit.pc(), 0x202);
}

#[test]
fn dream6800_monitor_reaches_its_fetch_loop() {
    let registry = CoreRegistry::new();
    let mut props_reg = PropertyRegistry::new();
    let props = registry
        .factory("DREAM6800")
        .unwrap()
        .presets(&mut props_reg)
        .into_iter()
        .find(|p| p.name == "CHIP-8")
        .unwrap()
        .properties;
    let (_, mut core) = registry.create(&mut props_reg, &props).unwrap();
    let mut host = HeadlessHost;
    core.load_binary(&mut host, "tiny", &[0x60, 0x01, 0x12, 0x02], None).unwrap();
    let unit = core.execution_unit(0).unwrap();
    assert_eq!(unit.cpu_state(), cadmium::CpuState::Normal, "{:?}", unit.error_message());
    assert_eq!(unit.pc(), 0x200);
    // One lifted CHIP-8 step through CHIPOS.
    core.execute_instruction(&mut host);
    let unit = core.execution_unit(0).unwrap();
    assert_eq!(unit.register(0).value, 0x01);
}

#[test]
fn eti660_monitor_reaches_its_fetch_loop() {
    let registry = CoreRegistry::new();
    let mut props_reg = PropertyRegistry::new();
    let props = registry
        .factory("ETI660")
        .unwrap()
        .presets(&mut props_reg)
        .into_iter()
        .next()
        .unwrap()
        .properties;
    let (_, mut core) = registry.create(&mut props_reg, &props).unwrap();
    let mut host = HeadlessHost;
    core.load_binary(&mut host, "tiny", &[0x61, 0x09, 0x16, 0x02], None).unwrap();
    let unit = core.execution_unit(0).unwrap();
    assert_eq!(unit.cpu_state(), cadmium::CpuState::Normal, "{:?}", unit.error_message());
    assert_eq!(unit.pc(), 0x600);
}

#[test]
fn exit_codes_follow_error_kind() {
    use cadmium::CadmiumError;
    assert_eq!(CadmiumError::UnknownPropertyClass { class: "X".into() }.exit_code(), 2);
    assert_eq!(
        CadmiumError::IllegalOpcode { opcode: 0xF000, address: 0x200 }.exit_code(),
        3
    );
}
