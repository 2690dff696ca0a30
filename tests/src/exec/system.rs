use rec_core::insn::encode::*;
use rec_core::GuestReg;
use rec_exec::{ExecError, ExecutionMode, Settings, System};

use crate::harness::CODE_BASE;

const MODES: [ExecutionMode; 3] = [
    ExecutionMode::Interpreter,
    ExecutionMode::CachedInterpreter,
    ExecutionMode::Recompiler,
];

fn g(n: u8) -> GuestReg {
    GuestReg::gpr(n)
}

fn settings(mode: ExecutionMode) -> Settings {
    Settings {
        execution_mode: mode,
        code_buffer_size: 1 << 20,
        ram_size: 64 * 1024,
        ..Settings::default()
    }
}

fn system(settings: Settings, words: &[u32]) -> System {
    let mut sys = System::new(settings).unwrap();
    sys.core.memory.load_words(CODE_BASE, words);
    sys.core.cpu.set_pc(CODE_BASE);
    sys
}

/// Counts r1 up to 10, then spins.
fn counting_loop() -> Vec<u32> {
    vec![
        addiu(g(1), GuestReg::ZERO, 0),
        addiu(g(2), GuestReg::ZERO, 10),
        addiu(g(1), g(1), 1),
        bne(g(1), g(2), -2),
        nop(),
        j(CODE_BASE + 0x14),
        nop(),
    ]
}

#[test]
fn test_all_modes_agree() {
    for mode in MODES {
        let mut sys = system(settings(mode), &counting_loop());
        let ran = sys.execute(1000).unwrap();
        assert!(ran >= 1000, "{mode:?}");
        assert_eq!(sys.total_ticks(), u64::from(ran));
        assert_eq!(sys.core.cpu.regs[1], 10, "{mode:?}");
        assert_eq!(sys.core.cpu.regs[2], 10, "{mode:?}");
        let pc = sys.core.cpu.pc;
        assert!(pc == CODE_BASE + 0x14 || pc == CODE_BASE + 0x18, "{mode:?} pc {pc:#x}");

        match mode {
            ExecutionMode::Interpreter => assert!(sys.cache().is_empty()),
            _ => assert!(!sys.cache().is_empty()),
        }
        assert_eq!(
            sys.code_buffer().is_some(),
            mode == ExecutionMode::Recompiler
        );
    }
}

#[test]
fn test_blocks_are_compiled_in_recompiler_mode() {
    let mut sys = system(settings(ExecutionMode::Recompiler), &counting_loop());
    sys.execute(100).unwrap();
    let entry = sys.cache().lookup(CODE_BASE).unwrap();
    assert!(entry.compiled.is_some());
    assert_eq!(entry.block.len(), 5);

    let mut sys = system(settings(ExecutionMode::CachedInterpreter), &counting_loop());
    sys.execute(100).unwrap();
    assert!(sys.cache().lookup(CODE_BASE).unwrap().compiled.is_none());
}

#[test]
fn test_self_modifying_code_is_picked_up() {
    let sub = 0x8000_2000;
    let main = [
        jal(sub),
        nop(),
        sw(g(7), 0, g(5)),
        jal(sub),
        nop(),
        j(CODE_BASE + 0x14),
        nop(),
    ];
    let routine = [addiu(g(3), g(3), 1), jr(GuestReg::RA), nop()];
    for mode in MODES {
        let mut sys = system(settings(mode), &main);
        sys.core.memory.load_words(sub, &routine);
        sys.core.cpu.regs[5] = sub;
        sys.core.cpu.regs[7] = addiu(g(3), g(3), 100);
        sys.execute(200).unwrap();
        assert_eq!(sys.core.cpu.regs[3], 101, "{mode:?}");
    }
}

#[test]
fn test_branch_in_delay_slot_runs_interpreted() {
    let words = [
        addiu(g(1), GuestReg::ZERO, 1),
        j(CODE_BASE + 0x10),
        j(CODE_BASE + 0x20),
        nop(),
        addiu(g(2), GuestReg::ZERO, 2),
        addiu(g(3), GuestReg::ZERO, 3),
        nop(),
        nop(),
        j(CODE_BASE + 0x20),
        nop(),
    ];
    for mode in MODES {
        let mut sys = system(settings(mode), &words);
        sys.execute(100).unwrap();
        let regs = &sys.core.cpu.regs;
        assert_eq!((regs[1], regs[2], regs[3]), (1, 2, 0), "{mode:?}");
        if mode == ExecutionMode::Recompiler {
            let entry = sys.cache().lookup(CODE_BASE).unwrap();
            assert!(entry.compiled.is_none());
        }
    }
}

#[test]
fn test_code_buffer_exhaustion_flushes_and_continues() {
    // Every other instruction goes through the interpreter call-out, so
    // the program needs several times the buffer's worth of host code.
    const PAIRS: usize = 16 * 1024;
    let mut words = Vec::with_capacity(2 * PAIRS + 2);
    for _ in 0..PAIRS {
        words.push(addiu(g(1), g(1), 1));
        words.push(sb(GuestReg::ZERO, 0, GuestReg::ZERO));
    }
    let end = CODE_BASE + 4 * words.len() as u32;
    words.push(j(end));
    words.push(nop());

    let settings = Settings {
        execution_mode: ExecutionMode::Recompiler,
        code_buffer_size: 64 * 1024,
        ram_size: 256 * 1024,
        ..Settings::default()
    };
    let mut sys = system(settings, &words);
    sys.execute(3 * PAIRS as u32).unwrap();
    assert_eq!(sys.core.cpu.regs[1], PAIRS as u32);
    let max_blocks = 2 * PAIRS / sys.settings().max_block_instructions as usize;
    assert!(sys.cache().len() < max_blocks);
}

#[test]
fn test_invalid_settings_are_rejected() {
    let bad = Settings {
        ram_size: 3000,
        ..Settings::default()
    };
    assert!(matches!(System::new(bad), Err(ExecError::Settings(_))));
}

#[test]
fn test_flush_blocks() {
    let mut sys = system(settings(ExecutionMode::Recompiler), &counting_loop());
    sys.execute(100).unwrap();
    assert!(!sys.cache().is_empty());
    sys.flush_blocks();
    assert!(sys.cache().is_empty());
    assert_eq!(sys.code_buffer().unwrap().offset(), 0);
    // Still runs after the flush.
    sys.core.cpu.set_pc(CODE_BASE);
    sys.execute(100).unwrap();
    assert_eq!(sys.core.cpu.regs[1], 10);
}
