use std::sync::atomic::{AtomicU32, Ordering};

use rec_backend::code_buffer::CodeBuffer;
use rec_backend::{
    Abi, BlockState, CodeGenerator, CompiledBlock, CompilerOptions, RegSize, Value, SYSV, WIN64,
};
use rec_core::{CpuState, GuestReg};
use rec_exec::asm_functions;

fn g(n: u8) -> GuestReg {
    GuestReg::gpr(n)
}

/// Calls seen with a misaligned stack.
static MISALIGNED: AtomicU32 = AtomicU32::new(0);

fn check_alignment() {
    let sp: u64;
    unsafe { std::arch::asm!("mov {}, rsp", out(reg) sp) };
    if sp % 16 != 0 {
        MISALIGNED.fetch_add(1, Ordering::Relaxed);
    }
}

extern "C" fn ret7() -> u64 {
    check_alignment();
    7
}

extern "C" fn double(a: u64) -> u64 {
    check_alignment();
    a * 2
}

extern "C" fn weigh2(a: u64, b: u64) -> u64 {
    check_alignment();
    a + 10 * b
}

extern "C" fn weigh3(a: u64, b: u64, c: u64) -> u64 {
    check_alignment();
    a + 10 * b + 100 * c
}

extern "C" fn weigh4(a: u64, b: u64, c: u64, d: u64) -> u64 {
    check_alignment();
    a + 10 * b + 100 * c + 1000 * d
}

extern "win64" fn weigh4_win64(a: u64, b: u64, c: u64, d: u64) -> u64 {
    check_alignment();
    a + 10 * b + 100 * c + 1000 * d
}

extern "C" fn clobber_caller_saved() {
    unsafe {
        std::arch::asm!(
            "mov rcx, -1",
            "mov rdx, -1",
            "mov rsi, -1",
            "mov rdi, -1",
            "mov r8, -1",
            "mov r9, -1",
            "mov r10, -1",
            "mov r11, -1",
            out("rcx") _,
            out("rdx") _,
            out("rsi") _,
            out("rdi") _,
            out("r8") _,
            out("r9") _,
            out("r10") _,
            out("r11") _,
        )
    };
}

fn generate(
    buf: &mut CodeBuffer,
    abi: &'static Abi,
    body: impl FnOnce(&mut CodeGenerator<'_>),
) -> CompiledBlock {
    let mut cg = CodeGenerator::new(buf, abi, asm_functions(), CompilerOptions::default());
    let start = cg.buf().offset();
    let mut st = BlockState::new(0);
    cg.emit_begin_block();
    body(&mut cg);
    cg.emit_end_block(&mut st);
    cg.finalize_block(start).unwrap()
}

/// Emit a call and check the tracked stack depth is back where it was.
fn call(
    cg: &mut CodeGenerator<'_>,
    ptr: *const u8,
    args: &[Value],
    dst: GuestReg,
) {
    let depth = cg.stack_depth();
    let ret = cg
        .emit_function_call_ptr(Some(RegSize::S64), ptr, args)
        .unwrap();
    assert_eq!(cg.stack_depth(), depth);
    cg.emit_store_guest_register(dst, &ret);
}

#[test]
fn test_call_with_zero_to_four_args() {
    let mut cpu = CpuState::default();
    cpu.regs[1] = 1;
    cpu.regs[2] = 2;
    let mut buf = CodeBuffer::new(1 << 16).unwrap();
    let block = generate(&mut buf, &SYSV, |cg| {
        let a = Value::guest(g(1));
        let b = Value::guest(g(2));
        let c = Value::constant_u32(3);
        let d = Value::constant(4, RegSize::S64);
        call(cg, ret7 as extern "C" fn() -> u64 as *const u8, &[], g(10));
        call(cg, double as extern "C" fn(u64) -> u64 as *const u8, &[a], g(11));
        call(
            cg,
            weigh2 as extern "C" fn(u64, u64) -> u64 as *const u8,
            &[a, b],
            g(12),
        );
        call(
            cg,
            weigh3 as extern "C" fn(u64, u64, u64) -> u64 as *const u8,
            &[a, b, c],
            g(13),
        );
        call(
            cg,
            weigh4 as extern "C" fn(u64, u64, u64, u64) -> u64 as *const u8,
            &[a, b, c, d],
            g(14),
        );
    });

    let before = MISALIGNED.load(Ordering::Relaxed);
    unsafe { block.invoke(&mut cpu) };
    assert_eq!(MISALIGNED.load(Ordering::Relaxed), before);
    assert_eq!(cpu.regs[10], 7);
    assert_eq!(cpu.regs[11], 2);
    assert_eq!(cpu.regs[12], 21);
    assert_eq!(cpu.regs[13], 321);
    assert_eq!(cpu.regs[14], 4321);
}

#[test]
fn test_call_args_already_in_argument_registers() {
    let mut cpu = CpuState::default();
    for n in 1..=4u8 {
        cpu.regs[n as usize] = u32::from(n);
    }
    let mut buf = CodeBuffer::new(1 << 16).unwrap();
    let block = generate(&mut buf, &SYSV, |cg| {
        // Occupy the callee-saved registers so the arguments land in
        // rcx/rdx/rsi/rdi, in the wrong order for the call.
        let held: Vec<Value> = (5..10)
            .map(|n| cg.add_values(&Value::guest(g(n)), &Value::constant_u32(0)))
            .collect();
        let args: Vec<Value> = (1..=4)
            .map(|n| cg.add_values(&Value::guest(g(n)), &Value::constant_u32(0)))
            .collect();
        call(
            cg,
            weigh4 as extern "C" fn(u64, u64, u64, u64) -> u64 as *const u8,
            &args,
            g(20),
        );
        for (i, v) in held.iter().enumerate() {
            cg.emit_store_guest_register(g(21 + i as u8), v);
        }
    });
    cpu.regs[5..10].copy_from_slice(&[50, 60, 70, 80, 90]);
    unsafe { block.invoke(&mut cpu) };
    assert_eq!(cpu.regs[20], 4321);
    assert_eq!(&cpu.regs[21..26], &[50, 60, 70, 80, 90]);
}

#[test]
fn test_live_caller_saved_survive_call() {
    let mut cpu = CpuState::default();
    for n in 1..=10u8 {
        cpu.regs[n as usize] = 0x100 * u32::from(n);
    }
    let mut buf = CodeBuffer::new(1 << 16).unwrap();
    let block = generate(&mut buf, &SYSV, |cg| {
        let vals: Vec<Value> = (1..=10)
            .map(|n| cg.add_values(&Value::guest(g(n)), &Value::constant_u32(0)))
            .collect();
        assert!(!cg.regs().live_caller_saved().is_empty());
        let depth = cg.stack_depth();
        cg.emit_function_call_ptr(
            None,
            clobber_caller_saved as extern "C" fn() as *const u8,
            &[],
        );
        assert_eq!(cg.stack_depth(), depth);
        for (i, v) in vals.iter().enumerate() {
            cg.emit_store_guest_register(g(11 + i as u8), v);
        }
    });
    unsafe { block.invoke(&mut cpu) };
    for n in 1..=10usize {
        assert_eq!(cpu.regs[10 + n], 0x100 * n as u32, "r{}", 10 + n);
    }
}

#[test]
fn test_win64_call_sequence() {
    let mut cpu = CpuState::default();
    cpu.regs[1] = 1;
    cpu.regs[2] = 2;
    let mut buf = CodeBuffer::new(1 << 16).unwrap();
    let block = generate(&mut buf, &WIN64, |cg| {
        let args = [
            Value::guest(g(1)),
            Value::guest(g(2)),
            Value::constant_u32(3),
            Value::constant_u32(4),
        ];
        call(
            cg,
            weigh4_win64 as extern "win64" fn(u64, u64, u64, u64) -> u64 as *const u8,
            &args,
            g(10),
        );
    });

    let before = MISALIGNED.load(Ordering::Relaxed);
    let f: unsafe extern "win64" fn(*mut CpuState) = unsafe { std::mem::transmute(block.entry) };
    unsafe { f(&mut cpu) };
    assert_eq!(MISALIGNED.load(Ordering::Relaxed), before);
    assert_eq!(cpu.regs[10], 4321);
}

#[test]
fn test_stack_adjust_per_abi() {
    // Depth 8 (return address only): SysV needs 8 bytes, Win64 adds 32
    // bytes of shadow space on top.
    assert_eq!(SYSV.call_stack_adjust(8), 8);
    assert_eq!(SYSV.call_stack_adjust(16), 0);
    assert_eq!(WIN64.call_stack_adjust(8), 40);
    assert_eq!(WIN64.call_stack_adjust(16), 32);
    for depth in (8..128).step_by(8) {
        for abi in [&SYSV, &WIN64] {
            let adjust = abi.call_stack_adjust(depth);
            assert_eq!((depth + adjust) % abi.stack_align, 0);
            assert!(adjust >= abi.shadow_space);
        }
    }
}
