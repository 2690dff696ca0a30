//! Block compiler.
//!
//! [`CodeGenerator`] turns one decoded [`CodeBlock`] into a host function
//! `extern "C" fn(*mut CpuState)`. Instructions with a specialized
//! compiler are emitted inline against the register cache; everything
//! else calls back into the interpreter for that single instruction.
//!
//! Guest `pc`/`npc` and the cycle counter are synchronized lazily: the
//! generator accumulates how far the structure lags behind
//! ([`BlockState::delayed_pc_add`], [`BlockState::delayed_cycles_add`])
//! and only emits the adds where something observes them.

mod compile;
mod emit;
mod value_ops;

use rec_core::cpu::{
    CURRENT_INSTRUCTION_IN_BRANCH_DELAY_SLOT_OFFSET, CURRENT_INSTRUCTION_PC_OFFSET,
    DOWNCOUNT_OFFSET, EXCEPTION_RAISED_OFFSET, LOAD_DELAY_REG_OFFSET, LOAD_DELAY_VALUE_OFFSET,
    NEXT_INSTRUCTION_IS_BRANCH_DELAY_SLOT_OFFSET, NEXT_LOAD_DELAY_REG_OFFSET,
    NEXT_LOAD_DELAY_VALUE_OFFSET, NPC_OFFSET, PC_OFFSET, PENDING_TICKS_OFFSET, REGS_OFFSET,
};
use rec_core::{CodeBlock, CodeBlockInstruction, CpuState, GuestReg, LOAD_DELAY_NONE};

use crate::abi::{Abi, HOST_ABI};
use crate::code_buffer::{CodeBuffer, BLOCK_ALIGNMENT};
use crate::error::{CompileError, Result};
use crate::label::Label;
use crate::regcache::RegisterCache;
use crate::value::{RegSize, Value};
use crate::x86_64::{
    emit_arith_mi, emit_arith_ri, emit_arith_rm, emit_jcc_placeholder, emit_jmp_placeholder,
    emit_load, emit_load_zx, emit_mov_rr, emit_pop, emit_ret, emit_store, emit_store_byte,
    emit_store_imm, emit_store_imm8, emit_store_sib, emit_test_rr, ArithOp, X86Cond, OPC_MOVZBL,
    STATE_REG, TEMP_REG,
};

pub use compile::has_specialized_compiler;
pub use value_ops::ValueOp;

/// Host signature of a compiled block.
pub type BlockFn = unsafe extern "C" fn(*mut CpuState);

/// Interpreter entry for one instruction word. Sees the guest-state
/// structure exactly as the interpreter would between two steps.
pub type InterpretFn = unsafe extern "C" fn(*mut CpuState, u32);

/// Runtime routines generated code calls out to.
#[derive(Debug, Clone, Copy)]
pub struct AsmFunctions {
    pub interpret_instruction: InterpretFn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompilerOptions {
    /// Exit before the first instruction when `pending_ticks >= downcount`.
    pub check_downcount: bool,
    /// Route every instruction through the interpreter call-out.
    pub disable_specialization: bool,
}

/// A block in the code buffer.
#[derive(Debug, Clone, Copy)]
pub struct CompiledBlock {
    pub entry: *const u8,
    /// Offset of the entry in the code buffer.
    pub offset: usize,
    /// Host bytes, alignment padding included.
    pub size: usize,
}

impl CompiledBlock {
    /// Run the block against `state`.
    ///
    /// # Safety
    /// `state` must be valid for the whole call, the code buffer the block
    /// lives in must not have been reset, and the runtime routines it was
    /// compiled against must accept `state`.
    pub unsafe fn invoke(&self, state: *mut CpuState) {
        let f: BlockFn = std::mem::transmute(self.entry);
        f(state)
    }
}

/// Compile-time state threaded through one block.
#[derive(Debug, Clone, Default)]
pub struct BlockState {
    pub instruction_index: usize,
    pub current_pc: u32,
    /// Bytes `pc` and `npc` in the structure lag behind.
    pub delayed_pc_add: u32,
    /// Cycles not yet added to `pending_ticks`.
    pub delayed_cycles_add: u32,
    /// The instruction being compiled sits in a branch delay slot.
    pub in_delay_slot: bool,
    /// Set by a branch; becomes `in_delay_slot` one instruction later.
    pub next_is_delay_slot: bool,
    /// `current_instruction_in_branch_delay_slot` was set to 1 by
    /// generated code and must be cleared at the end of the slot.
    pub delay_slot_flag_dirty: bool,

    /// A delayed load may be waiting in `load_delay_reg` at runtime.
    pub load_delay_dirty: bool,
    /// Its target when known at compile time.
    pub load_delay_reg: Option<GuestReg>,
    /// The current instruction may have filled `next_load_delay_reg`.
    pub next_load_delay_dirty: bool,
    pub next_load_delay_reg: Option<GuestReg>,

    /// Guest registers written by the current instruction's inline code.
    pub instruction_writes: u64,
    /// The current instruction went through the interpreter call-out.
    pub instruction_was_fallback: bool,
}

impl BlockState {
    /// State at block entry: nothing is known about the load delay slot.
    pub fn new(pc: u32) -> Self {
        Self {
            current_pc: pc,
            load_delay_dirty: true,
            ..Self::default()
        }
    }

    #[inline]
    pub fn wrote(&self, reg: GuestReg) -> bool {
        self.instruction_writes & (1u64 << reg.index()) != 0
    }

    fn written_registers(&self) -> impl Iterator<Item = GuestReg> + '_ {
        GuestReg::all().filter(|&r| self.wrote(r))
    }
}

/// Where the generator is in emitting a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilePhase {
    Idle,
    BlockPrologueEmitted,
    PerInstruction(usize),
    BlockEpilogueEmitted,
    Finalized,
}

/// Space below which compilation is not attempted.
const MIN_BLOCK_SPACE: usize = 256;

pub struct CodeGenerator<'a> {
    buf: &'a mut CodeBuffer,
    abi: &'static Abi,
    functions: AsmFunctions,
    options: CompilerOptions,
    regs: RegisterCache,
    /// Bytes pushed below the caller's stack pointer, return address
    /// included.
    stack_depth: u32,
    exit_label: Label,
    phase: CompilePhase,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(
        buf: &'a mut CodeBuffer,
        abi: &'static Abi,
        functions: AsmFunctions,
        options: CompilerOptions,
    ) -> Self {
        Self {
            buf,
            abi,
            functions,
            options,
            regs: RegisterCache::new(abi),
            stack_depth: 8,
            exit_label: Label::new(),
            phase: CompilePhase::Idle,
        }
    }

    pub fn buf(&self) -> &CodeBuffer {
        self.buf
    }

    pub fn regs(&self) -> &RegisterCache {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut RegisterCache {
        &mut self.regs
    }

    pub fn stack_depth(&self) -> u32 {
        self.stack_depth
    }

    pub fn phase(&self) -> CompilePhase {
        self.phase
    }

    /// Compile `block` into the code buffer.
    ///
    /// On [`CompileError::CodeBufferFull`] the buffer is rewound to where
    /// the block started.
    pub fn compile_block(&mut self, block: &CodeBlock) -> Result<CompiledBlock> {
        validate_block(block)?;
        if self.buf.remaining() < MIN_BLOCK_SPACE {
            return Err(CompileError::CodeBufferFull);
        }

        self.regs = RegisterCache::new(self.abi);
        self.stack_depth = 8;
        self.exit_label = Label::new();
        self.phase = CompilePhase::Idle;

        let start = self.buf.offset();
        let mut st = BlockState::new(block.pc);
        self.emit_begin_block();
        for (i, insn) in block.instructions.iter().enumerate() {
            st.instruction_index = i;
            debug_assert_eq!(insn.is_in_delay_slot, st.next_is_delay_slot);
            self.instruction_prologue(&mut st, insn, 1);
            self.compile_instruction(&mut st, insn);
            self.instruction_epilogue(&mut st, insn);
        }
        self.emit_end_block(&mut st);

        let compiled = self.finalize_block(start);
        match &compiled {
            Ok(b) => tracing::debug!(
                pc = format_args!("{:#010x}", block.pc),
                guest_instructions = block.len(),
                host_bytes = b.size,
                "compiled block"
            ),
            Err(_) => tracing::debug!(pc = format_args!("{:#010x}", block.pc), "code buffer full"),
        }
        compiled
    }

    /// Pad the block emitted since `start` and hand it out, or rewind the
    /// buffer if anything did not fit.
    pub fn finalize_block(&mut self, start: usize) -> Result<CompiledBlock> {
        debug_assert_eq!(self.phase, CompilePhase::BlockEpilogueEmitted);
        self.buf.align_to(BLOCK_ALIGNMENT, 0xCC);
        self.phase = CompilePhase::Finalized;

        if self.buf.overflowed() {
            self.buf.set_offset(start);
            self.buf.clear_overflow();
            return Err(CompileError::CodeBufferFull);
        }
        Ok(CompiledBlock {
            entry: self.buf.ptr_at(start),
            offset: start,
            size: self.buf.offset() - start,
        })
    }

    /// Specialized compiler if there is one and it accepts the
    /// instruction, interpreter call-out otherwise.
    pub fn compile_instruction(&mut self, st: &mut BlockState, insn: &CodeBlockInstruction) {
        if !self.options.disable_specialization {
            if let Some(f) = compile::compile_fn(insn.op) {
                if f(self, st, insn) {
                    return;
                }
                // A declining compiler must not have emitted anything
                // that changes the cache.
                st.instruction_writes = 0;
            }
        }
        self.compile_fallback(st, insn);
    }

    // -- Block framing --

    /// Save callee-saved registers and load the state pointer.
    pub fn emit_begin_block(&mut self) {
        debug_assert!(matches!(
            self.phase,
            CompilePhase::Idle | CompilePhase::Finalized
        ));
        for &reg in self.abi.callee_saved {
            self.emit_push_host_reg(reg);
        }
        emit_mov_rr(self.buf, true, STATE_REG, self.abi.arg_regs[0]);
        self.phase = CompilePhase::BlockPrologueEmitted;
    }

    /// Write everything back, bind the shared exit and return.
    pub fn emit_end_block(&mut self, st: &mut BlockState) {
        self.sync_pc(st);
        self.regs.flush_all(self.buf);
        self.add_pending_cycles(st);

        let mut exit = std::mem::take(&mut self.exit_label);
        exit.bind(self.buf);
        for &reg in self.abi.callee_saved.iter().rev() {
            emit_pop(self.buf, reg);
        }
        emit_ret(self.buf);
        self.stack_depth = 8;
        self.phase = CompilePhase::BlockEpilogueEmitted;
        #[cfg(debug_assertions)]
        self.regs.assert_consistent();
    }

    // -- Per-instruction bookkeeping --

    pub fn instruction_prologue(
        &mut self,
        st: &mut BlockState,
        insn: &CodeBlockInstruction,
        cycles: u32,
    ) {
        if st.instruction_index == 0 && self.options.check_downcount {
            self.emit_downcount_check(st);
        }
        self.phase = CompilePhase::PerInstruction(st.instruction_index);
        st.current_pc = insn.pc;
        st.instruction_writes = 0;
        st.instruction_was_fallback = false;
        st.in_delay_slot = std::mem::take(&mut st.next_is_delay_slot);
        if !st.in_delay_slot {
            st.delayed_pc_add += 4;
        }
        st.delayed_cycles_add += cycles;
        tracing::trace!(pc = format_args!("{:#010x}", insn.pc), insn = %insn.instruction, "compile");
    }

    pub fn instruction_epilogue(&mut self, st: &mut BlockState, _insn: &CodeBlockInstruction) {
        self.regs.release_all_scratch();
        self.regs.unlock_all();

        self.update_load_delay(st);

        if st.in_delay_slot {
            // The branch already stored its outcome in npc.
            emit_load(self.buf, false, TEMP_REG, STATE_REG, NPC_OFFSET);
            emit_store(self.buf, false, TEMP_REG, STATE_REG, PC_OFFSET);
            emit_arith_mi(self.buf, ArithOp::Add, false, STATE_REG, NPC_OFFSET, 4);
            if st.delay_slot_flag_dirty {
                emit_store_imm8(
                    self.buf,
                    STATE_REG,
                    CURRENT_INSTRUCTION_IN_BRANCH_DELAY_SLOT_OFFSET,
                    0,
                );
                st.delay_slot_flag_dirty = false;
            }
        }
    }

    fn update_load_delay(&mut self, st: &mut BlockState) {
        if !st.load_delay_dirty && !st.next_load_delay_dirty {
            return;
        }
        let move_next = st.next_load_delay_dirty;
        let known = st.load_delay_reg.is_some() && !st.instruction_was_fallback;
        // The interpreter cancels on its own; inline code leaves that to
        // the guard.
        let skip_check_old_value = known || st.instruction_was_fallback || st.instruction_writes == 0;
        self.emit_delay_slot_update(st, known, skip_check_old_value, move_next);
    }

    /// Commit the load sitting in `load_delay_reg`, then advance the
    /// next-load slot.
    ///
    /// With `skip_check_for_delay` the target is taken from
    /// [`BlockState::load_delay_reg`] and the commit is decided at compile
    /// time. Otherwise the target is read at runtime; unless
    /// `skip_check_old_value` is set the commit is skipped when the
    /// instruction itself wrote the target.
    pub fn emit_delay_slot_update(
        &mut self,
        st: &mut BlockState,
        skip_check_for_delay: bool,
        skip_check_old_value: bool,
        move_next: bool,
    ) {
        if st.load_delay_dirty {
            match st.load_delay_reg.filter(|_| skip_check_for_delay) {
                Some(reg) if st.wrote(reg) => {
                    tracing::trace!(reg = %reg, "delayed load cancelled");
                }
                Some(reg) => {
                    emit_load(self.buf, false, TEMP_REG, STATE_REG, LOAD_DELAY_VALUE_OFFSET);
                    emit_store(
                        self.buf,
                        false,
                        TEMP_REG,
                        STATE_REG,
                        rec_core::cpu::guest_reg_offset(reg),
                    );
                    self.regs.discard_guest_register(reg);
                }
                None => self.emit_runtime_load_delay_commit(st, skip_check_old_value),
            }
        }

        if move_next {
            emit_load_zx(self.buf, OPC_MOVZBL, TEMP_REG, STATE_REG, NEXT_LOAD_DELAY_REG_OFFSET);
            emit_store_byte(self.buf, TEMP_REG, STATE_REG, LOAD_DELAY_REG_OFFSET);
            emit_load(self.buf, false, TEMP_REG, STATE_REG, NEXT_LOAD_DELAY_VALUE_OFFSET);
            emit_store(self.buf, false, TEMP_REG, STATE_REG, LOAD_DELAY_VALUE_OFFSET);
            emit_store_imm8(self.buf, STATE_REG, NEXT_LOAD_DELAY_REG_OFFSET, LOAD_DELAY_NONE);
        } else if st.load_delay_dirty {
            emit_store_imm8(self.buf, STATE_REG, LOAD_DELAY_REG_OFFSET, LOAD_DELAY_NONE);
        }

        st.load_delay_dirty = std::mem::take(&mut st.next_load_delay_dirty);
        st.load_delay_reg = st.next_load_delay_reg.take();
    }

    fn emit_runtime_load_delay_commit(&mut self, st: &BlockState, skip_check_old_value: bool) {
        // Claimed before any jump so both paths agree on the cache.
        let value_reg = self.regs.allocate_host_reg(self.buf);

        let mut skip = Label::new();
        emit_load_zx(self.buf, OPC_MOVZBL, TEMP_REG, STATE_REG, LOAD_DELAY_REG_OFFSET);
        emit_arith_ri(self.buf, ArithOp::Cmp, false, TEMP_REG, LOAD_DELAY_NONE as i32);
        let at = emit_jcc_placeholder(self.buf, X86Cond::Je);
        skip.add_use(self.buf, at);
        if !skip_check_old_value {
            for reg in st.written_registers() {
                emit_arith_ri(self.buf, ArithOp::Cmp, false, TEMP_REG, reg.index() as i32);
                let at = emit_jcc_placeholder(self.buf, X86Cond::Je);
                skip.add_use(self.buf, at);
            }
        }
        emit_load(self.buf, false, value_reg, STATE_REG, LOAD_DELAY_VALUE_OFFSET);
        emit_store_sib(self.buf, false, value_reg, STATE_REG, TEMP_REG, 2, REGS_OFFSET);
        skip.bind(self.buf);

        self.regs.release_scratch(value_reg);
        // Any clean copy may now be stale.
        self.regs.discard_clean_registers();
    }

    // -- Lazy synchronization --

    /// Bring `pc` and `npc` in the structure up to date.
    pub fn sync_pc(&mut self, st: &mut BlockState) {
        if st.delayed_pc_add > 0 {
            self.emit_pc_add(st.delayed_pc_add);
            st.delayed_pc_add = 0;
        }
    }

    fn emit_pc_add(&mut self, amount: u32) {
        emit_arith_mi(self.buf, ArithOp::Add, false, STATE_REG, PC_OFFSET, amount as i32);
        emit_arith_mi(self.buf, ArithOp::Add, false, STATE_REG, NPC_OFFSET, amount as i32);
    }

    pub fn sync_current_instruction_pc(&mut self, st: &BlockState) {
        emit_store_imm(
            self.buf,
            false,
            STATE_REG,
            CURRENT_INSTRUCTION_PC_OFFSET,
            st.current_pc as i32,
        );
    }

    pub fn add_pending_cycles(&mut self, st: &mut BlockState) {
        if st.delayed_cycles_add > 0 {
            self.emit_cycles_add(st.delayed_cycles_add);
            st.delayed_cycles_add = 0;
        }
    }

    fn emit_cycles_add(&mut self, cycles: u32) {
        emit_arith_mi(
            self.buf,
            ArithOp::Add,
            false,
            STATE_REG,
            PENDING_TICKS_OFFSET,
            cycles as i32,
        );
    }

    // -- Block exits --

    /// Leave the block when `value` is non-zero. Dirty registers and
    /// pending cycles are written out on the exit path only.
    pub fn emit_block_exit_on_bool(&mut self, st: &BlockState, value: &Value) {
        let reg = match value.host_reg() {
            Some(r) => r,
            None => {
                if value.constant_value().unwrap_or(0) != 0 {
                    self.emit_exit_stub(st, true);
                }
                return;
            }
        };
        emit_test_rr(self.buf, value.size == RegSize::S64, reg, reg);
        let mut skip = Label::new();
        let at = emit_jcc_placeholder(self.buf, X86Cond::Je);
        skip.add_use(self.buf, at);
        self.emit_exit_stub(st, true);
        skip.bind(self.buf);
    }

    /// Exit path: optional register write-back, exception flag reset,
    /// cycle accounting, jump to the shared epilogue.
    fn emit_exit_stub(&mut self, st: &BlockState, flush: bool) {
        if flush {
            self.regs.emit_flush_for_exit(self.buf);
        }
        emit_store_imm8(self.buf, STATE_REG, EXCEPTION_RAISED_OFFSET, 0);
        if st.delayed_cycles_add > 0 {
            self.emit_cycles_add(st.delayed_cycles_add);
        }
        let at = emit_jmp_placeholder(self.buf);
        self.exit_label.add_use(self.buf, at);
    }

    fn emit_downcount_check(&mut self, st: &BlockState) {
        emit_load(self.buf, false, TEMP_REG, STATE_REG, PENDING_TICKS_OFFSET);
        emit_arith_rm(self.buf, ArithOp::Cmp, false, TEMP_REG, STATE_REG, DOWNCOUNT_OFFSET);
        let mut skip = Label::new();
        let at = emit_jcc_placeholder(self.buf, X86Cond::Jb);
        skip.add_use(self.buf, at);
        self.emit_exit_stub(st, true);
        skip.bind(self.buf);
    }

    // -- Interpreter call-out --

    /// Run one instruction through the interpreter.
    pub fn compile_fallback(&mut self, st: &mut BlockState, insn: &CodeBlockInstruction) {
        st.instruction_was_fallback = true;
        st.instruction_writes = 0;

        self.sync_current_instruction_pc(st);
        self.sync_pc(st);
        if st.in_delay_slot && !st.delay_slot_flag_dirty {
            emit_store_imm8(
                self.buf,
                STATE_REG,
                CURRENT_INSTRUCTION_IN_BRANCH_DELAY_SLOT_OFFSET,
                1,
            );
            st.delay_slot_flag_dirty = true;
        }

        self.regs.invalidate_all(self.buf);
        let interpret = self.functions.interpret_instruction as *const u8;
        self.emit_function_call_ptr(
            None,
            interpret,
            &[
                Value::host(STATE_REG, RegSize::S64),
                Value::constant_u32(insn.bits()),
            ],
        );

        if insn.is_branch {
            // Delay slots are tracked at compile time.
            emit_store_imm8(
                self.buf,
                STATE_REG,
                NEXT_INSTRUCTION_IS_BRANCH_DELAY_SLOT_OFFSET,
                0,
            );
            st.next_is_delay_slot = true;
        }

        if insn.is_load_delay_producing {
            let rt = insn.instruction.rt();
            if !rt.is_zero() {
                st.next_load_delay_dirty = true;
                st.next_load_delay_reg = Some(rt);
            }
        }

        if insn.can_trap {
            emit_load_zx(self.buf, OPC_MOVZBL, TEMP_REG, STATE_REG, EXCEPTION_RAISED_OFFSET);
            self.emit_block_exit_on_bool(st, &Value::host(TEMP_REG, RegSize::S8));
        }
    }
}

fn validate_block(block: &CodeBlock) -> Result<()> {
    if block.is_empty() {
        return Err(CompileError::EmptyBlock);
    }
    let insns = &block.instructions;
    for (i, insn) in insns.iter().enumerate() {
        if !insn.is_branch {
            continue;
        }
        let slot = insns
            .get(i + 1)
            .ok_or(CompileError::MissingDelaySlot { pc: insn.pc })?;
        if slot.is_branch {
            return Err(CompileError::BranchInDelaySlot { pc: slot.pc });
        }
        if i + 2 < insns.len() {
            return Err(CompileError::InstructionsAfterDelaySlot { pc: insn.pc });
        }
    }
    Ok(())
}

/// Compile `block` for the host ABI.
pub fn compile_block(
    buf: &mut CodeBuffer,
    functions: AsmFunctions,
    options: CompilerOptions,
    block: &CodeBlock,
) -> Result<CompiledBlock> {
    CodeGenerator::new(buf, HOST_ABI, functions, options).compile_block(block)
}
