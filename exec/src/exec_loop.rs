use rec_backend::{compile_block, CodeBuffer, CompileError, CompiledBlock};
use rec_core::CodeBlock;
use rec_frontend::decode_block;

use crate::block_cache::{BlockCache, CachedBlock};
use crate::interpreter::{asm_functions, Core};
use crate::memory::Memory;
use crate::settings::{ExecutionMode, Settings};
use crate::{ExecError, Result};

/// Guest machine plus the translation state driving it.
pub struct System {
    /// Boxed so the state pointer handed to compiled code stays put.
    pub core: Box<Core>,
    settings: Settings,
    code_buffer: Option<CodeBuffer>,
    cache: BlockCache,
    total_ticks: u64,
}

impl System {
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let code_buffer = match settings.execution_mode {
            ExecutionMode::Recompiler => Some(CodeBuffer::new(settings.code_buffer_size)?),
            _ => None,
        };
        Ok(Self {
            core: Box::new(Core::new(Memory::new(settings.ram_size))),
            settings,
            code_buffer,
            cache: BlockCache::new(),
            total_ticks: 0,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn code_buffer(&self) -> Option<&CodeBuffer> {
        self.code_buffer.as_ref()
    }

    /// Ticks executed over the lifetime of the system.
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Drop all cached blocks and rewind the code buffer.
    pub fn flush_blocks(&mut self) {
        self.cache.flush();
        self.core.memory.clear_code_pages();
        if let Some(buf) = self.code_buffer.as_mut() {
            buf.reset();
        }
    }

    /// Run for at least `cycles` ticks. Returns the ticks actually run,
    /// which may overshoot by the tail of the last block.
    pub fn execute(&mut self, cycles: u32) -> Result<u32> {
        self.core.cpu.pending_ticks = 0;
        self.core.cpu.downcount = cycles;

        while self.core.cpu.pending_ticks < self.core.cpu.downcount {
            match self.settings.execution_mode {
                ExecutionMode::Interpreter => {
                    self.core.step();
                }
                _ => {
                    self.execute_block()?;
                    self.invalidate_dirty_pages();
                }
            }
        }

        let ran = self.core.cpu.pending_ticks;
        self.total_ticks += u64::from(ran);
        Ok(ran)
    }

    fn invalidate_dirty_pages(&mut self) {
        for page in self.core.memory.take_dirty_pages() {
            self.cache.invalidate_page(page);
        }
    }

    /// Run the block at the current pc, building it first on a miss.
    fn execute_block(&mut self) -> Result<()> {
        // Blocks never start inside a delay slot.
        if self.core.cpu.next_instruction_is_branch_delay_slot != 0 {
            self.core.step();
            return Ok(());
        }

        let pc = self.core.cpu.pc;
        if self.cache.lookup(pc).is_none() && !self.build_block(pc)? {
            self.core.step();
            return Ok(());
        }
        let Some(entry) = self.cache.lookup(pc) else {
            return Ok(());
        };

        match entry.compiled {
            Some(compiled) => {
                let state = std::ptr::addr_of_mut!(self.core.cpu);
                // SAFETY: `state` is the first field of a boxed `Core`, as
                // `interpret_instruction` expects, and the buffer holding
                // the block has not been reset since it was cached.
                unsafe { compiled.invoke(state) };
            }
            None => {
                let block = entry.block.clone();
                interpret_block(&mut self.core, &block);
            }
        }
        Ok(())
    }

    /// Decode and cache the block at `pc`. Returns `false` if nothing
    /// could be decoded there.
    fn build_block(&mut self, pc: u32) -> Result<bool> {
        let block = match decode_block(&self.core.memory, pc, self.settings.max_block_instructions) {
            Ok(block) => block,
            Err(e) => {
                tracing::trace!(error = %e, "decode failed, stepping");
                return Ok(false);
            }
        };

        let compiled = match self.settings.execution_mode {
            ExecutionMode::Recompiler => self.compile(&block)?,
            _ => None,
        };

        let pages: Vec<u32> = block
            .pages()
            .filter_map(|p| self.core.memory.ram_page(p << rec_core::GUEST_PAGE_SHIFT))
            .collect();
        for &page in &pages {
            self.core.memory.set_code_page(page);
        }
        self.cache.insert(CachedBlock { block, compiled }, pages);
        Ok(true)
    }

    /// Compile `block`, resetting the code buffer once if it is full.
    /// `None` means the block runs on the cached interpreter.
    fn compile(&mut self, block: &CodeBlock) -> Result<Option<CompiledBlock>> {
        let options = self.settings.compiler_options();
        let mut retried = false;
        loop {
            let Some(buf) = self.code_buffer.as_mut() else {
                return Ok(None);
            };
            match compile_block(buf, asm_functions(), options, block) {
                Ok(compiled) => return Ok(Some(compiled)),
                Err(CompileError::CodeBufferFull) if !retried => {
                    tracing::warn!(
                        used = buf.offset(),
                        cached = self.cache.len(),
                        "code buffer full, flushing all blocks"
                    );
                    self.flush_blocks();
                    retried = true;
                }
                Err(e @ CompileError::CodeBufferFull) => return Err(ExecError::Compile(e)),
                Err(e) => {
                    tracing::warn!(
                        pc = format_args!("{:#010x}", block.pc),
                        error = %e,
                        "block rejected, interpreting"
                    );
                    return Ok(None);
                }
            }
        }
    }
}

/// Interpret the cached instructions of `block` until it ends or raises
/// an exception.
pub fn interpret_block(core: &mut Core, block: &CodeBlock) {
    for insn in &block.instructions {
        if core.step_with(insn.bits()) {
            break;
        }
    }
}
