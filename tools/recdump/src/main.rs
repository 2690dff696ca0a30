//! rec-dump: decode, compile and run raw MIPS code images.
//!
//! `dump` prints each guest block next to the host code generated for
//! it; `run` executes an image and prints the final register file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rec_backend::{compile_block, has_specialized_compiler, CodeBuffer, CompilerOptions};
use rec_core::{CodeBlock, GuestReg, NUM_GPRS};
use rec_exec::{asm_functions, ExecutionMode, Memory, Settings, System};
use rec_frontend::decode_block;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rec-dump", version, about = "MIPS block recompiler inspection tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode and compile blocks, printing guest and host code.
    Dump {
        /// Raw little-endian code image.
        image: PathBuf,
        /// Guest address the image is loaded at.
        #[arg(long, default_value = "0x80010000", value_parser = parse_addr)]
        base: u32,
        /// First block to decode (default: the load address).
        #[arg(long, value_parser = parse_addr)]
        start: Option<u32>,
        /// Number of consecutive blocks to dump.
        #[arg(long, default_value_t = 1)]
        count: usize,
        #[arg(long, default_value_t = rec_frontend::DEFAULT_MAX_BLOCK_INSTRUCTIONS)]
        max_insns: u32,
        /// Route every instruction through the interpreter call-out.
        #[arg(long)]
        no_specialization: bool,
    },
    /// Run an image and print the final registers.
    Run {
        image: PathBuf,
        #[arg(long, default_value = "0x80010000", value_parser = parse_addr)]
        base: u32,
        /// Entry point (default: the load address).
        #[arg(long, value_parser = parse_addr)]
        entry: Option<u32>,
        /// TOML settings file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the execution mode from the settings.
        #[arg(long)]
        mode: Option<Mode>,
        #[arg(long, default_value_t = 1_000_000)]
        cycles: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Interpreter,
    CachedInterpreter,
    Recompiler,
}

impl From<Mode> for ExecutionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Interpreter => ExecutionMode::Interpreter,
            Mode::CachedInterpreter => ExecutionMode::CachedInterpreter,
            Mode::Recompiler => ExecutionMode::Recompiler,
        }
    }
}

fn parse_addr(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid address {s:?}: {e}"))
}

fn read_image(path: &Path, ram_size: usize) -> Result<Vec<u8>> {
    let data = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if data.len() > ram_size {
        bail!(
            "{} is {} bytes, larger than guest RAM ({ram_size} bytes)",
            path.display(),
            data.len()
        );
    }
    Ok(data)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Dump {
            image,
            base,
            start,
            count,
            max_insns,
            no_specialization,
        } => {
            let mut memory = Memory::default();
            memory.load(base, &read_image(&image, memory.ram_size())?);
            let options = CompilerOptions {
                check_downcount: true,
                disable_specialization: no_specialization,
            };
            dump(&memory, start.unwrap_or(base), count, max_insns, options)
        }
        Command::Run {
            image,
            base,
            entry,
            config,
            mode,
            cycles,
        } => {
            let mut settings = match config {
                Some(path) => Settings::load(&path)
                    .with_context(|| format!("loading settings from {}", path.display()))?,
                None => Settings::default(),
            };
            if let Some(mode) = mode {
                settings.execution_mode = mode.into();
            }
            run(settings, &image, base, entry.unwrap_or(base), cycles)
        }
    }
}

fn dump(
    memory: &Memory,
    mut pc: u32,
    count: usize,
    max_insns: u32,
    options: CompilerOptions,
) -> Result<()> {
    let mut buf = CodeBuffer::new(1 << 20).context("failed to map code buffer")?;
    for _ in 0..count {
        let block = decode_block(memory, pc, max_insns)
            .with_context(|| format!("decoding block at {pc:#010x}"))?;
        print_guest(&block, options);

        buf.reset();
        match compile_block(&mut buf, asm_functions(), options, &block) {
            Ok(compiled) => {
                let code = &buf.as_slice()[compiled.offset..compiled.offset + compiled.size];
                println!("  host code: {} bytes", code.len());
                for (i, chunk) in code.chunks(16).enumerate() {
                    let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
                    println!("    {:04x}: {}", i * 16, hex.join(" "));
                }
            }
            Err(e) => println!("  not compiled: {e}"),
        }
        println!();
        pc = block.end_pc();
    }
    Ok(())
}

fn print_guest(block: &CodeBlock, options: CompilerOptions) {
    println!(
        "block {:#010x}: {} instructions, pages {:?}",
        block.pc,
        block.len(),
        block.pages()
    );
    for insn in &block.instructions {
        let inline = !options.disable_specialization && has_specialized_compiler(insn.op);
        println!(
            "  {:08x}: {:08x}  {}{:<28} {}",
            insn.pc,
            insn.bits(),
            if insn.is_in_delay_slot { "  " } else { "" },
            insn.instruction.to_string(),
            if inline { "inline" } else { "interp" }
        );
    }
}

fn run(settings: Settings, image: &Path, base: u32, entry: u32, cycles: u32) -> Result<()> {
    let mode = settings.execution_mode;
    let mut system = System::new(settings).context("failed to create system")?;
    let data = read_image(image, system.core.memory.ram_size())?;
    system.core.memory.load(base, &data);
    system.core.cpu.set_pc(entry);

    let ran = system.execute(cycles).context("execution failed")?;
    tracing::info!(?mode, ran, blocks = system.cache().len(), "finished");

    let cpu = &system.core.cpu;
    for row in (0..NUM_GPRS).step_by(4) {
        let line: Vec<String> = (row..row + 4)
            .filter_map(GuestReg::from_index)
            .map(|r| format!("{:>4} = {:08x}", r.name(), cpu.reg(r)))
            .collect();
        println!("{}", line.join("  "));
    }
    println!("  hi = {:08x}    lo = {:08x}", cpu.hi, cpu.lo);
    println!("  pc = {:08x}   epc = {:08x}  cause = {:08x}", cpu.pc, cpu.cop0.epc, cpu.cop0.cause);
    println!("ticks: {ran}");
    Ok(())
}
