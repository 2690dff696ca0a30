mod block;
mod insn;
