//! Guest-to-host register cache.
//!
//! Tracks, for every guest register, whether its current value lives in
//! the guest-state structure, in a host register, or is a known constant,
//! and whether that value still has to be written back. Host registers
//! are handed out in the ABI's allocation order and spilled LRU, clean
//! entries first. Every method that may spill takes the code buffer and
//! emits the store itself.

use rec_core::cpu::guest_reg_offset;
use rec_core::{GuestReg, NUM_GUEST_REGS};

use crate::abi::Abi;
use crate::code_buffer::CodeBuffer;
use crate::value::{RegSize, Value, ValueKind};
use crate::x86_64::{
    emit_load, emit_mov_ri, emit_mov_rr, emit_store, emit_store_imm, Reg, RegSet, NUM_HOST_REGS,
    STATE_REG,
};

/// Where the current value of a guest register lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestRegLocation {
    /// Only in the guest-state structure.
    InMemory,
    HostReg(Reg),
    Constant(u32),
}

/// Per-guest-register cache metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterCacheEntry {
    pub location: GuestRegLocation,
    /// Newer than the guest-state structure.
    pub dirty: bool,
    /// Tick of the last bind or access, for LRU eviction.
    pub last_use: u64,
}

impl RegisterCacheEntry {
    const EMPTY: RegisterCacheEntry = RegisterCacheEntry {
        location: GuestRegLocation::InMemory,
        dirty: false,
        last_use: 0,
    };
}

#[derive(Debug, Clone, Copy, Default)]
struct HostRegState {
    guest: Option<GuestReg>,
    /// Owned by the instruction being compiled.
    scratch: bool,
    lock_count: u32,
}

impl HostRegState {
    fn in_use(&self) -> bool {
        self.guest.is_some() || self.scratch
    }
}

pub struct RegisterCache {
    abi: &'static Abi,
    host: [HostRegState; NUM_HOST_REGS],
    guest: [RegisterCacheEntry; NUM_GUEST_REGS],
    clock: u64,
}

impl RegisterCache {
    pub fn new(abi: &'static Abi) -> Self {
        Self {
            abi,
            host: [HostRegState::default(); NUM_HOST_REGS],
            guest: [RegisterCacheEntry::EMPTY; NUM_GUEST_REGS],
            clock: 0,
        }
    }

    pub fn abi(&self) -> &'static Abi {
        self.abi
    }

    // -- Queries --

    pub fn entry(&self, guest: GuestReg) -> RegisterCacheEntry {
        self.guest[guest.index()]
    }

    pub fn host_reg_of(&self, guest: GuestReg) -> Option<Reg> {
        match self.guest[guest.index()].location {
            GuestRegLocation::HostReg(r) => Some(r),
            _ => None,
        }
    }

    pub fn guest_in(&self, reg: Reg) -> Option<GuestReg> {
        self.host[reg.index()].guest
    }

    pub fn is_dirty(&self, guest: GuestReg) -> bool {
        self.guest[guest.index()].dirty
    }

    pub fn is_locked(&self, reg: Reg) -> bool {
        self.host[reg.index()].lock_count > 0
    }

    pub fn is_in_use(&self, reg: Reg) -> bool {
        self.host[reg.index()].in_use()
    }

    pub fn dirty_registers(&self) -> impl Iterator<Item = GuestReg> + '_ {
        GuestReg::all().filter(|g| self.guest[g.index()].dirty)
    }

    /// Allocatable registers that are neither bound, scratch nor locked.
    pub fn free_host_reg_count(&self) -> usize {
        self.abi
            .allocation_order
            .iter()
            .filter(|&&r| {
                let h = &self.host[r.index()];
                !h.in_use() && h.lock_count == 0
            })
            .count()
    }

    /// Caller-saved registers whose contents must survive a call.
    pub fn live_caller_saved(&self) -> RegSet {
        let mut set = RegSet::EMPTY;
        for &reg in self.abi.allocation_order {
            if self.abi.is_caller_saved(reg) && self.host[reg.index()].in_use() {
                set = set.set(reg);
            }
        }
        set
    }

    /// Panics if the host and guest views disagree or a host register is
    /// bound to two guest registers.
    pub fn assert_consistent(&self) {
        let mut owner: [Option<GuestReg>; NUM_HOST_REGS] = [None; NUM_HOST_REGS];
        for g in GuestReg::all() {
            let e = &self.guest[g.index()];
            if let GuestRegLocation::HostReg(r) = e.location {
                assert!(
                    owner[r.index()].is_none(),
                    "{} bound to both {} and {g}",
                    r.name(RegSize::S64),
                    owner[r.index()].map(|o| o.name()).unwrap_or("?"),
                );
                owner[r.index()] = Some(g);
                assert_eq!(self.host[r.index()].guest, Some(g));
                assert!(!self.host[r.index()].scratch);
            } else {
                assert!(
                    !(e.location == GuestRegLocation::InMemory && e.dirty),
                    "{g} dirty without a cached value"
                );
            }
        }
        for reg in Reg::ALL {
            assert_eq!(self.host[reg.index()].guest, owner[reg.index()]);
        }
    }

    // -- Allocation --

    /// Claim an unused host register as scratch, spilling if needed.
    pub fn allocate_host_reg(&mut self, buf: &mut CodeBuffer) -> Reg {
        self.allocate_host_reg_excluding(buf, RegSet::EMPTY)
    }

    /// Like [`allocate_host_reg`](Self::allocate_host_reg), never
    /// returning or evicting a register in `exclude`.
    pub fn allocate_host_reg_excluding(&mut self, buf: &mut CodeBuffer, exclude: RegSet) -> Reg {
        let reg = self.pick_host_reg(buf, exclude);
        self.host[reg.index()].scratch = true;
        reg
    }

    pub fn allocate_scratch(&mut self, buf: &mut CodeBuffer, size: RegSize) -> Value {
        Value::scratch(self.allocate_host_reg(buf), size)
    }

    pub fn allocate_scratch_excluding(
        &mut self,
        buf: &mut CodeBuffer,
        size: RegSize,
        exclude: RegSet,
    ) -> Value {
        Value::scratch(self.allocate_host_reg_excluding(buf, exclude), size)
    }

    fn pick_host_reg(&mut self, buf: &mut CodeBuffer, exclude: RegSet) -> Reg {
        let order = self.abi.allocation_order;
        if let Some(&reg) = order.iter().find(|&&r| {
            let h = &self.host[r.index()];
            !exclude.contains(r) && !h.in_use() && h.lock_count == 0
        }) {
            return reg;
        }

        // Spill: clean before dirty, then least recently used.
        let victim = order
            .iter()
            .copied()
            .filter(|&r| {
                let h = &self.host[r.index()];
                !exclude.contains(r) && h.guest.is_some() && h.lock_count == 0
            })
            .min_by_key(|&r| {
                let g = self.host[r.index()].guest.map_or(0, GuestReg::index);
                (self.guest[g].dirty, self.guest[g].last_use)
            });
        match victim {
            Some(reg) => {
                if let Some(g) = self.host[reg.index()].guest {
                    tracing::trace!(guest = %g, host = reg.name(RegSize::S64), "spill");
                    self.invalidate_guest_register(buf, g);
                }
                reg
            }
            None => panic!("register cache: every host register is locked or scratch"),
        }
    }

    /// Return a scratch register to the free pool.
    pub fn release_scratch(&mut self, reg: Reg) {
        self.host[reg.index()].scratch = false;
    }

    pub fn release_all_scratch(&mut self) {
        for h in &mut self.host {
            h.scratch = false;
        }
    }

    pub fn lock(&mut self, reg: Reg) {
        self.host[reg.index()].lock_count += 1;
    }

    pub fn unlock(&mut self, reg: Reg) {
        let h = &mut self.host[reg.index()];
        assert!(h.lock_count > 0, "unlock of unlocked {}", reg.name(RegSize::S64));
        h.lock_count -= 1;
    }

    pub fn unlock_all(&mut self) {
        for h in &mut self.host {
            h.lock_count = 0;
        }
    }

    // -- Guest registers --

    fn touch(&mut self, guest: GuestReg) {
        self.clock += 1;
        self.guest[guest.index()].last_use = self.clock;
    }

    fn bind(&mut self, guest: GuestReg, reg: Reg, dirty: bool) {
        let h = &mut self.host[reg.index()];
        h.guest = Some(guest);
        h.scratch = false;
        let e = &mut self.guest[guest.index()];
        e.location = GuestRegLocation::HostReg(reg);
        e.dirty = dirty;
        self.touch(guest);
    }

    /// Drop the guest's host binding, if any. Locks on the host register
    /// are kept so values captured earlier in the instruction stay valid.
    fn unbind(&mut self, guest: GuestReg) {
        if let GuestRegLocation::HostReg(r) = self.guest[guest.index()].location {
            self.host[r.index()].guest = None;
        }
        let e = &mut self.guest[guest.index()];
        e.location = GuestRegLocation::InMemory;
        e.dirty = false;
    }

    /// Current value of a guest register. Constants stay constants; a
    /// register not cached yet is loaded (clean) into a host register.
    pub fn read_guest_register(&mut self, buf: &mut CodeBuffer, guest: GuestReg) -> Value {
        if guest.is_zero() {
            return Value::constant_u32(0);
        }
        match self.guest[guest.index()].location {
            GuestRegLocation::Constant(c) => Value::constant_u32(c),
            GuestRegLocation::HostReg(r) => {
                self.touch(guest);
                Value::host(r, RegSize::S32)
            }
            GuestRegLocation::InMemory => {
                let reg = self.pick_host_reg(buf, RegSet::EMPTY);
                emit_load(buf, false, reg, STATE_REG, guest_reg_offset(guest));
                self.bind(guest, reg, false);
                Value::host(reg, RegSize::S32)
            }
        }
    }

    /// Host register holding the guest register, loading or materializing
    /// a constant as needed.
    pub fn bind_guest_register(&mut self, buf: &mut CodeBuffer, guest: GuestReg) -> Reg {
        match self.read_guest_register(buf, guest).kind {
            ValueKind::Host(r) => r,
            ValueKind::Constant(c) => {
                let dirty = self.guest[guest.index()].dirty;
                let reg = self.pick_host_reg(buf, RegSet::EMPTY);
                emit_mov_ri(buf, false, reg, c);
                if guest.is_zero() {
                    self.host[reg.index()].scratch = true;
                } else {
                    self.bind(guest, reg, dirty);
                }
                reg
            }
            ValueKind::Guest(_) => unreachable!("read_guest_register never returns a guest value"),
        }
    }

    /// Give a guest register a new value and mark it dirty. Writes to r0
    /// are dropped. A scratch value is adopted without a copy.
    pub fn write_guest_register(&mut self, buf: &mut CodeBuffer, guest: GuestReg, value: &Value) {
        if guest.is_zero() {
            return;
        }
        debug_assert_eq!(value.size, RegSize::S32, "guest registers are 32 bits wide");
        match value.kind {
            ValueKind::Constant(c) => {
                self.unbind(guest);
                let e = &mut self.guest[guest.index()];
                e.location = GuestRegLocation::Constant(c as u32);
                e.dirty = true;
                self.touch(guest);
            }
            ValueKind::Host(r) if self.host[r.index()].scratch => {
                if self.host_reg_of(guest) != Some(r) {
                    self.unbind(guest);
                }
                self.bind(guest, r, true);
            }
            ValueKind::Host(r) if self.host[r.index()].guest == Some(guest) => {
                self.guest[guest.index()].dirty = true;
                self.touch(guest);
            }
            ValueKind::Host(r) => {
                let dst = match self.host_reg_of(guest) {
                    Some(d) => d,
                    None => {
                        let d = self.pick_host_reg(buf, RegSet::EMPTY.set(r));
                        self.unbind(guest);
                        d
                    }
                };
                emit_mov_rr(buf, false, dst, r);
                self.bind(guest, dst, true);
            }
            ValueKind::Guest(src) => {
                let v = self.read_guest_register(buf, src);
                self.write_guest_register(buf, guest, &v);
            }
        }
    }

    // -- Write-back --

    fn emit_writeback(&self, buf: &mut CodeBuffer, guest: GuestReg) {
        let e = &self.guest[guest.index()];
        if !e.dirty {
            return;
        }
        let offset = guest_reg_offset(guest);
        match e.location {
            GuestRegLocation::HostReg(r) => emit_store(buf, false, r, STATE_REG, offset),
            GuestRegLocation::Constant(c) => emit_store_imm(buf, false, STATE_REG, offset, c as i32),
            GuestRegLocation::InMemory => {}
        }
    }

    /// Write a dirty guest register back; the binding is kept.
    pub fn flush_guest_register(&mut self, buf: &mut CodeBuffer, guest: GuestReg) {
        self.emit_writeback(buf, guest);
        self.guest[guest.index()].dirty = false;
    }

    pub fn flush_all(&mut self, buf: &mut CodeBuffer) {
        for g in GuestReg::all() {
            self.flush_guest_register(buf, g);
        }
    }

    /// Flush, then forget the cached copy.
    pub fn invalidate_guest_register(&mut self, buf: &mut CodeBuffer, guest: GuestReg) {
        self.flush_guest_register(buf, guest);
        self.unbind(guest);
    }

    pub fn invalidate_all(&mut self, buf: &mut CodeBuffer) {
        for g in GuestReg::all() {
            self.invalidate_guest_register(buf, g);
        }
    }

    /// Forget a clean cached copy whose memory has been overwritten.
    pub fn discard_guest_register(&mut self, guest: GuestReg) {
        debug_assert!(!self.guest[guest.index()].dirty, "discarding dirty {guest}");
        self.unbind(guest);
    }

    /// Forget every clean cached copy. Dirty entries stay.
    pub fn discard_clean_registers(&mut self) {
        for g in GuestReg::all() {
            let e = &self.guest[g.index()];
            if !e.dirty && e.location != GuestRegLocation::InMemory {
                self.unbind(g);
            }
        }
    }

    /// Stores for every dirty entry, leaving compile-time state untouched.
    /// For exit paths that branch away from the main line.
    pub fn emit_flush_for_exit(&self, buf: &mut CodeBuffer) {
        for g in GuestReg::all() {
            self.emit_writeback(buf, g);
        }
    }
}
