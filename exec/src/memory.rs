//! Guest physical memory: mirrored RAM plus code-page tracking.

use rec_core::GUEST_PAGE_SHIFT;
use rec_frontend::InstructionFetch;

/// Physical window RAM is mirrored through.
pub const RAM_MIRROR_SIZE: u32 = 0x0080_0000;
pub const DEFAULT_RAM_SIZE: usize = 2 * 1024 * 1024;

/// Strip the segment bits of a KUSEG/KSEG0/KSEG1 address.
#[inline]
pub fn physical_address(addr: u32) -> u32 {
    addr & 0x1FFF_FFFF
}

pub struct Memory {
    ram: Vec<u8>,
    ram_mask: u32,
    /// One flag per RAM page holding compiled or cached code.
    code_pages: Vec<bool>,
    /// Code pages written since the last [`Memory::take_dirty_pages`].
    dirty_pages: Vec<u32>,
}

impl Memory {
    /// `ram_size` must be a power of two no larger than the mirror window.
    pub fn new(ram_size: usize) -> Self {
        assert!(
            ram_size.is_power_of_two() && ram_size <= RAM_MIRROR_SIZE as usize,
            "bad RAM size {ram_size:#x}"
        );
        Self {
            ram: vec![0; ram_size],
            ram_mask: (ram_size - 1) as u32,
            code_pages: vec![false; ram_size >> GUEST_PAGE_SHIFT],
            dirty_pages: Vec::new(),
        }
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn ram_size(&self) -> usize {
        self.ram.len()
    }

    fn ram_offset(&self, addr: u32) -> Option<usize> {
        let phys = physical_address(addr);
        (phys < RAM_MIRROR_SIZE).then_some((phys & self.ram_mask) as usize)
    }

    /// RAM page backing `addr`, if it is RAM at all.
    pub fn ram_page(&self, addr: u32) -> Option<u32> {
        self.ram_offset(addr).map(|o| (o >> GUEST_PAGE_SHIFT) as u32)
    }

    // -- Reads: unmapped addresses read as all ones --

    pub fn read_u8(&self, addr: u32) -> u8 {
        self.ram_offset(addr).map_or(0xFF, |o| self.ram[o])
    }

    pub fn read_u16(&self, addr: u32) -> u16 {
        match self.ram_offset(addr & !1) {
            Some(o) => u16::from_le_bytes([self.ram[o], self.ram[o + 1]]),
            None => 0xFFFF,
        }
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        match self.ram_offset(addr & !3) {
            Some(o) => u32::from_le_bytes([
                self.ram[o],
                self.ram[o + 1],
                self.ram[o + 2],
                self.ram[o + 3],
            ]),
            None => 0xFFFF_FFFF,
        }
    }

    // -- Writes: unmapped addresses are ignored --

    pub fn write_u8(&mut self, addr: u32, value: u8) {
        if let Some(o) = self.ram_offset(addr) {
            self.ram[o] = value;
            self.note_write(o);
        }
    }

    pub fn write_u16(&mut self, addr: u32, value: u16) {
        if let Some(o) = self.ram_offset(addr & !1) {
            self.ram[o..o + 2].copy_from_slice(&value.to_le_bytes());
            self.note_write(o);
        }
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) {
        if let Some(o) = self.ram_offset(addr & !3) {
            self.ram[o..o + 4].copy_from_slice(&value.to_le_bytes());
            self.note_write(o);
        }
    }

    /// Copy `data` into guest memory starting at `addr`.
    pub fn load(&mut self, addr: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.write_u8(addr.wrapping_add(i as u32), b);
        }
    }

    /// Store instruction words contiguously from `addr`.
    pub fn load_words(&mut self, addr: u32, words: &[u32]) {
        for (i, &w) in words.iter().enumerate() {
            self.write_u32(addr.wrapping_add(i as u32 * 4), w);
        }
    }

    // -- Code tracking --

    fn note_write(&mut self, offset: usize) {
        let page = offset >> GUEST_PAGE_SHIFT;
        if std::mem::take(&mut self.code_pages[page]) {
            self.dirty_pages.push(page as u32);
        }
    }

    pub fn set_code_page(&mut self, page: u32) {
        if let Some(flag) = self.code_pages.get_mut(page as usize) {
            *flag = true;
        }
    }

    pub fn is_code_page(&self, page: u32) -> bool {
        self.code_pages.get(page as usize).copied().unwrap_or(false)
    }

    pub fn clear_code_pages(&mut self) {
        self.code_pages.fill(false);
        self.dirty_pages.clear();
    }

    pub fn take_dirty_pages(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.dirty_pages)
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(DEFAULT_RAM_SIZE)
    }
}

impl InstructionFetch for Memory {
    fn fetch_instruction(&self, addr: u32) -> Option<u32> {
        if addr & 3 != 0 {
            return None;
        }
        self.ram_offset(addr).map(|_| self.read_u32(addr))
    }
}
