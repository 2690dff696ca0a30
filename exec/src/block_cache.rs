//! Decoded and compiled blocks, keyed by entry pc.

use std::collections::HashMap;

use rec_backend::CompiledBlock;
use rec_core::CodeBlock;

/// One cache entry. `compiled` is `None` for blocks that run on the
/// cached interpreter.
#[derive(Debug, Clone)]
pub struct CachedBlock {
    pub block: CodeBlock,
    pub compiled: Option<CompiledBlock>,
}

#[derive(Debug, Default)]
pub struct BlockCache {
    blocks: HashMap<u32, CachedBlock>,
    /// RAM page -> entry pcs of blocks with code on it. May hold pcs
    /// that have since been dropped.
    page_map: HashMap<u32, Vec<u32>>,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, pc: u32) -> Option<&CachedBlock> {
        self.blocks.get(&pc)
    }

    /// Insert `entry`, registering it on every page in `pages`.
    pub fn insert(&mut self, entry: CachedBlock, pages: impl IntoIterator<Item = u32>) {
        let pc = entry.block.pc;
        for page in pages {
            let pcs = self.page_map.entry(page).or_default();
            if !pcs.contains(&pc) {
                pcs.push(pc);
            }
        }
        self.blocks.insert(pc, entry);
    }

    /// Drop every block with code on `page`. Returns how many were
    /// removed.
    pub fn invalidate_page(&mut self, page: u32) -> usize {
        let Some(pcs) = self.page_map.remove(&page) else {
            return 0;
        };
        let removed = pcs
            .iter()
            .filter(|pc| self.blocks.remove(pc).is_some())
            .count();
        if removed > 0 {
            tracing::debug!(page, removed, "invalidated blocks");
        }
        removed
    }

    /// Drop everything. Compiled entries point into a code buffer that
    /// is about to be reset.
    pub fn flush(&mut self) {
        self.blocks.clear();
        self.page_map.clear();
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
