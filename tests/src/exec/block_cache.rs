use rec_core::insn::encode::nop;
use rec_core::CodeBlock;
use rec_exec::{BlockCache, CachedBlock};

fn entry(pc: u32) -> CachedBlock {
    CachedBlock {
        block: CodeBlock::from_words(pc, &[nop(); 4]),
        compiled: None,
    }
}

#[test]
fn test_insert_and_lookup() {
    let mut cache = BlockCache::new();
    assert!(cache.is_empty());
    cache.insert(entry(0x8000_1000), [1]);
    cache.insert(entry(0x8000_1010), [1]);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.lookup(0x8000_1010).unwrap().block.pc, 0x8000_1010);
    assert!(cache.lookup(0x8000_1004).is_none());
}

#[test]
fn test_invalidate_page() {
    let mut cache = BlockCache::new();
    cache.insert(entry(0x8000_1000), [1]);
    cache.insert(entry(0x8000_1FF8), [1, 2]);
    cache.insert(entry(0x8000_2000), [2]);

    assert_eq!(cache.invalidate_page(7), 0);
    assert_eq!(cache.invalidate_page(2), 2);
    assert!(cache.lookup(0x8000_1FF8).is_none());
    assert!(cache.lookup(0x8000_2000).is_none());
    assert!(cache.lookup(0x8000_1000).is_some());

    // The straddling block is already gone.
    assert_eq!(cache.invalidate_page(1), 1);
    assert!(cache.is_empty());
}

#[test]
fn test_reinsert_replaces() {
    let mut cache = BlockCache::new();
    cache.insert(entry(0x8000_1000), [1]);
    cache.insert(entry(0x8000_1000), [1]);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.invalidate_page(1), 1);
}

#[test]
fn test_flush() {
    let mut cache = BlockCache::new();
    cache.insert(entry(0x8000_1000), [1]);
    cache.insert(entry(0x8000_3000), [3]);
    cache.flush();
    assert!(cache.is_empty());
    assert_eq!(cache.invalidate_page(1), 0);
}
