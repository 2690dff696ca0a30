use rec_backend::code_buffer::{page_size, CodeBuffer, BLOCK_ALIGNMENT};

#[test]
fn test_emit_and_read() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u8(0x90); // NOP
    buf.emit_u32(0xDEADBEEF);
    assert_eq!(buf.offset(), 5);
    assert_eq!(buf.as_slice()[0], 0x90);
    assert_eq!(buf.read_u32(1), 0xDEADBEEF);
}

#[test]
fn test_patch() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u32(0);
    buf.patch_u32(0, 0x12345678);
    assert_eq!(buf.read_u32(0), 0x12345678);
}

#[test]
fn test_align_pads_with_fill() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u8(0xC3);
    buf.align_to(BLOCK_ALIGNMENT, 0xCC);
    assert_eq!(buf.offset(), BLOCK_ALIGNMENT);
    assert!(buf.as_slice()[1..].iter().all(|&b| b == 0xCC));
    // Already aligned: no padding.
    buf.align_to(BLOCK_ALIGNMENT, 0xCC);
    assert_eq!(buf.offset(), BLOCK_ALIGNMENT);
}

#[test]
fn test_overflow_is_latched_not_written() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let cap = buf.capacity();
    buf.set_offset(cap - 2);
    buf.emit_u32(0x11223344);
    assert!(buf.overflowed());
    assert!(buf.offset() <= cap);

    buf.set_offset(0);
    buf.clear_overflow();
    assert!(!buf.overflowed());
    buf.emit_u32(1);
    assert_eq!(buf.read_u32(0), 1);
}

#[test]
fn test_reset_rewinds() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_bytes(&[1, 2, 3, 4]);
    buf.reset();
    assert_eq!(buf.offset(), 0);
    assert_eq!(buf.remaining(), buf.capacity());
}

#[test]
fn test_buffer_is_executable() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    // mov eax, 42; ret
    buf.emit_bytes(&[0xB8, 42, 0, 0, 0, 0xC3]);
    let f: extern "C" fn() -> u32 = unsafe { std::mem::transmute(buf.base_ptr()) };
    assert_eq!(f(), 42);
}

#[test]
fn test_size_rounds_to_host_pages() {
    let page = page_size();
    assert!(page.is_power_of_two());
    assert!(page >= 4096);

    let buf = CodeBuffer::new(1).unwrap();
    assert_eq!(buf.capacity(), page);
    let buf = CodeBuffer::new(page + 1).unwrap();
    assert_eq!(buf.capacity(), 2 * page);
    assert_eq!(buf.remaining(), buf.capacity());
}
