use crate::code_buffer::CodeBuffer;
use crate::x86_64::patch_rel32;

/// A jump target inside the block being compiled.
///
/// Jumps may reference a label before it is bound; every such use is
/// recorded and back-patched when [`Label::bind`] runs.
#[derive(Debug, Clone, Default)]
pub struct Label {
    /// Bound offset in the code buffer.
    value: Option<usize>,
    /// Offsets of rel32 displacement fields that target this label.
    uses: Vec<usize>,
}

impl Label {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rel32 field that must point at this label.
    /// Patched immediately when the label is already bound.
    pub fn add_use(&mut self, buf: &mut CodeBuffer, disp_offset: usize) {
        match self.value {
            Some(target) => patch_rel32(buf, disp_offset, target),
            None => self.uses.push(disp_offset),
        }
    }

    /// Bind the label at the current buffer offset and patch every use.
    pub fn bind(&mut self, buf: &mut CodeBuffer) {
        debug_assert!(self.value.is_none(), "label bound twice");
        let target = buf.offset();
        self.value = Some(target);
        for disp in self.uses.drain(..) {
            patch_rel32(buf, disp, target);
        }
    }

    pub fn is_bound(&self) -> bool {
        self.value.is_some()
    }

    /// Whether there are unresolved forward references.
    pub fn has_pending_uses(&self) -> bool {
        !self.uses.is_empty()
    }
}
