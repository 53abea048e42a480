//! Labels, forward references, and the control flow graph arena.
//!
//! A [`Label`] is an opaque, copyable handle; all of the interesting state
//! lives in a [`LabelInfo`] record owned by the method writer, in an arena
//! keyed by stable indices. Control flow edges likewise live in an arena and
//! refer to their target by index, so the cyclic graph never needs shared
//! ownership.

use crate::bytevector::ByteVector;
use crate::errors::{Error, Result};
use crate::opcodes;
use std::fmt;

/// Position token for a method body under construction.
///
/// A label marks a position in the bytecode of exactly one method. It can be
/// jumped to before it is placed; once `visit_label` places it, every forward
/// reference recorded in the meantime is patched.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    pub(crate) id: u32,
    /// Labels only used by debug tables are not basic block boundaries
    pub(crate) debug: bool,
}

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("L{}", self.id))
    }
}

/// Generates fresh labels for one method.
///
/// Cloning does not split the generator source - the cloned generator will
/// produce the same sequence of labels as the original.
#[derive(Clone, Default)]
pub struct LabelGenerator(u32);

impl LabelGenerator {
    pub fn new() -> LabelGenerator {
        LabelGenerator(0)
    }

    pub fn fresh_label(&mut self) -> Label {
        let id = self.0;
        self.0 += 1;
        Label { id, debug: false }
    }

    /// A label that only debug tables will refer to
    pub fn fresh_debug_label(&mut self) -> Label {
        let mut label = self.fresh_label();
        label.debug = true;
        label
    }
}

/// Index into the method writer's label arena
pub(crate) type Slot = usize;

// Status bits of a `LabelInfo`
pub(crate) const DEBUG: u16 = 1;
pub(crate) const RESOLVED: u16 = 2;
pub(crate) const RESIZED: u16 = 4;
pub(crate) const TARGET: u16 = 8;
pub(crate) const STORE: u16 = 16;
/// In the fix-point work queue right now
pub(crate) const IN_QUEUE: u16 = 32;
/// Input stack height has been computed (cheap mode)
pub(crate) const REACHED: u16 = 64;

/// Directed control flow arc. `info` is the relative stack height at the edge
/// (cheap mode), the packed caught-exception type (handler edges during frame
/// computation), or [`EXCEPTION_EDGE`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Edge {
    pub(crate) info: i32,
    pub(crate) successor: Slot,
    pub(crate) next: Option<u32>,
}

/// Sentinel `info` for handler edges in cheap mode: the handler's input stack
/// holds exactly the thrown exception.
pub(crate) const EXCEPTION_EDGE: i32 = i32::MAX;

/// Arena record behind a [`Label`].
#[derive(Debug)]
pub(crate) struct LabelInfo {
    /// The public handle this slot was created for, for error reporting
    pub(crate) key: Option<Label>,

    pub(crate) status: u16,

    /// Byte offset in the method body, valid iff RESOLVED
    pub(crate) position: u32,

    /// Pending forward references as `(source, patch_position)` pairs. A
    /// non-negative source marks a 2-byte patch slot; a 4-byte slot stores
    /// `-1 - source`.
    forward_refs: Vec<(i32, u32)>,

    /// Head of the run of labels placed at the same position. Block state is
    /// only kept on the head.
    pub(crate) first: Slot,

    // -- dataflow state (see the frame engine) --
    pub(crate) input_locals: Option<Vec<i32>>,
    pub(crate) input_stack: Option<Vec<i32>>,
    /// Cheap mode: absolute input stack height (valid iff REACHED).
    /// Frame mode: how far the simulation has popped below the input stack
    /// top; never positive.
    pub(crate) input_stack_top: i32,
    pub(crate) output_locals: Vec<i32>,
    pub(crate) output_stack: Vec<i32>,
    /// Cheap mode: relative stack height at the end of the block.
    /// Frame mode: number of live entries in `output_stack`.
    pub(crate) output_stack_top: i32,
    /// Maximum relative stack height reached inside the block
    pub(crate) output_stack_max: i32,
    /// Types on which a constructor was invoked in this block
    pub(crate) initializations: Vec<i32>,
    /// Head of this block's edge list
    pub(crate) successors: Option<u32>,
    /// Next basic block in emission order
    pub(crate) successor_chain: Option<Slot>,
    /// Next block in the fix-point work queue
    pub(crate) next: Option<Slot>,
}

impl LabelInfo {
    pub(crate) fn new(slot: Slot, key: Option<Label>) -> LabelInfo {
        let status = match key {
            Some(label) if label.debug => DEBUG,
            _ => 0,
        };
        LabelInfo {
            key,
            status,
            position: 0,
            forward_refs: vec![],
            first: slot,
            input_locals: None,
            input_stack: None,
            input_stack_top: 0,
            output_locals: vec![],
            output_stack: vec![],
            output_stack_top: 0,
            output_stack_max: 0,
            initializations: vec![],
            successors: None,
            successor_chain: None,
            next: None,
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.status & RESOLVED != 0
    }

    pub(crate) fn has_forward_refs(&self) -> bool {
        !self.forward_refs.is_empty()
    }

    /// Offset of this label, once placed
    pub(crate) fn offset(&self) -> Result<u32> {
        if self.is_resolved() {
            Ok(self.position)
        } else {
            Err(Error::IllegalState(format!(
                "offset of {:?} queried before the label was placed",
                self.key
            )))
        }
    }

    /// Write a reference to this label at the end of `code`.
    ///
    /// If the label is already placed the relative offset is computed and
    /// written directly; otherwise a placeholder is written and a forward
    /// reference is recorded for later patching. `source` is the offset of
    /// the first byte of the referencing instruction.
    pub(crate) fn put(&mut self, code: &mut ByteVector, source: u32, wide: bool) {
        if self.is_resolved() {
            if wide {
                code.put_i32(self.position as i32 - source as i32);
            } else {
                code.put_i16((self.position as i64 - source as i64) as i16);
            }
        } else if wide {
            self.add_reference(-1 - source as i32, code.len() as u32);
            code.put_i32(-1);
        } else {
            self.add_reference(source as i32, code.len() as u32);
            code.put_i16(-1);
        }
    }

    fn add_reference(&mut self, source: i32, patch_position: u32) {
        if self.forward_refs.is_empty() {
            self.forward_refs.reserve(6);
        }
        self.forward_refs.push((source, patch_position));
    }

    /// Fix the position of this label and patch all of its forward
    /// references.
    ///
    /// Returns `true` if some 2-byte patch slot was too small for its offset.
    /// In that case the originating jump opcode has been replaced with a
    /// pseudo-opcode holding an *unsigned* 16-bit offset (sufficient since
    /// method bodies cap at 65535 bytes) and the caller must schedule a
    /// resize pass.
    pub(crate) fn resolve(&mut self, code: &mut ByteVector, position: u32) -> Result<bool> {
        if self.is_resolved() {
            return Err(Error::IllegalState(format!(
                "label {:?} placed twice",
                self.key
            )));
        }
        self.status |= RESOLVED;
        self.position = position;

        let mut need_resize = false;
        for (source, reference) in self.forward_refs.drain(..) {
            let reference = reference as usize;
            if source >= 0 {
                let offset = position as i64 - source as i64;
                if offset < i16::MIN as i64 || offset > i16::MAX as i64 {
                    let opcode = code.byte_at(reference - 1);
                    let pseudo = if opcode <= opcodes::JSR {
                        // IFEQ ... JSR move to 202 ... 217
                        opcode + 49
                    } else {
                        // IFNULL and IFNONNULL move to 218 and 219
                        opcode + 20
                    };
                    code.set_u8(reference - 1, pseudo);
                    need_resize = true;
                }
                code.set_u16(reference, offset as u16);
            } else {
                let offset = position as i64 + source as i64 + 1;
                code.set_i32(reference, offset as i32);
            }
        }
        Ok(need_resize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_produces_distinct_labels() {
        let mut generator = LabelGenerator::new();
        let a = generator.fresh_label();
        let b = generator.fresh_label();
        assert_ne!(a, b);
        assert_eq!(format!("{:?}", a), "L0");
    }

    #[test]
    fn backward_reference_is_written_directly() {
        let mut code = ByteVector::new();
        let mut info = LabelInfo::new(0, None);
        info.resolve(&mut code, 0).unwrap();

        code.put_u8(opcodes::GOTO);
        info.put(&mut code, 0, false);
        assert_eq!(code.as_slice(), &[opcodes::GOTO, 0x00, 0x00]);
    }

    #[test]
    fn forward_reference_is_patched_on_resolve() {
        let mut code = ByteVector::new();
        let mut info = LabelInfo::new(0, None);

        code.put_u8(opcodes::GOTO);
        info.put(&mut code, 0, false);
        code.put_u8(opcodes::NOP);
        assert_eq!(code.as_slice(), &[opcodes::GOTO, 0xFF, 0xFF, opcodes::NOP]);

        let need_resize = info.resolve(&mut code, 4).unwrap();
        assert!(!need_resize);
        assert!(!info.has_forward_refs());
        assert_eq!(code.as_slice(), &[opcodes::GOTO, 0x00, 0x04, opcodes::NOP]);
    }

    #[test]
    fn oversized_forward_reference_turns_into_a_pseudo_opcode() {
        let mut code = ByteVector::new();
        let mut info = LabelInfo::new(0, None);

        code.put_u8(opcodes::IFEQ);
        info.put(&mut code, 0, false);
        for _ in 0..40_000 {
            code.put_u8(opcodes::NOP);
        }

        let need_resize = info.resolve(&mut code, 40_003).unwrap();
        assert!(need_resize);
        assert_eq!(code.byte_at(0), opcodes::IFEQ + 49);
        // unsigned 16-bit offset
        assert_eq!(
            u16::from_be_bytes([code.byte_at(1), code.byte_at(2)]),
            40_003
        );
    }

    #[test]
    fn wide_forward_reference_uses_four_bytes() {
        let mut code = ByteVector::new();
        let mut info = LabelInfo::new(0, None);

        code.put_u8(opcodes::GOTO_W);
        info.put(&mut code, 0, true);
        code.put_u8(opcodes::NOP);

        info.resolve(&mut code, 6).unwrap();
        assert_eq!(
            code.as_slice(),
            &[opcodes::GOTO_W, 0x00, 0x00, 0x00, 0x06, opcodes::NOP]
        );
    }

    #[test]
    fn double_placement_is_rejected() {
        let mut code = ByteVector::new();
        let mut info = LabelInfo::new(0, None);
        info.resolve(&mut code, 0).unwrap();
        assert!(matches!(
            info.resolve(&mut code, 1),
            Err(Error::IllegalState(_))
        ));
    }
}
