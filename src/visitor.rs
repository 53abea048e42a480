//! The streaming visitor surface.
//!
//! A class is always traversed in the same order, whether it comes from
//! [`crate::ClassReader`] or from a generator calling these methods by hand:
//!
//! ```text
//! visit
//!   ( visit_source? visit_outer_class? visit_inner_class* )
//!   ( visit_field | visit_method )*
//!   visit_attribute*
//! visit_end
//! ```
//!
//! and within a method:
//!
//! ```text
//! ( visit_label | visit_<...>_insn )*
//! visit_try_catch_block*
//! ( visit_local_variable | visit_line_number )*
//! visit_attribute*
//! visit_maxs
//! visit_end
//! ```
//!
//! Labels are visited before the instruction at their position;
//! `visit_maxs` is always the last event before `visit_end`, so a visitor
//! knows max stack and locals only once the body is complete.
//!
//! Visitors compose by wrapping: an adapter owns the next visitor in the
//! chain and forwards (possibly rewritten) events to it. There is no
//! inheritance anywhere; every method has a no-op default so observers only
//! implement what they care about.

use crate::access_flags::{
    ClassAccessFlags, FieldAccessFlags, InnerClassAccessFlags, MethodAccessFlags,
};
use crate::attributes::Attribute;
use crate::constant_pool::ConstantValue;
use crate::errors::Result;
use crate::version::Version;
use crate::writer::Label;

pub trait ClassVisitor {
    /// Visit the class header
    fn visit(
        &mut self,
        version: Version,
        access: ClassAccessFlags,
        name: &str,
        signature: Option<&str>,
        super_name: Option<&str>,
        interfaces: &[&str],
    ) -> Result<()> {
        let _ = (version, access, name, signature, super_name, interfaces);
        Ok(())
    }

    fn visit_source(&mut self, source: Option<&str>, debug: Option<&str>) -> Result<()> {
        let _ = (source, debug);
        Ok(())
    }

    /// Visit the enclosing method of the class, if the class is local or
    /// anonymous
    fn visit_outer_class(
        &mut self,
        owner: &str,
        name: Option<&str>,
        descriptor: Option<&str>,
    ) -> Result<()> {
        let _ = (owner, name, descriptor);
        Ok(())
    }

    fn visit_inner_class(
        &mut self,
        name: Option<&str>,
        outer_name: Option<&str>,
        inner_name: Option<&str>,
        access: InnerClassAccessFlags,
    ) -> Result<()> {
        let _ = (name, outer_name, inner_name, access);
        Ok(())
    }

    /// Visit a field; return a visitor for its attributes to see them
    fn visit_field(
        &mut self,
        access: FieldAccessFlags,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        value: Option<&ConstantValue>,
    ) -> Result<Option<&mut dyn FieldVisitor>> {
        let _ = (access, name, descriptor, signature, value);
        Ok(None)
    }

    /// Visit a method; return a visitor for its body to see it
    fn visit_method(
        &mut self,
        access: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        exceptions: &[&str],
    ) -> Result<Option<&mut dyn MethodVisitor>> {
        let _ = (access, name, descriptor, signature, exceptions);
        Ok(None)
    }

    fn visit_attribute(&mut self, attribute: Attribute) -> Result<()> {
        let _ = attribute;
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait FieldVisitor {
    fn visit_attribute(&mut self, attribute: Attribute) -> Result<()> {
        let _ = attribute;
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait MethodVisitor {
    /// Zero-operand instruction (`nop`, constants, stack ops, arithmetic,
    /// loads/stores through arrays, returns, `athrow`, monitors, ...)
    fn visit_insn(&mut self, opcode: u8) -> Result<()> {
        let _ = opcode;
        Ok(())
    }

    /// `bipush`, `sipush` or `newarray`
    fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> Result<()> {
        let _ = (opcode, operand);
        Ok(())
    }

    /// Local variable instruction (`iload`, ..., `astore`, `ret`)
    fn visit_var_insn(&mut self, opcode: u8, var: u16) -> Result<()> {
        let _ = (opcode, var);
        Ok(())
    }

    /// `new`, `anewarray`, `checkcast` or `instanceof`. The type operand is an
    /// internal name, or an array descriptor for array classes.
    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) -> Result<()> {
        let _ = (opcode, type_name);
        Ok(())
    }

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<()> {
        let _ = (opcode, owner, name, descriptor);
        Ok(())
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<()> {
        let _ = (opcode, owner, name, descriptor);
        Ok(())
    }

    fn visit_jump_insn(&mut self, opcode: u8, label: Label) -> Result<()> {
        let _ = (opcode, label);
        Ok(())
    }

    /// Mark the current position with a label
    fn visit_label(&mut self, label: Label) -> Result<()> {
        let _ = label;
        Ok(())
    }

    fn visit_ldc_insn(&mut self, constant: &ConstantValue) -> Result<()> {
        let _ = constant;
        Ok(())
    }

    fn visit_iinc_insn(&mut self, var: u16, increment: i16) -> Result<()> {
        let _ = (var, increment);
        Ok(())
    }

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: Label,
        labels: &[Label],
    ) -> Result<()> {
        let _ = (min, max, default, labels);
        Ok(())
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: Label,
        keys: &[i32],
        labels: &[Label],
    ) -> Result<()> {
        let _ = (default, keys, labels);
        Ok(())
    }

    /// `multianewarray`; the type operand is an array type descriptor
    fn visit_multi_anew_array_insn(&mut self, descriptor: &str, dims: u8) -> Result<()> {
        let _ = (descriptor, dims);
        Ok(())
    }

    /// Visit a try/catch handler; `catch_type` is `None` for `finally` blocks.
    /// These events follow the instruction stream and precede `visit_maxs`.
    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<()> {
        let _ = (start, end, handler, catch_type);
        Ok(())
    }

    fn visit_local_variable(
        &mut self,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        start: Label,
        end: Label,
        index: u16,
    ) -> Result<()> {
        let _ = (name, descriptor, signature, start, end, index);
        Ok(())
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<()> {
        let _ = (line, start);
        Ok(())
    }

    fn visit_attribute(&mut self, attribute: Attribute) -> Result<()> {
        let _ = attribute;
        Ok(())
    }

    /// Visit the max stack and max locals of the method. Always the last
    /// event concerning the body; a writer that was asked to compute these
    /// values itself ignores the arguments.
    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<()> {
        let _ = (max_stack, max_locals);
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}
