//! Single-pass class file parser.
//!
//! The reader indexes the constant pool once at construction (one offset per
//! entry, pointing just past the tag byte) and then drives a
//! [`ClassVisitor`] over the class structure. Method code is parsed in two
//! phases: a first scan discovers every label (branch targets, switch
//! targets, exception ranges, debug table positions) so that labels are
//! canonical per offset, and a second scan replays the instructions into the
//! visitor with the labels already in hand.
//!
//! All reads are bounds checked: truncated input, unknown constant tags,
//! reserved opcodes and out-of-range code offsets surface as
//! [`Error::MalformedInput`], never as a panic.

use crate::access_flags::{
    ClassAccessFlags, FieldAccessFlags, InnerClassAccessFlags, MethodAccessFlags, ACC_DEPRECATED,
};
use crate::attributes::Attribute;
use crate::constant_pool::ConstantValue;
use crate::errors::{Error, Result};
use crate::opcodes::{self, InsnShape};
use crate::version::Version;
use crate::visitor::{ClassVisitor, MethodVisitor};
use crate::writer::Label;
use elsa::FrozenMap;

const ACC_SYNTHETIC: u32 = 0x1000;

// constant pool tags
const UTF8: u8 = 1;
const INTEGER: u8 = 3;
const FLOAT: u8 = 4;
const LONG: u8 = 5;
const DOUBLE: u8 = 6;
const CLASS: u8 = 7;
const STR: u8 = 8;
const FIELDREF: u8 = 9;
const METHODREF: u8 = 10;
const IMETHODREF: u8 = 11;
const NAME_TYPE: u8 = 12;

pub struct ClassReader<'a> {
    /// The class to be parsed
    b: &'a [u8],
    /// Start offset of each constant pool entry's payload (the tag byte is
    /// at `items[i] - 1`)
    items: Vec<u32>,
    /// Decoded CONSTANT_Utf8 entries, filled lazily. Skipping re-decoding is
    /// a measured 2-3x win on attribute-heavy classes.
    strings: FrozenMap<u16, String>,
    /// Start of the class header (access flags) after the constant pool
    header: usize,
}

impl<'a> std::fmt::Debug for ClassReader<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassReader")
            .field("b", &self.b)
            .field("items", &self.items)
            .field("header", &self.header)
            .finish()
    }
}

impl<'a> ClassReader<'a> {
    pub fn new(b: &'a [u8]) -> Result<ClassReader<'a>> {
        if b.len() < 10 {
            return Err(malformed("class file is truncated", b.len()));
        }
        if b[0..4] != [0xCA, 0xFE, 0xBA, 0xBE] {
            return Err(malformed("bad magic number", 0));
        }

        let count = u16::from_be_bytes([b[8], b[9]]) as usize;
        let mut items = vec![0u32; count.max(1)];
        let mut index = 10usize;
        let mut i = 1;
        while i < count {
            if index >= b.len() {
                return Err(malformed("constant pool is truncated", index));
            }
            items[i] = index as u32 + 1;
            let tag = b[index];
            let size = match tag {
                FIELDREF | METHODREF | IMETHODREF | INTEGER | FLOAT | NAME_TYPE => 5,
                LONG | DOUBLE => {
                    i += 1;
                    9
                }
                UTF8 => {
                    if index + 3 > b.len() {
                        return Err(malformed("constant pool is truncated", index));
                    }
                    3 + u16::from_be_bytes([b[index + 1], b[index + 2]]) as usize
                }
                CLASS | STR => 3,
                _ => return Err(malformed(&format!("unknown constant tag {}", tag), index)),
            };
            index += size;
            i += 1;
        }
        if index + 8 > b.len() {
            return Err(malformed("class header is truncated", index));
        }
        Ok(ClassReader {
            b,
            items,
            strings: FrozenMap::new(),
            header: index,
        })
    }

    // ------------------------------------------------------------------
    // Low level parsing
    // ------------------------------------------------------------------

    fn read_u8(&self, at: usize) -> Result<u8> {
        self.b
            .get(at)
            .copied()
            .ok_or_else(|| malformed("unexpected end of input", at))
    }

    fn read_i8(&self, at: usize) -> Result<i8> {
        Ok(self.read_u8(at)? as i8)
    }

    fn read_u16(&self, at: usize) -> Result<u16> {
        match self.b.get(at..at + 2) {
            Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
            None => Err(malformed("unexpected end of input", at)),
        }
    }

    fn read_i16(&self, at: usize) -> Result<i16> {
        Ok(self.read_u16(at)? as i16)
    }

    fn read_u32(&self, at: usize) -> Result<u32> {
        match self.b.get(at..at + 4) {
            Some(bytes) => Ok(u32::from_be_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
            None => Err(malformed("unexpected end of input", at)),
        }
    }

    fn read_i32(&self, at: usize) -> Result<i32> {
        Ok(self.read_u32(at)? as i32)
    }

    fn read_i64(&self, at: usize) -> Result<i64> {
        let high = self.read_u32(at)? as u64;
        let low = self.read_u32(at + 4)? as u64;
        Ok(((high << 32) | low) as i64)
    }

    fn item(&self, index: u16) -> Result<usize> {
        match self.items.get(index as usize) {
            Some(&offset) if offset != 0 => Ok(offset as usize),
            _ => Err(malformed(
                &format!("invalid constant pool index {}", index),
                0,
            )),
        }
    }

    /// Decoded CONSTANT_Utf8 entry, memoized per pool index
    fn read_utf8_item(&self, index: u16) -> Result<&str> {
        if let Some(cached) = self.strings.get(&index) {
            return Ok(cached);
        }
        let at = self.item(index)?;
        let len = self.read_u16(at)? as usize;
        let bytes = self
            .b
            .get(at + 2..at + 2 + len)
            .ok_or_else(|| malformed("utf8 constant is truncated", at))?;
        let decoded = decode_modified_utf8(bytes).ok_or_else(|| {
            malformed("invalid modified utf8 in constant pool", at)
        })?;
        Ok(self.strings.insert(index, decoded))
    }

    /// Read a u16 constant pool index at `at` and resolve it as a utf8 item
    fn read_utf8_ref(&self, at: usize) -> Result<&str> {
        let index = self.read_u16(at)?;
        self.read_utf8_item(index)
    }

    /// Read a u16 constant pool index at `at` and resolve it as a class name
    fn read_class_ref(&self, at: usize) -> Result<&str> {
        let index = self.read_u16(at)?;
        let class_at = self.item(index)?;
        self.read_utf8_ref(class_at)
    }

    /// Read a loadable constant (for `ldc` and `ConstantValue`)
    fn read_const(&self, index: u16) -> Result<ConstantValue> {
        let at = self.item(index)?;
        let tag = self.read_u8(at - 1)?;
        Ok(match tag {
            INTEGER => ConstantValue::Integer(self.read_i32(at)?),
            FLOAT => ConstantValue::Float(f32::from_bits(self.read_u32(at)?)),
            LONG => ConstantValue::Long(self.read_i64(at)?),
            DOUBLE => ConstantValue::Double(f64::from_bits(self.read_i64(at)? as u64)),
            STR => ConstantValue::String(self.read_utf8_ref(at)?.to_string()),
            CLASS => ConstantValue::Class(self.read_utf8_ref(at)?.to_string()),
            _ => {
                return Err(malformed(
                    &format!("constant tag {} is not loadable", tag),
                    at,
                ))
            }
        })
    }

    /// Total size of the attribute whose 6-byte header starts at `at`
    fn attribute_size(&self, at: usize) -> Result<usize> {
        Ok(6 + self.read_u32(at + 2)? as usize)
    }

    // ------------------------------------------------------------------
    // Class structure
    // ------------------------------------------------------------------

    /// Drive `visitor` over the whole class.
    ///
    /// `prototypes` lists the names of non-standard attributes the caller
    /// wants surfaced as opaque [`Attribute`] blobs; attributes that are
    /// neither standard nor registered are skipped. `skip_debug` suppresses
    /// `visit_line_number`, `visit_local_variable` and `visit_source`.
    pub fn accept(
        &self,
        visitor: &mut dyn ClassVisitor,
        prototypes: &[&str],
        skip_debug: bool,
    ) -> Result<()> {
        let header = self.header;
        let mut access = self.read_u16(header)? as u32;
        let name = self.read_class_ref(header + 2)?;
        let super_index = self.read_u16(header + 4)?;
        let super_name = if super_index == 0 {
            None
        } else {
            Some(self.read_utf8_ref(self.item(super_index)?)?)
        };
        let interface_count = self.read_u16(header + 6)? as usize;
        let mut interfaces = Vec::with_capacity(interface_count);
        let mut u = header + 8;
        for _ in 0..interface_count {
            interfaces.push(self.read_class_ref(u)?);
            u += 2;
        }
        let fields_start = u;

        // skip fields and methods to reach the class attributes
        let mut v = fields_start;
        for _section in 0..2 {
            let count = self.read_u16(v)?;
            v += 2;
            for _ in 0..count {
                let mut attr_count = self.read_u16(v + 6)?;
                v += 8;
                while attr_count > 0 {
                    v += self.attribute_size(v)?;
                    attr_count -= 1;
                }
            }
        }
        
        // pre-scan the class attributes
        let mut signature = None;
        let mut source_file = None;
        let mut source_debug = None;
        let mut enclosing = None;
        let mut inner_classes_at = None;
        let mut class_blobs: Vec<Attribute> = vec![];
        {
            let mut count = self.read_u16(v)?;
            v += 2;
            while count > 0 {
                let attr_name = self.read_utf8_ref(v)?;
                let size = self.attribute_size(v)?;
                let payload = v + 6;
                match attr_name {
                    "Signature" => signature = Some(self.read_utf8_ref(payload)?),
                    "SourceFile" => source_file = Some(self.read_utf8_ref(payload)?),
                    "SourceDebugExtension" => {
                        let bytes = self
                            .b
                            .get(payload..v + size)
                            .ok_or_else(|| malformed("attribute is truncated", payload))?;
                        source_debug = decode_modified_utf8(bytes);
                    }
                    "EnclosingMethod" => enclosing = Some(payload),
                    "Deprecated" => access |= ACC_DEPRECATED,
                    "Synthetic" => access |= ACC_SYNTHETIC,
                    "InnerClasses" => inner_classes_at = Some(payload),
                    other => {
                        if prototypes.contains(&other) {
                            let info = self
                                .b
                                .get(payload..v + size)
                                .ok_or_else(|| malformed("attribute is truncated", payload))?;
                            class_blobs.push(Attribute::new(other, info.to_vec()));
                        }
                    }
                }
                v += size;
                count -= 1;
            }
        }

        let version = Version {
            minor_version: self.read_u16(4)?,
            major_version: self.read_u16(6)?,
        };
        visitor.visit(
            version,
            ClassAccessFlags::from_bits_retain(access),
            name,
            signature,
            super_name,
            &interfaces,
        )?;

        if !skip_debug && (source_file.is_some() || source_debug.is_some()) {
            visitor.visit_source(source_file, source_debug.as_deref())?;
        }

        if let Some(at) = enclosing {
            let owner = self.read_class_ref(at)?;
            let method_item = self.read_u16(at + 2)?;
            let (method_name, method_desc) = if method_item == 0 {
                (None, None)
            } else {
                let name_type = self.item(method_item)?;
                (
                    Some(self.read_utf8_ref(name_type)?),
                    Some(self.read_utf8_ref(name_type + 2)?),
                )
            };
            visitor.visit_outer_class(owner, method_name, method_desc)?;
        }

        if let Some(mut at) = inner_classes_at {
            let count = self.read_u16(at)?;
            at += 2;
            for _ in 0..count {
                let inner = self.read_u16(at)?;
                let outer = self.read_u16(at + 2)?;
                let inner_name = self.read_u16(at + 4)?;
                let flags = self.read_u16(at + 6)?;
                visitor.visit_inner_class(
                    if inner == 0 {
                        None
                    } else {
                        Some(self.read_utf8_ref(self.item(inner)?)?)
                    },
                    if outer == 0 {
                        None
                    } else {
                        Some(self.read_utf8_ref(self.item(outer)?)?)
                    },
                    if inner_name == 0 {
                        None
                    } else {
                        Some(self.read_utf8_item(inner_name)?)
                    },
                    InnerClassAccessFlags::from_bits_retain(flags as u32),
                )?;
                at += 8;
            }
        }

        // fields
        let mut u = fields_start;
        let mut count = self.read_u16(u)?;
        u += 2;
        for _ in 0..count {
            u = self.accept_field(visitor, prototypes, u)?;
        }

        // methods
        count = self.read_u16(u)?;
        u += 2;
        for _ in 0..count {
            u = self.accept_method(visitor, prototypes, skip_debug, u)?;
        }

        // class attribute blobs
        for blob in class_blobs {
            visitor.visit_attribute(blob)?;
        }
        visitor.visit_end()
    }

    /// Parse one field_info starting at `u`; returns the offset just past it
    fn accept_field(
        &self,
        visitor: &mut dyn ClassVisitor,
        prototypes: &[&str],
        u: usize,
    ) -> Result<usize> {
        let mut access = self.read_u16(u)? as u32;
        let name = self.read_utf8_ref(u + 2)?;
        let descriptor = self.read_utf8_ref(u + 4)?;

        let mut signature = None;
        let mut value_item = 0u16;
        let mut blobs: Vec<Attribute> = vec![];
        let mut attr_count = self.read_u16(u + 6)?;
        let mut v = u + 8;
        while attr_count > 0 {
            let attr_name = self.read_utf8_ref(v)?;
            let size = self.attribute_size(v)?;
            let payload = v + 6;
            match attr_name {
                "Signature" => signature = Some(self.read_utf8_ref(payload)?),
                "ConstantValue" => value_item = self.read_u16(payload)?,
                "Synthetic" => access |= ACC_SYNTHETIC,
                "Deprecated" => access |= ACC_DEPRECATED,
                other => {
                    if prototypes.contains(&other) {
                        let info = self
                            .b
                            .get(payload..v + size)
                            .ok_or_else(|| malformed("attribute is truncated", payload))?;
                        blobs.push(Attribute::new(other, info.to_vec()));
                    }
                }
            }
            v += size;
            attr_count -= 1;
        }

        let value = if value_item == 0 {
            None
        } else {
            Some(self.read_const(value_item)?)
        };
        if let Some(field_visitor) = visitor.visit_field(
            FieldAccessFlags::from_bits_retain(access),
            name,
            descriptor,
            signature,
            value.as_ref(),
        )? {
            for blob in blobs {
                field_visitor.visit_attribute(blob)?;
            }
            field_visitor.visit_end()?;
        }
        Ok(v)
    }

    /// Parse one method_info starting at `u`; returns the offset just past it
    fn accept_method(
        &self,
        visitor: &mut dyn ClassVisitor,
        prototypes: &[&str],
        skip_debug: bool,
        u: usize,
    ) -> Result<usize> {
        let mut access = self.read_u16(u)? as u32;
        let name = self.read_utf8_ref(u + 2)?;
        let descriptor = self.read_utf8_ref(u + 4)?;

        let mut signature = None;
        let mut code_at = None;
        let mut exceptions_at = None;
        let mut blobs: Vec<Attribute> = vec![];
        let mut attr_count = self.read_u16(u + 6)?;
        let mut v = u + 8;
        while attr_count > 0 {
            let attr_name = self.read_utf8_ref(v)?;
            let size = self.attribute_size(v)?;
            let payload = v + 6;
            match attr_name {
                "Code" => code_at = Some(payload),
                "Exceptions" => exceptions_at = Some(payload),
                "Signature" => signature = Some(self.read_utf8_ref(payload)?),
                "Synthetic" => access |= ACC_SYNTHETIC,
                "Deprecated" => access |= ACC_DEPRECATED,
                other => {
                    if prototypes.contains(&other) {
                        let info = self
                            .b
                            .get(payload..v + size)
                            .ok_or_else(|| malformed("attribute is truncated", payload))?;
                        blobs.push(Attribute::new(other, info.to_vec()));
                    }
                }
            }
            v += size;
            attr_count -= 1;
        }

        let mut exceptions = vec![];
        if let Some(mut at) = exceptions_at {
            let count = self.read_u16(at)?;
            at += 2;
            for _ in 0..count {
                exceptions.push(self.read_class_ref(at)?);
                at += 2;
            }
        }

        if let Some(method_visitor) = visitor.visit_method(
            MethodAccessFlags::from_bits_retain(access),
            name,
            descriptor,
            signature,
            &exceptions,
        )? {
            for blob in blobs {
                method_visitor.visit_attribute(blob)?;
            }
            if let Some(code_at) = code_at {
                self.accept_code(method_visitor, prototypes, skip_debug, name, code_at)?;
            }
            method_visitor.visit_end()?;
        }
        Ok(v)
    }

    // ------------------------------------------------------------------
    // Method code
    // ------------------------------------------------------------------

    fn accept_code(
        &self,
        mv: &mut dyn MethodVisitor,
        prototypes: &[&str],
        skip_debug: bool,
        method_name: &str,
        at: usize,
    ) -> Result<()> {
        let max_stack = self.read_u16(at)?;
        let max_locals = self.read_u16(at + 2)?;
        let code_length = self.read_u32(at + 4)? as usize;
        let code_start = at + 8;
        let code_end = code_start + code_length;
        if code_end > self.b.len() {
            return Err(malformed(
                &format!("code of method {} is truncated", method_name),
                at,
            ));
        }

        let mut ctx = CodeContext {
            method_name,
            code_start,
            code_length,
            labels: vec![None; code_length + 1],
            next_label: 0,
        };

        // 1st phase: find the labels
        let mut v = code_start;
        while v < code_end {
            let w = v - code_start;
            let opcode = self.read_u8(v)?;
            let shape = opcodes::insn_shape(opcode)
                .ok_or_else(|| ctx.bad_opcode(opcode, w))?;
            v += match shape {
                InsnShape::NoArg | InsnShape::ImplicitVar => 1,
                InsnShape::Label => {
                    let target = w as i64 + self.read_i16(v + 1)? as i64;
                    ctx.make_branch_label(target)?;
                    3
                }
                InsnShape::LabelWide => {
                    let target = w as i64 + self.read_i32(v + 1)? as i64;
                    ctx.make_branch_label(target)?;
                    5
                }
                InsnShape::Var | InsnShape::SByte | InsnShape::Ldc => 2,
                InsnShape::Short
                | InsnShape::LdcWide
                | InsnShape::FieldOrMethod
                | InsnShape::Type
                | InsnShape::Iinc => 3,
                InsnShape::MultiANewArray => 4,
                InsnShape::InterfaceMethod => 5,
                InsnShape::Wide => {
                    if self.read_u8(v + 1)? == opcodes::IINC {
                        6
                    } else {
                        4
                    }
                }
                InsnShape::TableSwitch => {
                    // skip 0 to 3 padding bytes
                    let aligned = v + 4 - (w & 3);
                    ctx.make_branch_label(w as i64 + self.read_i32(aligned)? as i64)?;
                    let low = self.read_i32(aligned + 4)?;
                    let high = self.read_i32(aligned + 8)?;
                    if high < low {
                        return Err(malformed("tableswitch bounds are inverted", v));
                    }
                    let entries = (high - low + 1) as usize;
                    for j in 0..entries {
                        let target =
                            w as i64 + self.read_i32(aligned + 12 + 4 * j)? as i64;
                        ctx.make_branch_label(target)?;
                    }
                    aligned + 12 + 4 * entries - v
                }
                InsnShape::LookupSwitch => {
                    let aligned = v + 4 - (w & 3);
                    ctx.make_branch_label(w as i64 + self.read_i32(aligned)? as i64)?;
                    let npairs = self.read_i32(aligned + 4)?;
                    if npairs < 0 {
                        return Err(malformed("negative lookupswitch pair count", v));
                    }
                    for j in 0..npairs as usize {
                        let target =
                            w as i64 + self.read_i32(aligned + 12 + 8 * j)? as i64;
                        ctx.make_branch_label(target)?;
                    }
                    aligned + 8 + 8 * npairs as usize - v
                }
            };
        }

        // exception table labels
        let mut v = code_end;
        let handler_count = self.read_u16(v)?;
        let handlers_start = v + 2;
        v += 2;
        for _ in 0..handler_count {
            ctx.make_offset_label(self.read_u16(v)? as i64, false)?;
            ctx.make_offset_label(self.read_u16(v + 2)? as i64, false)?;
            ctx.make_offset_label(self.read_u16(v + 4)? as i64, false)?;
            v += 8;
        }

        // code attributes: debug table labels, and blobs to surface later
        let code_attributes_start = v;
        let mut blobs: Vec<Attribute> = vec![];
        let mut attr_count = self.read_u16(v)?;
        v += 2;
        while attr_count > 0 {
            let attr_name = self.read_utf8_ref(v)?;
            let size = self.attribute_size(v)?;
            let payload = v + 6;
            match attr_name {
                "LocalVariableTable" | "LocalVariableTypeTable" if !skip_debug => {
                    let count = self.read_u16(payload)?;
                    let mut w = payload + 2;
                    for _ in 0..count {
                        let start = self.read_u16(w)? as i64;
                        let length = self.read_u16(w + 2)? as i64;
                        ctx.make_offset_label(start, true)?;
                        ctx.make_offset_label(start + length, true)?;
                        w += 10;
                    }
                }
                "LineNumberTable" if !skip_debug => {
                    let count = self.read_u16(payload)?;
                    let mut w = payload + 2;
                    for _ in 0..count {
                        ctx.make_offset_label(self.read_u16(w)? as i64, true)?;
                        w += 4;
                    }
                }
                // frames are a writer-side synthesis concern
                "StackMapTable" | "StackMap" => {}
                other => {
                    if prototypes.contains(&other) {
                        let info = self
                            .b
                            .get(payload..v + size)
                            .ok_or_else(|| malformed("attribute is truncated", payload))?;
                        blobs.push(Attribute::new(other, info.to_vec()));
                    }
                }
            }
            v += size;
            attr_count -= 1;
        }

        // 2nd phase: visit the instructions
        self.accept_instructions(mv, &ctx)?;
        if let Some(label) = ctx.labels[code_length] {
            mv.visit_label(label)?;
        }

        // exception table
        let mut v = handlers_start;
        for _ in 0..handler_count {
            let start = ctx.label_at(self.read_u16(v)? as usize)?;
            let end = ctx.label_at(self.read_u16(v + 2)? as usize)?;
            let handler = ctx.label_at(self.read_u16(v + 4)? as usize)?;
            let type_index = self.read_u16(v + 6)?;
            let catch_type = if type_index == 0 {
                None
            } else {
                Some(self.read_utf8_ref(self.item(type_index)?)?)
            };
            mv.visit_try_catch_block(start, end, handler, catch_type)?;
            v += 8;
        }

        // debug tables
        if !skip_debug {
            self.accept_debug_tables(mv, &ctx, code_attributes_start)?;
        }

        for blob in blobs {
            mv.visit_attribute(blob)?;
        }
        mv.visit_maxs(max_stack, max_locals)
    }

    fn accept_instructions(
        &self,
        mv: &mut dyn MethodVisitor,
        ctx: &CodeContext<'_>,
    ) -> Result<()> {
        use opcodes::*;
        let code_start = ctx.code_start;
        let code_end = code_start + ctx.code_length;
        let mut v = code_start;
        while v < code_end {
            let w = v - code_start;
            if let Some(label) = ctx.labels[w] {
                mv.visit_label(label)?;
            }
            let opcode = self.read_u8(v)?;
            let shape = opcodes::insn_shape(opcode)
                .ok_or_else(|| ctx.bad_opcode(opcode, w))?;
            v += match shape {
                InsnShape::NoArg => {
                    mv.visit_insn(opcode)?;
                    1
                }
                InsnShape::ImplicitVar => {
                    if opcode > ISTORE {
                        let x = opcode - 59; // istore_0
                        mv.visit_var_insn(ISTORE + (x >> 2), (x & 0x3) as u16)?;
                    } else {
                        let x = opcode - 26; // iload_0
                        mv.visit_var_insn(ILOAD + (x >> 2), (x & 0x3) as u16)?;
                    }
                    1
                }
                InsnShape::Label => {
                    let target = w as i64 + self.read_i16(v + 1)? as i64;
                    mv.visit_jump_insn(opcode, ctx.label_at(target as usize)?)?;
                    3
                }
                InsnShape::LabelWide => {
                    // goto_w/jsr_w surface as their short forms; the writer
                    // re-widens when the offset requires it
                    let target = w as i64 + self.read_i32(v + 1)? as i64;
                    mv.visit_jump_insn(opcode - 33, ctx.label_at(target as usize)?)?;
                    5
                }
                InsnShape::Var => {
                    mv.visit_var_insn(opcode, self.read_u8(v + 1)? as u16)?;
                    2
                }
                InsnShape::SByte => {
                    if opcode == BIPUSH {
                        mv.visit_int_insn(opcode, self.read_i8(v + 1)? as i32)?;
                    } else {
                        mv.visit_int_insn(opcode, self.read_u8(v + 1)? as i32)?;
                    }
                    2
                }
                InsnShape::Short => {
                    mv.visit_int_insn(opcode, self.read_i16(v + 1)? as i32)?;
                    3
                }
                InsnShape::Ldc => {
                    let constant = self.read_const(self.read_u8(v + 1)? as u16)?;
                    mv.visit_ldc_insn(&constant)?;
                    2
                }
                InsnShape::LdcWide => {
                    let constant = self.read_const(self.read_u16(v + 1)?)?;
                    mv.visit_ldc_insn(&constant)?;
                    3
                }
                InsnShape::Wide => {
                    let wide_opcode = self.read_u8(v + 1)?;
                    if wide_opcode == IINC {
                        mv.visit_iinc_insn(self.read_u16(v + 2)?, self.read_i16(v + 4)?)?;
                        6
                    } else {
                        mv.visit_var_insn(wide_opcode, self.read_u16(v + 2)?)?;
                        4
                    }
                }
                InsnShape::TableSwitch => {
                    let aligned = v + 4 - (w & 3);
                    let default = ctx
                        .label_at((w as i64 + self.read_i32(aligned)? as i64) as usize)?;
                    let low = self.read_i32(aligned + 4)?;
                    let high = self.read_i32(aligned + 8)?;
                    let entries = (high - low + 1) as usize;
                    let mut table = Vec::with_capacity(entries);
                    for j in 0..entries {
                        let target = w as i64 + self.read_i32(aligned + 12 + 4 * j)? as i64;
                        table.push(ctx.label_at(target as usize)?);
                    }
                    mv.visit_table_switch_insn(low, high, default, &table)?;
                    aligned + 12 + 4 * entries - v
                }
                InsnShape::LookupSwitch => {
                    let aligned = v + 4 - (w & 3);
                    let default = ctx
                        .label_at((w as i64 + self.read_i32(aligned)? as i64) as usize)?;
                    let npairs = self.read_i32(aligned + 4)? as usize;
                    let mut keys = Vec::with_capacity(npairs);
                    let mut values = Vec::with_capacity(npairs);
                    for j in 0..npairs {
                        keys.push(self.read_i32(aligned + 8 + 8 * j)?);
                        let target = w as i64 + self.read_i32(aligned + 12 + 8 * j)? as i64;
                        values.push(ctx.label_at(target as usize)?);
                    }
                    mv.visit_lookup_switch_insn(default, &keys, &values)?;
                    aligned + 8 + 8 * npairs - v
                }
                InsnShape::FieldOrMethod | InsnShape::InterfaceMethod => {
                    let reference = self.item(self.read_u16(v + 1)?)?;
                    let owner = self.read_class_ref(reference)?;
                    let name_type = self.item(self.read_u16(reference + 2)?)?;
                    let name = self.read_utf8_ref(name_type)?;
                    let descriptor = self.read_utf8_ref(name_type + 2)?;
                    if opcode < INVOKEVIRTUAL {
                        mv.visit_field_insn(opcode, owner, name, descriptor)?;
                        3
                    } else {
                        mv.visit_method_insn(opcode, owner, name, descriptor)?;
                        if opcode == INVOKEINTERFACE {
                            5
                        } else {
                            3
                        }
                    }
                }
                InsnShape::Type => {
                    mv.visit_type_insn(opcode, self.read_class_ref(v + 1)?)?;
                    3
                }
                InsnShape::Iinc => {
                    mv.visit_iinc_insn(self.read_u8(v + 1)? as u16, self.read_i8(v + 2)? as i16)?;
                    3
                }
                InsnShape::MultiANewArray => {
                    mv.visit_multi_anew_array_insn(
                        self.read_class_ref(v + 1)?,
                        self.read_u8(v + 3)?,
                    )?;
                    4
                }
            };
        }
        Ok(())
    }

    fn accept_debug_tables(
        &self,
        mv: &mut dyn MethodVisitor,
        ctx: &CodeContext<'_>,
        code_attributes_start: usize,
    ) -> Result<()> {
        // join LocalVariableTypeTable signatures onto LocalVariableTable rows
        let mut type_entries: Vec<(u16, u16, &str)> = vec![];
        let mut v = code_attributes_start;
        let mut attr_count = self.read_u16(v)?;
        v += 2;
        while attr_count > 0 {
            let attr_name = self.read_utf8_ref(v)?;
            let size = self.attribute_size(v)?;
            if attr_name == "LocalVariableTypeTable" {
                let count = self.read_u16(v + 6)?;
                let mut w = v + 8;
                for _ in 0..count {
                    let start = self.read_u16(w)?;
                    let index = self.read_u16(w + 8)?;
                    let signature = self.read_utf8_ref(w + 6)?;
                    type_entries.push((start, index, signature));
                    w += 10;
                }
            }
            v += size;
            attr_count -= 1;
        }

        let mut v = code_attributes_start;
        let mut attr_count = self.read_u16(v)?;
        v += 2;
        while attr_count > 0 {
            let attr_name = self.read_utf8_ref(v)?;
            let size = self.attribute_size(v)?;
            match attr_name {
                "LocalVariableTable" => {
                    let count = self.read_u16(v + 6)?;
                    let mut w = v + 8;
                    for _ in 0..count {
                        let start = self.read_u16(w)?;
                        let length = self.read_u16(w + 2)?;
                        let index = self.read_u16(w + 8)?;
                        let signature = type_entries
                            .iter()
                            .find(|&&(s, i, _)| s == start && i == index)
                            .map(|&(_, _, signature)| signature);
                        mv.visit_local_variable(
                            self.read_utf8_ref(w + 4)?,
                            self.read_utf8_ref(w + 6)?,
                            signature,
                            ctx.label_at(start as usize)?,
                            ctx.label_at(start as usize + length as usize)?,
                            index,
                        )?;
                        w += 10;
                    }
                }
                "LineNumberTable" => {
                    let count = self.read_u16(v + 6)?;
                    let mut w = v + 8;
                    for _ in 0..count {
                        let start = self.read_u16(w)?;
                        let line = self.read_u16(w + 2)?;
                        mv.visit_line_number(line, ctx.label_at(start as usize)?)?;
                        w += 4;
                    }
                }
                _ => {}
            }
            v += size;
            attr_count -= 1;
        }
        Ok(())
    }
}

/// Per-method label discovery state
struct CodeContext<'c> {
    method_name: &'c str,
    code_start: usize,
    code_length: usize,
    labels: Vec<Option<Label>>,
    next_label: u32,
}

impl<'c> CodeContext<'c> {
    /// Allocate (or reuse) the label for a branch target
    fn make_branch_label(&mut self, offset: i64) -> Result<Label> {
        if offset < 0 || offset >= self.code_length as i64 {
            return Err(malformed(
                &format!(
                    "branch target {} out of range in method {}",
                    offset, self.method_name
                ),
                self.code_start,
            ));
        }
        self.make_offset_label(offset, false)
    }

    /// Allocate (or reuse) the label at an offset. Debug labels may sit one
    /// past the last instruction; a label first seen from a debug table and
    /// later targeted by a branch loses its debug-only status because branch
    /// discovery runs first.
    fn make_offset_label(&mut self, offset: i64, debug: bool) -> Result<Label> {
        if offset < 0 || offset > self.code_length as i64 {
            return Err(malformed(
                &format!(
                    "code offset {} out of range in method {}",
                    offset, self.method_name
                ),
                self.code_start,
            ));
        }
        if let Some(label) = self.labels[offset as usize] {
            return Ok(label);
        }
        let label = Label {
            id: self.next_label,
            debug,
        };
        self.next_label += 1;
        self.labels[offset as usize] = Some(label);
        Ok(label)
    }

    fn label_at(&self, offset: usize) -> Result<Label> {
        match self.labels.get(offset).copied().flatten() {
            Some(label) => Ok(label),
            None => Err(malformed(
                &format!(
                    "offset {} in method {} has no label",
                    offset, self.method_name
                ),
                self.code_start,
            )),
        }
    }

    fn bad_opcode(&self, opcode: u8, offset: usize) -> Error {
        malformed(
            &format!(
                "reserved or unknown opcode {} in method {}",
                opcode, self.method_name
            ),
            self.code_start + offset,
        )
    }
}

fn malformed(message: &str, offset: usize) -> Error {
    Error::MalformedInput {
        message: message.to_string(),
        offset,
    }
}

/// Inverse of the modified UTF-8 encoding: 1 to 3 byte sequences decoding to
/// UTF-16 code units, with supplementary characters as surrogate pairs.
fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as u32;
        match c >> 4 {
            0..=7 => {
                units.push(c as u16);
                i += 1;
            }
            12 | 13 => {
                let d = *bytes.get(i + 1)? as u32;
                units.push((((c & 0x1F) << 6) | (d & 0x3F)) as u16);
                i += 2;
            }
            14 => {
                let d = *bytes.get(i + 1)? as u32;
                let e = *bytes.get(i + 2)? as u32;
                units.push((((c & 0x0F) << 12) | ((d & 0x3F) << 6) | (e & 0x3F)) as u16);
                i += 3;
            }
            _ => return None,
        }
    }
    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let err = ClassReader::new(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 50, 0, 1]).unwrap_err();
        assert!(matches!(err, Error::MalformedInput { .. }));
    }

    #[test]
    fn rejects_truncated_input() {
        let err = ClassReader::new(&[0xCA, 0xFE, 0xBA, 0xBE]).unwrap_err();
        assert!(matches!(err, Error::MalformedInput { .. }));
    }

    #[test]
    fn rejects_unknown_constant_tag() {
        // magic, version 0.50, pool count 2, bogus tag 99
        let bytes = [
            0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 50, 0, 2, 99, 0, 0, 0, 0, 0, 0, 0, 0,
        ];
        let err = ClassReader::new(&bytes).unwrap_err();
        match err {
            Error::MalformedInput { message, .. } => assert!(message.contains("99")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn decodes_modified_utf8() {
        assert_eq!(decode_modified_utf8(b"foo").as_deref(), Some("foo"));
        // embedded null uses the two-byte form
        assert_eq!(
            decode_modified_utf8(&[97, 192, 128, 97]).as_deref(),
            Some("a\u{0}a")
        );
        // supplementary character as a surrogate pair of 3-byte sequences
        assert_eq!(
            decode_modified_utf8(&[237, 160, 128, 237, 176, 128]).as_deref(),
            Some("\u{10000}")
        );
    }
}
