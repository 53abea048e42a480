//! Writer-side constant pool.
//!
//! The pool is append only: every `add_*` operation either finds an existing
//! entry through one of the per-kind interning maps or pushes a fresh entry
//! and records it. Indices are 1-based and `long`/`double` entries consume two
//! slots, exactly as in the serialized format.
//!
//! The pool also owns the frame type table: an interning table of reference
//! internal names and uninitialized-allocation sites that the packed frame
//! types index into. Keeping it separate from the pool entries avoids bloating
//! the emitted pool with types that only ever appear in intermediate frames.

use crate::bytevector::ByteVector;
use crate::errors::{Error, Result};
use std::collections::HashMap;

/// A loadable or `ConstantValue`-able constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    /// A class constant, by internal name (eg. `java/lang/String`) or array
    /// descriptor (eg. `[I`)
    Class(String),
}

#[derive(Debug)]
enum Entry {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    Str(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
}

impl Entry {
    fn width(&self) -> u16 {
        match self {
            Entry::Long(_) | Entry::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Oracle answering common-superclass queries during frame merging.
///
/// The original implementation resolves these through a class loader; here the
/// caller supplies whatever view of the class hierarchy it has. Results are
/// memoized in the pool's type table, so an expensive oracle is queried at
/// most once per unordered pair of types.
pub trait ClassHierarchy {
    /// Internal name of the closest common superclass of `a` and `b`
    fn common_superclass(&self, a: &str, b: &str) -> String;
}

/// Default oracle: any two distinct reference types merge to
/// `java/lang/Object`. Always a common supertype, though not necessarily the
/// least one.
pub struct ObjectHierarchy;

impl ClassHierarchy for ObjectHierarchy {
    fn common_superclass(&self, a: &str, b: &str) -> String {
        if a == b {
            a.to_string()
        } else {
            "java/lang/Object".to_string()
        }
    }
}

#[derive(Debug)]
struct TypeEntry {
    name: String,
    /// Bytecode offset of the allocating `new`, for uninitialized types
    new_offset: Option<u32>,
}

#[derive(Debug, Default)]
pub struct ConstantPool {
    entries: Vec<Entry>,
    /// 1-based index of the next entry to be added
    next_index: u16,

    utf8s: HashMap<String, u16>,
    classes: HashMap<String, u16>,
    strings: HashMap<u16, u16>,
    name_types: HashMap<(u16, u16), u16>,
    members: HashMap<(u8, u16, u16), u16>,
    integers: HashMap<i32, u16>,
    floats: HashMap<u32, u16>,
    longs: HashMap<i64, u16>,
    doubles: HashMap<u64, u16>,

    type_table: Vec<TypeEntry>,
    type_map: HashMap<(String, Option<u32>), u32>,
    merged: HashMap<(u32, u32), u32>,
}

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

impl ConstantPool {
    pub fn new() -> ConstantPool {
        ConstantPool {
            next_index: 1,
            ..ConstantPool::default()
        }
    }

    fn push_entry(&mut self, entry: Entry) -> Result<u16> {
        let index = self.next_index;
        let next = index.checked_add(entry.width());
        match next {
            Some(next) => {
                self.next_index = next;
                self.entries.push(entry);
                Ok(index)
            }
            None => Err(Error::OverflowLimit {
                context: "constant pool index past u16".to_string(),
            }),
        }
    }

    pub fn add_utf8(&mut self, value: &str) -> Result<u16> {
        if let Some(&index) = self.utf8s.get(value) {
            return Ok(index);
        }
        let index = self.push_entry(Entry::Utf8(value.to_string()))?;
        self.utf8s.insert(value.to_string(), index);
        Ok(index)
    }

    pub fn add_class(&mut self, internal_name: &str) -> Result<u16> {
        if let Some(&index) = self.classes.get(internal_name) {
            return Ok(index);
        }
        let name = self.add_utf8(internal_name)?;
        let index = self.push_entry(Entry::Class(name))?;
        self.classes.insert(internal_name.to_string(), index);
        Ok(index)
    }

    pub fn add_string(&mut self, value: &str) -> Result<u16> {
        let utf8 = self.add_utf8(value)?;
        if let Some(&index) = self.strings.get(&utf8) {
            return Ok(index);
        }
        let index = self.push_entry(Entry::Str(utf8))?;
        self.strings.insert(utf8, index);
        Ok(index)
    }

    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.add_utf8(name)?;
        let descriptor = self.add_utf8(descriptor)?;
        if let Some(&index) = self.name_types.get(&(name, descriptor)) {
            return Ok(index);
        }
        let index = self.push_entry(Entry::NameAndType(name, descriptor))?;
        self.name_types.insert((name, descriptor), index);
        Ok(index)
    }

    pub fn add_field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        self.add_member_ref(FIELDREF, owner, name, descriptor)
    }

    pub fn add_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<u16> {
        let tag = if is_interface { IMETHODREF } else { METHODREF };
        self.add_member_ref(tag, owner, name, descriptor)
    }

    fn add_member_ref(&mut self, tag: u8, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.add_class(owner)?;
        let name_type = self.add_name_and_type(name, descriptor)?;
        if let Some(&index) = self.members.get(&(tag, class, name_type)) {
            return Ok(index);
        }
        let entry = match tag {
            FIELDREF => Entry::FieldRef(class, name_type),
            METHODREF => Entry::MethodRef(class, name_type),
            _ => Entry::InterfaceMethodRef(class, name_type),
        };
        let index = self.push_entry(entry)?;
        self.members.insert((tag, class, name_type), index);
        Ok(index)
    }

    pub fn add_integer(&mut self, value: i32) -> Result<u16> {
        if let Some(&index) = self.integers.get(&value) {
            return Ok(index);
        }
        let index = self.push_entry(Entry::Integer(value))?;
        self.integers.insert(value, index);
        Ok(index)
    }

    pub fn add_float(&mut self, value: f32) -> Result<u16> {
        if let Some(&index) = self.floats.get(&value.to_bits()) {
            return Ok(index);
        }
        let index = self.push_entry(Entry::Float(value))?;
        self.floats.insert(value.to_bits(), index);
        Ok(index)
    }

    pub fn add_long(&mut self, value: i64) -> Result<u16> {
        if let Some(&index) = self.longs.get(&value) {
            return Ok(index);
        }
        let index = self.push_entry(Entry::Long(value))?;
        self.longs.insert(value, index);
        Ok(index)
    }

    pub fn add_double(&mut self, value: f64) -> Result<u16> {
        if let Some(&index) = self.doubles.get(&value.to_bits()) {
            return Ok(index);
        }
        let index = self.push_entry(Entry::Double(value))?;
        self.doubles.insert(value.to_bits(), index);
        Ok(index)
    }

    /// Intern a loadable constant. The returned flag says whether the constant
    /// occupies two stack slots (and therefore needs `ldc2_w`).
    pub fn add_const(&mut self, value: &ConstantValue) -> Result<(u16, bool)> {
        match value {
            ConstantValue::Integer(v) => Ok((self.add_integer(*v)?, false)),
            ConstantValue::Float(v) => Ok((self.add_float(*v)?, false)),
            ConstantValue::Long(v) => Ok((self.add_long(*v)?, true)),
            ConstantValue::Double(v) => Ok((self.add_double(*v)?, true)),
            ConstantValue::String(v) => Ok((self.add_string(v)?, false)),
            ConstantValue::Class(v) => Ok((self.add_class(v)?, false)),
        }
    }

    // ------------------------------------------------------------------
    // Frame type table
    // ------------------------------------------------------------------

    fn intern_type(&mut self, internal_name: &str, new_offset: Option<u32>) -> Result<u32> {
        let key = (internal_name.to_string(), new_offset);
        if let Some(&index) = self.type_map.get(&key) {
            return Ok(index);
        }
        let index = self.type_table.len() as u32;
        if index > 0xFF_FFFF {
            return Err(Error::OverflowLimit {
                context: "frame type table past 24 bits".to_string(),
            });
        }
        self.type_table.push(TypeEntry {
            name: key.0.clone(),
            new_offset,
        });
        self.type_map.insert(key, index);
        Ok(index)
    }

    /// Intern a reference type (internal name, no array dimensions) in the
    /// frame type table.
    pub fn add_type(&mut self, internal_name: &str) -> Result<u32> {
        self.intern_type(internal_name, None)
    }

    /// Intern an uninitialized type: the class allocated by the `new`
    /// instruction at `new_offset`. The offset participates in the identity so
    /// that two allocations of the same class stay distinct.
    pub fn add_uninitialized_type(&mut self, internal_name: &str, new_offset: u32) -> Result<u32> {
        self.intern_type(internal_name, Some(new_offset))
    }

    pub(crate) fn type_name(&self, index: u32) -> &str {
        &self.type_table[index as usize].name
    }

    pub(crate) fn type_new_offset(&self, index: u32) -> Option<u32> {
        self.type_table[index as usize].new_offset
    }

    /// Rewrite the recorded `new` offsets after the resize pass moved code
    /// around. The interning keys are rebuilt so later methods cannot collide
    /// with a stale key.
    pub(crate) fn remap_uninitialized_offsets(&mut self, map: impl Fn(u32) -> u32) {
        for entry in &mut self.type_table {
            if let Some(offset) = entry.new_offset {
                entry.new_offset = Some(map(offset));
            }
        }
        self.type_map = self
            .type_table
            .iter()
            .enumerate()
            .map(|(i, e)| ((e.name.clone(), e.new_offset), i as u32))
            .collect();
    }

    /// Common supertype of two type-table entries, memoized per unordered
    /// pair.
    pub(crate) fn merged_type(
        &mut self,
        a: u32,
        b: u32,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<u32> {
        let key = if a <= b { (a, b) } else { (b, a) };
        if let Some(&merged) = self.merged.get(&key) {
            return Ok(merged);
        }
        let merged_name =
            hierarchy.common_superclass(self.type_name(a), self.type_name(b));
        let merged = self.add_type(&merged_name)?;
        self.merged.insert(key, merged);
        Ok(merged)
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    pub(crate) fn serialize(&self, out: &mut ByteVector) {
        out.put_u16(self.next_index);
        for entry in &self.entries {
            match entry {
                Entry::Utf8(value) => {
                    out.put_u8(UTF8);
                    let encoded = encode_modified_utf8(value);
                    out.put_u16(encoded.len() as u16);
                    out.put_bytes(&encoded);
                }
                Entry::Integer(value) => {
                    out.put_u8(INTEGER);
                    out.put_i32(*value);
                }
                Entry::Float(value) => {
                    out.put_u8(FLOAT);
                    out.put_u32(value.to_bits());
                }
                Entry::Long(value) => {
                    out.put_u8(LONG);
                    out.put_u64(*value as u64);
                }
                Entry::Double(value) => {
                    out.put_u8(DOUBLE);
                    out.put_u64(value.to_bits());
                }
                Entry::Class(name) => out.put_12(CLASS, *name),
                Entry::Str(utf8) => out.put_12(STR, *utf8),
                Entry::FieldRef(class, name_type) => {
                    out.put_u8(FIELDREF);
                    out.put_u16(*class);
                    out.put_u16(*name_type);
                }
                Entry::MethodRef(class, name_type) => {
                    out.put_u8(METHODREF);
                    out.put_u16(*class);
                    out.put_u16(*name_type);
                }
                Entry::InterfaceMethodRef(class, name_type) => {
                    out.put_u8(IMETHODREF);
                    out.put_u16(*class);
                    out.put_u16(*name_type);
                }
                Entry::NameAndType(name, descriptor) => {
                    out.put_u8(NAME_TYPE);
                    out.put_u16(*name);
                    out.put_u16(*descriptor);
                }
            }
        }
    }
}

/// Encode a string the way `CONSTANT_Utf8` payloads store it.
///
/// Class files do not hold standard UTF-8 (JVMS §4.4.7): `U+0000` takes the
/// two-byte form so the payload never contains a zero byte, sequences are
/// capped at three bytes, and anything outside the basic multilingual plane
/// is first split into its UTF-16 surrogate pair with each half encoded on
/// three bytes. Driving the encoder from UTF-16 code units gets all three
/// rules at once.
pub(crate) fn encode_modified_utf8(string: &str) -> Vec<u8> {
    fn push_code_unit(out: &mut Vec<u8>, unit: u16) {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | (unit >> 6 & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }

    let mut out = Vec::with_capacity(string.len());
    let mut units = [0u16; 2];
    for c in string.chars() {
        // one unit for BMP characters, a surrogate pair otherwise
        for &unit in c.encode_utf16(&mut units).iter() {
            push_code_unit(&mut out, unit);
        }
    }
    out
}

#[cfg(test)]
mod modified_utf8_tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        assert_eq!(encode_modified_utf8("Code"), b"Code");
        assert_eq!(encode_modified_utf8("(IJ)V"), b"(IJ)V");
    }

    #[test]
    fn null_takes_the_two_byte_form() {
        assert_eq!(encode_modified_utf8("\u{0}"), [0xC0, 0x80]);
        assert_eq!(encode_modified_utf8("a\u{0}b"), [0x61, 0xC0, 0x80, 0x62]);
    }

    #[test]
    fn two_and_three_byte_encodings() {
        // U+00E9 and U+03C0 need two bytes each
        assert_eq!(encode_modified_utf8("éπ"), [0xC3, 0xA9, 0xCF, 0x80]);
        // U+20AC and U+4E2D need three
        assert_eq!(
            encode_modified_utf8("€中"),
            [0xE2, 0x82, 0xAC, 0xE4, 0xB8, 0xAD]
        );
        // up to U+FFFF the encoding agrees with standard UTF-8
        assert_eq!(encode_modified_utf8("é€中"), "é€中".as_bytes());
    }

    #[test]
    fn supplementary_characters_become_surrogate_pairs() {
        // U+10400 splits into D801 DC00, three bytes per half
        assert_eq!(
            encode_modified_utf8("\u{10400}"),
            [0xED, 0xA0, 0x81, 0xED, 0xB0, 0x80]
        );
        // U+1F600 splits into D83D DE00
        assert_eq!(
            encode_modified_utf8("\u{1F600}"),
            [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]
        );
    }
}

#[cfg(test)]
mod pool_tests {
    use super::*;

    #[test]
    fn interning_reuses_entries() {
        let mut pool = ConstantPool::new();
        let a = pool.add_class("java/lang/Object").unwrap();
        let b = pool.add_class("java/lang/Object").unwrap();
        assert_eq!(a, b);
        let c = pool.add_method_ref("java/lang/Object", "<init>", "()V", false).unwrap();
        let d = pool.add_method_ref("java/lang/Object", "<init>", "()V", false).unwrap();
        assert_eq!(c, d);
    }

    #[test]
    fn long_and_double_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.add_long(42).unwrap();
        let after = pool.add_integer(1).unwrap();
        assert_eq!(long, 1);
        assert_eq!(after, 3);
    }

    #[test]
    fn uninitialized_types_are_distinct_per_offset() {
        let mut pool = ConstantPool::new();
        let a = pool.add_uninitialized_type("Foo", 10).unwrap();
        let b = pool.add_uninitialized_type("Foo", 25).unwrap();
        let c = pool.add_uninitialized_type("Foo", 10).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn merged_types_are_memoized() {
        let mut pool = ConstantPool::new();
        let a = pool.add_type("java/lang/String").unwrap();
        let b = pool.add_type("java/lang/Integer").unwrap();
        let m1 = pool.merged_type(a, b, &ObjectHierarchy).unwrap();
        let m2 = pool.merged_type(b, a, &ObjectHierarchy).unwrap();
        assert_eq!(m1, m2);
        assert_eq!(pool.type_name(m1), "java/lang/Object");
    }

    #[test]
    fn pool_serialization_layout() {
        let mut pool = ConstantPool::new();
        pool.add_utf8("Hi").unwrap();
        let mut out = ByteVector::new();
        pool.serialize(&mut out);
        assert_eq!(out.as_slice(), &[0, 2, 1, 0, 2, b'H', b'i']);
    }
}
