//! Class file emission.
//!
//! A [`ClassWriter`] implements the visitor surface and assembles a class
//! file from the events it receives; it can be driven by a
//! [`crate::ClassReader`], by an adapter chain, or by hand. Method bodies go
//! through [`MethodWriter`], which owns the label arena and the dataflow
//! machinery.

mod frame;
mod label;
mod method;

pub use label::{Label, LabelGenerator};
pub use method::MethodWriter;

use crate::access_flags::{
    ClassAccessFlags, FieldAccessFlags, InnerClassAccessFlags, MethodAccessFlags,
};
use crate::attributes::Attribute;
use crate::bytevector::ByteVector;
use crate::constant_pool::{ClassHierarchy, ConstantPool, ConstantValue, ObjectHierarchy};
use crate::errors::{Error, Result};
use crate::version::Version;
use crate::visitor::{ClassVisitor, FieldVisitor, MethodVisitor};
use std::cell::RefCell;
use std::rc::Rc;

/// What the writer computes on its own for each method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compute {
    /// Trust the `visit_maxs` arguments and emit no frames
    Nothing,
    /// Compute max stack and max locals from the control flow graph
    MaxStack,
    /// Compute max stack, max locals, and full `StackMapTable` frames.
    /// Methods using `jsr`/`ret` are rejected in this mode.
    Frames,
}

struct FieldWriter {
    access: FieldAccessFlags,
    name_index: u16,
    descriptor_index: u16,
    signature_index: Option<u16>,
    value_index: Option<u16>,
    attributes: Vec<Attribute>,
}

impl FieldVisitor for FieldWriter {
    fn visit_attribute(&mut self, attribute: Attribute) -> Result<()> {
        self.attributes.push(attribute);
        Ok(())
    }
}

impl FieldWriter {
    fn serialize(&self, out: &mut ByteVector, pool: &mut ConstantPool) -> Result<()> {
        out.put_u16(self.access.serialized_bits());
        out.put_u16(self.name_index);
        out.put_u16(self.descriptor_index);

        let deprecated = self.access.contains(FieldAccessFlags::DEPRECATED);
        let mut count = self.attributes.len() as u16;
        count += [
            self.value_index.is_some(),
            self.signature_index.is_some(),
            deprecated,
        ]
        .iter()
        .filter(|&&x| x)
        .count() as u16;
        out.put_u16(count);

        if let Some(value_index) = self.value_index {
            out.put_u16(pool.add_utf8("ConstantValue")?);
            out.put_u32(2);
            out.put_u16(value_index);
        }
        if let Some(signature_index) = self.signature_index {
            out.put_u16(pool.add_utf8("Signature")?);
            out.put_u32(2);
            out.put_u16(signature_index);
        }
        if deprecated {
            out.put_u16(pool.add_utf8("Deprecated")?);
            out.put_u32(0);
        }
        for attribute in &self.attributes {
            out.put_u16(pool.add_utf8(&attribute.type_name)?);
            out.put_u32(attribute.info.len() as u32);
            out.put_bytes(&attribute.info);
        }
        Ok(())
    }
}

/// Assembles a class file from visitor events.
pub struct ClassWriter {
    pool: Rc<RefCell<ConstantPool>>,
    hierarchy: Rc<dyn ClassHierarchy>,
    compute: Compute,

    version: Version,
    access: ClassAccessFlags,
    this_name: String,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    signature_index: Option<u16>,

    source_file_index: Option<u16>,
    source_debug: Option<Vec<u8>>,
    outer_class: Option<(u16, u16)>,
    inner_classes: Vec<(u16, u16, u16, u16)>,

    fields: Vec<FieldWriter>,
    methods: Vec<MethodWriter>,
    attributes: Vec<Attribute>,
}

impl ClassWriter {
    pub fn new(compute: Compute) -> ClassWriter {
        ClassWriter::with_hierarchy(compute, Rc::new(ObjectHierarchy))
    }

    /// A writer whose frame merges resolve common superclasses through the
    /// given oracle instead of collapsing everything to `java/lang/Object`.
    pub fn with_hierarchy(compute: Compute, hierarchy: Rc<dyn ClassHierarchy>) -> ClassWriter {
        ClassWriter {
            pool: Rc::new(RefCell::new(ConstantPool::new())),
            hierarchy,
            compute,
            version: Version::JAVA6,
            access: ClassAccessFlags::empty(),
            this_name: String::new(),
            this_class: 0,
            super_class: 0,
            interfaces: vec![],
            signature_index: None,
            source_file_index: None,
            source_debug: None,
            outer_class: None,
            inner_classes: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        }
    }

    /// Serialize the class assembled so far.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        if self.this_class == 0 {
            return Err(Error::IllegalState(
                "visit was never called on this writer".to_string(),
            ));
        }

        // the body is assembled first so that everything it interns lands in
        // the constant pool before the pool itself is written
        let mut body = ByteVector::new();
        body.put_u16(self.access.serialized_bits());
        body.put_u16(self.this_class);
        body.put_u16(self.super_class);
        body.put_u16(self.interfaces.len() as u16);
        for &interface in &self.interfaces {
            body.put_u16(interface);
        }

        body.put_u16(self.fields.len() as u16);
        for field in &self.fields {
            let mut pool = self.pool.borrow_mut();
            field.serialize(&mut body, &mut pool)?;
        }

        body.put_u16(self.methods.len() as u16);
        for method in &self.methods {
            method.serialize(&mut body)?;
        }

        self.serialize_class_attributes(&mut body)?;

        let mut out = ByteVector::new();
        out.put_u32(0xCAFE_BABE);
        out.put_u16(self.version.minor_version);
        out.put_u16(self.version.major_version);
        self.pool.borrow().serialize(&mut out);
        out.put_bytes(body.as_slice());
        Ok(out.into_vec())
    }

    fn serialize_class_attributes(&self, out: &mut ByteVector) -> Result<()> {
        let mut pool = self.pool.borrow_mut();
        let deprecated = self.access.contains(ClassAccessFlags::DEPRECATED);

        let mut count = self.attributes.len() as u16;
        count += [
            self.source_file_index.is_some(),
            self.source_debug.is_some(),
            self.signature_index.is_some(),
            deprecated,
            self.outer_class.is_some(),
            !self.inner_classes.is_empty(),
        ]
        .iter()
        .filter(|&&x| x)
        .count() as u16;
        out.put_u16(count);

        if let Some(source_file_index) = self.source_file_index {
            out.put_u16(pool.add_utf8("SourceFile")?);
            out.put_u32(2);
            out.put_u16(source_file_index);
        }
        if let Some(debug) = &self.source_debug {
            out.put_u16(pool.add_utf8("SourceDebugExtension")?);
            out.put_u32(debug.len() as u32);
            out.put_bytes(debug);
        }
        if let Some(signature_index) = self.signature_index {
            out.put_u16(pool.add_utf8("Signature")?);
            out.put_u32(2);
            out.put_u16(signature_index);
        }
        if deprecated {
            out.put_u16(pool.add_utf8("Deprecated")?);
            out.put_u32(0);
        }
        if let Some((owner, method)) = self.outer_class {
            out.put_u16(pool.add_utf8("EnclosingMethod")?);
            out.put_u32(4);
            out.put_u16(owner);
            out.put_u16(method);
        }
        if !self.inner_classes.is_empty() {
            out.put_u16(pool.add_utf8("InnerClasses")?);
            out.put_u32(2 + 8 * self.inner_classes.len() as u32);
            out.put_u16(self.inner_classes.len() as u16);
            for &(inner, outer, name, access) in &self.inner_classes {
                out.put_u16(inner);
                out.put_u16(outer);
                out.put_u16(name);
                out.put_u16(access);
            }
        }
        for attribute in &self.attributes {
            out.put_u16(pool.add_utf8(&attribute.type_name)?);
            out.put_u32(attribute.info.len() as u32);
            out.put_bytes(&attribute.info);
        }
        Ok(())
    }
}

impl ClassVisitor for ClassWriter {
    fn visit(
        &mut self,
        version: Version,
        access: ClassAccessFlags,
        name: &str,
        signature: Option<&str>,
        super_name: Option<&str>,
        interfaces: &[&str],
    ) -> Result<()> {
        let mut pool = self.pool.borrow_mut();
        self.version = version;
        self.access = access;
        self.this_name = name.to_string();
        self.this_class = pool.add_class(name)?;
        self.super_class = match super_name {
            Some(super_name) => pool.add_class(super_name)?,
            None => 0,
        };
        self.interfaces = interfaces
            .iter()
            .map(|interface| pool.add_class(interface))
            .collect::<Result<Vec<u16>>>()?;
        self.signature_index = match signature {
            Some(signature) => Some(pool.add_utf8(signature)?),
            None => None,
        };
        Ok(())
    }

    fn visit_source(&mut self, source: Option<&str>, debug: Option<&str>) -> Result<()> {
        if let Some(source) = source {
            self.source_file_index = Some(self.pool.borrow_mut().add_utf8(source)?);
        }
        if let Some(debug) = debug {
            self.source_debug = Some(crate::constant_pool::encode_modified_utf8(debug));
        }
        Ok(())
    }

    fn visit_outer_class(
        &mut self,
        owner: &str,
        name: Option<&str>,
        descriptor: Option<&str>,
    ) -> Result<()> {
        let mut pool = self.pool.borrow_mut();
        let owner = pool.add_class(owner)?;
        let method = match (name, descriptor) {
            (Some(name), Some(descriptor)) => pool.add_name_and_type(name, descriptor)?,
            _ => 0,
        };
        self.outer_class = Some((owner, method));
        Ok(())
    }

    fn visit_inner_class(
        &mut self,
        name: Option<&str>,
        outer_name: Option<&str>,
        inner_name: Option<&str>,
        access: InnerClassAccessFlags,
    ) -> Result<()> {
        let mut pool = self.pool.borrow_mut();
        let inner = match name {
            Some(name) => pool.add_class(name)?,
            None => 0,
        };
        let outer = match outer_name {
            Some(outer_name) => pool.add_class(outer_name)?,
            None => 0,
        };
        let inner_name = match inner_name {
            Some(inner_name) => pool.add_utf8(inner_name)?,
            None => 0,
        };
        self.inner_classes
            .push((inner, outer, inner_name, access.serialized_bits()));
        Ok(())
    }

    fn visit_field(
        &mut self,
        access: FieldAccessFlags,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        value: Option<&ConstantValue>,
    ) -> Result<Option<&mut dyn FieldVisitor>> {
        let mut pool = self.pool.borrow_mut();
        let name_index = pool.add_utf8(name)?;
        let descriptor_index = pool.add_utf8(descriptor)?;
        let signature_index = match signature {
            Some(signature) => Some(pool.add_utf8(signature)?),
            None => None,
        };
        let value_index = match value {
            Some(value) => Some(pool.add_const(value)?.0),
            None => None,
        };
        drop(pool);
        self.fields.push(FieldWriter {
            access,
            name_index,
            descriptor_index,
            signature_index,
            value_index,
            attributes: vec![],
        });
        Ok(Some(self.fields.last_mut().unwrap()))
    }

    fn visit_method(
        &mut self,
        access: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        exceptions: &[&str],
    ) -> Result<Option<&mut dyn MethodVisitor>> {
        let method = MethodWriter::new(
            self.pool.clone(),
            self.hierarchy.clone(),
            self.compute,
            self.this_name.clone(),
            access,
            name,
            descriptor,
            signature,
            exceptions,
        )?;
        self.methods.push(method);
        Ok(Some(self.methods.last_mut().unwrap()))
    }

    fn visit_attribute(&mut self, attribute: Attribute) -> Result<()> {
        self.attributes.push(attribute);
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}
