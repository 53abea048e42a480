//! Read, transform, and write JVM class files
//!
//! The crate exposes a streaming, visitor-oriented view of the class file
//! format: a [`ClassReader`] parses a byte array and drives a
//! [`ClassVisitor`]; a [`ClassWriter`] implements that same surface and
//! assembles bytes back. Chaining the two (directly, or through adapters
//! that rewrite events on the way) is how classes get transformed. The
//! writer can compute max stack/locals or full `StackMapTable` frames on its
//! own, and transparently widens branch instructions whose offsets outgrow
//! 16 bits.
//!
//! ### Simple example
//!
//! Generating the class file for an empty class with just a default
//! constructor:
//!
//! ```
//! use classforge::opcodes::{ALOAD, INVOKESPECIAL, RETURN};
//! use classforge::{
//!     ClassAccessFlags, ClassVisitor, ClassWriter, Compute, MethodAccessFlags, MethodVisitor,
//!     Version,
//! };
//!
//! # fn generate_class() -> classforge::Result<Vec<u8>> {
//! let mut writer = ClassWriter::new(Compute::Frames);
//! writer.visit(
//!     Version::JAVA6,
//!     ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
//!     "me/example/Empty",
//!     None,
//!     Some("java/lang/Object"),
//!     &[],
//! )?;
//!
//! let constructor = writer
//!     .visit_method(MethodAccessFlags::PUBLIC, "<init>", "()V", None, &[])?
//!     .unwrap();
//! constructor.visit_var_insn(ALOAD, 0)?;
//! constructor.visit_method_insn(INVOKESPECIAL, "java/lang/Object", "<init>", "()V")?;
//! constructor.visit_insn(RETURN)?;
//! constructor.visit_maxs(0, 0)?; // ignored: the writer computes these
//! constructor.visit_end()?;
//!
//! writer.visit_end()?;
//! let class_bytes = writer.to_bytes()?;
//! # Ok(class_bytes)
//! # }
//! # generate_class().unwrap();
//! ```
//!
//! Round-tripping an existing class works by pointing a reader at a writer:
//!
//! ```no_run
//! use classforge::{ClassReader, ClassWriter, Compute};
//!
//! # fn transform(input: &[u8]) -> classforge::Result<Vec<u8>> {
//! let reader = ClassReader::new(input)?;
//! let mut writer = ClassWriter::new(Compute::Nothing);
//! reader.accept(&mut writer, &[], false)?;
//! writer.to_bytes()
//! # }
//! ```

mod access_flags;
mod attributes;
mod bytevector;
mod constant_pool;
mod descriptors;
mod errors;
pub mod opcodes;
mod reader;
mod version;
mod visitor;
pub mod writer;

pub use access_flags::{
    ClassAccessFlags, FieldAccessFlags, InnerClassAccessFlags, MethodAccessFlags,
};
pub use attributes::Attribute;
pub use bytevector::ByteVector;
pub use constant_pool::{ClassHierarchy, ConstantPool, ConstantValue, ObjectHierarchy};
pub use errors::{Error, Result};
pub use reader::ClassReader;
pub use version::Version;
pub use visitor::{ClassVisitor, FieldVisitor, MethodVisitor};
pub use writer::{ClassWriter, Compute, Label, LabelGenerator, MethodWriter};
