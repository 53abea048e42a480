//! Reading a class and writing it back must reproduce it byte for byte, as
//! long as the writer is not asked to recompute anything. The input class is
//! itself produced by the writer, so the constant pool of both passes is
//! built in the same order and the comparison can be exact.

use classforge::opcodes::*;
use classforge::{
    Attribute, ClassAccessFlags, ClassReader, ClassVisitor, ClassWriter, Compute, ConstantValue,
    FieldAccessFlags, FieldVisitor, InnerClassAccessFlags, LabelGenerator, MethodAccessFlags,
    MethodVisitor, Version,
};

/// Assemble a class exercising fields, constant values, branches in both
/// directions, `ldc`, `iinc`, an exception handler, debug tables, inner
/// classes and an opaque attribute.
fn build_sample() -> classforge::Result<Vec<u8>> {
    let mut writer = ClassWriter::new(Compute::Nothing);
    writer.visit(
        Version::JAVA6,
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        "pkg/Sample",
        None,
        Some("java/lang/Object"),
        &["java/io/Serializable"],
    )?;
    writer.visit_source(Some("Sample.java"), None)?;
    writer.visit_inner_class(
        Some("pkg/Sample$Inner"),
        Some("pkg/Sample"),
        Some("Inner"),
        InnerClassAccessFlags::PUBLIC | InnerClassAccessFlags::STATIC,
    )?;

    let field = writer
        .visit_field(
            FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL,
            "count",
            "I",
            None,
            Some(&ConstantValue::Integer(42)),
        )?
        .unwrap();
    field.visit_end()?;

    // constructor, with a line number and a local variable entry
    {
        let mut labels = LabelGenerator::new();
        let start = labels.fresh_label();
        let end = labels.fresh_label();
        let ctor = writer
            .visit_method(MethodAccessFlags::PUBLIC, "<init>", "()V", None, &[])?
            .unwrap();
        ctor.visit_label(start)?;
        ctor.visit_var_insn(ALOAD, 0)?;
        ctor.visit_method_insn(INVOKESPECIAL, "java/lang/Object", "<init>", "()V")?;
        ctor.visit_insn(RETURN)?;
        ctor.visit_label(end)?;
        ctor.visit_line_number(7, start)?;
        ctor.visit_local_variable("this", "Lpkg/Sample;", None, start, end, 0)?;
        ctor.visit_maxs(1, 1)?;
        ctor.visit_end()?;
    }

    // a loop with a conditional exit, an ldc, and an exception handler
    {
        let mut labels = LabelGenerator::new();
        let loop_start = labels.fresh_label();
        let loop_exit = labels.fresh_label();
        let method = writer
            .visit_method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                "run",
                "(I)I",
                None,
                &["java/lang/Exception"],
            )?
            .unwrap();
        method.visit_label(loop_start)?;
        method.visit_var_insn(ILOAD, 0)?;
        method.visit_jump_insn(IFEQ, loop_exit)?;
        method.visit_ldc_insn(&ConstantValue::String("hello".to_string()))?;
        method.visit_insn(POP)?;
        method.visit_iinc_insn(0, -1)?;
        method.visit_jump_insn(GOTO, loop_start)?;
        method.visit_label(loop_exit)?;
        method.visit_var_insn(ILOAD, 0)?;
        method.visit_insn(IRETURN)?;
        method.visit_try_catch_block(loop_start, loop_exit, loop_exit, Some("java/lang/Exception"))?;
        method.visit_maxs(1, 1)?;
        method.visit_end()?;
    }

    writer.visit_attribute(Attribute::new("CustomThing", vec![1, 2, 3]))?;
    writer.visit_end()?;
    writer.to_bytes()
}

#[test]
fn write_read_write_is_identity() {
    let first = build_sample().unwrap();

    let reader = ClassReader::new(&first).unwrap();
    let mut writer = ClassWriter::new(Compute::Nothing);
    reader.accept(&mut writer, &["CustomThing"], false).unwrap();
    let second = writer.to_bytes().unwrap();

    assert_eq!(first, second);
}

#[test]
fn roundtrip_is_stable_over_iterations() {
    let mut bytes = build_sample().unwrap();
    for _ in 0..3 {
        let reader = ClassReader::new(&bytes).unwrap();
        let mut writer = ClassWriter::new(Compute::Nothing);
        reader.accept(&mut writer, &["CustomThing"], false).unwrap();
        let next = writer.to_bytes().unwrap();
        assert_eq!(bytes, next);
        bytes = next;
    }
}

#[test]
fn skipping_the_prototype_drops_the_attribute() {
    let first = build_sample().unwrap();

    let reader = ClassReader::new(&first).unwrap();
    let mut writer = ClassWriter::new(Compute::Nothing);
    // not registering "CustomThing" makes the reader skip it
    reader.accept(&mut writer, &[], false).unwrap();
    let second = writer.to_bytes().unwrap();

    assert!(second.len() < first.len());
    let needle = b"CustomThing";
    assert!(
        !second.windows(needle.len()).any(|w| w == needle),
        "unregistered attribute must not survive"
    );
}

#[test]
fn debug_info_can_be_skipped() {
    let first = build_sample().unwrap();

    let reader = ClassReader::new(&first).unwrap();
    let mut writer = ClassWriter::new(Compute::Nothing);
    reader.accept(&mut writer, &["CustomThing"], true).unwrap();
    let second = writer.to_bytes().unwrap();

    for needle in [&b"LineNumberTable"[..], &b"LocalVariableTable"[..], &b"SourceFile"[..]] {
        assert!(
            !second.windows(needle.len()).any(|w| w == needle),
            "debug attribute must not survive a skip_debug pass"
        );
    }
}
