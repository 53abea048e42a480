//! End-to-end checks of the emitter: concrete bytecode in, observable bytes
//! and computed maxima out. Where the exact encoding matters (switch
//! padding, widened branches, stack map frames) the tests search the
//! serialized class for the expected byte sequences.

use classforge::opcodes::*;
use classforge::{
    ClassAccessFlags, ClassReader, ClassVisitor, ClassWriter, Compute, Error, LabelGenerator,
    MethodAccessFlags, MethodVisitor, Version,
};

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Collects the method events the reader replays, for assertions on what a
/// written class parses back into.
#[derive(Default)]
struct Recorder {
    insns: Vec<u8>,
    maxs: Option<(u16, u16)>,
}

impl ClassVisitor for Recorder {
    fn visit_method(
        &mut self,
        _access: MethodAccessFlags,
        _name: &str,
        _descriptor: &str,
        _signature: Option<&str>,
        _exceptions: &[&str],
    ) -> classforge::Result<Option<&mut dyn MethodVisitor>> {
        Ok(Some(self))
    }
}

impl MethodVisitor for Recorder {
    fn visit_insn(&mut self, opcode: u8) -> classforge::Result<()> {
        self.insns.push(opcode);
        Ok(())
    }

    fn visit_jump_insn(
        &mut self,
        opcode: u8,
        _label: classforge::Label,
    ) -> classforge::Result<()> {
        self.insns.push(opcode);
        Ok(())
    }

    fn visit_var_insn(&mut self, opcode: u8, _var: u16) -> classforge::Result<()> {
        self.insns.push(opcode);
        Ok(())
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> classforge::Result<()> {
        self.maxs = Some((max_stack, max_locals));
        Ok(())
    }
}

fn new_class(compute: Compute) -> ClassWriter {
    let mut writer = ClassWriter::new(compute);
    writer
        .visit(
            Version::JAVA6,
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            "pkg/A",
            None,
            Some("java/lang/Object"),
            &[],
        )
        .unwrap();
    writer
}

fn read_back(bytes: &[u8]) -> Recorder {
    let mut recorder = Recorder::default();
    let reader = ClassReader::new(bytes).unwrap();
    reader.accept(&mut recorder, &[], false).unwrap();
    recorder
}

#[test]
fn iconst_ireturn_computes_trivial_maxima() {
    let mut writer = new_class(Compute::MaxStack);
    {
        let method = writer
            .visit_method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                "f",
                "()I",
                None,
                &[],
            )
            .unwrap()
            .unwrap();
        method.visit_insn(ICONST_1).unwrap();
        method.visit_insn(IRETURN).unwrap();
        method.visit_maxs(0, 0).unwrap();
        method.visit_end().unwrap();
    }
    writer.visit_end().unwrap();
    let bytes = writer.to_bytes().unwrap();

    // max_stack=1, max_locals=0, code_length=2, then the two instructions
    assert!(find(&bytes, &[0, 1, 0, 0, 0, 0, 0, 2, ICONST_1, IRETURN]).is_some());

    let recorder = read_back(&bytes);
    assert_eq!(recorder.maxs, Some((1, 0)));
    assert_eq!(recorder.insns, vec![ICONST_1, IRETURN]);
}

#[test]
fn constructor_frame_initializes_this() {
    let mut writer = new_class(Compute::Frames);
    {
        let mut labels = LabelGenerator::new();
        let target = labels.fresh_label();
        let ctor = writer
            .visit_method(MethodAccessFlags::PUBLIC, "<init>", "(I)V", None, &[])
            .unwrap()
            .unwrap();
        ctor.visit_var_insn(ALOAD, 0).unwrap();
        ctor.visit_method_insn(INVOKESPECIAL, "java/lang/Object", "<init>", "()V")
            .unwrap();
        ctor.visit_var_insn(ILOAD, 1).unwrap();
        ctor.visit_jump_insn(IFEQ, target).unwrap();
        ctor.visit_insn(RETURN).unwrap();
        ctor.visit_label(target).unwrap();
        ctor.visit_insn(RETURN).unwrap();
        ctor.visit_maxs(0, 0).unwrap();
        ctor.visit_end().unwrap();
    }
    writer.visit_end().unwrap();
    let bytes = writer.to_bytes().unwrap();

    let recorder = read_back(&bytes);
    assert_eq!(recorder.maxs, Some((1, 2)));

    // the branch target at offset 9 gets a full frame: `this` has become an
    // object type (tag 7), so it no longer matches the implicit initial
    // frame's uninitializedThis
    let frame = find(&bytes, &[255, 0, 9, 0, 2, 7]).expect("full frame entry");
    // the second local is still int (tag 1), and the stack is empty
    assert_eq!(bytes[frame + 8], 1);
    assert_eq!(&bytes[frame + 9..frame + 11], &[0, 0]);
    assert!(find(&bytes, b"StackMapTable").is_some());
}

#[test]
fn frame_computation_is_deterministic() {
    let build = || {
        let mut writer = new_class(Compute::Frames);
        {
            let mut labels = LabelGenerator::new();
            let target = labels.fresh_label();
            let method = writer
                .visit_method(
                    MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                    "f",
                    "(Z)I",
                    None,
                    &[],
                )
                .unwrap()
                .unwrap();
            method.visit_var_insn(ILOAD, 0).unwrap();
            method.visit_jump_insn(IFEQ, target).unwrap();
            method.visit_insn(ICONST_1).unwrap();
            method.visit_insn(IRETURN).unwrap();
            method.visit_label(target).unwrap();
            method.visit_insn(ICONST_0).unwrap();
            method.visit_insn(IRETURN).unwrap();
            method.visit_maxs(0, 0).unwrap();
            method.visit_end().unwrap();
        }
        writer.visit_end().unwrap();
        writer.to_bytes().unwrap()
    };
    let first = build();
    let second = build();
    assert_eq!(first, second);

    // branch target at offset 6 with unchanged locals: a one-byte same_frame
    // entry (attribute length 3, frame count 1, tag 6)
    assert!(find(&first, &[0, 0, 0, 3, 0, 1, 6]).is_some());
}

#[test]
fn oversized_forward_goto_becomes_goto_w() {
    let mut writer = new_class(Compute::MaxStack);
    {
        let mut labels = LabelGenerator::new();
        let far = labels.fresh_label();
        let method = writer
            .visit_method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                "f",
                "()V",
                None,
                &[],
            )
            .unwrap()
            .unwrap();
        method.visit_jump_insn(GOTO, far).unwrap();
        for _ in 0..40_000 {
            method.visit_insn(NOP).unwrap();
        }
        method.visit_label(far).unwrap();
        method.visit_insn(RETURN).unwrap();
        method.visit_maxs(0, 0).unwrap();
        method.visit_end().unwrap();
    }
    writer.visit_end().unwrap();
    let bytes = writer.to_bytes().unwrap();

    // code_length = 40006, then goto_w with offset 40005 (the label shifted
    // by the two bytes the widening inserted)
    let code = find(&bytes, &[0, 0, 0x9C, 0x46, GOTO_W, 0, 0, 0x9C, 0x45])
        .expect("widened goto") + 4;
    let code = &bytes[code..code + 40006];
    assert_eq!(code[40005], RETURN);
    assert!(
        code.iter().all(|&b| !(202..=219).contains(&b)),
        "no pseudo-opcodes may survive the resize pass"
    );

    let recorder = read_back(&bytes);
    assert_eq!(recorder.maxs, Some((0, 0)));
    // goto_w parses back as a plain goto
    assert_eq!(recorder.insns[0], GOTO);
}

#[test]
fn oversized_conditional_is_inverted_around_a_goto_w() {
    let mut writer = new_class(Compute::MaxStack);
    {
        let mut labels = LabelGenerator::new();
        let far = labels.fresh_label();
        let method = writer
            .visit_method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                "f",
                "(I)V",
                None,
                &[],
            )
            .unwrap()
            .unwrap();
        method.visit_var_insn(ILOAD, 0).unwrap();
        method.visit_jump_insn(IFEQ, far).unwrap();
        method.visit_insn(RETURN).unwrap();
        for _ in 0..40_000 {
            method.visit_insn(NOP).unwrap();
        }
        method.visit_label(far).unwrap();
        method.visit_insn(RETURN).unwrap();
        method.visit_maxs(0, 0).unwrap();
        method.visit_end().unwrap();
    }
    writer.visit_end().unwrap();
    let bytes = writer.to_bytes().unwrap();

    // the ifeq is rewritten to: ifne +8; goto_w <target>
    // new layout: iload_0 @0, ifne @1, goto_w @4, return @9, nops, return @40010
    assert!(
        find(&bytes, &[ILOAD_0_COMPACT, IFNE, 0, 8, GOTO_W, 0, 0, 0x9C, 0x46, RETURN]).is_some(),
        "conditional widening must invert the predicate over a goto_w"
    );

    let recorder = read_back(&bytes);
    assert_eq!(recorder.maxs, Some((1, 1)));
}

/// `iload_0` as actually encoded
const ILOAD_0_COMPACT: u8 = 26;

#[test]
fn tableswitch_is_padded_and_offsets_are_instruction_relative() {
    let mut writer = new_class(Compute::Nothing);
    {
        let mut labels = LabelGenerator::new();
        let target = labels.fresh_label();
        let method = writer
            .visit_method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                "f",
                "()V",
                None,
                &[],
            )
            .unwrap()
            .unwrap();
        method.visit_insn(ICONST_0).unwrap();
        method
            .visit_table_switch_insn(0, 0, target, &[target])
            .unwrap();
        method.visit_label(target).unwrap();
        method.visit_insn(RETURN).unwrap();
        method.visit_maxs(1, 0).unwrap();
        method.visit_end().unwrap();
    }
    writer.visit_end().unwrap();
    let bytes = writer.to_bytes().unwrap();

    // the tableswitch sits at offset 1, so two padding bytes align its
    // payload; both offsets are relative to the opcode (19), not the payload
    let expected = [
        0, 0, 0, 21, // code_length
        ICONST_0,
        TABLESWITCH,
        0, 0, // padding
        0, 0, 0, 19, // default
        0, 0, 0, 0, // low
        0, 0, 0, 0, // high
        0, 0, 0, 19, // case 0
        RETURN,
    ];
    assert!(find(&bytes, &expected).is_some());

    // padding survives a roundtrip byte for byte
    let reader = ClassReader::new(&bytes).unwrap();
    let mut rewriter = ClassWriter::new(Compute::Nothing);
    reader.accept(&mut rewriter, &[], false).unwrap();
    assert_eq!(bytes, rewriter.to_bytes().unwrap());
}

#[test]
fn jsr_and_ret_are_rejected_when_computing_frames() {
    let mut writer = new_class(Compute::Frames);
    let mut labels = LabelGenerator::new();
    let target = labels.fresh_label();
    let method = writer
        .visit_method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            "f",
            "()V",
            None,
            &[],
        )
        .unwrap()
        .unwrap();
    assert!(matches!(
        method.visit_jump_insn(JSR, target),
        Err(Error::UnsupportedConstruct { construct: "jsr", .. })
    ));
    assert!(matches!(
        method.visit_var_insn(RET, 0),
        Err(Error::UnsupportedConstruct { construct: "ret", .. })
    ));
}

#[test]
fn jsr_target_stack_accounts_for_the_return_address() {
    let mut writer = new_class(Compute::MaxStack);
    {
        let mut labels = LabelGenerator::new();
        let subroutine = labels.fresh_label();
        let method = writer
            .visit_method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                "f",
                "()V",
                None,
                &[],
            )
            .unwrap()
            .unwrap();
        method.visit_jump_insn(JSR, subroutine).unwrap();
        method.visit_insn(RETURN).unwrap();
        method.visit_label(subroutine).unwrap();
        method.visit_var_insn(ASTORE, 0).unwrap();
        method.visit_var_insn(RET, 0).unwrap();
        method.visit_maxs(0, 0).unwrap();
        method.visit_end().unwrap();
    }
    writer.visit_end().unwrap();
    let bytes = writer.to_bytes().unwrap();

    let recorder = read_back(&bytes);
    assert_eq!(recorder.maxs, Some((1, 1)));
}

#[test]
fn handler_blocks_start_with_one_stack_slot() {
    let mut writer = new_class(Compute::MaxStack);
    {
        let mut labels = LabelGenerator::new();
        let start = labels.fresh_label();
        let end = labels.fresh_label();
        let handler = labels.fresh_label();
        let method = writer
            .visit_method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                "f",
                "()V",
                None,
                &[],
            )
            .unwrap()
            .unwrap();
        method.visit_label(start).unwrap();
        method.visit_insn(NOP).unwrap();
        method.visit_label(end).unwrap();
        method.visit_insn(RETURN).unwrap();
        method.visit_label(handler).unwrap();
        method.visit_insn(ATHROW).unwrap();
        method
            .visit_try_catch_block(start, end, handler, None)
            .unwrap();
        method.visit_maxs(0, 0).unwrap();
        method.visit_end().unwrap();
    }
    writer.visit_end().unwrap();
    let bytes = writer.to_bytes().unwrap();

    // the caught exception is the handler's whole stack
    let recorder = read_back(&bytes);
    assert_eq!(recorder.maxs, Some((1, 0)));
}

#[test]
fn unresolved_label_is_a_structured_error() {
    let mut writer = new_class(Compute::Nothing);
    let mut labels = LabelGenerator::new();
    let never_placed = labels.fresh_label();
    let method = writer
        .visit_method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            "f",
            "()V",
            None,
            &[],
        )
        .unwrap()
        .unwrap();
    method.visit_jump_insn(GOTO, never_placed).unwrap();
    let err = method.visit_maxs(0, 0).unwrap_err();
    assert!(matches!(err, Error::UnresolvedLabel { .. }));
}
