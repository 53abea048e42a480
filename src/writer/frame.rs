//! The stack map frame engine.
//!
//! Frames are computed in a two step process: while each instruction is
//! visited, the state of the frame at the end of the current basic block is
//! updated by simulating the action of the instruction on the previous state
//! of this so called "output frame". At `visit_maxs` time, a fix point
//! algorithm computes the "input frame" of each basic block from the input
//! frame of the first block (known from the method descriptor) and the
//! previously computed relative output frames.
//!
//! All frame types are packed integers, `DIM | KIND | VALUE` (4, 4 and 24
//! bits). `DIM` is a signed array-dimension adjustment. `KIND` is `BASE`,
//! `LOCAL` or `STACK`: `LOCAL` and `STACK` values are positions in the input
//! frame of the enclosing block, which is not yet known while the output
//! frame is built, and `BASE` values are self-contained (with `OBJECT` and
//! `UNINITIALIZED` holding an index into the pool's type table). The packing
//! keeps the fix-point inner loop free of allocation and makes equality and
//! merging O(1).
//!
//! `LONG` and `DOUBLE` always occupy two slots (the second being `TOP`), in
//! the locals as well as on the stack; input frames only ever contain `BASE`
//! types of non-negative dimension.

use crate::constant_pool::{ClassHierarchy, ConstantPool, ConstantValue};
use crate::errors::Result;
use crate::opcodes::*;
use crate::writer::label::LabelInfo;

/// Mask to get the dimension of a frame type (a signed value, -8 to 7)
pub(crate) const DIM: i32 = 0xF000_0000u32 as i32;

/// Constant to be added to a type to get a type with one more dimension
pub(crate) const ARRAY_OF: i32 = 0x1000_0000;

/// Constant to be added to a type to get a type with one less dimension
pub(crate) const ELEMENT_OF: i32 = 0xF000_0000u32 as i32;

/// Mask to get the kind of a frame type
pub(crate) const KIND: i32 = 0xF00_0000;

/// Mask to get the value of a frame type
pub(crate) const VALUE: i32 = 0xFF_FFFF;

/// Mask to get the kind of base types
pub(crate) const BASE_KIND: i32 = 0xFF0_0000;

/// Mask to get the value of base types
pub(crate) const BASE_VALUE: i32 = 0xF_FFFF;

/// Kind of the types that are not relative to an input frame
pub(crate) const BASE: i32 = 0x100_0000;

/// Base reference types; the value is an index into the pool's type table
pub(crate) const OBJECT: i32 = BASE | 0x70_0000;

/// Uninitialized base types; the value indexes a type table entry carrying
/// both the class and the offset of the allocating `new`
pub(crate) const UNINITIALIZED: i32 = BASE | 0x80_0000;

/// Types relative to the input locals; the value is a local index
const LOCAL: i32 = 0x200_0000;

/// Types relative to the input stack; the value counts from the stack top
const STACK: i32 = 0x300_0000;

// Base types. The low bits of the primitive ones double as their
// verification_type_info tags.
pub(crate) const TOP: i32 = BASE;
pub(crate) const INTEGER: i32 = BASE | 1;
pub(crate) const FLOAT: i32 = BASE | 2;
pub(crate) const DOUBLE: i32 = BASE | 3;
pub(crate) const LONG: i32 = BASE | 4;
pub(crate) const NULL: i32 = BASE | 5;
pub(crate) const UNINITIALIZED_THIS: i32 = BASE | 6;
pub(crate) const BOOLEAN: i32 = BASE | 9;
pub(crate) const BYTE: i32 = BASE | 10;
pub(crate) const CHAR: i32 = BASE | 11;
pub(crate) const SHORT: i32 = BASE | 12;

/// Constant pool operand of the instruction being simulated
pub(crate) enum Operand<'a> {
    None,
    /// Field or method reference: its descriptor, and whether it names an
    /// instance initializer
    Member { descriptor: &'a str, is_init: bool },
    /// Internal name (or array descriptor) of a type instruction operand
    TypeName(&'a str),
    Const(&'a ConstantValue),
}

/// Packed encoding of a field or method-return type descriptor.
///
/// Returns 0 for `V`. Method descriptors are accepted; their return type is
/// encoded.
pub(crate) fn type_from_desc(pool: &mut ConstantPool, desc: &str) -> Result<i32> {
    let bytes = desc.as_bytes();
    let index = if bytes.first() == Some(&b'(') {
        desc.find(')').map(|i| i + 1).unwrap_or(0)
    } else {
        0
    };
    let t = match bytes.get(index) {
        Some(b'V') => 0,
        Some(b'Z') | Some(b'C') | Some(b'B') | Some(b'S') | Some(b'I') => INTEGER,
        Some(b'F') => FLOAT,
        Some(b'J') => LONG,
        Some(b'D') => DOUBLE,
        Some(b'L') => {
            // stores the internal name, not the descriptor
            let name = &desc[index + 1..desc.len() - 1];
            OBJECT | pool.add_type(name)? as i32
        }
        _ => {
            // extracts the dimensions and the element type
            let mut dims = index;
            while bytes.get(dims) == Some(&b'[') {
                dims += 1;
            }
            let data = match bytes.get(dims) {
                Some(b'Z') => BOOLEAN,
                Some(b'C') => CHAR,
                Some(b'B') => BYTE,
                Some(b'S') => SHORT,
                Some(b'I') => INTEGER,
                Some(b'F') => FLOAT,
                Some(b'J') => LONG,
                Some(b'D') => DOUBLE,
                _ => {
                    let name = &desc[dims + 1..desc.len() - 1];
                    OBJECT | pool.add_type(name)? as i32
                }
            };
            (((dims - index) as i32) << 28) | data
        }
    };
    Ok(t)
}

impl LabelInfo {
    /// Output frame local at the given index, which is `LOCAL | index` while
    /// the local has not been assigned in this block
    fn get(&mut self, local: usize) -> i32 {
        if local >= self.output_locals.len() {
            LOCAL | local as i32
        } else {
            let mut t = self.output_locals[local];
            if t == 0 {
                t = LOCAL | local as i32;
                self.output_locals[local] = t;
            }
            t
        }
    }

    fn set(&mut self, local: usize, t: i32) {
        if self.output_locals.is_empty() {
            self.output_locals.reserve(10);
        }
        if local >= self.output_locals.len() {
            self.output_locals.resize(local + 1, 0);
        }
        self.output_locals[local] = t;
    }

    fn push(&mut self, t: i32) {
        if self.output_stack.is_empty() {
            self.output_stack.reserve(10);
        }
        let top = self.output_stack_top as usize;
        if top >= self.output_stack.len() {
            self.output_stack.resize(top + 1, 0);
        }
        self.output_stack[top] = t;
        self.output_stack_top += 1;
        // track the maximum height the output stack reaches
        let height = self.input_stack_top + self.output_stack_top;
        if height > self.output_stack_max {
            self.output_stack_max = height;
        }
    }

    /// Push the packed type of a descriptor (a method descriptor pushes its
    /// return type; `V` pushes nothing)
    fn push_desc(&mut self, pool: &mut ConstantPool, desc: &str) -> Result<()> {
        let t = type_from_desc(pool, desc)?;
        if t != 0 {
            self.push(t);
            if t == LONG || t == DOUBLE {
                self.push(TOP);
            }
        }
        Ok(())
    }

    fn pop(&mut self) -> i32 {
        if self.output_stack_top > 0 {
            self.output_stack_top -= 1;
            self.output_stack[self.output_stack_top as usize]
        } else {
            // the output stack is empty, so this pops from the input stack
            self.input_stack_top -= 1;
            STACK | -self.input_stack_top
        }
    }

    fn pop_n(&mut self, elements: i32) {
        if self.output_stack_top >= elements {
            self.output_stack_top -= elements;
        } else {
            self.input_stack_top -= elements - self.output_stack_top;
            self.output_stack_top = 0;
        }
    }

    /// Pop the types of a descriptor (a method descriptor pops its argument
    /// types)
    fn pop_desc(&mut self, desc: &str) {
        match desc.as_bytes().first() {
            Some(b'(') => {
                let args = crate::descriptors::argument_and_return_sizes(desc)
                    .map(|(args, _)| args)
                    .unwrap_or(0);
                self.pop_n(args);
            }
            Some(b'J') | Some(b'D') => self.pop_n(2),
            _ => self.pop_n(1),
        }
    }

    /// Record a type on which a constructor is invoked in this block
    fn add_initialization(&mut self, t: i32) {
        if self.initializations.is_empty() {
            self.initializations.reserve(10);
        }
        self.initializations.push(t);
    }

    /// Initialize the input frame of the first basic block from the method
    /// descriptor.
    pub(crate) fn init_input_frame(
        &mut self,
        pool: &mut ConstantPool,
        is_static: bool,
        is_constructor: bool,
        this_name: &str,
        descriptor: &str,
        max_locals: usize,
    ) -> Result<()> {
        let mut locals = vec![TOP; max_locals];
        let mut i = 0;
        if !is_static {
            locals[i] = if is_constructor {
                UNINITIALIZED_THIS
            } else {
                OBJECT | pool.add_type(this_name)? as i32
            };
            i += 1;
        }
        for arg in crate::descriptors::argument_types(descriptor)? {
            let t = type_from_desc(pool, arg)?;
            locals[i] = t;
            i += 1;
            if t == LONG || t == DOUBLE {
                i += 1; // the second slot keeps its TOP
            }
        }
        self.input_locals = Some(locals);
        self.input_stack = Some(vec![]);
        Ok(())
    }

    /// Simulate the action of an instruction on the output frame.
    ///
    /// `arg` is the integer operand of the instruction when it has one: a
    /// local variable index, a `newarray` type code, a `multianewarray`
    /// dimension count, or (for `new`) the bytecode offset of the
    /// instruction itself.
    pub(crate) fn execute(
        &mut self,
        opcode: u8,
        arg: i32,
        operand: Operand<'_>,
        pool: &mut ConstantPool,
    ) -> Result<()> {
        match opcode {
            NOP | INEG | LNEG | FNEG | DNEG | I2B | I2C | I2S | GOTO | RETURN => {}
            ACONST_NULL => self.push(NULL),
            ICONST_M1 | ICONST_0 | ICONST_1 | ICONST_2 | ICONST_3 | ICONST_4 | ICONST_5
            | BIPUSH | SIPUSH => self.push(INTEGER),
            LCONST_0 | LCONST_1 => {
                self.push(LONG);
                self.push(TOP);
            }
            FCONST_0 | FCONST_1 | FCONST_2 => self.push(FLOAT),
            DCONST_0 | DCONST_1 => {
                self.push(DOUBLE);
                self.push(TOP);
            }
            LDC => match operand {
                Operand::Const(ConstantValue::Integer(_)) => self.push(INTEGER),
                Operand::Const(ConstantValue::Float(_)) => self.push(FLOAT),
                Operand::Const(ConstantValue::Long(_)) => {
                    self.push(LONG);
                    self.push(TOP);
                }
                Operand::Const(ConstantValue::Double(_)) => {
                    self.push(DOUBLE);
                    self.push(TOP);
                }
                Operand::Const(ConstantValue::String(_)) => {
                    self.push(OBJECT | pool.add_type("java/lang/String")? as i32)
                }
                Operand::Const(ConstantValue::Class(_)) => {
                    self.push(OBJECT | pool.add_type("java/lang/Class")? as i32)
                }
                _ => {}
            },
            ILOAD | FLOAD | ALOAD => {
                let t = self.get(arg as usize);
                self.push(t);
            }
            LLOAD | DLOAD => {
                let t = self.get(arg as usize);
                self.push(t);
                self.push(TOP);
            }
            IALOAD | BALOAD | CALOAD | SALOAD => {
                self.pop_n(2);
                self.push(INTEGER);
            }
            LALOAD | D2L => {
                self.pop_n(2);
                self.push(LONG);
                self.push(TOP);
            }
            FALOAD => {
                self.pop_n(2);
                self.push(FLOAT);
            }
            DALOAD | L2D => {
                self.pop_n(2);
                self.push(DOUBLE);
                self.push(TOP);
            }
            AALOAD => {
                self.pop_n(1);
                let t = self.pop();
                self.push(ELEMENT_OF.wrapping_add(t));
            }
            ISTORE | FSTORE | ASTORE => {
                let t = self.pop();
                self.set(arg as usize, t);
                self.clobber_preceding_wide(arg);
            }
            LSTORE | DSTORE => {
                self.pop_n(1);
                let t = self.pop();
                self.set(arg as usize, t);
                self.set(arg as usize + 1, TOP);
                self.clobber_preceding_wide(arg);
            }
            IASTORE | BASTORE | CASTORE | SASTORE | FASTORE | AASTORE => self.pop_n(3),
            LASTORE | DASTORE => self.pop_n(4),
            POP | IFEQ | IFNE | IFLT | IFGE | IFGT | IFLE | IRETURN | FRETURN | ARETURN
            | TABLESWITCH | LOOKUPSWITCH | ATHROW | MONITORENTER | MONITOREXIT | IFNULL
            | IFNONNULL => self.pop_n(1),
            POP2 | IF_ICMPEQ | IF_ICMPNE | IF_ICMPLT | IF_ICMPGE | IF_ICMPGT | IF_ICMPLE
            | IF_ACMPEQ | IF_ACMPNE | LRETURN | DRETURN => self.pop_n(2),
            DUP => {
                let t1 = self.pop();
                self.push(t1);
                self.push(t1);
            }
            DUP_X1 => {
                let t1 = self.pop();
                let t2 = self.pop();
                self.push(t1);
                self.push(t2);
                self.push(t1);
            }
            DUP_X2 => {
                let t1 = self.pop();
                let t2 = self.pop();
                let t3 = self.pop();
                self.push(t1);
                self.push(t3);
                self.push(t2);
                self.push(t1);
            }
            DUP2 => {
                let t1 = self.pop();
                let t2 = self.pop();
                self.push(t2);
                self.push(t1);
                self.push(t2);
                self.push(t1);
            }
            DUP2_X1 => {
                let t1 = self.pop();
                let t2 = self.pop();
                let t3 = self.pop();
                self.push(t2);
                self.push(t1);
                self.push(t3);
                self.push(t2);
                self.push(t1);
            }
            DUP2_X2 => {
                let t1 = self.pop();
                let t2 = self.pop();
                let t3 = self.pop();
                let t4 = self.pop();
                self.push(t2);
                self.push(t1);
                self.push(t4);
                self.push(t3);
                self.push(t2);
                self.push(t1);
            }
            SWAP => {
                let t1 = self.pop();
                let t2 = self.pop();
                self.push(t1);
                self.push(t2);
            }
            IADD | ISUB | IMUL | IDIV | IREM | IAND | IOR | IXOR | ISHL | ISHR | IUSHR | L2I
            | D2I | FCMPL | FCMPG => {
                self.pop_n(2);
                self.push(INTEGER);
            }
            LADD | LSUB | LMUL | LDIV | LREM | LAND | LOR | LXOR => {
                self.pop_n(4);
                self.push(LONG);
                self.push(TOP);
            }
            FADD | FSUB | FMUL | FDIV | FREM | L2F | D2F => {
                self.pop_n(2);
                self.push(FLOAT);
            }
            DADD | DSUB | DMUL | DDIV | DREM => {
                self.pop_n(4);
                self.push(DOUBLE);
                self.push(TOP);
            }
            LSHL | LSHR | LUSHR => {
                self.pop_n(3);
                self.push(LONG);
                self.push(TOP);
            }
            IINC => self.set(arg as usize, INTEGER),
            I2L | F2L => {
                self.pop_n(1);
                self.push(LONG);
                self.push(TOP);
            }
            I2F => {
                self.pop_n(1);
                self.push(FLOAT);
            }
            I2D | F2D => {
                self.pop_n(1);
                self.push(DOUBLE);
                self.push(TOP);
            }
            F2I | ARRAYLENGTH | INSTANCEOF => {
                self.pop_n(1);
                self.push(INTEGER);
            }
            LCMP | DCMPL | DCMPG => {
                self.pop_n(4);
                self.push(INTEGER);
            }
            GETSTATIC => {
                if let Operand::Member { descriptor, .. } = operand {
                    self.push_desc(pool, descriptor)?;
                }
            }
            PUTSTATIC => {
                if let Operand::Member { descriptor, .. } = operand {
                    self.pop_desc(descriptor);
                }
            }
            GETFIELD => {
                if let Operand::Member { descriptor, .. } = operand {
                    self.pop_n(1);
                    self.push_desc(pool, descriptor)?;
                }
            }
            PUTFIELD => {
                if let Operand::Member { descriptor, .. } = operand {
                    self.pop_desc(descriptor);
                    self.pop();
                }
            }
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
                if let Operand::Member {
                    descriptor,
                    is_init,
                } = operand
                {
                    self.pop_desc(descriptor);
                    if opcode != INVOKESTATIC {
                        let t1 = self.pop();
                        if opcode == INVOKESPECIAL && is_init {
                            self.add_initialization(t1);
                        }
                    }
                    self.push_desc(pool, descriptor)?;
                }
            }
            NEW => {
                if let Operand::TypeName(name) = operand {
                    let idx = pool.add_uninitialized_type(name, arg as u32)?;
                    self.push(UNINITIALIZED | idx as i32);
                }
            }
            NEWARRAY => {
                self.pop();
                let element = match arg {
                    T_BOOLEAN => BOOLEAN,
                    T_CHAR => CHAR,
                    T_BYTE => BYTE,
                    T_SHORT => SHORT,
                    T_INT => INTEGER,
                    T_FLOAT => FLOAT,
                    T_DOUBLE => DOUBLE,
                    _ => LONG,
                };
                self.push(ARRAY_OF | element);
            }
            ANEWARRAY => {
                if let Operand::TypeName(name) = operand {
                    self.pop();
                    if name.starts_with('[') {
                        let desc = format!("[{}", name);
                        self.push_desc(pool, &desc)?;
                    } else {
                        self.push(ARRAY_OF | OBJECT | pool.add_type(name)? as i32);
                    }
                }
            }
            CHECKCAST => {
                if let Operand::TypeName(name) = operand {
                    self.pop();
                    if name.starts_with('[') {
                        self.push_desc(pool, name)?;
                    } else {
                        self.push(OBJECT | pool.add_type(name)? as i32);
                    }
                }
            }
            MULTIANEWARRAY => {
                if let Operand::TypeName(descriptor) = operand {
                    self.pop_n(arg);
                    self.push_desc(pool, descriptor)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Storing into local `arg` invalidates the second slot of a long or
    /// double sitting at `arg - 1`.
    fn clobber_preceding_wide(&mut self, arg: i32) {
        if arg > 0 {
            let t = self.get(arg as usize - 1);
            // if t is of kind STACK or LOCAL we cannot know its size
            if t == LONG || t == DOUBLE {
                self.set(arg as usize - 1, TOP);
            }
        }
    }
}

/// Output frame entries of a block, resolved against its (now known) input
/// frame so they can be merged into a successor.
struct ResolvedSource {
    input_locals: Vec<i32>,
    input_stack: Vec<i32>,
    input_stack_top: i32,
    output_locals: Vec<i32>,
    output_stack: Vec<i32>,
    output_stack_top: i32,
    initializations: Vec<i32>,
}

impl ResolvedSource {
    fn of(label: &LabelInfo) -> ResolvedSource {
        ResolvedSource {
            input_locals: label.input_locals.clone().unwrap_or_default(),
            input_stack: label.input_stack.clone().unwrap_or_default(),
            input_stack_top: label.input_stack_top,
            output_locals: label.output_locals.clone(),
            output_stack: label.output_stack.clone(),
            output_stack_top: label.output_stack_top,
            initializations: label.initializations.clone(),
        }
    }

    /// Resolve a LOCAL/STACK-relative type against the input frame. A
    /// position outside the frame only happens for bytecode that would
    /// underflow at runtime; it degrades to TOP rather than a panic.
    fn resolve(&self, s: i32) -> i32 {
        let dim = s & DIM;
        match s & KIND {
            LOCAL => match self.input_locals.get((s & VALUE) as usize) {
                Some(&t) => dim.wrapping_add(t),
                None => TOP,
            },
            STACK => {
                let depth = (s & VALUE) as usize;
                match self
                    .input_stack
                    .len()
                    .checked_sub(depth)
                    .and_then(|i| self.input_stack.get(i))
                {
                    Some(&t) => dim.wrapping_add(t),
                    None => TOP,
                }
            }
            _ => s,
        }
    }

    fn resolve_initialization(
        &self,
        pool: &mut ConstantPool,
        this_name: &str,
        t: i32,
    ) -> Result<i32> {
        let s = if t == UNINITIALIZED_THIS {
            OBJECT | pool.add_type(this_name)? as i32
        } else if t & (DIM | BASE_KIND) == UNINITIALIZED {
            let name = pool.type_name((t & BASE_VALUE) as u32).to_string();
            OBJECT | pool.add_type(&name)? as i32
        } else {
            return Ok(t);
        };
        for &init in &self.initializations {
            let u = self.resolve(init);
            if t == u {
                return Ok(s);
            }
        }
        Ok(t)
    }
}

/// Merge the input frame of `to` with the (resolved) output frame of `from`.
///
/// `edge_info` is 0 for a normal edge, or the packed exception type for a
/// handler edge (in which case the target's stack becomes exactly that
/// exception and only the locals flow). Returns whether the input frame of
/// `to` changed.
pub(crate) fn merge_block_frames(
    labels: &mut [LabelInfo],
    pool: &mut ConstantPool,
    hierarchy: &dyn ClassHierarchy,
    this_name: &str,
    from: usize,
    to: usize,
    edge_info: i32,
) -> Result<bool> {
    let source = ResolvedSource::of(&labels[from]);
    let target = &mut labels[to];
    let mut changed = false;

    let n_local = source.input_locals.len();
    if target.input_locals.is_none() {
        target.input_locals = Some(vec![0; n_local]);
        changed = true;
    }

    // merge the locals, as left by the end of the source block
    for i in 0..n_local {
        let mut t = match source.output_locals.get(i) {
            Some(&s) if s != 0 => source.resolve(s),
            _ => source.input_locals[i],
        };
        if !source.initializations.is_empty() {
            t = source.resolve_initialization(pool, this_name, t)?;
        }
        changed |= merge_type(
            pool,
            hierarchy,
            t,
            target.input_locals.as_mut().unwrap(),
            i,
        )?;
    }

    if edge_info > 0 {
        // handler edge: the locals at the start of the range must flow too,
        // and the stack holds exactly the caught exception
        for i in 0..n_local {
            let t = source.input_locals[i];
            changed |= merge_type(
                pool,
                hierarchy,
                t,
                target.input_locals.as_mut().unwrap(),
                i,
            )?;
        }
        if target.input_stack.is_none() {
            target.input_stack = Some(vec![0; 1]);
            changed = true;
        }
        changed |= merge_type(
            pool,
            hierarchy,
            edge_info,
            target.input_stack.as_mut().unwrap(),
            0,
        )?;
        return Ok(changed);
    }

    // merge the stack: the surviving part of the input stack, then the
    // output stack
    let n_input_stack = (source.input_stack.len() as i32 + source.input_stack_top).max(0) as usize;
    if target.input_stack.is_none() {
        target.input_stack = Some(vec![0; n_input_stack + source.output_stack_top as usize]);
        changed = true;
    }

    for i in 0..n_input_stack {
        let mut t = source.input_stack[i];
        if !source.initializations.is_empty() {
            t = source.resolve_initialization(pool, this_name, t)?;
        }
        changed |= merge_type(pool, hierarchy, t, target.input_stack.as_mut().unwrap(), i)?;
    }
    for i in 0..source.output_stack_top as usize {
        let mut t = source.resolve(source.output_stack[i]);
        if !source.initializations.is_empty() {
            t = source.resolve_initialization(pool, this_name, t)?;
        }
        changed |= merge_type(
            pool,
            hierarchy,
            t,
            target.input_stack.as_mut().unwrap(),
            n_input_stack + i,
        )?;
    }
    Ok(changed)
}

/// Merge the type at `types[index]` with `t`, widening towards TOP. Returns
/// whether the slot changed.
fn merge_type(
    pool: &mut ConstantPool,
    hierarchy: &dyn ClassHierarchy,
    mut t: i32,
    types: &mut [i32],
    index: usize,
) -> Result<bool> {
    let u = types[index];
    if u == t {
        // if the types are equal, merge(u,t)=u, so there is no change
        return Ok(false);
    }
    if t == BOOLEAN || t == BYTE || t == CHAR || t == SHORT {
        t = INTEGER;
    } else if (t & !DIM) == NULL {
        t = NULL;
    }
    if u == 0 {
        // if types[index] has never been assigned, merge(u,t)=t
        types[index] = t;
        return Ok(true);
    }
    let v;
    if (u & BASE_KIND) == OBJECT || (u & DIM) != 0 {
        // u is a reference type of any dimension
        if t == NULL {
            // NULL is the bottom of the reference lattice
            return Ok(false);
        } else if (t & (DIM | BASE_KIND)) == (u & (DIM | BASE_KIND)) {
            if (u & BASE_KIND) == OBJECT {
                // same dimension references merge to their common superclass
                let merged = pool.merged_type(
                    (t & BASE_VALUE) as u32,
                    (u & BASE_VALUE) as u32,
                    hierarchy,
                )?;
                v = (t & DIM) | OBJECT | merged as i32;
            } else {
                v = TOP;
            }
        } else {
            v = TOP;
        }
    } else if u == NULL {
        // NULL merges up to any reference type
        v = if (t & BASE_KIND) == OBJECT || (t & DIM) != 0 {
            t
        } else {
            TOP
        };
    } else {
        v = TOP;
    }
    if u != v {
        types[index] = v;
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant_pool::ObjectHierarchy;

    fn fresh_block() -> LabelInfo {
        LabelInfo::new(0, None)
    }

    #[test]
    fn constants_use_the_documented_packing() {
        assert_eq!(TOP, 0x0100_0000);
        assert_eq!(INTEGER, 0x0100_0001);
        assert_eq!(OBJECT & KIND, BASE);
        assert_eq!(ARRAY_OF.wrapping_add(ELEMENT_OF), 0);
    }

    #[test]
    fn loads_of_unseen_locals_are_input_relative() {
        let mut pool = ConstantPool::new();
        let mut block = fresh_block();
        block.execute(ALOAD, 3, Operand::None, &mut pool).unwrap();
        assert_eq!(block.output_stack[0], LOCAL | 3);
        assert_eq!(block.output_stack_top, 1);
    }

    #[test]
    fn pop_underflows_into_the_input_stack() {
        let mut pool = ConstantPool::new();
        let mut block = fresh_block();
        // iadd pops two ints that must come from the input stack
        block.execute(IADD, 0, Operand::None, &mut pool).unwrap();
        assert_eq!(block.input_stack_top, -2);
        assert_eq!(block.output_stack_top, 1);
        assert_eq!(block.output_stack[0], INTEGER);
    }

    #[test]
    fn aaload_drops_one_array_dimension() {
        let mut pool = ConstantPool::new();
        let mut block = fresh_block();
        let array = ARRAY_OF | OBJECT | pool.add_type("java/lang/String").unwrap() as i32;
        block.push(array);
        block.push(INTEGER);
        block.execute(AALOAD, 0, Operand::None, &mut pool).unwrap();
        assert_eq!(
            block.output_stack[0],
            OBJECT | pool.add_type("java/lang/String").unwrap() as i32
        );
    }

    #[test]
    fn new_records_the_allocation_offset() {
        let mut pool = ConstantPool::new();
        let mut block = fresh_block();
        block
            .execute(NEW, 10, Operand::TypeName("Foo"), &mut pool)
            .unwrap();
        block
            .execute(NEW, 25, Operand::TypeName("Foo"), &mut pool)
            .unwrap();
        let t1 = block.output_stack[0];
        let t2 = block.output_stack[1];
        assert_ne!(t1, t2);
        assert_eq!(t1 & (DIM | BASE_KIND), UNINITIALIZED);
        assert_eq!(pool.type_new_offset((t1 & BASE_VALUE) as u32), Some(10));
        assert_eq!(pool.type_new_offset((t2 & BASE_VALUE) as u32), Some(25));
    }

    #[test]
    fn merge_widens_small_ints_to_integer() {
        let mut pool = ConstantPool::new();
        let mut types = vec![0];
        let changed = merge_type(&mut pool, &ObjectHierarchy, BOOLEAN, &mut types, 0).unwrap();
        assert!(changed);
        assert_eq!(types[0], INTEGER);
    }

    #[test]
    fn merge_null_is_reference_bottom() {
        let mut pool = ConstantPool::new();
        let string = OBJECT | pool.add_type("java/lang/String").unwrap() as i32;

        let mut types = vec![string];
        assert!(!merge_type(&mut pool, &ObjectHierarchy, NULL, &mut types, 0).unwrap());
        assert_eq!(types[0], string);

        let mut types = vec![NULL];
        assert!(merge_type(&mut pool, &ObjectHierarchy, string, &mut types, 0).unwrap());
        assert_eq!(types[0], string);
    }

    #[test]
    fn merge_distinct_references_widen_to_common_superclass() {
        let mut pool = ConstantPool::new();
        let string = OBJECT | pool.add_type("java/lang/String").unwrap() as i32;
        let integer = OBJECT | pool.add_type("java/lang/Integer").unwrap() as i32;
        let object = OBJECT | pool.add_type("java/lang/Object").unwrap() as i32;

        let mut types = vec![string];
        assert!(merge_type(&mut pool, &ObjectHierarchy, integer, &mut types, 0).unwrap());
        assert_eq!(types[0], object);

        // merging is monotone: a further merge with either input is a no-op
        assert!(!merge_type(&mut pool, &ObjectHierarchy, string, &mut types, 0).unwrap());
        assert!(!merge_type(&mut pool, &ObjectHierarchy, integer, &mut types, 0).unwrap());
    }

    #[test]
    fn merge_incompatible_kinds_widen_to_top() {
        let mut pool = ConstantPool::new();
        let mut types = vec![INTEGER];
        assert!(merge_type(&mut pool, &ObjectHierarchy, FLOAT, &mut types, 0).unwrap());
        assert_eq!(types[0], TOP);
    }

    #[test]
    fn merge_is_commutative_on_references() {
        let mut pool = ConstantPool::new();
        let a = OBJECT | pool.add_type("A").unwrap() as i32;
        let b = OBJECT | pool.add_type("B").unwrap() as i32;

        let mut left = vec![a];
        merge_type(&mut pool, &ObjectHierarchy, b, &mut left, 0).unwrap();
        let mut right = vec![b];
        merge_type(&mut pool, &ObjectHierarchy, a, &mut right, 0).unwrap();
        assert_eq!(left[0], right[0]);
    }

    #[test]
    fn type_from_descriptors() {
        let mut pool = ConstantPool::new();
        assert_eq!(type_from_desc(&mut pool, "I").unwrap(), INTEGER);
        assert_eq!(type_from_desc(&mut pool, "Z").unwrap(), INTEGER);
        assert_eq!(type_from_desc(&mut pool, "J").unwrap(), LONG);
        assert_eq!(type_from_desc(&mut pool, "()V").unwrap(), 0);

        let string = type_from_desc(&mut pool, "Ljava/lang/String;").unwrap();
        assert_eq!(string & BASE_KIND, OBJECT & BASE_KIND);

        let int_array2 = type_from_desc(&mut pool, "[[I").unwrap();
        assert_eq!(int_array2 >> 28 & 0xF, 2);
        assert_eq!(int_array2 & !DIM, INTEGER);

        // boolean arrays keep their element type
        let bool_array = type_from_desc(&mut pool, "[Z").unwrap();
        assert_eq!(bool_array & !DIM, BOOLEAN);
    }
}
