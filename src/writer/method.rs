//! Per-method bytecode emission and the `visit_maxs` computations.
//!
//! The writer appends instructions to a growing byte vector, recording label
//! references through the forward-reference protocol, and maintains a basic
//! block graph on the side. At `visit_maxs` time it runs, in order: the
//! resize pass (if some branch overflowed into the pseudo-opcode band), then
//! either the cheap max-stack fix-point or the full frame fix-point plus
//! `StackMapTable` emission.

use crate::access_flags::MethodAccessFlags;
use crate::attributes::Attribute;
use crate::bytevector::ByteVector;
use crate::constant_pool::{ClassHierarchy, ConstantPool, ConstantValue};
use crate::descriptors;
use crate::errors::{Error, Result};
use crate::opcodes::{self, *};
use crate::visitor::MethodVisitor;
use crate::writer::frame::{self, Operand};
use crate::writer::label::{
    Edge, Label, LabelInfo, Slot, DEBUG, EXCEPTION_EDGE, IN_QUEUE, REACHED, RESIZED, STORE, TARGET,
};
use crate::writer::Compute;
use byteorder::{BigEndian, ByteOrder};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

struct Handler {
    start: Slot,
    end: Slot,
    handler: Slot,
    catch_index: u16,
    catch_name: Option<String>,
}

struct LocalVar {
    name_index: u16,
    desc_index: u16,
    signature_index: Option<u16>,
    start: Slot,
    end: Slot,
    index: u16,
}

pub struct MethodWriter {
    pool: Rc<RefCell<ConstantPool>>,
    hierarchy: Rc<dyn ClassHierarchy>,
    compute: Compute,
    /// Internal name of the class being written (owner of this method)
    this_name: String,

    access: MethodAccessFlags,
    name: String,
    descriptor: String,
    name_index: u16,
    descriptor_index: u16,
    signature_index: Option<u16>,
    exception_indexes: Vec<u16>,

    code: ByteVector,
    labels: Vec<LabelInfo>,
    label_slots: HashMap<u32, Slot>,
    edges: Vec<Edge>,

    first_block: Option<Slot>,
    last_chained_block: Option<Slot>,
    current_block: Option<Slot>,

    /// Relative stack height within the current block (cheap mode)
    stack_size: i32,
    /// Maximum relative height reached within the current block (cheap mode)
    max_stack_size: i32,

    max_stack: u16,
    max_locals: u32,

    handlers: Vec<Handler>,
    line_numbers: Vec<(Slot, u16)>,
    local_vars: Vec<LocalVar>,
    attributes: Vec<Attribute>,

    resize_needed: bool,
    stack_map: ByteVector,
    frame_count: u16,
    prev_frame_offset: i32,
    prev_frame_locals: Vec<i32>,
    finished: bool,
}

impl MethodWriter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        pool: Rc<RefCell<ConstantPool>>,
        hierarchy: Rc<dyn ClassHierarchy>,
        compute: Compute,
        this_name: String,
        access: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        exceptions: &[&str],
    ) -> Result<MethodWriter> {
        let (name_index, descriptor_index, signature_index, exception_indexes, arg_slots) = {
            let mut pool_ref = pool.borrow_mut();
            let name_index = pool_ref.add_utf8(name)?;
            let descriptor_index = pool_ref.add_utf8(descriptor)?;
            let signature_index = match signature {
                Some(signature) => Some(pool_ref.add_utf8(signature)?),
                None => None,
            };
            let exception_indexes = exceptions
                .iter()
                .map(|exception| pool_ref.add_class(exception))
                .collect::<Result<Vec<u16>>>()?;
            let (arg_slots, _) = descriptors::argument_and_return_sizes(descriptor)?;
            (
                name_index,
                descriptor_index,
                signature_index,
                exception_indexes,
                arg_slots,
            )
        };

        let implicit_this = if access.contains(MethodAccessFlags::STATIC) {
            0
        } else {
            1
        };
        let mut writer = MethodWriter {
            pool,
            hierarchy,
            compute,
            this_name,
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            name_index,
            descriptor_index,
            signature_index,
            exception_indexes,
            code: ByteVector::new(),
            labels: vec![],
            label_slots: HashMap::new(),
            edges: vec![],
            first_block: None,
            last_chained_block: None,
            current_block: None,
            stack_size: 0,
            max_stack_size: 0,
            max_stack: 0,
            max_locals: implicit_this + arg_slots as u32,
            handlers: vec![],
            line_numbers: vec![],
            local_vars: vec![],
            attributes: vec![],
            resize_needed: false,
            stack_map: ByteVector::new(),
            frame_count: 0,
            prev_frame_offset: -1,
            prev_frame_locals: vec![],
            finished: false,
        };

        if compute != Compute::Nothing {
            let entry = writer.internal_slot();
            writer.place_label_slot(entry)?;
        }
        Ok(writer)
    }

    pub(crate) fn has_code(&self) -> bool {
        !self.code.is_empty()
    }

    /// Offset of a placed label in the (final) method body
    pub fn label_offset(&self, label: Label) -> Result<u32> {
        match self.label_slots.get(&label.id) {
            Some(&slot) => self.labels[slot].offset(),
            None => Err(Error::IllegalState(format!(
                "label {:?} was never used with this writer",
                label
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Label arena
    // ------------------------------------------------------------------

    fn slot_of(&mut self, label: Label) -> Slot {
        if let Some(&slot) = self.label_slots.get(&label.id) {
            slot
        } else {
            let slot = self.labels.len();
            self.labels.push(LabelInfo::new(slot, Some(label)));
            self.label_slots.insert(label.id, slot);
            slot
        }
    }

    fn internal_slot(&mut self) -> Slot {
        let slot = self.labels.len();
        self.labels.push(LabelInfo::new(slot, None));
        slot
    }

    fn head(&self, slot: Slot) -> Slot {
        self.labels[slot].first
    }

    fn add_edge(&mut self, from: Slot, info: i32, to: Slot) {
        let edge = self.edges.len() as u32;
        self.edges.push(Edge {
            info,
            successor: to,
            next: self.labels[from].successors,
        });
        self.labels[from].successors = Some(edge);
    }

    fn mark_jump_target(&mut self, slot: Slot) {
        let head = self.head(slot);
        match self.compute {
            Compute::Frames => self.labels[head].status |= TARGET | STORE,
            Compute::MaxStack => self.labels[head].status |= TARGET,
            Compute::Nothing => {}
        }
    }

    fn close_cheap_block(&mut self, block: Slot) {
        self.labels[block].output_stack_top = self.stack_size;
        self.labels[block].output_stack_max = self.max_stack_size;
    }

    /// End the current basic block without a fall-through successor
    fn no_successor(&mut self) {
        if let Some(current) = self.current_block {
            if self.compute == Compute::MaxStack {
                self.close_cheap_block(current);
            }
            self.current_block = None;
        }
    }

    fn start_block(&mut self, slot: Slot) {
        self.current_block = Some(slot);
        match self.last_chained_block {
            Some(last) => self.labels[last].successor_chain = Some(slot),
            None => self.first_block = Some(slot),
        }
        self.last_chained_block = Some(slot);
    }

    fn place_label_slot(&mut self, slot: Slot) -> Result<()> {
        let position = self.code.len() as u32;
        let need_resize = self.labels[slot].resolve(&mut self.code, position)?;
        self.resize_needed |= need_resize;

        if self.labels[slot].status & DEBUG != 0 {
            return Ok(());
        }
        match self.compute {
            Compute::Frames => {
                if let Some(current) = self.current_block {
                    if self.labels[slot].position == self.labels[current].position {
                        // successive labels mark the same basic block
                        let bits = self.labels[slot].status & (TARGET | STORE);
                        self.labels[current].status |= bits;
                        self.labels[slot].first = current;
                        return Ok(());
                    }
                    self.add_edge(current, 0, slot);
                }
                self.start_block(slot);
            }
            Compute::MaxStack => {
                if let Some(current) = self.current_block {
                    if self.labels[slot].position == self.labels[current].position {
                        let bits = self.labels[slot].status & TARGET;
                        self.labels[current].status |= bits;
                        self.labels[slot].first = current;
                        return Ok(());
                    }
                    self.close_cheap_block(current);
                    self.add_edge(current, self.stack_size, slot);
                }
                self.start_block(slot);
                self.stack_size = 0;
                self.max_stack_size = 0;
            }
            Compute::Nothing => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dataflow bookkeeping helpers
    // ------------------------------------------------------------------

    fn adjust_stack(&mut self, delta: i32) {
        if self.compute == Compute::MaxStack && self.current_block.is_some() {
            self.stack_size += delta;
            if self.stack_size > self.max_stack_size {
                self.max_stack_size = self.stack_size;
            }
        }
    }

    fn execute_frame(&mut self, opcode: u8, arg: i32, operand: Operand<'_>) -> Result<()> {
        if self.compute != Compute::Frames {
            return Ok(());
        }
        if let Some(current) = self.current_block {
            let mut pool = self.pool.borrow_mut();
            self.labels[current].execute(opcode, arg, operand, &mut pool)?;
        }
        Ok(())
    }

    fn track_locals(&mut self, limit: u32) {
        if self.compute != Compute::Nothing && limit > self.max_locals {
            self.max_locals = limit;
        }
    }

    fn unsupported(&self, construct: &'static str) -> Error {
        Error::UnsupportedConstruct {
            method: self.name.clone(),
            construct,
        }
    }

    // ------------------------------------------------------------------
    // visit_maxs computations
    // ------------------------------------------------------------------

    fn check_pending_labels(&self) -> Result<()> {
        for info in &self.labels {
            if info.has_forward_refs() {
                return Err(Error::UnresolvedLabel {
                    method: self.name.clone(),
                    label: info.key.unwrap_or(Label { id: 0, debug: false }),
                });
            }
        }
        for handler in &self.handlers {
            for slot in [handler.start, handler.end, handler.handler] {
                if !self.labels[slot].is_resolved() {
                    return Err(Error::UnresolvedLabel {
                        method: self.name.clone(),
                        label: self.labels[slot].key.unwrap_or(Label { id: 0, debug: false }),
                    });
                }
            }
        }
        Ok(())
    }

    /// Add a `handler`-kind edge from every block covered by each exception
    /// range to its handler.
    fn add_handler_edges(&mut self) -> Result<()> {
        for i in 0..self.handlers.len() {
            let (start, end, handler_slot) = {
                let h = &self.handlers[i];
                (self.head(h.start), self.head(h.end), self.head(h.handler))
            };
            let info = match self.compute {
                Compute::Frames => {
                    let name = self.handlers[i]
                        .catch_name
                        .clone()
                        .unwrap_or_else(|| "java/lang/Throwable".to_string());
                    let mut pool = self.pool.borrow_mut();
                    frame::OBJECT | pool.add_type(&name)? as i32
                }
                _ => EXCEPTION_EDGE,
            };
            self.mark_jump_target(handler_slot);

            let mut block = start;
            while block != end {
                self.add_edge(block, info, handler_slot);
                block = self.labels[block].successor_chain.ok_or_else(|| {
                    Error::IllegalState(format!(
                        "exception handler range out of order in method {}",
                        self.name
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Cheap mode: fix-point over absolute input stack heights.
    fn compute_max_stack(&mut self) -> Result<()> {
        self.no_successor();
        self.add_handler_edges()?;

        let entry = match self.first_block {
            Some(entry) => entry,
            None => return Ok(()),
        };
        self.labels[entry].input_stack_top = 0;
        self.labels[entry].status |= REACHED | IN_QUEUE;

        let mut queue = Some(entry);
        let mut max: i32 = 0;
        while let Some(block) = queue {
            queue = self.labels[block].next.take();
            self.labels[block].status &= !IN_QUEUE;

            let start = self.labels[block].input_stack_top;
            let block_max = start + self.labels[block].output_stack_max;
            if block_max > max {
                max = block_max;
            }

            let mut edge_index = self.labels[block].successors;
            while let Some(index) = edge_index {
                let edge = self.edges[index as usize];
                edge_index = edge.next;
                let successor = self.head(edge.successor);
                let input = if edge.info == EXCEPTION_EDGE {
                    1
                } else {
                    start + edge.info
                };
                let info = &mut self.labels[successor];
                let merged = if info.status & REACHED == 0 {
                    input
                } else {
                    input.max(info.input_stack_top)
                };
                if info.status & REACHED == 0 || merged != info.input_stack_top {
                    info.input_stack_top = merged;
                    info.status |= REACHED;
                    if info.status & IN_QUEUE == 0 {
                        info.status |= IN_QUEUE;
                        info.next = queue;
                        queue = Some(successor);
                    }
                }
            }
        }
        self.max_stack = max.max(0) as u16;
        Ok(())
    }

    /// Expensive mode: full frame fix-point, dead code neutralization, and
    /// `StackMapTable` emission.
    fn compute_frames(&mut self) -> Result<()> {
        self.add_handler_edges()?;

        let entry = match self.first_block {
            Some(entry) => entry,
            None => return Ok(()),
        };
        {
            let mut pool = self.pool.borrow_mut();
            let is_static = self.access.contains(MethodAccessFlags::STATIC);
            let is_constructor = self.name == "<init>";
            let this_name = self.this_name.clone();
            let descriptor = self.descriptor.clone();
            let max_locals = self.max_locals as usize;
            self.labels[entry].init_input_frame(
                &mut pool,
                is_static,
                is_constructor,
                &this_name,
                &descriptor,
                max_locals,
            )?;
        }

        self.labels[entry].status |= IN_QUEUE;
        let mut queue = Some(entry);
        let mut max: i32 = 0;
        while let Some(block) = queue {
            queue = self.labels[block].next.take();
            self.labels[block].status &= !IN_QUEUE;

            let stack_len = self.labels[block]
                .input_stack
                .as_ref()
                .map(|stack| stack.len() as i32)
                .unwrap_or(0);
            let block_max = stack_len + self.labels[block].output_stack_max;
            if block_max > max {
                max = block_max;
            }

            let mut edge_index = self.labels[block].successors;
            while let Some(index) = edge_index {
                let edge = self.edges[index as usize];
                edge_index = edge.next;
                let successor = self.head(edge.successor);
                let changed = {
                    let mut pool = self.pool.borrow_mut();
                    frame::merge_block_frames(
                        &mut self.labels,
                        &mut pool,
                        &*self.hierarchy,
                        &self.this_name,
                        block,
                        successor,
                        edge.info,
                    )?
                };
                let info = &mut self.labels[successor];
                if changed && info.status & IN_QUEUE == 0 {
                    info.status |= IN_QUEUE;
                    info.next = queue;
                    queue = Some(successor);
                }
            }
        }

        // walk the blocks in position order: neutralize dead code, then emit
        // the stack map entries for STORE-flagged blocks
        self.prev_frame_offset = -1;
        self.prev_frame_locals = {
            let locals = self.labels[entry].input_locals.as_ref().unwrap();
            compress_frame_types(locals, true)
        };

        let mut block = Some(entry);
        while let Some(current) = block {
            let next = self.labels[current].successor_chain;
            if self.labels[current].input_locals.is_none() {
                let start = self.labels[current].position as usize;
                let end = match next {
                    Some(next_block) => self.labels[next_block].position as usize,
                    None => self.code.len(),
                };
                if end > start {
                    // code that no edge reaches still needs to verify: turn
                    // it into nops ending in an athrow, with a matching frame
                    for offset in start..end - 1 {
                        self.code.set_u8(offset, NOP);
                    }
                    self.code.set_u8(end - 1, ATHROW);
                    let throwable = {
                        let mut pool = self.pool.borrow_mut();
                        frame::OBJECT | pool.add_type("java/lang/Throwable")? as i32
                    };
                    self.labels[current].input_locals = Some(vec![]);
                    self.labels[current].input_stack = Some(vec![throwable]);
                    self.labels[current].status |= STORE;
                    if max < 1 {
                        max = 1;
                    }
                    log::trace!(
                        "method {}: unreachable block at {}..{} replaced with nop/athrow",
                        self.name,
                        start,
                        end
                    );
                }
            }
            if self.labels[current].status & STORE != 0
                && self.labels[current].input_locals.is_some()
            {
                self.emit_frame(current)?;
            }
            block = next;
        }

        self.max_stack = max.max(0) as u16;
        Ok(())
    }

    /// Append one `StackMapTable` entry for the input frame of `block`,
    /// using the most compact applicable variant.
    fn emit_frame(&mut self, block: Slot) -> Result<()> {
        let position = self.labels[block].position as i32;
        let delta = position - self.prev_frame_offset - 1;
        debug_assert!(delta >= 0, "frames must be emitted in ascending order");
        let delta = delta as u16;

        let locals = compress_frame_types(self.labels[block].input_locals.as_ref().unwrap(), true);
        let stack = compress_frame_types(self.labels[block].input_stack.as_ref().unwrap(), false);

        let same_locals = locals == self.prev_frame_locals;
        let mut pool = self.pool.borrow_mut();
        let out = &mut self.stack_map;

        if stack.is_empty() {
            let prev = &self.prev_frame_locals;
            if same_locals {
                // same_frame / same_frame_extended
                if delta <= 63 {
                    out.put_u8(delta as u8);
                } else {
                    out.put_u8(251);
                    out.put_u16(delta);
                }
            } else if locals.len() < prev.len()
                && prev.len() - locals.len() <= 3
                && prev[..locals.len()] == locals[..]
            {
                // chop_frame
                out.put_u8(251 - (prev.len() - locals.len()) as u8);
                out.put_u16(delta);
            } else if locals.len() > prev.len()
                && locals.len() - prev.len() <= 3
                && locals[..prev.len()] == prev[..]
            {
                // append_frame
                out.put_u8(251 + (locals.len() - prev.len()) as u8);
                out.put_u16(delta);
                for &t in &locals[prev.len()..] {
                    write_frame_type(out, &mut pool, t)?;
                }
            } else {
                write_full_frame(out, &mut pool, delta, &locals, &stack)?;
            }
        } else if stack.len() == 1 && same_locals {
            // same_locals_1_stack_item_frame (possibly extended)
            if delta <= 63 {
                out.put_u8(64 + delta as u8);
            } else {
                out.put_u8(247);
                out.put_u16(delta);
            }
            write_frame_type(out, &mut pool, stack[0])?;
        } else {
            write_full_frame(out, &mut pool, delta, &locals, &stack)?;
        }

        self.frame_count += 1;
        self.prev_frame_offset = position;
        self.prev_frame_locals = locals;
        Ok(())
    }

    // ------------------------------------------------------------------
    // The resize pass
    // ------------------------------------------------------------------

    /// Rewrite every pseudo-opcode into a real wide-branch sequence,
    /// propagating all downstream offset shifts. Widening can push other
    /// short branches out of range, so the oversized set is recomputed until
    /// it is stable; only then is the code rebuilt, in a single pass.
    fn resize_instructions(&mut self) -> Result<()> {
        let data: Vec<u8> = self.code.as_slice().to_vec();
        let code_len = data.len();

        // instruction boundaries
        let mut starts: Vec<usize> = vec![];
        let mut old_sizes: Vec<usize> = vec![];
        let mut offset = 0usize;
        while offset < code_len {
            let size = insn_size(&data, offset)?;
            starts.push(offset);
            old_sizes.push(size);
            offset += size;
        }
        let count = starts.len();

        let index_of = |old: usize| -> Result<usize> {
            starts.binary_search(&old).map_err(|_| Error::IllegalState(format!(
                "branch target {} does not fall on an instruction boundary in method {}",
                old, self.name
            )))
        };

        let mut widen: Vec<bool> = starts
            .iter()
            .map(|&start| (PSEUDO_FIRST..=PSEUDO_LAST).contains(&data[start]))
            .collect();

        // fix-point on the widened set
        let mut new_offsets: Vec<usize> = vec![0; count + 1];
        loop {
            let mut position = 0usize;
            for i in 0..count {
                new_offsets[i] = position;
                let start = starts[i];
                position += match data[start] {
                    TABLESWITCH | LOOKUPSWITCH => {
                        let old_padding = 3 - (start & 3);
                        let new_padding = 3 - (position & 3);
                        old_sizes[i] - old_padding + new_padding
                    }
                    opcode if (PSEUDO_FIRST..=PSEUDO_LAST).contains(&opcode) => {
                        let real = unpseudo(opcode);
                        if real == GOTO || real == JSR {
                            5
                        } else {
                            8
                        }
                    }
                    opcode if widen[i] => {
                        if opcode == GOTO || opcode == JSR {
                            5
                        } else {
                            8
                        }
                    }
                    _ => old_sizes[i],
                };
            }
            new_offsets[count] = position;

            let mut grew = false;
            for i in 0..count {
                let start = starts[i];
                let opcode = data[start];
                let is_short_branch = matches!(
                    opcodes::insn_shape(opcode),
                    Some(opcodes::InsnShape::Label)
                );
                if !is_short_branch || widen[i] {
                    continue;
                }
                let target = (start as i64 + BigEndian::read_i16(&data[start + 1..]) as i64) as usize;
                let relative = new_offsets[index_of(target)?] as i64 - new_offsets[i] as i64;
                if relative < i16::MIN as i64 || relative > i16::MAX as i64 {
                    widen[i] = true;
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        let new_offset_of = |old: usize| -> Result<usize> {
            if old == code_len {
                Ok(new_offsets[count])
            } else {
                Ok(new_offsets[index_of(old)?])
            }
        };

        // rebuild
        let mut new_code = ByteVector::new();
        for i in 0..count {
            let start = starts[i];
            let opcode = data[start];
            let new_start = new_offsets[i];
            match opcode {
                opcode
                    if (PSEUDO_FIRST..=PSEUDO_LAST).contains(&opcode) || widen[i] =>
                {
                    let (real, old_target) = if (PSEUDO_FIRST..=PSEUDO_LAST).contains(&opcode) {
                        let real = unpseudo(opcode);
                        // pseudo-opcodes hold unsigned 16-bit offsets
                        let target =
                            start + BigEndian::read_u16(&data[start + 1..]) as usize;
                        (real, target)
                    } else {
                        let target =
                            (start as i64 + BigEndian::read_i16(&data[start + 1..]) as i64) as usize;
                        (opcode, target)
                    };
                    let new_target = new_offset_of(old_target)? as i64;
                    match real {
                        GOTO => {
                            new_code.put_u8(GOTO_W);
                            new_code.put_i32((new_target - new_start as i64) as i32);
                        }
                        JSR => {
                            new_code.put_u8(JSR_W);
                            new_code.put_i32((new_target - new_start as i64) as i32);
                        }
                        conditional => {
                            // invert the predicate to skip over a goto_w
                            new_code.put_u8(negate_condition(conditional));
                            new_code.put_i16(8);
                            new_code.put_u8(GOTO_W);
                            new_code.put_i32((new_target - (new_start as i64 + 3)) as i32);
                        }
                    }
                }
                GOTO_W | JSR_W => {
                    let target =
                        (start as i64 + BigEndian::read_i32(&data[start + 1..]) as i64) as usize;
                    new_code.put_u8(opcode);
                    new_code.put_i32((new_offset_of(target)? as i64 - new_start as i64) as i32);
                }
                _ if matches!(opcodes::insn_shape(opcode), Some(opcodes::InsnShape::Label)) => {
                    let target =
                        (start as i64 + BigEndian::read_i16(&data[start + 1..]) as i64) as usize;
                    new_code.put_u8(opcode);
                    new_code
                        .put_i16((new_offset_of(target)? as i64 - new_start as i64) as i16);
                }
                TABLESWITCH => {
                    let old_padding = 3 - (start & 3);
                    let base = start + 1 + old_padding;
                    new_code.put_u8(TABLESWITCH);
                    for _ in 0..3 - (new_start & 3) {
                        new_code.put_u8(0);
                    }
                    let remap = |rel_at: usize, out: &mut ByteVector| -> Result<()> {
                        let old_target =
                            (start as i64 + BigEndian::read_i32(&data[rel_at..]) as i64) as usize;
                        out.put_i32((new_offset_of(old_target)? as i64 - new_start as i64) as i32);
                        Ok(())
                    };
                    remap(base, &mut new_code)?;
                    let low = BigEndian::read_i32(&data[base + 4..]);
                    let high = BigEndian::read_i32(&data[base + 8..]);
                    new_code.put_i32(low);
                    new_code.put_i32(high);
                    for j in 0..(high - low + 1) as usize {
                        remap(base + 12 + 4 * j, &mut new_code)?;
                    }
                }
                LOOKUPSWITCH => {
                    let old_padding = 3 - (start & 3);
                    let base = start + 1 + old_padding;
                    new_code.put_u8(LOOKUPSWITCH);
                    for _ in 0..3 - (new_start & 3) {
                        new_code.put_u8(0);
                    }
                    let remap = |rel_at: usize, out: &mut ByteVector| -> Result<()> {
                        let old_target =
                            (start as i64 + BigEndian::read_i32(&data[rel_at..]) as i64) as usize;
                        out.put_i32((new_offset_of(old_target)? as i64 - new_start as i64) as i32);
                        Ok(())
                    };
                    remap(base, &mut new_code)?;
                    let npairs = BigEndian::read_i32(&data[base + 4..]);
                    new_code.put_i32(npairs);
                    for j in 0..npairs as usize {
                        new_code.put_i32(BigEndian::read_i32(&data[base + 8 + 8 * j..]));
                        remap(base + 12 + 8 * j, &mut new_code)?;
                    }
                }
                _ => {
                    new_code.put_bytes(&data[start..start + old_sizes[i]]);
                }
            }
        }

        if new_code.len() > 65535 {
            return Err(Error::OverflowLimit {
                context: format!(
                    "method {} exceeds 65535 bytes after branch widening",
                    self.name
                ),
            });
        }
        log::trace!(
            "method {}: resize pass grew code from {} to {} bytes",
            self.name,
            code_len,
            new_code.len()
        );

        // shift every label that follows an expansion
        for info in &mut self.labels {
            if info.is_resolved() {
                let old = info.position as usize;
                let new = if old == code_len {
                    new_offsets[count]
                } else {
                    new_offsets[index_of(old)?]
                };
                if new != old {
                    info.status |= RESIZED;
                }
                info.position = new as u32;
            }
        }

        // uninitialized-type tags carry `new` offsets that just moved
        {
            let mut pool = self.pool.borrow_mut();
            pool.remap_uninitialized_offsets(|old| {
                let old = old as usize;
                match starts.binary_search(&old) {
                    Ok(index) => new_offsets[index] as u32,
                    // an offset from another method's body: leave it alone
                    Err(_) => old as u32,
                }
            });
        }

        self.code = new_code;
        self.resize_needed = false;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Append this method's `method_info` structure. Everything it interns
    /// lands in the pool before the pool itself is serialized.
    pub(crate) fn serialize(&self, out: &mut ByteVector) -> Result<()> {
        if self.has_code() && !self.finished {
            return Err(Error::IllegalState(format!(
                "method {} has code but visit_maxs was never called",
                self.name
            )));
        }
        let mut pool = self.pool.borrow_mut();

        out.put_u16(self.access.serialized_bits());
        out.put_u16(self.name_index);
        out.put_u16(self.descriptor_index);

        let deprecated = self.access.contains(MethodAccessFlags::DEPRECATED);
        let mut attribute_count = self.attributes.len() as u16;
        if self.has_code() {
            attribute_count += 1;
        }
        if !self.exception_indexes.is_empty() {
            attribute_count += 1;
        }
        if self.signature_index.is_some() {
            attribute_count += 1;
        }
        if deprecated {
            attribute_count += 1;
        }
        out.put_u16(attribute_count);

        if self.has_code() {
            let payload = self.serialize_code(&mut pool)?;
            out.put_u16(pool.add_utf8("Code")?);
            out.put_u32(payload.len() as u32);
            out.put_bytes(payload.as_slice());
        }
        if !self.exception_indexes.is_empty() {
            out.put_u16(pool.add_utf8("Exceptions")?);
            out.put_u32(2 + 2 * self.exception_indexes.len() as u32);
            out.put_u16(self.exception_indexes.len() as u16);
            for &index in &self.exception_indexes {
                out.put_u16(index);
            }
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

    fn serialize_code(&self, pool: &mut ConstantPool) -> Result<ByteVector> {
        if self.code.len() > 65535 {
            return Err(Error::OverflowLimit {
                context: format!("method {} code exceeds 65535 bytes", self.name),
            });
        }
        if self.max_locals > 65535 {
            return Err(Error::OverflowLimit {
                context: format!("method {} needs more than 65535 locals", self.name),
            });
        }
        let mut payload = ByteVector::new();
        payload.put_u16(self.max_stack);
        payload.put_u16(self.max_locals as u16);
        payload.put_u32(self.code.len() as u32);
        payload.put_bytes(self.code.as_slice());

        payload.put_u16(self.handlers.len() as u16);
        for handler in &self.handlers {
            payload.put_u16(self.labels[handler.start].offset()? as u16);
            payload.put_u16(self.labels[handler.end].offset()? as u16);
            payload.put_u16(self.labels[handler.handler].offset()? as u16);
            payload.put_u16(handler.catch_index);
        }

        let typed_vars = self
            .local_vars
            .iter()
            .filter(|var| var.signature_index.is_some())
            .count();
        let mut code_attribute_count = 0u16;
        if self.frame_count > 0 {
            code_attribute_count += 1;
        }
        if !self.line_numbers.is_empty() {
            code_attribute_count += 1;
        }
        if !self.local_vars.is_empty() {
            code_attribute_count += 1;
        }
        if typed_vars > 0 {
            code_attribute_count += 1;
        }
        payload.put_u16(code_attribute_count);

        if self.frame_count > 0 {
            payload.put_u16(pool.add_utf8("StackMapTable")?);
            payload.put_u32(2 + self.stack_map.len() as u32);
            payload.put_u16(self.frame_count);
            payload.put_bytes(self.stack_map.as_slice());
        }
        if !self.line_numbers.is_empty() {
            payload.put_u16(pool.add_utf8("LineNumberTable")?);
            payload.put_u32(2 + 4 * self.line_numbers.len() as u32);
            payload.put_u16(self.line_numbers.len() as u16);
            for &(slot, line) in &self.line_numbers {
                payload.put_u16(self.labels[slot].offset()? as u16);
                payload.put_u16(line);
            }
        }
        if !self.local_vars.is_empty() {
            payload.put_u16(pool.add_utf8("LocalVariableTable")?);
            payload.put_u32(2 + 10 * self.local_vars.len() as u32);
            payload.put_u16(self.local_vars.len() as u16);
            for var in &self.local_vars {
                let start = self.labels[var.start].offset()?;
                let end = self.labels[var.end].offset()?;
                payload.put_u16(start as u16);
                payload.put_u16((end - start) as u16);
                payload.put_u16(var.name_index);
                payload.put_u16(var.desc_index);
                payload.put_u16(var.index);
            }
        }
        if typed_vars > 0 {
            payload.put_u16(pool.add_utf8("LocalVariableTypeTable")?);
            payload.put_u32(2 + 10 * typed_vars as u32);
            payload.put_u16(typed_vars as u16);
            for var in &self.local_vars {
                let signature_index = match var.signature_index {
                    Some(index) => index,
                    None => continue,
                };
                let start = self.labels[var.start].offset()?;
                let end = self.labels[var.end].offset()?;
                payload.put_u16(start as u16);
                payload.put_u16((end - start) as u16);
                payload.put_u16(var.name_index);
                payload.put_u16(signature_index);
                payload.put_u16(var.index);
            }
        }
        Ok(payload)
    }
}

/// One slot per type: drop the TOP that trails every LONG and DOUBLE, and
/// (for locals) trim trailing TOPs entirely.
fn compress_frame_types(types: &[i32], trim_trailing_top: bool) -> Vec<i32> {
    let mut out = vec![];
    let mut i = 0;
    while i < types.len() {
        let t = types[i];
        out.push(t);
        i += if t == frame::LONG || t == frame::DOUBLE {
            2
        } else {
            1
        };
    }
    if trim_trailing_top {
        while out.last() == Some(&frame::TOP) {
            out.pop();
        }
    }
    out
}

fn write_full_frame(
    out: &mut ByteVector,
    pool: &mut ConstantPool,
    delta: u16,
    locals: &[i32],
    stack: &[i32],
) -> Result<()> {
    out.put_u8(255);
    out.put_u16(delta);
    out.put_u16(locals.len() as u16);
    for &t in locals {
        write_frame_type(out, pool, t)?;
    }
    out.put_u16(stack.len() as u16);
    for &t in stack {
        write_frame_type(out, pool, t)?;
    }
    Ok(())
}

/// Serialize one packed frame type as a `verification_type_info`.
fn write_frame_type(out: &mut ByteVector, pool: &mut ConstantPool, t: i32) -> Result<()> {
    let dim = ((t as u32) >> 28) as usize;
    if dim == 0 {
        if t & frame::BASE_KIND == frame::OBJECT & frame::BASE_KIND {
            out.put_u8(7);
            let name = pool.type_name((t & frame::BASE_VALUE) as u32).to_string();
            out.put_u16(pool.add_class(&name)?);
        } else if t & frame::BASE_KIND == frame::UNINITIALIZED & frame::BASE_KIND {
            out.put_u8(8);
            let offset = pool
                .type_new_offset((t & frame::BASE_VALUE) as u32)
                .unwrap_or(0);
            out.put_u16(offset as u16);
        } else {
            let tag = (t & frame::BASE_VALUE) as u8;
            // BOOLEAN..SHORT only exist as array element types
            out.put_u8(if tag > 6 { 1 } else { tag });
        }
    } else {
        // arrays are encoded as a class constant with a descriptor-shaped name
        let mut name = "[".repeat(dim);
        if t & frame::BASE_KIND == frame::OBJECT & frame::BASE_KIND {
            name.push('L');
            name.push_str(pool.type_name((t & frame::BASE_VALUE) as u32));
            name.push(';');
        } else {
            name.push(match t & !frame::DIM {
                x if x == frame::BOOLEAN => 'Z',
                x if x == frame::CHAR => 'C',
                x if x == frame::BYTE => 'B',
                x if x == frame::SHORT => 'S',
                x if x == frame::INTEGER => 'I',
                x if x == frame::FLOAT => 'F',
                x if x == frame::LONG => 'J',
                _ => 'D',
            });
        }
        out.put_u8(7);
        out.put_u16(pool.add_class(&name)?);
    }
    Ok(())
}

/// Size of the instruction starting at `offset`
fn insn_size(data: &[u8], offset: usize) -> Result<usize> {
    use opcodes::InsnShape;
    let opcode = data[offset];
    if (PSEUDO_FIRST..=PSEUDO_LAST).contains(&opcode) {
        return Ok(3);
    }
    let shape = opcodes::insn_shape(opcode).ok_or_else(|| {
        Error::IllegalState(format!(
            "unknown opcode {} in emitted code at offset {}",
            opcode, offset
        ))
    })?;
    Ok(match shape {
        InsnShape::NoArg | InsnShape::ImplicitVar => 1,
        InsnShape::Var | InsnShape::SByte | InsnShape::Ldc => 2,
        InsnShape::Label
        | InsnShape::Short
        | InsnShape::LdcWide
        | InsnShape::FieldOrMethod
        | InsnShape::Type
        | InsnShape::Iinc => 3,
        InsnShape::MultiANewArray => 4,
        InsnShape::LabelWide | InsnShape::InterfaceMethod => 5,
        InsnShape::Wide => {
            if data[offset + 1] == IINC {
                6
            } else {
                4
            }
        }
        InsnShape::TableSwitch => {
            let padding = 3 - (offset & 3);
            let base = offset + 1 + padding;
            let low = BigEndian::read_i32(&data[base + 4..]);
            let high = BigEndian::read_i32(&data[base + 8..]);
            1 + padding + 12 + 4 * (high - low + 1) as usize
        }
        InsnShape::LookupSwitch => {
            let padding = 3 - (offset & 3);
            let base = offset + 1 + padding;
            let npairs = BigEndian::read_i32(&data[base + 4..]) as usize;
            1 + padding + 8 + 8 * npairs
        }
    })
}

fn unpseudo(opcode: u8) -> u8 {
    if opcode < 218 {
        opcode - 49
    } else {
        opcode - 20
    }
}

impl MethodVisitor for MethodWriter {
    fn visit_insn(&mut self, opcode: u8) -> Result<()> {
        self.execute_frame(opcode, 0, Operand::None)?;
        self.adjust_stack(opcodes::stack_delta(opcode));
        self.code.put_u8(opcode);
        if (IRETURN..=RETURN).contains(&opcode) || opcode == ATHROW {
            self.no_successor();
        }
        Ok(())
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> Result<()> {
        self.execute_frame(opcode, operand, Operand::None)?;
        self.adjust_stack(opcodes::stack_delta(opcode));
        match opcode {
            SIPUSH => self.code.put_12(opcode, operand as i16 as u16),
            _ => self.code.put_11(opcode, operand as i8 as u8),
        }
        Ok(())
    }

    fn visit_var_insn(&mut self, opcode: u8, var: u16) -> Result<()> {
        if opcode == RET && self.compute == Compute::Frames {
            return Err(self.unsupported("ret"));
        }
        self.execute_frame(opcode, var as i32, Operand::None)?;
        self.adjust_stack(opcodes::stack_delta(opcode));

        let wide_slot = matches!(opcode, LLOAD | DLOAD | LSTORE | DSTORE);
        self.track_locals(var as u32 + if wide_slot { 2 } else { 1 });

        if var < 4 && opcode != RET {
            // compact forms iload_0 .. astore_3
            let compact = if opcode < ISTORE {
                26 + ((opcode - ILOAD) << 2) + var as u8
            } else {
                59 + ((opcode - ISTORE) << 2) + var as u8
            };
            self.code.put_u8(compact);
        } else if var > 255 {
            self.code.put_u8(opcodes::WIDE);
            self.code.put_12(opcode, var);
        } else {
            self.code.put_11(opcode, var as u8);
        }

        if opcode == RET {
            self.no_successor();
        }
        Ok(())
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) -> Result<()> {
        let index = self.pool.borrow_mut().add_class(type_name)?;
        // for `new`, the frame tracks the offset of the allocation site
        let arg = self.code.len() as i32;
        self.execute_frame(opcode, arg, Operand::TypeName(type_name))?;
        self.adjust_stack(opcodes::stack_delta(opcode));
        self.code.put_12(opcode, index);
        Ok(())
    }

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<()> {
        let index = self.pool.borrow_mut().add_field_ref(owner, name, descriptor)?;
        self.execute_frame(
            opcode,
            0,
            Operand::Member {
                descriptor,
                is_init: false,
            },
        )?;
        let size = descriptors::type_size(descriptor);
        let delta = match opcode {
            GETSTATIC => size,
            PUTSTATIC => -size,
            GETFIELD => size - 1,
            _ => -size - 1,
        };
        self.adjust_stack(delta);
        self.code.put_12(opcode, index);
        Ok(())
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<()> {
        let is_interface = opcode == INVOKEINTERFACE;
        let index = self
            .pool
            .borrow_mut()
            .add_method_ref(owner, name, descriptor, is_interface)?;
        self.execute_frame(
            opcode,
            0,
            Operand::Member {
                descriptor,
                is_init: name.starts_with('<'),
            },
        )?;
        let (args, ret) = descriptors::argument_and_return_sizes(descriptor)?;
        let receiver = if opcode == INVOKESTATIC { 0 } else { 1 };
        self.adjust_stack(ret - args - receiver);

        if is_interface {
            self.code.put_12(opcode, index);
            self.code.put_11((args + 1) as u8, 0);
        } else {
            self.code.put_12(opcode, index);
        }
        Ok(())
    }

    fn visit_jump_insn(&mut self, opcode: u8, label: Label) -> Result<()> {
        let is_branch = matches!(
            opcodes::insn_shape(opcode),
            Some(opcodes::InsnShape::Label)
        );
        if !is_branch {
            return Err(Error::IllegalState(format!(
                "opcode {} is not a branch instruction",
                opcode
            )));
        }
        if opcode == JSR && self.compute == Compute::Frames {
            return Err(self.unsupported("jsr"));
        }
        let slot = self.slot_of(label);

        if self.current_block.is_some() {
            match self.compute {
                Compute::Frames => {
                    self.execute_frame(opcode, 0, Operand::None)?;
                    self.mark_jump_target(slot);
                    let current = self.current_block.unwrap();
                    self.add_edge(current, 0, slot);
                }
                Compute::MaxStack => {
                    self.mark_jump_target(slot);
                    let current = self.current_block.unwrap();
                    if opcode == JSR {
                        // the target additionally receives the return address
                        let info = self.stack_size + 1;
                        self.add_edge(current, info, slot);
                    } else {
                        self.adjust_stack(opcodes::stack_delta(opcode));
                        let info = self.stack_size;
                        self.add_edge(current, info, slot);
                    }
                }
                Compute::Nothing => {}
            }
        }

        // a branch to an already-placed label can overflow right away; emit
        // the wide form directly rather than going through a pseudo-opcode
        let source = self.code.len() as u32;
        let resolved_overflow = {
            let info = &self.labels[slot];
            info.is_resolved() && (info.position as i64 - source as i64) < i16::MIN as i64
        };
        if resolved_overflow {
            match opcode {
                GOTO => {
                    self.code.put_u8(GOTO_W);
                    self.labels[slot].put(&mut self.code, source, true);
                }
                JSR => {
                    self.code.put_u8(JSR_W);
                    self.labels[slot].put(&mut self.code, source, true);
                }
                conditional => {
                    self.code.put_u8(negate_condition(conditional));
                    self.code.put_i16(8);
                    let wide_source = self.code.len() as u32;
                    self.code.put_u8(GOTO_W);
                    self.labels[slot].put(&mut self.code, wide_source, true);
                }
            }
        } else {
            self.code.put_u8(opcode);
            self.labels[slot].put(&mut self.code, source, false);
        }

        if self.current_block.is_some() {
            if self.compute == Compute::Frames && opcode != GOTO {
                // start a fresh block so the branch target sees the frame as
                // it was at the jump, not at the end of a longer block
                let next = self.internal_slot();
                self.place_label_slot(next)?;
            }
            if opcode == GOTO {
                self.no_successor();
            }
        }
        Ok(())
    }

    fn visit_label(&mut self, label: Label) -> Result<()> {
        let slot = self.slot_of(label);
        self.place_label_slot(slot)
    }

    fn visit_ldc_insn(&mut self, constant: &ConstantValue) -> Result<()> {
        let (index, wide) = self.pool.borrow_mut().add_const(constant)?;
        self.execute_frame(LDC, 0, Operand::Const(constant))?;
        self.adjust_stack(if wide { 2 } else { 1 });
        if wide {
            self.code.put_12(LDC2_W, index);
        } else if index > 255 {
            self.code.put_12(LDC_W, index);
        } else {
            self.code.put_11(LDC, index as u8);
        }
        Ok(())
    }

    fn visit_iinc_insn(&mut self, var: u16, increment: i16) -> Result<()> {
        self.execute_frame(IINC, var as i32, Operand::None)?;
        self.track_locals(var as u32 + 1);
        if var > 255 || increment < i8::MIN as i16 || increment > i8::MAX as i16 {
            self.code.put_u8(opcodes::WIDE);
            self.code.put_12(IINC, var);
            self.code.put_i16(increment);
        } else {
            self.code.put_u8(IINC);
            self.code.put_u8(var as u8);
            self.code.put_u8(increment as i8 as u8);
        }
        Ok(())
    }

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: Label,
        labels: &[Label],
    ) -> Result<()> {
        if (max as i64 - min as i64 + 1) != labels.len() as i64 {
            return Err(Error::IllegalState(format!(
                "tableswitch needs {} targets but {} were supplied",
                max as i64 - min as i64 + 1,
                labels.len()
            )));
        }
        let source = self.code.len() as u32;
        self.code.put_u8(TABLESWITCH);
        for _ in 0..(4 - ((source as usize + 1) & 3)) & 3 {
            self.code.put_u8(0);
        }
        let default_slot = self.slot_of(default);
        self.labels[default_slot].put(&mut self.code, source, true);
        self.code.put_i32(min);
        self.code.put_i32(max);
        let mut slots = Vec::with_capacity(labels.len());
        for &label in labels {
            let slot = self.slot_of(label);
            slots.push(slot);
            self.labels[slot].put(&mut self.code, source, true);
        }
        self.finish_switch(default_slot, &slots)
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: Label,
        keys: &[i32],
        labels: &[Label],
    ) -> Result<()> {
        if keys.len() != labels.len() {
            return Err(Error::IllegalState(format!(
                "lookupswitch has {} keys but {} targets",
                keys.len(),
                labels.len()
            )));
        }
        let source = self.code.len() as u32;
        self.code.put_u8(LOOKUPSWITCH);
        for _ in 0..(4 - ((source as usize + 1) & 3)) & 3 {
            self.code.put_u8(0);
        }
        let default_slot = self.slot_of(default);
        self.labels[default_slot].put(&mut self.code, source, true);
        self.code.put_i32(keys.len() as i32);
        let mut slots = Vec::with_capacity(labels.len());
        for (&key, &label) in keys.iter().zip(labels) {
            let slot = self.slot_of(label);
            slots.push(slot);
            self.code.put_i32(key);
            self.labels[slot].put(&mut self.code, source, true);
        }
        self.finish_switch(default_slot, &slots)
    }

    fn visit_multi_anew_array_insn(&mut self, descriptor: &str, dims: u8) -> Result<()> {
        let index = self.pool.borrow_mut().add_class(descriptor)?;
        self.execute_frame(MULTIANEWARRAY, dims as i32, Operand::TypeName(descriptor))?;
        self.adjust_stack(1 - dims as i32);
        self.code.put_12(MULTIANEWARRAY, index);
        self.code.put_u8(dims);
        Ok(())
    }

    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<()> {
        let catch_index = match catch_type {
            Some(name) => self.pool.borrow_mut().add_class(name)?,
            None => 0,
        };
        let start = self.slot_of(start);
        let end = self.slot_of(end);
        let handler = self.slot_of(handler);
        self.handlers.push(Handler {
            start,
            end,
            handler,
            catch_index,
            catch_name: catch_type.map(str::to_string),
        });
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
        let (name_index, desc_index, signature_index) = {
            let mut pool = self.pool.borrow_mut();
            let name_index = pool.add_utf8(name)?;
            let desc_index = pool.add_utf8(descriptor)?;
            let signature_index = match signature {
                Some(signature) => Some(pool.add_utf8(signature)?),
                None => None,
            };
            (name_index, desc_index, signature_index)
        };
        self.track_locals(index as u32 + descriptors::type_size(descriptor) as u32);
        let start = self.slot_of(start);
        let end = self.slot_of(end);
        self.local_vars.push(LocalVar {
            name_index,
            desc_index,
            signature_index,
            start,
            end,
            index,
        });
        Ok(())
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<()> {
        let slot = self.slot_of(start);
        self.line_numbers.push((slot, line));
        Ok(())
    }

    fn visit_attribute(&mut self, attribute: Attribute) -> Result<()> {
        self.attributes.push(attribute);
        Ok(())
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<()> {
        if self.finished {
            return Err(Error::IllegalState(format!(
                "visit_maxs called twice on method {}",
                self.name
            )));
        }
        self.check_pending_labels()?;
        if self.resize_needed {
            self.resize_instructions()?;
        }
        match self.compute {
            Compute::Frames => self.compute_frames()?,
            Compute::MaxStack => self.compute_max_stack()?,
            Compute::Nothing => {
                self.max_stack = max_stack;
                self.max_locals = max_locals as u32;
            }
        }
        self.finished = true;
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

impl MethodWriter {
    /// Common tail of the switch emitters: CFG edges and the end of the
    /// current block.
    fn finish_switch(&mut self, default_slot: Slot, slots: &[Slot]) -> Result<()> {
        if self.current_block.is_some() {
            match self.compute {
                Compute::Frames => {
                    self.execute_frame(LOOKUPSWITCH, 0, Operand::None)?;
                    let current = self.current_block.unwrap();
                    self.mark_jump_target(default_slot);
                    self.add_edge(current, 0, default_slot);
                    for &slot in slots {
                        self.mark_jump_target(slot);
                        self.add_edge(current, 0, slot);
                    }
                }
                Compute::MaxStack => {
                    self.adjust_stack(-1);
                    let current = self.current_block.unwrap();
                    let info = self.stack_size;
                    self.mark_jump_target(default_slot);
                    self.add_edge(current, info, default_slot);
                    for &slot in slots {
                        self.mark_jump_target(slot);
                        self.add_edge(current, info, slot);
                    }
                }
                Compute::Nothing => {}
            }
            self.no_successor();
        }
        Ok(())
    }
}
