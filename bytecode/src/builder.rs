use crate::op::Op;

/// A forward jump whose offset has not yet been resolved.
///
/// Created by [`BytecodeBuilder::jump`] and
/// [`BytecodeBuilder::jump_if_false`]. Resolve it with
/// [`BytecodeBuilder::bind`]. Control flow in a function body is limited
/// to forward jumps, so there is no backward-jump API.
#[derive(Debug)]
pub struct Label {
    /// Position of the i16 offset bytes in the buffer.
    offset_pos: usize,
    /// Position right after the jump instruction (base for relative offset).
    base: usize,
}

/// Builds a bytecode byte sequence.
///
/// The builder automatically emits the [`Op::Wide`] prefix when a slot
/// operand exceeds `u8::MAX`.
pub struct BytecodeBuilder {
    buf: Vec<u8>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Current byte offset in the bytecode stream.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn emit_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_op(&mut self, op: Op) {
        self.buf.push(op as u8);
    }

    /// Returns `true` if the slot needed the wide encoding.
    fn needs_wide(slot: u16) -> bool {
        slot > u8::MAX as u16
    }

    fn emit_slot(&mut self, slot: u16, wide: bool) {
        if wide {
            self.emit_u16(slot);
        } else {
            self.emit_u8(slot as u8);
        }
    }

    fn emit_slot_op(&mut self, op: Op, slot: u16) {
        let wide = Self::needs_wide(slot);
        if wide {
            self.emit_op(Op::Wide);
        }
        self.emit_op(op);
        self.emit_slot(slot, wide);
    }

    /// `PushLiteral <idx:u16>` — push a literal pool entry.
    pub fn push_literal(&mut self, idx: u16) {
        self.emit_op(Op::PushLiteral);
        self.emit_u16(idx);
    }

    /// `PushSmi <value>` — push a small integer scalar.
    ///
    /// Automatically selects 8-bit, 16-bit (`Wide`), or 32-bit (`ExtraWide`)
    /// encoding based on the value.
    pub fn push_smi(&mut self, value: i32) {
        if let Ok(v) = i8::try_from(value) {
            self.emit_op(Op::PushSmi);
            self.emit_u8(v as u8);
        } else if let Ok(v) = i16::try_from(value) {
            self.emit_op(Op::Wide);
            self.emit_op(Op::PushSmi);
            self.emit_i16(v);
        } else {
            self.emit_op(Op::ExtraWide);
            self.emit_op(Op::PushSmi);
            self.emit_u32(value as u32);
        }
    }

    /// `LoadLocal <slot>` — push a local frame slot.
    pub fn load_local(&mut self, slot: u16) {
        self.emit_slot_op(Op::LoadLocal, slot);
    }

    /// `StoreLocal <slot>` — pop into a local frame slot.
    pub fn store_local(&mut self, slot: u16) {
        self.emit_slot_op(Op::StoreLocal, slot);
    }

    /// `LoadVar <idx>` — push a captured closure variable.
    pub fn load_var(&mut self, idx: u16) {
        self.emit_slot_op(Op::LoadVar, idx);
    }

    /// `StoreVar <idx>` — pop into a captured closure variable.
    pub fn store_var(&mut self, idx: u16) {
        self.emit_slot_op(Op::StoreVar, idx);
    }

    /// `CallWord <name_idx:u16>` — scope lookup, applying callables.
    pub fn call_word(&mut self, name_idx: u16) {
        self.emit_op(Op::CallWord);
        self.emit_u16(name_idx);
    }

    /// `LoadScope <name_idx:u16>` — scope lookup without application.
    pub fn load_scope(&mut self, name_idx: u16) {
        self.emit_op(Op::LoadScope);
        self.emit_u16(name_idx);
    }

    /// `Call` — pop a callable and apply it.
    pub fn call(&mut self) {
        self.emit_op(Op::Call);
    }

    /// `CallPrim <idx:u16>` — apply a literal-pool primitive directly.
    pub fn call_prim(&mut self, idx: u16) {
        self.emit_op(Op::CallPrim);
        self.emit_u16(idx);
    }

    /// `Return` — finish the current function.
    pub fn return_(&mut self) {
        self.emit_op(Op::Return);
    }

    /// `MakeClosure <fundef_idx:u16>` — push a closure over a definition.
    pub fn make_closure(&mut self, fundef_idx: u16) {
        self.emit_op(Op::MakeClosure);
        self.emit_u16(fundef_idx);
    }

    /// `MakeEach <mask:u16>` — wrap the top callable in an each-op.
    pub fn make_each(&mut self, mask: u16) {
        self.emit_op(Op::MakeEach);
        self.emit_u16(mask);
    }

    /// `Dot <name_idx:u16>` — keyed lookup plus message send.
    pub fn dot(&mut self, name_idx: u16) {
        self.emit_op(Op::Dot);
        self.emit_u16(name_idx);
    }

    /// `Comma <name_idx:u16>` — keyed lookup.
    pub fn comma(&mut self, name_idx: u16) {
        self.emit_op(Op::Comma);
        self.emit_u16(name_idx);
    }

    /// `NewList <n>` — collect the top `n` values into a finite list.
    pub fn new_list(&mut self, n: u16) {
        self.emit_slot_op(Op::NewList, n);
    }

    pub fn dup(&mut self) {
        self.emit_op(Op::Dup);
    }

    pub fn swap(&mut self) {
        self.emit_op(Op::Swap);
    }

    pub fn drop_top(&mut self) {
        self.emit_op(Op::DropTop);
    }

    pub fn rot(&mut self) {
        self.emit_op(Op::Rot);
    }

    /// Emit an unconditional forward jump. Returns a [`Label`] that must be
    /// resolved later with [`bind`](Self::bind).
    pub fn jump(&mut self) -> Label {
        self.emit_jump_placeholder(Op::Jump)
    }

    /// Emit a conditional forward jump (falsy). Returns a [`Label`].
    pub fn jump_if_false(&mut self) -> Label {
        self.emit_jump_placeholder(Op::JumpIfFalse)
    }

    /// Bind a forward jump label to the current position.
    pub fn bind(&mut self, label: Label) {
        let target = self.buf.len();
        debug_assert!(target >= label.base, "jumps must be forward");
        let offset = (target - label.base) as i16;
        self.buf[label.offset_pos..label.offset_pos + 2]
            .copy_from_slice(&offset.to_le_bytes());
    }

    fn emit_jump_placeholder(&mut self, op: Op) -> Label {
        self.emit_op(op);
        let offset_pos = self.buf.len();
        self.emit_i16(0); // placeholder
        let base = self.buf.len();
        Label { offset_pos, base }
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
