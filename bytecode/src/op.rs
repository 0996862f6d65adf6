/// Bytecode opcodes.
///
/// Operand widths: slot/index operands are 8-bit by default and the
/// [`Wide`](Op::Wide) prefix promotes them to 16-bit. Literal pool and
/// name indices are always 16-bit. Jump offsets are always 16-bit and,
/// per the instruction-stream contract, only ever point forward within
/// the current function body.
///
/// The [`ExtraWide`](Op::ExtraWide) prefix promotes operands to 32-bit.
/// Currently only used with [`PushSmi`](Op::PushSmi).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Prefix: the next instruction uses 16-bit slot/immediate operands.
    Wide = 0x00,

    /// Prefix: the next instruction uses 32-bit operands.
    /// Currently only valid before [`PushSmi`](Op::PushSmi).
    ExtraWide,

    /// Push a literal pool entry onto the value stack.
    /// Operands: `idx:u16`
    PushLiteral,

    /// Push a small integer scalar onto the value stack.
    /// Operands: `value:i8` (wide: `i16`, extra-wide: `i32`)
    PushSmi,

    /// Push a local frame slot.
    /// Operands: `slot:u8` (wide: `u16`)
    LoadLocal,

    /// Pop the top of stack into a local frame slot.
    /// Operands: `slot:u8` (wide: `u16`)
    StoreLocal,

    /// Push a captured closure variable of the running function.
    /// Operands: `idx:u8` (wide: `u16`)
    LoadVar,

    /// Pop the top of stack into a captured closure variable.
    /// Operands: `idx:u8` (wide: `u16`)
    StoreVar,

    /// Look a name up through the scope chain. Functions and primitives
    /// are applied on the spot; any other value is pushed.
    /// Operands: `name_idx:u16` (literal pool entry holding the symbol)
    CallWord,

    /// Look a name up through the scope chain and push the value without
    /// applying it.
    /// Operands: `name_idx:u16`
    LoadScope,

    /// Pop a callable and apply it. Arity comes from the callable.
    Call,

    /// Apply a primitive from the literal pool directly, without pushing
    /// it first.
    /// Operands: `idx:u16`
    CallPrim,

    /// Return from the current function, leaving its declared number of
    /// results on the stack. Every instruction stream ends with this.
    Return,

    /// Unconditional forward jump.
    /// Operands: `offset:i16` (relative to end of instruction, >= 0)
    Jump,

    /// Pop a value; jump forward when it is false.
    /// Operands: `offset:i16`
    JumpIfFalse,

    /// Push a closure built from a literal-pool function definition,
    /// capturing variables from the current frame.
    /// Operands: `fundef_idx:u16`
    MakeClosure,

    /// Pop a callable and push an each-op wrapper with the given automap
    /// mask (two bits per argument).
    /// Operands: `mask:u16`
    MakeEach,

    /// Pop a receiver, look the key up on it, and message-send the result
    /// back to the receiver.
    /// Operands: `name_idx:u16`
    Dot,

    /// Pop a receiver, look the key up on it, and push the value.
    /// Operands: `name_idx:u16`
    Comma,

    /// Pop `n` values and push a fresh finite list of them.
    /// Operands: `n:u8` (wide: `u16`)
    NewList,

    /// Duplicate the top of stack.
    Dup,

    /// Swap the top two stack values.
    Swap,

    /// Drop the top of stack.
    DropTop,

    /// Rotate the top three stack values: `(a b c -- b c a)`.
    Rot,
}

impl Op {
    pub const COUNT: usize = Op::Rot as usize + 1;

    /// Convert a raw byte to an opcode without a bounds check.
    ///
    /// # Safety
    ///
    /// `byte` must be a valid opcode value (`< Op::COUNT`).
    #[inline(always)]
    pub unsafe fn from_u8_unchecked(byte: u8) -> Self {
        debug_assert!(
            (byte as usize) < Self::COUNT,
            "invalid opcode: 0x{byte:02x}"
        );
        core::mem::transmute::<u8, Op>(byte)
    }

    /// Whether this opcode has operands affected by the `Wide` or `ExtraWide`
    /// prefix.
    pub const fn has_scalable_operands(self) -> bool {
        matches!(
            self,
            Op::PushSmi
                | Op::LoadLocal
                | Op::StoreLocal
                | Op::LoadVar
                | Op::StoreVar
                | Op::NewList
        )
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte < Self::COUNT as u8 {
            // SAFETY: Op is repr(u8) with contiguous variants starting at 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}
