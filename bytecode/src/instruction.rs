use core::fmt;

/// A decoded instruction with all operands resolved to their widest types.
///
/// Slot operands are always `u16` regardless of whether the instruction was
/// encoded in narrow or wide form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    PushLiteral { idx: u16 },
    PushSmi { value: i32 },
    LoadLocal { slot: u16 },
    StoreLocal { slot: u16 },
    LoadVar { idx: u16 },
    StoreVar { idx: u16 },
    CallWord { name_idx: u16 },
    LoadScope { name_idx: u16 },
    Call,
    CallPrim { idx: u16 },
    Return,
    Jump { offset: i16 },
    JumpIfFalse { offset: i16 },
    MakeClosure { fundef_idx: u16 },
    MakeEach { mask: u16 },
    Dot { name_idx: u16 },
    Comma { name_idx: u16 },
    NewList { n: u16 },
    Dup,
    Swap,
    DropTop,
    Rot,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PushLiteral { idx } => write!(f, "PushLiteral #{idx}"),
            Self::PushSmi { value } => write!(f, "PushSmi {value}"),
            Self::LoadLocal { slot } => write!(f, "LoadLocal l{slot}"),
            Self::StoreLocal { slot } => write!(f, "StoreLocal l{slot}"),
            Self::LoadVar { idx } => write!(f, "LoadVar v{idx}"),
            Self::StoreVar { idx } => write!(f, "StoreVar v{idx}"),
            Self::CallWord { name_idx } => write!(f, "CallWord #{name_idx}"),
            Self::LoadScope { name_idx } => write!(f, "LoadScope #{name_idx}"),
            Self::Call => write!(f, "Call"),
            Self::CallPrim { idx } => write!(f, "CallPrim #{idx}"),
            Self::Return => write!(f, "Return"),
            Self::Jump { offset } => write!(f, "Jump {offset:+}"),
            Self::JumpIfFalse { offset } => write!(f, "JumpIfFalse {offset:+}"),
            Self::MakeClosure { fundef_idx } => {
                write!(f, "MakeClosure #{fundef_idx}")
            }
            Self::MakeEach { mask } => write!(f, "MakeEach {mask:#x}"),
            Self::Dot { name_idx } => write!(f, "Dot #{name_idx}"),
            Self::Comma { name_idx } => write!(f, "Comma #{name_idx}"),
            Self::NewList { n } => write!(f, "NewList {n}"),
            Self::Dup => write!(f, "Dup"),
            Self::Swap => write!(f, "Swap"),
            Self::DropTop => write!(f, "Drop"),
            Self::Rot => write!(f, "Rot"),
        }
    }
}
