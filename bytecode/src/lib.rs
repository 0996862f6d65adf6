mod op;
mod instruction;
mod builder;
mod decoder;

pub use op::Op;
pub use instruction::Instruction;
pub use builder::{BytecodeBuilder, Label};
pub use decoder::BytecodeDecoder;

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Instruction> {
        BytecodeDecoder::new(bytes).collect()
    }

    #[test]
    fn round_trip_narrow() {
        let mut b = BytecodeBuilder::new();
        b.push_literal(42);
        b.push_smi(7);
        b.load_local(5);
        b.store_local(10);
        b.load_var(0);
        b.store_var(3);
        b.call_word(100);
        b.load_scope(101);
        b.call();
        b.call_prim(9);
        b.make_closure(2);
        b.make_each(0b0110);
        b.dot(55);
        b.comma(66);
        b.new_list(3);
        b.dup();
        b.swap();
        b.drop_top();
        b.rot();
        b.return_();

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::PushLiteral { idx: 42 },
            Instruction::PushSmi { value: 7 },
            Instruction::LoadLocal { slot: 5 },
            Instruction::StoreLocal { slot: 10 },
            Instruction::LoadVar { idx: 0 },
            Instruction::StoreVar { idx: 3 },
            Instruction::CallWord { name_idx: 100 },
            Instruction::LoadScope { name_idx: 101 },
            Instruction::Call,
            Instruction::CallPrim { idx: 9 },
            Instruction::MakeClosure { fundef_idx: 2 },
            Instruction::MakeEach { mask: 0b0110 },
            Instruction::Dot { name_idx: 55 },
            Instruction::Comma { name_idx: 66 },
            Instruction::NewList { n: 3 },
            Instruction::Dup,
            Instruction::Swap,
            Instruction::DropTop,
            Instruction::Rot,
            Instruction::Return,
        ]);
    }

    #[test]
    fn round_trip_wide() {
        let mut b = BytecodeBuilder::new();
        b.load_local(300);
        b.store_local(1000);
        b.load_var(512);
        b.new_list(400);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::LoadLocal { slot: 300 },
            Instruction::StoreLocal { slot: 1000 },
            Instruction::LoadVar { idx: 512 },
            Instruction::NewList { n: 400 },
        ]);
    }

    #[test]
    fn forward_jump() {
        let mut b = BytecodeBuilder::new();
        b.push_smi(0);
        let label = b.jump_if_false();
        b.push_smi(1);
        b.bind(label);
        b.return_();

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::PushSmi { value: 0 },
            Instruction::JumpIfFalse { offset: 2 },
            Instruction::PushSmi { value: 1 },
            Instruction::Return,
        ]);
    }

    #[test]
    fn jump_advances_decoder_past_skipped_code() {
        let mut b = BytecodeBuilder::new();
        let label = b.jump();
        b.push_smi(11);
        b.push_smi(22);
        b.bind(label);
        b.push_smi(33);
        b.return_();
        let bytes = b.into_bytes();

        let mut d = BytecodeDecoder::new(&bytes);
        match d.decode_next() {
            Some(Instruction::Jump { offset }) => d.advance(offset),
            other => panic!("expected Jump, got {other:?}"),
        }
        assert_eq!(d.decode_next(), Some(Instruction::PushSmi { value: 33 }));
        assert_eq!(d.decode_next(), Some(Instruction::Return));
        assert_eq!(d.decode_next(), None);
    }

    #[test]
    fn display_instructions() {
        assert_eq!(
            Instruction::CallWord { name_idx: 5 }.to_string(),
            "CallWord #5"
        );
        assert_eq!(
            Instruction::JumpIfFalse { offset: 7 }.to_string(),
            "JumpIfFalse +7"
        );
        assert_eq!(
            Instruction::LoadLocal { slot: 2 }.to_string(),
            "LoadLocal l2"
        );
        assert_eq!(Instruction::NewList { n: 4 }.to_string(), "NewList 4");
    }

    #[test]
    fn push_smi_8bit() {
        let mut b = BytecodeBuilder::new();
        b.push_smi(0);
        b.push_smi(127);
        b.push_smi(-128);
        b.push_smi(-1);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::PushSmi { value: 0 },
            Instruction::PushSmi { value: 127 },
            Instruction::PushSmi { value: -128 },
            Instruction::PushSmi { value: -1 },
        ]);
    }

    #[test]
    fn push_smi_8bit_size() {
        let mut b = BytecodeBuilder::new();
        b.push_smi(42);
        assert_eq!(b.as_bytes().len(), 2);
        assert_eq!(b.as_bytes()[0], Op::PushSmi as u8);
    }

    #[test]
    fn push_smi_16bit() {
        let mut b = BytecodeBuilder::new();
        b.push_smi(128);
        b.push_smi(-129);
        b.push_smi(32767);
        b.push_smi(-32768);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::PushSmi { value: 128 },
            Instruction::PushSmi { value: -129 },
            Instruction::PushSmi { value: 32767 },
            Instruction::PushSmi { value: -32768 },
        ]);
    }

    #[test]
    fn push_smi_16bit_size() {
        let mut b = BytecodeBuilder::new();
        b.push_smi(1000);
        assert_eq!(b.as_bytes().len(), 4);
        assert_eq!(b.as_bytes()[0], Op::Wide as u8);
        assert_eq!(b.as_bytes()[1], Op::PushSmi as u8);
    }

    #[test]
    fn push_smi_32bit() {
        let mut b = BytecodeBuilder::new();
        b.push_smi(32768);
        b.push_smi(-32769);
        b.push_smi(i32::MAX);
        b.push_smi(i32::MIN);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::PushSmi { value: 32768 },
            Instruction::PushSmi { value: -32769 },
            Instruction::PushSmi { value: i32::MAX },
            Instruction::PushSmi { value: i32::MIN },
        ]);
    }

    #[test]
    fn push_smi_32bit_size() {
        let mut b = BytecodeBuilder::new();
        b.push_smi(100_000);
        assert_eq!(b.as_bytes().len(), 6);
        assert_eq!(b.as_bytes()[0], Op::ExtraWide as u8);
        assert_eq!(b.as_bytes()[1], Op::PushSmi as u8);
    }

    #[test]
    fn narrow_has_no_wide_prefix() {
        let mut b = BytecodeBuilder::new();
        b.load_local(255);
        let bytes = b.into_bytes();
        assert_eq!(bytes.len(), 2);
        assert_eq!(bytes[0], Op::LoadLocal as u8);
    }

    #[test]
    fn wide_has_prefix() {
        let mut b = BytecodeBuilder::new();
        b.load_local(256);
        let bytes = b.into_bytes();
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes[0], Op::Wide as u8);
        assert_eq!(bytes[1], Op::LoadLocal as u8);
    }
}
