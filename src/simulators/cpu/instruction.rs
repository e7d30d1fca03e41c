use crate::definitions::Word;
use crate::error::{SimError, SimResult};

use std::fmt;

/// All 28 valid ALU computations of the Hack ISA.
///
/// The discriminants are the 7-bit `a cccccc` field taken from bits 12..6
/// of a C-instruction, so decoding is a table lookup plus a cast.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum Computation {
    // a=0 computations (operand is the A register)
    Zero = 0b0101010,
    One = 0b0111111,
    NegOne = 0b0111010,
    D = 0b0001100,
    A = 0b0110000,
    NotD = 0b0001101,
    NotA = 0b0110001,
    NegD = 0b0001111,
    NegA = 0b0110011,
    DPlus1 = 0b0011111,
    APlus1 = 0b0110111,
    DMinus1 = 0b0001110,
    AMinus1 = 0b0110010,
    DPlusA = 0b0000010,
    DMinusA = 0b0010011,
    AMinusD = 0b0000111,
    DAndA = 0b0000000,
    DOrA = 0b0010101,

    // a=1 computations (operand is M = RAM[A])
    M = 0b1110000,
    NotM = 0b1110001,
    NegM = 0b1110011,
    MPlus1 = 0b1110111,
    MMinus1 = 0b1110010,
    DPlusM = 0b1000010,
    DMinusM = 0b1010011,
    MMinusD = 0b1000111,
    DAndM = 0b1000000,
    DOrM = 0b1010101,
}

impl Computation {
    pub fn from_bits(bits: u8) -> Option<Self> {
        use Computation::*;
        let comp = match bits {
            0b0101010 => Zero,
            0b0111111 => One,
            0b0111010 => NegOne,
            0b0001100 => D,
            0b0110000 => A,
            0b0001101 => NotD,
            0b0110001 => NotA,
            0b0001111 => NegD,
            0b0110011 => NegA,
            0b0011111 => DPlus1,
            0b0110111 => APlus1,
            0b0001110 => DMinus1,
            0b0110010 => AMinus1,
            0b0000010 => DPlusA,
            0b0010011 => DMinusA,
            0b0000111 => AMinusD,
            0b0000000 => DAndA,
            0b0010101 => DOrA,
            0b1110000 => M,
            0b1110001 => NotM,
            0b1110011 => NegM,
            0b1110111 => MPlus1,
            0b1110010 => MMinus1,
            0b1000010 => DPlusM,
            0b1010011 => DMinusM,
            0b1000111 => MMinusD,
            0b1000000 => DAndM,
            0b1010101 => DOrM,
            _ => return None,
        };
        Some(comp)
    }

    pub fn bits(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for Computation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Computation::*;
        let s = match self {
            Zero => "0",
            One => "1",
            NegOne => "-1",
            D => "D",
            A => "A",
            NotD => "!D",
            NotA => "!A",
            NegD => "-D",
            NegA => "-A",
            DPlus1 => "D+1",
            APlus1 => "A+1",
            DMinus1 => "D-1",
            AMinus1 => "A-1",
            DPlusA => "D+A",
            DMinusA => "D-A",
            AMinusD => "A-D",
            DAndA => "D&A",
            DOrA => "D|A",
            M => "M",
            NotM => "!M",
            NegM => "-M",
            MPlus1 => "M+1",
            MMinus1 => "M-1",
            DPlusM => "D+M",
            DMinusM => "D-M",
            MMinusD => "M-D",
            DAndM => "D&M",
            DOrM => "D|M",
        };
        write!(f, "{}", s)
    }
}

/// Where to store the ALU result. Multiple destinations can be active.
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone)]
pub struct Destination {
    pub a: bool, // d1 (bit 5)
    pub d: bool, // d2 (bit 4)
    pub m: bool, // d3 (bit 3)
}

impl Destination {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            a: bits & 0b100 != 0,
            d: bits & 0b010 != 0,
            m: bits & 0b001 != 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.a || self.d || self.m)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.a {
            write!(f, "A")?;
        }
        if self.d {
            write!(f, "D")?;
        }
        if self.m {
            write!(f, "M")?;
        }
        Ok(())
    }
}

/// The jjj bits: j1 = out < 0, j2 = out == 0, j3 = out > 0.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum JumpCondition {
    NoJump = 0b000,
    Jgt = 0b001,
    Jeq = 0b010,
    Jge = 0b011,
    Jlt = 0b100,
    Jne = 0b101,
    Jle = 0b110,
    Jmp = 0b111,
}

impl JumpCondition {
    pub fn from_bits(bits: u8) -> Self {
        use JumpCondition::*;
        match bits & 0b111 {
            0b000 => NoJump,
            0b001 => Jgt,
            0b010 => Jeq,
            0b011 => Jge,
            0b100 => Jlt,
            0b101 => Jne,
            0b110 => Jle,
            _ => Jmp,
        }
    }

    /// Evaluate the condition on the ALU output interpreted as signed 16-bit.
    pub fn taken(&self, alu_output: Word) -> bool {
        let bits = *self as u8;
        if bits == 0 {
            return false;
        }
        if bits == 0b111 {
            return true;
        }

        let value = alu_output as i16;
        (value < 0 && bits & 0b100 != 0)
            || (value == 0 && bits & 0b010 != 0)
            || (value > 0 && bits & 0b001 != 0)
    }
}

impl fmt::Display for JumpCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use JumpCondition::*;
        let s = match self {
            NoJump => "",
            Jgt => "JGT",
            Jeq => "JEQ",
            Jge => "JGE",
            Jlt => "JLT",
            Jne => "JNE",
            Jle => "JLE",
            Jmp => "JMP",
        };
        write!(f, "{}", s)
    }
}

/// A decoded Hack instruction.
///
/// Used for disassembly and load-time validation; the execution hot loop in
/// the engine extracts bits inline instead.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Instruction {
    /// `@value` with the 15-bit immediate
    A(Word),
    C {
        comp: Computation,
        dest: Destination,
        jump: JumpCondition,
        /// true if comp uses M (the a-bit)
        reads_memory: bool,
    },
}

pub fn is_valid_comp(bits: u8) -> bool {
    Computation::from_bits(bits).is_some()
}

/// Fast decode; invalid comp codes come back as `None` in the C field.
pub fn decode(word: Word) -> Option<Instruction> {
    if word & 0x8000 == 0 {
        return Some(Instruction::A(word & 0x7FFF));
    }

    let comp_bits = ((word >> 6) & 0x7F) as u8;
    let comp = Computation::from_bits(comp_bits)?;

    Some(Instruction::C {
        comp,
        dest: Destination::from_bits(((word >> 3) & 0x7) as u8),
        jump: JumpCondition::from_bits((word & 0x7) as u8),
        reads_memory: comp_bits & 0x40 != 0,
    })
}

/// Decode with validation; invalid comp codes are parse errors naming the
/// ROM source and the offending bit pattern.
pub fn decode_checked(word: Word) -> SimResult<Instruction> {
    decode(word).ok_or_else(|| {
        let comp_bits = (word >> 6) & 0x7F;
        SimError::parse(
            "<rom>",
            0,
            format!(
                "Invalid ALU computation code 0b{:07b} in instruction word {}. \
                 This is not a valid Hack C-instruction computation.",
                comp_bits, word
            ),
        )
    })
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instruction::A(value) => write!(f, "@{}", value),
            Instruction::C {
                comp, dest, jump, ..
            } => {
                if !dest.is_empty() {
                    write!(f, "{}=", dest)?;
                }
                write!(f, "{}", comp)?;
                if *jump != JumpCondition::NoJump {
                    write!(f, ";{}", jump)?;
                }
                Ok(())
            }
        }
    }
}

/// Disassemble a raw instruction word; unknown comp codes render as `???`.
pub fn disassemble(word: Word) -> String {
    match decode(word) {
        Some(instr) => instr.to_string(),
        None => "???".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_a_instruction_boundaries() {
        assert_eq!(Some(Instruction::A(0)), decode(0x0000));
        assert_eq!(Some(Instruction::A(5)), decode(0x0005));
        assert_eq!(Some(Instruction::A(32767)), decode(0x7FFF));
    }

    #[test]
    fn test_decode_c_instruction_fields() {
        // D=A  is 1110110000010000
        let instr = decode(0b1110_1100_0001_0000).unwrap();
        assert_eq!(
            Instruction::C {
                comp: Computation::A,
                dest: Destination {
                    a: false,
                    d: true,
                    m: false
                },
                jump: JumpCondition::NoJump,
                reads_memory: false,
            },
            instr
        );

        // D=M reads memory
        let instr = decode(0b1111_1100_0001_0000).unwrap();
        match instr {
            Instruction::C {
                comp, reads_memory, ..
            } => {
                assert_eq!(Computation::M, comp);
                assert!(reads_memory);
            }
            _ => panic!("expected C instruction"),
        }
    }

    #[test]
    fn test_exactly_28_comp_patterns_are_valid() {
        let valid = (0u8..128).filter(|&bits| is_valid_comp(bits)).count();
        assert_eq!(28, valid);
    }

    #[test]
    fn test_decode_checked_rejects_invalid_comp() {
        // comp bits 0b1111111 are not a valid computation
        let word = 0b1111_1111_1100_0000;
        let result = decode_checked(word);
        match result {
            Err(SimError::Parse { file, message, .. }) => {
                assert_eq!("<rom>", file);
                assert!(message.contains("0b1111111"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_disassembly_canonical_forms() {
        assert_eq!("@42", disassemble(42));
        assert_eq!("D=A", disassemble(0b1110_1100_0001_0000));
        assert_eq!("0;JMP", disassemble(0b1110_1010_1000_0111));
        assert_eq!("D;JGT", disassemble(0b1110_0011_0000_0001));
        // all three destinations in fixed A,D,M order
        assert_eq!("ADM=D+1", disassemble(0b1110_0111_1111_1000));
    }

    #[test]
    fn test_jump_conditions_are_signed() {
        // -1 as ALU output
        assert!(JumpCondition::Jlt.taken(0xFFFF));
        assert!(!JumpCondition::Jgt.taken(0xFFFF));
        assert!(JumpCondition::Jne.taken(0xFFFF));
        assert!(JumpCondition::Jle.taken(0));
        assert!(JumpCondition::Jeq.taken(0));
        assert!(JumpCondition::Jgt.taken(1));
        assert!(!JumpCondition::NoJump.taken(0));
        assert!(JumpCondition::Jmp.taken(0x8000));
    }

    proptest! {
        #[test]
        fn prop_a_instruction_value_round_trips(value in 0u16..=32767) {
            prop_assert_eq!(Some(Instruction::A(value)), decode(value));
        }

        #[test]
        fn prop_c_instruction_disassembly_is_stable(word in 0x8000u16..=0xFFFF) {
            // decode -> display -> fields survive: the textual form encodes
            // exactly the comp/dest/jump triple
            if let Some(Instruction::C { comp, dest, jump, .. }) = decode(word) {
                let text = disassemble(word);
                let mut expected = String::new();
                if !dest.is_empty() {
                    expected.push_str(&format!("{}=", dest));
                }
                expected.push_str(&comp.to_string());
                if jump != JumpCondition::NoJump {
                    expected.push_str(&format!(";{}", jump));
                }
                prop_assert_eq!(expected, text);
            }
        }
    }
}
