//! The injected instruction catalogue.
//!
//! Machine-instruction metadata is a mechanical table; the subset here
//! covers the common System/370 repertoire with the format, byte length
//! and operand classes the checker needs. The catalogue is immutable and
//! handed to the context by reference at construction.

use std::collections::HashMap;

use crate::checking::CheckClass;
use util::EnumFromStr;
use util_derive::EnumFromStr;

#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
#[allow(clippy::upper_case_acronyms)]
pub enum CaInstr {
    SETA,
    SETB,
    SETC,
    LCLA,
    LCLB,
    LCLC,
    GBLA,
    GBLB,
    GBLC,
    ANOP,
    ACTR,
    AGO,
    AIF,
    MACRO,
    MEND,
    MEXIT,
    AEJECT,
    ASPACE,
    AREAD,
}

impl CaInstr {
    pub fn operandless(self) -> bool {
        matches!(
            self,
            CaInstr::ANOP | CaInstr::MACRO | CaInstr::MEND | CaInstr::MEXIT | CaInstr::AEJECT
        )
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
#[allow(clippy::upper_case_acronyms)]
pub enum AsmInstr {
    CSECT,
    DSECT,
    RSECT,
    COM,
    LOCTR,
    EQU,
    DC,
    DS,
    ORG,
    OPSYN,
    COPY,
    MNOTE,
    TITLE,
    EJECT,
    SPACE,
    PRINT,
    START,
    END,
    USING,
    DROP,
    LTORG,
    ENTRY,
    EXTRN,
    WXTRN,
    PUSH,
    POP,
    AMODE,
    RMODE,
    CNOP,
    ICTL,
    ISEQ,
    PUNCH,
    REPRO,
    ALIAS,
    CEJECT,
    CXD,
    DXD,
    EXITCTL,
    ACONTROL,
    ADATA,
    AINSERT,
    CATTR,
    CCW,
    CCW0,
    CCW1,
    XATTR,
}

impl AsmInstr {
    /// (minimum, maximum) operand count; -1 means unbounded.
    pub fn operand_bounds(self) -> (i32, i32) {
        use AsmInstr::*;
        match self {
            CSECT | DSECT | RSECT | COM | LOCTR | LTORG | CXD | EJECT | REPRO => (0, 0),
            EQU => (1, 5),
            DC | DS | DXD => (1, -1),
            ORG => (0, 3),
            OPSYN => (0, 1),
            COPY | TITLE | PUNCH | ALIAS | AMODE | RMODE => (1, 1),
            MNOTE => (1, 2),
            SPACE | CEJECT | START => (0, 1),
            PRINT | ENTRY | EXTRN | WXTRN | ACONTROL | CATTR | XATTR => (1, -1),
            END => (0, 2),
            USING => (2, -1),
            DROP => (0, -1),
            PUSH | POP => (1, 4),
            CNOP => (2, 2),
            ICTL => (1, 3),
            ISEQ => (0, 2),
            EXITCTL => (2, 5),
            ADATA => (5, 5),
            AINSERT => (2, 2),
            CCW | CCW0 | CCW1 => (4, 4),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum MachFormat {
    E,
    I,
    RR,
    RRE,
    RX,
    RI,
    RIL,
    RS,
    SI,
    S,
    SS,
}

impl MachFormat {
    pub fn length(self) -> u16 {
        match self {
            MachFormat::E | MachFormat::RR | MachFormat::I => 2,
            MachFormat::RRE
            | MachFormat::RX
            | MachFormat::RI
            | MachFormat::RS
            | MachFormat::SI
            | MachFormat::S => 4,
            MachFormat::RIL | MachFormat::SS => 6,
        }
    }

    pub fn operands(self) -> &'static [CheckClass] {
        use CheckClass::*;
        match self {
            MachFormat::E => &[],
            MachFormat::I => &[ImmediateUnsigned(8)],
            MachFormat::RR | MachFormat::RRE => &[Register, Register],
            MachFormat::RX => &[Register, Address],
            MachFormat::RI => &[Register, ImmediateSigned(16)],
            MachFormat::RIL => &[Register, RelAddr],
            MachFormat::RS => &[Register, Register, Address],
            MachFormat::SI => &[Address, ImmediateUnsigned(8)],
            MachFormat::S => &[Address],
            MachFormat::SS => &[Address, Address],
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MachineInstruction {
    pub name: &'static str,
    pub format: MachFormat,
}

impl MachineInstruction {
    pub fn length(&self) -> u16 {
        self.format.length()
    }
}

/// A mnemonic stands for a machine instruction with one operand encoded
/// into the opcode (condition masks of BC/BCR mostly).
#[derive(Clone, Copy, Debug)]
pub struct MnemonicCode {
    pub name: &'static str,
    pub base: &'static str,
    pub operands: &'static [CheckClass],
}

macro_rules! mach {
    ($name:literal, $format:ident) => {
        MachineInstruction {
            name: $name,
            format: MachFormat::$format,
        }
    };
}

#[rustfmt::skip]
const MACHINE_INSTRUCTIONS: &[MachineInstruction] = &[
    // RR
    mach!("LR", RR), mach!("AR", RR), mach!("SR", RR), mach!("MR", RR),
    mach!("DR", RR), mach!("CR", RR), mach!("NR", RR), mach!("OR", RR),
    mach!("XR", RR), mach!("ALR", RR), mach!("SLR", RR), mach!("LTR", RR),
    mach!("LCR", RR), mach!("LNR", RR), mach!("LPR", RR), mach!("BCR", RR),
    mach!("BALR", RR), mach!("BASR", RR), mach!("BCTR", RR), mach!("MVCL", RR),
    mach!("CLCL", RR), mach!("SPM", RR),
    // RX
    mach!("L", RX), mach!("ST", RX), mach!("LA", RX), mach!("A", RX),
    mach!("S", RX), mach!("M", RX), mach!("D", RX), mach!("C", RX),
    mach!("N", RX), mach!("O", RX), mach!("X", RX), mach!("AL", RX),
    mach!("SL", RX), mach!("IC", RX), mach!("STC", RX), mach!("LH", RX),
    mach!("STH", RX), mach!("AH", RX), mach!("SH", RX), mach!("CH", RX),
    mach!("MH", RX), mach!("EX", RX), mach!("BAL", RX), mach!("BAS", RX),
    mach!("BC", RX), mach!("BCT", RX), mach!("CL", RX), mach!("CVB", RX),
    mach!("CVD", RX), mach!("LRA", RX),
    mach!("LD", RX), mach!("STD", RX), mach!("LE", RX), mach!("STE", RX),
    mach!("AD", RX), mach!("SD", RX), mach!("MD", RX), mach!("DD", RX),
    mach!("AE", RX), mach!("SE", RX), mach!("ME", RX), mach!("DE", RX),
    // RI
    mach!("AHI", RI), mach!("MHI", RI), mach!("LHI", RI), mach!("CHI", RI),
    mach!("BRC", RI), mach!("BRAS", RI), mach!("BRCT", RI),
    // RIL
    mach!("LARL", RIL), mach!("BRCL", RIL), mach!("BRASL", RIL),
    // RS
    mach!("LM", RS), mach!("STM", RS), mach!("BXH", RS), mach!("BXLE", RS),
    mach!("CS", RS), mach!("CDS", RS), mach!("CLM", RS), mach!("ICM", RS),
    mach!("STCM", RS),
    // RS shifts take two operands only.
    mach!("SLL", RX), mach!("SRL", RX), mach!("SLA", RX), mach!("SRA", RX),
    mach!("SLDL", RX), mach!("SRDL", RX), mach!("SLDA", RX), mach!("SRDA", RX),
    // SI
    mach!("CLI", SI), mach!("MVI", SI), mach!("NI", SI), mach!("OI", SI),
    mach!("XI", SI), mach!("TM", SI),
    // S
    mach!("LPSW", S), mach!("TS", S), mach!("SSM", S),
    // I
    mach!("SVC", I),
    // SS
    mach!("MVC", SS), mach!("CLC", SS), mach!("NC", SS), mach!("OC", SS),
    mach!("XC", SS), mach!("TR", SS), mach!("TRT", SS), mach!("ED", SS),
    mach!("EDMK", SS), mach!("PACK", SS), mach!("UNPK", SS), mach!("MVN", SS),
    mach!("MVZ", SS), mach!("MVO", SS),
    mach!("AP", SS), mach!("SP", SS), mach!("MP", SS), mach!("DP", SS),
    mach!("ZAP", SS), mach!("CP", SS), mach!("SRP", SS),
];

const BRANCH_ADDR: &[CheckClass] = &[CheckClass::Address];
const BRANCH_REG: &[CheckClass] = &[CheckClass::Register];

macro_rules! mnemo {
    ($name:literal, $base:literal, $ops:expr) => {
        MnemonicCode {
            name: $name,
            base: $base,
            operands: $ops,
        }
    };
}

#[rustfmt::skip]
const MNEMONIC_CODES: &[MnemonicCode] = &[
    mnemo!("B", "BC", BRANCH_ADDR), mnemo!("NOP", "BC", BRANCH_ADDR),
    mnemo!("BH", "BC", BRANCH_ADDR), mnemo!("BL", "BC", BRANCH_ADDR),
    mnemo!("BE", "BC", BRANCH_ADDR), mnemo!("BNH", "BC", BRANCH_ADDR),
    mnemo!("BNL", "BC", BRANCH_ADDR), mnemo!("BNE", "BC", BRANCH_ADDR),
    mnemo!("BO", "BC", BRANCH_ADDR), mnemo!("BP", "BC", BRANCH_ADDR),
    mnemo!("BM", "BC", BRANCH_ADDR), mnemo!("BZ", "BC", BRANCH_ADDR),
    mnemo!("BNP", "BC", BRANCH_ADDR), mnemo!("BNM", "BC", BRANCH_ADDR),
    mnemo!("BNZ", "BC", BRANCH_ADDR), mnemo!("BNO", "BC", BRANCH_ADDR),
    mnemo!("BR", "BCR", BRANCH_REG), mnemo!("NOPR", "BCR", BRANCH_REG),
    mnemo!("BHR", "BCR", BRANCH_REG), mnemo!("BLR", "BCR", BRANCH_REG),
    mnemo!("BER", "BCR", BRANCH_REG), mnemo!("BNHR", "BCR", BRANCH_REG),
    mnemo!("BNLR", "BCR", BRANCH_REG), mnemo!("BNER", "BCR", BRANCH_REG),
    mnemo!("BOR", "BCR", BRANCH_REG), mnemo!("BPR", "BCR", BRANCH_REG),
    mnemo!("BMR", "BCR", BRANCH_REG), mnemo!("BZR", "BCR", BRANCH_REG),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrKind {
    Machine(u16),
    Mnemonic(u16),
    Assembler(AsmInstr),
    Ca(CaInstr),
}

#[derive(Debug)]
pub struct InstructionSet {
    by_name: HashMap<&'static str, InstrKind>,
}

impl InstructionSet {
    pub fn new() -> InstructionSet {
        let mut by_name = HashMap::new();
        for (index, instr) in MACHINE_INSTRUCTIONS.iter().enumerate() {
            by_name.insert(instr.name, InstrKind::Machine(index as u16));
        }
        for (index, mnemo) in MNEMONIC_CODES.iter().enumerate() {
            by_name.insert(mnemo.name, InstrKind::Mnemonic(index as u16));
        }
        for name in ASM_NAMES {
            if let Ok(asm) = <AsmInstr as EnumFromStr>::from_str(name) {
                by_name.insert(name, InstrKind::Assembler(asm));
            }
        }
        for name in CA_NAMES {
            if let Ok(ca) = <CaInstr as EnumFromStr>::from_str(name) {
                by_name.insert(name, InstrKind::Ca(ca));
            }
        }
        InstructionSet { by_name }
    }

    /// Case-folded lookup; the caller passes the interned (uppercase)
    /// spelling.
    pub fn lookup(&self, name: &str) -> Option<InstrKind> {
        self.by_name.get(name).copied()
    }

    pub fn machine(&self, index: u16) -> &'static MachineInstruction {
        &MACHINE_INSTRUCTIONS[index as usize]
    }

    pub fn mnemonic(&self, index: u16) -> &'static MnemonicCode {
        &MNEMONIC_CODES[index as usize]
    }

    /// Byte length of a machine or extended mnemonic instruction.
    pub fn instr_length(&self, kind: InstrKind) -> u16 {
        match kind {
            InstrKind::Machine(index) => self.machine(index).length(),
            InstrKind::Mnemonic(index) => {
                let base = self.mnemonic(index).base;
                match self.lookup(base) {
                    Some(InstrKind::Machine(machine)) => self.machine(machine).length(),
                    _ => 4,
                }
            }
            _ => 0,
        }
    }

    pub fn completion_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_name.keys().copied()
    }
}

impl Default for InstructionSet {
    fn default() -> Self {
        InstructionSet::new()
    }
}

const ASM_NAMES: &[&str] = &[
    "CSECT", "DSECT", "RSECT", "COM", "LOCTR", "EQU", "DC", "DS", "ORG", "OPSYN", "COPY", "MNOTE",
    "TITLE", "EJECT", "SPACE", "PRINT", "START", "END", "USING", "DROP", "LTORG", "ENTRY", "EXTRN",
    "WXTRN", "PUSH", "POP", "AMODE", "RMODE", "CNOP", "ICTL", "ISEQ", "PUNCH", "REPRO", "ALIAS",
    "CEJECT", "CXD", "DXD", "EXITCTL", "ACONTROL", "ADATA", "AINSERT", "CATTR", "CCW", "CCW0",
    "CCW1", "XATTR",
];

const CA_NAMES: &[&str] = &[
    "SETA", "SETB", "SETC", "LCLA", "LCLB", "LCLC", "GBLA", "GBLB", "GBLC", "ANOP", "ACTR", "AGO",
    "AIF", "MACRO", "MEND", "MEXIT", "AEJECT", "ASPACE", "AREAD",
];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_covers_all_layers() {
        let set = InstructionSet::new();
        assert!(matches!(set.lookup("LR"), Some(InstrKind::Machine(_))));
        assert!(matches!(set.lookup("B"), Some(InstrKind::Mnemonic(_))));
        assert_eq!(
            set.lookup("EQU"),
            Some(InstrKind::Assembler(AsmInstr::EQU))
        );
        assert_eq!(set.lookup("SETA"), Some(InstrKind::Ca(CaInstr::SETA)));
        assert_eq!(set.lookup("NOSUCH"), None);
    }

    #[test]
    fn machine_lengths_follow_format() {
        let set = InstructionSet::new();
        let lr = match set.lookup("LR") {
            Some(InstrKind::Machine(i)) => set.machine(i),
            _ => unreachable!(),
        };
        assert_eq!(lr.length(), 2);
        let mvc = match set.lookup("MVC") {
            Some(InstrKind::Machine(i)) => set.machine(i),
            _ => unreachable!(),
        };
        assert_eq!(mvc.length(), 6);
    }

    #[test]
    fn mnemonic_length_comes_from_base() {
        let set = InstructionSet::new();
        let b = set.lookup("B").unwrap();
        assert_eq!(set.instr_length(b), 4);
        let br = set.lookup("BR").unwrap();
        assert_eq!(set.instr_length(br), 2);
    }
}
