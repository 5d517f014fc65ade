use crate::{bank::Bank, width::Width};

use super::arg::ArgRole;

/// Operand form: the role, bank and width of each operand position.
pub type Form = &'static [(ArgRole, Bank, Width)];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Opcode {
    Nop,

    Move,
    Move32,
    MoveFloat,
    MoveDouble,
    MoveVector,

    Add32,
    Add64,
    Sub64,
    Mul64,
    And64,
    Or64,
    Xor64,
    Lshift64,

    AddDouble,
    SubDouble,
    MulDouble,

    Compare64,

    /// Variadic: operand 0 is the callee, the rest are arguments.
    Call,

    Jump,
    Branch64,
    BranchAdd64,
    Ret64,
    RetDouble,
    #[default]
    Oops,
}

use ArgRole::*;
use Bank::{FP, GP};
use Width::{W128, W32, W64};

const NO_OPERANDS: Form = &[];

macro_rules! move_forms {
    ($bank: ident, $width: ident, $def: ident) => {
        (
            &[(Use, $bank, $width), ($def, $bank, $width)],
            &[(Use, $bank, $width), ($def, $bank, $width), (Scratch, $bank, $width)],
        )
    };
}

macro_rules! arith_forms {
    ($bank: ident, $width: ident, $use_def: ident, $def: ident) => {
        (
            &[(Use, $bank, $width), ($use_def, $bank, $width)],
            &[(Use, $bank, $width), (Use, $bank, $width), ($def, $bank, $width)],
        )
    };
}

const MOVE: (Form, Form) = move_forms!(GP, W64, Def);
const MOVE32: (Form, Form) = move_forms!(GP, W32, ZDef);
const MOVE_FLOAT: (Form, Form) = move_forms!(FP, W32, Def);
const MOVE_DOUBLE: (Form, Form) = move_forms!(FP, W64, Def);
const MOVE_VECTOR: (Form, Form) = move_forms!(FP, W128, Def);

const ARITH32: (Form, Form) = arith_forms!(GP, W32, UseZDef, ZDef);
const ARITH64: (Form, Form) = arith_forms!(GP, W64, UseDef, Def);
const ARITH_DOUBLE: (Form, Form) = arith_forms!(FP, W64, UseDef, Def);

const COMPARE64: Form = &[(Use, GP, W64), (Use, GP, W64), (ZDef, GP, W32)];
const BRANCH64: Form = &[(Use, GP, W64), (Use, GP, W64)];
const BRANCH_ADD64: Form = &[(Use, GP, W64), (UseDef, GP, W64)];
const RET64: Form = &[(Use, GP, W64)];
const RET_DOUBLE: Form = &[(Use, FP, W64)];

impl Opcode {
    /// The operand form for `num_args` operands, if the opcode has one. `Call` is variadic and has
    /// no entry here.
    pub fn form(self, num_args: usize) -> Option<Form> {
        let pair = |forms: (Form, Form)| match num_args {
            2 => Some(forms.0),
            3 => Some(forms.1),
            _ => None,
        };

        match self {
            Opcode::Nop | Opcode::Jump | Opcode::Oops => (num_args == 0).then_some(NO_OPERANDS),
            Opcode::Move => pair(MOVE),
            Opcode::Move32 => pair(MOVE32),
            Opcode::MoveFloat => pair(MOVE_FLOAT),
            Opcode::MoveDouble => pair(MOVE_DOUBLE),
            Opcode::MoveVector => pair(MOVE_VECTOR),
            Opcode::Add32 => pair(ARITH32),
            Opcode::Add64
            | Opcode::Sub64
            | Opcode::Mul64
            | Opcode::And64
            | Opcode::Or64
            | Opcode::Xor64
            | Opcode::Lshift64 => pair(ARITH64),
            Opcode::AddDouble | Opcode::SubDouble | Opcode::MulDouble => pair(ARITH_DOUBLE),
            Opcode::Compare64 => (num_args == 3).then_some(COMPARE64),
            Opcode::Branch64 => (num_args == 2).then_some(BRANCH64),
            Opcode::BranchAdd64 => (num_args == 2).then_some(BRANCH_ADD64),
            Opcode::Ret64 => (num_args == 1).then_some(RET64),
            Opcode::RetDouble => (num_args == 1).then_some(RET_DOUBLE),
            Opcode::Call => None,
        }
    }

    pub fn is_valid_form(self, num_args: usize) -> bool {
        match self {
            Opcode::Call => num_args >= 1,
            _ => self.form(num_args).is_some(),
        }
    }

    pub fn is_move(self) -> bool {
        matches!(
            self,
            Opcode::Move | Opcode::Move32 | Opcode::MoveFloat | Opcode::MoveDouble | Opcode::MoveVector
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::Branch64
                | Opcode::BranchAdd64
                | Opcode::Ret64
                | Opcode::RetDouble
                | Opcode::Oops
        )
    }

    pub fn is_two_operand_arith(self) -> bool {
        matches!(
            self,
            Opcode::Add32
                | Opcode::Add64
                | Opcode::Sub64
                | Opcode::Mul64
                | Opcode::And64
                | Opcode::Or64
                | Opcode::Xor64
                | Opcode::Lshift64
                | Opcode::AddDouble
                | Opcode::SubDouble
                | Opcode::MulDouble
        )
    }

    /// Arithmetic whose operands can be swapped, which makes both sources candidates for sharing
    /// a register with the destination of the three-operand form.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Opcode::Add32
                | Opcode::Add64
                | Opcode::Mul64
                | Opcode::And64
                | Opcode::Or64
                | Opcode::Xor64
                | Opcode::AddDouble
                | Opcode::MulDouble
        )
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
