use thiserror::Error;

use crate::{
    air::{basic_block::BasicBlockId, opcode::Opcode, tmp::Tmp},
    bank::Bank,
    jit::reg::Reg,
};

/// Errors reported before or during register allocation.
///
/// Everything here is caused by malformed input `Code` or by a procedure that the allocator could
/// not bring to a fixpoint. Broken allocator invariants are bugs and panic instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AirError {
    #[error("{block} has successor {successor}, which does not exist")]
    UnknownSuccessor {
        block: BasicBlockId,
        successor: BasicBlockId,
    },

    #[error("{block} does not end with a terminal")]
    MissingTerminal { block: BasicBlockId },

    #[error("{block} has a terminal at instruction {index} that is not the last instruction")]
    TerminalNotAtEnd { block: BasicBlockId, index: usize },

    #[error("{block}, instruction {index}: {opcode} has no form with {num_args} operands")]
    InvalidForm {
        block: BasicBlockId,
        index: usize,
        opcode: Opcode,
        num_args: usize,
    },

    #[error("{block}, instruction {index}: operand {operand} is invalid")]
    InvalidOperand {
        block: BasicBlockId,
        index: usize,
        operand: usize,
    },

    #[error("{block}, instruction {index}: operand {operand} is a {found} tmp where {expected} is required")]
    BankMismatch {
        block: BasicBlockId,
        index: usize,
        operand: usize,
        expected: Bank,
        found: Bank,
    },

    #[error("{tmp} is out of range, the procedure only has {num_tmps} {bank} tmps")]
    UnknownTmp { tmp: Tmp, bank: Bank, num_tmps: usize },

    #[error("stack slot {index} does not exist")]
    UnknownStackSlot { index: usize },

    #[error("register {reg} cannot be used for {bank} allocation")]
    RegisterBankMismatch { reg: Reg, bank: Bank },

    #[error("register {reg} is listed more than once for {bank} allocation")]
    DuplicateRegister { reg: Reg, bank: Bank },

    #[error("{bank} has tmps but no allocatable registers")]
    NoRegisters { bank: Bank },

    #[error("{bank} allocation did not converge after {iterations} iterations")]
    NoFixpoint { bank: Bank, iterations: usize },
}

pub type Result<T> = std::result::Result<T, AirError>;
