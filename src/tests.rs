use std::collections::HashMap;

use proptest::prelude::*;

use crate::{
    air::{
        arg::Arg,
        basic_block::{BasicBlockId, Frequency},
        code::Code,
        graph_coloring::{
            briggs::Briggs,
            coloring::{ColoringCore, ColoringStrategy},
            irc::Irc,
        },
        inst::Inst,
        opcode::Opcode,
        stack_slot::{StackSlotId, StackSlotKind},
        tmp::Tmp,
        use_counts::UseCounts,
    },
    allocate_registers_by_graph_coloring,
    bank::Bank,
    jit::{
        reg::Reg,
        register_set::{PreservedWidth, RegisterSet},
    },
    utils::{bitvector::BitVector, interference_graph::SmallInterferenceGraph},
    AirError, AllocatorKind, GraphColoringStats, Options,
};

const LOW_32_BITS: u64 = 0xffff_ffff;

/// A tiny interpreter for the opcodes the allocator tests use. Running a program before and after
/// allocation and comparing the results checks the allocation without trusting the allocator's
/// own view of liveness.
struct Machine {
    values: HashMap<Tmp, u64>,
    slots: HashMap<StackSlotId, u64>,
    next_garbage: u64,
}

impl Machine {
    fn new(inputs: &[(Reg, u64)]) -> Self {
        let mut this = Self {
            values: HashMap::new(),
            slots: HashMap::new(),
            next_garbage: 0xbad0_0000_0000,
        };

        // Registers that are not inputs hold junk, so reading one that was never written shows up
        // as a wrong result.
        for index in 0..32 {
            let gpr = this.garbage();
            this.values.insert(Tmp::from_reg(Reg::new_gpr(index)), gpr);
            let fpr = this.garbage();
            this.values.insert(Tmp::from_reg(Reg::new_fpr(index)), fpr);
        }
        for &(reg, value) in inputs {
            this.values.insert(Tmp::from_reg(reg), value);
        }

        this
    }

    fn garbage(&mut self) -> u64 {
        self.next_garbage += 0x1_0001;
        self.next_garbage
    }

    fn read(&self, arg: &Arg) -> u64 {
        if arg.is_tmp() {
            let tmp = arg.as_tmp();
            return *self
                .values
                .get(&tmp)
                .unwrap_or_else(|| panic!("{} is read before it is written", tmp));
        }
        if arg.is_some_imm() {
            return arg.value() as u64;
        }
        if arg.is_stack() {
            return *self
                .slots
                .get(&arg.stack_slot())
                .unwrap_or_else(|| panic!("{} is read before it is written", arg));
        }
        panic!("cannot read {}", arg);
    }

    fn write(&mut self, arg: &Arg, value: u64) {
        if arg.is_tmp() {
            self.values.insert(arg.as_tmp(), value);
        } else if arg.is_stack() {
            self.slots.insert(arg.stack_slot(), value);
        } else {
            panic!("cannot write {}", arg);
        }
    }

    fn clobber(&mut self, regs: &RegisterSet) {
        regs.for_each_with_width_and_preserved(|reg, _, preserved| {
            if preserved == PreservedWidth::PreservesNothing {
                let junk = self.garbage();
                self.values.insert(Tmp::from_reg(reg), junk);
            }
        });
    }

    fn binary(&mut self, inst: &Inst, op: impl Fn(u64, u64) -> u64) {
        let args = &inst.args;
        if args.len() == 2 {
            // Two operand forms read and write their second operand.
            let result = op(self.read(&args[1]), self.read(&args[0]));
            self.write(&args[1], result);
        } else {
            let result = op(self.read(&args[0]), self.read(&args[1]));
            self.write(&args[2], result);
        }
    }

    fn double(op: impl Fn(f64, f64) -> f64) -> impl Fn(u64, u64) -> u64 {
        move |a, b| op(f64::from_bits(a), f64::from_bits(b)).to_bits()
    }

    fn run(&mut self, code: &Code) -> u64 {
        let mut block = BasicBlockId(0);
        for _ in 0..10_000 {
            let successors = &code.block(block).successors;
            let successor = |index: usize| successors[index].0;

            for inst in code.block(block).insts.iter() {
                let args = &inst.args;
                match inst.opcode {
                    Opcode::Nop => {}
                    Opcode::Move | Opcode::MoveDouble | Opcode::MoveVector => {
                        let value = self.read(&args[0]);
                        self.write(&args[1], value);
                    }
                    Opcode::Move32 | Opcode::MoveFloat => {
                        let value = self.read(&args[0]) & LOW_32_BITS;
                        self.write(&args[1], value);
                    }
                    Opcode::Add32 => self.binary(inst, |a, b| a.wrapping_add(b) & LOW_32_BITS),
                    Opcode::Add64 => self.binary(inst, u64::wrapping_add),
                    Opcode::Sub64 => self.binary(inst, u64::wrapping_sub),
                    Opcode::Mul64 => self.binary(inst, u64::wrapping_mul),
                    Opcode::And64 => self.binary(inst, |a, b| a & b),
                    Opcode::Or64 => self.binary(inst, |a, b| a | b),
                    Opcode::Xor64 => self.binary(inst, |a, b| a ^ b),
                    Opcode::Lshift64 => self.binary(inst, |a, b| a << (b & 63)),
                    Opcode::AddDouble => self.binary(inst, Self::double(|a, b| a + b)),
                    Opcode::SubDouble => self.binary(inst, Self::double(|a, b| a - b)),
                    Opcode::MulDouble => self.binary(inst, Self::double(|a, b| a * b)),
                    Opcode::Compare64 => {
                        let result = (self.read(&args[0]) == self.read(&args[1])) as u64;
                        self.write(&args[2], result);
                    }
                    Opcode::Call => {
                        self.clobber(&inst.extra_early_clobbered_regs);
                        for arg in args.iter() {
                            self.read(arg);
                        }
                        self.clobber(&inst.extra_clobbered_regs);
                    }
                    Opcode::Jump => block = successor(0),
                    Opcode::Branch64 => {
                        let taken = self.read(&args[0]) == self.read(&args[1]);
                        block = successor(if taken { 0 } else { 1 });
                    }
                    Opcode::BranchAdd64 => {
                        let result = self.read(&args[1]).wrapping_add(self.read(&args[0]));
                        self.write(&args[1], result);
                        block = successor(if result == 0 { 0 } else { 1 });
                    }
                    Opcode::Ret64 | Opcode::RetDouble => return self.read(&args[0]),
                    Opcode::Oops => panic!("reached Oops"),
                }

                if inst.opcode.is_move() && args.len() == 3 {
                    let junk = self.garbage();
                    self.write(&args[2], junk);
                }
            }
        }
        panic!("the program does not terminate");
    }
}

fn run(code: &Code, inputs: &[(Reg, u64)]) -> u64 {
    Machine::new(inputs).run(code)
}

fn options_for(kind: AllocatorKind) -> Options {
    Options {
        air_force_briggs_allocator: kind == AllocatorKind::Briggs,
        air_force_irc_allocator: kind == AllocatorKind::Irc,
        ..Options::default()
    }
}

fn code_with_registers(kind: AllocatorKind, gp: u8, fp: u8) -> Code {
    let mut code = Code::new(options_for(kind));
    let gprs = (0..gp).map(Reg::new_gpr).collect::<Vec<_>>();
    let fprs = (0..fp).map(Reg::new_fpr).collect::<Vec<_>>();
    code.set_regs_in_priority_order(Bank::GP, &gprs);
    code.set_regs_in_priority_order(Bank::FP, &fprs);
    code
}

/// Allocates `code` and checks the result: no tmp is left, every instruction has a valid form and
/// the program computes what it computed before.
fn allocate_and_check(code: &mut Code, inputs: &[(Reg, u64)]) -> GraphColoringStats {
    let _ = env_logger::builder().is_test(true).try_init();

    let expected = run(code, inputs);
    let before = code.to_string();

    let stats = allocate_registers_by_graph_coloring(code).expect("allocation failed");

    for block in code.blocks.iter() {
        for inst in block.insts.iter() {
            inst.for_each_tmp_fast(|tmp| {
                assert!(tmp.is_reg(), "{} survived allocation in {}", tmp, inst);
            });
        }
    }
    assert_eq!(code.validate(), Ok(()));
    assert_eq!(
        run(code, inputs),
        expected,
        "allocation changed the result\nbefore:\n{}\nafter:\n{}",
        before,
        code
    );

    let spill_slots = code
        .stack_slots
        .iter()
        .filter(|slot| slot.kind == StackSlotKind::Spill)
        .count();
    assert_eq!(
        spill_slots,
        stats.gp.num_spill_stack_slots + stats.fp.num_spill_stack_slots
    );
    stats
}

fn count_insts(code: &Code, opcode: Opcode) -> usize {
    code.blocks
        .iter()
        .flat_map(|block| block.insts.iter())
        .filter(|inst| inst.opcode == opcode)
        .count()
}

const KINDS: [AllocatorKind; 2] = [AllocatorKind::Briggs, AllocatorKind::Irc];

#[test]
fn test_moves_are_coalesced_away() {
    for kind in KINDS {
        let mut code = code_with_registers(kind, 4, 4);
        let block = code.add_block(1.0);
        let a = code.new_tmp(Bank::GP);
        let b = code.new_tmp(Bank::GP);
        let c = code.new_tmp(Bank::GP);

        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(5), Arg::tmp(a)]));
        code.append(block, Inst::new(Opcode::Move, &[Arg::tmp(a), Arg::tmp(b)]));
        code.append(block, Inst::new(Opcode::Add64, &[Arg::imm(3), Arg::tmp(b)]));
        code.append(block, Inst::new(Opcode::Move, &[Arg::tmp(b), Arg::tmp(c)]));
        code.append(block, Inst::new(Opcode::Ret64, &[Arg::tmp(c)]));

        let stats = allocate_and_check(&mut code, &[]);

        // Only the constant materialization is left.
        assert_eq!(count_insts(&code, Opcode::Move), 1);
        assert_eq!(stats.gp.num_iterations, 1);
        assert_eq!(stats.gp.num_spill_stack_slots, 0);
        assert_eq!(stats.gp.num_tmps_in, 3);
        assert_eq!(stats.gp.num_tmps_out, 3);
    }
}

#[test]
fn test_high_pressure_spills() {
    for kind in KINDS {
        let mut code = code_with_registers(kind, 3, 3);
        let block = code.add_block(1.0);
        let tmps = (0..8).map(|_| code.new_tmp(Bank::GP)).collect::<Vec<_>>();
        let input = Tmp::from_reg(Reg::new_gpr(0));

        // Each value depends on the input so none of them is a constant.
        for (i, &tmp) in tmps.iter().enumerate() {
            code.append(block, Inst::new(Opcode::Move, &[Arg::tmp(input), Arg::tmp(tmp)]));
            code.append(block, Inst::new(Opcode::Add64, &[Arg::imm(i as i64), Arg::tmp(tmp)]));
        }
        let acc = code.new_tmp(Bank::GP);
        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(0), Arg::tmp(acc)]));
        for (i, &tmp) in tmps.iter().enumerate() {
            let opcode = if i % 2 == 0 { Opcode::Add64 } else { Opcode::Xor64 };
            code.append(block, Inst::new(opcode, &[Arg::tmp(tmp), Arg::tmp(acc)]));
        }
        code.append(block, Inst::new(Opcode::Ret64, &[Arg::tmp(acc)]));

        let stats = allocate_and_check(&mut code, &[(Reg::new_gpr(0), 1000)]);

        assert!(stats.gp.num_spill_stack_slots > 0);
        assert!(stats.gp.num_iterations > 1);
        assert!(stats.gp.num_tmps_out >= stats.gp.num_tmps_in);
        assert_eq!(stats.fp.num_iterations, 1);
    }
}

#[test]
fn test_spilled_constants_are_rematerialized() {
    for kind in KINDS {
        let mut code = code_with_registers(kind, 2, 2);
        let block = code.add_block(1.0);
        let constants = [3, 1 << 40, 7, -9];
        let tmps = constants
            .iter()
            .map(|&value| {
                let tmp = code.new_tmp(Bank::GP);
                code.append(
                    block,
                    Inst::new(Opcode::Move, &[Arg::imm_or_big_imm(value), Arg::tmp(tmp)]),
                );
                tmp
            })
            .collect::<Vec<_>>();

        let acc = code.new_tmp(Bank::GP);
        code.append(block, Inst::new(Opcode::Move, &[Arg::tmp(tmps[0]), Arg::tmp(acc)]));
        for &tmp in &tmps[1..] {
            code.append(block, Inst::new(Opcode::Add64, &[Arg::tmp(tmp), Arg::tmp(acc)]));
        }
        code.append(block, Inst::new(Opcode::Ret64, &[Arg::tmp(acc)]));

        let stats = allocate_and_check(&mut code, &[]);

        assert!(stats.gp.num_rematerialize_const > 0);
        // Constants are never reloaded, so the only loads are of the accumulator.
        let loaded_constants = code
            .blocks
            .iter()
            .flat_map(|block| block.insts.iter())
            .filter(|inst| inst.opcode == Opcode::Move && inst.args[0].is_stack())
            .count();
        assert!(loaded_constants <= stats.gp.num_load_spill);
    }
}

#[test]
fn test_spilled_move32_constants_are_zero_extended() {
    for kind in KINDS {
        let mut code = code_with_registers(kind, 2, 2);
        let block = code.add_block(1.0);
        let input = Tmp::from_reg(Reg::new_gpr(0));

        let narrow = code.new_tmp(Bank::GP);
        code.append(block, Inst::new(Opcode::Move32, &[Arg::imm(-1), Arg::tmp(narrow)]));
        let values = (1..=3)
            .map(|shift| {
                let value = code.new_tmp(Bank::GP);
                code.append(block, Inst::new(Opcode::Move, &[Arg::tmp(input), Arg::tmp(value)]));
                code.append(block, Inst::new(Opcode::Lshift64, &[Arg::imm(shift), Arg::tmp(value)]));
                value
            })
            .collect::<Vec<_>>();

        let acc = code.new_tmp(Bank::GP);
        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(0), Arg::tmp(acc)]));
        for &value in &values {
            code.append(block, Inst::new(Opcode::Add64, &[Arg::tmp(value), Arg::tmp(acc)]));
        }
        // The second source of a three operand add has to be in a register.
        let sum = code.new_tmp(Bank::GP);
        code.append(
            block,
            Inst::new(Opcode::Add64, &[Arg::tmp(acc), Arg::tmp(narrow), Arg::tmp(sum)]),
        );
        code.append(block, Inst::new(Opcode::Ret64, &[Arg::tmp(sum)]));

        let inputs = [(Reg::new_gpr(0), 3)];
        assert_eq!(run(&code, &inputs), 0xffff_ffff + 6 + 12 + 24);
        let stats = allocate_and_check(&mut code, &inputs);
        assert!(stats.gp.num_rematerialize_const > 0);
    }
}

#[test]
fn test_fp_bank_spills_with_double_moves() {
    for kind in KINDS {
        let mut code = code_with_registers(kind, 4, 2);
        // Sources that die at a three operand def would otherwise lend it their register.
        code.options.air_coalesce_aliasing_defs = false;
        let block = code.add_block(1.0);
        let inputs = (0..4u8)
            .map(|i| (Reg::new_fpr(i + 8), (i as f64 + 1.5).to_bits()))
            .collect::<Vec<_>>();

        // Four sums live at once with two FP registers.
        let sums = (0..4)
            .map(|i| {
                let sum = code.new_tmp(Bank::FP);
                let lhs = Arg::reg(inputs[i].0);
                let rhs = Arg::reg(inputs[(i + 1) % 4].0);
                code.append(block, Inst::new(Opcode::AddDouble, &[lhs, rhs, Arg::tmp(sum)]));
                sum
            })
            .collect::<Vec<_>>();
        let acc = code.new_tmp(Bank::FP);
        code.append(
            block,
            Inst::new(Opcode::MulDouble, &[Arg::tmp(sums[0]), Arg::tmp(sums[1]), Arg::tmp(acc)]),
        );
        code.append(block, Inst::new(Opcode::AddDouble, &[Arg::tmp(sums[2]), Arg::tmp(acc)]));
        code.append(block, Inst::new(Opcode::SubDouble, &[Arg::tmp(sums[3]), Arg::tmp(acc)]));
        code.append(block, Inst::new(Opcode::AddDouble, &[Arg::tmp(sums[0]), Arg::tmp(acc)]));
        code.append(block, Inst::new(Opcode::RetDouble, &[Arg::tmp(acc)]));

        let stats = allocate_and_check(&mut code, &inputs);

        assert!(stats.fp.num_spill_stack_slots > 0);
        assert_eq!(stats.gp.num_spill_stack_slots, 0);
        assert_eq!(count_insts(&code, Opcode::Move), 0);
        let stack_moves = code
            .blocks
            .iter()
            .flat_map(|block| block.insts.iter())
            .filter(|inst| inst.opcode == Opcode::MoveDouble)
            .filter(|inst| inst.args[0].is_stack() || inst.args[1].is_stack())
            .count();
        assert!(stack_moves > 0);
    }
}

#[test]
fn test_values_live_across_calls_avoid_clobbered_registers() {
    for kind in KINDS {
        let mut code = code_with_registers(kind, 8, 2);
        let block = code.add_block(1.0);
        let caller_saved = RegisterSet::from_regs(&(0..4).map(Reg::new_gpr).collect::<Vec<_>>());
        let input = Tmp::from_reg(Reg::new_gpr(6));

        let tmps = (0..3).map(|_| code.new_tmp(Bank::GP)).collect::<Vec<_>>();
        for &tmp in &tmps {
            code.append(block, Inst::new(Opcode::Move, &[Arg::tmp(input), Arg::tmp(tmp)]));
            code.append(block, Inst::new(Opcode::Add64, &[Arg::tmp(tmp), Arg::tmp(tmp)]));
        }
        code.append(
            block,
            Inst::call(&[Arg::imm(0), Arg::tmp(tmps[0])], caller_saved, RegisterSet::new()),
        );
        code.append(block, Inst::new(Opcode::Add64, &[Arg::tmp(tmps[1]), Arg::tmp(tmps[0])]));
        code.append(block, Inst::new(Opcode::Add64, &[Arg::tmp(tmps[2]), Arg::tmp(tmps[0])]));
        code.append(block, Inst::new(Opcode::Ret64, &[Arg::tmp(tmps[0])]));

        let stats = allocate_and_check(&mut code, &[(Reg::new_gpr(6), 21)]);
        assert_eq!(stats.gp.num_spill_stack_slots, 0);
    }
}

#[test]
fn test_pinned_register_is_never_allocated() {
    for kind in KINDS {
        let mut code = code_with_registers(kind, 4, 2);
        let pinned = Reg::new_gpr(0);
        code.pin_register(pinned);
        let block = code.add_block(1.0);

        let tmps = (0..4).map(|_| code.new_tmp(Bank::GP)).collect::<Vec<_>>();
        for (i, &tmp) in tmps.iter().enumerate() {
            code.append(block, Inst::new(Opcode::Move, &[Arg::reg(pinned), Arg::tmp(tmp)]));
            code.append(block, Inst::new(Opcode::Lshift64, &[Arg::imm(i as i64), Arg::tmp(tmp)]));
        }
        for &tmp in &tmps[1..] {
            code.append(block, Inst::new(Opcode::Or64, &[Arg::tmp(tmp), Arg::tmp(tmps[0])]));
        }
        code.append(block, Inst::new(Opcode::Add64, &[Arg::reg(pinned), Arg::tmp(tmps[0])]));
        code.append(block, Inst::new(Opcode::Ret64, &[Arg::tmp(tmps[0])]));

        allocate_and_check(&mut code, &[(pinned, 0x11)]);

        for block in code.blocks.iter() {
            for inst in block.insts.iter() {
                inst.for_each_tmp(|tmp, role, _, _| {
                    assert!(
                        !(role.is_any_def() && tmp == Tmp::from_reg(pinned)),
                        "{} writes the pinned register",
                        inst
                    );
                });
            }
        }
    }
}

#[test]
fn test_spills_around_control_flow() {
    for kind in KINDS {
        let mut code = code_with_registers(kind, 2, 2);
        let entry = code.add_block(1.0);
        let taken = code.add_block(1.0);
        let not_taken = code.add_block(1.0);
        let exit = code.add_block(1.0);
        let input = Tmp::from_reg(Reg::new_gpr(1));

        let a = code.new_tmp(Bank::GP);
        let b = code.new_tmp(Bank::GP);
        let c = code.new_tmp(Bank::GP);
        let counter = code.new_tmp(Bank::GP);
        code.append(entry, Inst::new(Opcode::Move, &[Arg::tmp(input), Arg::tmp(a)]));
        code.append(entry, Inst::new(Opcode::Move, &[Arg::tmp(input), Arg::tmp(b)]));
        code.append(entry, Inst::new(Opcode::Mul64, &[Arg::tmp(a), Arg::tmp(b)]));
        code.append(entry, Inst::new(Opcode::Move, &[Arg::tmp(b), Arg::tmp(c)]));
        code.append(entry, Inst::new(Opcode::Sub64, &[Arg::tmp(a), Arg::tmp(c)]));
        code.append(entry, Inst::new(Opcode::Move, &[Arg::imm(-1), Arg::tmp(counter)]));
        code.append(entry, Inst::new(Opcode::BranchAdd64, &[Arg::tmp(input), Arg::tmp(counter)]));
        code.add_edge(entry, taken, Frequency::Normal);
        code.add_edge(entry, not_taken, Frequency::Rare);

        code.append(taken, Inst::new(Opcode::Add64, &[Arg::tmp(a), Arg::tmp(counter)]));
        code.append(taken, Inst::new(Opcode::Jump, &[]));
        code.add_edge(taken, exit, Frequency::Normal);

        code.append(not_taken, Inst::new(Opcode::Xor64, &[Arg::tmp(b), Arg::tmp(counter)]));
        code.append(not_taken, Inst::new(Opcode::Jump, &[]));
        code.add_edge(not_taken, exit, Frequency::Normal);

        code.append(exit, Inst::new(Opcode::Add64, &[Arg::tmp(c), Arg::tmp(counter)]));
        code.append(exit, Inst::new(Opcode::Add64, &[Arg::tmp(b), Arg::tmp(counter)]));
        code.append(exit, Inst::new(Opcode::Ret64, &[Arg::tmp(counter)]));

        // Both directions of the branch.
        for value in [1, 9] {
            let mut copy = code_with_registers(kind, 2, 2);
            copy.blocks = code.blocks.clone();
            copy.num_gp_tmps = code.num_gp_tmps;
            allocate_and_check(&mut copy, &[(Reg::new_gpr(1), value)]);
        }
    }
}

#[test]
fn test_aliasing_def_shares_a_source_register() {
    for kind in KINDS {
        let mut code = code_with_registers(kind, 8, 2);
        code.options.air_coalesce_aliasing_defs = true;
        let block = code.add_block(1.0);
        let a = code.new_tmp(Bank::GP);
        let b = code.new_tmp(Bank::GP);
        let sum = code.new_tmp(Bank::GP);
        code.append(block, Inst::new(Opcode::Move, &[Arg::reg(Reg::new_gpr(7)), Arg::tmp(a)]));
        code.append(block, Inst::new(Opcode::Move, &[Arg::reg(Reg::new_gpr(6)), Arg::tmp(b)]));
        code.append(block, Inst::new(Opcode::Add64, &[Arg::tmp(a), Arg::tmp(b), Arg::tmp(sum)]));
        code.append(block, Inst::new(Opcode::Ret64, &[Arg::tmp(sum)]));

        allocate_and_check(&mut code, &[(Reg::new_gpr(7), 2), (Reg::new_gpr(6), 40)]);

        let add = code.blocks[0]
            .insts
            .iter()
            .find(|inst| inst.opcode == Opcode::Add64)
            .expect("the add is still there");
        assert!(add.args[2] == add.args[0] || add.args[2] == add.args[1]);
    }
}

#[test]
fn test_malformed_code_is_rejected() {
    let mut code = Code::default();
    let block = code.add_block(1.0);
    let tmp = code.new_tmp(Bank::GP);
    code.append(block, Inst::new(Opcode::Move, &[Arg::imm(1), Arg::tmp(tmp)]));
    assert_eq!(
        allocate_registers_by_graph_coloring(&mut code),
        Err(AirError::MissingTerminal { block })
    );

    code.append(block, Inst::new(Opcode::Ret64, &[Arg::tmp(tmp)]));
    code.set_regs_in_priority_order(Bank::GP, &[]);
    assert_eq!(
        allocate_registers_by_graph_coloring(&mut code),
        Err(AirError::NoRegisters { bank: Bank::GP })
    );
}

#[test]
fn test_empty_code() {
    let mut code = Code::default();
    let stats = allocate_registers_by_graph_coloring(&mut code).unwrap();
    assert_eq!(stats.gp.num_tmps_in, 0);
    assert_eq!(stats.bank(Bank::FP).num_iterations, 1);
}

/// Straight line program over GP tmps. Every step defines a new tmp from earlier ones, and all of
/// them are summed at the end so they stay live.
fn build_program(kind: AllocatorKind, registers: u8, steps: &[(u8, usize, usize, i64)]) -> Code {
    let mut code = code_with_registers(kind, registers, 2);
    let block = code.add_block(1.0);
    let mut tmps: Vec<Tmp> = vec![];

    for &(op, x, y, value) in steps {
        let new = code.new_tmp(Bank::GP);
        if tmps.is_empty() || op == 0 {
            code.append(block, Inst::new(Opcode::Move, &[Arg::imm_or_big_imm(value), Arg::tmp(new)]));
            tmps.push(new);
            continue;
        }
        if op == 8 {
            code.append(block, Inst::new(Opcode::Move32, &[Arg::imm(value as i32 as i64), Arg::tmp(new)]));
            tmps.push(new);
            continue;
        }

        let x = Arg::tmp(tmps[x % tmps.len()]);
        let y = Arg::tmp(tmps[y % tmps.len()]);
        let insts = match op {
            1 => vec![Inst::new(Opcode::Move, &[x, Arg::tmp(new)])],
            2 => vec![Inst::new(Opcode::Move32, &[x, Arg::tmp(new)])],
            3 => vec![Inst::new(Opcode::Add64, &[x, y, Arg::tmp(new)])],
            4 => vec![Inst::new(Opcode::Mul64, &[x, y, Arg::tmp(new)])],
            5 => vec![
                Inst::new(Opcode::Move, &[y, Arg::tmp(new)]),
                Inst::new(Opcode::Sub64, &[x, Arg::tmp(new)]),
            ],
            6 => vec![Inst::new(Opcode::Add32, &[x, y, Arg::tmp(new)])],
            7 => vec![
                Inst::new(Opcode::Move, &[Arg::imm(value & 0xff), Arg::tmp(new)]),
                Inst::new(Opcode::Xor64, &[x, Arg::tmp(new)]),
            ],
            _ => unreachable!("unknown step {}", op),
        };
        for inst in insts {
            code.append(block, inst);
        }
        tmps.push(new);
    }

    let acc = code.new_tmp(Bank::GP);
    code.append(block, Inst::new(Opcode::Move, &[Arg::imm(0), Arg::tmp(acc)]));
    for &tmp in tmps.iter() {
        code.append(block, Inst::new(Opcode::Add64, &[Arg::tmp(tmp), Arg::tmp(acc)]));
    }
    code.append(block, Inst::new(Opcode::Ret64, &[Arg::tmp(acc)]));
    code
}

fn program_steps() -> impl Strategy<Value = Vec<(u8, usize, usize, i64)>> {
    prop::collection::vec(
        (
            0u8..9,
            any::<usize>(),
            any::<usize>(),
            prop_oneof![-1000i64..1000, any::<i64>()],
        ),
        1..40,
    )
}

proptest! {
    #[test]
    fn random_programs_keep_their_result(
        steps in program_steps(),
        registers in 4u8..8,
        briggs in any::<bool>(),
    ) {
        let kind = if briggs { AllocatorKind::Briggs } else { AllocatorKind::Irc };
        let mut code = build_program(kind, registers, &steps);
        allocate_and_check(&mut code, &[]);
    }
}

/// Whether repeatedly removing nodes of degree below `k` empties the graph.
fn is_simplifiable(num_nodes: usize, edges: &[(usize, usize)], k: usize) -> bool {
    let mut adjacency = vec![std::collections::BTreeSet::new(); num_nodes];
    for &(a, b) in edges {
        adjacency[a].insert(b);
        adjacency[b].insert(a);
    }

    let mut removed = vec![false; num_nodes];
    loop {
        let candidate = (0..num_nodes).find(|&node| {
            !removed[node] && adjacency[node].iter().filter(|&&n| !removed[n]).count() < k
        });
        match candidate {
            Some(node) => removed[node] = true,
            None => return removed.iter().all(|&removed| removed),
        }
    }
}

fn check_graph_coloring<'a, S: ColoringStrategy<'a>>(
    mut allocator: S,
    num_nodes: usize,
    edges: &[(usize, usize)],
    moves: &[(usize, usize)],
    k: usize,
) -> Result<(), TestCaseError> {
    let node = |index: usize| Tmp::gp_tmp_for_index(index).absolute_index();
    for &(a, b) in edges {
        allocator.add_edge(node(a), node(b));
    }
    for &(a, b) in moves {
        if a != b {
            allocator.add_move(node(a), node(b));
        }
    }
    allocator.start_adding_low_priority_moves();

    allocator.allocate();

    if is_simplifiable(num_nodes, edges, k) {
        // Conservative coalescing never turns a graph that simplification alone colors into one
        // that needs a spill.
        prop_assert!(!allocator.requires_spilling());
    }
    if allocator.requires_spilling() {
        return Ok(());
    }

    let color = |index: usize| allocator.color(allocator.get_alias(node(index)));
    for &(a, b) in edges {
        prop_assert_ne!(color(a), color(b), "{} and {} interfere", a, b);
    }
    Ok(())
}

fn random_graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>, Vec<(usize, usize)>, usize)> {
    (2usize..24, 1usize..5).prop_flat_map(|(num_nodes, k)| {
        let pair = (0..num_nodes, 0..num_nodes).prop_filter("no self edges", |(a, b)| a != b);
        (
            Just(num_nodes),
            prop::collection::vec(pair.clone(), 0..num_nodes * 3),
            prop::collection::vec(pair, 0..num_nodes),
            Just(k),
        )
    })
}

proptest! {
    #[test]
    fn coalescing_is_sound((num_nodes, edges, moves, k) in random_graph()) {
        let unspillable = BitVector::new();
        let use_counts = UseCounts::new(&Code::default());
        let core = || {
            ColoringCore::<SmallInterferenceGraph>::new(
                Bank::GP,
                (0..k as u8).map(Reg::new_gpr).collect(),
                Tmp::absolute_index_for_tmp_count(num_nodes),
                &unspillable,
                &use_counts,
            )
        };

        check_graph_coloring(Briggs::new(core()), num_nodes, &edges, &moves, k)?;
        check_graph_coloring(Irc::new(core()), num_nodes, &edges, &moves, k)?;
    }
}
