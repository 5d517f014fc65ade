use crate::{
    bank::{conservative_width, minimum_width, Bank},
    width::{width_for_immediate, Width},
};

use super::{code::Code, opcode::Opcode, tmp::Tmp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Widths {
    pub use_: Width,
    pub def: Width,
}

impl Widths {
    pub fn from_bank(bank: Bank) -> Self {
        Self {
            use_: minimum_width(bank),
            def: minimum_width(bank),
        }
    }

    pub fn from_widths(use_: Width, def: Width) -> Self {
        Self { use_, def }
    }

    pub fn conservative(bank: Bank) -> Self {
        Self::from_widths(conservative_width(bank), conservative_width(bank))
    }
}

/// How many bits of each tmp are actually read (`use_`) and how many high bits a def may leave
/// non-zero (`def`).
///
/// `Move %src, %dst` flows the def width forward and the use width backwards until nothing changes.
#[derive(Debug, Default)]
pub struct TmpWidth {
    widths: [Vec<Widths>; 2],
}

impl TmpWidth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recompute(&mut self, code: &Code, bank: Bank) {
        let size = Tmp::absolute_index_for_tmp_count(code.num_tmps(bank));
        let widths = &mut self.widths[bank.index()];
        widths.clear();
        widths.resize(size, Widths::from_bank(bank));

        // Assume the worst for registers.
        for index in 1..=Tmp::last_machine_register_index() {
            widths[index] = Widths::conservative(bank);
        }

        let mut moves = vec![];

        for block in code.blocks.iter() {
            for inst in block.insts.iter() {
                if inst.opcode == Opcode::Move
                    && inst.args.len() == 2
                    && inst.args[1].is_tmp()
                    && inst.args[1].as_tmp().bank() == bank
                {
                    let dst = inst.args[1].as_tmp().absolute_index();
                    if inst.args[0].is_tmp() {
                        moves.push((inst.args[0].as_tmp().absolute_index(), dst));
                        continue;
                    }
                    if inst.args[0].is_imm() && inst.args[0].value() >= 0 {
                        let width = width_for_immediate(inst.args[0].value());
                        widths[dst].def = widths[dst].def.max(width);
                        continue;
                    }
                }

                inst.for_each_tmp(|tmp, role, tmp_bank, width| {
                    if tmp_bank != bank {
                        return;
                    }
                    let tmp_widths = &mut widths[tmp.absolute_index()];
                    if role.is_any_use() {
                        tmp_widths.use_ = tmp_widths.use_.max(width);
                    }
                    if role.is_zdef() {
                        tmp_widths.def = tmp_widths.def.max(width);
                    } else if role.is_any_def() {
                        tmp_widths.def = Width::W64;
                    }
                });
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &(src, dst) in moves.iter() {
                if widths[dst].def < widths[src].def {
                    widths[dst].def = widths[src].def;
                    changed = true;
                }
                if widths[src].use_ < widths[dst].use_ {
                    widths[src].use_ = widths[dst].use_;
                    changed = true;
                }
            }
        }
    }

    pub fn widths(&self, tmp: Tmp) -> Widths {
        let bank = tmp.bank();
        self.widths[bank.index()]
            .get(tmp.absolute_index())
            .copied()
            .unwrap_or_else(|| Widths::conservative(bank))
    }

    /// Narrowest width that holds everything this tmp carries.
    pub fn width(&self, tmp: Tmp) -> Width {
        let widths = self.widths(tmp);
        widths.use_.min(widths.def)
    }

    pub fn required_width(&self, tmp: Tmp) -> Width {
        let widths = self.widths(tmp);
        widths.use_.max(widths.def)
    }

    pub fn use_width(&self, tmp: Tmp) -> Width {
        self.widths(tmp).use_
    }

    pub fn def_width(&self, tmp: Tmp) -> Width {
        self.widths(tmp).def
    }
}
