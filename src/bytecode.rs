// ABOUTME: Opcodes, linearized instructions, and the intermediate block/link
// ABOUTME: representation the compiler emits into before linearization

use crate::symbol::Symbol;
use std::cell::RefCell;
use std::rc::Rc;

/// The closed opcode set (spec.md §6). `Label` is a pseudo-opcode erased at
/// linearization; every other opcode survives into the final segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Nop,
    Dup1,
    Dup2,
    Pop1,
    Pop2,
    LdNull,
    LdBool,
    LdStr,
    LdObj,
    Ld8,
    Ld16,
    Ld32,
    Ld64,
    LdLoc,
    LdLoc0,
    LdLoc1,
    LdLoc2,
    LdLoc3,
    LdArg,
    LdArg0,
    LdArg1,
    LdArg2,
    LdArg3,
    LdX,
    StLoc,
    StArg,
    StGlobal,
    LdGlobal,
    LdProp,
    StProp,
    StpProp,
    LdMember,
    StMember,
    StpMember,
    LdA,
    LdD,
    LdStart,
    LdEnd,
    LdCount,
    LdLength,
    Met0,
    Met1,
    MetN,
    Call,
    TCall,
    Ret,
    Ret0,
    Jmp,
    Bt,
    Bf,
    BtJmp,
    BfJmp,
    Label,
    Not,
    Is,
    TypeOf,
    SuperEq,
    SuperNe,
    NewTill,
    TillEsc,
    NewObject,
    NewFn,
    NullLoc0,
}

impl Opcode {
    /// Net effect on the operand stack: how many values this opcode
    /// consumes net of what it produces (negative pops more than it
    /// pushes). Used by `Compiler::emit`'s `ApplyStackDelta` (spec.md §4.7.2).
    pub fn default_stack_delta(self) -> i32 {
        match self {
            Opcode::Nop | Opcode::Label => 0,
            Opcode::Dup1 => 1,
            Opcode::Dup2 => 2,
            Opcode::Pop1 => -1,
            Opcode::Pop2 => -2,
            Opcode::LdNull
            | Opcode::LdBool
            | Opcode::LdStr
            | Opcode::LdObj
            | Opcode::Ld8
            | Opcode::Ld16
            | Opcode::Ld32
            | Opcode::Ld64
            | Opcode::LdLoc
            | Opcode::LdLoc0
            | Opcode::LdLoc1
            | Opcode::LdLoc2
            | Opcode::LdLoc3
            | Opcode::LdArg
            | Opcode::LdArg0
            | Opcode::LdArg1
            | Opcode::LdArg2
            | Opcode::LdArg3
            | Opcode::LdX
            | Opcode::LdGlobal
            | Opcode::NewObject
            | Opcode::NewFn => 1,
            Opcode::StLoc | Opcode::StArg => -1,
            Opcode::StGlobal => -1,
            Opcode::LdProp => 0,
            Opcode::StProp => -1,
            Opcode::StpProp => 0,
            Opcode::LdMember => -1,
            Opcode::StMember => -2,
            Opcode::StpMember => -1,
            Opcode::LdA | Opcode::LdD | Opcode::LdStart | Opcode::LdEnd | Opcode::LdCount | Opcode::LdLength => 0,
            Opcode::Met0 => 0,
            Opcode::Met1 => -1,
            Opcode::MetN => 0,
            Opcode::Call | Opcode::TCall => 0,
            Opcode::Ret | Opcode::Ret0 => 0,
            Opcode::Jmp => 0,
            Opcode::Bt | Opcode::Bf => -1,
            Opcode::BtJmp | Opcode::BfJmp => -1,
            Opcode::Not | Opcode::TypeOf => 0,
            Opcode::Is | Opcode::SuperEq | Opcode::SuperNe => -1,
            Opcode::NewTill => 1,
            Opcode::TillEsc => 0,
            Opcode::NullLoc0 => 0,
        }
    }
}

/// Operand union; which arm is live is determined entirely by the
/// instruction's opcode (spec.md §3 "ByteCodeSegment").
#[derive(Debug, Clone)]
pub enum Operand {
    None,
    Index(usize),
    Symbol(Symbol),
    Int8(u8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Bool(bool),
    /// Resolved branch target pc, filled in at linearization.
    Target(usize),
    /// `(till-continuation index, flag offset)` for `TillEsc`.
    TillEsc(usize, usize),
}

/// A single linearized instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Operand,
    pub source_location: usize,
}

/// Array of linearized instructions produced for one function (spec.md §3).
#[derive(Debug, Default)]
pub struct ByteCodeSegment {
    pub instructions: Vec<Instruction>,
}

impl ByteCodeSegment {
    pub fn new() -> Self {
        ByteCodeSegment::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn push(&mut self, instruction: Instruction) -> usize {
        let pc = self.instructions.len();
        self.instructions.push(instruction);
        pc
    }
}

/// A still-unresolved branch or label, identified by index into the
/// compiler function's `labels` vector. Replaces the source's intrusive
/// `branchTarget` pointer with a safe index (Design Notes §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelId(pub usize);

/// One emitted-but-not-yet-linearized instruction inside a `CompiledBlock`
/// (spec.md §4.7.2). Branches reference their label by `LabelId`; the label
/// itself is a `Label`-opcode `IntermediateInstruction` whose own id is
/// recorded the same way, resolved to an absolute pc at linearization.
#[derive(Debug, Clone)]
pub struct IntermediateInstruction {
    pub opcode: Opcode,
    pub operand: Operand,
    pub source_location: usize,
    pub stack_delta: i32,
    pub label: Option<LabelId>,
    pub branch_target: Option<LabelId>,
}

impl IntermediateInstruction {
    pub fn plain(opcode: Opcode, operand: Operand, source_location: usize) -> Self {
        let stack_delta = opcode.default_stack_delta();
        IntermediateInstruction {
            opcode,
            operand,
            source_location,
            stack_delta,
            label: None,
            branch_target: None,
        }
    }

    pub fn label(id: LabelId) -> Self {
        IntermediateInstruction {
            opcode: Opcode::Label,
            operand: Operand::None,
            source_location: 0,
            stack_delta: 0,
            label: Some(id),
            branch_target: None,
        }
    }
}

/// A doubly-linked sequence of `IntermediateInstruction`s that child blocks
/// can be appended to; final linearization walks the tree in order to
/// produce the `ByteCodeSegment` (spec.md §4.7.2).
#[derive(Debug, Default)]
pub struct CompiledBlock {
    pub instructions: Vec<IntermediateInstruction>,
    pub children: Vec<Rc<RefCell<CompiledBlock>>>,
}

impl CompiledBlock {
    pub fn new() -> Self {
        CompiledBlock::default()
    }

    pub fn emit(&mut self, instruction: IntermediateInstruction) {
        self.instructions.push(instruction);
    }

    pub fn append_child(&mut self, child: Rc<RefCell<CompiledBlock>>) {
        self.children.push(child);
    }

    /// Net stack delta of everything directly in this block (not counting
    /// children, which are linearized and summed separately).
    pub fn local_stack_delta(&self) -> i32 {
        self.instructions.iter().map(|i| i.stack_delta).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty() && self.children.iter().all(|c| c.borrow().is_empty())
    }

    /// Flatten this block and its children, in order, into a flat
    /// instruction list (still carrying `LabelId`s, not yet resolved to
    /// absolute pcs).
    pub fn flatten(&self) -> Vec<IntermediateInstruction> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<IntermediateInstruction>) {
        out.extend(self.instructions.iter().cloned());
        for child in &self.children {
            child.borrow().flatten_into(out);
        }
    }

    /// Linearize into a final `ByteCodeSegment`, resolving every
    /// `branch_target` `LabelId` to the absolute pc of its `Label`
    /// instruction (spec.md §4.7.2's two-phase resolution).
    pub fn linearize(&self) -> ByteCodeSegment {
        self.linearize_with_labels().0
    }

    /// Same as `linearize`, but also returns the resolved `LabelId -> pc`
    /// map, so a caller (the till-continuation wiring at the top of a
    /// compile) can resolve its own out-of-band label references without
    /// re-walking the block tree (spec.md §4.8 "Till correctness").
    pub fn linearize_with_labels(&self) -> (ByteCodeSegment, std::collections::HashMap<LabelId, usize>) {
        let flat = self.flatten();
        let mut label_pcs = std::collections::HashMap::new();
        let mut pc = 0usize;
        for instr in &flat {
            if instr.opcode == Opcode::Label {
                if let Some(id) = instr.label {
                    label_pcs.insert(id, pc);
                }
                continue;
            }
            pc += 1;
        }

        let mut segment = ByteCodeSegment::new();
        for instr in &flat {
            if instr.opcode == Opcode::Label {
                continue;
            }
            let operand = match instr.branch_target {
                Some(id) => {
                    let target = *label_pcs
                        .get(&id)
                        .expect("branch target label was never emitted in this block tree");
                    Operand::Target(target)
                }
                None => instr.operand.clone(),
            };
            segment.push(Instruction {
                opcode: instr.opcode,
                operand,
                source_location: instr.source_location,
            });
        }
        (segment, label_pcs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linearize_erases_labels_and_resolves_branch_targets() {
        let mut block = CompiledBlock::new();
        block.emit(IntermediateInstruction::plain(Opcode::LdBool, Operand::Bool(true), 0));
        let mut branch = IntermediateInstruction::plain(Opcode::Bf, Operand::None, 0);
        branch.branch_target = Some(LabelId(0));
        block.emit(branch);
        block.emit(IntermediateInstruction::plain(Opcode::LdNull, Operand::None, 0));
        block.emit(IntermediateInstruction::label(LabelId(0)));
        block.emit(IntermediateInstruction::plain(Opcode::Ret, Operand::None, 0));

        let segment = block.linearize();
        assert_eq!(segment.len(), 4);
        match &segment.instructions[1].operand {
            Operand::Target(pc) => assert_eq!(*pc, 2),
            other => panic!("expected resolved target, got {other:?}"),
        }
    }

    #[test]
    fn child_blocks_are_appended_after_parent_instructions() {
        let mut parent = CompiledBlock::new();
        parent.emit(IntermediateInstruction::plain(Opcode::Nop, Operand::None, 0));
        let mut child = CompiledBlock::new();
        child.emit(IntermediateInstruction::plain(Opcode::Ret0, Operand::None, 0));
        parent.append_child(Rc::new(RefCell::new(child)));

        let flat = parent.flatten();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[1].opcode, Opcode::Ret0);
    }

    #[test]
    fn empty_block_with_only_empty_children_is_empty() {
        let mut parent = CompiledBlock::new();
        parent.append_child(Rc::new(RefCell::new(CompiledBlock::new())));
        assert!(parent.is_empty());
    }
}
