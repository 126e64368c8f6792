//! The analyzed IR instruction set.
//!
//! Instructions live in a flat arena per function body and reference each
//! other, blocks, and variables by index. Every instruction carries its
//! result type, a compile-time value slot, a source span, and the lexical
//! scope it was written in.

use std::rc::Rc;

use crate::span::Span;

use super::scope::ScopeId;
use super::ty::Type;
use super::value::ConstValue;
use super::{BlockId, FnId, GlobalId, VarId};

/// Identifies an instruction within its function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(pub u32);

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    BoolOr,
    BoolAnd,
    CmpEq,
    CmpNeq,
    CmpLt,
    CmpGt,
    CmpLte,
    CmpGte,
    Add,
    AddWrap,
    Sub,
    SubWrap,
    Mul,
    MulWrap,
    Div,
    DivExact,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    ShlWrap,
    Shr,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::CmpEq
                | BinOp::CmpNeq
                | BinOp::CmpLt
                | BinOp::CmpGt
                | BinOp::CmpLte
                | BinOp::CmpGte
        )
    }
}

/// Unary operators.
///
/// The tail of the list is accepted from the analyzer but has no runtime
/// lowering; reaching one is a contract violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    NegWrap,
    BoolNot,
    BitNot,
    Deref,
    UnwrapError,
    UnwrapOptional,
    // Analyzer-only forms, eliminated before codegen.
    AddressOf,
    ErrorType,
    OptionalType,
    ErrorReturn,
    OptionalReturn,
}

/// The cast operations the analyzer can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Noop,
    WidenOrShorten,
    PtrToInt,
    IntToPtr,
    PointerReinterpret,
    IntToFloat,
    FloatToInt,
    BoolToInt,
    IntToEnum,
    EnumToInt,
    ErrToInt,
    /// Wrap a payload into an optional (`T` → `?T`).
    OptionalWrap,
    /// Wrap an ok payload into an error union (`T` → `%T`).
    ErrorWrap,
    /// Wrap a pure error into an error union (`error` → `%T`).
    PureErrorWrap,
    /// `*[N]T` → `[]T`: pointer and length fields are written into the
    /// pre-allocated temporary.
    ArrayToSlice,
    /// `[N]u8` (by pointer) → `[]T`: length divides by the element size.
    BytesToSlice,
    /// `[]T` → `[]U`: length is scaled, with a divisibility safety check
    /// when narrowing into a wider element.
    ResizeSlice,
}

/// A `switch` case: a compile-time value and its destination block.
#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub value: InstId,
    pub block: BlockId,
}

/// One incoming edge of a phi.
#[derive(Debug, Clone)]
pub struct PhiIncoming {
    pub value: InstId,
    pub block: BlockId,
}

/// What a call targets: a known function or a first-class function value.
#[derive(Debug, Clone)]
pub enum Callee {
    Fn(FnId),
    Value(InstId),
}

/// Pre-tokenized inline assembly, as produced by the parser.
#[derive(Debug, Clone)]
pub struct AsmExpr {
    /// The raw template text the tokens index into.
    pub template: String,
    pub tokens: Vec<AsmToken>,
    pub outputs: Vec<AsmOutput>,
    pub inputs: Vec<AsmInput>,
    pub clobbers: Vec<String>,
    pub is_volatile: bool,
}

impl AsmExpr {
    /// Number of outputs that are returned as the asm expression's value
    /// (at most one) rather than written through a variable.
    pub fn return_count(&self) -> usize {
        self.outputs.iter().filter(|o| o.is_return).count()
    }
}

/// A token of an asm template.
#[derive(Debug, Clone)]
pub enum AsmToken {
    /// Literal template text `template[start..end]`.
    Template { start: usize, end: usize },
    /// An escaped `%%`.
    Percent,
    /// A `%[name]` reference; `start..end` covers the name.
    Var { start: usize, end: usize },
}

/// An asm output operand.
#[derive(Debug, Clone)]
pub struct AsmOutput {
    pub symbolic_name: String,
    /// Constraint including the leading `=`.
    pub constraint: String,
    /// The variable written through, for non-return outputs.
    pub var: Option<VarId>,
    /// True when this output is the asm expression's result value.
    pub is_return: bool,
}

/// An asm input operand.
#[derive(Debug, Clone)]
pub struct AsmInput {
    pub symbolic_name: String,
    pub constraint: String,
}

/// Instruction payloads.
#[derive(Debug, Clone)]
pub enum InstKind {
    /// A pure compile-time value; carries only the static-value slot.
    Const,
    Return {
        value: InstId,
    },
    DeclVar {
        var: VarId,
        init: InstId,
    },
    BinOp {
        op: BinOp,
        lhs: InstId,
        rhs: InstId,
        safety_check_on: bool,
    },
    UnOp {
        op: UnOp,
        operand: InstId,
    },
    Cast {
        op: CastOp,
        operand: InstId,
    },
    Unreachable,
    CondBr {
        condition: InstId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Br {
        dest: BlockId,
    },
    SwitchBr {
        target: InstId,
        else_block: BlockId,
        cases: Vec<SwitchCase>,
    },
    Phi {
        incoming: Vec<PhiIncoming>,
    },
    LoadPtr {
        ptr: InstId,
    },
    StorePtr {
        ptr: InstId,
        value: InstId,
    },
    VarPtr {
        var: VarId,
    },
    GlobalPtr {
        global: GlobalId,
    },
    ElemPtr {
        array_ptr: InstId,
        index: InstId,
        safety_check_on: bool,
    },
    StructFieldPtr {
        struct_ptr: InstId,
        /// Source field index into the struct declaration.
        field_index: usize,
    },
    EnumFieldPtr {
        enum_ptr: InstId,
        variant_index: usize,
    },
    Call {
        callee: Callee,
        args: Vec<InstId>,
    },
    /// Address-of: aggregates pass through, scalars spill to the
    /// pre-allocated temporary.
    Ref {
        value: InstId,
    },
    /// Write fields into the pre-allocated temporary and yield it.
    StructInit {
        /// Pairs of (source field index, operand).
        fields: Vec<(usize, InstId)>,
    },
    /// Write elements into the pre-allocated temporary array and yield it.
    ContainerInitList {
        elements: Vec<InstId>,
    },
    /// Read the tag of an enum value.
    EnumTag {
        value: InstId,
    },
    /// Unwrap through a pointer-to-optional, yielding a pointer to the
    /// payload.
    UnwrapOptional {
        value: InstId,
        safety_check_on: bool,
    },
    /// Test a pointer-to-optional for presence.
    TestNull {
        value: InstId,
    },
    Clz {
        value: InstId,
    },
    Ctz {
        value: InstId,
    },
    /// Index the error-name table with an error tag.
    ErrName {
        value: InstId,
    },
    ReturnAddress,
    FrameAddress,
    InlineAsm {
        asm: Box<AsmExpr>,
        inputs: Vec<InstId>,
    },
    /// Analyzer-only bookkeeping for inline switch dispatch; must not reach
    /// lowering.
    SwitchVar,
}

/// A single IR instruction.
#[derive(Debug, Clone)]
pub struct Inst {
    pub kind: InstKind,
    /// The result type.
    pub ty: Type,
    /// Compile-time value slot; `special == Runtime` means none.
    pub value: Rc<ConstValue>,
    pub span: Span,
    pub scope: ScopeId,
    /// Uses of this instruction's result. Side-effect-free instructions
    /// with no uses are skipped by lowering.
    pub ref_count: u32,
}

impl Inst {
    pub fn new(kind: InstKind, ty: Type, span: Span, scope: ScopeId) -> Self {
        Self {
            kind,
            ty,
            value: ConstValue::runtime(),
            span,
            scope,
            ref_count: 1,
        }
    }

    /// Whether skipping this instruction would change program behavior.
    pub fn has_side_effects(&self) -> bool {
        match &self.kind {
            InstKind::Return { .. }
            | InstKind::DeclVar { .. }
            | InstKind::StorePtr { .. }
            | InstKind::Call { .. }
            | InstKind::Unreachable
            | InstKind::CondBr { .. }
            | InstKind::Br { .. }
            | InstKind::SwitchBr { .. } => true,
            InstKind::InlineAsm { asm, .. } => asm.is_volatile || asm.outputs.is_empty(),
            _ => false,
        }
    }

    /// Whether this instruction needs a pre-allocated stack temporary.
    pub fn needs_tmp_ptr(&self) -> bool {
        match &self.kind {
            InstKind::Ref { .. }
            | InstKind::StructInit { .. }
            | InstKind::ContainerInitList { .. } => true,
            InstKind::Cast { op, .. } => matches!(
                op,
                CastOp::OptionalWrap
                    | CastOp::ErrorWrap
                    | CastOp::PureErrorWrap
                    | CastOp::ArrayToSlice
                    | CastOp::BytesToSlice
                    | CastOp::ResizeSlice
            ),
            // Calls returning by reference; decided at lowering time from
            // the callee type, so the alloca list includes them explicitly.
            InstKind::Call { .. } => true,
            _ => false,
        }
    }
}
