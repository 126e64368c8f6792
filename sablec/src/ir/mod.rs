//! The analyzed intermediate representation consumed by codegen.
//!
//! The IR is produced by the semantic analyzer (out of scope for this
//! crate) and arrives fully typed: every instruction knows its result type,
//! its compile-time value (if any), and the lexical scope it came from.
//!
//! Entities reference each other by index into stable arenas; nothing here
//! owns backend handles. The code generator keeps its own memoized maps
//! from IR entities to backend objects.

pub mod body;
pub mod inst;
pub mod scope;
pub mod ty;
pub mod value;

/// Identifies a function of the [`body::Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FnId(pub u32);

/// Identifies a basic block within a function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// Identifies a variable within a function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub u32);

/// Identifies a global variable of the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

pub use body::{BasicBlock, FnBody, FnBodyBuilder, FnDecl, FnInline, Program, Variable};
pub use inst::{
    AsmExpr, AsmInput, AsmOutput, AsmToken, BinOp, Callee, CastOp, Inst, InstId, InstKind,
    PhiIncoming, SwitchCase, UnOp,
};
pub use scope::{ScopeData, ScopeId, ScopeKind, ScopeTree};
pub use ty::{
    CallConv, EnumDecl, EnumId, EnumVariant, FnParam, FnSig, StructDecl, StructField, StructId,
    Type, TypeKind, TypeTable,
};
pub use value::{ConstKind, ConstNum, ConstSpecial, ConstValue, GlobalVar};
