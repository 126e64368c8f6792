//! # Sable Compiler Backend
//!
//! LLVM code generation for the Sable programming language.
//!
//! This crate is the back half of the compiler: it takes the analyzed,
//! fully-typed IR produced by the front end and lowers it to an LLVM module
//! through the `inkwell` bindings, attaching debug info and weaving in the
//! runtime safety checks that debug builds carry.
//!
//! ## Pipeline position
//!
//! ```text
//! Source -> Parse -> Analyze -> IR -> [this crate] -> LLVM module -> Object
//! ```
//!
//! ## Module Overview
//!
//! - [`span`] - Source location tracking
//! - [`diagnostics`] - Error reporting infrastructure
//! - [`target`] - Target triple and ABI queries
//! - [`ir`] - The analyzed IR the backend consumes
//! - [`codegen`] - IR-to-LLVM lowering, debug info, safety checks, C header
//!   emission

pub mod codegen;
pub mod diagnostics;
pub mod ir;
pub mod span;
pub mod target;

// Re-export commonly used types
pub use codegen::{CodeGen, CodegenOptions};
pub use diagnostics::{BackendError, Diagnostic, DiagnosticEmitter, DiagnosticKind, ErrorCode};
pub use span::{Span, SrcLoc};
pub use target::{OutType, TargetInfo};
