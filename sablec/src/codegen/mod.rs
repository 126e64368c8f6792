//! LLVM code generation.
//!
//! This module lowers the analyzed IR to LLVM through inkwell. The
//! [`CodeGen`] context owns every memoized backend handle for one
//! compilation: type and debug-type caches, intrinsic tables, constant
//! globals, and the per-function lowering state.
//!
//! # Architecture
//!
//! ```text
//! Program -> globals + error table      (module driver, this file)
//!         -> prototypes + ABI attributes (func)
//!         -> per-block instruction lowering (lower::*)
//!         -> debug info finalize + verify
//! ```
//!
//! The driver is strictly single-threaded; lowering proceeds in program
//! order within a block, blocks in their declared order, functions in their
//! registration order.

mod c_header;
mod consts;
mod debug;
mod func;
mod lower;
mod safety;
mod types;

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::debug_info::{DILocalVariable, DIScope, DIType};
use inkwell::module::{FlagBehavior, Linkage, Module};
use inkwell::targets::{ByteOrdering, TargetData, TargetTriple};
use inkwell::types::BasicTypeEnum;
use inkwell::values::{
    BasicValueEnum, FunctionValue, GlobalValue, PointerValue, StructValue, UnnamedAddress,
};
use tracing::debug;

use crate::diagnostics::{Diagnostic, ErrorCode};
use crate::ice;
use crate::ir::{
    ConstKind, ConstSpecial, FnId, GlobalId, InstId, Program, ScopeId, Type, TypeKind,
};
use crate::span::Span;
use crate::target::{DeploymentTarget, TargetInfo};

pub(crate) use debug::DebugInfo;
pub(crate) use types::{FnAbi, PrimitiveTypes};

/// Build flags for one compilation.
#[derive(Debug, Clone, Default)]
pub struct CodegenOptions {
    pub is_release_build: bool,
    pub is_test_build: bool,
    pub is_static: bool,
    pub strip_debug_symbols: bool,
    /// Dump the module to stderr after lowering.
    pub verbose: bool,
    pub want_h_file: bool,
    /// Recorded for the link step; codegen does not consume these.
    pub linker_rdynamic: bool,
    pub windows_linker_unicode: bool,
}

/// The code generation context: one per compilation.
///
/// Owns all memoized backend handles. The LLVM context, module and builder
/// are borrowed from the caller so tests and the driver can inspect the
/// module after lowering.
pub struct CodeGen<'ctx, 'a> {
    /// The LLVM context.
    pub context: &'ctx Context,
    /// The LLVM module being built.
    pub module: &'a Module<'ctx>,
    /// The LLVM IR builder.
    pub builder: &'a Builder<'ctx>,
    /// Target data layout, used for size and alignment queries.
    pub target_data: TargetData,
    pub target: TargetInfo,
    pub opts: CodegenOptions,
    pub program: &'a Program,

    pub(crate) di: DebugInfo<'ctx>,
    pub(crate) prims: PrimitiveTypes,
    /// Primitive types by source name.
    pub(crate) primitive_table: HashMap<String, Type>,
    pub pointer_size_bytes: u32,
    pub is_big_endian: bool,
    /// Darwin deployment target from the environment, recorded for the
    /// link step.
    pub deployment_target: Option<DeploymentTarget>,

    // Memoized type handles: same structural type, same handle.
    pub(crate) type_refs: HashMap<Type, BasicTypeEnum<'ctx>>,
    pub(crate) di_types: HashMap<Type, Option<DIType<'ctx>>>,
    pub(crate) fn_abis: HashMap<Type, FnAbi<'ctx>>,

    // Memoized intrinsics: [signed?][add/sub/mul][bits index] and
    // [ctz/clz][bits index].
    pub(crate) int_overflow_fns: [[[Option<FunctionValue<'ctx>>; 4]; 3]; 2],
    pub(crate) int_builtin_fns: [[Option<FunctionValue<'ctx>>; 4]; 2],
    pub(crate) trap_fn: Option<FunctionValue<'ctx>>,
    pub(crate) return_address_fn: Option<FunctionValue<'ctx>>,
    pub(crate) frame_address_fn: Option<FunctionValue<'ctx>>,

    // Constant handle caches keyed by `Rc<ConstValue>` identity; sharing a
    // base pointer means sharing the emitted global.
    pub(crate) const_values: HashMap<usize, BasicValueEnum<'ctx>>,
    pub(crate) const_globals: HashMap<usize, GlobalValue<'ctx>>,

    pub(crate) fn_values: HashMap<FnId, FunctionValue<'ctx>>,
    pub(crate) global_values: HashMap<GlobalId, GlobalValue<'ctx>>,
    pub(crate) err_name_table: Option<GlobalValue<'ctx>>,
    pub(crate) di_scopes: HashMap<ScopeId, DIScope<'ctx>>,

    // Current-function lowering state.
    pub(crate) cur_fn: Option<FnId>,
    pub(crate) cur_fn_val: Option<FunctionValue<'ctx>>,
    /// The hidden return pointer, when the return is by reference.
    pub(crate) cur_ret_ptr: Option<PointerValue<'ctx>>,
    pub(crate) cur_span: Span,
    pub(crate) values: HashMap<InstId, BasicValueEnum<'ctx>>,
    pub(crate) tmp_ptrs: HashMap<InstId, PointerValue<'ctx>>,
    pub(crate) var_refs: Vec<Option<PointerValue<'ctx>>>,
    pub(crate) var_di: Vec<Option<DILocalVariable<'ctx>>>,
    pub(crate) block_refs: Vec<inkwell::basic_block::BasicBlock<'ctx>>,
    /// The block current at the end of lowering each IR block; safety
    /// checks may have appended blocks, so phis use these.
    pub(crate) block_exits: Vec<Option<inkwell::basic_block::BasicBlock<'ctx>>>,
}

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    /// Create the context and initialize the module: triple, data layout,
    /// debug-info metadata, and the primitive type table.
    pub fn new(
        context: &'ctx Context,
        module: &'a Module<'ctx>,
        builder: &'a Builder<'ctx>,
        target_data: TargetData,
        target: TargetInfo,
        opts: CodegenOptions,
        program: &'a Program,
    ) -> Result<Self, Vec<Diagnostic>> {
        module.set_triple(&TargetTriple::create(&target.triple));
        module.set_data_layout(&target_data.get_data_layout());
        module.add_basic_value_flag(
            "Debug Info Version",
            FlagBehavior::Warning,
            context.i32_type().const_int(3, false),
        );

        let di = DebugInfo::new(
            module,
            &program.source_file,
            &program.source_dir,
            &format!("sablec {}", env!("CARGO_PKG_VERSION")),
            opts.is_release_build,
        );

        let pointer_size_bytes = target_data.get_pointer_byte_size(None);
        let is_big_endian = target_data.get_byte_ordering() == ByteOrdering::BigEndian;
        let deployment_target = target.deployment_target();

        let mut g = Self {
            context,
            module,
            builder,
            target_data,
            target,
            opts,
            program,
            di,
            prims: PrimitiveTypes::placeholder(),
            primitive_table: HashMap::new(),
            pointer_size_bytes,
            is_big_endian,
            deployment_target,
            type_refs: HashMap::new(),
            di_types: HashMap::new(),
            fn_abis: HashMap::new(),
            int_overflow_fns: Default::default(),
            int_builtin_fns: Default::default(),
            trap_fn: None,
            return_address_fn: None,
            frame_address_fn: None,
            const_values: HashMap::new(),
            const_globals: HashMap::new(),
            fn_values: HashMap::new(),
            global_values: HashMap::new(),
            err_name_table: None,
            di_scopes: HashMap::new(),
            cur_fn: None,
            cur_fn_val: None,
            cur_ret_ptr: None,
            cur_span: Span::dummy(),
            values: HashMap::new(),
            tmp_ptrs: HashMap::new(),
            var_refs: Vec::new(),
            var_di: Vec::new(),
            block_refs: Vec::new(),
            block_exits: Vec::new(),
        };
        g.define_builtin_types();
        Ok(g)
    }

    /// Lower the whole program into the module.
    pub fn compile(&mut self) -> Result<(), Vec<Diagnostic>> {
        debug!(fns = self.program.fns.len(), "starting code generation");

        self.gen_error_name_table()?;
        self.gen_global_vars()?;

        // Prototypes, ABI attributes, and test-function entries.
        let mut test_fn_vals: Vec<StructValue<'ctx>> = Vec::new();
        for i in 0..self.program.fns.len() {
            let fn_id = FnId(i as u32);
            if self.should_skip_fn_codegen(fn_id) {
                continue;
            }
            let fn_val = self.fn_llvm_value(fn_id)?;
            self.declare_fn_attrs(fn_id, fn_val)?;
            if self.program.fn_decl(fn_id).is_test {
                test_fn_vals.push(self.gen_test_fn_val(fn_id, fn_val)?);
            }
        }

        if self.opts.is_test_build {
            if test_fn_vals.is_empty() {
                eprintln!("No tests to run.");
                return Err(vec![Diagnostic::from_error_code(
                    ErrorCode::NoTestsToRun,
                    Span::dummy(),
                )]);
            }
            self.gen_test_fn_list(&test_fn_vals)?;
        }

        // Function definitions.
        for i in 0..self.program.fns.len() {
            let fn_id = FnId(i as u32);
            if self.should_skip_fn_codegen(fn_id) {
                continue;
            }
            if self.program.fn_decl(fn_id).body.is_some() {
                self.compile_fn_def(fn_id)?;
            }
        }

        self.di.builder.finalize();

        if self.opts.verbose {
            self.module.print_to_stderr();
        }

        // Release builds trust the generated IR and skip verification.
        if !self.opts.is_release_build {
            if let Err(err) = self.module.verify() {
                return Err(vec![Diagnostic::error(
                    format!("module verification failed: {}", err.to_string()),
                    Span::dummy(),
                )
                .with_error_code(ErrorCode::VerifyFailed)]);
            }
        }

        if self.opts.want_h_file && !self.opts.is_test_build {
            self.generate_c_header()?;
        }

        debug!("code generation finished");
        Ok(())
    }

    /// Emit module-level variables.
    ///
    /// Numeric-literal globals are compile-time-only and produce debug info
    /// records backed by `f64` or `isize`/`usize`; everything else renders
    /// its constant and is promoted to a global.
    fn gen_global_vars(&mut self) -> Result<(), Vec<Diagnostic>> {
        for i in 0..self.program.globals.len() {
            let global_id = GlobalId(i as u32);
            let var = self.program.global(global_id).clone();

            match var.ty.kind() {
                TypeKind::NumLitFloat => {
                    if var.value.special == ConstSpecial::Runtime {
                        return Err(vec![ice!(var.span, "runtime value for global `{}`", var.name)]);
                    }
                    let backing = self.prims.f64_.clone();
                    self.gen_global_debug_var(&var, &backing)?;
                    continue;
                }
                TypeKind::NumLitInt => {
                    if var.value.special == ConstSpecial::Runtime {
                        return Err(vec![ice!(var.span, "runtime value for global `{}`", var.name)]);
                    }
                    let negative = match &var.value.kind {
                        ConstKind::Int(n) => n.sign() == num_bigint::Sign::Minus,
                        _ => false,
                    };
                    let backing = if negative {
                        self.prims.isize_.clone()
                    } else {
                        self.prims.usize_.clone()
                    };
                    self.gen_global_debug_var(&var, &backing)?;
                    continue;
                }
                _ => {}
            }

            if !self.type_has_bits(&var.ty) {
                continue;
            }

            let global_value = if var.is_extern {
                let llvm_ty = self.lower_type(&var.ty)?;
                let g = self.module.add_global(llvm_ty, None, &var.name);
                g.set_linkage(Linkage::External);
                g
            } else {
                self.render_const_val(&var.ty, &var.value)?;
                let g = self.render_const_val_global(&var.ty, &var.value)?;
                if var.is_const && !matches!(var.ty.kind(), TypeKind::Fn(_)) {
                    let ty = var.ty.clone();
                    self.gen_global_debug_var(&var, &ty)?;
                }
                g
            };

            global_value.set_constant(var.is_const);
            self.global_values.insert(global_id, global_value);
        }
        Ok(())
    }

    /// Emit the error-name table: one `{u8*, usize}` slice per declared
    /// error, indexed by tag, slot 0 undefined.
    fn gen_error_name_table(&mut self) -> Result<(), Vec<Diagnostic>> {
        if !self.program.generate_error_name_table || self.program.error_decls.len() == 1 {
            return Ok(());
        }

        let usize_ty = self.prims.usize_.clone();
        let str_type = self
            .program
            .types
            .slice_of(self.prims.u8.clone(), true, usize_ty);
        let str_llvm_ty = self.lower_type(&str_type)?.into_struct_type();
        let u8_ptr_ty = self
            .context
            .i8_type()
            .ptr_type(inkwell::AddressSpace::default());
        let usize_llvm = self
            .context
            .custom_width_int_type(self.pointer_size_bytes * 8);

        let mut values: Vec<StructValue<'ctx>> = Vec::with_capacity(self.program.error_decls.len());
        values.push(str_llvm_ty.get_undef());
        for decl in self.program.error_decls.iter().skip(1) {
            let name = decl.as_deref().unwrap_or("");
            let str_init = self.context.const_string(name.as_bytes(), false);
            let str_global = self.module.add_global(str_init.get_type(), None, "");
            str_global.set_initializer(&str_init);
            str_global.set_linkage(Linkage::Private);
            str_global.set_constant(true);
            str_global.set_unnamed_address(UnnamedAddress::Global);

            let fields: [BasicValueEnum<'ctx>; 2] = [
                str_global.as_pointer_value().const_cast(u8_ptr_ty).into(),
                usize_llvm.const_int(name.len() as u64, false).into(),
            ];
            values.push(str_llvm_ty.const_named_struct(&fields));
        }

        let table_init = str_llvm_ty.const_array(&values);
        let table = self
            .module
            .add_global(table_init.get_type(), None, "err_name_table");
        table.set_initializer(&table_init);
        table.set_linkage(Linkage::Private);
        table.set_constant(true);
        table.set_unnamed_address(UnnamedAddress::Global);
        self.err_name_table = Some(table);
        Ok(())
    }

    /// One `{ {u8*, usize}, fn* }` entry for the test-runner table.
    fn gen_test_fn_val(
        &mut self,
        fn_id: FnId,
        fn_val: FunctionValue<'ctx>,
    ) -> Result<StructValue<'ctx>, Vec<Diagnostic>> {
        let name = self.program.fn_decl(fn_id).symbol_name.clone();
        let str_init = self.context.const_string(name.as_bytes(), false);
        let str_global = self.module.add_global(str_init.get_type(), None, "");
        str_global.set_initializer(&str_init);
        str_global.set_linkage(Linkage::Private);
        str_global.set_constant(true);
        str_global.set_unnamed_address(UnnamedAddress::Global);

        let u8_ptr_ty = self
            .context
            .i8_type()
            .ptr_type(inkwell::AddressSpace::default());
        let usize_llvm = self
            .context
            .custom_width_int_type(self.pointer_size_bytes * 8);
        let name_fields: [BasicValueEnum<'ctx>; 2] = [
            str_global.as_pointer_value().const_cast(u8_ptr_ty).into(),
            usize_llvm.const_int(name.len() as u64, false).into(),
        ];
        let name_val = self.context.const_struct(&name_fields, false);

        let fields: [BasicValueEnum<'ctx>; 2] = [
            name_val.into(),
            fn_val.as_global_value().as_pointer_value().into(),
        ];
        Ok(self.context.const_struct(&fields, false))
    }

    /// The external `sable_test_fn_list` slice global the test runner walks.
    fn gen_test_fn_list(
        &mut self,
        test_fn_vals: &[StructValue<'ctx>],
    ) -> Result<(), Vec<Diagnostic>> {
        let entry_ty = test_fn_vals[0].get_type();
        let array_init = entry_ty.const_array(test_fn_vals);
        let array_global = self.module.add_global(array_init.get_type(), None, "");
        array_global.set_initializer(&array_init);
        array_global.set_linkage(Linkage::Internal);
        array_global.set_constant(true);
        array_global.set_unnamed_address(UnnamedAddress::Global);

        let usize_llvm = self
            .context
            .custom_width_int_type(self.pointer_size_bytes * 8);
        let entry_ptr_ty = entry_ty.ptr_type(inkwell::AddressSpace::default());
        let fields: [BasicValueEnum<'ctx>; 2] = [
            array_global
                .as_pointer_value()
                .const_cast(entry_ptr_ty)
                .into(),
            usize_llvm
                .const_int(test_fn_vals.len() as u64, false)
                .into(),
        ];
        let slice_init = self.context.const_struct(&fields, false);
        let slice_global = self
            .module
            .add_global(slice_init.get_type(), None, "sable_test_fn_list");
        slice_global.set_initializer(&slice_init);
        slice_global.set_linkage(Linkage::External);
        slice_global.set_constant(true);
        slice_global.set_unnamed_address(UnnamedAddress::Global);
        Ok(())
    }

    /// Wrap a backend builder failure into a diagnostic.
    pub(crate) fn llvm_err(
        &self,
        what: &str,
        err: impl std::fmt::Display,
        span: Span,
    ) -> Vec<Diagnostic> {
        vec![Diagnostic::error(
            format!("LLVM {} error: {}", what, err),
            span,
        )]
    }

    pub(crate) fn current_span(&self) -> Span {
        self.cur_span
    }
}
