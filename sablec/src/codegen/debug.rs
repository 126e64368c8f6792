//! Debug information: the DWARF builder wrapper and the lazy scope
//! resolver.
//!
//! Every lowered instruction gets a debug location resolved through its
//! lexical scope; scopes materialize their debug counterparts on first use
//! and are cached on the context.

use inkwell::debug_info::{
    AsDIScope, DICompileUnit, DIFile, DIFlags, DIFlagsConstants, DILocalVariable, DIScope,
    DIType, DWARFEmissionKind, DWARFSourceLanguage, DebugInfoBuilder,
};
use inkwell::module::Module;
use inkwell::values::PointerValue;

use crate::diagnostics::Diagnostic;
use crate::ice;
use crate::ir::{GlobalVar, Inst, ScopeId, ScopeKind, Type};
use crate::span::Span;

use super::CodeGen;

/// The debug-info builder, compile unit, and file handle for one module.
pub(crate) struct DebugInfo<'ctx> {
    pub builder: DebugInfoBuilder<'ctx>,
    pub compile_unit: DICompileUnit<'ctx>,
    main_file: DIFile<'ctx>,
}

impl<'ctx> DebugInfo<'ctx> {
    pub(crate) fn new(
        module: &Module<'ctx>,
        source_file: &str,
        source_dir: &str,
        producer: &str,
        is_optimized: bool,
    ) -> Self {
        let (builder, compile_unit) = module.create_debug_info_builder(
            true, // allow_unresolved
            DWARFSourceLanguage::C99,
            source_file,
            source_dir,
            producer,
            is_optimized,
            "", // flags
            0,  // runtime_version
            "", // split_name
            DWARFEmissionKind::Full,
            0,    // dwo_id
            true, // split_debug_inlining
            false, // debug_info_for_profiling
            "",   // sys_root
            "",   // sdk
        );
        let main_file = builder.create_file(source_file, source_dir);
        Self {
            builder,
            compile_unit,
            main_file,
        }
    }

    pub(crate) fn main_file(&self) -> DIFile<'ctx> {
        self.main_file
    }
}

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    /// Lazily resolve a lexical scope to its debug scope.
    pub(crate) fn di_scope(&mut self, scope: ScopeId) -> Result<DIScope<'ctx>, Vec<Diagnostic>> {
        if let Some(s) = self.di_scopes.get(&scope) {
            return Ok(*s);
        }
        let data = self.program.scopes.get(scope).clone();

        let resolved: DIScope<'ctx> = match &data.kind {
            ScopeKind::CImport => {
                return Err(vec![ice!(
                    data.span,
                    "c-import scope reached during code generation"
                )]);
            }
            ScopeKind::FnDef { fn_id } => {
                let parent = match data.parent {
                    Some(p) => self.di_scope(p)?,
                    None => {
                        return Err(vec![ice!(data.span, "function scope without a parent")])
                    }
                };
                let decl = self.program.fn_decl(*fn_id).clone();
                let line = decl.span.loc.line;

                let sig = decl.fn_type.fn_sig().cloned().ok_or_else(|| {
                    vec![ice!(decl.span, "function `{}` has a non-fn type", decl.symbol_name)]
                })?;
                let ret_di = self.di_type(&sig.ret)?;
                let mut param_dis: Vec<DIType<'ctx>> = Vec::new();
                for param in &sig.params {
                    if let Some(di) = self.di_type(&param.ty)? {
                        param_dis.push(di);
                    }
                }
                let file = self.di.main_file();
                let sub_ty =
                    self.di
                        .builder
                        .create_subroutine_type(file, ret_di, &param_dis, DIFlags::ZERO);
                let subprogram = self.di.builder.create_function(
                    parent,
                    &decl.symbol_name,
                    None,
                    file,
                    line,
                    sub_ty,
                    decl.internal_linkage,
                    decl.body.is_some(),
                    line,
                    DIFlags::ZERO,
                    self.opts.is_release_build,
                );
                let fn_val = self.fn_llvm_value(*fn_id)?;
                fn_val.set_subprogram(subprogram);
                subprogram.as_debug_info_scope()
            }
            // Container scopes map to the file scope. (Nested containers
            // would map to their composite debug type, but the bindings
            // offer no type-to-scope conversion; line tables are
            // unaffected.)
            ScopeKind::Decls { .. } => self.di.main_file().as_debug_info_scope(),
            ScopeKind::Block { .. }
            | ScopeKind::Defer
            | ScopeKind::VarDecl
            | ScopeKind::Loop => {
                let parent = match data.parent {
                    Some(p) => self.di_scope(p)?,
                    None => {
                        return Err(vec![ice!(data.span, "block scope without a parent")])
                    }
                };
                let file = self.di.main_file();
                let block = self.di.builder.create_lexical_block(
                    parent,
                    file,
                    data.span.loc.line,
                    data.span.loc.col,
                );
                block.as_debug_info_scope()
            }
        };

        self.di_scopes.insert(scope, resolved);
        Ok(resolved)
    }

    /// Point the builder's debug location at an instruction's source.
    pub(crate) fn set_debug_location(&mut self, inst: &Inst) -> Result<(), Vec<Diagnostic>> {
        self.cur_span = inst.span;
        let scope = self.di_scope(inst.scope)?;
        let loc = self.di.builder.create_debug_location(
            self.context,
            inst.span.loc.line,
            inst.span.loc.col,
            scope,
            None,
        );
        self.builder.set_current_debug_location(loc);
        Ok(())
    }

    /// Detach the debug location, for stores that belong to no source line
    /// (parameter spills).
    pub(crate) fn clear_debug_location(&mut self) {
        self.builder.unset_current_debug_location();
    }

    /// Record a debug entry for a module-level variable. Numeric-literal
    /// globals exist only as these records.
    pub(crate) fn gen_global_debug_var(
        &mut self,
        var: &GlobalVar,
        backing_ty: &Type,
    ) -> Result<(), Vec<Diagnostic>> {
        if self.opts.strip_debug_symbols {
            return Ok(());
        }
        let di_ty = match self.di_type(backing_ty)? {
            Some(t) => t,
            None => return Ok(()),
        };
        let scope = self.di_scope(var.scope)?;
        let file = self.di.main_file();
        self.di.builder.create_global_variable_expression(
            scope,
            &var.name,
            "",
            file,
            var.span.loc.line,
            di_ty,
            true, // local to unit
            None,
            None,
            0,
        );
        Ok(())
    }

    /// Attach a `dbg.declare` for a variable's stack slot at the current
    /// insertion block.
    pub(crate) fn insert_var_declare(
        &mut self,
        storage: PointerValue<'ctx>,
        di_var: DILocalVariable<'ctx>,
        scope: ScopeId,
        span: Span,
    ) -> Result<(), Vec<Diagnostic>> {
        let di_scope = self.di_scope(scope)?;
        let loc = self.di.builder.create_debug_location(
            self.context,
            span.loc.line,
            span.loc.col,
            di_scope,
            None,
        );
        let block = self
            .builder
            .get_insert_block()
            .ok_or_else(|| vec![ice!(span, "no insertion block for variable declare")])?;
        self.di
            .builder
            .insert_declare_at_end(storage, Some(di_var), None, loc, block);
        Ok(())
    }
}
