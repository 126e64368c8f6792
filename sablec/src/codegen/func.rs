//! Function-level driving: prototypes with ABI attributes, the prologue
//! (temporaries, variable slots, parameter binding, debug declares), and
//! the block walk.

use inkwell::attributes::{Attribute, AttributeLoc};
use inkwell::debug_info::{DIFlags, DIFlagsConstants};
use inkwell::module::Linkage;
use inkwell::types::AnyType;
use inkwell::values::FunctionValue;

use crate::diagnostics::Diagnostic;
use crate::ice;
use crate::ir::{FnId, FnInline, InstKind, Type, TypeKind, VarId};

use super::CodeGen;

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    /// Get or declare the backend function for a prototype, applying the
    /// attributes that belong to the declaration itself.
    pub(crate) fn fn_llvm_value(&mut self, fn_id: FnId) -> Result<FunctionValue<'ctx>, Vec<Diagnostic>> {
        if let Some(f) = self.fn_values.get(&fn_id) {
            return Ok(*f);
        }
        let decl = self.program.fn_decl(fn_id).clone();
        let sig = decl.fn_type.fn_sig().cloned().ok_or_else(|| {
            vec![ice!(decl.span, "function `{}` has a non-fn type", decl.symbol_name)]
        })?;
        let abi = self.fn_abi(&decl.fn_type)?;

        let symbol_name = if decl.internal_linkage {
            format!("_{}", decl.symbol_name)
        } else {
            decl.symbol_name.clone()
        };
        let linkage = if decl.internal_linkage {
            Linkage::Internal
        } else {
            Linkage::External
        };
        let fn_val = self
            .module
            .add_function(&symbol_name, abi.fn_type, Some(linkage));

        match decl.inline {
            FnInline::Always => {
                fn_val.add_attribute(AttributeLoc::Function, self.enum_attr("alwaysinline"));
            }
            FnInline::Never => {
                fn_val.add_attribute(AttributeLoc::Function, self.enum_attr("noinline"));
            }
            FnInline::Auto => {}
        }
        if sig.is_naked {
            fn_val.add_attribute(AttributeLoc::Function, self.enum_attr("naked"));
        }
        if sig.ret.is_unreachable() {
            fn_val.add_attribute(AttributeLoc::Function, self.enum_attr("noreturn"));
        }
        fn_val.set_call_conventions(sig.cc.llvm_id());
        if !sig.is_extern {
            fn_val.add_attribute(AttributeLoc::Function, self.enum_attr("nounwind"));
        }
        if !self.opts.is_release_build && decl.inline != FnInline::Always {
            fn_val.add_attribute(
                AttributeLoc::Function,
                self.context.create_string_attribute("frame-pointer", "all"),
            );
        }

        self.fn_values.insert(fn_id, fn_val);
        Ok(fn_val)
    }

    pub(crate) fn enum_attr(&self, name: &str) -> Attribute {
        self.context
            .create_enum_attribute(Attribute::get_named_enum_kind_id(name), 0)
    }

    /// Return-slot and parameter attributes, applied once per prototype.
    pub(crate) fn declare_fn_attrs(
        &mut self,
        fn_id: FnId,
        fn_val: FunctionValue<'ctx>,
    ) -> Result<(), Vec<Diagnostic>> {
        let decl = self.program.fn_decl(fn_id).clone();
        let sig = decl.fn_type.fn_sig().cloned().ok_or_else(|| {
            vec![ice!(decl.span, "function `{}` has a non-fn type", decl.symbol_name)]
        })?;
        let abi = self.fn_abi(&decl.fn_type)?;

        let ret = &sig.ret;
        if !self.type_has_bits(ret) {
            // nothing to attach
        } else if matches!(ret.kind(), TypeKind::Pointer { .. }) {
            fn_val.add_attribute(AttributeLoc::Return, self.enum_attr("nonnull"));
        } else if abi.ret_by_ref {
            let ret_llvm = self.lower_type(ret)?;
            let sret = self.context.create_type_attribute(
                Attribute::get_named_enum_kind_id("sret"),
                ret_llvm.as_any_type_enum(),
            );
            fn_val.add_attribute(AttributeLoc::Param(0), sret);
            fn_val.add_attribute(AttributeLoc::Param(0), self.enum_attr("nonnull"));
        }

        for (src_i, param) in sig.params.iter().enumerate() {
            let gen_index = match abi.param_map[src_i] {
                Some(idx) => idx,
                None => continue,
            };
            let gen_ty = match &abi.gen_param_types[src_i] {
                Some(ty) => ty.clone(),
                None => continue,
            };
            if param.is_noalias {
                fn_val.add_attribute(AttributeLoc::Param(gen_index), self.enum_attr("noalias"));
            }
            if matches!(gen_ty.kind(), TypeKind::Pointer { is_const: true, .. }) {
                fn_val.add_attribute(AttributeLoc::Param(gen_index), self.enum_attr("readonly"));
            }
            if matches!(gen_ty.kind(), TypeKind::Pointer { .. }) {
                fn_val.add_attribute(AttributeLoc::Param(gen_index), self.enum_attr("nonnull"));
            }
            // The byval interaction with variadic arguments is unresolved;
            // no byval attribute is emitted.
        }
        Ok(())
    }

    /// Test functions exist only in test builds; the main function is
    /// replaced by the test runner there.
    pub(crate) fn should_skip_fn_codegen(&self, fn_id: FnId) -> bool {
        let decl = self.program.fn_decl(fn_id);
        if self.opts.is_test_build {
            if decl.is_test {
                return false;
            }
            return Some(fn_id) == self.program.main_fn;
        }
        decl.is_test
    }

    /// Lower one function definition: prologue then every block in order.
    pub(crate) fn compile_fn_def(&mut self, fn_id: FnId) -> Result<(), Vec<Diagnostic>> {
        let program = self.program;
        let decl = program.fn_decl(fn_id);
        let body = decl
            .body
            .as_ref()
            .ok_or_else(|| vec![ice!(decl.span, "compiling `{}` without a body", decl.symbol_name)])?;

        let fn_val = self.fn_llvm_value(fn_id)?;
        let abi = self.fn_abi(&decl.fn_type)?;
        self.cur_fn = Some(fn_id);
        self.cur_fn_val = Some(fn_val);
        self.cur_ret_ptr = if abi.ret_by_ref {
            Some(
                fn_val
                    .get_nth_param(0)
                    .ok_or_else(|| vec![ice!(decl.span, "missing return pointer parameter")])?
                    .into_pointer_value(),
            )
        } else {
            None
        };
        self.values.clear();
        self.tmp_ptrs.clear();
        self.var_refs = vec![None; body.variables.len()];
        self.var_di = vec![None; body.variables.len()];
        self.block_refs.clear();
        self.block_exits = vec![None; body.blocks.len()];

        // All backend blocks up front; branches may target blocks that have
        // not been lowered yet.
        for block in &body.blocks {
            self.block_refs
                .push(self.context.append_basic_block(fn_val, &block.name_hint));
        }
        self.builder.position_at_end(self.block_refs[0]);
        self.clear_debug_location();

        // Stack temporaries for aggregate-producing instructions.
        for &inst_id in &body.alloca_list {
            let inst = body.inst(inst_id);
            let alloca_ty = match &inst.kind {
                // Address-of spills the operand, so the slot holds the
                // operand's type, not the resulting pointer.
                InstKind::Ref { value } => body.inst(*value).ty.clone(),
                _ => inst.ty.clone(),
            };
            if !self.type_has_bits(&alloca_ty) {
                continue;
            }
            let llvm_ty = self.lower_type(&alloca_ty)?;
            let tmp = self
                .builder
                .build_alloca(llvm_ty, "")
                .map_err(|e| self.llvm_err("alloca", e, inst.span))?;
            self.tmp_ptrs.insert(inst_id, tmp);
        }

        // Variable slots and debug records.
        for (i, var) in body.variables.iter().enumerate() {
            if !self.type_has_bits(&var.ty) || var.is_inline {
                continue;
            }
            let llvm_ty = self.lower_type(&var.ty)?;
            let scope_di = self.di_scope(var.scope)?;
            let file = self.di.main_file();

            if let Some(_src_idx) = var.src_arg_index {
                let gen_idx = var.gen_arg_index.ok_or_else(|| {
                    vec![ice!(var.span, "parameter `{}` has no generated index", var.name)]
                })?;
                let gen_ty = if self.handle_is_ptr(&var.ty) {
                    // By-reference parameters bind straight to the argument.
                    let p = fn_val
                        .get_nth_param(gen_idx)
                        .ok_or_else(|| vec![ice!(var.span, "missing parameter {}", gen_idx)])?
                        .into_pointer_value();
                    self.var_refs[i] = Some(p);
                    Type::pointer(var.ty.clone(), true)
                } else {
                    let slot = self
                        .builder
                        .build_alloca(llvm_ty, &var.name)
                        .map_err(|e| self.llvm_err("alloca", e, var.span))?;
                    let align = self.pref_align(llvm_ty);
                    if let Some(slot_inst) = slot.as_instruction() {
                        let _ = slot_inst.set_alignment(align);
                    }
                    self.var_refs[i] = Some(slot);
                    var.ty.clone()
                };
                if let Some(di_ty) = self.di_type(&gen_ty)? {
                    let di_var = self.di.builder.create_parameter_variable(
                        scope_di,
                        &var.name,
                        gen_idx + 1,
                        file,
                        var.span.loc.line,
                        di_ty,
                        !self.opts.strip_debug_symbols,
                        DIFlags::ZERO,
                    );
                    self.var_di[i] = Some(di_var);
                }
            } else {
                let slot = self
                    .builder
                    .build_alloca(llvm_ty, &var.name)
                    .map_err(|e| self.llvm_err("alloca", e, var.span))?;
                let align = self.pref_align(llvm_ty);
                if let Some(slot_inst) = slot.as_instruction() {
                    let _ = slot_inst.set_alignment(align);
                }
                self.var_refs[i] = Some(slot);
                if let Some(di_ty) = self.di_type(&var.ty.clone())? {
                    let di_var = self.di.builder.create_auto_variable(
                        scope_di,
                        &var.name,
                        file,
                        var.span.loc.line,
                        di_ty,
                        !self.opts.strip_debug_symbols,
                        DIFlags::ZERO,
                        0,
                    );
                    self.var_di[i] = Some(di_var);
                }
            }
        }

        // Spill by-value parameters into their slots. The stores belong to
        // no source line.
        for (i, var) in body.variables.iter().enumerate() {
            if !self.type_has_bits(&var.ty) || var.is_inline {
                continue;
            }
            if var.src_arg_index.is_none() {
                continue;
            }
            if !self.handle_is_ptr(&var.ty) {
                self.clear_debug_location();
                let gen_idx = var.gen_arg_index.ok_or_else(|| {
                    vec![ice!(var.span, "parameter `{}` has no generated index", var.name)]
                })?;
                let p = fn_val
                    .get_nth_param(gen_idx)
                    .ok_or_else(|| vec![ice!(var.span, "missing parameter {}", gen_idx)])?;
                let slot = self.var_refs[i].ok_or_else(|| {
                    vec![ice!(var.span, "parameter `{}` has no storage", var.name)]
                })?;
                let store = self
                    .builder
                    .build_store(slot, p)
                    .map_err(|e| self.llvm_err("store", e, var.span))?;
                let llvm_ty = self.lower_type(&var.ty)?;
                let _ = store.set_alignment(self.pref_align(llvm_ty));
            }
            self.gen_var_debug_decl(VarId(i as u32), body.variable(VarId(i as u32)))?;
        }

        // Lower every block.
        for (block_idx, block) in body.blocks.iter().enumerate() {
            if block.ref_count == 0 && block_idx != 0 {
                // Unreachable; the backend block stays empty but needs a
                // terminator to be well formed.
                self.builder.position_at_end(self.block_refs[block_idx]);
                self.builder
                    .build_unreachable()
                    .map_err(|e| self.llvm_err("unreachable", e, decl.span))?;
                self.block_exits[block_idx] = Some(self.block_refs[block_idx]);
                continue;
            }
            self.builder.position_at_end(self.block_refs[block_idx]);
            for &inst_id in &block.insts {
                let inst = body.inst(inst_id);
                if inst.ref_count == 0 && !inst.has_side_effects() {
                    continue;
                }
                // Compile-time values materialize lazily at their uses.
                if inst.value.is_comptime() {
                    continue;
                }
                let rendered = self.render_instruction(body, inst_id)?;
                if let Some(v) = rendered {
                    self.values.insert(inst_id, v);
                }
            }
            self.block_exits[block_idx] = self.builder.get_insert_block();
        }

        self.cur_fn = None;
        self.cur_fn_val = None;
        self.cur_ret_ptr = None;
        Ok(())
    }

    /// Attach the `dbg.declare` for a variable.
    pub(crate) fn gen_var_debug_decl(
        &mut self,
        var_id: VarId,
        var: &crate::ir::Variable,
    ) -> Result<(), Vec<Diagnostic>> {
        let storage = match self.var_refs[var_id.0 as usize] {
            Some(p) => p,
            None => return Ok(()),
        };
        let di_var = match self.var_di[var_id.0 as usize] {
            Some(v) => v,
            None => return Ok(()),
        };
        self.insert_var_declare(storage, di_var, var.scope, var.span)
    }
}
