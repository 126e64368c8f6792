//! Control flow, calls, inline assembly, and the optional/error helpers
//! that operate through pointers.

use inkwell::types::BasicType;
use inkwell::values::{
    BasicMetadataValueEnum, BasicValue, BasicValueEnum, CallableValue, IntValue, PointerValue,
};
use inkwell::IntPredicate;

use crate::diagnostics::Diagnostic;
use crate::ice;
use crate::ir::{
    AsmExpr, AsmToken, BlockId, Callee, FnBody, InstId, PhiIncoming, SwitchCase, Type, TypeKind,
};

use crate::codegen::CodeGen;

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    /// Scalar returns use `ret`; by-reference returns copy into the hidden
    /// pointer; extern aggregate returns load and return by value.
    pub(crate) fn render_return(
        &mut self,
        body: &FnBody,
        value: InstId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let span = body.inst(value).span;
        let value_val = self.ir_llvm_value(body, value)?;
        let fn_id = self
            .cur_fn
            .ok_or_else(|| vec![ice!(span, "return outside a function")])?;
        let decl = self.program.fn_decl(fn_id);
        let sig = decl.fn_type.fn_sig().cloned().ok_or_else(|| {
            vec![ice!(span, "function `{}` has a non-fn type", decl.symbol_name)]
        })?;
        let return_type = sig.ret.clone();

        if self.handle_is_ptr(&return_type) {
            let value_val =
                value_val.ok_or_else(|| vec![ice!(span, "aggregate return of absent value")])?;
            if sig.is_extern {
                let by_val_value = self
                    .builder
                    .build_load(value_val.into_pointer_value(), "")
                    .map_err(|e| self.llvm_err("load", e, span))?;
                self.builder
                    .build_return(Some(&by_val_value))
                    .map_err(|e| self.llvm_err("return", e, span))?;
            } else {
                let ret_ptr = self
                    .cur_ret_ptr
                    .ok_or_else(|| vec![ice!(span, "missing hidden return pointer")])?;
                self.gen_assign_raw(ret_ptr, value_val, &return_type)?;
                self.builder
                    .build_return(None)
                    .map_err(|e| self.llvm_err("return", e, span))?;
            }
        } else {
            match value_val {
                Some(v) => {
                    self.builder
                        .build_return(Some(&v))
                        .map_err(|e| self.llvm_err("return", e, span))?;
                }
                None => {
                    self.builder
                        .build_return(None)
                        .map_err(|e| self.llvm_err("return", e, span))?;
                }
            }
        }
        Ok(None)
    }

    /// Reached `unreachable`: trap when safety is on (or in test builds),
    /// otherwise tell the backend the truth.
    pub(crate) fn render_unreachable(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        if self.want_debug_safety(inst) || self.opts.is_test_build {
            self.gen_safety_crash()?;
        } else {
            self.builder
                .build_unreachable()
                .map_err(|e| self.llvm_err("unreachable", e, inst.span))?;
        }
        Ok(None)
    }

    pub(crate) fn render_cond_br(
        &mut self,
        body: &FnBody,
        condition: InstId,
        then_block: BlockId,
        else_block: BlockId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let span = body.inst(condition).span;
        let cond = self
            .ir_llvm_value(body, condition)?
            .ok_or_else(|| vec![ice!(span, "branch condition has no value")])?
            .into_int_value();
        self.builder
            .build_conditional_branch(
                cond,
                self.block_refs[then_block.0 as usize],
                self.block_refs[else_block.0 as usize],
            )
            .map_err(|e| self.llvm_err("branch", e, span))?;
        Ok(None)
    }

    pub(crate) fn render_br(
        &mut self,
        dest: BlockId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        self.builder
            .build_unconditional_branch(self.block_refs[dest.0 as usize])
            .map_err(|e| self.llvm_err("branch", e, self.current_span()))?;
        Ok(None)
    }

    pub(crate) fn render_switch_br(
        &mut self,
        body: &FnBody,
        target: InstId,
        else_block: BlockId,
        cases: &[SwitchCase],
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let span = body.inst(target).span;
        let target_value = self
            .ir_llvm_value(body, target)?
            .ok_or_else(|| vec![ice!(span, "switch target has no value")])?
            .into_int_value();
        let mut llvm_cases: Vec<(IntValue<'ctx>, inkwell::basic_block::BasicBlock<'ctx>)> =
            Vec::with_capacity(cases.len());
        for case in cases {
            let case_value = self
                .ir_llvm_value(body, case.value)?
                .ok_or_else(|| vec![ice!(span, "switch case has no value")])?
                .into_int_value();
            llvm_cases.push((case_value, self.block_refs[case.block.0 as usize]));
        }
        self.builder
            .build_switch(
                target_value,
                self.block_refs[else_block.0 as usize],
                &llvm_cases,
            )
            .map_err(|e| self.llvm_err("switch", e, span))?;
        Ok(None)
    }

    /// Phi incoming edges reference each predecessor's *exit* block, since
    /// safety checks may have appended blocks inside it.
    pub(crate) fn render_phi(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        incoming: &[PhiIncoming],
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        let span = inst.span;
        let llvm_ty = self.lower_type(&inst.ty)?;
        let phi = self
            .builder
            .build_phi(llvm_ty, "")
            .map_err(|e| self.llvm_err("phi", e, span))?;

        let mut values: Vec<BasicValueEnum<'ctx>> = Vec::with_capacity(incoming.len());
        let mut blocks: Vec<inkwell::basic_block::BasicBlock<'ctx>> =
            Vec::with_capacity(incoming.len());
        for edge in incoming {
            let v = self
                .ir_llvm_value(body, edge.value)?
                .ok_or_else(|| vec![ice!(span, "phi operand has no value")])?;
            values.push(v);
            let idx = edge.block.0 as usize;
            blocks.push(self.block_exits[idx].unwrap_or(self.block_refs[idx]));
        }
        let edges: Vec<(&dyn BasicValue<'ctx>, inkwell::basic_block::BasicBlock<'ctx>)> = values
            .iter()
            .zip(blocks.iter().copied())
            .map(|(v, b)| (v as &dyn BasicValue<'ctx>, b))
            .collect();
        phi.add_incoming(&edges);
        Ok(Some(phi.as_basic_value()))
    }

    pub(crate) fn render_call(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        callee: &Callee,
        args: &[InstId],
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        let span = inst.span;

        let (direct_fn, indirect_ptr, fn_type): (
            Option<inkwell::values::FunctionValue<'ctx>>,
            Option<PointerValue<'ctx>>,
            Type,
        ) = match callee {
            Callee::Fn(fn_id) => (
                Some(self.fn_llvm_value(*fn_id)?),
                None,
                self.program.fn_decl(*fn_id).fn_type.clone(),
            ),
            Callee::Value(value) => {
                let v = self
                    .ir_llvm_value(body, *value)?
                    .ok_or_else(|| vec![ice!(span, "callee has no value")])?;
                (
                    None,
                    Some(v.into_pointer_value()),
                    body.inst(*value).ty.clone(),
                )
            }
        };
        let sig = fn_type
            .fn_sig()
            .cloned()
            .ok_or_else(|| vec![ice!(span, "call through non-function type")])?;
        let abi = self.fn_abi(&fn_type)?;
        let src_return_type = sig.ret.clone();
        let ret_has_bits = self.type_has_bits(&src_return_type);

        let mut gen_param_values: Vec<BasicMetadataValueEnum<'ctx>> = Vec::new();
        if abi.ret_by_ref {
            gen_param_values.push(self.tmp_ptr(inst_id)?.into());
        }
        for &arg in args {
            let param_type = body.inst(arg).ty.clone();
            if sig.is_var_args || self.type_has_bits(&param_type) {
                let param_value = self
                    .ir_llvm_value(body, arg)?
                    .ok_or_else(|| vec![ice!(span, "call argument has no value")])?;
                gen_param_values.push(param_value.into());
            }
        }

        let call_site = if let Some(f) = direct_fn {
            self.builder
                .build_call(f, &gen_param_values, "")
                .map_err(|e| self.llvm_err("call", e, span))?
        } else {
            let ptr = indirect_ptr.expect("either a direct or an indirect callee");
            let callable = CallableValue::try_from(ptr)
                .map_err(|_| vec![ice!(span, "callee is not a function pointer")])?;
            self.builder
                .build_call(callable, &gen_param_values, "")
                .map_err(|e| self.llvm_err("call", e, span))?
        };
        call_site.set_call_convention(sig.cc.llvm_id());

        if src_return_type.is_unreachable() {
            self.builder
                .build_unreachable()
                .map_err(|e| self.llvm_err("unreachable", e, span))?;
            Ok(None)
        } else if !ret_has_bits {
            Ok(None)
        } else if abi.ret_by_ref {
            Ok(Some(self.tmp_ptr(inst_id)?.into()))
        } else {
            let result = call_site
                .try_as_basic_value()
                .left()
                .ok_or_else(|| vec![ice!(span, "call produced no value")])?;
            Ok(Some(result))
        }
    }

    /// 0 when absent, 1 when present, read through a pointer-to-optional.
    fn gen_null_bit(
        &mut self,
        ptr_type: &Type,
        maybe_ptr: PointerValue<'ctx>,
    ) -> Result<IntValue<'ctx>, Vec<Diagnostic>> {
        let span = self.current_span();
        let maybe_type = match self.canonical(ptr_type).kind() {
            TypeKind::Pointer { child, .. } => self.canonical(child),
            _ => return Err(vec![ice!(span, "null test through non-pointer")]),
        };
        let child = match maybe_type.kind() {
            TypeKind::Optional { child } => child.clone(),
            _ => return Err(vec![ice!(span, "null test of non-optional")]),
        };
        let maybe_handle = self.get_handle_value(maybe_ptr, &maybe_type)?;
        if child.is_pointer_or_fn() {
            let null = self.lower_type(&child)?.into_pointer_type().const_null();
            self.builder
                .build_int_compare(
                    IntPredicate::NE,
                    maybe_handle.into_pointer_value(),
                    null,
                    "",
                )
                .map_err(|e| self.llvm_err("icmp", e, span))
        } else {
            let maybe_field_ptr = self
                .builder
                .build_struct_gep(maybe_handle.into_pointer_value(), 1, "")
                .map_err(|e| self.llvm_err("gep", e, span))?;
            let bit = self
                .builder
                .build_load(maybe_field_ptr, "")
                .map_err(|e| self.llvm_err("load", e, span))?;
            Ok(bit.into_int_value())
        }
    }

    pub(crate) fn render_test_null(
        &mut self,
        body: &FnBody,
        value: InstId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let operand = body.inst(value);
        let span = operand.span;
        let ptr_type = operand.ty.clone();
        let maybe_ptr = self
            .ir_llvm_value(body, value)?
            .ok_or_else(|| vec![ice!(span, "null test of absent value")])?;
        let bit = self.gen_null_bit(&ptr_type, maybe_ptr.into_pointer_value())?;
        Ok(Some(bit.into()))
    }

    /// Unwrap through a pointer-to-optional, yielding a pointer to the
    /// payload.
    pub(crate) fn render_unwrap_optional(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        value: InstId,
        safety_check_on: bool,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        let span = inst.span;
        let ptr_type = body.inst(value).ty.clone();
        let maybe_type = match self.canonical(&ptr_type).kind() {
            TypeKind::Pointer { child, .. } => self.canonical(child),
            _ => return Err(vec![ice!(span, "optional unwrap through non-pointer")]),
        };
        let child = match maybe_type.kind() {
            TypeKind::Optional { child } => child.clone(),
            _ => return Err(vec![ice!(span, "optional unwrap of non-optional")]),
        };
        let maybe_is_ptr = child.is_pointer_or_fn();
        let maybe_ptr = self
            .ir_llvm_value(body, value)?
            .ok_or_else(|| vec![ice!(span, "optional unwrap of absent value")])?
            .into_pointer_value();

        if safety_check_on && self.want_debug_safety(inst) {
            let nonnull_bit = self.gen_null_bit(&ptr_type, maybe_ptr)?;
            let fn_val = self.cur_fn_value()?;
            let ok_block = self.context.append_basic_block(fn_val, "UnwrapMaybeOk");
            let fail_block = self.context.append_basic_block(fn_val, "UnwrapMaybeFail");
            self.builder
                .build_conditional_branch(nonnull_bit, ok_block, fail_block)
                .map_err(|e| self.llvm_err("branch", e, span))?;
            self.builder.position_at_end(fail_block);
            self.gen_safety_crash()?;
            self.builder.position_at_end(ok_block);
        }

        if maybe_is_ptr {
            // An optional pointer is the pointer; its address doubles as
            // the payload's address.
            Ok(Some(maybe_ptr.into()))
        } else {
            let maybe_handle = self.get_handle_value(maybe_ptr, &maybe_type)?;
            let child_ptr = self
                .builder
                .build_struct_gep(maybe_handle.into_pointer_value(), 0, "")
                .map_err(|e| self.llvm_err("gep", e, span))?;
            Ok(Some(child_ptr.into()))
        }
    }

    /// Count leading/trailing zeros, with the zero-input-defined behavior.
    pub(crate) fn render_bit_count(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        value: InstId,
        is_ctz: bool,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        let span = inst.span;
        let int_ty = self.lower_type(&inst.ty)?.into_int_type();
        let fn_val = self.bit_count_intrinsic(is_ctz, int_ty)?;
        let operand = self
            .ir_llvm_value(body, value)?
            .ok_or_else(|| vec![ice!(span, "bit count of absent value")])?;
        let is_zero_undef = self.context.bool_type().const_zero();
        let result = self
            .builder
            .build_call(fn_val, &[operand.into(), is_zero_undef.into()], "")
            .map_err(|e| self.llvm_err("call", e, span))?
            .try_as_basic_value()
            .left()
            .ok_or_else(|| vec![ice!(span, "bit count intrinsic produced no value")])?;
        Ok(Some(result))
    }

    /// Index the error-name table with a bounds check on the tag.
    pub(crate) fn render_err_name(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        value: InstId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        let span = inst.span;
        if !self.program.generate_error_name_table {
            return Err(vec![ice!(span, "error-name table was not requested")]);
        }
        if self.program.error_decls.len() == 1 {
            self.builder
                .build_unreachable()
                .map_err(|e| self.llvm_err("unreachable", e, span))?;
            return Ok(None);
        }

        let err_val = self
            .ir_llvm_value(body, value)?
            .ok_or_else(|| vec![ice!(span, "error name of absent value")])?
            .into_int_value();
        if self.want_debug_safety(inst) {
            let zero = err_val.get_type().const_zero();
            let end_val = err_val
                .get_type()
                .const_int(self.program.error_decls.len() as u64, false);
            self.add_bounds_check(
                err_val,
                Some((IntPredicate::NE, zero)),
                Some((IntPredicate::ULT, end_val)),
            )?;
        }

        let table = self
            .err_name_table
            .ok_or_else(|| vec![ice!(span, "error-name table was not emitted")])?;
        let indices = [self.usize_llvm_type().const_zero(), err_val];
        let gep = unsafe {
            self.builder
                .build_in_bounds_gep(table.as_pointer_value(), &indices, "")
        }
        .map_err(|e| self.llvm_err("gep", e, span))?;
        Ok(Some(gep.into()))
    }

    pub(crate) fn render_return_address(
        &mut self,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let span = self.current_span();
        let f = self.return_address_fn()?;
        let zero = self.context.i32_type().const_zero();
        let result = self
            .builder
            .build_call(f, &[zero.into()], "")
            .map_err(|e| self.llvm_err("call", e, span))?
            .try_as_basic_value()
            .left()
            .ok_or_else(|| vec![ice!(span, "returnaddress produced no value")])?;
        Ok(Some(result))
    }

    pub(crate) fn render_frame_address(
        &mut self,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let span = self.current_span();
        let f = self.frame_address_fn()?;
        let zero = self.context.i32_type().const_zero();
        let result = self
            .builder
            .build_call(f, &[zero.into()], "")
            .map_err(|e| self.llvm_err("call", e, span))?
            .try_as_basic_value()
            .left()
            .ok_or_else(|| vec![ice!(span, "frameaddress produced no value")])?;
        Ok(Some(result))
    }

    /// Inline assembly: rewrite the template to `$N` operand references,
    /// build the constraint string, and call the asm value.
    pub(crate) fn render_asm(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        asm: &AsmExpr,
        inputs: &[InstId],
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        let span = inst.span;
        let return_count = asm.return_count();
        if return_count > 1 {
            return Err(vec![ice!(span, "asm expression with multiple results")]);
        }

        let mut llvm_template = String::new();
        for token in &asm.tokens {
            match token {
                AsmToken::Template { start, end } => {
                    for c in asm.template[*start..*end].chars() {
                        if c == '$' {
                            llvm_template.push_str("$$");
                        } else {
                            llvm_template.push(c);
                        }
                    }
                }
                AsmToken::Percent => llvm_template.push('%'),
                AsmToken::Var { start, end } => {
                    let name = &asm.template[*start..*end];
                    let index = asm
                        .outputs
                        .iter()
                        .position(|o| o.symbolic_name == name)
                        .or_else(|| {
                            asm.inputs
                                .iter()
                                .position(|i| i.symbolic_name == name)
                                .map(|i| i + asm.outputs.len())
                        })
                        .ok_or_else(|| {
                            vec![ice!(span, "asm template references unknown operand `{}`", name)]
                        })?;
                    llvm_template.push_str(&format!("${}", index));
                }
            }
        }

        let total_constraint_count = asm.outputs.len() + asm.inputs.len() + asm.clobbers.len();
        let mut constraint_buf = String::new();
        let mut total_index = 0usize;
        let mut param_types: Vec<inkwell::types::BasicMetadataTypeEnum<'ctx>> = Vec::new();
        let mut param_values: Vec<BasicMetadataValueEnum<'ctx>> = Vec::new();

        for output in &asm.outputs {
            let rest = output.constraint.strip_prefix('=').ok_or_else(|| {
                vec![ice!(span, "asm output constraint `{}` missing `=`", output.constraint)]
            })?;
            if output.is_return {
                constraint_buf.push_str(&format!("={}", rest));
            } else {
                constraint_buf.push_str(&format!("=*{}", rest));
            }
            total_index += 1;
            if total_index < total_constraint_count {
                constraint_buf.push(',');
            }

            if !output.is_return {
                let var_id = output.var.ok_or_else(|| {
                    vec![ice!(span, "asm output `{}` has no variable", output.symbolic_name)]
                })?;
                let value_ref = self.var_refs[var_id.0 as usize].ok_or_else(|| {
                    vec![ice!(span, "asm output variable has no storage")]
                })?;
                param_types.push(value_ref.get_type().into());
                param_values.push(value_ref.into());
            }
        }
        for (i, input) in asm.inputs.iter().enumerate() {
            constraint_buf.push_str(&input.constraint);
            total_index += 1;
            if total_index < total_constraint_count {
                constraint_buf.push(',');
            }

            let ir_input = inputs.get(i).copied().ok_or_else(|| {
                vec![ice!(span, "asm input `{}` has no operand", input.symbolic_name)]
            })?;
            let input_ty = body.inst(ir_input).ty.clone();
            let llvm_ty = self.lower_type(&input_ty)?;
            param_types.push(llvm_ty.into());
            let v = self
                .ir_llvm_value(body, ir_input)?
                .ok_or_else(|| vec![ice!(span, "asm input has no value")])?;
            param_values.push(v.into());
        }
        for clobber in &asm.clobbers {
            constraint_buf.push_str(&format!("~{{{}}}", clobber));
            total_index += 1;
            if total_index < total_constraint_count {
                constraint_buf.push(',');
            }
        }

        let fn_ty = if return_count == 0 {
            self.context.void_type().fn_type(&param_types, false)
        } else {
            let ret_ty = self.lower_type(&inst.ty)?;
            ret_ty.fn_type(&param_types, false)
        };

        let is_volatile = asm.is_volatile || asm.outputs.is_empty();
        let asm_fn = self.context.create_inline_asm(
            fn_ty,
            llvm_template,
            constraint_buf,
            is_volatile,
            false,
            None,
            false,
        );
        let callable = CallableValue::try_from(asm_fn)
            .map_err(|_| vec![ice!(span, "asm value is not callable")])?;
        let call_site = self
            .builder
            .build_call(callable, &param_values, "")
            .map_err(|e| self.llvm_err("call", e, span))?;

        if return_count == 0 {
            Ok(None)
        } else {
            let result = call_site
                .try_as_basic_value()
                .left()
                .ok_or_else(|| vec![ice!(span, "asm expression produced no value")])?;
            Ok(Some(result))
        }
    }
}
