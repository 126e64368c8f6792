//! Arithmetic, comparison, and unary lowering.

use inkwell::values::BasicValueEnum;
use inkwell::{FloatPredicate, IntPredicate};

use crate::codegen::safety::OverflowOp;
use crate::diagnostics::Diagnostic;
use crate::ice;
use crate::ir::{BinOp, FnBody, InstId, TypeKind, UnOp};

use crate::codegen::CodeGen;

/// Integer predicate for a comparison operator.
fn cmp_op_to_int_predicate(op: BinOp, is_signed: bool) -> IntPredicate {
    match op {
        BinOp::CmpEq => IntPredicate::EQ,
        BinOp::CmpNeq => IntPredicate::NE,
        BinOp::CmpLt => {
            if is_signed {
                IntPredicate::SLT
            } else {
                IntPredicate::ULT
            }
        }
        BinOp::CmpGt => {
            if is_signed {
                IntPredicate::SGT
            } else {
                IntPredicate::UGT
            }
        }
        BinOp::CmpLte => {
            if is_signed {
                IntPredicate::SLE
            } else {
                IntPredicate::ULE
            }
        }
        BinOp::CmpGte => {
            if is_signed {
                IntPredicate::SGE
            } else {
                IntPredicate::UGE
            }
        }
        _ => unreachable!("not a comparison"),
    }
}

/// Ordered float predicate for a comparison operator.
fn cmp_op_to_real_predicate(op: BinOp) -> FloatPredicate {
    match op {
        BinOp::CmpEq => FloatPredicate::OEQ,
        BinOp::CmpNeq => FloatPredicate::ONE,
        BinOp::CmpLt => FloatPredicate::OLT,
        BinOp::CmpGt => FloatPredicate::OGT,
        BinOp::CmpLte => FloatPredicate::OLE,
        BinOp::CmpGte => FloatPredicate::OGE,
        _ => unreachable!("not a comparison"),
    }
}

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    pub(crate) fn render_bin_op(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        op: BinOp,
        lhs: InstId,
        rhs: InstId,
        safety_check_on: bool,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        let span = inst.span;
        let operand_ty = self.canonical(&body.inst(lhs).ty);
        let want_debug_safety = safety_check_on && self.want_debug_safety(inst);

        let op1_value = self
            .ir_llvm_value(body, lhs)?
            .ok_or_else(|| vec![ice!(span, "binary operand has no value")])?;
        let op2_value = self
            .ir_llvm_value(body, rhs)?
            .ok_or_else(|| vec![ice!(span, "binary operand has no value")])?;

        let is_float = operand_ty.is_float();
        let is_signed = operand_ty.is_signed_int();

        let result: BasicValueEnum<'ctx> = match op {
            BinOp::BoolOr | BinOp::BitOr => self
                .builder
                .build_or(op1_value.into_int_value(), op2_value.into_int_value(), "")
                .map_err(|e| self.llvm_err("or", e, span))?
                .into(),
            BinOp::BoolAnd | BinOp::BitAnd => self
                .builder
                .build_and(op1_value.into_int_value(), op2_value.into_int_value(), "")
                .map_err(|e| self.llvm_err("and", e, span))?
                .into(),
            BinOp::BitXor => self
                .builder
                .build_xor(op1_value.into_int_value(), op2_value.into_int_value(), "")
                .map_err(|e| self.llvm_err("xor", e, span))?
                .into(),
            BinOp::CmpEq
            | BinOp::CmpNeq
            | BinOp::CmpLt
            | BinOp::CmpGt
            | BinOp::CmpLte
            | BinOp::CmpGte => match operand_ty.kind() {
                TypeKind::Float { .. } => {
                    let pred = cmp_op_to_real_predicate(op);
                    self.builder
                        .build_float_compare(
                            pred,
                            op1_value.into_float_value(),
                            op2_value.into_float_value(),
                            "",
                        )
                        .map_err(|e| self.llvm_err("fcmp", e, span))?
                        .into()
                }
                TypeKind::Int { signed, .. } => {
                    let pred = cmp_op_to_int_predicate(op, *signed);
                    self.builder
                        .build_int_compare(
                            pred,
                            op1_value.into_int_value(),
                            op2_value.into_int_value(),
                            "",
                        )
                        .map_err(|e| self.llvm_err("icmp", e, span))?
                        .into()
                }
                TypeKind::Enum(id) => {
                    let decl = self.program.types.enum_decl(*id);
                    if decl.gen_payload_count != 0 {
                        return Err(vec![ice!(
                            span,
                            "comparison on payload-bearing enum `{}`",
                            decl.name
                        )]);
                    }
                    let pred = cmp_op_to_int_predicate(op, false);
                    self.builder
                        .build_int_compare(
                            pred,
                            op1_value.into_int_value(),
                            op2_value.into_int_value(),
                            "",
                        )
                        .map_err(|e| self.llvm_err("icmp", e, span))?
                        .into()
                }
                TypeKind::Pointer { .. } => {
                    let pred = cmp_op_to_int_predicate(op, false);
                    self.builder
                        .build_int_compare(
                            pred,
                            op1_value.into_pointer_value(),
                            op2_value.into_pointer_value(),
                            "",
                        )
                        .map_err(|e| self.llvm_err("icmp", e, span))?
                        .into()
                }
                TypeKind::PureError | TypeKind::Bool => {
                    let pred = cmp_op_to_int_predicate(op, false);
                    self.builder
                        .build_int_compare(
                            pred,
                            op1_value.into_int_value(),
                            op2_value.into_int_value(),
                            "",
                        )
                        .map_err(|e| self.llvm_err("icmp", e, span))?
                        .into()
                }
                _ => {
                    return Err(vec![ice!(
                        span,
                        "comparison on type `{}`",
                        self.program.types.type_name(&operand_ty)
                    )])
                }
            },
            BinOp::Add | BinOp::AddWrap => {
                if is_float {
                    self.builder
                        .build_float_add(
                            op1_value.into_float_value(),
                            op2_value.into_float_value(),
                            "",
                        )
                        .map_err(|e| self.llvm_err("fadd", e, span))?
                        .into()
                } else {
                    let v1 = op1_value.into_int_value();
                    let v2 = op2_value.into_int_value();
                    if op == BinOp::AddWrap {
                        self.builder
                            .build_int_add(v1, v2, "")
                            .map_err(|e| self.llvm_err("add", e, span))?
                            .into()
                    } else if want_debug_safety {
                        self.gen_overflow_op(&operand_ty, OverflowOp::Add, v1, v2)?
                            .into()
                    } else if is_signed {
                        self.builder
                            .build_int_nsw_add(v1, v2, "")
                            .map_err(|e| self.llvm_err("add", e, span))?
                            .into()
                    } else {
                        self.builder
                            .build_int_nuw_add(v1, v2, "")
                            .map_err(|e| self.llvm_err("add", e, span))?
                            .into()
                    }
                }
            }
            BinOp::Sub | BinOp::SubWrap => {
                if is_float {
                    self.builder
                        .build_float_sub(
                            op1_value.into_float_value(),
                            op2_value.into_float_value(),
                            "",
                        )
                        .map_err(|e| self.llvm_err("fsub", e, span))?
                        .into()
                } else {
                    let v1 = op1_value.into_int_value();
                    let v2 = op2_value.into_int_value();
                    if op == BinOp::SubWrap {
                        self.builder
                            .build_int_sub(v1, v2, "")
                            .map_err(|e| self.llvm_err("sub", e, span))?
                            .into()
                    } else if want_debug_safety {
                        self.gen_overflow_op(&operand_ty, OverflowOp::Sub, v1, v2)?
                            .into()
                    } else if is_signed {
                        self.builder
                            .build_int_nsw_sub(v1, v2, "")
                            .map_err(|e| self.llvm_err("sub", e, span))?
                            .into()
                    } else {
                        self.builder
                            .build_int_nuw_sub(v1, v2, "")
                            .map_err(|e| self.llvm_err("sub", e, span))?
                            .into()
                    }
                }
            }
            BinOp::Mul | BinOp::MulWrap => {
                if is_float {
                    self.builder
                        .build_float_mul(
                            op1_value.into_float_value(),
                            op2_value.into_float_value(),
                            "",
                        )
                        .map_err(|e| self.llvm_err("fmul", e, span))?
                        .into()
                } else {
                    let v1 = op1_value.into_int_value();
                    let v2 = op2_value.into_int_value();
                    if op == BinOp::MulWrap {
                        self.builder
                            .build_int_mul(v1, v2, "")
                            .map_err(|e| self.llvm_err("mul", e, span))?
                            .into()
                    } else if want_debug_safety {
                        self.gen_overflow_op(&operand_ty, OverflowOp::Mul, v1, v2)?
                            .into()
                    } else if is_signed {
                        self.builder
                            .build_int_nsw_mul(v1, v2, "")
                            .map_err(|e| self.llvm_err("mul", e, span))?
                            .into()
                    } else {
                        self.builder
                            .build_int_nuw_mul(v1, v2, "")
                            .map_err(|e| self.llvm_err("mul", e, span))?
                            .into()
                    }
                }
            }
            BinOp::Shl | BinOp::ShlWrap => {
                let v1 = op1_value.into_int_value();
                let v2 = op2_value.into_int_value();
                if op == BinOp::ShlWrap {
                    self.builder
                        .build_left_shift(v1, v2, "")
                        .map_err(|e| self.llvm_err("shl", e, span))?
                        .into()
                } else if want_debug_safety {
                    self.gen_overflow_shl_op(&operand_ty, v1, v2)?.into()
                } else {
                    // The no-wrap shift variants are not exposed; a plain
                    // shift is the same computation.
                    self.builder
                        .build_left_shift(v1, v2, "")
                        .map_err(|e| self.llvm_err("shl", e, span))?
                        .into()
                }
            }
            BinOp::Shr => {
                let v1 = op1_value.into_int_value();
                let v2 = op2_value.into_int_value();
                self.builder
                    .build_right_shift(v1, v2, is_signed, "")
                    .map_err(|e| self.llvm_err("shr", e, span))?
                    .into()
            }
            BinOp::Div => self.gen_div(want_debug_safety, op1_value, op2_value, &operand_ty, false)?,
            BinOp::DivExact => {
                self.gen_div(want_debug_safety, op1_value, op2_value, &operand_ty, true)?
            }
            BinOp::Mod => {
                if is_float {
                    self.builder
                        .build_float_rem(
                            op1_value.into_float_value(),
                            op2_value.into_float_value(),
                            "",
                        )
                        .map_err(|e| self.llvm_err("frem", e, span))?
                        .into()
                } else if is_signed {
                    self.builder
                        .build_int_signed_rem(
                            op1_value.into_int_value(),
                            op2_value.into_int_value(),
                            "",
                        )
                        .map_err(|e| self.llvm_err("srem", e, span))?
                        .into()
                } else {
                    self.builder
                        .build_int_unsigned_rem(
                            op1_value.into_int_value(),
                            op2_value.into_int_value(),
                            "",
                        )
                        .map_err(|e| self.llvm_err("urem", e, span))?
                        .into()
                }
            }
        };
        Ok(Some(result))
    }

    pub(crate) fn render_un_op(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        op: UnOp,
        operand: InstId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        let span = inst.span;
        let expr_type = self.canonical(&body.inst(operand).ty);

        match op {
            UnOp::Neg | UnOp::NegWrap => {
                let expr = self
                    .ir_llvm_value(body, operand)?
                    .ok_or_else(|| vec![ice!(span, "negation operand has no value")])?;
                if expr_type.is_float() {
                    let v = self
                        .builder
                        .build_float_neg(expr.into_float_value(), "")
                        .map_err(|e| self.llvm_err("fneg", e, span))?;
                    Ok(Some(v.into()))
                } else if expr_type.is_int() {
                    let int_val = expr.into_int_value();
                    if op == UnOp::NegWrap {
                        let v = self
                            .builder
                            .build_int_neg(int_val, "")
                            .map_err(|e| self.llvm_err("neg", e, span))?;
                        Ok(Some(v.into()))
                    } else if self.want_debug_safety(inst) {
                        let zero = int_val.get_type().const_zero();
                        let v = self.gen_overflow_op(&expr_type, OverflowOp::Sub, zero, int_val)?;
                        Ok(Some(v.into()))
                    } else if expr_type.is_signed_int() {
                        let v = self
                            .builder
                            .build_int_nsw_neg(int_val, "")
                            .map_err(|e| self.llvm_err("neg", e, span))?;
                        Ok(Some(v.into()))
                    } else {
                        let v = self
                            .builder
                            .build_int_nuw_neg(int_val, "")
                            .map_err(|e| self.llvm_err("neg", e, span))?;
                        Ok(Some(v.into()))
                    }
                } else {
                    Err(vec![ice!(
                        span,
                        "negation of `{}`",
                        self.program.types.type_name(&expr_type)
                    )])
                }
            }
            UnOp::BoolNot => {
                let expr = self
                    .ir_llvm_value(body, operand)?
                    .ok_or_else(|| vec![ice!(span, "bool-not operand has no value")])?
                    .into_int_value();
                let zero = expr.get_type().const_zero();
                let v = self
                    .builder
                    .build_int_compare(IntPredicate::EQ, expr, zero, "")
                    .map_err(|e| self.llvm_err("icmp", e, span))?;
                Ok(Some(v.into()))
            }
            UnOp::BitNot => {
                let expr = self
                    .ir_llvm_value(body, operand)?
                    .ok_or_else(|| vec![ice!(span, "bit-not operand has no value")])?
                    .into_int_value();
                let v = self
                    .builder
                    .build_not(expr, "")
                    .map_err(|e| self.llvm_err("not", e, span))?;
                Ok(Some(v.into()))
            }
            UnOp::Deref => {
                let child = match expr_type.kind() {
                    TypeKind::Pointer { child, .. } => child.clone(),
                    _ => {
                        return Err(vec![ice!(
                            span,
                            "dereference of `{}`",
                            self.program.types.type_name(&expr_type)
                        )])
                    }
                };
                if !self.type_has_bits(&expr_type) {
                    return Ok(None);
                }
                let expr = self
                    .ir_llvm_value(body, operand)?
                    .ok_or_else(|| vec![ice!(span, "dereference operand has no value")])?;
                let v = self.get_handle_value(expr.into_pointer_value(), &child)?;
                Ok(Some(v))
            }
            UnOp::UnwrapError => {
                let child = match expr_type.kind() {
                    TypeKind::ErrorUnion { payload } => payload.clone(),
                    _ => {
                        return Err(vec![ice!(
                            span,
                            "error unwrap of `{}`",
                            self.program.types.type_name(&expr_type)
                        )])
                    }
                };
                let expr = self
                    .ir_llvm_value(body, operand)?
                    .ok_or_else(|| vec![ice!(span, "error unwrap operand has no value")])?;
                let child_has_bits = self.type_has_bits(&child);

                if self.want_debug_safety(inst) {
                    let err_val = if child_has_bits {
                        let err_val_ptr = self
                            .builder
                            .build_struct_gep(expr.into_pointer_value(), 0, "")
                            .map_err(|e| self.llvm_err("gep", e, span))?;
                        self.builder
                            .build_load(err_val_ptr, "")
                            .map_err(|e| self.llvm_err("load", e, span))?
                            .into_int_value()
                    } else {
                        expr.into_int_value()
                    };
                    let zero = self.err_tag_llvm_type().const_zero();
                    let cond_val = self
                        .builder
                        .build_int_compare(IntPredicate::EQ, err_val, zero, "")
                        .map_err(|e| self.llvm_err("icmp", e, span))?;
                    let fn_val = self.cur_fn_value()?;
                    let err_block = self.context.append_basic_block(fn_val, "UnwrapErrError");
                    let ok_block = self.context.append_basic_block(fn_val, "UnwrapErrOk");
                    self.builder
                        .build_conditional_branch(cond_val, ok_block, err_block)
                        .map_err(|e| self.llvm_err("branch", e, span))?;
                    self.builder.position_at_end(err_block);
                    self.gen_safety_crash()?;
                    self.builder.position_at_end(ok_block);
                }

                if child_has_bits {
                    let child_val_ptr = self
                        .builder
                        .build_struct_gep(expr.into_pointer_value(), 1, "")
                        .map_err(|e| self.llvm_err("gep", e, span))?;
                    Ok(Some(self.get_handle_value(child_val_ptr, &child)?))
                } else {
                    Ok(None)
                }
            }
            UnOp::UnwrapOptional => {
                let child = match expr_type.kind() {
                    TypeKind::Optional { child } => child.clone(),
                    _ => {
                        return Err(vec![ice!(
                            span,
                            "optional unwrap of `{}`",
                            self.program.types.type_name(&expr_type)
                        )])
                    }
                };
                let expr = self
                    .ir_llvm_value(body, operand)?
                    .ok_or_else(|| vec![ice!(span, "optional unwrap operand has no value")])?;
                let child_is_ptr = child.is_pointer_or_fn();

                if self.want_debug_safety(inst) {
                    let cond_val = if child_is_ptr {
                        let null = self.lower_type(&child)?.into_pointer_type().const_null();
                        self.builder
                            .build_int_compare(
                                IntPredicate::NE,
                                expr.into_pointer_value(),
                                null,
                                "",
                            )
                            .map_err(|e| self.llvm_err("icmp", e, span))?
                    } else {
                        let maybe_null_ptr = self
                            .builder
                            .build_struct_gep(expr.into_pointer_value(), 1, "")
                            .map_err(|e| self.llvm_err("gep", e, span))?;
                        self.builder
                            .build_load(maybe_null_ptr, "")
                            .map_err(|e| self.llvm_err("load", e, span))?
                            .into_int_value()
                    };
                    let fn_val = self.cur_fn_value()?;
                    let ok_block = self.context.append_basic_block(fn_val, "UnwrapMaybeOk");
                    let null_block = self.context.append_basic_block(fn_val, "UnwrapMaybeNull");
                    self.builder
                        .build_conditional_branch(cond_val, ok_block, null_block)
                        .map_err(|e| self.llvm_err("branch", e, span))?;
                    self.builder.position_at_end(null_block);
                    self.gen_safety_crash()?;
                    self.builder.position_at_end(ok_block);
                }

                if child_is_ptr {
                    Ok(Some(expr))
                } else {
                    let maybe_field_ptr = self
                        .builder
                        .build_struct_gep(expr.into_pointer_value(), 0, "")
                        .map_err(|e| self.llvm_err("gep", e, span))?;
                    Ok(Some(self.get_handle_value(maybe_field_ptr, &child)?))
                }
            }
            UnOp::AddressOf
            | UnOp::ErrorType
            | UnOp::OptionalType
            | UnOp::ErrorReturn
            | UnOp::OptionalReturn => Err(vec![ice!(
                span,
                "unary operator {:?} has no runtime lowering",
                op
            )]),
        }
    }
}
