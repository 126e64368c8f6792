//! Runtime safety checks and the memoized intrinsic tables.
//!
//! Every check shares the same shape: compare, branch to a fail block that
//! calls `llvm.debugtrap` and ends in `unreachable`, continue in the ok
//! block. Whether a check is emitted at all is decided by the lexically
//! scoped safety flag ANDed with the instruction's own flag.

use inkwell::intrinsics::Intrinsic;
use inkwell::types::IntType;
use inkwell::values::{BasicValueEnum, FunctionValue, IntValue};
use inkwell::IntPredicate;

use crate::diagnostics::Diagnostic;
use crate::ice;
use crate::ir::{Inst, Type, TypeKind};

use super::CodeGen;

/// The three overflow-checked arithmetic families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OverflowOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
}

/// Table index for the supported intrinsic widths.
fn bits_index(bits: u32) -> Option<usize> {
    match bits {
        8 => Some(0),
        16 => Some(1),
        32 => Some(2),
        64 => Some(3),
        _ => None,
    }
}

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    /// Whether safety checks are wanted at this instruction: the nearest
    /// enclosing scope with an explicit setting wins, otherwise on unless
    /// this is a release build.
    pub(crate) fn want_debug_safety(&self, inst: &Inst) -> bool {
        if self.opts.is_release_build {
            return false;
        }
        self.program
            .scopes
            .safety_override(inst.scope)
            .unwrap_or(true)
    }

    pub(crate) fn cur_fn_value(&self) -> Result<FunctionValue<'ctx>, Vec<Diagnostic>> {
        self.cur_fn_val
            .ok_or_else(|| vec![ice!(self.current_span(), "no current function")])
    }

    /// The `llvm.debugtrap` intrinsic, declared once.
    pub(crate) fn trap_fn(&mut self) -> Result<FunctionValue<'ctx>, Vec<Diagnostic>> {
        if let Some(f) = self.trap_fn {
            return Ok(f);
        }
        let intrinsic = Intrinsic::find("llvm.debugtrap").ok_or_else(|| {
            vec![ice!(self.current_span(), "llvm.debugtrap intrinsic not found")]
        })?;
        let f = intrinsic
            .get_declaration(self.module, &[])
            .ok_or_else(|| {
                vec![ice!(self.current_span(), "could not declare llvm.debugtrap")]
            })?;
        self.trap_fn = Some(f);
        Ok(f)
    }

    pub(crate) fn return_address_fn(&mut self) -> Result<FunctionValue<'ctx>, Vec<Diagnostic>> {
        if let Some(f) = self.return_address_fn {
            return Ok(f);
        }
        let intrinsic = Intrinsic::find("llvm.returnaddress").ok_or_else(|| {
            vec![ice!(
                self.current_span(),
                "llvm.returnaddress intrinsic not found"
            )]
        })?;
        let f = intrinsic
            .get_declaration(self.module, &[])
            .ok_or_else(|| {
                vec![ice!(self.current_span(), "could not declare llvm.returnaddress")]
            })?;
        self.return_address_fn = Some(f);
        Ok(f)
    }

    pub(crate) fn frame_address_fn(&mut self) -> Result<FunctionValue<'ctx>, Vec<Diagnostic>> {
        if let Some(f) = self.frame_address_fn {
            return Ok(f);
        }
        let intrinsic = Intrinsic::find("llvm.frameaddress").ok_or_else(|| {
            vec![ice!(
                self.current_span(),
                "llvm.frameaddress intrinsic not found"
            )]
        })?;
        let i8_ptr = self
            .context
            .i8_type()
            .ptr_type(inkwell::AddressSpace::default());
        let f = intrinsic
            .get_declaration(self.module, &[i8_ptr.into()])
            .ok_or_else(|| {
                vec![ice!(self.current_span(), "could not declare llvm.frameaddress")]
            })?;
        self.frame_address_fn = Some(f);
        Ok(f)
    }

    /// The `llvm.{s,u}{add,sub,mul}.with.overflow.iN` intrinsic for an
    /// integer type, memoized by signedness, operation, and width.
    pub(crate) fn overflow_intrinsic(
        &mut self,
        ty: &Type,
        op: OverflowOp,
    ) -> Result<FunctionValue<'ctx>, Vec<Diagnostic>> {
        let (bits, signed) = match self.canonical(ty).kind() {
            TypeKind::Int { bits, signed } => (*bits, *signed),
            _ => {
                return Err(vec![ice!(
                    self.current_span(),
                    "overflow intrinsic on non-integer type"
                )])
            }
        };
        let index0 = if signed { 0 } else { 1 };
        let index2 = bits_index(bits).ok_or_else(|| {
            vec![ice!(
                self.current_span(),
                "no overflow intrinsic for i{}",
                bits
            )]
        })?;
        if let Some(f) = self.int_overflow_fns[index0][op as usize][index2] {
            return Ok(f);
        }

        let name = match (signed, op) {
            (true, OverflowOp::Add) => "llvm.sadd.with.overflow",
            (true, OverflowOp::Sub) => "llvm.ssub.with.overflow",
            (true, OverflowOp::Mul) => "llvm.smul.with.overflow",
            (false, OverflowOp::Add) => "llvm.uadd.with.overflow",
            (false, OverflowOp::Sub) => "llvm.usub.with.overflow",
            (false, OverflowOp::Mul) => "llvm.umul.with.overflow",
        };
        let intrinsic = Intrinsic::find(name).ok_or_else(|| {
            vec![ice!(self.current_span(), "{} intrinsic not found", name)]
        })?;
        let int_ty = self.context.custom_width_int_type(bits);
        let f = intrinsic
            .get_declaration(self.module, &[int_ty.into()])
            .ok_or_else(|| {
                vec![ice!(self.current_span(), "could not declare {}", name)]
            })?;
        self.int_overflow_fns[index0][op as usize][index2] = Some(f);
        Ok(f)
    }

    /// The `llvm.cttz.iN` / `llvm.ctlz.iN` intrinsic, memoized by width.
    pub(crate) fn bit_count_intrinsic(
        &mut self,
        is_ctz: bool,
        int_ty: IntType<'ctx>,
    ) -> Result<FunctionValue<'ctx>, Vec<Diagnostic>> {
        let index0 = if is_ctz { 0 } else { 1 };
        let index1 = bits_index(int_ty.get_bit_width()).ok_or_else(|| {
            vec![ice!(
                self.current_span(),
                "no bit-count intrinsic for i{}",
                int_ty.get_bit_width()
            )]
        })?;
        if let Some(f) = self.int_builtin_fns[index0][index1] {
            return Ok(f);
        }
        let name = if is_ctz { "llvm.cttz" } else { "llvm.ctlz" };
        let intrinsic = Intrinsic::find(name).ok_or_else(|| {
            vec![ice!(self.current_span(), "{} intrinsic not found", name)]
        })?;
        let f = intrinsic
            .get_declaration(self.module, &[int_ty.into()])
            .ok_or_else(|| {
                vec![ice!(self.current_span(), "could not declare {}", name)]
            })?;
        self.int_builtin_fns[index0][index1] = Some(f);
        Ok(f)
    }

    /// Call the trap intrinsic and seal the block with `unreachable`.
    pub(crate) fn gen_safety_crash(&mut self) -> Result<(), Vec<Diagnostic>> {
        let span = self.current_span();
        let trap = self.trap_fn()?;
        self.builder
            .build_call(trap, &[], "")
            .map_err(|e| self.llvm_err("call", e, span))?;
        self.builder
            .build_unreachable()
            .map_err(|e| self.llvm_err("unreachable", e, span))?;
        Ok(())
    }

    /// Up to two comparisons against `target_val`; both bounds share one
    /// fail block, and the lower bound is checked first.
    pub(crate) fn add_bounds_check(
        &mut self,
        target_val: IntValue<'ctx>,
        mut lower: Option<(IntPredicate, IntValue<'ctx>)>,
        mut upper: Option<(IntPredicate, IntValue<'ctx>)>,
    ) -> Result<(), Vec<Diagnostic>> {
        if lower.is_none() && upper.is_none() {
            return Ok(());
        }
        if lower.is_none() {
            lower = upper.take();
        }
        let (lower_pred, lower_value) = lower.expect("bounds check needs a bound");

        let span = self.current_span();
        let fn_val = self.cur_fn_value()?;
        let fail_block = self.context.append_basic_block(fn_val, "BoundsCheckFail");
        let ok_block = self.context.append_basic_block(fn_val, "BoundsCheckOk");
        let lower_ok_block = if upper.is_some() {
            self.context.append_basic_block(fn_val, "FirstBoundsCheckOk")
        } else {
            ok_block
        };

        let lower_ok_val = self
            .builder
            .build_int_compare(lower_pred, target_val, lower_value, "")
            .map_err(|e| self.llvm_err("compare", e, span))?;
        self.builder
            .build_conditional_branch(lower_ok_val, lower_ok_block, fail_block)
            .map_err(|e| self.llvm_err("branch", e, span))?;

        self.builder.position_at_end(fail_block);
        self.gen_safety_crash()?;

        if let Some((upper_pred, upper_value)) = upper {
            self.builder.position_at_end(lower_ok_block);
            let upper_ok_val = self
                .builder
                .build_int_compare(upper_pred, target_val, upper_value, "")
                .map_err(|e| self.llvm_err("compare", e, span))?;
            self.builder
                .build_conditional_branch(upper_ok_val, ok_block, fail_block)
                .map_err(|e| self.llvm_err("branch", e, span))?;
        }

        self.builder.position_at_end(ok_block);
        Ok(())
    }

    /// Integer/float widening and narrowing. Narrowing with safety on
    /// re-extends and traps on inequality; signed-to-unsigned with safety
    /// on additionally traps on negative values.
    pub(crate) fn gen_widen_or_shorten(
        &mut self,
        want_debug_safety: bool,
        actual_type: &Type,
        wanted_type: &Type,
        expr_val: BasicValueEnum<'ctx>,
    ) -> Result<BasicValueEnum<'ctx>, Vec<Diagnostic>> {
        let span = self.current_span();
        let actual = self.canonical(actual_type);
        let wanted = self.canonical(wanted_type);

        let (actual_bits, wanted_bits, is_float) = match (actual.kind(), wanted.kind()) {
            (TypeKind::Float { bits: a }, TypeKind::Float { bits: w }) => (*a, *w, true),
            (
                TypeKind::Int { bits: a, .. },
                TypeKind::Int { bits: w, .. },
            ) => (*a, *w, false),
            _ => {
                return Err(vec![ice!(
                    span,
                    "widen/shorten between `{}` and `{}`",
                    self.program.types.type_name(&actual),
                    self.program.types.type_name(&wanted)
                )])
            }
        };

        let actual_signed = actual.is_signed_int();
        let wanted_signed = wanted.is_signed_int();

        // Same-or-narrower signed value going unsigned: the only legal
        // values are non-negative ones.
        if actual_bits >= wanted_bits
            && !is_float
            && actual_signed
            && !wanted_signed
            && want_debug_safety
        {
            let int_val = expr_val.into_int_value();
            let zero = int_val.get_type().const_zero();
            let ok_bit = self
                .builder
                .build_int_compare(IntPredicate::SGE, int_val, zero, "")
                .map_err(|e| self.llvm_err("compare", e, span))?;
            let fn_val = self.cur_fn_value()?;
            let ok_block = self.context.append_basic_block(fn_val, "SignCastOk");
            let fail_block = self.context.append_basic_block(fn_val, "SignCastFail");
            self.builder
                .build_conditional_branch(ok_bit, ok_block, fail_block)
                .map_err(|e| self.llvm_err("branch", e, span))?;
            self.builder.position_at_end(fail_block);
            self.gen_safety_crash()?;
            self.builder.position_at_end(ok_block);
        }

        if actual_bits == wanted_bits {
            return Ok(expr_val);
        }

        let wanted_llvm = self.lower_type(&wanted)?;
        if actual_bits < wanted_bits {
            if is_float {
                let v = self
                    .builder
                    .build_float_ext(
                        expr_val.into_float_value(),
                        wanted_llvm.into_float_type(),
                        "",
                    )
                    .map_err(|e| self.llvm_err("fpext", e, span))?;
                Ok(v.into())
            } else if actual_signed {
                let v = self
                    .builder
                    .build_int_s_extend(expr_val.into_int_value(), wanted_llvm.into_int_type(), "")
                    .map_err(|e| self.llvm_err("sext", e, span))?;
                Ok(v.into())
            } else {
                let v = self
                    .builder
                    .build_int_z_extend(expr_val.into_int_value(), wanted_llvm.into_int_type(), "")
                    .map_err(|e| self.llvm_err("zext", e, span))?;
                Ok(v.into())
            }
        } else {
            if is_float {
                let v = self
                    .builder
                    .build_float_trunc(
                        expr_val.into_float_value(),
                        wanted_llvm.into_float_type(),
                        "",
                    )
                    .map_err(|e| self.llvm_err("fptrunc", e, span))?;
                return Ok(v.into());
            }
            let int_val = expr_val.into_int_value();
            let trunc_val = self
                .builder
                .build_int_truncate(int_val, wanted_llvm.into_int_type(), "")
                .map_err(|e| self.llvm_err("trunc", e, span))?;
            if !want_debug_safety {
                return Ok(trunc_val.into());
            }
            // Round-trip back to the original width; any lost bits trap.
            let actual_llvm = int_val.get_type();
            let orig_val = if actual_signed {
                self.builder
                    .build_int_s_extend(trunc_val, actual_llvm, "")
                    .map_err(|e| self.llvm_err("sext", e, span))?
            } else {
                self.builder
                    .build_int_z_extend(trunc_val, actual_llvm, "")
                    .map_err(|e| self.llvm_err("zext", e, span))?
            };
            let ok_bit = self
                .builder
                .build_int_compare(IntPredicate::EQ, int_val, orig_val, "")
                .map_err(|e| self.llvm_err("compare", e, span))?;
            let fn_val = self.cur_fn_value()?;
            let ok_block = self.context.append_basic_block(fn_val, "CastShortenOk");
            let fail_block = self.context.append_basic_block(fn_val, "CastShortenFail");
            self.builder
                .build_conditional_branch(ok_bit, ok_block, fail_block)
                .map_err(|e| self.llvm_err("branch", e, span))?;
            self.builder.position_at_end(fail_block);
            self.gen_safety_crash()?;
            self.builder.position_at_end(ok_block);
            Ok(trunc_val.into())
        }
    }

    /// Overflow-checked add/sub/mul through the `with.overflow` intrinsic:
    /// extract the overflow bit, trap when it is set.
    pub(crate) fn gen_overflow_op(
        &mut self,
        ty: &Type,
        op: OverflowOp,
        val1: IntValue<'ctx>,
        val2: IntValue<'ctx>,
    ) -> Result<IntValue<'ctx>, Vec<Diagnostic>> {
        let span = self.current_span();
        let fn_val = self.overflow_intrinsic(ty, op)?;
        let result_struct = self
            .builder
            .build_call(fn_val, &[val1.into(), val2.into()], "")
            .map_err(|e| self.llvm_err("call", e, span))?
            .try_as_basic_value()
            .left()
            .ok_or_else(|| vec![ice!(span, "overflow intrinsic returned no value")])?
            .into_struct_value();
        let result = self
            .builder
            .build_extract_value(result_struct, 0, "")
            .map_err(|e| self.llvm_err("extractvalue", e, span))?
            .into_int_value();
        let overflow_bit = self
            .builder
            .build_extract_value(result_struct, 1, "")
            .map_err(|e| self.llvm_err("extractvalue", e, span))?
            .into_int_value();

        let cur_fn = self.cur_fn_value()?;
        let fail_block = self.context.append_basic_block(cur_fn, "OverflowFail");
        let ok_block = self.context.append_basic_block(cur_fn, "OverflowOk");
        self.builder
            .build_conditional_branch(overflow_bit, fail_block, ok_block)
            .map_err(|e| self.llvm_err("branch", e, span))?;
        self.builder.position_at_end(fail_block);
        self.gen_safety_crash()?;
        self.builder.position_at_end(ok_block);
        Ok(result)
    }

    /// Overflow-checked left shift: shift, reverse-shift (arithmetic when
    /// signed), and trap when the round trip loses bits.
    pub(crate) fn gen_overflow_shl_op(
        &mut self,
        ty: &Type,
        val1: IntValue<'ctx>,
        val2: IntValue<'ctx>,
    ) -> Result<IntValue<'ctx>, Vec<Diagnostic>> {
        let span = self.current_span();
        let is_signed = match self.canonical(ty).kind() {
            TypeKind::Int { signed, .. } => *signed,
            _ => return Err(vec![ice!(span, "shift on non-integer type")]),
        };

        let result = self
            .builder
            .build_left_shift(val1, val2, "")
            .map_err(|e| self.llvm_err("shl", e, span))?;
        let orig_val = self
            .builder
            .build_right_shift(result, val2, is_signed, "")
            .map_err(|e| self.llvm_err("shr", e, span))?;
        let ok_bit = self
            .builder
            .build_int_compare(IntPredicate::EQ, val1, orig_val, "")
            .map_err(|e| self.llvm_err("compare", e, span))?;

        let cur_fn = self.cur_fn_value()?;
        let ok_block = self.context.append_basic_block(cur_fn, "OverflowOk");
        let fail_block = self.context.append_basic_block(cur_fn, "OverflowFail");
        self.builder
            .build_conditional_branch(ok_bit, ok_block, fail_block)
            .map_err(|e| self.llvm_err("branch", e, span))?;
        self.builder.position_at_end(fail_block);
        self.gen_safety_crash()?;
        self.builder.position_at_end(ok_block);
        Ok(result)
    }

    /// Division with a zero-divisor trap and, for exact division, a
    /// remainder trap.
    pub(crate) fn gen_div(
        &mut self,
        want_debug_safety: bool,
        val1: BasicValueEnum<'ctx>,
        val2: BasicValueEnum<'ctx>,
        ty: &Type,
        exact: bool,
    ) -> Result<BasicValueEnum<'ctx>, Vec<Diagnostic>> {
        let span = self.current_span();
        let canonical = self.canonical(ty);
        let is_float = canonical.is_float();

        if want_debug_safety {
            let is_zero_bit = if is_float {
                let zero = val2.into_float_value().get_type().const_zero();
                self.builder
                    .build_float_compare(
                        inkwell::FloatPredicate::OEQ,
                        val2.into_float_value(),
                        zero,
                        "",
                    )
                    .map_err(|e| self.llvm_err("compare", e, span))?
            } else {
                let zero = val2.into_int_value().get_type().const_zero();
                self.builder
                    .build_int_compare(IntPredicate::EQ, val2.into_int_value(), zero, "")
                    .map_err(|e| self.llvm_err("compare", e, span))?
            };
            let cur_fn = self.cur_fn_value()?;
            let ok_block = self.context.append_basic_block(cur_fn, "DivZeroOk");
            let fail_block = self.context.append_basic_block(cur_fn, "DivZeroFail");
            self.builder
                .build_conditional_branch(is_zero_bit, fail_block, ok_block)
                .map_err(|e| self.llvm_err("branch", e, span))?;
            self.builder.position_at_end(fail_block);
            self.gen_safety_crash()?;
            self.builder.position_at_end(ok_block);
        }

        if is_float {
            if exact {
                return Err(vec![ice!(span, "exact division on floats")]);
            }
            let v = self
                .builder
                .build_float_div(val1.into_float_value(), val2.into_float_value(), "")
                .map_err(|e| self.llvm_err("fdiv", e, span))?;
            return Ok(v.into());
        }

        let is_signed = canonical.is_signed_int();
        let int1 = val1.into_int_value();
        let int2 = val2.into_int_value();

        if exact && want_debug_safety {
            let remainder_val = if is_signed {
                self.builder
                    .build_int_signed_rem(int1, int2, "")
                    .map_err(|e| self.llvm_err("srem", e, span))?
            } else {
                self.builder
                    .build_int_unsigned_rem(int1, int2, "")
                    .map_err(|e| self.llvm_err("urem", e, span))?
            };
            let zero = remainder_val.get_type().const_zero();
            let ok_bit = self
                .builder
                .build_int_compare(IntPredicate::EQ, remainder_val, zero, "")
                .map_err(|e| self.llvm_err("compare", e, span))?;
            let cur_fn = self.cur_fn_value()?;
            let ok_block = self.context.append_basic_block(cur_fn, "DivExactOk");
            let fail_block = self.context.append_basic_block(cur_fn, "DivExactFail");
            self.builder
                .build_conditional_branch(ok_bit, ok_block, fail_block)
                .map_err(|e| self.llvm_err("branch", e, span))?;
            self.builder.position_at_end(fail_block);
            self.gen_safety_crash()?;
            self.builder.position_at_end(ok_block);
        }

        let v = if is_signed {
            self.builder
                .build_int_signed_div(int1, int2, "")
                .map_err(|e| self.llvm_err("sdiv", e, span))?
        } else {
            self.builder
                .build_int_unsigned_div(int1, int2, "")
                .map_err(|e| self.llvm_err("udiv", e, span))?
        };
        Ok(v.into())
    }
}
