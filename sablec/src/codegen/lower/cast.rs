//! Cast lowering.
//!
//! Casts that produce aggregates (optional/error wraps, the slice casts)
//! write through the instruction's pre-allocated temporary and yield its
//! address; everything else is a direct conversion, with safety checks
//! where narrowing can lose information.

use inkwell::values::BasicValueEnum;
use inkwell::IntPredicate;

use crate::diagnostics::Diagnostic;
use crate::ice;
use crate::ir::{CastOp, FnBody, InstId, StructDecl, Type, TypeKind};

use crate::codegen::CodeGen;

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    pub(crate) fn render_cast(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        cast_op: CastOp,
        operand: InstId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        let span = inst.span;
        let actual_type = body.inst(operand).ty.clone();
        let wanted_type = inst.ty.clone();
        let expr_val = self
            .ir_llvm_value(body, operand)?
            .ok_or_else(|| vec![ice!(span, "cast operand has no value")])?;

        match cast_op {
            CastOp::Noop => Ok(Some(expr_val)),
            CastOp::ErrToInt => {
                let payload = match self.canonical(&actual_type).kind() {
                    TypeKind::ErrorUnion { payload } => payload.clone(),
                    _ => {
                        return Err(vec![ice!(
                            span,
                            "err-to-int cast from `{}`",
                            self.program.types.type_name(&actual_type)
                        )])
                    }
                };
                let err_tag = self.prims.err_tag.clone();
                let want_safety = self.want_debug_safety(inst);
                if !self.type_has_bits(&payload) {
                    let v = self.gen_widen_or_shorten(want_safety, &err_tag, &wanted_type, expr_val)?;
                    Ok(Some(v))
                } else {
                    // Payload-bearing unions are handled by pointer; read
                    // the tag out of field 0.
                    let tag_ptr = self
                        .builder
                        .build_struct_gep(expr_val.into_pointer_value(), 0, "")
                        .map_err(|e| self.llvm_err("gep", e, span))?;
                    let tag = self
                        .builder
                        .build_load(tag_ptr, "")
                        .map_err(|e| self.llvm_err("load", e, span))?;
                    let v = self.gen_widen_or_shorten(want_safety, &err_tag, &wanted_type, tag)?;
                    Ok(Some(v))
                }
            }
            CastOp::OptionalWrap => {
                let child = match self.canonical(&wanted_type).kind() {
                    TypeKind::Optional { child } => child.clone(),
                    _ => {
                        return Err(vec![ice!(
                            span,
                            "optional wrap into `{}`",
                            self.program.types.type_name(&wanted_type)
                        )])
                    }
                };
                if child.is_pointer_or_fn() {
                    return Ok(Some(expr_val));
                }
                let tmp = self.tmp_ptr(inst_id)?;
                let val_ptr = self
                    .builder
                    .build_struct_gep(tmp, 0, "")
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                self.gen_assign_raw(val_ptr, expr_val, &child)?;
                let maybe_ptr = self
                    .builder
                    .build_struct_gep(tmp, 1, "")
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                self.builder
                    .build_store(maybe_ptr, self.context.bool_type().const_all_ones())
                    .map_err(|e| self.llvm_err("store", e, span))?;
                Ok(Some(tmp.into()))
            }
            CastOp::ErrorWrap => {
                let child = match self.canonical(&wanted_type).kind() {
                    TypeKind::ErrorUnion { payload } => payload.clone(),
                    _ => {
                        return Err(vec![ice!(
                            span,
                            "error wrap into `{}`",
                            self.program.types.type_name(&wanted_type)
                        )])
                    }
                };
                let ok_err_val = self.err_tag_llvm_type().const_zero();
                if !self.type_has_bits(&child) {
                    return Ok(Some(ok_err_val.into()));
                }
                let tmp = self.tmp_ptr(inst_id)?;
                let err_tag_ptr = self
                    .builder
                    .build_struct_gep(tmp, 0, "")
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                self.builder
                    .build_store(err_tag_ptr, ok_err_val)
                    .map_err(|e| self.llvm_err("store", e, span))?;
                let payload_ptr = self
                    .builder
                    .build_struct_gep(tmp, 1, "")
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                self.gen_assign_raw(payload_ptr, expr_val, &child)?;
                Ok(Some(tmp.into()))
            }
            CastOp::PureErrorWrap => {
                let child = match self.canonical(&wanted_type).kind() {
                    TypeKind::ErrorUnion { payload } => payload.clone(),
                    _ => {
                        return Err(vec![ice!(
                            span,
                            "pure-error wrap into `{}`",
                            self.program.types.type_name(&wanted_type)
                        )])
                    }
                };
                if !self.type_has_bits(&child) {
                    return Ok(Some(expr_val));
                }
                // The payload is unspecified while the tag is set.
                let tmp = self.tmp_ptr(inst_id)?;
                let err_tag_ptr = self
                    .builder
                    .build_struct_gep(tmp, 0, "")
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                self.builder
                    .build_store(err_tag_ptr, expr_val)
                    .map_err(|e| self.llvm_err("store", e, span))?;
                Ok(Some(tmp.into()))
            }
            CastOp::PtrToInt => {
                let wanted_llvm = self.lower_type(&wanted_type)?.into_int_type();
                let v = self
                    .builder
                    .build_ptr_to_int(expr_val.into_pointer_value(), wanted_llvm, "")
                    .map_err(|e| self.llvm_err("ptrtoint", e, span))?;
                Ok(Some(v.into()))
            }
            CastOp::IntToPtr => {
                let wanted_llvm = self.lower_type(&wanted_type)?.into_pointer_type();
                let v = self
                    .builder
                    .build_int_to_ptr(expr_val.into_int_value(), wanted_llvm, "")
                    .map_err(|e| self.llvm_err("inttoptr", e, span))?;
                Ok(Some(v.into()))
            }
            CastOp::PointerReinterpret => {
                let wanted_llvm = self.lower_type(&wanted_type)?.into_pointer_type();
                let v = self
                    .builder
                    .build_pointer_cast(expr_val.into_pointer_value(), wanted_llvm, "")
                    .map_err(|e| self.llvm_err("pointer cast", e, span))?;
                Ok(Some(v.into()))
            }
            CastOp::WidenOrShorten => {
                let want_safety = self.want_debug_safety(inst);
                let v =
                    self.gen_widen_or_shorten(want_safety, &actual_type, &wanted_type, expr_val)?;
                Ok(Some(v))
            }
            CastOp::ArrayToSlice => {
                let tmp = self.tmp_ptr(inst_id)?;
                let decl = self.slice_decl(&wanted_type, span)?;
                let array_len = match self.canonical(&actual_type).kind() {
                    TypeKind::Array { len, .. } => *len,
                    TypeKind::Pointer { child, .. } => match self.canonical(child).kind() {
                        TypeKind::Array { len, .. } => *len,
                        _ => {
                            return Err(vec![ice!(
                                span,
                                "array-to-slice cast from `{}`",
                                self.program.types.type_name(&actual_type)
                            )])
                        }
                    },
                    _ => {
                        return Err(vec![ice!(
                            span,
                            "array-to-slice cast from `{}`",
                            self.program.types.type_name(&actual_type)
                        )])
                    }
                };

                if let Some(ptr_index) = decl.fields[0].gen_index {
                    let ptr_ptr = self
                        .builder
                        .build_struct_gep(tmp, ptr_index, "")
                        .map_err(|e| self.llvm_err("gep", e, span))?;
                    let pointer_llvm = self.lower_type(&decl.fields[0].ty)?.into_pointer_type();
                    let expr_bitcast = self
                        .builder
                        .build_pointer_cast(expr_val.into_pointer_value(), pointer_llvm, "")
                        .map_err(|e| self.llvm_err("pointer cast", e, span))?;
                    self.builder
                        .build_store(ptr_ptr, expr_bitcast)
                        .map_err(|e| self.llvm_err("store", e, span))?;
                }

                let len_index = decl.fields[1].gen_index.ok_or_else(|| {
                    vec![ice!(span, "slice type is missing its length field")]
                })?;
                let len_ptr = self
                    .builder
                    .build_struct_gep(tmp, len_index, "")
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                let len_val = self.usize_llvm_type().const_int(array_len, false);
                self.builder
                    .build_store(len_ptr, len_val)
                    .map_err(|e| self.llvm_err("store", e, span))?;
                Ok(Some(tmp.into()))
            }
            CastOp::BytesToSlice => {
                let tmp = self.tmp_ptr(inst_id)?;
                let decl = self.slice_decl(&wanted_type, span)?;
                let byte_len = match self.canonical(&actual_type).kind() {
                    TypeKind::Array { len, .. } => *len,
                    _ => {
                        return Err(vec![ice!(
                            span,
                            "bytes-to-slice cast from `{}`",
                            self.program.types.type_name(&actual_type)
                        )])
                    }
                };
                let wanted_child = self.slice_elem_type(&decl, span)?;
                let elem_size = {
                    let llvm_ty = self.lower_type(&wanted_child)?;
                    self.store_size(llvm_ty)
                };

                let ptr_index = decl.fields[0].gen_index.ok_or_else(|| {
                    vec![ice!(span, "slice type is missing its pointer field")]
                })?;
                let dest_ptr_ptr = self
                    .builder
                    .build_struct_gep(tmp, ptr_index, "")
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                let pointer_llvm = self.lower_type(&decl.fields[0].ty)?.into_pointer_type();
                let src_ptr_casted = self
                    .builder
                    .build_pointer_cast(expr_val.into_pointer_value(), pointer_llvm, "")
                    .map_err(|e| self.llvm_err("pointer cast", e, span))?;
                self.builder
                    .build_store(dest_ptr_ptr, src_ptr_casted)
                    .map_err(|e| self.llvm_err("store", e, span))?;

                let len_index = decl.fields[1].gen_index.ok_or_else(|| {
                    vec![ice!(span, "slice type is missing its length field")]
                })?;
                let len_ptr = self
                    .builder
                    .build_struct_gep(tmp, len_index, "")
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                let len_val = self
                    .usize_llvm_type()
                    .const_int(byte_len / elem_size, false);
                self.builder
                    .build_store(len_ptr, len_val)
                    .map_err(|e| self.llvm_err("store", e, span))?;
                Ok(Some(tmp.into()))
            }
            CastOp::ResizeSlice => {
                let tmp = self.tmp_ptr(inst_id)?;
                let actual_decl = self.slice_decl(&actual_type, span)?;
                let wanted_decl = self.slice_decl(&wanted_type, span)?;
                let actual_child = self.slice_elem_type(&actual_decl, span)?;
                let wanted_child = self.slice_elem_type(&wanted_decl, span)?;

                let actual_ptr_index = actual_decl.fields[0].gen_index.ok_or_else(|| {
                    vec![ice!(span, "slice type is missing its pointer field")]
                })?;
                let actual_len_index = actual_decl.fields[1].gen_index.ok_or_else(|| {
                    vec![ice!(span, "slice type is missing its length field")]
                })?;
                let wanted_ptr_index = wanted_decl.fields[0].gen_index.ok_or_else(|| {
                    vec![ice!(span, "slice type is missing its pointer field")]
                })?;
                let wanted_len_index = wanted_decl.fields[1].gen_index.ok_or_else(|| {
                    vec![ice!(span, "slice type is missing its length field")]
                })?;

                let src_ptr_ptr = self
                    .builder
                    .build_struct_gep(expr_val.into_pointer_value(), actual_ptr_index, "")
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                let src_ptr = self
                    .builder
                    .build_load(src_ptr_ptr, "")
                    .map_err(|e| self.llvm_err("load", e, span))?;
                let wanted_ptr_llvm = self.lower_type(&wanted_decl.fields[0].ty)?.into_pointer_type();
                let src_ptr_casted = self
                    .builder
                    .build_pointer_cast(src_ptr.into_pointer_value(), wanted_ptr_llvm, "")
                    .map_err(|e| self.llvm_err("pointer cast", e, span))?;
                let dest_ptr_ptr = self
                    .builder
                    .build_struct_gep(tmp, wanted_ptr_index, "")
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                self.builder
                    .build_store(dest_ptr_ptr, src_ptr_casted)
                    .map_err(|e| self.llvm_err("store", e, span))?;

                let src_len_ptr = self
                    .builder
                    .build_struct_gep(expr_val.into_pointer_value(), actual_len_index, "")
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                let src_len = self
                    .builder
                    .build_load(src_len_ptr, "")
                    .map_err(|e| self.llvm_err("load", e, span))?
                    .into_int_value();

                let src_size = {
                    let t = self.lower_type(&actual_child)?;
                    self.store_size(t)
                };
                let dest_size = {
                    let t = self.lower_type(&wanted_child)?;
                    self.store_size(t)
                };

                let new_len = if dest_size == 1 {
                    let src_size_val = self.usize_llvm_type().const_int(src_size, false);
                    self.builder
                        .build_int_mul(src_len, src_size_val, "")
                        .map_err(|e| self.llvm_err("mul", e, span))?
                } else if src_size == 1 {
                    let dest_size_val = self.usize_llvm_type().const_int(dest_size, false);
                    if self.want_debug_safety(inst) {
                        let remainder_val = self
                            .builder
                            .build_int_unsigned_rem(src_len, dest_size_val, "")
                            .map_err(|e| self.llvm_err("urem", e, span))?;
                        let zero = self.usize_llvm_type().const_zero();
                        let ok_bit = self
                            .builder
                            .build_int_compare(IntPredicate::EQ, remainder_val, zero, "")
                            .map_err(|e| self.llvm_err("icmp", e, span))?;
                        let fn_val = self.cur_fn_value()?;
                        let ok_block = self.context.append_basic_block(fn_val, "SliceWidenOk");
                        let fail_block = self.context.append_basic_block(fn_val, "SliceWidenFail");
                        self.builder
                            .build_conditional_branch(ok_bit, ok_block, fail_block)
                            .map_err(|e| self.llvm_err("branch", e, span))?;
                        self.builder.position_at_end(fail_block);
                        self.gen_safety_crash()?;
                        self.builder.position_at_end(ok_block);
                    }
                    self.builder
                        .build_int_unsigned_div(src_len, dest_size_val, "")
                        .map_err(|e| self.llvm_err("udiv", e, span))?
                } else {
                    return Err(vec![ice!(
                        span,
                        "slice resize between element sizes {} and {}",
                        src_size,
                        dest_size
                    )]);
                };

                let dest_len_ptr = self
                    .builder
                    .build_struct_gep(tmp, wanted_len_index, "")
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                self.builder
                    .build_store(dest_len_ptr, new_len)
                    .map_err(|e| self.llvm_err("store", e, span))?;
                Ok(Some(tmp.into()))
            }
            CastOp::IntToFloat => {
                let wanted_llvm = self.lower_type(&wanted_type)?.into_float_type();
                let signed = self.canonical(&actual_type).is_signed_int();
                let v = if signed {
                    self.builder
                        .build_signed_int_to_float(expr_val.into_int_value(), wanted_llvm, "")
                        .map_err(|e| self.llvm_err("sitofp", e, span))?
                } else {
                    self.builder
                        .build_unsigned_int_to_float(expr_val.into_int_value(), wanted_llvm, "")
                        .map_err(|e| self.llvm_err("uitofp", e, span))?
                };
                Ok(Some(v.into()))
            }
            CastOp::FloatToInt => {
                let wanted_llvm = self.lower_type(&wanted_type)?.into_int_type();
                let signed = self.canonical(&wanted_type).is_signed_int();
                let v = if signed {
                    self.builder
                        .build_float_to_signed_int(expr_val.into_float_value(), wanted_llvm, "")
                        .map_err(|e| self.llvm_err("fptosi", e, span))?
                } else {
                    self.builder
                        .build_float_to_unsigned_int(expr_val.into_float_value(), wanted_llvm, "")
                        .map_err(|e| self.llvm_err("fptoui", e, span))?
                };
                Ok(Some(v.into()))
            }
            CastOp::BoolToInt => {
                let wanted_llvm = self.lower_type(&wanted_type)?.into_int_type();
                let v = self
                    .builder
                    .build_int_z_extend(expr_val.into_int_value(), wanted_llvm, "")
                    .map_err(|e| self.llvm_err("zext", e, span))?;
                Ok(Some(v.into()))
            }
            CastOp::IntToEnum => {
                let tag_type = match self.canonical(&wanted_type).kind() {
                    TypeKind::Enum(id) => self.program.types.enum_decl(*id).tag_type,
                    _ => {
                        return Err(vec![ice!(
                            span,
                            "int-to-enum cast into `{}`",
                            self.program.types.type_name(&wanted_type)
                        )])
                    }
                };
                let want_safety = self.want_debug_safety(inst);
                let v = self.gen_widen_or_shorten(want_safety, &actual_type, &tag_type, expr_val)?;
                Ok(Some(v))
            }
            CastOp::EnumToInt => {
                let tag_type = match self.canonical(&actual_type).kind() {
                    TypeKind::Enum(id) => self.program.types.enum_decl(*id).tag_type,
                    _ => {
                        return Err(vec![ice!(
                            span,
                            "enum-to-int cast from `{}`",
                            self.program.types.type_name(&actual_type)
                        )])
                    }
                };
                let want_safety = self.want_debug_safety(inst);
                let v = self.gen_widen_or_shorten(want_safety, &tag_type, &wanted_type, expr_val)?;
                Ok(Some(v))
            }
        }
    }

    /// The struct declaration behind a slice type.
    pub(crate) fn slice_decl(
        &self,
        ty: &Type,
        span: crate::span::Span,
    ) -> Result<StructDecl, Vec<Diagnostic>> {
        match self.canonical(ty).kind() {
            TypeKind::Struct(id) => {
                let decl = self.program.types.struct_decl(*id);
                if !decl.is_slice {
                    return Err(vec![ice!(
                        span,
                        "`{}` is not a slice type",
                        self.program.types.type_name(ty)
                    )]);
                }
                Ok(decl)
            }
            _ => Err(vec![ice!(
                span,
                "`{}` is not a slice type",
                self.program.types.type_name(ty)
            )]),
        }
    }

    /// The element type of a slice declaration.
    pub(crate) fn slice_elem_type(
        &self,
        decl: &StructDecl,
        span: crate::span::Span,
    ) -> Result<Type, Vec<Diagnostic>> {
        match decl.fields[0].ty.kind() {
            TypeKind::Pointer { child, .. } => Ok(child.clone()),
            _ => Err(vec![ice!(
                span,
                "slice `{}` pointer field is not a pointer",
                decl.name
            )]),
        }
    }
}
