//! Memory access lowering: variables, loads and stores, element and field
//! pointers, aggregate initialization.

use inkwell::types::BasicType;
use inkwell::values::BasicValueEnum;
use inkwell::IntPredicate;

use crate::diagnostics::Diagnostic;
use crate::ice;
use crate::ir::{ConstSpecial, FnBody, GlobalId, InstId, TypeKind, VarId};

use crate::codegen::CodeGen;

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    /// Declare a local: store or memcpy a known initializer, otherwise
    /// fill the slot with 0xaa (safety on) or zeroes (explicitly
    /// zero-initialized), then attach the debug declare.
    pub(crate) fn render_decl_var(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        var_id: VarId,
        init: InstId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        let span = inst.span;
        let var = body.variable(var_id);

        if !self.type_has_bits(&var.ty) || var.ref_count == 0 {
            return Ok(None);
        }

        let init_inst = body.inst(init);
        let have_init_expr = matches!(
            init_inst.value.special,
            ConstSpecial::Runtime | ConstSpecial::Static
        );
        let want_zeroes = init_inst.value.special == ConstSpecial::Zeroes;

        let value_ref = self.var_refs[var_id.0 as usize].ok_or_else(|| {
            vec![ice!(span, "variable `{}` has no storage", var.name)]
        })?;

        if have_init_expr {
            let init_val = self
                .ir_llvm_value(body, init)?
                .ok_or_else(|| vec![ice!(span, "initializer has no value")])?;
            self.gen_assign_raw(value_ref, init_val, &var.ty)?;
        } else {
            let want_safe = self.want_debug_safety(inst);
            if want_safe || want_zeroes {
                let llvm_ty = self.lower_type(&var.ty)?;
                let size_bytes = self.store_size(llvm_ty);
                let align_bytes = self.abi_align(llvm_ty);
                let fill_char = self
                    .context
                    .i8_type()
                    .const_int(if want_zeroes { 0x00 } else { 0xaa }, false);
                let i8_ptr = self
                    .context
                    .i8_type()
                    .ptr_type(inkwell::AddressSpace::default());
                let dest_ptr = self
                    .builder
                    .build_pointer_cast(value_ref, i8_ptr, "")
                    .map_err(|e| self.llvm_err("pointer cast", e, span))?;
                let byte_count = self.usize_llvm_type().const_int(size_bytes, false);
                self.builder
                    .build_memset(dest_ptr, align_bytes, fill_char, byte_count)
                    .map_err(|e| self.llvm_err("memset", e, span))?;
            }
        }

        self.gen_var_debug_decl(var_id, var)?;
        Ok(None)
    }

    pub(crate) fn render_load_ptr(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        ptr: InstId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        if !self.type_has_bits(&inst.ty) {
            return Ok(None);
        }
        let ptr_val = self
            .ir_llvm_value(body, ptr)?
            .ok_or_else(|| vec![ice!(inst.span, "load through absent pointer")])?;
        let ty = inst.ty.clone();
        Ok(Some(self.get_handle_value(ptr_val.into_pointer_value(), &ty)?))
    }

    pub(crate) fn render_store_ptr(
        &mut self,
        body: &FnBody,
        ptr: InstId,
        value: InstId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let ptr_inst = body.inst(ptr);
        let span = ptr_inst.span;
        let child = match self.canonical(&ptr_inst.ty).kind() {
            TypeKind::Pointer { child, .. } => child.clone(),
            _ => {
                return Err(vec![ice!(
                    span,
                    "store through non-pointer `{}`",
                    self.program.types.type_name(&ptr_inst.ty)
                )])
            }
        };
        if !self.type_has_bits(&child) {
            return Ok(None);
        }
        let ptr_val = self
            .ir_llvm_value(body, ptr)?
            .ok_or_else(|| vec![ice!(span, "store through absent pointer")])?;
        let value_val = self
            .ir_llvm_value(body, value)?
            .ok_or_else(|| vec![ice!(span, "store of absent value")])?;
        self.gen_assign_raw(ptr_val.into_pointer_value(), value_val, &child)?;
        Ok(None)
    }

    pub(crate) fn render_var_ptr(
        &mut self,
        body: &FnBody,
        var_id: VarId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let var = body.variable(var_id);
        if !self.type_has_bits(&var.ty) {
            return Ok(None);
        }
        let value_ref = self.var_refs[var_id.0 as usize].ok_or_else(|| {
            vec![ice!(var.span, "variable `{}` has no storage", var.name)]
        })?;
        Ok(Some(value_ref.into()))
    }

    pub(crate) fn render_global_ptr(
        &mut self,
        global_id: GlobalId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let var = self.program.global(global_id);
        if !self.type_has_bits(&var.ty) {
            return Ok(None);
        }
        let g = self.global_values.get(&global_id).ok_or_else(|| {
            vec![ice!(var.span, "global `{}` was not emitted", var.name)]
        })?;
        Ok(Some(g.as_pointer_value().into()))
    }

    /// Element pointer into an array, raw pointer, or slice, with the
    /// optional upper-bound check.
    pub(crate) fn render_elem_ptr(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        array_ptr: InstId,
        index: InstId,
        safety_check_on: bool,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        let span = inst.span;
        let array_ptr_type = self.canonical(&body.inst(array_ptr).ty);
        let array_type = match array_ptr_type.kind() {
            TypeKind::Pointer { child, .. } => self.canonical(child),
            _ => {
                return Err(vec![ice!(
                    span,
                    "element pointer through `{}`",
                    self.program.types.type_name(&array_ptr_type)
                )])
            }
        };
        if !self.type_has_bits(&array_type) {
            return Ok(None);
        }

        let array_ptr_ptr = self
            .ir_llvm_value(body, array_ptr)?
            .ok_or_else(|| vec![ice!(span, "element pointer through absent value")])?;
        let array_handle = self
            .get_handle_value(array_ptr_ptr.into_pointer_value(), &array_type)?;
        let subscript_value = self
            .ir_llvm_value(body, index)?
            .ok_or_else(|| vec![ice!(span, "element index has no value")])?
            .into_int_value();

        let safety = safety_check_on && self.want_debug_safety(inst);

        match array_type.kind() {
            TypeKind::Array { len, .. } => {
                if safety {
                    let end = self.usize_llvm_type().const_int(*len, false);
                    self.add_bounds_check(
                        subscript_value,
                        None,
                        Some((IntPredicate::ULT, end)),
                    )?;
                }
                let indices = [self.usize_llvm_type().const_zero(), subscript_value];
                let gep = unsafe {
                    self.builder
                        .build_in_bounds_gep(array_handle.into_pointer_value(), &indices, "")
                }
                .map_err(|e| self.llvm_err("gep", e, span))?;
                Ok(Some(gep.into()))
            }
            TypeKind::Pointer { .. } => {
                let indices = [subscript_value];
                let gep = unsafe {
                    self.builder
                        .build_in_bounds_gep(array_handle.into_pointer_value(), &indices, "")
                }
                .map_err(|e| self.llvm_err("gep", e, span))?;
                Ok(Some(gep.into()))
            }
            TypeKind::Struct(_) => {
                let decl = self.slice_decl(&array_type, span)?;
                let slice_ptr = array_handle.into_pointer_value();

                if safety {
                    let len_index = decl.fields[1].gen_index.ok_or_else(|| {
                        vec![ice!(span, "slice type is missing its length field")]
                    })?;
                    let len_ptr = self
                        .builder
                        .build_struct_gep(slice_ptr, len_index, "")
                        .map_err(|e| self.llvm_err("gep", e, span))?;
                    let len = self
                        .builder
                        .build_load(len_ptr, "")
                        .map_err(|e| self.llvm_err("load", e, span))?
                        .into_int_value();
                    self.add_bounds_check(
                        subscript_value,
                        None,
                        Some((IntPredicate::ULT, len)),
                    )?;
                }

                let ptr_index = decl.fields[0].gen_index.ok_or_else(|| {
                    vec![ice!(span, "slice type is missing its pointer field")]
                })?;
                let ptr_ptr = self
                    .builder
                    .build_struct_gep(slice_ptr, ptr_index, "")
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                let ptr = self
                    .builder
                    .build_load(ptr_ptr, "")
                    .map_err(|e| self.llvm_err("load", e, span))?
                    .into_pointer_value();
                let indices = [subscript_value];
                let gep = unsafe { self.builder.build_in_bounds_gep(ptr, &indices, "") }
                    .map_err(|e| self.llvm_err("gep", e, span))?;
                Ok(Some(gep.into()))
            }
            _ => Err(vec![ice!(
                span,
                "element pointer into `{}`",
                self.program.types.type_name(&array_type)
            )]),
        }
    }

    pub(crate) fn render_struct_field_ptr(
        &mut self,
        body: &FnBody,
        struct_ptr: InstId,
        field_index: usize,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let operand = body.inst(struct_ptr);
        let span = operand.span;
        let struct_ty = match self.canonical(&operand.ty).kind() {
            TypeKind::Pointer { child, .. } => self.canonical(child),
            _ => {
                return Err(vec![ice!(
                    span,
                    "field pointer through `{}`",
                    self.program.types.type_name(&operand.ty)
                )])
            }
        };
        let decl = match struct_ty.kind() {
            TypeKind::Struct(id) => self.program.types.struct_decl(*id),
            _ => {
                return Err(vec![ice!(
                    span,
                    "field pointer into `{}`",
                    self.program.types.type_name(&struct_ty)
                )])
            }
        };
        let field = decl
            .fields
            .get(field_index)
            .ok_or_else(|| vec![ice!(span, "field index {} out of range", field_index)])?;
        if !self.type_has_bits(&field.ty) {
            return Ok(None);
        }
        let gen_index = field
            .gen_index
            .ok_or_else(|| vec![ice!(span, "field `{}` has no generated index", field.name)])?;

        let struct_ptr_val = self
            .ir_llvm_value(body, struct_ptr)?
            .ok_or_else(|| vec![ice!(span, "field pointer through absent value")])?;
        let gep = self
            .builder
            .build_struct_gep(struct_ptr_val.into_pointer_value(), gen_index, "")
            .map_err(|e| self.llvm_err("gep", e, span))?;
        Ok(Some(gep.into()))
    }

    /// Pointer to an enum variant's payload: the shared union slot,
    /// reinterpreted as the selected field's type.
    pub(crate) fn render_enum_field_ptr(
        &mut self,
        body: &FnBody,
        enum_ptr: InstId,
        variant_index: usize,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let operand = body.inst(enum_ptr);
        let span = operand.span;
        let enum_ty = match self.canonical(&operand.ty).kind() {
            TypeKind::Pointer { child, .. } => self.canonical(child),
            _ => {
                return Err(vec![ice!(
                    span,
                    "enum field pointer through `{}`",
                    self.program.types.type_name(&operand.ty)
                )])
            }
        };
        let decl = match enum_ty.kind() {
            TypeKind::Enum(id) => self.program.types.enum_decl(*id),
            _ => {
                return Err(vec![ice!(
                    span,
                    "enum field pointer into `{}`",
                    self.program.types.type_name(&enum_ty)
                )])
            }
        };
        let variant = decl
            .variants
            .get(variant_index)
            .ok_or_else(|| vec![ice!(span, "variant index {} out of range", variant_index)])?;
        if !self.type_has_bits(&variant.payload) {
            return Ok(None);
        }

        let enum_ptr_val = self
            .ir_llvm_value(body, enum_ptr)?
            .ok_or_else(|| vec![ice!(span, "enum field pointer through absent value")])?;
        let union_field_ptr = self
            .builder
            .build_struct_gep(enum_ptr_val.into_pointer_value(), 1, "")
            .map_err(|e| self.llvm_err("gep", e, span))?;
        let payload_ptr_ty = self
            .lower_type(&variant.payload)?
            .ptr_type(inkwell::AddressSpace::default());
        let casted = self
            .builder
            .build_pointer_cast(union_field_ptr, payload_ptr_ty, "")
            .map_err(|e| self.llvm_err("pointer cast", e, span))?;
        Ok(Some(casted.into()))
    }

    /// Address-of: aggregates are already handles, scalars spill into the
    /// pre-allocated temporary.
    pub(crate) fn render_ref(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        value: InstId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let span = body.inst(inst_id).span;
        let operand_ty = body.inst(value).ty.clone();
        let operand_val = match self.ir_llvm_value(body, value)? {
            Some(v) => v,
            None => return Ok(None),
        };
        if self.handle_is_ptr(&operand_ty) {
            return Ok(Some(operand_val));
        }
        let tmp = self.tmp_ptr(inst_id)?;
        self.builder
            .build_store(tmp, operand_val)
            .map_err(|e| self.llvm_err("store", e, span))?;
        Ok(Some(tmp.into()))
    }

    /// Field-by-field initialization into the temporary.
    pub(crate) fn render_struct_init(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        fields: &[(usize, InstId)],
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        let span = inst.span;
        if !self.type_has_bits(&inst.ty) {
            return Ok(None);
        }
        let decl = match self.canonical(&inst.ty).kind() {
            TypeKind::Struct(id) => self.program.types.struct_decl(*id),
            _ => {
                return Err(vec![ice!(
                    span,
                    "struct init of `{}`",
                    self.program.types.type_name(&inst.ty)
                )])
            }
        };
        let tmp = self.tmp_ptr(inst_id)?;
        for (src_index, operand) in fields {
            let field = decl.fields.get(*src_index).ok_or_else(|| {
                vec![ice!(span, "field index {} out of range", src_index)]
            })?;
            let gen_index = match field.gen_index {
                Some(idx) => idx,
                None => continue,
            };
            let value = self
                .ir_llvm_value(body, *operand)?
                .ok_or_else(|| vec![ice!(span, "field initializer has no value")])?;
            let field_ptr = self
                .builder
                .build_struct_gep(tmp, gen_index, "")
                .map_err(|e| self.llvm_err("gep", e, span))?;
            self.gen_assign_raw(field_ptr, value, &field.ty)?;
        }
        Ok(Some(tmp.into()))
    }

    /// Element-by-element initialization into the temporary.
    pub(crate) fn render_container_init_list(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
        elements: &[InstId],
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        let span = inst.span;
        if !self.type_has_bits(&inst.ty) {
            return Ok(None);
        }
        let child = match self.canonical(&inst.ty).kind() {
            TypeKind::Array { child, .. } => child.clone(),
            _ => {
                return Err(vec![ice!(
                    span,
                    "container init of `{}`",
                    self.program.types.type_name(&inst.ty)
                )])
            }
        };
        let tmp = self.tmp_ptr(inst_id)?;
        let usize_ty = self.usize_llvm_type();
        for (i, element) in elements.iter().enumerate() {
            let value = self
                .ir_llvm_value(body, *element)?
                .ok_or_else(|| vec![ice!(span, "element initializer has no value")])?;
            let indices = [usize_ty.const_zero(), usize_ty.const_int(i as u64, false)];
            let elem_ptr = unsafe { self.builder.build_in_bounds_gep(tmp, &indices, "") }
                .map_err(|e| self.llvm_err("gep", e, span))?;
            self.gen_assign_raw(elem_ptr, value, &child)?;
        }
        Ok(Some(tmp.into()))
    }

    /// Read the tag of an enum value.
    pub(crate) fn render_enum_tag(
        &mut self,
        body: &FnBody,
        value: InstId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let operand = body.inst(value);
        let span = operand.span;
        let decl = match self.canonical(&operand.ty).kind() {
            TypeKind::Enum(id) => self.program.types.enum_decl(*id),
            _ => {
                return Err(vec![ice!(
                    span,
                    "enum tag of `{}`",
                    self.program.types.type_name(&operand.ty)
                )])
            }
        };
        let expr = self
            .ir_llvm_value(body, value)?
            .ok_or_else(|| vec![ice!(span, "enum tag of absent value")])?;
        if decl.gen_payload_count == 0 {
            // Tag-only enums are their tag.
            return Ok(Some(expr));
        }
        let tag_ptr = self
            .builder
            .build_struct_gep(expr.into_pointer_value(), 0, "")
            .map_err(|e| self.llvm_err("gep", e, span))?;
        let tag = self
            .builder
            .build_load(tag_ptr, "")
            .map_err(|e| self.llvm_err("load", e, span))?;
        Ok(Some(tag))
    }
}
