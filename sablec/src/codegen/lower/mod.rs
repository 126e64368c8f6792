//! Per-instruction lowering.
//!
//! The dispatch lives here together with the helpers every opcode shares:
//! reading operand values (materializing compile-time constants on the
//! way), the scalar-vs-aggregate handle convention, and raw assignment.

mod arith;
mod cast;
mod control;
mod memory;

use inkwell::values::{BasicValueEnum, PointerValue};

use crate::diagnostics::Diagnostic;
use crate::ice;
use crate::ir::{ConstSpecial, FnBody, InstId, InstKind, Type, TypeKind};

use super::CodeGen;

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    /// Lower one instruction. Returns the produced value, if any.
    pub(crate) fn render_instruction(
        &mut self,
        body: &FnBody,
        inst_id: InstId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(inst_id);
        self.set_debug_location(inst)?;
        self.assert_runtime_type(&inst.ty, inst.span)?;

        match &inst.kind {
            InstKind::Const | InstKind::SwitchVar => Err(vec![ice!(
                inst.span,
                "instruction {:?} must not reach lowering",
                inst.kind
            )]),
            InstKind::Return { value } => self.render_return(body, *value),
            InstKind::DeclVar { var, init } => self.render_decl_var(body, inst_id, *var, *init),
            InstKind::BinOp {
                op,
                lhs,
                rhs,
                safety_check_on,
            } => self.render_bin_op(body, inst_id, *op, *lhs, *rhs, *safety_check_on),
            InstKind::UnOp { op, operand } => self.render_un_op(body, inst_id, *op, *operand),
            InstKind::Cast { op, operand } => self.render_cast(body, inst_id, *op, *operand),
            InstKind::Unreachable => self.render_unreachable(body, inst_id),
            InstKind::CondBr {
                condition,
                then_block,
                else_block,
            } => self.render_cond_br(body, *condition, *then_block, *else_block),
            InstKind::Br { dest } => self.render_br(*dest),
            InstKind::SwitchBr {
                target,
                else_block,
                cases,
            } => self.render_switch_br(body, *target, *else_block, cases),
            InstKind::Phi { incoming } => self.render_phi(body, inst_id, incoming),
            InstKind::LoadPtr { ptr } => self.render_load_ptr(body, inst_id, *ptr),
            InstKind::StorePtr { ptr, value } => self.render_store_ptr(body, *ptr, *value),
            InstKind::VarPtr { var } => self.render_var_ptr(body, *var),
            InstKind::GlobalPtr { global } => self.render_global_ptr(*global),
            InstKind::ElemPtr {
                array_ptr,
                index,
                safety_check_on,
            } => self.render_elem_ptr(body, inst_id, *array_ptr, *index, *safety_check_on),
            InstKind::StructFieldPtr {
                struct_ptr,
                field_index,
            } => self.render_struct_field_ptr(body, *struct_ptr, *field_index),
            InstKind::EnumFieldPtr {
                enum_ptr,
                variant_index,
            } => self.render_enum_field_ptr(body, *enum_ptr, *variant_index),
            InstKind::Call { callee, args } => self.render_call(body, inst_id, callee, args),
            InstKind::Ref { value } => self.render_ref(body, inst_id, *value),
            InstKind::StructInit { fields } => self.render_struct_init(body, inst_id, fields),
            InstKind::ContainerInitList { elements } => {
                self.render_container_init_list(body, inst_id, elements)
            }
            InstKind::EnumTag { value } => self.render_enum_tag(body, *value),
            InstKind::UnwrapOptional {
                value,
                safety_check_on,
            } => self.render_unwrap_optional(body, inst_id, *value, *safety_check_on),
            InstKind::TestNull { value } => self.render_test_null(body, *value),
            InstKind::Clz { value } => self.render_bit_count(body, inst_id, *value, false),
            InstKind::Ctz { value } => self.render_bit_count(body, inst_id, *value, true),
            InstKind::ErrName { value } => self.render_err_name(body, inst_id, *value),
            InstKind::ReturnAddress => self.render_return_address(),
            InstKind::FrameAddress => self.render_frame_address(),
            InstKind::InlineAsm { asm, inputs } => self.render_asm(body, inst_id, asm, inputs),
        }
    }

    /// Read an operand's backend value.
    ///
    /// Zero-bit operands have none. Compile-time operands materialize as
    /// constants; aggregate ones additionally get promoted to a global so
    /// they can be handled by pointer, and pointer-typed ones read their
    /// value back out of the backing global.
    pub(crate) fn ir_llvm_value(
        &mut self,
        body: &FnBody,
        id: InstId,
    ) -> Result<Option<BasicValueEnum<'ctx>>, Vec<Diagnostic>> {
        let inst = body.inst(id);
        if !self.type_has_bits(&inst.ty) {
            return Ok(None);
        }
        let comptime = inst.value.special != ConstSpecial::Runtime;

        if !self.values.contains_key(&id) {
            if !comptime {
                return Err(vec![ice!(
                    inst.span,
                    "operand has neither a lowered value nor a compile-time one"
                )]);
            }
            let v = self.render_const_val(&inst.ty, &inst.value)?;
            let v = if self.handle_is_ptr(&inst.ty) {
                let g = self.render_const_val_global(&inst.ty, &inst.value)?;
                g.as_pointer_value().into()
            } else {
                v
            };
            self.values.insert(id, v);
        }

        if comptime && matches!(self.canonical(&inst.ty).kind(), TypeKind::Pointer { .. }) {
            let g = self.render_const_val_global(&inst.ty, &inst.value)?;
            let loaded = self
                .builder
                .build_load(g.as_pointer_value(), "")
                .map_err(|e| self.llvm_err("load", e, inst.span))?;
            return Ok(Some(loaded));
        }

        Ok(self.values.get(&id).copied())
    }

    /// Aggregates are handled by pointer; scalars load through it.
    pub(crate) fn get_handle_value(
        &mut self,
        ptr: PointerValue<'ctx>,
        ty: &Type,
    ) -> Result<BasicValueEnum<'ctx>, Vec<Diagnostic>> {
        if self.handle_is_ptr(ty) {
            Ok(ptr.into())
        } else {
            self.builder
                .build_load(ptr, "")
                .map_err(|e| self.llvm_err("load", e, self.current_span()))
        }
    }

    /// Copy an aggregate through `memcpy`, sized and aligned from the
    /// target layout.
    pub(crate) fn gen_struct_memcpy(
        &mut self,
        src: PointerValue<'ctx>,
        dest: PointerValue<'ctx>,
        ty: &Type,
    ) -> Result<(), Vec<Diagnostic>> {
        let span = self.current_span();
        let llvm_ty = self.lower_type(ty)?;
        let size_bytes = self.store_size(llvm_ty);
        let align_bytes = self.abi_align(llvm_ty);
        let size_val = self.usize_llvm_type().const_int(size_bytes, false);
        self.builder
            .build_memcpy(dest, align_bytes, src, align_bytes, size_val)
            .map_err(|e| self.llvm_err("memcpy", e, span))?;
        Ok(())
    }

    /// Store `value` into `target`, going through memcpy for aggregates.
    /// `ty` is the type of the stored value.
    pub(crate) fn gen_assign_raw(
        &mut self,
        target: PointerValue<'ctx>,
        value: BasicValueEnum<'ctx>,
        ty: &Type,
    ) -> Result<(), Vec<Diagnostic>> {
        if !self.type_has_bits(ty) {
            return Ok(());
        }
        if self.handle_is_ptr(ty) {
            return self.gen_struct_memcpy(value.into_pointer_value(), target, ty);
        }
        self.builder
            .build_store(target, value)
            .map_err(|e| self.llvm_err("store", e, self.current_span()))?;
        Ok(())
    }

    /// The pre-allocated temporary of an instruction; missing one is a
    /// contract violation.
    pub(crate) fn tmp_ptr(&self, id: InstId) -> Result<PointerValue<'ctx>, Vec<Diagnostic>> {
        self.tmp_ptrs.get(&id).copied().ok_or_else(|| {
            vec![ice!(
                self.current_span(),
                "instruction is missing its pre-allocated temporary"
            )]
        })
    }
}
