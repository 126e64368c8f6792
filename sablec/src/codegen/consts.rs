//! Constant materialization.
//!
//! `render_const_val` turns a [`ConstValue`] tree into a backend constant;
//! `render_const_val_global` promotes one to an internal, unnamed-address
//! constant global the first time its address is needed. Handles are cached
//! by `Rc` identity, so pointer constants sharing a base share the emitted
//! global, and cycles terminate because a global is allocated before its
//! initializer is filled in.

use std::rc::Rc;

use inkwell::module::Linkage;
use inkwell::types::{BasicTypeEnum, IntType};
use inkwell::values::{ArrayValue, BasicValueEnum, GlobalValue, IntValue, UnnamedAddress};
use num_bigint::{BigInt, Sign};
use num_traits::{One, ToPrimitive};

use crate::diagnostics::Diagnostic;
use crate::ice;
use crate::ir::{ConstKind, ConstNum, ConstSpecial, ConstValue, Type, TypeKind};

use super::CodeGen;

/// Reduce an arbitrary-precision integer to `bits` bits of two's
/// complement, returned as the low 64 bits.
pub(crate) fn bignum_to_twos_complement(n: &BigInt, bits: u32) -> u64 {
    let modulus = BigInt::one() << bits;
    let mut m = n % &modulus;
    if m.sign() == Sign::Minus {
        m += &modulus;
    }
    m.to_u64().unwrap_or_else(|| {
        // Wider than 64 bits: callers needing the full value go through
        // `const_big_int`.
        m.iter_u64_digits().next().unwrap_or(0)
    })
}

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    /// An integer constant of arbitrary width from a big integer.
    pub(crate) fn const_big_int(&self, int_ty: IntType<'ctx>, n: &BigInt) -> IntValue<'ctx> {
        let bits = int_ty.get_bit_width();
        if bits <= 64 {
            return int_ty.const_int(bignum_to_twos_complement(n, bits), false);
        }
        let modulus = BigInt::one() << bits;
        let mut m = n % &modulus;
        if m.sign() == Sign::Minus {
            m += &modulus;
        }
        let mut words: Vec<u64> = m.iter_u64_digits().collect();
        words.resize(((bits as usize) + 63) / 64, 0);
        int_ty.const_int_arbitrary_precision(&words)
    }

    /// Materialize a constant, caching the handle on the value's identity.
    /// If the value has already been promoted to a global, its initializer
    /// is (re)attached.
    pub(crate) fn render_const_val(
        &mut self,
        ty: &Type,
        val: &Rc<ConstValue>,
    ) -> Result<BasicValueEnum<'ctx>, Vec<Diagnostic>> {
        let key = Rc::as_ptr(val) as usize;
        if !self.const_values.contains_key(&key) {
            let v = self.gen_const_val(ty, val)?;
            self.const_values.insert(key, v);
        }
        let v = self.const_values[&key];
        if let Some(g) = self.const_globals.get(&key) {
            g.set_initializer(&v);
        }
        Ok(v)
    }

    /// Get or create the constant global backing a value. The global is
    /// created before the initializer exists so pointer cycles terminate.
    pub(crate) fn render_const_val_global(
        &mut self,
        ty: &Type,
        val: &Rc<ConstValue>,
    ) -> Result<GlobalValue<'ctx>, Vec<Diagnostic>> {
        let key = Rc::as_ptr(val) as usize;
        if !self.const_globals.contains_key(&key) {
            // Prefer the rendered value's own type so oddly-shaped
            // constants (padded enum payloads) stay consistent.
            let llvm_ty: BasicTypeEnum<'ctx> = match self.const_values.get(&key) {
                Some(v) => v.get_type(),
                None => self.lower_type(ty)?,
            };
            let g = self.module.add_global(llvm_ty, None, "");
            g.set_linkage(Linkage::Internal);
            g.set_constant(true);
            g.set_unnamed_address(UnnamedAddress::Global);
            self.const_globals.insert(key, g);
        }
        let g = self.const_globals[&key];
        if let Some(v) = self.const_values.get(&key) {
            g.set_initializer(v);
        }
        Ok(g)
    }

    fn gen_const_val(
        &mut self,
        ty: &Type,
        val: &Rc<ConstValue>,
    ) -> Result<BasicValueEnum<'ctx>, Vec<Diagnostic>> {
        let span = self.current_span();
        match val.special {
            ConstSpecial::Runtime => {
                return Err(vec![ice!(span, "rendering a runtime value as a constant")]);
            }
            ConstSpecial::Undef => {
                let llvm_ty = self.lower_type(ty)?;
                return Ok(undef_of(llvm_ty));
            }
            ConstSpecial::Zeroes => {
                let llvm_ty = self.lower_type(ty)?;
                return Ok(llvm_ty.const_zero());
            }
            ConstSpecial::Static => {}
        }

        match ty.kind() {
            TypeKind::TypeDecl { canonical, .. } => {
                let canonical = canonical.clone();
                self.gen_const_val(&canonical, val)
            }
            TypeKind::Int { bits, .. } => {
                let int_ty = self.context.custom_width_int_type(*bits);
                match &val.kind {
                    ConstKind::Int(n) => Ok(self.const_big_int(int_ty, n).into()),
                    other => Err(vec![ice!(span, "int constant with {:?} payload", other)]),
                }
            }
            TypeKind::PureError => match &val.kind {
                ConstKind::PureError(tag) => Ok(self
                    .err_tag_llvm_type()
                    .const_int(*tag as u64, false)
                    .into()),
                other => Err(vec![ice!(span, "error constant with {:?} payload", other)]),
            },
            TypeKind::Float { .. } => {
                let float_ty = self.lower_type(ty)?.into_float_type();
                match &val.kind {
                    ConstKind::Float(ConstNum::Float(x)) => Ok(float_ty.const_float(*x).into()),
                    ConstKind::Float(ConstNum::Int(n)) => {
                        Ok(float_ty.const_float(n.to_f64().unwrap_or(0.0)).into())
                    }
                    other => Err(vec![ice!(span, "float constant with {:?} payload", other)]),
                }
            }
            TypeKind::Bool => match &val.kind {
                ConstKind::Bool(true) => Ok(self.context.bool_type().const_all_ones().into()),
                ConstKind::Bool(false) => Ok(self.context.bool_type().const_zero().into()),
                other => Err(vec![ice!(span, "bool constant with {:?} payload", other)]),
            },
            TypeKind::Optional { child } => {
                let inner = match &val.kind {
                    ConstKind::Optional(inner) => inner.clone(),
                    other => {
                        return Err(vec![ice!(
                            span,
                            "optional constant with {:?} payload",
                            other
                        )])
                    }
                };
                if child.is_pointer_or_fn() {
                    match inner {
                        Some(inner) => self.gen_const_val(child, &inner),
                        None => {
                            let child_ty = self.lower_type(child)?.into_pointer_type();
                            Ok(child_ty.const_null().into())
                        }
                    }
                } else {
                    let (child_val, present) = match inner {
                        Some(inner) => (
                            self.gen_const_val(child, &inner)?,
                            self.context.bool_type().const_all_ones(),
                        ),
                        None => {
                            let child_ty = self.lower_type(child)?;
                            (child_ty.const_zero(), self.context.bool_type().const_zero())
                        }
                    };
                    let fields: [BasicValueEnum<'ctx>; 2] = [child_val, present.into()];
                    Ok(self.context.const_struct(&fields, false).into())
                }
            }
            TypeKind::Struct(id) => {
                let decl = self.program.types.struct_decl(*id);
                let src_fields = match &val.kind {
                    ConstKind::Struct { fields } => fields.clone(),
                    other => {
                        return Err(vec![ice!(span, "struct constant with {:?} payload", other)])
                    }
                };
                let mut gen_fields: Vec<BasicValueEnum<'ctx>> =
                    Vec::with_capacity(decl.gen_field_count as usize);
                for (i, field) in decl.fields.iter().enumerate() {
                    if field.gen_index.is_none() {
                        continue;
                    }
                    let field_val = src_fields.get(i).ok_or_else(|| {
                        vec![ice!(span, "missing constant for field `{}`", field.name)]
                    })?;
                    gen_fields.push(self.gen_const_val(&field.ty, field_val)?);
                }
                let struct_ty = self.lower_type(ty)?.into_struct_type();
                Ok(struct_ty.const_named_struct(&gen_fields).into())
            }
            TypeKind::Array { child, len } => {
                let elements = match &val.kind {
                    ConstKind::Array { elements } => elements.clone(),
                    other => {
                        return Err(vec![ice!(span, "array constant with {:?} payload", other)])
                    }
                };
                if elements.len() as u64 != *len {
                    return Err(vec![ice!(
                        span,
                        "array constant has {} elements, type wants {}",
                        elements.len(),
                        len
                    )]);
                }
                let child_ty = self.lower_type(child)?;
                let mut values = Vec::with_capacity(elements.len());
                for elem in &elements {
                    values.push(self.gen_const_val(child, elem)?);
                }
                Ok(const_array_of(child_ty, &values).into())
            }
            TypeKind::Enum(id) => {
                let decl = self.program.types.enum_decl(*id);
                let (tag, payload) = match &val.kind {
                    ConstKind::Enum { tag, payload } => (*tag, payload.clone()),
                    other => {
                        return Err(vec![ice!(span, "enum constant with {:?} payload", other)])
                    }
                };
                let tag_ty = self.lower_type(&decl.tag_type)?.into_int_type();
                let tag_value = tag_ty.const_int(tag, false);
                if decl.gen_payload_count == 0 {
                    return Ok(tag_value.into());
                }

                let enum_llvm = self.lower_type(ty)?.into_struct_type();
                let slot_ty = enum_llvm.get_field_type_at_index(1).ok_or_else(|| {
                    vec![ice!(span, "payload enum `{}` has no payload slot", decl.name)]
                })?;
                let variant = decl
                    .variants
                    .iter()
                    .find(|v| v.tag == tag)
                    .ok_or_else(|| vec![ice!(span, "enum constant tag {} out of range", tag)])?
                    .clone();

                let slot_bytes = self.store_size(slot_ty);
                let payload_val: BasicValueEnum<'ctx> = if self.type_has_bits(&variant.payload) {
                    let payload = payload.ok_or_else(|| {
                        vec![ice!(span, "enum constant missing payload for `{}`", variant.name)]
                    })?;
                    let typed = self.gen_const_val(&variant.payload, &payload)?;
                    let field_bytes = self.store_size(typed.get_type());
                    let pad_bytes = slot_bytes - field_bytes;
                    if pad_bytes == 0 {
                        typed
                    } else {
                        let pad = self.context.i8_type().array_type(pad_bytes as u32);
                        let fields: [BasicValueEnum<'ctx>; 2] =
                            [typed, pad.get_undef().into()];
                        self.context.const_struct(&fields, false).into()
                    }
                } else {
                    undef_of(slot_ty)
                };

                // The payload keeps its own layout-compatible shape; pointer
                // consumers cast the containing global as needed.
                let fields: [BasicValueEnum<'ctx>; 2] = [tag_value.into(), payload_val];
                Ok(self.context.const_struct(&fields, false).into())
            }
            TypeKind::Fn(_) => match &val.kind {
                ConstKind::Fn(fn_id) => {
                    let fn_val = self.fn_llvm_value(*fn_id)?;
                    Ok(fn_val.as_global_value().as_pointer_value().into())
                }
                other => Err(vec![ice!(span, "fn constant with {:?} payload", other)]),
            },
            TypeKind::Pointer { child, .. } => {
                let (base, index) = match &val.kind {
                    ConstKind::Ptr { base, index } => (base.clone(), *index),
                    other => {
                        return Err(vec![ice!(span, "pointer constant with {:?} payload", other)])
                    }
                };
                // Allocate this pointer's own global first so cycles can
                // capture it before the initializer exists.
                self.render_const_val_global(ty, val)?;
                let expected = self.lower_type(ty)?.into_pointer_type();

                let v: BasicValueEnum<'ctx> = match index {
                    None => {
                        self.render_const_val(child, &base)?;
                        let base_global = self.render_const_val_global(child, &base)?;
                        base_global
                            .as_pointer_value()
                            .const_cast(expected)
                            .into()
                    }
                    Some(i) => {
                        let len = match &base.kind {
                            ConstKind::Array { elements } => elements.len() as u64,
                            other => {
                                return Err(vec![ice!(
                                    span,
                                    "indexed pointer constant into {:?}",
                                    other
                                )])
                            }
                        };
                        let array_ty = Type::array(child.clone(), len);
                        self.render_const_val(&array_ty, &base)?;
                        let base_global = self.render_const_val_global(&array_ty, &base)?;
                        let usize_ty = self.usize_llvm_type();
                        let indices = [usize_ty.const_zero(), usize_ty.const_int(i, false)];
                        let gep = unsafe {
                            base_global.as_pointer_value().const_in_bounds_gep(&indices)
                        };
                        gep.const_cast(expected).into()
                    }
                };
                // Fill our own global now that the value exists.
                self.const_values.insert(Rc::as_ptr(val) as usize, v);
                self.render_const_val_global(ty, val)?;
                Ok(v)
            }
            TypeKind::ErrorUnion { payload } => {
                let (err, payload_val) = match &val.kind {
                    ConstKind::ErrUnion { err, payload } => (*err, payload.clone()),
                    other => {
                        return Err(vec![ice!(
                            span,
                            "error union constant with {:?} payload",
                            other
                        )])
                    }
                };
                let err_tag_ty = self.err_tag_llvm_type();
                if !self.type_has_bits(payload) {
                    let tag = err.map(|e| e as u64).unwrap_or(0);
                    return Ok(err_tag_ty.const_int(tag, false).into());
                }
                let (tag_value, payload_value) = match err {
                    Some(e) => {
                        let payload_ty = self.lower_type(payload)?;
                        (
                            err_tag_ty.const_int(e as u64, false),
                            payload_ty.const_zero(),
                        )
                    }
                    None => {
                        let payload_val = payload_val.ok_or_else(|| {
                            vec![ice!(span, "ok error-union constant missing payload")]
                        })?;
                        (
                            err_tag_ty.const_zero(),
                            self.gen_const_val(payload, &payload_val)?,
                        )
                    }
                };
                let fields: [BasicValueEnum<'ctx>; 2] = [tag_value.into(), payload_value];
                Ok(self.context.const_struct(&fields, false).into())
            }
            _ => Err(vec![ice!(
                span,
                "constant of type `{}` has no runtime representation",
                self.program.types.type_name(ty)
            )]),
        }
    }
}

/// The undef value of any basic type.
pub(crate) fn undef_of(ty: BasicTypeEnum<'_>) -> BasicValueEnum<'_> {
    match ty {
        BasicTypeEnum::ArrayType(t) => t.get_undef().into(),
        BasicTypeEnum::FloatType(t) => t.get_undef().into(),
        BasicTypeEnum::IntType(t) => t.get_undef().into(),
        BasicTypeEnum::PointerType(t) => t.get_undef().into(),
        BasicTypeEnum::StructType(t) => t.get_undef().into(),
        BasicTypeEnum::VectorType(t) => t.get_undef().into(),
    }
}

/// A constant array over any element type.
pub(crate) fn const_array_of<'ctx>(
    elem_ty: BasicTypeEnum<'ctx>,
    values: &[BasicValueEnum<'ctx>],
) -> ArrayValue<'ctx> {
    match elem_ty {
        BasicTypeEnum::ArrayType(t) => {
            let vals: Vec<_> = values.iter().map(|v| v.into_array_value()).collect();
            t.const_array(&vals)
        }
        BasicTypeEnum::FloatType(t) => {
            let vals: Vec<_> = values.iter().map(|v| v.into_float_value()).collect();
            t.const_array(&vals)
        }
        BasicTypeEnum::IntType(t) => {
            let vals: Vec<_> = values.iter().map(|v| v.into_int_value()).collect();
            t.const_array(&vals)
        }
        BasicTypeEnum::PointerType(t) => {
            let vals: Vec<_> = values.iter().map(|v| v.into_pointer_value()).collect();
            t.const_array(&vals)
        }
        BasicTypeEnum::StructType(t) => {
            let vals: Vec<_> = values.iter().map(|v| v.into_struct_value()).collect();
            t.const_array(&vals)
        }
        BasicTypeEnum::VectorType(t) => {
            let vals: Vec<_> = values.iter().map(|v| v.into_vector_value()).collect();
            t.const_array(&vals)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twos_complement_reduction() {
        assert_eq!(bignum_to_twos_complement(&BigInt::from(5), 8), 5);
        assert_eq!(bignum_to_twos_complement(&BigInt::from(-1), 8), 0xff);
        assert_eq!(bignum_to_twos_complement(&BigInt::from(-1), 32), 0xffff_ffff);
        assert_eq!(bignum_to_twos_complement(&BigInt::from(-128), 8), 0x80);
        assert_eq!(bignum_to_twos_complement(&BigInt::from(256), 8), 0);
        assert_eq!(
            bignum_to_twos_complement(&BigInt::from(-1i64), 64),
            u64::MAX
        );
    }
}
