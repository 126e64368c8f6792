//! Type lowering and the primitive type registry.
//!
//! Every structural [`Type`] maps to exactly one LLVM type handle and one
//! debug type handle, memoized in the [`CodeGen`] context. Recursive types
//! terminate because struct and enum handles are created opaque and
//! registered before their bodies are filled in.

use inkwell::debug_info::{AsDIScope, DIFlags, DIFlagsConstants, DIType};
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, IntType};
use inkwell::AddressSpace;

use crate::diagnostics::Diagnostic;
use crate::ice;
use crate::ir::{EnumVariant, FnParam, Type, TypeKind};
use crate::span::Span;
use crate::target::CIntKind;

use super::CodeGen;

/// DWARF attribute encodings for basic debug types.
mod dwarf {
    pub const ATE_BOOLEAN: u32 = 0x02;
    pub const ATE_FLOAT: u32 = 0x04;
    pub const ATE_SIGNED: u32 = 0x05;
    pub const ATE_SIGNED_CHAR: u32 = 0x06;
    pub const ATE_UNSIGNED: u32 = 0x07;
    pub const ATE_UNSIGNED_CHAR: u32 = 0x08;
}

/// The primitive types, constructed once at module init.
#[derive(Debug, Clone)]
pub(crate) struct PrimitiveTypes {
    pub bool_: Type,
    pub u8: Type,
    pub u16: Type,
    pub u32: Type,
    pub u64: Type,
    pub i8: Type,
    pub i16: Type,
    pub i32: Type,
    pub i64: Type,
    pub usize_: Type,
    pub isize_: Type,
    pub f32_: Type,
    pub f64_: Type,
    pub c_long_double: Type,
    pub void_: Type,
    pub unreachable_: Type,
    pub metatype: Type,
    pub c_void: Type,
    pub pure_error: Type,
    /// Backend representation of an error tag.
    pub err_tag: Type,
    pub c_ints: [Type; 8],
    pub atomic_order: Type,
    pub os_enum: Type,
    pub arch_enum: Type,
    pub environ_enum: Type,
    pub oformat_enum: Type,
}

impl PrimitiveTypes {
    /// All-invalid placeholder replaced by `define_builtin_types`.
    pub(crate) fn placeholder() -> Self {
        let inv = Type::invalid;
        Self {
            bool_: inv(),
            u8: inv(),
            u16: inv(),
            u32: inv(),
            u64: inv(),
            i8: inv(),
            i16: inv(),
            i32: inv(),
            i64: inv(),
            usize_: inv(),
            isize_: inv(),
            f32_: inv(),
            f64_: inv(),
            c_long_double: inv(),
            void_: inv(),
            unreachable_: inv(),
            metatype: inv(),
            c_void: inv(),
            pure_error: inv(),
            err_tag: inv(),
            c_ints: [
                inv(),
                inv(),
                inv(),
                inv(),
                inv(),
                inv(),
                inv(),
                inv(),
            ],
            atomic_order: inv(),
            os_enum: inv(),
            arch_enum: inv(),
            environ_enum: inv(),
            oformat_enum: inv(),
        }
    }
}

/// The smallest unsigned integer type that can hold `count` distinct values.
fn smallest_unsigned_int_type(count: u64) -> Type {
    let mut bits = 1u32;
    while (1u64 << bits) < count {
        bits += 1;
    }
    Type::int(false, bits)
}

/// ABI shape of one function type.
#[derive(Debug, Clone)]
pub(crate) struct FnAbi<'ctx> {
    pub fn_type: inkwell::types::FunctionType<'ctx>,
    /// The return value travels through a hidden leading pointer param.
    pub ret_by_ref: bool,
    /// Source parameter index to generated argument index (already offset
    /// by the hidden return pointer when present).
    pub param_map: Vec<Option<u32>>,
    /// Generated type per source parameter: the pointer-to-const wrapper
    /// for by-reference aggregates, the type itself otherwise.
    pub gen_param_types: Vec<Option<Type>>,
}

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    pub(crate) fn type_has_bits(&self, ty: &Type) -> bool {
        self.program.types.type_has_bits(ty)
    }

    pub(crate) fn handle_is_ptr(&self, ty: &Type) -> bool {
        self.program.types.handle_is_ptr(ty)
    }

    pub(crate) fn canonical(&self, ty: &Type) -> Type {
        self.program.types.canonical(ty)
    }

    pub(crate) fn store_size(&self, ty: BasicTypeEnum<'ctx>) -> u64 {
        self.target_data.get_store_size(&ty)
    }

    pub(crate) fn abi_align(&self, ty: BasicTypeEnum<'ctx>) -> u32 {
        self.target_data.get_abi_alignment(&ty)
    }

    pub(crate) fn pref_align(&self, ty: BasicTypeEnum<'ctx>) -> u32 {
        self.target_data.get_preferred_alignment(&ty)
    }

    pub(crate) fn usize_llvm_type(&self) -> IntType<'ctx> {
        self.context
            .custom_width_int_type(self.pointer_size_bytes * 8)
    }

    pub(crate) fn err_tag_llvm_type(&self) -> IntType<'ctx> {
        self.context.custom_width_int_type(16)
    }

    /// Look up a primitive type by its source-level name.
    pub fn primitive_type(&self, name: &str) -> Option<Type> {
        self.primitive_table.get(name).cloned()
    }

    /// The canonical integer type constructor: standard widths come from
    /// the primitive table, anything else is built structurally.
    pub fn get_int_type(&self, signed: bool, bits: u32) -> Type {
        match (signed, bits) {
            (true, 8) => self.prims.i8.clone(),
            (true, 16) => self.prims.i16.clone(),
            (true, 32) => self.prims.i32.clone(),
            (true, 64) => self.prims.i64.clone(),
            (false, 8) => self.prims.u8.clone(),
            (false, 16) => self.prims.u16.clone(),
            (false, 32) => self.prims.u32.clone(),
            (false, 64) => self.prims.u64.clone(),
            _ => Type::int(signed, bits),
        }
    }

    /// Populate the primitive type table and the compile-time target
    /// description enums. Runs once at module init.
    pub(crate) fn define_builtin_types(&mut self) {
        // Fixed-width integers.
        for &bits in &[8u32, 16, 32, 64] {
            for &signed in &[false, true] {
                let ty = Type::int(signed, bits);
                let name = format!("{}{}", if signed { 'i' } else { 'u' }, bits);
                let encoding = match (signed, bits) {
                    (true, 8) => dwarf::ATE_SIGNED_CHAR,
                    (true, _) => dwarf::ATE_SIGNED,
                    (false, 8) => dwarf::ATE_UNSIGNED_CHAR,
                    (false, _) => dwarf::ATE_UNSIGNED,
                };
                self.register_basic_di_type(&ty, &name, bits as u64, encoding);
                self.primitive_table.insert(name, ty);
            }
        }
        self.prims.i8 = Type::int(true, 8);
        self.prims.i16 = Type::int(true, 16);
        self.prims.i32 = Type::int(true, 32);
        self.prims.i64 = Type::int(true, 64);
        self.prims.u8 = Type::int(false, 8);
        self.prims.u16 = Type::int(false, 16);
        self.prims.u32 = Type::int(false, 32);
        self.prims.u64 = Type::int(false, 64);

        // Target-dependent C integer types: named aliases so the header
        // generator can tell `c_int` apart from `i32`.
        for (i, kind) in CIntKind::ALL.iter().enumerate() {
            let bits = self.target.c_int_bits(*kind);
            let signed = kind.is_signed();
            let ty = Type::type_decl(kind.type_name(), Type::int(signed, bits));
            let encoding = if signed {
                dwarf::ATE_SIGNED
            } else {
                dwarf::ATE_UNSIGNED
            };
            self.register_basic_di_type(&ty, kind.type_name(), bits as u64, encoding);
            self.primitive_table
                .insert(kind.type_name().to_string(), ty.clone());
            self.prims.c_ints[i] = ty;
        }

        // bool
        let bool_ty = Type::bool_();
        self.register_basic_di_type(&bool_ty, "bool", 8, dwarf::ATE_BOOLEAN);
        self.primitive_table.insert("bool".into(), bool_ty.clone());
        self.prims.bool_ = bool_ty;

        // usize / isize: pointer-width integers with their own names.
        let ptr_bits = self.pointer_size_bytes * 8;
        for &signed in &[false, true] {
            let name = if signed { "isize" } else { "usize" };
            let ty = Type::type_decl(name, Type::int(signed, ptr_bits));
            let encoding = if signed {
                dwarf::ATE_SIGNED
            } else {
                dwarf::ATE_UNSIGNED
            };
            self.register_basic_di_type(&ty, name, ptr_bits as u64, encoding);
            self.primitive_table.insert(name.to_string(), ty.clone());
            if signed {
                self.prims.isize_ = ty;
            } else {
                self.prims.usize_ = ty;
            }
        }

        // Floats.
        let f32_ty = Type::float(32);
        self.register_basic_di_type(&f32_ty, "f32", 32, dwarf::ATE_FLOAT);
        self.primitive_table.insert("f32".into(), f32_ty.clone());
        self.prims.f32_ = f32_ty;

        let f64_ty = Type::float(64);
        self.register_basic_di_type(&f64_ty, "f64", 64, dwarf::ATE_FLOAT);
        self.primitive_table.insert("f64".into(), f64_ty.clone());
        self.prims.f64_ = f64_ty;

        let f80_ty = Type::float(80);
        self.register_basic_di_type(&f80_ty, "c_long_double", 80, dwarf::ATE_FLOAT);
        self.primitive_table
            .insert("c_long_double".into(), f80_ty.clone());
        self.prims.c_long_double = f80_ty;

        // void / unreachable / type. Zero storage; unreachable aliases
        // void for debug purposes.
        self.prims.void_ = Type::void();
        self.di_types.insert(Type::void(), None);
        self.primitive_table.insert("void".into(), Type::void());

        self.prims.unreachable_ = Type::unreachable_();
        self.di_types.insert(Type::unreachable_(), None);
        self.primitive_table
            .insert("unreachable".into(), Type::unreachable_());

        self.prims.metatype = Type::new(TypeKind::MetaType);
        self.primitive_table
            .insert("type".into(), self.prims.metatype.clone());

        // c_void: an alias of u8 so pointers to it are byte pointers.
        let c_void = Type::type_decl("c_void", Type::int(false, 8));
        self.primitive_table.insert("c_void".into(), c_void.clone());
        self.prims.c_void = c_void;

        // The error set type; its backend representation is the u16 tag.
        let pure_error = Type::pure_error();
        self.register_basic_di_type(&pure_error, "error", 16, dwarf::ATE_UNSIGNED);
        self.primitive_table
            .insert("error".into(), pure_error.clone());
        self.prims.pure_error = pure_error;
        self.prims.err_tag = Type::int(false, 16);

        self.define_target_enums();
    }

    /// The compile-time `@OS`/`@Arch`/`@Environ`/`@ObjectFormat` enums and
    /// the runtime `AtomicOrder` enum.
    fn define_target_enums(&mut self) {
        let void = Type::void();
        let comptime_enum = |names: &[&str]| -> Vec<EnumVariant> {
            names
                .iter()
                .enumerate()
                .map(|(i, n)| EnumVariant {
                    name: n.to_string(),
                    tag: i as u64,
                    payload: void.clone(),
                })
                .collect()
        };

        let os_names = [
            "linux",
            "macosx",
            "ios",
            "windows",
            "freebsd",
            "freestanding",
            "unknown",
        ];
        let os_id = self.program.types.declare_enum(
            "@OS",
            smallest_unsigned_int_type(os_names.len() as u64),
            comptime_enum(&os_names),
            true,
        );
        self.prims.os_enum = Type::enum_(os_id);

        let arch_names = [
            "x86_64", "i386", "aarch64", "arm", "thumb", "riscv64", "wasm32", "unknown",
        ];
        let arch_id = self.program.types.declare_enum(
            "@Arch",
            smallest_unsigned_int_type(arch_names.len() as u64),
            comptime_enum(&arch_names),
            true,
        );
        self.prims.arch_enum = Type::enum_(arch_id);

        let environ_names = ["gnu", "musl", "msvc", "android", "unknown"];
        let environ_id = self.program.types.declare_enum(
            "@Environ",
            smallest_unsigned_int_type(environ_names.len() as u64),
            comptime_enum(&environ_names),
            true,
        );
        self.prims.environ_enum = Type::enum_(environ_id);

        let oformat_names = ["elf", "macho", "coff", "wasm"];
        let oformat_id = self.program.types.declare_enum(
            "@ObjectFormat",
            smallest_unsigned_int_type(oformat_names.len() as u64),
            comptime_enum(&oformat_names),
            true,
        );
        self.prims.oformat_enum = Type::enum_(oformat_id);

        let order_names = [
            "Unordered",
            "Monotonic",
            "Acquire",
            "Release",
            "AcqRel",
            "SeqCst",
        ];
        let order_id = self.program.types.declare_enum(
            "AtomicOrder",
            smallest_unsigned_int_type(order_names.len() as u64),
            comptime_enum(&order_names),
            false,
        );
        let atomic_order = Type::enum_(order_id);
        self.primitive_table
            .insert("AtomicOrder".into(), atomic_order.clone());
        self.prims.atomic_order = atomic_order;
    }

    fn register_basic_di_type(&mut self, ty: &Type, name: &str, size_bits: u64, encoding: u32) {
        let di = self
            .di
            .builder
            .create_basic_type(name, size_bits, encoding, DIFlags::ZERO)
            .ok()
            .map(|t| t.as_type());
        self.di_types.insert(ty.clone(), di);
    }

    /// Lower a Sable type to an LLVM type. Memoized; zero-bit and
    /// compile-time-only types have no representation and must not be
    /// requested.
    pub(crate) fn lower_type(&mut self, ty: &Type) -> Result<BasicTypeEnum<'ctx>, Vec<Diagnostic>> {
        if let Some(t) = self.type_refs.get(ty) {
            return Ok(*t);
        }

        let llvm_ty: BasicTypeEnum<'ctx> = match ty.kind() {
            TypeKind::Bool => self.context.bool_type().into(),
            TypeKind::Int { bits, .. } => self.context.custom_width_int_type(*bits).into(),
            TypeKind::Float { bits } => match *bits {
                32 => self.context.f32_type().into(),
                64 => self.context.f64_type().into(),
                80 => self.context.x86_f80_type().into(),
                _ => {
                    return Err(vec![ice!(
                        self.current_span(),
                        "unsupported float width {}",
                        bits
                    )])
                }
            },
            TypeKind::PureError => self.err_tag_llvm_type().into(),
            TypeKind::Pointer { child, .. } => {
                if !self.type_has_bits(child) {
                    return Err(vec![ice!(
                        self.current_span(),
                        "pointer to zero-bit type `{}` has no representation",
                        self.program.types.type_name(child)
                    )]);
                }
                let child_ty = self.lower_type(child)?;
                child_ty.ptr_type(AddressSpace::default()).into()
            }
            TypeKind::Array { child, len } => {
                let child_ty = self.lower_type(child)?;
                child_ty.array_type(*len as u32).into()
            }
            TypeKind::Struct(id) => {
                let decl = self.program.types.struct_decl(*id);
                // Forward-declare and memoize before lowering fields so
                // recursive types terminate.
                let st = self.context.opaque_struct_type(&decl.name);
                self.type_refs.insert(ty.clone(), st.into());
                let mut field_types: Vec<BasicTypeEnum<'ctx>> = Vec::new();
                for field in &decl.fields {
                    if field.gen_index.is_some() {
                        field_types.push(self.lower_type(&field.ty)?);
                    }
                }
                st.set_body(&field_types, false);
                st.into()
            }
            TypeKind::Enum(id) => {
                let decl = self.program.types.enum_decl(*id);
                if decl.zero_bits {
                    return Err(vec![ice!(
                        self.current_span(),
                        "compile-time enum `{}` has no backend representation",
                        decl.name
                    )]);
                }
                let tag_ty = self.lower_type(&decl.tag_type)?;
                if decl.gen_payload_count == 0 {
                    tag_ty
                } else {
                    let st = self.context.opaque_struct_type(&decl.name);
                    self.type_refs.insert(ty.clone(), st.into());

                    // The payload slot must fit the largest variant and be
                    // aligned for the most demanding one. An array of the
                    // alignment-bucket integer satisfies both.
                    let mut max_size: u64 = 0;
                    let mut max_align: u32 = 1;
                    for variant in &decl.variants {
                        if !self.type_has_bits(&variant.payload) {
                            continue;
                        }
                        let payload_ty = self.lower_type(&variant.payload)?;
                        max_size = max_size.max(self.store_size(payload_ty));
                        max_align = max_align.max(self.abi_align(payload_ty));
                    }
                    let payload_slot: BasicTypeEnum<'ctx> = if max_align >= 8 {
                        self.context
                            .i64_type()
                            .array_type(max_size.div_ceil(8) as u32)
                            .into()
                    } else if max_align >= 4 {
                        self.context
                            .i32_type()
                            .array_type(max_size.div_ceil(4) as u32)
                            .into()
                    } else if max_align >= 2 {
                        self.context
                            .i16_type()
                            .array_type(max_size.div_ceil(2) as u32)
                            .into()
                    } else {
                        self.context.i8_type().array_type(max_size as u32).into()
                    };
                    st.set_body(&[tag_ty, payload_slot], false);
                    st.into()
                }
            }
            TypeKind::ErrorUnion { payload } => {
                if !self.type_has_bits(payload) {
                    self.err_tag_llvm_type().into()
                } else {
                    let payload_ty = self.lower_type(payload)?;
                    self.context
                        .struct_type(&[self.err_tag_llvm_type().into(), payload_ty], false)
                        .into()
                }
            }
            TypeKind::Optional { child } => {
                if child.is_pointer_or_fn() {
                    self.lower_type(child)?
                } else {
                    let child_ty = self.lower_type(child)?;
                    self.context
                        .struct_type(&[child_ty, self.context.bool_type().into()], false)
                        .into()
                }
            }
            TypeKind::Fn(_) => {
                let abi = self.fn_abi(ty)?;
                abi.fn_type.ptr_type(AddressSpace::default()).into()
            }
            TypeKind::TypeDecl { canonical, .. } => {
                let canonical = canonical.clone();
                self.lower_type(&canonical)?
            }
            _ => {
                return Err(vec![ice!(
                    self.current_span(),
                    "type `{}` has no backend representation",
                    self.program.types.type_name(ty)
                )])
            }
        };

        self.type_refs.insert(ty.clone(), llvm_ty);
        Ok(llvm_ty)
    }

    /// The ABI shape of a function type. Memoized per structural type.
    pub(crate) fn fn_abi(&mut self, fn_ty: &Type) -> Result<FnAbi<'ctx>, Vec<Diagnostic>> {
        if let Some(abi) = self.fn_abis.get(fn_ty) {
            return Ok(abi.clone());
        }
        let sig = match fn_ty.fn_sig() {
            Some(sig) => sig.clone(),
            None => {
                return Err(vec![ice!(
                    self.current_span(),
                    "fn_abi on non-function type `{}`",
                    self.program.types.type_name(fn_ty)
                )])
            }
        };

        let ret_has_bits = self.type_has_bits(&sig.ret);
        let ret_by_ref = ret_has_bits && self.handle_is_ptr(&sig.ret) && !sig.is_extern;

        let mut llvm_params: Vec<BasicMetadataTypeEnum<'ctx>> = Vec::new();
        if ret_by_ref {
            let ret_ty = self.lower_type(&sig.ret)?;
            llvm_params.push(ret_ty.ptr_type(AddressSpace::default()).into());
        }

        let offset = ret_by_ref as u32;
        let mut param_map: Vec<Option<u32>> = Vec::with_capacity(sig.params.len());
        let mut gen_param_types: Vec<Option<Type>> = Vec::with_capacity(sig.params.len());
        let mut gen_count = 0u32;
        for FnParam { ty, .. } in &sig.params {
            if !self.type_has_bits(ty) {
                param_map.push(None);
                gen_param_types.push(None);
                continue;
            }
            if self.handle_is_ptr(ty) {
                let lowered = self.lower_type(ty)?;
                llvm_params.push(lowered.ptr_type(AddressSpace::default()).into());
                gen_param_types.push(Some(Type::pointer(ty.clone(), true)));
            } else {
                let lowered = self.lower_type(ty)?;
                llvm_params.push(lowered.into());
                gen_param_types.push(Some(ty.clone()));
            }
            param_map.push(Some(offset + gen_count));
            gen_count += 1;
        }

        let fn_type = if sig.ret.is_unreachable() || !ret_has_bits || ret_by_ref {
            self.context
                .void_type()
                .fn_type(&llvm_params, sig.is_var_args)
        } else {
            let ret_ty = self.lower_type(&sig.ret)?;
            ret_ty.fn_type(&llvm_params, sig.is_var_args)
        };

        let abi = FnAbi {
            fn_type,
            ret_by_ref,
            param_map,
            gen_param_types,
        };
        self.fn_abis.insert(fn_ty.clone(), abi.clone());
        Ok(abi)
    }

    /// Get or create the debug type for a Sable type. `None` means the
    /// type has no debug representation (void and friends).
    pub(crate) fn di_type(&mut self, ty: &Type) -> Result<Option<DIType<'ctx>>, Vec<Diagnostic>> {
        if let Some(cached) = self.di_types.get(ty) {
            return Ok(*cached);
        }
        // Zero-bit types (and the compile-time-only kinds) have no debug
        // representation.
        if !self.type_has_bits(ty) {
            self.di_types.insert(ty.clone(), None);
            return Ok(None);
        }

        let di: Option<DIType<'ctx>> = match ty.kind() {
            TypeKind::Void | TypeKind::Unreachable => None,
            TypeKind::Bool => self.basic_di(ty, 8, dwarf::ATE_BOOLEAN)?,
            TypeKind::Int { bits, signed } => {
                let encoding = match (*signed, *bits) {
                    (true, 8) => dwarf::ATE_SIGNED_CHAR,
                    (true, _) => dwarf::ATE_SIGNED,
                    (false, 8) => dwarf::ATE_UNSIGNED_CHAR,
                    (false, _) => dwarf::ATE_UNSIGNED,
                };
                self.basic_di(ty, *bits as u64, encoding)?
            }
            TypeKind::Float { bits } => self.basic_di(ty, *bits as u64, dwarf::ATE_FLOAT)?,
            TypeKind::PureError => self.basic_di(ty, 16, dwarf::ATE_UNSIGNED)?,
            TypeKind::Pointer { child, .. } => {
                let pointee = self.di_type(child)?.unwrap_or_else(|| self.void_di_type());
                let name = self.program.types.type_name(ty);
                let ptr_bits = (self.pointer_size_bytes * 8) as u64;
                Some(
                    self.di
                        .builder
                        .create_pointer_type(
                            &name,
                            pointee,
                            ptr_bits,
                            self.pointer_size_bytes * 8,
                            AddressSpace::default(),
                        )
                        .as_type(),
                )
            }
            TypeKind::Array { child, .. } => {
                let elem = self.di_type(child)?;
                self.composite_di(ty, elem.into_iter().collect())?
            }
            TypeKind::Struct(id) => {
                let decl = self.program.types.struct_decl(*id);
                let mut members = Vec::new();
                for field in &decl.fields {
                    if field.gen_index.is_some() {
                        if let Some(di) = self.di_type(&field.ty)? {
                            members.push(di);
                        }
                    }
                }
                self.composite_di(ty, members)?
            }
            TypeKind::Enum(id) => {
                let decl = self.program.types.enum_decl(*id);
                if decl.zero_bits {
                    None
                } else {
                    let tag = self.di_type(&decl.tag_type)?;
                    self.composite_di(ty, tag.into_iter().collect())?
                }
            }
            TypeKind::ErrorUnion { payload } => {
                let tag = self.basic_di(&self.prims.err_tag.clone(), 16, dwarf::ATE_UNSIGNED)?;
                let mut members: Vec<DIType<'ctx>> = tag.into_iter().collect();
                if self.type_has_bits(payload) {
                    if let Some(di) = self.di_type(payload)? {
                        members.push(di);
                    }
                }
                self.composite_di(ty, members)?
            }
            TypeKind::Optional { child } => {
                if child.is_pointer_or_fn() {
                    self.di_type(child)?
                } else {
                    let mut members = Vec::new();
                    if let Some(di) = self.di_type(child)? {
                        members.push(di);
                    }
                    if let Some(di) = self.di_type(&Type::bool_())? {
                        members.push(di);
                    }
                    self.composite_di(ty, members)?
                }
            }
            TypeKind::Fn(_) => {
                let name = self.program.types.type_name(ty);
                let ptr_bits = (self.pointer_size_bytes * 8) as u64;
                let void = self.void_di_type();
                Some(
                    self.di
                        .builder
                        .create_pointer_type(
                            &name,
                            void,
                            ptr_bits,
                            self.pointer_size_bytes * 8,
                            AddressSpace::default(),
                        )
                        .as_type(),
                )
            }
            TypeKind::TypeDecl { name, canonical } => match canonical.kind() {
                TypeKind::Int { bits, signed } => {
                    let encoding = if *signed {
                        dwarf::ATE_SIGNED
                    } else {
                        dwarf::ATE_UNSIGNED
                    };
                    let name = name.clone();
                    let bits = *bits as u64;
                    self.named_basic_di(&name, bits, encoding)
                }
                _ => {
                    let canonical = canonical.clone();
                    self.di_type(&canonical)?
                }
            },
            _ => None,
        };

        self.di_types.insert(ty.clone(), di);
        Ok(di)
    }

    fn basic_di(
        &mut self,
        ty: &Type,
        size_bits: u64,
        encoding: u32,
    ) -> Result<Option<DIType<'ctx>>, Vec<Diagnostic>> {
        let name = self.program.types.type_name(ty);
        Ok(self.named_basic_di(&name, size_bits, encoding))
    }

    fn named_basic_di(&mut self, name: &str, size_bits: u64, encoding: u32) -> Option<DIType<'ctx>> {
        self.di
            .builder
            .create_basic_type(name, size_bits, encoding, DIFlags::ZERO)
            .ok()
            .map(|t| t.as_type())
    }

    /// A composite (struct-like) debug type sized from the lowered type.
    fn composite_di(
        &mut self,
        ty: &Type,
        members: Vec<DIType<'ctx>>,
    ) -> Result<Option<DIType<'ctx>>, Vec<Diagnostic>> {
        let llvm_ty = self.lower_type(ty)?;
        let size_bits = self.store_size(llvm_ty) * 8;
        let align_bits = self.abi_align(llvm_ty) * 8;
        let name = self.program.types.type_name(ty);
        let scope = self.di.compile_unit.as_debug_info_scope();
        let file = self.di.main_file();
        Ok(Some(
            self.di
                .builder
                .create_struct_type(
                    scope,
                    &name,
                    file,
                    0,
                    size_bits,
                    align_bits,
                    DIFlags::ZERO,
                    None,
                    &members,
                    0,
                    None,
                    "",
                )
                .as_type(),
        ))
    }

    pub(crate) fn void_di_type(&mut self) -> DIType<'ctx> {
        self.di
            .builder
            .create_basic_type("void", 0, 0, DIFlags::ZERO)
            .expect("void debug type")
            .as_type()
    }

    /// Internal-contract check used by lowering entry points: compile-time
    /// only types must never be lowered.
    pub(crate) fn assert_runtime_type(&self, ty: &Type, span: Span) -> Result<(), Vec<Diagnostic>> {
        match ty.kind() {
            TypeKind::Invalid
            | TypeKind::MetaType
            | TypeKind::NumLitInt
            | TypeKind::NumLitFloat
            | TypeKind::UndefLit
            | TypeKind::NullLit
            | TypeKind::Namespace
            | TypeKind::Block
            | TypeKind::BoundFn
            | TypeKind::Var => Err(vec![ice!(
                span,
                "compile-time type `{}` reached instruction lowering",
                self.program.types.type_name(ty)
            )]),
            _ => Ok(()),
        }
    }
}
