//! The backend's view of Sable types.
//!
//! Types are immutable, structurally-shared trees. Two types that are
//! structurally identical compare and hash equal, which is what lets the
//! code generator memoize one backend handle per type. Struct and enum
//! types are identified by their declaration id into the [`TypeTable`], so
//! recursive types (a struct containing a pointer to itself) terminate.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::target::CIntKind;

/// Identifies a struct declaration in the [`TypeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructId(pub u32);

/// Identifies an enum declaration in the [`TypeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumId(pub u32);

/// Calling conventions a function signature can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallConv {
    #[default]
    C,
    Fast,
    Cold,
}

impl CallConv {
    /// The LLVM calling convention id.
    pub fn llvm_id(self) -> u32 {
        match self {
            CallConv::C => 0,
            CallConv::Fast => 8,
            CallConv::Cold => 9,
        }
    }
}

/// A formal parameter in a function signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnParam {
    pub ty: Type,
    pub is_noalias: bool,
}

impl FnParam {
    pub fn new(ty: Type) -> Self {
        Self {
            ty,
            is_noalias: false,
        }
    }
}

/// A function signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnSig {
    pub params: Vec<FnParam>,
    pub ret: Type,
    pub is_extern: bool,
    pub is_var_args: bool,
    pub is_naked: bool,
    pub cc: CallConv,
}

impl FnSig {
    pub fn new(params: Vec<FnParam>, ret: Type) -> Self {
        Self {
            params,
            ret,
            is_extern: false,
            is_var_args: false,
            is_naked: false,
            cc: CallConv::C,
        }
    }
}

/// The kinds of type the backend can see.
///
/// The tail of the list is compile-time-only: those kinds exist so the
/// analyzer can hand over a complete picture, but none of them may reach
/// instruction lowering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Invalid,
    MetaType,
    Void,
    Unreachable,
    Bool,
    Int { bits: u32, signed: bool },
    Float { bits: u32 },
    Pointer { child: Type, is_const: bool },
    Array { child: Type, len: u64 },
    Struct(StructId),
    Enum(EnumId),
    ErrorUnion { payload: Type },
    PureError,
    Optional { child: Type },
    Fn(Rc<FnSig>),
    /// A named alias with a canonical underlying type (e.g. `c_void`).
    TypeDecl { name: String, canonical: Type },
    // Compile-time-only kinds. Must never reach lowering.
    NumLitInt,
    NumLitFloat,
    UndefLit,
    NullLit,
    Namespace,
    Block,
    BoundFn,
    Var,
}

/// A Sable type. Cheap to clone, structurally comparable and hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type(Rc<TypeKind>);

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Type(Rc::new(kind))
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0
    }

    pub fn invalid() -> Self {
        Type::new(TypeKind::Invalid)
    }

    pub fn void() -> Self {
        Type::new(TypeKind::Void)
    }

    pub fn unreachable_() -> Self {
        Type::new(TypeKind::Unreachable)
    }

    pub fn bool_() -> Self {
        Type::new(TypeKind::Bool)
    }

    pub fn int(signed: bool, bits: u32) -> Self {
        Type::new(TypeKind::Int { bits, signed })
    }

    pub fn float(bits: u32) -> Self {
        Type::new(TypeKind::Float { bits })
    }

    pub fn pointer(child: Type, is_const: bool) -> Self {
        Type::new(TypeKind::Pointer { child, is_const })
    }

    pub fn array(child: Type, len: u64) -> Self {
        Type::new(TypeKind::Array { child, len })
    }

    pub fn optional(child: Type) -> Self {
        Type::new(TypeKind::Optional { child })
    }

    pub fn error_union(payload: Type) -> Self {
        Type::new(TypeKind::ErrorUnion { payload })
    }

    pub fn pure_error() -> Self {
        Type::new(TypeKind::PureError)
    }

    pub fn fn_(sig: FnSig) -> Self {
        Type::new(TypeKind::Fn(Rc::new(sig)))
    }

    pub fn struct_(id: StructId) -> Self {
        Type::new(TypeKind::Struct(id))
    }

    pub fn enum_(id: EnumId) -> Self {
        Type::new(TypeKind::Enum(id))
    }

    pub fn type_decl(name: impl Into<String>, canonical: Type) -> Self {
        Type::new(TypeKind::TypeDecl {
            name: name.into(),
            canonical,
        })
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind(), TypeKind::Void)
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self.kind(), TypeKind::Unreachable)
    }

    pub fn is_int(&self) -> bool {
        matches!(self.kind(), TypeKind::Int { .. })
    }

    pub fn is_float(&self) -> bool {
        matches!(self.kind(), TypeKind::Float { .. })
    }

    pub fn is_signed_int(&self) -> bool {
        matches!(self.kind(), TypeKind::Int { signed: true, .. })
    }

    /// Optionals over pointers and functions collapse to a raw nullable
    /// pointer instead of carrying a separate presence bit.
    pub fn is_pointer_or_fn(&self) -> bool {
        matches!(self.kind(), TypeKind::Pointer { .. } | TypeKind::Fn(_))
    }

    /// The function signature, if this is a function type.
    pub fn fn_sig(&self) -> Option<&Rc<FnSig>> {
        match self.kind() {
            TypeKind::Fn(sig) => Some(sig),
            _ => None,
        }
    }

    /// The pointee, if this is a pointer type.
    pub fn pointee(&self) -> Option<&Type> {
        match self.kind() {
            TypeKind::Pointer { child, .. } => Some(child),
            _ => None,
        }
    }
}

/// A field of a struct declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
    /// Index of this field in the generated LLVM struct. Zero-bit fields
    /// occupy no slot and have no generated index.
    pub gen_index: Option<u32>,
}

/// A struct declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<StructField>,
    /// Slices are `{ ptr, len }` structs with this flag set.
    pub is_slice: bool,
    /// Number of fields that occupy a generated slot.
    pub gen_field_count: u32,
}

/// A variant of an enum declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumVariant {
    pub name: String,
    /// The tag value, assigned in declaration order.
    pub tag: u64,
    /// Payload type; `void` when the variant carries nothing.
    pub payload: Type,
}

/// An enum (tagged union) declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDecl {
    pub name: String,
    pub tag_type: Type,
    pub variants: Vec<EnumVariant>,
    /// Number of variants whose payload occupies storage.
    pub gen_payload_count: u32,
    /// Compile-time-only enums (the target description enums) never reach
    /// lowering and occupy no storage.
    pub zero_bits: bool,
}

/// Side table of nominal type declarations plus the slice-type memoization.
///
/// Interior mutability lets the code generator derive new slice types while
/// the rest of the program is borrowed immutably; the table is append-only
/// so ids stay stable.
#[derive(Debug, Default)]
pub struct TypeTable {
    structs: RefCell<Vec<StructDecl>>,
    enums: RefCell<Vec<EnumDecl>>,
    slices: RefCell<HashMap<(Type, bool), Type>>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a struct. Generated field indices are assigned here, skipping
    /// zero-bit fields.
    pub fn declare_struct(
        &self,
        name: impl Into<String>,
        fields: Vec<(String, Type)>,
    ) -> StructId {
        self.declare_struct_inner(name.into(), fields, false)
    }

    fn declare_struct_inner(
        &self,
        name: String,
        fields: Vec<(String, Type)>,
        is_slice: bool,
    ) -> StructId {
        let mut gen_index = 0u32;
        let fields: Vec<StructField> = fields
            .into_iter()
            .map(|(name, ty)| {
                let idx = if self.type_has_bits(&ty) {
                    let idx = gen_index;
                    gen_index += 1;
                    Some(idx)
                } else {
                    None
                };
                StructField {
                    name,
                    ty,
                    gen_index: idx,
                }
            })
            .collect();

        let mut structs = self.structs.borrow_mut();
        let id = StructId(structs.len() as u32);
        structs.push(StructDecl {
            name,
            fields,
            is_slice,
            gen_field_count: gen_index,
        });
        id
    }

    /// Declare an enum. The payload count is computed here.
    pub fn declare_enum(
        &self,
        name: impl Into<String>,
        tag_type: Type,
        variants: Vec<EnumVariant>,
        zero_bits: bool,
    ) -> EnumId {
        let gen_payload_count = variants
            .iter()
            .filter(|v| self.type_has_bits(&v.payload))
            .count() as u32;
        let mut enums = self.enums.borrow_mut();
        let id = EnumId(enums.len() as u32);
        enums.push(EnumDecl {
            name: name.into(),
            tag_type,
            variants,
            gen_payload_count,
            zero_bits,
        });
        id
    }

    pub fn struct_decl(&self, id: StructId) -> StructDecl {
        self.structs.borrow()[id.0 as usize].clone()
    }

    pub fn enum_decl(&self, id: EnumId) -> EnumDecl {
        self.enums.borrow()[id.0 as usize].clone()
    }

    /// The memoized slice type `[]T` / `[]const T`: a `{ ptr, len }` struct
    /// with the slice flag set. `usize_ty` supplies the length field type.
    pub fn slice_of(&self, elem: Type, is_const: bool, usize_ty: Type) -> Type {
        if let Some(ty) = self.slices.borrow().get(&(elem.clone(), is_const)) {
            return ty.clone();
        }
        let name = format!(
            "[]{}{}",
            if is_const { "const " } else { "" },
            self.type_name(&elem)
        );
        let ptr_ty = Type::pointer(elem.clone(), is_const);
        let id = self.declare_struct_inner(
            name,
            vec![("ptr".to_string(), ptr_ty), ("len".to_string(), usize_ty)],
            true,
        );
        let ty = Type::struct_(id);
        self.slices
            .borrow_mut()
            .insert((elem, is_const), ty.clone());
        ty
    }

    /// Whether values of this type occupy any storage.
    pub fn type_has_bits(&self, ty: &Type) -> bool {
        match ty.kind() {
            TypeKind::Invalid
            | TypeKind::MetaType
            | TypeKind::Void
            | TypeKind::Unreachable
            | TypeKind::NumLitInt
            | TypeKind::NumLitFloat
            | TypeKind::UndefLit
            | TypeKind::NullLit
            | TypeKind::Namespace
            | TypeKind::Block
            | TypeKind::BoundFn
            | TypeKind::Var => false,
            TypeKind::Bool
            | TypeKind::Int { .. }
            | TypeKind::Float { .. }
            | TypeKind::PureError
            | TypeKind::ErrorUnion { .. }
            | TypeKind::Optional { .. }
            | TypeKind::Fn(_) => true,
            TypeKind::Pointer { child, .. } => self.type_has_bits(child),
            TypeKind::Array { child, len } => *len > 0 && self.type_has_bits(child),
            TypeKind::Struct(id) => self.structs.borrow()[id.0 as usize].gen_field_count > 0,
            TypeKind::Enum(id) => !self.enums.borrow()[id.0 as usize].zero_bits,
            TypeKind::TypeDecl { canonical, .. } => self.type_has_bits(canonical),
        }
    }

    /// Whether values of this type are handled by pointer rather than held
    /// in a register: aggregates, payload-bearing enums and error unions,
    /// and optionals that are not pointer-shaped.
    pub fn handle_is_ptr(&self, ty: &Type) -> bool {
        if !self.type_has_bits(ty) {
            return false;
        }
        match ty.kind() {
            TypeKind::Array { .. } | TypeKind::Struct(_) => true,
            TypeKind::Enum(id) => self.enums.borrow()[id.0 as usize].gen_payload_count > 0,
            TypeKind::ErrorUnion { payload } => self.type_has_bits(payload),
            TypeKind::Optional { child } => !child.is_pointer_or_fn(),
            TypeKind::TypeDecl { canonical, .. } => self.handle_is_ptr(canonical),
            _ => false,
        }
    }

    /// Resolve `TypeDecl` aliases to the underlying type.
    pub fn canonical(&self, ty: &Type) -> Type {
        let mut cur = ty.clone();
        loop {
            match cur.kind() {
                TypeKind::TypeDecl { canonical, .. } => {
                    let next = canonical.clone();
                    cur = next;
                }
                _ => return cur,
            }
        }
    }

    /// The canonical source-level name of a type, used for debug info and
    /// generated struct names.
    pub fn type_name(&self, ty: &Type) -> String {
        match ty.kind() {
            TypeKind::Invalid => "(invalid)".to_string(),
            TypeKind::MetaType => "type".to_string(),
            TypeKind::Void => "void".to_string(),
            TypeKind::Unreachable => "unreachable".to_string(),
            TypeKind::Bool => "bool".to_string(),
            TypeKind::Int { bits, signed } => {
                format!("{}{}", if *signed { 'i' } else { 'u' }, bits)
            }
            TypeKind::Float { bits } => match bits {
                80 => "c_long_double".to_string(),
                _ => format!("f{}", bits),
            },
            TypeKind::Pointer { child, is_const } => format!(
                "*{}{}",
                if *is_const { "const " } else { "" },
                self.type_name(child)
            ),
            TypeKind::Array { child, len } => format!("[{}]{}", len, self.type_name(child)),
            TypeKind::Struct(id) => self.structs.borrow()[id.0 as usize].name.clone(),
            TypeKind::Enum(id) => self.enums.borrow()[id.0 as usize].name.clone(),
            TypeKind::ErrorUnion { payload } => format!("%{}", self.type_name(payload)),
            TypeKind::PureError => "error".to_string(),
            TypeKind::Optional { child } => format!("?{}", self.type_name(child)),
            TypeKind::Fn(sig) => {
                let params: Vec<String> =
                    sig.params.iter().map(|p| self.type_name(&p.ty)).collect();
                format!("fn({}) {}", params.join(", "), self.type_name(&sig.ret))
            }
            TypeKind::TypeDecl { name, .. } => name.clone(),
            TypeKind::NumLitInt => "(integer literal)".to_string(),
            TypeKind::NumLitFloat => "(float literal)".to_string(),
            TypeKind::UndefLit => "(undefined)".to_string(),
            TypeKind::NullLit => "(null)".to_string(),
            TypeKind::Namespace => "(namespace)".to_string(),
            TypeKind::Block => "(block)".to_string(),
            TypeKind::BoundFn => "(bound fn)".to_string(),
            TypeKind::Var => "(var)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_identity() {
        let a = Type::pointer(Type::int(false, 8), true);
        let b = Type::pointer(Type::int(false, 8), true);
        assert_eq!(a, b);
        let c = Type::pointer(Type::int(false, 8), false);
        assert_ne!(a, c);
    }

    #[test]
    fn test_slice_memoization() {
        let table = TypeTable::new();
        let usize_ty = Type::int(false, 64);
        let s1 = table.slice_of(Type::int(false, 8), true, usize_ty.clone());
        let s2 = table.slice_of(Type::int(false, 8), true, usize_ty.clone());
        assert_eq!(s1, s2);
        let s3 = table.slice_of(Type::int(false, 8), false, usize_ty);
        assert_ne!(s1, s3);
        assert_eq!(table.type_name(&s1), "[]const u8");
    }

    #[test]
    fn test_zero_bits() {
        let table = TypeTable::new();
        assert!(!table.type_has_bits(&Type::void()));
        assert!(!table.type_has_bits(&Type::pointer(Type::void(), false)));
        assert!(!table.type_has_bits(&Type::array(Type::int(true, 32), 0)));
        assert!(table.type_has_bits(&Type::int(true, 32)));

        let empty = table.declare_struct("Empty", vec![("v".to_string(), Type::void())]);
        assert!(!table.type_has_bits(&Type::struct_(empty)));

        let full = table.declare_struct(
            "Full",
            vec![
                ("a".to_string(), Type::void()),
                ("b".to_string(), Type::int(true, 32)),
            ],
        );
        let decl = table.struct_decl(full);
        assert_eq!(decl.fields[0].gen_index, None);
        assert_eq!(decl.fields[1].gen_index, Some(0));
        assert!(table.type_has_bits(&Type::struct_(full)));
    }

    #[test]
    fn test_handle_is_ptr() {
        let table = TypeTable::new();
        assert!(!table.handle_is_ptr(&Type::int(true, 32)));
        assert!(table.handle_is_ptr(&Type::array(Type::int(true, 32), 4)));
        // Optional pointer collapses to a raw pointer.
        let opt_ptr = Type::optional(Type::pointer(Type::int(false, 8), false));
        assert!(!table.handle_is_ptr(&opt_ptr));
        let opt_int = Type::optional(Type::int(true, 32));
        assert!(table.handle_is_ptr(&opt_int));
        // Error union of void collapses to the bare tag.
        assert!(!table.handle_is_ptr(&Type::error_union(Type::void())));
        assert!(table.handle_is_ptr(&Type::error_union(Type::int(true, 32))));
    }
}
