//! Compile-time constant values.
//!
//! The analyzer attaches a [`ConstValue`] to every instruction. Most carry
//! the `Runtime` tag and no data; instructions the analyzer could fold carry
//! `Static` data (or the cheaper `Zeroes`/`Undef` tags) and are materialized
//! as backend constants instead of being lowered.
//!
//! Nodes are shared through `Rc`: a pointer constant holds an `Rc` to the
//! value it points at, and the code generator keys its handle cache on that
//! `Rc` identity. Two pointer constants with the same base therefore land in
//! the same backend global.

use std::rc::Rc;

use num_bigint::BigInt;

use super::ty::Type;
use super::FnId;

/// How much of a value is known at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstSpecial {
    /// Nothing; the instruction must be lowered.
    Runtime,
    /// Fully known; `kind` holds the data.
    Static,
    /// Known to be all zero bits.
    Zeroes,
    /// Explicitly undefined.
    Undef,
}

/// A numeric literal, either integral or floating.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstNum {
    Int(BigInt),
    Float(f64),
}

/// The payload of a `Static` constant, shaped by the value's type.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstKind {
    /// Placeholder for non-`Static` values and `void`.
    Void,
    Int(BigInt),
    Float(ConstNum),
    Bool(bool),
    /// A pointer at `base` (or at `base[index]` when `index` is set, in
    /// which case `base` is an array constant).
    Ptr {
        base: Rc<ConstValue>,
        index: Option<u64>,
    },
    Array {
        elements: Vec<Rc<ConstValue>>,
    },
    Struct {
        fields: Vec<Rc<ConstValue>>,
    },
    Optional(Option<Rc<ConstValue>>),
    /// `err` is the error tag (non-zero) or absent for the ok case with
    /// `payload` set.
    ErrUnion {
        err: Option<u16>,
        payload: Option<Rc<ConstValue>>,
    },
    Enum {
        tag: u64,
        payload: Option<Rc<ConstValue>>,
    },
    Fn(FnId),
    PureError(u16),
}

/// A compile-time value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstValue {
    pub special: ConstSpecial,
    pub kind: ConstKind,
}

impl ConstValue {
    pub fn runtime() -> Rc<Self> {
        Rc::new(Self {
            special: ConstSpecial::Runtime,
            kind: ConstKind::Void,
        })
    }

    pub fn undef() -> Rc<Self> {
        Rc::new(Self {
            special: ConstSpecial::Undef,
            kind: ConstKind::Void,
        })
    }

    pub fn zeroes() -> Rc<Self> {
        Rc::new(Self {
            special: ConstSpecial::Zeroes,
            kind: ConstKind::Void,
        })
    }

    pub fn of(kind: ConstKind) -> Rc<Self> {
        Rc::new(Self {
            special: ConstSpecial::Static,
            kind,
        })
    }

    pub fn int(value: impl Into<BigInt>) -> Rc<Self> {
        Self::of(ConstKind::Int(value.into()))
    }

    pub fn float(value: f64) -> Rc<Self> {
        Self::of(ConstKind::Float(ConstNum::Float(value)))
    }

    pub fn bool_(value: bool) -> Rc<Self> {
        Self::of(ConstKind::Bool(value))
    }

    pub fn void() -> Rc<Self> {
        Self::of(ConstKind::Void)
    }

    /// A static array of `u8` elements, the constant form of string data.
    pub fn bytes(data: &[u8]) -> Rc<Self> {
        Self::of(ConstKind::Array {
            elements: data.iter().map(|b| ConstValue::int(*b)).collect(),
        })
    }

    /// Whether lowering may treat this as a compile-time value.
    pub fn is_comptime(&self) -> bool {
        self.special != ConstSpecial::Runtime
    }
}

/// A global variable of the program.
#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub name: String,
    pub ty: Type,
    pub value: Rc<ConstValue>,
    pub is_extern: bool,
    pub is_const: bool,
    pub scope: super::scope::ScopeId,
    pub span: crate::span::Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ptr_identity_sharing() {
        let base = ConstValue::int(7);
        let p1 = ConstValue::of(ConstKind::Ptr {
            base: base.clone(),
            index: None,
        });
        let p2 = ConstValue::of(ConstKind::Ptr {
            base: base.clone(),
            index: None,
        });
        let (b1, b2) = match (&p1.kind, &p2.kind) {
            (ConstKind::Ptr { base: b1, .. }, ConstKind::Ptr { base: b2, .. }) => (b1, b2),
            _ => unreachable!(),
        };
        assert!(Rc::ptr_eq(b1, b2));
    }

    #[test]
    fn test_specials() {
        assert!(!ConstValue::runtime().is_comptime());
        assert!(ConstValue::undef().is_comptime());
        assert!(ConstValue::zeroes().is_comptime());
        assert!(ConstValue::int(3).is_comptime());
    }
}
