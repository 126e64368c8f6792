//! The lexical scope tree.
//!
//! Scopes form a tree with parent-only links. Codegen walks them for two
//! things: resolving the nearest debug scope for an instruction, and
//! answering whether runtime safety checks are enabled at a given point
//! (`Block` and `Decls` scopes can override the inherited setting).

use crate::span::Span;

/// Identifies a scope in the [`ScopeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

/// The variants of lexical scope.
#[derive(Debug, Clone)]
pub enum ScopeKind {
    /// A container body (file top level or a nested container).
    Decls {
        /// `None` for the file's top level.
        container_name: Option<String>,
        safety_set: bool,
        safety_off: bool,
    },
    /// A function definition.
    FnDef { fn_id: super::FnId },
    /// A braced block.
    Block { safety_set: bool, safety_off: bool },
    Defer,
    VarDecl,
    Loop,
    /// C-import scopes exist during analysis only; reaching one during
    /// codegen is a contract violation.
    CImport,
}

/// One scope in the tree.
#[derive(Debug, Clone)]
pub struct ScopeData {
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    pub span: Span,
}

/// The tree of lexical scopes of a whole program.
#[derive(Debug, Default)]
pub struct ScopeTree {
    scopes: Vec<ScopeData>,
}

impl ScopeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, parent: Option<ScopeId>, kind: ScopeKind, span: Span) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeData { parent, kind, span });
        id
    }

    /// Convenience: a root `Decls` scope for the file top level.
    pub fn alloc_root(&mut self) -> ScopeId {
        self.alloc(
            None,
            ScopeKind::Decls {
                container_name: None,
                safety_set: false,
                safety_off: false,
            },
            Span::dummy(),
        )
    }

    pub fn get(&self, id: ScopeId) -> &ScopeData {
        &self.scopes[id.0 as usize]
    }

    pub fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.scopes[id.0 as usize].parent
    }

    /// Walk outward from `scope` looking for the nearest explicit safety
    /// setting. Returns `None` when no enclosing scope overrides it.
    pub fn safety_override(&self, scope: ScopeId) -> Option<bool> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let data = self.get(id);
            match &data.kind {
                ScopeKind::Block {
                    safety_set: true,
                    safety_off,
                }
                | ScopeKind::Decls {
                    safety_set: true,
                    safety_off,
                    ..
                } => return Some(!*safety_off),
                _ => {}
            }
            cur = data.parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_override_walk() {
        let mut tree = ScopeTree::new();
        let root = tree.alloc_root();
        let unsafe_block = tree.alloc(
            Some(root),
            ScopeKind::Block {
                safety_set: true,
                safety_off: true,
            },
            Span::dummy(),
        );
        let inner = tree.alloc(Some(unsafe_block), ScopeKind::VarDecl, Span::dummy());
        let plain = tree.alloc(
            Some(root),
            ScopeKind::Block {
                safety_set: false,
                safety_off: false,
            },
            Span::dummy(),
        );

        assert_eq!(tree.safety_override(root), None);
        assert_eq!(tree.safety_override(unsafe_block), Some(false));
        // Inherited through a non-overriding scope.
        assert_eq!(tree.safety_override(inner), Some(false));
        assert_eq!(tree.safety_override(plain), None);
    }

    #[test]
    fn test_nearest_override_wins() {
        let mut tree = ScopeTree::new();
        let root = tree.alloc_root();
        let off = tree.alloc(
            Some(root),
            ScopeKind::Block {
                safety_set: true,
                safety_off: true,
            },
            Span::dummy(),
        );
        let back_on = tree.alloc(
            Some(off),
            ScopeKind::Block {
                safety_set: true,
                safety_off: false,
            },
            Span::dummy(),
        );
        assert_eq!(tree.safety_override(back_on), Some(true));
    }
}
