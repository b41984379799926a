use la_arena::{Arena, Idx};
use plume_ast::Span;
use smol_str::SmolStr;

use crate::typed::{ClassId, LocalId};
use crate::types::Ty;

pub type SymbolId = Idx<Symbol>;

/// A named binding site. The `dealias` slot points at whatever definition
/// the symbol currently resolves to; it flips from `Placeholder` to its
/// final form while a recursive group is being typed.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: SmolStr,
    pub mutable: bool,
    pub span: Span,
    pub dealias: Dealias,
}

#[derive(Debug, Clone)]
pub enum Dealias {
    /// Forward-declared binding: a fresh `X` variable or the ascription.
    Placeholder(Ty),
    /// Final typed local binding.
    Local(LocalId),
    /// Lambda or constructor parameter.
    Param(Ty),
    /// Class member slot.
    Member { class: ClassId, index: usize },
    /// Class definition.
    Class(ClassId),
    /// One of the ground I/O primitives.
    Builtin(Builtin),
}

// ── Builtins ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    ReadInt,
    ReadFloat,
    PrintlnInt,
    PrintlnFloat,
    Printf,
}

impl Builtin {
    pub const ALL: [Builtin; 5] = [
        Builtin::ReadInt,
        Builtin::ReadFloat,
        Builtin::PrintlnInt,
        Builtin::PrintlnFloat,
        Builtin::Printf,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::ReadInt => "readInt",
            Builtin::ReadFloat => "readFloat",
            Builtin::PrintlnInt => "printlnInt",
            Builtin::PrintlnFloat => "printlnFloat",
            Builtin::Printf => "printf",
        }
    }

    /// The builtin's function type. `printf` is variadic and has none; its
    /// applications are typed by a dedicated rule.
    pub fn ty(self) -> Option<Ty> {
        match self {
            Builtin::ReadInt => Some(Ty::Lambda(vec![], Box::new(Ty::Int))),
            Builtin::ReadFloat => Some(Ty::Lambda(vec![], Box::new(Ty::Float))),
            Builtin::PrintlnInt => Some(Ty::Lambda(vec![Ty::Int], Box::new(Ty::Unit))),
            Builtin::PrintlnFloat => Some(Ty::Lambda(vec![Ty::Float], Box::new(Ty::Unit))),
            Builtin::Printf => None,
        }
    }
}

// ── Scope stack ──────────────────────────────────────────────────

/// Lexically nested scopes over an arena of symbols. Frames keep
/// insertion order; `find_sym` walks outward, `find_sym_here` consults
/// only the innermost frame.
#[derive(Debug)]
pub struct SymbolTable {
    pub arena: Arena<Symbol>,
    scopes: Vec<Vec<(SmolStr, SymbolId)>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            scopes: vec![Vec::new()],
        }
    }

    /// Push a scope frame.
    pub fn locate(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Pop the innermost scope frame.
    pub fn relocate(&mut self) {
        self.scopes.pop();
    }

    /// Number of live frames; frame indices run `0..depth()`.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn add_symbol(
        &mut self,
        name: SmolStr,
        mutable: bool,
        span: Span,
        dealias: Dealias,
    ) -> SymbolId {
        let id = self.arena.alloc(Symbol {
            name: name.clone(),
            mutable,
            span,
            dealias,
        });
        self.scopes
            .last_mut()
            .expect("scope stack never empty")
            .push((name, id));
        id
    }

    /// Bind an already-allocated symbol in the innermost frame. Used for
    /// constructor parameters, whose symbols are created during the
    /// group pre-declaration pass before the class scope exists.
    pub fn add_existing(&mut self, id: SymbolId) {
        let name = self.arena[id].name.clone();
        self.scopes
            .last_mut()
            .expect("scope stack never empty")
            .push((name, id));
    }

    /// Innermost binding for `name`, searching all frames outward.
    /// Returns the symbol and the index of the frame it was found in.
    pub fn find_sym(&self, name: &str) -> Option<(SymbolId, usize)> {
        for (depth, frame) in self.scopes.iter().enumerate().rev() {
            if let Some((_, id)) = frame.iter().rev().find(|(n, _)| n == name) {
                return Some((*id, depth));
            }
        }
        None
    }

    /// Lookup restricted to the innermost frame.
    pub fn find_sym_here(&self, name: &str) -> Option<SymbolId> {
        self.scopes
            .last()
            .and_then(|frame| frame.iter().rev().find(|(n, _)| n == name))
            .map(|(_, id)| *id)
    }

    pub fn sym(&self, id: SymbolId) -> &Symbol {
        &self.arena[id]
    }

    pub fn sym_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.arena[id]
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
