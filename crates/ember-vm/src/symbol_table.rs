//! Lexical name resolution.
//!
//! Every function body gets its own [`SymbolTable`]; tables live in a
//! [`SymbolTables`] arena and point at their enclosing table by [`ScopeId`].
//! Resolving a name that belongs to an enclosing function (a local, a free
//! variable, or the function's own name) re-binds it as `Free` in every
//! table on the way back down, so each nested closure captures it once.

use hashbrown::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    /// A function's own name inside its body.
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// Index of a table in its [`SymbolTables`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

impl ScopeId {
    /// The top-level table, where definitions are globals.
    pub const ROOT: ScopeId = ScopeId(0);
}

#[derive(Debug, Default)]
struct SymbolTable {
    outer: Option<ScopeId>,
    store: HashMap<String, Symbol>,
    num_definitions: usize,
    /// The captured originals, in first-resolved order.
    free_symbols: Vec<Symbol>,
}

/// Arena of symbol tables, one per function body plus the root.
#[derive(Debug)]
pub struct SymbolTables {
    tables: Vec<SymbolTable>,
}

impl SymbolTables {
    pub fn new() -> Self {
        SymbolTables {
            tables: vec![SymbolTable::default()],
        }
    }

    /// Open a table nested inside `outer`.
    pub fn enclose(&mut self, outer: ScopeId) -> ScopeId {
        let id = ScopeId(self.tables.len());
        self.tables.push(SymbolTable {
            outer: Some(outer),
            ..SymbolTable::default()
        });
        id
    }

    pub fn outer(&self, scope: ScopeId) -> Option<ScopeId> {
        self.tables[scope.0].outer
    }

    /// Bind `name` to the next slot: a global at the root, a local elsewhere.
    /// Redefining a name in the same table replaces the old binding.
    pub fn define(&mut self, scope: ScopeId, name: &str) -> Symbol {
        let table = &mut self.tables[scope.0];
        let symbol = Symbol {
            name: name.to_string(),
            scope: if table.outer.is_none() {
                SymbolScope::Global
            } else {
                SymbolScope::Local
            },
            index: table.num_definitions,
        };
        table.num_definitions += 1;
        table.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Bind a built-in at its fixed table index. Does not consume a slot.
    pub fn define_builtin(&mut self, scope: ScopeId, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
        };
        self.tables[scope.0]
            .store
            .insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Bind the enclosing function's own name so its body can call itself.
    pub fn define_function_name(&mut self, scope: ScopeId, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Function,
            index: 0,
        };
        self.tables[scope.0]
            .store
            .insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Look `name` up from `scope` outwards. `None` means the name is undefined.
    pub fn resolve(&mut self, scope: ScopeId, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.tables[scope.0].store.get(name) {
            return Some(symbol.clone());
        }
        let outer = self.tables[scope.0].outer?;
        let symbol = self.resolve(outer, name)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            SymbolScope::Local | SymbolScope::Free | SymbolScope::Function => {
                Some(self.define_free(scope, symbol))
            }
        }
    }

    fn define_free(&mut self, scope: ScopeId, original: Symbol) -> Symbol {
        let table = &mut self.tables[scope.0];
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: table.free_symbols.len(),
        };
        table.free_symbols.push(original);
        table.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// The symbols `scope` captured, as seen from its enclosing table.
    pub fn free_symbols(&self, scope: ScopeId) -> &[Symbol] {
        &self.tables[scope.0].free_symbols
    }

    pub fn num_definitions(&self, scope: ScopeId) -> usize {
        self.tables[scope.0].num_definitions
    }
}

impl Default for SymbolTables {
    fn default() -> Self {
        Self::new()
    }
}
