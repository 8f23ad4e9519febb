//! The built-in function table.
//!
//! Code generation and the VM agree on built-ins by position: index N in an
//! `OpGetBuiltin` operand addresses entry N of [`BUILTINS`]. New entries go
//! at the end.

mod collections;
mod io;

use ember_core::Builtin;

pub static BUILTINS: [Builtin; 6] = [
    Builtin {
        name: "len",
        func: collections::len,
    },
    Builtin {
        name: "puts",
        func: io::puts,
    },
    Builtin {
        name: "first",
        func: collections::first,
    },
    Builtin {
        name: "last",
        func: collections::last,
    },
    Builtin {
        name: "rest",
        func: collections::rest,
    },
    Builtin {
        name: "push",
        func: collections::push,
    },
];

/// The full table, in index order.
pub fn builtins() -> &'static [Builtin] {
    &BUILTINS
}

/// Find a built-in by name, returning its table index.
pub fn lookup(name: &str) -> Option<(usize, &'static Builtin)> {
    BUILTINS.iter().enumerate().find(|(_, b)| b.name == name)
}
