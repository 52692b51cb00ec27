//! Symbols and interned definition ids.

use std::fmt;

/// Unique reserved for the handler-list symbol threaded through lowered code.
/// It is rebound by every continuation-passing lambda and is the only unique
/// allowed to repeat.
pub const HANDLERS_UNIQUE: u32 = u32::MAX;

/// A binding: a user-facing name plus a per-definition unique.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    pub name: String,
    pub unique: u32,
}

impl Symbol {
    pub fn new(name: impl Into<String>, unique: u32) -> Self {
        Symbol {
            name: name.into(),
            unique,
        }
    }

    /// The reserved handler-list symbol.
    pub fn handlers() -> Self {
        Symbol::new("handlers", HANDLERS_UNIQUE)
    }

    #[inline]
    pub fn is_reserved(&self) -> bool {
        self.unique == HANDLERS_UNIQUE
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_reserved() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}#{}", self.name, self.unique)
        }
    }
}

macro_rules! def_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

def_id!(
    /// Interned handle of a declared effect. Runtime handler tags compare these,
    /// never names or hashes.
    EffectId,
    "eff"
);
def_id!(
    /// Interned handle of a declared record type.
    TypeId,
    "type"
);
def_id!(
    /// Interned handle of a toplevel definition.
    TermId,
    "term"
);
