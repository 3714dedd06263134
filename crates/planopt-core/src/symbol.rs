//! # Symbols and Types
//!
//! A [`Symbol`] is a named logical column. Symbols are unique within a plan and are
//! the join key between operator outputs, scalar expressions and statistics. The
//! [`TypeProvider`] is the symbol → type mapping produced by the (external) analyzer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Symbol(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

impl From<String> for Symbol {
    fn from(name: String) -> Self {
        Symbol(name)
    }
}

/// SQL types known to the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Bigint,
    Double,
    Varchar,
    /// Days since 1970-01-01.
    Date,
}

impl DataType {
    /// Width of a value in bytes, `None` for variable-width types.
    pub fn fixed_width(&self) -> Option<f64> {
        match self {
            DataType::Boolean => Some(1.0),
            DataType::Bigint | DataType::Double => Some(8.0),
            DataType::Date => Some(4.0),
            DataType::Varchar => None,
        }
    }
}

/// Symbol → type mapping for one plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeProvider {
    types: HashMap<Symbol, DataType>,
}

impl TypeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, symbol: impl Into<Symbol>, data_type: DataType) -> Self {
        self.types.insert(symbol.into(), data_type);
        self
    }

    pub fn insert(&mut self, symbol: Symbol, data_type: DataType) {
        self.types.insert(symbol, data_type);
    }

    pub fn get(&self, symbol: &Symbol) -> Option<DataType> {
        self.types.get(symbol).copied()
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.types.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<(Symbol, DataType)> for TypeProvider {
    fn from_iter<I: IntoIterator<Item = (Symbol, DataType)>>(iter: I) -> Self {
        Self {
            types: iter.into_iter().collect(),
        }
    }
}
