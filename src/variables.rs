//! SET symbols and macro parameter data.

use crate::expression::{SetType, SetValue};
use crate::ids::IdIndex;

/// A SETA/SETB/SETC variable, scalar or one-dimensional array.
///
/// Arrays are logically sparse: setting index *i* materializes defaults for
/// the indices below it, and reads past the end return the type default
/// without error.
#[derive(Clone, Debug)]
pub struct SetSymbol {
    pub name: IdIndex,
    pub set_type: SetType,
    pub scalar: bool,
    data: Vec<SetValue>,
}

impl SetSymbol {
    pub fn new(name: IdIndex, set_type: SetType, scalar: bool) -> SetSymbol {
        SetSymbol {
            name,
            set_type,
            scalar,
            data: Vec::new(),
        }
    }

    /// Reads the scalar value or the 1-based array element.
    pub fn get(&self, index: Option<usize>) -> SetValue {
        let slot = match index {
            None => 0,
            Some(0) => return SetValue::default_of(self.set_type),
            Some(i) => i - 1,
        };
        self.data
            .get(slot)
            .cloned()
            .unwrap_or_else(|| SetValue::default_of(self.set_type))
    }

    /// Writes the scalar value or the 1-based array element, extending the
    /// array with defaults as needed. The value must already have this
    /// symbol's type; the caller coerces and diagnoses mismatches.
    pub fn set(&mut self, index: Option<usize>, value: SetValue) {
        debug_assert!(value.type_of() == self.set_type);
        let slot = match index {
            None => 0,
            Some(0) => return,
            Some(i) => i - 1,
        };
        if self.data.len() <= slot {
            self.data
                .resize(slot + 1, SetValue::default_of(self.set_type));
        }
        self.data[slot] = value;
    }

    /// `K'`: number of characters of the (rendered) value.
    pub fn count(&self, index: Option<usize>) -> i32 {
        self.get(index).to_c().chars().count() as i32
    }

    /// `N'`: highest subscript assigned so far; zero for scalars.
    pub fn number(&self) -> i32 {
        if self.scalar {
            0
        } else {
            self.data.len() as i32
        }
    }
}

/// Macro argument data: a leaf string or a parenthesized sublist tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MacroParamData {
    Single(String),
    Composite(Vec<MacroParamData>),
}

impl MacroParamData {
    pub fn empty() -> MacroParamData {
        MacroParamData::Single(String::new())
    }

    /// Zero-based child access; a leaf behaves as a one-element list.
    pub fn get_ith(&self, index: usize) -> Option<&MacroParamData> {
        match self {
            MacroParamData::Single(_) => {
                if index == 0 {
                    Some(self)
                } else {
                    None
                }
            }
            MacroParamData::Composite(items) => items.get(index),
        }
    }

    /// Walks nested 1-based subscripts; out-of-range yields `None`.
    pub fn get_nested(&self, subscripts: &[usize]) -> Option<&MacroParamData> {
        let mut data = self;
        for &sub in subscripts {
            if sub == 0 {
                return None;
            }
            data = data.get_ith(sub - 1)?;
        }
        Some(data)
    }

    pub fn value(&self) -> String {
        match self {
            MacroParamData::Single(text) => text.clone(),
            MacroParamData::Composite(items) => {
                let rendered: Vec<String> = items.iter().map(MacroParamData::value).collect();
                format!("({})", rendered.join(","))
            }
        }
    }

    /// `N'`: sublist element count; one for a non-empty leaf, zero for an
    /// omitted argument.
    pub fn number(&self) -> i32 {
        match self {
            MacroParamData::Single(text) => {
                if text.is_empty() {
                    0
                } else {
                    1
                }
            }
            MacroParamData::Composite(items) => items.len() as i32,
        }
    }
}
