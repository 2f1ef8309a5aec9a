//! Naming strategies applied once while a contract is built.

use std::fmt;
use std::sync::Arc;

/// Maps declared method and parameter names to their wire form.
///
/// Conversion runs exactly once, at contract build time; the stored contract
/// always carries wire names.
#[derive(Clone, Default)]
pub enum NamingConvention {
    /// Names pass through untouched.
    #[default]
    Identity,
    /// `snake_case` and `PascalCase` names become `camelCase`.
    CamelCase,
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl NamingConvention {
    pub fn apply(&self, name: &str) -> String {
        match self {
            NamingConvention::Identity => name.to_string(),
            NamingConvention::CamelCase => to_camel_case(name),
            NamingConvention::Custom(map) => map(name),
        }
    }
}

impl fmt::Debug for NamingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamingConvention::Identity => f.write_str("Identity"),
            NamingConvention::CamelCase => f.write_str("CamelCase"),
            NamingConvention::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for (index, ch) in name.chars().enumerate() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else if index == 0 {
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
