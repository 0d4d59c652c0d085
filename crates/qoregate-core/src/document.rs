// SPDX-License-Identifier: Apache-2.0

//! Command document helpers.
//!
//! Command documents are key-ordered and the first key names the command,
//! e.g. `{ find: "orders", filter: {...} }`.

use std::collections::HashSet;

use mongodb::bson::{Bson, Document};

/// Returns the command name (first key) of a command document.
pub fn command_name(command: &Document) -> Option<&str> {
    command.keys().next().map(String::as_str)
}

/// Loose truthiness of a BSON value, matching how drivers read flag-style
/// command values such as `{ ping: 1 }` or `{ ismaster: true }`.
pub fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(v) => *v != 0,
        Bson::Int64(v) => *v != 0,
        Bson::Double(v) => *v != 0.0 && !v.is_nan(),
        Bson::String(s) => !s.is_empty(),
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

/// True when the command's first key is in `names` and its value is truthy.
pub fn first_key_in(command: &Document, names: &HashSet<String>) -> bool {
    let Some((key, value)) = command.iter().next() else {
        return false;
    };

    names.contains(key) && is_truthy(value)
}
