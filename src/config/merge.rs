//! Layer merging for TOML configuration
//!
//! - Tables: merged key by key, recursively
//! - Arrays: replaced wholesale by the higher layer
//! - Scalars: higher layer wins

use toml::Value;

/// Merge `overlay` on top of `base`.
pub fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Table(mut base_table), Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base_table.insert(key, merged);
            }
            Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Fold layers in precedence order (last wins).
pub fn merge_layers<I>(layers: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    layers
        .into_iter()
        .fold(Value::Table(toml::Table::new()), merge_values)
}
