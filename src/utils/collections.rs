use rustc_hash::FxHashMap;
use serde_json::Value;

/// Construct an empty update map with the hasher the engine uses
/// everywhere.
pub fn new_update_map() -> FxHashMap<String, Value> {
    FxHashMap::default()
}
