/// JSON (de)serialization surface shared by persistence models.
///
/// The blanket implementation lives next to the persistence error type so
/// every `Persisted*` model gains `to_json_string`/`from_json_str` without
/// repeating the serde plumbing.
pub trait JsonSerializable<E>: Sized {
    fn to_json_string(&self) -> Result<String, E>;
    fn from_json_str(s: &str) -> Result<Self, E>;
}
