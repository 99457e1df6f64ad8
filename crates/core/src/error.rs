/// A value that does not form a valid domain object: a malformed id or
/// blob key, or a status id with no matching variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown {kind} id {id}")]
    UnknownStatus { kind: &'static str, id: i16 },
}
