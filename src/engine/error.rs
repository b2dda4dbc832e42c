use ulid::Ulid;

use crate::model::Booking;

#[derive(Debug)]
pub enum EngineError {
    /// Missing or malformed request fields. Carries the field names.
    Validation(Vec<&'static str>),
    NotFound(Ulid),
    /// The field exists but was soft-deleted. Reported as NotFound at the
    /// HTTP boundary.
    Inactive(Ulid),
    AlreadyExists(Ulid),
    /// The requested slot overlaps existing confirmed bookings.
    Conflict(Vec<Booking>),
    /// Acting user is neither the booker nor privileged.
    Forbidden,
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(fields) => {
                write!(f, "invalid request: {}", fields.join(", "))
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Inactive(id) => write!(f, "field inactive: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(bookings) => {
                write!(f, "slot conflicts with {} existing booking(s)", bookings.len())
            }
            EngineError::Forbidden => write!(f, "operation not permitted"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
