use std::fmt;

// === SnapshotError ===

/// Errors raised while fetching the initial bookmark snapshot.
#[derive(Debug)]
pub enum SnapshotError {
    /// The request could not be sent or timed out.
    Http(String),
    /// The backend answered with a non-success status.
    Status(u16, String),
    /// The response body did not decode into bookmark records.
    Decode(String),
    /// Local database operation failed.
    Database(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Http(msg) => write!(f, "Snapshot request failed: {}", msg),
            SnapshotError::Status(code, body) => {
                write!(f, "Snapshot request returned status {}: {}", code, body)
            }
            SnapshotError::Decode(msg) => write!(f, "Snapshot decode error: {}", msg),
            SnapshotError::Database(msg) => write!(f, "Snapshot database error: {}", msg),
        }
    }
}

impl std::error::Error for SnapshotError {}

// === FeedError ===

/// Errors related to the change feed subscription lifecycle.
#[derive(Debug)]
pub enum FeedError {
    /// The transport refused or failed to open the channel.
    SubscribeFailed(String),
    /// The session already has a live subscription.
    AlreadyAttached(String),
    /// The subscription was closed.
    Closed(String),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::SubscribeFailed(msg) => write!(f, "Feed subscribe failed: {}", msg),
            FeedError::AlreadyAttached(channel) => {
                write!(f, "Feed already attached: {}", channel)
            }
            FeedError::Closed(channel) => write!(f, "Feed closed: {}", channel),
        }
    }
}

impl std::error::Error for FeedError {}

// === EventError ===

/// A single feed payload that could not be turned into an event.
#[derive(Debug, PartialEq, Eq)]
pub enum EventError {
    /// The payload is not a JSON object.
    NotAnObject,
    /// A required field is absent or null.
    MissingField(String),
    /// A field is present but has the wrong shape.
    InvalidField(String),
    /// The event type is neither INSERT nor DELETE.
    UnsupportedEventType(String),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::NotAnObject => write!(f, "Feed payload is not an object"),
            EventError::MissingField(field) => write!(f, "Feed payload missing field: {}", field),
            EventError::InvalidField(msg) => write!(f, "Feed payload invalid field: {}", msg),
            EventError::UnsupportedEventType(kind) => {
                write!(f, "Unsupported feed event type: {}", kind)
            }
        }
    }
}

impl std::error::Error for EventError {}

// === SubmitError ===

/// Errors from the bookmark creation and deletion flow.
///
/// Display strings are shown to the user as-is.
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// The submitted form input is invalid.
    Validation(String),
    /// The action requires a signed-in user.
    Unauthenticated(String),
    /// The backing store rejected the operation.
    Backend(String),
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Validation(msg) => write!(f, "{}", msg),
            SubmitError::Unauthenticated(msg) => write!(f, "{}", msg),
            SubmitError::Backend(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for SubmitError {}

// === SettingsError ===

/// Errors related to settings management.
#[derive(Debug)]
pub enum SettingsError {
    /// An I/O error occurred while reading or writing settings.
    IoError(String),
    /// Failed to serialize or deserialize settings.
    SerializationError(String),
    /// The provided settings key is invalid.
    InvalidKey(String),
    /// The provided settings value is invalid.
    InvalidValue(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::IoError(msg) => write!(f, "Settings I/O error: {}", msg),
            SettingsError::SerializationError(msg) => {
                write!(f, "Settings serialization error: {}", msg)
            }
            SettingsError::InvalidKey(key) => write!(f, "Invalid settings key: {}", key),
            SettingsError::InvalidValue(msg) => {
                write!(f, "Invalid settings value: {}", msg)
            }
        }
    }
}

impl std::error::Error for SettingsError {}
