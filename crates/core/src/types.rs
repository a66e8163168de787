/// Server-issued prompt identifier for a submitted job.
pub type JobId = String;

/// A sampler seed. Random seeds are drawn from the 32-bit range, explicit
/// seeds may use the full width the server accepts.
pub type Seed = u64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
