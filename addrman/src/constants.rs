//! Table geometry and policy thresholds.
//!
//! These are fixed at compile time: the anti-flooding properties of the tables depend on
//! the geometry, and changing it invalidates the new-bucket assignments of stored tables.
use addrman_common::time::LocalDuration;

/// Number of buckets in the "tried" table.
pub const TRIED_BUCKET_COUNT: usize = 64;
/// Maximum number of entries in a "tried" bucket.
pub const TRIED_BUCKET_SIZE: usize = 64;
/// Number of buckets in the "new" table.
pub const NEW_BUCKET_COUNT: usize = 256;
/// Maximum number of entries in a "new" bucket.
pub const NEW_BUCKET_SIZE: usize = 64;

/// Number of tried buckets a single address group can spread over.
pub const TRIED_BUCKETS_PER_GROUP: u64 = 4;
/// Number of new buckets the addresses announced by a single source group can spread over.
pub const NEW_BUCKETS_PER_SOURCE_GROUP: u64 = 32;
/// Maximum number of new buckets a single address can be in.
pub const NEW_BUCKETS_PER_ADDRESS: usize = 4;
/// Number of tried entries inspected when choosing one to evict.
pub const TRIED_ENTRIES_INSPECT_ON_EVICT: u32 = 4;
/// Number of new entries inspected when making room in a full new bucket.
pub const NEW_ENTRIES_INSPECT_ON_EVICT: u32 = 4;

/// How old addresses can be before they are considered terrible.
pub const HORIZON: LocalDuration = LocalDuration::from_days(30);
/// After how many failed attempts we give up on an address we never connected to.
pub const RETRIES: u32 = 3;
/// How many successive failures are allowed.
pub const MAX_FAILURES: u32 = 10;
/// ... within this period since the last success.
pub const MIN_FAIL: LocalDuration = LocalDuration::from_days(7);
/// Addresses attempted this recently are never terrible.
pub const TERRIBLE_GRACE: LocalDuration = LocalDuration::from_secs(60);
/// How far in the future an advertised time may be.
pub const MAX_FUTURE_DRIFT: LocalDuration = LocalDuration::from_mins(10);

/// Addresses attempted this recently have their chance of selection reduced.
pub const RECENT_ATTEMPT: LocalDuration = LocalDuration::from_mins(10);
/// Attempts beyond this count don't lower the chance of selection any further.
pub const MAX_CHANCE_ATTEMPTS: u32 = 8;

/// Addresses advertised with a time within this window are considered online.
pub const ONLINE_WINDOW: LocalDuration = LocalDuration::from_hours(24);
/// Minimum time between updates of the last-seen time of an online address.
pub const ONLINE_UPDATE_INTERVAL: LocalDuration = LocalDuration::from_hours(1);
/// Minimum time between updates of the last-seen time of any other address.
pub const UPDATE_INTERVAL: LocalDuration = LocalDuration::from_hours(24);
/// Minimum time between updates of a connected peer's timestamps.
pub const CONNECTED_UPDATE_INTERVAL: LocalDuration = LocalDuration::from_mins(20);

/// Percentage of the table returned by `get_addr`.
pub const GETADDR_MAX_PCT: usize = 23;
/// Maximum number of addresses returned by `get_addr`.
pub const GETADDR_MAX: usize = 2500;

/// Maximum number of candidates drawn by `select` before falling back to a scan.
pub const SELECT_MAX_TRIES: usize = 1024;
/// Growth of the acceptance factor after each rejected candidate.
pub const SELECT_FACTOR_STEP: f64 = 1.2;
