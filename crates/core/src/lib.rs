pub mod acl;
pub mod error;
pub mod group;
pub mod ids;
pub mod key;
pub mod pagination;
pub mod quota;

pub use acl::EffectivePolicy;
pub use error::PaygateError;
pub use group::Group;
pub use ids::{generate_id, mask_identifier};
pub use key::{Key, KeyStatus};
pub use pagination::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT, clamp_limit, clamp_offset};
pub use quota::{QuotaAxis, QuotaCounters, QuotaPolicy, civil_window_boundaries};

/// Internal unit of account. One tool call consumes an integer number of credits.
pub type Credit = u64;
