//! Client-side synchronization and triage filtering for the mention
//! dashboard.
//!
//! [`TriageDashboard`] is the entry point. It keeps a cache of what the
//! server last sent, applies triage changes optimistically and derives the
//! filtered, paginated view a renderer draws.

pub mod cache;
pub mod coordinator;
pub mod filter;
pub mod mutation;
pub mod pagination;

pub use cache::{
    CacheEntry, EntityCache, FetchToken, MemberSet, Membership, MentionFeed, ResourceKey,
    StalenessPolicy,
};
pub use coordinator::{
    DashboardStats, DashboardView, MentionRow, Message, SubredditSummary, TriageDashboard,
};
pub use filter::{
    apply_filters, FilterSelection, SentimentFilter, SubredditFilter, TriageFlags, TriageSets,
    TriageToggle, TriageToggles,
};
pub use mutation::{MutationExecutor, MutationOutcome, MutationTicket};
pub use pagination::Pagination;
