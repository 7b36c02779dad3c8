use crate::{CoreError, DashboardData, Mutation};
use async_trait::async_trait;

/// The server the engine synchronizes with. The HTTP implementation lives in
/// `dashboard-client`; tests substitute scripted doubles.
#[async_trait]
pub trait TriageApi: Send + Sync {
    /// `GET /dashboard-data`: mentions plus triage ids, subreddits, keywords.
    async fn fetch_dashboard(&self) -> Result<DashboardData, CoreError>;

    /// `GET /recent-mentions`: mentions and the average sentiment only.
    async fn fetch_recent_mentions(&self) -> Result<DashboardData, CoreError>;

    async fn fetch_flagged(&self) -> Result<Vec<String>, CoreError>;

    async fn fetch_monitored_subreddits(&self) -> Result<Vec<String>, CoreError>;

    async fn fetch_keywords(&self) -> Result<Vec<String>, CoreError>;

    /// Applies one membership change upstream. `Ok` means the server
    /// confirmed it; any error means the caller must roll back.
    async fn apply_mutation(&self, mutation: &Mutation) -> Result<(), CoreError>;
}
