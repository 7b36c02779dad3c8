#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use triage_core::{
    CoreError, DashboardApiError, DashboardData, Mention, MentionStatus, Mutation, Sentiment,
    TriageApi,
};

/// Scripted stand-in for the dashboard server.
#[derive(Default)]
pub struct MockApi {
    dashboard: Mutex<DashboardData>,
    flagged: Mutex<Vec<String>>,
    subreddits: Mutex<Vec<String>>,
    keywords: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    failing_values: Mutex<HashSet<String>>,
    fail_fetches: AtomicBool,
    hold_mutations: AtomicBool,
    hold_fetches: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

impl MockApi {
    pub fn new(dashboard: DashboardData) -> Self {
        Self {
            dashboard: Mutex::new(dashboard),
            ..Self::default()
        }
    }

    pub fn set_dashboard(&self, dashboard: DashboardData) {
        *self.dashboard.lock().unwrap() = dashboard;
    }

    pub fn set_flagged(&self, ids: &[&str]) {
        *self.flagged.lock().unwrap() = strings(ids);
    }

    pub fn set_subreddits(&self, names: &[&str]) {
        *self.subreddits.lock().unwrap() = strings(names);
    }

    pub fn set_keywords(&self, keywords: &[&str]) {
        *self.keywords.lock().unwrap() = strings(keywords);
    }

    /// Every mutation on `value` is answered with a server error.
    pub fn fail_mutations_on(&self, value: &str) {
        self.failing_values.lock().unwrap().insert(value.to_string());
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Mutations signal `entered` and then wait for `release`.
    pub fn hold_mutations(&self, hold: bool) {
        self.hold_mutations.store(hold, Ordering::SeqCst);
    }

    /// Same as [`MockApi::hold_mutations`] for every fetch.
    pub fn hold_fetches(&self, hold: bool) {
        self.hold_fetches.store(hold, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutation_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| !call.starts_with("GET "))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn fetch_gate(&self, endpoint: &str) -> Result<(), CoreError> {
        self.record(format!("GET {}", endpoint));
        if self.hold_fetches.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(CoreError::DashboardApi(DashboardApiError::ServerError {
                status_code: 502,
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl TriageApi for MockApi {
    async fn fetch_dashboard(&self) -> Result<DashboardData, CoreError> {
        self.fetch_gate("/dashboard-data").await?;
        Ok(self.dashboard.lock().unwrap().clone())
    }

    async fn fetch_recent_mentions(&self) -> Result<DashboardData, CoreError> {
        self.fetch_gate("/recent-mentions").await?;
        let dashboard = self.dashboard.lock().unwrap();
        Ok(DashboardData {
            posts: dashboard.posts.clone(),
            average_sentiment: dashboard.average_sentiment,
            ..DashboardData::default()
        })
    }

    async fn fetch_flagged(&self) -> Result<Vec<String>, CoreError> {
        self.fetch_gate("/flagged").await?;
        Ok(self.flagged.lock().unwrap().clone())
    }

    async fn fetch_monitored_subreddits(&self) -> Result<Vec<String>, CoreError> {
        self.fetch_gate("/monitored-subreddits").await?;
        Ok(self.subreddits.lock().unwrap().clone())
    }

    async fn fetch_keywords(&self) -> Result<Vec<String>, CoreError> {
        self.fetch_gate("/keywords").await?;
        Ok(self.keywords.lock().unwrap().clone())
    }

    async fn apply_mutation(&self, mutation: &Mutation) -> Result<(), CoreError> {
        self.record(mutation.to_string());
        if self.hold_mutations.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.failing_values.lock().unwrap().contains(&mutation.value) {
            return Err(CoreError::DashboardApi(DashboardApiError::ServerError {
                status_code: 500,
            }));
        }
        Ok(())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn mention(id: &str, subreddit: &str, sentiment: Sentiment) -> Mention {
    Mention {
        id: id.to_string(),
        title: format!("Looking for a payment provider ({})", id),
        author: "founder".to_string(),
        subreddit: subreddit.to_string(),
        sentiment,
        score: 0.0,
        status: MentionStatus::Neutral,
        upvotes: 1,
        comments: 0,
        created_at: None,
        time_ago: Some("Just now".to_string()),
        keywords: vec!["payment".to_string()],
        url: format!("https://reddit.com/{}/comments/{}", subreddit, id),
    }
}

/// 30 mentions from r/technology and 30 from r/startups, alternating.
pub fn sixty_mentions() -> Vec<Mention> {
    (0..60)
        .map(|i| {
            let subreddit = if i % 2 == 0 { "r/technology" } else { "r/startups" };
            let sentiment = if i % 3 == 0 {
                Sentiment::Negative
            } else {
                Sentiment::Positive
            };
            mention(&format!("m{:02}", i), subreddit, sentiment)
        })
        .collect()
}

/// Shaped like the server's `/dashboard-data` answer, which never carries
/// ignored or engaged ids.
pub fn dashboard(posts: Vec<Mention>) -> DashboardData {
    DashboardData {
        posts,
        average_sentiment: 0.25,
        flagged_ids: Some(Vec::new()),
        ignored_ids: None,
        engaged_ids: None,
        monitored_subreddits: Some(strings(&["technology", "startups"])),
        keywords: Some(strings(&["payment"])),
        error: None,
    }
}
