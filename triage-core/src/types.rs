use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-assigned status. Only `opportunity` carries meaning for triage;
/// anything the server invents later is kept as `Other`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionStatus {
    Opportunity,
    #[default]
    Neutral,
    #[serde(other)]
    Other,
}

/// One tracked post subject to triage. Created by the upstream fetch and
/// read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    /// Prefixed form as sent by the server, e.g. `r/SaaS`.
    pub subreddit: String,
    pub sentiment: Sentiment,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub status: MentionStatus,
    #[serde(default)]
    pub upvotes: i64,
    #[serde(default)]
    pub comments: u32,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "timeAgo", default)]
    pub time_ago: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub url: String,
}

impl Mention {
    pub fn is_opportunity(&self) -> bool {
        self.status == MentionStatus::Opportunity
    }
}

/// Payload of `GET /dashboard-data` and `GET /recent-mentions`. The id and
/// name arrays are only present on the dashboard endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardData {
    #[serde(default)]
    pub posts: Vec<Mention>,
    #[serde(default)]
    pub average_sentiment: f64,
    #[serde(default)]
    pub flagged_ids: Option<Vec<String>>,
    #[serde(default)]
    pub ignored_ids: Option<Vec<String>>,
    #[serde(default)]
    pub engaged_ids: Option<Vec<String>>,
    #[serde(default)]
    pub monitored_subreddits: Option<Vec<String>>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    /// The dashboard endpoint reports internal failures in-band.
    #[serde(default)]
    pub error: Option<String>,
}

/// The three locally toggled triage sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageSet {
    Flagged,
    Ignored,
    Engaged,
}

/// Every server-backed string set the engine mirrors locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetKey {
    Triage(TriageSet),
    MonitoredSubreddits,
    Keywords,
}

impl SetKey {
    pub const FLAGGED: SetKey = SetKey::Triage(TriageSet::Flagged);
    pub const IGNORED: SetKey = SetKey::Triage(TriageSet::Ignored);
    pub const ENGAGED: SetKey = SetKey::Triage(TriageSet::Engaged);

    pub fn name(&self) -> &'static str {
        match self {
            SetKey::Triage(TriageSet::Flagged) => "flagged",
            SetKey::Triage(TriageSet::Ignored) => "ignored",
            SetKey::Triage(TriageSet::Engaged) => "engaged",
            SetKey::MonitoredSubreddits => "monitored_subreddits",
            SetKey::Keywords => "keywords",
        }
    }
}

impl From<TriageSet> for SetKey {
    fn from(set: TriageSet) -> Self {
        SetKey::Triage(set)
    }
}

impl fmt::Display for SetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipChange {
    Add,
    Remove,
}

/// A single membership change against one server-backed set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mutation {
    pub target: SetKey,
    pub change: MembershipChange,
    pub value: String,
}

impl Mutation {
    pub fn new(target: impl Into<SetKey>, change: MembershipChange, value: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            change,
            value: value.into(),
        }
    }

    /// Short action name used in logs and user notices, e.g. `flag` or
    /// `remove_keyword`.
    pub fn operation(&self) -> &'static str {
        use MembershipChange::{Add, Remove};
        match (self.target, self.change) {
            (SetKey::Triage(TriageSet::Flagged), Add) => "flag",
            (SetKey::Triage(TriageSet::Flagged), Remove) => "unflag",
            (SetKey::Triage(TriageSet::Ignored), Add) => "ignore",
            (SetKey::Triage(TriageSet::Ignored), Remove) => "unignore",
            (SetKey::Triage(TriageSet::Engaged), Add) => "engage",
            (SetKey::Triage(TriageSet::Engaged), Remove) => "unengage",
            (SetKey::MonitoredSubreddits, Add) => "add_subreddit",
            (SetKey::MonitoredSubreddits, Remove) => "remove_subreddit",
            (SetKey::Keywords, Add) => "add_keyword",
            (SetKey::Keywords, Remove) => "remove_keyword",
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation(), self.value)
    }
}

/// Strips a leading `r/` (any case) and surrounding whitespace.
pub fn bare_subreddit_name(name: &str) -> &str {
    let trimmed = name.trim();
    match trimmed.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("r/") => &trimmed[2..],
        _ => trimmed,
    }
}

/// `SaaS`, `r/SaaS` and `R/SaaS` all become `r/SaaS`.
pub fn prefixed_subreddit_name(name: &str) -> String {
    format!("r/{}", bare_subreddit_name(name))
}
