//! Last known server state, one entry per resource key.
//!
//! Entries are never evicted: a stale or invalidated entry keeps being served
//! until a newer fetch replaces it. Writes are crate-private; the coordinator
//! is the only writer, through fetch completion, optimistic mutation and
//! rollback.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::debug;
use triage_core::{CacheConfig, Mention, SetKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Mentions,
    Members(SetKey),
}

impl From<SetKey> for ResourceKey {
    fn from(key: SetKey) -> Self {
        ResourceKey::Members(key)
    }
}

impl ResourceKey {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceKey::Mentions => "mentions",
            ResourceKey::Members(key) => key.name(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MentionFeed {
    pub mentions: Vec<Mention>,
    pub average_sentiment: f64,
}

/// Where a value sat in a [`MemberSet`] before a change, so the change can be
/// undone exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Absent,
    Present { index: usize },
}

impl Membership {
    pub fn is_present(&self) -> bool {
        matches!(self, Membership::Present { .. })
    }
}

/// Insertion-ordered set of strings (ids, subreddit names, keywords).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberSet {
    values: Vec<String>,
}

impl MemberSet {
    pub const fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Keeps the first occurrence of duplicated values.
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for value in values {
            set.insert(value.into());
        }
        set
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    pub fn membership(&self, value: &str) -> Membership {
        match self.values.iter().position(|v| v == value) {
            Some(index) => Membership::Present { index },
            None => Membership::Absent,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.values
    }

    pub fn lookup(&self) -> HashSet<&str> {
        self.iter().collect()
    }

    pub(crate) fn insert(&mut self, value: String) -> bool {
        if self.contains(&value) {
            return false;
        }
        self.values.push(value);
        true
    }

    pub(crate) fn remove(&mut self, value: &str) -> bool {
        let before = self.values.len();
        self.values.retain(|v| v != value);
        self.values.len() != before
    }

    /// Puts `value` back exactly where `membership` says it was.
    pub(crate) fn restore(&mut self, value: &str, membership: Membership) {
        self.remove(value);
        if let Membership::Present { index } = membership {
            let index = index.min(self.values.len());
            self.values.insert(index, value.to_string());
        }
    }
}

static EMPTY_SET: MemberSet = MemberSet::new();

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    value: T,
    fetched_at: Instant,
    stale_after: Duration,
    invalidated: bool,
    /// Created by an optimistic write, never filled by the server.
    placeholder: bool,
}

impl<T> CacheEntry<T> {
    fn fresh(value: T, stale_after: Duration) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            stale_after,
            invalidated: false,
            placeholder: false,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub fn is_stale_at(&self, now: Instant) -> bool {
        self.invalidated || now.saturating_duration_since(self.fetched_at) > self.stale_after
    }
}

/// Staleness threshold per resource key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessPolicy {
    pub mentions: Duration,
    pub flagged: Duration,
    pub ignored: Duration,
    pub engaged: Duration,
    pub monitored_subreddits: Duration,
    pub keywords: Duration,
}

impl StalenessPolicy {
    pub fn threshold(&self, key: ResourceKey) -> Duration {
        match key {
            ResourceKey::Mentions => self.mentions,
            ResourceKey::Members(SetKey::Triage(triage_core::TriageSet::Flagged)) => self.flagged,
            ResourceKey::Members(SetKey::Triage(triage_core::TriageSet::Ignored)) => self.ignored,
            ResourceKey::Members(SetKey::Triage(triage_core::TriageSet::Engaged)) => self.engaged,
            ResourceKey::Members(SetKey::MonitoredSubreddits) => self.monitored_subreddits,
            ResourceKey::Members(SetKey::Keywords) => self.keywords,
        }
    }
}

impl From<&CacheConfig> for StalenessPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            mentions: Duration::from_secs(config.mentions_stale_secs),
            flagged: Duration::from_secs(config.flagged_stale_secs),
            ignored: Duration::from_secs(config.ignored_stale_secs),
            engaged: Duration::from_secs(config.engaged_stale_secs),
            monitored_subreddits: Duration::from_secs(config.subreddits_stale_secs),
            keywords: Duration::from_secs(config.keywords_stale_secs),
        }
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

/// Issued by [`EntityCache::begin_fetch`]; a completion carrying it is only
/// written if nothing newer reached the key in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchToken {
    key: ResourceKey,
    generation: u64,
}

impl FetchToken {
    pub fn key(&self) -> ResourceKey {
        self.key
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Generations {
    issued: u64,
    applied: u64,
}

#[derive(Debug)]
pub struct EntityCache {
    policy: StalenessPolicy,
    mentions: Option<CacheEntry<MentionFeed>>,
    members: HashMap<SetKey, CacheEntry<MemberSet>>,
    generations: HashMap<ResourceKey, Generations>,
}

impl EntityCache {
    pub fn new(policy: StalenessPolicy) -> Self {
        Self {
            policy,
            mentions: None,
            members: HashMap::new(),
            generations: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    pub fn mentions(&self) -> Option<&CacheEntry<MentionFeed>> {
        self.mentions.as_ref()
    }

    pub fn members(&self, key: SetKey) -> Option<&CacheEntry<MemberSet>> {
        self.members.get(&key)
    }

    /// The cached set, or an empty one if the key was never fetched.
    pub fn member_set(&self, key: SetKey) -> &MemberSet {
        self.members.get(&key).map_or(&EMPTY_SET, CacheEntry::value)
    }

    pub fn contains(&self, key: ResourceKey) -> bool {
        match key {
            ResourceKey::Mentions => self.mentions.is_some(),
            ResourceKey::Members(set) => self.members.contains_key(&set),
        }
    }

    pub fn is_stale(&self, key: ResourceKey) -> bool {
        self.is_stale_at(key, Instant::now())
    }

    /// Absent keys are always stale.
    pub fn is_stale_at(&self, key: ResourceKey, now: Instant) -> bool {
        match key {
            ResourceKey::Mentions => self.mentions.as_ref().map_or(true, |e| e.is_stale_at(now)),
            ResourceKey::Members(set) => {
                self.members.get(&set).map_or(true, |e| e.is_stale_at(now))
            }
        }
    }

    /// The value stays readable; only the next freshness check changes.
    pub fn invalidate(&mut self, key: ResourceKey) {
        debug!("Invalidating cache key {}", key.name());
        match key {
            ResourceKey::Mentions => {
                if let Some(entry) = self.mentions.as_mut() {
                    entry.invalidated = true;
                }
            }
            ResourceKey::Members(set) => {
                if let Some(entry) = self.members.get_mut(&set) {
                    entry.invalidated = true;
                }
            }
        }
    }

    pub fn begin_fetch(&mut self, key: ResourceKey) -> FetchToken {
        let generations = self.generations.entry(key).or_default();
        generations.issued += 1;
        FetchToken {
            key,
            generation: generations.issued,
        }
    }

    /// Marks every fetch issued so far for `key` as outdated.
    pub(crate) fn supersede_fetches(&mut self, key: ResourceKey) {
        let generations = self.generations.entry(key).or_default();
        generations.issued += 1;
        generations.applied = generations.issued;
    }

    fn accept(&mut self, token: FetchToken) -> bool {
        let generations = self.generations.entry(token.key).or_default();
        if token.generation <= generations.applied {
            debug!(
                "Discarding superseded {} fetch (generation {} <= {})",
                token.key.name(),
                token.generation,
                generations.applied
            );
            return false;
        }
        generations.applied = token.generation;
        true
    }

    pub(crate) fn put_mentions(&mut self, feed: MentionFeed) {
        self.mentions = Some(CacheEntry::fresh(feed, self.policy.mentions));
    }

    pub(crate) fn put_members(&mut self, key: SetKey, set: MemberSet) {
        let stale_after = self.policy.threshold(ResourceKey::Members(key));
        self.members.insert(key, CacheEntry::fresh(set, stale_after));
    }

    pub(crate) fn complete_mentions(&mut self, token: FetchToken, feed: MentionFeed) -> bool {
        debug_assert_eq!(token.key, ResourceKey::Mentions);
        if !self.accept(token) {
            return false;
        }
        self.put_mentions(feed);
        true
    }

    pub(crate) fn complete_members(&mut self, token: FetchToken, set: MemberSet) -> bool {
        let ResourceKey::Members(key) = token.key else {
            return false;
        };
        if !self.accept(token) {
            return false;
        }
        self.put_members(key, set);
        true
    }

    /// Mutable access for optimistic writes. A key that was never fetched
    /// gets an invalidated placeholder so the next freshness check still
    /// asks the server.
    pub(crate) fn members_mut(&mut self, key: SetKey) -> &mut MemberSet {
        let stale_after = self.policy.threshold(ResourceKey::Members(key));
        &mut self
            .members
            .entry(key)
            .or_insert_with(|| CacheEntry {
                value: MemberSet::new(),
                fetched_at: Instant::now(),
                stale_after,
                invalidated: true,
                placeholder: true,
            })
            .value
    }

    /// Undoes an optimistic write on `key`. A placeholder that ends up empty
    /// is dropped again, so the key reads as never fetched.
    pub(crate) fn restore_member(&mut self, key: SetKey, value: &str, membership: Membership) {
        let Some(entry) = self.members.get_mut(&key) else {
            return;
        };
        entry.value.restore(value, membership);
        if entry.placeholder && entry.value.is_empty() {
            self.members.remove(&key);
        }
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new(StalenessPolicy::default())
    }
}
