//! Owns the cache, the mutation executor and the view state, and turns user
//! messages into fetches, optimistic changes and view snapshots.
//!
//! Locks are always taken in the order executor, cache, state, and never held
//! across a call to the collaborator.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use triage_core::{
    bare_subreddit_name, prefixed_subreddit_name, CoreError, DashboardConfig, DashboardData,
    ErrorExt, Mention, MembershipChange, Mutation, SetKey, TriageApi, TriageSet,
};

use crate::cache::{EntityCache, FetchToken, MemberSet, MentionFeed, ResourceKey, StalenessPolicy};
use crate::filter::{
    apply_filters, FilterSelection, SentimentFilter, SubredditFilter, TriageFlags, TriageSets,
    TriageToggle,
};
use crate::mutation::{MutationExecutor, MutationOutcome};
use crate::pagination::Pagination;

const SET_KEYS: [SetKey; 5] = [
    SetKey::FLAGGED,
    SetKey::IGNORED,
    SetKey::ENGAGED,
    SetKey::MonitoredSubreddits,
    SetKey::Keywords,
];

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SelectSubreddit(String),
    SelectSentiment(SentimentFilter),
    SetTriageToggle(TriageToggle, bool),
    LoadMore,
    Flag(String),
    Unflag(String),
    ToggleFlag(String),
    Ignore(String),
    Unignore(String),
    Engage(String),
    Unengage(String),
    AddSubreddit(String),
    RemoveSubreddit(String),
    AddKeyword(String),
    RemoveKeyword(String),
    DismissNotice,
    Refresh,
}

#[derive(Debug, Clone, Serialize)]
pub struct MentionRow {
    #[serde(flatten)]
    pub mention: Mention,
    pub triage: TriageFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubredditSummary {
    /// Display form, `r/<name>`.
    pub name: String,
    pub mention_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_mentions: usize,
    pub flagged_count: usize,
    pub ignored_count: usize,
    pub engaged_count: usize,
    pub opportunities: usize,
    pub average_sentiment: f64,
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub rows: Vec<MentionRow>,
    pub total_filtered: usize,
    pub has_more: bool,
    pub remaining: usize,
    pub selection: FilterSelection,
    pub flagged_ids: Vec<String>,
    pub ignored_ids: Vec<String>,
    pub engaged_ids: Vec<String>,
    pub subreddits: Vec<SubredditSummary>,
    pub keywords: Vec<String>,
    pub stats: DashboardStats,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub error: Option<String>,
    pub notice: Option<String>,
}

#[derive(Debug)]
struct ViewState {
    selection: FilterSelection,
    pagination: Pagination,
    /// Bumped on every selection change; a delayed "load more" that started
    /// under an older epoch is dropped.
    selection_epoch: u64,
    fetches_in_flight: usize,
    is_loading_more: bool,
    error: Option<String>,
    notice: Option<String>,
}

impl ViewState {
    fn new(page_size: usize) -> Self {
        Self {
            selection: FilterSelection::default(),
            pagination: Pagination::new(page_size),
            selection_epoch: 0,
            fetches_in_flight: 0,
            is_loading_more: false,
            error: None,
            notice: None,
        }
    }

    fn change_selection(&mut self, change: impl FnOnce(&mut FilterSelection)) -> bool {
        let before = self.selection.clone();
        change(&mut self.selection);
        if self.selection == before {
            return false;
        }
        self.pagination.reset();
        self.selection_epoch += 1;
        true
    }

    /// Falls back to all subreddits when the selected one is not monitored
    /// anymore. Does nothing while the monitored list is unknown.
    fn repair_selection(&mut self, cache: &EntityCache) {
        let still_monitored = match &self.selection.subreddit {
            SubredditFilter::All => return,
            SubredditFilter::Only(name) => match cache.members(SetKey::MonitoredSubreddits) {
                Some(entry) => entry.value().iter().any(|m| m.eq_ignore_ascii_case(name)),
                None => return,
            },
        };
        if !still_monitored {
            info!(
                "{} is no longer monitored, showing all subreddits",
                self.selection.subreddit
            );
            self.change_selection(|selection| selection.subreddit = SubredditFilter::All);
        }
    }
}

pub struct TriageDashboard {
    api: Arc<dyn TriageApi>,
    executor: Mutex<MutationExecutor>,
    cache: RwLock<EntityCache>,
    state: RwLock<ViewState>,
    load_more_delay: Duration,
}

impl TriageDashboard {
    pub fn new(api: Arc<dyn TriageApi>, config: &DashboardConfig) -> Self {
        Self {
            api,
            executor: Mutex::new(MutationExecutor::new()),
            cache: RwLock::new(EntityCache::new(StalenessPolicy::from(&config.cache))),
            state: RwLock::new(ViewState::new(config.view.page_size)),
            load_more_delay: Duration::from_millis(config.view.load_more_delay_ms),
        }
    }

    pub async fn update(&self, message: Message) -> Result<(), CoreError> {
        debug!("Handling {:?}", message);
        match message {
            Message::SelectSubreddit(name) => {
                self.select_subreddit(&name).await;
                Ok(())
            }
            Message::SelectSentiment(sentiment) => {
                self.select_sentiment(sentiment).await;
                Ok(())
            }
            Message::SetTriageToggle(toggle, on) => {
                self.set_triage_toggle(toggle, on).await;
                Ok(())
            }
            Message::LoadMore => {
                self.load_more().await;
                Ok(())
            }
            Message::Flag(id) => self.change(TriageSet::Flagged, MembershipChange::Add, id).await,
            Message::Unflag(id) => {
                self.change(TriageSet::Flagged, MembershipChange::Remove, id).await
            }
            Message::ToggleFlag(id) => {
                let flagged = self.cache.read().await.member_set(SetKey::FLAGGED).contains(&id);
                let change = if flagged {
                    MembershipChange::Remove
                } else {
                    MembershipChange::Add
                };
                self.change(TriageSet::Flagged, change, id).await
            }
            Message::Ignore(id) => self.change(TriageSet::Ignored, MembershipChange::Add, id).await,
            Message::Unignore(id) => {
                self.change(TriageSet::Ignored, MembershipChange::Remove, id).await
            }
            Message::Engage(id) => self.change(TriageSet::Engaged, MembershipChange::Add, id).await,
            Message::Unengage(id) => {
                self.change(TriageSet::Engaged, MembershipChange::Remove, id).await
            }
            Message::AddSubreddit(name) => {
                self.change(SetKey::MonitoredSubreddits, MembershipChange::Add, name)
                    .await
            }
            Message::RemoveSubreddit(name) => {
                self.change(SetKey::MonitoredSubreddits, MembershipChange::Remove, name)
                    .await
            }
            Message::AddKeyword(keyword) => {
                self.change(SetKey::Keywords, MembershipChange::Add, keyword)
                    .await
            }
            Message::RemoveKeyword(keyword) => {
                self.change(SetKey::Keywords, MembershipChange::Remove, keyword)
                    .await
            }
            Message::DismissNotice => {
                self.state.write().await.notice = None;
                Ok(())
            }
            Message::Refresh => self.refresh().await,
        }
    }

    async fn change(
        &self,
        target: impl Into<SetKey>,
        change: MembershipChange,
        value: String,
    ) -> Result<(), CoreError> {
        self.execute(Mutation::new(target, change, value))
            .await
            .map(|_| ())
    }

    /// Applies `mutation` optimistically, confirms it with the server and
    /// rolls it back if the server refuses.
    pub async fn execute(&self, mutation: Mutation) -> Result<MutationOutcome, CoreError> {
        let mutation = normalize(mutation)?;

        let mut ticket = {
            let mut executor = self.executor.lock().await;
            let mut cache = self.cache.write().await;
            let Some(mutation) = canonicalize(&cache, mutation) else {
                return Ok(MutationOutcome::Unchanged);
            };
            let Some(ticket) = executor.begin(&mut cache, mutation) else {
                return Ok(MutationOutcome::Unchanged);
            };
            if ticket.mutation().target == SetKey::MonitoredSubreddits {
                self.state.write().await.repair_selection(&cache);
            }
            ticket
        };

        ticket.wait_turn().await;
        let mutation = ticket.mutation().clone();
        let result = self.api.apply_mutation(&mutation).await;

        let settled = {
            let mut executor = self.executor.lock().await;
            let mut cache = self.cache.write().await;
            let settled = executor.settle(&mut cache, ticket, result);
            if settled.is_err() && mutation.target == SetKey::MonitoredSubreddits {
                // a rolled back add may have been the selected subreddit
                self.state.write().await.repair_selection(&cache);
            }
            settled
        };

        match settled {
            Ok(outcome) => {
                info!("{} confirmed by server", mutation);
                Ok(outcome)
            }
            Err(error) => {
                error.log_warn();
                self.state.write().await.notice = Some(error.user_friendly_message());
                Err(error)
            }
        }
    }

    /// Full reload from the dashboard endpoint: mentions plus every set the
    /// payload carries.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        let (mentions_token, set_tokens) = {
            let mut cache = self.cache.write().await;
            let mentions_token = cache.begin_fetch(ResourceKey::Mentions);
            let set_tokens = SET_KEYS.map(|key| cache.begin_fetch(key.into()));
            (mentions_token, set_tokens)
        };

        self.fetch_started().await;
        let result = self.api.fetch_dashboard().await;
        self.fetch_finished().await;

        let data = match result {
            Ok(data) => data,
            Err(error) => return Err(self.fetch_failed("dashboard", error).await),
        };

        let mut executor = self.executor.lock().await;
        let mut cache = self.cache.write().await;

        let mention_count = data.posts.len();
        let DashboardData {
            posts,
            average_sentiment,
            flagged_ids,
            ignored_ids,
            engaged_ids,
            monitored_subreddits,
            keywords,
            ..
        } = data;
        cache.complete_mentions(
            mentions_token,
            MentionFeed {
                mentions: posts,
                average_sentiment,
            },
        );

        let arrays = [flagged_ids, ignored_ids, engaged_ids, monitored_subreddits, keywords];
        for ((key, token), values) in SET_KEYS.into_iter().zip(set_tokens).zip(arrays) {
            let values = match values {
                Some(values) => values,
                // no list endpoint, so this answer is as fresh as they get
                None if matches!(key, SetKey::IGNORED | SetKey::ENGAGED) => {
                    cache.member_set(key).as_slice().to_vec()
                }
                None => continue,
            };
            store_members(&mut executor, &mut cache, key, token, values);
        }

        let mut state = self.state.write().await;
        state.error = None;
        state.repair_selection(&cache);
        info!("Dashboard refreshed with {} mentions", mention_count);
        Ok(())
    }

    /// Reloads only the mention list.
    pub async fn refresh_mentions(&self) -> Result<(), CoreError> {
        let token = self.cache.write().await.begin_fetch(ResourceKey::Mentions);

        self.fetch_started().await;
        let result = self.api.fetch_recent_mentions().await;
        self.fetch_finished().await;

        let data = match result {
            Ok(data) => data,
            Err(error) => return Err(self.fetch_failed("mentions", error).await),
        };

        let mut cache = self.cache.write().await;
        let mention_count = data.posts.len();
        let accepted = cache.complete_mentions(
            token,
            MentionFeed {
                mentions: data.posts,
                average_sentiment: data.average_sentiment,
            },
        );
        self.state.write().await.error = None;
        if accepted {
            info!("Loaded {} recent mentions", mention_count);
        }
        Ok(())
    }

    pub async fn refresh_flagged(&self) -> Result<(), CoreError> {
        self.refresh_set(SetKey::FLAGGED).await
    }

    pub async fn refresh_subreddits(&self) -> Result<(), CoreError> {
        self.refresh_set(SetKey::MonitoredSubreddits).await
    }

    pub async fn refresh_keywords(&self) -> Result<(), CoreError> {
        self.refresh_set(SetKey::Keywords).await
    }

    /// Refetches whatever has gone stale. Ignored and engaged ids only come
    /// with the dashboard payload, so those (and the mentions) trigger a
    /// full refresh.
    pub async fn refresh_if_stale(&self) -> Result<(), CoreError> {
        let stale: Vec<ResourceKey> = {
            let cache = self.cache.read().await;
            std::iter::once(ResourceKey::Mentions)
                .chain(SET_KEYS.into_iter().map(ResourceKey::Members))
                .filter(|key| cache.is_stale(*key))
                .collect()
        };

        if stale.is_empty() {
            debug!("Cache is fresh, nothing to refetch");
            return Ok(());
        }

        let needs_dashboard = stale.iter().any(|key| {
            matches!(
                key,
                ResourceKey::Mentions
                    | ResourceKey::Members(SetKey::Triage(TriageSet::Ignored))
                    | ResourceKey::Members(SetKey::Triage(TriageSet::Engaged))
            )
        });
        if needs_dashboard {
            return self.refresh().await;
        }

        let refetches = stale.into_iter().filter_map(|key| match key {
            ResourceKey::Members(set) => Some(self.refresh_set(set)),
            ResourceKey::Mentions => None,
        });
        join_all(refetches)
            .await
            .into_iter()
            .collect::<Result<Vec<()>, CoreError>>()
            .map(|_| ())
    }

    async fn refresh_set(&self, key: SetKey) -> Result<(), CoreError> {
        let fetch = match key {
            SetKey::Triage(TriageSet::Flagged) => self.api.fetch_flagged(),
            SetKey::MonitoredSubreddits => self.api.fetch_monitored_subreddits(),
            SetKey::Keywords => self.api.fetch_keywords(),
            SetKey::Triage(_) => return self.refresh().await,
        };
        let token = self.cache.write().await.begin_fetch(key.into());

        self.fetch_started().await;
        let result = fetch.await;
        self.fetch_finished().await;

        let values = match result {
            Ok(values) => values,
            Err(error) => return Err(self.fetch_failed(key.name(), error).await),
        };

        let mut executor = self.executor.lock().await;
        let mut cache = self.cache.write().await;
        store_members(&mut executor, &mut cache, key, token, values);
        if key == SetKey::MonitoredSubreddits {
            self.state.write().await.repair_selection(&cache);
        }
        Ok(())
    }

    pub async fn select_subreddit(&self, name: &str) {
        let filter = SubredditFilter::parse(name);
        let cache = self.cache.read().await;
        let mut state = self.state.write().await;
        state.change_selection(|selection| selection.subreddit = filter);
        state.repair_selection(&cache);
    }

    pub async fn select_sentiment(&self, sentiment: SentimentFilter) {
        self.state
            .write()
            .await
            .change_selection(|selection| selection.sentiment = sentiment);
    }

    pub async fn set_triage_toggle(&self, toggle: TriageToggle, on: bool) {
        self.state
            .write()
            .await
            .change_selection(|selection| selection.toggles.set(toggle, on));
    }

    /// Shows one more page. A selection change during the optional delay
    /// cancels it.
    pub async fn load_more(&self) {
        let epoch = {
            let mut state = self.state.write().await;
            if state.is_loading_more {
                return;
            }
            if self.load_more_delay.is_zero() {
                state.pagination.load_more();
                return;
            }
            state.is_loading_more = true;
            state.selection_epoch
        };

        tokio::time::sleep(self.load_more_delay).await;

        let mut state = self.state.write().await;
        state.is_loading_more = false;
        if state.selection_epoch == epoch {
            state.pagination.load_more();
        } else {
            debug!("Selection changed while loading more, keeping first page");
        }
    }

    pub async fn pending_mutations(&self) -> usize {
        let mut executor = self.executor.lock().await;
        executor.reap_abandoned(&mut *self.cache.write().await);
        executor.pending_count()
    }

    pub async fn selection(&self) -> FilterSelection {
        self.state.read().await.selection.clone()
    }

    pub async fn view(&self) -> DashboardView {
        let cache = self.cache.read().await;
        let state = self.state.read().await;

        let feed = cache.mentions().map(|entry| entry.value());
        let mentions: &[Mention] = feed
            .map(|feed| feed.mentions.as_slice())
            .unwrap_or_default();
        let average_sentiment = feed.map_or(0.0, |feed| feed.average_sentiment);
        let flagged = cache.member_set(SetKey::FLAGGED);
        let ignored = cache.member_set(SetKey::IGNORED);
        let engaged = cache.member_set(SetKey::ENGAGED);
        let sets = TriageSets::new(flagged, ignored, engaged);

        let filtered = apply_filters(mentions, &state.selection, &sets);
        let rows = state
            .pagination
            .visible(&filtered)
            .iter()
            .map(|mention| MentionRow {
                mention: (*mention).clone(),
                triage: sets.flags(mention),
            })
            .collect();

        let subreddits = cache
            .member_set(SetKey::MonitoredSubreddits)
            .iter()
            .map(|name| {
                let filter = SubredditFilter::only(name);
                SubredditSummary {
                    name: prefixed_subreddit_name(name),
                    mention_count: mentions.iter().filter(|m| filter.matches(m)).count(),
                }
            })
            .collect();

        let stats = DashboardStats {
            total_mentions: mentions.len(),
            flagged_count: flagged.len(),
            ignored_count: ignored.len(),
            engaged_count: engaged.len(),
            opportunities: mentions.iter().filter(|m| m.is_opportunity()).count(),
            average_sentiment,
        };

        DashboardView {
            rows,
            total_filtered: filtered.len(),
            has_more: state.pagination.has_more(filtered.len()),
            remaining: state.pagination.remaining(filtered.len()),
            selection: state.selection.clone(),
            flagged_ids: flagged.as_slice().to_vec(),
            ignored_ids: ignored.as_slice().to_vec(),
            engaged_ids: engaged.as_slice().to_vec(),
            subreddits,
            keywords: cache.member_set(SetKey::Keywords).as_slice().to_vec(),
            stats,
            is_loading: state.fetches_in_flight > 0,
            is_loading_more: state.is_loading_more,
            error: state.error.clone(),
            notice: state.notice.clone(),
        }
    }

    async fn fetch_started(&self) {
        self.state.write().await.fetches_in_flight += 1;
    }

    async fn fetch_finished(&self) {
        let mut state = self.state.write().await;
        state.fetches_in_flight = state.fetches_in_flight.saturating_sub(1);
    }

    async fn fetch_failed(&self, resource: &str, error: CoreError) -> CoreError {
        let error = CoreError::fetch_failed(resource, error);
        error.log_error();
        self.state.write().await.error = Some(error.user_friendly_message());
        error
    }
}

fn store_members(
    executor: &mut MutationExecutor,
    cache: &mut EntityCache,
    key: SetKey,
    token: FetchToken,
    values: Vec<String>,
) {
    executor.reap_abandoned(cache);
    let mut set = match key {
        SetKey::MonitoredSubreddits => {
            MemberSet::from_values(values.iter().map(|name| bare_subreddit_name(name)))
        }
        _ => MemberSet::from_values(values),
    };
    executor.overlay_pending(key, &mut set);
    let count = set.len();
    if cache.complete_members(token, set) {
        debug!("Stored {} {} entries", count, key);
    }
}

/// Trims the value and strips a leading `r/` from subreddit names. Empty
/// values never reach the server.
fn normalize(mutation: Mutation) -> Result<Mutation, CoreError> {
    let value = match mutation.target {
        SetKey::MonitoredSubreddits => bare_subreddit_name(&mutation.value).trim(),
        _ => mutation.value.trim(),
    };
    if value.is_empty() {
        return Err(CoreError::invalid_input(format!(
            "{} needs a non-empty value",
            mutation.operation().replace('_', " ")
        )));
    }
    let value = value.to_string();
    Ok(Mutation { value, ..mutation })
}

/// Subreddit names compare case-insensitively: an add of a name already
/// monitored in another spelling is a no-op, and a removal targets the
/// stored spelling.
fn canonicalize(cache: &EntityCache, mutation: Mutation) -> Option<Mutation> {
    if mutation.target != SetKey::MonitoredSubreddits {
        return Some(mutation);
    }
    let stored = cache
        .member_set(SetKey::MonitoredSubreddits)
        .iter()
        .find(|name| name.eq_ignore_ascii_case(&mutation.value))
        .map(str::to_string);

    match (mutation.change, stored) {
        (MembershipChange::Add, Some(existing)) => {
            debug!("r/{} is already monitored", existing);
            None
        }
        (MembershipChange::Add, None) => Some(mutation),
        (MembershipChange::Remove, Some(existing)) => Some(Mutation {
            value: existing,
            ..mutation
        }),
        (MembershipChange::Remove, None) => None,
    }
}
