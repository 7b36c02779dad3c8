//! Optimistic membership changes with exact rollback.
//!
//! A change is split in two synchronous halves around the network call:
//! [`MutationExecutor::begin`] writes the intended state into the cache and
//! remembers how to undo it, [`MutationExecutor::settle`] either confirms or
//! undoes it once the server answered. Neither half awaits, so callers run
//! them inside their lock guards and do the network call in between.
//!
//! Calls touching the same member of the same set take turns in request
//! order. A failure whose member already has a newer change queued hands its
//! restore point to that change instead of touching the cache, so the screen
//! keeps showing the newest intent.
//!
//! A ticket dropped before it was settled reports itself back through a
//! channel. The executor treats it like a failed change the next time it
//! runs, and marks the set stale since the server may or may not have seen
//! the request.

use crate::cache::{EntityCache, MemberSet, Membership, ResourceKey};
use futures::task::noop_waker_ref;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use triage_core::{CoreError, MembershipChange, Mutation, SetKey};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The server confirmed the change.
    Applied,
    /// Local state already matched; nothing was sent.
    Unchanged,
}

type MemberKey = (SetKey, String);
type TurnFuture = Pin<Box<dyn Future<Output = OwnedMutexGuard<()>> + Send>>;

enum Turn {
    Ready(OwnedMutexGuard<()>),
    Queued(TurnFuture),
    Released,
}

#[derive(Debug)]
struct Abandoned {
    id: Uuid,
    mutation: Mutation,
}

/// A change that has been applied locally and still awaits the server.
///
/// Hand it back to [`MutationExecutor::settle`]. Dropping it instead rolls
/// the change back on the executor's next call.
pub struct MutationTicket {
    id: Uuid,
    mutation: Mutation,
    turn: Turn,
    abandon: Option<UnboundedSender<Abandoned>>,
}

impl MutationTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// Resolves once every earlier change to the same member has settled.
    pub async fn wait_turn(&mut self) {
        if let Turn::Queued(queued) = &mut self.turn {
            let guard = queued.await;
            self.turn = Turn::Ready(guard);
        }
    }

    /// Takes the ticket apart for settling; the drop report is disarmed.
    fn into_parts(mut self) -> (Uuid, Mutation, Turn) {
        self.abandon = None;
        let turn = std::mem::replace(&mut self.turn, Turn::Released);
        let mutation = self.mutation.clone();
        (self.id, mutation, turn)
    }
}

impl Drop for MutationTicket {
    fn drop(&mut self) {
        if let Some(abandon) = self.abandon.take() {
            // the executor may already be gone
            let _ = abandon.send(Abandoned {
                id: self.id,
                mutation: self.mutation.clone(),
            });
        }
    }
}

impl fmt::Debug for MutationTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationTicket")
            .field("id", &self.id)
            .field("mutation", &self.mutation)
            .field("ready", &matches!(self.turn, Turn::Ready(_)))
            .finish()
    }
}

#[derive(Debug, Clone)]
struct PendingChange {
    id: Uuid,
    seq: u64,
    change: MembershipChange,
    /// Membership to put back if this change fails and nothing newer waits.
    restore_point: Membership,
}

/// What became of a pending change that was taken off its member's queue.
struct Withdrawn {
    change: Option<PendingChange>,
    successor_waiting: bool,
}

#[derive(Debug)]
pub struct MutationExecutor {
    pending: HashMap<MemberKey, VecDeque<PendingChange>>,
    lanes: HashMap<MemberKey, Arc<Mutex<()>>>,
    next_seq: u64,
    abandon_tx: UnboundedSender<Abandoned>,
    abandoned: UnboundedReceiver<Abandoned>,
}

impl Default for MutationExecutor {
    fn default() -> Self {
        let (abandon_tx, abandoned) = unbounded_channel();
        Self {
            pending: HashMap::new(),
            lanes: HashMap::new(),
            next_seq: 0,
            abandon_tx,
            abandoned,
        }
    }
}

impl MutationExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    pub fn is_pending(&self, key: SetKey, value: &str) -> bool {
        self.pending
            .get(&(key, value.to_string()))
            .map_or(false, |queue| !queue.is_empty())
    }

    /// Applies `mutation` to the cache and returns the ticket for the network
    /// call, or `None` when the optimistic state already matches.
    pub fn begin(&mut self, cache: &mut EntityCache, mutation: Mutation) -> Option<MutationTicket> {
        self.reap_abandoned(cache);

        let key = mutation.target;
        let prior = cache.member_set(key).membership(&mutation.value);
        let wants_present = mutation.change == MembershipChange::Add;
        if prior.is_present() == wants_present {
            debug!("{} already holds locally, nothing to send", mutation);
            return None;
        }

        let members = cache.members_mut(key);
        match mutation.change {
            MembershipChange::Add => {
                members.insert(mutation.value.clone());
            }
            MembershipChange::Remove => {
                members.remove(&mutation.value);
            }
        }
        cache.supersede_fetches(ResourceKey::Members(key));

        let id = Uuid::new_v4();
        let seq = self.next_seq;
        self.next_seq += 1;
        let member: MemberKey = (key, mutation.value.clone());
        self.pending.entry(member.clone()).or_default().push_back(PendingChange {
            id,
            seq,
            change: mutation.change,
            restore_point: prior,
        });

        let lane = self
            .lanes
            .entry(member)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        debug!("Began {} as {}", mutation, id);
        Some(MutationTicket {
            id,
            mutation,
            turn: reserve_turn(lane),
            abandon: Some(self.abandon_tx.clone()),
        })
    }

    /// Confirms or reverts the change behind `ticket` according to the
    /// server's answer.
    pub fn settle(
        &mut self,
        cache: &mut EntityCache,
        ticket: MutationTicket,
        result: Result<(), CoreError>,
    ) -> Result<MutationOutcome, CoreError> {
        // earlier abandoned changes to this member must hand off first
        self.reap_abandoned(cache);

        let (id, mutation, turn) = ticket.into_parts();
        let withdrawn = self.withdraw(id, &mutation, result.is_err());
        // release the member only after the bookkeeping above
        drop(turn);

        match result {
            Ok(()) => {
                debug!("{} confirmed", mutation);
                if matches!(mutation.target, SetKey::MonitoredSubreddits | SetKey::Keywords) {
                    cache.invalidate(ResourceKey::Mentions);
                }
                Ok(MutationOutcome::Applied)
            }
            Err(error) => {
                roll_back(cache, id, &mutation, withdrawn);
                Err(CoreError::mutation_failed(mutation.operation(), error))
            }
        }
    }

    /// Rolls back every change whose ticket was dropped unsettled. Returns
    /// how many there were.
    pub fn reap_abandoned(&mut self, cache: &mut EntityCache) -> usize {
        let mut reaped = 0;
        while let Ok(Abandoned { id, mutation }) = self.abandoned.try_recv() {
            info!("{} was abandoned before the server answered, rolling back", mutation);
            let withdrawn = self.withdraw(id, &mutation, true);
            roll_back(cache, id, &mutation, withdrawn);
            cache.invalidate(ResourceKey::Members(mutation.target));
            reaped += 1;
        }
        reaped
    }

    /// Takes change `id` off its member's queue. A failed change passes its
    /// restore point on to the change queued right behind it.
    fn withdraw(&mut self, id: Uuid, mutation: &Mutation, failed: bool) -> Withdrawn {
        let member: MemberKey = (mutation.target, mutation.value.clone());
        let mut withdrawn = Withdrawn {
            change: None,
            successor_waiting: false,
        };

        if let Some(queue) = self.pending.get_mut(&member) {
            if let Some(position) = queue.iter().position(|change| change.id == id) {
                let change = queue.remove(position);
                if let (Some(change), true) = (&change, failed) {
                    if let Some(next) = queue.get_mut(position) {
                        next.restore_point = change.restore_point;
                    }
                }
                withdrawn.successor_waiting = queue.len() > position;
                withdrawn.change = change;
            }
            if queue.is_empty() {
                self.pending.remove(&member);
                self.lanes.remove(&member);
            }
        }
        withdrawn
    }

    /// Re-applies still pending intents for `key` onto a freshly fetched set.
    pub fn overlay_pending(&self, key: SetKey, set: &mut MemberSet) {
        let mut intents: Vec<(u64, &str, MembershipChange)> = self
            .pending
            .iter()
            .filter(|((set_key, _), _)| *set_key == key)
            .filter_map(|((_, value), queue)| {
                queue
                    .back()
                    .map(|latest| (latest.seq, value.as_str(), latest.change))
            })
            .collect();
        intents.sort_by_key(|(seq, _, _)| *seq);

        for (_, value, change) in intents {
            match change {
                MembershipChange::Add => {
                    set.insert(value.to_string());
                }
                MembershipChange::Remove => {
                    set.remove(value);
                }
            }
        }
    }
}

fn roll_back(cache: &mut EntityCache, id: Uuid, mutation: &Mutation, withdrawn: Withdrawn) {
    match withdrawn {
        Withdrawn {
            change: Some(_),
            successor_waiting: true,
        } => {
            debug!("{} failed, newer change for the member keeps the screen", mutation);
        }
        Withdrawn {
            change: Some(change),
            successor_waiting: false,
        } => {
            cache.restore_member(mutation.target, &mutation.value, change.restore_point);
            debug!("{} failed, restored {:?}", mutation, change.restore_point);
        }
        Withdrawn { change: None, .. } => warn!("Settled unknown mutation ticket {}", id),
    }
}

/// Queues on `lane` without blocking. `tokio::sync::Mutex` hands out the lock
/// in the order waiters first polled, so polling once here fixes the turn at
/// the moment the change began.
fn reserve_turn(lane: Arc<Mutex<()>>) -> Turn {
    let mut queued: TurnFuture = Box::pin(lane.lock_owned());
    let mut cx = Context::from_waker(noop_waker_ref());
    match queued.as_mut().poll(&mut cx) {
        Poll::Ready(guard) => Turn::Ready(guard),
        Poll::Pending => Turn::Queued(queued),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::{DashboardApiError, TriageSet};

    fn flag(id: &str) -> Mutation {
        Mutation::new(TriageSet::Flagged, MembershipChange::Add, id)
    }

    fn unflag(id: &str) -> Mutation {
        Mutation::new(TriageSet::Flagged, MembershipChange::Remove, id)
    }

    fn server_down() -> Result<(), CoreError> {
        Err(CoreError::DashboardApi(DashboardApiError::ServerError {
            status_code: 503,
        }))
    }

    fn seeded(values: &[&str]) -> EntityCache {
        let mut cache = EntityCache::default();
        cache.put_members(SetKey::FLAGGED, MemberSet::from_values(values.iter().copied()));
        cache
    }

    #[test]
    fn test_begin_is_visible_immediately() {
        let mut cache = seeded(&["a"]);
        let mut executor = MutationExecutor::new();

        let ticket = executor.begin(&mut cache, flag("b")).unwrap();
        assert!(cache.member_set(SetKey::FLAGGED).contains("b"));
        assert!(executor.is_pending(SetKey::FLAGGED, "b"));
        assert_eq!(ticket.mutation().value, "b");
    }

    #[test]
    fn test_matching_state_is_unchanged() {
        let mut cache = seeded(&["a"]);
        let mut executor = MutationExecutor::new();

        assert!(executor.begin(&mut cache, flag("a")).is_none());
        assert!(executor.begin(&mut cache, unflag("zzz")).is_none());
        assert_eq!(executor.pending_count(), 0);
    }

    #[test]
    fn test_failed_add_restores_exactly() {
        let mut cache = seeded(&["a", "b"]);
        let before = cache.member_set(SetKey::FLAGGED).clone();
        let mut executor = MutationExecutor::new();

        let ticket = executor.begin(&mut cache, flag("c")).unwrap();
        let result = executor.settle(&mut cache, ticket, server_down());

        assert!(matches!(result, Err(CoreError::MutationFailed { .. })));
        assert_eq!(cache.member_set(SetKey::FLAGGED), &before);
        assert_eq!(executor.pending_count(), 0);
    }

    #[test]
    fn test_failed_remove_restores_position() {
        let mut cache = seeded(&["a", "b", "c"]);
        let before = cache.member_set(SetKey::FLAGGED).clone();
        let mut executor = MutationExecutor::new();

        let ticket = executor.begin(&mut cache, unflag("b")).unwrap();
        assert_eq!(cache.member_set(SetKey::FLAGGED).as_slice(), &["a", "c"]);

        let _ = executor.settle(&mut cache, ticket, server_down());
        assert_eq!(cache.member_set(SetKey::FLAGGED), &before);
    }

    #[test]
    fn test_success_keeps_optimistic_value() {
        let mut cache = seeded(&[]);
        let mut executor = MutationExecutor::new();

        let ticket = executor.begin(&mut cache, flag("a")).unwrap();
        let outcome = executor.settle(&mut cache, ticket, Ok(())).unwrap();

        assert_eq!(outcome, MutationOutcome::Applied);
        assert!(cache.member_set(SetKey::FLAGGED).contains("a"));
        assert!(!executor.is_pending(SetKey::FLAGGED, "a"));
    }

    #[test]
    fn test_subreddit_change_invalidates_mentions() {
        let mut cache = EntityCache::default();
        cache.put_mentions(Default::default());
        cache.put_members(SetKey::MonitoredSubreddits, MemberSet::new());
        let mut executor = MutationExecutor::new();

        let ticket = executor
            .begin(
                &mut cache,
                Mutation::new(SetKey::MonitoredSubreddits, MembershipChange::Add, "SaaS"),
            )
            .unwrap();
        assert!(!cache.is_stale(ResourceKey::Mentions));

        executor.settle(&mut cache, ticket, Ok(())).unwrap();
        assert!(cache.is_stale(ResourceKey::Mentions));
    }

    #[test]
    fn test_flag_failure_does_not_invalidate_mentions() {
        let mut cache = seeded(&[]);
        cache.put_mentions(Default::default());
        let mut executor = MutationExecutor::new();

        let ticket = executor.begin(&mut cache, flag("a")).unwrap();
        let _ = executor.settle(&mut cache, ticket, server_down());
        assert!(!cache.is_stale(ResourceKey::Mentions));
    }

    #[test]
    fn test_failure_hands_restore_point_to_newer_change() {
        let mut cache = seeded(&["x"]);
        let mut executor = MutationExecutor::new();

        let first = executor.begin(&mut cache, flag("a")).unwrap();
        let second = executor.begin(&mut cache, unflag("a")).unwrap();
        let third = executor.begin(&mut cache, flag("a")).unwrap();
        assert_eq!(executor.pending_count(), 3);

        // first fails while two newer changes wait: screen keeps the newest intent
        let _ = executor.settle(&mut cache, first, server_down());
        assert!(cache.member_set(SetKey::FLAGGED).contains("a"));

        let _ = executor.settle(&mut cache, second, server_down());
        assert!(cache.member_set(SetKey::FLAGGED).contains("a"));

        // the last one restores the state from before the first change
        let _ = executor.settle(&mut cache, third, server_down());
        assert_eq!(cache.member_set(SetKey::FLAGGED).as_slice(), &["x"]);
        assert_eq!(executor.pending_count(), 0);
    }

    #[test]
    fn test_overlay_reapplies_pending_intents() {
        let mut cache = seeded(&["a", "b"]);
        let mut executor = MutationExecutor::new();
        let _add = executor.begin(&mut cache, flag("c")).unwrap();
        let _remove = executor.begin(&mut cache, unflag("a")).unwrap();

        let mut fetched = MemberSet::from_values(["a", "b"]);
        executor.overlay_pending(SetKey::FLAGGED, &mut fetched);
        assert_eq!(fetched.as_slice(), &["b", "c"]);

        let mut other = MemberSet::from_values(["a"]);
        executor.overlay_pending(SetKey::IGNORED, &mut other);
        assert_eq!(other.as_slice(), &["a"]);
    }

    #[test]
    fn test_begin_supersedes_inflight_fetch() {
        let mut cache = seeded(&[]);
        let token = cache.begin_fetch(SetKey::FLAGGED.into());
        let mut executor = MutationExecutor::new();

        let _ticket = executor.begin(&mut cache, flag("a")).unwrap();
        assert!(!cache.complete_members(token, MemberSet::new()));
        assert!(cache.member_set(SetKey::FLAGGED).contains("a"));
    }

    #[test]
    fn test_dropped_ticket_is_rolled_back() {
        let mut cache = seeded(&["a"]);
        let mut executor = MutationExecutor::new();

        let ticket = executor.begin(&mut cache, flag("b")).unwrap();
        drop(ticket);
        assert!(cache.member_set(SetKey::FLAGGED).contains("b"));

        assert_eq!(executor.reap_abandoned(&mut cache), 1);
        assert_eq!(cache.member_set(SetKey::FLAGGED).as_slice(), &["a"]);
        assert!(cache.is_stale(SetKey::FLAGGED.into()));
        assert_eq!(executor.pending_count(), 0);

        let mut fetched = MemberSet::from_values(["a"]);
        executor.overlay_pending(SetKey::FLAGGED, &mut fetched);
        assert_eq!(fetched.as_slice(), &["a"]);
    }

    #[test]
    fn test_dropped_ticket_hands_off_to_newer_change() {
        let mut cache = seeded(&[]);
        let mut executor = MutationExecutor::new();

        let first = executor.begin(&mut cache, flag("a")).unwrap();
        let second = executor.begin(&mut cache, unflag("a")).unwrap();
        drop(first);

        executor.settle(&mut cache, second, Ok(())).unwrap();
        assert!(!cache.member_set(SetKey::FLAGGED).contains("a"));
        assert_eq!(executor.pending_count(), 0);
        assert_eq!(executor.reap_abandoned(&mut cache), 0);
    }

    #[test]
    fn test_settled_ticket_is_not_reported_as_dropped() {
        let mut cache = seeded(&[]);
        let mut executor = MutationExecutor::new();

        let ticket = executor.begin(&mut cache, flag("a")).unwrap();
        executor.settle(&mut cache, ticket, Ok(())).unwrap();

        assert_eq!(executor.reap_abandoned(&mut cache), 0);
        assert!(cache.member_set(SetKey::FLAGGED).contains("a"));
    }

    #[test]
    fn test_failed_change_on_unfetched_set_leaves_no_entry() {
        let mut cache = EntityCache::default();
        let mut executor = MutationExecutor::new();

        let ticket = executor.begin(&mut cache, flag("a")).unwrap();
        assert!(cache.members(SetKey::FLAGGED).is_some());

        let _ = executor.settle(&mut cache, ticket, server_down());
        assert!(cache.members(SetKey::FLAGGED).is_none());
    }

    #[tokio::test]
    async fn test_turns_follow_request_order() {
        let mut cache = seeded(&[]);
        let mut executor = MutationExecutor::new();

        let mut first = executor.begin(&mut cache, flag("a")).unwrap();
        let mut second = executor.begin(&mut cache, unflag("a")).unwrap();
        let mut independent = executor.begin(&mut cache, flag("b")).unwrap();

        first.wait_turn().await;
        independent.wait_turn().await;

        let waiting = tokio::time::timeout(std::time::Duration::from_millis(20), second.wait_turn()).await;
        assert!(waiting.is_err(), "second change must wait for the first");

        executor.settle(&mut cache, first, Ok(())).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), second.wait_turn())
            .await
            .expect("second change gets its turn once the first settled");

        executor.settle(&mut cache, second, Ok(())).unwrap();
        executor.settle(&mut cache, independent, Ok(())).unwrap();
        assert_eq!(executor.pending_count(), 0);
        assert_eq!(cache.member_set(SetKey::FLAGGED).as_slice(), &["b"]);
    }
}
