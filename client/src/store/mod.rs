//! The normalized entity cache and the operations that keep it in sync with the server.
//!
//! All cached data lives in one [`CacheState`] value behind a [`watch`] channel. Readers
//! take cheap [`Arc`] snapshots (or subscribe to changes); every write is a synchronous
//! `send_modify` that never spans an await point, so a snapshot is always internally
//! consistent.
//!
//! Every operation draws an issue sequence number from a single counter before it
//! touches the network. When a response is applied, the sequence number decides
//! precedence per entity id (and per subscription pair): a response older than the
//! newest one already applied for that key is dropped, no matter in which order the
//! responses arrived. Lifecycle flags follow the same rule per (entity kind,
//! operation kind).

mod paging;
mod playlists;
mod subscriptions;
mod users;
mod videos;

pub use paging::VideoStream;

use crate::error::ApiError;
use crate::forms::VideoQuery;
use crate::lifecycle::{EntityKind, Lifecycles, OperationKind, OperationStatus};
use crate::model::{
    ChannelProfile, ChannelStats, Playlist, PlaylistId, SubscriptionEdge, User, UserId, Video,
    VideoId,
};
use crate::session::SessionManager;
use crate::transport::{ApiRequest, ApiResponse};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Membership of one cached video listing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoList {
    pub ids: Vec<VideoId>,
    pub page: u32,
    pub next_page: Option<u32>,
    pub total: Option<u64>,
}

/// What a sequence number is compared against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EntityKey {
    User(UserId),
    ChannelName(String),
    Video(VideoId),
    VideoList(VideoQuery),
    Playlist(PlaylistId),
    UserPlaylists(UserId),
    Subscription(UserId, UserId),
    SubscriberList(UserId),
}

/// An immutable view of everything the store has cached.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    users: HashMap<UserId, User>,
    channels: HashMap<UserId, ChannelStats>,
    /// In the order videos were first cached.
    videos: IndexMap<VideoId, Video>,
    video_lists: HashMap<VideoQuery, VideoList>,
    playlists: HashMap<PlaylistId, Playlist>,
    user_playlists: HashMap<UserId, Vec<PlaylistId>>,
    subscriptions: HashMap<(UserId, UserId), SubscriptionEdge>,
    lifecycles: Lifecycles,
    applied: HashMap<EntityKey, u64>,
    /// Requests issued at or below this sequence number predate the last reset.
    floor: u64,
}

impl CacheState {
    pub fn status(&self, entity: EntityKind, operation: OperationKind) -> OperationStatus {
        self.lifecycles.status(entity, operation)
    }

    /// The status of the newest request of this kind aimed at `target`.
    pub fn status_of(&self, entity: EntityKind, operation: OperationKind, target: &str) -> OperationStatus {
        self.lifecycles.status_of(entity, operation, target)
    }

    pub fn lifecycles(&self) -> &Lifecycles {
        &self.lifecycles
    }

    pub fn user(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    pub fn user_by_username(&self, username: &str) -> Option<&User> {
        self.users.values().find(|user| user.username == username)
    }

    /// The channel page data for `username`, if it has been fetched.
    pub fn channel(&self, username: &str) -> Option<ChannelProfile> {
        let user = self.user_by_username(username)?;
        let stats = self.channels.get(&user.id)?;
        Some(ChannelProfile {
            user: user.clone(),
            stats: *stats,
        })
    }

    pub fn channel_stats(&self, id: &UserId) -> Option<&ChannelStats> {
        self.channels.get(id)
    }

    pub fn video(&self, id: &VideoId) -> Option<&Video> {
        self.videos.get(id)
    }

    /// Every cached video, oldest entry first.
    pub fn videos(&self) -> impl Iterator<Item = &Video> {
        self.videos.values()
    }

    pub fn video_list(&self, query: &VideoQuery) -> Option<&VideoList> {
        self.video_lists.get(query)
    }

    /// The videos of a cached listing, in listing order.
    pub fn list_videos(&self, query: &VideoQuery) -> Vec<&Video> {
        self.video_lists
            .get(query)
            .map(|list| list.ids.iter().filter_map(|id| self.videos.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn playlist(&self, id: &PlaylistId) -> Option<&Playlist> {
        self.playlists.get(id)
    }

    pub fn playlists_of(&self, user: &UserId) -> Vec<&Playlist> {
        self.user_playlists
            .get(user)
            .map(|ids| ids.iter().filter_map(|id| self.playlists.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn subscription(&self, subscriber: &UserId, channel: &UserId) -> Option<&SubscriptionEdge> {
        self.subscriptions
            .get(&(subscriber.clone(), channel.clone()))
    }

    pub fn is_subscribed(&self, subscriber: &UserId, channel: &UserId) -> bool {
        self.subscription(subscriber, channel).is_some()
    }

    /// Edges out of `subscriber`, ordered by channel id.
    pub fn subscriptions_of(&self, subscriber: &UserId) -> Vec<&SubscriptionEdge> {
        let mut edges: Vec<_> = self
            .subscriptions
            .values()
            .filter(|edge| &edge.subscriber_id == subscriber)
            .collect();
        edges.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        edges
    }

    /// Claims `key` for the response of request `seq`.
    ///
    /// Returns false if a response to a later-issued request was already applied.
    fn admit(&mut self, key: EntityKey, seq: u64) -> bool {
        if seq <= self.floor {
            return false;
        }
        let last = self.applied.entry(key).or_insert(0);
        if seq < *last {
            tracing::debug!(seq, newer = *last, "discarding stale response");
            return false;
        }
        *last = seq;
        true
    }

    fn put_video(&mut self, seq: u64, video: &Video) -> bool {
        if !self.admit(EntityKey::Video(video.id.clone()), seq) {
            return false;
        }
        match self.videos.get_mut(&video.id) {
            Some(cached) => cached.merge(video.clone()),
            None => {
                self.videos.insert(video.id.clone(), video.clone());
            }
        }
        true
    }
}

/// Handle for the outcome of one issued request.
#[derive(Debug, Clone)]
struct Ticket {
    entity: EntityKind,
    operation: OperationKind,
    /// Id of the entity the request is aimed at, if it has one.
    target: Option<String>,
    seq: u64,
}

#[derive(Debug)]
struct StoreInner {
    session: Arc<SessionManager>,
    state: watch::Sender<Arc<CacheState>>,
    next_seq: AtomicU64,
}

/// The single owner of all cached domain data.
///
/// Cloning is cheap and every clone refers to the same cache.
#[derive(Debug, Clone)]
pub struct EntityStore {
    inner: Arc<StoreInner>,
}

impl EntityStore {
    pub fn new(session: Arc<SessionManager>) -> Self {
        let (state, _) = watch::channel(Arc::new(CacheState::default()));
        Self {
            inner: Arc::new(StoreInner {
                session,
                state,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.inner.session
    }

    pub fn snapshot(&self) -> Arc<CacheState> {
        Arc::clone(&self.inner.state.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<CacheState>> {
        self.inner.state.subscribe()
    }

    pub fn status(&self, entity: EntityKind, operation: OperationKind) -> OperationStatus {
        self.inner.state.borrow().status(entity, operation)
    }

    pub fn status_of(&self, entity: EntityKind, operation: OperationKind, target: &str) -> OperationStatus {
        self.inner.state.borrow().status_of(entity, operation, target)
    }

    /// Drops every cached entity and lifecycle flag.
    ///
    /// Responses to requests issued before the reset are ignored when they arrive.
    pub fn reset(&self) {
        let floor = self.inner.next_seq.load(Ordering::SeqCst);
        self.modify(|state| {
            *state = CacheState {
                floor,
                ..CacheState::default()
            };
        });
        tracing::debug!(floor, "entity cache reset");
    }

    fn modify(&self, f: impl FnOnce(&mut CacheState)) {
        self.inner
            .state
            .send_modify(|state| f(Arc::make_mut(state)));
    }

    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.inner.session.send(request).await
    }

    /// Draws a sequence number and marks the operation pending.
    fn issue(&self, entity: EntityKind, operation: OperationKind) -> Ticket {
        self.issue_ticket(entity, operation, None)
    }

    /// Like [`issue`](Self::issue), also tracking the outcome for the entity `target`.
    fn issue_for(&self, entity: EntityKind, operation: OperationKind, target: impl ToString) -> Ticket {
        self.issue_ticket(entity, operation, Some(target.to_string()))
    }

    fn issue_ticket(&self, entity: EntityKind, operation: OperationKind, target: Option<String>) -> Ticket {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.modify(|state| {
            state
                .lifecycles
                .begin(entity, operation, target.as_deref(), seq)
        });
        Ticket {
            entity,
            operation,
            target,
            seq,
        }
    }

    /// Applies a successful result to the cache and settles the lifecycle flag.
    fn complete<T>(
        &self,
        ticket: Ticket,
        result: Result<T, ApiError>,
        apply: impl FnOnce(&mut CacheState, u64, &T),
    ) -> Result<T, ApiError> {
        self.complete_or(ticket, result, apply, |_, _, _| {})
    }

    /// Like [`complete`](Self::complete), with a cache effect for failures too.
    fn complete_or<T>(
        &self,
        ticket: Ticket,
        result: Result<T, ApiError>,
        apply: impl FnOnce(&mut CacheState, u64, &T),
        on_error: impl FnOnce(&mut CacheState, u64, &ApiError),
    ) -> Result<T, ApiError> {
        let Ticket {
            entity,
            operation,
            target,
            seq,
        } = ticket;
        if let Err(e) = &result {
            tracing::warn!(?entity, ?operation, ?target, seq, error = %e, "request failed");
        }
        self.modify(|state| {
            if seq <= state.floor {
                return;
            }
            match &result {
                Ok(value) => apply(state, seq, value),
                Err(e) => on_error(state, seq, e),
            }
            state.lifecycles.settle(
                entity,
                operation,
                target.as_deref(),
                seq,
                result.as_ref().map(|_| ()),
            );
        });
        result
    }
}

/// Rejects blank identifiers before anything is sent.
fn require(blank: bool, name: &'static str) -> Result<(), ApiError> {
    if blank {
        return Err(ApiError::MissingIdentifier(name));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::mock::MockTransport;
    use http::Method;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn admit_rejects_older_sequence_numbers() {
        let mut state = CacheState::default();
        let key = EntityKey::Video(VideoId::new("v1"));
        assert!(state.admit(key.clone(), 2));
        assert!(!state.admit(key.clone(), 1));
        assert!(state.admit(key, 3));
    }

    #[tokio::test]
    async fn snapshots_are_immutable() {
        let mock = MockTransport::new();
        let store = store(&mock);
        mock.expect_ok(Method::GET, "/videos/v1", json!({"_id": "v1", "title": "One"}))
            .await;

        let before = store.snapshot();
        store.fetch_video(VideoId::new("v1")).await.unwrap();
        assert!(before.video(&VideoId::new("v1")).is_none());
        assert!(store.snapshot().video(&VideoId::new("v1")).is_some());
    }

    #[tokio::test]
    async fn reset_purges_and_ignores_older_responses() {
        let mock = MockTransport::new();
        let store = store(&mock);
        mock.expect_ok(Method::GET, "/videos/v1", json!({"_id": "v1"})).await;
        store.fetch_video(VideoId::new("v1")).await.unwrap();

        let gate = mock.expect_gated(Method::GET, "/videos/v2").await;
        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.fetch_video(VideoId::new("v2")).await }
        });
        mock.wait_for_calls(Method::GET, "/videos/v2", 1).await.unwrap();

        store.reset();
        gate.release(Ok(ApiResponse::ok(json!({"_id": "v2"}))));
        pending.await.unwrap().unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.videos().count(), 0);
        assert_eq!(
            snapshot.status(EntityKind::Video, OperationKind::FetchOne),
            OperationStatus::Idle
        );
    }

    #[tokio::test]
    async fn subscribers_see_pending_then_settled() {
        let mock = MockTransport::new();
        let store = store(&mock);
        let mut rx = store.subscribe();
        let gate = mock.expect_gated(Method::GET, "/videos/v1").await;
        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.fetch_video(VideoId::new("v1")).await }
        });

        rx.changed().await.unwrap();
        assert!(
            rx.borrow_and_update()
                .status(EntityKind::Video, OperationKind::FetchOne)
                .is_pending()
        );
        gate.release(Err(crate::error::TransportError::network("reset by peer")));
        assert!(pending.await.unwrap().unwrap_err().is_retryable());
        rx.changed().await.unwrap();
        assert!(
            rx.borrow()
                .status(EntityKind::Video, OperationKind::FetchOne)
                .error()
                .is_some()
        );
    }

    #[tokio::test]
    async fn logged_in_user_is_cached() {
        let mock = MockTransport::new();
        let store = logged_in_store(&mock).await;
        let snapshot = store.snapshot();
        assert_eq!(snapshot.user(&UserId::new("u1")).unwrap().username, "alice");
        assert_eq!(
            snapshot.status(EntityKind::User, OperationKind::Login),
            OperationStatus::Success
        );
    }
}
