use super::{CacheState, EntityKey, EntityStore, require};
use crate::endpoints;
use crate::error::ApiError;
use crate::lifecycle::{EntityKind, OperationKind};
use crate::model::{SubscribedChannelRepr, SubscriptionEdge, UserId};
use jiff::Timestamp;
use serde_json::Value;
use tracing::instrument;

/// The server's answer to a toggle, normalized.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ToggleOutcome {
    subscribed: bool,
    at: Option<Timestamp>,
}

impl ToggleOutcome {
    /// Reads an explicit `subscribed`/`isSubscribed` flag if there is one. Otherwise a
    /// subscription document means the edge now exists, and anything else means it is gone.
    fn from_data(data: &Value) -> Self {
        let at = data
            .get("createdAt")
            .and_then(Value::as_str)
            .and_then(|at| at.parse().ok());
        let flag = data
            .get("subscribed")
            .or_else(|| data.get("isSubscribed"))
            .and_then(Value::as_bool);
        let subscribed = match flag {
            Some(subscribed) => subscribed,
            None => data.get("_id").is_some() || data.get("channel").is_some(),
        };
        Self { subscribed, at }
    }
}

impl CacheState {
    /// Sets whether `subscriber` follows `channel`.
    ///
    /// Returns the previous state, or `None` if a newer response already decided this pair.
    pub(super) fn record_edge(
        &mut self,
        seq: u64,
        subscriber: &UserId,
        channel: &UserId,
        subscribed: bool,
        at: Option<Timestamp>,
    ) -> Option<bool> {
        if !self.admit(EntityKey::Subscription(subscriber.clone(), channel.clone()), seq) {
            return None;
        }
        let key = (subscriber.clone(), channel.clone());
        let was = self.subscriptions.contains_key(&key);
        if subscribed {
            let edge = self.subscriptions.entry(key).or_insert_with(|| SubscriptionEdge {
                subscriber_id: subscriber.clone(),
                channel_id: channel.clone(),
                subscribed_at: None,
            });
            if at.is_some() {
                edge.subscribed_at = at;
            }
        } else {
            self.subscriptions.remove(&key);
        }
        Some(was)
    }

    /// Moves the cached counters by the observed edge transition.
    fn adjust_counts(&mut self, subscriber: &UserId, channel: &UserId, was: bool, now: bool) {
        if was == now {
            return;
        }
        if let Some(stats) = self.channels.get_mut(channel) {
            stats.is_subscribed = now;
            stats.subscribers_count = if now {
                stats.subscribers_count + 1
            } else {
                stats.subscribers_count.saturating_sub(1)
            };
        }
        if let Some(stats) = self.channels.get_mut(subscriber) {
            stats.channels_subscribed_to_count = if now {
                stats.channels_subscribed_to_count + 1
            } else {
                stats.channels_subscribed_to_count.saturating_sub(1)
            };
        }
    }

    fn put_subscriber_list(&mut self, seq: u64, subscriber: &UserId, entries: &[SubscribedChannelRepr]) {
        if !self.admit(EntityKey::SubscriberList(subscriber.clone()), seq) {
            return;
        }
        let listed: Vec<_> = entries.iter().cloned().map(SubscribedChannelRepr::into_parts).collect();
        let dropped: Vec<UserId> = self
            .subscriptions_of(subscriber)
            .into_iter()
            .map(|edge| edge.channel_id.clone())
            .filter(|channel| !listed.iter().any(|(id, _, _)| id == channel))
            .collect();
        for channel in dropped {
            self.record_edge(seq, subscriber, &channel, false, None);
        }
        for (channel, user, at) in listed {
            if let Some(user) = user {
                self.put_user(seq, &user);
            }
            self.record_edge(seq, subscriber, &channel, true, at);
        }
    }
}

impl EntityStore {
    /// Subscribes the signed-in user to `channel`, or unsubscribes if already subscribed.
    ///
    /// The cache only changes once the server confirms, and then by whatever the server
    /// says the new state is. Returns whether the user is now subscribed.
    #[instrument(skip(self))]
    pub async fn toggle_subscription(&self, channel: UserId) -> Result<bool, ApiError> {
        require(channel.is_blank(), "channel id")?;
        let subscriber = self
            .session()
            .current_user()
            .map(|user| user.id)
            .ok_or(ApiError::MissingIdentifier("subscriber id"))?;
        let ticket = self.issue_for(EntityKind::Subscription, OperationKind::Toggle, &channel);
        let result = self
            .send(endpoints::toggle_subscription(&channel))
            .await
            .map(|response| ToggleOutcome::from_data(&response.data));
        let outcome = self.complete(ticket, result, |state, seq, outcome| {
            if let Some(was) = state.record_edge(seq, &subscriber, &channel, outcome.subscribed, outcome.at) {
                state.adjust_counts(&subscriber, &channel, was, outcome.subscribed);
            }
        })?;
        tracing::debug!(channel = %channel, subscribed = outcome.subscribed, "toggled subscription");
        Ok(outcome.subscribed)
    }

    /// Fetches the channels `subscriber` follows.
    #[instrument(skip(self))]
    pub async fn fetch_subscriptions(&self, subscriber: UserId) -> Result<Vec<SubscriptionEdge>, ApiError> {
        require(subscriber.is_blank(), "subscriber id")?;
        let ticket = self.issue_for(EntityKind::Subscription, OperationKind::FetchList, &subscriber);
        let result = self
            .send(endpoints::subscribed_channels(&subscriber))
            .await
            .and_then(|response| {
                response.decode::<Vec<SubscribedChannelRepr>>("subscribed channels")
            });
        let entries = self.complete(ticket, result, |state, seq, entries| {
            state.put_subscriber_list(seq, &subscriber, entries);
        })?;
        tracing::debug!(subscriber = %subscriber, count = entries.len(), "fetched subscriptions");
        Ok(entries
            .into_iter()
            .map(|entry| {
                let (channel_id, _, subscribed_at) = entry.into_parts();
                SubscriptionEdge {
                    subscriber_id: subscriber.clone(),
                    channel_id,
                    subscribed_at,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::ToggleOutcome;
    use crate::error::ApiError;
    use crate::lifecycle::{EntityKind, OperationKind, OperationStatus};
    use crate::mock::MockTransport;
    use crate::model::UserId;
    use crate::transport::ApiResponse;
    use http::Method;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn with_bob(mock: &MockTransport) -> super::EntityStore {
        let store = logged_in_store(mock).await;
        mock.expect_ok(
            Method::GET,
            "/users/c/bob",
            json!({"_id": "u2", "username": "bob", "subscribersCount": 3, "isSubscribed": false}),
        )
        .await;
        store.fetch_channel("bob").await.unwrap();
        store
    }

    fn bob_subscribers(store: &super::EntityStore) -> u64 {
        store
            .snapshot()
            .channel_stats(&UserId::new("u2"))
            .map(|stats| stats.subscribers_count)
            .unwrap_or_default()
    }

    #[test]
    fn toggle_response_shapes() {
        assert!(ToggleOutcome::from_data(&json!({"subscribed": true})).subscribed);
        assert!(!ToggleOutcome::from_data(&json!({"isSubscribed": false})).subscribed);
        let created = ToggleOutcome::from_data(&json!({
            "_id": "s1",
            "subscriber": "u1",
            "channel": "u2",
            "createdAt": "2024-05-01T10:00:00Z"
        }));
        assert!(created.subscribed);
        assert!(created.at.is_some());
        assert!(!ToggleOutcome::from_data(&json!({})).subscribed);
        assert!(!ToggleOutcome::from_data(&json!(null)).subscribed);
    }

    #[tokio::test]
    async fn double_toggle_returns_to_start() {
        let mock = MockTransport::new();
        let store = with_bob(&mock).await;
        mock.expect_ok(Method::POST, "/subscriptions/c/u2", json!({"subscribed": true}))
            .await;
        mock.expect_ok(Method::POST, "/subscriptions/c/u2", json!({"subscribed": false}))
            .await;

        assert!(store.toggle_subscription(UserId::new("u2")).await.unwrap());
        assert_eq!(bob_subscribers(&store), 4);
        assert_eq!(store.snapshot().subscriptions_of(&UserId::new("u1")).len(), 1);

        assert!(!store.toggle_subscription(UserId::new("u2")).await.unwrap());
        let snapshot = store.snapshot();
        assert_eq!(bob_subscribers(&store), 3);
        assert!(!snapshot.is_subscribed(&UserId::new("u1"), &UserId::new("u2")));
        assert!(snapshot.subscriptions_of(&UserId::new("u1")).is_empty());
    }

    #[tokio::test]
    async fn overlapping_toggles_settle_on_the_later_one() {
        let mock = MockTransport::new();
        let store = with_bob(&mock).await;
        let first = mock.expect_gated(Method::POST, "/subscriptions/c/u2").await;
        let second = mock.expect_gated(Method::POST, "/subscriptions/c/u2").await;

        let a = tokio::spawn({
            let store = store.clone();
            async move { store.toggle_subscription(UserId::new("u2")).await }
        });
        mock.wait_for_calls(Method::POST, "/subscriptions/c/u2", 1)
            .await
            .unwrap();
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.toggle_subscription(UserId::new("u2")).await }
        });
        mock.wait_for_calls(Method::POST, "/subscriptions/c/u2", 2)
            .await
            .unwrap();

        second.release(Ok(ApiResponse::ok(json!({"subscribed": false}))));
        assert!(!b.await.unwrap().unwrap());
        first.release(Ok(ApiResponse::ok(json!({"subscribed": true}))));
        assert!(a.await.unwrap().unwrap());

        let snapshot = store.snapshot();
        assert!(!snapshot.is_subscribed(&UserId::new("u1"), &UserId::new("u2")));
        assert_eq!(bob_subscribers(&store), 3);
        assert_eq!(
            snapshot.status(EntityKind::Subscription, OperationKind::Toggle),
            OperationStatus::Success
        );
    }

    #[tokio::test]
    async fn toggle_requires_a_signed_in_user() {
        let mock = MockTransport::new();
        let store = store(&mock);
        assert_eq!(
            store.toggle_subscription(UserId::new("u2")).await,
            Err(ApiError::MissingIdentifier("subscriber id"))
        );
        assert!(mock.calls().await.is_empty());
    }

    #[tokio::test]
    async fn subscriber_list_replaces_edges() {
        let mock = MockTransport::new();
        let store = with_bob(&mock).await;
        mock.expect_ok(Method::POST, "/subscriptions/c/u2", json!({"subscribed": true}))
            .await;
        store.toggle_subscription(UserId::new("u2")).await.unwrap();

        mock.expect_ok(
            Method::GET,
            "/subscriptions/u/u1",
            json!([
                {"_id": "s9", "subscribedChannel": {"_id": "u3", "username": "carol", "fullName": "Carol"}, "createdAt": "2024-06-01T00:00:00Z"}
            ]),
        )
        .await;
        let edges = store.fetch_subscriptions(UserId::new("u1")).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].channel_id, UserId::new("u3"));

        let snapshot = store.snapshot();
        let channels: Vec<_> = snapshot
            .subscriptions_of(&UserId::new("u1"))
            .into_iter()
            .map(|edge| edge.channel_id.as_str())
            .collect();
        assert_eq!(channels, vec!["u3"]);
        assert_eq!(snapshot.user(&UserId::new("u3")).unwrap().username, "carol");
    }
}
