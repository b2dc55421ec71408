use super::{CacheState, EntityKey, EntityStore, Ticket, require};
use crate::endpoints;
use crate::error::ApiError;
use crate::forms::{Credentials, ProfileUpdate, RegisterForm};
use crate::lifecycle::{EntityKind, OperationKind};
use crate::model::{ChannelProfile, User, UserId};
use crate::transport::{ApiRequest, FileUpload};
use tracing::instrument;

impl CacheState {
    pub(super) fn put_user(&mut self, seq: u64, user: &User) -> bool {
        if !self.admit(EntityKey::User(user.id.clone()), seq) {
            return false;
        }
        self.users
            .entry(user.id.clone())
            .and_modify(|cached| cached.merge(user.clone()))
            .or_insert_with(|| user.clone());
        true
    }

    /// Copies `user`'s display fields into every cached video and playlist it owns.
    fn propagate_owner(&mut self, user: &User) {
        let owners = self
            .videos
            .values_mut()
            .filter_map(|video| video.owner.as_mut())
            .chain(
                self.playlists
                    .values_mut()
                    .filter_map(|playlist| playlist.owner.as_mut()),
            );
        let mut touched = 0usize;
        for owner in owners.filter(|owner| owner.describes(user)) {
            owner.refresh_from(user);
            touched += 1;
        }
        tracing::trace!(user_id = %user.id, touched, "refreshed owner copies");
    }

    fn put_channel(&mut self, seq: u64, username: &str, profile: &ChannelProfile, viewer: Option<&UserId>) {
        if !self.admit(EntityKey::ChannelName(username.to_string()), seq) {
            return;
        }
        self.put_user(seq, &profile.user);
        self.channels.insert(profile.user.id.clone(), profile.stats);
        if let Some(viewer) = viewer {
            self.record_edge(seq, viewer, &profile.user.id, profile.stats.is_subscribed, None);
        }
    }

    fn forget_channel(&mut self, seq: u64, username: &str) {
        if !self.admit(EntityKey::ChannelName(username.to_string()), seq) {
            return;
        }
        if let Some(id) = self.user_by_username(username).map(|user| user.id.clone()) {
            self.channels.remove(&id);
        }
    }
}

impl EntityStore {
    #[instrument(skip(self))]
    pub async fn login(&self, credentials: Credentials) -> Result<User, ApiError> {
        let ticket = self.issue(EntityKind::User, OperationKind::Login);
        let result = self.session().login(credentials).await;
        self.complete(ticket, result, |state, seq, user| {
            state.put_user(seq, user);
        })
    }

    #[instrument(skip(self))]
    pub async fn register(&self, form: RegisterForm) -> Result<User, ApiError> {
        let ticket = self.issue(EntityKind::User, OperationKind::Register);
        let result = self.session().register(form).await;
        self.complete(ticket, result, |state, seq, user| {
            state.put_user(seq, user);
        })
    }

    /// Ends the session. Cached entities stay; call [`reset`](Self::reset) to drop them.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), ApiError> {
        let ticket = self.issue(EntityKind::User, OperationKind::Logout);
        let result = self.session().logout().await;
        self.complete(ticket, result, |_, _, _| {})
    }

    #[instrument(skip(self))]
    pub async fn fetch_current_user(&self) -> Result<User, ApiError> {
        let ticket = self.issue(EntityKind::User, OperationKind::FetchOne);
        let result = self
            .send(endpoints::current_user())
            .await
            .and_then(|response| response.decode::<User>("current user"));
        let user = self.complete_current_user(ticket, result).await?;
        tracing::debug!(user_id = %user.id, "fetched current user");
        Ok(user)
    }

    /// Changes the signed-in user's account details.
    ///
    /// The new display fields show up in the session's current user and in every
    /// cached video or playlist the user owns.
    #[instrument(skip(self))]
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User, ApiError> {
        self.change_profile(endpoints::update_account(&update)).await
    }

    #[instrument(skip(self))]
    pub async fn update_avatar(&self, file: FileUpload) -> Result<User, ApiError> {
        self.change_profile(endpoints::avatar(file)).await
    }

    #[instrument(skip(self))]
    pub async fn update_cover_image(&self, file: FileUpload) -> Result<User, ApiError> {
        self.change_profile(endpoints::cover_image(file)).await
    }

    async fn change_profile(&self, request: ApiRequest) -> Result<User, ApiError> {
        let ticket = self.issue(EntityKind::User, OperationKind::Update);
        let result = self
            .send(request)
            .await
            .and_then(|response| response.decode::<User>("updated user"));
        let user = self.complete_current_user(ticket, result).await?;
        tracing::debug!(user_id = %user.id, "profile updated");
        Ok(user)
    }

    /// Caches a fresh copy of the signed-in user and mirrors it into the session.
    ///
    /// A response that lost the race to a later-issued one touches neither.
    async fn complete_current_user(
        &self,
        ticket: Ticket,
        result: Result<User, ApiError>,
    ) -> Result<User, ApiError> {
        let issued = ticket.seq;
        let mut admitted = false;
        let user = self.complete(ticket, result, |state, seq, user| {
            if state.put_user(seq, user) {
                state.propagate_owner(user);
                admitted = true;
            }
        })?;
        if admitted {
            self.session().replace_current_user(user.clone(), issued).await;
        }
        Ok(user)
    }

    /// Fetches the channel page data for `username`.
    #[instrument(skip(self))]
    pub async fn fetch_channel(&self, username: &str) -> Result<ChannelProfile, ApiError> {
        require(username.trim().is_empty(), "username")?;
        let viewer = self.session().current_user().map(|user| user.id);
        let ticket = self.issue_for(EntityKind::Channel, OperationKind::FetchOne, username);
        let result = self
            .send(endpoints::channel(username))
            .await
            .and_then(|response| response.decode::<ChannelProfile>("channel"));
        let profile = self.complete_or(
            ticket,
            result,
            |state, seq, profile| state.put_channel(seq, username, profile, viewer.as_ref()),
            |state, seq, e| {
                if matches!(e, ApiError::NotFound(_)) {
                    state.forget_channel(seq, username);
                }
            },
        )?;
        tracing::debug!(channel = %profile.user.id, subscribers = profile.stats.subscribers_count, "fetched channel");
        Ok(profile)
    }
}
