use super::{CacheState, EntityKey, EntityStore, require};
use crate::endpoints;
use crate::error::ApiError;
use crate::forms::{PlaylistDraft, PlaylistEdit};
use crate::lifecycle::{EntityKind, OperationKind};
use crate::model::{Playlist, PlaylistId, PlaylistPayload, UserId, VideoId};
use crate::transport::ApiResponse;
use tracing::instrument;

/// Some playlist routes answer with a one-element array instead of the playlist itself.
fn decode_playlist(response: ApiResponse, what: &str) -> Result<PlaylistPayload, ApiError> {
    match response.data {
        serde_json::Value::Array(mut items) => {
            if items.is_empty() {
                return Err(ApiError::NotFound(format!("{what}: empty response")));
            }
            serde_json::from_value(items.swap_remove(0)).map_err(|e| ApiError::decode(what, e))
        }
        data => serde_json::from_value(data).map_err(|e| ApiError::decode(what, e)),
    }
}

impl CacheState {
    fn put_playlist(&mut self, seq: u64, payload: &PlaylistPayload) -> bool {
        if !self.admit(EntityKey::Playlist(payload.id.clone()), seq) {
            return false;
        }
        let (playlist, embedded) = payload.clone().into_parts(self.playlists.get(&payload.id));
        for video in &embedded {
            self.put_video(seq, video);
        }
        if let Some(owner) = &playlist.owner {
            let owned = self.user_playlists.entry(owner.id.clone()).or_default();
            if !owned.contains(&playlist.id) {
                owned.push(playlist.id.clone());
            }
        }
        self.playlists.insert(playlist.id.clone(), playlist);
        true
    }

    fn put_user_playlists(&mut self, seq: u64, user: &UserId, payloads: &[PlaylistPayload]) {
        if !self.admit(EntityKey::UserPlaylists(user.clone()), seq) {
            return;
        }
        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            self.put_playlist(seq, payload);
            if !ids.contains(&payload.id) {
                ids.push(payload.id.clone());
            }
        }
        self.user_playlists.insert(user.clone(), ids);
    }

    /// Applies a membership change locally when the server did not send the playlist back.
    fn edit_playlist_videos(
        &mut self,
        seq: u64,
        id: &PlaylistId,
        edit: impl FnOnce(&mut Playlist) -> bool,
    ) {
        if !self.admit(EntityKey::Playlist(id.clone()), seq) {
            return;
        }
        if let Some(playlist) = self.playlists.get_mut(id) {
            edit(playlist);
        }
    }

    /// Drops the cached copy of a playlist the server no longer knows.
    fn evict_playlist(&mut self, seq: u64, id: &PlaylistId) {
        if self.admit(EntityKey::Playlist(id.clone()), seq) {
            self.playlists.remove(id);
        }
    }

    fn remove_playlist(&mut self, seq: u64, id: &PlaylistId) {
        if !self.admit(EntityKey::Playlist(id.clone()), seq) {
            return;
        }
        self.playlists.remove(id);
        for owned in self.user_playlists.values_mut() {
            owned.retain(|owned| owned != id);
        }
    }
}

fn evict_missing(id: &PlaylistId) -> impl FnOnce(&mut CacheState, u64, &ApiError) + '_ {
    move |state, seq, e| {
        if matches!(e, ApiError::NotFound(_)) {
            state.evict_playlist(seq, id);
        }
    }
}

/// What a playlist mutation answered with.
#[derive(Debug, Clone)]
enum Confirmed {
    Playlist(PlaylistPayload),
    /// A success without a playlist body.
    Bare,
}

impl Confirmed {
    fn from_response(response: ApiResponse, what: &str) -> Self {
        match decode_playlist(response, what) {
            Ok(payload) => Confirmed::Playlist(payload),
            Err(e) => {
                tracing::trace!(error = %e, "mutation response carried no playlist");
                Confirmed::Bare
            }
        }
    }
}

impl EntityStore {
    /// Creates a playlist, optionally putting a first video in it.
    #[instrument(skip(self))]
    pub async fn create_playlist(&self, draft: PlaylistDraft) -> Result<Playlist, ApiError> {
        let owner = self.session().current_user().map(|user| user.as_owner());
        let ticket = self.issue(EntityKind::Playlist, OperationKind::Create);
        let result = self
            .send(endpoints::create_playlist(&draft))
            .await
            .and_then(|response| decode_playlist(response, "created playlist"))
            .map(|mut payload| {
                if payload.owner.is_none() {
                    payload.owner = owner;
                }
                payload
            });
        let payload = self.complete(ticket, result, |state, seq, payload| {
            state.put_playlist(seq, payload);
        })?;
        tracing::debug!(playlist_id = %payload.id, "created playlist");

        let id = payload.id.clone();
        if let Some(video) = draft.first_video {
            let already_there = self
                .snapshot()
                .playlist(&id)
                .is_some_and(|playlist| playlist.videos.contains(&video));
            if !already_there {
                return self.add_video_to_playlist(video, id).await;
            }
        }
        let (playlist, _) = payload.into_parts(self.snapshot().playlist(&id));
        Ok(playlist)
    }

    /// Fetches every playlist `user` owns.
    #[instrument(skip(self))]
    pub async fn fetch_user_playlists(&self, user: UserId) -> Result<Vec<Playlist>, ApiError> {
        require(user.is_blank(), "user id")?;
        let ticket = self.issue_for(EntityKind::Playlist, OperationKind::FetchList, &user);
        let result = self
            .send(endpoints::user_playlists(&user))
            .await
            .and_then(|response| response.decode::<Vec<PlaylistPayload>>("user playlists"));
        let payloads = self.complete(ticket, result, |state, seq, payloads| {
            state.put_user_playlists(seq, &user, payloads);
        })?;
        tracing::debug!(user_id = %user, count = payloads.len(), "fetched playlists");
        Ok(payloads
            .into_iter()
            .map(|payload| payload.into_parts(None).0)
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn fetch_playlist(&self, id: PlaylistId) -> Result<Playlist, ApiError> {
        require(id.is_blank(), "playlist id")?;
        let ticket = self.issue_for(EntityKind::Playlist, OperationKind::FetchOne, &id);
        let result = self
            .send(endpoints::playlist(&id))
            .await
            .and_then(|response| decode_playlist(response, "playlist"));
        let payload = self.complete_or(
            ticket,
            result,
            |state, seq, payload| {
                state.put_playlist(seq, payload);
            },
            evict_missing(&id),
        )?;
        tracing::debug!(playlist_id = %id, "fetched playlist");
        Ok(payload.into_parts(None).0)
    }

    /// Adds `video` to `playlist`. Adding a video that is already there changes nothing.
    #[instrument(skip(self))]
    pub async fn add_video_to_playlist(
        &self,
        video: VideoId,
        playlist: PlaylistId,
    ) -> Result<Playlist, ApiError> {
        require(video.is_blank(), "video id")?;
        require(playlist.is_blank(), "playlist id")?;
        let ticket = self.issue_for(EntityKind::Playlist, OperationKind::AddVideo, &playlist);
        let result = self
            .send(endpoints::add_video_to_playlist(&video, &playlist))
            .await
            .map(|response| Confirmed::from_response(response, "playlist"));
        self.complete_or(
            ticket,
            result,
            |state, seq, confirmed| match confirmed {
                Confirmed::Playlist(payload) => {
                    state.put_playlist(seq, payload);
                }
                Confirmed::Bare => {
                    state.edit_playlist_videos(seq, &playlist, |cached| cached.add_video(video.clone()));
                }
            },
            evict_missing(&playlist),
        )?;
        tracing::debug!(playlist_id = %playlist, video_id = %video, "added video to playlist");
        self.cached_playlist(&playlist)
    }

    #[instrument(skip(self))]
    pub async fn remove_video_from_playlist(
        &self,
        video: VideoId,
        playlist: PlaylistId,
    ) -> Result<Playlist, ApiError> {
        require(video.is_blank(), "video id")?;
        require(playlist.is_blank(), "playlist id")?;
        let ticket = self.issue_for(EntityKind::Playlist, OperationKind::RemoveVideo, &playlist);
        let result = self
            .send(endpoints::remove_video_from_playlist(&video, &playlist))
            .await
            .map(|response| Confirmed::from_response(response, "playlist"));
        self.complete_or(
            ticket,
            result,
            |state, seq, confirmed| match confirmed {
                Confirmed::Playlist(payload) => {
                    state.put_playlist(seq, payload);
                }
                Confirmed::Bare => {
                    state.edit_playlist_videos(seq, &playlist, |cached| cached.remove_video(&video));
                }
            },
            evict_missing(&playlist),
        )?;
        tracing::debug!(playlist_id = %playlist, video_id = %video, "removed video from playlist");
        self.cached_playlist(&playlist)
    }

    #[instrument(skip(self))]
    pub async fn update_playlist(
        &self,
        id: PlaylistId,
        edit: PlaylistEdit,
    ) -> Result<Playlist, ApiError> {
        require(id.is_blank(), "playlist id")?;
        let ticket = self.issue_for(EntityKind::Playlist, OperationKind::Update, &id);
        let result = self
            .send(endpoints::update_playlist(&id, &edit))
            .await
            .map(|response| Confirmed::from_response(response, "updated playlist"));
        self.complete_or(
            ticket,
            result,
            |state, seq, confirmed| match confirmed {
                Confirmed::Playlist(payload) => {
                    state.put_playlist(seq, payload);
                }
                Confirmed::Bare => {
                    state.edit_playlist_videos(seq, &id, |cached| {
                        if let Some(name) = &edit.name {
                            cached.name = name.clone();
                        }
                        if let Some(description) = &edit.description {
                            cached.description = description.clone();
                        }
                        true
                    });
                }
            },
            evict_missing(&id),
        )?;
        tracing::debug!(playlist_id = %id, "updated playlist");
        self.cached_playlist(&id)
    }

    /// Deletes a playlist once the server confirms it.
    #[instrument(skip(self))]
    pub async fn delete_playlist(&self, id: PlaylistId) -> Result<(), ApiError> {
        require(id.is_blank(), "playlist id")?;
        let ticket = self.issue_for(EntityKind::Playlist, OperationKind::Delete, &id);
        let result = self.send(endpoints::delete_playlist(&id)).await.map(|_| ());
        self.complete_or(
            ticket,
            result,
            |state, seq, _| state.remove_playlist(seq, &id),
            evict_missing(&id),
        )?;
        tracing::debug!(playlist_id = %id, "deleted playlist");
        Ok(())
    }

    /// The cached copy after a confirmed mutation.
    ///
    /// If the playlist was never fetched and the server sent no body, there is nothing to
    /// return and the caller should fetch it.
    fn cached_playlist(&self, id: &PlaylistId) -> Result<Playlist, ApiError> {
        self.snapshot()
            .playlist(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("playlist {id} is not cached")))
    }
}
