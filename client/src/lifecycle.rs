//! Request lifecycle flags.
//!
//! Every (entity kind, operation kind) pair has its own small state machine, so a
//! list fetch and a delete can be in flight at the same time without one clobbering
//! the other's status. Operations aimed at one entity also keep a flag per target id,
//! so the failure of one delete is still visible after a later delete of another
//! entity succeeded.

use crate::error::ApiError;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Channel,
    Video,
    Playlist,
    Subscription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    FetchList,
    FetchOne,
    Create,
    Update,
    Delete,
    /// Video uploads.
    Upload,
    AddVideo,
    RemoveVideo,
    Toggle,
    Login,
    Register,
    Logout,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum OperationStatus {
    #[default]
    Idle,
    Pending,
    Success,
    Error(ApiError),
}

impl OperationStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, OperationStatus::Pending)
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            OperationStatus::Error(e) => Some(e),
            _ => None,
        }
    }
}

/// The status of one (entity kind, operation kind) pair and the request that last set it.
#[derive(Debug, Clone, PartialEq, Default)]
struct Flag {
    status: OperationStatus,
    /// Issue sequence of the newest request of this kind.
    seq: u64,
}

impl Flag {
    fn begin(&mut self, seq: u64) {
        if seq >= self.seq {
            self.seq = seq;
            self.status = OperationStatus::Pending;
        }
    }

    fn settle(&mut self, seq: u64, outcome: Result<(), &ApiError>) {
        if seq < self.seq {
            return;
        }
        self.seq = seq;
        self.status = match outcome {
            Ok(()) => OperationStatus::Success,
            Err(e) => OperationStatus::Error(e.clone()),
        };
    }
}

/// All lifecycle flags of a store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Lifecycles {
    flags: HashMap<(EntityKind, OperationKind), Flag>,
    targets: HashMap<(EntityKind, OperationKind, String), Flag>,
}

impl Lifecycles {
    pub fn status(&self, entity: EntityKind, operation: OperationKind) -> OperationStatus {
        self.flags
            .get(&(entity, operation))
            .map(|flag| flag.status.clone())
            .unwrap_or_default()
    }

    /// The status of the newest request of this kind aimed at `target`.
    pub fn status_of(
        &self,
        entity: EntityKind,
        operation: OperationKind,
        target: &str,
    ) -> OperationStatus {
        self.targets
            .get(&(entity, operation, target.to_string()))
            .map(|flag| flag.status.clone())
            .unwrap_or_default()
    }

    /// Targets whose newest request of this kind failed, ordered by target id.
    pub fn failures(&self, entity: EntityKind, operation: OperationKind) -> Vec<(&str, &ApiError)> {
        let mut failed: Vec<_> = self
            .targets
            .iter()
            .filter(|((e, o, _), _)| *e == entity && *o == operation)
            .filter_map(|((_, _, target), flag)| Some((target.as_str(), flag.status.error()?)))
            .collect();
        failed.sort_by(|a, b| a.0.cmp(b.0));
        failed
    }

    /// Marks a newly issued request as pending.
    pub(crate) fn begin(
        &mut self,
        entity: EntityKind,
        operation: OperationKind,
        target: Option<&str>,
        seq: u64,
    ) {
        self.flags.entry((entity, operation)).or_default().begin(seq);
        if let Some(target) = target {
            self.targets
                .entry((entity, operation, target.to_string()))
                .or_default()
                .begin(seq);
        }
    }

    /// Records the outcome of request `seq`.
    ///
    /// Outcomes of requests older than the newest one issued for the same pair (or
    /// the same target) leave that flag alone: the newer request still owns it.
    pub(crate) fn settle(
        &mut self,
        entity: EntityKind,
        operation: OperationKind,
        target: Option<&str>,
        seq: u64,
        outcome: Result<(), &ApiError>,
    ) {
        self.flags
            .entry((entity, operation))
            .or_default()
            .settle(seq, outcome);
        if let Some(target) = target {
            self.targets
                .entry((entity, operation, target.to_string()))
                .or_default()
                .settle(seq, outcome);
        }
    }
}
