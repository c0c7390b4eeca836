//! Per-resource latches that keep side-effecting calls from repeating.
//!
//! A latch fires once per identifier. A failed call re-arms it for exactly one
//! retry; after that the identifier stays latched until it is released or a
//! different identifier comes into view.

use std::collections::BTreeMap;

/// Side effect guarded by a latch set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    IdeaView,
    UpvoteStatus,
    EmptySession,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdeaView => "idea-view",
            Self::UpvoteStatus => "upvote-status",
            Self::EmptySession => "empty-session",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchState {
    Unarmed,
    /// Call issued; later attempts are suppressed.
    Armed,
    /// Call failed; one more attempt is allowed.
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct Latch {
    state: LatchState,
    retried: bool,
}

/// Latch for the one resource of a kind currently in view.
///
/// Arming a different id drops the previous id's latch, so returning to an
/// earlier id fires again.
#[derive(Debug, Clone)]
pub struct LatchSet {
    kind: ResourceKind,
    current: Option<(String, Latch)>,
}

impl LatchSet {
    #[must_use]
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            current: None,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Id whose latch is currently held, if any.
    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|(id, _)| id.as_str())
    }

    /// Returns `true` and arms the latch when the call may go out.
    pub fn should_fire(&mut self, resource_id: &str) -> bool {
        if self.current_id() != Some(resource_id) {
            self.current = Some((
                resource_id.to_string(),
                Latch {
                    state: LatchState::Unarmed,
                    retried: false,
                },
            ));
        }
        let Some((_, latch)) = self.current.as_mut() else {
            return false;
        };

        match latch.state {
            LatchState::Unarmed => {
                latch.state = LatchState::Armed;
                true
            }
            LatchState::Failed => {
                latch.state = LatchState::Armed;
                latch.retried = true;
                true
            }
            LatchState::Armed => false,
        }
    }

    /// Records a failed call. Returns `true` when a retry is now permitted.
    pub fn mark_failed(&mut self, resource_id: &str) -> bool {
        match self.latch_mut(resource_id) {
            Some(latch) if latch.state == LatchState::Armed && !latch.retried => {
                latch.state = LatchState::Failed;
                true
            }
            _ => false,
        }
    }

    /// Forgets the latch, as when its view goes away.
    pub fn release(&mut self, resource_id: &str) {
        if self.current_id() == Some(resource_id) {
            self.current = None;
        }
    }

    pub fn release_all(&mut self) {
        self.current = None;
    }

    pub fn state(&self, resource_id: &str) -> LatchState {
        match &self.current {
            Some((id, latch)) if id == resource_id => latch.state,
            _ => LatchState::Unarmed,
        }
    }

    fn latch_mut(&mut self, resource_id: &str) -> Option<&mut Latch> {
        match self.current.as_mut() {
            Some((id, latch)) if id == resource_id => Some(latch),
            _ => None,
        }
    }
}

/// One private [`LatchSet`] per [`ResourceKind`].
#[derive(Debug, Clone, Default)]
pub struct IdempotencyGuard {
    sets: BTreeMap<ResourceKind, LatchSet>,
}

impl IdempotencyGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_fire(&mut self, kind: ResourceKind, resource_id: &str) -> bool {
        self.set_mut(kind).should_fire(resource_id)
    }

    pub fn mark_failed(&mut self, kind: ResourceKind, resource_id: &str) -> bool {
        self.set_mut(kind).mark_failed(resource_id)
    }

    pub fn release(&mut self, kind: ResourceKind, resource_id: &str) {
        self.set_mut(kind).release(resource_id);
    }

    pub fn release_kind(&mut self, kind: ResourceKind) {
        self.set_mut(kind).release_all();
    }

    pub fn state(&self, kind: ResourceKind, resource_id: &str) -> LatchState {
        self.sets
            .get(&kind)
            .map_or(LatchState::Unarmed, |set| set.state(resource_id))
    }

    fn set_mut(&mut self, kind: ResourceKind) -> &mut LatchSet {
        self.sets.entry(kind).or_insert_with(|| LatchSet::new(kind))
    }
}
