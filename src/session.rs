//! Decides which conversation a view is bound to.
//!
//! The resolver is a plain state machine: [`SessionResolver::plan`] picks a
//! branch and marks the identity as in flight, the caller performs the network
//! work, and [`SessionResolver::complete`] applies the result. Completions for
//! an identity that has since been replaced are ignored.

use std::collections::HashSet;

/// How the bound conversation was obtained. Diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    ResumedFromLink,
    ReusedEmpty,
    NewlyCreated,
}

/// What the view asked for when it mounted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewContext {
    /// Explicit conversation to resume.
    pub session_id: Option<String>,
    /// The view was opened as "new chat".
    pub start_fresh: bool,
}

impl ViewContext {
    #[must_use]
    pub fn resume(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            start_fresh: false,
        }
    }

    #[must_use]
    pub fn fresh() -> Self {
        Self {
            session_id: None,
            start_fresh: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionStatus {
    Idle,
    Resolving,
    Resolved,
    /// Recoverable; the message is suitable for a dismissible banner.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionPlan {
    /// Adopt `session_id` and load its persisted turns.
    Adopt { session_id: String },
    /// Ask the store for the caller's empty conversation.
    AcquireEmpty { origin: SessionOrigin },
    /// Nothing to do: the requested conversation is already bound.
    AlreadyBound { session_id: String },
    /// A resolution for this identity is still running.
    InFlight,
}

/// Permit to perform one planned resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionTicket {
    pub identity: String,
    pub plan: ResolutionPlan,
    generation: u64,
    /// Status before this ticket marked the resolver as resolving.
    prior_status: ResolutionStatus,
}

impl ResolutionTicket {
    /// True when the caller must perform network work and then call
    /// [`SessionResolver::complete`].
    pub fn needs_work(&self) -> bool {
        matches!(
            self.plan,
            ResolutionPlan::Adopt { .. } | ResolutionPlan::AcquireEmpty { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    session_id: String,
    origin: SessionOrigin,
}

#[derive(Debug)]
pub struct SessionResolver {
    identity: Option<String>,
    binding: Option<Binding>,
    status: ResolutionStatus,
    in_flight: HashSet<String>,
    generation: u64,
}

impl Default for SessionResolver {
    fn default() -> Self {
        Self {
            identity: None,
            binding: None,
            status: ResolutionStatus::Idle,
            in_flight: HashSet::new(),
            generation: 0,
        }
    }
}

impl SessionResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound_session(&self) -> Option<&str> {
        self.binding.as_ref().map(|binding| binding.session_id.as_str())
    }

    pub fn origin(&self) -> Option<SessionOrigin> {
        self.binding.as_ref().map(|binding| binding.origin)
    }

    pub fn status(&self) -> &ResolutionStatus {
        &self.status
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn is_in_flight(&self, identity: &str) -> bool {
        self.in_flight.contains(identity)
    }

    /// Switches to `identity`. Returns `true` when it differs from the current
    /// one, in which case the binding is dropped.
    pub fn observe_identity(&mut self, identity: &str) -> bool {
        if self.identity.as_deref() == Some(identity) {
            return false;
        }
        self.identity = Some(identity.to_string());
        self.binding = None;
        self.status = ResolutionStatus::Idle;
        self.generation += 1;
        true
    }

    /// Picks the resolution branch for `context`, in priority order: explicit
    /// session id, then the caller's empty conversation.
    pub fn plan(&mut self, identity: &str, context: &ViewContext) -> ResolutionTicket {
        self.observe_identity(identity);

        let requested = context
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());

        let plan = if self.in_flight.contains(identity) {
            ResolutionPlan::InFlight
        } else {
            match (requested, self.bound_session()) {
                (Some(requested), Some(bound)) if requested == bound => {
                    ResolutionPlan::AlreadyBound {
                        session_id: bound.to_string(),
                    }
                }
                (Some(requested), _) => ResolutionPlan::Adopt {
                    session_id: requested.to_string(),
                },
                (None, Some(bound)) => ResolutionPlan::AlreadyBound {
                    session_id: bound.to_string(),
                },
                (None, None) => ResolutionPlan::AcquireEmpty {
                    origin: if context.start_fresh {
                        SessionOrigin::NewlyCreated
                    } else {
                        SessionOrigin::ReusedEmpty
                    },
                },
            }
        };

        let ticket = ResolutionTicket {
            identity: identity.to_string(),
            plan,
            generation: self.generation,
            prior_status: self.status.clone(),
        };
        if ticket.needs_work() {
            self.in_flight.insert(identity.to_string());
            self.status = ResolutionStatus::Resolving;
        }
        ticket
    }

    /// Applies the outcome of a planned resolution. Returns `true` when the
    /// outcome was applied, `false` when the identity changed meanwhile.
    pub fn complete(
        &mut self,
        ticket: &ResolutionTicket,
        outcome: Result<String, String>,
    ) -> bool {
        if !ticket.needs_work() {
            return false;
        }
        self.in_flight.remove(&ticket.identity);
        if ticket.generation != self.generation {
            return false;
        }

        let origin = match &ticket.plan {
            ResolutionPlan::Adopt { .. } => SessionOrigin::ResumedFromLink,
            ResolutionPlan::AcquireEmpty { origin } => *origin,
            ResolutionPlan::AlreadyBound { .. } | ResolutionPlan::InFlight => return false,
        };

        match outcome {
            Ok(session_id) => {
                self.binding = Some(Binding { session_id, origin });
                self.status = ResolutionStatus::Resolved;
            }
            Err(message) => {
                self.binding = None;
                self.status = ResolutionStatus::Failed(message);
            }
        }
        true
    }

    /// Gives up a planned resolution without applying anything.
    pub fn abandon(&mut self, ticket: &ResolutionTicket) {
        if !ticket.needs_work() {
            return;
        }
        self.in_flight.remove(&ticket.identity);
        if ticket.generation == self.generation && self.status == ResolutionStatus::Resolving {
            self.status = ticket.prior_status.clone();
        }
    }

    /// Binds a conversation obtained outside the planned branches.
    ///
    /// Resolutions already in flight are superseded and will not complete.
    pub fn bind_external(&mut self, identity: &str, session_id: String, origin: SessionOrigin) {
        if !self.observe_identity(identity) {
            self.generation += 1;
        }
        self.binding = Some(Binding { session_id, origin });
        self.status = ResolutionStatus::Resolved;
    }

    /// Drops the binding, as when the bound conversation is deleted.
    pub fn unbind(&mut self) {
        self.binding = None;
        self.status = ResolutionStatus::Idle;
    }

    pub fn clear_error(&mut self) {
        if matches!(self.status, ResolutionStatus::Failed(_)) {
            self.status = ResolutionStatus::Idle;
        }
    }
}
