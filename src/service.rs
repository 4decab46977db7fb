//! Caller-facing façade: resolves the acting user and turns slot conflicts
//! into a list of alternatives instead of a bare error.

use std::sync::Arc;

use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;

/// Supplies the actor for every guarded operation.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_actor(&self) -> Actor;
}

/// An identity fixed at construction, for tools and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticIdentity(pub Actor);

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_actor(&self) -> Actor {
        self.0
    }
}

#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// The slot was taken or too close to another booking.
    Conflict {
        error: EngineError,
        suggestions: Vec<TimeSlot>,
    },
    Failed(EngineError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn into_result(self) -> Result<T, EngineError> {
        match self {
            Outcome::Success(v) => Ok(v),
            Outcome::Conflict { error, .. } | Outcome::Failed(error) => Err(error),
        }
    }

    pub fn suggestions(&self) -> &[TimeSlot] {
        match self {
            Outcome::Conflict { suggestions, .. } => suggestions,
            _ => &[],
        }
    }
}

pub struct BookingService {
    engine: Arc<Engine>,
    identity: Arc<dyn IdentityProvider>,
}

impl BookingService {
    pub fn new(engine: Arc<Engine>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { engine, identity }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn book(
        &self,
        professional_id: Ulid,
        slot_id: Ulid,
        patient_id: Ulid,
        reason: Option<String>,
    ) -> Outcome<Appointment> {
        let actor = self.identity.current_actor().await;
        match self
            .engine
            .book(&actor, professional_id, slot_id, patient_id, reason)
            .await
        {
            Ok(appointment) => Outcome::Success(appointment),
            Err(error) if error.is_slot_conflict() => {
                // Look a little before the requested time too; never in the past.
                let now = self.engine.now();
                let from = conflict_span(&error)
                    .map_or(now, |span| (span.start - DAY_MS).max(now));
                let suggestions = self.engine.suggest(professional_id, from, None, None).await;
                Outcome::Conflict { error, suggestions }
            }
            Err(error) => Outcome::Failed(error),
        }
    }

    pub async fn reschedule(&self, appointment_id: Ulid, new_slot_id: Ulid) -> Outcome<Appointment> {
        let actor = self.identity.current_actor().await;
        match self.engine.reschedule(&actor, appointment_id, new_slot_id).await {
            Ok(appointment) => Outcome::Success(appointment),
            Err(error) if error.is_slot_conflict() => {
                let suggestions = match self.engine.get_appointment(appointment_id).await {
                    Some(current) => {
                        self.engine
                            .suggest(current.professional_id, self.engine.now(), current.slot_id, None)
                            .await
                    }
                    None => Vec::new(),
                };
                Outcome::Conflict { error, suggestions }
            }
            Err(error) => Outcome::Failed(error),
        }
    }

    pub async fn cancel(&self, appointment_id: Ulid) -> Outcome<Appointment> {
        self.change_status(appointment_id, AppointmentStatus::Cancelled)
            .await
    }

    pub async fn change_status(&self, appointment_id: Ulid, to: AppointmentStatus) -> Outcome<Appointment> {
        let actor = self.identity.current_actor().await;
        match self.engine.change_status(&actor, appointment_id, to).await {
            Ok(appointment) => Outcome::Success(appointment),
            Err(error) => Outcome::Failed(error),
        }
    }

    pub async fn suggest(
        &self,
        professional_id: Ulid,
        from: Ms,
        exclude_slot_id: Option<Ulid>,
        limit: Option<usize>,
    ) -> Outcome<Vec<TimeSlot>> {
        Outcome::Success(
            self.engine
                .suggest(professional_id, from, exclude_slot_id, limit)
                .await,
        )
    }
}

fn conflict_span(error: &EngineError) -> Option<Span> {
    match error {
        EngineError::SlotConflict { span, .. } | EngineError::BufferConflict { span, .. } => Some(*span),
        _ => None,
    }
}
