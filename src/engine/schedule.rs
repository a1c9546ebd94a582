//! Weekly availability slots: mutation, overlap enforcement, and the
//! zone-aware "is the teacher free right now" queries.

use time::{Duration, OffsetDateTime, Time};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Bounds check shared by add and update: ordered times inside the
/// 07:00–21:00 timeline.
pub(super) fn validate_slot_times(start: Time, end: Time) -> Result<(), EngineError> {
    if start >= end {
        return Err(EngineError::Bounds("slot start must precede its end"));
    }
    if start < SLOT_EARLIEST {
        return Err(EngineError::Bounds("slot starts before 07:00"));
    }
    if end > SLOT_LATEST {
        return Err(EngineError::Bounds("slot ends after 21:00"));
    }
    Ok(())
}

/// First slot the candidate overlaps, skipping `exclude` (the slot being
/// edited compares against everyone but itself).
pub(super) fn find_overlap(
    slots: &[AvailabilitySlot],
    candidate: &AvailabilitySlot,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    slots
        .iter()
        .filter(|s| Some(s.id) != exclude)
        .find(|s| s.overlaps(candidate))
        .map(|s| s.id)
}

impl Engine {
    /// Validate the caller is a known teacher.
    pub(super) async fn require_teacher(&self, user: UserId) -> Result<(), EngineError> {
        if !self.directory.user_exists(user).await {
            return Err(EngineError::UnknownUser(user));
        }
        if !self.directory.is_teacher(user).await {
            return Err(EngineError::NotTeacher(user));
        }
        Ok(())
    }

    /// Add a weekly slot. Rejects anything overlapping an existing slot of
    /// the same teacher on the same day.
    pub async fn add_slot(
        &self,
        teacher_id: UserId,
        day: time::Weekday,
        start: Time,
        end: Time,
    ) -> Result<Ulid, EngineError> {
        self.require_teacher(teacher_id).await?;
        validate_slot_times(start, end)?;

        let sched = self.ensure_schedule(teacher_id);
        let mut guard = sched.write().await;
        if guard.slots.len() >= MAX_SLOTS_PER_TEACHER {
            return Err(EngineError::LimitExceeded("too many slots for teacher"));
        }

        let id = Ulid::new();
        let candidate = AvailabilitySlot {
            id,
            day,
            start,
            end,
        };
        if let Some(existing) = find_overlap(&guard.slots, &candidate, None) {
            return Err(EngineError::Overlap(existing));
        }

        let event = Event::SlotAdded {
            id,
            teacher_id,
            day,
            start,
            end,
        };
        self.persist_and_apply_schedule(&mut guard, &event).await?;
        Ok(id)
    }

    /// Change the times of an existing slot. The day stays fixed; the
    /// overlap check compares against every slot except the edited one.
    pub async fn update_slot(
        &self,
        teacher_id: UserId,
        slot_id: Ulid,
        start: Time,
        end: Time,
    ) -> Result<(), EngineError> {
        self.require_teacher(teacher_id).await?;
        validate_slot_times(start, end)?;

        let owner = self
            .slot_owner
            .get(&slot_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(slot_id))?;
        if owner != teacher_id {
            return Err(EngineError::NotOwner(slot_id));
        }

        let sched = self
            .get_schedule(teacher_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = sched.write().await;
        let day = guard
            .slots
            .iter()
            .find(|s| s.id == slot_id)
            .map(|s| s.day)
            .ok_or(EngineError::NotFound(slot_id))?;

        let candidate = AvailabilitySlot {
            id: slot_id,
            day,
            start,
            end,
        };
        if let Some(existing) = find_overlap(&guard.slots, &candidate, Some(slot_id)) {
            return Err(EngineError::Overlap(existing));
        }

        let event = Event::SlotUpdated {
            id: slot_id,
            teacher_id,
            day,
            start,
            end,
        };
        self.persist_and_apply_schedule(&mut guard, &event).await
    }

    /// Delete a slot.
    pub async fn remove_slot(&self, teacher_id: UserId, slot_id: Ulid) -> Result<(), EngineError> {
        self.require_teacher(teacher_id).await?;

        let owner = self
            .slot_owner
            .get(&slot_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(slot_id))?;
        if owner != teacher_id {
            return Err(EngineError::NotOwner(slot_id));
        }

        let sched = self
            .get_schedule(teacher_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = sched.write().await;
        let event = Event::SlotRemoved {
            id: slot_id,
            teacher_id,
        };
        self.persist_and_apply_schedule(&mut guard, &event).await
    }

    /// Whether the instant falls inside one of the teacher's weekly windows,
    /// evaluated in the teacher's own zone.
    pub async fn is_available(
        &self,
        teacher_id: UserId,
        at: OffsetDateTime,
    ) -> Result<bool, EngineError> {
        if !self.directory.user_exists(teacher_id).await {
            return Err(EngineError::UnknownUser(teacher_id));
        }
        let Some(sched) = self.get_schedule(teacher_id) else {
            return Ok(false);
        };
        let local = at.to_offset(self.directory.utc_offset(teacher_id).await);
        let guard = sched.read().await;
        Ok(guard
            .slots
            .iter()
            .any(|s| s.contains(local.weekday(), local.time())))
    }

    /// All slots of a teacher, in `(day, start)` order.
    pub async fn list_slots(&self, teacher_id: UserId) -> Vec<SlotInfo> {
        let Some(sched) = self.get_schedule(teacher_id) else {
            return Vec::new();
        };
        let guard = sched.read().await;
        guard
            .slots
            .iter()
            .map(|s| SlotInfo {
                id: s.id,
                teacher_id,
                day: s.day,
                start: s.start,
                end: s.end,
            })
            .collect()
    }

    /// Slots of a teacher on one weekday, for rendering a day timeline.
    pub async fn day_timeline(&self, teacher_id: UserId, day: time::Weekday) -> Vec<SlotInfo> {
        let Some(sched) = self.get_schedule(teacher_id) else {
            return Vec::new();
        };
        let guard = sched.read().await;
        guard
            .slots_on(day)
            .map(|s| SlotInfo {
                id: s.id,
                teacher_id,
                day: s.day,
                start: s.start,
                end: s.end,
            })
            .collect()
    }

    /// The next window at or after `from`, searching one week ahead in the
    /// teacher's zone. A window already in progress comes back with
    /// `starts_at` equal to the queried instant.
    pub async fn next_window(
        &self,
        teacher_id: UserId,
        from: OffsetDateTime,
    ) -> Result<Option<UpcomingWindow>, EngineError> {
        if !self.directory.user_exists(teacher_id).await {
            return Err(EngineError::UnknownUser(teacher_id));
        }
        let Some(sched) = self.get_schedule(teacher_id) else {
            return Ok(None);
        };
        let offset = self.directory.utc_offset(teacher_id).await;
        let local = from.to_offset(offset);
        let guard = sched.read().await;

        // Day 7 is today's weekday again: a slot that already ended today
        // recurs there, one week out.
        for days_ahead in 0..=7 {
            let date = local.date() + Duration::days(days_ahead);
            for slot in guard.slots_on(date.weekday()) {
                if days_ahead == 0 && slot.end <= local.time() {
                    continue; // already over today
                }
                let starts_at = if days_ahead == 0 && slot.start <= local.time() {
                    local
                } else {
                    date.with_time(slot.start).assume_offset(offset)
                };
                return Ok(Some(UpcomingWindow {
                    day: slot.day,
                    start: slot.start,
                    end: slot.end,
                    starts_at,
                }));
            }
        }
        Ok(None)
    }
}
