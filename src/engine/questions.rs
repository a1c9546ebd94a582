//! Question authoring and lifecycle. The open/closed decision lives in
//! [`open_state`]; everything else funnels through it.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Where a question sits in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    /// Accepting submissions.
    Open,
    /// Window has not started yet (or the question was never activated).
    Scheduled,
    /// Window ran out; late submissions may still be allowed.
    Expired,
    /// The one-way close fired. Terminal.
    Closed,
}

/// Lifecycle state machine. The close flag always wins; a manual activation
/// overrides the window; the window itself is inclusive on both ends.
pub fn open_state(question: &QuestionState, now: OffsetDateTime) -> OpenState {
    if question.close_triggered {
        return OpenState::Closed;
    }
    if question.def.manual_active {
        return OpenState::Open;
    }
    if let Some(start) = question.def.start_at
        && now < start
    {
        return OpenState::Scheduled;
    }
    if let Some(end) = question.def.end_at
        && now > end
    {
        return OpenState::Expired;
    }
    if question.def.start_at.is_none() && question.def.end_at.is_none() {
        // No window and no activation: never opened
        return OpenState::Scheduled;
    }
    OpenState::Open
}

fn validate_spec(spec: &QuestionSpec) -> Result<(), EngineError> {
    if spec.body.trim().is_empty() {
        return Err(EngineError::Bounds("question body is empty"));
    }
    if spec.body.len() > MAX_BODY_LEN {
        return Err(EngineError::LimitExceeded("question body too long"));
    }
    if let Some(ref title) = spec.title
        && title.len() > MAX_TITLE_LEN
    {
        return Err(EngineError::LimitExceeded("question title too long"));
    }
    if let Some(ref expected) = spec.expected_answer
        && expected.len() > MAX_ANSWER_LEN
    {
        return Err(EngineError::LimitExceeded("expected answer too long"));
    }
    if let (Some(start), Some(end)) = (spec.start_at, spec.end_at)
        && start >= end
    {
        return Err(EngineError::Bounds("start_at must precede end_at"));
    }

    if spec.kind.takes_options() {
        if spec.options.len() < 2 {
            return Err(EngineError::Bounds("choice question needs at least two options"));
        }
        if spec.options.len() > MAX_OPTIONS_PER_QUESTION {
            return Err(EngineError::LimitExceeded("too many options"));
        }
        if spec.kind == QuestionKind::TrueFalse && spec.options.len() != 2 {
            return Err(EngineError::Bounds("true/false takes exactly two options"));
        }
        for (i, opt) in spec.options.iter().enumerate() {
            if opt.key.trim().is_empty() || opt.key.len() > MAX_OPTION_KEY_LEN {
                return Err(EngineError::Bounds("bad option key"));
            }
            if opt.text.len() > MAX_OPTION_TEXT_LEN {
                return Err(EngineError::LimitExceeded("option text too long"));
            }
            if spec.options[..i]
                .iter()
                .any(|prev| prev.key.eq_ignore_ascii_case(&opt.key))
            {
                return Err(EngineError::Bounds("duplicate option key"));
            }
        }
        if spec.kind == QuestionKind::TrueFalse && spec.allow_multiple_selections {
            return Err(EngineError::Bounds("true/false takes a single selection"));
        }
        if spec.kind != QuestionKind::Poll
            && !spec.allow_multiple_selections
            && spec.options.iter().filter(|o| o.correct).count() > 1
        {
            return Err(EngineError::Bounds(
                "single-selection question takes at most one correct option",
            ));
        }
    } else {
        if !spec.options.is_empty() {
            return Err(EngineError::Bounds("free-text question takes no options"));
        }
        if spec.allow_multiple_selections {
            return Err(EngineError::Bounds("free-text question takes no selections"));
        }
    }
    Ok(())
}

impl Engine {
    /// Author a question. A spec without any window comes up immediately
    /// open (`manual_active`); a windowed one follows its window.
    pub async fn create_question(
        &self,
        teacher_id: UserId,
        spec: QuestionSpec,
        now: OffsetDateTime,
    ) -> Result<Ulid, EngineError> {
        self.require_teacher(teacher_id).await?;
        if let Some(room) = spec.room_id
            && !self.directory.room_exists(room).await
        {
            return Err(EngineError::UnknownRoom(room));
        }
        validate_spec(&spec)?;
        if self.questions.len() >= MAX_QUESTIONS {
            return Err(EngineError::LimitExceeded("too many questions"));
        }

        let options = spec
            .options
            .iter()
            .enumerate()
            .map(|(i, opt)| ChoiceOption {
                id: Ulid::new(),
                key: opt.key.trim().to_uppercase(),
                text: opt.text.clone(),
                correct: spec.kind != QuestionKind::Poll && opt.correct,
                position: i as u32,
            })
            .collect();

        let manual_active = spec.start_at.is_none() && spec.end_at.is_none();
        let def = QuestionDef {
            teacher_id,
            room_id: spec.room_id,
            title: spec.title,
            body: spec.body,
            kind: spec.kind,
            expected_answer: spec.expected_answer,
            start_at: spec.start_at,
            end_at: spec.end_at,
            manual_active,
            allow_multiple_submissions: spec.allow_multiple_submissions,
            allow_multiple_selections: spec.allow_multiple_selections,
            allow_late: spec.allow_late,
            close_on_first_correct: spec.close_on_first_correct,
            options,
        };

        let id = Ulid::new();
        let event = Event::QuestionCreated {
            id,
            def: def.clone(),
            created_at: now,
        };
        self.wal_append(&event).await?;
        let qs = QuestionState::from_def(id, def, now);
        self.questions.insert(id, Arc::new(RwLock::new(qs)));
        metrics::gauge!(crate::observability::QUESTIONS_LOADED).set(self.questions.len() as f64);
        self.notify.send(id, &event);
        Ok(id)
    }

    /// Move the window or flip the manual activation of a question. A closed
    /// question stays closed.
    pub async fn reschedule_question(
        &self,
        teacher_id: UserId,
        id: Ulid,
        start_at: Option<OffsetDateTime>,
        end_at: Option<OffsetDateTime>,
        manual_active: bool,
    ) -> Result<(), EngineError> {
        self.require_teacher(teacher_id).await?;
        if let (Some(start), Some(end)) = (start_at, end_at)
            && start >= end
        {
            return Err(EngineError::Bounds("start_at must precede end_at"));
        }
        let qs = self.get_question(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = qs.write().await;
        if guard.def.teacher_id != teacher_id {
            return Err(EngineError::NotOwner(id));
        }
        if guard.close_triggered {
            return Err(EngineError::Closed(id));
        }
        let event = Event::QuestionRescheduled {
            id,
            start_at,
            end_at,
            manual_active,
        };
        self.persist_and_apply_question(id, &mut guard, &event).await
    }

    /// Close a question by hand. Idempotent: returns false if it was
    /// already closed.
    pub async fn close_question(
        &self,
        teacher_id: UserId,
        id: Ulid,
        now: OffsetDateTime,
    ) -> Result<bool, EngineError> {
        self.require_teacher(teacher_id).await?;
        let qs = self.get_question(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = qs.write().await;
        if guard.def.teacher_id != teacher_id {
            return Err(EngineError::NotOwner(id));
        }
        if guard.close_triggered {
            return Ok(false);
        }
        let event = Event::QuestionClosed {
            id,
            trigger: CloseTrigger::Manual,
            at: now,
        };
        self.persist_and_apply_question(id, &mut guard, &event)
            .await?;
        Ok(true)
    }

    /// Close without an acting teacher, for the auto-close task and expiry
    /// sweeps. Idempotent the same way as the manual path: the flag flips at
    /// most once, so concurrent triggers produce one close event.
    pub async fn force_close(
        &self,
        id: Ulid,
        trigger: CloseTrigger,
        at: OffsetDateTime,
    ) -> Result<bool, EngineError> {
        let qs = self.get_question(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = qs.write().await;
        if guard.close_triggered {
            return Ok(false);
        }
        let event = Event::QuestionClosed { id, trigger, at };
        self.persist_and_apply_question(id, &mut guard, &event)
            .await?;
        if trigger == CloseTrigger::Auto {
            metrics::counter!(crate::observability::QUESTIONS_AUTOCLOSED_TOTAL).increment(1);
        }
        Ok(true)
    }

    /// Delete a question and its responses.
    pub async fn remove_question(&self, teacher_id: UserId, id: Ulid) -> Result<(), EngineError> {
        self.require_teacher(teacher_id).await?;
        let qs = self.get_question(&id).ok_or(EngineError::NotFound(id))?;
        let guard = qs.read().await;
        if guard.def.teacher_id != teacher_id {
            return Err(EngineError::NotOwner(id));
        }
        drop(guard);

        let event = Event::QuestionRemoved { id };
        self.wal_append(&event).await?;
        if let Some((_, qs)) = self.questions.remove(&id) {
            let guard = qs.read().await;
            for r in &guard.responses {
                self.response_question.remove(&r.id);
            }
        }
        metrics::gauge!(crate::observability::QUESTIONS_LOADED).set(self.questions.len() as f64);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }
}
