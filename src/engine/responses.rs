//! Submission intake and manual grading. Everything here runs under the
//! question's write lock so window checks, versioning, and auto-grading
//! commit as one atomic step.

use time::OffsetDateTime;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::questions::{OpenState, open_state};
use super::{Engine, EngineError, grading};

impl Engine {
    /// Accept a submission. Grades it on the spot when the question kind
    /// allows, assigns the next version for this student, and pokes the
    /// auto-close task on a first fully-correct answer.
    pub async fn submit(
        &self,
        student_id: UserId,
        question_id: Ulid,
        payload: SubmissionPayload,
        now: OffsetDateTime,
    ) -> Result<ResponseRecord, EngineError> {
        if !self.directory.user_exists(student_id).await {
            return Err(EngineError::UnknownUser(student_id));
        }
        let qs = self
            .get_question(&question_id)
            .ok_or(EngineError::NotFound(question_id))?;
        let mut guard = qs.write().await;

        // allow_late admits stragglers whether the window ran out or the
        // question was already closed; only a not-yet-open question is a
        // hard stop.
        let late = match open_state(&guard, now) {
            OpenState::Open => false,
            (OpenState::Expired | OpenState::Closed) if guard.def.allow_late => true,
            _ => {
                metrics::counter!(observability::SUBMISSIONS_REJECTED_TOTAL, "reason" => "closed")
                    .increment(1);
                return Err(EngineError::Closed(question_id));
            }
        };

        let previous = guard.latest_version(student_id);
        if previous > 0 && !guard.def.allow_multiple_submissions {
            metrics::counter!(observability::SUBMISSIONS_REJECTED_TOTAL, "reason" => "duplicate")
                .increment(1);
            return Err(EngineError::Duplicate(question_id));
        }
        if guard.responses.len() >= MAX_RESPONSES_PER_QUESTION {
            return Err(EngineError::LimitExceeded("too many responses on question"));
        }

        let evaluation = grading::evaluate(&guard, &payload)?;
        let version = previous + 1;
        let record = ResponseRecord {
            id: Ulid::new(),
            question_id,
            student_id,
            option_id: evaluation.option_id,
            selected_options: evaluation.selected_options,
            answer_text: evaluation.answer_text,
            submitted_at: now,
            graded: evaluation.graded,
            score: evaluation.score,
            grader_id: None,
            feedback: None,
            version,
            late,
        };

        // Version gate: the write lock is held from the read above through
        // the commit, so a lost race here means a locking bug upstream.
        if guard.latest_version(student_id) != previous {
            return Err(EngineError::Conflict("submission version moved"));
        }

        let event = Event::ResponseRecorded {
            record: record.clone(),
        };
        self.persist_and_apply_question(question_id, &mut guard, &event)
            .await?;

        metrics::counter!(
            observability::SUBMISSIONS_TOTAL,
            "late" => if late { "true" } else { "false" }
        )
        .increment(1);
        if evaluation.graded {
            metrics::counter!(observability::GRADES_TOTAL, "source" => "auto").increment(1);
        }

        if guard.def.close_on_first_correct
            && record.score == Some(100.0)
            && !guard.close_triggered
        {
            // Best effort: if the channel is full the sweep misses one
            // signal, and the question simply stays open for the next one.
            let _ = self.autoclose_tx.try_send(question_id);
        }

        Ok(record)
    }

    /// Record a manual grade on a response. Regrading overwrites the score
    /// and feedback of that same version; it never creates a new one.
    pub async fn grade_response(
        &self,
        grader_id: UserId,
        response_id: Ulid,
        score: Option<f64>,
        feedback: Option<String>,
        now: OffsetDateTime,
    ) -> Result<(), EngineError> {
        self.require_teacher(grader_id).await?;
        if let Some(s) = score
            && !(0.0..=100.0).contains(&s)
        {
            return Err(EngineError::Bounds("score outside 0..=100"));
        }
        if let Some(ref f) = feedback
            && f.len() > MAX_FEEDBACK_LEN
        {
            return Err(EngineError::LimitExceeded("feedback too long"));
        }

        let question_id = self
            .question_of_response(&response_id)
            .ok_or(EngineError::NotFound(response_id))?;
        let qs = self
            .get_question(&question_id)
            .ok_or(EngineError::NotFound(question_id))?;
        let mut guard = qs.write().await;
        if guard.def.teacher_id != grader_id {
            return Err(EngineError::NotOwner(question_id));
        }
        if guard.response_mut(response_id).is_none() {
            return Err(EngineError::NotFound(response_id));
        }

        let event = Event::ResponseGraded {
            id: response_id,
            question_id,
            grader_id,
            score,
            feedback,
            at: now,
        };
        self.persist_and_apply_question(question_id, &mut guard, &event)
            .await?;
        metrics::counter!(observability::GRADES_TOTAL, "source" => "manual").increment(1);
        Ok(())
    }
}
