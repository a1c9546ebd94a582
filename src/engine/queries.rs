use time::OffsetDateTime;
use ulid::Ulid;

use crate::model::*;

use super::questions::{OpenState, open_state};
use super::{Engine, EngineError, SharedQuestion};

fn info_from(guard: &QuestionState) -> QuestionInfo {
    QuestionInfo {
        id: guard.id,
        teacher_id: guard.def.teacher_id,
        room_id: guard.def.room_id,
        title: guard.def.title.clone(),
        body: guard.def.body.clone(),
        kind: guard.def.kind,
        start_at: guard.def.start_at,
        end_at: guard.def.end_at,
        manual_active: guard.def.manual_active,
        allow_multiple_submissions: guard.def.allow_multiple_submissions,
        allow_multiple_selections: guard.def.allow_multiple_selections,
        allow_late: guard.def.allow_late,
        close_on_first_correct: guard.def.close_on_first_correct,
        close_triggered: guard.close_triggered,
        created_at: guard.created_at,
        response_count: guard.responses.len(),
    }
}

impl Engine {
    /// Snapshot the Arcs first so no DashMap shard lock is held across an await.
    fn question_handles(&self) -> Vec<SharedQuestion> {
        self.questions.iter().map(|e| e.value().clone()).collect()
    }

    /// Summary of one question.
    pub async fn question_info(&self, id: Ulid) -> Result<QuestionInfo, EngineError> {
        let qs = self.get_question(&id).ok_or(EngineError::NotFound(id))?;
        let guard = qs.read().await;
        Ok(info_from(&guard))
    }

    /// Lifecycle state of one question at `now`.
    pub async fn question_state(
        &self,
        id: Ulid,
        now: OffsetDateTime,
    ) -> Result<OpenState, EngineError> {
        let qs = self.get_question(&id).ok_or(EngineError::NotFound(id))?;
        let guard = qs.read().await;
        Ok(open_state(&guard, now))
    }

    /// Whether the question accepts regular (non-late) submissions at `now`.
    pub async fn is_open(&self, id: Ulid, now: OffsetDateTime) -> Result<bool, EngineError> {
        Ok(self.question_state(id, now).await? == OpenState::Open)
    }

    /// All questions of one teacher, oldest first.
    pub async fn list_questions_for_teacher(&self, teacher_id: UserId) -> Vec<QuestionInfo> {
        let mut out = Vec::new();
        for qs in self.question_handles() {
            let guard = qs.read().await;
            if guard.def.teacher_id == teacher_id {
                out.push(info_from(&guard));
            }
        }
        out.sort_by_key(|q| q.created_at);
        out
    }

    /// All questions published in a room, oldest first.
    pub async fn list_questions_for_room(&self, room_id: RoomId) -> Vec<QuestionInfo> {
        let mut out = Vec::new();
        for qs in self.question_handles() {
            let guard = qs.read().await;
            if guard.def.room_id == Some(room_id) {
                out.push(info_from(&guard));
            }
        }
        out.sort_by_key(|q| q.created_at);
        out
    }

    /// Questions accepting submissions at `now`, oldest first. Expired
    /// questions still taking late answers do not count as open.
    pub async fn open_questions(&self, now: OffsetDateTime) -> Vec<QuestionInfo> {
        let mut out = Vec::new();
        for qs in self.question_handles() {
            let guard = qs.read().await;
            if open_state(&guard, now) == OpenState::Open {
                out.push(info_from(&guard));
            }
        }
        out.sort_by_key(|q| q.created_at);
        out
    }

    /// Options of a question in display order.
    pub async fn list_options(&self, question_id: Ulid) -> Result<Vec<ChoiceOption>, EngineError> {
        let qs = self
            .get_question(&question_id)
            .ok_or(EngineError::NotFound(question_id))?;
        let guard = qs.read().await;
        let mut options = guard.def.options.clone();
        options.sort_by_key(|o| o.position);
        Ok(options)
    }

    /// Every stored response of a question (all students, all versions),
    /// ordered by submission instant.
    pub async fn list_responses(
        &self,
        question_id: Ulid,
    ) -> Result<Vec<ResponseRecord>, EngineError> {
        let qs = self
            .get_question(&question_id)
            .ok_or(EngineError::NotFound(question_id))?;
        let guard = qs.read().await;
        let mut responses = guard.responses.clone();
        responses.sort_by_key(|r| r.submitted_at);
        Ok(responses)
    }

    /// Only the highest-version response of each student, the set a grading
    /// view works from.
    pub async fn latest_responses(
        &self,
        question_id: Ulid,
    ) -> Result<Vec<ResponseRecord>, EngineError> {
        let qs = self
            .get_question(&question_id)
            .ok_or(EngineError::NotFound(question_id))?;
        let guard = qs.read().await;
        let mut latest: Vec<ResponseRecord> = Vec::new();
        for r in &guard.responses {
            if r.version == guard.latest_version(r.student_id) {
                latest.push(r.clone());
            }
        }
        latest.sort_by_key(|r| r.submitted_at);
        Ok(latest)
    }

    /// One response by id.
    pub async fn get_response(&self, response_id: Ulid) -> Result<ResponseRecord, EngineError> {
        let question_id = self
            .question_of_response(&response_id)
            .ok_or(EngineError::NotFound(response_id))?;
        let qs = self
            .get_question(&question_id)
            .ok_or(EngineError::NotFound(question_id))?;
        let guard = qs.read().await;
        guard
            .responses
            .iter()
            .find(|r| r.id == response_id)
            .cloned()
            .ok_or(EngineError::NotFound(response_id))
    }
}
