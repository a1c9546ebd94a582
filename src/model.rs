//! Domain types shared across the engine: availability slots, questions,
//! responses, and the flat WAL event records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, Time, Weekday};
use ulid::Ulid;

/// Surrogate id of a user row owned by the external directory collaborator.
pub type UserId = i64;

/// Surrogate id of a room row owned by the external directory collaborator.
pub type RoomId = i64;

/// Sort key for weekdays, Monday first.
pub fn day_index(day: Weekday) -> u8 {
    day.number_days_from_monday()
}

/// One weekly recurring availability window of a teacher.
///
/// Times are zone-less clock times; the day is a calendar weekday. Both are
/// interpreted against the owner's configured zone at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    /// Engine-assigned slot id.
    pub id: Ulid,
    /// Day of the week the window recurs on.
    pub day: Weekday,
    /// Inclusive start of the window.
    pub start: Time,
    /// Exclusive end of the window.
    pub end: Time,
}

impl AvailabilitySlot {
    /// Half-open overlap test; slots on different days never overlap.
    pub fn overlaps(&self, other: &AvailabilitySlot) -> bool {
        self.day == other.day && self.start < other.end && other.start < self.end
    }

    /// True iff the clock time `t` on `day` falls inside this window.
    pub fn contains(&self, day: Weekday, t: Time) -> bool {
        self.day == day && self.start <= t && t < self.end
    }
}

/// All availability slots of one teacher, sorted by `(day, start)`.
#[derive(Debug, Clone)]
pub struct TeacherSchedule {
    /// Owning teacher (external directory id).
    pub teacher_id: UserId,
    /// Slots in `(day, start)` order.
    pub slots: Vec<AvailabilitySlot>,
}

impl TeacherSchedule {
    /// Empty schedule for a teacher.
    pub fn new(teacher_id: UserId) -> Self {
        Self {
            teacher_id,
            slots: Vec::new(),
        }
    }

    /// Insert a slot maintaining `(day, start)` order.
    pub fn insert_slot(&mut self, slot: AvailabilitySlot) {
        let key = (day_index(slot.day), slot.start);
        let pos = self
            .slots
            .partition_point(|s| (day_index(s.day), s.start) < key);
        self.slots.insert(pos, slot);
    }

    /// Remove a slot by id.
    pub fn remove_slot(&mut self, id: Ulid) -> Option<AvailabilitySlot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    /// Slots recurring on the given weekday, in start order.
    pub fn slots_on(&self, day: Weekday) -> impl Iterator<Item = &AvailabilitySlot> {
        self.slots.iter().filter(move |s| s.day == day)
    }
}

/// The kind of a question, which determines payload shape and grading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestionKind {
    /// Lettered options, one or several correct.
    MultipleChoice,
    /// Lettered options, no correctness at all.
    Poll,
    /// Two options, exactly one correct.
    TrueFalse,
    /// Free text compared against an expected answer.
    ShortAnswer,
    /// Free text parsed and compared numerically.
    Numeric,
    /// Free text, always graded by hand.
    Essay,
}

impl QuestionKind {
    /// Kinds answered by selecting option keys.
    pub fn takes_options(self) -> bool {
        matches!(
            self,
            QuestionKind::MultipleChoice | QuestionKind::Poll | QuestionKind::TrueFalse
        )
    }

    /// Kinds answered with free text.
    pub fn is_free_text(self) -> bool {
        !self.takes_options()
    }
}

/// An answer option attached to a choice-kind question. Immutable after
/// authoring; responses reference it by `key` at submit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    /// Engine-assigned option id.
    pub id: Ulid,
    /// Key students type to select this option, unique within the question.
    pub key: String,
    /// Display text.
    pub text: String,
    /// Whether selecting this option counts as correct.
    pub correct: bool,
    /// Display ordering.
    pub position: u32,
}

/// Caller-supplied option when authoring a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    /// Selection key (normalized to uppercase).
    pub key: String,
    /// Display text.
    pub text: String,
    /// Correctness flag; ignored for polls.
    pub correct: bool,
}

/// Caller-supplied question definition, validated by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionSpec {
    /// Room the question is published in, if any.
    pub room_id: Option<RoomId>,
    /// Optional short title.
    pub title: Option<String>,
    /// Question text.
    pub body: String,
    /// Kind, which fixes payload shape and grading.
    pub kind: QuestionKind,
    /// Expected answer for free-text kinds.
    pub expected_answer: Option<String>,
    /// Window opening instant.
    pub start_at: Option<OffsetDateTime>,
    /// Window closing instant (inclusive).
    pub end_at: Option<OffsetDateTime>,
    /// Whether students may submit more than one version.
    pub allow_multiple_submissions: bool,
    /// Whether a single submission may select several options.
    pub allow_multiple_selections: bool,
    /// Whether submissions after `end_at` are accepted (marked late).
    pub allow_late: bool,
    /// Whether the first fully-correct submission closes the question.
    pub close_on_first_correct: bool,
    /// Options for choice kinds; empty for free-text kinds.
    pub options: Vec<OptionSpec>,
}

/// Validated question definition as persisted in the WAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDef {
    /// Owning teacher.
    pub teacher_id: UserId,
    /// Room the question is published in, if any.
    pub room_id: Option<RoomId>,
    /// Optional short title.
    pub title: Option<String>,
    /// Question text.
    pub body: String,
    /// Kind.
    pub kind: QuestionKind,
    /// Expected answer for free-text kinds.
    pub expected_answer: Option<String>,
    /// Window opening instant.
    pub start_at: Option<OffsetDateTime>,
    /// Window closing instant (inclusive).
    pub end_at: Option<OffsetDateTime>,
    /// Manual open override.
    pub manual_active: bool,
    /// Resubmission flag.
    pub allow_multiple_submissions: bool,
    /// Multi-select flag.
    pub allow_multiple_selections: bool,
    /// Late-submission flag.
    pub allow_late: bool,
    /// Auto-close flag.
    pub close_on_first_correct: bool,
    /// Normalized options with assigned ids and positions.
    pub options: Vec<ChoiceOption>,
}

/// Why a question was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseTrigger {
    /// The owning teacher ended it.
    Manual,
    /// The first correct submission ended it.
    Auto,
    /// The time window ran out.
    Expiry,
}

/// One versioned submission by one student. Append-only: resubmissions get a
/// fresh record with a higher `version`, never an overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// Engine-assigned response id.
    pub id: Ulid,
    /// Question answered.
    pub question_id: Ulid,
    /// Submitting student (external directory id).
    pub student_id: UserId,
    /// Single selected option for single-choice kinds.
    pub option_id: Option<Ulid>,
    /// Full selection set when multiple selections are allowed.
    pub selected_options: Vec<Ulid>,
    /// Free-text answer for text kinds.
    pub answer_text: Option<String>,
    /// Instant the submission was accepted.
    pub submitted_at: OffsetDateTime,
    /// Whether a score has been assigned (automatically or by hand).
    pub graded: bool,
    /// Score on a 0–100 scale.
    pub score: Option<f64>,
    /// Teacher who graded, when graded by hand.
    pub grader_id: Option<UserId>,
    /// Grading feedback.
    pub feedback: Option<String>,
    /// 1-based version within `(question, student)`.
    pub version: u32,
    /// Whether the submission arrived after the window closed.
    pub late: bool,
}

/// Full in-memory state of one question aggregate: definition, options, and
/// the append-only response log with its per-student version index.
#[derive(Debug, Clone)]
pub struct QuestionState {
    /// Question id.
    pub id: Ulid,
    /// Validated definition (window and `manual_active` mutate over time).
    pub def: QuestionDef,
    /// One-way closed flag; once true the question never reopens.
    pub close_triggered: bool,
    /// What ended the question, once `close_triggered` is set.
    pub close_trigger: Option<CloseTrigger>,
    /// When the question was closed.
    pub closed_at: Option<OffsetDateTime>,
    /// Creation instant.
    pub created_at: OffsetDateTime,
    /// Append-only response log in acceptance order.
    pub responses: Vec<ResponseRecord>,
    versions: HashMap<UserId, u32>,
}

impl QuestionState {
    /// Build the aggregate from a persisted definition.
    pub fn from_def(id: Ulid, def: QuestionDef, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            def,
            close_triggered: false,
            close_trigger: None,
            closed_at: None,
            created_at,
            responses: Vec::new(),
            versions: HashMap::new(),
        }
    }

    /// Option matching a (case-insensitive) selection key.
    pub fn option_by_key(&self, key: &str) -> Option<&ChoiceOption> {
        self.def
            .options
            .iter()
            .find(|o| o.key.eq_ignore_ascii_case(key))
    }

    /// Ids of every correct option.
    pub fn correct_option_ids(&self) -> Vec<Ulid> {
        self.def
            .options
            .iter()
            .filter(|o| o.correct)
            .map(|o| o.id)
            .collect()
    }

    /// Highest version this student has stored, 0 when none.
    pub fn latest_version(&self, student: UserId) -> u32 {
        self.versions.get(&student).copied().unwrap_or(0)
    }

    /// Append a response and advance the student's version index.
    pub fn record_response(&mut self, record: ResponseRecord) {
        let entry = self.versions.entry(record.student_id).or_insert(0);
        *entry = (*entry).max(record.version);
        self.responses.push(record);
    }

    /// Mutable lookup of a response by id.
    pub fn response_mut(&mut self, id: Ulid) -> Option<&mut ResponseRecord> {
        self.responses.iter_mut().find(|r| r.id == id)
    }
}

/// The flat event types — this is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Event {
    SlotAdded {
        id: Ulid,
        teacher_id: UserId,
        day: Weekday,
        start: Time,
        end: Time,
    },
    SlotUpdated {
        id: Ulid,
        teacher_id: UserId,
        day: Weekday,
        start: Time,
        end: Time,
    },
    SlotRemoved {
        id: Ulid,
        teacher_id: UserId,
    },
    QuestionCreated {
        id: Ulid,
        def: QuestionDef,
        created_at: OffsetDateTime,
    },
    QuestionRescheduled {
        id: Ulid,
        start_at: Option<OffsetDateTime>,
        end_at: Option<OffsetDateTime>,
        manual_active: bool,
    },
    QuestionClosed {
        id: Ulid,
        trigger: CloseTrigger,
        at: OffsetDateTime,
    },
    QuestionRemoved {
        id: Ulid,
    },
    ResponseRecorded {
        record: ResponseRecord,
    },
    ResponseGraded {
        id: Ulid,
        question_id: Ulid,
        grader_id: UserId,
        score: Option<f64>,
        feedback: Option<String>,
        at: OffsetDateTime,
    },
}

/// What a student sends when answering a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionPayload {
    /// Option keys for choice kinds; a single key unless the question allows
    /// multiple selections.
    Selection(Vec<String>),
    /// Free text for short-answer, numeric, and essay kinds.
    Text(String),
}

// ── Query result types ───────────────────────────────────────────

/// Availability slot as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    /// Slot id.
    pub id: Ulid,
    /// Owning teacher.
    pub teacher_id: UserId,
    /// Weekday the window recurs on.
    pub day: Weekday,
    /// Window start.
    pub start: Time,
    /// Window end.
    pub end: Time,
}

/// The soonest upcoming availability window of a teacher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcomingWindow {
    /// Weekday of the window.
    pub day: Weekday,
    /// Window start clock time.
    pub start: Time,
    /// Window end clock time.
    pub end: Time,
    /// Instant (in the teacher's zone) the window next begins, or the queried
    /// instant itself when the window is already in progress.
    pub starts_at: OffsetDateTime,
}

/// Question summary as returned by listings.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionInfo {
    /// Question id.
    pub id: Ulid,
    /// Owning teacher.
    pub teacher_id: UserId,
    /// Room, if any.
    pub room_id: Option<RoomId>,
    /// Title.
    pub title: Option<String>,
    /// Body text.
    pub body: String,
    /// Kind.
    pub kind: QuestionKind,
    /// Window start.
    pub start_at: Option<OffsetDateTime>,
    /// Window end.
    pub end_at: Option<OffsetDateTime>,
    /// Manual open override.
    pub manual_active: bool,
    /// Resubmission flag.
    pub allow_multiple_submissions: bool,
    /// Multi-select flag.
    pub allow_multiple_selections: bool,
    /// Late-submission flag.
    pub allow_late: bool,
    /// Auto-close flag.
    pub close_on_first_correct: bool,
    /// Whether the one-way close has fired.
    pub close_triggered: bool,
    /// Creation instant.
    pub created_at: OffsetDateTime,
    /// Number of stored responses (all versions).
    pub response_count: usize,
}
