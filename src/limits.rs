//! Hard limits enforced by the engine.

use time::Time;
use time::macros::time;

/// Earliest allowed start of an availability slot.
pub const SLOT_EARLIEST: Time = time!(7:00);

/// Latest allowed end of an availability slot.
pub const SLOT_LATEST: Time = time!(21:00);

/// Maximum availability slots a single teacher may keep.
pub const MAX_SLOTS_PER_TEACHER: usize = 64;

/// Maximum questions held by one engine.
pub const MAX_QUESTIONS: usize = 50_000;

/// Option keys are single letters A–Z, so 26 is the natural ceiling.
pub const MAX_OPTIONS_PER_QUESTION: usize = 26;

/// Maximum responses stored per question (all students, all versions).
pub const MAX_RESPONSES_PER_QUESTION: usize = 100_000;

/// Maximum length of a question title.
pub const MAX_TITLE_LEN: usize = 255;

/// Maximum length of a question body.
pub const MAX_BODY_LEN: usize = 4_000;

/// Maximum length of an option key.
pub const MAX_OPTION_KEY_LEN: usize = 8;

/// Maximum length of an option text.
pub const MAX_OPTION_TEXT_LEN: usize = 500;

/// Maximum length of a free-text answer or expected answer.
pub const MAX_ANSWER_LEN: usize = 4_000;

/// Maximum length of grading feedback.
pub const MAX_FEEDBACK_LEN: usize = 2_000;
