//! Pure submission evaluation. No locks, no I/O — the caller resolves the
//! question state and hands it in.

use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits;
use crate::model::{QuestionKind, QuestionState, SubmissionPayload};

/// Outcome of evaluating one submission against a question.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Whether a score could be assigned automatically.
    pub graded: bool,
    /// Score on a 0–100 scale, when graded.
    pub score: Option<f64>,
    /// The single selected option, for single-selection questions.
    pub option_id: Option<Ulid>,
    /// All selected options, when multiple selections are allowed.
    pub selected_options: Vec<Ulid>,
    /// Stored free-text answer, for text kinds.
    pub answer_text: Option<String>,
}

/// Lowercased, whitespace-trimmed form used for text comparison.
pub fn normalize_answer(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Numeric comparison with a fixed tolerance of 0.01. Accepts a decimal
/// comma. Input that does not parse on either side never matches.
pub fn numeric_matches(expected: &str, given: &str) -> bool {
    let parse = |s: &str| s.trim().replace(',', ".").parse::<f64>();
    match (parse(expected), parse(given)) {
        (Ok(e), Ok(g)) => (e - g).abs() <= 0.01,
        _ => false,
    }
}

/// Validate the payload shape against the question and compute the grade.
///
/// Polls, essays, and questions the engine cannot judge (no expected answer,
/// no correct option) come back ungraded; a teacher scores those by hand.
pub fn evaluate(
    question: &QuestionState,
    payload: &SubmissionPayload,
) -> Result<Evaluation, EngineError> {
    match (question.def.kind, payload) {
        (kind, SubmissionPayload::Selection(keys)) if kind.takes_options() => {
            evaluate_selection(question, keys)
        }
        (kind, SubmissionPayload::Text(text)) if kind.is_free_text() => {
            evaluate_text(question, text)
        }
        _ => Err(EngineError::Bounds("payload shape does not match question kind")),
    }
}

fn evaluate_selection(question: &QuestionState, keys: &[String]) -> Result<Evaluation, EngineError> {
    if keys.is_empty() {
        return Err(EngineError::Bounds("empty selection"));
    }
    if keys.len() > 1 && !question.def.allow_multiple_selections {
        return Err(EngineError::Bounds("question takes a single selection"));
    }

    let mut selected: Vec<Ulid> = Vec::with_capacity(keys.len());
    for key in keys {
        let option = question
            .option_by_key(key)
            .ok_or(EngineError::Bounds("unknown option key"))?;
        if selected.contains(&option.id) {
            return Err(EngineError::Bounds("option selected twice"));
        }
        selected.push(option.id);
    }

    let correct = question.correct_option_ids();
    let (graded, score) = match question.def.kind {
        QuestionKind::Poll => (false, None),
        _ if correct.is_empty() => (false, None),
        _ if question.def.allow_multiple_selections => {
            let hit = selected.iter().filter(|id| correct.contains(id)).count() as f64;
            let miss = selected.len() as f64 - hit;
            let fraction = ((hit - miss) / correct.len() as f64).clamp(0.0, 1.0);
            (true, Some(fraction * 100.0))
        }
        _ => {
            let right = correct.contains(&selected[0]);
            (true, Some(if right { 100.0 } else { 0.0 }))
        }
    };

    let (option_id, selected_options) = if question.def.allow_multiple_selections {
        (None, selected)
    } else {
        (Some(selected[0]), Vec::new())
    };

    Ok(Evaluation {
        graded,
        score,
        option_id,
        selected_options,
        answer_text: None,
    })
}

fn evaluate_text(question: &QuestionState, text: &str) -> Result<Evaluation, EngineError> {
    if text.trim().is_empty() {
        return Err(EngineError::Bounds("empty answer"));
    }
    if text.len() > limits::MAX_ANSWER_LEN {
        return Err(EngineError::Bounds("answer too long"));
    }

    let (graded, score) = match (question.def.kind, question.def.expected_answer.as_deref()) {
        (QuestionKind::Essay, _) | (_, None) => (false, None),
        (QuestionKind::ShortAnswer, Some(expected)) => {
            let right = normalize_answer(expected) == normalize_answer(text);
            (true, Some(if right { 100.0 } else { 0.0 }))
        }
        (QuestionKind::Numeric, Some(expected)) => {
            let right = numeric_matches(expected, text);
            (true, Some(if right { 100.0 } else { 0.0 }))
        }
        _ => (false, None),
    };

    Ok(Evaluation {
        graded,
        score,
        option_id: None,
        selected_options: Vec::new(),
        answer_text: Some(text.to_string()),
    })
}
