use super::questions::open_state;
use super::*;

use time::macros::{datetime, time};
use time::{Duration, UtcOffset, Weekday};
use tokio::sync::mpsc;

use crate::directory::InMemoryDirectory;

const TEACHER: UserId = 1;
const OTHER_TEACHER: UserId = 2;
const STUDENT: UserId = 20;
const STUDENT_B: UserId = 21;
const ROOM: RoomId = 10;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("aula_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn seeded_directory() -> Arc<InMemoryDirectory> {
    let dir = Arc::new(InMemoryDirectory::new());
    dir.add_user(TEACHER, true);
    dir.add_user(OTHER_TEACHER, true);
    dir.add_user(STUDENT, false);
    dir.add_user(STUDENT_B, false);
    dir.add_room(ROOM);
    dir
}

fn test_engine(name: &str) -> (Arc<Engine>, Arc<InMemoryDirectory>, mpsc::Receiver<Ulid>) {
    let path = test_wal_path(name);
    let dir = seeded_directory();
    let (tx, rx) = mpsc::channel(64);
    let engine = Engine::new(path, Arc::new(NotifyHub::new()), dir.clone(), tx).unwrap();
    (Arc::new(engine), dir, rx)
}

fn choice_spec() -> QuestionSpec {
    QuestionSpec {
        room_id: Some(ROOM),
        title: Some("warmup".into()),
        body: "pick the right one".into(),
        kind: QuestionKind::MultipleChoice,
        expected_answer: None,
        start_at: None,
        end_at: None,
        allow_multiple_submissions: false,
        allow_multiple_selections: false,
        allow_late: false,
        close_on_first_correct: false,
        options: vec![
            OptionSpec {
                key: "A".into(),
                text: "right".into(),
                correct: true,
            },
            OptionSpec {
                key: "B".into(),
                text: "wrong".into(),
                correct: false,
            },
        ],
    }
}

fn essay_spec() -> QuestionSpec {
    QuestionSpec {
        room_id: None,
        title: None,
        body: "explain ownership".into(),
        kind: QuestionKind::Essay,
        expected_answer: None,
        start_at: None,
        end_at: None,
        allow_multiple_submissions: true,
        allow_multiple_selections: false,
        allow_late: false,
        close_on_first_correct: false,
        options: Vec::new(),
    }
}

fn select(keys: &[&str]) -> SubmissionPayload {
    SubmissionPayload::Selection(keys.iter().map(|k| k.to_string()).collect())
}

// ── Scheduler ────────────────────────────────────────────

#[tokio::test]
async fn add_slot_and_list() {
    let (engine, _, _rx) = test_engine("add_slot.wal");
    let id = engine
        .add_slot(TEACHER, Weekday::Monday, time!(9:00), time!(10:00))
        .await
        .unwrap();

    let slots = engine.list_slots(TEACHER).await;
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].id, id);
    assert_eq!(slots[0].day, Weekday::Monday);
}

#[tokio::test]
async fn overlapping_slot_rejected_touching_accepted() {
    let (engine, _, _rx) = test_engine("overlap.wal");
    let first = engine
        .add_slot(TEACHER, Weekday::Monday, time!(9:00), time!(10:00))
        .await
        .unwrap();

    let result = engine
        .add_slot(TEACHER, Weekday::Monday, time!(9:30), time!(10:30))
        .await;
    assert!(matches!(result, Err(EngineError::Overlap(id)) if id == first));

    // Half-open intervals: a window starting exactly at 10:00 fits
    engine
        .add_slot(TEACHER, Weekday::Monday, time!(10:00), time!(11:00))
        .await
        .unwrap();
    // Same times on another day are independent
    engine
        .add_slot(TEACHER, Weekday::Tuesday, time!(9:30), time!(10:30))
        .await
        .unwrap();
    assert_eq!(engine.list_slots(TEACHER).await.len(), 3);
}

#[tokio::test]
async fn slot_bounds_enforced() {
    let (engine, _, _rx) = test_engine("slot_bounds.wal");
    assert!(matches!(
        engine
            .add_slot(TEACHER, Weekday::Monday, time!(6:00), time!(8:00))
            .await,
        Err(EngineError::Bounds(_))
    ));
    assert!(matches!(
        engine
            .add_slot(TEACHER, Weekday::Monday, time!(20:00), time!(21:30))
            .await,
        Err(EngineError::Bounds(_))
    ));
    assert!(matches!(
        engine
            .add_slot(TEACHER, Weekday::Monday, time!(10:00), time!(9:00))
            .await,
        Err(EngineError::Bounds(_))
    ));
    // The full timeline is itself a valid slot
    engine
        .add_slot(TEACHER, Weekday::Monday, time!(7:00), time!(21:00))
        .await
        .unwrap();
}

#[tokio::test]
async fn update_slot_skips_itself_in_overlap_check() {
    let (engine, _, _rx) = test_engine("update_slot.wal");
    let id = engine
        .add_slot(TEACHER, Weekday::Monday, time!(9:00), time!(10:00))
        .await
        .unwrap();
    let neighbor = engine
        .add_slot(TEACHER, Weekday::Monday, time!(11:00), time!(12:00))
        .await
        .unwrap();

    // Widening within its own range is fine
    engine
        .update_slot(TEACHER, id, time!(9:30), time!(10:30))
        .await
        .unwrap();

    // Colliding with the neighbor is not
    let result = engine
        .update_slot(TEACHER, id, time!(10:30), time!(11:30))
        .await;
    assert!(matches!(result, Err(EngineError::Overlap(o)) if o == neighbor));

    let slots = engine.list_slots(TEACHER).await;
    let updated = slots.iter().find(|s| s.id == id).unwrap();
    assert_eq!(updated.start, time!(9:30));
}

#[tokio::test]
async fn slot_ownership_enforced() {
    let (engine, _, _rx) = test_engine("slot_owner.wal");
    let id = engine
        .add_slot(TEACHER, Weekday::Monday, time!(9:00), time!(10:00))
        .await
        .unwrap();

    assert!(matches!(
        engine.remove_slot(OTHER_TEACHER, id).await,
        Err(EngineError::NotOwner(_))
    ));
    assert!(matches!(
        engine
            .update_slot(OTHER_TEACHER, id, time!(9:00), time!(9:30))
            .await,
        Err(EngineError::NotOwner(_))
    ));

    engine.remove_slot(TEACHER, id).await.unwrap();
    assert!(engine.list_slots(TEACHER).await.is_empty());
    assert!(matches!(
        engine.remove_slot(TEACHER, id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn only_teachers_touch_slots() {
    let (engine, _, _rx) = test_engine("slot_roles.wal");
    assert!(matches!(
        engine
            .add_slot(STUDENT, Weekday::Monday, time!(9:00), time!(10:00))
            .await,
        Err(EngineError::NotTeacher(_))
    ));
    assert!(matches!(
        engine
            .add_slot(999, Weekday::Monday, time!(9:00), time!(10:00))
            .await,
        Err(EngineError::UnknownUser(999))
    ));
}

#[tokio::test]
async fn is_available_evaluates_in_teacher_zone() {
    let (engine, dir, _rx) = test_engine("zone.wal");
    dir.set_offset(TEACHER, UtcOffset::from_hms(2, 0, 0).unwrap());
    engine
        .add_slot(TEACHER, Weekday::Monday, time!(9:00), time!(10:00))
        .await
        .unwrap();

    // 2025-06-02 is a Monday. 07:30 UTC is 09:30 at +02:00.
    let inside = datetime!(2025-06-02 7:30 UTC);
    assert!(engine.is_available(TEACHER, inside).await.unwrap());

    // 09:30 UTC is 11:30 local — outside
    let outside = datetime!(2025-06-02 9:30 UTC);
    assert!(!engine.is_available(TEACHER, outside).await.unwrap());

    // Exclusive end: 08:00 UTC is 10:00 local
    let boundary = datetime!(2025-06-02 8:00 UTC);
    assert!(!engine.is_available(TEACHER, boundary).await.unwrap());
}

#[tokio::test]
async fn next_window_reports_in_progress_and_wraps_the_week() {
    let (engine, _, _rx) = test_engine("next_window.wal");
    engine
        .add_slot(TEACHER, Weekday::Monday, time!(9:00), time!(10:00))
        .await
        .unwrap();

    // Mid-window: starts_at is the queried instant itself
    let during = datetime!(2025-06-02 9:30 UTC);
    let w = engine.next_window(TEACHER, during).await.unwrap().unwrap();
    assert_eq!(w.starts_at, during);
    assert_eq!(w.day, Weekday::Monday);

    // Tuesday noon: the window is next Monday morning
    let tuesday = datetime!(2025-06-03 12:00 UTC);
    let w = engine.next_window(TEACHER, tuesday).await.unwrap().unwrap();
    assert_eq!(w.starts_at, datetime!(2025-06-09 9:00 UTC));

    // After the slot ends on Monday, it also wraps forward
    let late_monday = datetime!(2025-06-02 15:00 UTC);
    let w = engine
        .next_window(TEACHER, late_monday)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(w.starts_at, datetime!(2025-06-09 9:00 UTC));
}

#[tokio::test]
async fn next_window_finds_sole_slot_one_week_out() {
    let (engine, _, _rx) = test_engine("next_window_week_out.wal");
    engine
        .add_slot(TEACHER, Weekday::Monday, time!(9:00), time!(10:00))
        .await
        .unwrap();

    // The only slot ended earlier today; its next occurrence is the same
    // weekday seven days out, not None.
    let late_monday = datetime!(2025-06-02 15:00 UTC);
    let w = engine
        .next_window(TEACHER, late_monday)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(w.day, Weekday::Monday);
    assert_eq!(w.starts_at, datetime!(2025-06-09 9:00 UTC));
}

#[tokio::test]
async fn next_window_empty_schedule_is_none() {
    let (engine, _, _rx) = test_engine("next_window_none.wal");
    let w = engine
        .next_window(TEACHER, datetime!(2025-06-02 9:30 UTC))
        .await
        .unwrap();
    assert!(w.is_none());
}

#[tokio::test]
async fn day_timeline_filters_by_day() {
    let (engine, _, _rx) = test_engine("day_timeline.wal");
    engine
        .add_slot(TEACHER, Weekday::Monday, time!(9:00), time!(10:00))
        .await
        .unwrap();
    engine
        .add_slot(TEACHER, Weekday::Monday, time!(15:00), time!(16:00))
        .await
        .unwrap();
    engine
        .add_slot(TEACHER, Weekday::Friday, time!(9:00), time!(10:00))
        .await
        .unwrap();

    let monday = engine.day_timeline(TEACHER, Weekday::Monday).await;
    assert_eq!(monday.len(), 2);
    assert!(monday.windows(2).all(|w| w[0].start <= w[1].start));
    assert_eq!(engine.day_timeline(TEACHER, Weekday::Sunday).await.len(), 0);
}

// ── Question lifecycle ───────────────────────────────────

#[tokio::test]
async fn windowed_question_follows_its_window() {
    let (engine, _, _rx) = test_engine("window_lifecycle.wal");
    let start = datetime!(2025-06-01 10:00 UTC);
    let end = datetime!(2025-06-01 11:00 UTC);
    let mut spec = choice_spec();
    spec.start_at = Some(start);
    spec.end_at = Some(end);
    let qid = engine
        .create_question(TEACHER, spec, start - Duration::HOUR)
        .await
        .unwrap();

    assert_eq!(
        engine.question_state(qid, start - Duration::MINUTE).await.unwrap(),
        OpenState::Scheduled
    );
    assert_eq!(
        engine.question_state(qid, start).await.unwrap(),
        OpenState::Open
    );
    assert_eq!(
        engine.question_state(qid, end).await.unwrap(),
        OpenState::Open
    );
    assert_eq!(
        engine.question_state(qid, end + Duration::MINUTE).await.unwrap(),
        OpenState::Expired
    );
}

#[tokio::test]
async fn unknown_room_rejected() {
    let (engine, _, _rx) = test_engine("unknown_room.wal");
    let mut spec = choice_spec();
    spec.room_id = Some(404);
    assert!(matches!(
        engine
            .create_question(TEACHER, spec, datetime!(2025-06-01 10:00 UTC))
            .await,
        Err(EngineError::UnknownRoom(404))
    ));
}

#[tokio::test]
async fn reschedule_moves_the_window() {
    let (engine, _, _rx) = test_engine("reschedule.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let qid = engine.create_question(TEACHER, choice_spec(), now).await.unwrap();

    let start = now + Duration::HOUR;
    let end = now + Duration::hours(2);
    engine
        .reschedule_question(TEACHER, qid, Some(start), Some(end), false)
        .await
        .unwrap();
    assert_eq!(
        engine.question_state(qid, now).await.unwrap(),
        OpenState::Scheduled
    );

    assert!(matches!(
        engine
            .reschedule_question(OTHER_TEACHER, qid, None, None, true)
            .await,
        Err(EngineError::NotOwner(_))
    ));
}

#[tokio::test]
async fn close_is_idempotent_and_terminal() {
    let (engine, _, _rx) = test_engine("close_idem.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let qid = engine.create_question(TEACHER, choice_spec(), now).await.unwrap();

    assert!(engine.close_question(TEACHER, qid, now).await.unwrap());
    assert!(!engine.close_question(TEACHER, qid, now).await.unwrap());

    // Closed questions cannot be reopened by rescheduling
    assert!(matches!(
        engine
            .reschedule_question(TEACHER, qid, None, None, true)
            .await,
        Err(EngineError::Closed(_))
    ));
    assert_eq!(
        engine.question_state(qid, now).await.unwrap(),
        OpenState::Closed
    );
}

#[tokio::test]
async fn remove_question_clears_response_index() {
    let (engine, _, _rx) = test_engine("remove_question.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let qid = engine.create_question(TEACHER, choice_spec(), now).await.unwrap();
    let record = engine.submit(STUDENT, qid, select(&["A"]), now).await.unwrap();

    engine.remove_question(TEACHER, qid).await.unwrap();
    assert!(matches!(
        engine.question_info(qid).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.get_response(record.id).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Submissions ──────────────────────────────────────────

#[tokio::test]
async fn submit_grades_choice_question() {
    let (engine, _, _rx) = test_engine("submit_choice.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let qid = engine.create_question(TEACHER, choice_spec(), now).await.unwrap();

    let record = engine.submit(STUDENT, qid, select(&["A"]), now).await.unwrap();
    assert!(record.graded);
    assert_eq!(record.score, Some(100.0));
    assert_eq!(record.version, 1);
    assert!(!record.late);

    let wrong = engine.submit(STUDENT_B, qid, select(&["B"]), now).await.unwrap();
    assert_eq!(wrong.score, Some(0.0));
}

#[tokio::test]
async fn submit_respects_window_and_late_flag() {
    let (engine, _, _rx) = test_engine("submit_window.wal");
    let start = datetime!(2025-06-01 10:00 UTC);
    let end = datetime!(2025-06-01 11:00 UTC);

    let mut strict = choice_spec();
    strict.start_at = Some(start);
    strict.end_at = Some(end);
    let strict_q = engine
        .create_question(TEACHER, strict, start - Duration::HOUR)
        .await
        .unwrap();

    let mut lenient = choice_spec();
    lenient.start_at = Some(start);
    lenient.end_at = Some(end);
    lenient.allow_late = true;
    let lenient_q = engine
        .create_question(TEACHER, lenient, start - Duration::HOUR)
        .await
        .unwrap();

    // Before the window: rejected, never marked late
    assert!(matches!(
        engine
            .submit(STUDENT, strict_q, select(&["A"]), start - Duration::MINUTE)
            .await,
        Err(EngineError::Closed(_))
    ));
    assert!(matches!(
        engine
            .submit(STUDENT, lenient_q, select(&["A"]), start - Duration::MINUTE)
            .await,
        Err(EngineError::Closed(_))
    ));

    // After the window: rejected unless allow_late, then marked late
    let after = end + Duration::MINUTE;
    assert!(matches!(
        engine.submit(STUDENT, strict_q, select(&["A"]), after).await,
        Err(EngineError::Closed(_))
    ));
    let late = engine.submit(STUDENT, lenient_q, select(&["A"]), after).await.unwrap();
    assert!(late.late);
    assert_eq!(late.score, Some(100.0));
}

#[tokio::test]
async fn duplicate_submission_rejected_without_resubmission_flag() {
    let (engine, _, _rx) = test_engine("duplicate.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let qid = engine.create_question(TEACHER, choice_spec(), now).await.unwrap();

    engine.submit(STUDENT, qid, select(&["B"]), now).await.unwrap();
    assert!(matches!(
        engine.submit(STUDENT, qid, select(&["A"]), now).await,
        Err(EngineError::Duplicate(_))
    ));
    // A different student is unaffected
    engine.submit(STUDENT_B, qid, select(&["A"]), now).await.unwrap();
}

#[tokio::test]
async fn resubmissions_append_increasing_versions() {
    let (engine, _, _rx) = test_engine("versions.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let qid = engine.create_question(TEACHER, essay_spec(), now).await.unwrap();

    for expected in 1..=3u32 {
        let record = engine
            .submit(
                STUDENT,
                qid,
                SubmissionPayload::Text(format!("draft {expected}")),
                now + Duration::minutes(expected as i64),
            )
            .await
            .unwrap();
        assert_eq!(record.version, expected);
    }

    // All versions stay on the log; nothing is overwritten
    let responses = engine.list_responses(qid).await.unwrap();
    assert_eq!(responses.len(), 3);
    assert_eq!(responses.last().unwrap().answer_text.as_deref(), Some("draft 3"));

    let latest = engine.latest_responses(qid).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].version, 3);
}

#[tokio::test]
async fn concurrent_submissions_get_distinct_versions() {
    let (engine, _, _rx) = test_engine("concurrent_versions.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let qid = engine.create_question(TEACHER, essay_spec(), now).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .submit(STUDENT, qid, SubmissionPayload::Text(format!("attempt {i}")), now)
                    .await
                    .unwrap()
                    .version
            })
        })
        .collect();

    let mut versions: Vec<u32> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    versions.sort_unstable();
    assert_eq!(versions, (1..=16).collect::<Vec<u32>>());
}

#[tokio::test]
async fn submissions_to_closed_question_rejected() {
    let (engine, _, _rx) = test_engine("closed_submit.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let qid = engine.create_question(TEACHER, choice_spec(), now).await.unwrap();
    engine.close_question(TEACHER, qid, now).await.unwrap();

    assert!(matches!(
        engine.submit(STUDENT, qid, select(&["A"]), now).await,
        Err(EngineError::Closed(_))
    ));
}

#[tokio::test]
async fn closed_question_with_allow_late_still_accepts_stragglers() {
    let (engine, _, mut rx) = test_engine("closed_late.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let mut spec = choice_spec();
    spec.allow_late = true;
    spec.close_on_first_correct = true;
    let qid = engine.create_question(TEACHER, spec, now).await.unwrap();

    engine.submit(STUDENT, qid, select(&["A"]), now).await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), qid);
    engine.force_close(qid, CloseTrigger::Auto, now).await.unwrap();
    assert!(!engine.is_open(qid, now).await.unwrap());

    // A slower student's answer still lands, flagged late, and does not
    // re-trigger the close
    let straggler = engine.submit(STUDENT_B, qid, select(&["A"]), now).await.unwrap();
    assert!(straggler.late);
    assert!(rx.try_recv().is_err());
}

// ── Grading ──────────────────────────────────────────────

#[tokio::test]
async fn manual_grade_overwrites_same_version() {
    let (engine, _, _rx) = test_engine("manual_grade.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let qid = engine.create_question(TEACHER, essay_spec(), now).await.unwrap();
    let record = engine
        .submit(STUDENT, qid, SubmissionPayload::Text("my answer".into()), now)
        .await
        .unwrap();
    assert!(!record.graded);

    engine
        .grade_response(TEACHER, record.id, Some(70.0), Some("decent".into()), now)
        .await
        .unwrap();
    let graded = engine.get_response(record.id).await.unwrap();
    assert!(graded.graded);
    assert_eq!(graded.score, Some(70.0));
    assert_eq!(graded.feedback.as_deref(), Some("decent"));
    assert_eq!(graded.grader_id, Some(TEACHER));
    assert_eq!(graded.version, 1);

    // Regrading updates in place, no new version appears
    engine
        .grade_response(TEACHER, record.id, Some(85.0), None, now)
        .await
        .unwrap();
    let regraded = engine.get_response(record.id).await.unwrap();
    assert_eq!(regraded.score, Some(85.0));
    assert_eq!(engine.list_responses(qid).await.unwrap().len(), 1);
}

#[tokio::test]
async fn grade_validation_and_ownership() {
    let (engine, _, _rx) = test_engine("grade_checks.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let qid = engine.create_question(TEACHER, essay_spec(), now).await.unwrap();
    let record = engine
        .submit(STUDENT, qid, SubmissionPayload::Text("answer".into()), now)
        .await
        .unwrap();

    assert!(matches!(
        engine
            .grade_response(TEACHER, record.id, Some(101.0), None, now)
            .await,
        Err(EngineError::Bounds(_))
    ));
    assert!(matches!(
        engine
            .grade_response(OTHER_TEACHER, record.id, Some(50.0), None, now)
            .await,
        Err(EngineError::NotOwner(_))
    ));
    assert!(matches!(
        engine
            .grade_response(STUDENT, record.id, Some(50.0), None, now)
            .await,
        Err(EngineError::NotTeacher(_))
    ));
    assert!(matches!(
        engine
            .grade_response(TEACHER, Ulid::new(), Some(50.0), None, now)
            .await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Auto-close ───────────────────────────────────────────

#[tokio::test]
async fn first_correct_closes_exactly_once_under_racing_signals() {
    let (engine, _, mut rx) = test_engine("autoclose_race.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let mut spec = choice_spec();
    spec.close_on_first_correct = true;
    let qid = engine.create_question(TEACHER, spec, now).await.unwrap();

    // Two students answer correctly back to back; both signal
    engine.submit(STUDENT, qid, select(&["A"]), now).await.unwrap();
    engine.submit(STUDENT_B, qid, select(&["A"]), now).await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), qid);
    assert_eq!(rx.recv().await.unwrap(), qid);

    // Racing closers: exactly one flips the flag
    let a = tokio::spawn({
        let engine = engine.clone();
        async move { engine.force_close(qid, CloseTrigger::Auto, now).await.unwrap() }
    });
    let b = tokio::spawn({
        let engine = engine.clone();
        async move { engine.force_close(qid, CloseTrigger::Auto, now).await.unwrap() }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert!(a ^ b, "exactly one close must win");

    assert!(matches!(
        engine.submit(STUDENT, qid, select(&["B"]), now).await,
        Err(EngineError::Closed(_))
    ));
}

#[tokio::test]
async fn incorrect_answer_never_signals_autoclose() {
    let (engine, _, mut rx) = test_engine("autoclose_wrong.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let mut spec = choice_spec();
    spec.close_on_first_correct = true;
    let qid = engine.create_question(TEACHER, spec, now).await.unwrap();

    engine.submit(STUDENT, qid, select(&["B"]), now).await.unwrap();
    assert!(rx.try_recv().is_err());
    assert_eq!(engine.question_state(qid, now).await.unwrap(), OpenState::Open);
}

// ── Listings ─────────────────────────────────────────────

#[tokio::test]
async fn listings_filter_by_room_teacher_and_openness() {
    let (engine, _, _rx) = test_engine("listings.wal");
    let now = datetime!(2025-06-01 10:00 UTC);

    let in_room = engine.create_question(TEACHER, choice_spec(), now).await.unwrap();
    let private = engine.create_question(TEACHER, essay_spec(), now + Duration::SECOND).await.unwrap();
    let mut scheduled = essay_spec();
    scheduled.start_at = Some(now + Duration::HOUR);
    let pending = engine
        .create_question(OTHER_TEACHER, scheduled, now + Duration::seconds(2))
        .await
        .unwrap();

    let room = engine.list_questions_for_room(ROOM).await;
    assert_eq!(room.iter().map(|q| q.id).collect::<Vec<_>>(), vec![in_room]);

    let mine = engine.list_questions_for_teacher(TEACHER).await;
    assert_eq!(mine.len(), 2);
    assert_eq!(mine[0].id, in_room); // oldest first
    assert_eq!(mine[1].id, private);

    let open = engine.open_questions(now + Duration::minutes(5)).await;
    let open_ids: Vec<_> = open.iter().map(|q| q.id).collect();
    assert!(open_ids.contains(&in_room));
    assert!(open_ids.contains(&private));
    assert!(!open_ids.contains(&pending));
}

#[tokio::test]
async fn options_come_back_in_display_order() {
    let (engine, _, _rx) = test_engine("options_order.wal");
    let now = datetime!(2025-06-01 10:00 UTC);
    let qid = engine.create_question(TEACHER, choice_spec(), now).await.unwrap();

    let options = engine.list_options(qid).await.unwrap();
    assert_eq!(options.len(), 2);
    assert_eq!(options[0].key, "A");
    assert_eq!(options[1].key, "B");
    assert!(options[0].correct);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_reproduces_full_state() {
    let name = "replay_full.wal";
    let path = test_wal_path(name);
    let dir = seeded_directory();
    let now = datetime!(2025-06-01 10:00 UTC);

    let (slot_id, qid, graded_id) = {
        let (tx, _rx) = mpsc::channel(64);
        let engine =
            Engine::new(path.clone(), Arc::new(NotifyHub::new()), dir.clone(), tx).unwrap();

        let slot_id = engine
            .add_slot(TEACHER, Weekday::Monday, time!(9:00), time!(10:00))
            .await
            .unwrap();
        let qid = engine.create_question(TEACHER, essay_spec(), now).await.unwrap();
        let r1 = engine
            .submit(STUDENT, qid, SubmissionPayload::Text("first".into()), now)
            .await
            .unwrap();
        engine
            .submit(STUDENT, qid, SubmissionPayload::Text("second".into()), now)
            .await
            .unwrap();
        engine
            .grade_response(TEACHER, r1.id, Some(40.0), Some("rough".into()), now)
            .await
            .unwrap();
        engine.close_question(TEACHER, qid, now).await.unwrap();
        (slot_id, qid, r1.id)
    };

    // Fresh engine over the same WAL
    let (tx, _rx) = mpsc::channel(64);
    let engine = Engine::new(path, Arc::new(NotifyHub::new()), dir, tx).unwrap();

    let slots = engine.list_slots(TEACHER).await;
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].id, slot_id);

    let info = engine.question_info(qid).await.unwrap();
    assert!(info.close_triggered);
    assert_eq!(info.response_count, 2);

    let graded = engine.get_response(graded_id).await.unwrap();
    assert_eq!(graded.score, Some(40.0));
    assert_eq!(graded.feedback.as_deref(), Some("rough"));

    // Version counters survive replay too
    let latest = engine.latest_responses(qid).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].version, 2);

    // And the close flag still blocks submissions
    assert!(matches!(
        engine
            .submit(STUDENT, qid, SubmissionPayload::Text("third".into()), now)
            .await,
        Err(EngineError::Closed(_))
    ));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let name = "compact_state.wal";
    let path = test_wal_path(name);
    let dir = seeded_directory();
    let now = datetime!(2025-06-01 10:00 UTC);

    let (tx, _rx) = mpsc::channel(64);
    let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new()), dir.clone(), tx).unwrap();

    engine
        .add_slot(TEACHER, Weekday::Monday, time!(9:00), time!(10:00))
        .await
        .unwrap();
    let qid = engine.create_question(TEACHER, choice_spec(), now).await.unwrap();
    engine.submit(STUDENT, qid, select(&["A"]), now).await.unwrap();
    // Churn that compaction should fold away
    let tmp = engine.create_question(TEACHER, essay_spec(), now).await.unwrap();
    engine.remove_question(TEACHER, tmp).await.unwrap();

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    let (tx, _rx) = mpsc::channel(64);
    let reloaded = Engine::new(path, Arc::new(NotifyHub::new()), dir, tx).unwrap();
    assert_eq!(reloaded.list_slots(TEACHER).await.len(), 1);
    let info = reloaded.question_info(qid).await.unwrap();
    assert_eq!(info.response_count, 1);
    assert!(matches!(
        reloaded.question_info(tmp).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn compaction_runs_alongside_schedule_writes() {
    let (engine, _, _rx) = test_engine("compact_concurrent.wal");
    engine
        .add_slot(TEACHER, Weekday::Monday, time!(9:00), time!(10:00))
        .await
        .unwrap();

    // A compactor parked mid-snapshot must not block a slot insert that
    // lands on the same schedule-map shard.
    let (compacted, added) = futures::future::join(
        engine.compact_wal(),
        engine.add_slot(TEACHER, Weekday::Tuesday, time!(9:00), time!(10:00)),
    )
    .await;
    compacted.unwrap();
    added.unwrap();
    assert_eq!(engine.list_slots(TEACHER).await.len(), 2);
}

// ── State machine sanity on the raw aggregate ────────────

#[tokio::test]
async fn open_state_matches_submission_outcomes() {
    let (engine, _, _rx) = test_engine("state_vs_submit.wal");
    let start = datetime!(2025-06-01 10:00 UTC);
    let end = datetime!(2025-06-01 11:00 UTC);
    let mut spec = choice_spec();
    spec.start_at = Some(start);
    spec.end_at = Some(end);
    spec.allow_late = true;
    let qid = engine.create_question(TEACHER, spec, start).await.unwrap();

    let qs = engine.get_question(&qid).unwrap();
    let guard = qs.read().await;
    assert_eq!(open_state(&guard, end + Duration::MINUTE), OpenState::Expired);
    drop(guard);

    // Expired + allow_late still accepts, flagged late
    let record = engine
        .submit(STUDENT, qid, select(&["A"]), end + Duration::MINUTE)
        .await
        .unwrap();
    assert!(record.late);
}
