//! The engine proper: per-teacher schedules and per-question aggregates in
//! memory, durably backed by the WAL.

mod error;
pub mod grading;
mod queries;
mod questions;
mod responses;
mod schedule;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use grading::Evaluation;
pub use questions::OpenState;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::directory::Directory;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

/// Shared handle to one teacher's schedule aggregate.
pub type SharedSchedule = Arc<RwLock<TeacherSchedule>>;

/// Shared handle to one question aggregate.
pub type SharedQuestion = Arc<RwLock<QuestionState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
    result: &io::Result<()>,
) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// In-memory state plus durability, notification, and directory seams.
pub struct Engine {
    /// One schedule aggregate per teacher who ever added a slot.
    pub schedules: DashMap<UserId, SharedSchedule>,
    /// One aggregate per question.
    pub questions: DashMap<Ulid, SharedQuestion>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Per-question broadcast fan-out.
    pub notify: Arc<NotifyHub>,
    pub(super) directory: Arc<dyn Directory>,
    /// Reverse lookup: slot id → owning teacher.
    pub(super) slot_owner: DashMap<Ulid, UserId>,
    /// Reverse lookup: response id → question id.
    pub(super) response_question: DashMap<Ulid, Ulid>,
    /// Signals the auto-close task when a first correct answer lands.
    pub(super) autoclose_tx: mpsc::Sender<Ulid>,
}

/// Apply an event directly to a TeacherSchedule (no locking — caller holds the lock).
fn apply_to_schedule(
    sched: &mut TeacherSchedule,
    event: &Event,
    slot_owner: &DashMap<Ulid, UserId>,
) {
    match event {
        Event::SlotAdded {
            id,
            teacher_id,
            day,
            start,
            end,
        } => {
            sched.insert_slot(AvailabilitySlot {
                id: *id,
                day: *day,
                start: *start,
                end: *end,
            });
            slot_owner.insert(*id, *teacher_id);
        }
        Event::SlotUpdated {
            id,
            teacher_id,
            day,
            start,
            end,
        } => {
            sched.remove_slot(*id);
            sched.insert_slot(AvailabilitySlot {
                id: *id,
                day: *day,
                start: *start,
                end: *end,
            });
            slot_owner.insert(*id, *teacher_id);
        }
        Event::SlotRemoved { id, .. } => {
            sched.remove_slot(*id);
            slot_owner.remove(id);
        }
        _ => {}
    }
}

/// Apply an event directly to a QuestionState (no locking — caller holds the lock).
fn apply_to_question(
    qs: &mut QuestionState,
    event: &Event,
    response_question: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::QuestionRescheduled {
            start_at,
            end_at,
            manual_active,
            ..
        } => {
            qs.def.start_at = *start_at;
            qs.def.end_at = *end_at;
            qs.def.manual_active = *manual_active;
        }
        Event::QuestionClosed { trigger, at, .. } => {
            qs.close_triggered = true;
            qs.close_trigger = Some(*trigger);
            qs.closed_at = Some(*at);
            qs.def.manual_active = false;
        }
        Event::ResponseRecorded { record } => {
            response_question.insert(record.id, record.question_id);
            qs.record_response(record.clone());
        }
        Event::ResponseGraded {
            id,
            grader_id,
            score,
            feedback,
            ..
        } => {
            if let Some(r) = qs.response_mut(*id) {
                r.graded = true;
                r.score = *score;
                r.grader_id = Some(*grader_id);
                r.feedback = feedback.clone();
            }
        }
        // Created/Removed are handled at the DashMap level, not here
        _ => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        directory: Arc<dyn Directory>,
        autoclose_tx: mpsc::Sender<Ulid>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            schedules: DashMap::new(),
            questions: DashMap::new(),
            wal_tx,
            notify,
            directory,
            slot_owner: DashMap::new(),
            response_question: DashMap::new(),
            autoclose_tx,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this runs inside an async context.
        for event in &events {
            match event {
                Event::SlotAdded { teacher_id, .. }
                | Event::SlotUpdated { teacher_id, .. }
                | Event::SlotRemoved { teacher_id, .. } => {
                    let sched = engine.ensure_schedule(*teacher_id);
                    let mut guard = sched.try_write().expect("replay: uncontended write");
                    apply_to_schedule(&mut guard, event, &engine.slot_owner);
                }
                Event::QuestionCreated {
                    id,
                    def,
                    created_at,
                } => {
                    let qs = QuestionState::from_def(*id, def.clone(), *created_at);
                    engine.questions.insert(*id, Arc::new(RwLock::new(qs)));
                }
                Event::QuestionRemoved { id } => {
                    if let Some((_, qs)) = engine.questions.remove(id) {
                        let guard = qs.try_read().expect("replay: uncontended read");
                        for r in &guard.responses {
                            engine.response_question.remove(&r.id);
                        }
                    }
                }
                other => {
                    if let Some(question_id) = event_question_id(other)
                        && let Some(entry) = engine.questions.get(&question_id)
                    {
                        let qs = entry.value().clone();
                        let mut guard = qs.try_write().expect("replay: uncontended write");
                        apply_to_question(&mut guard, other, &engine.response_question);
                    }
                }
            }
        }
        metrics::gauge!(crate::observability::QUESTIONS_LOADED).set(engine.questions.len() as f64);

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// Schedule aggregate for a teacher, created empty on first touch.
    pub(super) fn ensure_schedule(&self, teacher_id: UserId) -> SharedSchedule {
        self.schedules
            .entry(teacher_id)
            .or_insert_with(|| Arc::new(RwLock::new(TeacherSchedule::new(teacher_id))))
            .value()
            .clone()
    }

    /// Existing schedule aggregate for a teacher, if any.
    pub fn get_schedule(&self, teacher_id: UserId) -> Option<SharedSchedule> {
        self.schedules.get(&teacher_id).map(|e| e.value().clone())
    }

    /// Question aggregate by id.
    pub fn get_question(&self, id: &Ulid) -> Option<SharedQuestion> {
        self.questions.get(id).map(|e| e.value().clone())
    }

    /// Question a response belongs to.
    pub fn question_of_response(&self, response_id: &Ulid) -> Option<Ulid> {
        self.response_question
            .get(response_id)
            .map(|e| *e.value())
    }

    /// WAL-append + apply, for schedule events. Slots have no broadcast
    /// channel, so there is no notify step.
    pub(super) async fn persist_and_apply_schedule(
        &self,
        sched: &mut TeacherSchedule,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_schedule(sched, event, &self.slot_owner);
        Ok(())
    }

    /// WAL-append + apply + notify in one call, for question events.
    pub(super) async fn persist_and_apply_question(
        &self,
        question_id: Ulid,
        qs: &mut QuestionState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_question(qs, event, &self.response_question);
        self.notify.send(question_id, event);
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        // Snapshot the Arcs first so no DashMap shard lock is held across
        // an await, same as the question branch below.
        let schedule_handles: Vec<SharedSchedule> =
            self.schedules.iter().map(|e| e.value().clone()).collect();
        for sched in schedule_handles {
            let guard = sched.read().await;
            for slot in &guard.slots {
                events.push(Event::SlotAdded {
                    id: slot.id,
                    teacher_id: guard.teacher_id,
                    day: slot.day,
                    start: slot.start,
                    end: slot.end,
                });
            }
        }

        let question_ids: Vec<Ulid> = self.questions.iter().map(|e| *e.key()).collect();
        for id in question_ids {
            let Some(qs) = self.get_question(&id) else {
                continue;
            };
            let guard = qs.read().await;
            // The def carries the current window and manual_active, so one
            // Created event recreates the aggregate shell.
            events.push(Event::QuestionCreated {
                id: guard.id,
                def: guard.def.clone(),
                created_at: guard.created_at,
            });
            for record in &guard.responses {
                events.push(Event::ResponseRecorded {
                    record: record.clone(),
                });
            }
            if let (true, Some(trigger), Some(at)) =
                (guard.close_triggered, guard.close_trigger, guard.closed_at)
            {
                events.push(Event::QuestionClosed {
                    id: guard.id,
                    trigger,
                    at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// Appends since the last compaction, from the writer task.
    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the question id from an event (for non-Create/Remove events).
fn event_question_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::QuestionRescheduled { id, .. } | Event::QuestionClosed { id, .. } => Some(*id),
        Event::ResponseRecorded { record } => Some(record.question_id),
        Event::ResponseGraded { question_id, .. } => Some(*question_id),
        Event::QuestionCreated { .. }
        | Event::QuestionRemoved { .. }
        | Event::SlotAdded { .. }
        | Event::SlotUpdated { .. }
        | Event::SlotRemoved { .. } => None,
    }
}
