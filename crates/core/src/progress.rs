//! Progress model - per-user, per-course snapshot with sequential unlock.

use crate::id::{CourseId, LectureId, ModuleId, ProgressId, UserId};
use crate::lecture::Lecture;
use crate::module::Module;
use crate::Time;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coarse completion state, derived from counters and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// Accessibility of a single lecture under sequential unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LectureState {
    Locked,
    Unlocked,
    Completed,
}

/// Fields a learner activity report may carry. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Watch position, in seconds
    pub watch_time: Option<u32>,

    /// Completion flag
    pub is_completed: Option<bool>,
}

/// Per-lecture entry in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LectureProgress {
    /// Lecture this entry tracks
    pub lecture_id: LectureId,

    /// Lecture position at snapshot time
    pub lecture_number: u32,

    /// Watch position, in seconds
    pub watch_time: u32,

    /// Completion flag
    pub is_completed: bool,

    /// When first completed; cleared if completion is revoked
    pub completed_at: Option<Time>,
}

impl LectureProgress {
    /// Fresh, unwatched entry for a lecture.
    pub fn new(lecture: &Lecture) -> Self {
        Self {
            lecture_id: lecture.id,
            lecture_number: lecture.lecture_number,
            watch_time: 0,
            is_completed: false,
            completed_at: None,
        }
    }

    /// Applies an activity report. A transition to completed stamps
    /// `completed_at` once; a transition away clears it.
    pub fn apply(&mut self, update: &ProgressUpdate, now: Time) {
        if let Some(watch_time) = update.watch_time {
            self.watch_time = watch_time;
        }
        if let Some(completed) = update.is_completed {
            self.is_completed = completed;
            if completed {
                if self.completed_at.is_none() {
                    self.completed_at = Some(now);
                }
            } else {
                self.completed_at = None;
            }
        }
    }
}

/// Per-module entry in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleProgress {
    /// Module this entry tracks
    pub module_id: ModuleId,

    /// Module position at snapshot time
    pub module_number: u32,

    /// Lecture entries, in lecture order
    pub lectures: Vec<LectureProgress>,

    /// Count of completed lecture entries
    pub completed_lectures: u32,

    /// True when every lecture entry is completed and at least one exists
    pub is_completed: bool,

    /// When the last outstanding lecture was completed
    pub completed_at: Option<Time>,
}

impl ModuleProgress {
    /// Fresh entry covering a module's lectures, all unwatched.
    pub fn new(module: &Module, lectures: &[Lecture]) -> Self {
        Self {
            module_id: module.id,
            module_number: module.module_number,
            lectures: lectures.iter().map(LectureProgress::new).collect(),
            completed_lectures: 0,
            is_completed: false,
            completed_at: None,
        }
    }

    /// Number of lecture entries in this module.
    pub fn total_lectures(&self) -> u32 {
        self.lectures.len() as u32
    }

    /// Restores the derived fields from the lecture entries. A module
    /// with no lecture entries never counts as completed.
    pub fn recalculate(&mut self, now: Time) {
        self.completed_lectures = self
            .lectures
            .iter()
            .filter(|lecture| lecture.is_completed)
            .count() as u32;
        let total = self.total_lectures();
        self.is_completed = total > 0 && self.completed_lectures == total;
        if self.is_completed {
            if self.completed_at.is_none() {
                self.completed_at = Some(now);
            }
        } else {
            self.completed_at = None;
        }
    }

    /// NotStarted until any lecture sees activity, Completed when all are done.
    pub fn status(&self) -> ProgressStatus {
        if self.is_completed {
            ProgressStatus::Completed
        } else if self
            .lectures
            .iter()
            .any(|lecture| lecture.is_completed || lecture.watch_time > 0)
        {
            ProgressStatus::InProgress
        } else {
            ProgressStatus::NotStarted
        }
    }
}

/// The per-(user, course) progress document. Captures the hierarchy as
/// of initialization and is mutated independently of later content
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    /// Unique identifier
    pub id: ProgressId,

    /// Learner
    pub user_id: UserId,

    /// Course the snapshot was taken from
    pub course_id: CourseId,

    /// Module entries, in course order
    pub modules: Vec<ModuleProgress>,

    /// Count of completed module entries
    pub completed_modules: u32,

    /// Sum of completed lectures across all module entries
    pub completed_lectures: u32,

    /// Module entry count, fixed at initialization
    pub total_modules: u32,

    /// Lecture entry count, fixed at initialization
    pub total_lectures: u32,

    /// Integer percentage 0-100, rounded
    pub progress_percentage: u8,

    /// True when every module entry is completed and at least one exists
    pub is_completed: bool,

    /// When the last outstanding module was completed
    pub completed_at: Option<Time>,

    /// When the snapshot was taken
    pub started_at: Time,

    /// When learner activity last touched this record
    pub last_accessed_at: Time,

    /// Optimistic concurrency token, bumped on every persisted write
    pub version: u64,
}

impl Progress {
    /// Fresh document over a snapshot; totals are fixed here for its lifetime.
    pub fn new(user_id: UserId, course_id: CourseId, modules: Vec<ModuleProgress>, now: Time) -> Self {
        let total_modules = modules.len() as u32;
        let total_lectures = modules
            .iter()
            .map(|module| module.lectures.len() as u32)
            .sum();
        Self {
            id: ProgressId::new(),
            user_id,
            course_id,
            modules,
            completed_modules: 0,
            completed_lectures: 0,
            total_modules,
            total_lectures,
            progress_percentage: 0,
            is_completed: false,
            completed_at: None,
            started_at: now,
            last_accessed_at: now,
            version: 1,
        }
    }

    /// Restores every derived field, module entries included, from the
    /// lecture entries. Idempotent.
    pub fn recalculate(&mut self, now: Time) {
        for module in &mut self.modules {
            module.recalculate(now);
        }
        self.completed_modules = self
            .modules
            .iter()
            .filter(|module| module.is_completed)
            .count() as u32;
        self.completed_lectures = self
            .modules
            .iter()
            .map(|module| module.completed_lectures)
            .sum();
        self.progress_percentage = percentage(self.completed_lectures, self.total_lectures);
        self.is_completed = self.total_modules > 0 && self.completed_modules == self.total_modules;
        if self.is_completed {
            if self.completed_at.is_none() {
                self.completed_at = Some(now);
            }
        } else {
            self.completed_at = None;
        }
    }

    /// NotStarted until any module sees activity, Completed when all are done.
    pub fn status(&self) -> ProgressStatus {
        if self.is_completed {
            ProgressStatus::Completed
        } else if self
            .modules
            .iter()
            .any(|module| module.status() != ProgressStatus::NotStarted)
        {
            ProgressStatus::InProgress
        } else {
            ProgressStatus::NotStarted
        }
    }

    /// Position of a lecture entry as (module index, lecture index).
    pub fn locate(&self, lecture_id: LectureId) -> Option<(usize, usize)> {
        self.modules.iter().enumerate().find_map(|(mi, module)| {
            module
                .lectures
                .iter()
                .position(|lecture| lecture.lecture_id == lecture_id)
                .map(|li| (mi, li))
        })
    }

    /// Flat lookup table over the snapshot, for callers issuing many
    /// point queries against one loaded record.
    pub fn lecture_index(&self) -> HashMap<LectureId, (usize, usize)> {
        let mut index = HashMap::new();
        for (mi, module) in self.modules.iter().enumerate() {
            for (li, lecture) in module.lectures.iter().enumerate() {
                index.insert(lecture.lecture_id, (mi, li));
            }
        }
        index
    }

    /// Applies an activity report to one lecture entry and restores all
    /// derived fields. Returns `None` when the lecture is not part of
    /// the snapshot.
    pub fn apply_update(
        &mut self,
        lecture_id: LectureId,
        update: &ProgressUpdate,
        now: Time,
    ) -> Option<()> {
        let (mi, li) = self.locate(lecture_id)?;
        self.modules[mi].lectures[li].apply(update, now);
        self.recalculate(now);
        self.last_accessed_at = now;
        Some(())
    }

    /// The lecture a learner should watch next.
    ///
    /// Walks modules in order and lectures within each module in order.
    /// The first lecture of a module is always reachable once the module
    /// is reached; otherwise the lecture after the last completed one is
    /// returned. If the immediately preceding lecture is itself
    /// incomplete, its id is returned instead, steering the learner back
    /// to the gap. `None` once every lecture is completed.
    pub fn next_unlocked(&self) -> Option<LectureId> {
        for module in &self.modules {
            for (i, lecture) in module.lectures.iter().enumerate() {
                if lecture.is_completed {
                    continue;
                }
                if i == 0 {
                    return Some(lecture.lecture_id);
                }
                let previous = &module.lectures[i - 1];
                if previous.is_completed {
                    return Some(lecture.lecture_id);
                }
                return Some(previous.lecture_id);
            }
        }
        None
    }

    /// Whether a lecture is accessible. Everything at or before the next
    /// unlocked lecture is; later lectures only if already completed.
    /// `None` when the lecture is not part of the snapshot.
    pub fn is_lecture_unlocked(&self, lecture_id: LectureId) -> Option<bool> {
        let (mi, li) = self.locate(lecture_id)?;
        let completed = self.modules[mi].lectures[li].is_completed;
        let Some(next_id) = self.next_unlocked() else {
            return Some(true);
        };
        for lecture in self.modules.iter().flat_map(|module| module.lectures.iter()) {
            if lecture.lecture_id == lecture_id {
                return Some(true);
            }
            if lecture.lecture_id == next_id {
                break;
            }
        }
        Some(completed)
    }

    /// State of a single lecture. `None` when it is not part of the
    /// snapshot.
    pub fn lecture_state(&self, lecture_id: LectureId) -> Option<LectureState> {
        let (mi, li) = self.locate(lecture_id)?;
        if self.modules[mi].lectures[li].is_completed {
            return Some(LectureState::Completed);
        }
        match self.is_lecture_unlocked(lecture_id)? {
            true => Some(LectureState::Unlocked),
            false => Some(LectureState::Locked),
        }
    }

    /// States of every lecture entry in snapshot order, computed in a
    /// single pass instead of one scan per lecture.
    pub fn lecture_states(&self) -> Vec<(LectureId, LectureState)> {
        let next = self.next_unlocked();
        let mut states = Vec::with_capacity(self.total_lectures as usize);
        let mut past_next = false;
        for lecture in self.modules.iter().flat_map(|module| module.lectures.iter()) {
            let state = if lecture.is_completed {
                LectureState::Completed
            } else if !past_next {
                LectureState::Unlocked
            } else {
                LectureState::Locked
            };
            if Some(lecture.lecture_id) == next {
                past_next = true;
            }
            states.push((lecture.lecture_id, state));
        }
        states
    }
}

/// Integer completion percentage, rounded half away from zero.
/// Defined as 0 when `total` is 0.
pub fn percentage(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 / total as f64) * 100.0).round() as u8
}
