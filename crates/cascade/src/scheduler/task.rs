use crate::value::Record;
use core::fmt;

/// Arena key of a [`Task`].
pub type TaskId = u64;

/// One combination handed out for computation.
///
/// A task can be bound to several nodes at once after cannibalization. The
/// first successful submission sets `no_realloc`, after which the task is
/// never handed out again.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    id: TaskId,
    values: Record,
    level: u32,
    created_at: u64,
    last_allocated_at: u64,
    no_realloc: bool,
    pub(crate) holders: u32,
}

impl Task {
    pub(crate) fn new(id: TaskId, values: Record, level: u32, now: u64) -> Self {
        Self {
            id,
            values,
            level,
            created_at: now,
            last_allocated_at: now,
            no_realloc: false,
            holders: 0,
        }
    }

    pub const fn id(&self) -> TaskId {
        self.id
    }

    pub fn values(&self) -> &Record {
        &self.values
    }

    /// Densification level the combination was drawn at.
    pub const fn level(&self) -> u32 {
        self.level
    }

    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    pub const fn last_allocated_at(&self) -> u64 {
        self.last_allocated_at
    }

    pub const fn no_realloc(&self) -> bool {
        self.no_realloc
    }

    /// Number of nodes currently holding this task.
    pub const fn holders(&self) -> u32 {
        self.holders
    }

    /// Records a new allocation. `last_allocated_at` always moves forward,
    /// even if the clock did not.
    pub(crate) fn realloc(&mut self, now: u64) {
        self.last_allocated_at = now.max(self.last_allocated_at.saturating_add(1));
    }

    pub(crate) fn complete(&mut self) {
        self.no_realloc = true;
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.values {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{name} = {value}")?;
        }
        Ok(())
    }
}
