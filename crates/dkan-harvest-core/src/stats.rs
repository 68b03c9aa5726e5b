//! Outcome and statistics types for the gather and import stages.

use uuid::Uuid;

/// Outcome of importing a single harvest object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// No local package with this id existed; one was created.
    Created,
    /// The local package was older than the harvested one and was updated.
    Updated,
    /// The local package is as recent as the harvested one.
    Unchanged,
    /// The object describes a harvest source and was not imported.
    Skipped,
    /// An error was recorded against the object.
    Failed,
}

impl ImportOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportOutcome::Created => "created",
            ImportOutcome::Updated => "updated",
            ImportOutcome::Unchanged => "unchanged",
            ImportOutcome::Skipped => "skipped",
            ImportOutcome::Failed => "failed",
        }
    }

    /// True when the object ended up in the local catalog.
    pub fn is_imported(&self) -> bool {
        matches!(
            self,
            ImportOutcome::Created | ImportOutcome::Updated | ImportOutcome::Unchanged
        )
    }
}

/// Counters for one import run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ImportStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome, incrementing the appropriate counter.
    pub fn record(&mut self, outcome: ImportOutcome) {
        match outcome {
            ImportOutcome::Created => self.created += 1,
            ImportOutcome::Updated => self.updated += 1,
            ImportOutcome::Unchanged => self.unchanged += 1,
            ImportOutcome::Skipped => self.skipped += 1,
            ImportOutcome::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.skipped + self.failed
    }

    pub fn successful(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

/// Search mode used by a gather run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherMode {
    /// Everything the organization filters allow.
    Full,
    /// Only packages modified since the last error-free job.
    Incremental,
}

impl GatherMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatherMode::Full => "full",
            GatherMode::Incremental => "incremental",
        }
    }
}

/// Counters for one gather run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherStats {
    pub mode: GatherMode,
    /// Records returned by the search.
    pub found: usize,
    /// Records discarded because their id was already gathered in this run.
    pub duplicates: usize,
    /// Records that failed conversion.
    pub failed: usize,
    /// Harvest objects created.
    pub gathered: usize,
}

impl GatherStats {
    pub fn new(mode: GatherMode, found: usize) -> Self {
        Self {
            mode,
            found,
            duplicates: 0,
            failed: 0,
            gathered: 0,
        }
    }
}

/// Result of a gather run.
#[derive(Debug, Clone, PartialEq)]
pub enum GatherOutcome {
    /// Harvest objects were created for these ids.
    Gathered {
        object_ids: Vec<Uuid>,
        stats: GatherStats,
    },
    /// The incremental search found nothing modified since the last job.
    NothingNew,
}

impl GatherOutcome {
    /// Ids of the created objects; empty for [`GatherOutcome::NothingNew`].
    pub fn object_ids(&self) -> &[Uuid] {
        match self {
            GatherOutcome::Gathered { object_ids, .. } => object_ids,
            GatherOutcome::NothingNew => &[],
        }
    }
}
