// Flat-file roster store: ordered in-memory records backed by one text file

use crate::codec;
use crate::filter::Filter;
use crate::record::Record;
use crate::validation::{self, Conflict};
use eyre::{Context, Result};
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A successful change to the in-memory collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Added { id: i64 },
    Updated { original_id: i64, id: i64 },
    Deleted { id: i64 },
}

/// Outcome of a `load()`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Records now held in memory
    pub loaded: usize,
    /// Decoded records dropped because an earlier line held the same id, name or email
    pub duplicates_dropped: usize,
}

type Subscriber = Box<dyn FnMut(&Mutation)>;

/// Roster store with a flat text file as its source of truth
///
/// Records keep insertion order. Ids, non-blank normalized names and
/// non-blank normalized emails are unique across the collection.
pub struct RecordStore {
    path: PathBuf,
    records: Vec<Record>,
    subscribers: Vec<Subscriber>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .field("records", &self.records.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl RecordStore {
    /// Create an empty store bound to `path` without touching the file
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            records: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Create a store bound to `path` and load it
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    /// Get the backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records in collection order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Register a callback invoked after every successful add, update or delete
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&Mutation) + 'static,
    {
        self.subscribers.push(Box::new(callback));
    }

    fn notify(&mut self, mutation: Mutation) {
        debug!(?mutation, subscribers = self.subscribers.len(), "notify: called");
        for subscriber in &mut self.subscribers {
            subscriber(&mutation);
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Replace the in-memory collection with the file contents
    ///
    /// A missing file is created empty (best-effort) and leaves the store
    /// empty. Duplicate ids, names and emails keep their first occurrence;
    /// later ones are dropped with a warning and counted in the summary.
    /// Read failures on an existing file are returned.
    pub fn load(&mut self) -> Result<LoadSummary> {
        self.records.clear();

        if !self.path.exists() {
            match File::create(&self.path) {
                Ok(_) => info!(file = ?self.path, "Created empty roster file"),
                Err(e) => warn!(file = ?self.path, error = ?e, "Failed to create roster file"),
            }
            return Ok(LoadSummary::default());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open roster file {}", self.path.display()))?;
        let decoded = codec::read_records(BufReader::new(file), &self.path)?;

        let mut seen = SeenKeys::default();
        let mut summary = LoadSummary::default();
        for record in decoded {
            if seen.admit(&record) {
                self.records.push(record);
            } else {
                warn!(
                    file = ?self.path,
                    id = record.id,
                    "Dropping duplicate record (id, name or email already loaded)"
                );
                summary.duplicates_dropped += 1;
            }
        }
        summary.loaded = self.records.len();

        info!(
            file = ?self.path,
            count = summary.loaded,
            dropped = summary.duplicates_dropped,
            "Loaded roster"
        );
        Ok(summary)
    }

    /// Rewrite the whole file with one canonical line per record
    ///
    /// Holds an advisory exclusive lock for the duration of the rewrite.
    pub fn save(&self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("Failed to open roster file {} for writing", self.path.display()))?;

        file.lock_exclusive().context("Failed to acquire file lock")?;
        file.set_len(0).context("Failed to truncate roster file")?;

        let mut writer = BufWriter::new(&file);
        for record in &self.records {
            writeln!(writer, "{}", codec::encode(record))?;
        }
        writer.flush()?;
        drop(writer);
        file.sync_all()?;

        // Lock is released when file is dropped
        debug!(file = ?self.path, count = self.records.len(), "Saved roster");
        Ok(())
    }

    // ========================================================================
    // CRUD API
    // ========================================================================

    /// Find the record stored under `id`
    pub fn find_by_id(&self, id: i64) -> Option<&Record> {
        if id <= 0 {
            return None;
        }
        self.records.iter().find(|r| r.id == id)
    }

    /// Append a record unless its id, name or email is already taken
    pub fn add(&mut self, record: Record) -> std::result::Result<(), Conflict> {
        if record.id <= 0 {
            return Err(Conflict::InvalidId);
        }
        Self::first_conflict(&self.records, &record, None)?;

        let id = record.id;
        self.records.push(record);
        self.notify(Mutation::Added { id });
        Ok(())
    }

    /// Replace the record stored under `original_id` with `updated`, in place
    ///
    /// The id may change as long as the new one is free. Name and email are
    /// checked against every record except the one being replaced.
    pub fn update(&mut self, original_id: i64, updated: Record) -> std::result::Result<(), Conflict> {
        if original_id <= 0 || updated.id <= 0 {
            return Err(Conflict::InvalidId);
        }
        let index = self
            .records
            .iter()
            .position(|r| r.id == original_id)
            .ok_or(Conflict::NotFound(original_id))?;
        Self::first_conflict(&self.records, &updated, Some(original_id))?;

        let id = updated.id;
        self.records[index] = updated;
        self.notify(Mutation::Updated { original_id, id });
        Ok(())
    }

    /// Remove the record stored under `id`, returning whether one was removed
    pub fn delete(&mut self, id: i64) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        let removed = self.records.len() != before;
        if removed {
            self.notify(Mutation::Deleted { id });
        }
        removed
    }

    /// Records matching `filter`, in collection order
    pub fn search(&self, filter: &Filter) -> Vec<&Record> {
        self.records.iter().filter(|r| filter.matches(r)).collect()
    }

    /// Advisory rule check for a record about to be added or updated
    ///
    /// Pass the store to include uniqueness checks and `original_id` when
    /// validating an edit of an existing record.
    pub fn validate(
        record: &Record,
        check_duplicate_id: bool,
        store: Option<&RecordStore>,
        original_id: Option<i64>,
    ) -> Vec<String> {
        validation::validate(record, check_duplicate_id, store.map(|s| s.records()), original_id)
    }

    fn first_conflict(
        records: &[Record],
        candidate: &Record,
        replacing: Option<i64>,
    ) -> std::result::Result<(), Conflict> {
        match validation::uniqueness_conflicts(records, candidate, replacing, true).first() {
            Some(conflict) => Err(*conflict),
            None => Ok(()),
        }
    }
}

/// Keys already taken by records kept during a load
#[derive(Default)]
struct SeenKeys {
    ids: HashSet<i64>,
    names: HashSet<String>,
    emails: HashSet<String>,
}

impl SeenKeys {
    /// Claim id, then name, then email, stopping at the first key already seen
    ///
    /// Keys claimed before the clash stay claimed, so a dropped record can
    /// still shadow later records sharing its id or name.
    fn admit(&mut self, record: &Record) -> bool {
        self.ids.insert(record.id)
            && record.normalized_name().is_none_or(|n| self.names.insert(n))
            && record.normalized_email().is_none_or(|e| self.emails.insert(e))
    }
}
