// Auto-save / auto-reload session around a RecordStore
//
// Two timers share one thread: a debounce timer that saves after a quiet
// period following mutations, and a poll timer that reloads when the file is
// changed by someone else. A save stamps `last_self_save`, and a modification
// time within `guard_window` of that stamp is treated as our own write.

use crate::config::SyncSettings;
use crate::store::{LoadSummary, RecordStore};
use eyre::Result;
use std::cell::Cell;
use std::fs;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Longest single sleep in `run_until`, so the stop predicate stays responsive
const MAX_IDLE_SLEEP: Duration = Duration::from_millis(250);

/// Wall-clock source for timer scheduling and self-save stamps
pub trait Clock: Clone + 'static {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Hand-driven clock; clones share the same time
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<SystemTime>>,
}

impl ManualClock {
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, to: SystemTime) {
        self.now.set(to);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        self.now.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Attached,
    Saved { automatic: bool },
    Reloaded { external: bool },
    /// A user-requested save or reload failed
    Failed,
}

/// Status update for the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

type Listener = Box<dyn FnMut(&Notice)>;

/// Keeps a store and its backing file in step for a long-running session
///
/// Mutations made through `store_mut()` restart the debounce timer via the
/// store's mutation subscription. Call `tick()` whenever a deadline passes
/// (see `next_deadline()`), or hand control to `run_until()`.
pub struct SyncController<C: Clock = SystemClock> {
    store: RecordStore,
    clock: C,
    settings: SyncSettings,
    last_known_modified: Option<SystemTime>,
    last_self_save: Option<SystemTime>,
    save_deadline: Rc<Cell<Option<SystemTime>>>,
    next_poll: Option<SystemTime>,
    listeners: Vec<Listener>,
    closed: bool,
}

impl SyncController<SystemClock> {
    pub fn attach(store: RecordStore, settings: SyncSettings) -> Self {
        Self::with_clock(store, settings, SystemClock)
    }
}

impl<C: Clock> SyncController<C> {
    pub fn with_clock(mut store: RecordStore, settings: SyncSettings, clock: C) -> Self {
        let save_deadline: Rc<Cell<Option<SystemTime>>> = Rc::new(Cell::new(None));

        let deadline = Rc::clone(&save_deadline);
        let debounce_clock = clock.clone();
        let debounce = settings.debounce();
        store.subscribe(move |mutation| {
            debug!(?mutation, "Restarting auto-save debounce");
            deadline.set(Some(debounce_clock.now() + debounce));
        });

        let now = clock.now();
        let mut controller = Self {
            store,
            clock,
            settings,
            last_known_modified: None,
            last_self_save: None,
            save_deadline,
            next_poll: Some(now + settings.poll_interval()),
            listeners: Vec::new(),
            closed: false,
        };
        controller.last_known_modified = controller.file_modified();

        info!(
            file = ?controller.store.path(),
            count = controller.store.len(),
            "Sync session attached"
        );
        controller
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Mutable access for add/update/delete; successful mutations schedule an auto-save
    pub fn store_mut(&mut self) -> &mut RecordStore {
        &mut self.store
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Register a callback for save and reload notices
    pub fn on_notice<F>(&mut self, listener: F)
    where
        F: FnMut(&Notice) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Record count and file path at attach time, for the initial status line
    pub fn attached_notice(&self) -> Notice {
        Notice::new(
            NoticeKind::Attached,
            format!(
                "Loaded {} students from {}",
                self.store.len(),
                self.store.path().display()
            ),
        )
    }

    pub fn save_pending(&self) -> bool {
        self.save_deadline.get().is_some()
    }

    pub fn last_known_modified(&self) -> Option<SystemTime> {
        self.last_known_modified
    }

    pub fn last_self_save(&self) -> Option<SystemTime> {
        self.last_self_save
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Earliest pending timer, or `None` once closed
    pub fn next_deadline(&self) -> Option<SystemTime> {
        if self.closed {
            return None;
        }
        match (self.save_deadline.get(), self.next_poll) {
            (Some(save), Some(poll)) => Some(save.min(poll)),
            (save, poll) => save.or(poll),
        }
    }

    /// Fire every timer that is due: debounce save first, then the poll
    pub fn tick(&mut self) {
        if self.closed {
            return;
        }
        let now = self.clock.now();

        if self.save_deadline.get().is_some_and(|deadline| deadline <= now) {
            self.save_deadline.set(None);
            self.auto_save();
        }

        if self.next_poll.is_some_and(|poll| poll <= now) {
            self.next_poll = Some(now + self.settings.poll_interval());
            self.poll_external_change();
        }
    }

    /// Drive the timers on the current thread until `stop` returns true or the session closes
    pub fn run_until<F>(&mut self, mut stop: F)
    where
        F: FnMut(&Self) -> bool,
    {
        while !self.closed && !stop(self) {
            self.tick();
            let wait = self
                .next_deadline()
                .and_then(|deadline| deadline.duration_since(self.clock.now()).ok())
                .unwrap_or_default()
                .min(MAX_IDLE_SLEEP);
            if !wait.is_zero() {
                thread::sleep(wait);
            }
        }
    }

    /// User-requested save; errors are surfaced
    pub fn save(&mut self) -> Result<()> {
        match self.store.save() {
            Ok(()) => {
                self.save_deadline.set(None);
                self.record_self_save();
                let path = self.store.path().display().to_string();
                self.emit(Notice::new(
                    NoticeKind::Saved { automatic: false },
                    format!("Saved to file: {}", path),
                ));
                Ok(())
            }
            Err(e) => {
                self.emit(Notice::new(NoticeKind::Failed, format!("Save failed: {:#}", e)));
                Err(e)
            }
        }
    }

    /// User-requested reload; errors are surfaced
    pub fn reload(&mut self) -> Result<LoadSummary> {
        match self.store.load() {
            Ok(summary) => {
                self.save_deadline.set(None);
                self.last_known_modified = self.file_modified();
                self.emit(Notice::new(
                    NoticeKind::Reloaded { external: false },
                    format!("Reloaded {} students from file", summary.loaded),
                ));
                Ok(summary)
            }
            Err(e) => {
                self.emit(Notice::new(NoticeKind::Failed, format!("Reload failed: {:#}", e)));
                Err(e)
            }
        }
    }

    /// End the session: best-effort final save, then stop both timers
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.store.save() {
            warn!(file = ?self.store.path(), error = %format!("{:#}", e), "Final save failed");
        } else {
            self.record_self_save();
        }
        self.save_deadline.set(None);
        self.next_poll = None;
        self.closed = true;
        info!(file = ?self.store.path(), "Sync session closed");
    }

    fn auto_save(&mut self) {
        match self.store.save() {
            Ok(()) => {
                self.record_self_save();
                let count = self.store.len();
                self.emit(Notice::new(
                    NoticeKind::Saved { automatic: true },
                    format!("Auto-saved {} students", count),
                ));
            }
            Err(e) => warn!(file = ?self.store.path(), error = %format!("{:#}", e), "Auto-save failed"),
        }
    }

    fn poll_external_change(&mut self) {
        let Some(modified) = self.file_modified() else {
            return;
        };
        let known = self.last_known_modified.unwrap_or(UNIX_EPOCH);
        let guard_until = self.last_self_save.unwrap_or(UNIX_EPOCH) + self.settings.guard_window();
        if modified <= known || modified <= guard_until {
            return;
        }

        info!(file = ?self.store.path(), "Roster file changed externally, reloading");
        match self.store.load() {
            Ok(summary) => {
                // The file now holds the newest state, so a pending save has nothing to add
                self.save_deadline.set(None);
                self.last_known_modified = Some(modified);
                self.emit(Notice::new(
                    NoticeKind::Reloaded { external: true },
                    format!("Auto-reloaded {} students from file", summary.loaded),
                ));
            }
            Err(e) => warn!(file = ?self.store.path(), error = %format!("{:#}", e), "Auto-reload failed"),
        }
    }

    fn record_self_save(&mut self) {
        self.last_self_save = Some(self.clock.now());
        self.last_known_modified = self.file_modified();
    }

    fn file_modified(&self) -> Option<SystemTime> {
        fs::metadata(self.store.path()).and_then(|m| m.modified()).ok()
    }

    fn emit(&mut self, notice: Notice) {
        debug!(kind = ?notice.kind, message = %notice.message, "emit: called");
        for listener in &mut self.listeners {
            listener(&notice);
        }
    }
}

impl<C: Clock> Drop for SyncController<C> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use std::cell::RefCell;
    use std::fs::File;
    use tempfile::TempDir;

    // Field order matters: the controller's final save runs before the temp dir is removed
    struct Session {
        controller: SyncController<ManualClock>,
        clock: ManualClock,
        notices: Rc<RefCell<Vec<Notice>>>,
        _temp: TempDir,
    }

    fn session(contents: &str) -> Session {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("students.txt");
        fs::write(&path, contents).unwrap();
        let store = RecordStore::open(&path).unwrap();

        let clock = ManualClock::new(SystemTime::now());
        let mut controller = SyncController::with_clock(store, SyncSettings::default(), clock.clone());
        let notices = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&notices);
        controller.on_notice(move |n| sink.borrow_mut().push(n.clone()));

        Session {
            controller,
            clock,
            notices,
            _temp: temp,
        }
    }

    fn kinds(s: &Session) -> Vec<NoticeKind> {
        s.notices.borrow().iter().map(|n| n.kind).collect()
    }

    fn count_saves(s: &Session) -> usize {
        kinds(s)
            .into_iter()
            .filter(|k| *k == NoticeKind::Saved { automatic: true })
            .count()
    }

    /// Write the file as another process would and stamp it with `mtime`
    fn external_write(s: &Session, contents: &str, mtime: SystemTime) {
        let path = s.controller.store().path().to_path_buf();
        fs::write(&path, contents).unwrap();
        File::options().write(true).open(&path).unwrap().set_modified(mtime).unwrap();
    }

    #[test]
    fn test_attach_records_modification_time() {
        let s = session("1|Ann|20||||\n");
        let expected = fs::metadata(s.controller.store().path()).unwrap().modified().unwrap();
        assert_eq!(s.controller.last_known_modified(), Some(expected));

        let notice = s.controller.attached_notice();
        assert_eq!(notice.kind, NoticeKind::Attached);
        assert!(notice.message.starts_with("Loaded 1 students from "));
    }

    #[test]
    fn test_debounce_coalesces_bursts() {
        let mut s = session("");

        s.controller.store_mut().add(Record::new(1, "A", 1)).unwrap();
        s.clock.advance(Duration::from_millis(300));
        s.controller.tick();
        s.controller.store_mut().add(Record::new(2, "B", 1)).unwrap();
        s.clock.advance(Duration::from_millis(300));
        s.controller.tick();
        s.controller.store_mut().delete(1);
        assert_eq!(count_saves(&s), 0);

        s.clock.advance(Duration::from_millis(900));
        s.controller.tick();
        assert_eq!(count_saves(&s), 0);
        assert!(s.controller.save_pending());

        s.clock.advance(Duration::from_millis(100));
        s.controller.tick();
        assert_eq!(count_saves(&s), 1);
        assert!(!s.controller.save_pending());

        let contents = fs::read_to_string(s.controller.store().path()).unwrap();
        assert_eq!(contents, "2|B|1||||\n");

        s.clock.advance(Duration::from_secs(5));
        s.controller.tick();
        assert_eq!(count_saves(&s), 1);
    }

    #[test]
    fn test_rejected_mutation_does_not_schedule_save() {
        let mut s = session("1|Ann|20||||\n");
        assert!(s.controller.store_mut().add(Record::new(1, "Dup", 1)).is_err());
        assert!(!s.controller.store_mut().delete(99));
        assert!(!s.controller.save_pending());
    }

    #[test]
    fn test_own_save_is_not_reloaded() {
        let mut s = session("");
        s.controller.store_mut().add(Record::new(1, "A", 1)).unwrap();
        s.clock.advance(Duration::from_secs(2));
        s.controller.tick();
        assert_eq!(count_saves(&s), 1);

        // Poll immediately after the save
        s.clock.advance(Duration::from_secs(2));
        s.controller.tick();
        assert!(!kinds(&s).iter().any(|k| matches!(k, NoticeKind::Reloaded { .. })));
        assert_eq!(s.controller.store().len(), 1);
    }

    #[test]
    fn test_change_inside_guard_window_is_ignored() {
        let mut s = session("");
        s.controller.save().unwrap();
        let saved_at = s.controller.last_self_save().unwrap();

        external_write(&s, "9|Echo|1||||\n", saved_at + Duration::from_millis(200));
        s.clock.advance(Duration::from_secs(2));
        s.controller.tick();

        assert!(s.controller.store().is_empty());
        assert!(!kinds(&s).contains(&NoticeKind::Reloaded { external: true }));
    }

    #[test]
    fn test_external_change_is_reloaded() {
        let mut s = session("1|Ann|20||||\n");
        s.controller.save().unwrap();
        let saved_at = s.controller.last_self_save().unwrap();

        let mtime = saved_at + Duration::from_secs(5);
        external_write(&s, "1|Ann|20||||\n2|Bob|30||||\n", mtime);
        s.clock.advance(Duration::from_secs(2));
        s.controller.tick();

        assert_eq!(s.controller.store().len(), 2);
        assert_eq!(s.controller.last_known_modified(), Some(mtime));
        let notices = s.notices.borrow();
        let last = notices.last().unwrap();
        assert_eq!(last.kind, NoticeKind::Reloaded { external: true });
        assert_eq!(last.message, "Auto-reloaded 2 students from file");
    }

    #[test]
    fn test_external_change_detected_once() {
        let mut s = session("1|Ann|20||||\n");
        let base = s.controller.last_known_modified().unwrap();
        external_write(&s, "2|Bob|30||||\n", base + Duration::from_secs(10));

        s.clock.advance(Duration::from_secs(2));
        s.controller.tick();
        s.clock.advance(Duration::from_secs(2));
        s.controller.tick();

        let reloads = kinds(&s)
            .into_iter()
            .filter(|k| *k == NoticeKind::Reloaded { external: true })
            .count();
        assert_eq!(reloads, 1);
        assert!(s.controller.store().find_by_id(2).is_some());
    }

    #[test]
    fn test_poll_waits_for_interval() {
        let mut s = session("1|Ann|20||||\n");
        let base = s.controller.last_known_modified().unwrap();
        external_write(&s, "2|Bob|30||||\n", base + Duration::from_secs(10));

        s.clock.advance(Duration::from_millis(1000));
        s.controller.tick();
        assert!(s.controller.store().find_by_id(1).is_some());

        s.clock.advance(Duration::from_millis(500));
        s.controller.tick();
        assert!(s.controller.store().find_by_id(2).is_some());
    }

    #[test]
    fn test_missing_file_poll_is_noop() {
        let mut s = session("1|Ann|20||||\n");
        fs::remove_file(s.controller.store().path()).unwrap();
        s.clock.advance(Duration::from_secs(2));
        s.controller.tick();
        assert_eq!(s.controller.store().len(), 1);
        assert!(s.notices.borrow().is_empty());
    }

    #[test]
    fn test_external_reload_cancels_pending_save() {
        let mut s = session("1|Ann|20||||\n");
        let base = s.controller.last_known_modified().unwrap();
        s.clock.advance(Duration::from_millis(1000));
        s.controller.store_mut().add(Record::new(5, "Local", 1)).unwrap();
        external_write(&s, "2|Bob|30||||\n", base + Duration::from_secs(10));

        s.clock.advance(Duration::from_millis(500));
        s.controller.tick();
        assert!(!s.controller.save_pending());
        assert!(s.controller.store().find_by_id(5).is_none());
        assert_eq!(
            fs::read_to_string(s.controller.store().path()).unwrap(),
            "2|Bob|30||||\n"
        );
    }

    #[test]
    fn test_manual_save_and_reload_notices() {
        let mut s = session("1|Ann|20||||\n");
        s.controller.store_mut().add(Record::new(2, "Bob", 1)).unwrap();
        s.controller.save().unwrap();
        assert!(!s.controller.save_pending());
        assert!(s.controller.last_self_save().is_some());

        let summary = s.controller.reload().unwrap();
        assert_eq!(summary.loaded, 2);
        assert_eq!(
            kinds(&s),
            vec![
                NoticeKind::Saved { automatic: false },
                NoticeKind::Reloaded { external: false },
            ]
        );
        assert!(s.notices.borrow()[0].message.starts_with("Saved to file: "));
    }

    #[test]
    fn test_manual_save_failure_is_surfaced() {
        let temp = TempDir::new().unwrap();
        let store = RecordStore::new(temp.path().join("missing-dir").join("students.txt"));
        let clock = ManualClock::new(SystemTime::now());
        let mut controller = SyncController::with_clock(store, SyncSettings::default(), clock.clone());
        let notices = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&notices);
        controller.on_notice(move |n: &Notice| sink.borrow_mut().push(n.clone()));

        assert!(controller.save().is_err());
        assert_eq!(notices.borrow()[0].kind, NoticeKind::Failed);
        assert!(notices.borrow()[0].message.starts_with("Save failed: "));

        // Background save failures stay quiet
        controller.store_mut().add(Record::new(1, "A", 1)).unwrap();
        clock.advance(Duration::from_secs(2));
        controller.tick();
        assert_eq!(notices.borrow().len(), 1);

        // Teardown save failure is swallowed
        controller.close();
        assert!(controller.is_closed());
    }

    #[test]
    fn test_close_saves_and_stops_timers() {
        let mut s = session("");
        s.controller.store_mut().add(Record::new(1, "A", 1)).unwrap();
        s.controller.close();

        assert!(s.controller.is_closed());
        assert_eq!(s.controller.next_deadline(), None);
        assert_eq!(
            fs::read_to_string(s.controller.store().path()).unwrap(),
            "1|A|1||||\n"
        );

        s.controller.store_mut().add(Record::new(2, "B", 1)).unwrap();
        s.clock.advance(Duration::from_secs(5));
        s.controller.tick();
        assert_eq!(count_saves(&s), 0);
    }

    #[test]
    fn test_next_deadline() {
        let mut s = session("");
        let start = s.clock.now();
        assert_eq!(s.controller.next_deadline(), Some(start + Duration::from_millis(1500)));

        s.controller.store_mut().add(Record::new(1, "A", 1)).unwrap();
        assert_eq!(s.controller.next_deadline(), Some(start + Duration::from_millis(1000)));
    }
}
