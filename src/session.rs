//! Editing session: the context object shells drive.
//!
//! A session is either empty or points at one backing file plus a cursor.
//! Nothing is cached between calls; every operation reloads the file under
//! the persistence guard, so two sessions on the same file always see each
//! other's committed edits.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::config::EditorConfig;
use crate::cursor;
use crate::downloader;
use crate::error::{EditorError, Result};
use crate::guard::{self, PersistenceGuard};
use crate::loader;
use crate::merge::{self, Submission};
use crate::store::{Record, RecordStore};
use crate::sweeper;

lazy_static! {
    static ref UNSAFE_NAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_-]+").unwrap();
}

const MAX_STEM_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NoFileLoaded,
    FileLoaded { path: PathBuf, cursor: usize },
}

/// What a submit should do after merging the submitted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Save,
    Next,
    Prev,
    /// 1-based group number.
    Jump(i64),
    Download,
}

impl Action {
    /// Parse a form action; `jump` needs a numeric target.
    pub fn parse(action: &str, jump_to: Option<&str>) -> Option<Action> {
        match action.trim() {
            "save" => Some(Action::Save),
            "next" => Some(Action::Next),
            "prev" => Some(Action::Prev),
            "download" => Some(Action::Download),
            "jump" => jump_to?.trim().parse().ok().map(Action::Jump),
            _ => None,
        }
    }
}

/// The current group as shown to the user, with 1-based counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupView {
    pub key: String,
    pub records: Vec<Record>,
    pub position: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Group shown after the action; `None` for an empty table.
    pub view: Option<GroupView>,
    /// Snapshot written for [`Action::Download`].
    pub download: Option<PathBuf>,
    /// `Next` on the last group or `Prev` on the first; the cursor stayed put.
    pub at_boundary: bool,
}

pub struct EditorSession {
    config: EditorConfig,
    guard: PersistenceGuard,
    state: SessionState,
}

impl EditorSession {
    pub fn new(config: EditorConfig) -> Self {
        let guard = PersistenceGuard::new(config.lock_timeout);
        Self {
            config,
            guard,
            state: SessionState::NoFileLoaded,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn current_path(&self) -> Option<&Path> {
        match &self.state {
            SessionState::FileLoaded { path, .. } => Some(path.as_path()),
            SessionState::NoFileLoaded => None,
        }
    }

    fn loaded(&self) -> Result<(PathBuf, usize)> {
        match &self.state {
            SessionState::FileLoaded { path, cursor } => Ok((path.clone(), *cursor)),
            SessionState::NoFileLoaded => Err(EditorError::NotLoaded),
        }
    }

    /// Store an uploaded table under a unique name and make it current.
    ///
    /// Expired files are swept first; a failing sweep is only logged. A
    /// table that cannot be loaded or lacks required columns is deleted
    /// again before the error is returned.
    ///
    /// # Arguments
    /// * `original_name` - Name of the file as uploaded; only `.csv` is accepted
    /// * `bytes` - The file contents
    ///
    /// # Returns
    /// * `Ok(Some(GroupView))` - The first group of the new table
    /// * `Ok(None)` - The table has a header but no rows
    /// * `Err(EditorError::UnsupportedFormat)` - Not a `.csv` name
    /// * `Err(EditorError::Load)` / `Err(EditorError::Schema)` - The upload was
    ///   rejected and deleted
    pub fn upload(&mut self, original_name: &str, bytes: &[u8]) -> Result<Option<GroupView>> {
        if !loader::is_supported(original_name) {
            warn!("rejected upload '{}': not a csv file", original_name);
            return Err(EditorError::UnsupportedFormat(original_name.to_string()));
        }

        let dir = self.config.upload_dir.clone();
        fs::create_dir_all(&dir)?;
        match sweeper::sweep(&dir, self.config.retention) {
            Ok(report) if !report.removed.is_empty() => {
                info!("retention sweep removed {} files", report.removed.len())
            }
            Ok(_) => {}
            Err(e) => warn!("retention sweep of {} failed: {}", dir.display(), e),
        }

        let path = dir.join(upload_file_name(original_name));
        let loaded = self.guard.with_lock(&path, || {
            guard::write_bytes(&path, bytes)?;
            RecordStore::load(&path)
        });
        let store = match loaded {
            Ok(store) => store,
            Err(e) => {
                warn!("rejected upload '{}': {}", original_name, e);
                discard(&path);
                return Err(e);
            }
        };

        info!(
            "accepted upload '{}' as {} ({} groups)",
            original_name,
            path.display(),
            store.len()
        );
        let view = build_view(&store, 0);
        self.state = SessionState::FileLoaded { path, cursor: 0 };
        Ok(view)
    }

    /// Edit an existing table in place.
    ///
    /// Unlike [`EditorSession::upload`] the file is neither copied nor swept,
    /// and a table that fails to load is left where it is.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<Option<GroupView>> {
        let path = path.as_ref().to_path_buf();
        if !loader::is_supported(&path) {
            return Err(EditorError::UnsupportedFormat(path.display().to_string()));
        }
        let store = self.guard.with_lock(&path, || RecordStore::load(&path))?;
        let view = build_view(&store, 0);
        self.state = SessionState::FileLoaded { path, cursor: 0 };
        Ok(view)
    }

    /// The current group, reloaded from disk.
    pub fn view(&self) -> Result<Option<GroupView>> {
        let (path, saved) = self.loaded()?;
        let store = self.guard.with_lock(&path, || RecordStore::load(&path))?;
        Ok(build_view(&store, cursor::clamp(saved as i64, store.len())))
    }

    /// Merge `submission` into the current group, persist, then apply `action`.
    ///
    /// The whole cycle runs under one lock acquisition. An out-of-range jump
    /// fails before anything is written and leaves the cursor unchanged.
    ///
    /// # Arguments
    /// * `action` - Where to go once the edits are saved
    /// * `submission` - Edits for the records of the current group; may be empty
    ///
    /// # Returns
    /// * `Ok(SubmitOutcome)` - The group now shown, the snapshot path for a
    ///   download, and whether `Next`/`Prev` was already at the edge
    /// * `Err(EditorError::NotLoaded)` - No table is open
    /// * `Err(EditorError::LockTimeout)` - Another session kept the file busy
    /// * `Err(EditorError::Range)` - A jump outside the group index
    ///
    /// # Examples
    /// ```
    /// use vocab_editor::{Action, EditorConfig, EditorSession, Field, Submission};
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let mut session = EditorSession::new(EditorConfig {
    ///     upload_dir: dir.path().to_path_buf(),
    ///     ..EditorConfig::default()
    /// });
    /// let csv = "word,number,old_definition,translation,definition,example_sentences,part_of_speech,collocations\ncat,1,,,,,,\ndog,2,,,,,,\n";
    /// session.upload("words.csv", csv.as_bytes()).unwrap();
    ///
    /// let edits = Submission::new().with(0, Field::Translation, "Katze");
    /// let outcome = session.submit(Action::Next, &edits).unwrap();
    /// assert_eq!(outcome.view.unwrap().key, "dog");
    ///
    /// let outcome = session.submit(Action::Next, &Submission::new()).unwrap();
    /// assert!(outcome.at_boundary);
    /// ```
    pub fn submit(&mut self, action: Action, submission: &Submission) -> Result<SubmitOutcome> {
        let (path, saved) = self.loaded()?;

        let (next_cursor, outcome) = self.guard.with_lock(&path, || {
            let store = RecordStore::load(&path)?;
            let count = store.len();
            let current = cursor::clamp(saved as i64, count);
            let next_cursor = if count == 0 {
                0
            } else {
                match action {
                    Action::Save | Action::Download => current,
                    Action::Next => cursor::next(current, count),
                    Action::Prev => cursor::prev(current, count),
                    Action::Jump(target) => cursor::jump(target, count)?,
                }
            };

            let merged = store
                .group(current)
                .map(|group| merge::merge(group, submission));
            let store = match merged {
                Some(group) => store.with_group(current, group),
                None => store,
            };
            guard::write(&path, &store)?;

            let download = match action {
                Action::Download => Some(downloader::write_snapshot(&path, &store)?),
                _ => None,
            };
            let at_boundary = count > 0
                && matches!(action, Action::Next | Action::Prev)
                && next_cursor == current;
            Ok((
                next_cursor,
                SubmitOutcome {
                    view: build_view(&store, next_cursor),
                    download,
                    at_boundary,
                },
            ))
        })?;

        debug!(
            "{:?} on {}: group {} -> {}",
            action,
            path.display(),
            saved,
            next_cursor
        );
        self.state = SessionState::FileLoaded {
            path,
            cursor: next_cursor,
        };
        Ok(outcome)
    }

    /// Write a sorted snapshot of the current table without editing it.
    pub fn download(&self) -> Result<PathBuf> {
        let (path, _) = self.loaded()?;
        self.guard.with_lock(&path, || {
            let store = RecordStore::load(&path)?;
            downloader::write_snapshot(&path, &store)
        })
    }

    pub fn close(&mut self) {
        self.state = SessionState::NoFileLoaded;
    }
}

fn build_view(store: &RecordStore, index: usize) -> Option<GroupView> {
    store.group(index).map(|group| GroupView {
        key: group.key.clone(),
        records: group.records.clone(),
        position: index + 1,
        total: store.len(),
    })
}

/// `My Words (2).csv` becomes `My_Words_2_20240131T120000123_1a2b3c4d.csv`.
fn upload_file_name(original_name: &str) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    let mut stem = UNSAFE_NAME_CHARS
        .replace_all(stem, "_")
        .trim_matches('_')
        .to_string();
    if stem.is_empty() {
        stem = "upload".to_string();
    }
    if let Some((cut, _)) = stem.char_indices().nth(MAX_STEM_LEN) {
        stem.truncate(cut);
    }
    let id = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}.csv",
        stem,
        Utc::now().format("%Y%m%dT%H%M%S%3f"),
        &id[..8]
    )
}

// Best effort: remove a rejected upload and its lock artifact.
fn discard(path: &Path) {
    let mut targets = vec![path.to_path_buf()];
    if let Ok(lock) = guard::lock_path(path) {
        targets.push(lock);
    }
    for target in targets {
        if let Err(e) = fs::remove_file(&target) {
            if e.kind() != ErrorKind::NotFound {
                warn!("could not remove {}: {}", target.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use std::time::Duration;

    const HEADER: &str = "word,number,old_definition,translation,definition,example_sentences,part_of_speech,collocations";

    fn session(dir: &Path) -> EditorSession {
        EditorSession::new(EditorConfig {
            upload_dir: dir.to_path_buf(),
            lock_timeout: Duration::from_secs(2),
            ..EditorConfig::default()
        })
    }

    fn table(rows: &[&str]) -> Vec<u8> {
        format!("{}\n{}\n", HEADER, rows.join("\n")).into_bytes()
    }

    #[test]
    fn actions_parse_from_form_values() {
        assert_eq!(Action::parse("save", None), Some(Action::Save));
        assert_eq!(Action::parse("jump", Some(" 3 ")), Some(Action::Jump(3)));
        assert_eq!(Action::parse("jump", Some("three")), None);
        assert_eq!(Action::parse("jump", None), None);
        assert_eq!(Action::parse("delete", None), None);
    }

    #[test]
    fn upload_names_are_sanitized_and_unique() {
        let a = upload_file_name("../My Words (2).csv");
        let b = upload_file_name("../My Words (2).csv");
        assert!(a.starts_with("My_Words_2_"), "{a}");
        assert!(a.ends_with(".csv"));
        assert_ne!(a, b);
        assert!(upload_file_name("().csv").starts_with("upload_"));
    }

    #[test]
    fn operations_need_a_loaded_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        assert!(matches!(session.view(), Err(EditorError::NotLoaded)));
        assert!(matches!(
            session.submit(Action::Next, &Submission::new()),
            Err(EditorError::NotLoaded)
        ));
        assert!(matches!(session.download(), Err(EditorError::NotLoaded)));
    }

    #[test]
    fn upload_rejects_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let err = session.upload("words.xlsx", b"anything").unwrap_err();
        assert!(matches!(err, EditorError::UnsupportedFormat(_)));
        assert_eq!(session.state(), &SessionState::NoFileLoaded);
    }

    #[test]
    fn empty_table_is_loaded_but_has_nothing_to_show() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        assert_eq!(session.upload("empty.csv", &table(&[])).unwrap(), None);
        assert_eq!(session.view().unwrap(), None);
        let outcome = session.submit(Action::Jump(4), &Submission::new()).unwrap();
        assert_eq!(outcome.view, None);
    }

    #[test]
    fn save_keeps_cursor_and_persists_edits() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session
            .upload("words.csv", &table(&["cat,1,,,,,,", "dog,2,,,,,,"]))
            .unwrap();
        session.submit(Action::Next, &Submission::new()).unwrap();

        let edits = Submission::new().with(0, Field::Translation, " Hund ");
        let outcome = session.submit(Action::Save, &edits).unwrap();
        let view = outcome.view.unwrap();
        assert_eq!(view.key, "dog");
        assert_eq!(view.position, 2);

        let path = session.current_path().unwrap();
        let stored = RecordStore::load(path).unwrap();
        assert_eq!(stored.groups()[1].records[0].get(Field::Translation), "Hund");
    }

    #[test]
    fn moving_past_either_end_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session
            .upload("words.csv", &table(&["cat,1,,,,,,", "dog,2,,,,,,"]))
            .unwrap();

        assert!(session.submit(Action::Prev, &Submission::new()).unwrap().at_boundary);
        assert!(!session.submit(Action::Next, &Submission::new()).unwrap().at_boundary);
        let last = session.submit(Action::Next, &Submission::new()).unwrap();
        assert!(last.at_boundary);
        assert_eq!(last.view.unwrap().position, 2);
        assert!(!session.submit(Action::Save, &Submission::new()).unwrap().at_boundary);
    }

    #[test]
    fn failed_jump_writes_nothing_and_keeps_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session
            .upload("words.csv", &table(&["cat,1,,,,,,", "dog,2,,,,,,"]))
            .unwrap();
        let before = fs::read(session.current_path().unwrap()).unwrap();

        let edits = Submission::new().with(0, Field::Translation, "Katze");
        let err = session.submit(Action::Jump(9), &edits).unwrap_err();
        assert!(matches!(err, EditorError::Range { .. }));
        assert_eq!(fs::read(session.current_path().unwrap()).unwrap(), before);
        assert_eq!(session.view().unwrap().unwrap().key, "cat");
    }

    #[test]
    fn download_action_saves_then_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session
            .upload("words.csv", &table(&["dog,2,,,,,,", "cat,1,,,,,,"]))
            .unwrap();
        let edits = Submission::new().with(0, Field::Definition, "a feline");
        let outcome = session.submit(Action::Download, &edits).unwrap();
        let snapshot = outcome.download.unwrap();

        assert_ne!(snapshot.as_path(), session.current_path().unwrap());
        let text = fs::read_to_string(&snapshot).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[1].starts_with("cat,1,,,a feline"));
        assert!(lines[2].starts_with("dog,2,"));
    }

    #[test]
    fn close_returns_to_no_file_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session.upload("words.csv", &table(&["cat,1,,,,,,"])).unwrap();
        session.close();
        assert_eq!(session.state(), &SessionState::NoFileLoaded);
    }
}
