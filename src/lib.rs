/*!
# Vocabulary Row Editor

A row-by-row editor for vocabulary tables, built in Rust.

## Overview

A user uploads a CSV table of vocabulary entries (word, number, translation,
definition, example sentences, ...). The editor groups the rows by word,
shows one group at a time, merges the user's edits back into the table and
writes it to disk. The updated table can be downloaded at any point.

## Architecture

### Core
- **Record Store** - loads a table, groups records by word and orders the
  groups by their smallest sequence number
- **Navigation Cursor** - next/prev/jump with bounds clamping
- **Edit Merger** - cleans submitted values and merges them into a group
- **Persistence Guard** - per-file lock with a bounded wait, atomic writes
- **Retention Sweeper** - removes expired uploads and their locks

### Shells
- **Web** (`website` binary, `web` feature) - axum routes with a handlebars form
- **Terminal** (`vocab_cli` binary) - edits a CSV file in place from a prompt

### Data Persistence Layer
- CSV backing files, one per upload, replaced atomically on every save
- Sibling `.lock` files carrying advisory locks
- Download snapshots written next to the live file

## Modules

- **schema**: typed column set and value normalization
- **loader**: CSV parsing
- **downloader**: CSV/XLSX export and download snapshots
- **store**: records, groups and the grouped store
- **cursor**: navigation over groups
- **merge**: submissions and the edit merger
- **guard**: locking and atomic writes
- **sweeper**: retention sweep
- **session**: the editing session state machine
- **config**: runtime settings
- **error**: error taxonomy
- **app**: routing and handlers (`web` feature)
*/

pub mod config;
pub mod cursor;
pub mod downloader;
pub mod error;
pub mod guard;
pub mod loader;
pub mod merge;
pub mod schema;
pub mod session;
pub mod store;
pub mod sweeper;

#[cfg(feature = "web")]
pub mod app;

/// Re-export the types shells use most
pub use config::EditorConfig;
pub use error::{EditorError, Result};
pub use guard::PersistenceGuard;
pub use merge::{FieldValue, Submission};
pub use schema::{Field, FieldKind};
pub use session::{Action, EditorSession, GroupView, SessionState, SubmitOutcome};
pub use store::{Group, Record, RecordStore};
