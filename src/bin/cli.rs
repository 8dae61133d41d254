#![cfg(not(tarpaulin_include))]

use std::env;
use std::io::{self, Write};
use std::time::Instant;

use vocab_editor::schema::{MULTI_VALUE_SEPARATOR, split_multi};
use vocab_editor::{
    Action, EditorConfig, EditorError, EditorSession, Field, FieldKind, FieldValue, GroupView,
    Submission,
};

fn print_view(view: Option<&GroupView>) {
    let Some(view) = view else {
        println!("(the table has no rows)");
        return;
    };
    println!();
    println!("== {} ({} / {}) ==", view.key, view.position, view.total);
    for (i, record) in view.records.iter().enumerate() {
        println!("-- entry {}", i + 1);
        for field in Field::ALL {
            let marker = if field.is_editable() { ' ' } else { '*' };
            println!("  {}{:<18} {}", marker, field.name(), record.get(field));
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  show: Show the current group");
    println!("  n: Save pending edits and move to the next group");
    println!("  p: Save pending edits and move to the previous group");
    println!("  j <n>: Save pending edits and jump to group n");
    println!("  s: Save pending edits");
    println!(
        "  set <entry> <field> <value>: Stage an edit ('{}' separates list entries)",
        MULTI_VALUE_SEPARATOR.trim()
    );
    println!("  d: Save pending edits and write a download copy");
    println!("  q: Save pending edits and quit");
}

// `set 2 translation Katze` stages an edit of the second entry.
fn stage(pending: &mut Submission, args: &str) -> Result<(), String> {
    let mut parts = args.splitn(3, ' ');
    let entry: usize = parts
        .next()
        .and_then(|p| p.parse().ok())
        .filter(|&n| n >= 1)
        .ok_or("entry must be a number from 1")?;
    let name = parts.next().unwrap_or_default();
    let field = Field::from_name(name).ok_or_else(|| format!("unknown field '{}'", name))?;
    let value = parts.next().unwrap_or_default();

    let value = match field.kind() {
        FieldKind::ReadOnly => return Err(format!("{} is read-only", field)),
        FieldKind::Scalar => FieldValue::Single(value.to_string()),
        FieldKind::MultiValued => FieldValue::List(split_multi(value)),
    };
    pending.set(entry - 1, field, value);
    Ok(())
}

fn describe(err: &EditorError) -> String {
    if err.is_transient() {
        format!("{} (try again)", err)
    } else {
        err.to_string()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// The terminal editor: a session plus the edits staged for the current group.
struct Repl {
    session: EditorSession,
    pending: Submission,
    status: String,
}

impl Repl {
    fn new(session: EditorSession) -> Self {
        Self {
            session,
            pending: Submission::new(),
            status: String::from("ok"),
        }
    }

    /// Merge the staged edits through `action`; they are kept if it fails.
    fn submit(&mut self, action: Action) -> bool {
        match self.session.submit(action, &self.pending) {
            Ok(outcome) => {
                self.pending = Submission::new();
                if let Some(path) = outcome.download {
                    println!("Download copy written to {}", path.display());
                }
                print_view(outcome.view.as_ref());
                self.status = match (action, outcome.at_boundary) {
                    (Action::Next, true) => String::from("already at the last group"),
                    (Action::Prev, true) => String::from("already at the first group"),
                    _ => String::from("ok"),
                };
                true
            }
            Err(e) => {
                self.status = describe(&e);
                false
            }
        }
    }

    fn handle(&mut self, command: &str) -> Flow {
        let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
        let rest = rest.trim();
        let action = match name {
            "" => {
                self.status = String::from("invalid command");
                return Flow::Continue;
            }
            "q" => {
                // Staged edits are saved first; a failed save keeps the editor open.
                if self.pending.is_empty() || self.submit(Action::Save) {
                    return Flow::Quit;
                }
                return Flow::Continue;
            }
            "help" => {
                print_help();
                return Flow::Continue;
            }
            "show" => {
                match self.session.view() {
                    Ok(view) => {
                        print_view(view.as_ref());
                        self.status = String::from("ok");
                    }
                    Err(e) => self.status = describe(&e),
                }
                return Flow::Continue;
            }
            "set" => {
                self.status = match stage(&mut self.pending, rest) {
                    Ok(()) => String::from("staged"),
                    Err(e) => e,
                };
                return Flow::Continue;
            }
            "n" => Action::Next,
            "p" => Action::Prev,
            "s" => Action::Save,
            "d" => Action::Download,
            "j" => match Action::parse("jump", Some(rest)) {
                Some(action) => action,
                None => {
                    self.status = String::from("usage: j <n>");
                    return Flow::Continue;
                }
            },
            _ => {
                self.status = String::from("invalid command");
                return Flow::Continue;
            }
        };
        self.submit(action);
        Flow::Continue
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| String::from("vocab_cli"));
    let (Some(path), None) = (args.next(), args.next()) else {
        eprintln!("Usage: {} <file.csv>", program);
        return Ok(());
    };

    let mut session = EditorSession::new(EditorConfig::from_env()?);
    match session.open(&path) {
        Ok(view) => print_view(view.as_ref()),
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(());
        }
    }

    let mut repl = Repl::new(session);
    let mut start_time = Instant::now();
    loop {
        let elapsed_time = start_time.elapsed().as_secs_f64();
        print!("[{:.1}] ({}) > ", elapsed_time, repl.status);
        io::stdout().flush()?;

        let mut command = String::new();
        if io::stdin().read_line(&mut command)? == 0 {
            // End of input behaves like `q`
            repl.handle("q");
            break;
        }
        start_time = Instant::now();

        if repl.handle(command.trim()) == Flow::Quit {
            break;
        }
    }

    if !repl.pending.is_empty() {
        println!("Dropped unsaved edits: {}", repl.status);
    }
    Ok(())
}
