use axum::{
    Form, Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use handlebars::Handlebars;
use log::{error, info};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::config::EditorConfig;
use crate::downloader;
use crate::error::EditorError;
use crate::merge::{Submission, input_name};
use crate::schema::{Field, FieldKind};
use crate::session::{Action, EditorSession, GroupView, SubmitOutcome};
use crate::store::{Record, RecordStore};

const SESSION_COOKIE: &str = "editor_session";
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Per-browser state: the editing session plus a one-shot notice.
struct WebSession {
    editor: EditorSession,
    notice: Option<String>,
}

struct SessionEntry {
    session: Arc<Mutex<WebSession>>,
    last_seen: Instant,
}

pub struct AppState {
    config: EditorConfig,
    templates: Handlebars<'static>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl AppState {
    pub fn new(config: EditorConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let mut templates = Handlebars::new();
        templates.register_template_string("editor", include_str!("./static/editor.hbs"))?;
        Ok(Self {
            config,
            templates,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    // Find the session named by the cookie, or start a new one.
    fn session(&self, jar: CookieJar) -> (CookieJar, Arc<Mutex<WebSession>>) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
            if let Some(entry) = sessions.get_mut(&id) {
                entry.last_seen = Instant::now();
                return (jar, entry.session.clone());
            }
        }

        // Sessions idle past the retention window point at swept files.
        let retention = self.config.retention;
        sessions.retain(|_, entry| {
            entry.last_seen.elapsed() < retention || Arc::strong_count(&entry.session) > 1
        });

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Mutex::new(WebSession {
            editor: EditorSession::new(self.config.clone()),
            notice: None,
        }));
        sessions.insert(
            id.clone(),
            SessionEntry {
                session: session.clone(),
                last_seen: Instant::now(),
            },
        );
        let cookie = Cookie::build((SESSION_COOKIE, id)).path("/").http_only(true);
        (jar.add(cookie), session)
    }
}

enum Reply {
    Back,
    Attachment {
        file_name: String,
        content_type: &'static str,
        bytes: Vec<u8>,
    },
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self {
            Reply::Back => Redirect::to("/").into_response(),
            Reply::Attachment {
                file_name,
                content_type,
                bytes,
            } => (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, content_type.to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", file_name),
                    ),
                ],
                bytes,
            )
                .into_response(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_editor))
        .route("/load_csv", post(load_csv))
        .route("/handle_submit", post(handle_submit))
        .route("/api/view", get(get_view))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

pub async fn run(config: EditorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = config.bind_addr.clone();
    let app = router(Arc::new(AppState::new(config)?));

    // Start server
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// Run blocking session work off the async executor.
async fn with_session<T, F>(session: Arc<Mutex<WebSession>>, work: F) -> Result<T, StatusCode>
where
    F: FnOnce(&mut WebSession) -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut web = session.lock().unwrap_or_else(PoisonError::into_inner);
        work(&mut web)
    })
    .await
    .map_err(|e| {
        error!("session task failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// User-facing text for a core error.
fn notice_for(err: &EditorError) -> String {
    match err {
        EditorError::LockTimeout { .. } => {
            "The file is busy saving another change. Please try again in a moment.".to_string()
        }
        EditorError::Schema { .. } | EditorError::UnsupportedFormat(_) => {
            format!("Upload rejected: {}", err)
        }
        _ => err.to_string(),
    }
}

/// Notice shown after a successful submit, if any.
fn submit_notice(action: Action, outcome: &SubmitOutcome) -> Option<&'static str> {
    match action {
        Action::Save => Some("Changes saved."),
        Action::Next if outcome.at_boundary => Some("You have reached the last group."),
        Action::Prev if outcome.at_boundary => Some("You are at the first group."),
        _ => None,
    }
}

fn field_json(position: usize, record: &Record) -> Vec<Value> {
    Field::ALL
        .iter()
        .map(|&field| match field.kind() {
            FieldKind::ReadOnly => json!({
                "name": field.name(),
                "read_only": true,
                "value": record.get(field),
            }),
            FieldKind::Scalar => json!({
                "name": field.name(),
                "input": input_name(field, position),
                "value": record.get(field),
            }),
            FieldKind::MultiValued => {
                let input = input_name(field, position);
                // One blank slot so a new entry can be added
                let mut entries = record.list(field);
                entries.push(String::new());
                let entries: Vec<Value> = entries
                    .into_iter()
                    .map(|value| json!({ "input": input, "value": value }))
                    .collect();
                json!({
                    "name": field.name(),
                    "multi": true,
                    "entries": entries,
                })
            }
        })
        .collect()
}

fn page_json(view: Option<&GroupView>, file: Option<String>, notice: Option<String>) -> Value {
    let group = view.map(|view| {
        let records: Vec<Value> = view
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| {
                json!({
                    "number": position + 1,
                    "fields": field_json(position, record),
                })
            })
            .collect();
        json!({
            "key": view.key,
            "position": view.position,
            "total": view.total,
            "records": records,
        })
    });
    json!({
        "file": file,
        "notice": notice,
        "group": group,
    })
}

async fn serve_editor(jar: CookieJar, State(state): State<Arc<AppState>>) -> Response {
    let (jar, session) = state.session(jar);
    let page = with_session(session, |web| {
        let notice = web.notice.take();
        let file = web
            .editor
            .current_path()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned());
        match web.editor.view() {
            Ok(view) => page_json(view.as_ref(), file, notice),
            Err(EditorError::NotLoaded) => page_json(None, None, notice),
            Err(e) => page_json(None, file, Some(notice_for(&e))),
        }
    })
    .await;

    let page = match page {
        Ok(page) => page,
        Err(status) => return (jar, status).into_response(),
    };
    match state.templates.render("editor", &page) {
        Ok(html) => (jar, Html(html)).into_response(),
        Err(e) => {
            error!("template render failed: {}", e);
            (jar, StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

async fn load_csv(
    jar: CookieJar,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    let (jar, session) = state.session(jar);

    // Process the multipart form data
    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("csv_file") {
                    continue;
                }
                let file_name = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => upload = Some((file_name, bytes.to_vec())),
                    Err(e) => return (jar, (StatusCode::BAD_REQUEST, e.to_string())).into_response(),
                }
            }
            Ok(None) => break,
            Err(e) => return (jar, (StatusCode::BAD_REQUEST, e.to_string())).into_response(),
        }
    }

    let result = with_session(session, move |web| {
        web.notice = Some(match upload {
            None => "No file data received".to_string(),
            Some((file_name, bytes)) => match web.editor.upload(&file_name, &bytes) {
                Ok(Some(view)) => format!("Loaded {} with {} groups.", file_name, view.total),
                Ok(None) => format!("Loaded {}; it has no rows.", file_name),
                Err(e) => notice_for(&e),
            },
        });
    })
    .await;

    match result {
        Ok(()) => (jar, Reply::Back).into_response(),
        Err(status) => (jar, status).into_response(),
    }
}

fn attachment(path: &Path, xlsx: bool) -> Result<Reply, String> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "vocabulary.csv".to_string());
    if xlsx {
        let store = RecordStore::load(path).map_err(|e| e.to_string())?;
        let bytes = downloader::to_xlsx(&store).map_err(|e| e.to_string())?;
        Ok(Reply::Attachment {
            file_name: Path::new(&file_name)
                .with_extension("xlsx")
                .to_string_lossy()
                .into_owned(),
            content_type: XLSX_CONTENT_TYPE,
            bytes,
        })
    } else {
        let bytes = fs::read(path).map_err(|e| e.to_string())?;
        Ok(Reply::Attachment {
            file_name,
            content_type: "text/csv; charset=utf-8",
            bytes,
        })
    }
}

async fn handle_submit(
    jar: CookieJar,
    State(state): State<Arc<AppState>>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Response {
    let (jar, session) = state.session(jar);

    let value_of = |name: &str| {
        pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    };
    let action = value_of("action").unwrap_or_default();
    let jump_to = value_of("jump_to");
    let xlsx = value_of("format").as_deref() == Some("xlsx");
    let submission = Submission::from_form_pairs(&pairs);

    let reply = with_session(session, move |web| {
        let Some(action) = Action::parse(&action, jump_to.as_deref()) else {
            web.notice = Some(match action.as_str() {
                "jump" => "Enter a group number to jump to.".to_string(),
                other => format!("Unknown action '{}'.", other),
            });
            return Reply::Back;
        };
        match web.editor.submit(action, &submission) {
            Ok(SubmitOutcome {
                download: Some(path),
                ..
            }) => attachment(&path, xlsx).unwrap_or_else(|e| {
                web.notice = Some(format!("Download failed: {}", e));
                Reply::Back
            }),
            Ok(outcome) => {
                web.notice = submit_notice(action, &outcome).map(str::to_string);
                Reply::Back
            }
            Err(e) => {
                web.notice = Some(notice_for(&e));
                Reply::Back
            }
        }
    })
    .await;

    match reply {
        Ok(reply) => (jar, reply).into_response(),
        Err(status) => (jar, status).into_response(),
    }
}

async fn get_view(jar: CookieJar, State(state): State<Arc<AppState>>) -> Response {
    let (jar, session) = state.session(jar);
    let view = with_session(session, |web| web.editor.view()).await;
    match view {
        Ok(Ok(view)) => (jar, Json(json!({ "status": "ok", "group": view }))).into_response(),
        Ok(Err(e)) => {
            let status = match e {
                EditorError::NotLoaded => StatusCode::NOT_FOUND,
                EditorError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                jar,
                (
                    status,
                    Json(json!({ "status": "error", "message": notice_for(&e) })),
                ),
            )
                .into_response()
        }
        Err(status) => (jar, status).into_response(),
    }
}
