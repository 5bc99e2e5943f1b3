use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One JSON line from the host: `{id, method, params?}`.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon state: no workspace until the host selects one.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
