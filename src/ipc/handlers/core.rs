use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::store;

fn handle_health(state: &AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "dataLoaded": state.data.is_some(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let conn = match store::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    // The datasets are read exactly once per selection; a validation failure
    // leaves the previous workspace untouched.
    let data = match store::load_datasets(&conn) {
        Ok(data) => data,
        Err(e) => return err(&req.id, "data_invalid", format!("{e:#}"), None),
    };

    let payload = json!({
        "workspacePath": path.to_string_lossy(),
        "marksRows": data.marks.len(),
        "scoresRows": data.scores.len(),
        "biasRows": data.bias.len(),
        "loadedAt": data.loaded_at.to_rfc3339(),
    });
    state.workspace = Some(path);
    state.data = Some(data);
    ok(&req.id, payload)
}

fn handle_data_status(state: &AppState, req: &Request) -> serde_json::Value {
    let data = match helpers::datasets(state, req) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let mut years: Vec<i64> = data
        .marks
        .iter()
        .map(|r| r.year)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    years.reverse();
    ok(
        &req.id,
        json!({
            "marksRows": data.marks.len(),
            "scoresRows": data.scores.len(),
            "biasRows": data.bias.len(),
            "years": years,
            "loadedAt": data.loaded_at.to_rfc3339(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "data.status" => Some(handle_data_status(state, req)),
        _ => None,
    }
}
