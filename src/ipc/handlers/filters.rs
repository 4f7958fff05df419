use serde_json::json;

use crate::ipc::error::ok;
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};

fn handle_resolve(state: &AppState, req: &Request) -> serde_json::Value {
    let data = match helpers::datasets(state, req) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let model = match helpers::resolve(data, req) {
        Ok(m) => m,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!({
            "selection": helpers::selection_json(&model.selection),
            "options": helpers::options_json(&model.options),
            "matchedRows": model.subset.len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "filters.resolve" => Some(handle_resolve(state, req)),
        _ => None,
    }
}
