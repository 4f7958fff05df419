use std::collections::BTreeSet;

use crate::calc;
use crate::ipc::error::ok;
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};

fn handle_mark_summary(state: &AppState, req: &Request) -> serde_json::Value {
    let data = match helpers::datasets(state, req) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let model = match helpers::resolve(data, req) {
        Ok(m) => m,
        Err(e) => return e,
    };
    let summary = calc::mark_summary(&model.subset);
    ok(&req.id, helpers::mark_summary_json(summary.as_ref()))
}

fn handle_score_distribution(state: &AppState, req: &Request) -> serde_json::Value {
    let data = match helpers::datasets(state, req) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let model = match helpers::resolve(data, req) {
        Ok(m) => m,
        Err(e) => return e,
    };
    // Scores carry no municipality/organization columns; the selection
    // reaches them through the logins of the filtered Marks subset.
    let eligible: BTreeSet<&str> = model.subset.iter().map(|r| r.login.as_str()).collect();
    let series = calc::score_series(&data.scores, &model.selection, &eligible);
    ok(&req.id, helpers::score_series_json(series.as_ref()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.markSummary" => Some(handle_mark_summary(state, req)),
        "analytics.scoreDistribution" => Some(handle_score_distribution(state, req)),
        _ => None,
    }
}
