use serde_json::json;
use std::collections::BTreeSet;

use crate::calc::{self, Marker};
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};

fn marker_types_json() -> Vec<serde_json::Value> {
    Marker::ALL
        .iter()
        .map(|m| json!({ "key": m.key(), "label": m.label() }))
        .collect()
}

fn handle_marker_types(req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "markers": marker_types_json() }))
}

fn handle_school(state: &AppState, req: &Request) -> serde_json::Value {
    let data = match helpers::datasets(state, req) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let model = match helpers::resolve(data, req) {
        Ok(m) => m,
        Err(e) => return e,
    };
    if model.selection.organization.is_none() {
        return err(
            &req.id,
            "bad_params",
            "per-school analysis needs a concrete organization filter",
            None,
        );
    }
    let logins: BTreeSet<String> = model
        .subset
        .iter()
        .map(|r| r.login.clone())
        .collect();
    match calc::school_bias(&data.bias, model.selection.year, &logins) {
        Ok(report) => ok(&req.id, helpers::school_report_json(&report)),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_regional_trend(state: &AppState, req: &Request) -> serde_json::Value {
    let data = match helpers::datasets(state, req) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let model = match helpers::resolve(data, req) {
        Ok(m) => m,
        Err(e) => return e,
    };
    let points = calc::regional_trend(
        &data.marks,
        &data.bias,
        model.selection.year,
        model.selection.municipality.as_deref(),
    );
    ok(&req.id, json!({ "points": helpers::trend_json(&points) }))
}

fn handle_flagged_schools(state: &AppState, req: &Request) -> serde_json::Value {
    let data = match helpers::datasets(state, req) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let model = match helpers::resolve(data, req) {
        Ok(m) => m,
        Err(e) => return e,
    };
    let rows = calc::flagged_schools(
        &data.bias,
        model.selection.year,
        model.selection.municipality.as_deref(),
    );
    ok(&req.id, json!({ "rows": helpers::flagged_json(&rows) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "bias.markerTypes" => Some(handle_marker_types(req)),
        "bias.school" => Some(handle_school(state, req)),
        "bias.regionalTrend" => Some(handle_regional_trend(state, req)),
        "bias.flaggedSchools" => Some(handle_flagged_schools(state, req)),
        _ => None,
    }
}
