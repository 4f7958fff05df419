use serde_json::json;
use std::collections::BTreeSet;

use crate::calc;
use crate::ipc::error::ok;
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};

/// One round trip for a full dashboard render. The fragments reuse the same
/// builders as the individual endpoints so the two surfaces cannot drift
/// apart.
fn handle_dashboard_model(state: &AppState, req: &Request) -> serde_json::Value {
    let data = match helpers::datasets(state, req) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let model = match helpers::resolve(data, req) {
        Ok(m) => m,
        Err(e) => return e,
    };

    let summary = calc::mark_summary(&model.subset);

    let eligible: BTreeSet<&str> = model.subset.iter().map(|r| r.login.as_str()).collect();
    let series = calc::score_series(&data.scores, &model.selection, &eligible);

    let municipality = model.selection.municipality.as_deref();
    let trend = calc::regional_trend(&data.marks, &data.bias, model.selection.year, municipality);
    let flagged = calc::flagged_schools(&data.bias, model.selection.year, municipality);

    let school = match &model.selection.organization {
        None => serde_json::Value::Null,
        Some(_) => {
            let logins: BTreeSet<String> =
                model.subset.iter().map(|r| r.login.clone()).collect();
            match calc::school_bias(&data.bias, model.selection.year, &logins) {
                Ok(report) => json!({
                    "ok": true,
                    "report": helpers::school_report_json(&report),
                }),
                // An ambiguous login degrades the school panel to a
                // data-quality warning; the rest of the page still renders.
                Err(e) => json!({
                    "ok": false,
                    "warning": { "code": e.code, "message": e.message, "details": e.details },
                }),
            }
        }
    };

    ok(
        &req.id,
        json!({
            "selection": helpers::selection_json(&model.selection),
            "options": helpers::options_json(&model.options),
            "matchedRows": model.subset.len(),
            "marks": helpers::mark_summary_json(summary.as_ref()),
            "scores": helpers::score_series_json(series.as_ref()),
            "biasTrend": helpers::trend_json(&trend),
            "flaggedSchools": helpers::flagged_json(&flagged),
            "school": school,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.dashboardModel" => Some(handle_dashboard_model(state, req)),
        _ => None,
    }
}
