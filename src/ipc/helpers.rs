use serde_json::json;

use crate::calc::{
    self, FilterModel, FilterOptions, FlaggedSchool, MarkSummary, ResolvedFilters,
    SchoolBiasReport, ScoreSeries, TrendPoint, ALL_KEYWORD,
};
use crate::ipc::error::{calc_err, err};
use crate::ipc::types::{AppState, Request};
use crate::store::Datasets;

pub fn datasets<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a Datasets, serde_json::Value> {
    state
        .data
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Parses `params.filters` and resolves it against the loaded Marks table.
/// Every analytic handler goes through this, so a stale shell selection is
/// corrected the same way everywhere.
pub fn resolve<'a>(
    data: &'a Datasets,
    req: &Request,
) -> Result<FilterModel<'a>, serde_json::Value> {
    let prior = calc::parse_filter_selection(req.params.get("filters"))
        .map_err(|e| calc_err(&req.id, e))?;
    calc::resolve_filters(&data.marks, &prior).map_err(|e| calc_err(&req.id, e))
}

pub fn selection_json(sel: &ResolvedFilters) -> serde_json::Value {
    json!({
        "year": sel.year,
        "grade": sel.grade,
        "subject": sel.subject,
        "municipality": sel.municipality.clone().unwrap_or_else(|| ALL_KEYWORD.to_string()),
        "organization": sel.organization.clone().unwrap_or_else(|| ALL_KEYWORD.to_string()),
    })
}

/// Option lists as the shell's selectboxes expect them: the all-sentinel is
/// always the first municipality/organization entry.
pub fn options_json(options: &FilterOptions) -> serde_json::Value {
    let mut municipalities = Vec::with_capacity(options.municipalities.len() + 1);
    municipalities.push(ALL_KEYWORD.to_string());
    municipalities.extend(options.municipalities.iter().cloned());

    let mut organizations = Vec::with_capacity(options.organizations.len() + 1);
    organizations.push(ALL_KEYWORD.to_string());
    organizations.extend(options.organizations.iter().cloned());

    json!({
        "years": options.years,
        "grades": options.grades,
        "subjects": options.subjects,
        "municipalities": municipalities,
        "organizations": organizations,
    })
}

pub fn mark_summary_json(summary: Option<&MarkSummary>) -> serde_json::Value {
    match summary {
        None => json!({ "empty": true }),
        Some(s) => json!({
            "empty": false,
            "participants": s.participants,
            "pct2": s.pct2,
            "pct3": s.pct3,
            "pct4": s.pct4,
            "pct5": s.pct5,
            "quality": s.quality,
            "success": s.success,
        }),
    }
}

pub fn score_series_json(series: Option<&ScoreSeries>) -> serde_json::Value {
    match series {
        None => json!({ "empty": true }),
        Some(s) => json!({
            "empty": false,
            "participants": s.participants,
            "maxScore": s.max_score,
            "values": s.values,
        }),
    }
}

pub fn trend_json(points: &[TrendPoint]) -> serde_json::Value {
    json!(points
        .iter()
        .map(|p| {
            json!({
                "year": p.year,
                "percent": p.percent,
                "missingReference": p.missing_reference,
                "highlight": p.highlight,
            })
        })
        .collect::<Vec<_>>())
}

pub fn flagged_json(rows: &[FlaggedSchool]) -> serde_json::Value {
    json!(rows
        .iter()
        .map(|r| {
            json!({
                "school": r.school,
                "login": r.login,
                "markerCount": r.marker_count,
                "markers": r.markers,
            })
        })
        .collect::<Vec<_>>())
}

pub fn school_report_json(report: &SchoolBiasReport) -> serde_json::Value {
    json!({
        "login": report.login,
        "year": report.year,
        "flagged": report.marker_count > 0,
        "markerCount": report.marker_count,
        "markers": report.markers,
        "priorYears": report
            .prior_years
            .iter()
            .map(|p| json!({ "year": p.year, "flagged": p.flagged }))
            .collect::<Vec<_>>(),
    })
}
