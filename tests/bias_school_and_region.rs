
use serde_json::json;
use test_support::{
    error_code, insert_bias, insert_mark, request_err, request_ok, seed_db, spawn_sidecar,
    temp_dir,
};

fn seed(workspace: &std::path::Path) {
    let conn = seed_db(workspace);
    // Grade-4 Russian is the reference population for the trend.
    insert_mark(&conn, 2024, 4, "Русский язык", "Север", "СОШ 1", "a", 40, [
        10.0, 30.0, 40.0, 20.0,
    ]);
    insert_mark(&conn, 2024, 4, "Русский язык", "Север", "СОШ 2", "b", 40, [
        10.0, 30.0, 40.0, 20.0,
    ]);
    // One display name backed by two logins — the data-quality case the
    // per-school analysis must refuse.
    insert_mark(&conn, 2024, 4, "Русский язык", "Север", "СОШ 3", "c1", 20, [
        10.0, 30.0, 40.0, 20.0,
    ]);
    insert_mark(&conn, 2024, 4, "Русский язык", "Север", "СОШ 3", "c2", 20, [
        10.0, 30.0, 40.0, 20.0,
    ]);
    insert_mark(&conn, 2023, 4, "Русский язык", "Север", "СОШ 1", "a", 40, [
        10.0, 30.0, 40.0, 20.0,
    ]);
    insert_mark(&conn, 2023, 4, "Русский язык", "Север", "СОШ 2", "b", 40, [
        10.0, 30.0, 40.0, 20.0,
    ]);

    insert_bias(&conn, 2024, "a", "Север", "СОШ 1", [1, 1, 0, 0], None);
    insert_bias(&conn, 2024, "c1", "Север", "СОШ 3", [0, 0, 1, 0], None);
    insert_bias(&conn, 2023, "a", "Север", "СОШ 1", [0, 1, 0, 0], None);
}

#[test]
fn school_report_covers_three_year_window() {
    let workspace = temp_dir("vprd-bias-school");
    seed(&workspace);
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "bias.school",
        json!({ "filters": { "municipality": "Север", "organization": "СОШ 1" } }),
    );
    assert_eq!(report.get("login"), Some(&json!("a")));
    assert_eq!(report.get("flagged"), Some(&json!(true)));
    assert_eq!(report.get("markerCount"), Some(&json!(2)));
    assert_eq!(report.get("markers"), Some(&json!(["4 РУ", "4 МА"])));
    assert_eq!(
        report.get("priorYears"),
        Some(&json!([
            { "year": 2023, "flagged": true },
            { "year": 2022, "flagged": false }
        ]))
    );

    // A school with no record this year is a plain "no markers" report.
    let clean = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "bias.school",
        json!({ "filters": { "municipality": "Север", "organization": "СОШ 2" } }),
    );
    assert_eq!(clean.get("flagged"), Some(&json!(false)));
    assert_eq!(clean.get("markerCount"), Some(&json!(0)));
    assert_eq!(clean.get("markers"), Some(&json!([])));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn multi_login_school_is_refused() {
    let workspace = temp_dir("vprd-bias-ambiguous");
    seed(&workspace);
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "bias.school",
        json!({ "filters": { "municipality": "Север", "organization": "СОШ 3" } }),
    );
    assert_eq!(error_code(&error), "ambiguous_login");
    assert_eq!(
        error.pointer("/details/logins"),
        Some(&json!(["c1", "c2"]))
    );

    // Without a concrete organization the request is malformed, not
    // ambiguous.
    let error = request_err(&mut stdin, &mut reader, "3", "bias.school", json!({}));
    assert_eq!(error_code(&error), "bad_params");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn regional_trend_distinguishes_missing_reference_from_zero() {
    let workspace = temp_dir("vprd-bias-trend");
    seed(&workspace);
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let trend = request_ok(&mut stdin, &mut reader, "2", "bias.regionalTrend", json!({}));
    // 2022: no grade-4 Russian rows at all. 2023: 1 of 2 logins flagged.
    // 2024: 2 of 4 logins flagged (the two-login school counts each login).
    assert_eq!(
        trend.get("points"),
        Some(&json!([
            { "year": 2022, "percent": 0.0, "missingReference": true, "highlight": false },
            { "year": 2023, "percent": 50.0, "missingReference": false, "highlight": false },
            { "year": 2024, "percent": 50.0, "missingReference": false, "highlight": true }
        ]))
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn flagged_schools_sorted_by_marker_count() {
    let workspace = temp_dir("vprd-bias-flagged");
    seed(&workspace);
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let flagged = request_ok(&mut stdin, &mut reader, "2", "bias.flaggedSchools", json!({}));
    assert_eq!(
        flagged.get("rows"),
        Some(&json!([
            { "school": "СОШ 1", "login": "a", "markerCount": 2, "markers": ["4 РУ", "4 МА"] },
            { "school": "СОШ 3", "login": "c1", "markerCount": 1, "markers": ["5 РУ"] }
        ]))
    );

    let _ = std::fs::remove_dir_all(workspace);
}
