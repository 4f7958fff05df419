
use serde_json::json;
use test_support::{insert_mark, request_ok, seed_db, spawn_sidecar, temp_dir};

fn seed(workspace: &std::path::Path) {
    let conn = seed_db(workspace);
    // 2024, grade 4: two subjects across two municipalities.
    insert_mark(&conn, 2024, 4, "Математика", "Север", "СОШ 1", "sch01", 40, [
        10.0, 30.0, 40.0, 20.0,
    ]);
    insert_mark(&conn, 2024, 4, "Русский язык", "Север", "СОШ 1", "sch01", 42, [
        5.0, 35.0, 40.0, 20.0,
    ]);
    insert_mark(&conn, 2024, 4, "Русский язык", "Север", "СОШ 2", "sch02", 35, [
        8.0, 32.0, 40.0, 20.0,
    ]);
    insert_mark(&conn, 2024, 4, "Русский язык", "Юг", "СОШ 3", "sch03", 30, [
        8.0, 40.0, 32.0, 20.0,
    ]);
    // 2024, grade 5 exists only for Russian.
    insert_mark(&conn, 2024, 5, "Русский язык", "Север", "СОШ 1", "sch01", 38, [
        12.0, 38.0, 30.0, 20.0,
    ]);
    // 2023 carries a single subject.
    insert_mark(&conn, 2023, 4, "Русский язык", "Юг", "СОШ 3", "sch03", 28, [
        7.0, 33.0, 40.0, 20.0,
    ]);
}

#[test]
fn defaults_resolve_top_down() {
    let workspace = temp_dir("vprd-cascade-defaults");
    seed(&workspace);
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let resolved = request_ok(&mut stdin, &mut reader, "2", "filters.resolve", json!({}));

    // Years newest first, everything else first-in-sort-order / ALL.
    assert_eq!(resolved.pointer("/options/years"), Some(&json!([2024, 2023])));
    assert_eq!(resolved.pointer("/selection/year"), Some(&json!(2024)));
    assert_eq!(resolved.pointer("/selection/grade"), Some(&json!(4)));
    assert_eq!(
        resolved.pointer("/selection/subject"),
        Some(&json!("Математика"))
    );
    assert_eq!(resolved.pointer("/selection/municipality"), Some(&json!("ALL")));
    assert_eq!(resolved.pointer("/selection/organization"), Some(&json!("ALL")));
    // Organizations stay collapsed until a municipality is chosen.
    assert_eq!(resolved.pointer("/options/organizations"), Some(&json!(["ALL"])));
    assert_eq!(resolved.get("matchedRows"), Some(&json!(1)));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn option_domains_narrow_with_higher_levels() {
    let workspace = temp_dir("vprd-cascade-narrowing");
    seed(&workspace);
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let resolved = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "filters.resolve",
        json!({ "filters": {
            "year": 2024, "grade": 4, "subject": "Русский язык", "municipality": "Север"
        } }),
    );
    assert_eq!(
        resolved.pointer("/options/municipalities"),
        Some(&json!(["ALL", "Север", "Юг"]))
    );
    assert_eq!(
        resolved.pointer("/options/organizations"),
        Some(&json!(["ALL", "СОШ 1", "СОШ 2"]))
    );
    assert_eq!(resolved.get("matchedRows"), Some(&json!(2)));

    // Grade 5 exists only for Russian: the subject domain shrinks to it.
    let grade5 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "filters.resolve",
        json!({ "filters": { "year": 2024, "grade": 5, "subject": "Математика" } }),
    );
    assert_eq!(
        grade5.pointer("/options/subjects"),
        Some(&json!(["Русский язык"]))
    );
    assert_eq!(
        grade5.pointer("/selection/subject"),
        Some(&json!("Русский язык"))
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn still_valid_selection_sticks_and_stale_levels_reset() {
    let workspace = temp_dir("vprd-cascade-sticky");
    seed(&workspace);
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let sticky = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "filters.resolve",
        json!({ "filters": {
            "year": 2024, "grade": 4, "subject": "Русский язык",
            "municipality": "Север", "organization": "СОШ 2"
        } }),
    );
    assert_eq!(sticky.pointer("/selection/organization"), Some(&json!("СОШ 2")));
    assert_eq!(sticky.get("matchedRows"), Some(&json!(1)));

    // Switching the year invalidates the lower levels; they reset silently
    // instead of erroring out.
    let switched = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "filters.resolve",
        json!({ "filters": {
            "year": 2023, "grade": 4, "subject": "Математика",
            "municipality": "Север", "organization": "СОШ 2"
        } }),
    );
    assert_eq!(switched.pointer("/selection/year"), Some(&json!(2023)));
    assert_eq!(
        switched.pointer("/selection/subject"),
        Some(&json!("Русский язык"))
    );
    assert_eq!(switched.pointer("/selection/municipality"), Some(&json!("ALL")));
    assert_eq!(switched.pointer("/selection/organization"), Some(&json!("ALL")));

    let _ = std::fs::remove_dir_all(workspace);
}
