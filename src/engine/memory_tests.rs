use super::memory::MemoryBackend;
use super::version::{overlay, OID, STATE, WSID};
use super::*;
use serde_json::json;

fn backend() -> MemoryBackend {
    let schema = SchemaRegistry::from_json_str(include_str!("../../tests/fixtures/schema.json")).unwrap();
    let sites: Vec<Site> = serde_json::from_str(include_str!("../../tests/fixtures/sites.json")).unwrap();
    MemoryBackend::from_json_str(Arc::new(schema), sites, include_str!("../../tests/fixtures/dataset.json")).unwrap()
}

fn values(v: serde_json::Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

fn one(b: &MemoryBackend, ws: u32, cmd: Command) -> Result<Outcome, EngineError> {
    b.process(ws, "editor", Changeset::single(cmd)).remove(0)
}

fn workspace(b: &MemoryBackend) -> u32 {
    b.create_workspace("Editor workspace", "editor").unwrap().uid
}

#[test]
fn test_create_in_workspace_inserts_placeholder_only() {
    let b = backend();
    let ws = workspace(&b);
    let out = one(&b, ws, Command::Create {
        table: "tt_content".into(), pid: 1, placement: Placement::Bottom,
        values: values(json!({"header": "Welcome", "CType": "text"})),
    }).unwrap();
    let uid = out.touched.unwrap();
    let row = b.row("tt_content", uid).unwrap();
    assert_eq!(row.int(WSID), ws as i64);
    assert_eq!(row.int(STATE), 1);
    // under pid 1 the only sibling is 502 at 256
    assert_eq!(row.int("sorting"), 512);
    let live: Vec<u32> = overlay(b.rows("tt_content").iter(), Some("deleted"), 0).iter().map(|o| o.uid).collect();
    assert!(!live.contains(&uid));
}

#[test]
fn test_update_of_live_row_creates_version_and_keeps_live() {
    let b = backend();
    let ws = workspace(&b);
    let before = b.row("tt_content", 500).unwrap();
    let out = one(&b, ws, Command::Update { table: "tt_content".into(), uid: 500, values: values(json!({"header": "Changed"})) }).unwrap();
    let draft = out.touched.unwrap();
    assert_ne!(draft, 500);
    assert_eq!(b.row("tt_content", 500).unwrap(), before);
    let v = b.row("tt_content", draft).unwrap();
    assert_eq!(v.int(OID), 500);
    assert_eq!(v.get("header"), Some(&json!("Changed")));
    // the version carries its own copy of the category relation
    let mm = b.mm_rows("sys_category_record_mm");
    assert!(mm.iter().any(|r| r.uid_foreign == draft && r.uid_local == 1));
    // second update edits the same version
    let again = one(&b, ws, Command::Update { table: "tt_content".into(), uid: 500, values: values(json!({"header": "Again"})) }).unwrap();
    assert_eq!(again.touched, Some(draft));
}

#[test]
fn test_delete_live_row_adds_delete_placeholder() {
    let b = backend();
    let ws = workspace(&b);
    let out = one(&b, ws, Command::Delete { table: "tt_content".into(), uid: 501 }).unwrap();
    let ph = b.row("tt_content", out.touched.unwrap()).unwrap();
    assert_eq!(ph.int(STATE), 2);
    assert_eq!(ph.int(OID), 501);
    assert_eq!(b.row("tt_content", 501).unwrap().int("deleted"), 0);
    let visible: Vec<u32> = overlay(b.rows("tt_content").iter(), Some("deleted"), ws).iter().map(|o| o.uid).collect();
    assert!(!visible.contains(&501));
}

#[test]
fn test_delete_is_idempotent_and_removes_placeholders() {
    let b = backend();
    let ws = workspace(&b);
    let created = one(&b, ws, Command::Create {
        table: "tt_content".into(), pid: 2, placement: Placement::Top, values: values(json!({"header": "Temp"})),
    }).unwrap().touched.unwrap();
    one(&b, ws, Command::Delete { table: "tt_content".into(), uid: created }).unwrap();
    assert!(b.row("tt_content", created).is_none());
    let again = one(&b, ws, Command::Delete { table: "tt_content".into(), uid: created }).unwrap();
    assert_eq!(again.touched, None);
    let missing = one(&b, ws, Command::Delete { table: "tt_content".into(), uid: 99999 }).unwrap();
    assert_eq!(missing.touched, None);
}

#[test]
fn test_delete_takes_translations_along() {
    let b = backend();
    let ws = workspace(&b);
    one(&b, ws, Command::Delete { table: "tt_content".into(), uid: 500 }).unwrap();
    let visible: Vec<u32> = overlay(b.rows("tt_content").iter(), Some("deleted"), ws).iter().map(|o| o.uid).collect();
    assert!(!visible.contains(&500));
    assert!(!visible.contains(&504));
}

#[test]
fn test_localize_rejects_second_translation() {
    let b = backend();
    let ws = workspace(&b);
    let first = one(&b, ws, Command::Localize { table: "tt_content".into(), uid: 501, language: 1, values: Map::new() }).unwrap();
    let t = b.row("tt_content", first.touched.unwrap()).unwrap();
    assert_eq!(t.int("sys_language_uid"), 1);
    assert_eq!(t.int("l18n_parent"), 501);
    let err = one(&b, ws, Command::Localize { table: "tt_content".into(), uid: 501, language: 1, values: Map::new() }).unwrap_err();
    assert!(err.to_string().contains("there already are localizations"));
    // 500 already has a live German translation
    let err = one(&b, ws, Command::Localize { table: "tt_content".into(), uid: 500, language: 1, values: Map::new() }).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyLocalized { .. }));
    let err = one(&b, ws, Command::Localize { table: "tt_content".into(), uid: 504, language: 2, values: Map::new() }).unwrap_err();
    assert!(err.to_string().contains("is itself a translation"));
}

#[test]
fn test_required_fields_and_parents_are_checked() {
    let b = backend();
    let ws = workspace(&b);
    let err = one(&b, ws, Command::Create {
        table: "tx_news_domain_model_news".into(), pid: 3, placement: Placement::Bottom, values: values(json!({"title": "No date"})),
    }).unwrap_err();
    assert_eq!(err, EngineError::RequiredField { table: "tx_news_domain_model_news".into(), field: "datetime".into() });
    let err = one(&b, ws, Command::Create {
        table: "tt_content".into(), pid: 0, placement: Placement::Bottom, values: values(json!({"header": "root"})),
    }).unwrap_err();
    assert!(matches!(err, EngineError::ParentNotFound { pid: 0, .. }));
    let err = one(&b, ws, Command::Create {
        table: "tt_content".into(), pid: 4242, placement: Placement::Bottom, values: values(json!({"header": "x"})),
    }).unwrap_err();
    assert!(matches!(err, EngineError::ParentNotFound { pid: 4242, .. }));
}

#[test]
fn test_placement_after_and_top() {
    let b = backend();
    let ws = workspace(&b);
    // pid 2 holds 500 (256) and 501 (512) in the default language
    let after = one(&b, ws, Command::Create {
        table: "tt_content".into(), pid: 2, placement: Placement::After(500), values: values(json!({"header": "mid"})),
    }).unwrap().touched.unwrap();
    assert_eq!(b.row("tt_content", after).unwrap().int("sorting"), 384);
    let top = one(&b, ws, Command::Create {
        table: "tt_content".into(), pid: 2, placement: Placement::Top, values: values(json!({"header": "first"})),
    }).unwrap().touched.unwrap();
    assert_eq!(b.row("tt_content", top).unwrap().int("sorting"), 128);
}

#[test]
fn test_mm_writes_follow_relation_shape() {
    let b = backend();
    let ws = workspace(&b);
    let news = one(&b, ws, Command::Update {
        table: "tx_news_domain_model_news".into(), uid: 11, values: values(json!({"tags": "2,1"})),
    }).unwrap().touched.unwrap();
    let rows: Vec<MmRow> = b.mm_rows("tx_news_domain_model_news_tag_mm").into_iter().filter(|r| r.uid_local == news).collect();
    assert_eq!(rows.iter().map(|r| (r.uid_foreign, r.sorting)).collect::<Vec<_>>(), vec![(2, 1), (1, 2)]);
    assert_eq!(b.row("tx_news_domain_model_news", news).unwrap().get("tags"), Some(&json!(2)));
}

#[test]
fn test_inline_children_are_attached_to_owner() {
    let b = backend();
    let ws = workspace(&b);
    one(&b, ws, Command::Update {
        table: "tx_news_domain_model_news".into(), uid: 11, values: values(json!({"related_links": "2"})),
    }).unwrap();
    let links = overlay(b.rows("tx_news_domain_model_link").iter(), Some("deleted"), ws)
        .into_iter()
        .find(|o| o.uid == 2)
        .map(|o| o.row.clone())
        .unwrap();
    assert_eq!(links.int("parent"), 11);
    // the live child still belongs to news 10
    assert_eq!(b.row("tx_news_domain_model_link", 2).unwrap().int("parent"), 10);
}

#[test]
fn test_foreign_workspace_is_denied() {
    let b = backend();
    let ws = b.create_workspace("Someone else", "other").unwrap().uid;
    let err = one(&b, ws, Command::Delete { table: "tt_content".into(), uid: 500 }).unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)));
    let err = one(&b, ws, Command::Update { table: "sys_note".into(), uid: 1, values: Map::new() }).unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied(_)));
}

#[test]
fn test_resolve_path_handles_language_bases() {
    let b = backend();
    assert_eq!(b.resolve_path("https://example.com/about"), Some(PageRoute { page_uid: 2, language: 0 }));
    assert_eq!(b.resolve_path("/de/ueber-uns/"), Some(PageRoute { page_uid: 2, language: 1 }));
    assert_eq!(b.resolve_path("/"), Some(PageRoute { page_uid: 1, language: 0 }));
    assert_eq!(b.resolve_path("https://other.org/about"), None);
    assert_eq!(b.resolve_path("/missing"), None);
}

#[test]
fn test_snapshot_round_trip() {
    let b = backend();
    let ws = workspace(&b);
    one(&b, ws, Command::Update { table: "tt_content".into(), uid: 501, values: values(json!({"header": "Saved"})) }).unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("data.json");
    b.save_snapshot(&path).unwrap();
    let schema = b.schema();
    let reloaded = MemoryBackend::open(schema, b.sites().as_ref().clone(), &path).unwrap();
    assert_eq!(reloaded.workspaces().len(), 1);
    assert_eq!(reloaded.rows("tt_content"), b.rows("tt_content"));
}

#[test]
fn test_uids_are_never_reused() {
    let b = backend();
    let ws = workspace(&b);
    let create = |header: &str| one(&b, ws, Command::Create {
        table: "tt_content".into(), pid: 2, placement: Placement::Bottom, values: values(json!({"header": header})),
    }).unwrap().touched.unwrap();
    let first = create("first");
    // a placeholder that never went live is removed outright
    one(&b, ws, Command::Delete { table: "tt_content".into(), uid: first }).unwrap();
    assert!(b.row("tt_content", first).is_none());
    let second = create("second");
    assert_ne!(first, second);

    // a stale delete of the first uid leaves the second record alone
    let stale = one(&b, ws, Command::Delete { table: "tt_content".into(), uid: first }).unwrap();
    assert_eq!(stale.touched, None);
    assert!(b.row("tt_content", second).is_some());

    // the counter survives a snapshot
    one(&b, ws, Command::Delete { table: "tt_content".into(), uid: second }).unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("data.json");
    b.save_snapshot(&path).unwrap();
    let reloaded = MemoryBackend::open(b.schema(), b.sites().as_ref().clone(), &path).unwrap();
    let third = one(&reloaded, ws, Command::Create {
        table: "tt_content".into(), pid: 2, placement: Placement::Bottom, values: values(json!({"header": "third"})),
    }).unwrap().touched.unwrap();
    assert!(third > second);
}

#[test]
fn test_inline_write_replaces_children() {
    let b = backend();
    let ws = workspace(&b);
    // news 10 owns links 2 and 1
    one(&b, ws, Command::Update {
        table: "tx_news_domain_model_news".into(), uid: 10, values: values(json!({"related_links": "2"})),
    }).unwrap();
    let owned: Vec<u32> = overlay(b.rows("tx_news_domain_model_link").iter(), Some("deleted"), ws)
        .into_iter()
        .filter(|o| o.row.int("parent") == 10)
        .map(|o| o.uid)
        .collect();
    assert_eq!(owned, vec![2]);
    // detaching happens in the workspace only
    assert_eq!(b.row("tx_news_domain_model_link", 1).unwrap().int("parent"), 10);
}

#[test]
fn test_localize_with_blank_required_value_leaves_no_row() {
    let b = backend();
    let ws = workspace(&b);
    let before = b.rows("tx_news_domain_model_news").len();
    let err = one(&b, ws, Command::Localize {
        table: "tx_news_domain_model_news".into(), uid: 11, language: 1, values: values(json!({"title": ""})),
    }).unwrap_err();
    assert!(matches!(err, EngineError::RequiredField { .. }));
    assert_eq!(b.rows("tx_news_domain_model_news").len(), before);

    let ok = one(&b, ws, Command::Localize {
        table: "tx_news_domain_model_news".into(), uid: 11, language: 1, values: values(json!({"title": "Herbst"})),
    }).unwrap().touched.unwrap();
    assert_eq!(b.row("tx_news_domain_model_news", ok).unwrap().get("title"), Some(&json!("Herbst")));
}

#[test]
fn test_delete_of_drafted_live_row_drops_the_draft() {
    let b = backend();
    let ws = workspace(&b);
    let live = b.row("tt_content", 500).unwrap();
    let draft = one(&b, ws, Command::Update {
        table: "tt_content".into(), uid: 500, values: values(json!({"header": "Draft", "categories": "2"})),
    }).unwrap().touched.unwrap();
    assert!(b.mm_rows("sys_category_record_mm").iter().any(|r| r.uid_foreign == draft));

    let out = one(&b, ws, Command::Delete { table: "tt_content".into(), uid: 500 }).unwrap();
    let placeholder = out.touched.unwrap();
    assert_ne!(placeholder, draft);
    assert!(b.row("tt_content", draft).is_none());
    assert!(!b.mm_rows("sys_category_record_mm").iter().any(|r| r.uid_foreign == draft));
    let ph = b.row("tt_content", placeholder).unwrap();
    assert_eq!(ph.int(STATE), 2);
    assert_eq!(ph.int(OID), 500);

    assert_eq!(b.row("tt_content", 500).unwrap(), live);
    let visible: Vec<u32> = overlay(b.rows("tt_content").iter(), Some("deleted"), ws).iter().map(|o| o.uid).collect();
    assert!(!visible.contains(&500));
}
