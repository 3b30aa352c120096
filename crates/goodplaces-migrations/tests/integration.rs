use goodplaces_db::SqliteStore;
use goodplaces_ledger::ops::{add_column, Column, ColumnType};
use goodplaces_ledger::{
    Direction, GraphIntegrityError, MigrationGraph, MigrationUnit, RunReport, Runner,
};
use goodplaces_migrations::{all, graph, seeded_categories, BASE_REVISION, HEAD_REVISION};
use rusqlite::Connection;

fn open() -> Connection {
    let conn = Connection::open_in_memory().expect("should open in-memory database");
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .expect("should enable foreign keys");
    conn
}

fn migrate(conn: &mut Connection, graph: &MigrationGraph, target: &str) -> RunReport {
    Runner::new(graph, SqliteStore::new(conn))
        .migrate_to(target)
        .expect("migration should succeed")
}

fn columns(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{table}\")"))
        .expect("should prepare table_info");
    stmt.query_map([], |row| row.get(1))
        .expect("should query table_info")
        .map(|r| r.expect("should read column"))
        .collect()
}

fn tables(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND substr(name, 1, 8) != '_ledger_'
             ORDER BY name",
        )
        .expect("should prepare table query");
    stmt.query_map([], |row| row.get(0))
        .expect("should query tables")
        .map(|r| r.expect("should read table"))
        .collect()
}

fn strings(conn: &Connection, sql: &str) -> Vec<Option<String>> {
    let mut stmt = conn.prepare(sql).expect("should prepare query");
    stmt.query_map([], |row| row.get(0))
        .expect("should run query")
        .map(|r| r.expect("should read row"))
        .collect()
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0))
        .expect("count query should succeed")
}

fn seed_users(conn: &Connection, ids: &[&str]) {
    for id in ids {
        conn.execute(
            "INSERT INTO user (id, uid, username, first_name, last_name)
             VALUES (?1, ?1, ?1, 'First', 'Last')",
            [id],
        )
        .expect("should insert user");
    }
}

fn seed_place(conn: &Connection, id: &str, name: &str) {
    conn.execute(
        "INSERT INTO place (id, name, latitude, longitude) VALUES (?1, ?2, 37.8, -122.3)",
        [id, name],
    )
    .expect("should insert place");
}

// ── Full history ────────────────────────────────────────────────────

#[test]
fn fresh_database_upgrades_to_head() {
    let graph = graph().expect("bundled history should build");
    let mut conn = open();

    let report = migrate(&mut conn, &graph, "heads");

    assert_eq!(report.direction, Some(Direction::Upgrade));
    assert!(report.from.is_empty());
    assert_eq!(report.to, vec![HEAD_REVISION.to_string()]);
    assert_eq!(report.executed.len(), all().len());
    assert_eq!(report.executed.first().map(String::as_str), Some(BASE_REVISION));

    let tables = tables(&conn);
    for expected in ["comment", "comment_like", "place_save", "post_save", "preferences"] {
        assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
    }
    for gone in ["invite", "waitlist", "location"] {
        assert!(!tables.iter().any(|t| t == gone), "table {gone} should be dropped");
    }

    let post = columns(&conn, "post");
    assert!(post.contains(&"media".to_string()));
    assert!(post.contains(&"stars".to_string()));
    assert!(!post.contains(&"custom_location".to_string()));
    assert_eq!(
        columns(&conn, "image_upload"),
        vec!["id", "user_id", "blob_name", "url", "used", "created_at"]
    );
    assert!(!columns(&conn, "place").contains(&"verified_place_data".to_string()));

    let mut categories: Vec<String> = strings(&conn, "SELECT name FROM category")
        .into_iter()
        .flatten()
        .collect();
    categories.sort();
    let mut expected: Vec<String> = seeded_categories().into_iter().map(String::from).collect();
    expected.sort();
    assert_eq!(categories, expected);

    let mut check = conn
        .prepare("PRAGMA foreign_key_check")
        .expect("should prepare foreign_key_check");
    let violations = check
        .query_map([], |_| Ok(()))
        .expect("should run foreign_key_check")
        .count();
    assert_eq!(violations, 0);
    let fk: i64 = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
        .expect("should query foreign_keys");
    assert_eq!(fk, 1, "enforcement should be restored after the run");
}

#[test]
fn upgrading_an_up_to_date_database_is_a_noop() {
    let graph = graph().expect("bundled history should build");
    let mut conn = open();
    migrate(&mut conn, &graph, "heads");

    let report = migrate(&mut conn, &graph, "heads");

    assert!(report.is_noop());
    assert_eq!(report.to, vec![HEAD_REVISION.to_string()]);
}

#[test]
fn downgrade_passes_irreversible_media_migration() {
    let graph = graph().expect("bundled history should build");
    let mut conn = open();
    migrate(&mut conn, &graph, "heads");

    let report = Runner::new(&graph, SqliteStore::new(&mut conn))
        .downgrade("064a2159eb7b")
        .expect("downgrade should succeed");

    assert_eq!(report.direction, Some(Direction::Downgrade));
    assert_eq!(report.executed, vec!["7a1730bf8d2e", "23b307c6e876"]);
    assert_eq!(report.irreversible, vec!["761e1eabde1d"]);
    assert_eq!(report.to, vec!["064a2159eb7b".to_string()]);

    assert!(tables(&conn).iter().any(|t| t == "location"));
    assert!(!columns(&conn, "post").contains(&"media".to_string()));
    let latitude: String = conn
        .query_row(
            "SELECT type FROM pragma_table_info('location') WHERE name = 'latitude'",
            [],
            |row| row.get(0),
        )
        .expect("location should have a latitude column");
    assert_eq!(latitude, "DOUBLE PRECISION");

    let report = migrate(&mut conn, &graph, "heads");
    assert_eq!(
        report.executed,
        vec!["23b307c6e876", "761e1eabde1d", "7a1730bf8d2e"]
    );
}

#[test]
fn downgrade_reverts_reversible_schema_changes() {
    let graph = graph().expect("bundled history should build");
    let mut conn = open();
    migrate(&mut conn, &graph, "9c81d4344132");

    let indexes = |conn: &Connection| {
        strings(
            conn,
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'post' AND sql IS NOT NULL ORDER BY name",
        )
    };
    assert!(!indexes(&conn).contains(&Some("_posts_user_place_uc".to_string())));

    migrate(&mut conn, &graph, "e35650038a94");

    assert!(indexes(&conn).contains(&Some("_posts_user_place_uc".to_string())));
    let sql: String = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'post'",
            [],
            |row| row.get(0),
        )
        .expect("post should exist");
    assert!(!sql.contains("_posts_user_place_uc"));
}

// ── Data revisions ──────────────────────────────────────────────────

#[test]
fn purge_removes_deleted_posts_and_their_dependents() {
    let graph = graph().expect("bundled history should build");
    let mut conn = open();
    migrate(&mut conn, &graph, "5b80f513361d");

    seed_users(&conn, &["u1", "u2"]);
    seed_place(&conn, "p1", "Cafe");
    seed_place(&conn, "p2", "Bar");
    conn.execute_batch(
        "INSERT INTO post (id, user_id, place_id, category, content, deleted)
             VALUES ('post-live', 'u1', 'p1', 'food', 'good', FALSE),
                    ('post-gone', 'u1', 'p2', 'food', 'bad', TRUE);
         INSERT INTO post_like (id, user_id, post_id) VALUES ('l1', 'u2', 'post-gone'), ('l2', 'u2', 'post-live');
         INSERT INTO post_save (id, user_id, post_id) VALUES ('s1', 'u2', 'post-gone');
         INSERT INTO comment (id, user_id, post_id, content, deleted)
             VALUES ('c-on-gone', 'u2', 'post-gone', 'hi', FALSE),
                    ('c-deleted', 'u2', 'post-live', 'oops', TRUE),
                    ('c-live', 'u2', 'post-live', 'nice', FALSE);
         INSERT INTO comment_like (id, user_id, comment_id)
             VALUES ('cl1', 'u1', 'c-on-gone'), ('cl2', 'u1', 'c-live');",
    )
    .expect("should seed posts");

    let report = migrate(&mut conn, &graph, "36824243c5a2");

    assert_eq!(report.executed, vec!["36824243c5a2"]);
    assert_eq!(strings(&conn, "SELECT id FROM post"), vec![Some("post-live".into())]);
    assert_eq!(strings(&conn, "SELECT id FROM comment"), vec![Some("c-live".into())]);
    assert_eq!(strings(&conn, "SELECT id FROM comment_like"), vec![Some("cl2".into())]);
    assert_eq!(strings(&conn, "SELECT id FROM post_like"), vec![Some("l2".into())]);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM post_save"), 0);
}

#[test]
fn duplicate_push_tokens_keep_the_newest_per_user() {
    let graph = graph().expect("bundled history should build");
    let mut conn = open();
    migrate(&mut conn, &graph, "36824243c5a2");

    seed_users(&conn, &["u1", "u2"]);
    conn.execute_batch(
        "INSERT INTO fcm_token (id, user_id, token) VALUES
             ('t01', 'u1', 'old'), ('t02', 'u1', 'new'), ('t03', 'u2', 'only');
         INSERT INTO preferences (id, user_id, follow_notifications, post_liked_notifications, comment_notifications)
             VALUES ('pref1', 'u1', TRUE, FALSE, TRUE);",
    )
    .expect("should seed tokens");

    migrate(&mut conn, &graph, "5e67fabc1bc9");

    assert_eq!(
        strings(&conn, "SELECT token FROM fcm_token ORDER BY id"),
        vec![Some("new".into()), Some("only".into())]
    );
    let post_notifications: bool = conn
        .query_row("SELECT post_notifications FROM preferences", [], |row| row.get(0))
        .expect("preferences row should exist");
    assert!(post_notifications);
}

#[test]
fn post_saves_become_place_saves_and_places_get_metadata() {
    let graph = graph().expect("bundled history should build");
    let mut conn = open();
    migrate(&mut conn, &graph, "2eb705cfa858");

    seed_users(&conn, &["u1", "u2", "u3"]);
    seed_place(&conn, "p1", "Blue Bottle");
    seed_place(&conn, "p2", "Nowhere");
    conn.execute_batch(
        r#"INSERT INTO post (id, user_id, place_id, category, content)
               VALUES ('post1', 'u1', 'p1', 'food', 'latte');
           INSERT INTO post_save (id, user_id, post_id) VALUES ('save1', 'u2', 'post1');
           INSERT INTO place_data (id, user_id, place_id, additional_data) VALUES
               ('d1', 'u1', 'p1', '{"locality": "Oakland", "poi_category": "MKPOICategoryCafe"}'),
               ('d2', 'u2', 'p1', '{"locality": "Oakland", "poi_category": "MKPOICategoryBakery"}'),
               ('d3', 'u3', 'p1', '{"locality": "Berkeley", "poi_category": "MKPOICategoryCafe"}');"#,
    )
    .expect("should seed saves");

    migrate(&mut conn, &graph, "812e3bffe118");

    let save: (String, String, Option<String>, String) = conn
        .query_row(
            "SELECT user_id, place_id, category, note FROM place_save WHERE id = 'save1'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .expect("post save should be copied");
    assert_eq!(
        save,
        ("u2".into(), "p1".into(), Some("food".into()), "Want to go".into())
    );

    let metadata = |id: &str| -> (Option<String>, Option<String>) {
        conn.query_row(
            "SELECT city, category FROM place WHERE id = ?1",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("place should exist")
    };
    assert_eq!(metadata("p1"), (Some("Oakland".into()), Some("Cafe".into())));
    assert_eq!(metadata("p2"), (None, None));

    assert!(!columns(&conn, "post").contains(&"custom_latitude".to_string()));
    assert_eq!(strings(&conn, "SELECT content FROM post"), vec![Some("latte".into())]);
}

#[test]
fn image_uploads_move_into_post_media() {
    let graph = graph().expect("bundled history should build");
    let mut conn = open();
    migrate(&mut conn, &graph, "23b307c6e876");

    seed_users(&conn, &["u1"]);
    seed_place(&conn, "p1", "Blue Bottle");
    seed_place(&conn, "p2", "Tartine");
    conn.execute_batch(
        "INSERT INTO image_upload (id, user_id, blob_name, url, used)
             VALUES ('img1', 'u1', 'blob-1', 'https://cdn.example/blob-1', TRUE);
         INSERT INTO post (id, user_id, place_id, category, content, image_id) VALUES
             ('with-image', 'u1', 'p1', 'food', 'pic', 'img1'),
             ('without-image', 'u1', 'p2', 'food', 'words', NULL);",
    )
    .expect("should seed posts");

    migrate(&mut conn, &graph, "761e1eabde1d");

    assert_eq!(
        strings(&conn, "SELECT media FROM post ORDER BY id"),
        vec![
            Some(r#"[{"id":"img1","blob_name":"blob-1","url":"https://cdn.example/blob-1"}]"#.into()),
            Some("[]".into()),
        ]
    );
}

// ── Graph shape ─────────────────────────────────────────────────────

#[test]
fn abandoned_fork_would_leave_two_heads() {
    let mut units = all();
    units.push(
        MigrationUnit::new("378d78e50715", "add media column to post table")
            .revises("064a2159eb7b")
            .upgrade([add_column("post", Column::new("media", ColumnType::Json))]),
    );

    let err = MigrationGraph::build(units).expect_err("two unmerged heads should be rejected");
    match err {
        GraphIntegrityError::UnmergedHeads { fork_point, .. } => {
            assert_eq!(fork_point.as_deref(), Some("064a2159eb7b"));
        }
        other => panic!("expected UnmergedHeads, got {other:?}"),
    }
}

#[test]
fn short_prefixes_resolve_to_bundled_revisions() {
    let graph = graph().expect("bundled history should build");
    assert_eq!(
        graph.resolve("7a17").expect("prefix should resolve"),
        vec![HEAD_REVISION]
    );
    assert_eq!(
        graph.resolve("head").expect("single head should resolve"),
        vec![HEAD_REVISION]
    );
}
