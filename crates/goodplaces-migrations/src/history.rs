//! Every revision after the root, oldest first.

use goodplaces_ledger::ops::{
    self, Column, ColumnType, ConstraintKind, DefaultValue, ReferentialAction, Table,
};
use goodplaces_ledger::{MigrationUnit, Step};

use crate::baseline::{created_at, id, reference};
use crate::data;

pub(crate) fn units() -> Vec<MigrationUnit> {
    vec![
        add_follow_relation(),
        add_indexes_for_aggregates(),
        add_comments(),
        add_comment_index(),
        add_comment_prefs(),
        add_searchable_by_phone_number(),
        add_category("7861816ef9bb", "057f1e5e7a15", "nightlife"),
        add_saved_post_table(),
        set_default_preferences(),
        delete_posts_and_comments(),
        add_post_notifications(),
        remove_waitlist_and_invite(),
        add_place_id_index_to_posts(),
        add_place_saves(),
        add_place_save_category_and_note(),
        make_place_save_category_optional(),
        migrate_post_saves_to_place_saves(),
        add_city_and_category_to_places(),
        populate_city_and_category(),
        add_location_ping_table(),
        add_post_stars(),
        convert_index_to_constraint(),
        add_onboarding(),
        add_category("804318e08ce7", "d1aecdbe4107", "cafe"),
        rename_image_upload_columns(),
        add_post_media(),
        migrate_images_to_media(),
        remove_location_pinging(),
    ]
}

fn add_follow_relation() -> MigrationUnit {
    MigrationUnit::new("f48d046d6b87", "add user relation type")
        .revises(crate::baseline::REVISION)
        .upgrade([
            ops::add_column(
                "follow",
                Column::new("relation", ColumnType::Text)
                    .not_null()
                    .default(DefaultValue::Text("following".into())),
            ),
            ops::create_check_constraint(
                "userrelationtype",
                "follow",
                "relation IN ('following', 'blocked')",
            ),
            ops::create_unique_constraint(
                "_from_user_to_user_uc",
                "follow",
                &["from_user_id", "to_user_id"],
            ),
        ])
}

fn add_indexes_for_aggregates() -> MigrationUnit {
    MigrationUnit::new("a18f47403d7c", "add indexes for aggregates")
        .revises("f48d046d6b87")
        .upgrade([
            ops::create_index(
                "user_relation_from_user_id_relation_idx",
                "follow",
                &["from_user_id", "relation"],
            ),
            ops::create_index(
                "user_relation_to_user_id_relation_idx",
                "follow",
                &["to_user_id", "relation"],
            ),
            ops::create_index("post_like_post_id_idx", "post_like", &["post_id"]),
        ])
}

fn add_comments() -> MigrationUnit {
    use ReferentialAction::Cascade;

    MigrationUnit::new("bf5be083eeca", "add comments")
        .revises("a18f47403d7c")
        .upgrade([
            ops::create_table(
                Table::new("comment")
                    .column(id())
                    .column(reference("user_id"))
                    .column(reference("post_id"))
                    .column(Column::new("content", ColumnType::Text).not_null())
                    .column(
                        Column::new("deleted", ColumnType::Boolean)
                            .not_null()
                            .default(DefaultValue::Bool(false)),
                    )
                    .column(created_at())
                    .column(
                        Column::new("updated_at", ColumnType::TimestampTz)
                            .not_null()
                            .default(DefaultValue::CurrentTimestamp),
                    )
                    .primary_key(["id"])
                    .foreign_key(&["post_id"], "post", &["id"], Cascade)
                    .foreign_key(&["user_id"], "user", &["id"], Cascade),
            ),
            ops::create_table(
                Table::new("comment_like")
                    .column(id())
                    .column(reference("user_id"))
                    .column(reference("comment_id"))
                    .column(created_at())
                    .primary_key(["id"])
                    .foreign_key(&["comment_id"], "comment", &["id"], Cascade)
                    .foreign_key(&["user_id"], "user", &["id"], Cascade)
                    .unique(Some("_comment_like_user_post_uc"), &["user_id", "comment_id"]),
            ),
        ])
}

fn add_comment_index() -> MigrationUnit {
    MigrationUnit::new("468110972f05", "add comment index")
        .revises("bf5be083eeca")
        .upgrade([ops::create_index("comment_post_id_idx", "comment", &["post_id"])])
}

fn notification_flag(name: &str, default: bool) -> Column {
    Column::new(name, ColumnType::Boolean)
        .not_null()
        .default(DefaultValue::Bool(default))
}

fn add_comment_prefs() -> MigrationUnit {
    MigrationUnit::new("d556a5d2d28e", "add comment prefs")
        .revises("468110972f05")
        .upgrade([
            ops::add_column("preferences", notification_flag("comment_notifications", true)),
            ops::add_column(
                "preferences",
                notification_flag("comment_liked_notifications", true),
            ),
            ops::drop_column("preferences", "post_notifications"),
        ])
        .downgrade([
            ops::add_column("preferences", notification_flag("post_notifications", false)),
            ops::drop_column("preferences", "comment_liked_notifications"),
            ops::drop_column("preferences", "comment_notifications"),
        ])
}

fn add_searchable_by_phone_number() -> MigrationUnit {
    MigrationUnit::new("057f1e5e7a15", "add searchable by phone number config")
        .revises("d556a5d2d28e")
        .upgrade([ops::add_column(
            "preferences",
            notification_flag("searchable_by_phone_number", true),
        )])
}

fn add_category(revision: &str, parent: &str, name: &str) -> MigrationUnit {
    MigrationUnit::new(revision, format!("add {name} category"))
        .revises(parent)
        .upgrade([ops::execute(&format!(
            "INSERT INTO category (name) VALUES ('{name}')"
        ))])
        .downgrade([ops::execute(&format!(
            "DELETE FROM category WHERE name = '{name}'"
        ))])
}

fn add_saved_post_table() -> MigrationUnit {
    use ReferentialAction::Cascade;

    MigrationUnit::new("d0f473550741", "add saved post table")
        .revises("7861816ef9bb")
        .upgrade([
            ops::create_table(
                Table::new("post_save")
                    .column(id())
                    .column(reference("user_id"))
                    .column(reference("post_id"))
                    .column(created_at())
                    .primary_key(["id"])
                    .foreign_key(&["post_id"], "post", &["id"], Cascade)
                    .foreign_key(&["user_id"], "user", &["id"], Cascade)
                    .unique(Some("_saved_post_user_post_uc"), &["user_id", "post_id"]),
            ),
            ops::create_index("saved_post_user_id_idx", "post_save", &["user_id"]),
        ])
}

fn set_default_preferences() -> MigrationUnit {
    MigrationUnit::new("5b80f513361d", "set default preferences")
        .revises("d0f473550741")
        .upgrade([
            ops::alter_default(
                "preferences",
                "follow_notifications",
                Some(DefaultValue::Bool(true)),
            ),
            ops::alter_default(
                "preferences",
                "post_liked_notifications",
                Some(DefaultValue::Bool(true)),
            ),
        ])
        .irreversible("previous defaults were never recorded")
}

fn delete_posts_and_comments() -> MigrationUnit {
    MigrationUnit::new("36824243c5a2", "delete posts and comments")
        .revises("5b80f513361d")
        .upgrade([Step::data(
            "purge soft-deleted posts and comments",
            data::purge_deleted_posts_and_comments,
        )])
        .irreversible("deleted rows are gone")
}

fn add_post_notifications() -> MigrationUnit {
    MigrationUnit::new("5e67fabc1bc9", "add post notifications")
        .revises("36824243c5a2")
        .upgrade([
            Step::from(ops::add_column(
                "preferences",
                notification_flag("post_notifications", true),
            )),
            Step::from(ops::execute(
                "DELETE FROM fcm_token
                 WHERE id NOT IN (SELECT MAX(id) FROM fcm_token GROUP BY user_id)",
            )),
        ])
        .downgrade([ops::drop_column("preferences", "post_notifications")])
}

fn remove_waitlist_and_invite() -> MigrationUnit {
    MigrationUnit::new("642d2801ba55", "remove waitlist and invite")
        .revises("5e67fabc1bc9")
        .upgrade([
            ops::drop_table("invite"),
            ops::drop_table("waitlist"),
            ops::drop_constraint(
                "place_verified_place_data_fkey",
                "place",
                ConstraintKind::ForeignKey,
            ),
            ops::drop_column("place", "verified_place_data"),
        ])
        .irreversible("invite and waitlist data are dropped")
}

fn add_place_id_index_to_posts() -> MigrationUnit {
    MigrationUnit::new("baf4d3383de7", "add place_id index to posts table")
        .revises("642d2801ba55")
        .upgrade([ops::create_index("idx_post_place_id", "post", &["place_id"])])
}

fn add_place_saves() -> MigrationUnit {
    use ReferentialAction::Cascade;

    MigrationUnit::new("a229b4dc25c7", "add place saves")
        .revises("baf4d3383de7")
        .upgrade([
            ops::create_table(
                Table::new("place_save")
                    .column(id())
                    .column(reference("user_id"))
                    .column(reference("place_id"))
                    .column(created_at())
                    .primary_key(["id"])
                    .foreign_key(&["place_id"], "place", &["id"], Cascade)
                    .foreign_key(&["user_id"], "user", &["id"], Cascade)
                    .unique(Some("_place_save_user_place_uc"), &["user_id", "place_id"]),
            ),
            ops::create_index("idx_place_save_place_id", "place_save", &["place_id"]),
        ])
}

fn add_place_save_category_and_note() -> MigrationUnit {
    MigrationUnit::new("345b58ae4a73", "add place save category and note")
        .revises("a229b4dc25c7")
        .upgrade([
            ops::add_column(
                "place_save",
                Column::new("category", ColumnType::Text).not_null(),
            ),
            ops::add_column("place_save", Column::new("note", ColumnType::Text).not_null()),
            ops::create_foreign_key(
                None,
                "place_save",
                "category",
                &["category"],
                &["name"],
                ReferentialAction::NoAction,
            ),
        ])
        .downgrade([
            ops::drop_column("place_save", "note"),
            ops::drop_column("place_save", "category"),
        ])
}

fn make_place_save_category_optional() -> MigrationUnit {
    MigrationUnit::new("2eb705cfa858", "make place save category optional")
        .revises("345b58ae4a73")
        .upgrade([ops::alter_nullable("place_save", "category", true)])
}

fn migrate_post_saves_to_place_saves() -> MigrationUnit {
    MigrationUnit::new("a35d49e143fd", "migrate post saves to place saves")
        .revises("2eb705cfa858")
        .upgrade([ops::execute(
            "INSERT OR IGNORE INTO place_save (id, user_id, place_id, category, note, created_at)
             SELECT post_save.id, post_save.user_id, post.place_id, post.category,
                    'Want to go', post_save.created_at
             FROM post_save
             INNER JOIN post ON post_save.post_id = post.id",
        )])
        .irreversible("copied saves are indistinguishable from new ones")
}

fn add_city_and_category_to_places() -> MigrationUnit {
    MigrationUnit::new("998dcad465fd", "add city and category to places")
        .revises("a35d49e143fd")
        .upgrade([
            ops::add_column("place", Column::new("city", ColumnType::Text)),
            ops::add_column("place", Column::new("category", ColumnType::Text)),
            ops::drop_index("idx_post_custom_location", "post"),
            ops::drop_column("post", "custom_location"),
            ops::drop_column("post", "custom_latitude"),
            ops::drop_column("post", "custom_longitude"),
        ])
        // Custom post locations are not coming back.
        .downgrade([
            ops::drop_column("place", "category"),
            ops::drop_column("place", "city"),
        ])
}

fn populate_city_and_category() -> MigrationUnit {
    MigrationUnit::new("812e3bffe118", "populate city and category")
        .revises("998dcad465fd")
        .upgrade([Step::data(
            "derive place city and category from crowd-sourced place data",
            data::populate_city_and_category,
        )])
        .irreversible("derived values overwrite whatever was there")
}

fn location_table(coordinate: ColumnType) -> Table {
    Table::new("location")
        .column(id())
        .column(Column::new("uid", ColumnType::Text).not_null())
        .column(Column::new("latitude", coordinate).not_null())
        .column(Column::new("longitude", coordinate).not_null())
        .column(created_at())
        .primary_key(["id"])
}

fn add_location_ping_table() -> MigrationUnit {
    MigrationUnit::new("0bb280063612", "add location ping table")
        .revises("812e3bffe118")
        .upgrade([ops::create_table(location_table(ColumnType::Float))])
}

fn add_post_stars() -> MigrationUnit {
    MigrationUnit::new("e35650038a94", "add post stars")
        .revises("0bb280063612")
        .upgrade([ops::add_column("post", Column::new("stars", ColumnType::Integer))])
}

fn convert_index_to_constraint() -> MigrationUnit {
    MigrationUnit::new("9c81d4344132", "convert index to constraint")
        .revises("e35650038a94")
        .upgrade([
            ops::drop_index("_posts_user_place_uc", "post"),
            ops::create_unique_constraint("_posts_user_place_uc", "post", &["user_id", "place_id"]),
        ])
        .downgrade([
            ops::drop_constraint("_posts_user_place_uc", "post", ConstraintKind::Unique),
            ops::create_index("_posts_user_place_uc", "post", &["user_id", "place_id"]),
        ])
}

fn add_onboarding() -> MigrationUnit {
    MigrationUnit::new("d1aecdbe4107", "add onboarded_at and onboarded_city to user")
        .revises("9c81d4344132")
        .upgrade([
            ops::add_column("user", Column::new("onboarded_at", ColumnType::TimestampTz)),
            ops::add_column("user", Column::new("onboarded_city", ColumnType::Text)),
        ])
}

fn rename_image_upload_columns() -> MigrationUnit {
    MigrationUnit::new("064a2159eb7b", "rename image upload columns")
        .revises("804318e08ce7")
        .upgrade([
            ops::rename_column("image_upload", "firebase_blob_name", "blob_name"),
            ops::rename_column("image_upload", "firebase_public_url", "url"),
        ])
}

fn add_post_media() -> MigrationUnit {
    MigrationUnit::new("23b307c6e876", "add media column to post table")
        .revises("064a2159eb7b")
        .upgrade([ops::add_column(
            "post",
            Column::new("media", ColumnType::Json)
                .not_null()
                .default(DefaultValue::Text("[]".into())),
        )])
}

fn migrate_images_to_media() -> MigrationUnit {
    MigrationUnit::new("761e1eabde1d", "migrate images to media column")
        .revises("23b307c6e876")
        .upgrade([ops::execute(
            "UPDATE post
             SET media = json_array(json_object('id', iu.id, 'blob_name', iu.blob_name, 'url', iu.url))
             FROM image_upload AS iu
             WHERE post.image_id = iu.id AND post.media = '[]'",
        )])
        .irreversible("image_id is kept, media is left as migrated")
}

fn remove_location_pinging() -> MigrationUnit {
    MigrationUnit::new("7a1730bf8d2e", "remove location pinging")
        .revises("761e1eabde1d")
        .upgrade([ops::drop_table("location")])
        .downgrade([ops::create_table(location_table(ColumnType::Double))])
}
