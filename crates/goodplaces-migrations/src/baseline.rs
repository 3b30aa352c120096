//! The root revision: the schema as it stood when migrations were
//! introduced.

use goodplaces_ledger::ops::{
    self, Column, ColumnType, DefaultValue, ReferentialAction, SchemaOp, Table,
};
use goodplaces_ledger::MigrationUnit;

pub(crate) const REVISION: &str = "b9094d09fa9d";

/// Categories present from the start. Later revisions add more.
pub(crate) const INITIAL_CATEGORIES: [&str; 5] =
    ["food", "activity", "attraction", "lodging", "shopping"];

// Reverse creation order so referencing tables go first.
const TABLES: [&str; 14] = [
    "feedback",
    "waitlist",
    "invite",
    "post_report",
    "post_like",
    "post",
    "follow",
    "place_data",
    "place",
    "category",
    "preferences",
    "fcm_token",
    "image_upload",
    "user",
];

pub(crate) fn unit() -> MigrationUnit {
    let seed = format!(
        "INSERT INTO category (name) VALUES {}",
        INITIAL_CATEGORIES
            .iter()
            .map(|name| format!("('{name}')"))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut upgrade: Vec<SchemaOp> = tables().into_iter().map(ops::create_table).collect();
    upgrade.extend([
        ops::create_index("idx_post_custom_location", "post", &["custom_location"]),
        ops::create_index("_posts_user_place_uc", "post", &["user_id", "place_id"]),
        ops::execute(&seed),
    ]);

    MigrationUnit::new(REVISION, "create schema")
        .upgrade(upgrade)
        .downgrade(TABLES.map(ops::drop_table))
}

pub(crate) fn id() -> Column {
    Column::new("id", ColumnType::Uuid).not_null()
}

pub(crate) fn reference(name: &str) -> Column {
    Column::new(name, ColumnType::Uuid).not_null()
}

pub(crate) fn created_at() -> Column {
    timestamp("created_at")
}

fn timestamp(name: &str) -> Column {
    Column::new(name, ColumnType::TimestampTz)
        .not_null()
        .default(DefaultValue::CurrentTimestamp)
}

fn flag(name: &str, default: bool) -> Column {
    Column::new(name, ColumnType::Boolean)
        .not_null()
        .default(DefaultValue::Bool(default))
}

fn tables() -> Vec<Table> {
    use ReferentialAction::Cascade;

    vec![
        Table::new("user")
            .column(id())
            .column(Column::new("uid", ColumnType::Text).not_null())
            .column(Column::new("username", ColumnType::Text).not_null())
            .column(Column::new("first_name", ColumnType::Text).not_null())
            .column(Column::new("last_name", ColumnType::Text).not_null())
            .column(Column::new("phone_number", ColumnType::Text))
            .column(Column::new("profile_picture_id", ColumnType::Uuid))
            .column(flag("is_featured", false))
            .column(flag("is_admin", false))
            .column(flag("deleted", false))
            .column(created_at())
            .column(timestamp("updated_at"))
            .primary_key(["id"])
            .unique(Some("user_uid_key"), &["uid"])
            .unique(Some("user_username_key"), &["username"])
            .unique(Some("user_phone_number_key"), &["phone_number"])
            .foreign_key(
                &["profile_picture_id"],
                "image_upload",
                &["id"],
                ReferentialAction::NoAction,
            ),
        Table::new("image_upload")
            .column(id())
            .column(reference("user_id"))
            .column(Column::new("firebase_blob_name", ColumnType::Text))
            .column(Column::new("firebase_public_url", ColumnType::Text))
            .column(flag("used", false))
            .column(created_at())
            .primary_key(["id"])
            .foreign_key(&["user_id"], "user", &["id"], Cascade),
        Table::new("fcm_token")
            .column(id())
            .column(reference("user_id"))
            .column(Column::new("token", ColumnType::Text).not_null())
            .column(created_at())
            .primary_key(["id"])
            .unique(Some("_user_token"), &["user_id", "token"])
            .foreign_key(&["user_id"], "user", &["id"], Cascade),
        Table::new("preferences")
            .column(id())
            .column(reference("user_id"))
            .column(Column::new("post_notifications", ColumnType::Boolean).not_null())
            .column(Column::new("follow_notifications", ColumnType::Boolean).not_null())
            .column(Column::new("post_liked_notifications", ColumnType::Boolean).not_null())
            .column(timestamp("updated_at"))
            .primary_key(["id"])
            .foreign_key(&["user_id"], "user", &["id"], Cascade),
        Table::new("category")
            .column(Column::new("name", ColumnType::Text).not_null())
            .primary_key(["name"]),
        Table::new("place")
            .column(id())
            .column(Column::new("name", ColumnType::Text).not_null())
            .column(Column::new("latitude", ColumnType::Float).not_null())
            .column(Column::new("longitude", ColumnType::Float).not_null())
            .column(Column::new("verified_place_data", ColumnType::Uuid))
            .column(created_at())
            .column(timestamp("updated_at"))
            .primary_key(["id"])
            .unique(
                Some("_place_name_location"),
                &["name", "latitude", "longitude"],
            )
            .foreign_key(
                &["verified_place_data"],
                "place_data",
                &["id"],
                ReferentialAction::NoAction,
            ),
        Table::new("place_data")
            .column(id())
            .column(reference("user_id"))
            .column(reference("place_id"))
            .column(Column::new("region_center_lat", ColumnType::Float))
            .column(Column::new("region_center_long", ColumnType::Float))
            .column(Column::new("radius_meters", ColumnType::Float))
            .column(Column::new("additional_data", ColumnType::Json))
            .column(created_at())
            .primary_key(["id"])
            .unique(Some("_place_data_user_place_uc"), &["user_id", "place_id"])
            .foreign_key(&["user_id"], "user", &["id"], Cascade)
            .foreign_key(&["place_id"], "place", &["id"], Cascade),
        Table::new("follow")
            .column(id())
            .column(reference("from_user_id"))
            .column(reference("to_user_id"))
            .column(created_at())
            .primary_key(["id"])
            .foreign_key(&["from_user_id"], "user", &["id"], Cascade)
            .foreign_key(&["to_user_id"], "user", &["id"], Cascade),
        Table::new("post")
            .column(id())
            .column(reference("user_id"))
            .column(reference("place_id"))
            .column(Column::new("category", ColumnType::Text).not_null())
            .column(Column::new("custom_location", ColumnType::Text))
            .column(Column::new("custom_latitude", ColumnType::Float))
            .column(Column::new("custom_longitude", ColumnType::Float))
            .column(Column::new("content", ColumnType::Text).not_null())
            .column(Column::new("image_id", ColumnType::Uuid))
            .column(flag("deleted", false))
            .column(created_at())
            .column(timestamp("updated_at"))
            .primary_key(["id"])
            .unique(Some("post_image_id_key"), &["image_id"])
            .foreign_key(&["user_id"], "user", &["id"], Cascade)
            .foreign_key(&["place_id"], "place", &["id"], ReferentialAction::NoAction)
            .foreign_key(&["category"], "category", &["name"], ReferentialAction::NoAction)
            .foreign_key(&["image_id"], "image_upload", &["id"], ReferentialAction::NoAction),
        Table::new("post_like")
            .column(id())
            .column(reference("user_id"))
            .column(reference("post_id"))
            .column(created_at())
            .primary_key(["id"])
            .unique(Some("_post_like_user_post_uc"), &["user_id", "post_id"])
            .foreign_key(&["user_id"], "user", &["id"], Cascade)
            .foreign_key(&["post_id"], "post", &["id"], Cascade),
        Table::new("post_report")
            .column(id())
            .column(reference("post_id"))
            .column(reference("reported_by_user_id"))
            .column(Column::new("details", ColumnType::Text))
            .column(created_at())
            .primary_key(["id"])
            .unique(
                Some("_report_post_user_uc"),
                &["post_id", "reported_by_user_id"],
            )
            .foreign_key(&["post_id"], "post", &["id"], Cascade)
            .foreign_key(&["reported_by_user_id"], "user", &["id"], Cascade),
        Table::new("invite")
            .column(id())
            .column(Column::new("phone_number", ColumnType::Text).not_null())
            .column(reference("invited_by"))
            .column(created_at())
            .primary_key(["id"])
            .unique(Some("invite_phone_number_key"), &["phone_number"])
            .foreign_key(&["invited_by"], "user", &["id"], Cascade),
        Table::new("waitlist")
            .column(id())
            .column(Column::new("uid", ColumnType::Text).not_null())
            .column(created_at())
            .primary_key(["id"])
            .unique(Some("waitlist_uid_key"), &["uid"]),
        Table::new("feedback")
            .column(id())
            .column(reference("user_id"))
            .column(Column::new("contents", ColumnType::Text).not_null())
            .column(flag("follow_up", false))
            .column(created_at())
            .primary_key(["id"])
            .foreign_key(&["user_id"], "user", &["id"], Cascade),
    ]
}
