//! Bodies of the data steps.
//!
//! These run with foreign key enforcement off, so cascades the schema
//! declares have to be carried out by hand.

use std::collections::BTreeMap;

use goodplaces_ledger::{DataAccess, SqlValue, StoreError};

const DELETED_POSTS: &str = "SELECT id FROM post WHERE deleted";

/// Leading prefix of MapKit point-of-interest categories.
const POI_CATEGORY_PREFIX: &str = "MKPOICategory";

/// Hard-deletes soft-deleted posts and comments together with the rows
/// that cascade from them.
pub(crate) fn purge_deleted_posts_and_comments(db: &mut dyn DataAccess) -> Result<(), StoreError> {
    let statements = [
        format!(
            "DELETE FROM comment_like WHERE comment_id IN (
                SELECT id FROM comment WHERE deleted OR post_id IN ({DELETED_POSTS})
            )"
        ),
        format!("DELETE FROM comment WHERE deleted OR post_id IN ({DELETED_POSTS})"),
        format!("DELETE FROM post_like WHERE post_id IN ({DELETED_POSTS})"),
        format!("DELETE FROM post_save WHERE post_id IN ({DELETED_POSTS})"),
        format!("DELETE FROM post_report WHERE post_id IN ({DELETED_POSTS})"),
        "DELETE FROM post WHERE deleted".to_string(),
    ];

    let mut removed = 0;
    for sql in &statements {
        removed += db.execute(sql, &[])?;
    }
    tracing::info!(rows = removed, "purged soft-deleted posts and comments");
    Ok(())
}

/// Sets `place.city` and `place.category` to the most common `locality`
/// and `poi_category` reported for each place. Ties go to the smallest
/// value; places without reports get `NULL`.
pub(crate) fn populate_city_and_category(db: &mut dyn DataAccess) -> Result<(), StoreError> {
    let rows = db.query(
        "SELECT place.id,
                json_extract(place_data.additional_data, '$.locality'),
                json_extract(place_data.additional_data, '$.poi_category')
         FROM place
         LEFT JOIN place_data ON place_data.place_id = place.id
         ORDER BY place.id",
        &[],
    )?;

    let mut places: Vec<(SqlValue, Tally, Tally)> = Vec::new();
    for row in rows {
        let [id, locality, poi_category]: [SqlValue; 3] = row.try_into().map_err(|_| {
            StoreError::Data("place metadata query returned an unexpected shape".into())
        })?;
        if places.last().map_or(true, |(last, _, _)| *last != id) {
            places.push((id, Tally::default(), Tally::default()));
        }
        if let Some((_, cities, categories)) = places.last_mut() {
            cities.add(&locality);
            categories.add(&poi_category);
        }
    }

    for (id, cities, categories) in &places {
        let city = cities.mode().map(str::to_string);
        let category = categories.mode().map(strip_poi_prefix);
        db.execute(
            "UPDATE place SET city = ?1, category = ?2 WHERE id = ?3",
            &[optional(city), optional(category), id.clone()],
        )?;
    }
    tracing::info!(places = places.len(), "populated place city and category");
    Ok(())
}

/// Occurrence counts of text values.
#[derive(Debug, Default)]
struct Tally(BTreeMap<String, usize>);

impl Tally {
    fn add(&mut self, value: &SqlValue) {
        if let Some(text) = value.as_str() {
            *self.0.entry(text.to_string()).or_default() += 1;
        }
    }

    fn mode(&self) -> Option<&str> {
        let mut best: Option<(&str, usize)> = None;
        for (value, &count) in &self.0 {
            if best.map_or(true, |(_, top)| count > top) {
                best = Some((value.as_str(), count));
            }
        }
        best.map(|(value, _)| value)
    }
}

fn strip_poi_prefix(category: &str) -> String {
    category
        .strip_prefix(POI_CATEGORY_PREFIX)
        .unwrap_or(category)
        .to_string()
}

fn optional(value: Option<String>) -> SqlValue {
    value.map_or(SqlValue::Null, SqlValue::Text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_prefers_most_frequent_then_smallest() {
        let mut tally = Tally::default();
        for value in ["Oakland", "Berkeley", "Oakland", "Berkeley", "Alameda"] {
            tally.add(&SqlValue::from(value));
        }
        tally.add(&SqlValue::Null);
        assert_eq!(tally.mode(), Some("Berkeley"));

        tally.add(&SqlValue::from("Oakland"));
        assert_eq!(tally.mode(), Some("Oakland"));
    }

    #[test]
    fn empty_tally_has_no_mode() {
        assert_eq!(Tally::default().mode(), None);
    }

    #[test]
    fn strips_mapkit_prefix_only_when_present() {
        assert_eq!(strip_poi_prefix("MKPOICategoryCafe"), "Cafe");
        assert_eq!(strip_poi_prefix("Bakery"), "Bakery");
    }
}
