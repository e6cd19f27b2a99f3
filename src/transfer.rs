//! Import/export of a finished ranking as a JSON document.
//!
//! Document shape (field names are part of the file format):
//!
//! ```json
//! {
//!   "username": "someone",
//!   "anime": { "5114": { "elo": 1632, "wonAgainst": [9253], "lostTo": [], "title": "..." } },
//!   "totalInitialPairs": 1,
//!   "manuallyEliminatedCount": 1,
//!   "autoEliminatedCountA": 0,
//!   "autoEliminatedCountB": 0,
//!   "completedTimestamp": 1700000000000
//! }
//! ```
//!
//! Imports are checked field by field before anything else happens, then the
//! rating data is checked for consistency. A document that fails either check
//! never reaches the session.

use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::RankError;
use crate::rating_store::{ItemId, RatingRecord, RatingStore};
use crate::session::Counters;
use crate::source::SourceItem;

static ITEM_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("valid item key regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    #[error("not valid JSON: {0}")]
    Json(String),

    #[error("document must be a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("`anime` must hold at least two items")]
    TooFewItems,

    #[error("`anime` key {0:?} is not a decimal item id")]
    BadKey(String),

    #[error("`anime` holds item {0} under more than one key")]
    DuplicateId(ItemId),

    #[error("inconsistent rating data: {0}")]
    Inconsistent(#[from] RankError),
}

impl ImportError {
    fn wrong_type(field: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongType {
            field: field.into(),
            expected,
        }
    }
}

/// One item's entry in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEntry {
    pub elo: i64,
    pub won_against: Vec<ItemId>,
    pub lost_to: Vec<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A finished ranking as written to (and read from) disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDocument {
    pub username: String,
    pub anime: IndexMap<String, DocumentEntry>,
    pub total_initial_pairs: u64,
    pub manually_eliminated_count: u64,
    pub auto_eliminated_count_a: u64,
    pub auto_eliminated_count_b: u64,
    pub completed_timestamp: i64,
}

impl ImportDocument {
    /// Rebuild the rating store, checking every store invariant.
    pub fn to_store(&self) -> Result<RatingStore, ImportError> {
        let mut records = IndexMap::with_capacity(self.anime.len());
        for (key, entry) in &self.anime {
            let id = parse_key(key)?;
            let record = RatingRecord::with_results(
                entry.elo,
                entry.won_against.iter().copied(),
                entry.lost_to.iter().copied(),
            );
            if records.insert(id, record).is_some() {
                return Err(ImportError::DuplicateId(id));
            }
        }
        Ok(RatingStore::from_records(records)?)
    }

    /// Display items built from the titles stored in the document.
    ///
    /// Lets an imported ranking be shown without refetching the list.
    pub fn display_items(&self) -> Vec<SourceItem> {
        self.anime
            .iter()
            .filter_map(|(key, entry)| {
                let id = parse_key(key).ok()?;
                Some(SourceItem::new(id, entry.title.clone().unwrap_or_default()))
            })
            .collect()
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Build the document for a finished ranking.
///
/// `items` supplies display titles; items without a known title are written
/// without one.
pub fn export_document(
    username: &str,
    store: &RatingStore,
    counters: &Counters,
    completed_timestamp: i64,
    items: &IndexMap<ItemId, SourceItem>,
) -> ImportDocument {
    let anime = store
        .iter()
        .map(|(id, record)| {
            let title = items
                .get(&id)
                .map(|item| item.title.clone())
                .filter(|title| !title.is_empty());
            (
                id.to_string(),
                DocumentEntry {
                    elo: record.rating(),
                    won_against: record.won_against().iter().copied().collect(),
                    lost_to: record.lost_to().iter().copied().collect(),
                    title,
                },
            )
        })
        .collect();

    ImportDocument {
        username: username.to_string(),
        anime,
        total_initial_pairs: counters.total_initial_pairs as u64,
        manually_eliminated_count: counters.manually_eliminated as u64,
        auto_eliminated_count_a: counters.auto_eliminated_a as u64,
        auto_eliminated_count_b: counters.auto_eliminated_b as u64,
        completed_timestamp,
    }
}

/// Parse and fully validate raw document text.
pub fn parse_import(raw: &str) -> Result<ImportDocument, ImportError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ImportError::Json(e.to_string()))?;
    validate_import(&value)
}

/// Validate a decoded document value.
///
/// Every required field must be present with the right JSON type; the rating
/// data must then form a consistent store of at least two items.
pub fn validate_import(value: &Value) -> Result<ImportDocument, ImportError> {
    let root = value.as_object().ok_or(ImportError::NotAnObject)?;

    let username = required(root, "username", "")?
        .as_str()
        .ok_or_else(|| ImportError::wrong_type("username", "a string"))?
        .to_string();

    let anime_value = required(root, "anime", "")?
        .as_object()
        .ok_or_else(|| ImportError::wrong_type("anime", "an object"))?;
    if anime_value.len() < 2 {
        return Err(ImportError::TooFewItems);
    }

    let mut anime = IndexMap::with_capacity(anime_value.len());
    let mut seen = IndexSet::with_capacity(anime_value.len());
    for (key, entry) in anime_value {
        if !ITEM_KEY_RE.is_match(key) {
            return Err(ImportError::BadKey(key.clone()));
        }
        // "01" and "1" name the same item.
        let id = parse_key(key)?;
        if !seen.insert(id) {
            return Err(ImportError::DuplicateId(id));
        }
        let path = format!("anime.{key}");
        let entry = entry
            .as_object()
            .ok_or_else(|| ImportError::wrong_type(path.clone(), "an object"))?;

        let elo = required(entry, "elo", &path)?
            .as_f64()
            .filter(|n| n.is_finite())
            .ok_or_else(|| ImportError::wrong_type(format!("{path}.elo"), "a number"))?;
        let won_against = id_array(entry, "wonAgainst", &path)?;
        let lost_to = id_array(entry, "lostTo", &path)?;
        let title = match entry.get("title") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(ImportError::wrong_type(format!("{path}.title"), "a string")),
        };

        anime.insert(
            key.clone(),
            DocumentEntry {
                elo: elo.round() as i64,
                won_against,
                lost_to,
                title,
            },
        );
    }

    let document = ImportDocument {
        username,
        anime,
        total_initial_pairs: count(root, "totalInitialPairs")?,
        manually_eliminated_count: count(root, "manuallyEliminatedCount")?,
        auto_eliminated_count_a: count(root, "autoEliminatedCountA")?,
        auto_eliminated_count_b: count(root, "autoEliminatedCountB")?,
        completed_timestamp: required(root, "completedTimestamp", "")?
            .as_f64()
            .filter(|n| n.is_finite())
            .ok_or_else(|| ImportError::wrong_type("completedTimestamp", "a number"))?
            .round() as i64,
    };

    document.to_store()?;
    Ok(document)
}

fn parse_key(key: &str) -> Result<ItemId, ImportError> {
    key.parse().map_err(|_| ImportError::BadKey(key.to_string()))
}

fn field_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

fn required<'a>(object: &'a Map<String, Value>, name: &str, parent: &str) -> Result<&'a Value, ImportError> {
    object
        .get(name)
        .ok_or_else(|| ImportError::MissingField(field_path(parent, name)))
}

fn count(object: &Map<String, Value>, name: &str) -> Result<u64, ImportError> {
    required(object, name, "")?
        .as_u64()
        .ok_or_else(|| ImportError::wrong_type(name, "a non-negative integer"))
}

fn id_array(object: &Map<String, Value>, name: &str, parent: &str) -> Result<Vec<ItemId>, ImportError> {
    let path = field_path(parent, name);
    required(object, name, parent)?
        .as_array()
        .ok_or_else(|| ImportError::wrong_type(path.clone(), "an array"))?
        .iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| ImportError::wrong_type(path.clone(), "an array of item ids"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "username": "someone",
            "anime": {
                "1": { "elo": 1632, "wonAgainst": [2, 3], "lostTo": [], "title": "First" },
                "2": { "elo": 1600, "wonAgainst": [3], "lostTo": [1] },
                "3": { "elo": 1568, "wonAgainst": [], "lostTo": [1, 2] }
            },
            "totalInitialPairs": 3,
            "manuallyEliminatedCount": 2,
            "autoEliminatedCountA": 0,
            "autoEliminatedCountB": 1,
            "completedTimestamp": 1700000000000u64
        })
    }

    #[test]
    fn valid_document_is_accepted() {
        let doc = validate_import(&sample()).unwrap();
        assert_eq!(doc.username, "someone");
        assert_eq!(doc.total_initial_pairs, 3);
        let store = doc.to_store().unwrap();
        assert_eq!(store.get(1).unwrap().rating(), 1632);
        assert!(store.is_resolved(1, 3));

        let items = doc.display_items();
        assert_eq!(items[0].title, "First");
        assert_eq!(items[1].title, "");
    }

    #[test]
    fn fractional_elo_is_rounded() {
        let mut value = sample();
        value["anime"]["1"]["elo"] = json!(1631.6);
        let doc = validate_import(&value).unwrap();
        assert_eq!(doc.anime["1"].elo, 1632);
    }

    #[test]
    fn missing_fields_are_reported_by_path() {
        for field in ["username", "anime", "totalInitialPairs", "completedTimestamp"] {
            let mut value = sample();
            value.as_object_mut().unwrap().remove(field);
            assert_eq!(
                validate_import(&value).unwrap_err(),
                ImportError::MissingField(field.to_string())
            );
        }

        let mut value = sample();
        value["anime"]["2"].as_object_mut().unwrap().remove("lostTo");
        assert_eq!(
            validate_import(&value).unwrap_err(),
            ImportError::MissingField("anime.2.lostTo".into())
        );
    }

    #[test]
    fn wrong_types_are_rejected() {
        let cases = [
            ("/username", json!(5)),
            ("/anime", json!([])),
            ("/totalInitialPairs", json!("3")),
            ("/manuallyEliminatedCount", json!(-1)),
            ("/completedTimestamp", json!(false)),
            ("/anime/1/elo", json!("1600")),
            ("/anime/1/wonAgainst", json!("2,3")),
            ("/anime/1/wonAgainst", json!(["2"])),
            ("/anime/1/title", json!(7)),
        ];
        for (pointer, bad) in cases {
            let mut value = sample();
            *value.pointer_mut(pointer).unwrap() = bad;
            assert!(
                matches!(validate_import(&value), Err(ImportError::WrongType { .. })),
                "{pointer}"
            );
        }
    }

    #[test]
    fn non_numeric_key_is_rejected() {
        let mut value = sample();
        let anime = value["anime"].as_object_mut().unwrap();
        let entry = anime.remove("3").unwrap();
        anime.insert("x3".into(), entry);
        assert_eq!(
            validate_import(&value).unwrap_err(),
            ImportError::BadKey("x3".into())
        );
    }

    #[test]
    fn keys_naming_the_same_item_are_rejected() {
        let value = json!({
            "username": "u",
            "anime": {
                "01": { "elo": 1700, "wonAgainst": [], "lostTo": [] },
                "1": { "elo": 1616, "wonAgainst": [2], "lostTo": [] },
                "2": { "elo": 1584, "wonAgainst": [], "lostTo": [1] }
            },
            "totalInitialPairs": 1,
            "manuallyEliminatedCount": 1,
            "autoEliminatedCountA": 0,
            "autoEliminatedCountB": 0,
            "completedTimestamp": 1
        });
        assert_eq!(validate_import(&value).unwrap_err(), ImportError::DuplicateId(1));

        let doc = validate_import(&sample()).unwrap();
        let mut twice = doc.clone();
        let entry = twice.anime["1"].clone();
        twice.anime.insert("001".into(), entry);
        assert_eq!(twice.to_store().unwrap_err(), ImportError::DuplicateId(1));
    }

    #[test]
    fn inconsistent_results_are_rejected() {
        let mut value = sample();
        value["anime"]["3"]["lostTo"] = json!([1]);
        assert!(matches!(
            validate_import(&value),
            Err(ImportError::Inconsistent(RankError::InvalidInput(_)))
        ));

        let mut value = sample();
        value["anime"]["3"]["lostTo"] = json!([1, 2, 42]);
        assert_eq!(
            validate_import(&value).unwrap_err(),
            ImportError::Inconsistent(RankError::NotFound(42))
        );
    }

    #[test]
    fn fewer_than_two_items_is_rejected() {
        let value = json!({
            "username": "u",
            "anime": { "1": { "elo": 1600, "wonAgainst": [], "lostTo": [] } },
            "totalInitialPairs": 0,
            "manuallyEliminatedCount": 0,
            "autoEliminatedCountA": 0,
            "autoEliminatedCountB": 0,
            "completedTimestamp": 1
        });
        assert_eq!(validate_import(&value).unwrap_err(), ImportError::TooFewItems);
    }

    #[test]
    fn garbage_text_is_a_json_error() {
        assert!(matches!(parse_import("{not json"), Err(ImportError::Json(_))));
        assert_eq!(parse_import("[1, 2]").unwrap_err(), ImportError::NotAnObject);
    }

    #[test]
    fn export_writes_store_counters_and_titles() {
        let store = validate_import(&sample()).unwrap().to_store().unwrap();
        let counters = Counters {
            total_initial_pairs: 3,
            total_remaining_pairs: 0,
            manually_eliminated: 2,
            auto_eliminated_a: 0,
            auto_eliminated_b: 1,
        };
        let mut items = IndexMap::new();
        items.insert(2, SourceItem::new(2, "Second"));
        items.insert(3, SourceItem::new(3, ""));

        let doc = export_document("someone", &store, &counters, 42, &items);
        assert_eq!(doc.anime["2"].title.as_deref(), Some("Second"));
        assert_eq!(doc.anime["1"].title, None);
        assert_eq!(doc.anime["3"].title, None);
        assert_eq!(doc.anime["3"].lost_to, vec![1, 2]);
        assert_eq!(doc.manually_eliminated_count, 2);
        assert_eq!(doc.completed_timestamp, 42);
        assert_eq!(doc.to_store().unwrap(), store);
    }

    #[test]
    fn serialized_document_parses_back() {
        let doc = validate_import(&sample()).unwrap();
        let text = doc.to_json_pretty().unwrap();
        assert!(text.contains("\"wonAgainst\""));
        assert!(text.contains("\"autoEliminatedCountB\": 1"));
        assert!(!text.contains("\"title\": null"));
        assert_eq!(parse_import(&text).unwrap(), doc);
    }
}
