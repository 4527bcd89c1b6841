use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::{compact_stamp_serde, iso_date_serde};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub uuid: Uuid,

    #[serde(default)]
    pub id: Option<u64>,

    pub text: String,

    #[serde(default)]
    pub done: bool,

    #[serde(default, with = "iso_date_serde::option")]
    pub start_date: Option<NaiveDate>,

    #[serde(default, with = "iso_date_serde::option")]
    pub end_date: Option<NaiveDate>,

    #[serde(default)]
    pub start_time: Option<String>,

    #[serde(default)]
    pub end_time: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(with = "compact_stamp_serde")]
    pub entry: DateTime<Utc>,

    #[serde(with = "compact_stamp_serde")]
    pub modified: DateTime<Utc>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Item {
    pub fn new(text: String, now: DateTime<Utc>, id: u64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            id: Some(id),
            text,
            done: false,
            start_date: None,
            end_date: None,
            start_time: None,
            end_time: None,
            category: None,
            entry: now,
            modified: now,
            extra: BTreeMap::new(),
        }
    }

    /// Floating items carry no anchor date and belong only to the
    /// unscheduled list; no day query ever matches them.
    pub fn is_undated(&self) -> bool {
        self.start_date.is_none()
    }

    /// `2024-03-01`, `2024-03-01..2024-03-03`, or empty for floating items.
    pub fn date_label(&self) -> String {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) if end != start => format!("{start}..{end}"),
            (Some(start), _) => start.to_string(),
            (None, _) => String::new(),
        }
    }

    /// `09:00`, `09:00-10:30`, or empty. Purely display; an end earlier
    /// than the start is kept as entered.
    pub fn time_label(&self) -> String {
        match (self.start_time.as_deref(), self.end_time.as_deref()) {
            (Some(start), Some(end)) => format!("{start}-{end}"),
            (Some(start), None) => start.to_string(),
            (None, Some(end)) => format!("-{end}"),
            (None, None) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::Item;

    #[test]
    fn new_items_are_open_and_undated() {
        let now = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .expect("valid now");
        let item = Item::new("buy milk".to_string(), now, 7);

        assert_eq!(item.id, Some(7));
        assert!(!item.done);
        assert!(item.is_undated());
        assert_eq!(item.date_label(), "");
        assert_eq!(item.entry, item.modified);
    }

    #[test]
    fn serde_round_trips_dates_as_iso_strings() {
        let now = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .expect("valid now");
        let mut item = Item::new("trip".to_string(), now, 1);
        item.start_date = NaiveDate::from_ymd_opt(2024, 3, 1);
        item.end_date = NaiveDate::from_ymd_opt(2024, 3, 3);
        item.start_time = Some("09:00".to_string());
        item.category = Some("travel".to_string());

        let json = serde_json::to_string(&item).expect("serialize");
        assert!(json.contains("\"start_date\":\"2024-03-01\""));
        assert!(json.contains("\"end_date\":\"2024-03-03\""));
        assert!(json.contains("\"entry\":\"20240301T120000Z\""));

        let back: Item = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.uuid, item.uuid);
        assert_eq!(back.start_date, item.start_date);
        assert_eq!(back.end_date, item.end_date);
        assert_eq!(back.category, item.category);
        assert_eq!(back.date_label(), "2024-03-01..2024-03-03");
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = r#"{"uuid":"a7f7c6cb-7a52-4730-8b52-6c5d2f1f09aa","text":"kept",
            "entry":"20240301T120000Z","modified":"20240301T120000Z","owner":"jisoo"}"#;
        let item: Item = serde_json::from_str(raw).expect("deserialize");
        assert_eq!(
            item.extra.get("owner").and_then(|v| v.as_str()),
            Some("jisoo")
        );

        let json = serde_json::to_string(&item).expect("serialize");
        assert!(json.contains("\"owner\":\"jisoo\""));
    }
}
