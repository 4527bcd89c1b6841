use chrono::NaiveDate;
use tracing::trace;

use crate::datetime::parse_date_token;
use crate::grid::is_date_in_range;
use crate::item::Item;

#[derive(Debug, Clone)]
pub enum Pred {
    Id(u64),
    Uuid(uuid::Uuid),
    Done(bool),
    CategoryEq(String),
    OnDay(NaiveDate),
    Undated,
    TextContains(String),
}

/// A conjunction of predicates. There is no boolean grammar here; every
/// term must hold for an item to match.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    preds: Vec<Pred>,
}

impl Filter {
    #[tracing::instrument(skip(terms, today))]
    pub fn parse(terms: &[String], today: NaiveDate) -> anyhow::Result<Self> {
        let mut preds = Vec::with_capacity(terms.len());
        for term in terms {
            preds.push(parse_atom(term, today)?);
        }
        Ok(Self { preds })
    }

    pub fn is_empty(&self) -> bool {
        self.preds.is_empty()
    }

    /// True when the filter pins down specific items by id or uuid, in
    /// which case commands act on them even if they are already done.
    pub fn has_identity_selector(&self) -> bool {
        self.preds
            .iter()
            .any(|pred| matches!(pred, Pred::Id(_) | Pred::Uuid(_)))
    }

    pub fn matches(&self, item: &Item) -> bool {
        let ok = self.preds.iter().all(|pred| eval_pred(pred, item));
        trace!(id = ?item.id, uuid = %item.uuid, ok, "filter evaluation");
        ok
    }
}

fn parse_atom(term: &str, today: NaiveDate) -> anyhow::Result<Pred> {
    if term.eq_ignore_ascii_case("+done") {
        return Ok(Pred::Done(true));
    }
    if term.eq_ignore_ascii_case("-done") {
        return Ok(Pred::Done(false));
    }
    // spelled with a sigil so it can never shadow the command of the
    // same name in an invocation
    if term.eq_ignore_ascii_case("+undated") {
        return Ok(Pred::Undated);
    }

    if let Ok(id) = term.parse::<u64>() {
        return Ok(Pred::Id(id));
    }
    if let Ok(uuid) = uuid::Uuid::parse_str(term) {
        return Ok(Pred::Uuid(uuid));
    }

    if let Some(category) = term.strip_prefix("category:") {
        return Ok(Pred::CategoryEq(category.to_string()));
    }

    if let Some(value) = term.strip_prefix("on:") {
        return Ok(Pred::OnDay(parse_date_token(value, today)?));
    }

    Ok(Pred::TextContains(term.to_string()))
}

fn eval_pred(pred: &Pred, item: &Item) -> bool {
    match pred {
        Pred::Id(id) => item.id == Some(*id),
        Pred::Uuid(uuid) => item.uuid == *uuid,
        Pred::Done(done) => item.done == *done,
        Pred::CategoryEq(category) => item
            .category
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case(category))
            .unwrap_or(false),
        Pred::OnDay(date) => item
            .start_date
            .map(|start| is_date_in_range(*date, start, item.end_date))
            .unwrap_or(false),
        Pred::Undated => item.is_undated(),
        Pred::TextContains(text) => item
            .text
            .to_ascii_lowercase()
            .contains(&text.to_ascii_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::Filter;
    use crate::item::Item;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn parse(terms: &[&str]) -> Filter {
        let owned: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
        Filter::parse(&owned, day(2024, 3, 1)).expect("parse filter")
    }

    fn sample_items() -> Vec<Item> {
        let now = Utc::now();
        let mut trip = Item::new("book flights".to_string(), now, 1);
        trip.start_date = Some(day(2024, 3, 1));
        trip.end_date = Some(day(2024, 3, 3));
        trip.category = Some("Travel".to_string());

        let mut chores = Item::new("laundry".to_string(), now, 2);
        chores.start_date = Some(day(2024, 3, 2));
        chores.done = true;

        let floating = Item::new("read more".to_string(), now, 3);

        vec![trip, chores, floating]
    }

    #[test]
    fn terms_and_together() {
        let items = sample_items();
        let filter = parse(&["on:2024-03-02", "-done"]);

        let matched: Vec<u64> = items
            .iter()
            .filter(|item| filter.matches(item))
            .filter_map(|item| item.id)
            .collect();
        assert_eq!(matched, vec![1]);
    }

    #[test]
    fn category_matching_ignores_case() {
        let items = sample_items();
        let filter = parse(&["category:travel"]);
        assert!(filter.matches(&items[0]));
        assert!(!filter.matches(&items[1]));
    }

    #[test]
    fn undated_term_selects_floating_items() {
        let items = sample_items();
        let filter = parse(&["+undated"]);
        let matched: Vec<u64> = items
            .iter()
            .filter(|item| filter.matches(item))
            .filter_map(|item| item.id)
            .collect();
        assert_eq!(matched, vec![3]);
    }

    #[test]
    fn id_term_is_an_identity_selector() {
        let items = sample_items();
        let filter = parse(&["2"]);
        assert!(filter.has_identity_selector());
        assert!(filter.matches(&items[1]));
        assert!(!filter.matches(&items[0]));

        assert!(!parse(&["+done"]).has_identity_selector());
    }

    #[test]
    fn date_terms_resolve_relative_to_today() {
        let items = sample_items();
        let filter = parse(&["on:tomorrow"]);
        // today is fixed at 2024-03-01 in these tests
        assert!(filter.matches(&items[0]));
        assert!(filter.matches(&items[1]));
        assert!(!filter.matches(&items[2]));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let items = sample_items();
        let filter = parse(&[]);
        assert!(filter.is_empty());
        assert!(items.iter().all(|item| filter.matches(item)));
    }
}
