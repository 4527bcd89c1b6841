use std::collections::BTreeMap;
use std::io::{self, Read};

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::{parse_clock_token, parse_date_token, to_project_date};
use crate::filter::Filter;
use crate::grid::{MonthGrid, items_on_day, shift_months, undated_items};
use crate::item::Item;
use crate::render::Renderer;
use crate::store::ItemStore;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add", "list", "day", "month", "undated", "done", "undone", "modify", "delete", "export",
        "import", "_show", "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: &mut ItemStore,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let today = to_project_date(now);
    let command = inv.command.as_str();

    debug!(
        command,
        filter = ?inv.filter_terms,
        args = ?inv.command_args,
        %today,
        "dispatching command"
    );

    // Filters may precede the command or, for filter-only commands,
    // trail it: `db +done list` and `db list +done` mean the same thing.
    let trailing_filters = || {
        let mut combined = inv.filter_terms.clone();
        combined.extend(inv.command_args.iter().cloned());
        combined
    };

    match command {
        "add" => cmd_add(store, &inv.command_args, now, today),
        "list" => cmd_list(store, renderer, &trailing_filters(), today),
        "day" => cmd_day(store, renderer, &inv.filter_terms, &inv.command_args, today),
        "month" => cmd_month(store, cfg, renderer, &inv.command_args, today),
        "undated" => cmd_undated(store, renderer, &trailing_filters(), today),
        "done" => cmd_set_done(store, &trailing_filters(), now, today, true),
        "undone" => cmd_set_done(store, &trailing_filters(), now, today, false),
        "modify" => cmd_modify(store, &inv.filter_terms, &inv.command_args, now, today),
        "delete" => cmd_delete(store, &trailing_filters(), today),
        "export" => cmd_export(store, &trailing_filters(), today),
        "import" => cmd_import(store),
        "_show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

/// Field changes shared by `add` and `modify`. The outer Option is "was the
/// key given at all"; the inner one distinguishes a value from `none`.
#[derive(Debug, Default)]
struct Mods {
    start_date: Option<Option<NaiveDate>>,
    end_date: Option<Option<NaiveDate>>,
    start_time: Option<Option<String>>,
    end_time: Option<Option<String>>,
    category: Option<Option<String>>,
}

fn parse_text_and_mods(args: &[String], today: NaiveDate) -> anyhow::Result<(String, Mods)> {
    let mut words: Vec<&str> = Vec::new();
    let mut mods = Mods::default();

    for arg in args {
        if let Some(value) = arg.strip_prefix("on:") {
            mods.start_date = Some(parse_optional_date(value, today)?);
        } else if let Some(value) = arg.strip_prefix("until:") {
            mods.end_date = Some(parse_optional_date(value, today)?);
        } else if let Some(value) = arg.strip_prefix("from:") {
            mods.start_time = Some(parse_optional_clock(value)?);
        } else if let Some(value) = arg.strip_prefix("to:") {
            mods.end_time = Some(parse_optional_clock(value)?);
        } else if let Some(value) = arg.strip_prefix("category:") {
            mods.category = Some(if is_clear_token(value) {
                None
            } else {
                Some(value.to_string())
            });
        } else {
            words.push(arg.as_str());
        }
    }

    Ok((words.join(" ").trim().to_string(), mods))
}

fn parse_optional_date(value: &str, today: NaiveDate) -> anyhow::Result<Option<NaiveDate>> {
    if is_clear_token(value) {
        Ok(None)
    } else {
        parse_date_token(value, today).map(Some)
    }
}

fn parse_optional_clock(value: &str) -> anyhow::Result<Option<String>> {
    if is_clear_token(value) {
        Ok(None)
    } else {
        parse_clock_token(value).map(Some)
    }
}

fn is_clear_token(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("none")
}

fn apply_mods(item: &mut Item, mods: &Mods, now: DateTime<Utc>) {
    if let Some(start_date) = mods.start_date {
        item.start_date = start_date;
    }
    if let Some(end_date) = mods.end_date {
        item.end_date = end_date;
    }
    if let Some(start_time) = &mods.start_time {
        item.start_time = start_time.clone();
    }
    if let Some(end_time) = &mods.end_time {
        item.end_time = end_time.clone();
    }
    if let Some(category) = &mods.category {
        item.category = category.clone();
    }
    item.modified = now;
}

#[instrument(skip(store, args, now, today))]
fn cmd_add(
    store: &mut ItemStore,
    args: &[String],
    now: DateTime<Utc>,
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command add");

    let (text, mods) = parse_text_and_mods(args, today)?;
    if text.is_empty() {
        return Err(anyhow!("cannot add an item with empty text"));
    }

    let items = store.load_all()?;
    let next_id = store.next_id(&items);

    let mut item = Item::new(text, now, next_id);
    apply_mods(&mut item, &mods, now);

    if let (Some(start), Some(end)) = (item.start_date, item.end_date)
        && end < start
    {
        // Kept as entered; such a span simply never shows up on any day.
        warn!(%start, %end, "end date precedes start date");
    }

    let item = store.insert(items, item)?;
    println!("Created item {}.", item.id.unwrap_or(next_id));
    Ok(())
}

#[instrument(skip(store, renderer, filter_terms, today))]
fn cmd_list(
    store: &mut ItemStore,
    renderer: &mut Renderer,
    filter_terms: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command list");

    let filter = Filter::parse(filter_terms, today)?;
    let items = store.load_all()?;
    let matched: Vec<&Item> = items.iter().filter(|item| filter.matches(item)).collect();

    if matched.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    renderer.print_item_table(&matched)?;
    println!("{} item(s)", matched.len());
    Ok(())
}

#[instrument(skip(store, renderer, filter_terms, args, today))]
fn cmd_day(
    store: &mut ItemStore,
    renderer: &mut Renderer,
    filter_terms: &[String],
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command day");

    let date = match args.first() {
        Some(token) => parse_date_token(token, today)?,
        None => today,
    };

    let filter = Filter::parse(filter_terms, today)?;
    let items = store.load_all()?;

    let visible: Vec<&Item> = items_on_day(&items, date)
        .into_iter()
        .filter(|item| filter.matches(item))
        .collect();
    let undated_count = undated_items(&items)
        .into_iter()
        .filter(|item| filter.matches(item))
        .count();

    renderer.print_day(date, &visible, undated_count)?;
    Ok(())
}

#[instrument(skip(store, cfg, renderer, args, today))]
fn cmd_month(
    store: &mut ItemStore,
    cfg: &Config,
    renderer: &mut Renderer,
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command month");

    let mut reference = today;
    let mut selected = None;

    for arg in args {
        if let Some(delta) = parse_month_delta(arg) {
            reference = shift_months(reference, delta);
        } else {
            reference = parse_date_token(arg, today)?;
            selected = Some(reference);
        }
    }

    let week_start = cfg.week_start();
    let grid = MonthGrid::new(reference, week_start);
    let items = store.load_all()?;

    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for date in grid.days() {
        let count = items_on_day(&items, date).len();
        if count > 0 {
            counts.insert(date, count);
        }
    }

    renderer.print_month(&grid, today, selected, &counts, week_start)?;

    let in_month: usize = counts
        .iter()
        .filter(|(date, _)| grid.in_current_month(**date))
        .map(|(_, count)| count)
        .sum();
    println!("{in_month} scheduled item-day(s) this month");
    Ok(())
}

fn parse_month_delta(token: &str) -> Option<i32> {
    let rest = token.strip_prefix('+').or_else(|| token.strip_prefix('-'))?;
    if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    token.parse::<i32>().ok()
}

#[instrument(skip(store, renderer, filter_terms, today))]
fn cmd_undated(
    store: &mut ItemStore,
    renderer: &mut Renderer,
    filter_terms: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command undated");

    let filter = Filter::parse(filter_terms, today)?;
    let items = store.load_all()?;
    let floating: Vec<&Item> = undated_items(&items)
        .into_iter()
        .filter(|item| filter.matches(item))
        .collect();

    if floating.is_empty() {
        println!("No undated items.");
        return Ok(());
    }

    renderer.print_item_table(&floating)?;
    println!("{} undated item(s)", floating.len());
    Ok(())
}

#[instrument(skip(store, filter_terms, now, today))]
fn cmd_set_done(
    store: &mut ItemStore,
    filter_terms: &[String],
    now: DateTime<Utc>,
    today: NaiveDate,
    done: bool,
) -> anyhow::Result<()> {
    let verb = if done { "done" } else { "undone" };
    info!("command {verb}");

    if filter_terms.is_empty() {
        return Err(anyhow!("{verb} requires a filter"));
    }

    let filter = Filter::parse(filter_terms, today)?;
    let mut items = store.load_all()?;

    let mut changed = 0_u64;
    for item in &mut items {
        if filter.matches(item) && item.done != done {
            item.done = done;
            item.modified = now;
            changed += 1;
        }
    }

    if changed > 0 {
        store.save_all(&items)?;
    }

    println!("Marked {changed} item(s) {verb}.");
    Ok(())
}

#[instrument(skip(store, filter_terms, args, now, today))]
fn cmd_modify(
    store: &mut ItemStore,
    filter_terms: &[String],
    args: &[String],
    now: DateTime<Utc>,
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command modify");

    if filter_terms.is_empty() {
        return Err(anyhow!("modify requires a filter"));
    }

    let (text, mods) = parse_text_and_mods(args, today)?;
    let filter = Filter::parse(filter_terms, today)?;
    let mut items = store.load_all()?;

    let mut changed = 0_u64;
    for item in &mut items {
        if !filter.matches(item) {
            continue;
        }
        if !text.is_empty() {
            item.text = text.clone();
        }
        apply_mods(item, &mods, now);
        changed += 1;
    }

    if changed > 0 {
        store.save_all(&items)?;
    }

    println!("Modified {changed} item(s).");
    Ok(())
}

#[instrument(skip(store, filter_terms, today))]
fn cmd_delete(
    store: &mut ItemStore,
    filter_terms: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command delete");

    if filter_terms.is_empty() {
        return Err(anyhow!("delete requires a filter"));
    }

    let filter = Filter::parse(filter_terms, today)?;
    let items = store.load_all()?;
    let before = items.len();

    let kept: Vec<Item> = items
        .into_iter()
        .filter(|item| !filter.matches(item))
        .collect();
    let removed = before - kept.len();

    if removed > 0 {
        store.save_all(&kept)?;
    }

    println!("Deleted {removed} item(s).");
    Ok(())
}

#[instrument(skip(store, filter_terms, today))]
fn cmd_export(
    store: &mut ItemStore,
    filter_terms: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command export");

    let filter = Filter::parse(filter_terms, today)?;
    let items = store.load_all()?;

    for item in items.iter().filter(|item| filter.matches(item)) {
        println!("{}", serde_json::to_string(item)?);
    }
    Ok(())
}

#[instrument(skip(store))]
fn cmd_import(store: &mut ItemStore) -> anyhow::Result<()> {
    info!("command import");

    let mut raw = String::new();
    io::stdin().read_to_string(&mut raw)?;

    let mut items = store.load_all()?;
    let mut imported = 0_u64;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let mut item: Item = serde_json::from_str(trimmed)?;
        if item.id.is_none() || items.iter().any(|existing| existing.id == item.id) {
            item.id = Some(store.next_id(&items));
        }
        items.push(item);
        imported += 1;
    }

    items.sort_by_key(|item| item.id.unwrap_or(u64::MAX));
    store.save_all(&items)?;

    println!("Imported {imported} item(s).");
    Ok(())
}

#[instrument(skip(cfg))]
fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<(String, String)> = cfg
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    entries.sort();

    for (key, value) in entries {
        println!("{key}={value}");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "usage: db [filter...] <command> [args...]\n\
         \n\
         commands:\n\
         \x20 add <text...> [on:DATE] [until:DATE] [from:HH:MM] [to:HH:MM] [category:NAME]\n\
         \x20 list [filter...]          table of matching items\n\
         \x20 day [DATE]                items visible on one day (default today)\n\
         \x20 month [DATE] [+N|-N]      month grid with per-day counts\n\
         \x20 undated                   items with no date\n\
         \x20 done / undone <filter>    toggle completion\n\
         \x20 modify <filter> [mods]    change text, dates, times, category\n\
         \x20 delete <filter>           remove items\n\
         \x20 export / import           JSON lines on stdout / stdin\n\
         \n\
         filters: ID, UUID, +done, -done, +undated, category:NAME, on:DATE, text\n\
         dates: today, tomorrow, yesterday, monday..sunday, +Nd/+Nw/+Nm, YYYY-MM-DD"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{apply_mods, expand_command_abbrev, known_command_names, parse_month_delta,
        parse_text_and_mods};
    use crate::item::Item;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn command_abbreviations_expand_uniquely() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("mon", &known), Some("month"));
        assert_eq!(expand_command_abbrev("exp", &known), Some("export"));
        assert_eq!(expand_command_abbrev("list", &known), Some("list"));
        // "d" could be day, done or delete
        assert_eq!(expand_command_abbrev("d", &known), None);
        assert_eq!(expand_command_abbrev("und", &known), None);
        assert_eq!(expand_command_abbrev("unda", &known), Some("undated"));
    }

    #[test]
    fn mods_split_out_of_free_text() {
        let args: Vec<String> = [
            "team", "on:2024-03-01", "until:2024-03-03", "dinner", "from:18:30", "category:work",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let (text, mods) = parse_text_and_mods(&args, day(2024, 2, 1)).expect("parse");
        assert_eq!(text, "team dinner");
        assert_eq!(mods.start_date, Some(Some(day(2024, 3, 1))));
        assert_eq!(mods.end_date, Some(Some(day(2024, 3, 3))));
        assert_eq!(mods.start_time, Some(Some("18:30".to_string())));
        assert_eq!(mods.end_time, None);
        assert_eq!(mods.category, Some(Some("work".to_string())));
    }

    #[test]
    fn none_clears_a_field() {
        let args: Vec<String> = ["until:none", "category:none"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (text, mods) = parse_text_and_mods(&args, day(2024, 2, 1)).expect("parse");
        assert_eq!(text, "");
        assert_eq!(mods.end_date, Some(None));
        assert_eq!(mods.category, Some(None));

        let now = Utc
            .with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
            .single()
            .expect("valid now");
        let mut item = Item::new("trip".to_string(), now, 1);
        item.end_date = Some(day(2024, 3, 3));
        item.category = Some("travel".to_string());

        apply_mods(&mut item, &mods, now);
        assert_eq!(item.end_date, None);
        assert_eq!(item.category, None);
        // untouched fields stay untouched
        assert_eq!(item.text, "trip");
    }

    #[test]
    fn month_deltas_are_signed_integers_only() {
        assert_eq!(parse_month_delta("+1"), Some(1));
        assert_eq!(parse_month_delta("-3"), Some(-3));
        assert_eq!(parse_month_delta("+0"), Some(0));
        assert_eq!(parse_month_delta("1"), None);
        assert_eq!(parse_month_delta("+1d"), None);
        assert_eq!(parse_month_delta("tomorrow"), None);
    }
}
