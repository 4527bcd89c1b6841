use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{Datelike, NaiveDate, Weekday};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::grid::MonthGrid;
use crate::item::Item;

const CELL_WIDTH: usize = 6;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    category_colors: BTreeMap<String, String>,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color,
            category_colors: cfg.category_colors(),
        })
    }

    #[tracing::instrument(skip(self, items))]
    pub fn print_item_table(&mut self, items: &[&Item]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "ID".to_string(),
            " ".to_string(),
            "Date".to_string(),
            "Time".to_string(),
            "Category".to_string(),
            "Text".to_string(),
        ];

        let mut rows = Vec::with_capacity(items.len());

        for item in items {
            let id = item
                .id
                .map(|value| value.to_string())
                .unwrap_or_else(|| "-".to_string());
            let id = self.paint(&id, "33");

            let mark = if item.done {
                self.paint("x", "32")
            } else {
                " ".to_string()
            };

            let category = item.category.clone().unwrap_or_default();
            let category = self.paint_category(&category);

            let text = if item.done {
                self.paint(&item.text, "2")
            } else {
                item.text.clone()
            };

            rows.push(vec![
                id,
                mark,
                item.date_label(),
                item.time_label(),
                category,
                text,
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    /// The per-day panel: one date, its visible items, and a pointer at the
    /// unscheduled list when it is non-empty.
    #[tracing::instrument(skip(self, items))]
    pub fn print_day(
        &mut self,
        date: NaiveDate,
        items: &[&Item],
        undated_count: usize,
    ) -> anyhow::Result<()> {
        {
            let mut out = io::stdout().lock();
            writeln!(out, "{}", date.format("%Y-%m-%d (%A)"))?;
            writeln!(out)?;

            if items.is_empty() {
                writeln!(out, "No items on this day.")?;
            }
        }

        if !items.is_empty() {
            self.print_item_table(items)?;
        }

        if undated_count > 0 {
            let mut out = io::stdout().lock();
            writeln!(out)?;
            writeln!(out, "{undated_count} undated item(s); see 'db undated'.")?;
        }

        Ok(())
    }

    /// Seven columns of day cells, whole weeks only. Days outside the
    /// reference month are dimmed, today is highlighted, the selected day
    /// is inverted, and a per-day item count rides along each number.
    #[tracing::instrument(skip(self, grid, counts))]
    pub fn print_month(
        &mut self,
        grid: &MonthGrid,
        today: NaiveDate,
        selected: Option<NaiveDate>,
        counts: &BTreeMap<NaiveDate, usize>,
        week_start: Weekday,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let title = crate::grid::first_day_of_month(grid.year(), grid.month())
            .format("%B %Y")
            .to_string();
        writeln!(out, "{title}")?;

        for label in weekday_labels(week_start) {
            write!(out, "{label:>width$}", width = CELL_WIDTH)?;
        }
        writeln!(out)?;

        let mut column = 0;
        for cell in grid.cells(today, selected) {
            let count = counts.get(&cell.date).copied().unwrap_or(0);
            let marker = if count > 0 {
                format!("+{count}")
            } else {
                String::new()
            };
            let text = format!("{:>2}{marker:<3}", cell.date.day());

            let painted = if cell.is_selected {
                self.paint(&text, "7")
            } else if cell.is_today {
                self.paint(&text, "1;36")
            } else if !cell.in_current_month {
                self.paint(&text, "2")
            } else {
                text.clone()
            };

            let padding = CELL_WIDTH.saturating_sub(UnicodeWidthStr::width(text.as_str()));
            write!(out, "{}{painted}", " ".repeat(padding))?;

            column += 1;
            if column == 7 {
                writeln!(out)?;
                column = 0;
            }
        }

        Ok(())
    }

    fn paint_category(&self, category: &str) -> String {
        if category.is_empty() {
            return String::new();
        }
        match self.category_colors.get(&category.to_ascii_lowercase()) {
            Some(code) => self.paint(category, code),
            None => category.to_string(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn weekday_labels(week_start: Weekday) -> Vec<&'static str> {
    const LABELS: [&str; 7] = ["Su", "Mo", "Tu", "We", "Th", "Fr", "Sa"];
    let offset = week_start.num_days_from_sunday() as usize;
    (0..7).map(|i| LABELS[(offset + i) % 7]).collect()
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;

    use super::{strip_ansi, weekday_labels};

    #[test]
    fn weekday_labels_rotate_with_week_start() {
        assert_eq!(
            weekday_labels(Weekday::Sun),
            vec!["Su", "Mo", "Tu", "We", "Th", "Fr", "Sa"]
        );
        assert_eq!(
            weekday_labels(Weekday::Mon),
            vec!["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"]
        );
    }

    #[test]
    fn ansi_stripping_leaves_plain_text() {
        assert_eq!(strip_ansi("\x1b[33m12\x1b[0m"), "12");
        assert_eq!(strip_ansi("plain"), "plain");
    }
}
