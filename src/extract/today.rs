use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::text_of;

static SIGNED_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+").expect("static regex"));
static PLAIN_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?\d+$").expect("static regex"));
static HAS_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]").expect("static regex"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TodayCount {
    pub to_be_paid: i64,
    pub not_to_be_paid: i64,
}

/// Per-client message counts, in the order clients first appear.
pub type TodayCounts = IndexMap<String, TodayCount>;

#[derive(Debug, Default)]
struct Columns {
    messages: Option<usize>,
    client: Option<usize>,
    status: Option<usize>,
}

enum PaidStatus {
    ToBePaid,
    NotToBePaid,
}

/// Aggregate the daily stats table. Only the first table that looks like the
/// stats table (mentions CLIENT, MESSAGES or NUMBER, and STATUS) is read.
pub fn compute_today_counts(html: &str) -> TodayCounts {
    let document = Html::parse_document(html);
    let mut counts = TodayCounts::new();
    let (Ok(table_sel), Ok(row_sel), Ok(cell_sel), Ok(head_sel)) = (
        Selector::parse("table"),
        Selector::parse("tr"),
        Selector::parse("td, th"),
        Selector::parse("thead"),
    ) else {
        return counts;
    };

    let Some(table) = document.select(&table_sel).find(|t| is_stats_table(*t)) else {
        return counts;
    };

    let header_cells: Vec<String> = table
        .select(&head_sel)
        .next()
        .or_else(|| table.select(&row_sel).next())
        .map(|head| head.select(&cell_sel).map(|c| text_of(c).to_uppercase()).collect())
        .unwrap_or_default();
    let columns = map_columns(&header_cells);

    for row in table.select(&row_sel) {
        let cells: Vec<String> = row.select(&cell_sel).map(text_of).collect();
        if cells.len() < 2 {
            continue;
        }
        let client = match columns.client.and_then(|i| cells.get(i)) {
            Some(c) => c.clone(),
            None => guess_client(&cells),
        };
        if client.is_empty() {
            continue;
        }
        let messages: i64 = columns
            .messages
            .and_then(|i| cells.get(i))
            .and_then(|c| SIGNED_NUMBER.find(c))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        let status_raw = columns
            .status
            .and_then(|i| cells.get(i))
            .or_else(|| cells.last())
            .map(String::as_str)
            .unwrap_or("");
        let Some(status) = paid_status(status_raw) else {
            continue;
        };
        let entry = counts.entry(client).or_default();
        match status {
            PaidStatus::ToBePaid => entry.to_be_paid += messages,
            PaidStatus::NotToBePaid => entry.not_to_be_paid += messages,
        }
    }
    counts
}

fn is_stats_table(table: ElementRef<'_>) -> bool {
    let text = text_of(table).to_uppercase();
    text.contains("CLIENT")
        && (text.contains("MESSAGES") || text.contains("NUMBER"))
        && text.contains("STATUS")
}

fn map_columns(headers: &[String]) -> Columns {
    let mut cols = Columns::default();
    for (i, h) in headers.iter().enumerate() {
        if h.contains("MESSAGE") || h.contains("NUMBER") {
            cols.messages = Some(i);
        }
        if h.contains("CLIENT") {
            cols.client = Some(i);
        }
        if h.contains("STATUS") {
            cols.status = Some(i);
        }
    }
    cols
}

fn guess_client(cells: &[String]) -> String {
    cells
        .iter()
        .find(|t| HAS_LETTER.is_match(t) && !PLAIN_NUMBER.is_match(t))
        .cloned()
        .unwrap_or_default()
}

fn paid_status(raw: &str) -> Option<PaidStatus> {
    let upper = raw.to_uppercase();
    // "NOT TO BE PAID" contains "TO BE PAID"; check the negative first.
    if upper.contains("NOT") && upper.contains("PAID") {
        Some(PaidStatus::NotToBePaid)
    } else if upper.contains("TO BE PAID") {
        Some(PaidStatus::ToBePaid)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::compute_today_counts;

    #[test]
    fn sums_messages_per_client_and_status() {
        let html = r#"
            <table><tr><td>Unrelated</td></tr></table>
            <table>
              <thead><tr><th>Client</th><th>Messages</th><th>Status</th></tr></thead>
              <tr><td>Alpha</td><td>10</td><td>To be paid</td></tr>
              <tr><td>Beta</td><td>4</td><td>Not to be paid</td></tr>
              <tr><td>Alpha</td><td>5</td><td>TO BE PAID</td></tr>
              <tr><td>Alpha</td><td>3</td><td>Not To Be Paid</td></tr>
              <tr><td>Gamma</td><td>9</td><td>pending</td></tr>
            </table>"#;
        let counts = compute_today_counts(html);
        let keys: Vec<&str> = counts.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Alpha", "Beta"]);
        assert_eq!(counts["Alpha"].to_be_paid, 15);
        assert_eq!(counts["Alpha"].not_to_be_paid, 3);
        assert_eq!(counts["Beta"].not_to_be_paid, 4);
    }

    #[test]
    fn missing_table_yields_nothing() {
        assert!(compute_today_counts("<html><body>login</body></html>").is_empty());
    }
}
