//! Scraping the portal's pages.
//!
//! The page layout is not under our control; everything here degrades to an
//! empty result instead of failing.

mod today;

use std::{
    collections::HashSet,
    sync::LazyLock,
};

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

pub use today::compute_today_counts;

use crate::{
    types::{Client, Range},
    upstream::{FIELD_CLIENT, FIELD_RANGE},
};

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("static regex"));

const HEADER_LABELS: &[&str] = &["RANGE", "S/N"];
const DOCUMENT_MARKERS: &[&str] = &["<!doctype html", "<html", "<head"];

/// Options of the client `<select>`, de-duplicated on id, first seen wins.
pub fn extract_clients(html: &str) -> Vec<Client> {
    let document = Html::parse_document(html);
    let Ok(option_sel) = Selector::parse(&format!("select[name=\"{FIELD_CLIENT}\"] option")) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for opt in document.select(&option_sel) {
        let id = opt.value().attr("value").unwrap_or("").trim();
        if id.is_empty() || !seen.insert(id.to_string()) {
            continue;
        }
        out.push(Client {
            name: text_of(opt),
            external_id: id.to_string(),
        });
    }
    out
}

/// One [`Range`] per table row with a non-empty first cell.
pub fn extract_ranges(html: &str) -> Vec<Range> {
    let document = Html::parse_document(html);
    let (Ok(row_sel), Ok(cell_sel), Ok(token_sel)) = (
        Selector::parse("table tr"),
        Selector::parse("td"),
        Selector::parse(&format!("input[name=\"{FIELD_RANGE}\"]")),
    ) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for row in document.select(&row_sel) {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_sel).collect();
        let Some(first) = cells.first() else {
            continue;
        };
        let label = text_of(*first);
        if label.is_empty() || HEADER_LABELS.contains(&label.to_uppercase().as_str()) {
            continue;
        }
        let count_at = |idx: usize| cells.get(idx).map(|c| number_in(&text_of(*c))).unwrap_or(0);
        out.push(Range {
            token: row_token(row, &token_sel),
            all: count_at(1),
            free: count_at(2),
            allocated: count_at(3),
            label,
        });
    }
    out
}

/// Heuristic soft-failure check: a full HTML document where a fragment or
/// redirect was expected usually means the portal served its login page.
pub fn looks_like_error_page(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    DOCUMENT_MARKERS.iter().any(|m| lower.contains(m))
}

fn row_token(row: ElementRef<'_>, token_sel: &Selector) -> String {
    if let Some(token) = row
        .select(token_sel)
        .find_map(non_empty_value)
    {
        return token;
    }
    // Fall back to a form wrapping the row, but only when that form carries a
    // single token; otherwise it cannot be attributed to this row.
    let enclosing_form = row
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "form");
    if let Some(form) = enclosing_form {
        let mut tokens = form.select(token_sel).filter_map(non_empty_value);
        if let (Some(token), None) = (tokens.next(), tokens.next()) {
            return token;
        }
    }
    String::new()
}

fn non_empty_value(input: ElementRef<'_>) -> Option<String> {
    input
        .value()
        .attr("value")
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn number_in(text: &str) -> u64 {
    let cleaned = text.replace(',', "");
    FIRST_NUMBER
        .find(&cleaned)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{extract_clients, extract_ranges, looks_like_error_page};

    const LISTING: &str = r#"
        <html><body>
        <form method="post">
          <select name="selidd">
            <option value="">-- choose --</option>
            <option value="11">Alpha Traders</option>
            <option value="12"> Beta   Ltd </option>
            <option value="11">Alpha duplicate</option>
            <option value="13">Gamma</option>
          </select>
        </form>
        <select name="other"><option value="99">Not a client</option></select>
        </body></html>"#;

    #[test]
    fn clients_are_unique_in_first_seen_order() {
        let clients = extract_clients(LISTING);
        let ids: Vec<&str> = clients.iter().map(|c| c.external_id.as_str()).collect();
        assert_eq!(ids, vec!["11", "12", "13"]);
        assert_eq!(clients[0].name, "Alpha Traders");
        assert_eq!(clients[1].name, "Beta Ltd");
    }

    #[test]
    fn no_select_means_no_clients() {
        assert!(extract_clients("<p>Please log in</p>").is_empty());
    }

    #[test]
    fn ranges_read_label_counts_and_token() {
        let html = r#"
            <table>
              <tr><td>RANGE</td><td>ALL</td><td>FREE</td><td>ALLOCATED</td></tr>
              <tr><td>Egypt 2010</td><td>1,200</td><td>800</td><td>400</td>
                  <td><form><input type="hidden" name="selrng" value=" tok-a "></form></td></tr>
              <tr><td></td><td>5</td><td>5</td><td>0</td>
                  <td><input type="hidden" name="selrng" value="tok-ghost"></td></tr>
              <tr><td>Peru 51</td><td>10</td><td>0</td><td>10</td></tr>
            </table>"#;
        let ranges = extract_ranges(html);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].label, "Egypt 2010");
        assert_eq!(ranges[0].token, "tok-a");
        assert_eq!((ranges[0].all, ranges[0].free, ranges[0].allocated), (1200, 800, 400));
        assert!(ranges[0].allocatable());
        assert_eq!(ranges[1].label, "Peru 51");
        assert!(!ranges[1].allocatable());
    }

    #[test]
    fn rows_with_empty_first_cell_are_skipped() {
        let html = r#"<table>
            <tr><td>  </td><td>1</td></tr>
            <tr><td><span></span></td><td>2</td></tr>
            <tr><td>Kept</td></tr>
        </table>"#;
        let ranges = extract_ranges(html);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].label, "Kept");
    }

    #[test]
    fn enclosing_form_token_used_only_when_unambiguous() {
        let single = r#"<form><table>
            <tr><td>Only row</td></tr>
            <tr><th>x</th></tr>
            </table><input type="hidden" name="selrng" value="shared"></form>"#;
        assert_eq!(extract_ranges(single)[0].token, "shared");

        let ambiguous = r#"<form><table>
            <tr><td>Row A</td></tr>
            <tr><td>Row B</td></tr>
            </table>
            <input type="hidden" name="selrng" value="one">
            <input type="hidden" name="selrng" value="two"></form>"#;
        assert!(extract_ranges(ambiguous).iter().all(|r| r.token.is_empty()));
    }

    #[test]
    fn error_page_heuristic() {
        assert!(looks_like_error_page("<html><head><title>Login</title></head></html>"));
        assert!(looks_like_error_page("<!DOCTYPE html>\n<body>x</body>"));
        assert!(!looks_like_error_page("{\"ok\":true}"));
        assert!(!looks_like_error_page("Numbers Allocated"));
    }
}
