//! Bulk allocation from an uploaded `client_id,range_token,quantity` file.

use crate::{
    engine::{AllocationContext, AllocationEngine, AllocationRequest},
    types::{AllocationResult, Outcome},
    upstream::Session,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkLine {
    Row {
        line: usize,
        request: AllocationRequest,
    },
    Malformed {
        line: usize,
        reason: String,
    },
}

/// Parse the file body. Blank lines and `#` comments are skipped; every other
/// line becomes a row or a malformed entry. Line numbers are 1-based.
pub fn parse_bulk(text: &str) -> Vec<BulkLine> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    text.lines()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return None;
            }
            Some(parse_line(idx + 1, trimmed))
        })
        .collect()
}

fn parse_line(line: usize, text: &str) -> BulkLine {
    let cols: Vec<&str> = text.split(',').map(str::trim).collect();
    if cols.len() < 3 {
        return BulkLine::Malformed {
            line,
            reason: format!("expected 3 columns, found {}", cols.len()),
        };
    }
    let (client_id, range_token, quantity) = (cols[0], cols[1], cols[2]);
    if client_id.is_empty() || range_token.is_empty() {
        return BulkLine::Malformed {
            line,
            reason: "client id and range token are required".to_string(),
        };
    }
    match quantity.parse::<u32>() {
        Ok(q) if q > 0 => BulkLine::Row {
            line,
            request: AllocationRequest {
                client_id: client_id.to_string(),
                range_token: range_token.to_string(),
                quantity: q,
            },
        },
        _ => BulkLine::Malformed {
            line,
            reason: format!("bad quantity `{quantity}`"),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkEntry {
    Submitted {
        line: usize,
        quantity: u32,
        result: AllocationResult,
    },
    Malformed {
        line: usize,
        reason: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct BulkReport {
    pub entries: Vec<BulkEntry>,
}

impl BulkReport {
    pub fn submitted(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, BulkEntry::Submitted { .. }))
            .count()
    }

    pub fn succeeded(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, BulkEntry::Submitted { result, .. } if result.outcome.is_success()))
            .count()
    }

    pub fn malformed(&self) -> usize {
        self.entries.len() - self.submitted()
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "CSV results: {} of {} submitted rows succeeded, {} malformed\n",
            self.succeeded(),
            self.submitted(),
            self.malformed()
        );
        for entry in &self.entries {
            let line = match entry {
                BulkEntry::Submitted {
                    line,
                    quantity,
                    result,
                } => format!(
                    "Row{line}: {} {} {quantity} -> {}",
                    result.client_id,
                    result.range_token,
                    result.outcome.describe()
                ),
                BulkEntry::Malformed { line, reason } => format!("Row{line}: skipped, {reason}"),
            };
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

/// Run a parsed file through the engine. Malformed rows are reported in place
/// and never sent upstream.
pub async fn run_bulk(
    engine: &AllocationEngine,
    session: &Session,
    lines: Vec<BulkLine>,
    ctx: AllocationContext,
) -> BulkReport {
    let requests: Vec<AllocationRequest> = lines
        .iter()
        .filter_map(|l| match l {
            BulkLine::Row { request, .. } => Some(request.clone()),
            BulkLine::Malformed { .. } => None,
        })
        .collect();
    let mut results = engine.run(session, &requests, ctx).await.into_iter();

    let entries = lines
        .into_iter()
        .map(|l| match l {
            BulkLine::Row { line, request } => BulkEntry::Submitted {
                line,
                quantity: request.quantity,
                result: results.next().unwrap_or_else(|| AllocationResult {
                    client_id: request.client_id,
                    range_token: request.range_token,
                    outcome: Outcome::Error,
                }),
            },
            BulkLine::Malformed { line, reason } => BulkEntry::Malformed { line, reason },
        })
        .collect();
    BulkReport { entries }
}
