use std::collections::HashMap;

use tracing::debug;

use crate::types::Quote;

/// Parse the published spreadsheet export.
///
/// First line is a header. Each data row is `symbol,price,change_percent[,...]`.
/// Cells may be double-quoted, and quoted numbers may carry thousands
/// separators (`"1,520.00"`). Rows with an empty symbol or an unparsable
/// change are skipped, as are rows with more cells than the header (an
/// unquoted comma shifted them); an unparsable price reads as 0.
pub fn parse_sheet_csv(text: &str) -> HashMap<String, Quote> {
    let mut out = HashMap::new();
    let mut skipped = 0usize;

    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(header) = lines.next() else {
        return out;
    };
    let width = split_csv_line(header).len();

    for line in lines {
        let cols = split_csv_line(line);
        if cols.len() < 3 || cols.len() > width.max(3) {
            skipped += 1;
            continue;
        }
        let symbol = clean_cell(&cols[0]);
        let Some(change_percent) = parse_number(&cols[2]) else {
            skipped += 1;
            continue;
        };
        if symbol.is_empty() || !change_percent.is_finite() {
            skipped += 1;
            continue;
        }
        let price = parse_number(&cols[1]).unwrap_or(0.0);
        out.insert(symbol.to_string(), Quote { price, change_percent });
    }

    if skipped > 0 {
        debug!("Sheet feed: {} rows parsed, {} skipped", out.len(), skipped);
    }
    out
}

/// Split one CSV record, honouring double quotes and `""` escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }
    cells.push(cell);
    cells
}

fn clean_cell(cell: &str) -> &str {
    cell.trim().trim_end_matches('%').trim()
}

fn parse_number(cell: &str) -> Option<f64> {
    clean_cell(cell).replace(',', "").parse().ok()
}
