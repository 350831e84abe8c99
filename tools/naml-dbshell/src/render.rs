///
/// Result set rendering for the shell.
///
/// Result sets are drained into `ResultSet`s first so the text renderer
/// can size its columns. Text output uses MySQL client style tables; JSON
/// output is one array with an object per result set.
///

use naml_std_db::{DbResult, DbValue, ResultResource};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<DbValue>>,
}

impl ResultSet {
    /// Fetches every remaining row of `result`.
    pub fn drain(result: &ResultResource) -> DbResult<Self> {
        let columns = result.columns().into_iter().map(|c| c.label).collect();
        let mut rows = Vec::new();
        while let Some(values) = result.fetch_values()? {
            rows.push(values);
        }
        Ok(Self { columns, rows })
    }
}

pub fn text(sets: &[ResultSet]) -> String {
    let mut out = String::new();
    for set in sets {
        let cells: Vec<Vec<String>> = set
            .rows
            .iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect();
        let widths: Vec<usize> = set
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                cells
                    .iter()
                    .filter_map(|row| row.get(i))
                    .map(|cell| cell.chars().count())
                    .fold(name.chars().count(), usize::max)
            })
            .collect();

        let border = widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+");
        let border = format!("+{}+\n", border);

        out.push_str(&border);
        out.push_str(&line(&set.columns, &widths));
        out.push_str(&border);
        for row in &cells {
            out.push_str(&line(row, &widths));
        }
        if !cells.is_empty() {
            out.push_str(&border);
        }
        let noun = if cells.len() == 1 { "row" } else { "rows" };
        out.push_str(&format!("{} {} in set\n", cells.len(), noun));
    }
    out
}

fn line(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, w)| format!(" {:<w$} ", cell, w = *w))
        .collect();
    format!("|{}|\n", padded.join("|"))
}

#[derive(Serialize)]
struct JsonResultSet<'a> {
    columns: &'a [String],
    rows: Vec<Vec<serde_json::Value>>,
}

pub fn json(sets: &[ResultSet]) -> serde_json::Result<String> {
    let body: Vec<JsonResultSet<'_>> = sets
        .iter()
        .map(|set| JsonResultSet {
            columns: &set.columns,
            rows: set
                .rows
                .iter()
                .map(|row| row.iter().map(json_value).collect())
                .collect(),
        })
        .collect();
    serde_json::to_string_pretty(&body)
}

fn json_value(value: &DbValue) -> serde_json::Value {
    match value {
        DbValue::Null | DbValue::Lob(_) => serde_json::Value::Null,
        DbValue::Bool(b) => serde_json::Value::Bool(*b),
        DbValue::Int(i) => serde_json::Value::from(*i),
        DbValue::Double(d) => serde_json::Value::from(*d),
        other => serde_json::Value::String(other.to_text()),
    }
}
