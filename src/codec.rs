//! Mapping between string-typed tab rows and domain records.
//!
//! Columns are located by header name, so a tab whose columns were
//! reordered still decodes. A tab missing one of its columns is rejected
//! rather than padded with blanks.

use crate::model::{
    DATE_FORMAT, Evaluation, Goal, GoalId, MAX_COMPLETION_PCT, ParseFieldError, TIMESTAMP_FORMAT, Utilisation,
    parse_date, parse_timestamp,
};
use crate::store::{Sheet, StoreError, Table};
use std::str::FromStr;

fn resolve_columns(table: Table, sheet: &Sheet) -> Result<Vec<usize>, StoreError> {
    table
        .header()
        .iter()
        .map(|name| {
            sheet.column(name).ok_or_else(|| StoreError::SchemaMismatch {
                table,
                column: name.to_string(),
            })
        })
        .collect()
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

struct RowReader<'a> {
    table: Table,
    number: usize,
    row: &'a [String],
    columns: &'a [usize],
}

impl RowReader<'_> {
    // Spreadsheets drop trailing empty cells, so a short row reads as blanks.
    fn raw(&self, column: usize) -> &str {
        self.row
            .get(self.columns[column])
            .map(String::as_str)
            .unwrap_or("")
    }

    fn text(&self, column: usize) -> String {
        self.raw(column).trim().to_string()
    }

    fn malformed(&self, err: ParseFieldError) -> StoreError {
        StoreError::MalformedRow {
            table: self.table,
            row: self.number,
            detail: err.to_string(),
        }
    }

    fn parse<T>(&self, column: usize) -> Result<T, StoreError>
    where
        T: FromStr<Err = ParseFieldError>,
    {
        self.raw(column).parse().map_err(|e| self.malformed(e))
    }

    fn flag(&self, column: usize) -> Result<bool, StoreError> {
        match self.raw(column).trim().to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" | "1" => Ok(true),
            "no" | "n" | "false" | "0" | "" => Ok(false),
            other => Err(self.malformed(ParseFieldError {
                field: "recommended",
                value: other.to_string(),
            })),
        }
    }

    fn percent(&self, column: usize) -> Result<Option<u8>, StoreError> {
        let raw = self.raw(column).trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.trim_end_matches(".0")
            .trim_end_matches('%')
            .parse::<u8>()
            .ok()
            .filter(|pct| *pct <= MAX_COMPLETION_PCT)
            .map(Some)
            .ok_or_else(|| {
                self.malformed(ParseFieldError {
                    field: "completion",
                    value: raw.to_string(),
                })
            })
    }
}

fn decode_rows<T>(
    table: Table,
    sheet: &Sheet,
    decode: impl Fn(&RowReader<'_>) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    let columns = resolve_columns(table, sheet)?;
    sheet
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| !is_blank(row))
        .map(|(index, row)| {
            decode(&RowReader {
                table,
                number: index + 1,
                row,
                columns: &columns,
            })
        })
        .collect()
}

pub fn decode_goals(sheet: &Sheet) -> Result<Vec<Goal>, StoreError> {
    decode_rows(Table::MasterList, sheet, |r| {
        Ok(Goal {
            id: r.parse(0)?,
            resource: r.text(1),
            project: r.text(2),
            goal: r.text(3),
            year: r.parse(4)?,
            month: r.parse(5)?,
        })
    })
}

pub fn decode_evaluations(sheet: &Sheet) -> Result<Vec<Evaluation>, StoreError> {
    decode_rows(Table::PerformanceLog, sheet, |r| {
        let revised = r.raw(9).trim();
        Ok(Evaluation {
            goal_id: r.parse(0)?,
            resource: r.text(1),
            goal: r.text(2),
            status: r.parse(3)?,
            rating: r.parse(4)?,
            comments: r.text(5),
            recommended: r.flag(6)?,
            justification: r.text(7),
            completion_pct: r.percent(8)?,
            revised_date: if revised.is_empty() {
                None
            } else {
                Some(parse_date(revised).map_err(|e| r.malformed(e))?)
            },
            timestamp: parse_timestamp(r.raw(10)).map_err(|e| r.malformed(e))?,
        })
    })
}

pub fn decode_utilisation(sheet: &Sheet) -> Result<Vec<Utilisation>, StoreError> {
    decode_rows(Table::UtilisationLog, sheet, |r| {
        Ok(Utilisation {
            resource: r.text(0),
            project: r.text(1),
            year: r.parse(2)?,
            month: r.parse(3)?,
            kind: r.parse(4)?,
            timestamp: parse_timestamp(r.raw(5)).map_err(|e| r.malformed(e))?,
        })
    })
}

pub fn encode_goal(goal: &Goal) -> Vec<String> {
    vec![
        goal.id.to_string(),
        goal.resource.clone(),
        goal.project.clone(),
        goal.goal.clone(),
        goal.year.to_string(),
        goal.month.to_string(),
    ]
}

pub fn encode_evaluation(eval: &Evaluation) -> Vec<String> {
    vec![
        eval.goal_id.to_string(),
        eval.resource.clone(),
        eval.goal.clone(),
        eval.status.to_string(),
        eval.rating.to_string(),
        eval.comments.clone(),
        if eval.recommended { "Yes" } else { "No" }.to_string(),
        eval.justification.clone(),
        eval.completion_pct.map(|p| p.to_string()).unwrap_or_default(),
        eval.revised_date
            .map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_default(),
        eval.timestamp.format(TIMESTAMP_FORMAT).to_string(),
    ]
}

pub fn encode_utilisation(entry: &Utilisation) -> Vec<String> {
    vec![
        entry.resource.clone(),
        entry.project.clone(),
        entry.year.to_string(),
        entry.month.to_string(),
        entry.kind.to_string(),
        entry.timestamp.format(TIMESTAMP_FORMAT).to_string(),
    ]
}

/// Lays out an encoded row in the column order of `sheet.header`.
///
/// `encoded` is in the order of [`Table::header`]. Cells of columns the
/// table does not know are taken from `existing`, or left blank for a new
/// row.
pub fn place_row(
    table: Table,
    sheet: &Sheet,
    encoded: Vec<String>,
    existing: Option<&[String]>,
) -> Result<Vec<String>, StoreError> {
    let columns = resolve_columns(table, sheet)?;
    let mut row = existing.map(<[String]>::to_vec).unwrap_or_default();
    row.resize(sheet.header.len(), String::new());
    for (cell, column) in encoded.into_iter().zip(columns) {
        row[column] = cell;
    }
    Ok(row)
}

/// Index into `sheet.rows` of the goal with the given id, if present.
pub fn find_goal_row(sheet: &Sheet, id: GoalId) -> Result<Option<usize>, StoreError> {
    let columns = resolve_columns(Table::MasterList, sheet)?;
    let id_column = columns[0];
    Ok(sheet.rows.iter().position(|row| {
        row.get(id_column)
            .and_then(|cell| cell.parse::<GoalId>().ok())
            == Some(id)
    }))
}
