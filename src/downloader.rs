use crate::codec;
use crate::model::{DATE_FORMAT, Evaluation, TIMESTAMP_FORMAT};
use crate::reconcile::ReconciledGoal;
use crate::store::Table;

/// Column names of the reconciled view export
pub const VIEW_HEADER: [&str; 13] = [
    "Goal ID",
    "Resource Name",
    "Project",
    "Goal",
    "Year",
    "Month",
    "Status",
    "Rating",
    "Comments",
    "Recommended",
    "Completion",
    "Revised Date",
    "Evaluated At",
];

/// Flatten the reconciled view into string rows matching [`VIEW_HEADER`]
pub fn view_rows(rows: &[ReconciledGoal]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|r| {
            vec![
                r.goal_id.to_string(),
                r.resource.clone(),
                r.project.clone(),
                r.goal.clone(),
                r.year.to_string(),
                r.month.to_string(),
                r.status.to_string(),
                r.rating.to_string(),
                r.comments.clone(),
                if r.recommended { "Yes" } else { "No" }.to_string(),
                r.completion_pct.map(|p| p.to_string()).unwrap_or_default(),
                r.revised_date
                    .map(|d| d.format(DATE_FORMAT).to_string())
                    .unwrap_or_default(),
                r.evaluated_at
                    .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect()
}

fn push_csv_field(out: &mut String, value: &str) {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        out.push('"');
        out.push_str(&value.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(value);
    }
}

/// Render a header and rows as CSV text.
///
/// Fields containing commas, quotes or line breaks are quoted, with inner
/// quotes doubled.
///
/// # Arguments
/// * `header` - Column names for the first line
/// * `rows` - Data rows, one string per cell
///
/// # Returns
/// * `String` - CSV text with a trailing newline after every record
///
/// # Examples
/// ```
/// use perftrack::downloader::to_csv;
///
/// let rows = vec![vec!["Alice".to_string(), "Ship v1, v2".to_string()]];
/// assert_eq!(to_csv(&["Resource Name", "Goal"], &rows), "Resource Name,Goal\nAlice,\"Ship v1, v2\"\n");
/// ```
pub fn to_csv(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut csv_content = String::new();

    for (i, name) in header.iter().enumerate() {
        if i > 0 {
            csv_content.push(',');
        }
        push_csv_field(&mut csv_content, name);
    }
    csv_content.push('\n');

    for row in rows {
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                csv_content.push(',');
            }
            push_csv_field(&mut csv_content, value);
        }
        csv_content.push('\n');
    }

    csv_content
}

pub fn view_to_csv(rows: &[ReconciledGoal]) -> String {
    to_csv(&VIEW_HEADER, &view_rows(rows))
}

pub fn evaluations_to_csv(evaluations: &[Evaluation]) -> String {
    let rows: Vec<Vec<String>> = evaluations.iter().map(codec::encode_evaluation).collect();
    to_csv(Table::PerformanceLog.header(), &rows)
}

/// Render a header and rows as a single-sheet XLSX workbook.
///
/// Columns listed in `numeric` are written as numbers when the cell parses
/// as one; everything else is written as text.
///
/// # Arguments
/// * `sheet_name` - Name of the worksheet
/// * `header` - Column names, written in bold on the first row
/// * `rows` - Data rows, one string per cell
/// * `numeric` - Indices of columns to write as numbers
///
/// # Returns
/// * `Result<Vec<u8>, XlsxError>` - The workbook file as bytes or an error
///
/// # Examples
/// ```
/// use perftrack::downloader::to_xlsx;
///
/// let rows = vec![vec!["Alice".to_string(), "4".to_string()]];
/// let bytes = to_xlsx("Ratings", &["Resource Name", "Rating"], &rows, &[1]).unwrap();
/// assert_eq!(&bytes[..2], b"PK");
/// ```
#[cfg(feature = "web")]
pub fn to_xlsx(
    sheet_name: &str,
    header: &[&str],
    rows: &[Vec<String>],
    numeric: &[usize],
) -> Result<Vec<u8>, rust_xlsxwriter::XlsxError> {
    use rust_xlsxwriter::{Format, Workbook, Worksheet};

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(sheet_name)?;

    let bold = Format::new().set_bold();
    for (c, name) in header.iter().enumerate() {
        worksheet.write_string_with_format(0, c as u16, *name, &bold)?;
        worksheet.set_column_width(c as u16, (name.len() + 4).max(12) as f64)?;
    }

    for (r, row) in rows.iter().enumerate() {
        let r = (r + 1) as u32;
        for (c, value) in row.iter().enumerate() {
            let number = numeric
                .contains(&c)
                .then(|| value.trim().parse::<f64>().ok())
                .flatten();
            match number {
                Some(number) => worksheet.write_number(r, c as u16, number)?,
                None => worksheet.write_string(r, c as u16, value.as_str())?,
            };
        }
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer()
}

#[cfg(feature = "web")]
pub fn view_to_xlsx(rows: &[ReconciledGoal]) -> Result<Vec<u8>, rust_xlsxwriter::XlsxError> {
    // Year, Rating, Completion
    to_xlsx("Goals", &VIEW_HEADER, &view_rows(rows), &[4, 7, 10])
}

#[cfg(feature = "web")]
pub fn evaluations_to_xlsx(evaluations: &[Evaluation]) -> Result<Vec<u8>, rust_xlsxwriter::XlsxError> {
    let rows: Vec<Vec<String>> = evaluations.iter().map(codec::encode_evaluation).collect();
    // Rating, Completion
    to_xlsx(
        Table::PerformanceLog.sheet_name(),
        Table::PerformanceLog.header(),
        &rows,
        &[4, 8],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_csv;

    #[test]
    fn csv_quotes_only_when_needed() {
        let rows = vec![vec![
            "plain".to_string(),
            "with, comma".to_string(),
            "say \"hi\"".to_string(),
        ]];
        let csv = to_csv(&["A", "B", "C"], &rows);
        assert_eq!(csv, "A,B,C\nplain,\"with, comma\",\"say \"\"hi\"\"\"\n");
    }

    #[test]
    fn csv_output_reads_back() {
        let rows = vec![vec!["line\nbreak".to_string(), "x".to_string()]];
        let csv = to_csv(&["A", "B"], &rows);
        let parsed = parse_csv(&csv);
        assert_eq!(parsed[1], rows[0]);
    }

    #[cfg(feature = "web")]
    #[test]
    fn xlsx_is_a_zip_container() {
        let rows = vec![vec!["Alice".to_string(), "4".to_string()]];
        let bytes = to_xlsx("Goals", &["Resource Name", "Rating"], &rows, &[1]).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }
}
