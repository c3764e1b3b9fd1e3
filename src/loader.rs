use crate::model::{FieldError, NewGoal, ValidationError};

/// Column names accepted in a goal import file, matched case-insensitively
const IMPORT_COLUMNS: [&str; 5] = ["Resource Name", "Project", "Goal", "Year", "Month"];

/// Split CSV text into records of fields.
///
/// Handles quoted fields with embedded commas, doubled quotes and line
/// breaks. Both `\n` and `\r\n` line endings are accepted; lines that are
/// entirely empty are dropped.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    parse_csv_lines(text).into_iter().map(|(_, record)| record).collect()
}

/// Like [`parse_csv`], paired with the 1-based line each record starts on.
pub fn parse_csv_lines(text: &str) -> Vec<(usize, Vec<String>)> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut start = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    // Doubled quote inside a quoted field
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => record.push(std::mem::take(&mut field)),
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                record.push(std::mem::take(&mut field));
                push_record(&mut records, start, std::mem::take(&mut record));
                line += 1;
                start = line;
            }
            '\n' => {
                field.push(c);
                line += 1;
            }
            _ => field.push(c),
        }
    }

    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        push_record(&mut records, start, record);
    }

    records
}

fn push_record(records: &mut Vec<(usize, Vec<String>)>, line: usize, record: Vec<String>) {
    if record.iter().any(|f| !f.is_empty()) {
        records.push((line, record));
    }
}

/// One goal read from an import file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportedGoal {
    /// Line of the file the record starts on
    pub line: usize,
    pub form: NewGoal,
}

/// Read goal registration forms out of an import file.
///
/// The first record must be a header naming every column in
/// `IMPORT_COLUMNS`; extra columns are ignored. Field values are not
/// validated here, only the shape of the file.
///
/// # Arguments
/// * `text` - Contents of the uploaded CSV file
///
/// # Returns
/// * `Result<Vec<ImportedGoal>, ValidationError>` - One unvalidated form per
///   data record with its line number, or the header columns that are missing
///
/// # Examples
/// ```
/// use perftrack::loader::goals_from_csv;
///
/// let text = "Resource Name,Project,Goal,Year,Month\n\nAlice,P1,Ship v1,2025,Mar\n";
/// let goals = goals_from_csv(text).unwrap();
/// assert_eq!(goals[0].line, 3);
/// assert_eq!(goals[0].form.resource, "Alice");
/// ```
pub fn goals_from_csv(text: &str) -> Result<Vec<ImportedGoal>, ValidationError> {
    let mut records = parse_csv_lines(text).into_iter();
    let (_, header) = records
        .next()
        .ok_or_else(|| ValidationError::single("file", "is empty"))?;

    let mut positions = [0usize; IMPORT_COLUMNS.len()];
    let mut missing = Vec::new();
    for (slot, name) in positions.iter_mut().zip(IMPORT_COLUMNS) {
        match header.iter().position(|h| h.trim().eq_ignore_ascii_case(name)) {
            Some(index) => *slot = index,
            None => missing.push(FieldError {
                field: "file",
                message: format!("is missing column '{}'", name),
            }),
        }
    }
    if !missing.is_empty() {
        return Err(ValidationError { fields: missing });
    }

    let cell = |record: &[String], column: usize| -> String {
        record.get(positions[column]).cloned().unwrap_or_default()
    };

    Ok(records
        .map(|(line, record)| ImportedGoal {
            line,
            form: NewGoal {
                resource: cell(&record, 0),
                project: cell(&record, 1),
                goal: cell(&record, 2),
                year: cell(&record, 3),
                month: cell(&record, 4),
            },
        })
        .collect())
}
