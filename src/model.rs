use chrono::{NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Format used for every timestamp written to the backing store
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format used for revised target dates
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Highest completion percentage a partially achieved goal can report
pub const MAX_COMPLETION_PCT: u8 = 99;

lazy_static! {
    // Spreadsheets hand numbers back as floats ("2025.0"), so the suffix is tolerated.
    static ref WHOLE_NUMBER_REGEX: Regex = Regex::new(r"^(\d+)(?:\.0+)?$").unwrap();
}

/// Error produced when a single cell or form value cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: '{value}'")]
pub struct ParseFieldError {
    pub field: &'static str,
    pub value: String,
}

impl ParseFieldError {
    fn new(field: &'static str, value: &str) -> Self {
        ParseFieldError {
            field,
            value: value.trim().to_string(),
        }
    }
}

fn whole_number(value: &str) -> Option<&str> {
    WHOLE_NUMBER_REGEX
        .captures(value.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

// Lowercase and drop everything that is not a letter, so "Partially achieved",
// "partially-achieved" and "PartiallyAchieved" compare equal.
fn normalize_label(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Surrogate identifier assigned to a goal when it is registered.
///
/// Evaluations reference goals through this id, so rewording a goal never
/// orphans the evaluations already recorded against it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoalId(Uuid);

impl GoalId {
    pub fn new() -> Self {
        GoalId(Uuid::new_v4())
    }
}

impl Default for GoalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GoalId {
    type Err = ParseFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(GoalId)
            .map_err(|_| ParseFieldError::new("goal id", s))
    }
}

/// Calendar month. Variant order is calendar order, so sorting never falls
/// back to comparing month names as strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Month {
    Jan,
    Feb,
    Mar,
    Apr,
    May,
    Jun,
    Jul,
    Aug,
    Sep,
    Oct,
    Nov,
    Dec,
}

impl Month {
    pub const ALL: [Month; 12] = [
        Month::Jan,
        Month::Feb,
        Month::Mar,
        Month::Apr,
        Month::May,
        Month::Jun,
        Month::Jul,
        Month::Aug,
        Month::Sep,
        Month::Oct,
        Month::Nov,
        Month::Dec,
    ];

    /// 1-based calendar index (Jan = 1)
    pub fn index(self) -> u32 {
        self as u32 + 1
    }

    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            1..=12 => Some(Month::ALL[(index - 1) as usize]),
            _ => None,
        }
    }

    pub fn abbrev(self) -> &'static str {
        match self {
            Month::Jan => "Jan",
            Month::Feb => "Feb",
            Month::Mar => "Mar",
            Month::Apr => "Apr",
            Month::May => "May",
            Month::Jun => "Jun",
            Month::Jul => "Jul",
            Month::Aug => "Aug",
            Month::Sep => "Sep",
            Month::Oct => "Oct",
            Month::Nov => "Nov",
            Month::Dec => "Dec",
        }
    }

    pub fn full_name(self) -> &'static str {
        match self {
            Month::Jan => "January",
            Month::Feb => "February",
            Month::Mar => "March",
            Month::Apr => "April",
            Month::May => "May",
            Month::Jun => "June",
            Month::Jul => "July",
            Month::Aug => "August",
            Month::Sep => "September",
            Month::Oct => "October",
            Month::Nov => "November",
            Month::Dec => "December",
        }
    }

    /// The following month and whether the year rolled over.
    pub fn succ(self) -> (Month, bool) {
        match self {
            Month::Dec => (Month::Jan, true),
            other => (Month::ALL[other.index() as usize], false),
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.abbrev())
    }
}

impl FromStr for Month {
    type Err = ParseFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(digits) = whole_number(s) {
            return digits
                .parse::<u32>()
                .ok()
                .and_then(Month::from_index)
                .ok_or_else(|| ParseFieldError::new("month", s));
        }

        let wanted = normalize_label(s);
        Month::ALL
            .iter()
            .copied()
            .find(|m| {
                wanted == normalize_label(m.abbrev()) || wanted == normalize_label(m.full_name())
            })
            .ok_or_else(|| ParseFieldError::new("month", s))
    }
}

impl TryFrom<String> for Month {
    type Error = ParseFieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Month> for String {
    fn from(month: Month) -> Self {
        month.abbrev().to_string()
    }
}

/// Four-digit target year
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Year(u16);

impl Year {
    pub fn new(value: u16) -> Option<Self> {
        (1000..=9999).contains(&value).then_some(Year(value))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// The following year, or `None` after 9999
    pub fn succ(self) -> Option<Year> {
        Year::new(self.0 + 1)
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Year {
    type Err = ParseFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        whole_number(s)
            .and_then(|digits| digits.parse::<u16>().ok())
            .and_then(Year::new)
            .ok_or_else(|| ParseFieldError::new("year", s))
    }
}

impl TryFrom<String> for Year {
    type Error = ParseFieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Year> for String {
    fn from(year: Year) -> Self {
        year.to_string()
    }
}

/// Evaluation status of a goal.
///
/// `Pending` is the reconciliation sentinel for goals nobody has evaluated
/// yet; it is never accepted as the status of a recorded evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Status {
    Achieved,
    PartiallyAchieved,
    NotCompleted,
    InProgress,
    Assigned,
    Pending,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Achieved,
        Status::PartiallyAchieved,
        Status::NotCompleted,
        Status::InProgress,
        Status::Assigned,
        Status::Pending,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Status::Achieved => "Achieved",
            Status::PartiallyAchieved => "Partially Achieved",
            Status::NotCompleted => "Not Completed",
            Status::InProgress => "In-Progress",
            Status::Assigned => "Assigned",
            Status::Pending => "Pending",
        }
    }

    pub fn is_evaluated(self) -> bool {
        self != Status::Pending
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for Status {
    type Err = ParseFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_label(s).as_str() {
            "achieved" => Ok(Status::Achieved),
            "partiallyachieved" | "partial" => Ok(Status::PartiallyAchieved),
            "notcompleted" => Ok(Status::NotCompleted),
            "inprogress" => Ok(Status::InProgress),
            "assigned" => Ok(Status::Assigned),
            "pending" | "yettomark" => Ok(Status::Pending),
            _ => Err(ParseFieldError::new("status", s)),
        }
    }
}

impl TryFrom<String> for Status {
    type Error = ParseFieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        status.label().to_string()
    }
}

/// Star rating between 0 and 5 inclusive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const MAX: u8 = 5;

    pub fn new(stars: u8) -> Option<Self> {
        (stars <= Self::MAX).then_some(Rating(stars))
    }

    pub fn stars(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Rating {
    type Err = ParseFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Rating(0));
        }
        whole_number(s)
            .and_then(|digits| digits.parse::<u8>().ok())
            .and_then(Rating::new)
            .ok_or_else(|| ParseFieldError::new("rating", s))
    }
}

impl TryFrom<u8> for Rating {
    type Error = ParseFieldError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Rating::new(value).ok_or_else(|| ParseFieldError::new("rating", &value.to_string()))
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

/// Billing classification of a month of work
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UtilisationKind {
    Billable,
    NonBillable,
}

impl UtilisationKind {
    pub fn label(self) -> &'static str {
        match self {
            UtilisationKind::Billable => "Billable",
            UtilisationKind::NonBillable => "Non-Billable",
        }
    }
}

impl fmt::Display for UtilisationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for UtilisationKind {
    type Err = ParseFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_label(s).as_str() {
            "billable" => Ok(UtilisationKind::Billable),
            "nonbillable" => Ok(UtilisationKind::NonBillable),
            _ => Err(ParseFieldError::new("type", s)),
        }
    }
}

impl TryFrom<String> for UtilisationKind {
    type Error = ParseFieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UtilisationKind> for String {
    fn from(kind: UtilisationKind) -> Self {
        kind.label().to_string()
    }
}

/// Serde adapter writing timestamps in the backing store's format
pub mod timestamp_format {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::TIMESTAMP_FORMAT;
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<NaiveDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_some(&ts.format(TIMESTAMP_FORMAT).to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveDateTime>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .filter(|raw| !raw.trim().is_empty())
                .map(|raw| {
                    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
                        .map_err(serde::de::Error::custom)
                })
                .transpose()
        }
    }
}

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, ParseFieldError> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .map_err(|_| ParseFieldError::new("timestamp", value))
}

pub fn parse_date(value: &str) -> Result<NaiveDate, ParseFieldError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| ParseFieldError::new("date", value))
}

/// A goal assigned to a resource for one project month
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub resource: String,
    pub project: String,
    pub goal: String,
    pub year: Year,
    pub month: Month,
}

/// One recorded judgment against a goal. Re-evaluating a goal appends a new
/// evaluation; the latest one by timestamp is current.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub goal_id: GoalId,
    pub resource: String,
    pub goal: String,
    pub status: Status,
    pub rating: Rating,
    pub comments: String,
    pub recommended: bool,
    pub justification: String,
    pub completion_pct: Option<u8>,
    pub revised_date: Option<NaiveDate>,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
}

/// Billable / non-billable declaration for a resource month
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utilisation {
    pub resource: String,
    pub project: String,
    pub year: Year,
    pub month: Month,
    pub kind: UtilisationKind,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
}

/// A single rejected form field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Every problem found in a submission. The write is blocked as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("invalid submission: {}", join_fields(.fields))]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        ValidationError {
            fields: vec![FieldError {
                field,
                message: message.into(),
            }],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{} {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Default)]
struct Checker {
    fields: Vec<FieldError>,
}

impl Checker {
    fn fail(&mut self, field: &'static str, message: impl Into<String>) {
        self.fields.push(FieldError {
            field,
            message: message.into(),
        });
    }

    fn require(&mut self, field: &'static str, value: &str) {
        if value.trim().is_empty() {
            self.fail(field, "is required");
        }
    }

    fn parse<T: FromStr>(&mut self, field: &'static str, value: &str) -> Option<T> {
        if value.trim().is_empty() {
            self.fail(field, "is required");
            return None;
        }
        match value.parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                self.fail(field, format!("'{}' is not valid", value.trim()));
                None
            }
        }
    }

    fn finish<T>(self, value: Option<T>) -> Result<T, ValidationError> {
        if !self.fields.is_empty() {
            return Err(ValidationError {
                fields: self.fields,
            });
        }
        value.ok_or_else(|| ValidationError::single("submission", "is incomplete"))
    }
}

/// Goal registration form
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGoal {
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub month: String,
}

impl NewGoal {
    /// Validates the form and builds the goal it describes under `id`.
    pub fn into_goal(self, id: GoalId) -> Result<Goal, ValidationError> {
        let mut check = Checker::default();
        check.require("resource", &self.resource);
        check.require("project", &self.project);
        check.require("goal", &self.goal);
        let year = check.parse::<Year>("year", &self.year);
        let month = check.parse::<Month>("month", &self.month);

        let goal = year.zip(month).map(|(year, month)| Goal {
            id,
            resource: self.resource.trim().to_string(),
            project: self.project.trim().to_string(),
            goal: self.goal.trim().to_string(),
            year,
            month,
        });
        check.finish(goal)
    }
}

impl From<&Goal> for NewGoal {
    fn from(goal: &Goal) -> Self {
        NewGoal {
            resource: goal.resource.clone(),
            project: goal.project.clone(),
            goal: goal.goal.clone(),
            year: goal.year.to_string(),
            month: goal.month.to_string(),
        }
    }
}

/// Evaluation capture form
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvaluation {
    #[serde(default)]
    pub goal_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub rating: u8,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub recommended: bool,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub completion_pct: Option<u8>,
    #[serde(default)]
    pub revised_date: Option<String>,
    /// Carry an unachieved goal over into the following month
    #[serde(default)]
    pub extend: bool,
}

/// A checked evaluation form, still missing the goal it is recorded against
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvaluationInput {
    pub goal_id: GoalId,
    pub status: Status,
    pub rating: Rating,
    pub comments: String,
    pub recommended: bool,
    pub justification: String,
    pub completion_pct: Option<u8>,
    pub revised_date: Option<NaiveDate>,
    pub extend: bool,
}

impl NewEvaluation {
    pub fn check(&self) -> Result<EvaluationInput, ValidationError> {
        let mut check = Checker::default();
        let goal_id = check.parse::<GoalId>("goal_id", &self.goal_id);
        let status = check.parse::<Status>("status", &self.status);
        if status == Some(Status::Pending) {
            check.fail("status", "Pending cannot be recorded as an evaluation");
        }

        let rating = Rating::new(self.rating);
        if rating.is_none() {
            check.fail("rating", format!("must be between 0 and {}", Rating::MAX));
        }

        check.require("comments", &self.comments);
        if self.recommended {
            check.require("justification", &self.justification);
        }

        if let Some(pct) = self.completion_pct {
            if status.is_some() && status != Some(Status::PartiallyAchieved) {
                check.fail("completion_pct", "only applies to Partially Achieved");
            }
            if pct > MAX_COMPLETION_PCT {
                check.fail("completion_pct", format!("must be between 0 and {MAX_COMPLETION_PCT}"));
            }
        }

        let revised_date = match self.revised_date.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                if status.is_some() && status != Some(Status::NotCompleted) {
                    check.fail("revised_date", "only applies to Not Completed");
                }
                match parse_date(raw) {
                    Ok(date) => Some(date),
                    Err(_) => {
                        check.fail("revised_date", format!("'{}' is not a YYYY-MM-DD date", raw));
                        None
                    }
                }
            }
            _ => None,
        };

        let input = goal_id
            .zip(status)
            .zip(rating)
            .map(|((goal_id, status), rating)| EvaluationInput {
                goal_id,
                status,
                rating,
                comments: self.comments.trim().to_string(),
                recommended: self.recommended,
                justification: self.justification.trim().to_string(),
                completion_pct: self.completion_pct,
                revised_date,
                extend: self.extend,
            });
        check.finish(input)
    }
}

impl EvaluationInput {
    /// Attaches the checked input to the goal it evaluates.
    pub fn into_evaluation(self, goal: &Goal, timestamp: NaiveDateTime) -> Evaluation {
        Evaluation {
            goal_id: goal.id,
            resource: goal.resource.clone(),
            goal: goal.goal.clone(),
            status: self.status,
            rating: self.rating,
            comments: self.comments,
            recommended: self.recommended,
            justification: self.justification,
            completion_pct: self.completion_pct,
            revised_date: self.revised_date,
            timestamp,
        }
    }
}

/// Utilisation form
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUtilisation {
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub month: String,
    #[serde(default)]
    pub kind: String,
}

impl NewUtilisation {
    pub fn into_utilisation(self, timestamp: NaiveDateTime) -> Result<Utilisation, ValidationError> {
        let mut check = Checker::default();
        check.require("resource", &self.resource);
        check.require("project", &self.project);
        let year = check.parse::<Year>("year", &self.year);
        let month = check.parse::<Month>("month", &self.month);
        let kind = check.parse::<UtilisationKind>("kind", &self.kind);

        let entry = year.zip(month).zip(kind).map(|((year, month), kind)| Utilisation {
            resource: self.resource.trim().to_string(),
            project: self.project.trim().to_string(),
            year,
            month,
            kind,
            timestamp,
        });
        check.finish(entry)
    }
}
