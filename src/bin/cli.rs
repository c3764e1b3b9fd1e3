#![cfg(not(tarpaulin_include))]

use clap::{Args, Parser, Subcommand, ValueEnum};
use perftrack::config::Config;
use perftrack::model::{GoalId, Month, NewEvaluation, NewGoal, NewUtilisation, Status, Year};
use perftrack::reconcile::{HistoryFilter, ViewFilter};
use perftrack::store::WorkbookStore;
use perftrack::tracker::Tracker;
use perftrack::{downloader, report};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "perftrack")]
#[command(about = "Register goals, record evaluations and report on them from the terminal")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, env = "PERFTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the workbook tabs
    #[arg(short, long, env = "PERFTRACK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage goals
    #[command(subcommand)]
    Goal(GoalCommand),

    /// Record an evaluation of a goal
    Evaluate(EvaluateArgs),

    /// Show every goal with its current evaluation
    View(FilterArgs),

    /// Evaluation history, newest first
    History {
        #[arg(long)]
        resource: Option<String>,
        #[arg(long)]
        goal_id: Option<GoalId>,
    },

    /// Summary, leaderboard, status distribution and monthly trend
    Report {
        #[command(flatten)]
        filter: FilterArgs,
        /// Leaderboard length
        #[arg(long)]
        top: Option<usize>,
    },

    /// Billable month declarations
    #[command(subcommand)]
    Utilisation(UtilisationCommand),

    /// Write the reconciled view or the evaluation log to a file
    Export {
        #[arg(value_enum)]
        what: ExportKind,
        /// Output file; the extension picks the format (.csv or .xlsx)
        out: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(Subcommand)]
enum GoalCommand {
    Add(GoalArgs),
    List,
    /// Register every goal in a CSV file, or none if any row is invalid
    Import { file: PathBuf },
    Update {
        id: GoalId,
        #[command(flatten)]
        goal: GoalArgs,
    },
    Delete { id: GoalId },
}

#[derive(Args)]
struct GoalArgs {
    #[arg(long)]
    resource: String,
    #[arg(long)]
    project: String,
    #[arg(long)]
    goal: String,
    #[arg(long)]
    year: String,
    #[arg(long)]
    month: String,
}

impl From<GoalArgs> for NewGoal {
    fn from(args: GoalArgs) -> Self {
        NewGoal {
            resource: args.resource,
            project: args.project,
            goal: args.goal,
            year: args.year,
            month: args.month,
        }
    }
}

#[derive(Args)]
struct EvaluateArgs {
    goal_id: String,
    #[arg(long)]
    status: String,
    #[arg(long, default_value_t = 0)]
    rating: u8,
    #[arg(long, default_value = "")]
    comments: String,
    #[arg(long)]
    recommended: bool,
    #[arg(long, default_value = "")]
    justification: String,
    /// Percent complete, for partially achieved goals
    #[arg(long)]
    completion: Option<u8>,
    /// New target date (YYYY-MM-DD), for goals not completed
    #[arg(long)]
    revised_date: Option<String>,
    /// Carry the goal over into the following month unless achieved
    #[arg(long)]
    extend: bool,
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    project: Option<String>,
    #[arg(long)]
    resource: Option<String>,
    #[arg(long)]
    year: Option<Year>,
    #[arg(long)]
    month: Option<Month>,
    #[arg(long)]
    status: Option<Status>,
}

impl From<FilterArgs> for ViewFilter {
    fn from(args: FilterArgs) -> Self {
        ViewFilter {
            project: args.project,
            resource: args.resource,
            year: args.year,
            month: args.month,
            status: args.status,
        }
    }
}

#[derive(Subcommand)]
enum UtilisationCommand {
    Add {
        #[arg(long)]
        resource: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        year: String,
        #[arg(long)]
        month: String,
        /// Billable or Non-Billable
        #[arg(long)]
        kind: String,
    },
    Report,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportKind {
    View,
    Evaluations,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.store.data_dir = dir;
    }
    let tracker = Tracker::new(
        WorkbookStore::open(&config.store.data_dir)?,
        config.store.append_retries,
    );

    match cli.command {
        Command::Goal(GoalCommand::Add(args)) => {
            let goal = tracker.register_goal(args.into())?;
            println!("{}", goal.id);
        }
        Command::Goal(GoalCommand::List) => {
            let goals = tracker.goals()?;
            if goals.is_empty() {
                println!("Nothing to show yet");
            }
            for g in goals {
                println!("{}  {:<20} {:<15} {} {}  {}", g.id, g.resource, g.project, g.month, g.year, g.goal);
            }
        }
        Command::Goal(GoalCommand::Import { file }) => {
            let text = fs::read_to_string(&file)?;
            let goals = tracker.import_goals_csv(&text)?;
            println!("Imported {} goal(s)", goals.len());
        }
        Command::Goal(GoalCommand::Update { id, goal }) => {
            tracker.update_goal(id, goal.into())?;
            println!("Updated {}", id);
        }
        Command::Goal(GoalCommand::Delete { id }) => {
            let goal = tracker.delete_goal(id)?;
            println!("Deleted {} ({})", goal.id, goal.goal);
        }
        Command::Evaluate(args) => {
            let outcome = tracker.record_evaluation(NewEvaluation {
                goal_id: args.goal_id,
                status: args.status,
                rating: args.rating,
                comments: args.comments,
                recommended: args.recommended,
                justification: args.justification,
                completion_pct: args.completion,
                revised_date: args.revised_date,
                extend: args.extend,
            })?;
            println!(
                "Recorded {} ({}/5) at {}",
                outcome.evaluation.status, outcome.evaluation.rating, outcome.evaluation.timestamp
            );
            if let Some(next) = outcome.carried_over {
                println!("Carried over to {} {} as {}", next.month, next.year, next.id);
            }
            if let Some(err) = outcome.carry_over_error {
                eprintln!("Not carried over: {}", err);
            }
        }
        Command::View(filter) => {
            let rows = tracker.reconciled(&filter.into())?;
            if rows.is_empty() {
                println!("Nothing to show yet");
            }
            for r in rows {
                println!(
                    "{:<20} {:<15} {} {}  {:<18} {}/5  {}",
                    r.resource, r.project, r.month, r.year, r.status, r.rating, r.goal
                );
            }
        }
        Command::History { resource, goal_id } => {
            let entries = tracker.history(&HistoryFilter { resource, goal_id })?;
            if entries.is_empty() {
                println!("Nothing to show yet");
            }
            for e in entries {
                println!(
                    "{}  {:<20} {:<18} {}/5  {}  {}",
                    e.timestamp, e.resource, e.status, e.rating, e.goal, e.comments
                );
            }
        }
        Command::Report { filter, top } => {
            let rows = tracker.reconciled(&filter.into())?;
            let summary = report::summary(&rows);
            println!(
                "Goals: {}  Evaluated: {}  Pending: {}  Achieved: {} ({}%)  Mean rating: {}",
                summary.goals,
                summary.evaluated,
                summary.pending,
                summary.achieved,
                summary.achievement_rate,
                summary.mean_rating
            );

            println!("\nLeaderboard");
            for (rank, entry) in report::leaderboard(&rows, top.unwrap_or(config.reports.leaderboard_size))
                .iter()
                .enumerate()
            {
                println!(
                    "{:>3}. {:<20} {:.2}  ({} evaluated, {} achieved)",
                    rank + 1,
                    entry.resource,
                    entry.mean_rating,
                    entry.evaluated,
                    entry.achieved
                );
            }

            println!("\nStatus");
            for count in report::status_distribution(&rows) {
                println!("  {:<18} {}", count.status, count.count);
            }

            println!("\nTrend");
            for point in report::monthly_trend(&rows) {
                println!("  {:<9} {:>5.1}%  ({}/{})", point.label, point.achievement_rate, point.achieved, point.goals);
            }
        }
        Command::Utilisation(UtilisationCommand::Add {
            resource,
            project,
            year,
            month,
            kind,
        }) => {
            let entry = tracker.record_utilisation(NewUtilisation {
                resource,
                project,
                year,
                month,
                kind,
            })?;
            println!("Recorded {} for {} ({} {})", entry.kind, entry.resource, entry.month, entry.year);
        }
        Command::Utilisation(UtilisationCommand::Report) => {
            let summary = tracker.utilisation_summary()?;
            println!(
                "Resource months: {}  Billable: {}  Non-billable: {}  ({}% billable)",
                summary.months, summary.billable, summary.non_billable, summary.billable_rate
            );
            for r in summary.by_resource {
                println!("  {:<20} {:>3} / {:<3} {:>5.1}%", r.resource, r.billable, r.non_billable, r.billable_rate);
            }
        }
        Command::Export { what, out, filter } => {
            let xlsx = out
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"));
            let bytes = match (what, xlsx) {
                (ExportKind::View, false) => downloader::view_to_csv(&tracker.reconciled(&filter.into())?).into_bytes(),
                (ExportKind::Evaluations, false) => downloader::evaluations_to_csv(&tracker.evaluations()?).into_bytes(),
                #[cfg(feature = "web")]
                (ExportKind::View, true) => downloader::view_to_xlsx(&tracker.reconciled(&filter.into())?)?,
                #[cfg(feature = "web")]
                (ExportKind::Evaluations, true) => downloader::evaluations_to_xlsx(&tracker.evaluations()?)?,
                #[cfg(not(feature = "web"))]
                (_, true) => return Err("XLSX export needs the web feature".into()),
            };
            fs::write(&out, bytes)?;
            println!("Wrote {}", out.display());
        }
    }

    Ok(())
}
