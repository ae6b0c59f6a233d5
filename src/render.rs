//! Plain-text rendering for the CLI.

use crate::models::{RankedUser, TaskCategory, TaskDefinition, UserPointsSummary};

const ACTIVE: char = '●';
const INACTIVE: char = '✗';

const CATEGORIES: [TaskCategory; 5] = [
    TaskCategory::Daily,
    TaskCategory::Profile,
    TaskCategory::Job,
    TaskCategory::Referral,
    TaskCategory::Other,
];

fn active_symbol(task: &TaskDefinition) -> char {
    if task.active {
        ACTIVE
    } else {
        INACTIVE
    }
}

/// Render the catalog grouped by category.
///
/// Example output:
/// ```text
/// daily
/// └── ● Daily Sign-In (10 pts)
/// profile
/// ├── ● Upload Resume (20 pts)
/// └── ✗ Connect Social Media (25 pts)
/// ```
pub fn render_catalog(tasks: &[TaskDefinition]) -> String {
    let mut output = String::new();
    for category in CATEGORIES {
        let group: Vec<&TaskDefinition> =
            tasks.iter().filter(|t| t.category == category).collect();
        if group.is_empty() {
            continue;
        }

        output.push_str(category.as_str());
        output.push('\n');
        for (i, task) in group.iter().enumerate() {
            let branch = if i == group.len() - 1 { "└── " } else { "├── " };
            output.push_str(&format!(
                "{}{} {} ({} pts)\n",
                branch,
                active_symbol(task),
                task.title,
                task.points
            ));
        }
    }
    output
}

/// Render a ranking as an aligned table.
pub fn render_leaderboard(rows: &[RankedUser]) -> String {
    if rows.is_empty() {
        return "No ranked users yet\n".to_string();
    }

    let name_width = rows
        .iter()
        .map(|r| display_name(r).chars().count())
        .max()
        .unwrap_or(0)
        .max("USER".len());

    let mut output = format!(
        "{:>4}  {:<width$}  {:>8}  {:>5}\n",
        "RANK",
        "USER",
        "POINTS",
        "LEVEL",
        width = name_width
    );
    for row in rows {
        output.push_str(&format!(
            "{:>4}  {:<width$}  {:>8}  {:>5}\n",
            row.rank,
            display_name(row),
            row.total,
            row.level,
            width = name_width
        ));
    }
    output
}

fn display_name(row: &RankedUser) -> &str {
    row.display_name.as_deref().unwrap_or(&row.user_id)
}

/// Render one user's standing.
pub fn render_summary(summary: &UserPointsSummary) -> String {
    let mut output = format!(
        "{}: {} points, level {} ({} to next level)\n",
        summary.user_id, summary.total, summary.level, summary.points_to_next_level
    );
    match (summary.rank, summary.points_to_next_rank) {
        (Some(rank), Some(gap)) => {
            output.push_str(&format!("rank {} ({} to pass the next user)\n", rank, gap));
        }
        (Some(rank), None) => output.push_str(&format!("rank {}\n", rank)),
        (None, _) => output.push_str("unranked\n"),
    }
    output
}
