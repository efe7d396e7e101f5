//! Closed variant sets with exhaustive dispatch
//!
//! Run with: cargo run --bin complete_02_sealed_issues

use colored::Colorize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// Milestone 1: Validated construction
// =============================================================================

pub const MIN_SEVERITY: u8 = 1;
pub const MAX_SEVERITY: u8 = 5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IssueError {
    #[error("Severity {0} is out of range (1..=5)")]
    SeverityOutOfRange(i64),

    #[error("Cannot parse issue '{input}': {reason}")]
    Parse { input: String, reason: String },
}

impl IssueError {
    fn parse(input: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Issue {
    Bug { title: String, severity: u8 },
    FeatureRequest { title: String, votes: u32 },
    SupportTicket { title: String, customer: String },
}

impl Issue {
    pub fn bug(title: impl Into<String>, severity: i64) -> Result<Self, IssueError> {
        let allowed = i64::from(MIN_SEVERITY)..=i64::from(MAX_SEVERITY);
        if !allowed.contains(&severity) {
            return Err(IssueError::SeverityOutOfRange(severity));
        }
        Ok(Issue::Bug {
            title: title.into(),
            severity: severity as u8,
        })
    }

    pub fn feature(title: impl Into<String>, votes: u32) -> Self {
        Issue::FeatureRequest {
            title: title.into(),
            votes,
        }
    }

    pub fn support(title: impl Into<String>, customer: impl Into<String>) -> Self {
        Issue::SupportTicket {
            title: title.into(),
            customer: customer.into(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Issue::Bug { title, .. }
            | Issue::FeatureRequest { title, .. }
            | Issue::SupportTicket { title, .. } => title,
        }
    }

    // =========================================================================
    // Milestone 2: Exhaustive dispatch (no wildcard arm on purpose)
    // =========================================================================

    /// Higher is more urgent.
    pub fn priority(&self) -> u32 {
        match self {
            Issue::Bug { severity, .. } => 10 * *severity as u32,
            Issue::FeatureRequest { votes, .. } => (*votes / 10).min(20),
            Issue::SupportTicket { .. } => 15,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::Bug { title, severity } => write!(f, "bug:{title}:{severity}"),
            Issue::FeatureRequest { title, votes } => write!(f, "feature:{title}:{votes}"),
            Issue::SupportTicket { title, customer } => write!(f, "support:{title}:{customer}"),
        }
    }
}

// =============================================================================
// Milestone 3: Parsing from text (`kind:title:detail`)
// =============================================================================

impl FromStr for Issue {
    type Err = IssueError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parts = input.splitn(3, ':');
        let (Some(kind), Some(title), Some(detail)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(IssueError::parse(input, "expected kind:title:detail"));
        };

        let title = title.trim();
        if title.is_empty() {
            return Err(IssueError::parse(input, "title is empty"));
        }

        match kind.trim() {
            "bug" => {
                let severity = detail
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| IssueError::parse(input, format!("bad severity: {e}")))?;
                Issue::bug(title, severity)
            }
            "feature" => {
                let votes = detail
                    .trim()
                    .parse::<u32>()
                    .map_err(|e| IssueError::parse(input, format!("bad vote count: {e}")))?;
                Ok(Issue::feature(title, votes))
            }
            "support" => Ok(Issue::support(title, detail.trim())),
            other => Err(IssueError::parse(input, format!("unknown kind '{other}'"))),
        }
    }
}

pub fn triage(issues: &mut [Issue]) {
    issues.sort_by(|a, b| b.priority().cmp(&a.priority()));
}

fn main() {
    println!("{}", "=== Closed Issue Hierarchy ===".bold());

    let raw = [
        "bug:crash on start:5",
        "feature:dark mode:120",
        "support:cannot log in:alice",
        "bug:typo in footer:1",
        "bug:too severe:9",
        "question:what is this:?",
    ];

    let mut issues = Vec::new();
    for line in raw {
        match line.parse::<Issue>() {
            Ok(issue) => issues.push(issue),
            Err(err) => println!("{} {}", "rejected:".red(), err),
        }
    }

    triage(&mut issues);
    println!("\n{}", "Triage order:".bold());
    for issue in &issues {
        println!("  [{:>2}] {}", issue.priority(), issue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_severities() {
        for severity in 1..=5 {
            assert!(Issue::bug("b", severity).is_ok(), "severity {severity}");
        }
    }

    #[test]
    fn test_invalid_severities() {
        for severity in [-1, 0, 6, 100] {
            assert_eq!(
                Issue::bug("b", severity),
                Err(IssueError::SeverityOutOfRange(severity))
            );
        }
    }

    #[test]
    fn test_priority_covers_every_variant() {
        assert_eq!(Issue::bug("b", 3).unwrap().priority(), 30);
        assert_eq!(Issue::feature("f", 55).priority(), 5);
        assert_eq!(Issue::feature("f", 10_000).priority(), 20);
        assert_eq!(Issue::support("s", "bob").priority(), 15);
    }

    #[test]
    fn test_parse_and_display() {
        let issue: Issue = "feature: dark mode :12".parse().unwrap();
        assert_eq!(issue, Issue::feature("dark mode", 12));
        assert_eq!(issue.to_string(), "feature:dark mode:12");
        assert_eq!(issue.title(), "dark mode");

        let ticket: Issue = "support:login:carol:extra".parse().unwrap();
        assert_eq!(ticket, Issue::support("login", "carol:extra"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!("bug:only-two".parse::<Issue>(), Err(IssueError::Parse { .. })));
        assert!(matches!("bug:x:high".parse::<Issue>(), Err(IssueError::Parse { .. })));
        assert!(matches!("idea:x:1".parse::<Issue>(), Err(IssueError::Parse { .. })));
        assert!(matches!("bug: :1".parse::<Issue>(), Err(IssueError::Parse { .. })));
        assert_eq!(
            "bug:x:7".parse::<Issue>(),
            Err(IssueError::SeverityOutOfRange(7))
        );
    }

    #[test]
    fn test_triage_sorts_by_priority() {
        let mut issues = vec![
            Issue::feature("f", 30),
            Issue::bug("b", 4).unwrap(),
            Issue::support("s", "x"),
        ];
        triage(&mut issues);
        let titles: Vec<&str> = issues.iter().map(Issue::title).collect();
        assert_eq!(titles, vec!["b", "s", "f"]);
    }
}
