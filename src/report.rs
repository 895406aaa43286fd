use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{RankedGrade, SemesterRankedGrade};

/// Which partition a ranking was read from.
pub struct ReportScope<'a> {
    pub dep_code: &'a str,
    pub dep_name: Option<&'a str>,
    pub semester: Option<&'a str>,
}

impl ReportScope<'_> {
    fn title(&self) -> String {
        let department = match self.dep_name {
            Some(name) => format!("{name} ({})", self.dep_code),
            None => self.dep_code.to_string(),
        };
        match self.semester {
            Some(semester) => format!("{department}, {semester}"),
            None => format!("{department}, all semesters"),
        }
    }
}

pub fn semester_table(scope: &ReportScope<'_>, grades: &[RankedGrade]) -> String {
    let mut output = String::new();
    let semester = scope.semester.unwrap_or("");
    for grade in grades {
        let _ = writeln!(
            output,
            "{:>20} {:>12} {:.2} {:>8} {:>4}",
            grade.student_name.as_deref().unwrap_or("-"),
            grade.student_id,
            grade.grade,
            semester,
            scope.dep_code
        );
    }
    output
}

pub fn department_table(scope: &ReportScope<'_>, grades: &[SemesterRankedGrade]) -> String {
    let mut output = String::new();
    for grade in grades {
        let _ = writeln!(
            output,
            "{:>20} {:>12} {:.2} {:>8} {:>4}",
            grade.student_name, grade.student_id, grade.grade, grade.semester, scope.dep_code
        );
    }
    output
}

pub fn build_semester_report(
    scope: &ReportScope<'_>,
    generated_at: DateTime<Utc>,
    grades: &[RankedGrade],
) -> String {
    let mut output = header(scope, generated_at);

    if grades.is_empty() {
        let _ = writeln!(output, "No grades recorded for this semester.");
        return output;
    }

    let _ = writeln!(output, "| Rank | Student | Id | Grade |");
    let _ = writeln!(output, "|---:|---|---|---:|");
    for (rank, grade) in grades.iter().enumerate() {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {:.2} |",
            rank + 1,
            grade.student_name.as_deref().unwrap_or("-"),
            grade.student_id,
            grade.grade
        );
    }
    output
}

pub fn build_department_report(
    scope: &ReportScope<'_>,
    generated_at: DateTime<Utc>,
    grades: &[SemesterRankedGrade],
) -> String {
    let mut output = header(scope, generated_at);

    if grades.is_empty() {
        let _ = writeln!(output, "No grades recorded for this department.");
        return output;
    }

    let _ = writeln!(output, "| Rank | Student | Id | Semester | Grade |");
    let _ = writeln!(output, "|---:|---|---|---|---:|");
    for (rank, grade) in grades.iter().enumerate() {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {:.2} |",
            rank + 1,
            grade.student_name,
            grade.student_id,
            grade.semester,
            grade.grade
        );
    }
    output
}

fn header(scope: &ReportScope<'_>, generated_at: DateTime<Utc>) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Grade Ranking: {}", scope.title());
    let _ = writeln!(
        output,
        "Generated {}",
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    output
}
