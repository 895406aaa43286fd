use std::cmp::Ordering;

use crate::models::{ConsolidatedStudentDocument, FlatGradeRow, RankedGrade, SemesterRankedGrade};

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Drops rows without a grade and orders the rest best-first. The sort is
/// stable, so ties keep the order the store returned them in.
pub fn rank_semester(rows: Vec<FlatGradeRow>) -> Vec<RankedGrade> {
    let mut ranked: Vec<RankedGrade> = rows
        .into_iter()
        .filter_map(|row| {
            row.grade.map(|grade| RankedGrade {
                student_id: row.student_id,
                student_name: row.student_name,
                grade,
            })
        })
        .collect();

    ranked.sort_by(|a, b| descending(a.grade, b.grade));
    ranked
}

/// Expands each document into one entry per semester and ranks them all.
pub fn rank_department(documents: Vec<ConsolidatedStudentDocument>) -> Vec<SemesterRankedGrade> {
    let mut ranked: Vec<SemesterRankedGrade> = documents
        .into_iter()
        .flat_map(|document| {
            let ConsolidatedStudentDocument {
                student_id,
                student_name,
                semester_grades,
                ..
            } = document;
            semester_grades
                .into_iter()
                .map(move |(semester, grade)| SemesterRankedGrade {
                    student_id: student_id.clone(),
                    student_name: student_name.clone(),
                    grade,
                    semester,
                })
        })
        .collect();

    ranked.sort_by(|a, b| descending(a.grade, b.grade));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn row(id: &str, name: &str, grade: Option<f64>) -> FlatGradeRow {
        FlatGradeRow {
            student_id: id.to_string(),
            student_name: Some(name.to_string()),
            grade,
            registration_year: Some(2019),
        }
    }

    #[test]
    fn semester_ranking_drops_missing_grades() {
        let ranked = rank_semester(vec![
            row("1", "A", Some(3.9)),
            row("2", "B", None),
            row("3", "C", Some(2.1)),
        ]);
        let pairs: Vec<(&str, f64)> = ranked
            .iter()
            .map(|r| (r.student_name.as_deref().unwrap_or(""), r.grade))
            .collect();
        assert_eq!(pairs, vec![("A", 3.9), ("C", 2.1)]);
    }

    #[test]
    fn ties_keep_store_order() {
        let ranked = rank_semester(vec![
            row("1", "A", Some(2.0)),
            row("2", "B", Some(3.0)),
            row("3", "C", Some(2.0)),
        ]);
        let ids: Vec<&str> = ranked.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1", "3"]);
    }

    #[test]
    fn department_ranking_expands_every_semester() {
        let document = |id: &str, grades: &[(&str, f64)]| ConsolidatedStudentDocument {
            student_id: id.to_string(),
            student_name: format!("S{id}"),
            department_code: "0602".to_string(),
            registration_year: 2019,
            semester_grades: grades
                .iter()
                .map(|(s, g)| (s.to_string(), *g))
                .collect::<BTreeMap<_, _>>(),
        };

        let ranked = rank_department(vec![
            document("1", &[("19fall", 2.5), ("20spring", 3.7)]),
            document("2", &[("19fall", 3.0)]),
        ]);
        let flat: Vec<(&str, &str, f64)> = ranked
            .iter()
            .map(|r| (r.student_name.as_str(), r.semester.as_str(), r.grade))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("S1", "20spring", 3.7),
                ("S2", "19fall", 3.0),
                ("S1", "19fall", 2.5),
            ]
        );
    }
}
