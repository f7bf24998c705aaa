use crate::models::{ChangeEvent, Grade, GradeRecord};

/// Compares a fresh fetch against the stored snapshot.
///
/// Without a previous snapshot the fetch only seeds the baseline, so nothing
/// is reported. Otherwise an event is emitted for every current record whose
/// grade is posted and either new or different from the stored one. A grade
/// reverting to unposted is not reported, and exams that disappeared from the
/// listing are ignored. Events follow the order of `current`.
pub fn diff_grades(previous: Option<&[GradeRecord]>, current: &[GradeRecord]) -> Vec<ChangeEvent> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    current
        .iter()
        .filter_map(|record| {
            // First match wins when the portal lists an exam twice.
            let old = previous.iter().find(|old| old.same_exam(record));
            is_reportable(old.map(|old| &old.grade), &record.grade).then(|| ChangeEvent {
                record: record.clone(),
                previous: old.map(|old| old.grade.clone()),
            })
        })
        .collect()
}

fn is_reportable(old: Option<&Grade>, new: &Grade) -> bool {
    match (old, new) {
        (_, Grade::Unposted) => false,
        (None, Grade::Posted(_)) => true,
        (Some(old), new) => old != new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posted(course: &str, exam: &str, grade: &str) -> GradeRecord {
        GradeRecord::new(course, exam, Grade::Posted(grade.to_string()))
    }

    fn unposted(course: &str, exam: &str) -> GradeRecord {
        GradeRecord::new(course, exam, Grade::Unposted)
    }

    fn check(previous: &[GradeRecord], current: &[GradeRecord]) -> Vec<ChangeEvent> {
        diff_grades(Some(previous), current)
    }

    #[test]
    fn cold_start_reports_nothing() {
        let current = vec![posted("A", "X", "1.0"), posted("B", "Y", "2.7"), unposted("C", "Z")];
        assert!(diff_grades(None, &current).is_empty());
    }

    #[test]
    fn grade_appearing_is_reported() {
        let events = check(&[unposted("A", "X")], &[posted("A", "X", "2.0")]);
        assert_eq!(
            events,
            vec![ChangeEvent {
                record: posted("A", "X", "2.0"),
                previous: Some(Grade::Unposted),
            }]
        );
    }

    #[test]
    fn grade_changing_is_reported() {
        let events = check(&[posted("A", "X", "3.0")], &[posted("A", "X", "2.0")]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].previous, Some(Grade::Posted("3.0".to_string())));
    }

    #[test]
    fn unchanged_grades_are_silent() {
        assert!(check(&[posted("A", "X", "2.0")], &[posted("A", "X", "2.0")]).is_empty());
        assert!(check(&[unposted("A", "X")], &[unposted("A", "X")]).is_empty());
    }

    #[test]
    fn dropped_records_are_ignored() {
        let previous = [posted("A", "X", "2.0"), unposted("B", "Y")];
        assert!(check(&previous, &[posted("A", "X", "2.0")]).is_empty());
    }

    #[test]
    fn grade_reverting_to_unposted_is_not_reported() {
        assert!(check(&[posted("A", "X", "2.0")], &[unposted("A", "X")]).is_empty());
    }

    #[test]
    fn new_exam_counts_only_once_posted() {
        let previous = [posted("A", "X", "2.0")];
        let current = [posted("A", "X", "2.0"), unposted("B", "Y"), posted("C", "Z", "1.3")];
        let events = check(&previous, &current);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].record.course, "C");
        assert_eq!(events[0].previous, None);
    }

    #[test]
    fn identity_is_course_and_exam_type() {
        let previous = [posted("A", "PL", "2.0")];
        let events = check(&previous, &[posted("A", "SL", "2.0")]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].record.exam_type, "SL");
    }

    #[test]
    fn events_follow_fetch_order() {
        let previous = [unposted("Z", "X"), unposted("A", "X"), unposted("M", "X")];
        let current = [posted("M", "X", "1.0"), posted("Z", "X", "2.0"), posted("A", "X", "3.0")];
        let courses: Vec<_> = check(&previous, &current)
            .into_iter()
            .map(|event| event.record.course)
            .collect();
        assert_eq!(courses, vec!["M", "Z", "A"]);
    }

    #[test]
    fn first_previous_match_wins() {
        let previous = [posted("A", "X", "2.0"), posted("A", "X", "4.0")];
        assert!(check(&previous, &[posted("A", "X", "2.0")]).is_empty());
    }
}
