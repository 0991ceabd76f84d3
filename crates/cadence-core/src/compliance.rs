//! DMT compliance rule engine.
//!
//! A deterministic pure function of a normalized work item and a coverage
//! threshold. Called on every write; rollups consume the stored result so
//! the dashboard and the evaluator never disagree.

use crate::types::{AcQuality, ComplianceFailure, ItemType, UnitTestingStatus, WorkItem};

/// Evaluate DMT compliance for a work item.
///
/// Subtasks (items with a parent) are unconditionally compliant. For
/// everything else, failure tags accumulate:
///
/// - `missing_ac_quality` unless AC quality is testable or final;
/// - `unit_testing_not_done` / `low_coverage` unless the unit-testing
///   status is `exception_approved`;
/// - `missing_pr_link` / `missing_dmt_signoff` for stories and bugs;
/// - `missing_assignee` when no assignee email is recorded.
pub fn evaluate(item: &WorkItem, coverage_threshold: f64) -> (bool, Vec<ComplianceFailure>) {
    if item.parent_id.is_some() {
        return (true, Vec::new());
    }

    let mut failures = Vec::new();

    match item.ac_quality {
        Some(AcQuality::Testable) | Some(AcQuality::Final) => {}
        _ => failures.push(ComplianceFailure::MissingAcQuality),
    }

    let has_exception = item.unit_testing_status == Some(UnitTestingStatus::ExceptionApproved);
    if !has_exception {
        if item.unit_testing_status != Some(UnitTestingStatus::Done) {
            failures.push(ComplianceFailure::UnitTestingNotDone);
        }
        match item.coverage_percent {
            Some(c) if c >= coverage_threshold => {}
            _ => failures.push(ComplianceFailure::LowCoverage),
        }
    }

    if matches!(item.item_type, ItemType::Story | ItemType::Bug) {
        let has_valid_pr = item.pr_links.iter().any(|l| l.starts_with("http"));
        if !has_valid_pr {
            failures.push(ComplianceFailure::MissingPrLink);
        }
        if !item.reviewer_dmt_signoff {
            failures.push(ComplianceFailure::MissingDmtSignoff);
        }
    }

    if item
        .assignee_email
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .is_empty()
    {
        failures.push(ComplianceFailure::MissingAssignee);
    }

    (failures.is_empty(), failures)
}

/// Evaluate and write the result back onto the item.
pub fn apply(item: &mut WorkItem, coverage_threshold: f64) {
    let (compliant, failures) = evaluate(item, coverage_threshold);
    item.dmt_compliant = compliant;
    item.compliance_failures = failures;
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn compliant_story() -> WorkItem {
        let mut item = WorkItem::new(Uuid::new_v4(), "S-1", "a story");
        item.item_type = ItemType::Story;
        item.ac_quality = Some(AcQuality::Testable);
        item.unit_testing_status = Some(UnitTestingStatus::Done);
        item.coverage_percent = Some(82.0);
        item.pr_links = vec!["https://gh/1".to_string()];
        item.reviewer_dmt_signoff = true;
        item.assignee_email = Some("a@b.c".to_string());
        item
    }

    #[test]
    fn fully_evidenced_story_is_compliant() {
        let item = compliant_story();
        let (ok, failures) = evaluate(&item, 80.0);
        assert!(ok);
        assert!(failures.is_empty());
    }

    #[test]
    fn coverage_below_threshold_fails() {
        let mut item = compliant_story();
        item.coverage_percent = Some(70.0);
        let (ok, failures) = evaluate(&item, 80.0);
        assert!(!ok);
        assert_eq!(failures, vec![ComplianceFailure::LowCoverage]);
    }

    #[test]
    fn null_coverage_counts_as_low() {
        let mut item = compliant_story();
        item.coverage_percent = None;
        let (_, failures) = evaluate(&item, 80.0);
        assert!(failures.contains(&ComplianceFailure::LowCoverage));
    }

    #[test]
    fn exception_approved_waives_testing_and_coverage() {
        let mut item = compliant_story();
        item.unit_testing_status = Some(UnitTestingStatus::ExceptionApproved);
        item.coverage_percent = None;
        let (ok, failures) = evaluate(&item, 80.0);
        assert!(ok, "unexpected failures: {failures:?}");
    }

    #[test]
    fn subtask_is_unconditionally_compliant() {
        let mut item = WorkItem::new(Uuid::new_v4(), "S-1a", "subtask");
        item.parent_id = Some(Uuid::new_v4());
        // No evidence at all.
        let (ok, failures) = evaluate(&item, 80.0);
        assert!(ok);
        assert!(failures.is_empty());
    }

    #[test]
    fn pr_rules_only_apply_to_stories_and_bugs() {
        let mut task = compliant_story();
        task.item_type = ItemType::Task;
        task.pr_links.clear();
        task.reviewer_dmt_signoff = false;
        let (ok, _) = evaluate(&task, 80.0);
        assert!(ok);

        let mut bug = compliant_story();
        bug.item_type = ItemType::Bug;
        bug.pr_links = vec!["not-a-url".to_string()];
        let (_, failures) = evaluate(&bug, 80.0);
        assert!(failures.contains(&ComplianceFailure::MissingPrLink));
    }

    #[test]
    fn missing_assignee_and_ac_quality_accumulate() {
        let mut item = compliant_story();
        item.assignee_email = Some("  ".to_string());
        item.ac_quality = Some(AcQuality::Incomplete);
        let (ok, failures) = evaluate(&item, 80.0);
        assert!(!ok);
        assert!(failures.contains(&ComplianceFailure::MissingAssignee));
        assert!(failures.contains(&ComplianceFailure::MissingAcQuality));
    }

    #[test]
    fn apply_writes_back_onto_item() {
        let mut item = compliant_story();
        apply(&mut item, 80.0);
        assert!(item.dmt_compliant);
        item.coverage_percent = Some(10.0);
        apply(&mut item, 80.0);
        assert!(!item.dmt_compliant);
        assert_eq!(item.compliance_failures, vec![ComplianceFailure::LowCoverage]);
    }
}
