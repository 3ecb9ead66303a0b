//! Report finalisation: status, scores, recommendations, next steps.

use std::time::Duration;

use slipway_core::*;

const SLOW_ORDER: Duration = Duration::from_secs(600);

/// 100 − 20 per error/critical event − 10 per warning − 20 for a run
/// longer than ten minutes, floored at zero.
pub fn quality_score(report: &Report, elapsed: Duration) -> u32 {
    let errors = report.count_events(&[EventLevel::Error, EventLevel::Critical]) as u32;
    let warnings = report.count_events(&[EventLevel::Warning]) as u32;
    let slow = if elapsed > SLOW_ORDER { 20 } else { 0 };
    100u32.saturating_sub(20 * errors + 10 * warnings + slow)
}

/// Close `report` with the outcome of its handler.
pub fn finalize(report: &mut Report, outcome: &SlipwayResult<()>, elapsed: Duration) {
    match outcome {
        Ok(()) => {
            report.status = ReportStatus::Success;
            report.record(
                EventLevel::Info,
                "complete",
                format!("{} order completed", report.command),
            );
            report.next_steps = success_steps(report);
        }
        Err(err) => {
            report.status = ReportStatus::Failed;
            let level = match err {
                SlipwayError::RollbackFailure { .. } | SlipwayError::SecurityGate { .. } => {
                    EventLevel::Critical
                }
                _ => EventLevel::Error,
            };
            report.record(level, err.stage(), err.to_string());
            report.failure = Some(FailureDetail {
                kind: err.kind().to_string(),
                stage: err.stage().to_string(),
                cause: err.to_string(),
            });
            report.next_steps = err.recommended_actions();
        }
    }

    report.completed_at = Some(epoch_millis());
    report.duration_ms = Some(elapsed.as_millis() as u64);
    report.quality_score = quality_score(report, elapsed);
    report.compliance_score = report
        .security_scan
        .as_ref()
        .map(SecurityScan::compliance_score)
        .unwrap_or(100);
    report.recommendations = recommendations(report, elapsed);
}

fn success_steps(report: &Report) -> Vec<String> {
    let target = report
        .deployment_id
        .clone()
        .unwrap_or_else(|| report.order_id.clone());
    match report.command {
        Command::Deploy | Command::Promote => vec![
            format!("Watch metrics of {target} for the next 30 minutes"),
            "Automatic rollback triggers stay armed for one hour".to_string(),
        ],
        Command::Rollback => vec![
            format!("Investigate the root cause of the {target} regression"),
            "Redeploy once a fix is verified in staging".to_string(),
        ],
        Command::Scale => vec!["Confirm latency stays stable at the new replica count".to_string()],
        Command::Status | Command::Abort => Vec::new(),
    }
}

fn recommendations(report: &Report, elapsed: Duration) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(scan) = &report.security_scan {
        if scan.vulnerabilities.high > 0 {
            out.push(format!(
                "Schedule patching of {} high-severity vulnerabilities",
                scan.vulnerabilities.high
            ));
        }
        if scan.vulnerabilities.medium > 0 {
            out.push(format!(
                "Review {} medium-severity vulnerabilities",
                scan.vulnerabilities.medium
            ));
        }
    }
    if report.count_events(&[EventLevel::Warning]) > 0 {
        out.push("Review the warnings recorded during execution".to_string());
    }
    if elapsed > SLOW_ORDER {
        out.push("Investigate why the order ran longer than ten minutes".to_string());
    }
    if report.status == ReportStatus::Failed
        && report.command == Command::Deploy
        && report.failure.as_ref().is_some_and(|f| f.kind != "security_gate")
    {
        out.push("Verify the change in staging before retrying production".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> Report {
        Report::start(&Order::deploy("o-1", "billing", "production", "billing:v2"), 0)
    }

    #[test]
    fn clean_success_scores_full_marks() {
        let mut r = report();
        finalize(&mut r, &Ok(()), Duration::from_secs(200));
        assert_eq!(r.status, ReportStatus::Success);
        assert_eq!(r.quality_score, 100);
        assert_eq!(r.compliance_score, 100);
        assert_eq!(r.duration_ms, Some(200_000));
        assert!(!r.next_steps.is_empty());
    }

    #[test]
    fn penalties_accumulate() {
        let mut r = report();
        r.record(EventLevel::Warning, "warmup", "slow start");
        r.record(EventLevel::Error, "verify", "sample failed");
        assert_eq!(quality_score(&r, Duration::from_secs(60)), 70);
        assert_eq!(quality_score(&r, Duration::from_secs(601)), 50);

        for _ in 0..5 {
            r.record(EventLevel::Critical, "verify", "bad");
        }
        assert_eq!(quality_score(&r, Duration::from_secs(60)), 0);
    }

    #[test]
    fn failure_carries_stage_and_actions() {
        let mut r = report();
        let err = SlipwayError::HealthCheckFailure { passed: 9, total: 12 };
        finalize(&mut r, &Err(err), Duration::from_secs(30));

        assert_eq!(r.status, ReportStatus::Failed);
        let failure = r.failure.as_ref().unwrap();
        assert_eq!(failure.kind, "health_check_failure");
        assert_eq!(failure.stage, "health_verification");
        assert!(!r.next_steps.is_empty());
        assert_eq!(r.quality_score, 80);
    }

    #[test]
    fn compliance_follows_scan() {
        let mut r = report();
        r.security_scan = Some(SecurityScan {
            vulnerabilities: VulnerabilityCounts {
                high: 2,
                ..Default::default()
            },
            ..Default::default()
        });
        finalize(&mut r, &Ok(()), Duration::from_secs(1));
        assert_eq!(r.compliance_score, 80);
        assert!(r.recommendations[0].contains("2 high-severity"));
    }
}
