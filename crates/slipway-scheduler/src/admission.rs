//! Order admission — per-command validation and queue estimates.
//!
//! Everything here is synchronous and side-effect free, so a rejected
//! order never reaches the container runtime.

use slipway_core::*;

fn require<'a>(value: &'a Option<String>, field: &str, command: Command) -> SlipwayResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(SlipwayError::Validation(format!(
            "{command} order requires parameters.{field}"
        ))),
    }
}

/// Check the fields `order.command` needs and the order's constraints.
pub fn validate(order: &Order, settings: &SchedulerSettings, now_ms: u64) -> SlipwayResult<()> {
    if order.id.trim().is_empty() {
        return Err(SlipwayError::Validation("order id must not be empty".into()));
    }

    let p = &order.parameters;
    let command = order.command;
    match command {
        Command::Deploy => {
            require(&p.application, "application", command)?;
            require(&p.environment, "environment", command)?;
            require(&p.image, "image", command)?;
        }
        Command::Rollback => {
            require(&p.application, "application", command)?;
            require(&p.environment, "environment", command)?;
        }
        Command::Scale => {
            require(&p.application, "application", command)?;
            require(&p.environment, "environment", command)?;
            if p.replicas.is_none() {
                return Err(SlipwayError::Validation(
                    "scale order requires parameters.replicas".into(),
                ));
            }
        }
        Command::Promote => {
            require(&p.application, "application", command)?;
            let source = require(&p.source_environment, "source_environment", command)?;
            let target = require(&p.environment, "environment", command)?;
            if source == target {
                return Err(SlipwayError::Validation(format!(
                    "promote source and target are both {target}"
                )));
            }
        }
        Command::Status => {
            require(&p.application, "application", command)?;
        }
        Command::Abort => {
            require(&p.target_order_id, "target_order_id", command)?;
        }
    }

    if let Some(threshold) = p.rollback_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SlipwayError::Validation(format!(
                "rollback_threshold must be within 0.0..=1.0, got {threshold}"
            )));
        }
    }
    if let Some(deadline) = order.constraints.deadline {
        if deadline <= now_ms {
            return Err(SlipwayError::Validation(format!(
                "deadline {deadline} is not in the future"
            )));
        }
    }
    if order.context.dependencies.iter().any(|d| d == &order.id) {
        return Err(SlipwayError::Validation(format!(
            "order {} depends on itself",
            order.id
        )));
    }

    if let Some(replicas) = p.replicas {
        if replicas > settings.max_replicas {
            return Err(SlipwayError::ResourceExhaustion {
                message: format!(
                    "{replicas} replicas requested, limit is {}",
                    settings.max_replicas
                ),
                alternatives: vec![
                    format!("Request at most {} replicas", settings.max_replicas),
                    "Split the workload across several applications".to_string(),
                ],
            });
        }
    }
    Ok(())
}

/// Expected run time of an order, in seconds.
pub fn estimated_duration_secs(order: &Order) -> u64 {
    let base: u64 = match order.command {
        Command::Deploy => 600,
        Command::Rollback => 300,
        Command::Scale => 120,
        Command::Promote => 600,
        Command::Status => 10,
        Command::Abort => 60,
    };
    match order.environment() {
        Some(env) if is_production(env) => base * 3 / 2,
        _ => base,
    }
}

/// Start estimate for an order entering a queue `depth` deep.
pub fn estimated_start(now_ms: u64, depth: usize, average_secs: f64) -> u64 {
    now_ms + (depth as f64 * average_secs * 1000.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SchedulerSettings {
        SchedulerSettings::default()
    }

    #[test]
    fn deploy_requires_application() {
        let mut order = Order::deploy("o-1", "billing", "production", "billing:v2");
        order.parameters.application = None;
        let err = validate(&order, &settings(), 0).unwrap_err();
        assert!(matches!(err, SlipwayError::Validation(ref m) if m.contains("application")));

        order.parameters.application = Some("   ".into());
        assert!(validate(&order, &settings(), 0).is_err());
    }

    #[test]
    fn per_command_requirements() {
        let scale = {
            let mut o = Order::new("o-2", Command::Scale);
            o.parameters.application = Some("billing".into());
            o.parameters.environment = Some("staging".into());
            o
        };
        assert!(validate(&scale, &settings(), 0).is_err());

        let abort = Order::new("o-3", Command::Abort);
        assert!(validate(&abort, &settings(), 0).is_err());

        let mut promote = Order::new("o-4", Command::Promote);
        promote.parameters.application = Some("billing".into());
        promote.parameters.source_environment = Some("staging".into());
        promote.parameters.environment = Some("staging".into());
        assert!(validate(&promote, &settings(), 0).is_err());
        promote.parameters.environment = Some("production".into());
        assert!(validate(&promote, &settings(), 0).is_ok());
    }

    #[test]
    fn past_deadline_is_rejected() {
        let mut order = Order::deploy("o-1", "billing", "staging", "billing:v2");
        order.constraints.deadline = Some(1_000);
        assert!(validate(&order, &settings(), 2_000).is_err());
        assert!(validate(&order, &settings(), 500).is_ok());
    }

    #[test]
    fn replica_limit_suggests_alternatives() {
        let mut order = Order::deploy("o-1", "billing", "staging", "billing:v2");
        order.parameters.replicas = Some(51);
        match validate(&order, &settings(), 0) {
            Err(SlipwayError::ResourceExhaustion { alternatives, .. }) => {
                assert!(!alternatives.is_empty())
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn production_takes_longer() {
        let staging = Order::deploy("o-1", "billing", "staging", "billing:v2");
        let prod = Order::deploy("o-2", "billing", "production", "billing:v2");
        assert_eq!(estimated_duration_secs(&staging), 600);
        assert_eq!(estimated_duration_secs(&prod), 900);

        let mut status = Order::new("o-3", Command::Status);
        status.parameters.application = Some("billing".into());
        assert_eq!(estimated_duration_secs(&status), 10);
    }

    #[test]
    fn start_estimate_scales_with_depth() {
        assert_eq!(estimated_start(1_000, 0, 300.0), 1_000);
        assert_eq!(estimated_start(1_000, 2, 300.0), 601_000);
    }
}
