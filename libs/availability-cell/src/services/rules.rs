use std::collections::HashSet;

use chrono::Duration;

use shared_models::scheduling::{SchedulingRule, ServiceConfig, TimeRange};

use crate::models::{AvailabilityError, CandidateSlot};

/// Rejects service lists the evaluator cannot pack.
pub fn validate_services(services: &[ServiceConfig]) -> Result<(), AvailabilityError> {
    if services.is_empty() {
        return Err(AvailabilityError::InvalidService(
            "At least one service must be configured".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for service in services {
        if service.duration_minutes <= 0 {
            return Err(AvailabilityError::InvalidService(format!(
                "Service {} has non-positive duration {}",
                service.service_id, service.duration_minutes
            )));
        }
        if matches!(service.gap_minutes, Some(gap) if gap < 0) {
            return Err(AvailabilityError::InvalidService(format!(
                "Service {} has a negative gap",
                service.service_id
            )));
        }
        if let Some(price) = service.price {
            if price < 0.0 {
                return Err(AvailabilityError::InvalidService(format!(
                    "Service {} has a negative price",
                    service.service_id
                )));
            }
        }
        if !service.online && !service.in_person {
            return Err(AvailabilityError::InvalidService(format!(
                "Service {} must be offered online or in person",
                service.service_id
            )));
        }
        if !seen.insert(service.service_id) {
            return Err(AvailabilityError::InvalidService(format!(
                "Service {} is configured twice",
                service.service_id
            )));
        }
    }

    Ok(())
}

/// Validates the window interval and rule.
pub fn validate_window(range: &TimeRange, rule: &SchedulingRule) -> Result<(), AvailabilityError> {
    if range.end <= range.start {
        return Err(AvailabilityError::InvalidWindow(
            "End time must be after start time".to_string(),
        ));
    }
    match rule {
        SchedulingRule::Continuous { interval_minutes: Some(interval) } if *interval < 0 => Err(
            AvailabilityError::InvalidWindow("Rule interval must not be negative".to_string()),
        ),
        SchedulingRule::Continuous { .. } => Ok(()),
    }
}

/// Packs each service's slots back-to-back from the window start.
///
/// Every slot has exactly the service duration and is followed by the
/// service gap (falling back to the rule interval). Generation stops as soon as
/// a full slot no longer fits, so no partial slot is ever produced. Output is
/// ordered by service as configured, then by start time.
pub fn generate_candidates(
    range: &TimeRange,
    rule: &SchedulingRule,
    services: &[ServiceConfig],
) -> Result<Vec<CandidateSlot>, AvailabilityError> {
    validate_window(range, rule)?;
    validate_services(services)?;

    let rule_gap = match rule {
        SchedulingRule::Continuous { interval_minutes } => interval_minutes.unwrap_or(0),
    };

    let mut candidates = Vec::new();
    for service in services {
        let duration = Duration::minutes(service.duration_minutes as i64);
        let gap = Duration::minutes(service.gap_minutes.unwrap_or(rule_gap) as i64);

        let mut current = range.start;
        while current + duration <= range.end {
            candidates.push(CandidateSlot {
                service_id: service.service_id,
                start_time: current,
                end_time: current + duration,
            });
            current = current + duration + gap;
        }
    }

    Ok(candidates)
}
