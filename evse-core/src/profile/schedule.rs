//! Time-based period evaluation, limit conversion, effective-profile
//! selection, and composite-schedule computation.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};

use crate::config::ConnectorConfig;
use crate::ocpp::types::{
    ChargingProfile, ChargingProfileKind, ChargingRateUnit, ChargingSchedule, ChargingSchedulePeriod,
    EffectiveLimit, RecurrencyKind,
};

/// Convert a raw schedule limit to watts.
pub fn to_watts(limit: f64, unit: ChargingRateUnit, number_phases: Option<u8>, connector: &ConnectorConfig) -> f64 {
    match unit {
        ChargingRateUnit::W => limit,
        ChargingRateUnit::A => {
            let phases = number_phases.unwrap_or(connector.phases) as f64;
            limit * connector.voltage * phases
        }
    }
}

/// Convert a watt value back to the unit the caller asked for, e.g. for
/// `GetCompositeSchedule`. `number_phases` is the phase count assumed for
/// the conversion; absent it falls back to the connector default.
pub fn from_watts(watts: f64, unit: ChargingRateUnit, number_phases: Option<u8>, connector: &ConnectorConfig) -> f64 {
    match unit {
        ChargingRateUnit::W => watts,
        ChargingRateUnit::A => {
            let phases = number_phases.unwrap_or(connector.phases) as f64;
            if connector.voltage > 0.0 && phases > 0.0 {
                watts / (connector.voltage * phases)
            } else {
                0.0
            }
        }
    }
}

/// Whether `profile` is inside its valid window at `now` (validFrom/validTo
/// only; duration/kind-specific expiry is handled by [`elapsed_seconds`]).
pub fn within_valid_window(profile: &ChargingProfile, now: DateTime<Utc>) -> bool {
    if let Some(from) = profile.valid_from {
        if now < from {
            return false;
        }
    }
    if let Some(to) = profile.valid_to {
        if now >= to {
            return false;
        }
    }
    true
}

/// The instant a profile's schedule is measured from, per kind.
fn origin(profile: &ChargingProfile, now: DateTime<Utc>, transaction_start: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match profile.charging_profile_kind {
        ChargingProfileKind::Absolute => {
            Some(profile.charging_schedule.start_schedule.unwrap_or(profile.valid_from.unwrap_or(now)))
        }
        ChargingProfileKind::Relative => transaction_start,
        ChargingProfileKind::Recurring => {
            let anchor = profile.charging_schedule.start_schedule.unwrap_or(now);
            match profile.recurrency_kind.unwrap_or(RecurrencyKind::Daily) {
                RecurrencyKind::Daily => {
                    let mut candidate = now
                        .date_naive()
                        .and_hms_opt(anchor.hour(), anchor.minute(), anchor.second())
                        .map(|ndt| ndt.and_utc())?;
                    if candidate > now {
                        candidate -= ChronoDuration::days(1);
                    }
                    Some(candidate)
                }
                RecurrencyKind::Weekly => {
                    let today = now.date_naive();
                    let anchor_weekday = anchor.weekday().num_days_from_monday() as i64;
                    let today_weekday = today.weekday().num_days_from_monday() as i64;
                    let mut delta_days = today_weekday - anchor_weekday;
                    if delta_days < 0 {
                        delta_days += 7;
                    }
                    let mut candidate = (today - ChronoDuration::days(delta_days))
                        .and_hms_opt(anchor.hour(), anchor.minute(), anchor.second())
                        .map(|ndt| ndt.and_utc())?;
                    if candidate > now {
                        candidate -= ChronoDuration::days(7);
                    }
                    Some(candidate)
                }
            }
        }
    }
}

/// Seconds elapsed since the profile's effective origin, folded modulo
/// `duration` for Recurring profiles, or `None` if the profile yields no
/// limit at `now` (inactive window, no transaction for Relative, or expired
/// non-recurring duration).
pub fn elapsed_seconds(profile: &ChargingProfile, now: DateTime<Utc>, transaction_start: Option<DateTime<Utc>>) -> Option<i64> {
    if !within_valid_window(profile, now) {
        return None;
    }

    let origin = origin(profile, now, transaction_start)?;
    if origin > now {
        return None;
    }
    let mut elapsed = (now - origin).num_seconds();

    if let Some(duration) = profile.charging_schedule.duration {
        match profile.charging_profile_kind {
            ChargingProfileKind::Recurring => {
                if duration > 0 {
                    elapsed %= duration;
                }
            }
            _ => {
                if elapsed > duration {
                    return None;
                }
            }
        }
    }

    Some(elapsed)
}

/// The last period whose `startPeriod <= elapsed`, i.e. the active period.
pub fn active_period(schedule: &ChargingSchedule, elapsed: i64) -> Option<&ChargingSchedulePeriod> {
    schedule
        .charging_schedule_period
        .iter()
        .filter(|p| p.start_period <= elapsed)
        .max_by_key(|p| p.start_period)
}

/// The period immediately after the active one within the same schedule
/// cycle, used to compute `nextChangeIn`/`nextLimit`.
fn next_period(schedule: &ChargingSchedule, elapsed: i64) -> Option<&ChargingSchedulePeriod> {
    schedule
        .charging_schedule_period
        .iter()
        .filter(|p| p.start_period > elapsed)
        .min_by_key(|p| p.start_period)
}

/// Evaluate a single profile's contribution at `now`: its effective watt
/// limit plus how long until the active period within it changes.
pub fn evaluate_profile(
    profile: &ChargingProfile,
    connector: &ConnectorConfig,
    now: DateTime<Utc>,
    transaction_start: Option<DateTime<Utc>>,
) -> Option<(f64, Option<i64>, Option<f64>)> {
    let elapsed = elapsed_seconds(profile, now, transaction_start)?;
    let schedule = &profile.charging_schedule;
    let period = active_period(schedule, elapsed)?;

    let mut watts = to_watts(period.limit, schedule.charging_rate_unit, period.number_phases, connector);
    if let Some(min_rate) = schedule.min_charging_rate {
        let min_watts = to_watts(min_rate, schedule.charging_rate_unit, period.number_phases, connector);
        watts = watts.max(min_watts);
    }
    watts = watts.clamp(0.0, connector.max_power_w);

    let next = next_period(schedule, elapsed);
    let next_change_in = next.map(|p| p.start_period - elapsed);
    let next_limit = next.map(|p| {
        to_watts(p.limit, schedule.charging_rate_unit, p.number_phases, connector).clamp(0.0, connector.max_power_w)
    });

    Some((watts, next_change_in, next_limit))
}

/// Select the effective limit among all active profiles on a connector,
/// per the purpose-priority/stack-level ordering.
pub fn select_effective(
    profiles: &[&ChargingProfile],
    connector: &ConnectorConfig,
    now: DateTime<Utc>,
    transaction_start: Option<DateTime<Utc>>,
) -> EffectiveLimit {
    let mut ordered: Vec<&&ChargingProfile> = profiles.iter().collect();
    ordered.sort_by(|a, b| {
        let pa = (a.charging_profile_purpose.priority(), a.stack_level);
        let pb = (b.charging_profile_purpose.priority(), b.stack_level);
        pb.cmp(&pa)
    });

    for profile in ordered {
        if let Some((watts, next_change_in, next_limit)) = evaluate_profile(profile, connector, now, transaction_start) {
            let period = active_period(&profile.charging_schedule, elapsed_seconds(profile, now, transaction_start).unwrap_or(0));
            return EffectiveLimit {
                limit_w: watts,
                raw_limit: period.map(|p| p.limit).unwrap_or(watts),
                raw_unit: profile.charging_schedule.charging_rate_unit,
                source_profile_id: Some(profile.id),
                source_purpose: Some(profile.charging_profile_purpose),
                stack_level: Some(profile.stack_level),
                next_change_in_s: next_change_in,
                next_limit_w: next_limit,
            };
        }
    }

    EffectiveLimit::physical_default(connector.max_power_w)
}

/// Compute the composite schedule over `[now, now + window)`. Returns
/// periods with `startPeriod` in seconds since `now`, in the unit
/// requested, with consecutive equal limits collapsed.
pub fn composite_schedule(
    profiles: &[&ChargingProfile],
    connector: &ConnectorConfig,
    now: DateTime<Utc>,
    transaction_start: Option<DateTime<Utc>>,
    window: ChronoDuration,
    requested_unit: ChargingRateUnit,
) -> ChargingSchedule {
    let window_end = now + window;

    let mut boundaries: Vec<i64> = vec![0];
    for profile in profiles {
        if let Some(origin) = origin(profile, now, transaction_start) {
            for period in &profile.charging_schedule.charging_schedule_period {
                let absolute = origin + ChronoDuration::seconds(period.start_period);
                if absolute >= now && absolute < window_end {
                    boundaries.push((absolute - now).num_seconds());
                }
            }
        }
        if let Some(valid_from) = profile.valid_from {
            if valid_from > now && valid_from < window_end {
                boundaries.push((valid_from - now).num_seconds());
            }
        }
        if let Some(valid_to) = profile.valid_to {
            if valid_to > now && valid_to < window_end {
                boundaries.push((valid_to - now).num_seconds());
            }
        }
    }

    boundaries.sort_unstable();
    boundaries.dedup();

    let mut result = Vec::new();
    for start in boundaries {
        let at = now + ChronoDuration::seconds(start);
        let effective = select_effective(profiles, connector, at, transaction_start);
        let limit = from_watts(effective.limit_w, requested_unit, None, connector);

        match result.last_mut() {
            Some(ChargingSchedulePeriod { limit: last_limit, .. }) if (*last_limit - limit).abs() < f64::EPSILON => {}
            _ => result.push(ChargingSchedulePeriod { start_period: start, limit, number_phases: None }),
        }
    }

    if result.is_empty() {
        result.push(ChargingSchedulePeriod {
            start_period: 0,
            limit: from_watts(connector.max_power_w, requested_unit, None, connector),
            number_phases: None,
        });
    }

    ChargingSchedule {
        duration: Some(window.num_seconds()),
        start_schedule: Some(now),
        charging_rate_unit: requested_unit,
        charging_schedule_period: result,
        min_charging_rate: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::types::ChargingProfilePurpose;
    use chrono::TimeZone;

    fn connector() -> ConnectorConfig {
        ConnectorConfig { voltage: 230.0, phases: 1, max_power_w: 22_000.0 }
    }

    fn absolute_profile(id: i64, stack_level: i32, purpose: ChargingProfilePurpose, limit: f64) -> ChargingProfile {
        ChargingProfile {
            id,
            transaction_id: None,
            stack_level,
            charging_profile_purpose: purpose,
            charging_profile_kind: ChargingProfileKind::Absolute,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                duration: None,
                start_schedule: None,
                charging_rate_unit: ChargingRateUnit::W,
                charging_schedule_period: vec![ChargingSchedulePeriod { start_period: 0, limit, number_phases: None }],
                min_charging_rate: None,
            },
        }
    }

    #[test]
    fn watt_profile_yields_its_own_limit() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let profile = absolute_profile(1, 0, ChargingProfilePurpose::TxDefaultProfile, 7000.0);
        let (watts, _, _) = evaluate_profile(&profile, &connector(), now, None).unwrap();
        assert_eq!(watts, 7000.0);
    }

    #[test]
    fn amp_profile_converts_with_connector_phase_fallback() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut profile = absolute_profile(1, 0, ChargingProfilePurpose::TxDefaultProfile, 16.0);
        profile.charging_schedule.charging_rate_unit = ChargingRateUnit::A;
        let (watts, _, _) = evaluate_profile(&profile, &connector(), now, None).unwrap();
        assert_eq!(watts, 16.0 * 230.0);
    }

    #[test]
    fn relative_profile_without_transaction_yields_no_limit() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut profile = absolute_profile(1, 0, ChargingProfilePurpose::TxProfile, 7000.0);
        profile.charging_profile_kind = ChargingProfileKind::Relative;
        assert!(evaluate_profile(&profile, &connector(), now, None).is_none());
    }

    #[test]
    fn selection_prefers_higher_purpose_then_stack_level() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let low_stack_default = absolute_profile(1, 0, ChargingProfilePurpose::TxDefaultProfile, 7000.0);
        let high_stack_default = absolute_profile(2, 1, ChargingProfilePurpose::TxDefaultProfile, 5000.0);
        let profiles = vec![&low_stack_default, &high_stack_default];
        let effective = select_effective(&profiles, &connector(), now, None);
        assert_eq!(effective.source_profile_id, Some(2));
        assert_eq!(effective.limit_w, 5000.0);
    }

    #[test]
    fn selection_falls_back_to_physical_default_with_no_active_profiles() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let effective = select_effective(&[], &connector(), now, None);
        assert_eq!(effective.limit_w, 22_000.0);
        assert!(effective.source_profile_id.is_none());
    }

    #[test]
    fn valid_to_equal_to_now_is_inactive() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut profile = absolute_profile(1, 0, ChargingProfilePurpose::TxDefaultProfile, 7000.0);
        profile.valid_to = Some(now);
        assert!(evaluate_profile(&profile, &connector(), now, None).is_none());
    }

    #[test]
    fn recurring_daily_crosses_midnight() {
        let anchor = Utc.with_ymd_and_hms(2025, 1, 1, 23, 0, 0).unwrap();
        let mut profile = absolute_profile(1, 0, ChargingProfilePurpose::TxDefaultProfile, 7000.0);
        profile.charging_profile_kind = ChargingProfileKind::Recurring;
        profile.recurrency_kind = Some(RecurrencyKind::Daily);
        profile.charging_schedule.start_schedule = Some(anchor);

        // one hour past midnight the next day: elapsed should be 2h since 23:00
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 1, 0, 0).unwrap();
        let elapsed = elapsed_seconds(&profile, now, None).unwrap();
        assert_eq!(elapsed, 2 * 3600);
    }
}
