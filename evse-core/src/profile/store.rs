//! Profile store: `profiles[connectorId][profileId]` for a single session,
//! with the SetChargingProfile acceptance path, ClearChargingProfile, and
//! the expiry sweeper.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::ocpp::types::{ChargingProfile, ChargingProfileKind, ChargingProfileStatus, ClearChargingProfileRequest, ClearChargingProfileStatus};

/// Per-(session, connector) charging profile partition. A session owns one
/// `ProfileStore`; it is single-writer, mutated only from the owning
/// session task.
#[derive(Debug, Default)]
pub struct ProfileStore {
    connectors: HashMap<i32, HashMap<i64, ChargingProfile>>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate shape: required fields, non-empty periods, strictly
    /// increasing non-negative `startPeriod`, non-negative limits.
    fn validate(profile: &ChargingProfile) -> Result<(), String> {
        if profile.stack_level < 0 {
            return Err("stackLevel must be >= 0".into());
        }
        let periods = &profile.charging_schedule.charging_schedule_period;
        if periods.is_empty() {
            return Err("schedule must have at least one period".into());
        }
        let mut last_start: Option<i64> = None;
        for period in periods {
            if period.start_period < 0 {
                return Err("period.startPeriod must be >= 0".into());
            }
            if let Some(last) = last_start {
                if period.start_period <= last {
                    return Err("period.startPeriod must be strictly increasing".into());
                }
            }
            last_start = Some(period.start_period);
            if period.limit < 0.0 {
                return Err("period.limit must be >= 0".into());
            }
            if let Some(phases) = period.number_phases {
                if !(1..=3).contains(&phases) {
                    return Err("numberPhases must be 1..3".into());
                }
            }
        }
        Ok(())
    }

    /// Accept a SetChargingProfile request. `active_transaction` is the
    /// transaction id currently open on this connector, if any.
    pub fn accept(
        &mut self,
        connector_id: i32,
        profile: ChargingProfile,
        active_transaction: Option<i32>,
    ) -> ChargingProfileStatus {
        if let Err(_reason) = Self::validate(&profile) {
            return ChargingProfileStatus::Rejected;
        }

        if profile.charging_profile_kind == ChargingProfileKind::Relative
            && !matches!(profile.charging_profile_purpose, crate::ocpp::types::ChargingProfilePurpose::TxProfile)
        {
            return ChargingProfileStatus::Rejected;
        }

        if let Some(tx_id) = profile.transaction_id {
            if active_transaction != Some(tx_id) {
                return ChargingProfileStatus::Rejected;
            }
        }
        // TxProfile with no transactionId is accepted provisionally and
        // matched against whichever transaction is active at evaluation
        // time.

        let purpose = profile.charging_profile_purpose;
        let stack_level = profile.stack_level;
        let entry = self.connectors.entry(connector_id).or_default();

        entry.retain(|_, existing| {
            !(existing.charging_profile_purpose == purpose && existing.stack_level <= stack_level)
        });

        entry.insert(profile.id, profile);
        ChargingProfileStatus::Accepted
    }

    /// Clear profiles matching every provided criterion.
    /// Returns the status and the (connectorId, profileId) pairs removed.
    pub fn clear(&mut self, criteria: &ClearChargingProfileRequest) -> (ClearChargingProfileStatus, Vec<(i32, i64)>) {
        let mut removed = Vec::new();

        for (&connector_id, profiles) in self.connectors.iter_mut() {
            if let Some(wanted_connector) = criteria.connector_id {
                if wanted_connector != connector_id {
                    continue;
                }
            }
            profiles.retain(|&profile_id, profile| {
                let matches = criteria.id.map_or(true, |id| id == profile_id)
                    && criteria.charging_profile_purpose.map_or(true, |p| p == profile.charging_profile_purpose)
                    && criteria.stack_level.map_or(true, |s| s == profile.stack_level);

                if matches {
                    removed.push((connector_id, profile_id));
                }
                !matches
            });
        }

        if removed.is_empty() {
            (ClearChargingProfileStatus::Unknown, removed)
        } else {
            (ClearChargingProfileStatus::Accepted, removed)
        }
    }

    /// Remove profiles past their `validTo`, or Absolute profiles past
    /// `start + duration`. Returns the (connectorId, profileId) pairs
    /// removed so the caller can emit `ProfileExpired` events.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<(i32, i64)> {
        let mut removed = Vec::new();
        for (&connector_id, profiles) in self.connectors.iter_mut() {
            profiles.retain(|&profile_id, profile| {
                let expired = match profile.valid_to {
                    Some(to) if now >= to => true,
                    _ => match (profile.charging_profile_kind, profile.charging_schedule.duration) {
                        (ChargingProfileKind::Absolute, Some(duration)) => {
                            let start = profile.charging_schedule.start_schedule.or(profile.valid_from).unwrap_or(now);
                            now >= start + chrono::Duration::seconds(duration)
                        }
                        _ => false,
                    },
                };
                if expired {
                    removed.push((connector_id, profile_id));
                }
                !expired
            });
        }
        removed
    }

    pub fn profiles_for(&self, connector_id: i32) -> Vec<&ChargingProfile> {
        self.connectors.get(&connector_id).map(|m| m.values().collect()).unwrap_or_default()
    }

    pub fn connector_ids(&self) -> Vec<i32> {
        self.connectors.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::types::{ChargingProfilePurpose, ChargingRateUnit, ChargingSchedule, ChargingSchedulePeriod};

    fn profile(id: i64, stack_level: i32, purpose: ChargingProfilePurpose) -> ChargingProfile {
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
                charging_schedule_period: vec![ChargingSchedulePeriod { start_period: 0, limit: 7000.0, number_phases: None }],
                min_charging_rate: None,
            },
        }
    }

    #[test]
    fn stacking_eviction_removes_lower_or_equal_same_purpose() {
        let mut store = ProfileStore::new();
        assert_eq!(
            store.accept(1, profile(1, 0, ChargingProfilePurpose::TxDefaultProfile), None),
            ChargingProfileStatus::Accepted
        );
        assert_eq!(
            store.accept(1, profile(2, 1, ChargingProfilePurpose::TxDefaultProfile), None),
            ChargingProfileStatus::Accepted
        );
        // id=3 stack=0 replaces id=1 (stack 0 <= 0) but not id=2 (stack 1 > 0)
        assert_eq!(
            store.accept(1, profile(3, 0, ChargingProfilePurpose::TxDefaultProfile), None),
            ChargingProfileStatus::Accepted
        );

        let remaining: Vec<i64> = store.profiles_for(1).iter().map(|p| p.id).collect();
        assert!(remaining.contains(&2));
        assert!(remaining.contains(&3));
        assert!(!remaining.contains(&1));
    }

    #[test]
    fn tx_profile_with_unmatched_transaction_id_is_rejected() {
        let mut store = ProfileStore::new();
        let mut p = profile(1, 0, ChargingProfilePurpose::TxProfile);
        p.transaction_id = Some(99);
        assert_eq!(store.accept(1, p, Some(1)), ChargingProfileStatus::Rejected);
    }

    #[test]
    fn clear_by_purpose_then_unknown_on_repeat() {
        let mut store = ProfileStore::new();
        store.accept(1, profile(1, 0, ChargingProfilePurpose::TxDefaultProfile), None);
        store.accept(1, profile(2, 0, ChargingProfilePurpose::TxProfile), None);

        let criteria = ClearChargingProfileRequest {
            charging_profile_purpose: Some(ChargingProfilePurpose::TxDefaultProfile),
            ..Default::default()
        };
        let (status, removed) = store.clear(&criteria);
        assert_eq!(status, ClearChargingProfileStatus::Accepted);
        assert_eq!(removed, vec![(1, 1)]);

        let (status2, removed2) = store.clear(&criteria);
        assert_eq!(status2, ClearChargingProfileStatus::Unknown);
        assert!(removed2.is_empty());
    }

    #[test]
    fn rejects_non_increasing_periods() {
        let mut store = ProfileStore::new();
        let mut p = profile(1, 0, ChargingProfilePurpose::TxDefaultProfile);
        p.charging_schedule.charging_schedule_period.push(ChargingSchedulePeriod {
            start_period: 0,
            limit: 1000.0,
            number_phases: None,
        });
        assert_eq!(store.accept(1, p, None), ChargingProfileStatus::Rejected);
    }
}
