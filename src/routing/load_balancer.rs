//! Load-balancing policies over a pre-filtered candidate list
//!
//! Selection never mutates candidates. The only owned state is one
//! round-robin counter per consumer key.

use super::criteria::{MeshMember, SelectionCriteria};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Load balancing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    LeastResponseTime,
    Random,
    /// Same user, session or request id always lands on the same candidate
    ConsistentHash,
    /// Best capability coverage and track record
    CapabilityBased,
    /// Weighted blend of capability, load and performance scores
    Intelligent,
}

/// Chooses one candidate per policy
#[derive(Debug, Default)]
pub struct LoadBalancer {
    round_robin_counters: Mutex<HashMap<String, Arc<AtomicUsize>>>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select one candidate, `None` for an empty list
    pub fn select<'c, T: MeshMember>(
        &self,
        strategy: LoadBalancingStrategy,
        criteria: &SelectionCriteria,
        candidates: &'c [T],
    ) -> Option<&'c T> {
        if candidates.is_empty() {
            return None;
        }
        let key = criteria.balancing_key();

        let index = match strategy {
            LoadBalancingStrategy::RoundRobin => self.next_tick(key) % candidates.len(),
            LoadBalancingStrategy::WeightedRoundRobin => self.weighted_index(key, candidates),
            LoadBalancingStrategy::LeastConnections => {
                arg_min_by(candidates, |c| c.load())
            }
            LoadBalancingStrategy::LeastResponseTime => {
                arg_min_by(candidates, |c| c.avg_response_time_ms())
            }
            LoadBalancingStrategy::Random => rand::thread_rng().gen_range(0..candidates.len()),
            LoadBalancingStrategy::ConsistentHash => {
                (stable_hash(criteria.affinity_key()) % candidates.len() as u64) as usize
            }
            LoadBalancingStrategy::CapabilityBased => {
                arg_max_by(candidates, |c| capability_score(c, criteria))
            }
            LoadBalancingStrategy::Intelligent => {
                arg_max_by(candidates, |c| intelligent_score(c, criteria))
            }
        };

        let chosen = candidates.get(index)?;
        debug!(
            ?strategy,
            key,
            selected = chosen.member_id(),
            candidates = candidates.len(),
            "Selected candidate"
        );
        Some(chosen)
    }

    /// Forget all round-robin positions
    pub fn reset_counters(&self) {
        self.counters().clear();
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AtomicUsize>>> {
        self.round_robin_counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_tick(&self, key: &str) -> usize {
        let counter = {
            let mut counters = self.counters();
            Arc::clone(counters.entry(key.to_string()).or_default())
        };
        counter.fetch_add(1, Ordering::Relaxed)
    }

    fn weighted_index<T: MeshMember>(&self, key: &str, candidates: &[T]) -> usize {
        let total: u64 = candidates.iter().map(|c| u64::from(c.weight().max(1))).sum();
        let mut position = (self.next_tick(key) as u64) % total.max(1);
        for (index, candidate) in candidates.iter().enumerate() {
            let weight = u64::from(candidate.weight().max(1));
            if position < weight {
                return index;
            }
            position -= weight;
        }
        0
    }
}

/// Index of the smallest value; ties go to the earliest candidate
fn arg_min_by<T>(candidates: &[T], value: impl Fn(&T) -> f64) -> usize {
    candidates
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| value(a).total_cmp(&value(b)))
        .map(|(index, _)| index)
        .unwrap_or(0)
}

/// Index of the largest value; ties go to the earliest candidate
fn arg_max_by<T>(candidates: &[T], value: impl Fn(&T) -> f64) -> usize {
    arg_min_by(candidates, |c| -value(c))
}

/// First 8 bytes of SHA-256, stable across processes and restarts
fn stable_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

fn response_time_score(avg_response_time_ms: f64) -> f64 {
    1.0 / avg_response_time_ms.max(1.0)
}

/// Preferred-capability coverage, success rate and speed
pub fn capability_score<T: MeshMember>(member: &T, criteria: &SelectionCriteria) -> f64 {
    criteria.capability_coverage(member) * 0.5
        + member.success_rate() * 0.3
        + response_time_score(member.avg_response_time_ms()) * 0.2
}

/// Headroom left on the member, 1.0 when idle
pub fn load_score<T: MeshMember>(member: &T) -> f64 {
    1.0 - member.load().clamp(0.0, 1.0)
}

/// Success rate blended with response time in seconds
pub fn performance_score<T: MeshMember>(member: &T) -> f64 {
    let seconds = member.avg_response_time_ms() / 1000.0;
    member.success_rate() * 0.7 + (1.0 / seconds.max(1.0)) * 0.3
}

pub fn intelligent_score<T: MeshMember>(member: &T, criteria: &SelectionCriteria) -> f64 {
    capability_score(member, criteria) * 0.4
        + load_score(member) * 0.3
        + performance_score(member) * 0.3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::criteria::CAPABILITIES_METADATA_KEY;
    use crate::service::{Endpoint, ServiceInstance, ServiceStatus};

    fn fleet() -> Vec<ServiceInstance> {
        ["a", "b", "c"]
            .iter()
            .map(|id| {
                ServiceInstance::new(*id, *id, "diagnosis", Endpoint::http("127.0.0.1", 80, false))
                    .with_status(ServiceStatus::Healthy)
            })
            .collect()
    }

    fn ids<'a>(picks: impl Iterator<Item = &'a ServiceInstance>) -> Vec<&'a str> {
        picks.map(|s| s.id.as_str()).collect()
    }

    fn keyed(key: &str) -> SelectionCriteria {
        SelectionCriteria::new().with_consumer_key(key)
    }

    #[test]
    fn test_round_robin_cycles_in_order() {
        let balancer = LoadBalancer::new();
        let fleet = fleet();
        let criteria = SelectionCriteria::for_type("diagnosis");

        let picks = (0..6)
            .filter_map(|_| balancer.select(LoadBalancingStrategy::RoundRobin, &criteria, &fleet));

        assert_eq!(ids(picks), vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_round_robin_keys_are_independent() {
        let balancer = LoadBalancer::new();
        let fleet = fleet();

        balancer.select(LoadBalancingStrategy::RoundRobin, &keyed("ui"), &fleet);
        balancer.select(LoadBalancingStrategy::RoundRobin, &keyed("ui"), &fleet);
        let other = balancer.select(LoadBalancingStrategy::RoundRobin, &keyed("cli"), &fleet);

        assert_eq!(other.unwrap().id, "a");
    }

    #[test]
    fn test_least_connections_breaks_ties_by_order() {
        let balancer = LoadBalancer::new();
        let mut fleet = fleet();
        fleet[0].capacity.current_load = 0.5;
        fleet[1].capacity.current_load = 0.2;
        fleet[2].capacity.current_load = 0.2;

        let chosen = balancer.select(LoadBalancingStrategy::LeastConnections, &keyed("k"), &fleet);
        assert_eq!(chosen.unwrap().id, "b");
    }

    #[test]
    fn test_least_response_time() {
        let balancer = LoadBalancer::new();
        let mut fleet = fleet();
        fleet[0].performance.avg_response_time_ms = 120.0;
        fleet[1].performance.avg_response_time_ms = 300.0;
        fleet[2].performance.avg_response_time_ms = 45.0;

        let chosen = balancer.select(LoadBalancingStrategy::LeastResponseTime, &keyed("k"), &fleet);
        assert_eq!(chosen.unwrap().id, "c");
    }

    #[test]
    fn test_weighted_round_robin_respects_weights() {
        let balancer = LoadBalancer::new();
        let mut fleet = fleet();
        fleet[0].metadata.insert("weight".to_string(), "3".to_string());
        let criteria = keyed("k");

        let picks = (0..5).filter_map(|_| {
            balancer.select(LoadBalancingStrategy::WeightedRoundRobin, &criteria, &fleet)
        });

        assert_eq!(ids(picks), vec!["a", "a", "a", "b", "c"]);
    }

    #[test]
    fn test_random_picks_a_candidate() {
        let balancer = LoadBalancer::new();
        let fleet = fleet();
        for _ in 0..20 {
            let chosen = balancer
                .select(LoadBalancingStrategy::Random, &keyed("k"), &fleet)
                .unwrap();
            assert!(fleet.iter().any(|s| s.id == chosen.id));
        }
    }

    #[test]
    fn test_consistent_hash_is_sticky_per_user() {
        let balancer = LoadBalancer::new();
        let fleet = fleet();
        let criteria = SelectionCriteria::for_type("diagnosis").for_user("user-42");

        let first = balancer
            .select(LoadBalancingStrategy::ConsistentHash, &criteria, &fleet)
            .unwrap()
            .id
            .clone();
        for _ in 0..10 {
            let again = balancer
                .select(LoadBalancingStrategy::ConsistentHash, &criteria, &fleet)
                .unwrap();
            assert_eq!(again.id, first);
        }

        let expected = (stable_hash("user-42") % fleet.len() as u64) as usize;
        assert_eq!(fleet[expected].id, first);
    }

    #[test]
    fn test_consistent_hash_prefers_user_over_session() {
        let balancer = LoadBalancer::new();
        let fleet = fleet();
        let with_session = SelectionCriteria::new().for_user("u").in_session("s1");
        let other_session = SelectionCriteria::new().for_user("u").in_session("s2");

        let a = balancer.select(LoadBalancingStrategy::ConsistentHash, &with_session, &fleet);
        let b = balancer.select(LoadBalancingStrategy::ConsistentHash, &other_session, &fleet);
        assert_eq!(a.unwrap().id, b.unwrap().id);
    }

    #[test]
    fn test_stable_hash_is_deterministic() {
        assert_eq!(stable_hash("session-1"), stable_hash("session-1"));
        assert_ne!(stable_hash("session-1"), stable_hash("session-2"));
    }

    #[test]
    fn test_capability_based_prefers_coverage() {
        let balancer = LoadBalancer::new();
        let mut fleet = fleet();
        fleet[2]
            .metadata
            .insert(CAPABILITIES_METADATA_KEY.to_string(), "triage, imaging".to_string());
        let criteria = SelectionCriteria::new()
            .preferring_capability("triage")
            .preferring_capability("imaging");

        let chosen = balancer.select(LoadBalancingStrategy::CapabilityBased, &criteria, &fleet);
        assert_eq!(chosen.unwrap().id, "c");
    }

    #[test]
    fn test_capability_based_falls_back_to_track_record() {
        let balancer = LoadBalancer::new();
        let mut fleet = fleet();
        fleet[0].performance.error_rate = 0.4;
        fleet[1].performance.error_rate = 0.0;
        fleet[2].performance.error_rate = 0.1;

        let chosen = balancer.select(LoadBalancingStrategy::CapabilityBased, &keyed("k"), &fleet);
        assert_eq!(chosen.unwrap().id, "b");
    }

    #[test]
    fn test_capability_based_ties_go_to_first() {
        let balancer = LoadBalancer::new();
        let fleet = fleet();
        let chosen = balancer.select(LoadBalancingStrategy::CapabilityBased, &keyed("k"), &fleet);
        assert_eq!(chosen.unwrap().id, "a");
    }

    #[test]
    fn test_intelligent_avoids_loaded_and_failing() {
        let balancer = LoadBalancer::new();
        let mut fleet = fleet();
        fleet[0].capacity.current_load = 0.9;
        fleet[1].performance.error_rate = 0.6;
        fleet[2].capacity.current_load = 0.1;

        let chosen = balancer.select(LoadBalancingStrategy::Intelligent, &keyed("k"), &fleet);
        assert_eq!(chosen.unwrap().id, "c");
    }

    #[test]
    fn test_scores_stay_in_unit_range() {
        let criteria = SelectionCriteria::new().preferring_capability("triage");
        let mut member = fleet().remove(0);
        member.capacity.current_load = 3.0;
        member.performance.avg_response_time_ms = 0.0;

        for score in [
            capability_score(&member, &criteria),
            load_score(&member),
            performance_score(&member),
            intelligent_score(&member, &criteria),
        ] {
            assert!((0.0..=1.0).contains(&score), "score {score}");
        }
    }

    #[test]
    fn test_empty_candidates_yield_none() {
        let balancer = LoadBalancer::new();
        let empty: Vec<ServiceInstance> = Vec::new();
        for strategy in [
            LoadBalancingStrategy::RoundRobin,
            LoadBalancingStrategy::WeightedRoundRobin,
            LoadBalancingStrategy::LeastConnections,
            LoadBalancingStrategy::LeastResponseTime,
            LoadBalancingStrategy::Random,
            LoadBalancingStrategy::ConsistentHash,
            LoadBalancingStrategy::CapabilityBased,
            LoadBalancingStrategy::Intelligent,
        ] {
            assert!(balancer.select(strategy, &keyed("k"), &empty).is_none());
        }
    }

    #[test]
    fn test_strategy_names_parse() {
        let parsed: LoadBalancingStrategy = serde_json::from_str("\"consistent_hash\"").unwrap();
        assert_eq!(parsed, LoadBalancingStrategy::ConsistentHash);
        let parsed: LoadBalancingStrategy = serde_json::from_str("\"intelligent\"").unwrap();
        assert_eq!(parsed, LoadBalancingStrategy::Intelligent);
    }

    #[test]
    fn test_reset_counters_restarts_rotation() {
        let balancer = LoadBalancer::new();
        let fleet = fleet();
        balancer.select(LoadBalancingStrategy::RoundRobin, &keyed("k"), &fleet);
        balancer.reset_counters();

        let chosen = balancer.select(LoadBalancingStrategy::RoundRobin, &keyed("k"), &fleet);
        assert_eq!(chosen.unwrap().id, "a");
    }
}
