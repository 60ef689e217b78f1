//! The decision engine (§4.6): one pure evaluation per decision tick.
//!
//! Takes a snapshot of eligible members, their scores, the current
//! incumbent, and the predictive/manual/cap inputs, and produces at most
//! one [`Decision`]. Mirrors the teacher's `ModemSupervisor` in spirit —
//! collate inputs, evaluate hysteresis-guarded thresholds, emit events —
//! generalized from "flag a degraded link" to "elect an active member."

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uplinkd_common::{Config, Decision, Member, MemberClass, QuotaDescriptor, Score, TriggerReason};

/// Tie-break class preference: lower rank wins. Wired LAN is the most
/// deterministic transport and ranks first; generic (unclassified) last.
/// Resolved as an explicit open question — see `DESIGN.md`.
fn class_rank(class: MemberClass) -> u8 {
    match class {
        MemberClass::Lan => 0,
        MemberClass::Starlink => 1,
        MemberClass::Wifi => 2,
        MemberClass::Cellular => 3,
        MemberClass::Generic => 4,
    }
}

/// Total order key for challenger selection: `(final desc, priority desc,
/// class preference asc, name asc)` (§4.6).
fn rank_key(member: &Member, score: &Score) -> (i64, i64, u8, String) {
    // Negate so that sorting ascending on this tuple yields descending
    // final/priority order while keeping class/name ascending.
    let final_bucket = -((score.r#final * 1000.0).round() as i64);
    (final_bucket, -(member.priority as i64), class_rank(member.class), member.name.clone())
}

fn best_of<'a>(members: &'a [&'a Member], scores: &HashMap<String, Score>) -> Option<&'a Member> {
    members
        .iter()
        .copied()
        .min_by_key(|m| {
            let score = scores.get(&m.name).cloned().unwrap_or_else(Score::zero);
            rank_key(m, &score)
        })
}

/// Everything the decision engine needs for one evaluation cycle.
pub struct DecisionInput<'a> {
    /// Members that passed §3 eligibility (administrative + connected +
    /// sample-freshness + cap checks) as of this tick.
    pub eligible: Vec<&'a Member>,
    pub scores: &'a HashMap<String, Score>,
    pub incumbent: Option<&'a str>,
    pub last_switch_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    pub config: &'a Config,
    /// Operator-pinned member from the `failover` RPC method, if any.
    pub manual_override: Option<&'a str>,
    /// Predictive risk per member name, in `[0, 1]`. Empty/absent entries
    /// are treated as zero risk.
    pub predictive_risks: &'a HashMap<String, f64>,
    /// Quota descriptors for metered members, keyed by name.
    pub quotas: &'a HashMap<String, QuotaDescriptor>,
}

impl<'a> DecisionInput<'a> {
    fn scores_snapshot(&self) -> HashMap<String, Score> {
        self.eligible
            .iter()
            .map(|m| {
                let score = self.scores.get(&m.name).cloned().unwrap_or_else(Score::zero);
                (m.name.clone(), score)
            })
            .collect()
    }

    fn find(&self, name: &str) -> Option<&'a Member> {
        self.eligible.iter().copied().find(|m| m.name == name)
    }

    fn score_of(&self, name: &str) -> Score {
        self.scores.get(name).cloned().unwrap_or_else(Score::zero)
    }

    fn challenger(&self) -> Option<&'a Member> {
        best_of(&self.eligible, self.scores)
    }

    fn challenger_excluding(&self, exclude: &str) -> Option<&'a Member> {
        let filtered: Vec<&Member> = self
            .eligible
            .iter()
            .copied()
            .filter(|m| m.name != exclude)
            .collect();
        best_of(&filtered, self.scores)
    }

    fn incumbent_member(&self) -> Option<&'a Member> {
        self.incumbent.and_then(|name| self.find(name))
    }

    fn risk_of(&self, name: &str) -> f64 {
        self.predictive_risks.get(name).copied().unwrap_or(0.0)
    }

    fn hysteresis_elapsed(&self) -> bool {
        match self.last_switch_at {
            None => true,
            Some(last) => {
                let elapsed = (self.now - last).num_milliseconds().max(0) as u64;
                elapsed >= self.config.min_uptime_ms
            }
        }
    }

    fn decision(&self, elected: Option<&Member>, reason: String, triggered_by: TriggerReason) -> Decision {
        Decision {
            timestamp: self.now,
            elected_member: elected.map(|m| m.name.clone()),
            previous_member: self.incumbent.map(|s| s.to_string()),
            reason,
            scores_snapshot: self.scores_snapshot(),
            predictive_risk: elected.map(|m| self.risk_of(&m.name)).unwrap_or(0.0),
            triggered_by,
        }
    }
}

/// Evaluates one decision tick. Returns `None` when no trigger fires and
/// the incumbent should be left in place untouched.
pub fn decide(input: &DecisionInput) -> Option<Decision> {
    // Manual override takes precedence over every other trigger.
    if let Some(target_name) = input.manual_override {
        if let Some(target) = input.find(target_name) {
            if input.incumbent == Some(target.name.as_str()) {
                return None;
            }
            return Some(input.decision(
                Some(target),
                format!("operator pinned {}", target.name),
                TriggerReason::Manual,
            ));
        }
        // Override target is no longer eligible: fall back to recovery.
        let challenger = input.challenger();
        return Some(input.decision(
            challenger,
            "manual override target no longer eligible".to_string(),
            TriggerReason::Recovery,
        ));
    }

    let incumbent = input.incumbent_member();
    if incumbent.is_none() {
        let challenger = input.challenger();
        if challenger.is_none() && input.incumbent.is_none() {
            return None;
        }
        let reason = if input.incumbent.is_some() {
            "incumbent no longer eligible".to_string()
        } else {
            "no incumbent".to_string()
        };
        return Some(input.decision(challenger, reason, TriggerReason::Recovery));
    }
    let incumbent = incumbent.unwrap();
    let incumbent_score = input.score_of(&incumbent.name);

    // Cap trigger: incumbent metered and at emergency usage.
    if let Some(quota) = input.quotas.get(&incumbent.name) {
        if quota.is_emergency() {
            let non_metered: Vec<&Member> = input
                .eligible
                .iter()
                .copied()
                .filter(|m| !input.quotas.get(&m.name).is_some_and(|q| q.is_emergency()))
                .collect();
            if let Some(best) = best_of(&non_metered, input.scores) {
                if best.name != incumbent.name {
                    return Some(input.decision(
                        Some(best),
                        format!("{} hit emergency data cap", incumbent.name),
                        TriggerReason::Cap,
                    ));
                }
            }
        }
    }

    // Score trigger.
    if let Some(challenger) = input.challenger_excluding(&incumbent.name) {
        let challenger_score = input.score_of(&challenger.name);
        if challenger_score.r#final - incumbent_score.r#final >= input.config.switch_margin
            && input.hysteresis_elapsed()
        {
            return Some(input.decision(
                Some(challenger),
                format!(
                    "{} exceeded {} by {:.1}",
                    challenger.name,
                    incumbent.name,
                    challenger_score.r#final - incumbent_score.r#final
                ),
                TriggerReason::Score,
            ));
        }
    }

    // Predictive trigger.
    if input.config.predictive {
        let risk = input.risk_of(&incumbent.name);
        if risk >= input.config.predictive_threshold {
            if let Some(challenger) = input.challenger_excluding(&incumbent.name) {
                let challenger_score = input.score_of(&challenger.name);
                if challenger_score.r#final >= incumbent_score.r#final - input.config.switch_margin / 2.0
                {
                    return Some(input.decision(
                        Some(challenger),
                        format!("{} predictive risk {:.2}", incumbent.name, risk),
                        TriggerReason::Predictive,
                    ));
                }
            }
        }
    }

    None
}

/// Builds a `Decision` recording a controller-initiated rollback (§4.7):
/// verification failed after an apply, so the controller reverted to the
/// previous member. Kept here so rollback history entries are shaped
/// identically to election decisions.
pub fn rollback_decision(
    now: DateTime<Utc>,
    elected_member: Option<String>,
    previous_member: Option<String>,
    scores_snapshot: HashMap<String, Score>,
) -> Decision {
    Decision {
        timestamp: now,
        reason: "verification failed, rolled back".to_string(),
        predictive_risk: 0.0,
        triggered_by: TriggerReason::Rollback,
        elected_member,
        previous_member,
        scores_snapshot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uplinkd_common::{MemberState, Trend};

    fn member(name: &str, class: MemberClass, priority: i32) -> Member {
        let mut m = Member::new(name, class, name);
        m.priority = priority;
        m.state = MemberState::Eligible;
        m
    }

    fn score(final_score: f64) -> Score {
        Score {
            instant: final_score,
            window_average: final_score,
            ewma: final_score,
            r#final: final_score,
            trend: Trend::Stable,
            confidence: 1.0,
        }
    }

    fn base_config() -> Config {
        Config {
            switch_margin: 10.0,
            min_uptime_ms: 30_000,
            predictive: false,
            predictive_threshold: 0.75,
            ..Config::default()
        }
    }

    #[test]
    fn no_incumbent_elects_best_challenger() {
        let a = member("a", MemberClass::Lan, 0);
        let b = member("b", MemberClass::Lan, 0);
        let scores: HashMap<String, Score> =
            [("a".to_string(), score(50.0)), ("b".to_string(), score(90.0))]
                .into_iter()
                .collect();
        let config = base_config();
        let input = DecisionInput {
            eligible: vec![&a, &b],
            scores: &scores,
            incumbent: None,
            last_switch_at: None,
            now: Utc::now(),
            config: &config,
            manual_override: None,
            predictive_risks: &HashMap::new(),
            quotas: &HashMap::new(),
        };
        let decision = decide(&input).unwrap();
        assert_eq!(decision.elected_member.as_deref(), Some("b"));
        assert_eq!(decision.triggered_by, TriggerReason::Recovery);
    }

    #[test]
    fn incumbent_no_longer_eligible_triggers_recovery() {
        let b = member("b", MemberClass::Lan, 0);
        let scores: HashMap<String, Score> =
            [("b".to_string(), score(70.0))].into_iter().collect();
        let config = base_config();
        let input = DecisionInput {
            eligible: vec![&b],
            scores: &scores,
            incumbent: Some("a"),
            last_switch_at: None,
            now: Utc::now(),
            config: &config,
            manual_override: None,
            predictive_risks: &HashMap::new(),
            quotas: &HashMap::new(),
        };
        let decision = decide(&input).unwrap();
        assert_eq!(decision.elected_member.as_deref(), Some("b"));
        assert_eq!(decision.triggered_by, TriggerReason::Recovery);
    }

    #[test]
    fn score_trigger_requires_margin_and_hysteresis() {
        let a = member("a", MemberClass::Lan, 0);
        let b = member("b", MemberClass::Lan, 0);
        let scores: HashMap<String, Score> =
            [("a".to_string(), score(50.0)), ("b".to_string(), score(55.0))]
                .into_iter()
                .collect();
        let config = base_config();
        let input = DecisionInput {
            eligible: vec![&a, &b],
            scores: &scores,
            incumbent: Some("a"),
            last_switch_at: None,
            now: Utc::now(),
            config: &config,
            manual_override: None,
            predictive_risks: &HashMap::new(),
            quotas: &HashMap::new(),
        };
        // Only 5-point gap, below the 10-point switch_margin.
        assert!(decide(&input).is_none());
    }

    #[test]
    fn score_trigger_fires_beyond_margin_after_hysteresis() {
        let a = member("a", MemberClass::Lan, 0);
        let b = member("b", MemberClass::Lan, 0);
        let scores: HashMap<String, Score> =
            [("a".to_string(), score(50.0)), ("b".to_string(), score(70.0))]
                .into_iter()
                .collect();
        let config = base_config();
        let input = DecisionInput {
            eligible: vec![&a, &b],
            scores: &scores,
            incumbent: Some("a"),
            last_switch_at: Some(Utc::now() - Duration::milliseconds(60_000)),
            now: Utc::now(),
            config: &config,
            manual_override: None,
            predictive_risks: &HashMap::new(),
            quotas: &HashMap::new(),
        };
        let decision = decide(&input).unwrap();
        assert_eq!(decision.elected_member.as_deref(), Some("b"));
        assert_eq!(decision.triggered_by, TriggerReason::Score);
    }

    #[test]
    fn score_trigger_blocked_by_hysteresis_window() {
        let a = member("a", MemberClass::Lan, 0);
        let b = member("b", MemberClass::Lan, 0);
        let scores: HashMap<String, Score> =
            [("a".to_string(), score(50.0)), ("b".to_string(), score(70.0))]
                .into_iter()
                .collect();
        let config = base_config();
        let input = DecisionInput {
            eligible: vec![&a, &b],
            scores: &scores,
            incumbent: Some("a"),
            last_switch_at: Some(Utc::now() - Duration::milliseconds(1_000)),
            now: Utc::now(),
            config: &config,
            manual_override: None,
            predictive_risks: &HashMap::new(),
            quotas: &HashMap::new(),
        };
        assert!(decide(&input).is_none());
    }

    #[test]
    fn manual_override_wins_even_with_worse_score() {
        let a = member("a", MemberClass::Lan, 0);
        let b = member("b", MemberClass::Lan, 0);
        let scores: HashMap<String, Score> =
            [("a".to_string(), score(90.0)), ("b".to_string(), score(10.0))]
                .into_iter()
                .collect();
        let config = base_config();
        let input = DecisionInput {
            eligible: vec![&a, &b],
            scores: &scores,
            incumbent: Some("a"),
            last_switch_at: None,
            now: Utc::now(),
            config: &config,
            manual_override: Some("b"),
            predictive_risks: &HashMap::new(),
            quotas: &HashMap::new(),
        };
        let decision = decide(&input).unwrap();
        assert_eq!(decision.elected_member.as_deref(), Some("b"));
        assert_eq!(decision.triggered_by, TriggerReason::Manual);
    }

    #[test]
    fn manual_override_falls_back_when_target_ineligible() {
        let a = member("a", MemberClass::Lan, 0);
        let scores: HashMap<String, Score> =
            [("a".to_string(), score(50.0))].into_iter().collect();
        let config = base_config();
        let input = DecisionInput {
            eligible: vec![&a],
            scores: &scores,
            incumbent: Some("a"),
            last_switch_at: None,
            now: Utc::now(),
            config: &config,
            manual_override: Some("missing"),
            predictive_risks: &HashMap::new(),
            quotas: &HashMap::new(),
        };
        let decision = decide(&input).unwrap();
        assert_eq!(decision.elected_member.as_deref(), Some("a"));
        assert_eq!(decision.triggered_by, TriggerReason::Recovery);
    }

    #[test]
    fn predictive_trigger_requires_comparable_challenger() {
        let a = member("a", MemberClass::Lan, 0);
        let b = member("b", MemberClass::Lan, 0);
        let scores: HashMap<String, Score> =
            [("a".to_string(), score(50.0)), ("b".to_string(), score(47.0))]
                .into_iter()
                .collect();
        let mut config = base_config();
        config.predictive = true;
        config.predictive_threshold = 0.75;
        let risks: HashMap<String, f64> = [("a".to_string(), 0.9)].into_iter().collect();
        let input = DecisionInput {
            eligible: vec![&a, &b],
            scores: &scores,
            incumbent: Some("a"),
            last_switch_at: Some(Utc::now() - Duration::milliseconds(60_000)),
            now: Utc::now(),
            config: &config,
            manual_override: None,
            predictive_risks: &risks,
            quotas: &HashMap::new(),
        };
        let decision = decide(&input).unwrap();
        assert_eq!(decision.elected_member.as_deref(), Some("b"));
        assert_eq!(decision.triggered_by, TriggerReason::Predictive);
    }

    #[test]
    fn predictive_trigger_does_not_fire_without_comparable_challenger() {
        let a = member("a", MemberClass::Lan, 0);
        let b = member("b", MemberClass::Lan, 0);
        let scores: HashMap<String, Score> =
            [("a".to_string(), score(80.0)), ("b".to_string(), score(10.0))]
                .into_iter()
                .collect();
        let mut config = base_config();
        config.predictive = true;
        let risks: HashMap<String, f64> = [("a".to_string(), 0.9)].into_iter().collect();
        let input = DecisionInput {
            eligible: vec![&a, &b],
            scores: &scores,
            incumbent: Some("a"),
            last_switch_at: Some(Utc::now() - Duration::milliseconds(60_000)),
            now: Utc::now(),
            config: &config,
            manual_override: None,
            predictive_risks: &risks,
            quotas: &HashMap::new(),
        };
        assert!(decide(&input).is_none());
    }

    #[test]
    fn cap_trigger_moves_off_emergency_metered_incumbent() {
        let a = member("a", MemberClass::Cellular, 0);
        let b = member("b", MemberClass::Lan, 0);
        let scores: HashMap<String, Score> =
            [("a".to_string(), score(90.0)), ("b".to_string(), score(40.0))]
                .into_iter()
                .collect();
        let config = base_config();
        let quotas: HashMap<String, QuotaDescriptor> = [(
            "a".to_string(),
            QuotaDescriptor {
                cap_mb: Some(1000),
                usage_ratio: 0.99,
                emergency_ratio: 0.95,
            },
        )]
        .into_iter()
        .collect();
        let input = DecisionInput {
            eligible: vec![&a, &b],
            scores: &scores,
            incumbent: Some("a"),
            last_switch_at: None,
            now: Utc::now(),
            config: &config,
            manual_override: None,
            predictive_risks: &HashMap::new(),
            quotas: &quotas,
        };
        let decision = decide(&input).unwrap();
        assert_eq!(decision.elected_member.as_deref(), Some("b"));
        assert_eq!(decision.triggered_by, TriggerReason::Cap);
    }

    #[test]
    fn no_trigger_returns_none() {
        let a = member("a", MemberClass::Lan, 0);
        let scores: HashMap<String, Score> =
            [("a".to_string(), score(90.0))].into_iter().collect();
        let config = base_config();
        let input = DecisionInput {
            eligible: vec![&a],
            scores: &scores,
            incumbent: Some("a"),
            last_switch_at: None,
            now: Utc::now(),
            config: &config,
            manual_override: None,
            predictive_risks: &HashMap::new(),
            quotas: &HashMap::new(),
        };
        assert!(decide(&input).is_none());
    }

    #[test]
    fn tie_break_prefers_higher_priority_then_class_then_name() {
        let a = member("a", MemberClass::Cellular, 5);
        let b = member("b", MemberClass::Lan, 5);
        let scores: HashMap<String, Score> =
            [("a".to_string(), score(80.0)), ("b".to_string(), score(80.0))]
                .into_iter()
                .collect();
        let config = base_config();
        let input = DecisionInput {
            eligible: vec![&a, &b],
            scores: &scores,
            incumbent: None,
            last_switch_at: None,
            now: Utc::now(),
            config: &config,
            manual_override: None,
            predictive_risks: &HashMap::new(),
            quotas: &HashMap::new(),
        };
        let decision = decide(&input).unwrap();
        // Equal final and priority: LAN's class rank beats cellular.
        assert_eq!(decision.elected_member.as_deref(), Some("b"));
    }
}
