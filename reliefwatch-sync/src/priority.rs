//! Queue priority scoring
//!
//! score = tier + content bonuses + matching rule modifiers + age bonus,
//! clamped to [0, 100]. Every constant lives in [`PriorityWeights`].

use crate::models::{MutationPayload, PriorityRule, PriorityTier, QueueItem, RuleCondition, RuleOperator, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MAX_SCORE: u8 = 100;

/// `bonus` applies when the affected population is at least `min`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationTier {
    pub min: u64,
    pub bonus: i32,
}

/// `bonus` applies once an item is older than `hours`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeTier {
    pub hours: i64,
    pub bonus: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub tier_high: i32,
    pub tier_normal: i32,
    pub tier_low: i32,
    /// Matched case-insensitively as substrings of the payload's free text
    pub health_keywords: Vec<String>,
    pub health_keyword_bonus: i32,
    pub severity_catastrophic: i32,
    pub severity_severe: i32,
    pub severity_moderate: i32,
    /// Highest matching tier wins
    pub population_tiers: Vec<PopulationTier>,
    pub response_volume_threshold: f64,
    pub response_volume_bonus: i32,
    /// Highest matching tier wins
    pub age_tiers: Vec<AgeTier>,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            tier_high: 30,
            tier_normal: 15,
            tier_low: 5,
            health_keywords: [
                "cholera", "measles", "outbreak", "disease", "medical", "health", "injur",
                "casualt", "malnutrition", "epidemic", "death",
            ]
            .iter()
            .map(|k| (*k).to_string())
            .collect(),
            health_keyword_bonus: 20,
            severity_catastrophic: 25,
            severity_severe: 15,
            severity_moderate: 5,
            population_tiers: vec![
                PopulationTier { min: 10_000, bonus: 20 },
                PopulationTier { min: 1_000, bonus: 15 },
                PopulationTier { min: 100, bonus: 5 },
            ],
            response_volume_threshold: 1_000.0,
            response_volume_bonus: 10,
            age_tiers: vec![
                AgeTier { hours: 48, bonus: 10 },
                AgeTier { hours: 24, bonus: 5 },
            ],
        }
    }
}

/// Every component of a score, before clamping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub tier: i32,
    pub health_keywords: i32,
    pub severity: i32,
    pub population: i32,
    pub response_volume: i32,
    pub rules: i32,
    pub matched_rules: Vec<String>,
    pub age: i32,
}

impl ScoreBreakdown {
    pub fn raw_total(&self) -> i32 {
        self.tier
            .saturating_add(self.health_keywords)
            .saturating_add(self.severity)
            .saturating_add(self.population)
            .saturating_add(self.response_volume)
            .saturating_add(self.rules)
            .saturating_add(self.age)
    }

    pub fn score(&self) -> u8 {
        u8::try_from(self.raw_total().clamp(0, i32::from(MAX_SCORE))).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PriorityAssigner {
    weights: PriorityWeights,
}

impl PriorityAssigner {
    pub fn new(weights: PriorityWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &PriorityWeights {
        &self.weights
    }

    /// Score against the wall clock
    pub fn score(&self, item: &QueueItem, rules: &[PriorityRule]) -> u8 {
        self.score_at(item, rules, Utc::now())
    }

    pub fn score_at(&self, item: &QueueItem, rules: &[PriorityRule], now: DateTime<Utc>) -> u8 {
        self.breakdown_at(item, rules, now).score()
    }

    pub fn breakdown_at(&self, item: &QueueItem, rules: &[PriorityRule], now: DateTime<Utc>) -> ScoreBreakdown {
        let w = &self.weights;
        let mut breakdown = ScoreBreakdown {
            tier: match item.priority {
                PriorityTier::High => w.tier_high,
                PriorityTier::Normal => w.tier_normal,
                PriorityTier::Low => w.tier_low,
            },
            ..ScoreBreakdown::default()
        };

        if let Some(payload) = &item.payload {
            breakdown.health_keywords = self.keyword_bonus(payload);
            breakdown.severity = match payload.severity() {
                Some(Severity::Catastrophic) => w.severity_catastrophic,
                Some(Severity::Severe) => w.severity_severe,
                Some(Severity::Moderate) => w.severity_moderate,
                Some(Severity::Low) | None => 0,
            };
            breakdown.population = payload
                .affected_population()
                .and_then(|population| {
                    w.population_tiers
                        .iter()
                        .filter(|tier| population >= tier.min)
                        .map(|tier| tier.bonus)
                        .max()
                })
                .unwrap_or(0);
            breakdown.response_volume = match payload.response_volume() {
                Some(volume) if volume >= w.response_volume_threshold => w.response_volume_bonus,
                _ => 0,
            };
        }

        let view = item_view(item);
        for rule in rules {
            if rule.is_active && rule.entity_type == item.kind && rule_matches(rule, &view) {
                breakdown.rules = breakdown.rules.saturating_add(rule.priority_modifier);
                breakdown.matched_rules.push(rule.name.clone());
            }
        }

        let age = now - item.created_at;
        breakdown.age = w
            .age_tiers
            .iter()
            .filter(|tier| age > chrono::Duration::hours(tier.hours))
            .map(|tier| tier.bonus)
            .max()
            .unwrap_or(0);

        breakdown
    }

    /// Human-readable list of every nonzero component
    pub fn generate_reason(&self, item: &QueueItem, rules: &[PriorityRule]) -> String {
        self.generate_reason_at(item, rules, Utc::now())
    }

    pub fn generate_reason_at(&self, item: &QueueItem, rules: &[PriorityRule], now: DateTime<Utc>) -> String {
        let b = self.breakdown_at(item, rules, now);
        let mut parts = vec![format!("{} priority (+{})", item.priority, b.tier)];

        if b.health_keywords != 0 {
            parts.push(format!("health keywords (+{})", b.health_keywords));
        }
        if b.severity != 0 {
            let severity = item.payload.as_ref().and_then(MutationPayload::severity);
            parts.push(format!(
                "severity {} (+{})",
                severity.map_or("?", |s| s.as_str()),
                b.severity
            ));
        }
        if b.population != 0 {
            parts.push(format!("affected population (+{})", b.population));
        }
        if b.response_volume != 0 {
            parts.push(format!("response volume (+{})", b.response_volume));
        }
        if b.rules != 0 {
            parts.push(format!("rules [{}] ({:+})", b.matched_rules.join(", "), b.rules));
        }
        if b.age != 0 {
            parts.push(format!("waiting time (+{})", b.age));
        }

        parts.join(", ")
    }

    /// Re-score every item and order by score descending, FIFO on ties
    pub fn recalculate_queue_priorities(
        &self,
        queue: Vec<QueueItem>,
        rules: &[PriorityRule],
        now: DateTime<Utc>,
    ) -> Vec<QueueItem> {
        let mut queue: Vec<QueueItem> = queue
            .into_iter()
            .map(|mut item| {
                item.priority_score = self.score_at(&item, rules, now);
                item.priority_reason = self.generate_reason_at(&item, rules, now);
                item
            })
            .collect();

        queue.sort_by(|a, b| {
            b.priority_score
                .cmp(&a.priority_score)
                .then(a.sequence.cmp(&b.sequence))
        });
        queue
    }

    fn keyword_bonus(&self, payload: &MutationPayload) -> i32 {
        let text = payload.text_fragments().join(" ").to_lowercase();
        let hit = self
            .weights
            .health_keywords
            .iter()
            .any(|keyword| !keyword.is_empty() && text.contains(&keyword.to_lowercase()));
        if hit {
            self.weights.health_keyword_bonus
        } else {
            0
        }
    }
}

/// Score with default weights against the wall clock
pub fn score(item: &QueueItem, rules: &[PriorityRule]) -> u8 {
    PriorityAssigner::default().score(item, rules)
}

/// Score with default weights at `now`
pub fn score_at(item: &QueueItem, rules: &[PriorityRule], now: DateTime<Utc>) -> u8 {
    PriorityAssigner::default().score_at(item, rules, now)
}

/// Payload fields plus queue metadata, the document rules are evaluated on
fn item_view(item: &QueueItem) -> Value {
    let mut view = match item.payload.as_ref().map(MutationPayload::to_value) {
        Some(Ok(Value::Object(map))) => map,
        _ => Map::new(),
    };
    view.insert("type".into(), Value::from(item.kind.as_str()));
    view.insert("action".into(), Value::from(item.action.as_str()));
    view.insert("priority".into(), Value::from(item.priority.as_str()));
    view.insert("entityId".into(), Value::from(item.entity_id.clone()));
    view.insert("retryCount".into(), Value::from(item.retry_count));
    Value::Object(view)
}

fn rule_matches(rule: &PriorityRule, view: &Value) -> bool {
    rule.conditions.iter().all(|c| condition_matches(c, view))
}

fn lookup<'a>(view: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(view, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

fn condition_matches(condition: &RuleCondition, view: &Value) -> bool {
    let Some(actual) = lookup(view, &condition.field) else {
        return false;
    };

    match condition.operator {
        RuleOperator::Equals => values_equal(actual, &condition.value),
        RuleOperator::GreaterThan => match (actual.as_f64(), condition.value.as_f64()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        RuleOperator::Contains => match (actual, &condition.value) {
            (Value::String(haystack), Value::String(needle)) => {
                haystack.to_lowercase().contains(&needle.to_lowercase())
            }
            (Value::Array(items), needle) => items.iter().any(|v| values_equal(v, needle)),
            _ => false,
        },
        RuleOperator::InArray => match &condition.value {
            Value::Array(options) => options.iter().any(|v| values_equal(actual, v)),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payload::fixtures::{assessment, entity, media, response};
    use crate::models::{EntityKind, IncidentPayload, MutationAction, NewQueueItem};
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 2, 12, 0, 0).unwrap()
    }

    fn item(payload: MutationPayload, tier: PriorityTier) -> QueueItem {
        NewQueueItem::new(payload.kind(), MutationAction::Create, "x-1", Some(payload), tier).preview(now())
    }

    fn incident(severity: Severity, population: Option<u64>) -> MutationPayload {
        MutationPayload::Incident(IncidentPayload {
            name: "Flooding in Jere".into(),
            incident_type: "FLOOD".into(),
            severity,
            status: "ACTIVE".into(),
            affected_population: population,
            description: None,
            location: None,
        })
    }

    fn rule(name: &str, kind: EntityKind, conditions: Vec<RuleCondition>, modifier: i32) -> PriorityRule {
        PriorityRule {
            id: name.to_lowercase(),
            name: name.into(),
            entity_type: kind,
            conditions,
            priority_modifier: modifier,
            is_active: true,
        }
    }

    #[test]
    fn test_high_cholera_assessment_scores_at_least_fifty() {
        let item = item(assessment("Suspected cholera cases near the borehole"), PriorityTier::High);
        let score = score_at(&item, &[], now());
        assert!(score >= 50, "score was {score}");
    }

    #[test]
    fn test_tier_only() {
        let assigner = PriorityAssigner::default();
        assert_eq!(assigner.score_at(&item(media(), PriorityTier::Low), &[], now()), 5);
        assert_eq!(assigner.score_at(&item(media(), PriorityTier::Normal), &[], now()), 15);
    }

    #[test]
    fn test_content_bonuses() {
        let assigner = PriorityAssigner::default();
        let b = assigner.breakdown_at(
            &item(incident(Severity::Catastrophic, Some(12_000)), PriorityTier::Normal),
            &[],
            now(),
        );
        assert_eq!(b.severity, 25);
        assert_eq!(b.population, 20);

        let b = assigner.breakdown_at(&item(entity("Camp"), PriorityTier::Normal), &[], now());
        assert_eq!(b.population, 15);

        let b = assigner.breakdown_at(&item(response(1_000.0), PriorityTier::Normal), &[], now());
        assert_eq!(b.response_volume, 10);
        let b = assigner.breakdown_at(&item(response(999.0), PriorityTier::Normal), &[], now());
        assert_eq!(b.response_volume, 0);
    }

    #[test]
    fn test_age_bonus() {
        let assigner = PriorityAssigner::default();
        let queued = item(media(), PriorityTier::Low);

        let at = |hours| assigner.breakdown_at(&queued, &[], now() + chrono::Duration::hours(hours)).age;
        assert_eq!(at(1), 0);
        assert_eq!(at(24), 0);
        assert_eq!(at(25), 5);
        assert_eq!(at(49), 10);
    }

    #[test]
    fn test_rules_sum_and_respect_type_and_activity() {
        let queued = item(incident(Severity::Severe, None), PriorityTier::Normal);
        let rules = vec![
            rule(
                "Floods",
                EntityKind::Incident,
                vec![RuleCondition {
                    field: "incidentType".into(),
                    operator: RuleOperator::InArray,
                    value: json!(["FLOOD", "FIRE"]),
                }],
                12,
            ),
            rule("Always", EntityKind::Incident, vec![], -3),
            rule("Other kind", EntityKind::Media, vec![], 50),
            PriorityRule {
                is_active: false,
                ..rule("Disabled", EntityKind::Incident, vec![], 40)
            },
        ];

        let b = PriorityAssigner::default().breakdown_at(&queued, &rules, now());
        assert_eq!(b.rules, 9);
        assert_eq!(b.matched_rules, vec!["Floods".to_string(), "Always".to_string()]);
    }

    #[test]
    fn test_condition_operators() {
        let view = json!({
            "severity": "SEVERE",
            "affectedPopulation": 800,
            "notes": "Road to Gwoza blocked",
            "tags": ["flood", "road"],
            "location": {"latitude": 11.8}
        });
        let check = |field: &str, operator, value| {
            condition_matches(&RuleCondition { field: field.into(), operator, value }, &view)
        };

        assert!(check("severity", RuleOperator::Equals, json!("SEVERE")));
        assert!(check("affectedPopulation", RuleOperator::Equals, json!(800.0)));
        assert!(check("affectedPopulation", RuleOperator::GreaterThan, json!(500)));
        assert!(!check("affectedPopulation", RuleOperator::GreaterThan, json!(800)));
        assert!(check("notes", RuleOperator::Contains, json!("gwoza")));
        assert!(check("tags", RuleOperator::Contains, json!("road")));
        assert!(check("location.latitude", RuleOperator::GreaterThan, json!(10)));
        assert!(!check("missing", RuleOperator::Equals, json!(null)));
        assert!(!check("severity", RuleOperator::InArray, json!("SEVERE")));
    }

    #[test]
    fn test_score_is_clamped() {
        let queued = item(incident(Severity::Catastrophic, Some(50_000)), PriorityTier::High);
        let boost = vec![rule("Boost", EntityKind::Incident, vec![], 500)];
        let sink = vec![rule("Sink", EntityKind::Incident, vec![], -500)];

        assert_eq!(score_at(&queued, &boost, now()), 100);
        assert_eq!(score_at(&queued, &sink, now()), 0);
    }

    #[test]
    fn test_reason_lists_nonzero_components() {
        let assigner = PriorityAssigner::default();
        let queued = item(assessment("measles outbreak"), PriorityTier::High);
        let reason = assigner.generate_reason_at(&queued, &[], now());
        assert!(reason.contains("HIGH priority (+30)"));
        assert!(reason.contains("health keywords (+20)"));
        assert!(!reason.contains("severity"));
    }

    #[test]
    fn test_recalculate_orders_by_score_then_sequence() {
        let mut low = item(media(), PriorityTier::Low);
        low.sequence = 1;
        let mut normal_a = item(media(), PriorityTier::Normal);
        normal_a.sequence = 2;
        let mut normal_b = item(media(), PriorityTier::Normal);
        normal_b.sequence = 3;
        let mut high = item(media(), PriorityTier::High);
        high.sequence = 4;

        let ordered = PriorityAssigner::default().recalculate_queue_priorities(
            vec![normal_b, low, high, normal_a],
            &[],
            now(),
        );
        let sequences: Vec<i64> = ordered.iter().map(|i| i.sequence).collect();
        assert_eq!(sequences, vec![4, 2, 3, 1]);
        assert_eq!(ordered[0].priority_score, 30);
        assert!(!ordered[0].priority_reason.is_empty());
    }
}
