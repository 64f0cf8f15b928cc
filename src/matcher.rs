//! Rule matching logic.
//!
//! Evaluates conditions against extracted selector values and picks the
//! first rule whose conditions hold. Malformed input never errors; it just
//! fails to match.

use crate::config::{Condition, ConditionGroup, Logic, MatchType, Rule};
use regex::Regex;
use std::collections::HashMap;

/// Step filter that matches every scenario step.
pub const ANY_STEP: &str = "any";

/// A rule that matched, with its position in the endpoint's rule list.
#[derive(Debug, Clone, Copy)]
pub struct RuleMatch<'a> {
    /// Zero-based index of the rule
    pub index: usize,
    /// The matched rule
    pub rule: &'a Rule,
}

/// Find the first rule whose conditions are satisfied.
pub fn match_rules<'a>(values: &HashMap<String, String>, rules: &'a [Rule]) -> Option<RuleMatch<'a>> {
    rules
        .iter()
        .enumerate()
        .find(|(_, rule)| match_rule(values, rule))
        .map(|(index, rule)| RuleMatch { index, rule })
}

/// Find the first rule eligible for `current_step` whose conditions hold.
///
/// A rule is eligible when its step filter is empty, `any`, or equal to
/// the current step.
pub fn match_rules_for_step<'a>(
    values: &HashMap<String, String>,
    rules: &'a [Rule],
    current_step: &str,
) -> Option<RuleMatch<'a>> {
    rules
        .iter()
        .enumerate()
        .find(|(_, rule)| step_allows(&rule.scenario_step, current_step) && match_rule(values, rule))
        .map(|(index, rule)| RuleMatch { index, rule })
}

fn step_allows(filter: &str, current_step: &str) -> bool {
    filter.is_empty() || filter == ANY_STEP || filter == current_step
}

/// Check a rule's direct conditions and every condition group.
pub fn match_rule(values: &HashMap<String, String>, rule: &Rule) -> bool {
    match_conditions(values, &rule.conditions, rule.condition_logic)
        && rule.condition_groups.iter().all(|g| match_group(values, g))
}

fn match_group(values: &HashMap<String, String>, group: &ConditionGroup) -> bool {
    match_conditions(values, &group.conditions, group.logic)
}

/// `And` is vacuously true on an empty list, `Or` vacuously false.
fn match_conditions(values: &HashMap<String, String>, conditions: &[Condition], logic: Logic) -> bool {
    let holds = |cond: &Condition| {
        let target = values.get(&cond.selector).map(String::as_str).unwrap_or("");
        match_condition(target, cond)
    };

    match logic {
        Logic::And => conditions.iter().all(holds),
        Logic::Or => conditions.iter().any(holds),
    }
}

/// Check a single condition against a value.
pub fn match_condition(target: &str, cond: &Condition) -> bool {
    let expected = cond.value.as_str();

    match &cond.match_type {
        MatchType::Exact | MatchType::Unknown(_) => target == expected,
        MatchType::Prefix => target.starts_with(expected),
        MatchType::Suffix => target.ends_with(expected),
        MatchType::Contains => target.contains(expected),
        MatchType::Regex => Regex::new(expected)
            .map(|re| re.is_match(target))
            .unwrap_or(false),
        MatchType::Range => match_range(target, expected),
    }
}

/// Check whether a numeric value lies in an interval.
///
/// Format is `[min, max]`; `(` or `)` make that bound exclusive. A
/// non-numeric target or malformed interval never matches.
pub fn match_range(target: &str, range: &str) -> bool {
    let Ok(num) = target.parse::<f64>() else {
        return false;
    };

    let range = range.trim();
    // Shortest valid form is "[1,2]"
    if range.len() < 5 {
        return false;
    }

    let lower_inclusive = match range.as_bytes()[0] {
        b'[' => true,
        b'(' => false,
        _ => return false,
    };
    let upper_inclusive = match range.as_bytes()[range.len() - 1] {
        b']' => true,
        b')' => false,
        _ => return false,
    };

    let inner = &range[1..range.len() - 1];
    let mut bounds = inner.split(',');
    let (Some(min), Some(max), None) = (bounds.next(), bounds.next(), bounds.next()) else {
        return false;
    };
    let (Ok(min), Ok(max)) = (min.trim().parse::<f64>(), max.trim().parse::<f64>()) else {
        return false;
    };

    let above = if lower_inclusive { num >= min } else { num > min };
    let below = if upper_inclusive { num <= max } else { num < max };
    above && below
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseSpec;

    fn cond(selector: &str, match_type: &str, value: &str) -> Condition {
        Condition {
            selector: selector.to_string(),
            match_type: MatchType::parse(match_type),
            value: value.to_string(),
        }
    }

    fn rule(logic: Logic, conditions: Vec<Condition>) -> Rule {
        Rule {
            condition_logic: logic,
            conditions,
            ..Default::default()
        }
    }

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_match_types() {
        assert!(match_condition("hello", &cond("s", "exact", "hello")));
        assert!(!match_condition("hello", &cond("s", "exact", "Hello")));
        assert!(match_condition("ORD-123", &cond("s", "PREFIX", "ORD-")));
        assert!(match_condition("report.pdf", &cond("s", "suffix", ".pdf")));
        assert!(match_condition("a-needle-b", &cond("s", "contains", "needle")));
        assert!(match_condition("anything", &cond("s", "contains", "")));
        assert!(!match_condition("abc", &cond("s", "contains", "z")));
    }

    #[test]
    fn test_unknown_match_type_is_exact() {
        assert!(match_condition("x", &cond("s", "fuzzy", "x")));
        assert!(!match_condition("xy", &cond("s", "fuzzy", "x")));
    }

    #[test]
    fn test_regex_matching() {
        let c = cond("s", "regex", "^ERR_[0-9]{4}$");
        assert!(match_condition("ERR_1234", &c));
        assert!(!match_condition("ERR_12345", &c));
        assert!(!match_condition("anything", &cond("s", "regex", "[")));
    }

    #[test]
    fn test_range_matching() {
        assert!(match_range("50", "[1, 100]"));
        assert!(!match_range("0", "[1, 100]"));
        assert!(!match_range("101", "[1, 100]"));
        assert!(match_range("1", "[1, 100]"));
        assert!(match_range("100", "[1, 100]"));
        assert!(!match_range("0", "(0, 100)"));
        assert!(match_range("0.5", "(0, 100)"));
        assert!(!match_range("100", "[0, 100)"));
        assert!(match_range("-5", "[-10,0]"));
    }

    #[test]
    fn test_range_malformed() {
        assert!(!match_range("abc", "[1, 100]"));
        assert!(!match_range("5", "[1,2"));
        assert!(!match_range("5", "[1]"));
        assert!(!match_range("5", "[1, 2, 3]"));
        assert!(!match_range("5", "[a, 10]"));
        assert!(!match_range("5", "{1, 10}"));
        assert!(!match_range("", "[1, 10]"));
    }

    #[test]
    fn test_and_logic() {
        let r = rule(
            Logic::And,
            vec![cond("a", "exact", "1"), cond("b", "exact", "2")],
        );
        assert!(match_rule(&values(&[("a", "1"), ("b", "2")]), &r));
        assert!(!match_rule(&values(&[("a", "1"), ("b", "3")]), &r));
        assert!(!match_rule(&values(&[("a", "0"), ("b", "2")]), &r));
    }

    #[test]
    fn test_or_logic() {
        let r = rule(
            Logic::Or,
            vec![cond("a", "exact", "1"), cond("b", "exact", "2")],
        );
        assert!(match_rule(&values(&[("a", "1"), ("b", "x")]), &r));
        assert!(match_rule(&values(&[("a", "x"), ("b", "2")]), &r));
        assert!(!match_rule(&values(&[("a", "x"), ("b", "x")]), &r));
    }

    #[test]
    fn test_empty_conditions() {
        assert!(match_rule(&values(&[]), &rule(Logic::And, vec![])));
        assert!(!match_rule(&values(&[]), &rule(Logic::Or, vec![])));
    }

    #[test]
    fn test_unknown_selector_compares_empty() {
        let r = rule(Logic::And, vec![cond("ghost", "exact", "")]);
        assert!(match_rule(&values(&[]), &r));

        let r = rule(Logic::And, vec![cond("ghost", "exact", "x")]);
        assert!(!match_rule(&values(&[]), &r));
    }

    #[test]
    fn test_condition_groups_are_anded() {
        let mut r = rule(Logic::And, vec![cond("region", "exact", "eu")]);
        r.condition_groups = vec![
            ConditionGroup {
                logic: Logic::Or,
                conditions: vec![cond("tier", "exact", "gold"), cond("tier", "exact", "silver")],
            },
            ConditionGroup {
                logic: Logic::And,
                conditions: vec![cond("amount", "range", "[0, 1000]")],
            },
        ];

        let ok = values(&[("region", "eu"), ("tier", "silver"), ("amount", "10")]);
        assert!(match_rule(&ok, &r));

        let bad_group = values(&[("region", "eu"), ("tier", "bronze"), ("amount", "10")]);
        assert!(!match_rule(&bad_group, &r));

        let bad_direct = values(&[("region", "us"), ("tier", "gold"), ("amount", "10")]);
        assert!(!match_rule(&bad_direct, &r));

        let bad_second = values(&[("region", "eu"), ("tier", "gold"), ("amount", "5000")]);
        assert!(!match_rule(&bad_second, &r));
    }

    #[test]
    fn test_first_match_wins() {
        let mut first = rule(Logic::And, vec![cond("a", "prefix", "x")]);
        first.response = ResponseSpec {
            body: Some("first".into()),
            ..Default::default()
        };
        let second = rule(Logic::And, vec![cond("a", "exact", "xyz")]);
        let rules = vec![rule(Logic::And, vec![cond("a", "exact", "nope")]), first, second];

        let m = match_rules(&values(&[("a", "xyz")]), &rules).unwrap();
        assert_eq!(m.index, 1);
        assert_eq!(m.rule.response.body.as_deref(), Some("first"));

        assert!(match_rules(&values(&[("a", "q")]), &rules).is_none());
    }

    #[test]
    fn test_step_filtering() {
        let mut idle = rule(Logic::And, vec![]);
        idle.scenario_step = "idle".into();
        let mut paid = rule(Logic::And, vec![]);
        paid.scenario_step = "paid".into();
        let mut any = rule(Logic::And, vec![cond("force", "exact", "yes")]);
        any.scenario_step = ANY_STEP.into();
        let unconditional = rule(Logic::And, vec![]);
        let rules = vec![any, idle, paid, unconditional];

        let none = values(&[]);
        assert_eq!(match_rules_for_step(&none, &rules, "idle").unwrap().index, 1);
        assert_eq!(match_rules_for_step(&none, &rules, "paid").unwrap().index, 2);
        assert_eq!(match_rules_for_step(&none, &rules, "shipped").unwrap().index, 3);

        let forced = values(&[("force", "yes")]);
        assert_eq!(match_rules_for_step(&forced, &rules, "paid").unwrap().index, 0);
    }
}
