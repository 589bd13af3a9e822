//! Nodes built from YAML definitions.

use super::definition::{CallFile, CondFile, NodeFile, PredicateFile, PredicateOp, RouteFile, StepFile};
use super::environment::Environment;
use super::error::OrchestratorError;
use super::node::{Cond, Directive, EffectKind, Node, Step};
use super::state::{resolve_params, resolve_value, CycleState};
use super::transforms;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::time::Duration;

fn route_from(
    next: Option<&String>,
    exit: Option<&String>,
    location: &str,
) -> Result<Directive, String> {
    match (next, exit) {
        (Some(next), None) if !next.trim().is_empty() => Ok(Directive::next(next.trim())),
        (None, Some(exit)) if !exit.trim().is_empty() => Ok(Directive::exit(exit.trim())),
        (Some(_), Some(_)) => Err(format!("{location} declares both `next` and `exit`")),
        _ => Err(format!("{location} must declare `next` or `exit`")),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallStep {
    kind: EffectKind,
    name: String,
    params: Map<String, Value>,
    save_as: Option<String>,
    route: Directive,
    timeout: Option<Duration>,
}

impl CallStep {
    pub fn from_file(node: &str, file: &StepFile) -> Result<Self, String> {
        let CallFile {
            tool,
            transform,
            params,
        } = &file.call;
        let (kind, name) = match (tool, transform) {
            (Some(tool), None) => (EffectKind::Tool, tool.trim().to_string()),
            (None, Some(transform)) => {
                if !transforms::is_known(transform.trim()) {
                    return Err(format!("step `{node}` calls unknown transform `{transform}`"));
                }
                (EffectKind::Transform, transform.trim().to_string())
            }
            _ => {
                return Err(format!(
                    "step `{node}` must call exactly one of `tool` or `transform`"
                ))
            }
        };
        if name.is_empty() {
            return Err(format!("step `{node}` has an empty call name"));
        }
        Ok(Self {
            kind,
            name,
            params: params.clone(),
            save_as: file.save_as.clone().filter(|path| !path.trim().is_empty()),
            route: route_from(file.next.as_ref(), file.exit.as_ref(), &format!("step `{node}`"))?,
            timeout: file.timeout_ms.map(Duration::from_millis),
        })
    }
}

impl Step for CallStep {
    fn run(
        &self,
        env: &mut Environment<'_>,
        state: &CycleState,
    ) -> Result<Directive, OrchestratorError> {
        let params = resolve_params(&self.params, state);
        match self.kind {
            EffectKind::Transform => env.transform(&self.name, params)?,
            _ => env.tool(&self.name, params)?,
        };
        Ok(self.route.clone())
    }

    fn effect_kind(&self) -> EffectKind {
        self.kind
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn save_as(&self) -> Option<&str> {
        self.save_as.as_deref()
    }

    fn routes(&self) -> Vec<Directive> {
        vec![self.route.clone()]
    }
}

pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    match (numeric(actual), numeric(expected)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (actual, expected) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    actual == expected || compare(actual, expected) == Some(Ordering::Equal)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    path: String,
    op: PredicateOp,
    value: Value,
}

impl Predicate {
    fn from_file(file: &PredicateFile) -> Self {
        Self {
            path: file.path.trim().to_string(),
            op: file.op,
            value: file.value.clone().unwrap_or(Value::Null),
        }
    }

    pub fn holds(&self, state: &CycleState) -> bool {
        let actual = state.get(&self.path);
        let expected = resolve_value(&self.value, state);
        let ordered = |accept: fn(Ordering) -> bool| {
            actual
                .and_then(|actual| compare(actual, &expected))
                .is_some_and(accept)
        };
        match self.op {
            PredicateOp::Equals => actual.is_some_and(|actual| loosely_equal(actual, &expected)),
            PredicateOp::NotEquals => !actual.is_some_and(|actual| loosely_equal(actual, &expected)),
            PredicateOp::Exists => actual.is_some_and(|actual| !actual.is_null()),
            PredicateOp::Missing => !actual.is_some_and(|actual| !actual.is_null()),
            PredicateOp::Truthy => is_truthy(actual),
            PredicateOp::Falsy => !is_truthy(actual),
            PredicateOp::Gt => ordered(|o| o == Ordering::Greater),
            PredicateOp::Gte => ordered(|o| o != Ordering::Less),
            PredicateOp::Lt => ordered(|o| o == Ordering::Less),
            PredicateOp::Lte => ordered(|o| o != Ordering::Greater),
        }
    }
}

/// First matching rule wins; `default` otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleCond {
    rules: Vec<(Predicate, Directive)>,
    default: Directive,
}

impl RuleCond {
    pub fn from_file(node: &str, file: &CondFile) -> Result<Self, String> {
        let mut rules = Vec::with_capacity(file.rules.len());
        for (index, rule) in file.rules.iter().enumerate() {
            let location = format!("cond `{node}` rule {index}");
            if rule.when.path.trim().is_empty() {
                return Err(format!("{location} has an empty `when.path`"));
            }
            if rule.when.op.needs_value() && rule.when.value.is_none() {
                return Err(format!("{location} needs a `when.value`"));
            }
            let route = route_from(rule.next.as_ref(), rule.exit.as_ref(), &location)?;
            rules.push((Predicate::from_file(&rule.when), route));
        }
        let RouteFile { next, exit } = &file.default;
        let default = route_from(next.as_ref(), exit.as_ref(), &format!("cond `{node}` default"))?;
        Ok(Self { rules, default })
    }
}

impl Cond for RuleCond {
    fn decide(&self, state: &CycleState) -> Result<Directive, OrchestratorError> {
        Ok(self
            .rules
            .iter()
            .find(|(predicate, _)| predicate.holds(state))
            .map(|(_, route)| route.clone())
            .unwrap_or_else(|| self.default.clone()))
    }

    fn routes(&self) -> Vec<Directive> {
        self.rules
            .iter()
            .map(|(_, route)| route.clone())
            .chain(std::iter::once(self.default.clone()))
            .collect()
    }
}

pub fn node_from_file(name: &str, file: &NodeFile) -> Result<Node, String> {
    match file {
        NodeFile::Step(step) => Ok(Node::step(CallStep::from_file(name, step)?)),
        NodeFile::Cond(cond) => Ok(Node::cond(RuleCond::from_file(name, cond)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(yaml: &str) -> RuleCond {
        let file: CondFile = serde_yaml::from_str(yaml).expect("yaml");
        RuleCond::from_file("C", &file).expect("cond")
    }

    #[test]
    fn rules_compare_against_state_references() {
        let cond = cond(
            r#"
rules:
  - when: { path: attempts, op: gt, value: "$.config.max_retries" }
    exit: retry_exhausted
  - when: { path: score.ok, op: truthy }
    exit: done
default: { next: SCORE }
"#,
        );
        let mut state = CycleState::new();
        state.set("config.max_retries", json!("2"));
        state.set("attempts", json!(2));
        assert_eq!(cond.decide(&state).expect("route"), Directive::next("SCORE"));
        state.set("attempts", json!(3));
        assert_eq!(cond.decide(&state).expect("route"), Directive::exit("retry_exhausted"));
        state.set("attempts", json!(0));
        state.set("score.ok", json!(true));
        assert_eq!(cond.decide(&state).expect("route"), Directive::exit("done"));
        assert_eq!(cond.routes().len(), 3);
    }

    #[test]
    fn predicates_cover_presence_and_equality() {
        let mut state = CycleState::new();
        state.set("a", json!(1));
        state.set("n", Value::Null);
        let holds = |path: &str, op: PredicateOp, value: Value| {
            Predicate {
                path: path.to_string(),
                op,
                value,
            }
            .holds(&state)
        };
        assert!(holds("a", PredicateOp::Equals, json!("1")));
        assert!(holds("a", PredicateOp::NotEquals, json!(2)));
        assert!(holds("n", PredicateOp::Missing, Value::Null));
        assert!(holds("zzz", PredicateOp::Falsy, Value::Null));
        assert!(!holds("zzz", PredicateOp::Lt, json!(5)));
    }

    #[test]
    fn steps_need_exactly_one_call_and_route() {
        let both: StepFile = serde_yaml::from_str(
            "call: { tool: a, transform: set_value }\nnext: X\n",
        )
        .expect("yaml");
        assert!(CallStep::from_file("S", &both).is_err());
        let unrouted: StepFile =
            serde_yaml::from_str("call: { tool: a }\n").expect("yaml");
        assert!(CallStep::from_file("S", &unrouted).is_err());
        let unknown: StepFile =
            serde_yaml::from_str("call: { transform: nope }\nexit: done\n").expect("yaml");
        assert!(CallStep::from_file("S", &unknown).is_err());
    }
}
