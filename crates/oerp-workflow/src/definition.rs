//! Workflow definitions: activities, transitions and their checks

use std::collections::HashSet;

use oerp_orm::Values;
use serde_json::Value;

use crate::condition::Condition;
use crate::error::{WorkflowError, WorkflowResult};

/// What an activity does when a workitem reaches it
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityKind {
    /// Completes immediately
    Dummy,
    /// Runs its actions, then completes
    Function,
    /// Cancels the other workitems of the instance, then completes
    StopAll,
    /// Starts the named workflow on the same record and waits for it
    Subflow(String),
}

/// Typed action run by an activity on the record
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Write(Values),
    /// Call a model method on the record with these arguments
    Call { method: String, args: Value },
}

/// How outgoing transitions are taken once an activity completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitMode {
    /// The first transition whose condition holds
    #[default]
    Xor,
    /// Every transition whose condition holds
    Or,
    /// All transitions, only when every condition holds
    And,
}

/// How incoming transitions start an activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinMode {
    /// Any incoming transition starts it
    #[default]
    Xor,
    /// Waits until every incoming transition has been taken
    And,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub name: String,
    pub kind: ActivityKind,
    pub flow_start: bool,
    pub flow_stop: bool,
    pub split: SplitMode,
    pub join: JoinMode,
    pub actions: Vec<Action>,
}

impl Activity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ActivityKind::Dummy,
            flow_start: false,
            flow_stop: false,
            split: SplitMode::default(),
            join: JoinMode::default(),
            actions: Vec::new(),
        }
    }

    pub fn start(mut self) -> Self {
        self.flow_start = true;
        self
    }

    pub fn stop(mut self) -> Self {
        self.flow_stop = true;
        self
    }

    pub fn kind(mut self, kind: ActivityKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn split(mut self, split: SplitMode) -> Self {
        self.split = split;
        self
    }

    pub fn join(mut self, join: JoinMode) -> Self {
        self.join = join;
        self
    }

    /// Function activity writing `values` on the record
    pub fn write(mut self, values: Values) -> Self {
        if self.kind == ActivityKind::Dummy {
            self.kind = ActivityKind::Function;
        }
        self.actions.push(Action::Write(values));
        self
    }

    /// Function activity calling `method` on the record
    pub fn call(mut self, method: impl Into<String>, args: Value) -> Self {
        if self.kind == ActivityKind::Dummy {
            self.kind = ActivityKind::Function;
        }
        self.actions.push(Action::Call {
            method: method.into(),
            args,
        });
        self
    }
}

/// Registers the related records a blocked transition waits on: the ids
/// held by `field` of the workflow record, as records of `model`
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionTrigger {
    pub model: String,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub condition: Condition,
    pub signal: Option<String>,
    /// Name of the group allowed to fire it
    pub group: Option<String>,
    pub trigger: Option<TransitionTrigger>,
}

impl Transition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: Condition::Always,
            signal: None,
            group: None,
            trigger: None,
        }
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn signal(mut self, signal: impl Into<String>) -> Self {
        self.signal = Some(signal.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn trigger(mut self, model: impl Into<String>, field: impl Into<String>) -> Self {
        self.trigger = Some(TransitionTrigger {
            model: model.into(),
            field: field.into(),
        });
        self
    }
}

/// A workflow of one model
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    pub name: String,
    pub model: String,
    /// Started by record creation
    pub on_create: bool,
    pub activities: Vec<Activity>,
    pub transitions: Vec<Transition>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            on_create: true,
            activities: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn on_create(mut self, on_create: bool) -> Self {
        self.on_create = on_create;
        self
    }

    pub fn activity(mut self, activity: Activity) -> Self {
        self.activities.push(activity);
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn get_activity(&self, name: &str) -> Option<&Activity> {
        self.activities.iter().find(|a| a.name == name)
    }

    pub fn start_activities(&self) -> impl Iterator<Item = &Activity> {
        self.activities.iter().filter(|a| a.flow_start)
    }

    /// Outgoing transitions of `activity` with their positions
    pub fn outgoing<'a>(&'a self, activity: &'a str) -> impl Iterator<Item = (usize, &'a Transition)> + 'a {
        self.transitions
            .iter()
            .enumerate()
            .filter(move |(_, t)| t.from == activity)
    }

    /// Positions of the transitions leading to `activity`
    pub fn incoming(&self, activity: &str) -> Vec<usize> {
        self.transitions
            .iter()
            .enumerate()
            .filter(|(_, t)| t.to == activity)
            .map(|(i, _)| i)
            .collect()
    }

    /// Check the internal consistency of the definition
    pub fn check(&self) -> WorkflowResult<()> {
        let mut names = HashSet::new();
        for activity in &self.activities {
            if !names.insert(activity.name.as_str()) {
                return Err(WorkflowError::DuplicateActivity {
                    workflow: self.name.clone(),
                    activity: activity.name.clone(),
                });
            }
        }
        if self.start_activities().next().is_none() {
            return Err(WorkflowError::NoStart(self.name.clone()));
        }
        for transition in &self.transitions {
            for end in [&transition.from, &transition.to] {
                if !names.contains(end.as_str()) {
                    return Err(WorkflowError::UnknownActivity {
                        workflow: self.name.clone(),
                        activity: end.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order() -> Workflow {
        Workflow::new("sale.order.basic", "sale.order")
            .activity(Activity::new("draft").start())
            .activity(Activity::new("confirmed").write(json!({"state": "confirmed"}).as_object().cloned().unwrap()))
            .activity(Activity::new("done").stop())
            .transition(Transition::new("draft", "confirmed").signal("confirm"))
            .transition(Transition::new("confirmed", "done"))
    }

    #[test]
    fn test_builder() {
        let workflow = order();
        assert!(workflow.check().is_ok());
        assert_eq!(workflow.get_activity("confirmed").unwrap().kind, ActivityKind::Function);
        assert_eq!(workflow.start_activities().count(), 1);
        assert_eq!(workflow.outgoing("draft").map(|(i, _)| i).collect::<Vec<_>>(), vec![0]);
        assert_eq!(workflow.incoming("done"), vec![1]);
    }

    #[test]
    fn test_check_rejects_broken_definitions() {
        let missing = order().transition(Transition::new("done", "cancelled"));
        assert_eq!(
            missing.check(),
            Err(WorkflowError::UnknownActivity {
                workflow: "sale.order.basic".to_string(),
                activity: "cancelled".to_string(),
            })
        );

        let no_start = Workflow::new("empty", "sale.order").activity(Activity::new("a"));
        assert_eq!(no_start.check(), Err(WorkflowError::NoStart("empty".to_string())));

        let twice = order().activity(Activity::new("draft"));
        assert!(matches!(twice.check(), Err(WorkflowError::DuplicateActivity { .. })));
    }
}
