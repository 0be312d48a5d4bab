//! Instance and workitem processing
//!
//! A workitem marks an activity in progress. Processing a workitem runs its
//! activity once (active to running to complete), then tries the outgoing
//! transitions following the split mode of the activity. Taken transitions
//! are recorded in `workflow.witm_trans` until the join of their target
//! activity consumes them. An instance completes once every workitem is
//! complete on a `flow_stop` activity, which in turn completes the
//! workitems of parent instances waiting on it as a subflow.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use oerp_orm::fields::conversion::id_from_value;
use oerp_orm::{ModelDefinition, ModelError, OrmResult, Sql, Transaction, Values, WorkflowHook};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::condition::Resolver;
use crate::definition::{Action, Activity, ActivityKind, JoinMode, SplitMode, Transition, Workflow};
use crate::error::{WorkflowError, WorkflowResult};
use crate::storage::{self, InstanceRow, InstanceState, WorkitemRow, WorkitemState};

/// Registered workflows, by name and by model
#[derive(Debug, Default)]
pub struct WorkflowEngine {
    workflows: HashMap<String, Arc<Workflow>>,
    by_model: HashMap<String, Vec<Arc<Workflow>>>,
}

/// One instance being processed, with the record it runs on
#[derive(Debug, Clone)]
struct Run {
    instance: i64,
    workflow: Arc<Workflow>,
    res_type: String,
    res_id: i64,
}

impl WorkflowEngine {
    /// Check and register `workflows`
    pub fn new(workflows: Vec<Workflow>) -> WorkflowResult<Self> {
        let mut engine = WorkflowEngine::default();
        for workflow in workflows {
            workflow.check()?;
            if engine.workflows.contains_key(&workflow.name) {
                return Err(WorkflowError::Duplicate(workflow.name));
            }
            let workflow = Arc::new(workflow);
            engine
                .by_model
                .entry(workflow.model.clone())
                .or_default()
                .push(workflow.clone());
            engine.workflows.insert(workflow.name.clone(), workflow);
        }
        for workflow in engine.workflows.values() {
            for activity in &workflow.activities {
                let ActivityKind::Subflow(name) = &activity.kind else {
                    continue;
                };
                let subflow = engine.workflows.get(name).ok_or_else(|| WorkflowError::UnknownSubflow {
                    workflow: workflow.name.clone(),
                    activity: activity.name.clone(),
                    subflow: name.clone(),
                })?;
                if subflow.model != workflow.model {
                    return Err(WorkflowError::SubflowModel {
                        workflow: workflow.name.clone(),
                        subflow: name.clone(),
                    });
                }
            }
        }
        info!("Workflow engine loaded with {} workflows", engine.workflows.len());
        Ok(engine)
    }

    pub fn workflow(&self, name: &str) -> Option<&Arc<Workflow>> {
        self.workflows.get(name)
    }

    /// Workflows running on records of `model`
    pub fn workflows_of(&self, model: &str) -> &[Arc<Workflow>] {
        self.by_model.get(model).map(Vec::as_slice).unwrap_or(&[])
    }

    fn definition(&self, name: &str) -> OrmResult<Arc<Workflow>> {
        self.workflows
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::Programming(format!("unknown workflow '{}'", name)))
    }

    fn run(&self, instance: &InstanceRow) -> OrmResult<Run> {
        Ok(Run {
            instance: instance.id,
            workflow: self.definition(&instance.workflow)?,
            res_type: instance.res_type.clone(),
            res_id: instance.res_id,
        })
    }

    /// Start the `on_create` workflows of a new record
    pub async fn trg_create(&self, tx: &mut Transaction, model: &str, id: i64) -> OrmResult<()> {
        let workflows: Vec<Arc<Workflow>> = self
            .workflows_of(model)
            .iter()
            .filter(|w| w.on_create)
            .cloned()
            .collect();
        for workflow in workflows {
            self.create_instance(tx, workflow, model, id).await?;
        }
        Ok(())
    }

    /// Re-evaluate the active instances of a record after a write, then the
    /// instances waiting on it through transition triggers
    pub async fn trg_write(&self, tx: &mut Transaction, model: &str, id: i64) -> OrmResult<()> {
        if !self.workflows_of(model).is_empty() {
            for instance in storage::instances_of(tx, model, id, Some(InstanceState::Active)).await? {
                self.update_instance(tx, instance.id, None).await?;
            }
        }
        self.trg_trigger(tx, model, id).await
    }

    /// Send `signal` to the active instances of a record; false when none
    /// is running
    pub async fn trg_validate(&self, tx: &mut Transaction, model: &str, id: i64, signal: &str) -> OrmResult<bool> {
        let instances = storage::instances_of(tx, model, id, Some(InstanceState::Active)).await?;
        for instance in &instances {
            debug!("signal '{}' on {} {} (instance {})", signal, model, id, instance.id);
            self.update_instance(tx, instance.id, Some(signal)).await?;
        }
        Ok(!instances.is_empty())
    }

    /// Terminate every instance of a deleted record
    pub async fn trg_delete(&self, tx: &mut Transaction, model: &str, id: i64) -> OrmResult<()> {
        for instance in storage::instances_of(tx, model, id, None).await? {
            storage::delete_instance(tx, instance.id).await?;
            debug!("workflow instance {} of {} {} deleted", instance.id, model, id);
        }
        storage::delete_triggers_on(tx, model, id).await
    }

    /// Re-point the workitems waiting on instances of `old_id` to the
    /// active instances of the same workflows on `new_id`
    pub async fn trg_redirect(&self, tx: &mut Transaction, model: &str, old_id: i64, new_id: i64) -> OrmResult<()> {
        for old in storage::instances_of(tx, model, old_id, None).await? {
            let Some(new) = storage::active_instance(tx, &old.workflow, model, new_id).await? else {
                continue;
            };
            let moved = storage::redirect_waiting(tx, old.id, new).await?;
            if moved > 0 {
                debug!("redirected {} workitems from instance {} to {}", moved, old.id, new);
            }
        }
        Ok(())
    }

    /// Re-process the instances whose transitions wait on this record
    pub async fn trg_trigger(&self, tx: &mut Transaction, model: &str, id: i64) -> OrmResult<()> {
        for instance in storage::triggered_instances(tx, model, id).await? {
            debug!("{} {} triggers instance {}", model, id, instance);
            self.update_instance(tx, instance, None).await?;
        }
        Ok(())
    }

    /// Whether a record still has an instance that is not complete
    pub async fn has_running(&self, tx: &mut Transaction, model: &str, ids: &[i64]) -> OrmResult<bool> {
        if self.workflows_of(model).is_empty() {
            return Ok(false);
        }
        for id in ids {
            if !storage::instances_of(tx, model, *id, Some(InstanceState::Active))
                .await?
                .is_empty()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn create_instance<'a>(
        &'a self,
        tx: &'a mut Transaction,
        workflow: Arc<Workflow>,
        res_type: &'a str,
        res_id: i64,
    ) -> BoxFuture<'a, OrmResult<i64>> {
        Box::pin(async move {
            if let Some(existing) = storage::active_instance(tx, &workflow.name, res_type, res_id).await? {
                return Err(ModelError::Programming(format!(
                    "Workflow '{}' is already running on {} {} (instance {})",
                    workflow.name, res_type, res_id, existing
                )));
            }
            let instance = storage::insert_instance(tx, &workflow.name, res_type, res_id).await?;
            debug!("workflow '{}' started on {} {} as instance {}", workflow.name, res_type, res_id, instance);

            let run = Run {
                instance,
                workflow: workflow.clone(),
                res_type: res_type.to_string(),
                res_id,
            };
            let starts: Vec<String> = workflow.start_activities().map(|a| a.name.clone()).collect();
            for activity in starts {
                self.create_workitem(tx, &run, &activity).await?;
            }
            self.update_instance(tx, instance, None).await?;
            Ok(instance)
        })
    }

    /// Process every workitem of an instance, then check its end
    fn update_instance<'a>(
        &'a self,
        tx: &'a mut Transaction,
        instance: i64,
        signal: Option<&'a str>,
    ) -> BoxFuture<'a, OrmResult<bool>> {
        Box::pin(async move {
            let Some(row) = storage::instance(tx, instance).await? else {
                return Ok(false);
            };
            let run = self.run(&row)?;
            for item in storage::workitems(tx, instance).await? {
                // earlier workitems may have moved or cancelled this one
                let Some(item) = storage::workitem(tx, item.id).await? else {
                    continue;
                };
                self.process(tx, &run, item, signal).await?;
            }
            self.check_end(tx, &run).await
        })
    }

    fn create_workitem<'a>(
        &'a self,
        tx: &'a mut Transaction,
        run: &'a Run,
        activity: &'a str,
    ) -> BoxFuture<'a, OrmResult<()>> {
        Box::pin(async move {
            let item = storage::insert_workitem(tx, run.instance, activity).await?;
            debug!("instance {} enters '{}'", run.instance, activity);
            self.process(tx, run, item, None).await
        })
    }

    fn process<'a>(
        &'a self,
        tx: &'a mut Transaction,
        run: &'a Run,
        mut item: WorkitemRow,
        signal: Option<&'a str>,
    ) -> BoxFuture<'a, OrmResult<()>> {
        Box::pin(async move {
            let activity = run
                .workflow
                .get_activity(&item.activity)
                .cloned()
                .ok_or_else(|| {
                    ModelError::Programming(format!(
                        "workflow '{}' has no activity '{}'",
                        run.workflow.name, item.activity
                    ))
                })?;

            let fresh = item.state == WorkitemState::Active;
            if fresh {
                self.execute(tx, run, &mut item, &activity).await?;
            }
            if item.state == WorkitemState::Complete && self.split(tx, run, &item, &activity, signal).await? {
                return Ok(());
            }
            if fresh {
                self.register_triggers(tx, run, &item).await?;
            }
            Ok(())
        })
    }

    async fn set_state(&self, tx: &mut Transaction, item: &mut WorkitemRow, state: WorkitemState) -> OrmResult<()> {
        storage::set_workitem_state(tx, item.id, state).await?;
        item.state = state;
        Ok(())
    }

    async fn execute(&self, tx: &mut Transaction, run: &Run, item: &mut WorkitemRow, activity: &Activity) -> OrmResult<()> {
        match &activity.kind {
            ActivityKind::Dummy => {
                self.run_actions(tx, run, &activity.actions).await?;
                self.set_state(tx, item, WorkitemState::Complete).await?;
            }
            ActivityKind::Function => {
                self.set_state(tx, item, WorkitemState::Running).await?;
                self.run_actions(tx, run, &activity.actions).await?;
                self.set_state(tx, item, WorkitemState::Complete).await?;
            }
            ActivityKind::StopAll => {
                self.set_state(tx, item, WorkitemState::Running).await?;
                for other in storage::workitems(tx, run.instance).await? {
                    if other.id != item.id {
                        storage::delete_workitem(tx, other.id).await?;
                    }
                }
                self.run_actions(tx, run, &activity.actions).await?;
                self.set_state(tx, item, WorkitemState::Complete).await?;
            }
            ActivityKind::Subflow(name) => {
                self.set_state(tx, item, WorkitemState::Running).await?;
                let subflow = self.definition(name)?;
                let child = self.create_instance(tx, subflow, &run.res_type, run.res_id).await?;
                storage::set_workitem_subflow(tx, item.id, child).await?;
                item.subflow = Some(child);
                let finished = storage::instance(tx, child)
                    .await?
                    .map(|i| i.state == InstanceState::Complete)
                    .unwrap_or(false);
                if finished {
                    self.set_state(tx, item, WorkitemState::Complete).await?;
                }
            }
        }
        Ok(())
    }

    async fn run_actions(&self, tx: &mut Transaction, run: &Run, actions: &[Action]) -> OrmResult<()> {
        for action in actions {
            match action {
                Action::Write(values) => {
                    tx.write(&run.res_type, &[run.res_id], values.clone()).await?;
                }
                Action::Call { method, args } => {
                    tx.call(&run.res_type, method, &[run.res_id], args.clone()).await?;
                }
            }
        }
        Ok(())
    }

    /// Take the outgoing transitions allowed by the split mode; the
    /// workitem is consumed when any is taken
    async fn split(
        &self,
        tx: &mut Transaction,
        run: &Run,
        item: &WorkitemRow,
        activity: &Activity,
        signal: Option<&str>,
    ) -> OrmResult<bool> {
        let outgoing: Vec<(usize, Transition)> = run
            .workflow
            .outgoing(&activity.name)
            .map(|(i, t)| (i, t.clone()))
            .collect();
        let mut chosen = Vec::new();
        let mut passed = false;
        match activity.split {
            SplitMode::Xor | SplitMode::Or => {
                for (position, transition) in &outgoing {
                    if self.check(tx, run, transition, signal).await? {
                        passed = true;
                        chosen.push(*position);
                        if activity.split == SplitMode::Xor {
                            break;
                        }
                    }
                }
            }
            SplitMode::And => {
                passed = true;
                for (position, transition) in &outgoing {
                    if !self.check(tx, run, transition, signal).await? {
                        passed = false;
                        break;
                    }
                    if !storage::transition_taken(tx, run.instance, *position).await? {
                        chosen.push(*position);
                    }
                }
            }
        }
        if !passed || chosen.is_empty() {
            return Ok(false);
        }

        for position in &chosen {
            storage::take_transition(tx, run.instance, *position).await?;
        }
        storage::delete_workitem(tx, item.id).await?;
        for position in chosen {
            let transition = &run.workflow.transitions[position];
            debug!(
                "instance {} takes '{}' -> '{}'",
                run.instance, transition.from, transition.to
            );
            self.join(tx, run, position).await?;
        }
        Ok(true)
    }

    /// Start the target of a taken transition when its join allows it
    async fn join(&self, tx: &mut Transaction, run: &Run, position: usize) -> OrmResult<()> {
        let target = run.workflow.transitions[position].to.clone();
        let join = run
            .workflow
            .get_activity(&target)
            .map(|a| a.join)
            .unwrap_or_default();
        match join {
            JoinMode::Xor => {
                storage::forget_transitions(tx, run.instance, &[position]).await?;
            }
            JoinMode::And => {
                let incoming = run.workflow.incoming(&target);
                for transition in &incoming {
                    if !storage::transition_taken(tx, run.instance, *transition).await? {
                        return Ok(());
                    }
                }
                storage::forget_transitions(tx, run.instance, &incoming).await?;
            }
        }
        self.create_workitem(tx, run, &target).await
    }

    /// Signal, group and condition of a transition
    async fn check(&self, tx: &mut Transaction, run: &Run, transition: &Transition, signal: Option<&str>) -> OrmResult<bool> {
        if let Some(expected) = &transition.signal {
            if signal != Some(expected.as_str()) {
                return Ok(false);
            }
        }
        if let Some(group) = &transition.group {
            if !tx.is_superuser() && !user_in_group(tx, group).await? {
                return Ok(false);
            }
        }
        let mut record = RecordResolver::new(tx, &run.res_type, run.res_id);
        transition.condition.evaluate(&mut record).await
    }

    /// Register the records the blocked transitions of a workitem wait on
    async fn register_triggers(&self, tx: &mut Transaction, run: &Run, item: &WorkitemRow) -> OrmResult<()> {
        let triggers: Vec<_> = run
            .workflow
            .outgoing(&item.activity)
            .filter_map(|(_, t)| t.trigger.clone())
            .collect();
        for trigger in triggers {
            let value = RecordResolver::new(tx, &run.res_type, run.res_id)
                .field(&trigger.field)
                .await?;
            let ids: Vec<i64> = match &value {
                Value::Array(items) if items.iter().all(Value::is_number) => {
                    items.iter().filter_map(Value::as_i64).collect()
                }
                other => id_from_value(other).into_iter().collect(),
            };
            for id in ids {
                storage::add_trigger(tx, &trigger.model, id, run.instance, item.id).await?;
            }
        }
        Ok(())
    }

    /// Complete the instance when every workitem sits complete on a stop
    /// activity, then wake the parents waiting on it
    fn check_end<'a>(&'a self, tx: &'a mut Transaction, run: &'a Run) -> BoxFuture<'a, OrmResult<bool>> {
        Box::pin(async move {
            let items = storage::workitems(tx, run.instance).await?;
            let finished = items.iter().all(|item| {
                item.state == WorkitemState::Complete
                    && run
                        .workflow
                        .get_activity(&item.activity)
                        .map(|a| a.flow_stop)
                        .unwrap_or(false)
            });
            if !finished {
                return Ok(false);
            }
            let current = storage::instance(tx, run.instance).await?;
            if current.map(|i| i.state) != Some(InstanceState::Active) {
                return Ok(true);
            }

            storage::set_instance_state(tx, run.instance, InstanceState::Complete).await?;
            debug!(
                "workflow '{}' on {} {} complete",
                run.workflow.name, run.res_type, run.res_id
            );

            let ends: BTreeSet<String> = items.into_iter().map(|item| item.activity).collect();
            let mut parents = BTreeSet::new();
            for waiting in storage::waiting_on(tx, run.instance).await? {
                storage::set_workitem_state(tx, waiting.id, WorkitemState::Complete).await?;
                parents.insert(waiting.instance);
            }
            for parent in parents {
                if ends.is_empty() {
                    self.update_instance(tx, parent, None).await?;
                }
                for end in &ends {
                    let signal = format!("subflow.{}", end);
                    self.update_instance(tx, parent, Some(&signal)).await?;
                }
            }
            Ok(true)
        })
    }
}

async fn user_in_group(tx: &mut Transaction, group: &str) -> OrmResult<bool> {
    let mut sql = Sql::new("SELECT \"id\" FROM \"res_group\" WHERE \"name\" = ");
    sql.push_param(group);
    let wanted = tx.fetch_ids(&sql).await?;
    let groups = tx.user_groups().await?;
    Ok(wanted.iter().any(|g| groups.contains(g)))
}

/// Field values and method results of the workflow record
struct RecordResolver<'t> {
    tx: &'t mut Transaction,
    model: &'t str,
    id: i64,
    values: Values,
}

impl<'t> RecordResolver<'t> {
    fn new(tx: &'t mut Transaction, model: &'t str, id: i64) -> Self {
        Self {
            tx,
            model,
            id,
            values: Values::new(),
        }
    }
}

#[async_trait]
impl<'t> Resolver for RecordResolver<'t> {
    async fn field(&mut self, name: &str) -> OrmResult<Value> {
        if let Some(value) = self.values.get(name) {
            return Ok(value.clone());
        }
        let rows = self.tx.read(self.model, &[self.id], Some(&[name])).await?;
        let value = rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove(name))
            .unwrap_or(Value::Null);
        self.values.insert(name.to_string(), value.clone());
        Ok(value)
    }

    async fn call(&mut self, method: &str) -> OrmResult<Value> {
        self.tx.call(self.model, method, &[self.id], json!({})).await
    }
}

#[async_trait]
impl WorkflowHook for WorkflowEngine {
    fn models(&self) -> Vec<ModelDefinition> {
        storage::definitions()
    }

    async fn trg_create(&self, tx: &mut Transaction, model: &str, id: i64) -> OrmResult<()> {
        WorkflowEngine::trg_create(self, tx, model, id).await
    }

    async fn trg_write(&self, tx: &mut Transaction, model: &str, id: i64) -> OrmResult<()> {
        WorkflowEngine::trg_write(self, tx, model, id).await
    }

    async fn trg_delete(&self, tx: &mut Transaction, model: &str, id: i64) -> OrmResult<()> {
        WorkflowEngine::trg_delete(self, tx, model, id).await
    }

    async fn trg_validate(&self, tx: &mut Transaction, model: &str, id: i64, signal: &str) -> OrmResult<bool> {
        WorkflowEngine::trg_validate(self, tx, model, id, signal).await
    }

    async fn trg_redirect(&self, tx: &mut Transaction, model: &str, old_id: i64, new_id: i64) -> OrmResult<()> {
        WorkflowEngine::trg_redirect(self, tx, model, old_id, new_id).await
    }

    async fn trg_trigger(&self, tx: &mut Transaction, model: &str, id: i64) -> OrmResult<()> {
        WorkflowEngine::trg_trigger(self, tx, model, id).await
    }

    async fn has_running(&self, tx: &mut Transaction, model: &str, ids: &[i64]) -> OrmResult<bool> {
        WorkflowEngine::has_running(self, tx, model, ids).await
    }
}
