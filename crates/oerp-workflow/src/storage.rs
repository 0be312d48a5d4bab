//! Persisted workflow state
//!
//! Instances, workitems, taken transitions and registered triggers are ORM
//! models created by the schema synchronizer. The engine reads and writes
//! them with plain SQL so its bookkeeping never goes through access checks
//! or fires workflow hooks itself.

use std::fmt;
use std::str::FromStr;

use oerp_orm::query::{DeleteQuery, InsertQuery, SelectQuery, TableRef, UpdateQuery};
use oerp_orm::{Field, ModelDefinition, ModelError, OnDelete, OrmResult, Row, Sql, Transaction};
use serde_json::json;

pub const INSTANCE_MODEL: &str = "workflow.instance";
pub const WORKITEM_MODEL: &str = "workflow.workitem";
pub const WITM_TRANS_MODEL: &str = "workflow.witm_trans";
pub const TRIGGER_MODEL: &str = "workflow.trigger";

const INSTANCE_TABLE: &str = "workflow_instance";
const WORKITEM_TABLE: &str = "workflow_workitem";
const WITM_TRANS_TABLE: &str = "workflow_witm_trans";
const TRIGGER_TABLE: &str = "workflow_trigger";

pub(crate) fn definitions() -> Vec<ModelDefinition> {
    vec![
        ModelDefinition::new(INSTANCE_MODEL)
            .description("Workflow instance")
            .field("workflow", Field::char("Workflow").required().select())
            .field("res_type", Field::char("Resource Model").required().select())
            .field("res_id", Field::integer("Resource ID").required().select())
            .field(
                "state",
                Field::selection("State", vec![("active", "Active"), ("complete", "Complete")])
                    .default(json!("active"))
                    .select(),
            )
            .rec_name("workflow")
            .log_access(false),
        ModelDefinition::new(WORKITEM_MODEL)
            .description("Workflow workitem")
            .field(
                "instance",
                Field::many2one("Instance", INSTANCE_MODEL)
                    .required()
                    .on_delete(OnDelete::Cascade)
                    .select(),
            )
            .field("activity", Field::char("Activity").required())
            .field(
                "state",
                Field::selection(
                    "State",
                    vec![("active", "Active"), ("running", "Running"), ("complete", "Complete")],
                )
                .default(json!("active"))
                .select(),
            )
            .field(
                "subflow",
                Field::many2one("Subflow", INSTANCE_MODEL)
                    .on_delete(OnDelete::SetNull)
                    .select(),
            )
            .rec_name("activity")
            .log_access(false),
        ModelDefinition::new(WITM_TRANS_MODEL)
            .description("Taken transition")
            .field(
                "instance",
                Field::many2one("Instance", INSTANCE_MODEL)
                    .required()
                    .on_delete(OnDelete::Cascade)
                    .select(),
            )
            .field("transition", Field::integer("Transition").required())
            .log_access(false),
        ModelDefinition::new(TRIGGER_MODEL)
            .description("Workflow trigger")
            .field("model", Field::char("Model").required().select())
            .field("res_id", Field::integer("Resource ID").required().select())
            .field(
                "instance",
                Field::many2one("Instance", INSTANCE_MODEL)
                    .required()
                    .on_delete(OnDelete::Cascade),
            )
            .field(
                "workitem",
                Field::many2one("Workitem", WORKITEM_MODEL)
                    .required()
                    .on_delete(OnDelete::Cascade),
            )
            .rec_name("model")
            .log_access(false),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Active,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkitemState {
    Active,
    Running,
    Complete,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Active => "active",
            InstanceState::Complete => "complete",
        }
    }
}

impl WorkitemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkitemState::Active => "active",
            WorkitemState::Running => "running",
            WorkitemState::Complete => "complete",
        }
    }
}

impl fmt::Display for WorkitemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkitemState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(WorkitemState::Active),
            "running" => Ok(WorkitemState::Running),
            "complete" => Ok(WorkitemState::Complete),
            other => Err(ModelError::Database(format!("unknown workitem state '{}'", other))),
        }
    }
}

impl FromStr for InstanceState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(InstanceState::Active),
            "complete" => Ok(InstanceState::Complete),
            other => Err(ModelError::Database(format!("unknown instance state '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRow {
    pub id: i64,
    pub workflow: String,
    pub res_type: String,
    pub res_id: i64,
    pub state: InstanceState,
}

impl InstanceRow {
    fn from_row(row: &Row) -> OrmResult<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            workflow: row.get_string("workflow").unwrap_or_default(),
            res_type: row.get_string("res_type").unwrap_or_default(),
            res_id: row.get_i64("res_id")?,
            state: row.get_string("state").unwrap_or_default().parse()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkitemRow {
    pub id: i64,
    pub instance: i64,
    pub activity: String,
    pub state: WorkitemState,
    pub subflow: Option<i64>,
}

impl WorkitemRow {
    fn from_row(row: &Row) -> OrmResult<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            instance: row.get_i64("instance")?,
            activity: row.get_string("activity").unwrap_or_default(),
            state: row.get_string("state").unwrap_or_default().parse()?,
            subflow: row.get_opt_i64("subflow"),
        })
    }
}

fn eq(column: &str, value: impl Into<oerp_orm::DatabaseValue>) -> Sql {
    let mut sql = Sql::ident(column);
    sql.push(" = ").push_param(value);
    sql
}

fn select(table: &str) -> SelectQuery {
    SelectQuery::new(TableRef::plain(table))
}

async fn insert(tx: &mut Transaction, query: InsertQuery) -> OrmResult<i64> {
    let row = tx.fetch_optional(&query.returning("id").to_sql()).await?;
    row.and_then(|row| row.get_opt_i64("id"))
        .ok_or_else(|| ModelError::Database("No id returned by workflow insert".to_string()))
}

/// Instances of a record, optionally only those in `state`
pub async fn instances_of(
    tx: &mut Transaction,
    res_type: &str,
    res_id: i64,
    state: Option<InstanceState>,
) -> OrmResult<Vec<InstanceRow>> {
    let mut query = select(INSTANCE_TABLE)
        .filter(eq("res_type", res_type))
        .filter(eq("res_id", res_id))
        .order_by(Sql::ident("id"));
    if let Some(state) = state {
        query = query.filter(eq("state", state.as_str()));
    }
    let rows = tx.fetch_all(&query.to_sql(tx.dialect())).await?;
    rows.iter().map(InstanceRow::from_row).collect()
}

pub async fn instance(tx: &mut Transaction, id: i64) -> OrmResult<Option<InstanceRow>> {
    let query = select(INSTANCE_TABLE).filter(eq("id", id));
    let row = tx.fetch_optional(&query.to_sql(tx.dialect())).await?;
    row.as_ref().map(InstanceRow::from_row).transpose()
}

/// The active instance of `workflow` on a record
pub async fn active_instance(
    tx: &mut Transaction,
    workflow: &str,
    res_type: &str,
    res_id: i64,
) -> OrmResult<Option<i64>> {
    let query = select(INSTANCE_TABLE)
        .column(Sql::ident("id"))
        .filter(eq("workflow", workflow))
        .filter(eq("res_type", res_type))
        .filter(eq("res_id", res_id))
        .filter(eq("state", InstanceState::Active.as_str()))
        .limit(Some(1));
    Ok(tx.fetch_ids(&query.to_sql(tx.dialect())).await?.into_iter().next())
}

pub async fn insert_instance(
    tx: &mut Transaction,
    workflow: &str,
    res_type: &str,
    res_id: i64,
) -> OrmResult<i64> {
    let query = InsertQuery::new(INSTANCE_TABLE)
        .set("workflow", Sql::param(workflow))
        .set("res_type", Sql::param(res_type))
        .set("res_id", Sql::param(res_id))
        .set("state", Sql::param(InstanceState::Active.as_str()));
    insert(tx, query).await
}

pub async fn set_instance_state(tx: &mut Transaction, id: i64, state: InstanceState) -> OrmResult<()> {
    let query = UpdateQuery::new(INSTANCE_TABLE)
        .set("state", Sql::param(state.as_str()))
        .filter(eq("id", id));
    tx.execute(&query.to_sql()).await?;
    Ok(())
}

/// Drop an instance with its workitems, taken transitions and triggers
pub async fn delete_instance(tx: &mut Transaction, id: i64) -> OrmResult<()> {
    for table in [TRIGGER_TABLE, WITM_TRANS_TABLE, WORKITEM_TABLE] {
        tx.execute(&DeleteQuery::new(table).filter(eq("instance", id)).to_sql())
            .await?;
    }
    let detach = UpdateQuery::new(WORKITEM_TABLE)
        .set("subflow", Sql::new("NULL"))
        .filter(eq("subflow", id));
    tx.execute(&detach.to_sql()).await?;
    tx.execute(&DeleteQuery::new(INSTANCE_TABLE).filter(eq("id", id)).to_sql())
        .await?;
    Ok(())
}

pub async fn workitems(tx: &mut Transaction, instance: i64) -> OrmResult<Vec<WorkitemRow>> {
    let query = select(WORKITEM_TABLE)
        .filter(eq("instance", instance))
        .order_by(Sql::ident("id"));
    let rows = tx.fetch_all(&query.to_sql(tx.dialect())).await?;
    rows.iter().map(WorkitemRow::from_row).collect()
}

pub async fn workitem(tx: &mut Transaction, id: i64) -> OrmResult<Option<WorkitemRow>> {
    let query = select(WORKITEM_TABLE).filter(eq("id", id));
    let row = tx.fetch_optional(&query.to_sql(tx.dialect())).await?;
    row.as_ref().map(WorkitemRow::from_row).transpose()
}

pub async fn insert_workitem(tx: &mut Transaction, instance: i64, activity: &str) -> OrmResult<WorkitemRow> {
    let query = InsertQuery::new(WORKITEM_TABLE)
        .set("instance", Sql::param(instance))
        .set("activity", Sql::param(activity))
        .set("state", Sql::param(WorkitemState::Active.as_str()));
    let id = insert(tx, query).await?;
    Ok(WorkitemRow {
        id,
        instance,
        activity: activity.to_string(),
        state: WorkitemState::Active,
        subflow: None,
    })
}

pub async fn set_workitem_state(tx: &mut Transaction, id: i64, state: WorkitemState) -> OrmResult<()> {
    let query = UpdateQuery::new(WORKITEM_TABLE)
        .set("state", Sql::param(state.as_str()))
        .filter(eq("id", id));
    tx.execute(&query.to_sql()).await?;
    Ok(())
}

pub async fn set_workitem_subflow(tx: &mut Transaction, id: i64, subflow: i64) -> OrmResult<()> {
    let query = UpdateQuery::new(WORKITEM_TABLE)
        .set("subflow", Sql::param(subflow))
        .filter(eq("id", id));
    tx.execute(&query.to_sql()).await?;
    Ok(())
}

pub async fn delete_workitem(tx: &mut Transaction, id: i64) -> OrmResult<()> {
    tx.execute(&DeleteQuery::new(TRIGGER_TABLE).filter(eq("workitem", id)).to_sql())
        .await?;
    tx.execute(&DeleteQuery::new(WORKITEM_TABLE).filter(eq("id", id)).to_sql())
        .await?;
    Ok(())
}

/// Workitems waiting on the subflow `instance`
pub async fn waiting_on(tx: &mut Transaction, instance: i64) -> OrmResult<Vec<WorkitemRow>> {
    let query = select(WORKITEM_TABLE)
        .filter(eq("subflow", instance))
        .order_by(Sql::ident("id"));
    let rows = tx.fetch_all(&query.to_sql(tx.dialect())).await?;
    rows.iter().map(WorkitemRow::from_row).collect()
}

/// Point the workitems waiting on `old` at `new`
pub async fn redirect_waiting(tx: &mut Transaction, old: i64, new: i64) -> OrmResult<u64> {
    let query = UpdateQuery::new(WORKITEM_TABLE)
        .set("subflow", Sql::param(new))
        .filter(eq("subflow", old));
    tx.execute(&query.to_sql()).await
}

pub async fn transition_taken(tx: &mut Transaction, instance: i64, transition: usize) -> OrmResult<bool> {
    let query = select(WITM_TRANS_TABLE)
        .column(Sql::new("COUNT(*)"))
        .filter(eq("instance", instance))
        .filter(eq("transition", transition as i64));
    Ok(tx.fetch_count(&query.to_sql(tx.dialect())).await? > 0)
}

pub async fn take_transition(tx: &mut Transaction, instance: i64, transition: usize) -> OrmResult<()> {
    let query = InsertQuery::new(WITM_TRANS_TABLE)
        .set("instance", Sql::param(instance))
        .set("transition", Sql::param(transition as i64));
    insert(tx, query).await?;
    Ok(())
}

pub async fn forget_transitions(tx: &mut Transaction, instance: i64, transitions: &[usize]) -> OrmResult<()> {
    if transitions.is_empty() {
        return Ok(());
    }
    let mut positions = Sql::ident("transition");
    positions
        .push(" IN ")
        .append(Sql::value_list(transitions.iter().map(|t| *t as i64)));
    let query = DeleteQuery::new(WITM_TRANS_TABLE)
        .filter(eq("instance", instance))
        .filter(positions);
    tx.execute(&query.to_sql()).await?;
    Ok(())
}

/// Register that `workitem` waits on record `res_id` of `model`
pub async fn add_trigger(
    tx: &mut Transaction,
    model: &str,
    res_id: i64,
    instance: i64,
    workitem: i64,
) -> OrmResult<()> {
    let exists = select(TRIGGER_TABLE)
        .column(Sql::new("COUNT(*)"))
        .filter(eq("model", model))
        .filter(eq("res_id", res_id))
        .filter(eq("workitem", workitem));
    if tx.fetch_count(&exists.to_sql(tx.dialect())).await? > 0 {
        return Ok(());
    }
    let query = InsertQuery::new(TRIGGER_TABLE)
        .set("model", Sql::param(model))
        .set("res_id", Sql::param(res_id))
        .set("instance", Sql::param(instance))
        .set("workitem", Sql::param(workitem));
    insert(tx, query).await?;
    Ok(())
}

/// Instances waiting on record `res_id` of `model`
pub async fn triggered_instances(tx: &mut Transaction, model: &str, res_id: i64) -> OrmResult<Vec<i64>> {
    let query = select(TRIGGER_TABLE)
        .distinct()
        .column(Sql::ident("instance"))
        .filter(eq("model", model))
        .filter(eq("res_id", res_id))
        .order_by(Sql::ident("instance"));
    tx.fetch_ids(&query.to_sql(tx.dialect())).await
}

pub async fn delete_triggers_on(tx: &mut Transaction, model: &str, res_id: i64) -> OrmResult<()> {
    let query = DeleteQuery::new(TRIGGER_TABLE)
        .filter(eq("model", model))
        .filter(eq("res_id", res_id));
    tx.execute(&query.to_sql()).await?;
    Ok(())
}
