//! Workflow definition errors

use oerp_orm::ModelError;
use thiserror::Error;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// A workflow definition that can not be installed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("workflow '{0}' is defined twice")]
    Duplicate(String),

    #[error("workflow '{0}' has no start activity")]
    NoStart(String),

    #[error("workflow '{workflow}' defines activity '{activity}' twice")]
    DuplicateActivity { workflow: String, activity: String },

    #[error("workflow '{workflow}' has no activity '{activity}'")]
    UnknownActivity { workflow: String, activity: String },

    #[error("activity '{activity}' of '{workflow}' starts unknown subflow '{subflow}'")]
    UnknownSubflow {
        workflow: String,
        activity: String,
        subflow: String,
    },

    #[error("subflow '{subflow}' of '{workflow}' runs on another model")]
    SubflowModel { workflow: String, subflow: String },
}

impl From<WorkflowError> for ModelError {
    fn from(err: WorkflowError) -> Self {
        ModelError::Programming(err.to_string())
    }
}
