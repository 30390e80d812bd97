mod density;
mod diagnostics;
mod fairness;
mod model;
mod posterior;
mod predict;
mod sampler;
mod session;

use debias_analysis::AnalysisError;
use debias_core::{DataError, NodeId};
use debias_graph_algo::GraphError;
use thiserror::Error;

pub use diagnostics::{ConvergenceWarning, ParameterDiagnostics, effective_sample_size, split_rhat};
pub use fairness::{GroupConfusion, group_confusion_metrics, group_means, mean_prediction_gap};
pub use model::{
    Constraint, HierarchicalEffect, HierarchicalModel, MainEncoding, ModelTerm, OutcomeFamily,
    ParamRef, ParameterSpec, Prior, build,
};
pub use posterior::{ChainStats, FitOutcome, PosteriorSample, SamplerOptions, fit};
pub use predict::{PredictOptions, predict, predict_draws};
pub use session::DebiasSession;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("target '{target}' has no causal parents")]
    NoParents { target: NodeId },
    #[error("no parent of '{target}' is observed in the dataset")]
    NoObservedParents { target: NodeId },
    #[error("bias node '{node}' is not part of the graph")]
    UnknownBiasNode { node: NodeId },
    #[error("column '{column}' is missing from the dataset")]
    MissingColumn { column: String },
    #[error("target '{target}' is {kind}; only numeric or binary outcomes are supported")]
    UnsupportedOutcome { target: NodeId, kind: &'static str },
    #[error("dataset has no rows")]
    EmptyDataset,
    #[error("column '{column}' has zero variance and cannot be standardized")]
    ZeroVariance { column: String },
    #[error("column '{column}' has no categories")]
    EmptyCategories { column: String },
    #[error("column '{column}' holds category '{value}' not seen when the model was built")]
    UnseenCategory { column: String, value: String },
    #[error("column '{column}' is {actual} but the model expects {expected}")]
    ColumnKindMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("model must be built before fitting")]
    ModelNotBuilt,
    #[error("model must be fitted before prediction")]
    ModelNotFitted,
    #[error("posterior does not belong to this model: {0}")]
    PosteriorMismatch(String),
    #[error("model predicts '{expected}', not '{actual}'")]
    TargetMismatch { expected: NodeId, actual: NodeId },
    #[error("chain {chain} found no starting point with finite density")]
    InitializationFailed { chain: usize },
    #[error("invalid sampler options: {0}")]
    InvalidOptions(String),
    #[error("prediction for row {row} is not finite")]
    NonFinitePrediction { row: usize },
    #[error("length mismatch: expected {expected} values, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}
