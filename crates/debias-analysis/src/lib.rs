mod backdoor;
mod bias;
mod quantify;
mod report;

use debias_core::DataError;
use debias_graph_algo::GraphError;
use thiserror::Error;

pub use backdoor::BackdoorPathRecord;
pub use quantify::AttributeBiasMetrics;
pub use report::{BIAS_REPORT_SCHEMA_VERSION, BiasAnalyzer, BiasReport, BiasReportRequest};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("{0}")]
    Message(String),
}
