use serde::Serialize;

use super::ResultType;

/// Static description of a measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MeasureInfo {
    pub description: &'static str,
    pub result_type: ResultType,
    pub example: &'static str,
}
