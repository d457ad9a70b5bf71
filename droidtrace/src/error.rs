use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// The capture does not contain the tracepoint a query needs, which is
    /// different from containing it and recording nothing.
    #[error("trace does not contain the {0} tracepoint")]
    MissingTracepoint(&'static str),

    /// A derivation's denominator is zero for the requested window.
    #[error("metric is undefined: {0}")]
    UndefinedMetric(&'static str),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
