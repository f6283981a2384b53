use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("well ({row}, {col}) of sample '{sample}' lies outside the {rows}x{cols} plate")]
    OutOfBounds {
        sample: String,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    #[error("{stage} requires at least one '{token}' category in layout")]
    MissingCategory { stage: &'static str, token: String },
    #[error("cannot calculate I with no untreated sample assigned")]
    MissingControl,
    #[error("assigning more than one untreated sample is not allowed ('{existing}' already assigned)")]
    DuplicateControl { existing: String },
    #[error("{0} cannot be a null selection")]
    EmptySelection(&'static str),
    #[error("{parameter} selection has {got} entries but {expected} fits were offered")]
    SelectionLength {
        parameter: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("must be at least 2 intercepts selected, got {0}")]
    InsufficientIntercepts(usize),
    #[error("intercept spread is zero, no usable significance threshold")]
    DegenerateModel,
    #[error("regression failed: {0}")]
    Regression(String),
    #[error("prerequisite not completed ({0})")]
    Precondition(String),
    #[error("'{stage}' is not implemented for {assay} assays")]
    NotImplemented {
        assay: &'static str,
        stage: &'static str,
    },
}
