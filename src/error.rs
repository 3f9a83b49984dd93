//! Error types for road mesh generation

use thiserror::Error;

/// Road mesh result type
pub type Result<T> = std::result::Result<T, Error>;

/// Road mesh generation errors
#[derive(Error, Debug)]
pub enum Error {
    /// Bad caller input (empty spline, out-of-range index, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Arrangement error: {0}")]
    Arrangement(String),

    #[error("Boundary error: {0}")]
    Boundary(String),

    #[error("Triangulation error: {0}")]
    Triangulation(String),

    /// A lane or simple polygon could not be built or completed
    #[error("{description}: {message}")]
    LanePolygon { description: String, message: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn arrangement(msg: impl Into<String>) -> Self {
        Error::Arrangement(msg.into())
    }

    pub fn boundary(msg: impl Into<String>) -> Self {
        Error::Boundary(msg.into())
    }

    /// Create a triangulation error
    pub fn triangulation(msg: impl Into<String>) -> Self {
        Error::Triangulation(msg.into())
    }

    pub fn lane_polygon(description: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::LanePolygon { description: description.into(), message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
