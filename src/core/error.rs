use thiserror::Error;

/// Malformed projection input. Validation stops at the first problem found.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: String, value: f64 },

    #[error("{field} must be >= 0, got {value}")]
    Negative { field: String, value: f64 },

    #[error("{field} must be in [0, 1), got {value}")]
    RateOutOfRange { field: String, value: f64 },

    #[error("{field} must be >= 1, got {value}")]
    YearBeforeStart { field: String, value: u32 },

    #[error("{field}: end year {end_year} precedes start year {start_year}")]
    InvertedInterval {
        field: String,
        start_year: u32,
        end_year: u32,
    },

    #[error("{field} must not be empty")]
    EmptyName { field: String },

    #[error("horizon must be between 1 and {max} years, got {value}")]
    HorizonOutOfRange { value: u32, max: u32 },
}
