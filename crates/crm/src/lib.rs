pub mod client;
pub mod error;
pub mod mapper;
pub mod types;
pub mod validation;

pub use client::{CrmClient, CrmConfig};
pub use error::{CrmError, Result};
pub use mapper::DealMapper;
pub use types::{Deal, LineItem};
pub use validation::{validate_quote, QuoteIssue, QuoteIssueKind, QuoteValidation};
