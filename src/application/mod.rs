// Application layer: use cases, authorization and report shapes.

pub mod authz;
pub mod error;
pub mod reporting;
pub mod service;

pub use authz::*;
pub use error::*;
pub use reporting::*;
pub use service::*;
