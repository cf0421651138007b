//! Safety validation
//!
//! Every preparation and cleaning request passes through here before a
//! single pump is started.

pub mod validator;

pub use validator::{validate, validate_actuations, SafetyViolation};
