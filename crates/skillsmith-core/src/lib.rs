//! Skillsmith Core — shared data model, error taxonomy, injectable clock/
//! random collaborators, the Safe-Path Validator (C1), and the Token-Bucket
//! Rate Limiter (C2).
//!
//! Every other crate in the workspace depends on this one for the types and
//! primitives that gate external action: nothing touches the filesystem
//! without going through [`pathsafe`], and nothing calls an upstream source
//! without going through [`ratelimit`].

pub mod collaborators;
pub mod errors;
pub mod model;
pub mod pathsafe;
pub mod ratelimit;

pub use collaborators::{Clock, Random, SystemClock, SystemRandom};
pub use errors::{ApiError, CoreError, ErrorCode, Result};
pub use pathsafe::{validate, validate_or_throw, PathSafetyError, ValidateOptions};
pub use ratelimit::{
    CheckResult, FailMode, KeyMetrics, RateLimiter, RateLimiterHandles, RateLimiterPreset,
    WaitError, WaitOutcome, MAX_UNIQUE_KEYS,
};
