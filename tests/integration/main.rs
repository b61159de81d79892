//! Integration tests against the public `flywheel` API.

mod pipeline;
mod runtime;
