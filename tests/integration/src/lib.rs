//! Integration test support
//!
//! Mock servers speaking just enough of the REST and gateway protocols to
//! exercise the client end to end.

pub mod helpers;
