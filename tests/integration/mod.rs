//! Integration test modules.

mod harness;
mod race_flow_test;
mod recovery_test;
mod server_test;
