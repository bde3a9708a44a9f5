mod common;
mod failure_tests;
mod handshake_tests;
mod pipeline_tests;
