//! Integration tests. Both suites need external services and are ignored by
//! default; run with `cargo test -- --ignored`.

mod api_tests;
mod lifecycle_tests;
