//! Integration test harness

mod crawl_tests;
mod proxy_tests;
mod source_tests;
