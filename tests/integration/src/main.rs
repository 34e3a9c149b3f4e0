//! Integration test harness
//!
//! Runs every test category and reports per-category results.
//!
//! # Usage
//!
//! Run all categories:
//! ```text
//! cargo run -p integration-tests
//! ```
//!
//! Run one category directly:
//! ```text
//! cargo test -p integration-tests --test session_tests
//! cargo test -p integration-tests --test remote_tests
//! cargo test -p integration-tests --test wire_tests
//! ```
//!
//! Run with increased logging:
//! ```text
//! RUST_LOG=debug cargo test -p integration-tests --test remote_tests
//! ```

use std::process::Command;
use std::time::Instant;

struct TestCategory {
    name: &'static str,
    description: &'static str,
    test_name: &'static str,
}

const TEST_CATEGORIES: &[TestCategory] = &[
    TestCategory {
        name: "Session Tests",
        description: "Local-channel counting, flavor exclusivity, fork recovery",
        test_name: "session_tests",
    },
    TestCategory {
        name: "Remote Tests",
        description: "Proxy slots, continuation protocol, transport teardown",
        test_name: "remote_tests",
    },
    TestCategory {
        name: "Wire Tests",
        description: "Frame codec round trips over loopback sockets",
        test_name: "wire_tests",
    },
];

fn main() {
    println!("dirsvc integration test harness");
    println!("===============================");

    let mut failures = 0;
    for category in TEST_CATEGORIES {
        println!();
        println!("{} - {}", category.name, category.description);
        let started = Instant::now();
        let status = Command::new("cargo")
            .args(["test", "-p", "integration-tests", "--test", category.test_name])
            .status()
            .expect("failed to launch cargo");
        let elapsed = started.elapsed();
        if status.success() {
            println!("{}: passed in {:.1}s", category.name, elapsed.as_secs_f64());
        } else {
            println!("{}: FAILED in {:.1}s", category.name, elapsed.as_secs_f64());
            failures += 1;
        }
    }

    println!();
    if failures == 0 {
        println!("all {} categories passed", TEST_CATEGORIES.len());
    } else {
        println!("{}/{} categories failed", failures, TEST_CATEGORIES.len());
        std::process::exit(1);
    }
}
