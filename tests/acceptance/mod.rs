//! Integration tests for rq-stats acceptance testing.

mod common;
mod init_test;
mod mpctl_test;
mod notifier_test;
