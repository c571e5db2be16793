// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod mount_service;
pub mod mount_trigger;

pub use mount_service::{MountOutcome, MountService, StandardMountService};
pub use mount_trigger::{MountTrigger, RetryPolicy, TriggerReport};

/// Register descriptions for every counter this crate emits. Call once after
/// installing a metrics recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        mount_trigger::UPDATES_RECEIVED_TOTAL,
        "Payload updates received by the mount trigger"
    );
    metrics::describe_counter!(
        mount_service::MOUNTS_TOTAL,
        "Mounts that changed the target directory"
    );
    metrics::describe_counter!(
        mount_trigger::MOUNT_FAILURES_TOTAL,
        "Failed mount attempts, including retries"
    );
    metrics::describe_counter!(
        mount_trigger::MOUNTS_DROPPED_TOTAL,
        "Keys dropped after exhausting their retries"
    );
}
