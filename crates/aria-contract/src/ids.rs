//! Server-side id generation.
//!
//! Ids are opaque strings with an entity prefix, e.g. `run_018f3b…`. The
//! random part is a v7 uuid so ids sort roughly by creation time.

/// Generate a prefixed object id, e.g. `generate_id("msg")` → `msg_…`.
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::now_v7().simple())
}

pub fn assistant_id() -> String {
    generate_id("asst")
}

pub fn thread_id() -> String {
    generate_id("thread")
}

pub fn message_id() -> String {
    generate_id("msg")
}

pub fn run_id() -> String {
    generate_id("run")
}

pub fn run_step_id() -> String {
    generate_id("step")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_are_unique() {
        let a = run_id();
        let b = run_id();
        assert!(a.starts_with("run_"));
        assert!(b.starts_with("run_"));
        assert_ne!(a, b);
    }

    #[test]
    fn prefixes_are_distinct_per_entity() {
        assert!(assistant_id().starts_with("asst_"));
        assert!(thread_id().starts_with("thread_"));
        assert!(message_id().starts_with("msg_"));
        assert!(run_step_id().starts_with("step_"));
    }
}
