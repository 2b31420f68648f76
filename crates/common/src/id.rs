//! ID generation utilities.

use ulid::Ulid;
use uuid::Uuid;

/// ID generator for jobs and correlation ids.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new job id.
    ///
    /// ULIDs sort by creation time, which keeps dead-letter listings readable.
    #[must_use]
    pub fn job_id(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate a new trace id for correlating logs across the queue boundary.
    #[must_use]
    pub fn trace_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id() {
        let id_gen = IdGenerator::new();
        let id1 = id_gen.job_id();
        let id2 = id_gen.job_id();

        assert_eq!(id1.len(), 26);
        assert_ne!(id1, id2);
        assert_eq!(id1, id1.to_lowercase());
    }

    #[test]
    fn test_trace_id() {
        let id_gen = IdGenerator::new();
        let trace = id_gen.trace_id();

        assert_eq!(trace.len(), 32); // Simple UUID without hyphens
        assert_ne!(trace, id_gen.trace_id());
    }
}
