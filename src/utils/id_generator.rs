use uuid::Uuid;

/// Generates the identifiers the runtime hands out: run/session ids and
/// checkpoint ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Random run/session identifier, e.g. `run-1f2e…`.
    pub fn generate_run_id(&self) -> String {
        format!("run-{}", Uuid::new_v4().simple())
    }

    /// Random checkpoint identifier, e.g. `ckpt-9a41…`.
    pub fn generate_checkpoint_id(&self) -> String {
        format!("ckpt-{}", Uuid::new_v4().simple())
    }
}
