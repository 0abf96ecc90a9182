use super::CheckpointerType;
use crate::event_bus::{EventBus, EventSink, MemorySink, StdOutSink};

/// Runtime settings carried by a compiled app.
///
/// Environment overrides are read once per construction through `dotenvy`,
/// so a `.env` file works the same as real environment variables.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Fixed session id; a random run id is generated when absent.
    pub session_id: Option<String>,
    /// Checkpoint storage attached to runs; `InMemory` when absent.
    pub checkpointer: Option<CheckpointerType>,
    /// Superstep concurrency; defaults to available parallelism.
    pub concurrency_limit: Option<usize>,
    /// Event bus construction settings.
    pub event_bus: EventBusConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            checkpointer: Some(CheckpointerType::InMemory),
            concurrency_limit: Self::resolve_concurrency_limit(),
            event_bus: EventBusConfig::default(),
        }
    }
}

impl RuntimeConfig {
    fn resolve_concurrency_limit() -> Option<usize> {
        dotenvy::dotenv().ok();
        std::env::var("LOOMFLOW_CONCURRENCY")
            .ok()
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|limit| *limit > 0)
    }

    pub fn new(session_id: Option<String>, checkpointer: Option<CheckpointerType>) -> Self {
        Self {
            session_id,
            checkpointer,
            concurrency_limit: Self::resolve_concurrency_limit(),
            event_bus: EventBusConfig::default(),
        }
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit.max(1));
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBusConfig) -> Self {
        self.event_bus = event_bus;
        self
    }

    #[must_use]
    pub fn with_stdout_event_bus(self) -> Self {
        self.with_event_bus(EventBusConfig::with_stdout_only())
    }

    #[must_use]
    pub fn with_quiet_event_bus(self) -> Self {
        self.with_event_bus(EventBusConfig::quiet())
    }
}

/// Sink kinds the config can construct on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    StdOut,
    Memory,
}

/// Declarative event bus settings; [`build_event_bus`](Self::build_event_bus)
/// turns them into a live bus per run.
#[derive(Clone, Debug)]
pub struct EventBusConfig {
    pub buffer_capacity: usize,
    pub sinks: Vec<SinkConfig>,
}

impl EventBusConfig {
    pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

    #[must_use]
    pub fn new(buffer_capacity: usize, sinks: Vec<SinkConfig>) -> Self {
        Self {
            buffer_capacity: if buffer_capacity == 0 {
                Self::DEFAULT_BUFFER_CAPACITY
            } else {
                buffer_capacity
            },
            sinks,
        }
    }

    #[must_use]
    pub fn with_stdout_only() -> Self {
        Self::new(Self::DEFAULT_BUFFER_CAPACITY, vec![SinkConfig::StdOut])
    }

    /// No sinks at all; events still reach stream subscriptions.
    #[must_use]
    pub fn quiet() -> Self {
        Self::new(Self::DEFAULT_BUFFER_CAPACITY, Vec::new())
    }

    #[must_use]
    pub fn add_sink(mut self, sink: SinkConfig) -> Self {
        if !self.sinks.contains(&sink) {
            self.sinks.push(sink);
        }
        self
    }

    /// Construct the live bus for one run.
    pub fn build_event_bus(&self) -> EventBus {
        let sinks: Vec<Box<dyn EventSink>> = self
            .sinks
            .iter()
            .map(|sink| match sink {
                SinkConfig::StdOut => Box::new(StdOutSink::default()) as Box<dyn EventSink>,
                SinkConfig::Memory => Box::new(MemorySink::new()) as Box<dyn EventSink>,
            })
            .collect();
        EventBus::with_sinks_and_capacity(sinks, self.buffer_capacity)
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::with_stdout_only()
    }
}
