//! Configuration for the execution pipeline.

/// Configuration for the sequencer.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Capacity of the worker's wake-up queue.
    ///
    /// A full queue never loses work: the worker drains every ready slot on
    /// each wake-up.
    pub signal_capacity: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            signal_capacity: 1024,
        }
    }
}

impl SequencerConfig {
    /// Create a config with a custom queue capacity.
    pub fn with_signal_capacity(signal_capacity: usize) -> Self {
        Self { signal_capacity }
    }
}
