//! The `sampler` module turns metric sources into the periodic telemetry
//! feed the broadcaster fans out: one timer per metric family, one envelope
//! per node per tick.

pub mod source;
pub mod ticker;

pub use source::{MetricFamily, MetricSource, Sample, SampleError, SimulatedSource};
pub use ticker::run_sampler;
