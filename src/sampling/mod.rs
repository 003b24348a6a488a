pub mod period;
pub mod sampler;

pub use period::{periods, Period};
pub use sampler::EstimationSampler;
