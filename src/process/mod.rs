//! Signal processing between raw plate data and curve fitting: reference
//! summaries, background subtraction, normalisation and replicate handling.

mod normalize;
mod references;
mod replicates;
mod stats;

pub use normalize::{normalise, normalise_sem, normalise_series};
pub use references::{compute_references, z_prime, z_prime_median, Background, References};
pub use replicates::{
    aggregate_doses, aggregate_pointwise, replicate_correlation, AggregatedPoint, CorrelationFit,
    DoseReading, SampleSeries,
};
pub use stats::{
    mad_std, mean, median, micromoles_to_moles, moles_to_micromoles, pearson, sem, std_dev,
};
