//! Combining closed-set and open-set results into one verdict.

mod policy;

pub use policy::ArbitrationPolicy;
