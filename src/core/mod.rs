pub mod compare;
pub mod dataset;
pub mod dip_model;
pub mod error;
pub mod exclusion;
pub mod freq_table;
pub mod illusion;
pub mod lsq;
pub mod observation;
pub mod slope;
pub mod stats;
