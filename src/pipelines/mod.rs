pub mod builder;
pub mod paired_qc;
pub mod sink;
pub mod supervisor;
