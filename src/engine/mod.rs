pub mod status;
pub mod supervisor;
