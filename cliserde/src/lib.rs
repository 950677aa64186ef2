pub mod cli;
pub mod datacontract;
pub mod nrbf;
pub(crate) mod utilities;

pub use utilities::{localize_system, TimezoneLocalizer};
