pub mod check;
pub mod simulate;

pub use check::{check_config, load_config};
pub use simulate::{simulate, SimulateParams};
