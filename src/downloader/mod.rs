pub mod finalize_worker;
pub mod finalizer;
pub mod fragment;
pub mod metadata;
pub mod planner;
pub mod scaler;
pub mod state;
pub mod throttle;
pub mod ultra;
pub mod worker;

pub use planner::*;
pub use scaler::{AutoScaler, AutoScalerConfig};
pub use state::*;
pub use throttle::*;
pub use ultra::*;
