pub mod builder;
pub mod category;
pub mod classifier;
pub mod dedupe;
pub mod learning;
pub mod orchestrator;
pub mod settings;


pub use category::Category;
pub use orchestrator::{Orchestrator, RefreshSummary};
pub use settings::*;
