pub mod builder;
pub mod context;
pub mod defaults;
pub mod extraction;
pub mod partition;
pub mod progress;
pub mod runtime;
pub mod synthesis;
pub mod traits;
