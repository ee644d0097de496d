pub mod agent;
pub mod session;
pub mod workflow;

pub use agent::*;
pub use session::*;
pub use workflow::*;
