pub mod autoplay;
pub mod harness;
pub mod reports;
pub mod tester;

pub use autoplay::AutoplayStrategy;
pub use harness::{Operator, SeededSave, SessionPlan, SessionSummary, SessionTester};
pub use tester::*;
