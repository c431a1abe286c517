//! Domain models: agents, transactions, system state, and events.

pub mod agent;
pub mod event;
pub mod state;
pub mod transaction;

pub use agent::{Agent, AgentError, StateValue};
pub use event::{Event, EventBody, EventLog};
pub use state::SystemState;
pub use transaction::{Transaction, TransactionError, TransactionStatus};
