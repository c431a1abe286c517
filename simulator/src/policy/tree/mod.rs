//! JSON decision-tree policies.
//!
//! Definitions deserialize from JSON (`types`), are validated and
//! compiled into flat node arenas at load (`validation`), and are
//! evaluated against typed field tables (`context`, `interpreter`).

pub mod context;
pub mod interpreter;
pub mod types;
pub mod validation;

pub use context::{ContextError, EvalContext};
pub use interpreter::{EvalError, EvalWarning};
pub use types::{ActionKind, ComputeDef, ExprDef, NodeDef, PolicyDef, Scalar, ValueDef};
pub use validation::{CompiledTree, Node, TreeError, TreeKind, MAX_TREE_DEPTH};
