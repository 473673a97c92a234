//! Contract model and per-invocation value types.
//!
//! Everything here is plain data: the compiled contract as deserialized
//! from JSON, the fact set built during an invocation, and the request,
//! verdict, and response shapes that cross the engine boundary.

pub mod contract;
pub mod fact;
pub mod invocation;
pub mod verdict;

pub use contract::{
    Comparator, Comparison, Condition, Contract, DenyVerdict, DerivationArg, Derivation,
    DerivedFactDef, EntityDef, EntityTransition, ErrorEnvelope, EscalateVerdict, FactDef,
    FactSource, FlagVerdict, OnMissing, OperationDef, RequireVerdict, RuleDef, TransitionRef,
    VerdictDef,
};
pub use fact::FactSet;
pub use invocation::{AppliedTransition, Input, Outcome, Request, Response};
pub use verdict::{Resolution, Verdict, VerdictType};
