//! Executable side of function-call capabilities.
//!
//! Capabilities reference implementations by key; the [`FunctionTable`]
//! maps those keys to registered callables.

pub mod builtin;
pub mod function_table;

pub use builtin::{builtin_capabilities, builtin_function_table, register_builtins};
pub use function_table::{Arguments, CapabilityFn, FunctionTable};
