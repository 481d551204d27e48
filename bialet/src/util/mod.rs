//! Small filesystem helpers shared across the resolver, module loader, and
//! supervisor.

pub mod fs;
