// handlers/mod.rs
// Re-exports all handlers - routes.rs uses `use handlers::*`

mod databases;
mod health;
mod snapshots;

pub use databases::*;
pub use health::*;
pub use snapshots::*;
