// Core modules: blob materialization, the production graph, and the cursor on top.
pub mod bits;
pub mod blob;
pub mod cache;
pub mod codec;
pub mod column;
pub mod cursor;
pub mod error;
mod function;
pub mod options;
pub mod pagemap;
pub mod physical;
pub mod production;
pub mod schema;
pub mod stop;
pub mod types;
pub mod worker;
pub mod xform;
