//! Multi-tenant retrieval-augmented chat backend.

pub mod core;
pub mod llm;
pub mod pipeline;
pub mod rag;
pub mod server;
pub mod state;
pub mod tenant;
