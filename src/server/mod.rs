pub mod extract;
pub mod handlers;
pub mod router;
pub mod tenant_key;

pub use router::router;
