pub mod chat;
pub mod health;
pub mod knowledge;
pub mod tenants;
