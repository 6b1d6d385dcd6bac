pub mod api_router;
pub mod core;
pub mod telegram;
pub mod tickets;
