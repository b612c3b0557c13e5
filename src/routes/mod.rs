pub mod key_routes;
pub mod system_routes;
