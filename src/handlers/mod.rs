pub mod auth;
pub mod contact_handlers;
pub mod health_handlers;
pub mod media_handlers;
pub mod object_handlers;
pub mod project_handlers;
pub mod settings_handlers;
