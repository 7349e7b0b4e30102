pub mod compression;
pub mod contact_service;
pub mod image_repository;
pub mod media_service;
pub mod object_store;
pub mod pipeline;
pub mod project_service;
pub mod settings_service;
pub mod validation;
