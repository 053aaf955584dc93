pub mod auth_service;
pub mod lesson_store;
