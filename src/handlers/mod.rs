pub mod extract;
pub mod health_handlers;
pub mod object_handlers;
pub mod project_handlers;
