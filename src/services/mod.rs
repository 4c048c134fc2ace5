pub mod notification_service;
pub mod reconcile;
pub mod template_service;
