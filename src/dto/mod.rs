pub mod reconcile_dto;
