pub mod answer;
pub mod notification;
pub mod option;
pub mod question;
pub mod submission;
pub mod template;
