pub mod alerts;
pub mod health;
pub mod reporters;
pub mod reports;
