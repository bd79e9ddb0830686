//! cfdi-service: issuance, consolidation, payment complements and
//! cancellation of Mexican fiscal invoices (CFDI).

pub mod config;
pub mod dtos;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod line_items;
pub mod middleware;
pub mod models;
pub mod notifications;
pub mod repository;
pub mod services;
pub mod startup;
