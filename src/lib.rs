pub mod accounts;
pub mod bookkeeping;
pub mod capture;
pub mod catalog;
pub mod currencies;
pub mod error;
pub mod fmt;
pub mod migrations;
pub mod models;
pub mod planner;
pub mod remote;
pub mod schema;
pub mod settings;
pub mod store;
pub mod templates;
pub mod transactions;
pub mod views;
