pub mod activity_breakdown;
pub mod activity_tracker;
pub mod app_config;
pub mod boss;
pub mod cards;
pub mod command_parser;
pub mod event_handler;
pub mod event_scoring;
pub mod event_store;
pub mod order_templates;
pub mod rolling_caps;
