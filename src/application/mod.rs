// Application layer: evaluation, enumeration, CQRS handlers, feed consumer
pub mod command_handlers;
pub mod commands;
pub mod enumeration;
pub mod evaluator;
pub mod events;
pub mod feed_consumer;
pub mod queries;
pub mod query_engine;
pub mod query_handlers;
