//! Unit and scenario tests

mod test_inventory;
mod test_pipeline;
mod test_registry;
mod test_scheduler;
mod test_server;
