//! Request lifecycle: controller, worker contract, delivery and the
//! command-driven manager loop.

pub mod controller;
pub mod dispatcher;
pub mod listener;
pub mod manager;
pub mod worker;
