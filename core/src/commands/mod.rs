mod demo;
mod health;
mod produce;
mod queue;
mod shared;
mod worker;

pub(crate) use demo::run_demo;
pub(crate) use health::check_stores;
pub(crate) use produce::run_producer;
pub(crate) use queue::{queue_obliterate, queue_stats};
pub(crate) use worker::run_worker;
