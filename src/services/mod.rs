pub mod dispatcher;
pub mod replay_queue;
pub mod throttle;
pub mod triggers;
