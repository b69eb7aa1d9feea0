mod common;

mod replay_queue_tests;
