pub mod channel;
pub mod consent;
pub mod delivery;
pub mod health;
pub mod outcome;
pub mod request;
pub mod response;
pub mod retry;
