pub mod client;
pub mod conversation;
pub mod errors;
pub mod session;
pub mod text;
pub mod upstream;
