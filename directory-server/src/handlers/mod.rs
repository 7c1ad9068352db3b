pub mod command;
pub mod conn;
pub mod http;

pub use command::handle_request;
pub use conn::handle_connection;
