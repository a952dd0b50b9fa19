pub mod book;
pub mod order;
pub mod outcome;
pub mod routing;
pub mod session;
