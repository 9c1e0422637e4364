pub mod pause;
pub mod protect;
pub mod restart;
pub mod skip;
pub mod start;
pub mod status;
pub mod stop;
