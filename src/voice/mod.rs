pub mod capture;
pub mod packet;
pub mod state;
pub mod transport;
