pub mod crc;
pub mod digest;
pub mod io;
