pub mod fits;
pub mod header;
pub mod image_io;
pub mod naming;
