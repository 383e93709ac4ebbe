//! Outputs

pub mod file;
pub mod memory;
pub mod stdout;
pub mod tcp;

pub use file::FileOutput;
pub use memory::MemoryOutput;
pub use stdout::StdoutOutput;
pub use tcp::TcpOutput;
