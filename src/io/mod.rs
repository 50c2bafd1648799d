mod file;
mod memory;
mod range_reader;

pub use file::FileReader;
pub use memory::MemoryReader;
pub use range_reader::{
    read_i32_le, read_u16_le, read_u24_le, read_u32_le, read_u48_le, read_u64_le, RangeReader,
    RangeResponse,
};
