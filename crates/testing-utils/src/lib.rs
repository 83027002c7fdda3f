//! 跨 crate 共享的测试数据构造器

pub mod builders;

pub use builders::{JobBuilder, JobRunBuilder};
