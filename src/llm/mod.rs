pub mod describe;
pub mod gemini;
pub mod media;

pub use describe::{DescribeError, DescribeImageInput, ImageDescriber, ImageDescription};
pub use gemini::{GeminiDescriber, GeminiSettings};
