pub mod normalizer;
pub mod sampler;

pub use normalizer::{jpeg_data_url, EncodedImage, ImageNormalizer, NormalizeConfig};
pub use sampler::{sample_indices, FfmpegDecoder, FrameSampler, FrameSet, SampledFrame, VideoDecoder};
