//! 记录级阶段适配器：把各个组件包装成 pipeline 阶段

pub mod media;
pub mod model;
pub mod text;

pub use media::{ImageEncodeStage, MessageStage, VideoFrameStage};
pub use model::{ModelInvokeStage, ResponseParseStage, SftFormatStage};
pub use text::{FieldMapStage, OutputMapStage, SummarizeStage, TemplateStage, TextPromptStage};
