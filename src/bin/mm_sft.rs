//! mm-sft 命令行
//!
//! - `images`: 图片目录 -> SFT 训练数据
//! - `video`: 视频 -> 描述
//! - `text`: JSONL 文本批处理
//! - `map`: JSONL 字段映射与模板改写（不调用模型）

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use mm_sft::api::{caption, mapping, sft, text};
use mm_sft::core::config::PipelineConfig;
use mm_sft::core::invoker::{ModelInvoker, OpenAiCompatInvoker};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mm-sft")]
#[command(version)]
#[command(about = "多模态数据处理：图片/视频/文本 -> 评测与 SFT 数据集")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// JSON5 配置文件
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 覆盖模型名称
    #[arg(long, global = true)]
    model: Option<String>,

    /// 覆盖 API 地址
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// 覆盖 API 密钥（默认读取 OPENAI_API_KEY）
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// 并发数
    #[arg(short = 'j', long, global = true)]
    concurrency: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// 为目录下的图片生成问答式 SFT 数据
    Images {
        /// 图片目录
        #[arg(short, long)]
        input: PathBuf,
        /// 输出 JSONL
        #[arg(short, long)]
        output: PathBuf,
        /// 最多处理的图片数
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// 为视频生成文字描述
    Video {
        /// 视频文件
        #[arg(required = true)]
        videos: Vec<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
        /// 每个视频抽取的帧数
        #[arg(long)]
        frames: Option<usize>,
    },
    /// 对 JSONL 文本记录调用模型并生成摘要
    Text {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// 加在输入文本前的指令
        #[arg(long)]
        instruction: Option<String>,
        /// `{{field}}` 模板，替代 input_text 字段
        #[arg(long)]
        template: Option<String>,
        /// 摘要最大字符数
        #[arg(long, default_value_t = 100)]
        summary_chars: usize,
    },
    /// 字段映射 + 模板渲染 + 输出映射
    Map {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// 字段映射 `源=目标`，可重复
        #[arg(long = "field", value_parser = parse_pair)]
        fields: Vec<(String, String)>,
        /// `{{field}}` 模板，渲染结果写入 prompt
        #[arg(long, conflicts_with = "template_file")]
        template: Option<String>,
        /// 从文件读取模板
        #[arg(long)]
        template_file: Option<PathBuf>,
        /// 输出映射 `键=字段名或字面量`，可重复
        #[arg(long = "output-field", value_parser = parse_pair, required = true)]
        output_fields: Vec<(String, String)>,
    },
}

fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("期望 KEY=VALUE 格式: {}", raw)),
    }
}

fn load_config(args: &CommonArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("无法加载配置 {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(model) = &args.model {
        config.model.model = model.clone();
    }
    if let Some(base_url) = &args.base_url {
        config.model.base_url = base_url.clone();
    }
    if let Some(api_key) = &args.api_key {
        config.model.api_key = Some(api_key.clone());
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    Ok(config)
}

fn invoker(config: &PipelineConfig) -> Result<Arc<dyn ModelInvoker>> {
    let invoker = OpenAiCompatInvoker::new(&config.model).context("无法创建模型客户端")?;
    Ok(Arc::new(invoker))
}

fn main() -> Result<()> {
    mm_sft::init_logging();
    let cli = Cli::parse();
    let mut config = load_config(&cli.common)?;

    match cli.command {
        Commands::Images {
            input,
            output,
            limit,
        } => {
            config.validate()?;
            let summary = sft::generate_sft_dataset(&input, &output, &config, invoker(&config)?, limit)?;
            println!(
                "images={} succeeded={} failed={} examples={} output={}",
                summary.images,
                summary.succeeded,
                summary.failed,
                summary.examples,
                summary.output.display()
            );
            if let Some(errors) = summary.errors_output {
                println!("errors={}", errors.display());
            }
        }
        Commands::Video {
            videos,
            output,
            frames,
        } => {
            if let Some(frames) = frames {
                config.video.num_frames = frames;
            }
            config.validate()?;
            let report = caption::caption_videos(
                &videos,
                &output,
                &config,
                caption::ffmpeg_decoder(&config),
                invoker(&config)?,
            )?;
            println!(
                "videos={} succeeded={} failed={} output={}",
                report.total(),
                report.succeeded,
                report.failed,
                output.display()
            );
        }
        Commands::Text {
            input,
            output,
            instruction,
            template,
            summary_chars,
        } => {
            config.validate()?;
            let options = text::TextOptions {
                instruction,
                template,
                summary_chars,
            };
            let report = text::run_text_batch(&input, &output, &config, invoker(&config)?, &options)?;
            println!(
                "records={} succeeded={} failed={} output={}",
                report.total(),
                report.succeeded,
                report.failed,
                output.display()
            );
        }
        Commands::Map {
            input,
            output,
            fields,
            template,
            template_file,
            output_fields,
        } => {
            let template = match template_file {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("无法读取模板 {}", path.display()))?,
                ),
                None => template,
            };
            let options = mapping::MappingOptions {
                fields,
                template,
                output: output_fields,
            };
            let report = mapping::run_mapping_batch(&input, &output, &options, config.concurrency)?;
            println!(
                "records={} succeeded={} failed={} output={}",
                report.total(),
                report.succeeded,
                report.failed,
                output.display()
            );
        }
    }

    info!("🏁 Done");
    Ok(())
}
