//! 编解码错误类型

use thiserror::Error;

/// 文件格式错误：输入数据无法按格式解析
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FormatError {
    #[error("文件标识错误: 期望 {expected}, 实际 {found}")]
    BadMagic { expected: String, found: String },

    #[error("不支持的格式版本 {0}")]
    UnsupportedVersion(u32),

    #[error("不支持的压缩方式 {0}")]
    UnsupportedCompression(u8),

    #[error("数据被截断: 需要 {needed} 字节, 只有 {available} 字节")]
    Truncated { needed: usize, available: usize },

    #[error("偏移 {offset} 处的游程长度为 0")]
    ZeroRun { offset: usize },

    #[error("游程超出体素总数 {total}")]
    RunOverflow { total: usize },

    #[error("{what} 越界: 偏移 {offset}, 长度 {len}, 缓冲区 {buffer_len} 字节")]
    OffsetOutOfRange {
        what: &'static str,
        offset: usize,
        len: usize,
        buffer_len: usize,
    },

    #[error("{0} 缺少结尾的空字符")]
    UnterminatedName(&'static str),

    #[error("解压后长度 {actual} 与声明的 {declared} 不一致")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("压缩数据损坏: {0}")]
    Inflate(String),

    #[error("网格尺寸过大: {0:?}")]
    GridTooLarge([u32; 3]),

    #[error("图块集数据过大: {0} 字节")]
    AtlasTooLarge(usize),

    #[error("归档缺少条目 {0}")]
    MissingEntry(String),

    #[error("精灵 {sprite} 引用了不存在的图层 {index}")]
    LayerIndexOutOfRange { sprite: usize, index: usize },

    #[error("图层图像无效: {0}")]
    BadLayerImage(String),
}

/// 库的统一错误类型
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("元数据 JSON 无效: {0}")]
    Json(#[from] serde_json::Error),

    #[error("归档错误: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("PNG 编码失败: {0}")]
    PngEncode(#[from] png::EncodingError),

    #[error("PNG 解码失败: {0}")]
    PngDecode(#[from] png::DecodingError),

    #[error("工程中没有第 {0} 个精灵")]
    NoSuchSprite(usize),

    #[error("像素流只能编码颜色网格，请先通过调色板转换索引网格")]
    NotColorData,
}

pub type Result<T> = std::result::Result<T, Error>;
