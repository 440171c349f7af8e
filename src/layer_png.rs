//! 图层网格与 PNG 图像之间的转换
//!
//! 网格按 z 切片横向排列：宽 = sx * sz，高 = sy，图像上下翻转
//! （第 0 行是 y 最大的一层）。尺寸写在 tEXt 块中。
//! 颜色网格存为 8 位 RGBA，索引网格存为 8 位灰度，灰度值即索引。

use crate::error::{FormatError, Result};
use crate::model::{Bounds, DataKind, Rgba, VoxelGrid};

const KEY_VERSION: &str = "SproxelFileVersion";
const KEY_DIMS: [&str; 3] = ["VoxelGridDimX", "VoxelGridDimY", "VoxelGridDimZ"];

/// 图像宽高，空网格写成 1x1
fn image_size(size: [u32; 3]) -> std::result::Result<(u32, u32), FormatError> {
    let [sx, sy, sz] = size;
    if size.contains(&0) {
        return Ok((1, 1));
    }
    let width = sx.checked_mul(sz).ok_or(FormatError::GridTooLarge(size))?;
    Ok((width, sy))
}

/// 体素局部坐标在图像中的像素序号
fn pixel_index(local: [u32; 3], size: [u32; 3], width: u32) -> usize {
    let [x, y, z] = local;
    let px = x + z * size[0];
    let py = size[1] - 1 - y;
    py as usize * width as usize + px as usize
}

fn local_coords(size: [u32; 3]) -> impl Iterator<Item = [u32; 3]> {
    let [sx, sy, sz] = size;
    (0..sz).flat_map(move |z| (0..sy).flat_map(move |y| (0..sx).map(move |x| [x, y, z])))
}

/// 把网格编码为 PNG；网格偏移不写入图像
pub fn encode_layer_png(grid: &VoxelGrid) -> Result<Vec<u8>> {
    let size = grid.size();
    let bounds = grid.bounds();
    let (width, height) = image_size(size)?;
    let empty = bounds.is_empty();

    let (color_type, pixels) = match grid.kind() {
        DataKind::Color => {
            let mut pixels = vec![0u8; width as usize * height as usize * 4];
            if let (Some(colors), false) = (grid.colors(), empty) {
                for local in local_coords(size) {
                    let at = pixel_index(local, size, width) * 4;
                    let c = colors[bounds.linear_index(local)];
                    pixels[at..at + 4].copy_from_slice(&c.to_bytes());
                }
            }
            (png::ColorType::Rgba, pixels)
        }
        DataKind::Indexed => {
            let mut pixels = vec![0u8; width as usize * height as usize];
            if let (Some(indices), false) = (grid.indices(), empty) {
                for local in local_coords(size) {
                    pixels[pixel_index(local, size, width)] = indices[bounds.linear_index(local)];
                }
            }
            (png::ColorType::Grayscale, pixels)
        }
    };

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(color_type);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.add_text_chunk(KEY_VERSION.to_string(), "1".to_string())?;
        for (key, dim) in KEY_DIMS.iter().zip(size) {
            encoder.add_text_chunk(key.to_string(), dim.to_string())?;
        }
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&pixels)?;
        writer.finish()?;
    }
    Ok(out)
}

/// 从 PNG 解码网格，网格位于原点
pub fn decode_layer_png(bytes: &[u8]) -> Result<VoxelGrid> {
    let mut decoder = png::Decoder::new(bytes);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info()?;

    let mut size = [0u32; 3];
    for (axis, key) in KEY_DIMS.iter().enumerate() {
        let chunk = reader
            .info()
            .uncompressed_latin1_text
            .iter()
            .find(|t| t.keyword == *key)
            .ok_or_else(|| FormatError::BadLayerImage(format!("缺少 {} 文本块", key)))?;
        size[axis] = chunk
            .text
            .trim()
            .parse()
            .map_err(|_| FormatError::BadLayerImage(format!("{} 不是整数: {:?}", key, chunk.text)))?;
    }

    let mut buf = vec![0u8; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buf)?;

    let bounds = Bounds::new([0; 3], size);
    let kind = match frame.color_type {
        png::ColorType::Grayscale => DataKind::Indexed,
        png::ColorType::Rgba | png::ColorType::Rgb => DataKind::Color,
        other => {
            return Err(FormatError::BadLayerImage(format!("不支持的颜色类型 {:?}", other)).into())
        }
    };
    if bounds.is_empty() {
        return Ok(VoxelGrid::new(bounds, kind));
    }

    let (width, height) = image_size(size)?;
    if frame.width != width || frame.height != height {
        return Err(FormatError::BadLayerImage(format!(
            "图像尺寸 {}x{} 与网格 {:?} 不符",
            frame.width, frame.height, size
        ))
        .into());
    }

    let channels = frame.color_type.samples();
    let stride = frame.line_size;
    let mut grid = VoxelGrid::new(bounds, kind);
    for local in local_coords(size) {
        let p = pixel_index(local, size, width);
        let (row, col) = (p / width as usize, p % width as usize);
        let at = row * stride + col * channels;
        let i = bounds.linear_index(local);
        match kind {
            DataKind::Indexed => {
                if let Some(indices) = grid.indices_mut() {
                    indices[i] = buf[at];
                }
            }
            DataKind::Color => {
                let alpha = if channels == 4 { buf[at + 3] } else { 255 };
                let c = Rgba::from_bytes([buf[at], buf[at + 1], buf[at + 2], alpha]);
                if let Some(colors) = grid.colors_mut() {
                    colors[i] = c;
                }
            }
        }
    }
    Ok(grid)
}
