//! BMP snapshots of stream buffers.

use std::path::Path;

use thiserror::Error;

use crate::runtime::{BufferId, BufferMetadata, StreamId};

use super::convert::{self, ConvertError};

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("Failed to write image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Pixel data does not match {width}x{height} RGBA")]
    SizeMismatch { width: u32, height: u32 },
}

/// `{base}_sid{stream}_frm{frame}_bid{buffer}.bmp`
pub fn snapshot_file_name(base: &str, stream: StreamId, frame_number: i64, buffer: BufferId) -> String {
    format!("{base}_sid{}_frm{frame_number}_bid{}.bmp", stream.0, buffer.0)
}

/// Write tightly packed RGBA8 pixels as a 32-bit BMP.
pub fn save_rgba_bmp(path: &Path, width: u32, height: u32, rgba: &[u8]) -> Result<(), SnapshotError> {
    if rgba.len() != width as usize * height as usize * convert::RGBA_COMPONENTS {
        return Err(SnapshotError::SizeMismatch { width, height });
    }
    image::save_buffer_with_format(
        path,
        rgba,
        width,
        height,
        image::ColorType::Rgba8,
        image::ImageFormat::Bmp,
    )?;
    Ok(())
}

/// Convert a locked CPU buffer and write it to `path`.
pub fn save_buffer_bmp(path: &Path, metadata: &BufferMetadata, data: &[u8]) -> Result<(), SnapshotError> {
    let rgba = convert::to_rgba8(metadata, data)?;
    save_rgba_bmp(path, metadata.width as u32, metadata.height as u32, &rgba)?;
    log::info!("Saved snapshot {}", path.display());
    Ok(())
}
