//! DWG 文件头内嵌预览图提取。
//!
//! 布局（只读）：
//! - `0x00`：6 字节版本标记，须以 `AC10` 开头；
//! - `0x0D`：`u32` LE 影像区段偏移（image seeker）；
//! - 影像区段：16 字节哨兵 + `u32` 总长 + `u8` 影像数量，
//!   随后每条记录为 `u8 code, u32 LE start, u32 LE size`。
//!
//! BMP 负载缺少 14 字节文件头，需要补齐后才能交给通用解码器。

use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use cadpreview_core::FailureReason;
use tracing::debug;

use crate::read_source;

pub const SIGNATURE: &[u8; 4] = b"AC10";
pub const IMAGE_SEEKER_OFFSET: u64 = 0x0D;
pub const SENTINEL_LEN: usize = 16;
pub const MAX_IMAGES: u8 = 10;
pub const PNG_MAGIC: &[u8; 4] = b"\x89PNG";
pub const BMP_FILE_HEADER_LEN: u32 = 14;

const DIB_HEADER_SIZES: [u32; 3] = [40, 108, 124];
const DIB_BIT_COUNT_OFFSET: usize = 14;
const DIB_COLORS_USED_OFFSET: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageCode {
    Header,
    Bmp,
    Wmf,
    Png,
    Other(u8),
}

impl ImageCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => ImageCode::Header,
            2 => ImageCode::Bmp,
            3 => ImageCode::Wmf,
            6 => ImageCode::Png,
            other => ImageCode::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDirectoryEntry {
    pub code: ImageCode,
    pub start: u32,
    pub size: u32,
}

/// 选中的预览负载，均为可直接解码的完整文件字节。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddedPreview {
    Png(Vec<u8>),
    Bmp(Vec<u8>),
}

impl EmbeddedPreview {
    pub fn bytes(&self) -> &[u8] {
        match self {
            EmbeddedPreview::Png(bytes) | EmbeddedPreview::Bmp(bytes) => bytes,
        }
    }

    pub fn format_name(&self) -> &'static str {
        match self {
            EmbeddedPreview::Png(_) => "png",
            EmbeddedPreview::Bmp(_) => "bmp",
        }
    }
}

/// 合成的 BMP 文件头字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BmpFileHeader {
    pub total_size: u32,
    pub pixel_offset: u32,
}

/// 从磁盘读取 DWG 并提取内嵌预览。
pub fn read_embedded_preview(path: &Path) -> Result<EmbeddedPreview, FailureReason> {
    let data = read_source(path)?;
    extract_embedded_preview(&data)
}

/// 从内存中的 DWG 字节提取内嵌预览（PNG 优先，其次 BMP）。
pub fn extract_embedded_preview(data: &[u8]) -> Result<EmbeddedPreview, FailureReason> {
    let entries = read_image_directory(data)?;
    select_preview(data, &entries)
}

/// 解析影像目录。签名、偏移或数量异常时返回对应失败原因。
pub fn read_image_directory(data: &[u8]) -> Result<Vec<ImageDirectoryEntry>, FailureReason> {
    if data.get(..SIGNATURE.len()) != Some(SIGNATURE.as_slice()) {
        return Err(FailureReason::BadSignature);
    }

    let mut cursor = Cursor::new(data);
    cursor.set_position(IMAGE_SEEKER_OFFSET);
    let seeker = cursor.read_u32::<LittleEndian>().map_err(|_| FailureReason::Truncated)?;
    if seeker == 0 {
        return Err(FailureReason::OutOfRange);
    }

    cursor.set_position(u64::from(seeker));
    let mut sentinel = [0u8; SENTINEL_LEN];
    cursor.read_exact(&mut sentinel).map_err(|_| FailureReason::Truncated)?;
    let overall_size = cursor.read_u32::<LittleEndian>().map_err(|_| FailureReason::Truncated)?;
    let count = cursor.read_u8().map_err(|_| FailureReason::Truncated)?;
    if count == 0 || count > MAX_IMAGES {
        debug!(count, "DWG 影像数量超出范围");
        return Err(FailureReason::OutOfRange);
    }

    let mut entries = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let code = cursor.read_u8().map_err(|_| FailureReason::Truncated)?;
        let start = cursor.read_u32::<LittleEndian>().map_err(|_| FailureReason::Truncated)?;
        let size = cursor.read_u32::<LittleEndian>().map_err(|_| FailureReason::Truncated)?;
        entries.push(ImageDirectoryEntry {
            code: ImageCode::from_code(code),
            start,
            size,
        });
    }
    debug!(seeker, overall_size, count, "已读取 DWG 影像目录");
    Ok(entries)
}

/// 按策略选择预览：同类记录以最后出现者为准；PNG 须带魔数，否则回退 BMP。
pub fn select_preview(
    data: &[u8],
    entries: &[ImageDirectoryEntry],
) -> Result<EmbeddedPreview, FailureReason> {
    let mut png_entry = None;
    let mut bmp_entry = None;
    for entry in entries.iter().filter(|entry| entry.size > 0) {
        match entry.code {
            ImageCode::Png => png_entry = Some(*entry),
            ImageCode::Bmp => bmp_entry = Some(*entry),
            _ => {}
        }
    }

    if let Some(entry) = png_entry {
        match payload(data, &entry) {
            Ok(bytes) if bytes.starts_with(PNG_MAGIC) => {
                return Ok(EmbeddedPreview::Png(bytes.to_vec()));
            }
            Ok(_) => debug!(start = entry.start, "PNG 记录缺少魔数，尝试 BMP"),
            Err(reason) => debug!(start = entry.start, %reason, "PNG 记录越界，尝试 BMP"),
        }
    }

    match bmp_entry {
        Some(entry) => {
            let dib = payload(data, &entry)?;
            reconstruct_bmp(dib).map(EmbeddedPreview::Bmp)
        }
        None => Err(FailureReason::NoOutput),
    }
}

fn payload<'a>(data: &'a [u8], entry: &ImageDirectoryEntry) -> Result<&'a [u8], FailureReason> {
    let start = entry.start as usize;
    let end = start
        .checked_add(entry.size as usize)
        .ok_or(FailureReason::OutOfRange)?;
    data.get(start..end).ok_or(FailureReason::Truncated)
}

/// 计算缺失的 BMP 文件头。DIB 头长度只接受 40/108/124。
pub fn bmp_file_header(dib: &[u8]) -> Result<BmpFileHeader, FailureReason> {
    if dib.len() < 40 {
        return Err(FailureReason::Truncated);
    }
    let mut cursor = Cursor::new(dib);
    let header_size = cursor.read_u32::<LittleEndian>().map_err(|_| FailureReason::Truncated)?;
    if !DIB_HEADER_SIZES.contains(&header_size) {
        return Err(FailureReason::UnsupportedHeader);
    }

    cursor.set_position(DIB_BIT_COUNT_OFFSET as u64);
    let bit_count = cursor.read_u16::<LittleEndian>().map_err(|_| FailureReason::Truncated)?;
    let palette_size = if bit_count <= 8 {
        cursor.set_position(DIB_COLORS_USED_OFFSET as u64);
        let colors_used = cursor.read_u32::<LittleEndian>().map_err(|_| FailureReason::Truncated)?;
        let colors = if colors_used == 0 {
            1u32 << bit_count
        } else {
            colors_used
        };
        colors.checked_mul(4).ok_or(FailureReason::OutOfRange)?
    } else {
        0
    };

    let total_size = u32::try_from(dib.len())
        .ok()
        .and_then(|len| len.checked_add(BMP_FILE_HEADER_LEN))
        .ok_or(FailureReason::OutOfRange)?;
    let pixel_offset = BMP_FILE_HEADER_LEN
        .checked_add(header_size)
        .and_then(|offset| offset.checked_add(palette_size))
        .ok_or(FailureReason::OutOfRange)?;

    Ok(BmpFileHeader {
        total_size,
        pixel_offset,
    })
}

/// 在 DIB 数据前拼接 `BM` 文件头。
pub fn reconstruct_bmp(dib: &[u8]) -> Result<Vec<u8>, FailureReason> {
    let header = bmp_file_header(dib)?;
    let mut file = Vec::with_capacity(header.total_size as usize);
    file.extend_from_slice(b"BM");
    file.write_u32::<LittleEndian>(header.total_size)
        .map_err(|_| FailureReason::Io)?;
    file.write_u16::<LittleEndian>(0).map_err(|_| FailureReason::Io)?;
    file.write_u16::<LittleEndian>(0).map_err(|_| FailureReason::Io)?;
    file.write_u32::<LittleEndian>(header.pixel_offset)
        .map_err(|_| FailureReason::Io)?;
    file.extend_from_slice(dib);
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 构造 DWG 缓冲：签名、seeker、哨兵、目录，然后依次追加负载。
    fn dwg_with_images(images: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let seeker = 0x20u32;
        let directory_len = SENTINEL_LEN + 4 + 1 + images.len() * 9;
        let mut data = b"AC1018".to_vec();
        data.resize(IMAGE_SEEKER_OFFSET as usize, 0);
        data.write_u32::<LittleEndian>(seeker).unwrap();
        data.resize(seeker as usize, 0);
        data.extend_from_slice(&[0xAA; SENTINEL_LEN]);
        data.write_u32::<LittleEndian>(0).unwrap();
        data.push(images.len() as u8);

        let mut offset = seeker as usize + directory_len;
        for (code, bytes) in images {
            data.push(*code);
            data.write_u32::<LittleEndian>(offset as u32).unwrap();
            data.write_u32::<LittleEndian>(bytes.len() as u32).unwrap();
            offset += bytes.len();
        }
        for (_, bytes) in images {
            data.extend_from_slice(bytes);
        }
        data
    }

    fn dib_24bpp(width: i32, height: i32) -> Vec<u8> {
        let row = ((width * 3 + 3) / 4 * 4) as usize;
        let mut dib = Vec::new();
        dib.write_u32::<LittleEndian>(40).unwrap();
        dib.write_i32::<LittleEndian>(width).unwrap();
        dib.write_i32::<LittleEndian>(height).unwrap();
        dib.write_u16::<LittleEndian>(1).unwrap();
        dib.write_u16::<LittleEndian>(24).unwrap();
        dib.write_u32::<LittleEndian>(0).unwrap();
        dib.write_u32::<LittleEndian>((row * height as usize) as u32)
            .unwrap();
        dib.write_i32::<LittleEndian>(2835).unwrap();
        dib.write_i32::<LittleEndian>(2835).unwrap();
        dib.write_u32::<LittleEndian>(0).unwrap();
        dib.write_u32::<LittleEndian>(0).unwrap();
        dib.resize(40 + row * height as usize, 0x7F);
        dib
    }

    #[test]
    fn bmp_header_for_24bpp_dib() {
        let dib = dib_24bpp(2, 2);
        let header = bmp_file_header(&dib).unwrap();
        assert_eq!(header.pixel_offset, 54);
        assert_eq!(header.total_size, 14 + dib.len() as u32);

        let file = reconstruct_bmp(&dib).unwrap();
        assert_eq!(&file[..2], b"BM");
        assert_eq!(u32::from_le_bytes(file[2..6].try_into().unwrap()), header.total_size);
        assert_eq!(&file[6..10], &[0, 0, 0, 0]);
        assert_eq!(u32::from_le_bytes(file[10..14].try_into().unwrap()), 54);
        assert_eq!(&file[14..], dib.as_slice());
    }

    #[test]
    fn palette_defaults_to_full_table_for_low_bit_depth() {
        let mut dib = dib_24bpp(2, 2);
        dib[14..16].copy_from_slice(&8u16.to_le_bytes());
        assert_eq!(bmp_file_header(&dib).unwrap().pixel_offset, 14 + 40 + 256 * 4);

        dib[32..36].copy_from_slice(&16u32.to_le_bytes());
        assert_eq!(bmp_file_header(&dib).unwrap().pixel_offset, 14 + 40 + 16 * 4);
    }

    #[test]
    fn unsupported_dib_header_is_rejected() {
        let mut dib = dib_24bpp(2, 2);
        dib[..4].copy_from_slice(&12u32.to_le_bytes());
        assert_eq!(bmp_file_header(&dib), Err(FailureReason::UnsupportedHeader));
        assert_eq!(bmp_file_header(&dib[..20]), Err(FailureReason::Truncated));
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut data = dwg_with_images(&[(2, dib_24bpp(1, 1))]);
        data[..4].copy_from_slice(b"MC00");
        assert_eq!(extract_embedded_preview(&data), Err(FailureReason::BadSignature));
        assert_eq!(extract_embedded_preview(b"AC"), Err(FailureReason::BadSignature));
    }

    #[test]
    fn zero_seeker_is_rejected() {
        let mut data = dwg_with_images(&[(2, dib_24bpp(1, 1))]);
        data[0x0D..0x11].copy_from_slice(&[0, 0, 0, 0]);
        assert_eq!(extract_embedded_preview(&data), Err(FailureReason::OutOfRange));
    }

    #[test]
    fn image_count_must_be_within_bounds() {
        let mut data = dwg_with_images(&[(2, dib_24bpp(1, 1))]);
        let count_at = 0x20 + SENTINEL_LEN + 4;
        data[count_at] = 0;
        assert_eq!(read_image_directory(&data), Err(FailureReason::OutOfRange));
        data[count_at] = 11;
        assert_eq!(read_image_directory(&data), Err(FailureReason::OutOfRange));
    }

    #[test]
    fn truncated_directory_is_reported() {
        let data = dwg_with_images(&[(2, dib_24bpp(1, 1))]);
        assert_eq!(
            read_image_directory(&data[..0x20 + 8]),
            Err(FailureReason::Truncated)
        );
    }

    #[test]
    fn png_preferred_over_bmp() {
        let png = b"\x89PNG\r\n\x1a\nrest".to_vec();
        let data = dwg_with_images(&[(1, vec![0; 80]), (2, dib_24bpp(1, 1)), (6, png.clone())]);
        let entries = read_image_directory(&data).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].code, ImageCode::Header);
        assert_eq!(extract_embedded_preview(&data), Ok(EmbeddedPreview::Png(png)));
    }

    #[test]
    fn png_without_magic_falls_back_to_bmp() {
        let data = dwg_with_images(&[(6, b"notapng".to_vec()), (2, dib_24bpp(1, 1))]);
        match extract_embedded_preview(&data) {
            Ok(EmbeddedPreview::Bmp(bytes)) => assert_eq!(&bytes[..2], b"BM"),
            other => panic!("expected BMP fallback, got {other:?}"),
        }
    }

    #[test]
    fn last_entry_of_a_kind_wins() {
        let first = dib_24bpp(1, 1);
        let second = dib_24bpp(3, 1);
        let data = dwg_with_images(&[(2, first), (2, second.clone())]);
        let preview = extract_embedded_preview(&data).unwrap();
        assert_eq!(&preview.bytes()[14..], second.as_slice());
    }

    #[test]
    fn wmf_only_has_no_usable_preview() {
        let data = dwg_with_images(&[(3, vec![1, 2, 3, 4])]);
        assert_eq!(extract_embedded_preview(&data), Err(FailureReason::NoOutput));
    }
}
