use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

/// Sample rate of the raw PCM returned by the speech endpoint.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

pub const WAV_HEADER_LEN: usize = 44;

const PCM_FORMAT: u16 = 1;
const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

// Multiple of 3 so that no chunk but the last one carries padding.
const BASE64_ENCODE_CHUNK: usize = 8190;
// Multiple of 4 for the same reason on the way back.
const BASE64_DECODE_CHUNK: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavInfo {
    pub format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    fmt_content: Vec<u8>,
    pub data: Vec<u8>,
}

/// Interprets raw little-endian 16-bit PCM. A dangling odd byte is dropped.
pub fn pcm_from_bytes(bytes: &[u8]) -> Vec<i16> {
    if bytes.len() % 2 != 0 {
        log::debug!("Dropping trailing odd PCM byte ({} bytes total)", bytes.len());
    }
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Wraps mono 16-bit samples into a complete, directly playable WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_size = (samples.len() * 2) as u32;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * block_align as u32;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_size as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_size).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&PCM_FORMAT.to_le_bytes());
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Reads a chunk body, refusing sizes larger than what is left of the input.
fn read_chunk(f: &mut Cursor<&[u8]>, chunk_size: u32, name: &str) -> Result<Vec<u8>> {
    let remaining = (f.get_ref().len() as u64).saturating_sub(f.position());
    if chunk_size as u64 > remaining {
        return Err(anyhow!(
            "Truncated {} chunk: declares {} bytes, {} left",
            name,
            chunk_size,
            remaining
        ));
    }
    let mut buf = vec![0u8; chunk_size as usize];
    f.read_exact(&mut buf)
        .with_context(|| format!("Truncated {} chunk", name))?;
    Ok(buf)
}

/// Reads a WAV file back into its format fields and sample bytes.
/// Chunks other than `fmt ` and `data` are skipped.
pub fn parse_wav(bytes: &[u8]) -> Result<WavInfo> {
    let mut f = Cursor::new(bytes);

    let mut id = [0u8; 4];
    f.read_exact(&mut id).context("WAV too short")?;
    if &id != b"RIFF" {
        return Err(anyhow!("Not a RIFF file"));
    }

    // Skip file size
    f.seek(SeekFrom::Current(4))?;

    f.read_exact(&mut id).context("WAV too short")?;
    if &id != b"WAVE" {
        return Err(anyhow!("Not a WAVE file"));
    }

    let mut fmt_content: Option<Vec<u8>> = None;
    let mut data: Option<Vec<u8>> = None;

    loop {
        let mut chunk_id = [0u8; 4];
        let n = f.read(&mut chunk_id)?;
        if n == 0 {
            break;
        }
        if n < 4 {
            return Err(anyhow!("Unexpected EOF reading chunk ID"));
        }

        let mut size_buf = [0u8; 4];
        f.read_exact(&mut size_buf)?;
        let chunk_size = u32::from_le_bytes(size_buf);

        if &chunk_id == b"fmt " {
            fmt_content = Some(read_chunk(&mut f, chunk_size, "fmt")?);
        } else if &chunk_id == b"data" {
            data = Some(read_chunk(&mut f, chunk_size, "data")?);
            break;
        } else {
            f.seek(SeekFrom::Current(chunk_size as i64))?;
        }
    }

    let fmt_content = fmt_content.ok_or_else(|| anyhow!("Missing fmt chunk"))?;
    if fmt_content.len() < 16 {
        return Err(anyhow!("fmt chunk too short: {} bytes", fmt_content.len()));
    }
    let u16_at = |i: usize| u16::from_le_bytes([fmt_content[i], fmt_content[i + 1]]);

    Ok(WavInfo {
        format: u16_at(0),
        channels: u16_at(2),
        sample_rate: u32::from_le_bytes([
            fmt_content[4],
            fmt_content[5],
            fmt_content[6],
            fmt_content[7],
        ]),
        bits_per_sample: u16_at(14),
        data: data.ok_or_else(|| anyhow!("Missing data chunk"))?,
        fmt_content,
    })
}

/// Merges WAV files by concatenating their data chunks.
/// All inputs must share the same fmt chunk.
pub fn merge_wav(inputs: &[&[u8]]) -> Result<Vec<u8>> {
    let (first, rest) = inputs
        .split_first()
        .ok_or_else(|| anyhow!("Nothing to merge"))?;

    let base = parse_wav(first).context("Failed to parse WAV #1")?;
    let mut infos = vec![base];
    for (i, input) in rest.iter().enumerate() {
        let info = parse_wav(input).with_context(|| format!("Failed to parse WAV #{}", i + 2))?;
        if info.fmt_content != infos[0].fmt_content {
            return Err(anyhow!(
                "WAV format mismatch in input #{}. All segments must have same sample rate/channels.",
                i + 2
            ));
        }
        infos.push(info);
    }

    let fmt = &infos[0].fmt_content;
    let total_data_size: u32 = infos.iter().map(|i| i.data.len() as u32).sum();

    let mut out = Cursor::new(Vec::new());
    out.write_all(b"RIFF")?;
    // 4 (WAVE) + 8 (fmt hdr) + fmt_len + 8 (data hdr) + data_len
    let chunk_size = 4 + 8 + fmt.len() as u32 + 8 + total_data_size;
    out.write_all(&chunk_size.to_le_bytes())?;
    out.write_all(b"WAVE")?;

    out.write_all(b"fmt ")?;
    out.write_all(&(fmt.len() as u32).to_le_bytes())?;
    out.write_all(fmt)?;

    out.write_all(b"data")?;
    out.write_all(&total_data_size.to_le_bytes())?;
    for info in &infos {
        out.write_all(&info.data)?;
    }

    Ok(out.into_inner())
}

/// Base64-encodes a payload chunk by chunk.
pub fn encode_base64(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(BASE64_ENCODE_CHUNK) {
        STANDARD.encode_string(chunk, &mut out);
    }
    out
}

/// Decodes base64 chunk by chunk, ignoring embedded whitespace.
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let compact: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    let mut out = Vec::with_capacity(compact.len() / 4 * 3);
    for (i, chunk) in compact.chunks(BASE64_DECODE_CHUNK).enumerate() {
        STANDARD
            .decode_vec(chunk, &mut out)
            .with_context(|| format!("Invalid base64 in chunk {}", i))?;
    }
    Ok(out)
}
