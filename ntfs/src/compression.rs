// LZNT1 decompression
// A compression unit is a sequence of chunks. Each chunk starts with a
// 2-byte header: low 12 bits are the stored chunk size minus one, bits
// 12-14 are the signature (always 3), bit 15 marks a compressed chunk.
// Compressed chunks interleave tag bytes with literals and 2-byte phrase
// tokens whose offset/length split depends on how far the chunk has
// decompressed.

use lodestone_core::LodestoneError;

const CHUNK_SIGNATURE: u16 = 3;

/// Decompress one LZNT1 compression unit from `input` into `output`.
///
/// `output` must be sized to the unit's decompressed length (the
/// compression unit size). Returns the number of bytes produced; decoding
/// stops cleanly at a zero chunk header, and the remainder of `output` is
/// zero-filled (sub-chunk tails of a unit read as zero).
pub fn decompress_unit(input: &[u8], output: &mut [u8]) -> Result<usize, LodestoneError> {
    let mut in_pos = 0usize;
    let mut out_pos = 0usize;

    while in_pos + 2 <= input.len() && out_pos < output.len() {
        let header = u16::from_le_bytes([input[in_pos], input[in_pos + 1]]);
        in_pos += 2;

        if header == 0 {
            break; // terminator
        }
        let chunk_size = ((header & 0x0FFF) as usize) + 1;
        let signature = (header >> 12) & 0x7;
        let compressed = header & 0x8000 != 0;

        if signature != CHUNK_SIGNATURE {
            return Err(LodestoneError::CompressionCorrupted(format!(
                "chunk header signature {} at offset {}",
                signature,
                in_pos - 2
            )));
        }
        let chunk_end = in_pos + chunk_size;
        if chunk_end > input.len() {
            return Err(LodestoneError::CompressionCorrupted(format!(
                "chunk of {} bytes at offset {} exceeds the unit's {} input bytes",
                chunk_size,
                in_pos - 2,
                input.len()
            )));
        }

        if !compressed {
            // Stored chunk, copied verbatim.
            if out_pos + chunk_size > output.len() {
                return Err(LodestoneError::CompressionCorrupted(format!(
                    "stored chunk of {} bytes overflows the unit at offset {}",
                    chunk_size, out_pos
                )));
            }
            output[out_pos..out_pos + chunk_size].copy_from_slice(&input[in_pos..chunk_end]);
            out_pos += chunk_size;
            in_pos = chunk_end;
            continue;
        }

        let chunk_out_start = out_pos;
        in_pos = decompress_chunk(
            input,
            in_pos,
            chunk_end,
            output,
            &mut out_pos,
            chunk_out_start,
        )?;
    }

    // Anything the chunks did not produce reads as zero.
    for byte in output[out_pos..].iter_mut() {
        *byte = 0;
    }
    Ok(out_pos)
}

fn decompress_chunk(
    input: &[u8],
    mut in_pos: usize,
    chunk_end: usize,
    output: &mut [u8],
    out_pos: &mut usize,
    chunk_out_start: usize,
) -> Result<usize, LodestoneError> {
    while in_pos < chunk_end {
        let tag = input[in_pos];
        in_pos += 1;

        for bit in 0..8 {
            if in_pos >= chunk_end {
                break;
            }
            if tag & (1 << bit) == 0 {
                // Literal byte
                if *out_pos >= output.len() {
                    return Err(LodestoneError::CompressionCorrupted(
                        "literal overflows the unit".to_string(),
                    ));
                }
                output[*out_pos] = input[in_pos];
                *out_pos += 1;
                in_pos += 1;
            } else {
                // Phrase token: back-reference into this chunk's output
                if in_pos + 2 > chunk_end {
                    return Err(LodestoneError::CompressionCorrupted(
                        "truncated phrase token".to_string(),
                    ));
                }
                let token = u16::from_le_bytes([input[in_pos], input[in_pos + 1]]);
                in_pos += 2;

                let chunk_pos = *out_pos - chunk_out_start;
                if chunk_pos == 0 {
                    return Err(LodestoneError::CompressionCorrupted(
                        "phrase token at chunk start".to_string(),
                    ));
                }
                // The offset field widens as the chunk fills: enough bits
                // for chunk_pos - 1, at least 4.
                let mut offset_bits = 4;
                while (1usize << offset_bits) < chunk_pos {
                    offset_bits += 1;
                }
                let length_bits = 16 - offset_bits;
                let length = ((token as usize) & ((1 << length_bits) - 1)) + 3;
                let offset = ((token as usize) >> length_bits) + 1;

                if offset > chunk_pos {
                    return Err(LodestoneError::CompressionCorrupted(format!(
                        "phrase offset {} exceeds chunk position {}",
                        offset, chunk_pos
                    )));
                }
                if *out_pos + length > output.len() {
                    return Err(LodestoneError::CompressionCorrupted(format!(
                        "phrase of {} bytes overflows the unit at offset {}",
                        length, *out_pos
                    )));
                }
                // Byte-by-byte: phrases may overlap their own output.
                for _ in 0..length {
                    output[*out_pos] = output[*out_pos - offset];
                    *out_pos += 1;
                }
            }
        }
    }
    Ok(in_pos)
}
