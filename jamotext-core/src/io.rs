//! Little-endian primitives for the binary model format.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::JamoTextErrorKind;
use crate::JamoTextResult;

pub fn write_i32<W: Write>(writer: &mut W, value: i32) -> JamoTextResult<()> {
    writer
        .write_i32::<LittleEndian>(value)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))
}

pub fn read_i32<R: Read>(reader: &mut R) -> JamoTextResult<i32> {
    reader
        .read_i32::<LittleEndian>()
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))
}

pub fn write_i64<W: Write>(writer: &mut W, value: i64) -> JamoTextResult<()> {
    writer
        .write_i64::<LittleEndian>(value)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))
}

pub fn read_i64<R: Read>(reader: &mut R) -> JamoTextResult<i64> {
    reader
        .read_i64::<LittleEndian>()
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))
}

pub fn write_u8<W: Write>(writer: &mut W, value: u8) -> JamoTextResult<()> {
    writer
        .write_u8(value)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))
}

pub fn read_u8<R: Read>(reader: &mut R) -> JamoTextResult<u8> {
    reader
        .read_u8()
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))
}

pub fn write_bool<W: Write>(writer: &mut W, value: bool) -> JamoTextResult<()> {
    write_u8(writer, value as u8)
}

pub fn read_bool<R: Read>(reader: &mut R) -> JamoTextResult<bool> {
    Ok(read_u8(reader)? != 0)
}

pub fn write_f32<W: Write>(writer: &mut W, value: f32) -> JamoTextResult<()> {
    writer
        .write_f32::<LittleEndian>(value)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))
}

pub fn read_f32<R: Read>(reader: &mut R) -> JamoTextResult<f32> {
    reader
        .read_f32::<LittleEndian>()
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))
}

pub fn write_f64<W: Write>(writer: &mut W, value: f64) -> JamoTextResult<()> {
    writer
        .write_f64::<LittleEndian>(value)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))
}

pub fn read_f64<R: Read>(reader: &mut R) -> JamoTextResult<f64> {
    reader
        .read_f64::<LittleEndian>()
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))
}

pub fn write_f32_slice<W: Write>(writer: &mut W, values: &[f32]) -> JamoTextResult<()> {
    for &value in values {
        write_f32(writer, value)?;
    }
    Ok(())
}

pub fn read_f32_into<R: Read>(reader: &mut R, values: &mut [f32]) -> JamoTextResult<()> {
    reader
        .read_f32_into::<LittleEndian>(values)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))
}

pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> JamoTextResult<()> {
    writer
        .write_all(bytes)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))
}

pub fn read_bytes<R: Read>(reader: &mut R, len: usize) -> JamoTextResult<Vec<u8>> {
    let mut buffer = vec![0u8; len];
    reader
        .read_exact(&mut buffer)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
    Ok(buffer)
}

/// Zero-terminated UTF-8 string, the entry encoding of the dictionary section.
pub fn write_cstring<W: Write>(writer: &mut W, value: &str) -> JamoTextResult<()> {
    write_bytes(writer, value.as_bytes())?;
    write_u8(writer, 0)
}

pub fn read_cstring<R: Read>(reader: &mut R) -> JamoTextResult<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = read_u8(reader)?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    String::from_utf8(bytes)
        .map_err(|err| JamoTextErrorKind::Deserialize.with_error(anyhow::anyhow!(err)))
}
