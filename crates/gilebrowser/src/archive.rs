//! Directory downloads as ZIP archives with an exact Content-Length.
//!
//! Archives use the store method (verbatim bytes, no compression) and fixed
//! entry timestamps, which makes construction fully deterministic: writing
//! the same entry list twice produces byte-identical output. The handler
//! exploits that with a two-pass scheme - a dry run into a counting sink
//! yields the exact archive size for the Content-Length header, then the
//! same construction streams to the client.
//!
//! Entries are written with data descriptors (sizes and CRC after the data),
//! so the writer never needs to seek - it can stream straight into a
//! response body.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// One file scheduled for the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    /// Absolute path on disk.
    pub fs_path: PathBuf,
    /// Path inside the archive, e.g. `rootname/subdir/file.txt`.
    pub zip_name: String,
    /// Uncompressed size at collection time.
    pub size: u64,
}

/// Walks `dir` and returns every file with its archive name rooted at
/// `prefix`. Children are sorted by name so repeated collections produce the
/// same archive. Symlinked directories are not descended; symlinked files
/// are archived with their target's bytes. Unreadable entries are skipped.
pub fn collect_entries(dir: &Path, prefix: &str) -> Vec<ZipEntry> {
    let mut entries = Vec::new();
    collect_into(dir, prefix, &mut entries);
    entries
}

fn collect_into(dir: &Path, prefix: &str, out: &mut Vec<ZipEntry>) {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(_) => return,
    };
    let mut children: Vec<_> = read.flatten().collect();
    children.sort_by_key(|e| e.file_name());

    for entry in children {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();

        if file_type.is_dir() {
            collect_into(&path, &format!("{prefix}/{name}"), out);
        } else if file_type.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => out.push(ZipEntry {
                    fs_path: path,
                    zip_name: format!("{prefix}/{name}"),
                    size: meta.len(),
                }),
                _ => {}
            }
        } else if let Ok(meta) = entry.metadata() {
            out.push(ZipEntry {
                fs_path: path,
                zip_name: format!("{prefix}/{name}"),
                size: meta.len(),
            });
        }
    }
}

/// Measures the archive without producing it: same construction, counting
/// sink. The result equals the byte count of the real pass as long as the
/// underlying files are unchanged between the two.
pub fn dry_run_size(entries: &[ZipEntry]) -> io::Result<u64> {
    write_archive(&mut io::sink(), entries)
}

const LOCAL_HEADER_SIG: u32 = 0x04034b50;
const DESCRIPTOR_SIG: u32 = 0x08074b50;
const CENTRAL_HEADER_SIG: u32 = 0x02014b50;
const END_OF_DIRECTORY_SIG: u32 = 0x06054b50;
const ZIP64_END_OF_DIRECTORY_SIG: u32 = 0x06064b50;
const ZIP64_LOCATOR_SIG: u32 = 0x07064b50;
const ZIP64_EXTRA_ID: u16 = 0x0001;

const VERSION_DEFAULT: u16 = 20;
const VERSION_ZIP64: u16 = 45;
/// Bit 3: data descriptor follows the data. Bit 11: names are UTF-8.
const FLAGS: u16 = 0x0808;
const METHOD_STORE: u16 = 0;
/// Fixed DOS timestamp (1980-01-01 00:00) keeps repeated passes identical.
const DOS_TIME: u16 = 0;
const DOS_DATE: u16 = 0x0021;

const U16_LIMIT: u64 = 0xFFFF;
const U32_LIMIT: u64 = 0xFFFF_FFFF;

const COPY_CHUNK: usize = 32 * 1024;

struct WrittenEntry {
    zip_name: String,
    crc: u32,
    size: u64,
    offset: u64,
    zip64: bool,
}

struct CountedWrite<'a, W: Write> {
    inner: &'a mut W,
    written: u64,
}

impl<W: Write> CountedWrite<'_, W> {
    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn put_u16(&mut self, v: u16) -> io::Result<()> {
        self.put(&v.to_le_bytes())
    }

    fn put_u32(&mut self, v: u32) -> io::Result<()> {
        self.put(&v.to_le_bytes())
    }

    fn put_u64(&mut self, v: u64) -> io::Result<()> {
        self.put(&v.to_le_bytes())
    }
}

/// Writes `entries` to `out` as a store-mode ZIP archive and returns the
/// total bytes written.
///
/// A file that fails to open is skipped entirely, header and all - the same
/// policy in both passes, so a file that disappears between the dry run and
/// the real pass shortens the body (the caller logs the mismatch). An error
/// reading a file that did open aborts the archive.
pub fn write_archive<W: Write>(out: &mut W, entries: &[ZipEntry]) -> io::Result<u64> {
    let mut w = CountedWrite {
        inner: out,
        written: 0,
    };
    let mut written: Vec<WrittenEntry> = Vec::with_capacity(entries.len());

    for entry in entries {
        let mut file = match File::open(&entry.fs_path) {
            Ok(file) => file,
            Err(_) => continue,
        };

        // The header format must be committed before the data is sized, so
        // the zip64 decision rides on the collected size.
        let zip64 = entry.size >= U32_LIMIT;
        let offset = w.written;
        write_local_header(&mut w, &entry.zip_name, zip64)?;
        let (crc, size) = copy_file(&mut w, &mut file)?;
        write_descriptor(&mut w, crc, size, zip64)?;

        written.push(WrittenEntry {
            zip_name: entry.zip_name.clone(),
            crc,
            size,
            offset,
            zip64,
        });
    }

    let central_offset = w.written;
    for entry in &written {
        write_central_header(&mut w, entry)?;
    }
    let central_size = w.written - central_offset;

    write_end_of_directory(&mut w, written.len() as u64, central_size, central_offset)?;
    Ok(w.written)
}

fn write_local_header<W: Write>(
    w: &mut CountedWrite<'_, W>,
    name: &str,
    zip64: bool,
) -> io::Result<()> {
    let name = name.as_bytes();
    w.put_u32(LOCAL_HEADER_SIG)?;
    w.put_u16(if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT })?;
    w.put_u16(FLAGS)?;
    w.put_u16(METHOD_STORE)?;
    w.put_u16(DOS_TIME)?;
    w.put_u16(DOS_DATE)?;
    w.put_u32(0)?; // crc: in the descriptor
    if zip64 {
        w.put_u32(U32_LIMIT as u32)?;
        w.put_u32(U32_LIMIT as u32)?;
    } else {
        w.put_u32(0)?; // compressed size: in the descriptor
        w.put_u32(0)?; // uncompressed size: in the descriptor
    }
    w.put_u16(name.len() as u16)?;
    w.put_u16(if zip64 { 20 } else { 0 })?; // extra length
    w.put(name)?;
    if zip64 {
        // Placeholder zip64 extra; real sizes follow in the descriptor.
        w.put_u16(ZIP64_EXTRA_ID)?;
        w.put_u16(16)?;
        w.put_u64(0)?;
        w.put_u64(0)?;
    }
    Ok(())
}

fn copy_file<W: Write>(w: &mut CountedWrite<'_, W>, file: &mut File) -> io::Result<(u32, u64)> {
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        w.put(&buf[..n])?;
        total += n as u64;
    }
    Ok((hasher.finalize(), total))
}

fn write_descriptor<W: Write>(
    w: &mut CountedWrite<'_, W>,
    crc: u32,
    size: u64,
    zip64: bool,
) -> io::Result<()> {
    w.put_u32(DESCRIPTOR_SIG)?;
    w.put_u32(crc)?;
    if zip64 {
        w.put_u64(size)?;
        w.put_u64(size)?;
    } else {
        w.put_u32(size as u32)?;
        w.put_u32(size as u32)?;
    }
    Ok(())
}

fn write_central_header<W: Write>(
    w: &mut CountedWrite<'_, W>,
    entry: &WrittenEntry,
) -> io::Result<()> {
    let name = entry.zip_name.as_bytes();
    let size_overflow = entry.zip64 || entry.size >= U32_LIMIT;
    let offset_overflow = entry.offset >= U32_LIMIT;
    let mut extra_len = 0u16;
    if size_overflow {
        extra_len += 16;
    }
    if offset_overflow {
        extra_len += 8;
    }
    if extra_len > 0 {
        extra_len += 4; // extra field header
    }
    let version = if size_overflow || offset_overflow {
        VERSION_ZIP64
    } else {
        VERSION_DEFAULT
    };

    w.put_u32(CENTRAL_HEADER_SIG)?;
    w.put_u16(version)?; // version made by
    w.put_u16(version)?; // version needed to extract
    w.put_u16(FLAGS)?;
    w.put_u16(METHOD_STORE)?;
    w.put_u16(DOS_TIME)?;
    w.put_u16(DOS_DATE)?;
    w.put_u32(entry.crc)?;
    let stored_size = if size_overflow {
        U32_LIMIT as u32
    } else {
        entry.size as u32
    };
    w.put_u32(stored_size)?; // compressed
    w.put_u32(stored_size)?; // uncompressed
    w.put_u16(name.len() as u16)?;
    w.put_u16(extra_len)?;
    w.put_u16(0)?; // comment length
    w.put_u16(0)?; // disk number
    w.put_u16(0)?; // internal attributes
    w.put_u32(0)?; // external attributes
    w.put_u32(if offset_overflow {
        U32_LIMIT as u32
    } else {
        entry.offset as u32
    })?;
    w.put(name)?;
    if extra_len > 0 {
        w.put_u16(ZIP64_EXTRA_ID)?;
        w.put_u16(extra_len - 4)?;
        if size_overflow {
            w.put_u64(entry.size)?;
            w.put_u64(entry.size)?;
        }
        if offset_overflow {
            w.put_u64(entry.offset)?;
        }
    }
    Ok(())
}

fn write_end_of_directory<W: Write>(
    w: &mut CountedWrite<'_, W>,
    count: u64,
    central_size: u64,
    central_offset: u64,
) -> io::Result<()> {
    let needs_zip64 =
        count > U16_LIMIT || central_size >= U32_LIMIT || central_offset >= U32_LIMIT;

    if needs_zip64 {
        let zip64_eocd_offset = w.written;
        w.put_u32(ZIP64_END_OF_DIRECTORY_SIG)?;
        w.put_u64(44)?; // remaining record size
        w.put_u16(VERSION_ZIP64)?;
        w.put_u16(VERSION_ZIP64)?;
        w.put_u32(0)?; // this disk
        w.put_u32(0)?; // directory disk
        w.put_u64(count)?;
        w.put_u64(count)?;
        w.put_u64(central_size)?;
        w.put_u64(central_offset)?;

        w.put_u32(ZIP64_LOCATOR_SIG)?;
        w.put_u32(0)?;
        w.put_u64(zip64_eocd_offset)?;
        w.put_u32(1)?; // total disks
    }

    w.put_u32(END_OF_DIRECTORY_SIG)?;
    w.put_u16(0)?; // this disk
    w.put_u16(0)?; // directory disk
    w.put_u16(count.min(U16_LIMIT) as u16)?;
    w.put_u16(count.min(U16_LIMIT) as u16)?;
    w.put_u32(central_size.min(U32_LIMIT) as u32)?;
    w.put_u32(central_offset.min(U32_LIMIT) as u32)?;
    w.put_u16(0)?; // comment length
    Ok(())
}
