//! Flist manifest parsing — spec.md §3.
//!
//! A manifest line is pipe-delimited:
//! `path|hash|size|uname|gname|octal_perms|filetype|ctime|mtime|extended|dev`

use crate::error::{FsError, FsResult};
use serde::{Deserialize, Serialize};

/// The manifest's `filetype` field. Values match the integer encoding in
/// spec.md §3 exactly (directory is unused in practice but kept for
/// round-trip fidelity). Serializes as the same integer in the TOML
/// sidecar, so a sidecar's `Filetype` key matches the flist encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum FileKind {
    Socket,
    Symlink,
    Regular,
    Block,
    Directory,
    Char,
    Fifo,
}

impl FileKind {
    pub fn from_i64(v: i64) -> FsResult<Self> {
        Ok(match v {
            0 => FileKind::Socket,
            1 => FileKind::Symlink,
            2 => FileKind::Regular,
            3 => FileKind::Block,
            4 => FileKind::Directory,
            5 => FileKind::Char,
            6 => FileKind::Fifo,
            other => {
                return Err(FsError::BadManifest {
                    line: 0,
                    reason: format!("unknown filetype {other}"),
                });
            }
        })
    }

    pub fn as_i64(self) -> i64 {
        match self {
            FileKind::Socket => 0,
            FileKind::Symlink => 1,
            FileKind::Regular => 2,
            FileKind::Block => 3,
            FileKind::Directory => 4,
            FileKind::Char => 5,
            FileKind::Fifo => 6,
        }
    }

    pub fn is_special_device(self) -> bool {
        matches!(
            self,
            FileKind::Block | FileKind::Char | FileKind::Fifo | FileKind::Socket
        )
    }
}

impl From<FileKind> for i64 {
    fn from(k: FileKind) -> i64 {
        k.as_i64()
    }
}

impl TryFrom<i64> for FileKind {
    type Error = FsError;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        FileKind::from_i64(v)
    }
}

/// A single parsed manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub uname: String,
    pub gname: String,
    pub perms: u32,
    pub filetype: FileKind,
    pub ctime: i64,
    pub mtime: i64,
    pub extended: String,
    pub dev_major: u32,
    pub dev_minor: u32,
}

/// Parses `line` as a manifest record. `base`, if non-empty and a prefix of
/// the path field, is trimmed from the path (spec.md §3's `TrimBase`).
///
/// Fewer than 10 pipe-delimited fields is a parse error; non-octal
/// permissions and non-integer times are parse errors too (Testable
/// Property / S6).
pub fn parse_line(base: &str, line_no: usize, line: &str) -> FsResult<Option<Entry>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < 10 {
        return Err(FsError::BadManifest {
            line: line_no,
            reason: format!("expected at least 10 fields, found {}", fields.len()),
        });
    }

    let mut path = fields[0].to_string();
    if !base.is_empty() && path.starts_with(base) {
        path = path[base.len()..].to_string();
    }

    let size: u64 = fields[2].parse().map_err(|_| FsError::BadManifest {
        line: line_no,
        reason: format!("bad size field '{}'", fields[2]),
    })?;

    let perms = u32::from_str_radix(fields[5], 8).map_err(|_| FsError::BadManifest {
        line: line_no,
        reason: format!("bad octal perms field '{}'", fields[5]),
    })?;

    let filetype_num: i64 = fields[6].parse().map_err(|_| FsError::BadManifest {
        line: line_no,
        reason: format!("bad filetype field '{}'", fields[6]),
    })?;
    let filetype = FileKind::from_i64(filetype_num).map_err(|_| FsError::BadManifest {
        line: line_no,
        reason: format!("unknown filetype {filetype_num}"),
    })?;

    let ctime: i64 = fields[7].parse().map_err(|_| FsError::BadManifest {
        line: line_no,
        reason: format!("bad ctime field '{}'", fields[7]),
    })?;
    let mtime: i64 = fields[8].parse().map_err(|_| FsError::BadManifest {
        line: line_no,
        reason: format!("bad mtime field '{}'", fields[8]),
    })?;

    let (dev_major, dev_minor) = if fields.len() > 10 && !fields[10].is_empty() {
        let mut parts = fields[10].splitn(2, ',');
        let maj = parts
            .next()
            .unwrap_or("0")
            .parse()
            .unwrap_or(0);
        let min = parts.next().unwrap_or("0").parse().unwrap_or(0);
        (maj, min)
    } else {
        (0, 0)
    };

    Ok(Some(Entry {
        path,
        hash: fields[1].to_string(),
        size,
        uname: fields[3].to_string(),
        gname: fields[4].to_string(),
        perms,
        filetype,
        ctime,
        mtime,
        extended: fields[9].to_string(),
        dev_major,
        dev_minor,
    }))
}

/// Formats an `Entry` back into the canonical pipe-delimited wire shape.
/// `parse_line(base="", format_line(e)) == Ok(Some(e))` for any `e`
/// (Testable Property 1).
pub fn format_line(e: &Entry) -> String {
    format!(
        "{}|{}|{}|{}|{}|{:o}|{}|{}|{}|{}|{},{}",
        e.path,
        e.hash,
        e.size,
        e.uname,
        e.gname,
        e.perms,
        e.filetype.as_i64(),
        e.ctime,
        e.mtime,
        e.extended,
        e.dev_major,
        e.dev_minor,
    )
}

/// Parses a full manifest: iterates lines, skips blanks, and stops only on
/// I/O error — a bad individual line is reported to the caller (which, per
/// spec.md §4.5 / S6, should skip it and keep populating) rather than
/// aborting the whole parse.
pub fn parse_manifest(base: &str, contents: &str) -> Vec<(usize, FsResult<Option<Entry>>)> {
    contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, parse_line(base, i + 1, line)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Entry {
        Entry {
            path: "a/b.bin".into(),
            hash: "5d41402abc4b2a76b9719d911017c592".into(),
            size: 11,
            uname: "root".into(),
            gname: "root".into(),
            perms: 0o644,
            filetype: FileKind::Regular,
            ctime: 1000,
            mtime: 2000,
            extended: "".into(),
            dev_major: 0,
            dev_minor: 0,
        }
    }

    #[test]
    fn round_trip() {
        let e = sample();
        let line = format_line(&e);
        let parsed = parse_line("", 1, &line).unwrap().unwrap();
        assert_eq!(parsed, e);
    }

    #[test]
    fn empty_line_ignored() {
        assert!(parse_line("", 1, "").unwrap().is_none());
        assert!(parse_line("", 1, "   ").unwrap().is_none());
    }

    #[test]
    fn too_few_fields_is_error() {
        let err = parse_line("", 1, "a|b|3").unwrap_err();
        assert!(matches!(err, FsError::BadManifest { .. }));
    }

    #[test]
    fn bad_octal_perms_is_error() {
        let line = "a|h|1|u|g|999|2|1|1|";
        let err = parse_line("", 1, line).unwrap_err();
        assert!(matches!(err, FsError::BadManifest { .. }));
    }

    #[test]
    fn bad_time_is_error() {
        let line = "a|h|1|u|g|644|2|notanumber|1|";
        let err = parse_line("", 1, line).unwrap_err();
        assert!(matches!(err, FsError::BadManifest { .. }));
    }

    #[test]
    fn base_prefix_trimmed() {
        let line = "/mnt/root/a/b.bin|h|1|u|g|644|2|1|1|";
        let parsed = parse_line("/mnt/root/", 1, line).unwrap().unwrap();
        assert_eq!(parsed.path, "a/b.bin");
    }

    #[test]
    fn symlink_extended_and_dev_fields() {
        let line = "a/lnk|h|0|u|g|777|1|1|1|/target/path|";
        let parsed = parse_line("", 1, line).unwrap().unwrap();
        assert_eq!(parsed.extended, "/target/path");
        assert_eq!(parsed.filetype, FileKind::Symlink);

        let line = "a/dev|h|0|u|g|660|3|1|1||8,1";
        let parsed = parse_line("", 1, line).unwrap().unwrap();
        assert_eq!(parsed.dev_major, 8);
        assert_eq!(parsed.dev_minor, 1);
    }
}
