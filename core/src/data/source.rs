//! Plain-text dataset descriptions.
//!
//! - Video list: one `path length label` triple per line.
//! - Shot list: one `shotfile_path length` pair per line, in the same order as the video list.
//! - Shot file: whitespace-separated ascending frame positions at which a new shot starts.
//!
//! Blank lines are ignored everywhere.

use super::{DataError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// One training video: a directory of frames, its length in frames and its class label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRecord {
    pub path: PathBuf,
    pub duration: usize,
    pub label: i32,
}

/// A reference to a video's shot-boundary file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotSource {
    pub path: PathBuf,
    pub length: usize,
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn field<T: FromStr>(path: &Path, line: usize, name: &str, token: Option<&str>) -> Result<T> {
    let token = token.ok_or_else(|| DataError::Parse {
        path: path.to_path_buf(),
        line,
        message: format!("missing {name}"),
    })?;
    token.parse().map_err(|_| DataError::Parse {
        path: path.to_path_buf(),
        line,
        message: format!("invalid {name} `{token}`"),
    })
}

fn check_exhausted<'a>(
    path: &Path,
    line: usize,
    mut tokens: impl Iterator<Item = &'a str>,
) -> Result<()> {
    match tokens.next() {
        Some(extra) => Err(DataError::Parse {
            path: path.to_path_buf(),
            line,
            message: format!("unexpected trailing field `{extra}`"),
        }),
        None => Ok(()),
    }
}

/// Reads a video list file.
pub fn read_video_list(path: &Path) -> Result<Vec<VideoRecord>> {
    let text = read(path)?;
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let mut tokens = line.split_whitespace().peekable();
        if tokens.peek().is_none() {
            continue;
        }
        let video: String = field(path, line_no, "path", tokens.next())?;
        let duration = field(path, line_no, "length", tokens.next())?;
        let label = field(path, line_no, "label", tokens.next())?;
        check_exhausted(path, line_no, tokens)?;
        records.push(VideoRecord {
            path: PathBuf::from(video),
            duration,
            label,
        });
    }
    Ok(records)
}

/// Reads a shot list file.
pub fn read_shot_sources(path: &Path) -> Result<Vec<ShotSource>> {
    let text = read(path)?;
    let mut sources = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let mut tokens = line.split_whitespace().peekable();
        if tokens.peek().is_none() {
            continue;
        }
        let shot_file: String = field(path, line_no, "shot file path", tokens.next())?;
        let length = field(path, line_no, "length", tokens.next())?;
        check_exhausted(path, line_no, tokens)?;
        sources.push(ShotSource {
            path: PathBuf::from(shot_file),
            length,
        });
    }
    Ok(sources)
}

/// Reads the cut positions from one shot file.
pub fn read_cut_points(path: &Path) -> Result<Vec<usize>> {
    let text = read(path)?;
    let mut cuts = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        for token in line.split_whitespace() {
            cuts.push(field(path, idx + 1, "cut position", Some(token))?);
        }
    }
    Ok(cuts)
}
