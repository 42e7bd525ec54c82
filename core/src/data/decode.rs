//! Reading sampled segments from frame directories.
//!
//! A video is stored as a directory of still images, one per frame, named by a printf-style
//! pattern such as `image_%04d.jpg`. Optical flow is stored as two grayscale images per frame,
//! one per direction, e.g. `flow_x_0001.jpg` and `flow_y_0001.jpg` from `flow_%c_%04d.jpg`.
//!
//! Decoded segments are stacked along the channel axis into a planar `[C, H, W]` tensor:
//! every frame contributes 3 channels (blue, green, red) or 2 channels (flow x, flow y), in
//! segment order. Colour planes use BGR order so per-channel means computed for BGR-trained
//! networks, such as `[104, 117, 123]`, line up.

use super::source::VideoRecord;
use super::{DataError, Result};
use crate::tensor::Tensor;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// What the frame images contain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    #[default]
    Rgb,
    Flow,
}

impl Modality {
    /// Distance from a cut position back to the last frame of the previous shot.
    pub fn cut_gap(self) -> usize {
        match self {
            Self::Rgb => 1,
            Self::Flow => 2,
        }
    }

    /// Last usable frame of a video with `length` frames.
    pub fn last_frame(self, length: usize) -> usize {
        match self {
            Self::Rgb => length,
            Self::Flow => length.saturating_sub(1),
        }
    }

    /// Channels contributed by one decoded frame.
    pub fn channels_per_frame(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Flow => 2,
        }
    }

    pub fn default_pattern(self) -> &'static str {
        match self {
            Self::Rgb => "image_%04d.jpg",
            Self::Flow => "flow_%c_%04d.jpg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Frame { width: usize, zero_pad: bool },
    Direction,
}

/// A parsed frame file-name pattern.
///
/// Supports `%d` and `%Nd` / `%0Nd` for the frame number, `%c` for the flow direction
/// (`x` or `y`) and `%%` for a literal percent sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePattern {
    raw: String,
    tokens: Vec<Token>,
}

impl NamePattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let invalid = |reason: &str| DataError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch != '%' {
                literal.push(ch);
                continue;
            }
            let zero_pad = chars.next_if_eq(&'0').is_some();
            let mut width = 0usize;
            while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                width = width * 10 + digit as usize;
                chars.next();
            }
            let token = match chars.next() {
                Some('%') if !zero_pad && width == 0 => {
                    literal.push('%');
                    continue;
                }
                Some('d') => Token::Frame { width, zero_pad },
                Some('c') if !zero_pad && width == 0 => Token::Direction,
                Some(other) => return Err(invalid(&format!("unsupported directive `%{other}`"))),
                None => return Err(invalid("dangling `%`")),
            };
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(token);
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        if !tokens.iter().any(|t| matches!(t, Token::Frame { .. })) {
            return Err(invalid("no frame number directive"));
        }
        Ok(Self {
            raw: pattern.to_string(),
            tokens,
        })
    }

    /// File name of `frame`, with `direction` substituted for `%c`.
    pub fn render(&self, frame: usize, direction: char) -> String {
        let mut name = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => name.push_str(text),
                &Token::Frame { width, zero_pad } => {
                    if zero_pad {
                        name.push_str(&format!("{frame:0width$}"));
                    } else {
                        name.push_str(&format!("{frame:>width$}"));
                    }
                }
                Token::Direction => name.push(direction),
            }
        }
        name
    }

    pub fn has_direction(&self) -> bool {
        self.tokens.contains(&Token::Direction)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for NamePattern {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A decoded training sample: stacked frames plus the video's label.
#[derive(Debug, Clone)]
pub struct Datum {
    pub data: Tensor<u8, 3>,
    pub label: i32,
}

impl Datum {
    pub fn channels(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn height(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[2]
    }
}

/// Turns sampled segment offsets into a [`Datum`].
///
/// Implementations run on the prefetch worker thread.
pub trait SegmentDecoder: Send {
    /// Decodes `num_frames` consecutive frames starting at each 1-based offset in `offsets`.
    fn decode(&self, record: &VideoRecord, offsets: &[usize], num_frames: usize)
    -> Result<Datum>;
}

/// Decodes segments from per-frame image files with the `image` crate.
#[derive(Debug, Clone)]
pub struct ImageSequenceDecoder {
    modality: Modality,
    pattern: NamePattern,
    new_height: u32,
    new_width: u32,
}

impl ImageSequenceDecoder {
    /// Creates a decoder.
    ///
    /// `pattern` falls back to the modality's default. Frames are resized to
    /// `new_height x new_width` when both are non-zero.
    ///
    /// # Errors
    ///
    /// `InvalidPattern` if the pattern does not parse, or if a flow pattern has no `%c`.
    pub fn new(
        modality: Modality,
        pattern: Option<&str>,
        new_height: u32,
        new_width: u32,
    ) -> Result<Self> {
        let pattern = NamePattern::parse(pattern.unwrap_or(modality.default_pattern()))?;
        if modality == Modality::Flow && !pattern.has_direction() {
            return Err(DataError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "flow patterns need a `%c` direction directive".into(),
            });
        }
        Ok(Self {
            modality,
            pattern,
            new_height,
            new_width,
        })
    }

    pub fn pattern(&self) -> &NamePattern {
        &self.pattern
    }

    fn load(&self, path: &Path, size: &mut Option<(u32, u32)>) -> Result<DynamicImage> {
        let img = image::open(path).map_err(|source| DataError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let img = if self.new_height > 0 && self.new_width > 0 {
            img.resize_exact(self.new_width, self.new_height, FilterType::Triangle)
        } else {
            img
        };

        let (width, height) = img.dimensions();
        match size {
            None => *size = Some((height, width)),
            Some(expected) if *expected != (height, width) => {
                return Err(DataError::FrameSize {
                    path: path.to_path_buf(),
                    expected: *expected,
                    got: (height, width),
                });
            }
            Some(_) => {}
        }
        Ok(img)
    }
}

impl SegmentDecoder for ImageSequenceDecoder {
    fn decode(
        &self,
        record: &VideoRecord,
        offsets: &[usize],
        num_frames: usize,
    ) -> Result<Datum> {
        if offsets.is_empty() || num_frames == 0 {
            return Err(DataError::EmptySegment {
                path: record.path.clone(),
            });
        }

        let mut planes: Vec<u8> = Vec::new();
        let mut channels = 0;
        let mut size = None;
        for &offset in offsets {
            for frame in offset..offset + num_frames {
                match self.modality {
                    Modality::Rgb => {
                        let path = record.path.join(self.pattern.render(frame, 'x'));
                        let rgb = self.load(&path, &mut size)?.to_rgb8();
                        let raw = rgb.as_raw();
                        for c in [2, 1, 0] {
                            planes.extend(raw.iter().skip(c).step_by(3));
                        }
                    }
                    Modality::Flow => {
                        for direction in ['x', 'y'] {
                            let path = record.path.join(self.pattern.render(frame, direction));
                            let luma = self.load(&path, &mut size)?.to_luma8();
                            planes.extend_from_slice(luma.as_raw());
                        }
                    }
                }
                channels += self.modality.channels_per_frame();
            }
        }

        let (height, width) = size.unwrap_or((0, 0));
        let data = Tensor::new(planes, [channels, height as usize, width as usize])?;
        Ok(Datum {
            data,
            label: record.label,
        })
    }
}
