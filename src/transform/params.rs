use std::fmt;
use std::str::FromStr;

/// Rejected request parameter; the message is returned to the client verbatim.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ParamError(pub String);

fn invalid(kind: &str, value: &str) -> ParamError {
    ParamError(format!("Invalid {}: {}", kind, value))
}

fn parse_list<T: FromStr, const N: usize>(kind: &str, value: &str) -> Result<[T; N], ParamError> {
    let parts: Vec<T> = value
        .split(',')
        .map(|p| p.trim().parse::<T>().map_err(|_| invalid(kind, value)))
        .collect::<Result<_, _>>()?;
    parts.try_into().map_err(|_| invalid(kind, value))
}

/// Rectangular portion of the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Region {
    Full,
    Square,
    Pixels { x: u32, y: u32, w: u32, h: u32 },
    Percent { x: f64, y: f64, w: f64, h: f64 },
}

impl FromStr for Region {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Region::Full),
            "square" => Ok(Region::Square),
            _ => {
                if let Some(pct) = s.strip_prefix("pct:") {
                    let [x, y, w, h] = parse_list::<f64, 4>("region", pct)?;
                    if x < 0.0 || y < 0.0 || w <= 0.0 || h <= 0.0 {
                        return Err(invalid("region", s));
                    }
                    Ok(Region::Percent { x, y, w, h })
                } else {
                    let [x, y, w, h] = parse_list::<u32, 4>("region", s)?;
                    if w == 0 || h == 0 {
                        return Err(invalid("region", s));
                    }
                    Ok(Region::Pixels { x, y, w, h })
                }
            }
        }
    }
}

impl Region {
    /// Pixel rectangle `(x, y, w, h)` within an image of `width` x `height`,
    /// clipped to the image bounds.
    pub fn resolve(&self, width: u32, height: u32) -> Result<(u32, u32, u32, u32), ParamError> {
        let (x, y, w, h) = match *self {
            Region::Full => return Ok((0, 0, width, height)),
            Region::Square => {
                let side = width.min(height);
                return Ok(((width - side) / 2, (height - side) / 2, side, side));
            }
            Region::Pixels { x, y, w, h } => (x, y, w, h),
            Region::Percent { x, y, w, h } => {
                let px = |pct: f64, total: u32| (pct * total as f64 / 100.0).round() as u32;
                (px(x, width), px(y, height), px(w, width).max(1), px(h, height).max(1))
            }
        };
        if x >= width || y >= height {
            return Err(ParamError("Region is outside the image bounds".into()));
        }
        Ok((x, y, w.min(width - x), h.min(height - y)))
    }
}

/// Output dimensions, relative to the extracted region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Size {
    Full,
    Max,
    Width(u32),
    Height(u32),
    Percent(f64),
    Exact(u32, u32),
    BestFit(u32, u32),
}

impl FromStr for Size {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| v.parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(|| invalid("size", s));
        match s {
            "full" => Ok(Size::Full),
            "max" => Ok(Size::Max),
            _ => {
                if let Some(pct) = s.strip_prefix("pct:") {
                    let n: f64 = pct.parse().map_err(|_| invalid("size", s))?;
                    if n <= 0.0 {
                        return Err(invalid("size", s));
                    }
                    return Ok(Size::Percent(n));
                }
                let (best_fit, dims) = match s.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, s),
                };
                match dims.split_once(',') {
                    Some(("", h)) if !best_fit => Ok(Size::Height(parse(h)?)),
                    Some((w, "")) if !best_fit => Ok(Size::Width(parse(w)?)),
                    Some((w, h)) if best_fit => Ok(Size::BestFit(parse(w)?, parse(h)?)),
                    Some((w, h)) => Ok(Size::Exact(parse(w)?, parse(h)?)),
                    None => Err(invalid("size", s)),
                }
            }
        }
    }
}

impl Size {
    pub fn resolve(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = |v: u32, factor: f64| ((v as f64 * factor).round() as u32).max(1);
        match *self {
            Size::Full | Size::Max => (width, height),
            Size::Width(w) => (w, scale(height, w as f64 / width as f64)),
            Size::Height(h) => (scale(width, h as f64 / height as f64), h),
            Size::Percent(p) => (scale(width, p / 100.0), scale(height, p / 100.0)),
            Size::Exact(w, h) => (w, h),
            Size::BestFit(w, h) => {
                let factor = (w as f64 / width as f64).min(h as f64 / height as f64);
                (scale(width, factor), scale(height, factor))
            }
        }
    }
}

/// Right-angle rotation, optionally mirrored first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotation {
    pub mirror: bool,
    pub degrees: u16,
}

impl FromStr for Rotation {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mirror, degrees) = match s.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let degrees: f64 = degrees.parse().map_err(|_| invalid("rotation", s))?;
        match degrees {
            d if d == 0.0 || d == 360.0 => Ok(Rotation { mirror, degrees: 0 }),
            d if d == 90.0 => Ok(Rotation { mirror, degrees: 90 }),
            d if d == 180.0 => Ok(Rotation { mirror, degrees: 180 }),
            d if d == 270.0 => Ok(Rotation { mirror, degrees: 270 }),
            _ => Err(ParamError(format!("Unsupported rotation: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Default,
    Color,
    Gray,
    Bitonal,
}

impl FromStr for Quality {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Quality::Default),
            "color" => Ok(Quality::Color),
            "gray" => Ok(Quality::Gray),
            "bitonal" => Ok(Quality::Bitonal),
            _ => Err(invalid("quality", s)),
        }
    }
}

/// Output encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Jpg,
    Png,
    Gif,
    Webp,
    Tif,
}

impl Format {
    pub const ALL: [Format; 5] = [Format::Jpg, Format::Png, Format::Gif, Format::Webp, Format::Tif];

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Jpg => "image/jpeg",
            Format::Png => "image/png",
            Format::Gif => "image/gif",
            Format::Webp => "image/webp",
            Format::Tif => "image/tiff",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Jpg => write!(f, "jpg"),
            Format::Png => write!(f, "png"),
            Format::Gif => write!(f, "gif"),
            Format::Webp => write!(f, "webp"),
            Format::Tif => write!(f, "tif"),
        }
    }
}

impl FromStr for Format {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jpg" => Ok(Format::Jpg),
            "png" => Ok(Format::Png),
            "gif" => Ok(Format::Gif),
            "webp" => Ok(Format::Webp),
            "tif" => Ok(Format::Tif),
            _ => Err(ParamError(format!("Unsupported format: {}", s))),
        }
    }
}

/// A parsed IIIF Image API 2 request.
#[derive(Debug, Clone, PartialEq)]
pub enum IiifRequest {
    Info {
        identifier: String,
        /// URI of the image service (`@id` in info.json).
        base_uri: String,
    },
    Image {
        identifier: String,
        region: Region,
        size: Size,
        rotation: Rotation,
        quality: Quality,
        format: Format,
    },
}

impl FromStr for IiifRequest {
    type Err = ParamError;

    /// Parses a full request URI. Only the trailing segments are interpreted,
    /// so any route or stage prefix before the identifier is accepted.
    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let uri = uri.split(['?', '#']).next().unwrap_or_default();
        let path_start = uri.find("://").map(|i| i + 3).unwrap_or(0);
        let path = uri[path_start..].find('/').map(|i| &uri[path_start + i..]).unwrap_or("/");
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [.., identifier, "info.json"] => Ok(IiifRequest::Info {
                identifier: identifier.to_string(),
                base_uri: uri.trim_end_matches("/info.json").to_string(),
            }),
            [.., identifier, region, size, rotation, file] => {
                let (quality, format) = file
                    .rsplit_once('.')
                    .ok_or_else(|| ParamError(format!("Missing format: {}", file)))?;
                Ok(IiifRequest::Image {
                    identifier: identifier.to_string(),
                    region: region.parse()?,
                    size: size.parse()?,
                    rotation: rotation.parse()?,
                    quality: quality.parse()?,
                    format: format.parse()?,
                })
            }
            _ => Err(ParamError(format!("Invalid IIIF request: {}", path))),
        }
    }
}
