use crate::{ConversionError, ImageBuffer};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::path::PathBuf;

/// Type tag of a port. Governs value conversion and link compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Brand {
    Numeric,
    String,
    Boolean,
    Enum,
    Image,
    Rectangle,
    Folder,
}

impl Brand {
    /// Whether a value of this brand may flow into a port of `target` brand.
    pub fn converts_to(self, target: Brand) -> bool {
        use Brand::*;
        if self == target {
            return true;
        }
        matches!(
            (self, target),
            (Numeric, String)
                | (Boolean, String)
                | (Enum, String)
                | (Folder, String)
                | (Numeric, Boolean)
                | (Boolean, Numeric)
                | (String, Folder)
        )
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Brand::Numeric => "numeric",
            Brand::String => "string",
            Brand::Boolean => "boolean",
            Brand::Enum => "enum",
            Brand::Image => "image",
            Brand::Rectangle => "rectangle",
            Brand::Folder => "folder",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Typed value held by a port. The variant always matches the port's brand.
#[derive(Debug, Clone, PartialEq)]
pub enum PortValue {
    Numeric(f64),
    String(String),
    Boolean(bool),
    Enum { selected: String, options: Vec<String> },
    Image(Option<ImageBuffer>),
    Rectangle(Rect),
    Folder(PathBuf),
}

impl PortValue {
    pub fn brand(&self) -> Brand {
        match self {
            PortValue::Numeric(_) => Brand::Numeric,
            PortValue::String(_) => Brand::String,
            PortValue::Boolean(_) => Brand::Boolean,
            PortValue::Enum { .. } => Brand::Enum,
            PortValue::Image(_) => Brand::Image,
            PortValue::Rectangle(_) => Brand::Rectangle,
            PortValue::Folder(_) => Brand::Folder,
        }
    }

    /// Neutral value for a brand, used when a template declares nothing better.
    pub fn default_for(brand: Brand) -> Self {
        match brand {
            Brand::Numeric => PortValue::Numeric(0.0),
            Brand::String => PortValue::String(String::new()),
            Brand::Boolean => PortValue::Boolean(false),
            Brand::Enum => PortValue::Enum {
                selected: String::new(),
                options: Vec::new(),
            },
            Brand::Image => PortValue::Image(None),
            Brand::Rectangle => PortValue::Rectangle(Rect::default()),
            Brand::Folder => PortValue::Folder(PathBuf::new()),
        }
    }

    pub fn enumeration(selected: impl Into<String>, options: &[&str]) -> Self {
        PortValue::Enum {
            selected: selected.into(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PortValue::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PortValue::String(s) => Some(s),
            PortValue::Enum { selected, .. } => Some(selected),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PortValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageBuffer> {
        match self {
            PortValue::Image(image) => image.as_ref(),
            _ => None,
        }
    }

    pub fn as_rect(&self) -> Option<Rect> {
        match self {
            PortValue::Rectangle(r) => Some(*r),
            _ => None,
        }
    }

    /// Converts a raw client or persisted value into a value of this port's brand.
    ///
    /// `self` is the port's current value; enum options are taken from it.
    pub fn convert_from(&self, raw: &serde_json::Value) -> Result<PortValue, ConversionError> {
        let incompatible = || ConversionError::Incompatible {
            brand: self.brand(),
            raw: raw.to_string(),
        };

        match self {
            PortValue::Numeric(_) => match raw {
                serde_json::Value::Number(n) => n.as_f64().map(PortValue::Numeric).ok_or_else(incompatible),
                serde_json::Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(PortValue::Numeric)
                    .map_err(|_| incompatible()),
                serde_json::Value::Bool(b) => Ok(PortValue::Numeric(if *b { 1.0 } else { 0.0 })),
                _ => Err(incompatible()),
            },
            PortValue::String(_) => match raw {
                serde_json::Value::String(s) => Ok(PortValue::String(s.clone())),
                serde_json::Value::Number(n) => Ok(PortValue::String(n.to_string())),
                serde_json::Value::Bool(b) => Ok(PortValue::String(b.to_string())),
                serde_json::Value::Null => Ok(PortValue::String(String::new())),
                _ => Err(incompatible()),
            },
            PortValue::Boolean(_) => match raw {
                serde_json::Value::Bool(b) => Ok(PortValue::Boolean(*b)),
                serde_json::Value::Number(n) => Ok(PortValue::Boolean(n.as_f64().unwrap_or(0.0) != 0.0)),
                serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(PortValue::Boolean(true)),
                    "false" | "0" => Ok(PortValue::Boolean(false)),
                    _ => Err(incompatible()),
                },
                _ => Err(incompatible()),
            },
            PortValue::Enum { options, .. } => {
                let selected = raw.as_str().ok_or_else(incompatible)?;
                if options.is_empty() || options.iter().any(|o| o == selected) {
                    Ok(PortValue::Enum {
                        selected: selected.to_string(),
                        options: options.clone(),
                    })
                } else {
                    Err(ConversionError::UnknownOption {
                        value: selected.to_string(),
                        options: options.clone(),
                    })
                }
            }
            PortValue::Image(_) => match raw {
                serde_json::Value::Null => Ok(PortValue::Image(None)),
                _ => Err(ConversionError::ImageFromRaw),
            },
            PortValue::Rectangle(_) => serde_json::from_value::<Rect>(raw.clone())
                .map(PortValue::Rectangle)
                .map_err(|_| incompatible()),
            PortValue::Folder(_) => match raw {
                serde_json::Value::String(s) => Ok(PortValue::Folder(PathBuf::from(s))),
                _ => Err(incompatible()),
            },
        }
    }

    /// Converts a value coming from a linked output into this port's brand.
    pub fn assign_from(&self, source: &PortValue) -> Result<PortValue, ConversionError> {
        match (self, source) {
            (PortValue::Enum { .. }, _) => self.convert_from(&source.to_raw()),
            (PortValue::Image(_), PortValue::Image(image)) => Ok(PortValue::Image(image.clone())),
            _ if self.brand() == source.brand() => Ok(source.clone()),
            _ => self.convert_from(&source.to_raw()),
        }
    }

    /// JSON rendition used for display, persistence and cross-brand conversion.
    ///
    /// Images are rendered as their dimensions only; pixels travel through export.
    pub fn to_raw(&self) -> serde_json::Value {
        match self {
            PortValue::Numeric(n) => json!(n),
            PortValue::String(s) => json!(s),
            PortValue::Boolean(b) => json!(b),
            PortValue::Enum { selected, .. } => json!(selected),
            PortValue::Image(None) => serde_json::Value::Null,
            PortValue::Image(Some(image)) => json!({
                "width": image.width(),
                "height": image.height(),
                "channels": image.channels(),
            }),
            PortValue::Rectangle(r) => json!(r),
            PortValue::Folder(p) => json!(p.to_string_lossy()),
        }
    }
}

impl From<f64> for PortValue {
    fn from(n: f64) -> Self {
        PortValue::Numeric(n)
    }
}

impl From<&str> for PortValue {
    fn from(s: &str) -> Self {
        PortValue::String(s.to_string())
    }
}

impl From<String> for PortValue {
    fn from(s: String) -> Self {
        PortValue::String(s)
    }
}

impl From<bool> for PortValue {
    fn from(b: bool) -> Self {
        PortValue::Boolean(b)
    }
}

impl From<ImageBuffer> for PortValue {
    fn from(image: ImageBuffer) -> Self {
        PortValue::Image(Some(image))
    }
}

impl From<Rect> for PortValue {
    fn from(r: Rect) -> Self {
        PortValue::Rectangle(r)
    }
}
