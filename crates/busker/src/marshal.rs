//! Type Marshaller
//!
//! Converts native Rust values to and from [`WireValue`]. Decoding is strict:
//! the wire shape must match the declared kind exactly, and narrow integers
//! must fit without truncation.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use busker_proto::{FileRef, ValueKind, WireValue};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarshalError {
    #[error("expected {expected}, got {found}")]
    KindMismatch {
        expected: ValueKind,
        found: &'static str,
    },

    #[error("{value} does not fit in {target}")]
    OutOfRange { value: String, target: &'static str },

    #[error("float {0} is not finite")]
    NonFinite(f64),

    #[error("path {0} is not valid UTF-8")]
    NonUtf8Path(PathBuf),

    #[error("unit has no wire form")]
    Unit,

    #[error("{at}: {source}")]
    Nested {
        at: String,
        #[source]
        source: Box<MarshalError>,
    },
}

impl MarshalError {
    fn mismatch<T: Marshal>(found: &WireValue) -> Self {
        MarshalError::KindMismatch {
            expected: T::kind(),
            found: found.shape(),
        }
    }

    fn at(self, at: impl Into<String>) -> Self {
        MarshalError::Nested {
            at: at.into(),
            source: Box::new(self),
        }
    }
}

/// A native type with a wire representation.
pub trait Marshal: Sized {
    fn kind() -> ValueKind;

    fn encode(self) -> Result<WireValue, MarshalError>;

    fn decode(value: WireValue) -> Result<Self, MarshalError>;

    /// Validate without keeping the decoded value.
    fn check(value: &WireValue) -> Result<(), MarshalError> {
        Self::decode(value.clone()).map(drop)
    }

    /// Encode in return position. `None` means the tool returned nothing.
    fn encode_result(self) -> Result<Option<WireValue>, MarshalError> {
        self.encode().map(Some)
    }
}

impl Marshal for bool {
    fn kind() -> ValueKind {
        ValueKind::Bool
    }

    fn encode(self) -> Result<WireValue, MarshalError> {
        Ok(WireValue::Bool(self))
    }

    fn decode(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Bool(b) => Ok(b),
            other => Err(MarshalError::mismatch::<Self>(&other)),
        }
    }
}

impl Marshal for i64 {
    fn kind() -> ValueKind {
        ValueKind::Integer
    }

    fn encode(self) -> Result<WireValue, MarshalError> {
        Ok(WireValue::Int(self))
    }

    fn decode(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Int(n) => Ok(n),
            other => Err(MarshalError::mismatch::<Self>(&other)),
        }
    }
}

macro_rules! narrow_int {
    ($($t:ty),*) => {$(
        impl Marshal for $t {
            fn kind() -> ValueKind {
                ValueKind::Integer
            }

            fn encode(self) -> Result<WireValue, MarshalError> {
                i64::try_from(self)
                    .map(WireValue::Int)
                    .map_err(|_| MarshalError::OutOfRange {
                        value: self.to_string(),
                        target: "int",
                    })
            }

            fn decode(value: WireValue) -> Result<Self, MarshalError> {
                match value {
                    WireValue::Int(n) => <$t>::try_from(n).map_err(|_| MarshalError::OutOfRange {
                        value: n.to_string(),
                        target: stringify!($t),
                    }),
                    other => Err(MarshalError::mismatch::<Self>(&other)),
                }
            }
        }
    )*};
}

narrow_int!(i8, i16, i32, u8, u16, u32, u64, usize);

impl Marshal for f64 {
    fn kind() -> ValueKind {
        ValueKind::Float
    }

    fn encode(self) -> Result<WireValue, MarshalError> {
        if self.is_finite() {
            Ok(WireValue::Float(self))
        } else {
            Err(MarshalError::NonFinite(self))
        }
    }

    fn decode(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Float(x) if x.is_finite() => Ok(x),
            WireValue::Float(x) => Err(MarshalError::NonFinite(x)),
            other => Err(MarshalError::mismatch::<Self>(&other)),
        }
    }
}

/// Only floats that survive the trip through `f32` unchanged decode.
impl Marshal for f32 {
    fn kind() -> ValueKind {
        ValueKind::Float
    }

    fn encode(self) -> Result<WireValue, MarshalError> {
        f64::from(self).encode()
    }

    fn decode(value: WireValue) -> Result<Self, MarshalError> {
        let x = f64::decode(value)?;
        let narrowed = x as f32;
        if f64::from(narrowed) == x {
            Ok(narrowed)
        } else {
            Err(MarshalError::OutOfRange {
                value: x.to_string(),
                target: "f32",
            })
        }
    }
}

impl Marshal for String {
    fn kind() -> ValueKind {
        ValueKind::Text
    }

    fn encode(self) -> Result<WireValue, MarshalError> {
        Ok(WireValue::Text(self))
    }

    fn decode(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Text(s) => Ok(s),
            other => Err(MarshalError::mismatch::<Self>(&other)),
        }
    }
}

impl<T: Marshal> Marshal for Vec<T> {
    fn kind() -> ValueKind {
        ValueKind::list_of(T::kind())
    }

    fn encode(self) -> Result<WireValue, MarshalError> {
        self.into_iter()
            .enumerate()
            .map(|(i, item)| item.encode().map_err(|e| e.at(format!("[{}]", i))))
            .collect::<Result<Vec<_>, _>>()
            .map(WireValue::List)
    }

    fn decode(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| T::decode(item).map_err(|e| e.at(format!("[{}]", i))))
                .collect(),
            other => Err(MarshalError::mismatch::<Self>(&other)),
        }
    }
}

impl<T: Marshal> Marshal for BTreeMap<String, T> {
    fn kind() -> ValueKind {
        ValueKind::map_of(T::kind())
    }

    fn encode(self) -> Result<WireValue, MarshalError> {
        self.into_iter()
            .map(|(k, v)| match v.encode() {
                Ok(v) => Ok((k, v)),
                Err(e) => Err(e.at(format!("[{:?}]", k))),
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(WireValue::Map)
    }

    fn decode(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| match T::decode(v) {
                    Ok(v) => Ok((k, v)),
                    Err(e) => Err(e.at(format!("[{:?}]", k))),
                })
                .collect(),
            other => Err(MarshalError::mismatch::<Self>(&other)),
        }
    }
}

impl<T: Marshal> Marshal for HashMap<String, T> {
    fn kind() -> ValueKind {
        ValueKind::map_of(T::kind())
    }

    fn encode(self) -> Result<WireValue, MarshalError> {
        self.into_iter().collect::<BTreeMap<_, _>>().encode()
    }

    fn decode(value: WireValue) -> Result<Self, MarshalError> {
        BTreeMap::<String, T>::decode(value).map(|m| m.into_iter().collect())
    }
}

impl Marshal for () {
    fn kind() -> ValueKind {
        ValueKind::Unit
    }

    fn encode(self) -> Result<WireValue, MarshalError> {
        Err(MarshalError::Unit)
    }

    fn decode(_value: WireValue) -> Result<Self, MarshalError> {
        Err(MarshalError::Unit)
    }

    fn encode_result(self) -> Result<Option<WireValue>, MarshalError> {
        Ok(None)
    }
}

/// A file passed by reference. Only path and name cross the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    path: PathBuf,
    name: String,
}

impl FileHandle {
    /// Reference an existing file under a display name.
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> std::io::Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not an existing file", path.display()),
            ));
        }
        Ok(Self {
            path,
            name: name.into(),
        })
    }

    /// Write `bytes` to `dir/name`, creating `dir` as needed, and reference
    /// the new file. `name` must be a plain file name.
    pub fn from_bytes(
        dir: &Path,
        name: impl Into<String>,
        bytes: impl AsRef<[u8]>,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let plain = Path::new(&name)
            .file_name()
            .is_some_and(|n| n == std::ffi::OsStr::new(&name));
        if !plain {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("`{}` is not a plain file name", name),
            ));
        }
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&name);
        std::fs::write(&path, bytes)?;
        Self::new(path, name)
    }

    /// Reference an existing file, named after its last path component.
    pub fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(path, name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Marshal for FileHandle {
    fn kind() -> ValueKind {
        ValueKind::File
    }

    fn encode(self) -> Result<WireValue, MarshalError> {
        let path = self
            .path
            .to_str()
            .ok_or_else(|| MarshalError::NonUtf8Path(self.path.clone()))?
            .to_string();
        Ok(WireValue::File(FileRef {
            path,
            name: self.name,
        }))
    }

    fn decode(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::File(FileRef { path, name }) => Ok(Self {
                path: PathBuf::from(path),
                name,
            }),
            other => Err(MarshalError::mismatch::<Self>(&other)),
        }
    }
}
